//! In-process store used by tests. A single mutex stands in for row locks.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::{BalanceMutation, CredentialStore, TokenRotation, UserMutation};
use crate::{
    auth::repo_types::{NewUser, RefreshToken, User},
    credits::repo_types::StudentCredit,
    error::AppError,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: HashMap<i64, User>,
    tokens: HashMap<String, RefreshToken>,
    credits: HashMap<i64, StudentCredit>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct row access for arranging test fixtures.
    pub fn edit_user(&self, id: i64, f: impl FnOnce(&mut User)) {
        let mut inner = self.inner.lock().unwrap();
        f(inner.users.get_mut(&id).expect("user exists"));
    }

    pub fn user_raw(&self, id: i64) -> Option<User> {
        self.inner.lock().unwrap().users.get(&id).cloned()
    }

    pub fn edit_token(&self, token: &str, f: impl FnOnce(&mut RefreshToken)) {
        let mut inner = self.inner.lock().unwrap();
        f(inner.tokens.get_mut(token).expect("token exists"));
    }

    pub fn token_count(&self, user_id: i64) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.tokens.values().filter(|t| t.user_id == user_id).count()
    }

    pub fn credit_rows(&self) -> usize {
        self.inner.lock().unwrap().credits.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .values()
            .find(|u| u.email == email && !u.deleted)
            .cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.get(&id).filter(|u| !u.deleted).cloned())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.values().any(|u| u.email == email))
    }

    async fn insert_user(&self, user: NewUser, now: OffsetDateTime) -> Result<User, AppError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(AppError::EmailAlreadyRegistered);
        }
        inner.next_id += 1;
        let row = User {
            id: inner.next_id,
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_verified: false,
            verification_code: Some(user.verification_code),
            verification_code_expiry: Some(user.verification_code_expiry),
            password_reset_code: None,
            password_reset_expiry: None,
            created_at: now,
            updated_at: now,
            deleted: false,
        };
        inner.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_user_by_email(
        &self,
        email: &str,
        mutation: UserMutation,
    ) -> Result<User, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let stored = inner
            .users
            .values_mut()
            .find(|u| u.email == email && !u.deleted)
            .ok_or(AppError::UserNotFound)?;
        let mut draft = stored.clone();
        mutation(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    async fn soft_delete_user(&self, id: i64, now: OffsetDateTime) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get_mut(&id) {
            Some(u) if !u.deleted => {
                u.deleted = true;
                u.updated_at = now;
            }
            _ => return Ok(false),
        }
        inner.tokens.retain(|_, t| t.user_id != id);
        Ok(true)
    }

    async fn restore_user(&self, id: i64, now: OffsetDateTime) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get_mut(&id) {
            Some(u) if u.deleted => {
                u.deleted = false;
                u.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_user(&self, id: i64) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens.retain(|_, t| t.user_id != id);
        inner.credits.remove(&id);
        Ok(inner.users.remove(&id).is_some())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old: &str,
        rotation: TokenRotation,
    ) -> Result<RefreshToken, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .tokens
            .get(old)
            .cloned()
            .ok_or(AppError::RefreshTokenNotFound)?;
        let next = rotation(&current)?;
        inner.tokens.remove(old);
        inner.tokens.insert(next.token.clone(), next.clone());
        Ok(next)
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.tokens.remove(token).is_some())
    }

    async fn find_credit(&self, user_id: i64) -> Result<Option<StudentCredit>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.credits.get(&user_id).cloned())
    }

    async fn create_credit(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> Result<StudentCredit, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner.credits.entry(user_id).or_insert(StudentCredit {
            user_id,
            balance: Decimal::ZERO,
            updated_at: now,
        });
        Ok(row.clone())
    }

    async fn update_balance(
        &self,
        user_id: i64,
        now: OffsetDateTime,
        mutation: BalanceMutation,
    ) -> Result<StudentCredit, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .credits
            .get_mut(&user_id)
            .ok_or(AppError::UserNotFound)?;
        row.balance = mutation(row.balance)?;
        row.updated_at = now;
        Ok(row.clone())
    }
}
