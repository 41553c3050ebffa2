//! Storage contract for users, refresh tokens and credit rows.
//!
//! Every read of users applies the soft-delete visibility predicate unless the
//! method name says otherwise. Mutations that must check state before writing
//! take a closure; implementations run it inside one transaction against a
//! locked row and only persist when it returns `Ok`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{
    auth::repo_types::{NewUser, RefreshToken, User},
    credits::repo_types::StudentCredit,
    error::AppError,
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

/// Edits a locked user row. `Err` aborts the transaction untouched.
pub type UserMutation = Box<dyn FnOnce(&mut User) -> Result<(), AppError> + Send>;

/// Maps the current balance to the one to persist.
pub type BalanceMutation = Box<dyn FnOnce(Decimal) -> Result<Decimal, AppError> + Send>;

/// Builds the replacement for a locked refresh token.
pub type TokenRotation = Box<dyn FnOnce(&RefreshToken) -> Result<RefreshToken, AppError> + Send>;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    /// Includes soft-deleted rows, since they still hold the email.
    async fn exists_by_email(&self, email: &str) -> Result<bool, AppError>;

    /// Fails `EmailAlreadyRegistered` on a uniqueness conflict.
    async fn insert_user(&self, user: NewUser, now: OffsetDateTime) -> Result<User, AppError>;

    /// Locks the visible user with `email`, applies `mutation`, persists it.
    /// Fails `UserNotFound` when there is no such user.
    async fn update_user_by_email(
        &self,
        email: &str,
        mutation: UserMutation,
    ) -> Result<User, AppError>;

    /// Flags a visible user deleted and drops its refresh tokens.
    async fn soft_delete_user(&self, id: i64, now: OffsetDateTime) -> Result<bool, AppError>;

    /// Clears the deleted flag of a soft-deleted user.
    async fn restore_user(&self, id: i64, now: OffsetDateTime) -> Result<bool, AppError>;

    /// Physically removes a user with its tokens and credit row.
    async fn delete_user(&self, id: i64) -> Result<bool, AppError>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError>;

    /// Locks `old`, deletes it and inserts what `rotation` returns, atomically.
    /// Fails `RefreshTokenNotFound` when `old` is unknown.
    async fn rotate_refresh_token(
        &self,
        old: &str,
        rotation: TokenRotation,
    ) -> Result<RefreshToken, AppError>;

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, AppError>;

    async fn find_credit(&self, user_id: i64) -> Result<Option<StudentCredit>, AppError>;

    /// Inserts a zero-balance row; a concurrent insert that won the race is
    /// returned instead.
    async fn create_credit(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> Result<StudentCredit, AppError>;

    /// Locks the credit row, applies `mutation` to its balance, persists.
    /// Fails `UserNotFound` when there is no row.
    async fn update_balance(
        &self,
        user_id: i64,
        now: OffsetDateTime,
        mutation: BalanceMutation,
    ) -> Result<StudentCredit, AppError>;
}
