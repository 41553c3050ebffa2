use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::debug;

use super::{BalanceMutation, CredentialStore, TokenRotation, UserMutation};
use crate::{
    auth::repo_types::{NewUser, RefreshToken, User, UserRow},
    config::AppConfig,
    credits::repo_types::StudentCredit,
    error::AppError,
};

const SELECT_USER: &str = r#"
    SELECT id, email, password_hash, first_name, last_name, role, is_verified,
           verification_code, verification_code_expiry,
           password_reset_code, password_reset_expiry,
           created_at, updated_at, deleted
    FROM users
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn into_user(row: UserRow) -> Result<User, AppError> {
    Ok(User::try_from(row)?)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn delete_tokens_of(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> Result<u64, AppError> {
    let res = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} WHERE email = $1 AND deleted = FALSE"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(into_user).transpose()
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} WHERE id = $1 AND deleted = FALSE"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(into_user).transpose()
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_user(&self, user: NewUser, now: OffsetDateTime) -> Result<User, AppError> {
        let res = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, role,
                               is_verified, verification_code, verification_code_expiry,
                               created_at, updated_at, deleted)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8, $8, FALSE)
            RETURNING id, email, password_hash, first_name, last_name, role, is_verified,
                      verification_code, verification_code_expiry,
                      password_reset_code, password_reset_expiry,
                      created_at, updated_at, deleted
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(&user.verification_code)
        .bind(user.verification_code_expiry)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(row) => into_user(row),
            Err(e) if is_unique_violation(&e) => Err(AppError::EmailAlreadyRegistered),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_user_by_email(
        &self,
        email: &str,
        mutation: UserMutation,
    ) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} WHERE email = $1 AND deleted = FALSE FOR UPDATE"
        ))
        .bind(email)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(AppError::UserNotFound);
        };
        let mut user = into_user(row)?;

        if let Err(e) = mutation(&mut user) {
            tx.rollback().await?;
            return Err(e);
        }

        sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2,
                   first_name = $3,
                   last_name = $4,
                   role = $5,
                   is_verified = $6,
                   verification_code = $7,
                   verification_code_expiry = $8,
                   password_reset_code = $9,
                   password_reset_expiry = $10,
                   updated_at = $11
             WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_verified)
        .bind(&user.verification_code)
        .bind(user.verification_code_expiry)
        .bind(&user.password_reset_code)
        .bind(user.password_reset_expiry)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(user_id = user.id, "user row updated");
        Ok(user)
    }

    async fn soft_delete_user(&self, id: i64, now: OffsetDateTime) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE users SET deleted = TRUE, updated_at = $2 WHERE id = $1 AND deleted = FALSE",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        let revoked = delete_tokens_of(&mut tx, id).await?;
        tx.commit().await?;
        debug!(user_id = id, revoked, "user soft-deleted");
        Ok(true)
    }

    async fn restore_user(&self, id: i64, now: OffsetDateTime) -> Result<bool, AppError> {
        let res = sqlx::query(
            "UPDATE users SET deleted = FALSE, updated_at = $2 WHERE id = $1 AND deleted = TRUE",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_user(&self, id: i64) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        delete_tokens_of(&mut tx, id).await?;
        sqlx::query("DELETE FROM student_credits WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected() == 1)
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old: &str,
        rotation: TokenRotation,
    ) -> Result<RefreshToken, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT user_id, token, issued_at, expires_at
            FROM refresh_tokens
            WHERE token = $1
            FOR UPDATE
            "#,
        )
        .bind(old)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Err(AppError::RefreshTokenNotFound);
        };

        let next = match rotation(&current) {
            Ok(next) => next,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(old)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(next.user_id)
        .bind(&next.token)
        .bind(next.issued_at)
        .bind(next.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_credit(&self, user_id: i64) -> Result<Option<StudentCredit>, AppError> {
        let row = sqlx::query_as::<_, StudentCredit>(
            "SELECT user_id, balance, updated_at FROM student_credits WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_credit(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> Result<StudentCredit, AppError> {
        let res = sqlx::query_as::<_, StudentCredit>(
            r#"
            INSERT INTO student_credits (user_id, balance, updated_at)
            VALUES ($1, 0, $2)
            RETURNING user_id, balance, updated_at
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(row) => Ok(row),
            Err(e) if is_unique_violation(&e) => {
                debug!(user_id, "credit row created concurrently; re-fetching");
                self.find_credit(user_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("credit row for {user_id} vanished").into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_balance(
        &self,
        user_id: i64,
        now: OffsetDateTime,
        mutation: BalanceMutation,
    ) -> Result<StudentCredit, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, StudentCredit>(
            r#"
            SELECT user_id, balance, updated_at
            FROM student_credits
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Err(AppError::UserNotFound);
        };

        let balance = match mutation(current.balance) {
            Ok(b) => b,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        let updated = sqlx::query_as::<_, StudentCredit>(
            r#"
            UPDATE student_credits
               SET balance = $2, updated_at = $3
             WHERE user_id = $1
            RETURNING user_id, balance, updated_at
            "#,
        )
        .bind(user_id)
        .bind(balance)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}
