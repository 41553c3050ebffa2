use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{error::AppError, store::CredentialStore};

/// Administrative soft delete and restore.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn CredentialStore>,
}

impl AccountService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Hides the account and revokes every refresh token it holds.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, user_id: i64) -> Result<(), AppError> {
        if !self
            .store
            .soft_delete_user(user_id, OffsetDateTime::now_utc())
            .await?
        {
            return Err(AppError::UserNotFound);
        }
        info!("user soft-deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, user_id: i64) -> Result<(), AppError> {
        if !self
            .store
            .restore_user(user_id, OffsetDateTime::now_utc())
            .await?
        {
            return Err(AppError::UserNotFound);
        }
        info!("user restored");
        Ok(())
    }
}
