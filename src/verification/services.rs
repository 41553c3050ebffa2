//! Email verification and password reset. Both are one-time-code flows whose
//! check and transition run under one row lock, so a code can be spent once.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    auth::{
        password::hash_password_async,
        services::{code_params, name_params},
    },
    error::AppError,
    notify::{Notifier, Template},
    store::CredentialStore,
    verification::otp::OtpGenerator,
};

/// Unverified -> Verified.
#[derive(Clone)]
pub struct VerificationService {
    store: Arc<dyn CredentialStore>,
    otp: OtpGenerator,
    notifier: Notifier,
}

impl VerificationService {
    pub fn new(store: Arc<dyn CredentialStore>, otp: OtpGenerator, notifier: Notifier) -> Self {
        Self {
            store,
            otp,
            notifier,
        }
    }

    #[instrument(skip_all)]
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<(), AppError> {
        let otp = self.otp;
        let submitted = code.to_string();

        let user = self
            .store
            .update_user_by_email(
                email,
                Box::new(move |user| {
                    if user.is_verified {
                        return Err(AppError::AlreadyVerified);
                    }
                    if user.verification_code.as_deref() != Some(submitted.as_str()) {
                        return Err(AppError::CodeMismatch);
                    }
                    if otp.is_expired(user.verification_code_expiry) {
                        return Err(AppError::CodeExpired);
                    }
                    user.is_verified = true;
                    user.verification_code = None;
                    user.verification_code_expiry = None;
                    user.updated_at = OffsetDateTime::now_utc();
                    Ok(())
                }),
            )
            .await?;

        info!(user_id = user.id, "email verified");
        self.notifier
            .dispatch(Template::Welcome, &user.email, name_params(&user));
        Ok(())
    }

    /// Replaces the pending code; the previous one stops working.
    #[instrument(skip_all)]
    pub async fn resend_verification_code(&self, email: &str) -> Result<(), AppError> {
        let now = OffsetDateTime::now_utc();
        let (code, expiry) = self.otp.issue(now);
        let stored = code.clone();

        let user = self
            .store
            .update_user_by_email(
                email,
                Box::new(move |user| {
                    if user.is_verified {
                        return Err(AppError::AlreadyVerified);
                    }
                    user.verification_code = Some(stored);
                    user.verification_code_expiry = Some(expiry);
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        info!(user_id = user.id, "verification code reissued");
        self.notifier.dispatch(
            Template::Verification,
            &user.email,
            code_params(&user, code, self.otp.ttl_minutes()),
        );
        Ok(())
    }
}

/// Reset-code channel, independent of verification state.
#[derive(Clone)]
pub struct PasswordResetService {
    store: Arc<dyn CredentialStore>,
    otp: OtpGenerator,
    notifier: Notifier,
}

impl PasswordResetService {
    pub fn new(store: Arc<dyn CredentialStore>, otp: OtpGenerator, notifier: Notifier) -> Self {
        Self {
            store,
            otp,
            notifier,
        }
    }

    #[instrument(skip_all)]
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AppError> {
        let now = OffsetDateTime::now_utc();
        let (code, expiry) = self.otp.issue(now);
        let stored = code.clone();

        let user = self
            .store
            .update_user_by_email(
                email,
                Box::new(move |user| {
                    user.password_reset_code = Some(stored);
                    user.password_reset_expiry = Some(expiry);
                    user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        info!(user_id = user.id, "password reset requested");
        self.notifier.dispatch(
            Template::PasswordReset,
            &user.email,
            code_params(&user, code, self.otp.ttl_minutes()),
        );
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        // Hashing happens before the row lock so the transaction stays short.
        let new_hash = hash_password_async(new_password.to_string()).await?;
        let otp = self.otp;
        let submitted = code.to_string();

        let user = self
            .store
            .update_user_by_email(
                email,
                Box::new(move |user| {
                    if user.password_reset_code.as_deref() != Some(submitted.as_str()) {
                        return Err(AppError::CodeMismatch);
                    }
                    if otp.is_expired(user.password_reset_expiry) {
                        return Err(AppError::CodeExpired);
                    }
                    user.password_hash = new_hash;
                    user.password_reset_code = None;
                    user.password_reset_expiry = None;
                    user.updated_at = OffsetDateTime::now_utc();
                    Ok(())
                }),
            )
            .await?;

        info!(user_id = user.id, "password reset");
        Ok(())
    }
}
