use serde::{Deserialize, Serialize};

use crate::{
    auth::dto::{check_password, clean_email},
    error::AppError,
    verification::otp::{is_well_formed, CODE_LEN},
};

fn check_code(code: &str) -> Result<String, AppError> {
    let code = code.trim();
    if !is_well_formed(code) {
        return Err(AppError::validation(format!(
            "Code must be {CODE_LEN} digits"
        )));
    }
    Ok(code.to_string())
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

impl VerifyEmailRequest {
    /// Returns the cleaned `(email, code)`.
    pub fn validate(&self) -> Result<(String, String), AppError> {
        Ok((clean_email(&self.email)?, check_code(&self.code)?))
    }
}

/// Body of resend-otp and forgot-password.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

impl ResetPasswordRequest {
    pub fn validate(&self) -> Result<(String, String), AppError> {
        let email = clean_email(&self.email)?;
        let code = check_code(&self.code)?;
        check_password(&self.new_password)?;
        Ok((email, code))
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifiedResponse {
    pub message: String,
    pub verified: bool,
}
