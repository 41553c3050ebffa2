use serde::{Deserialize, Serialize};

use crate::{
    auth::{
        repo_types::{Role, User},
        services::{is_valid_email, Registration, Session},
    },
    error::AppError,
};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Trims and checks an email address, keeping its case.
pub fn clean_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim();
    if !is_valid_email(email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email.to_string())
}

pub fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, AppError> {
        let email = clean_email(&self.email)?;
        check_password(&self.password)?;

        let first_name = self.first_name.trim().to_string();
        let last_name = self.last_name.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(AppError::validation("First and last name are required"));
        }

        let role = match self.role.as_deref() {
            None => None,
            Some(raw) => match Role::parse(raw) {
                Some(r @ (Role::Student | Role::Teacher)) => Some(r),
                _ => return Err(AppError::validation("Role must be STUDENT or TEACHER")),
            },
        };

        Ok(Registration {
            email,
            password: self.password,
            first_name,
            last_name,
            role,
        })
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Response returned after register, login or refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub is_verified: bool,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl From<Session> for AuthResponse {
    fn from(s: Session) -> Self {
        Self {
            access_token: s.tokens.access_token,
            refresh_token: s.tokens.refresh_token,
            is_verified: s.user.is_verified,
            email: s.user.email,
            first_name: s.user.first_name,
            last_name: s.user.last_name,
            role: s.user.role,
        }
    }
}

/// Public part of the caller's account.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_verified: bool,
}

impl From<User> for MeResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            role: u.role,
            is_verified: u.is_verified,
        }
    }
}
