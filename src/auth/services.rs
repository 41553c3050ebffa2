use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        jwt::{IssuedTokens, TokenService},
        password::{hash_password, hash_password_async, verify_password, verify_password_async},
        repo_types::{NewUser, Role, User},
    },
    error::AppError,
    notify::{Notifier, Params, Template},
    store::CredentialStore,
    verification::otp::OtpGenerator,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

lazy_static! {
    // Checked on unknown emails so every failed login costs one Argon2 verification.
    static ref DECOY_HASH: Option<String> = hash_password("eduauth-decoy-password").ok();
}

async fn verify_against_decoy(password: &str) {
    let password = password.to_string();
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(hash) = DECOY_HASH.as_deref() {
            let _ = verify_password(&password, hash);
        }
    })
    .await;
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<Role>,
}

/// Tokens plus the account they were issued for.
#[derive(Debug, Clone)]
pub struct Session {
    pub tokens: IssuedTokens,
    pub user: User,
}

/// Registration, login and refresh-token rotation.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
    otp: OtpGenerator,
    notifier: Notifier,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: TokenService,
        otp: OtpGenerator,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            tokens,
            otp,
            notifier,
        }
    }

    /// Creates an unverified account and signs it in straight away.
    #[instrument(skip_all)]
    pub async fn register(&self, reg: Registration) -> Result<Session, AppError> {
        if self.store.exists_by_email(&reg.email).await? {
            warn!("email already registered");
            return Err(AppError::EmailAlreadyRegistered);
        }

        let password_hash = hash_password_async(reg.password).await?;
        let now = OffsetDateTime::now_utc();
        let (code, expiry) = self.otp.issue(now);

        let user = self
            .store
            .insert_user(
                NewUser {
                    email: reg.email,
                    password_hash,
                    first_name: reg.first_name,
                    last_name: reg.last_name,
                    role: reg.role.unwrap_or(Role::Student),
                    verification_code: code.clone(),
                    verification_code_expiry: expiry,
                },
                now,
            )
            .await?;

        self.notifier.dispatch(
            Template::Verification,
            &user.email,
            code_params(&user, code, self.otp.ttl_minutes()),
        );

        let tokens = self.tokens.issue_pair(&user).await?;
        info!(user_id = user.id, role = user.role.as_str(), "user registered");
        Ok(Session { tokens, user })
    }

    #[instrument(skip_all)]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            verify_against_decoy(password).await;
            warn!("login unknown email");
            return Err(AppError::InvalidCredentials);
        };

        let ok = verify_password_async(password.to_string(), user.password_hash.clone()).await?;
        if !ok {
            warn!(user_id = user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let tokens = self.tokens.issue_pair(&user).await?;
        self.notifier
            .dispatch(Template::Login, &user.email, name_params(&user));

        info!(user_id = user.id, "user logged in");
        Ok(Session { tokens, user })
    }

    pub async fn refresh_token(&self, opaque: &str) -> Result<Session, AppError> {
        let (tokens, user) = self.tokens.rotate_refresh_token(opaque).await?;
        Ok(Session { tokens, user })
    }

    /// Idempotent; unknown tokens are ignored.
    pub async fn logout(&self, opaque: &str) -> Result<(), AppError> {
        if self.tokens.revoke_refresh_token(opaque).await? {
            info!("refresh token revoked");
        }
        Ok(())
    }

    pub async fn profile(&self, user_id: i64) -> Result<User, AppError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AppError::UserNotFound)
    }
}

pub(crate) fn name_params(user: &User) -> Params {
    let mut params = Params::new();
    params.insert("first_name", user.first_name.clone());
    params
}

pub(crate) fn code_params(user: &User, code: String, ttl_minutes: i64) -> Params {
    let mut params = name_params(user);
    params.insert("code", code);
    params.insert("expires_in_minutes", ttl_minutes.to_string());
    params
}
