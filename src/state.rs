use std::sync::Arc;

use tracing::warn;

use crate::{
    auth::{jwt::TokenService, services::AuthService},
    config::AppConfig,
    credits::services::CreditLedger,
    notify::{smtp::SmtpSink, LogSink, NotificationSink, Notifier},
    store::{postgres::PgStore, CredentialStore},
    users::services::AccountService,
    verification::{
        otp::OtpGenerator,
        services::{PasswordResetService, VerificationService},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenService,
    pub auth: AuthService,
    pub verification: VerificationService,
    pub password_reset: PasswordResetService,
    pub credits: CreditLedger,
    pub accounts: AccountService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store = PgStore::connect(&config).await?;
        if let Err(e) = sqlx::migrate!("./migrations").run(store.pool()).await {
            warn!(error = %e, "migrations folder not found or migration failed; continuing");
        }

        let sink: Arc<dyn NotificationSink> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpSink::new(smtp)?),
            None => {
                warn!("SMTP_HOST not set; notifications are only logged");
                Arc::new(LogSink)
            }
        };

        Ok(Self::from_parts(&config, Arc::new(store), sink))
    }

    pub fn from_parts(
        config: &AppConfig,
        store: Arc<dyn CredentialStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let notifier = Notifier::new(sink);
        let otp = OtpGenerator::new(config.otp.ttl_minutes);
        let tokens = TokenService::new(&config.jwt, Arc::clone(&store));

        Self {
            auth: AuthService::new(
                Arc::clone(&store),
                tokens.clone(),
                otp,
                notifier.clone(),
            ),
            verification: VerificationService::new(Arc::clone(&store), otp, notifier.clone()),
            password_reset: PasswordResetService::new(Arc::clone(&store), otp, notifier),
            credits: CreditLedger::new(Arc::clone(&store)),
            accounts: AccountService::new(store),
            tokens,
        }
    }
}
