use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use tracing::info;

use super::{NotificationSink, Params, Template};
use crate::config::SmtpConfig;

/// Plain-text mail over an SMTP relay.
#[derive(Clone)]
pub struct SmtpSink {
    mailer: SmtpTransport,
    from: String,
}

impl SmtpSink {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder = SmtpTransport::starttls_relay(&config.host)
            .with_context(|| format!("smtp relay {}", config.host))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)));
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        info!(host = %config.host, port = config.port, "smtp notifications enabled");
        Ok(Self {
            mailer: builder.build(),
            from: config.from.clone(),
        })
    }
}

fn param<'a>(params: &'a Params, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or("")
}

/// Subject and body for a template.
pub fn render(template: Template, params: &Params) -> (String, String) {
    let name = param(params, "first_name");
    match template {
        Template::Welcome => (
            "Welcome aboard".to_string(),
            format!("Hi {name},\n\nYour email is verified. Your account is ready to use."),
        ),
        Template::Login => (
            "New sign-in to your account".to_string(),
            format!(
                "Hi {name},\n\nWe noticed a new sign-in to your account. \
                 If this wasn't you, reset your password right away."
            ),
        ),
        Template::Verification => (
            "Verify your email".to_string(),
            format!(
                "Hi {name},\n\nYour verification code is {}. It expires in {} minutes.",
                param(params, "code"),
                param(params, "expires_in_minutes"),
            ),
        ),
        Template::PasswordReset => (
            "Reset your password".to_string(),
            format!(
                "Hi {name},\n\nYour password reset code is {}. It expires in {} minutes. \
                 If you didn't ask for this, ignore this email.",
                param(params, "code"),
                param(params, "expires_in_minutes"),
            ),
        ),
    }
}

#[async_trait]
impl NotificationSink for SmtpSink {
    async fn send(
        &self,
        template: Template,
        recipient: &str,
        params: &Params,
    ) -> anyhow::Result<()> {
        let (subject, body) = render(template, params);
        let email = Message::builder()
            .from(self.from.parse().context("parse sender address")?)
            .to(recipient.parse().context("parse recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .context("build message")?;

        // SmtpTransport blocks; keep it off the async workers
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .context("join smtp task")?
            .context("smtp send")?;

        info!(template = template.as_str(), to = %recipient, "email sent");
        Ok(())
    }
}
