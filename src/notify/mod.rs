//! Outbound notifications. Delivery is best-effort and detached from the
//! request that triggered it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod smtp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Welcome,
    Login,
    Verification,
    PasswordReset,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::Welcome => "welcome",
            Template::Login => "login",
            Template::Verification => "verification",
            Template::PasswordReset => "password_reset",
        }
    }
}

pub type Params = BTreeMap<&'static str, String>;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, template: Template, recipient: &str, params: &Params)
        -> anyhow::Result<()>;
}

/// Fallback used when no SMTP relay is configured.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(
        &self,
        template: Template,
        recipient: &str,
        _params: &Params,
    ) -> anyhow::Result<()> {
        // params may hold codes; keep them out of the log
        info!(template = template.as_str(), to = %recipient, "notification (log only)");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Sends on a background task; failures are logged and dropped.
    pub fn dispatch(&self, template: Template, recipient: &str, params: Params) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let recipient = recipient.to_string();
        tokio::spawn(async move {
            if let Err(e) = sink.send(template, &recipient, &params).await {
                warn!(error = %e, template = template.as_str(), to = %recipient, "notification failed");
            }
        })
    }
}
