//! Outbound email transports.

use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::model::EmailMessage;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("provider returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Transport(String),
}

/// Pluggable email transport. One call sends one message to one address.
///
/// Retry policy belongs to the provider; a returned error is final for
/// that recipient.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Logs messages instead of sending them.
pub struct LogMailer;

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!("mail to {}: {}", message.to, message.subject);
        Ok(())
    }
}

/// JSON-over-HTTP mail provider.
pub struct HttpMailer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct ProviderRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    preheader: &'a str,
    html: &'a str,
}

impl HttpMailer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait::async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ProviderRequest {
                from: &self.from,
                to: &message.to,
                subject: &message.subject,
                preheader: &message.brief,
                html: &message.html,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Records messages in memory. Addresses in the reject list fail.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<EmailMessage>>,
    reject: BTreeSet<String>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if self.reject.contains(&message.to) {
            return Err(MailError::Transport(format!("mailbox {} unavailable", message.to)));
        }
        self.sent
            .lock()
            .map_err(|e| MailError::Transport(e.to_string()))?
            .push(message.clone());
        Ok(())
    }
}
