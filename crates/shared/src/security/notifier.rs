use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification endpoint rejected the alert with status {status}")]
    Rejected { status: u16 },
}

pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Outbound channel for security alerts (mail relay, chat webhook, ...).
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        recipient: &'a str,
        subject: &'a str,
        html_body: &'a str,
    ) -> NotifyFuture<'a>;
}

#[derive(Debug, Serialize)]
struct WebhookAlert<'a> {
    recipient: &'a str,
    subject: &'a str,
    html_body: &'a str,
}

/// Posts alerts as JSON to a relay that owns the actual mail delivery.
#[derive(Clone)]
pub struct WebhookNotifier {
    http_client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let http_client = Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(
        &'a self,
        recipient: &'a str,
        subject: &'a str,
        html_body: &'a str,
    ) -> NotifyFuture<'a> {
        Box::pin(async move {
            let response = self
                .http_client
                .post(&self.url)
                .json(&WebhookAlert {
                    recipient,
                    subject,
                    html_body,
                })
                .send()
                .await
                .map_err(|err| NotifyError::Transport(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(NotifyError::Rejected {
                    status: status.as_u16(),
                });
            }
            Ok(())
        })
    }
}
