//! Webhook notifier: one JSON `POST` per notification.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{Notifier, NotifyFuture};
use crate::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<u32>,
}

/// Posts `{"content": ..., "session_id": ...}` to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Build a notifier for `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notify` if the URL is not http(s) or the HTTP
    /// client cannot be constructed.
    pub fn new(url: &str) -> Result<Self> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::Notify(
                "webhook url must start with http:// or https://".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Notify(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str, session_id: Option<u32>) -> NotifyFuture<'_> {
        let content = message.to_owned();
        Box::pin(async move {
            let payload = WebhookPayload {
                content: &content,
                session_id,
            };
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|err| AppError::Notify(format!("webhook request failed: {err}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AppError::Notify(format!("webhook returned {status}")));
            }
            debug!(?session_id, "webhook notification delivered");
            Ok(())
        })
    }
}
