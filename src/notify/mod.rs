//! Outbound operator notifications.
//!
//! The [`Notifier`] trait is the seam between supervision code and whatever
//! chat surface the operator watches. Delivery is best-effort: callers log
//! a returned error and carry on.

pub mod webhook;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::Result;

pub use webhook::WebhookNotifier;

/// Boxed future returned by [`Notifier::notify`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Delivers a human-readable message, optionally tagged with a session id.
pub trait Notifier: Send + Sync {
    /// Send one notification.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notify` if delivery failed.
    fn notify(&self, message: &str, session_id: Option<u32>) -> NotifyFuture<'_>;
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, session_id: Option<u32>) -> NotifyFuture<'_> {
        info!(?session_id, message, "notification");
        Box::pin(async { Ok(()) })
    }
}

/// Pick the notifier for this configuration.
///
/// A webhook URL (from the keychain or environment) selects
/// [`WebhookNotifier`]; otherwise notifications are log-only.
#[must_use]
pub fn from_config(config: &GlobalConfig) -> Arc<dyn Notifier> {
    if !config.notifier.enabled {
        info!("notifications disabled, using log-only notifier");
        return Arc::new(LogNotifier);
    }

    match config.notifier.webhook_url.as_deref() {
        Some(url) => match WebhookNotifier::new(url) {
            Ok(notifier) => Arc::new(notifier),
            Err(err) => {
                warn!(%err, "webhook notifier unavailable, using log-only notifier");
                Arc::new(LogNotifier)
            }
        },
        None => {
            info!("no webhook configured, running in local-only mode");
            Arc::new(LogNotifier)
        }
    }
}

/// Send a notification and log, rather than return, any failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, message: &str, session_id: Option<u32>) {
    if let Err(err) = notifier.notify(message, session_id).await {
        warn!(?session_id, %err, "notification delivery failed");
    }
}
