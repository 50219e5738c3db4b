//! Inbound message routing: channel id → session id → backend session.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use crate::orchestrator::process_controller::ProcessSessionController;
use crate::registry::SessionRegistry;
use crate::{AppError, Result};

/// Header placed before plain chat messages so the agent can tell them
/// apart from operator keystrokes.
pub const CHAT_MESSAGE_PREFIX: &str = "Message from chat: ";

/// Routes chat messages to the agent session mapped to their channel.
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    controller: Arc<ProcessSessionController>,
}

impl MessageRouter {
    /// Construct a router over the shared registry and controller.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, controller: Arc<ProcessSessionController>) -> Self {
        Self {
            registry,
            controller,
        }
    }

    /// Session for `channel_id`, falling back to the default session when
    /// the channel has no mapping at all.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if the channel is mapped to a
    /// session that is not active. Such messages are never redirected to
    /// another channel's agent.
    pub fn resolve(&self, channel_id: &str) -> Result<u32> {
        match self.registry.mapped_entry(channel_id) {
            Some(entry) if entry.is_active() => Ok(entry.session_id),
            Some(entry) => {
                debug!(
                    channel_id,
                    session_id = entry.session_id,
                    status = entry.status.as_str(),
                    "mapped session not active, message dropped"
                );
                Err(AppError::UnknownSession(format!(
                    "session {} for channel {channel_id} is {}",
                    entry.session_id,
                    entry.status.as_str()
                )))
            }
            None => {
                let fallback = self.registry.default_session_id();
                debug!(channel_id, fallback, "channel unmapped, using default session");
                Ok(fallback)
            }
        }
    }

    /// Render the text typed into the agent session.
    ///
    /// Slash commands pass through verbatim so the agent interprets them;
    /// anything else gets [`CHAT_MESSAGE_PREFIX`]. Attachment paths follow
    /// the content and the target session id comes last.
    #[must_use]
    pub fn format_message(
        content: &str,
        attachments: &[PathBuf],
        session_id: u32,
    ) -> String {
        let attachment_text: String = attachments
            .iter()
            .map(|path| format!(" [attachment: {}]", path.display()))
            .collect();

        if content.starts_with('/') {
            format!("{content}{attachment_text} session={session_id}")
        } else {
            format!("{CHAT_MESSAGE_PREFIX}{content}{attachment_text} session={session_id}")
        }
    }

    /// Forward a message from `channel_id` to its agent session.
    ///
    /// Returns the session id the message was delivered to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` for an empty message,
    /// `AppError::UnknownSession` if the channel's session is not active or
    /// its backend session is not running, or the multiplexer error if delivery failed.
    pub async fn forward(
        &self,
        channel_id: &str,
        content: &str,
        attachments: &[PathBuf],
    ) -> Result<u32> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(AppError::InvalidRequest("message is empty".into()));
        }

        let session_id = self.resolve(channel_id)?;
        let text = Self::format_message(content, attachments, session_id);

        self.controller
            .send_message(session_id, &text)
            .instrument(info_span!("forward_message", channel_id, session_id))
            .await?;

        info!(channel_id, session_id, "message routed");
        Ok(session_id)
    }
}
