//! Local IPC server for `agent-bridge-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! from `agent-bridge-ctl` and routes them to the appropriate handler.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "status"}
//! {"command": "list_sessions"}
//! {"command": "add_session", "channel_id": "123456"}
//! {"command": "remove_session", "session_id": 2}
//! {"command": "recover", "session_id": 2}
//! {"command": "reset_recovery", "session_id": 2}
//! {"command": "purge_session", "session_id": 2}
//! {"command": "forward", "channel_id": "123456", "message": "run the tests"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "unknown session: session 9 is not registered"}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::state::AppState;
use crate::{AppError, Result};

/// Inbound IPC request from `agent-bridge-ctl`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Target session (for `remove_session`, `recover`, `reset_recovery`, `purge_session`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
    /// Channel identifier (for `add_session`, `forward`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Message text (for `forward`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Attachment paths appended to a forwarded message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<PathBuf>,
}

/// Outbound IPC response to `agent-bridge-ctl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<AppError> for IpcResponse {
    fn from(err: AppError) -> Self {
        Self::error(err.to_string())
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                            }
                            Err(err) => warn!(%err, "IPC accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(info_span!("ipc_server", name = %name)),
    );

    Ok(handle)
}

async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, state: Arc<AppState>) {
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch(&request, &state).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(info_span!("ipc_conn"))
    .await;
}

/// Route one IPC command to its handler.
pub async fn dispatch(request: &IpcRequest, state: &AppState) -> IpcResponse {
    let result = async {
        match request.command.as_str() {
            "status" => handle_status(state).await,
            "list_sessions" => Ok(handle_list_sessions(state)),
            "add_session" => handle_add_session(request, state).await,
            "remove_session" => handle_remove_session(request, state).await,
            "recover" => handle_recover(request, state).await,
            "reset_recovery" => handle_reset_recovery(request, state),
            "purge_session" => handle_purge_session(request, state),
            "forward" => handle_forward(request, state).await,
            other => Err(AppError::InvalidRequest(format!("unknown command: {other}"))),
        }
    }
    .instrument(info_span!("ipc_command", command = %request.command))
    .await;

    match result {
        Ok(data) => IpcResponse::success(data),
        Err(err) => {
            warn!(command = %request.command, %err, "ipc command failed");
            err.into()
        }
    }
}

fn require_session_id(request: &IpcRequest) -> Result<u32> {
    request
        .session_id
        .ok_or_else(|| AppError::InvalidRequest("missing required 'session_id' field".into()))
}

fn require_channel_id(request: &IpcRequest) -> Result<&str> {
    request
        .channel_id
        .as_deref()
        .filter(|channel| !channel.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("missing required 'channel_id' field".into()))
}

async fn handle_status(state: &AppState) -> Result<serde_json::Value> {
    let processes = state.controller.all_statuses().await?;
    Ok(json!({
        "registry": state.registry.stats(),
        "recovery": state.monitor.stats().await,
        "processes": processes,
    }))
}

fn handle_list_sessions(state: &AppState) -> serde_json::Value {
    let sessions: Vec<serde_json::Value> = state
        .registry
        .list_all()
        .into_iter()
        .map(|entry| {
            let running = state
                .controller
                .cached(entry.session_id)
                .is_some_and(|info| info.running);
            json!({
                "session_id": entry.session_id,
                "channel_id": entry.channel_id,
                "status": entry.status.as_str(),
                "running": running,
                "recovery_count": entry.recovery_count,
                "last_health_check": entry.last_health_check.map(|ts| ts.to_rfc3339()),
            })
        })
        .collect();
    json!({ "sessions": sessions })
}

async fn handle_add_session(request: &IpcRequest, state: &AppState) -> Result<serde_json::Value> {
    let channel_id = require_channel_id(request)?;
    let session_id = state.registry.add(channel_id)?;

    let agent = &state.config.agent;
    state
        .registry
        .set_launch_params(session_id, &agent.work_dir, &agent.options);
    state
        .controller
        .set_launch_params(session_id, &agent.work_dir, &agent.options);

    // The mapping stands even if the first launch fails; the monitor retries.
    let launch_error = state
        .controller
        .create(session_id, &agent.work_dir, &agent.options)
        .await
        .err()
        .map(|err| err.to_string());

    info!(session_id, channel_id, "session added via IPC");
    Ok(json!({
        "session_id": session_id,
        "channel_id": channel_id,
        "launched": launch_error.is_none(),
        "launch_error": launch_error,
    }))
}

async fn handle_remove_session(
    request: &IpcRequest,
    state: &AppState,
) -> Result<serde_json::Value> {
    let session_id = require_session_id(request)?;

    if state.registry.get(session_id).is_some() {
        if let Err(err) = state.controller.kill(session_id).await {
            warn!(session_id, %err, "failed to stop agent session before removal");
        }
    }
    let removed = state.registry.remove(session_id)?;
    if removed {
        state.controller.forget(session_id);
    }
    state.monitor.reset_attempts(session_id);

    Ok(json!({ "session_id": session_id, "removed": removed }))
}

async fn handle_recover(request: &IpcRequest, state: &AppState) -> Result<serde_json::Value> {
    let session_id = require_session_id(request)?;
    state.monitor.recover_now(session_id).await?;
    Ok(json!({ "session_id": session_id, "status": "recovered" }))
}

fn handle_reset_recovery(request: &IpcRequest, state: &AppState) -> Result<serde_json::Value> {
    let session_id = require_session_id(request)?;
    let cleared = state.monitor.reset_attempts(session_id);
    Ok(json!({ "session_id": session_id, "cleared": cleared }))
}

fn handle_purge_session(request: &IpcRequest, state: &AppState) -> Result<serde_json::Value> {
    let session_id = require_session_id(request)?;
    let purged = state
        .registry
        .purge_artifacts(&state.config.attachments_dir(), session_id)?;
    Ok(json!({ "session_id": session_id, "purged": purged }))
}

async fn handle_forward(request: &IpcRequest, state: &AppState) -> Result<serde_json::Value> {
    let channel_id = require_channel_id(request)?;
    let message = request.message.as_deref().unwrap_or_default();
    let session_id = state
        .router
        .forward(channel_id, message, &request.attachments)
        .await?;
    Ok(json!({ "channel_id": channel_id, "session_id": session_id }))
}
