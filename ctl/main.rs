#![forbid(unsafe_code)]

//! `agent-bridge-ctl`: local CLI companion for `agent-bridge`.
//!
//! Connects to the daemon's IPC socket, sends one JSON command, and prints
//! the response payload.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "agent-bridge-ctl",
    about = "Local CLI for the agent-bridge daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "agent-bridge")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show registry, recovery, and process status.
    Status,

    /// List registered sessions.
    ListSessions,

    /// Map a channel to a new session and launch its agent.
    AddSession {
        /// Chat channel identifier.
        channel_id: String,
    },

    /// Stop a session's agent and delete its channel mapping.
    RemoveSession {
        /// Session id.
        session_id: u32,
    },

    /// Kill and relaunch a session's agent now.
    Recover {
        /// Session id.
        session_id: u32,
    },

    /// Clear a session's failed-recovery counter so the monitor retries it.
    ResetRecovery {
        /// Session id.
        session_id: u32,
    },

    /// Delete the attachment directory of a removed session.
    PurgeSession {
        /// Session id.
        session_id: u32,
    },

    /// Send a message to the session mapped to a channel.
    Forward {
        /// Chat channel identifier.
        channel_id: String,
        /// Message text.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
}

fn main() {
    let args = Cli::parse();

    let request_json = match &args.command {
        Command::Status => serde_json::json!({ "command": "status" }),
        Command::ListSessions => serde_json::json!({ "command": "list_sessions" }),
        Command::AddSession { channel_id } => {
            serde_json::json!({ "command": "add_session", "channel_id": channel_id })
        }
        Command::RemoveSession { session_id } => {
            serde_json::json!({ "command": "remove_session", "session_id": session_id })
        }
        Command::Recover { session_id } => {
            serde_json::json!({ "command": "recover", "session_id": session_id })
        }
        Command::ResetRecovery { session_id } => {
            serde_json::json!({ "command": "reset_recovery", "session_id": session_id })
        }
        Command::PurgeSession { session_id } => {
            serde_json::json!({ "command": "purge_session", "session_id": session_id })
        }
        Command::Forward {
            channel_id,
            message,
        } => serde_json::json!({
            "command": "forward",
            "channel_id": channel_id,
            "message": message.join(" "),
        }),
    };

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is agent-bridge running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
