#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod multiplexer;
pub mod notify;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod state;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
