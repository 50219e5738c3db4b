//! Persistence layer modules.
//!
//! All state lives in small JSON files under the configured data
//! directory; every write goes through [`atomic::write_json_atomic`].

pub mod atomic;
pub mod history;
