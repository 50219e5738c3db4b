//! Session orchestration modules.
//!
//! Covers backend process lifecycle, retry pacing, and the background
//! health supervisor that recovers dead sessions.

pub mod auto_recovery;
pub mod process_controller;
pub mod recovery_strategy;
