//! Terminal multiplexer abstraction.
//!
//! The [`Multiplexer`] trait decouples session supervision from the
//! concrete multiplexer binary. [`tmux::TmuxMultiplexer`] is the production
//! implementation; tests substitute in-memory fakes.

pub mod tmux;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Boxed future returned by [`Multiplexer`] methods.
pub type MuxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Out-of-process terminal session manager hosting one agent per named session.
///
/// Every call is a bounded subprocess invocation; implementations must map
/// an exceeded bound to [`AppError::HealthCheckTimeout`](crate::AppError::HealthCheckTimeout).
pub trait Multiplexer: Send + Sync {
    /// Whether a session with exactly this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the multiplexer cannot be queried.
    fn session_exists(&self, name: &str) -> MuxFuture<'_, bool>;

    /// Start a detached session named `name` whose initial command is
    /// `initial_command` (interpreted by a shell).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::LaunchFailure`](crate::AppError::LaunchFailure)
    /// if the binary is missing or the command fails.
    fn create_session(&self, name: &str, initial_command: &str) -> MuxFuture<'_, ()>;

    /// Terminate the named session.
    ///
    /// # Errors
    ///
    /// Returns an error if the multiplexer rejects the request.
    fn kill_session(&self, name: &str) -> MuxFuture<'_, ()>;

    /// Names of all live sessions. An idle server with no sessions yields
    /// an empty list rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the multiplexer cannot be queried.
    fn list_sessions(&self) -> MuxFuture<'_, Vec<String>>;

    /// Type `keys` into the session's active pane. With `literal` the text
    /// is sent verbatim; otherwise it is interpreted as key names (`Enter`).
    ///
    /// # Errors
    ///
    /// Returns an error if the session does not accept input.
    fn send_keys(&self, name: &str, keys: &str, literal: bool) -> MuxFuture<'_, ()>;
}
