//! Error types for the watcher core.

use crate::location::WatcherId;

/// Top-level error type for the geolocation watcher system.
///
/// Authorization failures are terminal for the activation attempt that hit
/// them. Transient platform failures (notice construction, foreground
/// promotion) degrade gracefully and are only logged; they appear here so
/// collaborators can report them, but the core never aborts a watcher on one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeoError {
    /// Permission denied or location services disabled. The two causes share
    /// a kind but carry distinguishable messages.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// A watcher with this id is already registered.
    #[error("duplicate watcher id: {0}")]
    DuplicateId(WatcherId),

    /// No watcher with this id is registered.
    #[error("no watcher with id: {0}")]
    NotFound(WatcherId),

    /// Teardown interrupted a pending operation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A platform call failed in a way that does not abort the watcher.
    #[error("transient platform failure: {0}")]
    TransientPlatform(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GeoError>;
