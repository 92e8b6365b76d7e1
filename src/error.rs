use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the session engine. None of these are fatal: every
/// state is recoverable by returning to `Idle` via `stop()`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `connect()` was attempted before any track set was selected.
    #[error("no track set selected")]
    NoSelection,

    /// An asset could not be opened or decoded. Aborts `connect()` when it
    /// hits the clock or the initially selected bank; background loads log
    /// it and carry on.
    #[error("failed to load asset '{path}': {reason}")]
    AssetLoad { path: PathBuf, reason: String },

    /// Mix activation or a track switch needs a stem bank that has not been
    /// buffered yet. The operation leaves stage and gauge untouched and is
    /// safe to retry once the background load lands.
    #[error("track set '{0}' is not loaded yet")]
    TrackNotLoaded(String),

    /// An operation was requested in a state that cannot serve it, e.g.
    /// `connect()` while already connected.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(&'static str),
}
