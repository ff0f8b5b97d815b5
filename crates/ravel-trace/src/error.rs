//! Engine error types.

use thiserror::Error;

/// Error type for the analysis engine's control surface.
#[derive(Error, Debug)]
pub enum EngineError {
    /// `start` was called while the analyzer worker is running.
    #[error("analyzer already running")]
    AlreadyRunning,

    /// The analyzer worker thread could not be spawned.
    #[error("failed to spawn analyzer thread: {0}")]
    Spawn(#[from] std::io::Error),
}
