use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Why a blocking queue operation gave up
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The deadline elapsed before space or an item became available
    #[error("queue deadline elapsed")]
    Timeout,

    /// Shutdown was observed while waiting (or before a push)
    #[error("queue shutdown requested")]
    Shutdown,
}

/// Errors that can occur while configuring or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A run is already in progress on this coordinator
    #[error("Pipeline is already running")]
    AlreadyRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stage thread could not be spawned or panicked
    #[error("Thread error: {0}")]
    ThreadError(String),
}
