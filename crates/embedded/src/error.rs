use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Engine failed to initialize or begin serving.
    #[error("engine error: {0}")]
    Engine(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// No free port could be allocated.
    #[error("no free port available")]
    NoFreePort,

    /// Cleanup requested before the server was stopped.
    #[error("not stopped")]
    NotStopped,
}
