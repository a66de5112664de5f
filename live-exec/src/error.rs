use thiserror::Error;

/// Every failure a session can hit while servicing one request.
///
/// All variants are session-local: after reporting one of these the session
/// is back in `Idle` and accepts the next `run`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Compiler diagnostics, passed through verbatim.
    #[error("{0}")]
    Toolchain(String),

    #[error("{0}")]
    Resolution(String),

    #[error("Failed to start program: {0}")]
    Spawn(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
