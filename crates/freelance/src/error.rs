//! Error types for the Freelance client and server.

use freelance_wire::WireError;
use thiserror::Error;

/// Top-level error type for Freelance frontends.
#[derive(Error, Debug)]
pub enum FreelanceError {
    /// The caller broke the strict request/reply sequence.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// No server answered within the global timeout. Resubmit to retry.
    #[error("Request timed out: no server replied")]
    RequestTimeout,

    /// The background agent is gone; the frontend cannot be used any more.
    #[error("Agent has shut down")]
    Shutdown,

    /// A transport error.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Alias for Result with FreelanceError.
pub type FreelanceResult<T> = Result<T, FreelanceError>;
