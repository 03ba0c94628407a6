//! Error taxonomy for the endpoint layer.
//!
//! Failures on the frame-delivery path (invalid frames, pool backpressure) are
//! never surfaced here; they are handled locally by dropping the frame.

use thiserror::Error;

/// Result type for endpoint operations.
pub type Result<T> = std::result::Result<T, EndpointError>;

#[derive(Debug, Error)]
pub enum EndpointError {
    /// Operation called in the wrong lifecycle state (e.g. `open` while opened).
    #[error("wrong call sequence: {0}")]
    Precondition(String),

    /// Option or camera-info field was never registered on this endpoint.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// No registered pixel format + native profile pair satisfies a request.
    #[error("no native profile satisfies request {0}")]
    ProfileNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Powering the device on failed; the power user count is unchanged.
    #[error("power state transition failed: {0}")]
    Power(String),

    /// Error reported by the underlying transport device.
    #[error("transport error: {0}")]
    Transport(String),
}

impl EndpointError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        EndpointError::Precondition(message.into())
    }

    /// True for lifecycle misuse, as opposed to capability or device failures.
    pub fn is_precondition(&self) -> bool {
        matches!(self, EndpointError::Precondition(_))
    }
}

impl From<anyhow::Error> for EndpointError {
    fn from(err: anyhow::Error) -> Self {
        EndpointError::Transport(format!("{:#}", err))
    }
}
