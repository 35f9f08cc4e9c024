//! ICC error types.

use thiserror::Error;

/// Result type for ICC operations.
pub type IccResult<T> = Result<T, IccError>;

/// Errors that can occur during ICC operations.
#[derive(Debug, Error)]
pub enum IccError {
    /// Failed to create a profile.
    #[error("failed to create profile: {0}")]
    CreateFailed(String),

    /// Failed to create a transform.
    #[error("failed to create transform: {0}")]
    TransformFailed(String),

    /// Invalid profile data.
    #[error("invalid profile data: {0}")]
    InvalidProfile(String),

    /// The pixel layout is not valid for the requested transform.
    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),
}
