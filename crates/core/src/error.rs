//! Error types for the viewport rendering core.

use thiserror::Error;

/// Main error type for the pageview library.
///
/// The type is `Clone` because a single render outcome is shared by every
/// caller awaiting the same in-flight page task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewerError {
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rotation that is not a multiple of 90 degrees.
    #[error("Invalid rotation: {0} degrees (must be a multiple of 90)")]
    InvalidRotation(i32),

    /// The scroll/observation root does not exist in the host layout.
    #[error("Observation root '{0}' not found")]
    MissingRoot(String),

    /// The host provides no viewport-observation primitive.
    #[error("Viewport observation is not available on this host")]
    ObservationUnavailable,

    /// Page number outside `1..=page_count`.
    #[error("Page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// The document proxy failed to fetch or decode something.
    #[error("Document proxy error: {0}")]
    DocumentProxy(String),

    /// Drawing a page onto the shared surface failed.
    #[error("Rendering page {page} failed: {message}")]
    RenderFailed { page: u32, message: String },

    /// Encoding the drawn surface to an image failed.
    #[error("Image encoding failed: {0}")]
    EncodeFailed(String),

    /// An outline destination did not resolve to a page.
    #[error("Destination could not be resolved: {0}")]
    UnresolvedDestination(String),

    /// The background render task was aborted or panicked.
    #[error("Render task aborted: {0}")]
    TaskAborted(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ViewerError>;

impl From<tokio::task::JoinError> for ViewerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ViewerError::TaskAborted(err.to_string())
    }
}

impl From<serde_json::Error> for ViewerError {
    fn from(err: serde_json::Error) -> Self {
        ViewerError::InvalidConfig(err.to_string())
    }
}
