use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("invalid image dimensions {width}x{height}: width and height must be positive")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("transfer mode requires a reference image")]
    MissingReference,
    #[error("no source image loaded")]
    MissingSource,
    #[error("unreadable image: {0}")]
    UnreadableImage(String),
    #[error("a batch is already in progress")]
    BatchInProgress,
    #[error("unknown style preset '{0}'")]
    UnknownPreset(String),
    #[error("history record '{0}' not found")]
    RecordNotFound(String),
    #[error("history storage error: {0}")]
    Storage(String),
    #[error("history storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StudioError {
    pub fn storage(err: impl fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Transport,
    Service,
    Quota,
    Malformed,
    NoImage,
    Configuration,
}

impl BackendErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Service => "service",
            Self::Quota => "quota",
            Self::Malformed => "malformed",
            Self::NoImage => "no_image",
            Self::Configuration => "configuration",
        }
    }
}

/// Failure reported by a generation backend for a single request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} backend error: {message}", kind.as_str())]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_image() -> Self {
        Self::new(BackendErrorKind::NoImage, "no image in response")
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Service, message)
    }

    /// Whether a caller may reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::Transport | BackendErrorKind::Quota
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_quota_are_retryable() {
        assert!(BackendError::new(BackendErrorKind::Transport, "timeout").is_retryable());
        assert!(BackendError::new(BackendErrorKind::Quota, "429").is_retryable());
        assert!(!BackendError::no_image().is_retryable());
        assert!(!BackendError::service("boom").is_retryable());
        assert!(!BackendError::new(BackendErrorKind::Configuration, "key").is_retryable());
    }

    #[test]
    fn backend_error_display_names_kind() {
        let err = StudioError::from(BackendError::no_image());
        assert_eq!(
            err.to_string(),
            "no_image backend error: no image in response"
        );
    }
}
