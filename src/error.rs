use thiserror::Error;

/// Longest diagnostic excerpt carried inside an error message.
pub const MAX_DETAIL_CHARS: usize = 200;

/// Failure taxonomy shared by the gate, the catalog builder and the engine
/// orchestration layer. Each variant has a stable wire code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("{0}")]
    UnsupportedPlatform(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    FormatNotAvailable(String),

    #[error("{0}")]
    ExtractionFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidUrl(_) => "INVALID_URL",
            ServiceError::UnsupportedPlatform(_) => "UNSUPPORTED_PLATFORM",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::FormatNotAvailable(_) => "FORMAT_NOT_AVAILABLE",
            ServiceError::ExtractionFailed(_) => "YTDLP_FAILED",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceError::InvalidUrl(m)
            | ServiceError::UnsupportedPlatform(m)
            | ServiceError::NotFound(m)
            | ServiceError::FormatNotAvailable(m)
            | ServiceError::ExtractionFailed(m)
            | ServiceError::Internal(m) => m,
        }
    }

    /// Wrap a lower-level failure as an extraction failure with a bounded excerpt.
    pub fn extraction(context: &str, detail: impl std::fmt::Display) -> Self {
        ServiceError::ExtractionFailed(format!("{context}: {}", excerpt(&detail.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// First [`MAX_DETAIL_CHARS`] characters of `text`, trimmed.
pub fn excerpt(text: &str) -> String {
    text.trim().chars().take(MAX_DETAIL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ServiceError::InvalidUrl("x".into()).code(), "INVALID_URL");
        assert_eq!(
            ServiceError::ExtractionFailed("x".into()).code(),
            "YTDLP_FAILED"
        );
        assert_eq!(
            ServiceError::FormatNotAvailable("x".into()).code(),
            "FORMAT_NOT_AVAILABLE"
        );
    }

    #[test]
    fn test_extraction_truncates_detail() {
        let noisy = "e".repeat(1000);
        let err = ServiceError::extraction("Download failed", noisy);
        assert_eq!(err.message().len(), "Download failed: ".len() + MAX_DETAIL_CHARS);
    }

    #[test]
    fn test_excerpt_counts_chars_not_bytes() {
        let text = "é".repeat(300);
        assert_eq!(excerpt(&text).chars().count(), MAX_DETAIL_CHARS);
    }
}
