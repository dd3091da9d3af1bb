//! Error taxonomy shared by every pipeline stage.
//!
//! Stage code returns [`PipelineError`] so the orchestrator can report the
//! failure kind per period. The CLI and configuration layers use `anyhow`.

use std::fmt;
use thiserror::Error;

/// Errors raised by the classification pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input that cannot be used as given (class diversity, AOI, class set).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unreadable or misaligned raster, or a CRS mismatch.
    #[error("data error: {0}")]
    Data(String),

    /// Too few samples per class after the train/test split.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Raster read/write or filesystem failure.
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Provenance transaction failure.
    #[error("metadata write failed: {0}")]
    MetadataWrite(String),

    /// The run was interrupted at a window or stage boundary.
    #[error("cancelled")]
    Cancelled,
}

/// Taxonomy name of a [`PipelineError`], used in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Validation,
    Data,
    InsufficientData,
    Io,
    MetadataWrite,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Data => "DataError",
            ErrorKind::InsufficientData => "InsufficientDataError",
            ErrorKind::Io => "IOError",
            ErrorKind::MetadataWrite => "MetadataWriteError",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::Data(_) => ErrorKind::Data,
            PipelineError::InsufficientData(_) => ErrorKind::InsufficientData,
            PipelineError::Io { .. } => ErrorKind::Io,
            PipelineError::MetadataWrite(_) => ErrorKind::MetadataWrite,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Build an I/O error with an underlying cause.
    pub fn io<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PipelineError::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build an I/O error without an underlying cause.
    pub fn io_msg(message: impl Into<String>) -> Self {
        PipelineError::Io {
            message: message.into(),
            source: None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::io("filesystem operation failed", err)
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::MetadataWrite(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(PipelineError::Validation("x".into()).kind().to_string(), "ValidationError");
        assert_eq!(PipelineError::Data("x".into()).kind().to_string(), "DataError");
        assert_eq!(
            PipelineError::InsufficientData("x".into()).kind().to_string(),
            "InsufficientDataError"
        );
        assert_eq!(PipelineError::io_msg("x").kind().to_string(), "IOError");
        assert_eq!(PipelineError::MetadataWrite("x".into()).kind().to_string(), "MetadataWriteError");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err: PipelineError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
