//! Error types for the conversion domain.

use std::time::Duration;
use thiserror::Error;

/// Result type for conversion operations.
pub type ConversionResult<T> = Result<T, ConversionError>;

/// Everything that can end a conversion job in failure.
///
/// Each variant maps to a stable tag written to `task.error.error`.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The task has no input under the requested key.
    #[error("task.input has no entry {0:?}")]
    MissingInput(String),

    /// An input path that looks remote but cannot be resolved.
    #[error("malformed object reference {reference:?}: {reason}")]
    MalformedReference { reference: String, reason: String },

    /// Object storage rejected or failed the fetch.
    #[error("failed to fetch {bucket}/{key}: {message}")]
    Storage {
        bucket: String,
        key: String,
        message: String,
    },

    /// Local filesystem failure around the conversion.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter process could not be started.
    #[error("failed to start converter {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter wrote to standard error.
    #[error("converter reported an error: {stderr}")]
    ConverterFailed {
        stderr: String,
        exit_code: Option<i32>,
    },

    /// The converter exited unsuccessfully with a clean standard error.
    #[error("converter exited with status {}", .exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ConverterExit { exit_code: Option<i32> },

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },
}

impl ConversionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn malformed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Tag for `task.error.error`.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversionError::MissingInput(_) | ConversionError::MalformedReference { .. } => {
                "InputResolutionError"
            }
            ConversionError::Storage { .. } | ConversionError::Io { .. } => "StorageError",
            ConversionError::Spawn { .. }
            | ConversionError::ConverterFailed { .. }
            | ConversionError::ConverterExit { .. } => "ConversionError",
            ConversionError::Timeout { .. } => "TimeoutError",
        }
    }

    /// Text for `task.error.message`; converter output is passed through verbatim.
    pub fn status_message(&self) -> String {
        match self {
            ConversionError::ConverterFailed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            ConversionError::MissingInput("1".into()).kind(),
            "InputResolutionError"
        );
        assert_eq!(
            ConversionError::malformed("s3://", "missing bucket").kind(),
            "InputResolutionError"
        );
        assert_eq!(
            ConversionError::Storage {
                bucket: "b".into(),
                key: "k".into(),
                message: "NoSuchKey".into(),
            }
            .kind(),
            "StorageError"
        );
        assert_eq!(
            ConversionError::ConverterExit { exit_code: Some(2) }.kind(),
            "ConversionError"
        );
        assert_eq!(
            ConversionError::Timeout {
                stage: "converter",
                after: Duration::from_secs(600),
            }
            .kind(),
            "TimeoutError"
        );
    }

    #[test]
    fn test_status_message_keeps_stderr_verbatim() {
        let err = ConversionError::ConverterFailed {
            stderr: "unzip: cannot find zipfile\n".into(),
            exit_code: Some(0),
        };
        assert_eq!(err.status_message(), "unzip: cannot find zipfile\n");
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ConversionError::MissingInput("1".into()).to_string(),
            "task.input has no entry \"1\""
        );
        assert_eq!(
            ConversionError::ConverterExit { exit_code: None }.to_string(),
            "converter exited with status signal"
        );
        assert_eq!(
            ConversionError::Timeout {
                stage: "download",
                after: Duration::from_secs(120),
            }
            .to_string(),
            "download timed out after 120s"
        );
    }
}
