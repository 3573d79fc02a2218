//! Error types for message processing.

use std::fmt;
use thiserror::Error;

/// Why a delivery was not acknowledged.
///
/// Every category leads to a reject without requeue; the category only
/// labels logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The processor ran and reported a failure for the job
    Job,

    /// The payload could not be decoded into a job
    Malformed,

    /// The handler task panicked or was cancelled
    Panicked,
}

impl ErrorCategory {
    /// Stable label used for the `category` metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Job => "job",
            ErrorCategory::Malformed => "malformed",
            ErrorCategory::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a [`Processor`](crate::Processor) or raised by the
/// listener around it.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The job was handled but did not succeed
    #[error("job failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Payload did not match the job schema
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Handler task did not complete
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl ProcessingError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    pub fn failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessingError::Failed { .. } => ErrorCategory::Job,
            ProcessingError::Malformed(_) => ErrorCategory::Malformed,
            ProcessingError::Panicked(_) => ErrorCategory::Panicked,
        }
    }
}
