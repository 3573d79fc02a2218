//! Processor trait for job execution.

use crate::error::ProcessingError;
use crate::job::Job;
use async_trait::async_trait;
use std::fmt::Debug;

/// Job processor trait.
///
/// The listener owns the delivery; the processor only sees the decoded job
/// and returns an explicit result:
/// - `Ok(output)`: the delivery is acknowledged
/// - `Err(ProcessingError)`: the delivery is rejected without requeue
///
/// Processors that report failures out-of-band (status messages) do so
/// before returning the error.
///
/// # Example
///
/// ```rust,ignore
/// use messaging::{Job, Processor, ProcessingError};
/// use async_trait::async_trait;
///
/// struct ThumbnailProcessor {
///     store: Arc<dyn ObjectStore>,
/// }
///
/// #[async_trait]
/// impl Processor<ThumbnailJob> for ThumbnailProcessor {
///     type Output = PathBuf;
///
///     async fn process(&self, job: ThumbnailJob) -> Result<PathBuf, ProcessingError> {
///         let source = self.store.fetch(&job.path).await
///             .map_err(|e| ProcessingError::failed_with_source("fetch failed", e))?;
///         render_thumbnail(&source).map_err(|e| ProcessingError::failed(e.to_string()))
///     }
///
///     fn name(&self) -> &'static str {
///         "thumbnail_processor"
///     }
/// }
/// ```
#[async_trait]
pub trait Processor<J: Job>: Send + Sync {
    /// Value produced on success, logged by the listener.
    type Output: Debug + Send + 'static;

    /// Process a job, taking ownership of it.
    async fn process(&self, job: J) -> Result<Self::Output, ProcessingError>;

    /// Get the processor name.
    ///
    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;

    /// Perform a health check.
    ///
    /// # Default
    ///
    /// Returns `Ok(true)` (always healthy).
    async fn health_check(&self) -> Result<bool, ProcessingError> {
        Ok(true)
    }
}

/// A no-op processor for testing.
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

#[async_trait]
impl<J: Job> Processor<J> for NoOpProcessor {
    type Output = ();

    async fn process(&self, _job: J) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_processor"
    }
}

/// A processor that always fails (for testing).
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    error_message: String,
    panic: bool,
}

impl FailingProcessor {
    /// Fails every job with [`ProcessingError::Failed`].
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            panic: false,
        }
    }

    /// Panics inside `process`.
    pub fn panicking(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            panic: true,
        }
    }
}

#[async_trait]
impl<J: Job> Processor<J> for FailingProcessor {
    type Output = ();

    async fn process(&self, _job: J) -> Result<(), ProcessingError> {
        if self.panic {
            panic!("{}", self.error_message);
        }
        Err(ProcessingError::failed(self.error_message.clone()))
    }

    fn name(&self) -> &'static str {
        "failing_processor"
    }
}
