//! Status broadcast logger used by the `bcf-status-monitor` binary.

use async_trait::async_trait;
use domain_conversion::{JobMessage, JobOutcome};
use messaging::{ProcessingError, Processor};
use tracing::{debug, info, warn};

/// Logs one line per broadcast status.
pub struct StatusLogger;

#[async_trait]
impl Processor<JobMessage> for StatusLogger {
    type Output = JobOutcome;

    async fn process(&self, job: JobMessage) -> Result<JobOutcome, ProcessingError> {
        let outcome = job.outcome();
        let service = job
            .extra
            .get("service")
            .and_then(|value| value.as_str())
            .unwrap_or("unknown");

        match outcome {
            JobOutcome::Succeeded => {
                let artifacts: Vec<&str> = job
                    .artifacts
                    .iter()
                    .flatten()
                    .map(|a| a.path.as_str())
                    .collect();
                info!(job_id = %job.id, service, ?artifacts, "Conversion succeeded");
            }
            JobOutcome::Failed => {
                let (kind, message) = job
                    .task
                    .error
                    .as_ref()
                    .map(|e| (e.error.as_str(), e.message.as_str()))
                    .unwrap_or_default();
                warn!(
                    job_id = %job.id,
                    service,
                    error = kind,
                    reason = message,
                    "Conversion failed"
                );
            }
            JobOutcome::Pending => {
                debug!(job_id = %job.id, service, "Status without outcome");
            }
        }

        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "bcf_status_logger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(task: serde_json::Value, artifacts: serde_json::Value) -> JobMessage {
        serde_json::from_value(json!({
            "id": "job-1",
            "context": { "projectId": "p-1" },
            "task": task,
            "artifacts": artifacts,
            "service": "bcf-converter",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_logs_succeeded_status() {
        let job = status(
            json!({ "input": { "1": { "path": "s3://bcf/a.bcf" } }, "output": { "path": "/out" } }),
            json!([{ "type": "bcfjson", "path": "/out/a.json", "storage": "file" }]),
        );

        assert_eq!(StatusLogger.process(job).await.unwrap(), JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_logs_failed_status() {
        let job = status(
            json!({
                "input": { "1": { "path": "s3://bcf/a.bcf" } },
                "output": { "path": "/out" },
                "error": { "error": "ConversionError", "message": "bad archive" },
            }),
            json!([]),
        );

        assert_eq!(StatusLogger.process(job).await.unwrap(), JobOutcome::Failed);
    }
}
