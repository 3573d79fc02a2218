//! Conversion worker.
//!
//! ```text
//! resolve input ──┬─> local ─────────────────┐
//!                 └─> remote ──> download ───┤
//!                                            ▼
//!                                         convert ──┬─> success ──> status ──> forward?
//!                                                   └─> failure ──> status
//! ```
//!
//! Every terminal path emits exactly one status message before the
//! processor returns, so the listener can settle the delivery afterwards.

use crate::converter::ConverterCommand;
use crate::error::{ConversionError, ConversionResult};
use crate::location::{output_path, InputLocation, ObjectRef};
use crate::models::{Artifact, JobMessage, JobOutcome, TaskError};
use crate::storage::ObjectStore;
use async_trait::async_trait;
use messaging::amqp::{QueueSender, TopicBroadcaster, Transport};
use messaging::{ProcessingError, Processor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime settings of the worker, built once at startup.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Durable topic exchange for status messages
    pub status_topic: String,
    /// Prefix of the status routing key (`<prefix>.succeeded|failed`)
    pub status_routing_key: String,
    /// Next pipeline stage; forwarding is off when unset
    pub downstream_queue: Option<String>,
    /// Fanout exchange that also receives every status
    pub status_broadcast: Option<String>,
    pub service_name: String,
    pub temp_dir: PathBuf,
    pub download_timeout: Duration,
    pub artifact_type: String,
    pub artifact_extension: String,
}

impl WorkerSettings {
    pub fn new(status_topic: impl Into<String>) -> Self {
        Self {
            status_topic: status_topic.into(),
            status_routing_key: "bcf.converter".to_string(),
            downstream_queue: None,
            status_broadcast: None,
            service_name: "bcf-converter".to_string(),
            temp_dir: std::env::temp_dir().join("bcf-converter"),
            download_timeout: Duration::from_secs(120),
            artifact_type: "bcfjson".to_string(),
            artifact_extension: "json".to_string(),
        }
    }

    pub fn routing_key(&self, outcome: JobOutcome) -> String {
        format!("{}.{}", self.status_routing_key, outcome.as_str())
    }
}

/// A remote input downloaded for the duration of one job.
struct DownloadedInput {
    path: PathBuf,
    /// Temp root; directories below it are pruned once empty
    root: PathBuf,
}

impl DownloadedInput {
    async fn remove(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to remove downloaded input");
            return;
        }
        debug!(path = %self.path.display(), "Removed downloaded input");

        // `remove_dir` refuses non-empty directories, which ends the walk.
        let mut dir = self.path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// Resolves, converts and reports one job at a time.
pub struct ConversionWorker<S: ObjectStore> {
    settings: WorkerSettings,
    store: Arc<S>,
    converter: ConverterCommand,
    transport: Arc<dyn Transport>,
}

impl<S: ObjectStore> ConversionWorker<S> {
    pub fn new(
        settings: WorkerSettings,
        store: S,
        converter: ConverterCommand,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            store: Arc::new(store),
            converter,
            transport,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Resolve the primary input, convert it and describe the artifact.
    async fn convert(&self, job: &JobMessage) -> ConversionResult<Artifact> {
        let input = job.primary_input()?;
        let location = InputLocation::parse(&input.path)?;

        let file_name = location
            .file_name()
            .ok_or_else(|| ConversionError::malformed(&input.path, "input has no file name"))?;
        let output = output_path(&job.task.output.path, file_name, &self.settings.artifact_extension)?;

        if let Some(dir) = output.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ConversionError::io(format!("failed to create {}", dir.display()), e))?;
        }

        match location {
            InputLocation::Local(path) => {
                self.converter.run(&path, &output).await?;
            }
            InputLocation::Remote(object) => {
                let downloaded = self.download(&object).await?;
                let result = self.converter.run(&downloaded.path, &output).await;
                downloaded.remove().await;
                result?;
            }
        }

        Ok(Artifact::file(
            self.settings.artifact_type.clone(),
            output.to_string_lossy().into_owned(),
        ))
    }

    async fn download(&self, object: &ObjectRef) -> ConversionResult<DownloadedInput> {
        let path = object.local_path(&self.settings.temp_dir);
        debug!(object = %object, path = %path.display(), "Downloading input");

        let bytes = tokio::time::timeout(
            self.settings.download_timeout,
            self.store.get(&object.bucket, &object.key),
        )
        .await
        .map_err(|_| ConversionError::Timeout {
            stage: "download",
            after: self.settings.download_timeout,
        })??;

        write_file(&path, &bytes).await?;
        info!(object = %object, bytes = bytes.len(), "Input downloaded");

        Ok(DownloadedInput {
            path,
            root: self.settings.temp_dir.clone(),
        })
    }

    /// Status to the topic exchange, plus the optional broadcast.
    async fn report(&self, job: &JobMessage) {
        let outcome = job.outcome();
        let routing_key = self.settings.routing_key(outcome);

        let sender = QueueSender::<JobMessage>::new(
            self.transport.clone(),
            self.settings.status_topic.clone(),
            job.context.clone(),
        );
        sender
            .send_to(&self.settings.status_topic, &routing_key, job.clone())
            .await;

        if let Some(exchange) = &self.settings.status_broadcast {
            let broadcaster = TopicBroadcaster::<JobMessage>::new(
                self.transport.clone(),
                exchange.clone(),
                self.settings.service_name.clone(),
                job.context.clone(),
            );
            broadcaster.send(job.clone()).await;
        }
    }

    async fn forward(&self, job: &JobMessage, artifact: &Artifact, queue: &str) {
        let next = job.derive_next(artifact);
        let sender =
            QueueSender::<JobMessage>::new(self.transport.clone(), queue, job.context.clone());

        if sender.send(next).await {
            info!(job_id = %job.id, queue = %queue, "Forwarded job to next stage");
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> ConversionResult<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ConversionError::io(format!("failed to create {}", dir.display()), e))?;
    }

    if let Err(e) = tokio::fs::write(path, bytes).await {
        // a partial file must not be mistaken for a finished download
        let _ = tokio::fs::remove_file(path).await;
        return Err(ConversionError::io(
            format!("failed to write {}", path.display()),
            e,
        ));
    }
    Ok(())
}

#[async_trait]
impl<S: ObjectStore + 'static> Processor<JobMessage> for ConversionWorker<S> {
    type Output = Artifact;

    async fn process(&self, mut job: JobMessage) -> Result<Artifact, ProcessingError> {
        info!(job_id = %job.id, "Starting conversion");

        match self.convert(&job).await {
            Ok(artifact) => {
                job.mark_succeeded(vec![artifact.clone()]);
                self.report(&job).await;

                if let Some(queue) = &self.settings.downstream_queue {
                    self.forward(&job, &artifact, queue).await;
                }

                info!(job_id = %job.id, path = %artifact.path, "Conversion succeeded");
                Ok(artifact)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, kind = e.kind(), "Conversion failed");
                job.mark_failed(TaskError::from(&e));
                self.report(&job).await;

                Err(ProcessingError::failed_with_source(e.kind(), e))
            }
        }
    }

    fn name(&self) -> &'static str {
        "bcf_converter"
    }

    /// Unhealthy once the download directory can no longer be created.
    async fn health_check(&self) -> Result<bool, ProcessingError> {
        tokio::fs::create_dir_all(&self.settings.temp_dir)
            .await
            .map_err(|e| {
                ProcessingError::failed(format!(
                    "temp dir {} unusable: {}",
                    self.settings.temp_dir.display(),
                    e
                ))
            })?;
        Ok(true)
    }
}
