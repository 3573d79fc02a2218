//! Job Message schema.
//!
//! The JSON shape is shared with upstream producers and downstream stages,
//! so unknown fields are carried through untouched.

use crate::error::{ConversionError, ConversionResult};
use messaging::Job;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key of the canonical input for single-input conversions.
pub const PRIMARY_INPUT: &str = "1";

/// Storage tag for artifacts written to the local filesystem.
pub const FILE_STORAGE: &str = "file";

/// Tenancy block. Never interpreted, only propagated as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobContext(pub Map<String, Value>);

impl JobContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn project_id(&self) -> Option<&str> {
        self.get_str("projectId")
    }

    pub fn role(&self) -> Option<&str> {
        self.get_str("role")
    }

    pub fn ifc_project_id(&self) -> Option<&str> {
        self.get_str("ifcProjectId")
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Local path or `scheme://bucket/key`
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// Directory the artifacts are written to
    pub path: String,
}

/// Failure details the worker adds to `task.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub error: String,
    pub message: String,
}

impl From<&ConversionError> for TaskError {
    fn from(err: &ConversionError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.status_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub input: BTreeMap<String, InputDescriptor>,
    pub output: OutputDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A produced output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub storage: String,
}

impl Artifact {
    pub fn file(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
            storage: FILE_STORAGE.to_string(),
        }
    }
}

/// Terminal state recorded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Pending => "pending",
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
        }
    }
}

/// The unit of work flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(alias = "uuid")]
    pub id: String,
    #[serde(default)]
    pub context: JobContext,
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobMessage {
    pub fn input(&self, key: &str) -> ConversionResult<&InputDescriptor> {
        self.task
            .input
            .get(key)
            .ok_or_else(|| ConversionError::MissingInput(key.to_string()))
    }

    pub fn primary_input(&self) -> ConversionResult<&InputDescriptor> {
        self.input(PRIMARY_INPUT)
    }

    /// Record success. Clears any earlier error so the two never coexist.
    pub fn mark_succeeded(&mut self, artifacts: Vec<Artifact>) {
        self.task.error = None;
        self.artifacts = Some(artifacts);
    }

    /// Record failure. Clears any earlier artifacts so the two never coexist.
    pub fn mark_failed(&mut self, error: TaskError) {
        self.artifacts = None;
        self.task.error = Some(error);
    }

    pub fn outcome(&self) -> JobOutcome {
        match (&self.task.error, &self.artifacts) {
            (Some(_), _) => JobOutcome::Failed,
            (None, Some(_)) => JobOutcome::Succeeded,
            (None, None) => JobOutcome::Pending,
        }
    }

    /// Smallest integer key above every numeric input key.
    pub fn next_input_key(&self) -> String {
        let highest = self
            .task
            .input
            .keys()
            .filter_map(|key| key.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (highest + 1).to_string()
    }

    /// Job for the next stage: the artifact becomes a new input, merged
    /// with the primary input's metadata and tagged with the artifact type.
    pub fn derive_next(&self, artifact: &Artifact) -> JobMessage {
        let mut metadata = self
            .primary_input()
            .ok()
            .and_then(|input| input.metadata.clone())
            .unwrap_or_default();
        metadata.insert("type".to_string(), Value::String(artifact.kind.clone()));

        let mut next = self.clone();
        next.artifacts = None;
        next.task.error = None;
        next.task.input.insert(
            self.next_input_key(),
            InputDescriptor {
                path: artifact.path.clone(),
                metadata: Some(metadata),
            },
        );
        next
    }
}

impl Job for JobMessage {
    type Context = JobContext;

    fn job_id(&self) -> String {
        self.id.clone()
    }

    fn context(&self) -> &JobContext {
        &self.context
    }

    fn set_context(&mut self, context: JobContext) {
        self.context = context;
    }

    fn job_type(&self) -> &'static str {
        "conversion"
    }
}
