//! BCF Conversion Domain
//!
//! Turns BCF archives referenced by a job message into JSON artifacts by
//! running an external converter, then reports the result on the broker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  QueueListener  │  ← durable work queue, prefetch 1
//! └────────┬────────┘
//!          │ JobMessage
//! ┌────────▼────────┐     ┌───────────────┐
//! │ConversionWorker │ ──> │  ObjectStore  │  ← S3 / MinIO (remote inputs)
//! └────────┬────────┘     └───────────────┘
//!          │
//! ┌────────▼────────┐
//! │ConverterCommand │  ← `sh convert.sh <input> <output>`
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  QueueSender    │  ← status topic, optional broadcast and downstream queue
//! └─────────────────┘
//! ```

pub mod converter;
pub mod error;
pub mod location;
pub mod models;
pub mod processor;
pub mod storage;

pub use converter::{ConverterCommand, ConverterOutput, ExitCodePolicy};
pub use error::{ConversionError, ConversionResult};
pub use location::{InputLocation, ObjectRef};
pub use models::{
    Artifact, InputDescriptor, JobContext, JobMessage, JobOutcome, OutputDescriptor, Task,
    TaskError,
};
pub use processor::{ConversionWorker, WorkerSettings};
pub use storage::{ObjectStore, S3ObjectStore};
