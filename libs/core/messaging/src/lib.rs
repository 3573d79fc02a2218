//! Job processing over a message broker.
//!
//! This library separates three concerns:
//! - **Jobs**: serde-typed messages with a stable id and a context block ([`Job`])
//! - **Processors**: async handlers whose result decides the delivery outcome ([`Processor`])
//! - **Transport**: the RabbitMQ plumbing behind the `amqp` feature (listeners,
//!   senders, the fan-out broadcaster, health and metrics)
//!
//! # Delivery outcome
//!
//! ```text
//! delivery ──> deserialize ──┬─> (invalid) ───────────────> reject, no requeue
//!                            └─> spawn(process(job)) ──┬─> Ok ──────> ack
//!                                                      ├─> Err ─────> reject, no requeue
//!                                                      └─> panic ───> reject, no requeue
//! ```
//!
//! Failures are reported out-of-band by the processor itself (status
//! messages), so the broker never redelivers a job that was handled.

pub mod error;
pub mod job;
pub mod processor;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use error::{ErrorCategory, ProcessingError};
pub use job::Job;
pub use processor::{FailingProcessor, NoOpProcessor, Processor};
