//! Shared test utilities for worker testing
//!
//! This crate provides reusable test infrastructure for the messaging and
//! domain crates:
//! - `TestRabbitMq`: RabbitMQ container with automatic cleanup (feature: "rabbitmq")
//! - `TestMinio`: S3-compatible MinIO container (feature: "minio")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Features
//!
//! - `rabbitmq` (default): Enables RabbitMQ test infrastructure
//! - `minio`: Enables object-storage test infrastructure
//! - `all`: Enables everything
//!
//! Container-backed tests need a Docker daemon and are marked
//! `#[ignore = "requires Docker"]`; run them with `cargo test -- --ignored`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use test_utils::{TestDataBuilder, TestRabbitMq};
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_broker_test() {
//!     let rabbit = TestRabbitMq::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_broker_test");
//!
//!     let queue = builder.queue("conversions");
//!     let job_id = builder.job_id();
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "rabbitmq")]
mod rabbitmq;

#[cfg(feature = "minio")]
mod minio;

#[cfg(feature = "rabbitmq")]
pub use rabbitmq::TestRabbitMq;

#[cfg(feature = "minio")]
pub use minio::{MINIO_ACCESS_KEY, MINIO_SECRET_KEY, TestMinio};

/// Builder for test data with deterministic randomization
///
/// This keeps tests reproducible while still giving every test its own
/// queue and exchange names on a shared broker.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_forward_job");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic job id
    pub fn job_id(&self) -> String {
        self.uuid().to_string()
    }

    /// Deterministic project id for job contexts
    pub fn project_id(&self) -> String {
        format!("project-{}", self.seed)
    }

    /// Queue or exchange name unique to this test
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.queue("conversions"), "test-conversions-7");
    /// ```
    pub fn queue(&self, name: &str) -> String {
        format!("test-{}-{}", name, self.seed)
    }

    /// Generate a unique name for testing
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }

    fn uuid(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert two strings are equal with a nice error message
    pub fn assert_str_field(value: &str, expected: &str, context: &str) {
        assert_eq!(
            value, expected,
            "{}: expected {:?}, got {:?}",
            context, expected, value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.job_id(), builder2.job_id());
        assert_eq!(builder1.queue("jobs"), builder2.queue("jobs"));
    }

    #[test]
    fn test_data_builder_from_name() {
        let builder1 = TestDataBuilder::from_test_name("my_test");
        let builder2 = TestDataBuilder::from_test_name("my_test");

        assert_eq!(builder1.project_id(), builder2.project_id());
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.job_id(), builder2.job_id());
        assert_ne!(builder1.queue("jobs"), builder2.queue("jobs"));
    }
}
