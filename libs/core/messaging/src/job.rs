//! Job trait for broker-delivered work.

use serde::{de::DeserializeOwned, Serialize};

/// A job that travels through the broker as JSON.
///
/// Besides a stable identifier, every job carries a context block that
/// senders overwrite with their own context before publishing.
///
/// # Example
///
/// ```rust
/// use messaging::Job;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct Tenant {
///     project_id: Option<String>,
/// }
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct ThumbnailJob {
///     id: String,
///     context: Tenant,
///     path: String,
/// }
///
/// impl Job for ThumbnailJob {
///     type Context = Tenant;
///
///     fn job_id(&self) -> String {
///         self.id.clone()
///     }
///
///     fn context(&self) -> &Tenant {
///         &self.context
///     }
///
///     fn set_context(&mut self, context: Tenant) {
///         self.context = context;
///     }
/// }
/// ```
pub trait Job: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Tenant/caller block stamped onto outgoing messages.
    type Context: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Get the job ID.
    ///
    /// Derived messages keep the id of the job they came from.
    fn job_id(&self) -> String;

    fn context(&self) -> &Self::Context;

    fn set_context(&mut self, context: Self::Context);

    /// Replace the context, consuming the job.
    fn with_context(mut self, context: Self::Context) -> Self {
        self.set_context(context);
        self
    }

    /// Job type name used in logs.
    fn job_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct TestContext {
        pub tenant: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TestJob {
        pub id: String,
        #[serde(default)]
        pub context: TestContext,
        pub data: String,
    }

    impl TestJob {
        pub fn new(id: &str, data: &str) -> Self {
            Self {
                id: id.to_string(),
                context: TestContext::default(),
                data: data.to_string(),
            }
        }
    }

    impl Job for TestJob {
        type Context = TestContext;

        fn job_id(&self) -> String {
            self.id.clone()
        }

        fn context(&self) -> &TestContext {
            &self.context
        }

        fn set_context(&mut self, context: TestContext) {
            self.context = context;
        }
    }

    #[test]
    fn test_with_context_replaces_block() {
        let job = TestJob::new("job-1", "payload").with_context(TestContext {
            tenant: Some("acme".into()),
        });

        assert_eq!(job.job_id(), "job-1");
        assert_eq!(job.context().tenant.as_deref(), Some("acme"));
    }

    #[test]
    fn test_job_type_names_the_struct() {
        let job = TestJob::new("job-1", "payload");
        assert!(job.job_type().ends_with("TestJob"));
    }
}
