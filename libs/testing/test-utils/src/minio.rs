//! S3-compatible object storage for tests
//!
//! Provides a `TestMinio` helper backed by a MinIO container.

use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::minio::MinIO;

pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

/// Test MinIO wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is dropped.
/// Point an S3 client at [`TestMinio::endpoint`] with path-style addressing and
/// the `minioadmin` credentials.
pub struct TestMinio {
    #[allow(dead_code)]
    container: ContainerAsync<MinIO>,
    pub endpoint: String,
}

impl TestMinio {
    pub async fn new() -> Self {
        let container = MinIO::default()
            .start()
            .await
            .expect("Failed to start MinIO container");

        let host_port = container
            .get_host_port_ipv4(9000)
            .await
            .expect("Failed to get MinIO port");

        let endpoint = format!("http://127.0.0.1:{}", host_port);

        tracing::info!(port = host_port, "Test MinIO ready");

        Self {
            container,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for TestMinio {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test MinIO container");
    }
}
