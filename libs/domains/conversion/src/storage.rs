//! Object storage seam and its S3 implementation.
//!
//! ## Configuration
//!
//! `S3ObjectStore::from_config` uses the AWS SDK default credential chain:
//! - Environment variables (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`)
//! - Web identity token (EKS IRSA)
//! - IAM instance profile (EC2)
//! - Shared credentials file
//!
//! A custom endpoint and path-style addressing make it work against MinIO.

use crate::error::{ConversionError, ConversionResult};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use core_config::StorageConfig;
use tracing::debug;

/// Read access to remote objects.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the whole object.
    async fn get(&self, bucket: &str, key: &str) -> ConversionResult<Vec<u8>>;
}

/// S3 (or S3-compatible) object store
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the shared AWS config plus storage overrides.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::from_env();

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        Self::new(Client::from_conf(s3_config))
    }

    /// Create with explicit credentials (useful for testing against MinIO)
    pub fn with_credentials(
        endpoint: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None, // session token
            None, // expiry
            "manual",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(region.into()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self::new(Client::from_conf(config))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> ConversionResult<Vec<u8>> {
        let storage_error = |message: String| ConversionError::Storage {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error(DisplayErrorContext(&e).to_string()))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| storage_error(e.to_string()))?;

        let bytes = body.into_bytes().to_vec();
        debug!(bucket = %bucket, key = %key, bytes = bytes.len(), "Fetched object");
        Ok(bytes)
    }
}
