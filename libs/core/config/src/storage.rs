use crate::{env_optional, env_parse_or, ConfigError, FromEnv};

/// Object-storage client settings.
///
/// Everything is optional: without overrides the AWS SDK default chain
/// (environment, profile, IRSA, instance metadata) decides region and credentials.
#[derive(Clone, Debug, Default)]
pub struct StorageConfig {
    /// Custom endpoint for S3-compatible stores (MinIO, Ceph)
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Path-style addressing, required by most self-hosted stores
    pub force_path_style: bool,
}

impl FromEnv for StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let endpoint = env_optional("S3_ENDPOINT");
        let region = env_optional("S3_REGION").or_else(|| env_optional("AWS_REGION"));
        // A custom endpoint almost always means a self-hosted store
        let force_path_style = env_parse_or("S3_FORCE_PATH_STYLE", endpoint.is_some())?;

        Ok(Self {
            endpoint,
            region,
            force_path_style,
        })
    }
}
