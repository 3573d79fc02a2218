//! Configuration for the converter worker and the status monitor

use core_config::{
    AmqpConfig, ConfigError, FromEnv, StorageConfig, env_optional, env_or_default, env_parse_or,
    env_required,
};
use domain_conversion::{ConverterCommand, ExitCodePolicy, WorkerSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Everything the worker reads from the environment, once, at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub amqp: AmqpConfig,
    pub storage: StorageConfig,
    /// Work queue consumed by the listener
    pub queue: String,
    pub settings: WorkerSettings,
    pub converter: ConverterCommand,
    pub health_port: u16,
}

impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let amqp = AmqpConfig::from_env()?;
        let storage = StorageConfig::from_env()?;
        let queue = env_required("RABBIT_MQ_QUEUE_BCF_CONVERTER")?;

        let mut settings = WorkerSettings::new(env_required("RABBIT_MQ_STATUS_TOPIC")?);
        settings.status_routing_key =
            env_or_default("RABBIT_MQ_STATUS_ROUTING_KEY", &settings.status_routing_key);
        settings.downstream_queue = env_optional("RABBIT_MQ_DOWNSTREAM_QUEUE");
        settings.status_broadcast = env_optional("RABBIT_MQ_STATUS_BROADCAST");
        settings.service_name = env_or_default("SERVICE_NAME", &settings.service_name);
        if let Some(dir) = env_optional("CONVERTER_TEMP_DIR") {
            settings.temp_dir = PathBuf::from(dir);
        }
        settings.download_timeout =
            Duration::from_secs(env_parse_or("DOWNLOAD_TIMEOUT_SECS", 120u64)?);
        settings.artifact_type = env_or_default("ARTIFACT_TYPE", &settings.artifact_type);
        settings.artifact_extension =
            env_or_default("ARTIFACT_EXTENSION", &settings.artifact_extension);

        let command_line = env_or_default("CONVERTER_COMMAND", "sh convert.sh");
        let converter = ConverterCommand::from_command_line(&command_line)
            .ok_or_else(|| ConfigError::ParseError {
                key: "CONVERTER_COMMAND".to_string(),
                details: "command is empty".to_string(),
            })?
            .with_timeout(Duration::from_secs(env_parse_or(
                "CONVERTER_TIMEOUT_SECS",
                600u64,
            )?))
            .with_policy(env_parse_or(
                "CONVERTER_EXIT_CODE_POLICY",
                ExitCodePolicy::StderrOnly,
            )?);

        Ok(Self {
            amqp,
            storage,
            queue,
            settings,
            converter,
            health_port: env_parse_or("HEALTH_PORT", 8083u16)?,
        })
    }
}

/// Settings of the status monitor binary.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub amqp: AmqpConfig,
    /// Fanout exchange the workers broadcast statuses on
    pub exchange: String,
    pub service_name: String,
}

impl FromEnv for MonitorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            amqp: AmqpConfig::from_env()?,
            exchange: env_required("RABBIT_MQ_STATUS_BROADCAST")?,
            service_name: env_or_default("SERVICE_NAME", "bcf-status-monitor"),
        })
    }
}
