//! Environment-driven configuration shared by the three binaries

use db_pool::DbConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid database configuration: {0}")]
    Database(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
    pub monitor: MonitorConfig,
}

/// `SERVICE_*`
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// `KAFKA_*`
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

/// `REDIS_*`
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// `MONITOR_*`
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "user-events".to_string()
}

fn default_group_id() -> String {
    "consumer-group".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_command_timeout_ms() -> u64 {
    3_000
}

fn default_interval_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load `.env` if present, then read each prefixed section.
    ///
    /// `default_name` is used when `SERVICE_NAME` is unset.
    pub fn from_env(default_name: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut service: ServiceConfig = envy::prefixed("SERVICE_").from_env()?;
        if service.name.trim().is_empty() {
            service.name = default_name.to_string();
        }

        let config = Config {
            service,
            kafka: envy::prefixed("KAFKA_").from_env()?,
            redis: envy::prefixed("REDIS_").from_env()?,
            monitor: envy::prefixed("MONITOR_").from_env()?,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::Invalid("KAFKA_BROKERS must not be empty".into()));
        }
        if self.kafka.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("KAFKA_TOPIC must not be empty".into()));
        }
        if self.monitor.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "MONITOR_INTERVAL_SECS must be greater than zero".into(),
            ));
        }
        if self.monitor.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "MONITOR_PROBE_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// PostgreSQL pool settings for this service (`DATABASE_URL` required)
    pub fn database(&self) -> Result<DbConfig, ConfigError> {
        DbConfig::from_env(&self.service.name).map_err(ConfigError::Database)
    }
}

impl ServiceConfig {
    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl KafkaConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl RedisConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
