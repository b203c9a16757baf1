use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use thiserror::Error;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "WORKER_COUNT", default = "3")]
    pub worker_count: usize,

    #[envconfig(from = "JOB_QUEUE_CAPACITY", default = "100")]
    pub queue_capacity: usize,

    /// Inclusive cap on processing attempts; a job that fails its last
    /// attempt stays failed.
    #[envconfig(from = "MAX_ATTEMPTS", default = "3")]
    pub max_attempts: u32,

    #[envconfig(from = "SWEEPER_INTERVAL", default = "30s")]
    pub sweeper_interval: EnvDuration,

    #[envconfig(from = "REQUEST_BODY_LIMIT", default = "1048576")]
    pub request_body_limit: usize,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "30s")]
    pub request_timeout: EnvDuration,

    #[envconfig(from = "SERVER_SHUTDOWN_TIMEOUT", default = "10s")]
    pub server_shutdown_timeout: EnvDuration,

    /// How long the built-in processor pretends to work on a job.
    #[envconfig(from = "JOB_PROCESSING_DURATION", default = "2s")]
    pub processing_duration: EnvDuration,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("JOB_QUEUE_CAPACITY must be greater than zero")]
    ZeroQueueCapacity,
    #[error("WORKER_COUNT must be greater than zero")]
    ZeroWorkerCount,
    #[error("MAX_ATTEMPTS must be greater than zero")]
    ZeroMaxAttempts,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values the dispatch loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkerCount);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }

        Ok(())
    }
}

/// A duration read from the environment: `10s`, `500ms`, or a plain
/// integer number of seconds.
#[derive(Debug, Clone, Copy)]
pub struct EnvDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvDurationError;

impl FromStr for EnvDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "ms" before "s": "500ms" also ends in "s".
        let duration = if let Some(millis) = s.strip_suffix("ms") {
            let millis = millis.parse::<u64>().map_err(|_| ParseEnvDurationError)?;
            Duration::from_millis(millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            let secs = secs.parse::<u64>().map_err(|_| ParseEnvDurationError)?;
            Duration::from_secs(secs)
        } else {
            let secs = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;
            Duration::from_secs(secs)
        };

        Ok(EnvDuration(duration))
    }
}
