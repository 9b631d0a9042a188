use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use crate::adapters::DEFAULT_RETENTION;
use crate::domain::{DispatcherOptions, SubmitPolicy};

pub const APP_NAME: &str = "requestor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestorConfig {
    /// Number of workers, i.e. the maximum of concurrent transport calls
    pub workers: usize,
    pub after_shutdown: SubmitPolicy,
    /// How long completed requests stay visible to the tracker
    pub tracking_retention_secs: u64,
    pub transport: TransportConfig,
}

impl Default for RequestorConfig {
    fn default() -> Self {
        Self {
            workers: DispatcherOptions::DEFAULT_POOL_SIZE,
            after_shutdown: SubmitPolicy::default(),
            tracking_retention_secs: DEFAULT_RETENTION.as_secs(),
            transport: TransportConfig::default(),
        }
    }
}

impl RequestorConfig {
    /// Load from `path`, or from the per-user default location when `None`.
    /// A missing file is created with the default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let loaded = match path {
            Some(path) => confy::load_path(path),
            None => confy::load(APP_NAME, None),
        };
        let config: Self = loaded.map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool_size()?;
        if self.transport.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("request_timeout_secs"));
        }
        if self.transport.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("connect_timeout_secs"));
        }
        Ok(())
    }

    pub fn pool_size(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.workers).ok_or(ConfigError::InvalidPoolSize(self.workers))
    }

    pub fn dispatcher_options(&self) -> Result<DispatcherOptions, ConfigError> {
        Ok(DispatcherOptions {
            pool_size: self.pool_size()?,
            after_shutdown: self.after_shutdown,
        })
    }

    pub fn tracking_retention(&self) -> Duration {
        Duration::from_secs(self.tracking_retention_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Load(String),
    InvalidPoolSize(usize),
    InvalidTimeout(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "Failed to load configuration: {}", msg),
            ConfigError::InvalidPoolSize(size) => {
                write!(f, "Invalid worker count {}: at least one worker is required", size)
            }
            ConfigError::InvalidTimeout(field) => write!(f, "Invalid {}: must be greater than zero", field),
        }
    }
}

impl std::error::Error for ConfigError {}
