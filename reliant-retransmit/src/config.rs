//! Retransmission configuration, read from a RON file.
//!
//! ```ron
//! (
//!     default_policy: (base_interval_ms: 3000, backoff: 2.0, max_retries: Limited(8)),
//!     scheduler: Timer,
//!     executors: {
//!         "orders": (max_concurrent: 4),
//!     },
//! )
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ahash::AHashMap;
use reliant_common::{MessageNumber, SequenceKey, internal};
use reliant_store::MessageStore;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    executor::ExecutionPolicy,
    message::{Destination, OutboundMessage},
    policy::RetryPolicy,
    registry::RetransmissionRegistry,
    scheduler::TokioScheduler,
    strategy::ResendStrategy,
};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "RELIANT_CONFIG";

/// How candidates are fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SchedulerMode {
    /// Tokio timers fire each retry.
    #[default]
    Timer,
    /// Nothing fires on its own; the caller drives retries.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Resends of this owner allowed to run at once.
    ///
    /// Default: 16
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetransmissionConfig {
    /// Policy for messages created through [`RetransmissionConfig::message`].
    #[serde(default)]
    pub default_policy: RetryPolicy,

    #[serde(default)]
    pub scheduler: SchedulerMode,

    /// Dedicated executors keyed by message owner. Owners not listed here
    /// resend inline.
    #[serde(default)]
    pub executors: AHashMap<String, ExecutorConfig>,
}

impl RetransmissionConfig {
    /// Locate the configuration file: `$RELIANT_CONFIG`, then
    /// `./reliant.config.ron`, then `/etc/reliant/reliant.config.ron`.
    ///
    /// # Errors
    ///
    /// If `RELIANT_CONFIG` names a missing file, or no default file exists.
    pub fn find_config_file() -> Result<PathBuf, ConfigError> {
        resolve_config_path(
            std::env::var(CONFIG_ENV).ok().as_deref(),
            &[
                PathBuf::from("./reliant.config.ron"),
                PathBuf::from("/etc/reliant/reliant.config.ron"),
            ],
        )
    }

    /// Find and parse the configuration file.
    ///
    /// # Errors
    ///
    /// If no file is found or it cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::find_config_file()?)
    }

    /// # Errors
    ///
    /// If the file cannot be read, is not valid RON, or describes an invalid
    /// configuration.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        internal!("Loaded retransmission config from {}", path.display());
        Ok(config)
    }

    /// # Errors
    ///
    /// If the default policy is invalid or an executor allows no concurrency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_policy.validate()?;

        if let Some((owner, _)) = self
            .executors
            .iter()
            .find(|(_, executor)| executor.max_concurrent == 0)
        {
            return Err(ConfigError::Executor(owner.clone()));
        }

        Ok(())
    }

    /// An outbound message using the default policy.
    pub fn message(
        &self,
        sequence: impl Into<SequenceKey>,
        number: MessageNumber,
        payload: impl Into<Arc<[u8]>>,
        destination: Destination,
    ) -> OutboundMessage {
        OutboundMessage::new(sequence, number, payload, destination)
            .with_policy(self.default_policy.clone())
    }

    /// Build a registry from this configuration.
    ///
    /// In [`SchedulerMode::Timer`] this must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid.
    pub fn build(
        &self,
        strategy: Arc<dyn ResendStrategy>,
        store: Option<Arc<dyn MessageStore>>,
    ) -> Result<RetransmissionRegistry, ConfigError> {
        self.validate()?;

        let registry = match self.scheduler {
            SchedulerMode::Timer => {
                RetransmissionRegistry::with_scheduler(strategy, Arc::new(TokioScheduler::new()))
            }
            SchedulerMode::Manual => RetransmissionRegistry::new(strategy),
        }
        .with_executors(ExecutionPolicy::from_config(&self.executors));

        internal!(
            "Retransmission registry built ({:?} scheduler, {} dedicated executors)",
            self.scheduler,
            self.executors.len()
        );

        Ok(match store {
            Some(store) => registry.with_store(store),
            None => registry,
        })
    }
}

fn resolve_config_path(env: Option<&str>, defaults: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::MissingFile(path));
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::NotFound { tried })
}

mod defaults {
    pub const fn max_concurrent() -> usize {
        16
    }
}
