//! Scheduler configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all)
//! yields a working in-memory scheduler.
//!
//! ```toml
//! workers = 8
//! retention_days = 14
//!
//! [store]
//! kind = "sled"
//! path = "/var/lib/herald"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{HeraldError, Result};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker loops pulling from the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long an idle worker waits on the queue before re-checking shutdown.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    #[serde(default = "default_interval_secs")]
    pub recurring_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub automation_interval_secs: u64,
    /// Interval of the SCHEDULED -> PENDING promotion loop.
    #[serde(default = "default_promotion_interval_secs")]
    pub promotion_interval_secs: u64,
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    /// Terminal tasks older than this are removed by the retention sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Capacity of the classified-event channel feeding the rule engine.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_workers() -> usize {
    4
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

fn default_interval_secs() -> u64 {
    60
}

fn default_promotion_interval_secs() -> u64 {
    1
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_secs() -> u64 {
    60
}

fn default_retry_max_delay_secs() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    30
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            recurring_interval_secs: default_interval_secs(),
            automation_interval_secs: default_interval_secs(),
            promotion_interval_secs: default_promotion_interval_secs(),
            default_timeout_seconds: default_timeout_seconds(),
            default_max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            retention_days: default_retention_days(),
            event_buffer: default_event_buffer(),
            store: StoreConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load from `path` when given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HeraldError::validation(format!("failed to read config {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            HeraldError::validation(format!("failed to parse config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HeraldError::validation("workers must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(HeraldError::validation("event_buffer must be at least 1"));
        }
        if self.default_timeout_seconds == 0 {
            return Err(HeraldError::validation(
                "default_timeout_seconds must be at least 1",
            ));
        }
        for (name, secs) in [
            ("dequeue_timeout_ms", self.dequeue_timeout_ms),
            ("recurring_interval_secs", self.recurring_interval_secs),
            ("automation_interval_secs", self.automation_interval_secs),
            ("promotion_interval_secs", self.promotion_interval_secs),
        ] {
            if secs == 0 {
                return Err(HeraldError::validation(format!("{name} must be positive")));
            }
        }
        if self.retry_max_delay_secs < self.retry_base_delay_secs {
            return Err(HeraldError::validation(format!(
                "retry_max_delay_secs ({}) is below retry_base_delay_secs ({})",
                self.retry_max_delay_secs, self.retry_base_delay_secs
            )));
        }
        Ok(())
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn recurring_interval(&self) -> Duration {
        Duration::from_secs(self.recurring_interval_secs)
    }

    pub fn automation_interval(&self) -> Duration {
        Duration::from_secs(self.automation_interval_secs)
    }

    pub fn promotion_interval(&self) -> Duration {
        Duration::from_secs(self.promotion_interval_secs)
    }
}

/// Backing store selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Nothing survives a restart.
    #[default]
    Memory,
    Sled { path: PathBuf },
}
