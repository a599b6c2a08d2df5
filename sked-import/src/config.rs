//! Bootstrap configuration for sked-import
//!
//! Resolution order for the file: `--config` → `SKED_CONFIG` → platform config
//! directory → built-in defaults. Every section is optional, so an empty file
//! is a valid configuration. A handful of keys can be overridden from the
//! environment after the file is read:
//!
//! | Variable        | Key              |
//! |-----------------|------------------|
//! | `SKED_WORKERS`  | `workers.width`  |
//! | `SKED_DATABASE` | `database.path`  |
//! | `SKED_BIND`     | `server.bind`    |

use crate::models::normalization::NormalizationOptions;
use crate::models::review::ConfidenceThresholds;
use crate::services::job_orchestrator::OrchestratorSettings;
use serde::{Deserialize, Serialize};
use sked_common::config::{env_override, load_toml_config, resolve_config_path, LoggingConfig};
use sked_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SKED_CONFIG";

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "sked-import.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5740".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file backing jobs, review sessions and snapshots
    pub path: PathBuf,
    /// Retry budget for `database is locked`
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = dirs::data_local_dir()
            .map(|dir| dir.join("sked").join("import.db"))
            .unwrap_or_else(|| PathBuf::from("sked-import.db"));
        Self {
            path,
            max_lock_wait_ms: crate::db::sqlite::DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub width: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { width: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per job, the first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StallConfig {
    pub heartbeat_timeout_ms: u64,
    pub check_interval_ms: u64,
    pub max_stalled: u32,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 30_000,
            check_interval_ms: 5_000,
            max_stalled: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub completed: usize,
    pub failed: usize,
    /// TTL for terminal jobs; 0 keeps them until count retention evicts them
    pub job_ttl_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed: 10,
            failed: 50,
            job_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl RetentionConfig {
    pub fn job_ttl(&self) -> Option<Duration> {
        (self.job_ttl_secs > 0).then(|| Duration::from_secs(self.job_ttl_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub session_ttl_secs: u64,
    pub auto_approve: f64,
    pub require_review: f64,
    pub auto_reject: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        let thresholds = ConfidenceThresholds::default();
        Self {
            session_ttl_secs: crate::services::review_engine::DEFAULT_SESSION_TTL.as_secs(),
            auto_approve: thresholds.auto_approve,
            require_review: thresholds.require_review,
            auto_reject: thresholds.auto_reject,
        }
    }
}

impl ReviewConfig {
    pub fn thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            auto_approve: self.auto_approve,
            require_review: self.require_review,
            auto_reject: self.auto_reject,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub snapshot_ttl_secs: u64,
    /// Rows-per-second samples averaged for the ETA
    pub throughput_window: usize,
    /// Rows between progress reports inside a stage
    pub batch_rows: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_secs: 60 * 60,
            throughput_window: crate::services::progress_tracker::DEFAULT_THROUGHPUT_WINDOW,
            batch_rows: 25,
        }
    }
}

impl ProgressConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependenciesConfig {
    /// Upper bound for every blob store, sink and directory call
    pub timeout_ms: u64,
    /// Directory the file-backed blob store reads `<file_id>.json` from
    pub blob_dir: PathBuf,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        let blob_dir = dirs::data_local_dir()
            .map(|dir| dir.join("sked").join("uploads"))
            .unwrap_or_else(|| PathBuf::from("uploads"));
        Self {
            timeout_ms: 10_000,
            blob_dir,
        }
    }
}

impl DependenciesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportServiceConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub workers: WorkersConfig,
    pub retry: RetryConfig,
    pub stall: StallConfig,
    pub retention: RetentionConfig,
    pub review: ReviewConfig,
    pub progress: ProgressConfig,
    pub dependencies: DependenciesConfig,
    pub normalization: NormalizationOptions,
}

impl ImportServiceConfig {
    /// Resolve, read, override from the environment and validate
    ///
    /// # Arguments
    /// * `cli_path` - Value of `--config`, if given
    ///
    /// # Errors
    /// `Config` for unreadable or unparseable files and bad overrides,
    /// `Validation` for out-of-range values
    pub fn load(cli_path: Option<&str>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let mut config: Self = load_toml_config(path.as_deref())?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(width) = env_override::<usize>("SKED_WORKERS")? {
            self.workers.width = width;
        }
        if let Some(path) = env_override::<PathBuf>("SKED_DATABASE")? {
            self.database.path = path;
        }
        if let Some(bind) = env_override::<String>("SKED_BIND")? {
            self.server.bind = bind;
        }
        Ok(())
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers.width == 0 {
            return Err(Error::Validation("workers.width must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Validation("retry.max_attempts must be at least 1".to_string()));
        }
        if self.stall.check_interval_ms == 0 {
            return Err(Error::Validation("stall.check_interval_ms must be positive".to_string()));
        }
        if self.dependencies.timeout_ms == 0 {
            return Err(Error::Validation("dependencies.timeout_ms must be positive".to_string()));
        }
        // Stages heartbeat between collaborator calls
        if self.stall.heartbeat_timeout_ms <= self.dependencies.timeout_ms {
            return Err(Error::Validation(
                "stall.heartbeat_timeout_ms must exceed dependencies.timeout_ms".to_string(),
            ));
        }
        if self.review.session_ttl_secs == 0 {
            return Err(Error::Validation("review.session_ttl_secs must be positive".to_string()));
        }
        self.review.thresholds().validate()
    }

    /// Worker pool settings derived from the file
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            workers: self.workers.width,
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            heartbeat_timeout: Duration::from_millis(self.stall.heartbeat_timeout_ms),
            stall_check_interval: Duration::from_millis(self.stall.check_interval_ms),
            max_stalled: self.stall.max_stalled,
            keep_completed: self.retention.completed,
            keep_failed: self.retention.failed,
            dependency_timeout: self.dependencies.timeout(),
            progress_batch: self.progress.batch_rows,
            normalization: self.normalization.clone(),
        }
    }
}
