//! calsync configuration.
//!
//! Read from `~/.config/calsync/config.toml` (or `--config`), then overridden
//! by `CALSYNC_*` environment variables (`CALSYNC_SYNC__DRY_RUN=true` for
//! nested keys). Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use calsync_core::job::{JobKind, JobSpec};
use calsync_core::remote::provider::RemoteConfig;
use calsync_core::retry::{DEFAULT_MAX_JITTER, RetryPolicy};
use calsync_core::scheduler::SchedulerConfig;
use calsync_core::sync::{SyncOptions, SyncPayload};
use config::{Config, Environment, File};
use serde::Deserialize;

static DEFAULT_STATE_FILE: &str = "~/.local/share/calsync/schedules.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Job store location; `~` is expanded.
    pub state_file: PathBuf,
    pub tick_secs: u64,
    pub max_concurrent_jobs: usize,
    pub save_debounce_ms: u64,
    /// Used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Selects the `calsync-provider-<name>` binary.
    pub provider: String,
    /// Passed verbatim to the provider on every call.
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
    /// Jobs upserted when the daemon starts.
    pub jobs: Vec<JobSeed>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            state_file: default_state_file(),
            tick_secs: 15,
            max_concurrent_jobs: 2,
            save_debounce_ms: 200,
            log_level: "info".into(),
            provider: "google".into(),
            remote: RemoteConfig::default(),
            sync: SyncSettings::default(),
            jobs: Vec::new(),
        }
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("calsync").join("schedules.json"))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub concurrency: usize,
    pub throttle_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub dry_run: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let writes = RetryPolicy::writes();
        SyncSettings {
            concurrency: 1,
            throttle_ms: 1000,
            max_attempts: writes.max_attempts,
            base_delay_ms: writes.base_delay.as_millis() as u64,
            max_delay_ms: writes.max_delay.as_millis() as u64,
            dry_run: false,
        }
    }
}

impl SyncSettings {
    pub fn to_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.concurrency,
            throttle_gap: Duration::from_millis(self.throttle_ms),
            write_retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                max_jitter: DEFAULT_MAX_JITTER,
            },
            read_retry: RetryPolicy::reads(),
            dry_run: self.dry_run,
        }
    }
}

/// A sync job declared in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSeed {
    pub id: String,
    pub source_url: String,
    pub interval_min: Option<u32>,
    pub enabled: Option<bool>,
    pub calendar: Option<String>,
    pub make_public: Option<bool>,
}

impl JobSeed {
    pub fn to_spec(&self) -> JobSpec {
        let mut payload = SyncPayload::new(&self.source_url);
        payload.calendar = self.calendar.clone();
        if let Some(make_public) = self.make_public {
            payload.make_public = make_public;
        }

        let mut spec = JobSpec::new(&self.id, JobKind::IcsSync, payload.to_value());
        spec.interval_min = self.interval_min;
        spec.enabled = self.enabled;
        spec
    }
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("calsync");
        Ok(config_dir.join("config.toml"))
    }

    /// Load the config. An explicit path must exist; the default one may not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found at {}", path.display());
                }
                path.to_path_buf()
            }
            None => Self::config_path()?,
        };

        let config: AppConfig = Config::builder()
            .add_source(File::from(path.clone()).required(false))
            .add_source(
                Environment::with_prefix("CALSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Ok(config)
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_file.to_string_lossy()).into_owned())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.tick_secs.max(1)),
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}
