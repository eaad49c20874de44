//! Daemon configuration.
//!
//! TOML on disk, every field defaulted so a missing or empty file is a
//! valid configuration. Writes go through a temp file in the same
//! directory and an atomic rename, so a crash mid-write never leaves a
//! torn config behind.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Cadence of the accrual tick worker.
    pub tick_interval_ms: u64,
    /// Cadence of the reconciliation auditor; rounded to a whole number of
    /// ticks at startup.
    pub reconcile_interval_ms: u64,
    /// Claimable divergence tolerated before a stream is flagged, in the
    /// token's smallest denomination. TOML has no 128-bit integers, so the
    /// field is u64 and widened at wiring time.
    pub reconcile_tolerance: u64,
    /// How often the listener polls for new blocks.
    pub poll_interval_ms: u64,
    /// Block span fetched per replay batch during startup catch-up.
    pub replay_batch_blocks: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Cap applied to streams whose creation event carries none.
    pub default_max_withdrawals_per_day: u32,
    /// Per-subscriber queue depth in the broadcast hub.
    pub subscriber_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_interval_ms: 5_000,
            reconcile_interval_ms: 600_000,
            reconcile_tolerance: 0,
            poll_interval_ms: 2_000,
            replay_batch_blocks: 5_000,
            backoff_base_ms: 250,
            backoff_max_ms: 30_000,
            default_max_withdrawals_per_day: 3,
            subscriber_queue_capacity: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "moneytap=debug".
    pub filter: String,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
    /// Also append to a daily-rolling file in this directory.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load the file, or write the defaults there when it does not exist.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default config");
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;
        }
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::Config(format!("failed to create temp file: {e}")))?;
        tmp.write_all(raw.as_bytes())
            .map_err(|e| Error::Config(format!("failed to write config: {e}")))?;
        tmp.persist(path)
            .map_err(|e| Error::Config(format!("failed to persist {}: {e}", path.display())))?;
        Ok(())
    }
}
