use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Application-level constants
pub const APP_NAME: &str = "Careloom";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Length of the cohort hash key, in bytes.
pub const HASH_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// ~/Careloom/ on all platforms.
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(APP_NAME))
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("careloom.db")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("engine.json")
}

pub fn hash_key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("cohort.key")
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,careloom=debug"
}

// ═══════════════════════════════════════════════════════════
// Engine thresholds
// ═══════════════════════════════════════════════════════════

/// Tunable thresholds and job timings. Every field has a default, so a partial
/// JSON file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Observations required before a baseline is usable.
    pub min_baseline_samples: u32,
    /// How long a computed baseline stays valid.
    pub baseline_validity_days: i64,
    /// Window of history a baseline refresh reads.
    pub baseline_lookback_days: i64,
    /// Day-aligned pairs required to correlate two factors.
    pub min_paired_observations: u32,
    /// `1 - p` a result needs before it may create a pattern.
    pub significance_threshold: f64,
    /// |r| a result needs before it may create a pattern.
    pub min_pattern_strength: f64,
    /// Largest same-sign |Δr| that still merges into an existing pattern.
    pub merge_tolerance: f64,
    /// Smallest opposite-sign |r| that retires an existing pattern.
    pub contradiction_materiality: f64,
    /// Pseudo-count in `confidence = significance * n / (n + k)`.
    pub confidence_shrinkage: f64,
    pub default_lag_hours: i64,
    /// Longest lag a request may ask for.
    pub max_lag_hours: i64,
    pub default_cohort_min_members: u32,

    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: i64,
    pub sweep_interval_secs: u64,
    pub prompt_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_baseline_samples: 7,
            baseline_validity_days: 7,
            baseline_lookback_days: 30,
            min_paired_observations: 5,
            significance_threshold: 0.90,
            min_pattern_strength: 0.3,
            merge_tolerance: 0.3,
            contradiction_materiality: 0.3,
            confidence_shrinkage: 10.0,
            default_lag_hours: 24,
            max_lag_hours: 336,
            default_cohort_min_members: 5,
            worker_count: 2,
            poll_interval_ms: 500,
            job_timeout_secs: 600,
            sweep_interval_secs: 60,
            prompt_interval_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(name: &str, v: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {v}")))
            }
        }

        unit("significance_threshold", self.significance_threshold)?;
        unit("min_pattern_strength", self.min_pattern_strength)?;
        unit("contradiction_materiality", self.contradiction_materiality)?;
        if !(0.0..=2.0).contains(&self.merge_tolerance) {
            return Err(ConfigError::Invalid(format!(
                "merge_tolerance must be within [0, 2], got {}",
                self.merge_tolerance
            )));
        }
        if self.confidence_shrinkage < 0.0 {
            return Err(ConfigError::Invalid("confidence_shrinkage must not be negative".into()));
        }
        // The t test needs at least one degree of freedom.
        if self.min_paired_observations < 3 {
            return Err(ConfigError::Invalid("min_paired_observations must be at least 3".into()));
        }
        if self.min_baseline_samples < 2 {
            return Err(ConfigError::Invalid("min_baseline_samples must be at least 2".into()));
        }
        if self.baseline_validity_days < 1 || self.baseline_lookback_days < 1 {
            return Err(ConfigError::Invalid("baseline windows must be at least one day".into()));
        }
        if self.max_lag_hours < 0 || !(0..=self.max_lag_hours).contains(&self.default_lag_hours) {
            return Err(ConfigError::Invalid(format!(
                "default_lag_hours must be within [0, max_lag_hours = {}], got {}",
                self.max_lag_hours, self.default_lag_hours
            )));
        }
        if self.default_cohort_min_members == 0 {
            return Err(ConfigError::Invalid("default_cohort_min_members must be positive".into()));
        }
        if self.worker_count == 0 || self.job_timeout_secs <= 0 {
            return Err(ConfigError::Invalid("worker_count and job_timeout_secs must be positive".into()));
        }
        for (name, v) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("prompt_interval_secs", self.prompt_interval_secs),
        ] {
            if v == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Self>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }
}

/// Process-wide config, loaded once and swapped whole on explicit reload.
/// Readers keep the `Arc` they took, so a reload never changes a value mid-job.
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<EngineConfig>>,
}

impl ConfigHandle {
    /// Fixed config with no backing file. `reload` keeps it as is.
    pub fn fixed(config: EngineConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = EngineConfig::from_file(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn current(&self) -> Arc<EngineConfig> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the backing file. On error the previous config stays active.
    pub fn reload(&self) -> Result<Arc<EngineConfig>, ConfigError> {
        let Some(path) = &self.path else {
            return Ok(self.current());
        };
        let fresh = Arc::new(EngineConfig::from_file(path)?);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&fresh);
        tracing::info!(path = %path.display(), "Engine config reloaded");
        Ok(fresh)
    }
}

// ═══════════════════════════════════════════════════════════
// Cohort hash key
// ═══════════════════════════════════════════════════════════

/// Load the cohort hash key, creating it on first run.
pub fn load_or_create_hash_key(path: &Path) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    match fs::read(path) {
        Ok(bytes) => {
            let key = Zeroizing::new(bytes);
            if key.len() != HASH_KEY_LEN {
                return Err(ConfigError::Invalid(format!(
                    "hash key must be {HASH_KEY_LEN} bytes, found {}",
                    key.len()
                )));
            }
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            let bytes: [u8; HASH_KEY_LEN] = rand::random();
            let key = Zeroizing::new(bytes.to_vec());
            fs::write(path, key.as_slice()).map_err(io_err)?;
            tracing::info!("Created cohort hash key");
            Ok(key)
        }
        Err(e) => Err(io_err(e)),
    }
}
