use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::federation::{FanOutConfig, FederationConfig};
use crate::fusion::FusionConfig;
use crate::quant::{QuantOptions, ReductionPolicy};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PlexusConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub quantization: QuantizationConfig,
    pub search: SearchConfig,
    pub fusion: FusionSection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Read-only connections served alongside the single writer.
    pub read_connections: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QuantizationConfig {
    pub reduced_dims: usize,
    pub bits_per_dim: u32,
    pub reduction_policy: ReductionPolicy,
    pub auto_rekey: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Morton radius around the query key.
    pub default_radius: u64,
    pub per_project_limit: usize,
    pub max_concurrent: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FusionSection {
    pub top_k: usize,
    pub dedupe: bool,
    pub max_boost: f64,
    pub half_life_hours: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_plexus_dir()
            .join("federation.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            read_connections: 4,
        }
    }
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            reduced_dims: 8,
            bits_per_dim: 8,
            reduction_policy: ReductionPolicy::First,
            auto_rekey: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_radius: 1 << 40,
            per_project_limit: 50,
            max_concurrent: 4,
            timeout_ms: 2000,
        }
    }
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            top_k: 10,
            dedupe: true,
            max_boost: 1.5,
            half_life_hours: 168,
        }
    }
}

/// Returns `~/.plexus/`, or `./.plexus/` when no home directory is known.
pub fn default_plexus_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".plexus")
}

/// Returns the default config file path: `~/.plexus/config.toml`
pub fn default_config_path() -> PathBuf {
    default_plexus_dir().join("config.toml")
}

impl PlexusConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            PlexusConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (PLEXUS_DB, PLEXUS_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PLEXUS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("PLEXUS_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn quant_options(&self) -> QuantOptions {
        QuantOptions {
            reduced_dims: self.quantization.reduced_dims,
            bits: self.quantization.bits_per_dim,
            policy: self.quantization.reduction_policy,
        }
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            top_k: self.fusion.top_k,
            dedupe: self.fusion.dedupe,
            max_boost: self.fusion.max_boost,
            half_life: chrono::Duration::hours(
                i64::try_from(self.fusion.half_life_hours)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 3_600_000),
            ),
        }
    }

    /// The library-side configuration handed to [`Federation`](crate::federation::Federation).
    pub fn federation_config(&self) -> FederationConfig {
        FederationConfig {
            quant: self.quant_options(),
            auto_rekey: self.quantization.auto_rekey,
            fan_out: FanOutConfig {
                max_concurrent: self.search.max_concurrent,
                timeout: Duration::from_millis(self.search.timeout_ms),
                per_project_limit: self.search.per_project_limit,
                default_radius: u128::from(self.search.default_radius),
            },
            fusion: self.fusion_config(),
            read_connections: self.storage.read_connections,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
