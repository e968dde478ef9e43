use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the sampler.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Counter selection and sampling loop configuration.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Window the sampled frames are rendered into.
    #[serde(default)]
    pub window: WindowConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Counter selection and sampling loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Exact display name of the counter to sample. Default: "GRBM_000".
    #[serde(default = "default_target_counter")]
    pub target_counter: String,

    /// Number of monitors in the pool, which is also the number of frames
    /// per harvest batch. Default: 100.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Refuse to start when no counter carries `target_counter`. Default: false.
    #[serde(default)]
    pub require_target: bool,

    /// Follow every sampled frame with an unsampled one. Default: true.
    #[serde(default = "default_true")]
    pub idle_frames: bool,

    /// Stop after this many sampled frames. Default: run until interrupted.
    #[serde(default)]
    pub max_frames: Option<u64>,

    /// How often to log sampling progress. Default: 10s.
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,
}

/// Window configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Inner width in logical pixels. Default: 1000.
    #[serde(default = "default_window_size")]
    pub width: u32,

    /// Inner height in logical pixels. Default: 1000.
    #[serde(default = "default_window_size")]
    pub height: u32,

    /// Window title. Default: "perfmon-sampler".
    #[serde(default = "default_window_title")]
    pub title: String,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_target_counter() -> String {
    "GRBM_000".to_string()
}

fn default_pool_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_window_size() -> u32 {
    1000
}

fn default_window_title() -> String {
    "perfmon-sampler".to_string()
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sampling: SamplingConfig::default(),
            window: WindowConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_counter: default_target_counter(),
            pool_size: default_pool_size(),
            require_target: false,
            idle_frames: true,
            max_frames: None,
            stats_interval: default_stats_interval(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_size(),
            height: default_window_size(),
            title: default_window_title(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::parse(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.sampling.target_counter.is_empty() {
            bail!("sampling.target_counter is required");
        }

        if self.sampling.pool_size == 0 {
            bail!("sampling.pool_size must be positive");
        }

        if self.sampling.max_frames == Some(0) {
            bail!("sampling.max_frames must be positive when set");
        }

        if self.sampling.stats_interval.is_zero() {
            bail!("sampling.stats_interval must be positive");
        }

        if self.window.width == 0 || self.window.height == 0 {
            bail!(
                "window size must be positive, got {}x{}",
                self.window.width,
                self.window.height
            );
        }

        if self.health.enabled && self.health.addr.is_empty() {
            bail!("health.addr is required when health is enabled");
        }

        Ok(())
    }
}
