//! Node configuration
//!
//! Layered: built-in defaults, then an optional file, then `AGORA_`
//! environment variables (`AGORA_SERVER__LISTEN_ADDR`,
//! `AGORA_DISPATCH__MAX_RETRIES`, ...).

use std::collections::BTreeMap;

use agora_common::{AgoraError, Result};
use agora_darwinian::RankingConfig;
use agora_dispatch::{DispatchConfig, PerformanceConfig};
use agora_governor::GovernorConfig;
use serde::{Deserialize, Serialize};

/// Full node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgoraConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub governor: GovernorConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and background loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Period of the assign/sweep/backlog loop
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Ranking cycle period; 0 leaves cycles to the API
    #[serde(default)]
    pub ranking_interval_secs: u64,

    /// Broadcast buffer and replay log size
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
            tick_interval_ms: default_tick_interval(),
            ranking_interval_secs: 0,
            event_capacity: default_event_capacity(),
        }
    }
}

/// Rank-cycle audit sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines file the audit log is appended to
    #[serde(default)]
    pub log_path: Option<String>,

    /// Mirror entries to the tracing output
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            console: true,
        }
    }
}

/// Worker credential check. No tokens accepts every registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Worker id → expected credential
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    agora_common::events::DEFAULT_EVENT_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgoraConfig {
    /// Load defaults, then `path` (if given and present), then the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AgoraConfig::default()).map_err(config_error)?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGORA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AgoraConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dispatch.match_threshold) {
            return Err(AgoraError::Config(format!(
                "dispatch.match_threshold {} outside [0, 1]",
                self.dispatch.match_threshold
            )));
        }
        if self.performance.window_size == 0 {
            return Err(AgoraError::Config("performance.window_size must be at least 1".into()));
        }
        if self.ranking.bottom_band_ceiling >= self.ranking.top_band_floor {
            return Err(AgoraError::Config(format!(
                "ranking bands overlap: bottom ceiling {} >= top floor {}",
                self.ranking.bottom_band_ceiling, self.ranking.top_band_floor
            )));
        }
        if self.server.tick_interval_ms == 0 {
            return Err(AgoraError::Config("server.tick_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> AgoraError {
    AgoraError::Config(e.to_string())
}
