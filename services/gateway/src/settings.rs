//! Gateway settings
//!
//! Layered with the `config` crate: built-in defaults, then
//! `config/default.toml`, then `config/{ROUTER_ENV}.toml`, then environment
//! variables such as `ROUTER_SERVER__PORT=9000`.

use config::{Config, ConfigError, Environment, File};
use order_engine::{EngineConfig, RunnerConfig, VenuesConfig};
use persistence::{FlushPolicy, FsyncPolicy, JournalConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub simulation: SimulationSettings,
    pub engine: EngineConfig,
    pub runner: RunnerConfig,
    pub venues: VenuesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Base of the `websocketUrl` handed to clients
    pub public_ws_url: Option<String>,
    /// Messages buffered per stream before the subscriber is dropped
    pub ws_buffer: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            public_ws_url: None,
            ws_buffer: 64,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn ws_base(&self) -> String {
        self.public_ws_url
            .clone()
            .unwrap_or_else(|| format!("ws://localhost:{}", self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info,order_engine=debug,tower_http=info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Journal directory; in-memory storage when unset
    pub journal_dir: Option<PathBuf>,
    /// `every_write` or `{ every_n = N }`
    pub flush_policy: FlushPolicy,
    /// `every_write`, `{ every_n = N }` or `on_rotation`
    pub fsync_policy: FsyncPolicy,
    pub max_file_size_mb: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            journal_dir: None,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
            max_file_size_mb: 64,
        }
    }
}

impl StorageSettings {
    /// Journal configuration, or `None` for in-memory storage.
    pub fn journal_config(&self) -> Option<JournalConfig> {
        let dir = self.journal_dir.as_ref()?;
        Some(JournalConfig {
            flush_policy: self.flush_policy,
            fsync_policy: self.fsync_policy,
            max_file_size: self.max_file_size_mb.max(1) * 1024 * 1024,
            ..JournalConfig::new(dir)
        })
    }
}

/// Per-user submission token bucket.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub refill_per_sec: f64,
    /// Buckets untouched this long are forgotten
    pub idle_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_sec: 5.0,
            idle_secs: 600,
        }
    }
}

/// Housekeeping of in-memory state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Finished orders leave the status cache after this long
    pub terminal_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            terminal_ttl_secs: 3_600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Seed for reproducible quotes and fills; random when unset
    pub seed: Option<u64>,
    /// Skip simulated network and settlement latency
    pub instant: bool,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env = std::env::var("ROUTER_ENV").unwrap_or_else(|_| "development".to_string());

        Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                Environment::with_prefix("ROUTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
