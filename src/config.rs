//! Configuration for TowerKV
//!
//! Centralized configuration with sensible defaults. Options are layered in
//! ascending priority: environment variables (`TOWERKV_` prefix), a
//! `key=value` config file, then CLI flags applied by the binary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TowerError};

/// Environment variable prefix for all options
const ENV_PREFIX: &str = "TOWERKV_";

/// Main configuration for a TowerKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server Configuration
    // -------------------------------------------------------------------------
    /// Client listening port
    pub port: u16,

    /// Bind address
    pub host: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Worker thread pool size
    pub thread_pool_size: usize,

    /// Reserved; unused
    pub enable_cluster: bool,

    /// Shared AUTH secret; empty disables authentication
    pub requirepass: String,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Skiplist level cap
    pub max_level: usize,

    /// Snapshot file path
    pub data_file: PathBuf,

    /// Whether the periodic snapshot task runs
    pub enable_persistence: bool,

    /// Seconds between periodic snapshots
    pub persistence_interval: u64,

    // -------------------------------------------------------------------------
    // AOF Configuration
    // -------------------------------------------------------------------------
    /// Whether the append-only command log is enabled
    pub enable_aof: bool,

    /// AOF file path
    pub aof_file: PathBuf,

    /// Fsync policy: always | everysec | no
    pub aof_fsync: String,

    /// Seconds between fsyncs for the everysec policy
    pub aof_fsync_interval: u64,

    // -------------------------------------------------------------------------
    // Log Configuration
    // -------------------------------------------------------------------------
    /// Minimum level: DEBUG | INFO | WARN | ERROR | FATAL
    pub log_level: String,

    /// Log file path
    pub log_file: PathBuf,

    /// Mirror logs to stdout
    pub enable_console: bool,

    // -------------------------------------------------------------------------
    // Replication Configuration
    // -------------------------------------------------------------------------
    /// Control port the primary listens on for followers
    pub replication_port: u16,

    /// Master host; non-empty means this node starts as a follower
    pub master_host: String,

    /// Master replication port (follower side)
    pub master_port: u16,

    /// Heartbeat period in milliseconds
    pub ping_interval_ms: u64,

    /// Connect/sync timeout in milliseconds
    pub sync_timeout_ms: u64,

    /// Bound on the in-memory replication log
    pub max_replication_log: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6379,
            host: "0.0.0.0".to_string(),
            max_connections: 1000,
            thread_pool_size: 4,
            enable_cluster: false,
            requirepass: String::new(),
            max_level: 18,
            data_file: PathBuf::from("store/dumpFile"),
            enable_persistence: true,
            persistence_interval: 60,
            enable_aof: false,
            aof_file: PathBuf::from("store/appendonly.aof"),
            aof_fsync: "everysec".to_string(),
            aof_fsync_interval: 1,
            log_level: "INFO".to_string(),
            log_file: PathBuf::from("logs/towerkv.log"),
            enable_console: true,
            replication_port: 16379,
            master_host: String::new(),
            master_port: 16379,
            ping_interval_ms: 1000,
            sync_timeout_ms: 5000,
            max_replication_log: 10000,
        }
    }
}

impl Config {
    /// Build a config from defaults, environment, and an optional file.
    ///
    /// Ascending priority: defaults < environment < file. CLI flags are
    /// applied on top by the caller.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();
        config.load_from_env();
        if let Some(path) = config_file {
            config.load_from_file(path)?;
        }
        Ok(config)
    }

    /// Apply `TOWERKV_*` environment overrides
    pub fn load_from_env(&mut self) {
        let mut entries = BTreeMap::new();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                entries.insert(stripped.to_ascii_lowercase(), value);
            }
        }
        self.apply_entries(&entries);
    }

    /// Parse a `key=value` file and apply it.
    ///
    /// `[Section]` headers and `#` comments are skipped; keys are flat.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path).map_err(|e| {
            TowerError::Config(format!("failed to open config file {}: {}", path.display(), e))
        })?;

        let mut entries = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
        self.apply_entries(&entries);
        Ok(())
    }

    /// Follower role is implied by a configured master address
    pub fn is_replica(&self) -> bool {
        !self.master_host.is_empty()
    }

    /// `host:port` the client listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Known option keys and their current values, for CONFIG GET
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let mut push = |key: &str, value: String| {
            out.push_str(key);
            out.push(':');
            out.push_str(&value);
            out.push('\n');
        };
        push("port", self.port.to_string());
        push("host", self.host.clone());
        push("max_connections", self.max_connections.to_string());
        push("thread_pool_size", self.thread_pool_size.to_string());
        push("max_level", self.max_level.to_string());
        push("data_file", self.data_file.display().to_string());
        push("enable_persistence", self.enable_persistence.to_string());
        push("persistence_interval", self.persistence_interval.to_string());
        push("enable_aof", self.enable_aof.to_string());
        push("aof_file", self.aof_file.display().to_string());
        push("aof_fsync", self.aof_fsync.clone());
        push("aof_fsync_interval", self.aof_fsync_interval.to_string());
        push("log_level", self.log_level.clone());
        push("replication_port", self.replication_port.to_string());
        push("ping_interval_ms", self.ping_interval_ms.to_string());
        push("sync_timeout_ms", self.sync_timeout_ms.to_string());
        push("max_replication_log", self.max_replication_log.to_string());
        out
    }

    fn apply_entries(&mut self, entries: &BTreeMap<String, String>) {
        for (key, value) in entries {
            match key.as_str() {
                "port" => set_parsed(&mut self.port, value),
                "host" => self.host = value.clone(),
                "max_connections" => set_parsed(&mut self.max_connections, value),
                "thread_pool_size" => set_parsed(&mut self.thread_pool_size, value),
                "enable_cluster" => self.enable_cluster = parse_bool(value),
                "requirepass" => self.requirepass = value.clone(),
                "max_level" => set_parsed(&mut self.max_level, value),
                "data_file" => self.data_file = PathBuf::from(value),
                "enable_persistence" => self.enable_persistence = parse_bool(value),
                "persistence_interval" => set_parsed(&mut self.persistence_interval, value),
                "enable_aof" => self.enable_aof = parse_bool(value),
                "aof_file" => self.aof_file = PathBuf::from(value),
                "aof_fsync" => self.aof_fsync = value.clone(),
                "aof_fsync_interval" => set_parsed(&mut self.aof_fsync_interval, value),
                "log_level" => self.log_level = value.clone(),
                "log_file" => self.log_file = PathBuf::from(value),
                "enable_console" => self.enable_console = parse_bool(value),
                "replication_port" => set_parsed(&mut self.replication_port, value),
                "master_host" => self.master_host = value.clone(),
                "master_port" => set_parsed(&mut self.master_port, value),
                "ping_interval_ms" => set_parsed(&mut self.ping_interval_ms, value),
                "sync_timeout_ms" => set_parsed(&mut self.sync_timeout_ms, value),
                "max_replication_log" => set_parsed(&mut self.max_replication_log, value),
                _ => {}
            }
        }
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.parse::<T>() {
        *slot = parsed;
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Create parent directories for the data, AOF, and log paths
pub fn create_directories(config: &Config) -> Result<()> {
    for path in [&config.data_file, &config.aof_file, &config.log_file] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
