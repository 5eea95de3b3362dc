//! Server configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`stepguide.toml`)
//! 2. Environment variables (with `STEPGUIDE_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8765
//! media_root = "/var/lib/stepguide/media"
//! min_frame_interval_ms = 200
//! log_level = "stepguide=debug,info"
//! ```

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::frames::DEFAULT_FRAME_CAPACITY;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "stepguide.toml";

/// Runtime configuration for the guidance server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Root of the media directory.
    pub media_root: PathBuf,

    /// Frames live in `<media_root>/<frames_dir_name>`.
    pub frames_dir_name: String,

    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,

    /// Minimum time between the end of one analysis and the next accepted
    /// frame. Zero disables rate limiting.
    pub min_frame_interval_ms: u64,

    /// Pause after persisting a frame so monitors can pick it up.
    pub persist_pause_ms: u64,

    /// Frame buffer capacity.
    pub frame_buffer_capacity: usize,

    /// Number of recent frames handed to the analyzer.
    pub analysis_frame_count: usize,

    /// Monitoring queue capacity.
    pub monitor_capacity: usize,

    /// `tracing` filter directive.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            media_root: PathBuf::from("media"),
            frames_dir_name: "tmp_frames".to_string(),
            max_message_size: 1024 * 1024,
            min_frame_interval_ms: 200,
            persist_pause_ms: 100,
            frame_buffer_capacity: DEFAULT_FRAME_CAPACITY,
            analysis_frame_count: 3,
            monitor_capacity: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `stepguide.toml` in the working directory
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::storage(path, e))?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            server: ServerConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(full.server)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `STEPGUIDE_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("STEPGUIDE_HOST") {
            self.host = host;
        }

        if let Some(v) = lookup("STEPGUIDE_PORT").and_then(|v| v.parse().ok()) {
            self.port = v;
        }

        if let Some(root) = lookup("STEPGUIDE_MEDIA_ROOT") {
            self.media_root = PathBuf::from(root);
        }

        if let Some(v) = lookup("STEPGUIDE_MAX_MESSAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.max_message_size = v;
        }

        if let Some(v) = lookup("STEPGUIDE_MIN_FRAME_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.min_frame_interval_ms = v;
        }

        if let Some(v) = lookup("STEPGUIDE_PERSIST_PAUSE_MS").and_then(|v| v.parse().ok()) {
            self.persist_pause_ms = v;
        }

        if let Some(level) = lookup("STEPGUIDE_LOG") {
            self.log_level = level;
        }
    }

    /// Directory where frames are stored.
    pub fn frames_dir(&self) -> PathBuf {
        self.media_root.join(&self.frames_dir_name)
    }

    /// Socket address to bind. `host` may be an IP literal or a hostname;
    /// hostnames bind to their first resolved address.
    pub async fn bind_addr(&self) -> Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        tokio::net::lookup_host((host, self.port))
            .await
            .map_err(|e| Error::Config(format!("cannot resolve bind host '{host}': {e}")))?
            .next()
            .ok_or_else(|| Error::Config(format!("bind host '{host}' resolved to no addresses")))
    }

    /// Rate-limit interval.
    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_millis(self.min_frame_interval_ms)
    }

    /// Courtesy pause after persisting a frame.
    pub fn persist_pause(&self) -> Duration {
        Duration::from_millis(self.persist_pause_ms)
    }

    /// Configuration for tests: no pauses, no rate limit, frames under `dir`.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            media_root: dir.into(),
            min_frame_interval_ms: 0,
            persist_pause_ms: 0,
            ..Self::default()
        }
    }
}
