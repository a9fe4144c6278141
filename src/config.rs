//! Server configuration.
//!
//! Loaded from a JSON file where every field is optional, then patched from
//! the environment:
//!
//! - `SSTPD_LISTEN`: listen address
//! - `SSTPD_LOG_LEVEL`: log level
//!
//! ```json
//! {
//!   "listen": "0.0.0.0:443",
//!   "link": { "program": "pppd", "hdlc_flags": true },
//!   "session": { "read_timeout_secs": 60 }
//! }
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ppp::Accm;
use crate::types::{Result, SstpError};

/// Resource path every SSTP client requests
pub const DEFAULT_HTTP_PATH: &str = "/sra_{BA195980-CD49-458b-9E23-C84EE0ADCD75}/";

pub const ENV_LISTEN: &str = "SSTPD_LISTEN";
pub const ENV_LOG_LEVEL: &str = "SSTPD_LOG_LEVEL";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the SSTP listener binds to
    pub listen: SocketAddr,
    /// Resource path accepted by the HTTP handshake
    pub http_path: String,
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub log_level: String,
    /// Loopback address for the diagnostics endpoint, disabled when absent
    pub diagnostics: Option<SocketAddr>,
    pub link: LinkConfig,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 443)),
            http_path: DEFAULT_HTTP_PATH.to_string(),
            log_level: "info".to_string(),
            diagnostics: None,
            link: LinkConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// How the link-layer process is launched and fed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Async-control-character map applied when escaping towards the link
    pub accm: u32,
    /// Wrap each escaped block in 0x7E flag bytes
    pub hdlc_flags: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            program: "pppd".to_string(),
            args: ["notty", "file", "/etc/ppp/options.sstpd", "115200"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accm: Accm::ALL.bits(),
            hdlc_flags: false,
        }
    }
}

impl LinkConfig {
    pub fn accm(&self) -> Accm {
        Accm::new(self.accm)
    }
}

/// Per-session tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Size of each read from the link process stdout
    pub read_buffer_size: usize,
    /// Capacity of the channels between session tasks
    pub channel_capacity: usize,
    /// Idle limit on client reads; none means wait forever
    pub read_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 512,
            channel_capacity: 64,
            read_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

impl ServerConfig {
    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.http_path.starts_with('/') {
            return Err(SstpError::Config(format!(
                "http_path must start with '/': {}",
                self.http_path
            )));
        }
        if self.link.program.trim().is_empty() {
            return Err(SstpError::Config("link.program is empty".into()));
        }
        if self.session.read_buffer_size == 0 {
            return Err(SstpError::Config(
                "session.read_buffer_size must be positive".into(),
            ));
        }
        if self.session.channel_capacity == 0 {
            return Err(SstpError::Config(
                "session.channel_capacity must be positive".into(),
            ));
        }
        if let Some(addr) = self.diagnostics {
            if !addr.ip().is_loopback() {
                return Err(SstpError::Config(format!(
                    "diagnostics must bind a loopback address, got {}",
                    addr
                )));
            }
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(SstpError::Config(format!(
                "unknown log level: {}",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Apply `SSTPD_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_LISTEN) {
            self.listen = addr.parse().map_err(|_| {
                SstpError::Config(format!("{}: invalid socket address {}", ENV_LISTEN, addr))
            })?;
            debug!("Listen address overridden to {}", self.listen);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
            debug!("Log level overridden to {}", self.log_level);
        }
        Ok(())
    }
}

/// Load configuration from a JSON file, apply env overrides and validate.
pub fn load_config(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let path = path.as_ref();
    debug!("Loading configuration from {:?}", path);

    let contents = std::fs::read_to_string(path).map_err(|e| {
        SstpError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let mut config: ServerConfig = serde_json::from_str(&contents)
        .map_err(|e| SstpError::Config(format!("{} at {}", e, path.display())))?;

    config.apply_env_overrides()?;
    config.validate()?;

    info!(
        "Configuration loaded: listen={}, link={}",
        config.listen, config.link.program
    );
    Ok(config)
}
