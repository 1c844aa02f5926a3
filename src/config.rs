//! Configuration management
//!
//! The bridge reads a TOML file (`dcsb-bridge.toml` in the working directory
//! unless `--config` names another one). Every section is optional; missing
//! values fall back to the defaults below. CLI flags are applied on top.
//!
//! ```toml
//! [bridge]
//! group = "239.255.50.10"
//! port = 5010
//! framing = "dcs-bios"
//! peer = "192.168.1.20:7778"
//!
//! [[endpoints]]
//! name = "left-console"
//! path = "/dev/ttyUSB0"
//! baud_rate = 250000
//!
//! [[periodic]]
//! command = "UFC_COMM1 INC"
//! interval_secs = 1.0
//!
//! [inputs]
//! mapping = "mapping.yaml"
//! ```

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT, DEFAULT_READ_TIMEOUT_MS,
};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "dcsb-bridge.toml";

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub endpoints: Vec<EndpointConfig>,
    pub periodic: Vec<PeriodicCommand>,
    pub inputs: InputsConfig,
}

// =============================================================================
// Bridge Configuration
// =============================================================================

/// How UDP datagrams are cut before being written to the endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Marker-delimited DCS-BIOS export frames
    #[default]
    DcsBios,
    /// Forward each datagram unchanged
    Raw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Multicast group to join
    pub group: Ipv4Addr,

    /// UDP port bound on the any-address
    pub port: u16,

    pub framing: Framing,

    /// Also parse endpoint output as `NAME:VALUE` text lines
    pub parse_text: bool,

    /// Accept datagrams only from these senders (empty = accept all)
    pub allow_sources: Vec<IpAddr>,

    /// Unicast destination for endpoint output (absent = back to the group)
    pub peer: Option<SocketAddr>,

    /// Interval between traffic summaries in the log (0 = disabled)
    pub stats_interval_secs: u64,

    /// Drop an unterminated `dcs-bios` frame past this many bytes
    ///
    /// Unset by default: a started frame waits for its next marker however
    /// large it grows.
    pub max_pending_frame: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_MULTICAST_PORT,
            framing: Framing::DcsBios,
            parse_text: false,
            allow_sources: Vec::new(),
            peer: None,
            stats_interval_secs: 0,
            max_pending_frame: None,
        }
    }
}

// =============================================================================
// Endpoint Configuration
// =============================================================================

/// Endpoint transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Serial port (USB CDC, UART)
    #[default]
    Serial,
    /// Pseudo-terminal pair; serial clients open the slave side
    Pty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: EndpointKind,

    /// Serial device path (unused for PTY endpoints)
    pub path: String,

    pub baud_rate: u32,
    pub enabled: bool,
    pub read_timeout_ms: u64,

    /// Reopen the endpoint with backoff after a failure
    pub reconnect: bool,

    /// PTY only: symlink pointing at the slave device
    pub symlink: Option<PathBuf>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: EndpointKind::Serial,
            path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            enabled: true,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            reconnect: true,
            symlink: None,
        }
    }
}

impl EndpointConfig {
    /// Serial endpoint with default settings
    pub fn serial(name: impl Into<String>, path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

// =============================================================================
// Periodic commands and inputs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicCommand {
    pub command: String,
    pub interval_secs: f64,
}

impl PeriodicCommand {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    /// YAML input/output mapping file
    pub mapping: Option<PathBuf>,

    /// Read `press <gpio>` / `release <gpio>` lines from stdin
    pub stdin: bool,
}

// =============================================================================
// Loading
// =============================================================================

/// Load the configuration
///
/// An explicit `path` must exist. Without one, `dcsb-bridge.toml` in the
/// working directory is used when present, defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                debug!("No config file, using defaults");
                return Ok(Config::default());
            }
            default
        }
    };

    let content = fs::read_to_string(&path).map_err(|e| BridgeError::Io {
        path: path.clone(),
        source: e,
    })?;
    let config = parse(&content, &path)?;
    debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Parse and validate config text; `path` is only used in error messages
pub fn parse(content: &str, path: &Path) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(|e| BridgeError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Check values serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !self.bridge.group.is_multicast() {
            return Err(BridgeError::NotMulticast {
                group: self.bridge.group,
            });
        }

        let mut names = HashSet::new();
        for ep in &self.endpoints {
            if ep.name.is_empty() {
                return Err(BridgeError::ConfigValidation {
                    field: "endpoints.name",
                    reason: "endpoint name must not be empty".into(),
                });
            }
            if !names.insert(ep.name.as_str()) {
                return Err(BridgeError::ConfigValidation {
                    field: "endpoints.name",
                    reason: format!("duplicate endpoint '{}'", ep.name),
                });
            }
            if ep.kind == EndpointKind::Serial && ep.path.is_empty() {
                return Err(BridgeError::ConfigValidation {
                    field: "endpoints.path",
                    reason: format!("serial endpoint '{}' has no path", ep.name),
                });
            }
        }

        for p in &self.periodic {
            if !(p.interval_secs.is_finite() && p.interval_secs > 0.0) {
                return Err(BridgeError::ConfigValidation {
                    field: "periodic.interval_secs",
                    reason: format!("'{}' needs a positive interval", p.command),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
