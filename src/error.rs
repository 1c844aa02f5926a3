//! Centralized error types for the bridge
//!
//! All bridge errors are represented by the `BridgeError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, BridgeError>`.
//!
//! Only setup-time errors are meant to reach `main`. Transient I/O failures
//! inside the running bridge are logged where they happen.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// All bridge errors
#[derive(Debug)]
pub enum BridgeError {
    // === Network ===
    /// Failed to create or bind the UDP socket
    UdpBind { port: u16, source: std::io::Error },
    /// Failed to join the multicast group
    MulticastJoin {
        group: Ipv4Addr,
        source: std::io::Error,
    },
    /// Configured group is not a multicast address
    NotMulticast { group: Ipv4Addr },

    // === Endpoints ===
    /// Failed to open a serial or PTY endpoint
    EndpointOpen {
        name: String,
        source: std::io::Error,
    },

    // === Protocol ===
    /// Handler pattern is not a valid regular expression
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    // === Config ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for our schema
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Mapping file is not valid YAML for our schema
    MappingParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Runtime ===
    /// Tokio runtime or worker thread creation failed
    Runtime { source: std::io::Error },
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UdpBind { source, .. }
            | Self::MulticastJoin { source, .. }
            | Self::EndpointOpen { source, .. }
            | Self::Io { source, .. }
            | Self::Runtime { source } => Some(source),
            Self::InvalidPattern { source, .. } => Some(source),
            Self::ConfigParse { source, .. } => Some(source),
            Self::MappingParse { source, .. } => Some(source),
            Self::NotMulticast { .. } | Self::ConfigValidation { .. } => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UdpBind { port, source } => {
                write!(f, "Cannot bind UDP port {}: {}", port, source)
            }
            Self::MulticastJoin { group, source } => {
                write!(f, "Cannot join multicast group {}: {}", group, source)
            }
            Self::NotMulticast { group } => {
                write!(f, "{} is not an IPv4 multicast address", group)
            }
            Self::EndpointOpen { name, source } => {
                write!(f, "Cannot open endpoint {}: {}", name, source)
            }
            Self::InvalidPattern { pattern, source } => {
                write!(f, "Invalid handler pattern '{}': {}", pattern, source)
            }
            Self::Io { path, source } => write!(f, "IO error: {}: {}", path.display(), source),
            Self::ConfigParse { path, source } => {
                write!(f, "Invalid config {}: {}", path.display(), source)
            }
            Self::MappingParse { path, source } => {
                write!(f, "Invalid mapping {}: {}", path.display(), source)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Runtime { source } => write!(f, "Runtime setup failed: {}", source),
        }
    }
}

/// Alias for Result with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
