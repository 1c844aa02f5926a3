//! Command-line interface definition using clap
//!
//! Flags override the config file; see [`Cli::apply`].

use crate::config::{Config, EndpointConfig, EndpointKind, Framing};
use crate::constants::DEFAULT_BAUD_RATE;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// DCS-BIOS multicast UDP to serial bridge
#[derive(Parser, Debug, Default)]
#[command(name = "dcsb-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Config file (default: dcsb-bridge.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Multicast group to join
    #[arg(long, value_name = "ADDR")]
    pub group: Option<Ipv4Addr>,

    /// UDP port
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Serial endpoint to add (repeatable)
    #[arg(long = "serial", value_name = "PATH")]
    pub serial: Vec<String>,

    /// Baud rate for --serial endpoints
    #[arg(long, value_name = "BAUD")]
    pub baud: Option<u32>,

    /// Forward datagrams unchanged instead of cutting DCS-BIOS frames
    #[arg(long)]
    pub raw: bool,

    /// Parse endpoint output as NAME:VALUE text lines
    #[arg(long)]
    pub text: bool,

    /// Send endpoint output to this address instead of the group
    #[arg(long, value_name = "HOST:PORT")]
    pub peer: Option<SocketAddr>,

    /// Only accept datagrams from this sender (repeatable)
    #[arg(long = "allow", value_name = "IP")]
    pub allow: Vec<IpAddr>,

    /// Add a PTY endpoint and symlink its slave here
    #[arg(long, value_name = "LINK")]
    pub pty: Option<PathBuf>,

    /// Input/output mapping file (YAML)
    #[arg(long, value_name = "FILE")]
    pub mapping: Option<PathBuf>,

    /// Read `press <gpio>` / `release <gpio>` lines from stdin
    #[arg(long)]
    pub stdin_inputs: bool,

    /// Log text messages whose name matches this regex (repeatable)
    #[arg(long = "watch", value_name = "REGEX")]
    pub watch: Vec<String>,

    /// Log a traffic summary every SECS seconds
    #[arg(long, value_name = "SECS")]
    pub stats_interval: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List serial ports
    List,

    /// Print the effective configuration as TOML and exit
    ShowConfig,
}

impl Cli {
    /// Apply flags on top of a loaded config
    pub fn apply(&self, config: &mut Config) {
        let bridge = &mut config.bridge;
        if let Some(group) = self.group {
            bridge.group = group;
        }
        if let Some(port) = self.port {
            bridge.port = port;
        }
        if self.raw {
            bridge.framing = Framing::Raw;
        }
        if self.text {
            bridge.parse_text = true;
        }
        if let Some(peer) = self.peer {
            bridge.peer = Some(peer);
        }
        bridge.allow_sources.extend(self.allow.iter().copied());
        if let Some(secs) = self.stats_interval {
            bridge.stats_interval_secs = secs;
        }

        let baud = self.baud.unwrap_or(DEFAULT_BAUD_RATE);
        for path in &self.serial {
            config
                .endpoints
                .push(EndpointConfig::serial(path.clone(), path.clone(), baud));
        }
        if let Some(link) = &self.pty {
            config.endpoints.push(EndpointConfig {
                name: "pty".into(),
                kind: EndpointKind::Pty,
                symlink: Some(link.clone()),
                ..EndpointConfig::default()
            });
        }

        if let Some(mapping) = &self.mapping {
            config.inputs.mapping = Some(mapping.clone());
        }
        if self.stdin_inputs {
            config.inputs.stdin = true;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["dcsb-bridge"]);
        assert!(!cli.verbose);
        assert!(!cli.raw);
        assert!(cli.serial.is_empty());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["dcsb-bridge", "-v"]);
        assert!(cli.verbose);

        let cli = Cli::parse_from(["dcsb-bridge", "--verbose"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_parse_repeated_serial() {
        let cli = Cli::parse_from([
            "dcsb-bridge",
            "--serial",
            "/dev/ttyUSB0",
            "--serial",
            "/dev/ttyACM0",
            "--baud",
            "115200",
        ]);
        assert_eq!(cli.serial, vec!["/dev/ttyUSB0", "/dev/ttyACM0"]);
        assert_eq!(cli.baud, Some(115_200));
    }

    #[test]
    fn test_cli_parse_list() {
        let cli = Cli::parse_from(["dcsb-bridge", "list"]);
        assert_eq!(cli.command, Some(Command::List));
    }

    #[test]
    fn test_cli_rejects_bad_group() {
        assert!(Cli::try_parse_from(["dcsb-bridge", "--group", "not-an-ip"]).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let cli = Cli::parse_from([
            "dcsb-bridge",
            "--group",
            "239.255.50.11",
            "--port",
            "6000",
            "--raw",
            "--peer",
            "192.168.1.20:7778",
            "--allow",
            "192.168.1.20",
            "--serial",
            "/dev/ttyUSB0",
            "--pty",
            "/tmp/dcsbios",
            "--mapping",
            "mapping.yaml",
            "--stdin-inputs",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.bridge.group, Ipv4Addr::new(239, 255, 50, 11));
        assert_eq!(config.bridge.port, 6000);
        assert_eq!(config.bridge.framing, Framing::Raw);
        assert_eq!(config.bridge.peer, Some("192.168.1.20:7778".parse().unwrap()));
        assert_eq!(config.bridge.allow_sources.len(), 1);

        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].path, "/dev/ttyUSB0");
        assert_eq!(config.endpoints[0].baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.endpoints[1].kind, EndpointKind::Pty);

        assert_eq!(config.inputs.mapping, Some(PathBuf::from("mapping.yaml")));
        assert!(config.inputs.stdin);
    }

    #[test]
    fn test_apply_without_flags_keeps_config() {
        let mut config = Config::default();
        config.bridge.port = 7000;
        Cli::parse_from(["dcsb-bridge"]).apply(&mut config);
        assert_eq!(config.bridge.port, 7000);
        assert!(config.endpoints.is_empty());
    }
}
