//! Outgoing commands from local inputs and periodic schedules
//!
//! A command goes to the first open endpoint; with no endpoint open it is
//! sent as a UDP datagram to the bridge destination instead.

use super::endpoints::EndpointSet;
use super::stats::Stats;
use crate::protocol::format_command;
use crate::transport::UdpSender;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a command ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRoute {
    /// Written to the named endpoint
    Endpoint(String),
    /// Sent over UDP
    Udp,
}

impl fmt::Display for CommandRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandRoute::Endpoint(name) => write!(f, "endpoint {}", name),
            CommandRoute::Udp => write!(f, "udp"),
        }
    }
}

/// Cloneable sender for commands
#[derive(Clone)]
pub struct CommandSink {
    endpoints: Arc<EndpointSet>,
    fallback: UdpSender,
    stats: Arc<Stats>,
}

impl CommandSink {
    pub fn new(endpoints: Arc<EndpointSet>, fallback: UdpSender, stats: Arc<Stats>) -> Self {
        Self {
            endpoints,
            fallback,
            stats,
        }
    }

    /// Format and send a command
    pub fn send(&self, command: &str) -> io::Result<CommandRoute> {
        self.send_formatted(&format_command(command))
    }

    /// Send an already newline-terminated command
    pub fn send_formatted(&self, payload: &Bytes) -> io::Result<CommandRoute> {
        let route = match self.endpoints.write_first(payload) {
            Some(name) => CommandRoute::Endpoint(name),
            None => {
                if let Err(e) = self.fallback.send(payload) {
                    self.stats.add_send_error();
                    warn!(dest = %self.fallback.destination(), error = %e, "Command send failed");
                    return Err(e);
                }
                CommandRoute::Udp
            }
        };
        self.stats.add_command();
        debug!(
            command = %String::from_utf8_lossy(payload).trim_end(),
            route = %route,
            "Command sent"
        );
        Ok(route)
    }
}
