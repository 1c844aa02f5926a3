//! Endpoints -> UDP
//!
//! One supervisor thread per enabled endpoint. It opens the device, publishes
//! the write half in the endpoint set, then reads until the endpoint fails or
//! the bridge stops. Bytes read are sent to the UDP destination and, in text
//! mode, fed line by line to the message parser. A failed endpoint is
//! reopened with exponential backoff unless reconnection is disabled.

use super::endpoints::{ActiveEndpoint, EndpointSet, EndpointState};
use super::stats::Stats;
use crate::config::EndpointConfig;
use crate::constants::{
    IDLE_POLL_MS, MAX_TEXT_LINE, READ_ERROR_BACKOFF_MS, READ_ERROR_THRESHOLD,
    RECONNECT_DELAY_SECS, RECONNECT_MAX_DELAY_SECS, SERIAL_BUFFER_SIZE, SHUTDOWN_CHECK_MS,
};
use crate::protocol::MessageParser;
use crate::transport::{is_idle_read, EndpointOpener, EndpointReader, UdpSender};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Delays used when an endpoint fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// First delay before reopening; also the delay after a successful open
    pub initial_delay: Duration,
    /// Cap for the doubling delay
    pub max_delay: Duration,
    /// Pause after each transient read error
    pub read_error_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            max_delay: Duration::from_secs(RECONNECT_MAX_DELAY_SECS),
            read_error_backoff: Duration::from_millis(READ_ERROR_BACKOFF_MS),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

/// Everything an endpoint supervisor shares with the rest of the bridge
#[derive(Clone)]
pub struct EndpointContext {
    pub opener: Arc<dyn EndpointOpener>,
    pub endpoints: Arc<EndpointSet>,
    pub sender: UdpSender,
    /// Set in text mode
    pub parser: Option<Arc<Mutex<MessageParser>>>,
    pub stats: Arc<Stats>,
    pub shutdown: Arc<AtomicBool>,
    pub policy: ReconnectPolicy,
}

pub struct EndpointSupervisor {
    config: EndpointConfig,
    ctx: EndpointContext,
}

impl EndpointSupervisor {
    pub fn new(config: EndpointConfig, ctx: EndpointContext) -> Self {
        Self { config, ctx }
    }

    /// Run the supervisor on its own thread
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("endpoint-{}", self.config.name))
            .spawn(move || self.run())
    }

    fn stopping(&self) -> bool {
        self.ctx.shutdown.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early on shutdown
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let step = Duration::from_millis(SHUTDOWN_CHECK_MS);
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(step.min(deadline - now));
        }
    }

    fn run(self) {
        let name = self.config.name.clone();
        let endpoints = self.ctx.endpoints.clone();
        let mut delay = self.ctx.policy.initial_delay;

        while !self.stopping() {
            endpoints.set_state(&name, EndpointState::Opening);
            match self.ctx.opener.open(&self.config) {
                Ok(io) => {
                    delay = self.ctx.policy.initial_delay;
                    let active = Arc::new(ActiveEndpoint::new(name.clone(), io.writer));
                    endpoints.insert(active.clone());
                    info!(endpoint = %name, "Endpoint open");

                    let reason = self.read_loop(io.reader, &active);
                    endpoints.remove(&active);
                    info!(endpoint = %name, reason, "Endpoint closed");
                }
                Err(e) => {
                    endpoints.set_state(&name, EndpointState::Closed);
                    warn!(endpoint = %name, error = %e, "Cannot open endpoint");
                }
            }

            if self.stopping() {
                break;
            }
            if !self.config.reconnect {
                info!(endpoint = %name, "Reconnect disabled, endpoint stays closed");
                break;
            }
            debug!(endpoint = %name, delay_ms = delay.as_millis() as u64, "Reopening endpoint after delay");
            self.sleep(delay);
            delay = self.ctx.policy.next_delay(delay);
        }

        endpoints.set_state(&name, EndpointState::Closed);
        debug!(endpoint = %name, "Endpoint supervisor stopped");
    }

    /// Read until the endpoint fails; returns why the loop ended
    fn read_loop(&self, mut reader: EndpointReader, active: &ActiveEndpoint) -> &'static str {
        let mut buf = [0u8; SERIAL_BUFFER_SIZE];
        let mut lines = LineBuffer::default();
        let mut errors = 0u32;
        let idle = Duration::from_millis(IDLE_POLL_MS);

        loop {
            if self.stopping() {
                return "shutdown";
            }
            if !active.is_alive() {
                return "write failed";
            }
            match reader.read(&mut buf) {
                Ok(0) => {
                    // A blocking device reporting end of stream is gone
                    errors += 1;
                    if errors >= READ_ERROR_THRESHOLD {
                        return "end of stream";
                    }
                    thread::sleep(idle);
                }
                Ok(n) => {
                    errors = 0;
                    self.forward(&buf[..n], &mut lines);
                }
                Err(e) if is_idle_read(&e) => {
                    errors = 0;
                    if e.kind() == io::ErrorKind::WouldBlock {
                        thread::sleep(idle);
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(endpoint = %active.name(), error = %e, consecutive = errors, "Endpoint read failed");
                    if errors >= READ_ERROR_THRESHOLD {
                        return "too many read errors";
                    }
                    self.sleep(self.ctx.policy.read_error_backoff);
                }
            }
        }
    }

    fn forward(&self, data: &[u8], lines: &mut LineBuffer) {
        self.ctx.stats.add_rx(data.len());
        if let Err(e) = self.ctx.sender.send(data) {
            self.ctx.stats.add_send_error();
            warn!(
                endpoint = %self.config.name,
                dest = %self.ctx.sender.destination(),
                error = %e,
                "UDP send failed"
            );
        }
        if let Some(parser) = &self.ctx.parser {
            if let Some(complete) = lines.push(data) {
                parser.lock().parse(&complete);
            }
        }
    }
}

/// Holds back a trailing partial line until its terminator arrives
#[derive(Default)]
struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    /// Append `data`; returns every complete line buffered so far
    fn push(&mut self, data: &[u8]) -> Option<Bytes> {
        self.buf.extend_from_slice(data);
        match self.buf.iter().rposition(|&b| b == b'\n' || b == b'\r') {
            Some(end) => Some(self.buf.split_to(end + 1).freeze()),
            None if self.buf.len() > MAX_TEXT_LINE => {
                debug!(len = self.buf.len(), "Unterminated text line flushed");
                Some(self.buf.split().freeze())
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, Result};
    use crate::transport::EndpointIo;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    enum Step {
        Data(&'static [u8]),
        Fail,
    }

    struct ScriptReader(VecDeque<Step>);

    impl Read for ScriptReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Step::Data(d)) => {
                    buf[..d.len()].copy_from_slice(d);
                    Ok(d.len())
                }
                Some(Step::Fail) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    /// Fails `failures` times, then hands out readers built by `script`
    struct MockOpener {
        opens: AtomicUsize,
        failures: usize,
        script: fn() -> Vec<Step>,
    }

    impl EndpointOpener for MockOpener {
        fn open(&self, config: &EndpointConfig) -> Result<EndpointIo> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(BridgeError::EndpointOpen {
                    name: config.name.clone(),
                    source: io::ErrorKind::NotFound.into(),
                });
            }
            Ok(EndpointIo {
                reader: Box::new(ScriptReader((self.script)().into())),
                writer: Box::new(io::sink()),
            })
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            read_error_backoff: Duration::from_millis(1),
        }
    }

    fn context(opener: Arc<MockOpener>, peer: &std::net::UdpSocket) -> EndpointContext {
        let local = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        EndpointContext {
            opener,
            endpoints: Arc::new(EndpointSet::new()),
            sender: UdpSender::new(Arc::new(local), peer.local_addr().unwrap()),
            parser: None,
            stats: Arc::new(Stats::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            policy: fast_policy(),
        }
    }

    fn peer() -> std::net::UdpSocket {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        peer
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(Duration::from_secs(2)), Duration::from_secs(4));
        assert_eq!(policy.next_delay(Duration::from_secs(16)), Duration::from_secs(30));
        assert_eq!(policy.next_delay(Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"HDG").is_none());
        assert_eq!(lines.push(b":270\nALT").unwrap(), Bytes::from_static(b"HDG:270\n"));
        assert_eq!(lines.push(b":100\r").unwrap(), Bytes::from_static(b"ALT:100\r"));
    }

    #[test]
    fn test_reads_forwarded_to_udp_and_parser() {
        let opener = Arc::new(MockOpener {
            opens: AtomicUsize::new(0),
            failures: 0,
            script: || vec![Step::Data(b"ALT:100\nHD"), Step::Data(b"G:270\n")],
        });
        let peer = peer();
        let mut ctx = context(opener, &peer);
        let parser = Arc::new(Mutex::new(MessageParser::new()));
        ctx.parser = Some(parser.clone());

        let shutdown = ctx.shutdown.clone();
        let endpoints = ctx.endpoints.clone();
        let handle = EndpointSupervisor::new(EndpointConfig::serial("panel", "mock", 250_000), ctx)
            .spawn()
            .unwrap();

        let mut got = Vec::new();
        let mut buf = [0u8; 64];
        while got.len() < 16 {
            let (n, _) = peer.recv_from(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"ALT:100\nHDG:270\n");

        wait_for(|| parser.lock().last("HDG").is_some());
        assert_eq!(parser.lock().last("ALT").unwrap().value, "100");
        assert_eq!(endpoints.state("panel"), Some(EndpointState::Open));

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(endpoints.state("panel"), Some(EndpointState::Closed));
        assert!(endpoints.is_empty());
    }

    #[test]
    fn test_read_errors_close_endpoint_without_reconnect() {
        let opener = Arc::new(MockOpener {
            opens: AtomicUsize::new(0),
            failures: 0,
            script: || (0..READ_ERROR_THRESHOLD).map(|_| Step::Fail).collect(),
        });
        let peer = peer();
        let ctx = context(opener.clone(), &peer);
        let endpoints = ctx.endpoints.clone();

        let mut config = EndpointConfig::serial("flaky", "mock", 250_000);
        config.reconnect = false;
        EndpointSupervisor::new(config, ctx).spawn().unwrap().join().unwrap();

        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert_eq!(endpoints.state("flaky"), Some(EndpointState::Closed));
        assert!(endpoints.is_empty());
    }

    #[test]
    fn test_reopens_after_open_failures() {
        let opener = Arc::new(MockOpener {
            opens: AtomicUsize::new(0),
            failures: 2,
            script: Vec::new,
        });
        let peer = peer();
        let ctx = context(opener.clone(), &peer);
        let shutdown = ctx.shutdown.clone();
        let endpoints = ctx.endpoints.clone();

        let handle = EndpointSupervisor::new(EndpointConfig::serial("late", "mock", 250_000), ctx)
            .spawn()
            .unwrap();
        wait_for(|| endpoints.state("late") == Some(EndpointState::Open));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 3);

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_write_failure_ends_read_loop_and_reopens() {
        let opener = Arc::new(MockOpener {
            opens: AtomicUsize::new(0),
            failures: 0,
            script: Vec::new,
        });
        let peer = peer();
        let ctx = context(opener.clone(), &peer);
        let shutdown = ctx.shutdown.clone();
        let endpoints = ctx.endpoints.clone();

        let handle = EndpointSupervisor::new(EndpointConfig::serial("panel", "mock", 250_000), ctx)
            .spawn()
            .unwrap();
        wait_for(|| endpoints.len() == 1);

        // What the inbound path does after a failed write
        endpoints.close_all();
        wait_for(|| opener.opens.load(Ordering::SeqCst) >= 2);

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
