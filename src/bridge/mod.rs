//! Bridge orchestration
//!
//! Wires the multicast socket to the endpoints:
//! - one tokio task receives datagrams and writes frames to every open endpoint
//! - one thread per endpoint opens it, reads it and forwards to UDP
//! - periodic commands and local inputs go through the [`CommandSink`]
//!
//! Everything stops through a single shared flag, see [`BridgeHandle::stop`].

pub mod commands;
pub mod endpoints;
pub mod inbound;
pub mod outbound;
pub mod stats;

pub use commands::{CommandRoute, CommandSink};
pub use endpoints::{EndpointSet, EndpointState};
pub use outbound::ReconnectPolicy;
pub use stats::{Stats, StatsSnapshot};

use self::inbound::InboundRouter;
use self::outbound::{EndpointContext, EndpointSupervisor};
use crate::codec::{DcsBiosCodec, RawCodec};
use crate::config::{Config, Framing};
use crate::error::{BridgeError, Result};
use crate::protocol::MessageParser;
use crate::scheduler::{ScheduleHandle, Scheduler};
use crate::transport::{EndpointOpener, MulticastSocket, SystemOpener, UdpSender};
use parking_lot::{Mutex, RwLock};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bridge state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Bridge builder
pub struct Bridge {
    config: Config,
    opener: Arc<dyn EndpointOpener>,
    parser: Arc<Mutex<MessageParser>>,
    policy: ReconnectPolicy,
}

impl Bridge {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            opener: Arc::new(SystemOpener),
            parser: Arc::new(Mutex::new(MessageParser::new())),
            policy: ReconnectPolicy::default(),
        }
    }

    /// Open endpoints with `opener` instead of real devices
    pub fn with_opener(mut self, opener: impl EndpointOpener) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    /// Feed endpoint text to this parser (text mode only)
    pub fn with_parser(mut self, parser: Arc<Mutex<MessageParser>>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bind the multicast socket and start the bridge
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Socket setup failures (`UdpBind`, `MulticastJoin`, `NotMulticast`).
    /// Endpoint open failures are not errors: those endpoints are retried in
    /// the background.
    pub fn start(self) -> Result<BridgeHandle> {
        let socket = MulticastSocket::bind(self.config.bridge.group, self.config.bridge.port)?;
        self.start_on(socket)
    }

    /// Start the bridge on an already bound socket
    pub fn start_on(self, socket: MulticastSocket) -> Result<BridgeHandle> {
        let Bridge {
            config,
            opener,
            parser,
            policy,
        } = self;
        let bridge_cfg = &config.bridge;

        let dest = bridge_cfg.peer.unwrap_or_else(|| {
            SocketAddr::V4(SocketAddrV4::new(bridge_cfg.group, bridge_cfg.port))
        });
        let sender = UdpSender::new(socket.send.clone(), dest);
        let own_sources = sender.source_addrs();
        debug!(?own_sources, "Ignoring datagrams from own addresses");
        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(RwLock::new(State::Starting));
        let stats = Arc::new(Stats::new());
        let endpoints = Arc::new(EndpointSet::new());

        info!(
            group = %bridge_cfg.group,
            port = bridge_cfg.port,
            framing = ?bridge_cfg.framing,
            dest = %dest,
            endpoints = config.endpoints.len(),
            "Starting bridge"
        );

        let inbound = match bridge_cfg.framing {
            Framing::DcsBios => {
                let codec = match bridge_cfg.max_pending_frame {
                    Some(max) => DcsBiosCodec::with_max_pending(max),
                    None => DcsBiosCodec::new(),
                };
                let router = InboundRouter::new(
                    codec,
                    endpoints.clone(),
                    bridge_cfg.allow_sources.clone(),
                    stats.clone(),
                )
                .ignoring(own_sources);
                tokio::spawn(inbound::run(socket.recv, router, shutdown.clone()))
            }
            Framing::Raw => {
                let router = InboundRouter::new(
                    RawCodec,
                    endpoints.clone(),
                    bridge_cfg.allow_sources.clone(),
                    stats.clone(),
                )
                .ignoring(own_sources);
                tokio::spawn(inbound::run(socket.recv, router, shutdown.clone()))
            }
        };

        let ctx = EndpointContext {
            opener,
            endpoints: endpoints.clone(),
            sender: sender.clone(),
            parser: bridge_cfg.parse_text.then(|| parser.clone()),
            stats: stats.clone(),
            shutdown: shutdown.clone(),
            policy,
        };
        let mut threads = Vec::new();
        for endpoint in &config.endpoints {
            if !endpoint.enabled {
                debug!(endpoint = %endpoint.name, "Endpoint disabled");
                endpoints.set_state(&endpoint.name, EndpointState::Closed);
                continue;
            }
            let supervisor = EndpointSupervisor::new(endpoint.clone(), ctx.clone());
            match supervisor.spawn() {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    // Undo what is already running before reporting
                    shutdown.store(true, Ordering::SeqCst);
                    inbound.abort();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(BridgeError::Runtime { source: e });
                }
            }
        }

        let handle = BridgeHandle {
            shutdown,
            state,
            stats,
            endpoints,
            commands: CommandSink::new(ctx.endpoints.clone(), sender, ctx.stats.clone()),
            scheduler: Scheduler::new(),
            parser,
            threads: Mutex::new(threads),
            tasks: Mutex::new(vec![inbound]),
        };

        for periodic in &config.periodic {
            handle.schedule(&periodic.command, periodic.interval());
        }
        if bridge_cfg.stats_interval_secs > 0 {
            let task = spawn_stats_logger(
                handle.stats.clone(),
                handle.shutdown.clone(),
                Duration::from_secs(bridge_cfg.stats_interval_secs),
            );
            handle.tasks.lock().push(task);
        }

        *handle.state.write() = State::Running;
        info!("Bridge started");
        Ok(handle)
    }
}

fn spawn_stats_logger(
    stats: Arc<Stats>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            let snap = stats.snapshot();
            let (tx_kb_s, rx_kb_s) = stats.update_rates();
            info!(
                datagrams = snap.datagrams,
                dropped = snap.dropped,
                frames = snap.frames,
                tx_bytes = snap.tx_bytes,
                rx_bytes = snap.rx_bytes,
                commands = snap.commands,
                tx_kb_s,
                rx_kb_s,
                "Traffic"
            );
        }
    })
}

/// Handle to control a running bridge
pub struct BridgeHandle {
    shutdown: Arc<AtomicBool>,
    state: Arc<RwLock<State>>,
    stats: Arc<Stats>,
    endpoints: Arc<EndpointSet>,
    commands: CommandSink,
    scheduler: Scheduler,
    parser: Arc<Mutex<MessageParser>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl BridgeHandle {
    /// Stop the bridge
    ///
    /// Idempotent. Cancels periodic commands, stops the UDP task, closes
    /// every endpoint and waits for the endpoint threads, which takes up to
    /// one read timeout.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            match *state {
                State::Starting | State::Running => *state = State::Stopping,
                State::Stopping | State::Stopped => return,
            }
        }
        info!("Stopping bridge");
        self.shutdown.store(true, Ordering::SeqCst);
        self.scheduler.stop_all();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.endpoints.close_all();

        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for thread in threads {
            if thread.join().is_err() {
                warn!("Endpoint thread panicked");
            }
        }
        *self.state.write() = State::Stopped;
        info!("Bridge stopped");
    }

    pub fn state(&self) -> State {
        *self.state.read()
    }

    /// Get traffic statistics
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// State of every configured endpoint
    pub fn endpoint_states(&self) -> Vec<(String, EndpointState)> {
        self.endpoints.states()
    }

    /// Sender for commands (first open endpoint, else UDP)
    pub fn command_sink(&self) -> CommandSink {
        self.commands.clone()
    }

    /// Parser fed with endpoint text in text mode
    pub fn parser(&self) -> &Arc<Mutex<MessageParser>> {
        &self.parser
    }

    /// Send `command` every `interval` until cancelled or the bridge stops
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule(&self, command: &str, interval: Duration) -> ScheduleHandle {
        let sink = self.commands.clone();
        self.scheduler
            .schedule(command, interval, move |payload| {
                blocking_io(|| sink.send_formatted(&payload)).map(|_| ())
            })
    }
}

/// Run blocking endpoint I/O from async code
///
/// On a multi-thread runtime the worker's other tasks are moved off first.
/// `block_in_place` panics on a current-thread runtime, so there the closure
/// just runs inline.
pub(crate) fn blocking_io<R>(f: impl FnOnce() -> R) -> R {
    let flavor = tokio::runtime::Handle::try_current().map(|h| h.runtime_flavor());
    match flavor {
        Ok(tokio::runtime::RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
