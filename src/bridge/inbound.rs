//! UDP -> endpoints
//!
//! Each accepted datagram is run through the codec and every resulting frame
//! is re-encoded and written to all open endpoints. Datagrams the bridge sent
//! itself are dropped before decoding.
//!
//! Endpoint writes are blocking; [`run`] handles each datagram through
//! `block_in_place` so other tasks move off the worker meanwhile.

use super::blocking_io;
use super::endpoints::EndpointSet;
use super::stats::Stats;
use crate::codec::{Codec, Frame};
use crate::constants::{UDP_BUFFER_SIZE, UDP_POLL_INTERVAL_MS};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

/// Routes inbound datagrams to the endpoint set
pub struct InboundRouter<C: Codec> {
    codec: C,
    endpoints: Arc<EndpointSet>,
    allow_sources: Vec<IpAddr>,
    own_sources: Vec<SocketAddr>,
    stats: Arc<Stats>,
    frames: Vec<Frame>,
    encode_buf: Vec<u8>,
}

impl<C: Codec> InboundRouter<C> {
    pub fn new(
        codec: C,
        endpoints: Arc<EndpointSet>,
        allow_sources: Vec<IpAddr>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            codec,
            endpoints,
            allow_sources,
            own_sources: Vec::new(),
            stats,
            frames: Vec::new(),
            encode_buf: Vec::with_capacity(UDP_BUFFER_SIZE),
        }
    }

    /// Drop datagrams arriving from these addresses (the bridge's own sends)
    pub fn ignoring(mut self, own_sources: Vec<SocketAddr>) -> Self {
        self.own_sources = own_sources;
        self
    }

    /// True if datagrams from `from` are accepted
    pub fn accepts(&self, from: SocketAddr) -> bool {
        if self.own_sources.contains(&from) {
            return false;
        }
        self.allow_sources.is_empty() || self.allow_sources.contains(&from.ip())
    }

    /// Handle one datagram; returns the number of frames forwarded
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) -> usize {
        if !self.accepts(from) {
            self.stats.add_dropped();
            trace!(%from, "Datagram dropped by source filter");
            return 0;
        }
        self.stats.add_datagram();

        let mut frames = std::mem::take(&mut self.frames);
        self.codec.decode(data, |frame| {
            frames.push(frame);
            Ok::<(), Infallible>(())
        });

        let count = frames.len();
        for frame in frames.drain(..) {
            self.encode_buf.clear();
            self.codec.encode(&frame.payload, &mut self.encode_buf);
            self.stats.add_frame();
            let delivered = self.endpoints.broadcast(&self.encode_buf);
            self.stats.add_tx(self.encode_buf.len() * delivered);
        }
        self.frames = frames;
        count
    }
}

/// Receive datagrams until `shutdown` is set
///
/// Receives use a short timeout so the flag is observed promptly.
pub async fn run<C: Codec>(socket: UdpSocket, mut router: InboundRouter<C>, shutdown: Arc<AtomicBool>) {
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    let poll = Duration::from_millis(UDP_POLL_INTERVAL_MS);

    while !shutdown.load(Ordering::Relaxed) {
        match tokio::time::timeout(poll, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                let data = &buf[..len];
                blocking_io(|| router.handle_datagram(data, from));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "UDP receive failed");
                tokio::time::sleep(poll).await;
            }
            Err(_) => {} // Timeout
        }
    }
    debug!("UDP inbound loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::endpoints::ActiveEndpoint;
    use crate::codec::{DcsBiosCodec, RawCodec};
    use parking_lot::Mutex;
    use std::io::{self, Write};

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<EndpointSet>, Sink, Arc<Stats>) {
        let set = Arc::new(EndpointSet::new());
        let sink = Sink::default();
        set.insert(Arc::new(ActiveEndpoint::new("panel", Box::new(sink.clone()))));
        (set, sink, Arc::new(Stats::new()))
    }

    fn from(ip: [u8; 4]) -> SocketAddr {
        SocketAddr::from((ip, 5010))
    }

    #[test]
    fn test_frames_forwarded_with_marker() {
        let (set, sink, stats) = setup();
        let mut router = InboundRouter::new(DcsBiosCodec::new(), set, Vec::new(), stats.clone());

        let n = router.handle_datagram(b"\x55\x55\x55\x55AB\x55\x55\x55\x55CD", from([10, 0, 0, 1]));
        assert_eq!(n, 1);
        assert_eq!(*sink.0.lock(), b"\x55\x55\x55\x55AB");

        // The second frame completes when its successor's marker arrives
        let n = router.handle_datagram(b"\x55\x55\x55\x55", from([10, 0, 0, 1]));
        assert_eq!(n, 1);
        assert_eq!(*sink.0.lock(), b"\x55\x55\x55\x55AB\x55\x55\x55\x55CD");
        assert_eq!(stats.snapshot().frames, 2);
    }

    #[test]
    fn test_raw_mode_forwards_datagrams() {
        let (set, sink, stats) = setup();
        let mut router = InboundRouter::new(RawCodec, set, Vec::new(), stats);
        router.handle_datagram(b"hello", from([10, 0, 0, 1]));
        assert_eq!(*sink.0.lock(), b"hello");
    }

    #[test]
    fn test_allow_list_drops_unlisted_sender() {
        let (set, sink, stats) = setup();
        let allowed: IpAddr = "192.168.1.20".parse().unwrap();
        let mut router = InboundRouter::new(RawCodec, set, vec![allowed], stats.clone());

        assert_eq!(router.handle_datagram(b"nope", from([192, 168, 1, 99])), 0);
        assert!(sink.0.lock().is_empty());
        router.handle_datagram(b"yes", from([192, 168, 1, 20]));
        assert_eq!(*sink.0.lock(), b"yes");

        let snap = stats.snapshot();
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.datagrams, 1);
    }

    #[test]
    fn test_own_datagrams_are_not_forwarded() {
        let (set, sink, stats) = setup();
        let own = from([192, 168, 1, 5]);
        let mut router = InboundRouter::new(DcsBiosCodec::new(), set, Vec::new(), stats.clone())
            .ignoring(vec![own]);

        router.handle_datagram(b"\x55\x55\x55\x55AB", from([10, 0, 0, 1]));
        // Panel output sent to the group must not join the pending frame
        assert_eq!(router.handle_datagram(b"MASTER_ARM 1\n", own), 0);
        router.handle_datagram(b"\x55\x55\x55\x55", from([10, 0, 0, 1]));

        assert_eq!(*sink.0.lock(), b"\x55\x55\x55\x55AB");
        assert_eq!(stats.snapshot().dropped, 1);
    }

    #[test]
    fn test_own_port_on_other_host_is_accepted() {
        let (set, sink, stats) = setup();
        let own = from([192, 168, 1, 5]);
        let mut router = InboundRouter::new(RawCodec, set, Vec::new(), stats).ignoring(vec![own]);
        router.handle_datagram(b"hello", from([192, 168, 1, 6]));
        assert_eq!(*sink.0.lock(), b"hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_forwards_on_multi_thread_runtime() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (set, sink, stats) = setup();
        let router = InboundRouter::new(RawCodec, set, Vec::new(), stats);
        let shutdown = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(socket, router, shutdown.clone()));

        let sim = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sim.send_to(b"PING", addr).await.unwrap();
        for _ in 0..200 {
            if !sink.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*sink.0.lock(), b"PING");

        shutdown.store(true, Ordering::SeqCst);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (set, _sink, stats) = setup();
        let router = InboundRouter::new(RawCodec, set, Vec::new(), stats);
        let shutdown = Arc::new(AtomicBool::new(true));
        tokio::time::timeout(Duration::from_secs(1), run(socket, router, shutdown))
            .await
            .unwrap();
    }
}
