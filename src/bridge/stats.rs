//! Traffic statistics for the bridge
//!
//! Lock-free counters shared by the inbound task and the endpoint threads.
//! Rates are computed on demand from snapshots of the byte totals.

use crate::constants::RATE_UPDATE_MIN_INTERVAL_SECS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams: u64,
    pub dropped: u64,
    pub frames: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub commands: u64,
    pub send_errors: u64,
}

/// Byte rate for one direction, recomputed from the running total
#[derive(Default)]
struct RateMeter {
    /// Total seen at the previous sample
    last_total: AtomicU64,
    /// KB/s as f64 bits
    kb_per_sec: AtomicU64,
}

impl RateMeter {
    fn sample(&self, total: u64, elapsed_secs: f64) -> f64 {
        let prev = self.last_total.swap(total, Ordering::Relaxed);
        let rate = total.saturating_sub(prev) as f64 / elapsed_secs / 1024.0;
        self.kb_per_sec.store(rate.to_bits(), Ordering::Relaxed);
        rate
    }

    fn cached(&self) -> f64 {
        f64::from_bits(self.kb_per_sec.load(Ordering::Relaxed))
    }
}

/// Bridge traffic counters, lock-free
pub struct Stats {
    /// Datagrams accepted from the multicast socket
    datagrams: AtomicU64,
    /// Datagrams rejected by the sender allow-list
    dropped: AtomicU64,
    /// Frames forwarded to the endpoints
    frames: AtomicU64,
    /// UDP -> endpoint bytes
    to_endpoints: AtomicU64,
    /// Endpoint -> UDP bytes
    from_endpoints: AtomicU64,
    /// Sent by local inputs and periodic schedules
    commands: AtomicU64,
    send_errors: AtomicU64,
    started: Instant,
    /// Nanoseconds after `started` of the last rate sample
    sampled_at: AtomicU64,
    tx_rate: RateMeter,
    rx_rate: RateMeter,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            datagrams: AtomicU64::default(),
            dropped: AtomicU64::default(),
            frames: AtomicU64::default(),
            to_endpoints: AtomicU64::default(),
            from_endpoints: AtomicU64::default(),
            commands: AtomicU64::default(),
            send_errors: AtomicU64::default(),
            started: Instant::now(),
            sampled_at: AtomicU64::default(),
            tx_rate: RateMeter::default(),
            rx_rate: RateMeter::default(),
        }
    }

    #[inline]
    pub fn add_datagram(&self) {
        self.datagrams.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Count bytes written to an endpoint
    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.to_endpoints.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count bytes read from an endpoint
    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.from_endpoints.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            datagrams: load(&self.datagrams),
            dropped: load(&self.dropped),
            frames: load(&self.frames),
            tx_bytes: load(&self.to_endpoints),
            rx_bytes: load(&self.from_endpoints),
            commands: load(&self.commands),
            send_errors: load(&self.send_errors),
        }
    }

    /// Recompute (tx, rx) in KB/s, at most once per rate interval
    ///
    /// Callers racing for the same interval get the cached pair.
    pub fn update_rates(&self) -> (f64, f64) {
        let now = self.started.elapsed().as_nanos() as u64;
        let last = self.sampled_at.load(Ordering::Relaxed);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1e9;

        let due = elapsed_secs >= RATE_UPDATE_MIN_INTERVAL_SECS;
        if !due
            || self
                .sampled_at
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
        {
            return self.cached_rates();
        }

        (
            self.tx_rate
                .sample(self.to_endpoints.load(Ordering::Relaxed), elapsed_secs),
            self.rx_rate
                .sample(self.from_endpoints.load(Ordering::Relaxed), elapsed_secs),
        )
    }

    fn cached_rates(&self) -> (f64, f64) {
        (self.tx_rate.cached(), self.rx_rate.cached())
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
