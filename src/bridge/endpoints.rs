//! Active endpoint set
//!
//! Shared between the UDP inbound task, the command sink and the endpoint
//! supervisors. The set lock only guards the collection: writes happen on a
//! snapshot, each behind the endpoint's own writer lock, so a slow serial
//! port never blocks the others from being added or removed.

use crate::transport::EndpointWriter;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Closed,
    Opening,
    Open,
}

/// An open endpoint's write half
pub struct ActiveEndpoint {
    name: String,
    writer: Mutex<Option<EndpointWriter>>,
    alive: AtomicBool,
}

impl ActiveEndpoint {
    pub fn new(name: impl Into<String>, writer: EndpointWriter) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(Some(writer)),
            alive: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the endpoint has been closed
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Write all of `data` and flush
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint closed"))?;
        writer.write_all(data)?;
        writer.flush()
    }

    /// Drop the write half; the reader notices through `is_alive`
    pub fn close(&self) {
        self.alive.store(false, Ordering::Relaxed);
        self.writer.lock().take();
    }
}

/// Endpoints currently open, plus the state of every configured one
#[derive(Default)]
pub struct EndpointSet {
    active: Mutex<Vec<Arc<ActiveEndpoint>>>,
    states: Mutex<BTreeMap<String, EndpointState>>,
}

impl EndpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open endpoint and mark it `Open`
    pub fn insert(&self, endpoint: Arc<ActiveEndpoint>) {
        self.set_state(endpoint.name(), EndpointState::Open);
        self.active.lock().push(endpoint);
    }

    /// Remove and close `endpoint`, marking it `Closed`
    ///
    /// Returns false if it was already gone.
    pub fn remove(&self, endpoint: &Arc<ActiveEndpoint>) -> bool {
        let removed = {
            let mut active = self.active.lock();
            let before = active.len();
            active.retain(|e| !Arc::ptr_eq(e, endpoint));
            active.len() != before
        };
        endpoint.close();
        self.set_state(endpoint.name(), EndpointState::Closed);
        removed
    }

    pub fn set_state(&self, name: &str, state: EndpointState) {
        self.states.lock().insert(name.to_string(), state);
    }

    pub fn state(&self, name: &str) -> Option<EndpointState> {
        self.states.lock().get(name).copied()
    }

    /// States of every endpoint seen so far, sorted by name
    pub fn states(&self) -> Vec<(String, EndpointState)> {
        self.states
            .lock()
            .iter()
            .map(|(name, state)| (name.clone(), *state))
            .collect()
    }

    /// Names of the open endpoints in the order they were opened
    pub fn open_names(&self) -> Vec<String> {
        self.active.lock().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<ActiveEndpoint>> {
        self.active.lock().clone()
    }

    /// Write `data` to every open endpoint
    ///
    /// An endpoint whose write fails is removed and closed; the others still
    /// get the data. Returns how many endpoints accepted it.
    pub fn broadcast(&self, data: &[u8]) -> usize {
        let mut delivered = 0;
        for endpoint in self.snapshot() {
            match endpoint.write(data) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(endpoint = %endpoint.name, error = %e, "Endpoint write failed, closing");
                    self.remove(&endpoint);
                }
            }
        }
        delivered
    }

    /// Write `data` to the first open endpoint that accepts it
    ///
    /// Failing endpoints are removed along the way. Returns the name of the
    /// endpoint that took the data, or `None` if none did.
    pub fn write_first(&self, data: &[u8]) -> Option<String> {
        for endpoint in self.snapshot() {
            match endpoint.write(data) {
                Ok(()) => return Some(endpoint.name.clone()),
                Err(e) => {
                    warn!(endpoint = %endpoint.name, error = %e, "Endpoint write failed, closing");
                    self.remove(&endpoint);
                }
            }
        }
        None
    }

    /// Close every open endpoint
    pub fn close_all(&self) {
        let drained: Vec<_> = self.active.lock().drain(..).collect();
        for endpoint in drained {
            debug!(endpoint = %endpoint.name, "Closing endpoint");
            endpoint.close();
            self.set_state(endpoint.name(), EndpointState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        data: Arc<Mutex<Vec<u8>>>,
        writes: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            *self.writes.lock() += 1;
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.data.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn endpoint(name: &str, rec: &Recorder) -> Arc<ActiveEndpoint> {
        Arc::new(ActiveEndpoint::new(name, Box::new(rec.clone())))
    }

    #[test]
    fn test_broadcast_reaches_every_endpoint() {
        let set = EndpointSet::new();
        let a = Recorder::default();
        let b = Recorder::default();
        set.insert(endpoint("a", &a));
        set.insert(endpoint("b", &b));

        assert_eq!(set.broadcast(b"XY"), 2);
        assert_eq!(*a.data.lock(), b"XY");
        assert_eq!(*b.data.lock(), b"XY");
    }

    #[test]
    fn test_failing_endpoint_is_removed_once() {
        let set = EndpointSet::new();
        let good = Recorder::default();
        let bad = Recorder {
            fail: true,
            ..Recorder::default()
        };
        set.insert(endpoint("good", &good));
        set.insert(endpoint("bad", &bad));

        assert_eq!(set.broadcast(b"1"), 1);
        assert_eq!(set.open_names(), vec!["good"]);
        assert_eq!(set.state("bad"), Some(EndpointState::Closed));

        set.broadcast(b"2");
        assert_eq!(*bad.writes.lock(), 1);
        assert_eq!(*good.data.lock(), b"12");
    }

    #[test]
    fn test_write_first_skips_broken_endpoint() {
        let set = EndpointSet::new();
        let bad = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let good = Recorder::default();
        set.insert(endpoint("bad", &bad));
        set.insert(endpoint("good", &good));

        assert_eq!(set.write_first(b"CMD\n").as_deref(), Some("good"));
        assert_eq!(set.len(), 1);
        assert_eq!(*good.data.lock(), b"CMD\n");
    }

    #[test]
    fn test_write_first_with_no_endpoints() {
        assert_eq!(EndpointSet::new().write_first(b"CMD\n"), None);
    }

    #[test]
    fn test_closed_endpoint_rejects_writes() {
        let rec = Recorder::default();
        let ep = endpoint("a", &rec);
        ep.close();
        assert!(!ep.is_alive());
        let err = ep.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_close_all() {
        let set = EndpointSet::new();
        let rec = Recorder::default();
        let ep = endpoint("a", &rec);
        set.insert(ep.clone());
        set.close_all();
        assert!(set.is_empty());
        assert!(!ep.is_alive());
        assert_eq!(set.states(), vec![("a".to_string(), EndpointState::Closed)]);
    }
}
