//! Periodic command transmission
//!
//! Each scheduled command runs in its own tokio task: send, then wait for the
//! interval, until cancelled. Cancellation wakes the task immediately instead
//! of letting it sleep out the interval.

use crate::protocol::format_command;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cancels one scheduled command
///
/// Cloneable; `cancel()` is idempotent and may be called from any thread.
#[derive(Clone)]
pub struct ScheduleHandle {
    cancel_tx: watch::Sender<bool>,
}

impl ScheduleHandle {
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// Schedule `command` to be formatted and passed to `send` every `interval`
///
/// The first send happens immediately. A failing `send` is logged and the
/// next tick still runs. Dropping every clone of the returned handle also
/// stops the task. Must be called within a tokio runtime.
pub fn schedule<F, E>(command: &str, interval: Duration, send: F) -> ScheduleHandle
where
    F: Fn(Bytes) -> Result<(), E> + Send + 'static,
    E: fmt::Display,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let payload = format_command(command);
    let name = command.trim_end().to_string();

    tokio::spawn(async move {
        loop {
            if *cancel_rx.borrow() {
                break;
            }
            if let Err(e) = send(payload.clone()) {
                warn!(command = %name, error = %e, "Periodic send failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel_rx.changed() => {
                    // Sender dropped or cancelled: either way we are done
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(command = %name, "Periodic command stopped");
    });

    ScheduleHandle { cancel_tx }
}

/// Collection of scheduled commands that can be stopped together
#[derive(Default)]
pub struct Scheduler {
    handles: Mutex<Vec<ScheduleHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a command and keep its handle for `stop_all`
    pub fn schedule<F, E>(&self, command: &str, interval: Duration, send: F) -> ScheduleHandle
    where
        F: Fn(Bytes) -> Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        let handle = schedule(command, interval, send);
        self.handles.lock().push(handle.clone());
        handle
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stop_all(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.cancel();
        }
    }
}
