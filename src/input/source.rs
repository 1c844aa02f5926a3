//! Line-oriented input source
//!
//! Reads `press <gpio>` / `release <gpio>` lines, one event per line. Used
//! with stdin to drive the input mapping without GPIO hardware.

use super::router::{Edge, InputEvent, InputRouter};
use crate::bridge::CommandSink;
use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Parse one line into an event; blank lines and `#` comments yield `None`
pub fn parse_event(line: &str) -> Option<std::result::Result<InputEvent, String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split_whitespace();
    let edge = match parts.next().map(str::to_ascii_lowercase).as_deref() {
        Some("press") => Edge::Press,
        Some("release") => Edge::Release,
        _ => return Some(Err(format!("unknown action in {:?}", line))),
    };
    let gpio = match parts.next().map(str::parse::<u32>) {
        Some(Ok(gpio)) => gpio,
        _ => return Some(Err(format!("missing or invalid pin in {:?}", line))),
    };
    if parts.next().is_some() {
        return Some(Err(format!("trailing text in {:?}", line)));
    }
    Some(Ok(InputEvent { gpio, edge }))
}

/// Read events from `reader` until end of input or `shutdown`
///
/// Malformed lines are logged and skipped.
pub fn read_events<R: BufRead>(
    mut reader: R,
    shutdown: &AtomicBool,
    mut on_event: impl FnMut(InputEvent),
) -> io::Result<()> {
    let mut line = String::new();
    while !shutdown.load(Ordering::Relaxed) {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        match parse_event(&line) {
            Some(Ok(event)) => on_event(event),
            Some(Err(reason)) => warn!(%reason, "Ignoring input line"),
            None => {}
        }
    }
    Ok(())
}

/// Route events read from stdin on a background thread
///
/// The thread blocks on stdin; it ends at end of input or on the first
/// line after shutdown.
pub fn spawn_stdin(
    router: InputRouter,
    sink: CommandSink,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name("stdin-inputs".into()).spawn(move || {
        let reader = BufReader::new(io::stdin());
        let result = read_events(reader, &shutdown, |event| router.dispatch(&event, &sink));
        match result {
            Ok(()) => debug!("stdin input source finished"),
            Err(e) => warn!(error = %e, "stdin input source failed"),
        }
    })
}
