//! Text message parsing and subscription dispatch
//!
//! `MessageParser` turns newline-delimited text into [`Message`] records,
//! remembers the last message seen for each name, and dispatches every
//! message to the handlers whose pattern matches its name.
//!
//! Handlers are isolated from each other: an `Err` or a panic inside one
//! handler is logged and the remaining handlers still run.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{trace, warn};

/// Result returned by message handlers
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Box<dyn FnMut(&Message) -> HandlerResult + Send>;

/// A parsed `NAME:VALUE` record
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Text before the first `:` (the whole line when there is none)
    pub name: String,
    /// Text after the first `:` (empty when there is none)
    pub value: String,
    /// The trimmed source line
    pub raw: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Parse one line; blank lines yield `None`
    pub fn parse_line(line: &str) -> Option<Self> {
        let raw = line.trim();
        if raw.is_empty() {
            return None;
        }
        let (name, value) = raw.split_once(':').unwrap_or((raw, ""));
        Some(Self {
            name: name.to_string(),
            value: value.to_string(),
            raw: raw.to_string(),
            timestamp: Utc::now(),
        })
    }
}

/// Identifies a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Handler {
    id: HandlerId,
    pattern: Regex,
    callback: Callback,
}

/// Parser, last-value cache and handler registry
///
/// Built once at the composition root and shared with whoever feeds it.
///
/// # Example
///
/// ```
/// use dcs_bios_bridge::protocol::MessageParser;
///
/// let mut parser = MessageParser::new();
/// parser
///     .register_handler("VOR|ILS", |msg| {
///         println!("{} = {}", msg.name, msg.value);
///         Ok(())
///     })
///     .unwrap();
/// let messages = parser.parse(b"VOR1_FREQ:110.75\n");
/// assert_eq!(messages[0].value, "110.75");
/// ```
#[derive(Default)]
pub struct MessageParser {
    handlers: Vec<Handler>,
    last: HashMap<String, Message>,
    next_id: u64,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for messages whose name contains a match of the
    /// regex `pattern`
    ///
    /// Handlers run in registration order.
    pub fn register_handler<F>(&mut self, pattern: &str, callback: F) -> Result<HandlerId>
    where
        F: FnMut(&Message) -> HandlerResult + Send + 'static,
    {
        let regex = Regex::new(pattern).map_err(|e| BridgeError::InvalidPattern {
            pattern: pattern.to_string(),
            source: e,
        })?;
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push(Handler {
            id,
            pattern: regex,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unregister_handler(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.id != id);
        self.handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Last message received under `name`
    pub fn last(&self, name: &str) -> Option<&Message> {
        self.last.get(name)
    }

    pub fn last_messages(&self) -> &HashMap<String, Message> {
        &self.last
    }

    /// Parse a chunk of text into messages, updating the cache and
    /// dispatching each message before moving to the next line
    ///
    /// Invalid UTF-8 sequences are dropped. Returns the messages in input
    /// order.
    pub fn parse(&mut self, data: &[u8]) -> Vec<Message> {
        let text: String = data.utf8_chunks().map(|chunk| chunk.valid()).collect();

        let mut messages = Vec::new();
        for line in text.split(['\n', '\r']) {
            let Some(msg) = Message::parse_line(line) else {
                continue;
            };
            self.last.insert(msg.name.clone(), msg.clone());
            self.dispatch(&msg);
            messages.push(msg);
        }
        messages
    }

    fn dispatch(&mut self, msg: &Message) {
        for handler in self.handlers.iter_mut() {
            if !handler.pattern.is_match(&msg.name) {
                continue;
            }
            trace!(pattern = handler.pattern.as_str(), name = %msg.name, "Dispatching message");
            let callback = &mut handler.callback;
            match panic::catch_unwind(AssertUnwindSafe(|| callback(msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    pattern = handler.pattern.as_str(),
                    name = %msg.name,
                    error = %e,
                    "Message handler failed"
                ),
                Err(_) => warn!(
                    pattern = handler.pattern.as_str(),
                    name = %msg.name,
                    "Message handler panicked"
                ),
            }
        }
    }
}
