//! Indicator outputs driven by received text lines
//!
//! For every line and every output rule: a line containing the rule's
//! `match` text drives the output to `active_on`; any other line turns an
//! `active_on` output off and leaves an inverted one alone.

use super::mapping::OutputRule;
use crate::error::Result;
use crate::protocol::{HandlerId, MessageParser};
use std::collections::HashMap;
use tracing::info;

/// Something that can switch an output pin
pub trait OutputDriver: Send {
    fn set(&mut self, gpio: u32, on: bool);
}

/// Driver that only logs state changes
#[derive(Debug, Default)]
pub struct LogOutput {
    states: HashMap<u32, bool>,
}

impl LogOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, gpio: u32) -> Option<bool> {
        self.states.get(&gpio).copied()
    }
}

impl OutputDriver for LogOutput {
    fn set(&mut self, gpio: u32, on: bool) {
        if self.states.insert(gpio, on) != Some(on) {
            info!(gpio, on, "Indicator changed");
        }
    }
}

/// Output rules bound to a driver
pub struct IndicatorSet<D: OutputDriver> {
    rules: Vec<OutputRule>,
    driver: D,
}

impl<D: OutputDriver> IndicatorSet<D> {
    pub fn new(rules: Vec<OutputRule>, driver: D) -> Self {
        Self { rules, driver }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Apply one received line to every rule
    pub fn apply_line(&mut self, text: &str) {
        for rule in &self.rules {
            if text.contains(rule.pattern.as_str()) {
                self.driver.set(rule.gpio, rule.active_on);
            } else if rule.active_on {
                self.driver.set(rule.gpio, false);
            }
        }
    }

    /// Switch every output off
    pub fn all_off(&mut self) {
        for rule in &self.rules {
            self.driver.set(rule.gpio, false);
        }
    }
}

impl<D: OutputDriver + 'static> IndicatorSet<D> {
    /// Feed every parsed line to this set
    ///
    /// The set moves into the parser and is dropped with it.
    pub fn attach(mut self, parser: &mut MessageParser) -> Result<HandlerId> {
        parser.register_handler("", move |msg| {
            self.apply_line(&msg.raw);
            Ok(())
        })
    }
}

impl<D: OutputDriver> Drop for IndicatorSet<D> {
    fn drop(&mut self) {
        self.all_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(u32, bool)>>>);

    impl OutputDriver for Recorder {
        fn set(&mut self, gpio: u32, on: bool) {
            self.0.lock().push((gpio, on));
        }
    }

    fn rule(gpio: u32, pattern: &str, active_on: bool) -> OutputRule {
        OutputRule {
            name: None,
            gpio,
            pattern: pattern.into(),
            active_on,
        }
    }

    #[test]
    fn test_active_on_follows_match() {
        let rec = Recorder::default();
        let mut set = IndicatorSet::new(vec![rule(27, "GEAR_DOWN", true)], rec.clone());

        set.apply_line("GEAR_DOWN:1");
        set.apply_line("ALT:100");
        assert_eq!(*rec.0.lock(), vec![(27, true), (27, false)]);
    }

    #[test]
    fn test_inverted_output_ignores_other_lines() {
        let rec = Recorder::default();
        let mut set = IndicatorSet::new(vec![rule(5, "CANOPY_OPEN", false)], rec.clone());

        set.apply_line("CANOPY_OPEN:1");
        set.apply_line("ALT:100");
        assert_eq!(*rec.0.lock(), vec![(5, false)]);
    }

    #[test]
    fn test_drop_turns_outputs_off() {
        let rec = Recorder::default();
        let set = IndicatorSet::new(vec![rule(1, "A", true), rule(2, "B", false)], rec.clone());
        drop(set);
        assert_eq!(*rec.0.lock(), vec![(1, false), (2, false)]);
    }

    #[test]
    fn test_attach_to_parser() {
        let rec = Recorder::default();
        let mut parser = MessageParser::new();
        IndicatorSet::new(vec![rule(27, "GEAR_DOWN", true)], rec.clone())
            .attach(&mut parser)
            .unwrap();

        parser.parse(b"GEAR_DOWN:1\n");
        assert_eq!(*rec.0.lock(), vec![(27, true)]);
    }

    #[test]
    fn test_log_output_tracks_state() {
        let mut out = LogOutput::new();
        out.set(3, true);
        out.set(3, true);
        assert_eq!(out.state(3), Some(true));
        assert_eq!(out.state(4), None);
    }
}
