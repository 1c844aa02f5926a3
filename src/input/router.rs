//! Input edges to commands

use super::mapping::InputRule;
use crate::bridge::CommandSink;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Direction of an input change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Press,
    Release,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Press => write!(f, "press"),
            Edge::Release => write!(f, "release"),
        }
    }
}

/// One input changing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub gpio: u32,
    pub edge: Edge,
}

impl InputEvent {
    pub fn press(gpio: u32) -> Self {
        Self {
            gpio,
            edge: Edge::Press,
        }
    }

    pub fn release(gpio: u32) -> Self {
        Self {
            gpio,
            edge: Edge::Release,
        }
    }
}

/// Lookup table from (pin, edge) to command
#[derive(Debug, Clone, Default)]
pub struct InputRouter {
    commands: HashMap<(u32, Edge), String>,
}

impl InputRouter {
    /// Build from mapping rules; a later rule for the same pin wins
    pub fn new(rules: &[InputRule]) -> Self {
        let mut commands = HashMap::new();
        for rule in rules {
            if let Some(cmd) = &rule.on_press {
                commands.insert((rule.gpio, Edge::Press), cmd.clone());
            }
            if let Some(cmd) = &rule.on_release {
                commands.insert((rule.gpio, Edge::Release), cmd.clone());
            }
        }
        Self { commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn command_for(&self, event: &InputEvent) -> Option<&str> {
        self.commands
            .get(&(event.gpio, event.edge))
            .map(String::as_str)
    }

    /// Send the command mapped to `event`, if any
    pub fn dispatch(&self, event: &InputEvent, sink: &CommandSink) {
        let Some(command) = self.command_for(event) else {
            debug!(gpio = event.gpio, edge = %event.edge, "No command mapped");
            return;
        };
        if let Err(e) = sink.send(command) {
            warn!(gpio = event.gpio, command, error = %e, "Input command not sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<InputRule> {
        vec![
            InputRule {
                name: Some("master_arm".into()),
                gpio: 17,
                on_press: Some("MASTER_ARM 1".into()),
                on_release: Some("MASTER_ARM 0".into()),
            },
            InputRule {
                name: None,
                gpio: 22,
                on_press: Some("UFC_1 1".into()),
                on_release: None,
            },
        ]
    }

    #[test]
    fn test_command_lookup() {
        let router = InputRouter::new(&rules());
        assert_eq!(router.len(), 3);
        assert_eq!(router.command_for(&InputEvent::press(17)), Some("MASTER_ARM 1"));
        assert_eq!(router.command_for(&InputEvent::release(17)), Some("MASTER_ARM 0"));
        assert_eq!(router.command_for(&InputEvent::press(22)), Some("UFC_1 1"));
    }

    #[test]
    fn test_unmapped_edges() {
        let router = InputRouter::new(&rules());
        assert_eq!(router.command_for(&InputEvent::release(22)), None);
        assert_eq!(router.command_for(&InputEvent::press(4)), None);
    }
}
