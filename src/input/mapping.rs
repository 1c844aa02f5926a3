//! Input/output mapping file
//!
//! ```yaml
//! inputs:
//!   - { name: master_arm, gpio: 17, on_press: "MASTER_ARM 1", on_release: "MASTER_ARM 0" }
//! outputs:
//!   - { name: gear_led, gpio: 27, match: "GEAR_DOWN", active_on: true }
//! ```

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Local inputs and indicator outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mapping {
    pub inputs: Vec<InputRule>,
    pub outputs: Vec<OutputRule>,
}

/// Commands sent when an input changes state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRule {
    #[serde(default)]
    pub name: Option<String>,
    pub gpio: u32,
    #[serde(default)]
    pub on_press: Option<String>,
    #[serde(default)]
    pub on_release: Option<String>,
}

/// An indicator driven by received text lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRule {
    #[serde(default)]
    pub name: Option<String>,
    pub gpio: u32,
    /// Substring looked for in each received line
    #[serde(rename = "match")]
    pub pattern: String,
    /// Level driven when the line matches
    #[serde(default = "default_active_on")]
    pub active_on: bool,
}

fn default_active_on() -> bool {
    true
}

impl Mapping {
    /// Load a mapping file; a missing file is an error
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mapping = Self::parse(&content, path)?;
        debug!(
            path = %path.display(),
            inputs = mapping.inputs.len(),
            outputs = mapping.outputs.len(),
            "Loaded mapping"
        );
        Ok(mapping)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        // An empty document is an empty mapping, not an error
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mapping: Self = serde_yaml::from_str(content).map_err(|e| BridgeError::MappingParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        mapping.validate()?;
        Ok(mapping)
    }

    fn validate(&self) -> Result<()> {
        if self.outputs.iter().any(|o| o.pattern.is_empty()) {
            return Err(BridgeError::ConfigValidation {
                field: "outputs.match",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}
