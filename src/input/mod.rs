//! Local inputs and indicator outputs
//!
//! - **mapping**: YAML table of inputs (pin -> commands) and outputs
//!   (pin <- matched text)
//! - **router**: turns press/release edges into commands
//! - **indicators**: drives outputs from received text lines
//! - **source**: reads edges from a line stream (stdin)
//!
//! Pin numbers are opaque here; the drivers behind [`OutputDriver`] and the
//! event sources decide what they mean.

pub mod indicators;
pub mod mapping;
pub mod router;
pub mod source;

pub use indicators::{IndicatorSet, LogOutput, OutputDriver};
pub use mapping::{InputRule, Mapping, OutputRule};
pub use router::{Edge, InputEvent, InputRouter};
