//! DCS-BIOS textual protocol
//!
//! The text variant carries one message per line, `NAME` or `NAME:VALUE`,
//! and accepts newline-terminated commands in the other direction.

pub mod command;
pub mod message;

pub use command::format_command;
pub use message::{HandlerId, HandlerResult, Message, MessageParser};
