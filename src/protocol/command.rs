//! Outbound command encoding

use bytes::Bytes;

/// Line terminator expected by DCS-BIOS command listeners
pub const COMMAND_TERMINATOR: char = '\n';

/// Encode a command for the wire
///
/// Appends a single `\n` unless the command already ends with one, so
/// formatting is idempotent.
pub fn format_command(command: &str) -> Bytes {
    if command.ends_with(COMMAND_TERMINATOR) {
        return Bytes::copy_from_slice(command.as_bytes());
    }
    let mut line = String::with_capacity(command.len() + 1);
    line.push_str(command);
    line.push(COMMAND_TERMINATOR);
    Bytes::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_terminator() {
        assert_eq!(format_command("MASTER_ARM 1").as_ref(), b"MASTER_ARM 1\n");
    }

    #[test]
    fn test_already_terminated_is_unchanged() {
        assert_eq!(format_command("UFC_1 INC\n").as_ref(), b"UFC_1 INC\n");
    }

    #[test]
    fn test_idempotent() {
        let once = format_command("GEAR_LEVER 0");
        let text = std::str::from_utf8(&once).unwrap();
        assert_eq!(format_command(text), once);
    }

    #[test]
    fn test_empty_command_is_bare_newline() {
        assert_eq!(format_command("").as_ref(), b"\n");
    }
}
