//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

use std::net::Ipv4Addr;

// =============================================================================
// Network
// =============================================================================

/// Default DCS-BIOS export multicast group
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 50, 10);

/// Default DCS-BIOS export port
pub const DEFAULT_MULTICAST_PORT: u16 = 5010;

/// UDP receive buffer size
pub const UDP_BUFFER_SIZE: usize = 4096;

/// Poll interval for the UDP receive loop to observe the shutdown flag (milliseconds)
pub const UDP_POLL_INTERVAL_MS: u64 = 100;

// =============================================================================
// Framing
// =============================================================================

/// DCS-BIOS frame synchronization marker
pub const FRAME_MARKER: [u8; 4] = [0x55, 0x55, 0x55, 0x55];

// =============================================================================
// Serial
// =============================================================================

/// Default baud rate for DCS-BIOS serial panels
pub const DEFAULT_BAUD_RATE: u32 = 250_000;

/// Default serial read timeout (milliseconds)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Serial read buffer size
pub const SERIAL_BUFFER_SIZE: usize = 1024;

/// Consecutive read errors before an endpoint is considered gone
pub const READ_ERROR_THRESHOLD: u32 = 5;

/// Backoff after a transient read error (milliseconds)
pub const READ_ERROR_BACKOFF_MS: u64 = 1000;

/// Sleep when a non-blocking endpoint has nothing to read (milliseconds)
pub const IDLE_POLL_MS: u64 = 10;

/// Longest unterminated text line buffered from an endpoint
pub const MAX_TEXT_LINE: usize = 4096;

// =============================================================================
// Timing - Reconnection
// =============================================================================

/// First delay before reopening a failed endpoint (seconds)
pub const RECONNECT_DELAY_SECS: u64 = 2;

/// Upper bound for the reopen backoff (seconds)
pub const RECONNECT_MAX_DELAY_SECS: u64 = 30;

/// Granularity of interruptible sleeps (milliseconds)
pub const SHUTDOWN_CHECK_MS: u64 = 50;

/// Minimum interval between rate updates (seconds)
pub const RATE_UPDATE_MIN_INTERVAL_SECS: f64 = 0.1;

// =============================================================================
// Retry
// =============================================================================

/// Maximum socket bind retry attempts
pub const MAX_SOCKET_RETRY_ATTEMPTS: u32 = 5;

/// Base delay between retry attempts (milliseconds)
pub const RETRY_BASE_DELAY_MS: u64 = 200;
