//! Protocol-wide tuning constants

use std::time::Duration;

/// Maximum bytes of user/file-name payload per data segment
pub const PAYLOAD_SIZE: usize = 1024;

/// Largest datagram the endpoint will ever allocate a receive buffer for
pub const MAX_DGRAM: usize = 2048;

/// Selective Repeat sender/receiver window, in segments
pub const WINDOW_SIZE: u32 = 25;

/// Time without any valid datagram on an established connection before it is torn down
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Handshake SYN / SYN-ACK retransmission attempts
pub const HANDSHAKE_ATTEMPTS: u32 = 6;

/// Per-segment retransmission attempts in Selective Repeat
pub const SR_SEGMENT_ATTEMPTS: u32 = 10;

/// Per-segment retransmission attempts in Stop-and-Wait
pub const SW_SEGMENT_ATTEMPTS: u32 = 3;

/// Linger window after the client sends the final handshake ACK, during which
/// duplicate SYN-ACKs are re-acknowledged
pub const HANDSHAKE_LINGER: Duration = Duration::from_secs(2);

/// Time to wait for a FIN's ACK before closing unconditionally
pub const TEARDOWN_WAIT: Duration = Duration::from_secs(1);
