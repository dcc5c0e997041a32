//! Protocol constants from RFC 7252 (CoAP) and RFC 7641 (Observe).
//!
//! Wire constants are fixed by the protocol. Timing constants are the
//! defaults used by [`ReliabilityConfig`](crate::endpoint::ReliabilityConfig)
//! and may be overridden per endpoint.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT (RFC 7252 §3)
// =============================================================================

/// Protocol version carried in the first two header bits.
pub const COAP_VERSION: u8 = 1;

/// Fixed header size (version/type/token length, code, message id).
pub const HEADER_SIZE: usize = 4;

/// Maximum token length in bytes.
pub const MAX_TOKEN_LENGTH: usize = 8;

/// Byte separating options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Recommended upper bound for a datagram when the path MTU is unknown.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1152;

/// Default UDP port.
pub const DEFAULT_PORT: u16 = 5683;

// =============================================================================
// TRANSMISSION PARAMETERS (RFC 7252 §4.8)
// =============================================================================

/// Base retransmission timeout.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Upper bound of the random factor applied to the initial timeout.
pub const ACK_RANDOM_FACTOR: f64 = 1.5;

/// Maximum number of retransmissions of a confirmable message.
pub const MAX_RETRANSMIT: u8 = 4;

/// Largest `max_retransmit` a configuration may carry.
pub const MAX_RETRANSMIT_LIMIT: u8 = 15;

/// Maximum time a datagram is expected to spend in the network.
pub const MAX_LATENCY: Duration = Duration::from_secs(100);

/// Time a node takes to turn a confirmable message into an acknowledgement.
pub const PROCESSING_DELAY: Duration = ACK_TIMEOUT;

/// Maximum time from the first to the last transmission of a confirmable message.
pub const MAX_TRANSMIT_SPAN: Duration = Duration::from_secs(45);

/// How long a message id stays reserved after an exchange completes.
pub const EXCHANGE_LIFETIME: Duration = MAX_TRANSMIT_SPAN
    .saturating_add(MAX_LATENCY.saturating_mul(2))
    .saturating_add(PROCESSING_DELAY);

/// Floor for a retransmission timeout synthesized to meet a hard deadline.
pub const MIN_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Distance kept between the final retransmission and a hard deadline.
pub const DEADLINE_GUARD: Duration = Duration::from_millis(1);

// =============================================================================
// OBSERVE (RFC 7641)
// =============================================================================

/// Observe option value requesting registration.
pub const OBSERVE_REGISTER: u32 = 0;

/// Observe option value requesting deregistration.
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Sequence numbers wrap at 2^24 (three option bytes).
pub const OBSERVE_SEQUENCE_MODULUS: u32 = 1 << 24;

/// Half the sequence space, used by the freshness comparison.
pub const OBSERVE_SEQUENCE_HALF: u32 = 1 << 23;

/// Window after which a notification is fresher regardless of its sequence number.
pub const OBSERVE_REORDER_WINDOW: Duration = Duration::from_secs(128);
