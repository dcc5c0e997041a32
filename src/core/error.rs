//! Error types for ncoap.
//!
//! Codec and duplicate/unknown-token conditions never leave the event loop;
//! only per-exchange timeouts and caller bugs are escalated.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::message::Token;

/// Structural decoding and encoding failures (the malformed-message error).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Header version bits are not the supported version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Datagram shorter than the fixed header.
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum number of bytes.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Token length field uses a reserved value (9-15).
    #[error("invalid token length: {0}")]
    InvalidTokenLength(u8),

    /// Declared token length runs past the end of the datagram.
    #[error("token length {declared} exceeds remaining {available} bytes")]
    TokenOverrun {
        /// Declared token length.
        declared: usize,
        /// Bytes left after the header.
        available: usize,
    },

    /// An option's declared length (or extended field) runs past the end of the datagram.
    #[error("option length {declared} exceeds remaining {remaining} bytes")]
    OptionOverrun {
        /// Bytes the option header asked for.
        declared: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// Option delta or length nibble set to the reserved value 15.
    #[error("reserved option nibble")]
    ReservedNibble,

    /// Accumulated option deltas exceed the 16-bit option number space.
    #[error("option number overflow")]
    OptionNumberOverflow,

    /// Payload marker present with no payload following it.
    #[error("payload marker followed by empty payload")]
    EmptyPayload,

    /// Option value too long for the extended length field.
    #[error("option value of {0} bytes cannot be encoded")]
    OptionTooLong(usize),
}

/// A confirmable exchange exhausted its retransmissions without a reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no reply from {remote} to message {message_id} after {retransmissions} retransmissions")]
pub struct CommunicationTimeoutError {
    /// Peer the exchange was addressed to.
    pub remote: SocketAddr,
    /// Message id of the timed out exchange.
    pub message_id: u16,
    /// Token carried by the message.
    pub token: Token,
    /// Retransmissions performed before giving up.
    pub retransmissions: u8,
}

/// Top-level ncoap errors.
#[derive(Debug, Error)]
pub enum CoapError {
    /// Datagram failed structural decoding.
    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),

    /// Message id collision with a live exchange (caller bug).
    #[error("message id {message_id} to {remote} belongs to a live exchange")]
    DuplicateExchange {
        /// Peer address.
        remote: SocketAddr,
        /// Colliding message id.
        message_id: u16,
    },

    /// Retransmission budget exhausted.
    #[error(transparent)]
    CommunicationTimeout(#[from] CommunicationTimeoutError),

    /// Retransmitted duplicate recognised and handled locally.
    #[error("duplicate message {message_id} from {remote}")]
    DuplicateMessage {
        /// Peer address.
        remote: SocketAddr,
        /// Duplicated message id.
        message_id: u16,
    },

    /// Notification-shaped response for a token with no live observation.
    #[error("no observation for token {token} from {remote}")]
    UnknownToken {
        /// Peer address.
        remote: SocketAddr,
        /// Unmatched token.
        token: Token,
    },

    /// Every message id towards a peer is held by a live exchange.
    #[error("all message ids to {0} are in use")]
    MessageIdsExhausted(SocketAddr),

    /// Message cannot be sent as a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The endpoint event loop is gone.
    #[error("endpoint shut down")]
    Shutdown,
}

impl CoapError {
    /// Check if this error is dropped inside the event loop without propagation.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            CoapError::Malformed(_)
                | CoapError::DuplicateMessage { .. }
                | CoapError::UnknownToken { .. }
        )
    }

    /// Check if this error is reported to the caller that initiated the exchange.
    pub fn is_escalated(&self) -> bool {
        matches!(
            self,
            CoapError::CommunicationTimeout(_)
                | CoapError::DuplicateExchange { .. }
                | CoapError::MessageIdsExhausted(_)
        )
    }
}

/// Result type for ncoap operations.
pub type CoapResult<T> = Result<T, CoapError>;
