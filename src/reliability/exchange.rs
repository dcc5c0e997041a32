//! Confirmable exchange state.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use super::timing::Backoff;
use crate::core::CommunicationTimeoutError;
use crate::message::Token;
use crate::observe::ObservationKey;

/// Identifies an exchange: the peer and the message id used towards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeKey {
    /// Peer address.
    pub remote: SocketAddr,
    /// Message id.
    pub message_id: u16,
}

impl ExchangeKey {
    /// Create a key.
    pub fn new(remote: SocketAddr, message_id: u16) -> Self {
        Self { remote, message_id }
    }
}

impl fmt::Display for ExchangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.remote, self.message_id)
    }
}

/// Exchange lifecycle.
///
/// ```text
/// Scheduled ──timer──> Retransmitting ──timer──> Retransmitting ...
///     │                      │
///     └──────────────────────┴──> Acknowledged | Reset | TimedOut | Superseded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Sent once, waiting for the first timer.
    Scheduled,
    /// At least one retransmission sent.
    Retransmitting,
    /// Matched by an ACK.
    Acknowledged,
    /// Matched by a RST.
    Reset,
    /// Budget or deadline exhausted without a reply.
    TimedOut,
    /// Replaced by a newer notification for the same observation.
    Superseded,
}

impl ExchangeState {
    /// Check if the exchange still has a timer.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Scheduled | Self::Retransmitting)
    }
}

/// Who gets told when an exchange ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOwner {
    /// A request started by the application.
    Request {
        /// Request token.
        token: Token,
    },
    /// A notification for an observation.
    Notification(ObservationKey),
}

/// One in-flight confirmable message.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub(super) key: ExchangeKey,
    pub(super) token: Token,
    pub(super) owner: ExchangeOwner,
    pub(super) bytes: Vec<u8>,
    pub(super) state: ExchangeState,
    pub(super) backoff: Backoff,
    pub(super) next_deadline: Instant,
    pub(super) hard_deadline: Option<Instant>,
    pub(super) first_sent: Instant,
}

impl Exchange {
    /// Exchange key.
    pub fn key(&self) -> ExchangeKey {
        self.key
    }

    /// Peer address.
    pub fn remote(&self) -> SocketAddr {
        self.key.remote
    }

    /// Message id.
    pub fn message_id(&self) -> u16 {
        self.key.message_id
    }

    /// Token of the carried message.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Owner of the exchange.
    pub fn owner(&self) -> ExchangeOwner {
        self.owner
    }

    /// Encoded message, sent unchanged on every retransmission.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lifecycle state.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Backoff progress.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Retransmissions sent so far.
    pub fn retransmit_count(&self) -> u8 {
        self.backoff.retransmit_count()
    }

    /// When the timer fires next.
    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Absolute ceiling for retransmissions, if any.
    pub fn hard_deadline(&self) -> Option<Instant> {
        self.hard_deadline
    }

    /// Time of the first transmission.
    pub fn first_sent(&self) -> Instant {
        self.first_sent
    }

    /// Error reported when this exchange times out.
    pub fn timeout_error(&self) -> CommunicationTimeoutError {
        CommunicationTimeoutError {
            remote: self.key.remote,
            message_id: self.key.message_id,
            token: self.token,
            retransmissions: self.backoff.retransmit_count(),
        }
    }
}
