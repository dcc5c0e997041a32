//! Endpoint configuration.

use std::net::SocketAddr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::core::{
    ACK_RANDOM_FACTOR, ACK_TIMEOUT, CoapError, CoapResult, DEADLINE_GUARD,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT, EXCHANGE_LIFETIME, MAX_RETRANSMIT,
    MAX_RETRANSMIT_LIMIT, MIN_RETRANSMIT_TIMEOUT,
};
use crate::message::MessageType;

/// Retransmission and deduplication parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReliabilityConfig {
    /// Base timeout before the first retransmission.
    pub ack_timeout: Duration,

    /// The initial timeout is `ack_timeout` scaled by a factor drawn from
    /// `[1.0, ack_random_factor]`.
    pub ack_random_factor: f64,

    /// Retransmissions before an exchange times out.
    pub max_retransmit: u8,

    /// How long completed exchanges and received message ids are remembered.
    pub exchange_lifetime: Duration,

    /// Smallest timeout the deadline-fitting policy will synthesize.
    pub min_retransmit_timeout: Duration,

    /// Distance kept between the final retransmission and a hard deadline.
    pub deadline_guard: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            ack_timeout: ACK_TIMEOUT,
            ack_random_factor: ACK_RANDOM_FACTOR,
            max_retransmit: MAX_RETRANSMIT,
            exchange_lifetime: EXCHANGE_LIFETIME,
            min_retransmit_timeout: MIN_RETRANSMIT_TIMEOUT,
            deadline_guard: DEADLINE_GUARD,
        }
    }
}

impl ReliabilityConfig {
    /// Check the parameters for values the engine cannot work with.
    pub fn validate(&self) -> CoapResult<()> {
        if self.ack_timeout.is_zero() {
            return Err(CoapError::Config("ack_timeout must be non-zero".into()));
        }
        if !self.ack_random_factor.is_finite() || self.ack_random_factor < 1.0 {
            return Err(CoapError::Config(format!(
                "ack_random_factor must be at least 1.0, got {}",
                self.ack_random_factor
            )));
        }
        if self.max_retransmit > MAX_RETRANSMIT_LIMIT {
            return Err(CoapError::Config(format!(
                "max_retransmit must be at most {MAX_RETRANSMIT_LIMIT}, got {}",
                self.max_retransmit
            )));
        }
        if self.min_retransmit_timeout.is_zero() {
            return Err(CoapError::Config(
                "min_retransmit_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Longest time an exchange without a hard deadline waits for a reply,
    /// assuming the maximum random factor.
    pub fn max_wait(&self) -> Duration {
        let rounds = 1u32
            .checked_shl(u32::from(self.max_retransmit) + 1)
            .map_or(u32::MAX, |r| r - 1);
        self.ack_timeout
            .mul_f64(self.ack_random_factor)
            .saturating_mul(rounds)
    }
}

/// Message type used for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NotificationType {
    /// Acknowledged and retransmitted within the notification's Max-Age.
    #[default]
    Confirmable,
    /// Sent once.
    NonConfirmable,
}

impl NotificationType {
    /// Header message type.
    pub fn message_type(self) -> MessageType {
        match self {
            Self::Confirmable => MessageType::Confirmable,
            Self::NonConfirmable => MessageType::NonConfirmable,
        }
    }
}

/// Endpoint configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EndpointConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Retransmission parameters.
    pub reliability: ReliabilityConfig,

    /// Message type of notifications.
    pub notification_type: NotificationType,

    /// Largest datagram accepted or sent.
    pub max_message_size: usize,

    /// Receive buffer of the runtime socket; 64 KiB when unset.
    pub recv_buffer_size: Option<usize>,

    /// Capacity of the event and command channels of the runtime layer.
    pub event_capacity: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            reliability: ReliabilityConfig::default(),
            notification_type: NotificationType::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            recv_buffer_size: None,
            event_capacity: 256,
        }
    }
}

impl EndpointConfig {
    /// Create a builder.
    pub fn builder() -> EndpointConfigBuilder {
        EndpointConfigBuilder::new()
    }

    /// Check the configuration.
    pub fn validate(&self) -> CoapResult<()> {
        self.reliability.validate()?;
        if self.max_message_size < crate::core::HEADER_SIZE {
            return Err(CoapError::Config(format!(
                "max_message_size {} is smaller than a message header",
                self.max_message_size
            )));
        }
        if self.event_capacity == 0 {
            return Err(CoapError::Config("event_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

/// Builder for [`EndpointConfig`].
#[derive(Debug, Default)]
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the base retransmission timeout.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.reliability.ack_timeout = timeout;
        self
    }

    /// Set the upper bound of the initial timeout factor.
    pub fn ack_random_factor(mut self, factor: f64) -> Self {
        self.config.reliability.ack_random_factor = factor;
        self
    }

    /// Set the retransmission budget.
    pub fn max_retransmit(mut self, max: u8) -> Self {
        self.config.reliability.max_retransmit = max;
        self
    }

    /// Set how long completed exchanges are remembered.
    pub fn exchange_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.reliability.exchange_lifetime = lifetime;
        self
    }

    /// Replace all retransmission parameters.
    pub fn reliability(mut self, reliability: ReliabilityConfig) -> Self {
        self.config.reliability = reliability;
        self
    }

    /// Set the notification message type.
    pub fn notification_type(mut self, notification_type: NotificationType) -> Self {
        self.config.notification_type = notification_type;
        self
    }

    /// Set the largest datagram size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the socket receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = Some(size);
        self
    }

    /// Set the channel capacity of the runtime layer.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> CoapResult<EndpointConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
