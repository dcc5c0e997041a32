//! Endpoint: configuration, the sans-IO protocol state machine and its
//! tokio runtime.

mod config;
#[allow(clippy::module_inception)]
mod endpoint;

#[cfg(feature = "runtime")]
mod driver;
#[cfg(feature = "runtime")]
mod socket;

pub use config::{EndpointConfig, EndpointConfigBuilder, NotificationType, ReliabilityConfig};
pub use endpoint::{CancelReason, Endpoint, Event};

#[cfg(feature = "runtime")]
pub use driver::{CoapEndpoint, EndpointHandle, EndpointStats};
#[cfg(feature = "runtime")]
pub use socket::{CoapSocket, CoapSocketBuilder, DEFAULT_RECV_BUFFER_SIZE};
