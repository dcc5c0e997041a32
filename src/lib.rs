//! # ncoap
//!
//! CoAP (RFC 7252) message reliability and resource observation (RFC 7641)
//! over UDP.
//!
//! The crate is built in layers:
//!
//! - [`message`]: CoAP message model and wire codec
//! - [`reliability`]: confirmable exchanges with exponential backoff,
//!   ACK/RST matching and duplicate detection
//! - [`observe`]: observation registry, notification dispatch and
//!   client-side freshness checks
//! - [`endpoint`]: the sans-IO [`Endpoint`](endpoint::Endpoint) tying the
//!   layers together, plus a tokio driver
//!
//! The protocol core never reads a clock or a socket. Time is passed in as
//! `Instant`s, which keeps every timing rule testable on a virtual clock.
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio UDP driver ([`CoapEndpoint`])
//! - `serde` (default): `Serialize`/`Deserialize` for configuration
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use ncoap::prelude::*;
//!
//! struct Temperature(f32);
//!
//! impl ResourceHandler for Temperature {
//!     fn on_request(&mut self, request: &Message) -> Message {
//!         match request.uri_path().as_str() {
//!             "temperature" => Message::response(Code::CONTENT, self.0.to_string()),
//!             _ => Message::response(Code::NOT_FOUND, Vec::new()),
//!         }
//!     }
//! }
//!
//! let config = EndpointConfig::default();
//! let mut server = Endpoint::new(config, Temperature(21.5)).unwrap();
//!
//! // An observer registers.
//! let peer = "192.0.2.7:5683".parse().unwrap();
//! let mut register = Message::request(MessageType::Confirmable, Code::GET, "temperature")
//!     .with_token(Token::from_slice(&[0x4a]).unwrap());
//! register.set_observe(0);
//! server.handle(Instant::now(), peer, &register.encode().unwrap());
//!
//! let ack = server.poll_transmit().unwrap();
//! assert_eq!(Message::decode(&ack.contents).unwrap().observe(), Some(0));
//!
//! // The resource changes; the observer is notified.
//! server.handler_mut().0 = 22.0;
//! let snapshot = ResourceSnapshot::new(b"22.0".to_vec(), 2, Duration::from_secs(60));
//! assert_eq!(server.notify_resource_changed(Instant::now(), "temperature", &snapshot), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod message;

pub mod reliability;

pub mod observe;

pub mod endpoint;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::endpoint::{
        CancelReason, Endpoint, EndpointConfig, Event, NotificationType, ReliabilityConfig,
    };
    pub use crate::message::{Code, Message, MessageType, OptionNumber, Token};

    #[cfg(feature = "runtime")]
    pub use crate::endpoint::{CoapEndpoint, EndpointHandle};
}

// Re-export commonly used items at crate root
pub use crate::core::{
    CoapError, CoapResult, CommunicationTimeoutError, MessageError, ResourceHandler,
    ResourceSnapshot,
};
pub use endpoint::{Endpoint, EndpointConfig, Event};
pub use message::{Code, Message, MessageType, Token};

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use endpoint::{CoapEndpoint, EndpointHandle};
