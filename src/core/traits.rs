//! Application boundary for ncoap.
//!
//! The resource layer answers requests, decides when resources change and
//! supplies the snapshots notifications are built from.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use super::error::CommunicationTimeoutError;
use crate::message::{Message, Token};

/// Representation of a resource at the moment it was published.
///
/// `max_age` starts counting when the snapshot is handed to
/// [`Endpoint::notify_resource_changed`](crate::endpoint::Endpoint::notify_resource_changed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Encoded representation.
    pub value: Vec<u8>,
    /// Application version of the state.
    pub version: u64,
    /// Freshness window.
    pub max_age: Duration,
    /// Content-Format of `value`, if any.
    pub content_format: Option<u16>,
}

impl ResourceSnapshot {
    /// Create a snapshot without a content format.
    pub fn new(value: impl Into<Vec<u8>>, version: u64, max_age: Duration) -> Self {
        Self {
            value: value.into(),
            version,
            max_age,
            content_format: None,
        }
    }

    /// Set the content format.
    pub fn with_content_format(mut self, format: u16) -> Self {
        self.content_format = Some(format);
        self
    }
}

/// Identifies an exchange in failure reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeContext {
    /// Peer the exchange was addressed to.
    pub remote: SocketAddr,
    /// Message id of the exchange.
    pub message_id: u16,
    /// Token carried by the message.
    pub token: Token,
    /// Observed resource for notifications, request path for requests.
    pub resource_path: Option<String>,
}

/// Resource layer driven by the endpoint.
///
/// All methods are called from the endpoint's event loop and must not block.
///
/// # Example
///
/// ```ignore
/// struct Temperature(f32);
///
/// impl ResourceHandler for Temperature {
///     fn on_request(&mut self, request: &Message) -> Message {
///         match request.uri_path().as_str() {
///             "temperature" => Message::response(Code::CONTENT, self.0.to_string()),
///             _ => Message::response(Code::NOT_FOUND, Vec::new()),
///         }
///     }
/// }
/// ```
pub trait ResourceHandler: Send + 'static {
    /// Answer a request.
    ///
    /// The returned message supplies code, options and payload; the endpoint
    /// fills in type, message id and token.
    fn on_request(&mut self, request: &Message) -> Message;

    /// Whether `path` accepts observe registrations.
    fn is_observable(&self, path: &str) -> bool {
        let _ = path;
        true
    }

    /// A confirmable exchange this endpoint started exhausted its retransmissions.
    fn on_exchange_failed(&mut self, context: &ExchangeContext, error: &CommunicationTimeoutError) {
        warn!(
            remote = %context.remote,
            resource = context.resource_path.as_deref().unwrap_or("-"),
            "exchange failed: {error}"
        );
    }
}

/// Handler for endpoints acting only as clients: every request gets 4.04.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResources;

impl ResourceHandler for NoResources {
    fn on_request(&mut self, _request: &Message) -> Message {
        Message::response(crate::message::Code::NOT_FOUND, Vec::new())
    }

    fn is_observable(&self, _path: &str) -> bool {
        false
    }
}
