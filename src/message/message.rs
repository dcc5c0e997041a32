//! In-memory protocol message.

use std::time::Duration;

use super::codec;
use super::option::{CoapOption, OptionNumber, decode_uint, encode_uint};
use super::types::{Code, MessageType, Token};
use crate::core::MessageError;

/// A protocol message.
///
/// Options are held in ascending option-number order; options sharing a
/// number keep their insertion order. This is the order the codec writes
/// them in, so decoding an encoded message yields an equal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub message_type: MessageType,
    /// Request method or response status.
    pub code: Code,
    /// 16-bit message id.
    pub message_id: u16,
    /// Request/observation correlation token.
    pub token: Token,
    options: Vec<CoapOption>,
    /// Payload, possibly empty.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with no token, options or payload.
    pub fn new(message_type: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token: Token::EMPTY,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Create a request for `path` (segments separated by `/`).
    pub fn request(message_type: MessageType, code: Code, path: &str) -> Self {
        let mut message = Self::new(message_type, code, 0);
        message.set_uri_path(path);
        message
    }

    /// Create a response body; type, message id and token are filled in when sent.
    pub fn response(code: Code, payload: impl Into<Vec<u8>>) -> Self {
        let mut message = Self::new(MessageType::NonConfirmable, code, 0);
        message.payload = payload.into();
        message
    }

    /// Empty acknowledgement for `message_id`.
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(MessageType::Acknowledgement, Code::EMPTY, message_id)
    }

    /// Reset rejecting `message_id`.
    pub fn reset(message_id: u16) -> Self {
        Self::new(MessageType::Reset, Code::EMPTY, message_id)
    }

    /// Empty confirmable message, answered by a reset.
    pub fn ping(message_id: u16) -> Self {
        Self::new(MessageType::Confirmable, Code::EMPTY, message_id)
    }

    /// Set the token.
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Add an option.
    pub fn with_option(mut self, number: OptionNumber, value: impl Into<Vec<u8>>) -> Self {
        self.add_option(number, value);
        self
    }

    /// Options in wire order.
    pub fn options(&self) -> &[CoapOption] {
        &self.options
    }

    /// Insert an option after every option with a number not greater than its own.
    pub fn add_option(&mut self, number: OptionNumber, value: impl Into<Vec<u8>>) {
        let at = self
            .options
            .partition_point(|o| o.number.number() <= number.number());
        self.options.insert(at, CoapOption::new(number, value));
    }

    /// Remove every instance of an option.
    pub fn remove_option(&mut self, number: OptionNumber) {
        self.options.retain(|o| o.number != number);
    }

    /// Replace every instance of an option with a single unsigned value.
    pub fn set_uint_option(&mut self, number: OptionNumber, value: u32) {
        self.remove_option(number);
        self.add_option(number, encode_uint(value));
    }

    /// Values of an option in order.
    pub fn option_values(&self, number: OptionNumber) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    /// First value of an option.
    pub fn first_option(&self, number: OptionNumber) -> Option<&[u8]> {
        self.option_values(number).next()
    }

    /// Check if an option is present.
    pub fn has_option(&self, number: OptionNumber) -> bool {
        self.options.iter().any(|o| o.number == number)
    }

    /// Uri-Path segments joined with `/`.
    pub fn uri_path(&self) -> String {
        self.option_values(OptionNumber::UriPath)
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Replace the Uri-Path options with the segments of `path`.
    pub fn set_uri_path(&mut self, path: &str) {
        self.remove_option(OptionNumber::UriPath);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(OptionNumber::UriPath, segment.as_bytes());
        }
    }

    /// Observe option value.
    pub fn observe(&self) -> Option<u32> {
        self.first_option(OptionNumber::Observe).and_then(decode_uint)
    }

    /// Set the Observe option.
    pub fn set_observe(&mut self, value: u32) {
        self.set_uint_option(OptionNumber::Observe, value);
    }

    /// Max-Age option value.
    pub fn max_age(&self) -> Option<Duration> {
        self.first_option(OptionNumber::MaxAge)
            .and_then(decode_uint)
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }

    /// Set Max-Age, rounding partial seconds up.
    pub fn set_max_age(&mut self, max_age: Duration) {
        let mut secs = max_age.as_secs();
        if max_age.subsec_nanos() > 0 {
            secs = secs.saturating_add(1);
        }
        self.set_uint_option(OptionNumber::MaxAge, secs.min(u64::from(u32::MAX)) as u32);
    }

    /// Content-Format option value.
    pub fn content_format(&self) -> Option<u16> {
        self.first_option(OptionNumber::ContentFormat)
            .and_then(decode_uint)
            .and_then(|v| u16::try_from(v).ok())
    }

    /// Set the Content-Format option.
    pub fn set_content_format(&mut self, format: u16) {
        self.set_uint_option(OptionNumber::ContentFormat, u32::from(format));
    }

    /// Request method message.
    pub fn is_request(&self) -> bool {
        self.code.is_request()
    }

    /// Response status message.
    pub fn is_response(&self) -> bool {
        self.code.is_response()
    }

    /// Code 0.00 message (empty ACK/RST or ping).
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Serialize to wire format.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        codec::encode(self)
    }

    /// Parse from wire format.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        codec::decode(data)
    }

    pub(super) fn from_parts(
        message_type: MessageType,
        code: Code,
        message_id: u16,
        token: Token,
        options: Vec<CoapOption>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token,
            options,
            payload,
        }
    }
}
