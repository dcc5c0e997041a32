//! Message model and wire codec.
//!
//! Messages follow the RFC 7252 layout: a 4-byte header, a token of up to
//! eight bytes, delta-encoded options and an optional payload.

mod codec;
#[allow(clippy::module_inception)]
mod message;
mod option;
mod types;

pub use codec::{decode, encode};
pub use message::Message;
pub use option::{CoapOption, OptionNumber, decode_uint, encode_uint};
pub use types::{Code, MessageType, Token};
