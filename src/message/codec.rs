//! Wire encoding and decoding.
//!
//! Wire format (RFC 7252 §3):
//! ```text
//!  0                   1                   2                   3
//! +---+---+-------+---------------+-------------------------------+
//! |Ver| T |  TKL  |     Code      |          Message ID           |
//! +---+---+-------+---------------+-------------------------------+
//! |   Token (TKL bytes) ...
//! +---------------------------------------------------------------+
//! |   Options: (delta, length, value) records, ascending ...
//! +---------------+-----------------------------------------------+
//! |1 1 1 1 1 1 1 1|   Payload (only if non-empty) ...
//! +---------------+-----------------------------------------------+
//! ```
//!
//! Option delta and length nibbles 13 and 14 announce one and two
//! extension bytes; 15 is reserved and only valid as part of the payload
//! marker.

use super::message::Message;
use super::option::{CoapOption, OptionNumber};
use super::types::{Code, MessageType, Token};
use crate::core::{COAP_VERSION, HEADER_SIZE, MAX_TOKEN_LENGTH, MessageError, PAYLOAD_MARKER};

/// Extension thresholds for option delta/length nibbles.
mod nibble {
    /// One extension byte follows, value minus 13.
    pub const EXT_8: u8 = 13;
    /// Two extension bytes follow, value minus 269.
    pub const EXT_16: u8 = 14;
    /// Reserved.
    pub const RESERVED: u8 = 15;
    /// Offset of the one-byte form.
    pub const OFFSET_8: usize = 13;
    /// Offset of the two-byte form.
    pub const OFFSET_16: usize = 269;
    /// Largest value the two-byte form can carry.
    pub const MAX: usize = OFFSET_16 + u16::MAX as usize;
}

/// Serialize a message.
pub fn encode(message: &Message) -> Result<Vec<u8>, MessageError> {
    let options_size: usize = message
        .options()
        .iter()
        .map(|o| 5 + o.value.len())
        .sum();
    let mut buf = Vec::with_capacity(
        HEADER_SIZE + message.token.len() + options_size + 1 + message.payload.len(),
    );

    buf.push(
        (COAP_VERSION << 6)
            | (message.message_type.as_bits() << 4)
            | message.token.len() as u8,
    );
    buf.push(message.code.as_byte());
    buf.extend_from_slice(&message.message_id.to_be_bytes());
    buf.extend_from_slice(message.token.as_bytes());

    let mut previous = 0u16;
    for option in message.options() {
        let number = option.number.number();
        debug_assert!(number >= previous, "options out of order");
        let delta = usize::from(number - previous);
        let (delta_nibble, delta_ext) = split(delta)?;
        let (length_nibble, length_ext) = split(option.value.len())?;

        buf.push((delta_nibble << 4) | length_nibble);
        buf.extend_from_slice(delta_ext.as_slice());
        buf.extend_from_slice(length_ext.as_slice());
        buf.extend_from_slice(&option.value);
        previous = number;
    }

    if !message.payload.is_empty() {
        buf.push(PAYLOAD_MARKER);
        buf.extend_from_slice(&message.payload);
    }

    Ok(buf)
}

/// Parse a message.
pub fn decode(data: &[u8]) -> Result<Message, MessageError> {
    if data.len() < HEADER_SIZE {
        return Err(MessageError::TooShort {
            expected: HEADER_SIZE,
            actual: data.len(),
        });
    }

    let version = data[0] >> 6;
    if version != COAP_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    let message_type = MessageType::from_bits(data[0] >> 4);
    let token_length = data[0] & 0x0F;
    if usize::from(token_length) > MAX_TOKEN_LENGTH {
        return Err(MessageError::InvalidTokenLength(token_length));
    }
    let code = Code::from_byte(data[1]);
    let message_id = u16::from_be_bytes([data[2], data[3]]);

    let token_end = HEADER_SIZE + usize::from(token_length);
    if data.len() < token_end {
        return Err(MessageError::TokenOverrun {
            declared: usize::from(token_length),
            available: data.len() - HEADER_SIZE,
        });
    }
    let token = Token::from_slice(&data[HEADER_SIZE..token_end])?;

    let mut pos = token_end;
    let mut number = 0usize;
    let mut options = Vec::new();
    let mut payload = Vec::new();

    while pos < data.len() {
        let byte = data[pos];
        pos += 1;

        if byte == PAYLOAD_MARKER {
            if pos == data.len() {
                return Err(MessageError::EmptyPayload);
            }
            payload = data[pos..].to_vec();
            break;
        }

        let delta = read_extended(byte >> 4, data, &mut pos)?;
        let length = read_extended(byte & 0x0F, data, &mut pos)?;

        number += delta;
        if number > usize::from(u16::MAX) {
            return Err(MessageError::OptionNumberOverflow);
        }

        let remaining = data.len() - pos;
        if length > remaining {
            return Err(MessageError::OptionOverrun {
                declared: length,
                remaining,
            });
        }
        options.push(CoapOption::new(
            OptionNumber::from(number as u16),
            &data[pos..pos + length],
        ));
        pos += length;
    }

    Ok(Message::from_parts(
        message_type,
        code,
        message_id,
        token,
        options,
        payload,
    ))
}

/// Extension bytes following an option header byte.
struct Extension {
    bytes: [u8; 2],
    len: usize,
}

impl Extension {
    fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

fn split(value: usize) -> Result<(u8, Extension), MessageError> {
    if value < nibble::OFFSET_8 {
        Ok((
            value as u8,
            Extension {
                bytes: [0; 2],
                len: 0,
            },
        ))
    } else if value < nibble::OFFSET_16 {
        Ok((
            nibble::EXT_8,
            Extension {
                bytes: [(value - nibble::OFFSET_8) as u8, 0],
                len: 1,
            },
        ))
    } else if value <= nibble::MAX {
        Ok((
            nibble::EXT_16,
            Extension {
                bytes: ((value - nibble::OFFSET_16) as u16).to_be_bytes(),
                len: 2,
            },
        ))
    } else {
        Err(MessageError::OptionTooLong(value))
    }
}

fn read_extended(field: u8, data: &[u8], pos: &mut usize) -> Result<usize, MessageError> {
    let extra = match field {
        nibble::EXT_8 => 1,
        nibble::EXT_16 => 2,
        nibble::RESERVED => return Err(MessageError::ReservedNibble),
        small => return Ok(usize::from(small)),
    };

    let remaining = data.len() - *pos;
    if remaining < extra {
        return Err(MessageError::OptionOverrun {
            declared: extra,
            remaining,
        });
    }

    let value = if extra == 1 {
        usize::from(data[*pos]) + nibble::OFFSET_8
    } else {
        usize::from(u16::from_be_bytes([data[*pos], data[*pos + 1]])) + nibble::OFFSET_16
    };
    *pos += extra;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_request() -> Message {
        Message::request(MessageType::Confirmable, Code::GET, "observable")
            .with_token(Token::from_slice(&[0x12, 0x23, 0x34]).unwrap())
            .with_option(OptionNumber::Observe, Vec::new())
    }

    #[test]
    fn test_encode_known_bytes() {
        let mut message = observe_request();
        message.message_id = 12345;

        let bytes = encode(&message).unwrap();
        // ver 1 CON TKL 3, GET, mid 12345, token, Observe (delta 6) empty,
        // Uri-Path (delta 5) length 10
        let mut expected = hex::decode("43013039122334605a").unwrap();
        expected.extend_from_slice(b"observable");
        assert_eq!(bytes, expected);
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_round_trip_with_payload() {
        let mut message = Message::new(MessageType::Acknowledgement, Code::CONTENT, 0xBEEF)
            .with_token(Token::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap())
            .with_payload(b"hello".to_vec());
        message.set_observe(0x00AB_CDEF);
        message.set_max_age(std::time::Duration::from_secs(90));
        message.set_content_format(0);

        let decoded = decode(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_round_trip_extended_fields() {
        // Delta 300 needs the two-byte form, length 20 the one-byte form.
        let message = Message::new(MessageType::NonConfirmable, Code::POST, 1)
            .with_option(OptionNumber::Unknown(300), vec![0xAA; 20])
            .with_option(OptionNumber::Unknown(2000), vec![0xBB; 400]);

        let bytes = encode(&message).unwrap();
        assert_eq!(bytes[4], (nibble::EXT_16 << 4) | nibble::EXT_8);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_empty_message_is_header_only() {
        let bytes = encode(&Message::empty_ack(0x1234)).unwrap();
        assert_eq!(bytes, vec![0x60, 0x00, 0x12, 0x34]);
        assert_eq!(decode(&bytes).unwrap(), Message::empty_ack(0x1234));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode(&[0x40, 0x01]),
            Err(MessageError::TooShort {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_decode_bad_version() {
        assert_eq!(
            decode(&[0x80, 0x01, 0x00, 0x01]),
            Err(MessageError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_decode_token_overrun() {
        assert_eq!(
            decode(&[0x44, 0x01, 0x00, 0x01, 0xAA, 0xBB]),
            Err(MessageError::TokenOverrun {
                declared: 4,
                available: 2
            })
        );
        assert_eq!(
            decode(&[0x49, 0x01, 0x00, 0x01]),
            Err(MessageError::InvalidTokenLength(9))
        );
    }

    #[test]
    fn test_decode_option_overrun() {
        // Uri-Path claiming 5 bytes with 2 left.
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xB5, b'a', b'b']),
            Err(MessageError::OptionOverrun {
                declared: 5,
                remaining: 2
            })
        );
        // Missing extension byte.
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xD0]),
            Err(MessageError::OptionOverrun {
                declared: 1,
                remaining: 0
            })
        );
    }

    #[test]
    fn test_decode_reserved_nibble() {
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xF1, 0x00]),
            Err(MessageError::ReservedNibble)
        );
    }

    #[test]
    fn test_decode_empty_payload_after_marker() {
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xFF]),
            Err(MessageError::EmptyPayload)
        );
    }

    #[test]
    fn test_decode_repeated_options() {
        let bytes = [0x40, 0x01, 0x00, 0x01, 0xB1, b'a', 0x01, b'b', 0xFF, b'!'];
        let message = decode(&bytes).unwrap();
        assert_eq!(message.uri_path(), "a/b");
        assert_eq!(message.payload, b"!");
        assert_eq!(encode(&message).unwrap(), bytes);
    }

    #[test]
    fn test_encode_option_too_long() {
        let message = Message::new(MessageType::NonConfirmable, Code::POST, 1)
            .with_option(OptionNumber::Unknown(2), vec![0; nibble::MAX + 1]);
        assert_eq!(
            encode(&message),
            Err(MessageError::OptionTooLong(nibble::MAX + 1))
        );
    }
}
