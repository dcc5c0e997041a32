//! Header field types: message type, code and token.

use std::fmt;

use rand::Rng;

use crate::core::{MAX_TOKEN_LENGTH, MessageError};

/// Message type from the two type bits of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Requires acknowledgement; retransmitted on timeout.
    Confirmable = 0,
    /// Sent once, never acknowledged.
    NonConfirmable = 1,
    /// Confirms a confirmable message, may piggyback a response.
    Acknowledgement = 2,
    /// Rejects a message or cancels an observation.
    Reset = 3,
}

impl MessageType {
    /// Parse a message type from the two type bits.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }

    /// Two-bit wire representation.
    pub fn as_bits(self) -> u8 {
        self as u8
    }

    /// Short name used in logs.
    pub fn abbreviation(self) -> &'static str {
        match self {
            Self::Confirmable => "CON",
            Self::NonConfirmable => "NON",
            Self::Acknowledgement => "ACK",
            Self::Reset => "RST",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// Request method or response status (`class.detail`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Code(u8);

impl Code {
    /// 0.00, used by empty ACK/RST and pings.
    pub const EMPTY: Self = Self::new(0, 0);
    /// 0.01 GET.
    pub const GET: Self = Self::new(0, 1);
    /// 0.02 POST.
    pub const POST: Self = Self::new(0, 2);
    /// 0.03 PUT.
    pub const PUT: Self = Self::new(0, 3);
    /// 0.04 DELETE.
    pub const DELETE: Self = Self::new(0, 4);
    /// 2.01 Created.
    pub const CREATED: Self = Self::new(2, 1);
    /// 2.02 Deleted.
    pub const DELETED: Self = Self::new(2, 2);
    /// 2.03 Valid.
    pub const VALID: Self = Self::new(2, 3);
    /// 2.04 Changed.
    pub const CHANGED: Self = Self::new(2, 4);
    /// 2.05 Content.
    pub const CONTENT: Self = Self::new(2, 5);
    /// 4.00 Bad Request.
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    /// 4.04 Not Found.
    pub const NOT_FOUND: Self = Self::new(4, 4);
    /// 4.05 Method Not Allowed.
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    /// 5.00 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);

    /// Build a code from class (3 bits) and detail (5 bits).
    pub const fn new(class: u8, detail: u8) -> Self {
        Self(((class & 0x07) << 5) | (detail & 0x1F))
    }

    /// Wrap a raw code byte.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw code byte.
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Code class (0 request, 2 success, 4 client error, 5 server error).
    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    /// Code detail.
    pub const fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    /// 0.00.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Request method (class 0, non-empty).
    pub const fn is_request(self) -> bool {
        self.class() == 0 && self.0 != 0
    }

    /// Response status (class 2 to 5).
    pub const fn is_response(self) -> bool {
        matches!(self.class(), 2..=5)
    }

    /// Success class.
    pub const fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({self})")
    }
}

/// Opaque identifier correlating requests, responses and notifications.
///
/// Unused trailing bytes are kept zeroed so equality and hashing only see
/// the significant prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Token {
    len: u8,
    bytes: [u8; MAX_TOKEN_LENGTH],
}

impl Token {
    /// Zero-length token.
    pub const EMPTY: Self = Self {
        len: 0,
        bytes: [0; MAX_TOKEN_LENGTH],
    };

    /// Create a token from up to eight bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, MessageError> {
        if slice.len() > MAX_TOKEN_LENGTH {
            let len = u8::try_from(slice.len()).unwrap_or(u8::MAX);
            return Err(MessageError::InvalidTokenLength(len));
        }
        let mut bytes = [0u8; MAX_TOKEN_LENGTH];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            len: slice.len() as u8,
            bytes,
        })
    }

    /// Generate a random token of the maximum length.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; MAX_TOKEN_LENGTH];
        rng.fill(&mut bytes[..]);
        Self {
            len: MAX_TOKEN_LENGTH as u8,
            bytes,
        }
    }

    /// Significant bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Token length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Zero-length token.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("<empty>");
        }
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_message_type_bits() {
        for ty in [
            MessageType::Confirmable,
            MessageType::NonConfirmable,
            MessageType::Acknowledgement,
            MessageType::Reset,
        ] {
            assert_eq!(MessageType::from_bits(ty.as_bits()), ty);
        }
        assert_eq!(MessageType::Acknowledgement.to_string(), "ACK");
    }

    #[test]
    fn test_code_classes() {
        assert_eq!(Code::CONTENT.as_byte(), 0x45);
        assert_eq!(Code::GET.as_byte(), 0x01);
        assert_eq!(Code::NOT_FOUND.to_string(), "4.04");
        assert!(Code::GET.is_request());
        assert!(!Code::EMPTY.is_request());
        assert!(Code::EMPTY.is_empty());
        assert!(Code::CONTENT.is_response());
        assert!(Code::CONTENT.is_success());
        assert!(!Code::INTERNAL_SERVER_ERROR.is_success());
    }

    #[test]
    fn test_token_from_slice() {
        let token = Token::from_slice(&[0x12, 0x23, 0x34]).unwrap();
        assert_eq!(token.as_bytes(), &[0x12, 0x23, 0x34]);
        assert_eq!(token.len(), 3);
        assert_eq!(token.to_string(), "122334");
        assert!(Token::EMPTY.is_empty());
        assert_eq!(Token::default(), Token::EMPTY);
    }

    #[test]
    fn test_token_too_long() {
        let result = Token::from_slice(&[0u8; 9]);
        assert_eq!(result, Err(MessageError::InvalidTokenLength(9)));

        let result = Token::from_slice(&[0u8; 264]);
        assert_eq!(result, Err(MessageError::InvalidTokenLength(u8::MAX)));
    }

    #[test]
    fn test_token_random() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = Token::random(&mut rng);
        let b = Token::random(&mut rng);
        assert_eq!(a.len(), MAX_TOKEN_LENGTH);
        assert_ne!(a, b);
    }
}
