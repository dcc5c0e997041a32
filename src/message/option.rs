//! Option numbers and values.

/// Registered option numbers (RFC 7252 §12.2, RFC 7641).
///
/// Numbers outside the registry are kept as `Unknown` so they survive a
/// decode/encode cycle untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionNumber {
    /// 1
    IfMatch,
    /// 3
    UriHost,
    /// 4
    ETag,
    /// 5
    IfNoneMatch,
    /// 6
    Observe,
    /// 7
    UriPort,
    /// 8
    LocationPath,
    /// 11
    UriPath,
    /// 12
    ContentFormat,
    /// 14
    MaxAge,
    /// 15
    UriQuery,
    /// 17
    Accept,
    /// 20
    LocationQuery,
    /// 35
    ProxyUri,
    /// 39
    ProxyScheme,
    /// 60
    Size1,
    /// Any unregistered number.
    Unknown(u16),
}

impl OptionNumber {
    /// Wire number.
    pub fn number(self) -> u16 {
        match self {
            Self::IfMatch => 1,
            Self::UriHost => 3,
            Self::ETag => 4,
            Self::IfNoneMatch => 5,
            Self::Observe => 6,
            Self::UriPort => 7,
            Self::LocationPath => 8,
            Self::UriPath => 11,
            Self::ContentFormat => 12,
            Self::MaxAge => 14,
            Self::UriQuery => 15,
            Self::Accept => 17,
            Self::LocationQuery => 20,
            Self::ProxyUri => 35,
            Self::ProxyScheme => 39,
            Self::Size1 => 60,
            Self::Unknown(number) => number,
        }
    }

    /// Critical options have odd numbers.
    pub fn is_critical(self) -> bool {
        self.number() & 0x01 != 0
    }
}

impl From<u16> for OptionNumber {
    fn from(number: u16) -> Self {
        match number {
            1 => Self::IfMatch,
            3 => Self::UriHost,
            4 => Self::ETag,
            5 => Self::IfNoneMatch,
            6 => Self::Observe,
            7 => Self::UriPort,
            8 => Self::LocationPath,
            11 => Self::UriPath,
            12 => Self::ContentFormat,
            14 => Self::MaxAge,
            15 => Self::UriQuery,
            17 => Self::Accept,
            20 => Self::LocationQuery,
            35 => Self::ProxyUri,
            39 => Self::ProxyScheme,
            60 => Self::Size1,
            other => Self::Unknown(other),
        }
    }
}

/// One option instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    /// Option number.
    pub number: OptionNumber,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl CoapOption {
    /// Create an option.
    pub fn new(number: OptionNumber, value: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }

    /// Create an option carrying an unsigned integer.
    pub fn uint(number: OptionNumber, value: u32) -> Self {
        Self::new(number, encode_uint(value))
    }

    /// Interpret the value as an unsigned integer.
    pub fn as_uint(&self) -> Option<u32> {
        decode_uint(&self.value)
    }
}

/// Encode an unsigned integer with the minimal number of big-endian bytes.
///
/// Zero encodes as the empty value.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Decode an unsigned integer value of at most four bytes.
pub fn decode_uint(value: &[u8]) -> Option<u32> {
    if value.len() > 4 {
        return None;
    }
    Some(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}
