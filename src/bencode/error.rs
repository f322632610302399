use thiserror::Error;

/// Errors surfaced by the bencode decoder.
///
/// Encoding cannot fail: dictionaries are kept sorted by construction and
/// output goes into an in-memory buffer.
///
/// # Examples
///
/// ```
/// use mdht::bencode::{decode, BencodeError};
///
/// assert!(matches!(decode(b"i42"), Err(BencodeError::UnexpectedEof)));
/// assert!(matches!(decode(b"i-0e"), Err(BencodeError::InvalidInteger(_))));
/// assert!(matches!(decode(b"i42espam"), Err(BencodeError::TrailingData)));
/// ```
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer body is malformed: empty, non-numeric, negative zero,
    /// leading zeros, or outside the `i64` range.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte-string length prefix is malformed or overflows.
    #[error("invalid string length")]
    InvalidLength,

    /// Byte does not start any bencode construct, or a dictionary key is
    /// not a byte string.
    #[error("unexpected byte: {0:#04x}")]
    UnexpectedByte(u8),

    /// Extra bytes remain after the top-level value in strict decoding.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit exceeded while decoding nested lists/dictionaries.
    #[error("nesting too deep")]
    NestingTooDeep,
}
