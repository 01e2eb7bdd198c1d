//! Error types for data parsing in erouska-types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers and wire data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in erouska-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Input had the wrong number of bytes or characters.
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Input contained a character that is not a hex digit.
    #[error("Invalid hex character '{character}' at position {position}")]
    InvalidHex {
        /// The offending character.
        character: char,
        /// Zero-based position in the input.
        position: usize,
    },

    /// Failed to parse data for another reason.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using erouska-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
