//! Codec error type.

use thiserror::Error;

/// Errors raised while tokenizing or matching ccnb data.
///
/// The skeleton decoder latches the first error it hits and refuses further
/// input; higher layers surface it through their own error types.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// A closer appeared with nothing open, or an element never closed.
    #[error("unbalanced element nesting")]
    Nesting,
    /// A token's numeric value does not fit in 64 bits.
    #[error("numeric value overflow in token header")]
    Overflow,
    /// An attribute token appeared outside a tag header.
    #[error("misplaced attribute token")]
    Attr,
    /// A reserved token type or malformed header byte.
    #[error("invalid token coding")]
    Coding,
    /// The buffer ended before the element did.
    #[error("truncated element")]
    Truncated,
    /// Well-formed ccnb that does not match the expected schema.
    #[error("schema violation: {0}")]
    Schema(&'static str),
}
