//! The ccnb binary wire format.
//!
//! ccnb is a self-describing tag-length-value encoding: a stream of tokens
//! (dictionary tags, explicit tags, attributes, blobs, UTF-8 data and the
//! one-byte closer) that nest to arbitrary depth. This crate provides the
//! token coding itself, the compile-time dictionary of numeric tags, a
//! resumable skeleton decoder that can be fed partial buffers, a
//! buffer-oriented decoder with schema matching primitives, and the
//! encoding helpers the rest of the stack builds messages with.

#![forbid(unsafe_code)]

pub mod charbuf;
pub mod coding;
pub mod decoder;
pub mod dtag;
pub mod encoder;
pub mod error;
pub mod indexbuf;
pub mod skeleton;

pub use charbuf::CharBuf;
pub use coding::{Tt, CLOSE, MAX_TINY, TT_BITS, TT_HBIT, TT_MASK};
pub use decoder::{fetch_tagged_nonneg_int, ref_tagged_blob, ref_tagged_string, BufDecoder};
pub use dtag::DTag;
pub use encoder::{timestamp_units, Marker};
pub use error::CodecError;
pub use indexbuf::IndexBuf;
pub use skeleton::SkeletonDecoder;

/// Codec result type
pub type Result<T> = std::result::Result<T, CodecError>;
