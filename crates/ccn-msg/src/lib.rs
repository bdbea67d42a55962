//! CCNx message schemas on top of the ccnb codec.
//!
//! Parsed messages are offset tables into the original bytes: a
//! [`ParsedInterest`] or [`ParsedContentObject`] records where every
//! sub-element begins and ends but owns none of the payload, so matching and
//! digest computation stay zero-copy.

#![forbid(unsafe_code)]

pub mod content;
pub mod error;
pub mod exclude;
pub mod interest;
pub mod link;
pub mod matching;
pub mod name;
pub mod template;
pub mod uri;

pub use content::{parse_content_object, ContentType, KeyLocatorKind, ParsedContentObject};
pub use error::MsgError;
pub use exclude::{excluded, parse_exclude, ExcludeBuilder};
pub use interest::{parse_interest, AnswerOriginKind, ChildSelector, ParsedInterest};
pub use link::{
    encode_link, encode_status_response, parse_link, parse_status_response, ParsedLink,
};
pub use matching::content_matches_interest;
pub use name::{compare_components, compare_names, component_at, parse_name_at, Name};
pub use template::InterestTemplate;
pub use uri::{format_uri, parse_uri};

/// Schema result type
pub type Result<T> = std::result::Result<T, MsgError>;

/// Largest accepted value for suffix-component counts.
pub const MAX_SUFFIX_COMPS: u32 = 32767;

/// Default interest lifetime when the element is absent, in seconds.
pub const INTEREST_LIFETIME_SEC: u64 = 4;
