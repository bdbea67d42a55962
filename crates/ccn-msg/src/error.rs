//! Schema-layer error type.

use ccnb::CodecError;
use thiserror::Error;

/// Errors raised while parsing or constructing CCNx messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MsgError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The element tag at the front does not name the message being parsed.
    #[error("not a {0} message")]
    WrongMessageType(&'static str),
    /// Well-formed ccnb carrying a schema generation this build rejects.
    #[error("downrev wire element: {0}")]
    Downrev(&'static str),
    /// An illegal parameter combination caught at parse time.
    #[error("illegal field combination: {0}")]
    Policy(&'static str),
    /// URI text that does not denote a name.
    #[error("bad URI: {0}")]
    Uri(&'static str),
    /// A well-formed message whose fields violate the schema.
    #[error("schema violation: {0}")]
    Schema(&'static str),
}
