//! Client error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] ccn_transport::TransportError),
    #[error(transparent)]
    Msg(#[from] ccn_msg::MsgError),
    #[error(transparent)]
    Codec(#[from] ccnb::CodecError),
    #[error("handle is not connected")]
    NotConnected,
    #[error("handle is already connected")]
    AlreadyConnected,
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("operation not allowed from inside an upcall")]
    Reentrant,
    #[error("signature verification failed")]
    BadSignature,
    #[error("unsupported digest algorithm")]
    UnsupportedDigest,
    #[error("no key available for verification")]
    KeyMissing,
    #[error("malformed witness: {0}")]
    BadWitness(&'static str),
    #[error("operation timed out")]
    Timeout,
    #[error("sync engine error: {0}")]
    Sync(&'static str),
}
