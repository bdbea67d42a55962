//! CCNx client protocol engine.
//!
//! The [`Ccn`] handle owns one connection to the local forwarding daemon:
//! applications express interests and register interest filters, then drive
//! everything from [`Ccn::run`], a single-threaded cooperative loop that
//! polls the socket, ages pending interests with exponential decay, and
//! dispatches upcalls. Layered on the handle are signed-content production
//! and verification ([`signing`]), a sliding-window segmented stream reader
//! ([`fetch`]), and the synchronization-slice comparison engine ([`sync`]).
//!
//! Handles are not thread-safe and are never shared; everything happens on
//! the caller's thread, with suspension only inside `run` and `get`.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod fetch;
pub mod keys;
pub(crate) mod pit;
pub mod sched;
pub mod signing;
pub mod sync;
pub mod upcall;
pub mod witness;

pub use client::{Ccn, InterestId, PutStatus};
pub use error::Error;
pub use fetch::{Fetch, FetchRead, FetchStream};
pub use keys::{HmacKey, KeyStore, SigningKey, VerifyKey};
pub use signing::{sign_content, verify_signature, SigningParams};
pub use upcall::{Handler, HandlerRef, UpcallInfo, UpcallKind, UpcallResult};

pub use ccn_msg as msg;
pub use ccn_transport as transport;
pub use ccnb as codec;

/// Client result type
pub type Result<T> = std::result::Result<T, Error>;

/// Pending-interest half-life: outstanding counts halve this often, and an
/// undelivered interest is re-expressed on this cadence.
pub const INTEREST_HALFLIFE_MICROSEC: i64 = 4_000_000;
