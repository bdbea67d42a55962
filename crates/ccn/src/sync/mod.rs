//! Synchronization slices: reconciling two sets of names over the network.
//!
//! Each slice maps to a hash-addressed tree of composite nodes. Peers learn
//! each other's root hashes through root-advise interests, pull unknown
//! nodes by hash through node-fetch interests, and walk the local and
//! remote trees in canonical name order to surface exactly the names they
//! are missing.

pub mod cache;
pub mod compare;
pub mod engine;
pub mod node;
pub mod slice;
pub mod tree;

pub use engine::{SyncCallback, SyncHandle};
pub use node::{NodeElem, SyncNode};
pub use slice::Slice;

/// Heartbeat period for the sync engine.
pub(crate) const HEARTBEAT_MICROS: u64 = 1_000_000;
/// Lifetime of a root-advise interest, seconds.
pub(crate) const ROOT_ADVISE_LIFETIME_SEC: u64 = 20;
/// Lifetime of a node-fetch interest, seconds.
pub(crate) const FETCH_LIFETIME_SEC: u64 = 4;
/// Ceiling on concurrently outstanding node fetches per comparison.
pub(crate) const MAX_FETCH_BUSY: usize = 6;
/// A comparison with no successful fetch for this long is assumed dead.
pub(crate) const COMPARE_ASSUME_BAD_SECS: u64 = 20;
/// Stall-warning period while a comparison is running.
pub(crate) const UPDATE_STALL_SECS: u64 = 15;
/// Approximate byte budget for an advise Exclude list.
pub(crate) const EXCLUSION_LIMIT: usize = 1000;
/// Covered roots older than this stay out of the Exclude list.
pub(crate) const EXCLUSION_TRIG_SECS: u64 = 5;
/// Composite nodes split once their encoding exceeds this many bytes.
pub(crate) const NODE_SPLIT_TRIGGER: usize = 400;

/// Name component marking the root-advise command.
pub(crate) const CMD_ROOT_ADVISE: &[u8] = b"\xC1.S.ra";
/// Name component marking the node-fetch command.
pub(crate) const CMD_NODE_FETCH: &[u8] = b"\xC1.S.nf";
/// Name component marking the slice-content namespace.
pub(crate) const CMD_SLICE_CONTENT: &[u8] = b"\xC1.S.cs";
