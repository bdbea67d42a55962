//! The per-root hash cache.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use crate::sync::node::SyncNode;

/// We built this node from local names.
pub const STATE_LOCAL: u8 = 0x1;
/// A peer advertised this hash.
pub const STATE_REMOTE: u8 = 0x2;
/// A node fetch for this hash is in flight.
pub const STATE_FETCHING: u8 = 0x4;
/// The whole subtree is reconstructible from what we already have.
pub const STATE_COVERED: u8 = 0x8;

/// What we know about one content hash.
pub struct CacheEntry {
    pub hash: Vec<u8>,
    pub state: u8,
    /// Node contents as built locally.
    pub node_local: Option<Rc<SyncNode>>,
    /// Node contents as fetched from a peer.
    pub node_remote: Option<Rc<SyncNode>>,
    pub last_used: Instant,
    pub last_remote_fetch: Option<Instant>,
    /// Incremented while a fetch or walk references the entry.
    pub busy: u32,
}

impl CacheEntry {
    /// Local entries are covered by construction.
    pub fn is_covered(&mut self) -> bool {
        if self.state & STATE_COVERED != 0 {
            return true;
        }
        if self.state & STATE_LOCAL != 0 {
            self.state |= STATE_COVERED;
            return true;
        }
        false
    }

    /// Mark covered; only meaningful once the hash was seen remotely.
    pub fn set_covered(&mut self) {
        if self.state & (STATE_REMOTE | STATE_LOCAL) != 0 {
            self.state |= STATE_COVERED;
        }
    }

    /// Whichever node contents we have, remote preferred.
    pub fn any_node(&self) -> Option<Rc<SyncNode>> {
        self.node_remote.clone().or_else(|| self.node_local.clone())
    }
}

/// Hash-addressed node cache for one sync root.
#[derive(Default)]
pub struct HashCache {
    map: HashMap<Vec<u8>, CacheEntry>,
}

impl HashCache {
    /// Find or create the entry for `hash`, merging `state` bits in.
    pub fn enter(&mut self, hash: &[u8], state: u8) -> &mut CacheEntry {
        let entry = self
            .map
            .entry(hash.to_vec())
            .or_insert_with(|| CacheEntry {
                hash: hash.to_vec(),
                state: 0,
                node_local: None,
                node_remote: None,
                last_used: Instant::now(),
                last_remote_fetch: None,
                busy: 0,
            });
        entry.state |= state;
        entry
    }

    pub fn lookup(&self, hash: &[u8]) -> Option<&CacheEntry> {
        self.map.get(hash)
    }

    pub fn lookup_mut(&mut self, hash: &[u8]) -> Option<&mut CacheEntry> {
        self.map.get_mut(hash)
    }

    /// Store a locally built node.
    pub fn store_local(&mut self, node: Rc<SyncNode>) {
        let hash = node.hash().to_vec();
        let entry = self.enter(&hash, STATE_LOCAL);
        entry.node_local = Some(node);
        entry.last_used = Instant::now();
    }

    /// Store a node learned from a peer; clears any fetching mark.
    pub fn store_remote(&mut self, node: Rc<SyncNode>) {
        let hash = node.hash().to_vec();
        let entry = self.enter(&hash, STATE_REMOTE);
        entry.node_remote = Some(node.clone());
        if entry.node_local.is_none() {
            // mirror so the local walker can traverse adopted subtrees
            entry.node_local = Some(node);
        }
        entry.state &= !STATE_FETCHING;
        let now = Instant::now();
        entry.last_used = now;
        entry.last_remote_fetch = Some(now);
    }

    /// A node usable for traversal, from either side.
    pub fn node_for(&self, hash: &[u8]) -> Option<Rc<SyncNode>> {
        self.map.get(hash).and_then(|e| e.any_node())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
