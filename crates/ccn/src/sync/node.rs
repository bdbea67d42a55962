//! Composite nodes of the hash-addressed sync tree.

use ccn_msg::{compare_names, parse_name_at};
use ccnb::{BufDecoder, CharBuf, DTag};

use crate::error::Error;
use crate::keys::sha256;
use crate::sync::NODE_SPLIT_TRIGGER;

/// One child of a composite node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeElem {
    /// A name in the set (an encoded Name element).
    Leaf(Vec<u8>),
    /// The content hash of a child subtree node.
    Node([u8; 32]),
}

impl NodeElem {
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeElem::Leaf(_))
    }
}

/// A composite node: an ordered run of leaves and subtree references, with
/// the subtree's bounding names and size accounting. A node is addressed by
/// the SHA-256 of its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncNode {
    pub kind: u64,
    pub elems: Vec<NodeElem>,
    /// Smallest name in the subtree (encoded Name element).
    pub min_name: Option<Vec<u8>>,
    /// Largest name in the subtree.
    pub max_name: Option<Vec<u8>>,
    /// Total leaves in the subtree.
    pub leaf_count: u64,
    /// Approximate encoded bytes in the subtree.
    pub byte_count: u64,
    encoded: Vec<u8>,
    hash: [u8; 32],
}

impl SyncNode {
    /// Build a node over sorted leaf names.
    pub fn leaf_node(names: &[Vec<u8>]) -> SyncNode {
        let elems: Vec<NodeElem> = names.iter().map(|n| NodeElem::Leaf(n.clone())).collect();
        let min = names.first().cloned();
        let max = names.last().cloned();
        let leaf_count = names.len() as u64;
        let byte_count = names.iter().map(|n| n.len() as u64).sum();
        Self::assemble(0, elems, min, max, leaf_count, byte_count)
    }

    /// Build an inner node over child subtrees.
    pub fn inner_node(children: &[&SyncNode]) -> SyncNode {
        assert!(!children.is_empty(), "inner node needs children");
        let elems: Vec<NodeElem> = children
            .iter()
            .map(|c| NodeElem::Node(c.hash()))
            .collect();
        let min = children.first().and_then(|c| c.min_name.clone());
        let max = children.last().and_then(|c| c.max_name.clone());
        let leaf_count = children.iter().map(|c| c.leaf_count).sum();
        let byte_count = children.iter().map(|c| c.byte_count).sum();
        Self::assemble(1, elems, min, max, leaf_count, byte_count)
    }

    fn assemble(
        kind: u64,
        elems: Vec<NodeElem>,
        min_name: Option<Vec<u8>>,
        max_name: Option<Vec<u8>>,
        leaf_count: u64,
        byte_count: u64,
    ) -> SyncNode {
        let mut node = SyncNode {
            kind,
            elems,
            min_name,
            max_name,
            leaf_count,
            byte_count,
            encoded: Vec::new(),
            hash: [0; 32],
        };
        node.encoded = node.encode_inner();
        node.hash = sha256(&node.encoded);
        node
    }

    fn encode_inner(&self) -> Vec<u8> {
        let mut c = CharBuf::new();
        c.element_begin(DTag::SyncNode);
        c.append_tagged_number(DTag::SyncVersion, slice_wire_version());
        c.append_tagged_number(DTag::SyncNodeKind, self.kind);
        c.append_tagged_number(DTag::NamesElementCount, self.elems.len() as u64);
        for elem in &self.elems {
            c.element_begin(DTag::SyncNodeElement);
            match elem {
                NodeElem::Leaf(name) => c.append(name),
                NodeElem::Node(hash) => c.append_tagged_blob(DTag::ContentHash, hash),
            }
            c.element_end();
        }
        if let Some(min) = &self.min_name {
            c.append(min);
        }
        if let Some(max) = &self.max_name {
            c.append(max);
        }
        c.append_tagged_number(DTag::LeavesElementCount, self.leaf_count);
        c.append_tagged_number(DTag::BytesElementCount, self.byte_count);
        c.element_end();
        c.into_vec()
    }

    /// The node's wire encoding.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// The node's content hash (its address).
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Where `name` falls relative to this node's bounds.
    pub fn compare_min_max(&self, name: &[u8]) -> MinMaxOrder {
        let (Some(min), Some(max)) = (&self.min_name, &self.max_name) else {
            return MinMaxOrder::Before;
        };
        let vs_min = compare_names(name, min);
        if vs_min < 0 {
            return MinMaxOrder::Before;
        }
        if vs_min == 0 {
            return MinMaxOrder::Min;
        }
        let vs_max = compare_names(name, max);
        if vs_max > 0 {
            return MinMaxOrder::After;
        }
        if vs_max == 0 {
            return MinMaxOrder::Max;
        }
        MinMaxOrder::Inside
    }

    /// Parse a node from its wire encoding.
    pub fn parse(bytes: &[u8]) -> crate::Result<SyncNode> {
        let mut d = BufDecoder::new(bytes);
        if !d.match_dtag(DTag::SyncNode) {
            return Err(Error::Sync("not a SyncNode"));
        }
        d.advance();
        let version = d
            .opt_tagged_nonneg_int(DTag::SyncVersion)
            .ok_or(Error::Sync("missing node version"))?;
        if version != slice_wire_version() {
            return Err(Error::Sync("unsupported node version"));
        }
        let kind = d
            .opt_tagged_nonneg_int(DTag::SyncNodeKind)
            .ok_or(Error::Sync("missing node kind"))?;
        let count = d
            .opt_tagged_nonneg_int(DTag::NamesElementCount)
            .ok_or(Error::Sync("missing element count"))? as usize;
        if count > bytes.len() {
            // child count cannot exceed what the buffer could hold
            return Err(Error::Sync("element count exceeds node size"));
        }
        let mut elems = Vec::with_capacity(count);
        for _ in 0..count {
            if !d.match_dtag(DTag::SyncNodeElement) {
                return Err(Error::Sync("missing node element"));
            }
            d.advance();
            if d.match_dtag(DTag::Name) {
                let start = d.token_index();
                parse_name_at(&mut d, None).map_err(Error::Msg)?;
                let stop = d.token_index();
                elems.push(NodeElem::Leaf(bytes[start..stop].to_vec()));
            } else if d.match_dtag(DTag::ContentHash) {
                d.advance();
                let blob = d.match_blob().ok_or(Error::Sync("empty hash element"))?;
                let hash: [u8; 32] = blob
                    .try_into()
                    .map_err(|_| Error::Sync("hash element size mismatch"))?;
                d.advance();
                d.check_close();
                elems.push(NodeElem::Node(hash));
            } else {
                return Err(Error::Sync("unrecognized node element"));
            }
            d.check_close();
            if let Some(e) = d.error() {
                return Err(Error::Codec(e));
            }
        }
        let mut min_name = None;
        let mut max_name = None;
        if d.match_dtag(DTag::Name) {
            let start = d.token_index();
            parse_name_at(&mut d, None).map_err(Error::Msg)?;
            min_name = Some(bytes[start..d.token_index()].to_vec());
        }
        if d.match_dtag(DTag::Name) {
            let start = d.token_index();
            parse_name_at(&mut d, None).map_err(Error::Msg)?;
            max_name = Some(bytes[start..d.token_index()].to_vec());
        }
        let leaf_count = d
            .opt_tagged_nonneg_int(DTag::LeavesElementCount)
            .ok_or(Error::Sync("missing leaf count"))?;
        let byte_count = d
            .opt_tagged_nonneg_int(DTag::BytesElementCount)
            .ok_or(Error::Sync("missing byte count"))?;
        d.check_close();
        if let Some(e) = d.error() {
            return Err(Error::Codec(e));
        }
        if !d.at_end() {
            return Err(Error::Sync("trailing bytes after node"));
        }
        Ok(Self::assemble(
            kind, elems, min_name, max_name, leaf_count, byte_count,
        ))
    }
}

/// Where a name falls against a node's `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMaxOrder {
    Before,
    Min,
    Inside,
    Max,
    After,
}

fn slice_wire_version() -> u64 {
    crate::sync::slice::SLICE_VERSION
}

/// Build the full tree over a sorted, deduplicated set of encoded names.
/// Returns all nodes, root last; an empty set produces no nodes.
pub fn build_tree(names: &[Vec<u8>]) -> Vec<SyncNode> {
    if names.is_empty() {
        return Vec::new();
    }
    let mut nodes: Vec<SyncNode> = Vec::new();
    // leaf level: chunk by encoded size
    let mut level: Vec<SyncNode> = Vec::new();
    let mut chunk: Vec<Vec<u8>> = Vec::new();
    let mut chunk_bytes = 0usize;
    for name in names {
        chunk.push(name.clone());
        chunk_bytes += name.len();
        if chunk_bytes > NODE_SPLIT_TRIGGER {
            level.push(SyncNode::leaf_node(&chunk));
            chunk.clear();
            chunk_bytes = 0;
        }
    }
    if !chunk.is_empty() {
        level.push(SyncNode::leaf_node(&chunk));
    }
    // inner levels until a single root remains
    while level.len() > 1 {
        let mut next: Vec<SyncNode> = Vec::new();
        let mut group: Vec<&SyncNode> = Vec::new();
        let mut group_bytes = 0usize;
        for node in &level {
            group.push(node);
            group_bytes += 40; // a hash reference's encoded footprint
            if group_bytes > NODE_SPLIT_TRIGGER {
                next.push(SyncNode::inner_node(&group));
                group.clear();
                group_bytes = 0;
            }
        }
        if !group.is_empty() {
            next.push(SyncNode::inner_node(&group));
        }
        nodes.extend(level);
        level = next;
    }
    nodes.extend(level);
    nodes
}

/// Collect every leaf name in `nodes`' tree rooted at `root`, using a
/// lookup for child nodes.
pub fn collect_leaves<'a, F>(root: &SyncNode, lookup: &F, out: &mut Vec<Vec<u8>>) -> crate::Result<()>
where
    F: Fn(&[u8; 32]) -> Option<&'a SyncNode>,
{
    for elem in &root.elems {
        match elem {
            NodeElem::Leaf(name) => out.push(name.clone()),
            NodeElem::Node(hash) => {
                let child = lookup(hash).ok_or(Error::Sync("missing child node"))?;
                collect_leaves(child, lookup, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccn_msg::parse_uri;

    fn enc(uri: &str) -> Vec<u8> {
        parse_uri(uri).unwrap().as_ccnb().to_vec()
    }

    fn sorted(mut names: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        names.sort_by(|a, b| compare_names(a, b).cmp(&0));
        names.dedup();
        names
    }

    #[test]
    fn node_encode_parse_round_trip() {
        let names = sorted(vec![enc("ccnx:/p/a"), enc("ccnx:/p/b")]);
        let node = SyncNode::leaf_node(&names);
        let back = SyncNode::parse(node.encoded()).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.hash(), node.hash());
        assert_eq!(back.leaf_count, 2);
    }

    #[test]
    fn hash_tracks_content() {
        let a = SyncNode::leaf_node(&sorted(vec![enc("ccnx:/p/a")]));
        let b = SyncNode::leaf_node(&sorted(vec![enc("ccnx:/p/b")]));
        assert_ne!(a.hash(), b.hash());
        let a2 = SyncNode::leaf_node(&sorted(vec![enc("ccnx:/p/a")]));
        assert_eq!(a.hash(), a2.hash());
    }

    #[test]
    fn min_max_ordering() {
        let names = sorted(vec![enc("ccnx:/p/b"), enc("ccnx:/p/d")]);
        let node = SyncNode::leaf_node(&names);
        assert_eq!(node.compare_min_max(&enc("ccnx:/p/a")), MinMaxOrder::Before);
        assert_eq!(node.compare_min_max(&enc("ccnx:/p/b")), MinMaxOrder::Min);
        assert_eq!(node.compare_min_max(&enc("ccnx:/p/c")), MinMaxOrder::Inside);
        assert_eq!(node.compare_min_max(&enc("ccnx:/p/d")), MinMaxOrder::Max);
        assert_eq!(node.compare_min_max(&enc("ccnx:/p/e")), MinMaxOrder::After);
    }

    #[test]
    fn large_sets_split_into_trees() {
        let mut names = Vec::new();
        for i in 0..200 {
            names.push(enc(&format!("ccnx:/p/item-{i:04}")));
        }
        let names = sorted(names);
        let nodes = build_tree(&names);
        assert!(nodes.len() > 1, "expected a split tree");
        let root = nodes.last().unwrap();
        assert_eq!(root.leaf_count, 200);
        assert!(root.elems.iter().all(|e| !e.is_leaf()));

        // every leaf is reachable and in order
        let by_hash: std::collections::HashMap<[u8; 32], &SyncNode> =
            nodes.iter().map(|n| (n.hash(), n)).collect();
        let mut out = Vec::new();
        collect_leaves(root, &|h: &[u8; 32]| by_hash.get(h).copied(), &mut out).unwrap();
        assert_eq!(out, names);
    }

    #[test]
    fn same_set_same_root_hash() {
        let names_a = sorted(vec![enc("ccnx:/p/a"), enc("ccnx:/p/b"), enc("ccnx:/p/c")]);
        let names_b = sorted(vec![enc("ccnx:/p/c"), enc("ccnx:/p/a"), enc("ccnx:/p/b")]);
        let ra = build_tree(&names_a);
        let rb = build_tree(&names_b);
        assert_eq!(ra.last().unwrap().hash(), rb.last().unwrap().hash());
    }

    #[test]
    fn overstated_child_count_rejected() {
        let names = sorted(
            (0..9)
                .map(|i| enc(&format!("ccnx:/p/item-{i}")))
                .collect::<Vec<_>>(),
        );
        let node = SyncNode::leaf_node(&names);
        assert_eq!(node.len(), 9);
        let mut bytes = node.encoded().to_vec();
        // the first '9' digit is the element count; overstate it
        let pos = bytes.iter().position(|&b| b == b'9').expect("count digit");
        bytes[pos] = b's'; // non-digit count
        assert!(SyncNode::parse(&bytes).is_err());
        let mut bytes2 = node.encoded().to_vec();
        bytes2[pos] = b'8';
        // count disagreeing with the actual element run also fails
        assert!(SyncNode::parse(&bytes2).is_err());
    }
}
