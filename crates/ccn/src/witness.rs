//! Merkle-path witness decoding and root recombination.
//!
//! A Witness is a DER `DigestInfo`: an AlgorithmIdentifier naming the
//! aggregated-signing tree, and an OCTET STRING whose content is itself DER:
//! a SEQUENCE of the node index (origin 1) and the sibling hashes along the
//! path to the root. The signature covers the root hash, so many objects can
//! share one signature.

use der::asn1::{ObjectIdentifier, OctetStringRef};
use der::{Decode, Reader, SliceReader};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// OID for the SHA-256 Merkle hash tree aggregation.
pub const MERKLE_HASH_TREE_SHA256: &str = "1.2.840.113550.11.1.2.2";

/// A decoded Merkle path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    /// Node index of the signed leaf, origin 1 at the root.
    pub node: u64,
    /// Sibling hashes from the root side down to the leaf's sibling.
    pub hashes: Vec<[u8; 32]>,
}

/// Decode a Witness blob.
pub fn parse_witness(witness: &[u8]) -> crate::Result<MerklePath> {
    let mut outer = SliceReader::new(witness).map_err(|_| Error::BadWitness("oversized"))?;
    let path = outer
        .sequence(|digest_info| {
            let oid = digest_info
                .sequence(|algo| {
                    let oid = ObjectIdentifier::decode(algo)?;
                    // optional NULL (or other) parameters are tolerated
                    while !algo.is_finished() {
                        let _: der::AnyRef<'_> = der::AnyRef::decode(algo)?;
                    }
                    Ok(oid)
                })?;
            let digest = OctetStringRef::decode(digest_info)?;
            Ok((oid, digest))
        })
        .map_err(|_| Error::BadWitness("not a DigestInfo"))?;
    let (oid, digest) = path;
    if oid.to_string() != MERKLE_HASH_TREE_SHA256 {
        return Err(Error::BadWitness("unrecognized aggregation algorithm"));
    }
    let inner_bytes = digest.as_bytes();
    let mut inner = SliceReader::new(inner_bytes).map_err(|_| Error::BadWitness("oversized"))?;
    let path = inner
        .sequence(|mp| {
            let node = u64::decode(mp)?;
            let mut hashes = Vec::new();
            mp.sequence(|seq| {
                while !seq.is_finished() {
                    let h = OctetStringRef::decode(seq)?;
                    hashes.push(h.as_bytes().to_vec());
                }
                Ok(())
            })?;
            Ok((node, hashes))
        })
        .map_err(|_| Error::BadWitness("not a MerklePath"))?;
    let (node, raw_hashes) = path;
    if node == 0 {
        return Err(Error::BadWitness("node index is origin 1"));
    }
    let mut hashes = Vec::with_capacity(raw_hashes.len());
    for h in raw_hashes {
        let arr: [u8; 32] = h
            .as_slice()
            .try_into()
            .map_err(|_| Error::BadWitness("sibling hash size mismatch"))?;
        hashes.push(arr);
    }
    Ok(MerklePath { node, hashes })
}

/// Recombine the root hash from the leaf data and the path.
///
/// Starts from SHA-256 of `leaf_data`, then repeatedly pairs with the next
/// sibling: the low bit of the node index says whether the running hash is
/// the right (odd) or left (even) child of its parent.
pub fn merkle_root_hash(leaf_data: &[u8], path: &MerklePath) -> crate::Result<[u8; 32]> {
    let mut result: [u8; 32] = {
        let mut h = Sha256::new();
        h.update(leaf_data);
        h.finalize().into()
    };
    let mut node = path.node;
    let mut hash_index = path.hashes.len();
    while node != 1 {
        if hash_index == 0 {
            return Err(Error::BadWitness("path shorter than node depth"));
        }
        hash_index -= 1;
        let sibling = &path.hashes[hash_index];
        let (left, right) = if node & 1 == 1 {
            (sibling, &result)
        } else {
            (&result, sibling)
        };
        let mut h = Sha256::new();
        h.update(left);
        h.update(right);
        result = h.finalize().into();
        node >>= 1;
    }
    Ok(result)
}

/// Encode a Witness blob for the given path (used by tests and producers of
/// aggregate signatures).
pub fn encode_witness(path: &MerklePath) -> crate::Result<Vec<u8>> {
    use der::asn1::{ObjectIdentifier as Oid, OctetString};
    use der::Encode;

    #[derive(der::Sequence)]
    struct AlgoId {
        oid: Oid,
    }

    #[derive(der::Sequence)]
    struct MerklePathDer {
        node: u64,
        hashes: Vec<OctetString>,
    }

    #[derive(der::Sequence)]
    struct DigestInfo {
        algo: AlgoId,
        digest: OctetString,
    }

    let inner = MerklePathDer {
        node: path.node,
        hashes: path
            .hashes
            .iter()
            .map(|h| OctetString::new(h.as_slice()).expect("32-byte octet string"))
            .collect(),
    };
    let inner_bytes = inner
        .to_der()
        .map_err(|_| Error::BadWitness("encode failed"))?;
    let info = DigestInfo {
        algo: AlgoId {
            oid: MERKLE_HASH_TREE_SHA256
                .parse()
                .expect("constant OID parses"),
        },
        digest: OctetString::new(inner_bytes).map_err(|_| Error::BadWitness("encode failed"))?,
    };
    info.to_der().map_err(|_| Error::BadWitness("encode failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::sha256;

    fn combine(l: &[u8; 32], r: &[u8; 32]) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(l);
        h.update(r);
        h.finalize().into()
    }

    #[test]
    fn witness_encode_decode_round_trip() {
        let path = MerklePath {
            node: 5,
            hashes: vec![[1; 32], [2; 32]],
        };
        let der = encode_witness(&path).unwrap();
        let back = parse_witness(&der).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn two_leaf_tree_recombines() {
        // tree: root(1) over leaves 2 and 3
        let leaf2 = b"left leaf";
        let leaf3 = b"right leaf";
        let h2 = sha256(leaf2);
        let h3 = sha256(leaf3);
        let root = combine(&h2, &h3);

        let p2 = MerklePath {
            node: 2,
            hashes: vec![h3],
        };
        assert_eq!(merkle_root_hash(leaf2, &p2).unwrap(), root);

        let p3 = MerklePath {
            node: 3,
            hashes: vec![h2],
        };
        assert_eq!(merkle_root_hash(leaf3, &p3).unwrap(), root);
    }

    #[test]
    fn four_leaf_tree_inner_path() {
        // nodes: 1 root; 2,3 inner; 4..7 leaves
        let leaves: Vec<[u8; 32]> = (0..4u8).map(|i| sha256(&[i])).collect();
        let n2 = combine(&leaves[0], &leaves[1]);
        let n3 = combine(&leaves[2], &leaves[3]);
        let root = combine(&n2, &n3);
        // leaf at node 6 (= leaves[2]): siblings are leaves[3] (node 7) and n2
        let p6 = MerklePath {
            node: 6,
            hashes: vec![n2, leaves[3]],
        };
        assert_eq!(merkle_root_hash(&[2u8], &p6).unwrap(), root);
    }

    #[test]
    fn short_path_is_rejected() {
        let p = MerklePath {
            node: 4,
            hashes: vec![[0; 32]],
        };
        assert!(matches!(
            merkle_root_hash(b"x", &p),
            Err(Error::BadWitness(_))
        ));
    }
}
