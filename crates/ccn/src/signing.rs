//! ContentObject production and verification.

use ccn_msg::{ContentType, Name, ParsedContentObject};
use ccnb::{CharBuf, DTag, Marker, Tt};
use log::debug;

use crate::error::Error;
use crate::keys::{SigningKey, VerifyKey, DEFAULT_DIGEST_ALGORITHM};
use crate::witness;

/// Parameters for creating signed content objects.
#[derive(Debug, Clone)]
pub struct SigningParams {
    pub type_: ContentType,
    /// FreshnessSeconds; `None` omits the element.
    pub freshness: Option<u64>,
    /// FinalBlockID payload bytes; `None` omits the element.
    pub final_block_id: Option<Vec<u8>>,
    /// Timestamp as `(seconds, nanoseconds)`; `None` uses the current time.
    pub timestamp: Option<(i64, u32)>,
    /// An encoded KeyLocator element to embed; `None` asks the key itself.
    pub key_locator: Option<Vec<u8>>,
}

impl Default for SigningParams {
    fn default() -> Self {
        SigningParams {
            type_: ContentType::Data,
            freshness: None,
            final_block_id: None,
            timestamp: None,
            key_locator: None,
        }
    }
}

/// Build a SignedInfo element.
pub fn signed_info_create(
    publisher_key_digest: &[u8],
    params: &SigningParams,
) -> crate::Result<Vec<u8>> {
    if publisher_key_digest.len() != 32 {
        return Err(Error::InvalidArg("publisher key digest must be 32 bytes"));
    }
    let mut c = CharBuf::new();
    c.element_begin(DTag::SignedInfo);
    c.append_tagged_blob(DTag::PublisherPublicKeyDigest, publisher_key_digest);
    c.element_begin(DTag::Timestamp);
    match params.timestamp {
        Some((secs, nsecs)) => {
            if !c.append_timestamp_blob(Marker::None, secs, nsecs) {
                return Err(Error::InvalidArg("timestamp not representable"));
            }
        }
        None => {
            if !c.append_now_blob(Marker::None) {
                return Err(Error::InvalidArg("system clock before the epoch"));
            }
        }
    }
    c.element_end();
    if params.type_ != ContentType::Data {
        c.element_begin(DTag::Type);
        c.append_tt(3, Tt::Blob);
        c.append_value(params.type_ as u64, 3);
        c.element_end();
    }
    if let Some(fresh) = params.freshness {
        c.append_tagged_number(DTag::FreshnessSeconds, fresh);
    }
    if let Some(fbid) = &params.final_block_id {
        c.append_tagged_blob(DTag::FinalBlockID, fbid);
    }
    if let Some(kl) = &params.key_locator {
        // already an encoded KeyLocator element
        c.append(kl);
    }
    c.element_end();
    Ok(c.into_vec())
}

/// Encode and sign a ContentObject.
///
/// The signature covers exactly the Name, SignedInfo, and framed Content as
/// they will appear on the wire.
pub fn sign_content(
    key: &dyn SigningKey,
    name: &Name,
    params: &SigningParams,
    data: &[u8],
) -> crate::Result<Vec<u8>> {
    let mut effective = params.clone();
    if effective.key_locator.is_none() {
        effective.key_locator = key.key_locator();
    }
    let signed_info = signed_info_create(&key.public_key_digest(), &effective)?;

    let mut content_elem = CharBuf::new();
    content_elem.append_tagged_blob(DTag::Content, data);

    let mut signed_span = Vec::with_capacity(
        name.as_ccnb().len() + signed_info.len() + content_elem.len(),
    );
    signed_span.extend_from_slice(name.as_ccnb());
    signed_span.extend_from_slice(&signed_info);
    signed_span.extend_from_slice(content_elem.as_slice());
    let signature = key.sign(&signed_span);

    let mut out = CharBuf::new();
    out.element_begin(DTag::ContentObject);
    out.element_begin(DTag::Signature);
    if let Some(algo) = key.digest_algorithm() {
        if algo != DEFAULT_DIGEST_ALGORITHM {
            out.append_tagged_udata(DTag::DigestAlgorithm, algo);
        }
    }
    out.append_tagged_blob(DTag::SignatureBits, &signature);
    out.element_end();
    out.append(&signed_span);
    out.element_end();
    Ok(out.into_vec())
}

/// Verify a parsed ContentObject's signature with the given key.
///
/// With a Witness present, the Merkle path is recombined from the signed
/// span and the signature is checked over the resulting root hash.
pub fn verify_signature(
    msg: &[u8],
    pco: &ParsedContentObject,
    key: &dyn VerifyKey,
) -> crate::Result<()> {
    if let Some(algo) = pco.digest_algorithm(msg) {
        if algo != DEFAULT_DIGEST_ALGORITHM.as_bytes() {
            return Err(Error::UnsupportedDigest);
        }
    }
    let signature = pco.signature_bits(msg).map_err(Error::Msg)?;
    let span = &msg[pco.signed_span()];
    let ok = match pco.witness(msg) {
        Some(wit) => {
            let path = witness::parse_witness(wit)?;
            let root = witness::merkle_root_hash(span, &path)?;
            key.verify(&root, signature)
        }
        None => key.verify(span, signature),
    };
    if ok {
        Ok(())
    } else {
        debug!("signature verification failed");
        Err(Error::BadSignature)
    }
}

/// Encode a KeyLocator element carrying a raw Key blob.
pub fn key_locator_from_key_blob(key_der: &[u8]) -> Vec<u8> {
    let mut c = CharBuf::new();
    c.element_begin(DTag::KeyLocator);
    c.append_tagged_blob(DTag::Key, key_der);
    c.element_end();
    c.into_vec()
}

/// Encode a KeyLocator element naming the key.
pub fn key_locator_from_key_name(key_name: &Name) -> Vec<u8> {
    let mut c = CharBuf::new();
    c.element_begin(DTag::KeyLocator);
    c.element_begin(DTag::KeyName);
    c.append(key_name.as_ccnb());
    c.element_end();
    c.element_end();
    c.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::HmacKey;
    use crate::witness::{encode_witness, MerklePath};
    use ccn_msg::parse_content_object;
    use ccnb::IndexBuf;

    fn test_key() -> HmacKey {
        HmacKey::new(b"signing test key")
    }

    fn test_name() -> Name {
        let mut n = Name::new();
        n.append_str("test");
        n.append_str("data");
        n
    }

    #[test]
    fn signed_object_parses_and_verifies() {
        let key = test_key();
        let msg = sign_content(&key, &test_name(), &SigningParams::default(), b"DATA").unwrap();
        let mut comps = IndexBuf::new();
        let pco = parse_content_object(&msg, Some(&mut comps)).unwrap();
        assert_eq!(pco.content_value(&msg).unwrap(), b"DATA");
        assert_eq!(
            pco.publisher_key_digest(&msg).unwrap(),
            key.public_key_digest()
        );
        verify_signature(&msg, &pco, &key).unwrap();
    }

    #[test]
    fn bit_flip_in_signature_area_fails_verification() {
        let key = test_key();
        let mut msg =
            sign_content(&key, &test_name(), &SigningParams::default(), b"DATA").unwrap();
        let pco = parse_content_object(&msg, None).unwrap();
        // flip one bit inside the signature bits
        let pos = pco.b_signature_bits + 4;
        msg[pos] ^= 0x01;
        // structure still parses; only verification fails
        let pco = parse_content_object(&msg, None).unwrap();
        assert!(matches!(
            verify_signature(&msg, &pco, &key),
            Err(Error::BadSignature)
        ));
    }

    #[test]
    fn content_bit_flip_fails_verification() {
        let key = test_key();
        let mut msg =
            sign_content(&key, &test_name(), &SigningParams::default(), b"DATA").unwrap();
        let pco = parse_content_object(&msg, None).unwrap();
        let pos = pco.b_content + 3;
        msg[pos] ^= 0x20;
        if let Ok(pco) = parse_content_object(&msg, None) {
            assert!(verify_signature(&msg, &pco, &key).is_err());
        }
    }

    #[test]
    fn optional_fields_round_trip() {
        let key = test_key();
        let params = SigningParams {
            freshness: Some(30),
            final_block_id: Some(vec![0x00, 0x05]),
            timestamp: Some((1_700_000_000, 0)),
            ..Default::default()
        };
        let msg = sign_content(&key, &test_name(), &params, b"x").unwrap();
        let pco = parse_content_object(&msg, None).unwrap();
        assert_eq!(pco.freshness_seconds(&msg), Some(30));
        assert_eq!(pco.final_block_id(&msg).unwrap(), &[0x00, 0x05]);
        verify_signature(&msg, &pco, &key).unwrap();
    }

    #[test]
    fn gone_type_is_encoded_explicitly() {
        let key = test_key();
        let params = SigningParams {
            type_: ContentType::Gone,
            ..Default::default()
        };
        let msg = sign_content(&key, &test_name(), &params, b"").unwrap();
        let pco = parse_content_object(&msg, None).unwrap();
        assert_eq!(pco.type_, ContentType::Gone);
    }

    #[test]
    fn witnessed_object_verifies_via_merkle_root() {
        // Two objects sharing one signature over their Merkle root.
        let key = test_key();
        let name = test_name();
        // build the unsigned span for each leaf by hand
        let params = SigningParams {
            timestamp: Some((1_700_000_000, 0)),
            ..Default::default()
        };
        let si = signed_info_create(&key.public_key_digest(), &params).unwrap();
        let span_for = |data: &[u8]| {
            let mut c = CharBuf::new();
            c.append_tagged_blob(DTag::Content, data);
            let mut v = Vec::new();
            v.extend_from_slice(name.as_ccnb());
            v.extend_from_slice(&si);
            v.extend_from_slice(c.as_slice());
            v
        };
        let span_a = span_for(b"AAAA");
        let span_b = span_for(b"BBBB");
        use sha2::Digest;
        let ha = crate::keys::sha256(&span_a);
        let hb = crate::keys::sha256(&span_b);
        let mut h = sha2::Sha256::new();
        h.update(ha);
        h.update(hb);
        let root: [u8; 32] = h.finalize().into();
        let signature = key.sign(&root);

        // assemble object A with its witness
        let wit = encode_witness(&MerklePath {
            node: 2,
            hashes: vec![hb],
        })
        .unwrap();
        let mut out = CharBuf::new();
        out.element_begin(DTag::ContentObject);
        out.element_begin(DTag::Signature);
        out.append_tagged_blob(DTag::Witness, &wit);
        out.append_tagged_blob(DTag::SignatureBits, &signature);
        out.element_end();
        out.append(&span_a);
        out.element_end();
        let msg = out.into_vec();
        let pco = parse_content_object(&msg, None).unwrap();
        verify_signature(&msg, &pco, &key).unwrap();

        // a corrupted sibling hash must not verify
        let wit_bad = encode_witness(&MerklePath {
            node: 2,
            hashes: vec![[0u8; 32]],
        })
        .unwrap();
        let mut out = CharBuf::new();
        out.element_begin(DTag::ContentObject);
        out.element_begin(DTag::Signature);
        out.append_tagged_blob(DTag::Witness, &wit_bad);
        out.append_tagged_blob(DTag::SignatureBits, &signature);
        out.element_end();
        out.append(&span_a);
        out.element_end();
        let msg = out.into_vec();
        let pco = parse_content_object(&msg, None).unwrap();
        assert!(verify_signature(&msg, &pco, &key).is_err());
    }
}
