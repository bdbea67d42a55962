//! Key material as a capability.
//!
//! Keystore loading and asymmetric key handling live outside this crate:
//! anything that can sign or verify a byte string plugs in through the
//! [`SigningKey`] and [`VerifyKey`] traits. The shipped implementation is
//! HMAC-SHA256 over a shared secret, which also serves as the default
//! signing key in tests.

use std::collections::HashMap;
use std::rc::Rc;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Digest algorithm name used when a Signature omits DigestAlgorithm.
pub const DEFAULT_DIGEST_ALGORITHM: &str = "SHA256";

/// A private-key capability: signs a message under some key.
pub trait SigningKey {
    /// Digest algorithm name to record in the Signature element; `None`
    /// keeps the default (and omits the element).
    fn digest_algorithm(&self) -> Option<&str> {
        None
    }

    /// The 32-byte digest identifying the signer's public key.
    fn public_key_digest(&self) -> [u8; 32];

    /// An encoded KeyLocator element to embed in SignedInfo, if any.
    fn key_locator(&self) -> Option<Vec<u8>> {
        None
    }

    /// Sign `data` (the signed byte span, or a Merkle root hash).
    fn sign(&self, data: &[u8]) -> Vec<u8>;
}

/// A public-key capability: checks a signature over a byte string.
pub trait VerifyKey {
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}

/// HMAC-SHA256 over a shared secret; implements both capabilities.
#[derive(Clone)]
pub struct HmacKey {
    secret: Vec<u8>,
}

impl HmacKey {
    pub fn new(secret: &[u8]) -> HmacKey {
        HmacKey {
            secret: secret.to_vec(),
        }
    }

    fn mac(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

impl SigningKey for HmacKey {
    fn public_key_digest(&self) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(&self.secret);
        h.finalize().into()
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.mac(data)
    }
}

impl VerifyKey for HmacKey {
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        // constant-time compare via the hmac crate
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(data);
        mac.verify_slice(signature).is_ok()
    }
}

/// Per-handle key state: the default signing key plus verification keys
/// indexed by public-key digest.
#[derive(Default)]
pub struct KeyStore {
    signer: Option<Rc<dyn SigningKey>>,
    verify: HashMap<[u8; 32], Rc<dyn VerifyKey>>,
    /// Decodes an embedded KeyLocator Key blob into a verification key.
    key_decoder: Option<Box<dyn Fn(&[u8]) -> Option<Rc<dyn VerifyKey>>>>,
}

impl KeyStore {
    /// Install the default signing key.
    pub fn set_signer(&mut self, key: Rc<dyn SigningKey>) {
        self.signer = Some(key);
    }

    pub fn signer(&self) -> Option<Rc<dyn SigningKey>> {
        self.signer.clone()
    }

    /// Register a verification key under its public-key digest.
    pub fn register_verify_key(&mut self, digest: [u8; 32], key: Rc<dyn VerifyKey>) {
        self.verify.insert(digest, key);
    }

    pub fn verify_key(&self, digest: &[u8]) -> Option<Rc<dyn VerifyKey>> {
        let digest: [u8; 32] = digest.try_into().ok()?;
        self.verify.get(&digest).cloned()
    }

    pub fn has_verify_key(&self, digest: &[u8]) -> bool {
        self.verify_key(digest).is_some()
    }

    /// Install a decoder for embedded public-key blobs (e.g. DER).
    pub fn set_key_decoder(
        &mut self,
        decoder: Box<dyn Fn(&[u8]) -> Option<Rc<dyn VerifyKey>>>,
    ) {
        self.key_decoder = Some(decoder);
    }

    /// Try to admit an embedded key blob whose digest is already trusted by
    /// the message naming it. Registers and returns the key on success.
    pub fn admit_key_blob(&mut self, blob: &[u8]) -> Option<Rc<dyn VerifyKey>> {
        let decoder = self.key_decoder.as_ref()?;
        let key = decoder(blob)?;
        let mut h = Sha256::new();
        h.update(blob);
        let digest: [u8; 32] = h.finalize().into();
        self.verify.insert(digest, key.clone());
        Some(key)
    }
}

/// SHA-256 of arbitrary bytes; the digest used throughout the protocol.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sign_verify_round_trip() {
        let k = HmacKey::new(b"shared secret");
        let sig = k.sign(b"message");
        assert!(k.verify(b"message", &sig));
        assert!(!k.verify(b"other message", &sig));
        let mut bad = sig.clone();
        bad[5] ^= 0x40;
        assert!(!k.verify(b"message", &bad));
    }

    #[test]
    fn keystore_lookup_by_digest() {
        let k = HmacKey::new(b"s");
        let digest = k.public_key_digest();
        let mut ks = KeyStore::default();
        assert!(!ks.has_verify_key(&digest));
        ks.register_verify_key(digest, Rc::new(k));
        assert!(ks.has_verify_key(&digest));
    }
}
