//! ContentObject parsing.

use ccnb::{BufDecoder, DTag, IndexBuf};
use sha2::{Digest, Sha256};

use crate::error::MsgError;
use crate::name::parse_name_at;

/// ContentObject types, as their 3-byte wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ContentType {
    #[default]
    Data = 0x0C04C0,
    Encr = 0x10D091,
    Gone = 0x18E344,
    Key = 0x28463F,
    Link = 0x2C834A,
    Nack = 0x34008A,
}

impl ContentType {
    pub fn from_code(code: u64) -> Option<ContentType> {
        Some(match code {
            0x0C04C0 => ContentType::Data,
            0x10D091 => ContentType::Encr,
            0x18E344 => ContentType::Gone,
            0x28463F => ContentType::Key,
            0x2C834A => ContentType::Link,
            0x34008A => ContentType::Nack,
            _ => return None,
        })
    }
}

/// Which alternative a KeyLocator carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLocatorKind {
    None,
    Key,
    Certificate,
    KeyName,
}

/// A ContentObject described as offsets into its source bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedContentObject {
    pub type_: ContentType,
    pub name_ncomps: usize,
    pub key_locator_kind: Option<KeyLocatorKind>,

    pub b_signature: usize,
    pub b_digest_algorithm: usize,
    pub e_digest_algorithm: usize,
    pub b_witness: usize,
    pub e_witness: usize,
    pub b_signature_bits: usize,
    pub e_signature_bits: usize,
    pub e_signature: usize,
    pub b_name: usize,
    pub b_component0: usize,
    pub e_component_last: usize,
    pub e_name: usize,
    pub b_signed_info: usize,
    pub b_publisher_key_digest: usize,
    pub e_publisher_key_digest: usize,
    pub b_timestamp: usize,
    pub e_timestamp: usize,
    pub b_type: usize,
    pub e_type: usize,
    pub b_freshness_seconds: usize,
    pub e_freshness_seconds: usize,
    pub b_final_block_id: usize,
    pub e_final_block_id: usize,
    pub b_key_locator: usize,
    pub b_key_locator_payload: usize,
    pub b_keyname_name: usize,
    pub e_keyname_name: usize,
    pub b_keyname_pub: usize,
    pub e_keyname_pub: usize,
    pub e_key_locator_payload: usize,
    pub e_key_locator: usize,
    pub b_ext_opt: usize,
    pub e_ext_opt: usize,
    pub e_signed_info: usize,
    pub b_content: usize,
    pub e_content: usize,
    pub end: usize,

    /// SHA-256 of the entire encoded object; computed only when needed.
    digest: Option<[u8; 32]>,
}

impl ParsedContentObject {
    /// The Content element's payload bytes.
    pub fn content_value<'a>(&self, msg: &'a [u8]) -> crate::Result<&'a [u8]> {
        Ok(ccnb::ref_tagged_blob(
            DTag::Content,
            msg,
            self.b_content,
            self.e_content,
        )?)
    }

    /// The PublisherPublicKeyDigest blob.
    pub fn publisher_key_digest<'a>(&self, msg: &'a [u8]) -> crate::Result<&'a [u8]> {
        Ok(ccnb::ref_tagged_blob(
            DTag::PublisherPublicKeyDigest,
            msg,
            self.b_publisher_key_digest,
            self.e_publisher_key_digest,
        )?)
    }

    /// The SignatureBits blob.
    pub fn signature_bits<'a>(&self, msg: &'a [u8]) -> crate::Result<&'a [u8]> {
        Ok(ccnb::ref_tagged_blob(
            DTag::SignatureBits,
            msg,
            self.b_signature_bits,
            self.e_signature_bits,
        )?)
    }

    /// The Witness blob, when present.
    pub fn witness<'a>(&self, msg: &'a [u8]) -> Option<&'a [u8]> {
        if self.b_witness == self.e_witness {
            return None;
        }
        ccnb::ref_tagged_blob(DTag::Witness, msg, self.b_witness, self.e_witness).ok()
    }

    /// The digest algorithm name, when explicit (default is SHA256).
    pub fn digest_algorithm<'a>(&self, msg: &'a [u8]) -> Option<&'a [u8]> {
        if self.b_digest_algorithm == self.e_digest_algorithm {
            return None;
        }
        ccnb::ref_tagged_string(
            DTag::DigestAlgorithm,
            msg,
            self.b_digest_algorithm,
            self.e_digest_algorithm,
        )
        .ok()
    }

    /// The raw Key blob from the KeyLocator, when that alternative is used.
    pub fn key_locator_key<'a>(&self, msg: &'a [u8]) -> Option<&'a [u8]> {
        if self.key_locator_kind != Some(KeyLocatorKind::Key) {
            return None;
        }
        ccnb::ref_tagged_blob(
            DTag::Key,
            msg,
            self.b_key_locator_payload,
            self.e_key_locator_payload,
        )
        .ok()
    }

    /// The KeyName Name element bytes from the KeyLocator, when present.
    pub fn key_locator_keyname<'a>(&self, msg: &'a [u8]) -> Option<&'a [u8]> {
        if self.key_locator_kind != Some(KeyLocatorKind::KeyName)
            || self.b_keyname_name == self.e_keyname_name
        {
            return None;
        }
        msg.get(self.b_keyname_name..self.e_keyname_name)
    }

    /// The FinalBlockID blob, when present.
    pub fn final_block_id<'a>(&self, msg: &'a [u8]) -> Option<&'a [u8]> {
        if self.b_final_block_id == self.e_final_block_id {
            return None;
        }
        ccnb::ref_tagged_blob(
            DTag::FinalBlockID,
            msg,
            self.b_final_block_id,
            self.e_final_block_id,
        )
        .ok()
    }

    /// FreshnessSeconds, when present.
    pub fn freshness_seconds(&self, msg: &[u8]) -> Option<u64> {
        if self.b_freshness_seconds == self.e_freshness_seconds {
            return None;
        }
        ccnb::fetch_tagged_nonneg_int(
            DTag::FreshnessSeconds,
            msg,
            self.b_freshness_seconds,
            self.e_freshness_seconds,
        )
    }

    /// Does this object's last name component equal its FinalBlockID?
    pub fn is_final_block(&self, msg: &[u8], comps: &IndexBuf) -> bool {
        let Some(fbid) = self.final_block_id(msg) else {
            return false;
        };
        if self.name_ncomps == 0 {
            return false;
        }
        match crate::name::component_at(msg, comps, self.name_ncomps - 1) {
            Some(last) => last == fbid,
            None => false,
        }
    }

    /// SHA-256 digest of the entire encoded object (the implicit final name
    /// component). Computed lazily and cached.
    pub fn digest(&mut self, msg: &[u8]) -> [u8; 32] {
        if let Some(d) = self.digest {
            return d;
        }
        let mut h = Sha256::new();
        h.update(&msg[..self.end]);
        let d: [u8; 32] = h.finalize().into();
        self.digest = Some(d);
        d
    }

    /// The byte range covered by an ordinary (witness-less) signature.
    pub fn signed_span(&self) -> std::ops::Range<usize> {
        self.b_name..self.e_content
    }
}

fn parse_signature(d: &mut BufDecoder<'_>, x: &mut ParsedContentObject) -> crate::Result<()> {
    x.b_signature = d.token_index();
    if !d.match_dtag(DTag::Signature) {
        d.fail("expected Signature");
        return Err(d.error().unwrap().into());
    }
    d.advance();
    x.b_digest_algorithm = d.token_index();
    d.opt_tagged_udata(DTag::DigestAlgorithm);
    x.e_digest_algorithm = d.token_index();
    x.b_witness = d.token_index();
    d.opt_tagged_blob(DTag::Witness, 8, None);
    x.e_witness = d.token_index();
    x.b_signature_bits = d.token_index();
    d.req_tagged_blob(DTag::SignatureBits, 16, None);
    x.e_signature_bits = d.token_index();
    d.check_close();
    x.e_signature = d.token_index();
    match d.error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn parse_key_name(d: &mut BufDecoder<'_>, x: &mut ParsedContentObject) -> crate::Result<()> {
    if !d.match_dtag(DTag::KeyName) {
        d.fail("expected KeyName");
        return Err(d.error().unwrap().into());
    }
    d.advance();
    x.b_keyname_name = d.token_index();
    parse_name_at(d, None)?;
    x.e_keyname_name = d.token_index();
    x.b_keyname_pub = d.token_index();
    if d.match_dtag(DTag::PublisherPublicKeyDigest)
        || d.match_dtag(DTag::PublisherCertificateDigest)
        || d.match_dtag(DTag::PublisherIssuerKeyDigest)
        || d.match_dtag(DTag::PublisherIssuerCertificateDigest)
    {
        d.advance();
        if d.match_some_blob() {
            d.advance();
        }
        d.check_close();
    }
    x.e_keyname_pub = d.token_index();
    d.check_close();
    match d.error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn parse_signed_info(d: &mut BufDecoder<'_>, x: &mut ParsedContentObject) -> crate::Result<()> {
    x.b_signed_info = d.token_index();
    if !d.match_dtag(DTag::SignedInfo) {
        d.fail("expected SignedInfo");
        return Err(d.error().unwrap().into());
    }
    d.advance();
    x.b_publisher_key_digest = d.token_index();
    d.req_tagged_blob(DTag::PublisherPublicKeyDigest, 16, Some(64));
    x.e_publisher_key_digest = d.token_index();

    x.b_timestamp = d.token_index();
    d.req_tagged_timestamp(DTag::Timestamp);
    x.e_timestamp = d.token_index();

    x.b_type = d.token_index();
    let code = d.opt_tagged_binary_number(DTag::Type, 3, 3, ContentType::Data as u64);
    x.e_type = d.token_index();
    if d.failed() {
        return Err(d.error().unwrap().into());
    }
    x.type_ = ContentType::from_code(code).ok_or(MsgError::Schema("unknown content Type"))?;

    x.b_freshness_seconds = d.token_index();
    d.opt_tagged_nonneg_int(DTag::FreshnessSeconds);
    x.e_freshness_seconds = d.token_index();

    x.b_final_block_id = d.token_index();
    d.opt_tagged_blob(DTag::FinalBlockID, 1, None);
    x.e_final_block_id = d.token_index();

    x.b_key_locator = d.token_index();
    x.b_key_locator_payload = d.token_index();
    x.e_key_locator_payload = d.token_index();
    x.b_keyname_name = d.token_index();
    x.e_keyname_name = d.token_index();
    x.b_keyname_pub = d.token_index();
    x.e_keyname_pub = d.token_index();
    if d.match_dtag(DTag::KeyLocator) {
        d.advance();
        x.b_key_locator_payload = d.token_index();
        if d.match_dtag(DTag::Key) {
            d.req_tagged_blob(DTag::Key, 0, None);
            x.key_locator_kind = Some(KeyLocatorKind::Key);
        } else if d.match_dtag(DTag::Certificate) {
            d.req_tagged_blob(DTag::Certificate, 0, None);
            x.key_locator_kind = Some(KeyLocatorKind::Certificate);
        } else {
            parse_key_name(d, x)?;
            x.key_locator_kind = Some(KeyLocatorKind::KeyName);
        }
        x.e_key_locator_payload = d.token_index();
        d.check_close();
    } else {
        x.key_locator_kind = Some(KeyLocatorKind::None);
    }
    x.e_key_locator = d.token_index();

    x.b_ext_opt = d.token_index();
    d.opt_tagged_blob(DTag::ExtOpt, 0, None);
    x.e_ext_opt = d.token_index();

    d.check_close();
    x.e_signed_info = d.token_index();
    match d.error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Parse an encoded ContentObject.
///
/// `components`, when given, receives the byte index of each Component of
/// the Name plus a final index just past the last one.
pub fn parse_content_object(
    msg: &[u8],
    components: Option<&mut IndexBuf>,
) -> crate::Result<ParsedContentObject> {
    let mut d = BufDecoder::new(msg);
    let mut x = ParsedContentObject::default();
    if !d.match_dtag(DTag::ContentObject) {
        return Err(MsgError::WrongMessageType("ContentObject"));
    }
    d.advance();
    parse_signature(&mut d, &mut x)?;
    x.b_name = d.token_index();
    x.b_component0 = d.index();
    x.name_ncomps = parse_name_at(&mut d, components)?;
    x.e_component_last = d.token_index().saturating_sub(1);
    x.e_name = d.token_index();
    parse_signed_info(&mut d, &mut x)?;
    x.b_content = d.token_index();
    d.req_tagged_blob(DTag::Content, 0, None);
    x.e_content = d.token_index();
    d.check_close();
    x.end = d.index();
    if let Some(e) = d.error() {
        return Err(e.into());
    }
    if !d.at_end() {
        return Err(MsgError::Schema("trailing bytes after ContentObject"));
    }
    Ok(x)
}
