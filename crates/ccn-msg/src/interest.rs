//! Interest parsing.

use ccnb::{BufDecoder, DTag, IndexBuf};

use crate::error::MsgError;
use crate::name::parse_name_at;
use crate::{INTEREST_LIFETIME_SEC, MAX_SUFFIX_COMPS};

/// AnswerOriginKind bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOriginKind(pub u32);

impl AnswerOriginKind {
    /// Answer may come from the content store.
    pub const CS: u32 = 0x1;
    /// Producing new content is acceptable.
    pub const NEW: u32 = 0x2;
    /// Stale content is acceptable.
    pub const STALE: u32 = 0x4;
    /// Mark the matched content stale (requires scope 0).
    pub const MARK_STALE: u32 = 0x10;

    pub const DEFAULT: AnswerOriginKind = AnswerOriginKind(Self::CS | Self::NEW);

    pub fn from_content_store(self) -> bool {
        self.0 & Self::CS != 0
    }
    pub fn new_ok(self) -> bool {
        self.0 & Self::NEW != 0
    }
    pub fn stale_ok(self) -> bool {
        self.0 & Self::STALE != 0
    }
    pub fn mark_stale(self) -> bool {
        self.0 & Self::MARK_STALE != 0
    }
}

impl Default for AnswerOriginKind {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which child a forwarder should prefer when several match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildSelector {
    #[default]
    Leftmost,
    Rightmost,
}

/// An Interest described as offsets into its source bytes.
///
/// Every `b_*`/`e_*` pair brackets one element; an omitted element has its
/// begin and end offsets equal, and offsets are non-decreasing across the
/// struct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedInterest {
    /// Number of name components in the prefix (all of them).
    pub prefix_comps: usize,
    pub min_suffix_comps: u32,
    pub max_suffix_comps: u32,
    pub child_selector: ChildSelector,
    pub answer_origin_kind: AnswerOriginKind,
    /// Scope 0..=9, or `None` when absent.
    pub scope: Option<u8>,

    pub b_name: usize,
    pub b_component0: usize,
    pub b_last_prefix_component: usize,
    pub e_last_prefix_component: usize,
    pub e_name: usize,
    pub b_min_suffix_comps: usize,
    pub e_min_suffix_comps: usize,
    pub b_max_suffix_comps: usize,
    pub e_max_suffix_comps: usize,
    pub b_publisher_id: usize,
    pub b_publisher_id_key_digest: usize,
    pub e_publisher_id_key_digest: usize,
    pub e_publisher_id: usize,
    pub b_exclude: usize,
    pub e_exclude: usize,
    pub b_child_selector: usize,
    pub e_child_selector: usize,
    pub b_answer_origin_kind: usize,
    pub e_answer_origin_kind: usize,
    pub b_scope: usize,
    pub e_scope: usize,
    pub b_lifetime: usize,
    pub e_lifetime: usize,
    pub b_nonce: usize,
    pub e_nonce: usize,
    pub b_other: usize,
    pub e_other: usize,
    pub end: usize,
}

impl ParsedInterest {
    /// The PublisherPublicKeyDigest blob, when one was present.
    pub fn publisher_key_digest<'a>(&self, msg: &'a [u8]) -> Option<&'a [u8]> {
        if self.b_publisher_id_key_digest == self.e_publisher_id_key_digest {
            return None;
        }
        ccnb::ref_tagged_blob(
            DTag::PublisherPublicKeyDigest,
            msg,
            self.b_publisher_id_key_digest,
            self.e_publisher_id_key_digest,
        )
        .ok()
    }

    /// The Exclude element's bytes, when present.
    pub fn exclude<'a>(&self, msg: &'a [u8]) -> Option<&'a [u8]> {
        if self.b_exclude == self.e_exclude {
            None
        } else {
            msg.get(self.b_exclude..self.e_exclude)
        }
    }

    /// Interest lifetime in 2^-12 second units (default 4 s).
    pub fn lifetime(&self, msg: &[u8]) -> u64 {
        if self.b_lifetime == self.e_lifetime {
            return INTEREST_LIFETIME_SEC << 12;
        }
        match ccnb::ref_tagged_blob(DTag::InterestLifetime, msg, self.b_lifetime, self.e_lifetime)
        {
            Ok(blob) => blob.iter().fold(0u64, |v, &b| (v << 8) | u64::from(b)),
            Err(_) => INTEREST_LIFETIME_SEC << 12,
        }
    }

    /// Interest lifetime in whole seconds, fraction truncated.
    pub fn lifetime_seconds(&self, msg: &[u8]) -> u64 {
        self.lifetime(msg) >> 12
    }
}

/// Parse an encoded Interest.
///
/// `components`, when given, receives the byte index of each Component of
/// the Name plus a final index just past the last one. Returns the parsed
/// offset table; the component count is `prefix_comps`.
pub fn parse_interest(
    msg: &[u8],
    components: Option<&mut IndexBuf>,
) -> crate::Result<ParsedInterest> {
    let mut local = IndexBuf::new();
    let comps = match components {
        Some(c) => c,
        None => &mut local,
    };
    let mut d = BufDecoder::new(msg);
    let mut pi = ParsedInterest {
        min_suffix_comps: 0,
        max_suffix_comps: MAX_SUFFIX_COMPS,
        ..Default::default()
    };
    if !d.match_dtag(DTag::Interest) {
        return Err(MsgError::WrongMessageType("Interest"));
    }
    d.advance();
    pi.b_name = d.element_index();
    pi.b_component0 = d.index();
    let ncomp = parse_name_at(&mut d, Some(comps))?;
    pi.prefix_comps = ncomp;
    pi.e_name = d.token_index();
    pi.b_last_prefix_component = comps[if ncomp > 0 { ncomp - 1 } else { 0 }];
    pi.e_last_prefix_component = comps[ncomp];

    if d.match_dtag(DTag::NameComponentCount) {
        return Err(MsgError::Downrev("NameComponentCount"));
    }

    pi.b_min_suffix_comps = d.token_index();
    if let Some(v) = d.opt_tagged_nonneg_int(DTag::MinSuffixComponents) {
        pi.min_suffix_comps = v.min(u64::from(u32::MAX)) as u32;
    }
    pi.e_min_suffix_comps = d.token_index();

    pi.b_max_suffix_comps = d.token_index();
    if let Some(v) = d.opt_tagged_nonneg_int(DTag::MaxSuffixComponents) {
        pi.max_suffix_comps = v.min(u64::from(u32::MAX)) as u32;
    }
    pi.e_max_suffix_comps = d.token_index();
    if d.failed() {
        return Err(d.error().unwrap().into());
    }
    if pi.max_suffix_comps < pi.min_suffix_comps {
        return Err(MsgError::Policy("MinSuffixComponents > MaxSuffixComponents"));
    }

    parse_publisher_id(&mut d, &mut pi)?;

    pi.b_exclude = d.token_index();
    if d.match_dtag(DTag::Exclude) {
        crate::exclude::parse_exclude(&mut d)?;
    }
    pi.e_exclude = d.token_index();

    pi.b_child_selector = d.token_index();
    let child = d.opt_tagged_nonneg_int(DTag::ChildSelector);
    pi.e_child_selector = d.token_index();
    if let Some(v) = child {
        if v > 5 {
            return Err(MsgError::Policy("ChildSelector out of range"));
        }
        pi.child_selector = if v & 1 == 1 {
            ChildSelector::Rightmost
        } else {
            ChildSelector::Leftmost
        };
    }

    pi.b_answer_origin_kind = d.token_index();
    let aok = d.opt_tagged_nonneg_int(DTag::AnswerOriginKind);
    pi.e_answer_origin_kind = d.token_index();
    if let Some(v) = aok {
        let v = AnswerOriginKind(v.min(u64::from(u32::MAX)) as u32);
        if v.new_ok() && !v.from_content_store() {
            return Err(MsgError::Policy("NEW_OK requires FROM_CONTENT_STORE"));
        }
        pi.answer_origin_kind = v;
    }

    pi.b_scope = d.token_index();
    let scope = d.opt_tagged_nonneg_int(DTag::Scope);
    pi.e_scope = d.token_index();
    if let Some(v) = scope {
        if v > 9 {
            return Err(MsgError::Policy("Scope out of range"));
        }
        pi.scope = Some(v as u8);
    }
    if pi.answer_origin_kind.mark_stale() && pi.scope != Some(0) {
        return Err(MsgError::Policy("MARK_STALE requires Scope 0"));
    }

    pi.b_lifetime = d.token_index();
    d.opt_tagged_blob(DTag::InterestLifetime, 1, Some(7));
    pi.e_lifetime = d.token_index();

    pi.b_nonce = d.token_index();
    d.opt_tagged_blob(DTag::Nonce, 4, Some(64));
    pi.e_nonce = d.token_index();

    pi.b_other = d.token_index();
    d.opt_tagged_blob(DTag::ExperimentalResponseFilter, 9, Some(1024 + 8));
    pi.e_other = d.token_index();

    d.check_close();
    pi.end = d.index();
    if let Some(e) = d.error() {
        return Err(e.into());
    }
    if !d.at_end() {
        return Err(MsgError::Schema("trailing bytes after Interest"));
    }
    Ok(pi)
}

fn parse_publisher_id(d: &mut BufDecoder<'_>, pi: &mut ParsedInterest) -> crate::Result<()> {
    let pubstart = d.token_index();
    let mut keystart = pubstart;
    let mut keyend = pubstart;
    let mut pubend = pubstart;
    let iskey = d.match_dtag(DTag::PublisherPublicKeyDigest);
    if iskey
        || d.match_dtag(DTag::PublisherCertificateDigest)
        || d.match_dtag(DTag::PublisherIssuerKeyDigest)
        || d.match_dtag(DTag::PublisherIssuerCertificateDigest)
    {
        d.advance();
        keystart = d.token_index();
        if d.match_blob().is_none() {
            return Err(MsgError::Schema("publisher digest must be a blob"));
        }
        let len = d.match_blob().map(|b| b.len()).unwrap_or(0);
        if !(16..=64).contains(&len) {
            return Err(MsgError::Schema("publisher digest length out of range"));
        }
        d.advance();
        keyend = d.token_index();
        d.check_close();
        pubend = d.token_index();
        if let Some(e) = d.error() {
            return Err(e.into());
        }
    }
    pi.b_publisher_id = pubstart;
    pi.b_publisher_id_key_digest = keystart;
    pi.e_publisher_id_key_digest = if iskey { keyend } else { keystart };
    pi.e_publisher_id = pubend;
    Ok(())
}
