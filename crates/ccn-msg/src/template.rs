//! Interest construction.

use ccnb::{CharBuf, DTag};

use crate::interest::AnswerOriginKind;
use crate::name::Name;

/// The optional fields of an Interest, used both to build standalone
/// interests and as the *template* whose field block (everything between the
/// Name and the nonce area) is copied into interests expressed by the
/// client.
#[derive(Debug, Default, Clone)]
pub struct InterestTemplate {
    pub min_suffix_comps: Option<u32>,
    pub max_suffix_comps: Option<u32>,
    pub publisher_key_digest: Option<Vec<u8>>,
    /// A complete encoded Exclude element.
    pub exclude: Option<Vec<u8>>,
    pub child_selector: Option<u32>,
    pub answer_origin_kind: Option<AnswerOriginKind>,
    pub scope: Option<u8>,
    /// Interest lifetime in 2^-12 second units.
    pub lifetime_units: Option<u64>,
    pub nonce: Option<Vec<u8>>,
}

impl InterestTemplate {
    pub fn new() -> InterestTemplate {
        InterestTemplate::default()
    }

    /// Encode a complete Interest carrying `name` and these fields.
    pub fn encode(&self, name: &Name) -> Vec<u8> {
        let mut c = CharBuf::new();
        c.element_begin(DTag::Interest);
        c.append(name.as_ccnb());
        self.append_fields(&mut c);
        if let Some(nonce) = &self.nonce {
            c.append_tagged_blob(DTag::Nonce, nonce);
        }
        c.element_end();
        c.into_vec()
    }

    /// Append just the field block (no Name, no Nonce, no framing).
    pub fn append_fields(&self, c: &mut CharBuf) {
        if let Some(v) = self.min_suffix_comps {
            c.append_tagged_number(DTag::MinSuffixComponents, u64::from(v));
        }
        if let Some(v) = self.max_suffix_comps {
            c.append_tagged_number(DTag::MaxSuffixComponents, u64::from(v));
        }
        if let Some(pub_digest) = &self.publisher_key_digest {
            c.append_tagged_blob(DTag::PublisherPublicKeyDigest, pub_digest);
        }
        if let Some(excl) = &self.exclude {
            c.append(excl);
        }
        if let Some(v) = self.child_selector {
            c.append_tagged_number(DTag::ChildSelector, u64::from(v));
        }
        if let Some(v) = self.answer_origin_kind {
            c.append_tagged_number(DTag::AnswerOriginKind, u64::from(v.0));
        }
        if let Some(v) = self.scope {
            c.append_tagged_number(DTag::Scope, u64::from(v));
        }
        if let Some(units) = self.lifetime_units {
            let mut buf = [0u8; 8];
            let mut pos = buf.len();
            let mut v = units;
            while v != 0 && pos > 0 {
                pos -= 1;
                buf[pos] = (v & 0xff) as u8;
                v >>= 8;
            }
            if pos == buf.len() {
                pos -= 1;
            }
            c.append_tagged_blob(DTag::InterestLifetime, &buf[pos..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interest::parse_interest;

    #[test]
    fn default_template_is_bare_interest() {
        let mut n = Name::new();
        n.append_str("a");
        let msg = InterestTemplate::new().encode(&n);
        let pi = parse_interest(&msg, None).unwrap();
        assert_eq!(pi.prefix_comps, 1);
        assert_eq!(pi.b_min_suffix_comps, pi.e_min_suffix_comps);
    }

    #[test]
    fn lifetime_encodes_minimal_width() {
        let mut n = Name::new();
        n.append_str("a");
        let mut t = InterestTemplate::new();
        t.lifetime_units = Some(1 << 12); // one second
        let msg = t.encode(&n);
        let pi = parse_interest(&msg, None).unwrap();
        assert_eq!(pi.lifetime(&msg), 1 << 12);
        assert_eq!(pi.lifetime_seconds(&msg), 1);
    }

    #[test]
    fn nonce_round_trips() {
        let mut n = Name::new();
        n.append_str("a");
        let mut t = InterestTemplate::new();
        t.nonce = Some(vec![9, 8, 7, 6]);
        let msg = t.encode(&n);
        let pi = parse_interest(&msg, None).unwrap();
        assert!(pi.b_nonce < pi.e_nonce);
    }
}
