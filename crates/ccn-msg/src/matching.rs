//! The content-vs-interest match rule.

use ccnb::IndexBuf;

use crate::content::ParsedContentObject;
use crate::exclude::excluded;
use crate::interest::ParsedInterest;
use crate::name::component_at;

/// Does `content_msg` satisfy `interest_msg`?
///
/// With `implicit_digest` set, the object's SHA-256 digest counts as a
/// final, implicit name component, exactly as a forwarder would see it.
///
/// The rule, in order: the interest name must be a prefix of the object
/// name; the suffix length must lie within the interest's bounds; a
/// publisher digest in the interest must equal the object's; and the first
/// component past the prefix must not be ruled out by the Exclude set.
pub fn content_matches_interest(
    content_msg: &[u8],
    pc: &mut ParsedContentObject,
    content_comps: &IndexBuf,
    implicit_digest: bool,
    interest_msg: &[u8],
    pi: &ParsedInterest,
) -> bool {
    let name_comps = pc.name_ncomps + usize::from(implicit_digest);
    let prefix = pi.prefix_comps;
    if prefix > name_comps {
        return false;
    }
    let suffix = name_comps - prefix;
    if suffix < pi.min_suffix_comps as usize || suffix > pi.max_suffix_comps as usize {
        return false;
    }
    if let Some(wanted) = pi.publisher_key_digest(interest_msg) {
        match pc.publisher_key_digest(content_msg) {
            Ok(got) if got == wanted => {}
            _ => return false,
        }
    }
    // Compare the prefix components byte-wise over their encodings. When the
    // prefix reaches into the implicit digest, the last interest component
    // must equal the digest itself.
    let explicit_prefix = prefix.min(pc.name_ncomps);
    let Some(content_span_start) = content_comps.get(0) else {
        return prefix == 0 || explicit_prefix_matches_empty(pi);
    };
    let Some(content_span_end) = content_comps.get(explicit_prefix) else {
        return false;
    };
    let content_span = &content_msg[content_span_start..content_span_end];
    let interest_end = if explicit_prefix == prefix {
        pi.e_last_prefix_component
    } else {
        // all explicit components, digest still to check
        pi.b_last_prefix_component
    };
    let interest_span = &interest_msg[pi.b_component0..interest_end.max(pi.b_component0)];
    if prefix > 0 {
        if explicit_prefix == prefix {
            if interest_span != content_span {
                return false;
            }
        } else {
            // prefix == name_ncomps + 1: explicit part plus digest component
            if &interest_msg[pi.b_component0..pi.b_last_prefix_component] != content_span {
                return false;
            }
            let digest = pc.digest(content_msg);
            match interest_last_component(interest_msg, pi) {
                Some(last) if last == digest => {}
                _ => return false,
            }
        }
    }
    // Exclusion applies to the first component past the prefix.
    if let Some(excl) = pi.exclude(interest_msg) {
        let next: Option<Vec<u8>> = if prefix < pc.name_ncomps {
            component_at(content_msg, content_comps, prefix).map(|c| c.to_vec())
        } else if prefix == pc.name_ncomps && implicit_digest && suffix > 0 {
            Some(pc.digest(content_msg).to_vec())
        } else {
            None
        };
        if let Some(comp) = next {
            if excluded(excl, &comp) {
                return false;
            }
        }
    }
    true
}

fn explicit_prefix_matches_empty(pi: &ParsedInterest) -> bool {
    pi.prefix_comps == 0
}

fn interest_last_component(msg: &[u8], pi: &ParsedInterest) -> Option<Vec<u8>> {
    ccnb::ref_tagged_blob(
        ccnb::DTag::Component,
        msg,
        pi.b_last_prefix_component,
        pi.e_last_prefix_component,
    )
    .ok()
    .map(|c| c.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::parse_content_object;
    use crate::interest::parse_interest;
    use crate::name::Name;
    use crate::template::InterestTemplate;
    use crate::MAX_SUFFIX_COMPS;
    use ccnb::{CharBuf, DTag, Marker};

    fn test_object(name: &Name, content: &[u8]) -> Vec<u8> {
        let mut c = CharBuf::new();
        c.element_begin(DTag::ContentObject);
        c.element_begin(DTag::Signature);
        c.append_tagged_blob(DTag::SignatureBits, &[0xab; 32]);
        c.element_end();
        c.append(name.as_ccnb());
        c.element_begin(DTag::SignedInfo);
        c.append_tagged_blob(DTag::PublisherPublicKeyDigest, &[1; 32]);
        c.element_begin(DTag::Timestamp);
        c.append_timestamp_blob(Marker::None, 1_600_000_000, 0);
        c.element_end();
        c.element_end();
        c.append_tagged_blob(DTag::Content, content);
        c.element_end();
        c.into_vec()
    }

    fn simple_interest(name: &Name) -> Vec<u8> {
        InterestTemplate::new().encode(name)
    }

    fn matches(content: &[u8], interest: &[u8]) -> bool {
        let mut comps = ccnb::IndexBuf::new();
        let mut pc = parse_content_object(content, Some(&mut comps)).unwrap();
        let pi = parse_interest(interest, None).unwrap();
        content_matches_interest(content, &mut pc, &comps, true, interest, &pi)
    }

    #[test]
    fn open_interest_matches_prefix() {
        let mut cn = Name::new();
        cn.append_str("a");
        cn.append_str("b");
        cn.append_str("c");
        let content = test_object(&cn, b"data");
        let mut pn = Name::new();
        pn.append_str("a");
        pn.append_str("b");
        assert!(matches(&content, &simple_interest(&pn)));
        assert!(matches(&content, &simple_interest(&cn)));
        let root = Name::new();
        assert!(matches(&content, &simple_interest(&root)));
    }

    #[test]
    fn non_prefix_does_not_match() {
        let mut cn = Name::new();
        cn.append_str("a");
        let content = test_object(&cn, b"data");
        let mut other = Name::new();
        other.append_str("b");
        assert!(!matches(&content, &simple_interest(&other)));
        let mut longer = Name::new();
        longer.append_str("a");
        longer.append_str("b");
        // the digest component gives a/<digest>; a/b does not match it
        assert!(!matches(&content, &simple_interest(&longer)));
    }

    #[test]
    fn suffix_bounds_include_implicit_digest() {
        let mut cn = Name::new();
        cn.append_str("a");
        cn.append_str("b");
        let content = test_object(&cn, b"data");
        let mut pn = Name::new();
        pn.append_str("a");

        // suffix is 2: "b" plus the implicit digest
        let mut t = InterestTemplate::new();
        t.min_suffix_comps = Some(2);
        t.max_suffix_comps = Some(2);
        assert!(matches(&content, &t.encode(&pn)));

        let mut t = InterestTemplate::new();
        t.max_suffix_comps = Some(1);
        assert!(!matches(&content, &t.encode(&pn)));

        let mut t = InterestTemplate::new();
        t.min_suffix_comps = Some(3);
        assert!(!matches(&content, &t.encode(&pn)));
    }

    #[test]
    fn publisher_digest_must_agree() {
        let mut cn = Name::new();
        cn.append_str("a");
        let content = test_object(&cn, b"data");
        let mut t = InterestTemplate::new();
        t.publisher_key_digest = Some(vec![1u8; 32]);
        assert!(matches(&content, &t.encode(&cn)));
        let mut t = InterestTemplate::new();
        t.publisher_key_digest = Some(vec![2u8; 32]);
        assert!(!matches(&content, &t.encode(&cn)));
    }

    #[test]
    fn exclude_rules_out_next_component() {
        let mut cn = Name::new();
        cn.append_str("a");
        cn.append_str("b");
        let content = test_object(&cn, b"data");
        let mut pn = Name::new();
        pn.append_str("a");

        let mut t = InterestTemplate::new();
        let mut ex = crate::ExcludeBuilder::new();
        ex.push(b"b");
        t.exclude = ex.encode();
        assert!(!matches(&content, &t.encode(&pn)));

        // removing the entry restores the match
        let mut t = InterestTemplate::new();
        let mut ex = crate::ExcludeBuilder::new();
        ex.push(b"zz");
        t.exclude = ex.encode();
        assert!(matches(&content, &t.encode(&pn)));
    }

    #[test]
    fn full_name_plus_digest_matches() {
        let mut cn = Name::new();
        cn.append_str("a");
        let content = test_object(&cn, b"data");
        let mut comps = ccnb::IndexBuf::new();
        let mut pc = parse_content_object(&content, Some(&mut comps)).unwrap();
        let digest = pc.digest(&content);
        let mut full = Name::new();
        full.append_str("a");
        full.append(&digest);
        let mut t = InterestTemplate::new();
        t.min_suffix_comps = Some(0);
        t.max_suffix_comps = Some(0);
        let msg = t.encode(&full);
        assert!(matches(&content, &msg));
        assert_eq!(pc.name_ncomps, 1);
        assert_eq!(MAX_SUFFIX_COMPS, 32767);
    }
}
