//! Hierarchical names and the canonical component ordering.

use ccnb::{BufDecoder, CharBuf, DTag, IndexBuf, Marker};
use rand::RngCore;

use crate::error::MsgError;

/// A ccnb-encoded Name under construction.
///
/// The buffer always holds exactly one well-formed `Name` element; appending
/// a component rewrites the trailing closer. Components are opaque byte
/// strings with no escaping at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    buf: CharBuf,
}

impl Default for Name {
    fn default() -> Self {
        Name::new()
    }
}

impl Name {
    /// An empty Name (`<Name></Name>`).
    pub fn new() -> Name {
        let mut buf = CharBuf::new();
        buf.element_begin(DTag::Name);
        buf.element_end();
        Name { buf }
    }

    /// Adopt an already-encoded Name element, validating it.
    pub fn from_ccnb(bytes: &[u8]) -> crate::Result<Name> {
        let n = Name {
            buf: CharBuf::from_slice(bytes),
        };
        n.split(None)?;
        Ok(n)
    }

    pub fn as_ccnb(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        // an empty Name element is still two bytes long
        self.count().unwrap_or(0) == 0
    }

    fn open(&mut self) {
        let len = self.buf.len();
        assert!(len >= 2, "damaged name buffer");
        self.buf.truncate(len - 1);
    }

    fn close(&mut self) {
        self.buf.element_end();
    }

    /// Append one component of arbitrary bytes.
    pub fn append(&mut self, component: &[u8]) {
        self.open();
        self.buf.append_tagged_blob(DTag::Component, component);
        self.close();
    }

    /// Append a component from a string, bytes taken verbatim.
    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Append a marked numeric component: the marker byte followed by the
    /// big-endian value bytes, none at all for zero.
    pub fn append_numeric(&mut self, marker: Marker, value: u64) {
        let mut comp = Vec::with_capacity(9);
        if let Some(m) = marker.byte() {
            comp.push(m);
        }
        let mut started = false;
        for i in (0..8).rev() {
            let b = (value >> (8 * i)) as u8;
            if started || b != 0 {
                comp.push(b);
                started = true;
            }
        }
        self.append(&comp);
    }

    /// Append a nonce component (`%C1.N.n` prefix plus 6 random bytes).
    pub fn append_nonce(&mut self) {
        let mut comp = [0u8; 6 + 6];
        comp[..6].copy_from_slice(&[0xC1, b'.', b'N', 0x00, b'n', 0x00]);
        rand::thread_rng().fill_bytes(&mut comp[6..]);
        self.append(&comp);
    }

    /// Append the encoded Component elements found in `ccnb[start..stop]`.
    pub fn append_components(
        &mut self,
        ccnb: &[u8],
        start: usize,
        stop: usize,
    ) -> crate::Result<()> {
        if stop < start || stop > ccnb.len() {
            return Err(MsgError::Schema("bad component range"));
        }
        // validate before splicing raw bytes in
        let mut probe = Name::new();
        probe.open();
        probe.buf.append(&ccnb[start..stop]);
        probe.close();
        probe.split(None)?;
        self.open();
        self.buf.append(&ccnb[start..stop]);
        self.close();
        Ok(())
    }

    /// Find component boundaries; returns the component count.
    ///
    /// When `components` is given it receives the start offset of each
    /// Component element plus one tail offset past the last one.
    pub fn split(&self, components: Option<&mut IndexBuf>) -> crate::Result<usize> {
        parse_name_at(&mut BufDecoder::new(self.buf.as_slice()), components)
    }

    /// Number of components.
    pub fn count(&self) -> crate::Result<usize> {
        self.split(None)
    }

    /// Component `i` as raw bytes.
    pub fn component(&self, i: usize) -> Option<Vec<u8>> {
        let mut comps = IndexBuf::new();
        self.split(Some(&mut comps)).ok()?;
        component_at(self.buf.as_slice(), &comps, i).map(|c| c.to_vec())
    }

    /// Keep only the first `n` components; negative `n` removes from the
    /// tail (`-1` drops just the last component). Returns the new count.
    pub fn chop(&mut self, n: isize) -> crate::Result<usize> {
        let mut comps = IndexBuf::new();
        let ncomp = self.split(Some(&mut comps))? as isize;
        let keep = if n < 0 { ncomp + n } else { n };
        if keep < 0 || keep > ncomp {
            return Err(MsgError::Schema("chop count out of range"));
        }
        let end = comps[keep as usize];
        self.buf.truncate(end);
        self.close();
        Ok(keep as usize)
    }

    /// Replace the final component with its successor in canonical order:
    /// increment the last byte, extending with a zero byte on overflow.
    pub fn next_sibling(&mut self) -> crate::Result<()> {
        let mut comps = IndexBuf::new();
        let ncomp = self.split(Some(&mut comps))?;
        if ncomp == 0 {
            return Err(MsgError::Schema("no component to advance"));
        }
        let mut last = self
            .component(ncomp - 1)
            .ok_or(MsgError::Schema("no component to advance"))?;
        let mut carry = true;
        for b in last.iter_mut().rev() {
            let (v, c) = b.overflowing_add(1);
            *b = v;
            if !c {
                carry = false;
                break;
            }
        }
        if carry {
            last.iter_mut().for_each(|b| *b = 0);
            last.push(0);
        }
        self.chop(ncomp as isize - 1)?;
        self.append(&last);
        Ok(())
    }

    /// Canonical comparison against another name.
    pub fn compare(&self, other: &Name) -> std::cmp::Ordering {
        match compare_names(self.as_ccnb(), other.as_ccnb()) {
            x if x < 0 => std::cmp::Ordering::Less,
            0 => std::cmp::Ordering::Equal,
            _ => std::cmp::Ordering::Greater,
        }
    }

    /// Does `other` extend this name (or equal it)?
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        let a = self.inner_bytes();
        let b = other.inner_bytes();
        b.starts_with(a)
    }

    /// The encoded component run, without the Name element framing.
    pub fn inner_bytes(&self) -> &[u8] {
        let s = self.buf.as_slice();
        &s[1..s.len() - 1]
    }
}

/// Parse a Name element at the decoder's position, recording component
/// boundaries. Returns the component count.
pub fn parse_name_at(
    d: &mut BufDecoder<'_>,
    components: Option<&mut IndexBuf>,
) -> crate::Result<usize> {
    let mut ncomp = 0usize;
    let mut comps = components;
    if let Some(c) = comps.as_deref_mut() {
        c.clear();
    }
    if d.match_dtag(DTag::Name) {
        d.advance();
        while d.match_dtag(DTag::Component) {
            if let Some(c) = comps.as_deref_mut() {
                c.push(d.token_index());
            }
            ncomp += 1;
            d.advance();
            if d.match_some_blob() {
                d.advance();
            }
            d.check_close();
        }
        if let Some(c) = comps.as_deref_mut() {
            c.push(d.token_index());
        }
        d.check_close();
    } else {
        d.fail("expected Name");
    }
    match d.error() {
        Some(e) => Err(e.into()),
        None => Ok(ncomp),
    }
}

/// Decode the component starting at `comps[i]` inside `buf`.
pub fn component_at<'a>(buf: &'a [u8], comps: &IndexBuf, i: usize) -> Option<&'a [u8]> {
    if i + 1 >= comps.len() {
        return None;
    }
    let start = comps[i];
    let stop = comps[i + 1];
    ccnb::ref_tagged_blob(DTag::Component, buf, start, stop).ok()
}

fn skip_to_components<'a>(buf: &'a [u8]) -> BufDecoder<'a> {
    let mut d = BufDecoder::new(buf);
    // also accepts Interest/ContentObject wrappers, skipping the Signature
    loop {
        if d.match_dtag(DTag::Name) {
            d.advance();
            return d;
        }
        if d.match_dtag(DTag::Interest) || d.match_dtag(DTag::ContentObject) {
            d.advance();
            if d.match_dtag(DTag::Signature) {
                let _ = d.advance_past_element();
            }
            continue;
        }
        return d;
    }
}

/// Canonical ordering over encoded Name, Interest, or ContentObject buffers:
/// component count is not compared directly; the walk ends at the first
/// differing component, shorter-component-first, then bytewise.
pub fn compare_names(a: &[u8], b: &[u8]) -> i32 {
    let mut da = skip_to_components(a);
    let mut db = skip_to_components(b);
    loop {
        let more_a = da.match_dtag(DTag::Component);
        let more_b = db.match_dtag(DTag::Component);
        if !more_a || !more_b {
            return (more_a as i32) - (more_b as i32);
        }
        da.advance();
        db.advance();
        let ca = da.match_blob().unwrap_or(&[]);
        let cb = db.match_blob().unwrap_or(&[]);
        if da.match_some_blob() {
            da.advance();
        }
        if db.match_some_blob() {
            db.advance();
        }
        let cmp = match ca.len().cmp(&cb.len()) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Equal => match ca.cmp(cb) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Equal => 0,
            },
        };
        if cmp != 0 {
            return cmp;
        }
        da.check_close();
        db.check_close();
    }
}

/// Canonical ordering over raw component byte strings.
pub fn compare_components(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(parts: &[&[u8]]) -> Name {
        let mut n = Name::new();
        for p in parts {
            n.append(p);
        }
        n
    }

    #[test]
    fn empty_name_has_no_components() {
        let n = Name::new();
        assert_eq!(n.count().unwrap(), 0);
        assert!(n.is_empty());
        assert_eq!(n.as_ccnb().len(), 2);
    }

    #[test]
    fn split_records_boundaries() {
        let n = name(&[b"a", b"bc", b""]);
        let mut comps = IndexBuf::new();
        assert_eq!(n.split(Some(&mut comps)).unwrap(), 3);
        assert_eq!(comps.len(), 4);
        assert_eq!(component_at(n.as_ccnb(), &comps, 0).unwrap(), b"a");
        assert_eq!(component_at(n.as_ccnb(), &comps, 1).unwrap(), b"bc");
        assert_eq!(component_at(n.as_ccnb(), &comps, 2).unwrap(), b"");
        assert!(component_at(n.as_ccnb(), &comps, 3).is_none());
    }

    #[test]
    fn canonical_order_length_before_bytes() {
        let a = name(&[b"z"]);
        let b = name(&[b"aa"]);
        assert!(compare_names(a.as_ccnb(), b.as_ccnb()) < 0);
        let c = name(&[b"ab"]);
        assert!(compare_names(b.as_ccnb(), c.as_ccnb()) < 0);
        assert_eq!(compare_names(a.as_ccnb(), a.as_ccnb()), 0);
    }

    #[test]
    fn canonical_order_prefix_is_less() {
        let a = name(&[b"a"]);
        let b = name(&[b"a", b"b"]);
        assert!(compare_names(a.as_ccnb(), b.as_ccnb()) < 0);
        assert!(compare_names(b.as_ccnb(), a.as_ccnb()) > 0);
    }

    #[test]
    fn order_is_transitive_on_samples() {
        let samples = vec![
            name(&[]),
            name(&[b""]),
            name(&[b"a"]),
            name(&[b"b"]),
            name(&[b"aa"]),
            name(&[b"a", b"a"]),
            name(&[b"a", b"b"]),
            name(&[b"ab", b"c"]),
        ];
        for x in &samples {
            for y in &samples {
                let xy = compare_names(x.as_ccnb(), y.as_ccnb());
                let yx = compare_names(y.as_ccnb(), x.as_ccnb());
                assert_eq!(xy.signum(), -yx.signum());
                for z in &samples {
                    let yz = compare_names(y.as_ccnb(), z.as_ccnb());
                    let xz = compare_names(x.as_ccnb(), z.as_ccnb());
                    if xy < 0 && yz < 0 {
                        assert!(xz < 0);
                    }
                }
            }
        }
    }

    #[test]
    fn chop_and_negative_chop() {
        let mut n = name(&[b"a", b"b", b"c"]);
        assert_eq!(n.chop(-1).unwrap(), 2);
        assert_eq!(n.count().unwrap(), 2);
        assert_eq!(n.chop(1).unwrap(), 1);
        assert_eq!(n.component(0).unwrap(), b"a");
    }

    #[test]
    fn numeric_components_carry_marker() {
        let mut n = Name::new();
        n.append_numeric(Marker::Seqnum, 0x42);
        assert_eq!(n.component(0).unwrap(), &[0x00, 0x42]);
        let mut v = Name::new();
        v.append_numeric(Marker::Version, 0x1020);
        assert_eq!(v.component(0).unwrap(), &[0xFD, 0x10, 0x20]);
        let mut z = Name::new();
        z.append_numeric(Marker::Seqnum, 0);
        assert_eq!(z.component(0).unwrap(), &[0x00]);
    }

    #[test]
    fn nonce_components_differ() {
        let mut a = Name::new();
        a.append_nonce();
        let mut b = Name::new();
        b.append_nonce();
        assert_ne!(a.component(0).unwrap(), b.component(0).unwrap());
        assert!(a.component(0).unwrap().starts_with(&[0xC1, b'.', b'N']));
    }

    #[test]
    fn next_sibling_increments_and_extends() {
        let mut n = name(&[b"a", b"\x01\xff"]);
        n.next_sibling().unwrap();
        assert_eq!(n.component(1).unwrap(), &[0x02, 0x00]);
        let mut m = name(&[b"\xff"]);
        m.next_sibling().unwrap();
        assert_eq!(m.component(0).unwrap(), &[0x00, 0x00]);
    }

    #[test]
    fn append_components_validates() {
        let src = name(&[b"x", b"y"]);
        let inner = src.inner_bytes().to_vec();
        let mut dst = name(&[b"p"]);
        dst.append_components(&inner, 0, inner.len()).unwrap();
        assert_eq!(dst.count().unwrap(), 3);
        assert_eq!(dst.component(2).unwrap(), b"y");
        assert!(dst.append_components(&inner, 0, 1).is_err());
    }

    #[test]
    fn prefix_check_uses_whole_components() {
        let a = name(&[b"ab"]);
        let b = name(&[b"ab", b"c"]);
        let c = name(&[b"abc"]);
        assert!(a.is_prefix_of(&b));
        assert!(!a.is_prefix_of(&c));
    }
}
