//! Exclude sets: sorted component runs with wildcard gaps.

use ccnb::{BufDecoder, CharBuf, DTag};

use crate::error::MsgError;
use crate::name::compare_components;

/// Validate an Exclude element at the decoder's position and consume it.
///
/// Grammar: `Exclude ::= (Any | Bloom)? (Component (Any | Bloom)?)+`
/// Bloom filters are accepted on the wire but evaluated as `Any` gaps; see
/// the exclusion walk below.
pub fn parse_exclude(d: &mut BufDecoder<'_>) -> crate::Result<()> {
    if !d.match_dtag(DTag::Exclude) {
        d.fail("expected Exclude");
        return Err(d.error().unwrap().into());
    }
    d.advance();
    parse_gap(d)?;
    let mut seen = false;
    while d.match_dtag(DTag::Component) {
        seen = true;
        d.req_tagged_blob(DTag::Component, 0, None);
        parse_gap(d)?;
    }
    d.check_close();
    if let Some(e) = d.error() {
        return Err(e.into());
    }
    if !seen {
        return Err(MsgError::Schema("empty Exclude"));
    }
    Ok(())
}

fn parse_gap(d: &mut BufDecoder<'_>) -> crate::Result<()> {
    if d.match_dtag(DTag::Any) {
        d.advance();
        d.check_close();
    } else if d.match_dtag(DTag::Bloom) {
        d.req_tagged_blob(DTag::Bloom, 1, Some(1024 + 8));
    }
    match d.error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Is `candidate` ruled out by the Exclude element in `excl`?
///
/// The walk tracks the gap preceding the next explicit entry: a candidate
/// that compares below the next entry is excluded exactly when that gap is
/// wild; a candidate equal to an entry is always excluded.
pub fn excluded(excl: &[u8], candidate: &[u8]) -> bool {
    let mut d = BufDecoder::new(excl);
    if !d.match_dtag(DTag::Exclude) {
        return false;
    }
    d.advance();
    let mut gap_is_wild = read_gap(&mut d);
    while d.match_dtag(DTag::Component) {
        d.advance();
        let comp = d.match_blob().unwrap_or(&[]);
        if d.match_some_blob() {
            d.advance();
        }
        d.check_close();
        if d.failed() {
            return false;
        }
        match compare_components(candidate, comp) {
            std::cmp::Ordering::Less => return gap_is_wild,
            std::cmp::Ordering::Equal => return true,
            std::cmp::Ordering::Greater => {}
        }
        gap_is_wild = read_gap(&mut d);
    }
    // candidate is above every explicit entry
    gap_is_wild
}

fn read_gap(d: &mut BufDecoder<'_>) -> bool {
    if d.match_dtag(DTag::Any) {
        d.advance();
        d.check_close();
        true
    } else if d.match_dtag(DTag::Bloom) {
        // Blooms are deprecated on this side; treat as match-everything.
        let _ = d.req_tagged_blob(DTag::Bloom, 1, Some(1024 + 8));
        true
    } else {
        false
    }
}

/// Builds a sorted Exclude element from raw component values.
#[derive(Debug, Default, Clone)]
pub struct ExcludeBuilder {
    components: Vec<Vec<u8>>,
    any_before: bool,
    any_after: bool,
}

impl ExcludeBuilder {
    pub fn new() -> ExcludeBuilder {
        ExcludeBuilder::default()
    }

    /// Exclude everything below the first explicit entry.
    pub fn any_before(&mut self) -> &mut Self {
        self.any_before = true;
        self
    }

    /// Exclude everything above the last explicit entry.
    pub fn any_after(&mut self) -> &mut Self {
        self.any_after = true;
        self
    }

    pub fn push(&mut self, component: &[u8]) -> &mut Self {
        self.components.push(component.to_vec());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Encoded size of what [`encode`](Self::encode) would emit, roughly.
    pub fn encoded_len_estimate(&self) -> usize {
        self.components.iter().map(|c| c.len() + 8).sum()
    }

    /// Emit the Exclude element with entries in canonical order, duplicates
    /// removed. Returns `None` when there are no entries.
    pub fn encode(&self) -> Option<Vec<u8>> {
        if self.components.is_empty() {
            return None;
        }
        let mut comps = self.components.clone();
        comps.sort_by(|a, b| compare_components(a, b));
        comps.dedup();
        let mut c = CharBuf::new();
        c.element_begin(DTag::Exclude);
        if self.any_before {
            c.element_begin(DTag::Any);
            c.element_end();
        }
        for comp in &comps {
            c.append_tagged_blob(DTag::Component, comp);
        }
        if self.any_after {
            c.element_begin(DTag::Any);
            c.element_end();
        }
        c.element_end();
        Some(c.into_vec())
    }
}
