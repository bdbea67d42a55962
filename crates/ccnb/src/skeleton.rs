//! Resumable tokenizer for the ccnb wire format.

use crate::coding::{Tt, CLOSE, MAX_TINY, TT_BITS, TT_HBIT, TT_MASK};
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DState {
    /// Between top-level elements; the final state when `nest == 0`.
    Initial,
    /// Ready for the next token inside an element.
    NewToken,
    /// Accumulating a token header's numeric value.
    Numval,
    /// Skipping an explicit tag name of `numval` remaining bytes.
    TagName,
    /// Skipping an explicit attribute name of `numval` remaining bytes.
    AttrName,
    /// Skipping blob content of `numval` remaining bytes.
    Blob,
    /// Skipping UTF-8 content of `numval` remaining bytes.
    Udata,
}

/// A resumable per-byte state machine over ccnb input.
///
/// The decoder may be fed any number of partial buffers; it remembers where
/// it stopped and continues from there. One call never runs past the end of
/// a top-level element, so a caller framing a byte stream can treat every
/// return-to-[`is_final`](SkeletonDecoder::is_final) as one complete message.
///
/// In *paused* mode the decoder additionally stops at every token boundary,
/// exposing the token's type and numeric value so that structural decisions
/// can be made before the content is consumed.
#[derive(Debug, Clone)]
pub struct SkeletonDecoder {
    state: DState,
    tt: Tt,
    /// Numeric value of the current token; for blob/UTF-8 tokens mid-skip it
    /// holds the count of content bytes not yet consumed.
    pub numval: u64,
    /// Total bytes consumed so far.
    pub index: usize,
    /// Start offset of the most recent token.
    pub token_index: usize,
    /// Start offset of the most recently opened element.
    pub element_index: usize,
    /// Current element nesting depth.
    pub nest: usize,
    tagstate: u8,
    pause: bool,
    err: Option<CodecError>,
}

impl Default for SkeletonDecoder {
    fn default() -> Self {
        SkeletonDecoder::new()
    }
}

impl SkeletonDecoder {
    pub fn new() -> SkeletonDecoder {
        SkeletonDecoder {
            state: DState::Initial,
            tt: Tt::NoToken,
            numval: 0,
            index: 0,
            token_index: 0,
            element_index: 0,
            nest: 0,
            tagstate: 0,
            pause: false,
            err: None,
        }
    }

    /// A decoder that stops at every token boundary.
    pub fn paused() -> SkeletonDecoder {
        let mut d = SkeletonDecoder::new();
        d.pause = true;
        d
    }

    /// Forget everything and start over at offset zero.
    pub fn reset(&mut self) {
        let pause = self.pause;
        *self = SkeletonDecoder::new();
        self.pause = pause;
    }

    /// The type of the current token, valid after a paused stop.
    pub fn token_type(&self) -> Tt {
        self.tt
    }

    /// The error latched by the decoder, if any.
    pub fn error(&self) -> Option<CodecError> {
        self.err
    }

    /// Force the decoder into an error state (used by schema parsers).
    pub fn set_error(&mut self, e: CodecError) {
        if self.err.is_none() {
            self.err = Some(e);
        }
    }

    /// True when the decoder is between top-level elements with no error.
    pub fn is_final(&self) -> bool {
        self.err.is_none() && self.state == DState::Initial && self.nest == 0
    }

    /// Consume bytes from `p`, returning how many were used.
    ///
    /// Stops at the first of: end of input, end of the current top-level
    /// element, an error, or (in paused mode) the next token boundary.
    pub fn decode(&mut self, p: &[u8]) -> usize {
        if self.err.is_some() {
            return 0;
        }
        let mut n = p.len();
        let mut i = 0usize;
        while i < n {
            match self.state {
                DState::Initial | DState::NewToken => {
                    self.token_index = self.index + i;
                    if self.tagstate > 1 {
                        // close off a pending attribute value
                        self.tagstate -= 1;
                    }
                    if p[i] == CLOSE {
                        i += 1;
                        if self.nest == 0 || self.tagstate > 1 {
                            self.err = Some(CodecError::Nesting);
                            break;
                        }
                        if self.tagstate == 1 {
                            self.tagstate = 0;
                        }
                        self.nest -= 1;
                        self.tt = Tt::NoToken;
                        self.numval = 0;
                        if self.nest == 0 {
                            // never run past the end of a top-level element
                            self.state = DState::Initial;
                            n = i;
                        } else {
                            self.state = DState::NewToken;
                        }
                        if self.pause {
                            n = i;
                        }
                        continue;
                    }
                    self.numval = 0;
                    self.state = DState::Numval;
                }
                DState::Numval => {
                    let c = p[i];
                    i += 1;
                    if c & TT_HBIT == 0 {
                        // continuation byte: seven more high-order bits
                        if self.numval > u64::MAX >> (7 + TT_BITS) {
                            self.err = Some(CodecError::Overflow);
                            break;
                        }
                        self.numval = (self.numval << 7) + u64::from(c & 0x7f);
                    } else {
                        if self.numval > u64::MAX >> (7 - TT_BITS) {
                            self.err = Some(CodecError::Overflow);
                            break;
                        }
                        self.numval = (self.numval << (7 - TT_BITS))
                            + u64::from((c >> TT_BITS) & MAX_TINY);
                        let tt = Tt::from_bits(c & TT_MASK);
                        self.tt = tt;
                        match tt {
                            Tt::Ext | Tt::Dtag => {
                                if self.tagstate == 1 {
                                    self.tagstate = 0;
                                }
                                self.nest += 1;
                                self.element_index = self.token_index;
                                self.state = DState::NewToken;
                            }
                            Tt::Blob => {
                                if self.tagstate == 1 {
                                    self.tagstate = 0;
                                }
                                self.state = if self.numval == 0 {
                                    DState::NewToken
                                } else {
                                    DState::Blob
                                };
                            }
                            Tt::Udata => {
                                if self.tagstate == 1 {
                                    self.tagstate = 0;
                                }
                                self.state = if self.numval == 0 {
                                    DState::NewToken
                                } else {
                                    DState::Udata
                                };
                            }
                            Tt::Dattr => {
                                if self.tagstate != 1 {
                                    self.err = Some(CodecError::Attr);
                                    break;
                                }
                                self.tagstate = 3;
                                self.state = DState::NewToken;
                            }
                            Tt::Attr => {
                                if self.tagstate != 1 {
                                    self.err = Some(CodecError::Attr);
                                    break;
                                }
                                // name length is encoded minus one
                                self.numval += 1;
                                self.state = DState::AttrName;
                            }
                            Tt::Tag => {
                                if self.tagstate == 1 {
                                    self.tagstate = 0;
                                }
                                self.numval += 1;
                                self.nest += 1;
                                self.element_index = self.token_index;
                                self.state = DState::TagName;
                            }
                            Tt::NoToken => {
                                self.err = Some(CodecError::Coding);
                                break;
                            }
                        }
                        if self.pause {
                            n = i;
                        }
                    }
                }
                DState::TagName | DState::AttrName => {
                    let chunk = (n - i).min(self.numval as usize);
                    self.numval -= chunk as u64;
                    i += chunk;
                    if self.numval == 0 {
                        if self.nest == 0 {
                            self.err = Some(CodecError::Nesting);
                            break;
                        }
                        self.tagstate = if self.state == DState::TagName { 1 } else { 2 };
                        self.state = DState::NewToken;
                    }
                }
                DState::Blob | DState::Udata => {
                    let chunk = (n - i).min(self.numval as usize);
                    self.numval -= chunk as u64;
                    i += chunk;
                    if self.numval == 0 {
                        self.state = DState::NewToken;
                    }
                }
            }
        }
        self.index += i;
        i
    }

    /// Decode an entire buffer, requiring exactly one well-formed element.
    ///
    /// Returns the element length (which must equal `p.len()`), or an error.
    pub fn decode_element(p: &[u8]) -> crate::Result<usize> {
        let mut d = SkeletonDecoder::new();
        let used = d.decode(p);
        if let Some(e) = d.err {
            return Err(e);
        }
        if !d.is_final() || used != p.len() || used == 0 {
            return Err(CodecError::Truncated);
        }
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charbuf::CharBuf;
    use crate::dtag::DTag;

    fn sample() -> CharBuf {
        let mut c = CharBuf::new();
        c.append_tt(DTag::Name as u64, Tt::Dtag);
        c.append_tt(DTag::Component as u64, Tt::Dtag);
        c.append_tt(3, Tt::Blob);
        c.append(b"abc");
        c.append_closer();
        c.append_tt(DTag::Component as u64, Tt::Dtag);
        c.append_tt(1, Tt::Blob);
        c.append(b"z");
        c.append_closer();
        c.append_closer();
        c
    }

    #[test]
    fn whole_element_in_one_call() {
        let c = sample();
        let mut d = SkeletonDecoder::new();
        assert_eq!(d.decode(c.as_slice()), c.len());
        assert!(d.is_final());
        assert_eq!(d.nest, 0);
    }

    #[test]
    fn stops_at_top_level_element_boundary() {
        let mut two = sample();
        let second = sample();
        two.append_charbuf(&second);
        let mut d = SkeletonDecoder::new();
        let used = d.decode(two.as_slice());
        assert_eq!(used, second.len());
        assert!(d.is_final());
        let used2 = d.decode(&two.as_slice()[used..]);
        assert_eq!(used2, second.len());
        assert!(d.is_final());
        assert_eq!(d.index, two.len());
    }

    #[test]
    fn resumes_across_single_byte_feeds() {
        let c = sample();
        let mut d = SkeletonDecoder::new();
        for &b in c.as_slice() {
            d.decode(&[b]);
            assert!(d.error().is_none());
        }
        assert!(d.is_final());
        assert_eq!(d.index, c.len());
    }

    #[test]
    fn paused_mode_yields_each_token() {
        let c = sample();
        let mut d = SkeletonDecoder::paused();
        let mut toks = Vec::new();
        loop {
            let used = d.decode(&c.as_slice()[d.index..]);
            if used == 0 && d.is_final() {
                break;
            }
            assert!(d.error().is_none());
            toks.push((d.token_type(), d.numval));
            if d.is_final() {
                break;
            }
        }
        assert_eq!(toks[0], (Tt::Dtag, DTag::Name as u64));
        assert_eq!(toks[1], (Tt::Dtag, DTag::Component as u64));
        assert_eq!(toks[2], (Tt::Blob, 3));
        assert!(toks.contains(&(Tt::NoToken, 0)));
    }

    #[test]
    fn stray_closer_is_an_error() {
        let mut d = SkeletonDecoder::new();
        d.decode(&[CLOSE]);
        assert_eq!(d.error(), Some(CodecError::Nesting));
    }

    #[test]
    fn missing_closer_is_not_final() {
        let mut c = sample();
        let trunc = c.len() - 1;
        c.truncate(trunc);
        let mut d = SkeletonDecoder::new();
        assert_eq!(d.decode(c.as_slice()), trunc);
        assert!(!d.is_final());
        assert!(d.error().is_none());
    }

    #[test]
    fn numval_overflow_rejected() {
        // Ten continuation bytes of all-ones drive the accumulator past 64 bits.
        let bytes = [0x7fu8; 10];
        let mut d = SkeletonDecoder::new();
        d.decode(&bytes);
        assert_eq!(d.error(), Some(CodecError::Overflow));
    }

    #[test]
    fn attribute_outside_tag_rejected() {
        let mut c = CharBuf::new();
        c.append_tt(DTag::Name as u64, Tt::Dtag);
        c.append_tt(0, Tt::Attr);
        let mut d = SkeletonDecoder::new();
        d.decode(c.as_slice());
        assert_eq!(d.error(), Some(CodecError::Attr));
    }

    #[test]
    fn explicit_tag_with_attribute_accepted() {
        let mut c = CharBuf::new();
        c.append_tt(2, Tt::Tag); // "Foo" (length - 1)
        c.append(b"Foo");
        c.append_tt(3, Tt::Attr); // "type"
        c.append(b"type");
        c.append_tt(5, Tt::Udata);
        c.append(b"empty");
        c.append_closer();
        let mut d = SkeletonDecoder::new();
        assert_eq!(d.decode(c.as_slice()), c.len());
        assert!(d.is_final());
    }

    #[test]
    fn decode_element_rejects_trailing_garbage() {
        let mut c = sample();
        c.append_byte(0x55);
        assert!(SkeletonDecoder::decode_element(c.as_slice()).is_err());
    }
}
