//! Buffer-oriented decoding: schema matching over a fully buffered element.

use crate::coding::Tt;
use crate::dtag::DTag;
use crate::error::CodecError;
use crate::skeleton::SkeletonDecoder;

/// A paused skeleton decoder positioned over a complete in-memory buffer.
///
/// All the match primitives are non-allocating: blob and string matches
/// return slices of the underlying buffer. Schema failures latch an error in
/// the decoder; once latched, every subsequent operation is a no-op, so
/// parsers can run a fixed sequence of reads and check for failure once.
pub struct BufDecoder<'a> {
    buf: &'a [u8],
    d: SkeletonDecoder,
}

impl<'a> BufDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> BufDecoder<'a> {
        let mut d = SkeletonDecoder::paused();
        d.decode(buf);
        BufDecoder { buf, d }
    }

    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    pub fn index(&self) -> usize {
        self.d.index
    }

    pub fn token_index(&self) -> usize {
        self.d.token_index
    }

    pub fn element_index(&self) -> usize {
        self.d.element_index
    }

    pub fn numval(&self) -> u64 {
        self.d.numval
    }

    pub fn failed(&self) -> bool {
        self.d.error().is_some()
    }

    pub fn error(&self) -> Option<CodecError> {
        self.d.error()
    }

    /// Latch a schema error.
    pub fn fail(&mut self, what: &'static str) {
        self.d.set_error(CodecError::Schema(what));
    }

    /// True once the whole buffer has been consumed as one element.
    pub fn at_end(&self) -> bool {
        self.d.is_final() && self.d.index == self.buf.len()
    }

    /// Advance to the next token boundary.
    pub fn advance(&mut self) {
        let idx = self.d.index;
        if idx <= self.buf.len() {
            self.d.decode(&self.buf[idx..]);
        }
    }

    /// Is the current token the opener of the given dictionary tag?
    pub fn match_dtag(&self, dtag: DTag) -> bool {
        self.d.error().is_none()
            && self.d.token_type() == Tt::Dtag
            && self.d.numval == dtag as u64
    }

    /// Is the current token any dictionary-tag opener?
    pub fn match_some_dtag(&self) -> bool {
        self.d.error().is_none() && self.d.token_type() == Tt::Dtag
    }

    /// The dictionary tag of the current token, if it is a known opener.
    pub fn current_dtag(&self) -> Option<DTag> {
        if self.match_some_dtag() {
            DTag::from_num(self.d.numval)
        } else {
            None
        }
    }

    pub fn match_some_blob(&self) -> bool {
        self.d.error().is_none() && self.d.token_type() == Tt::Blob
    }

    /// If positioned at a blob token, the blob's content bytes.
    pub fn match_blob(&self) -> Option<&'a [u8]> {
        if self.match_some_blob() {
            let start = self.d.index;
            let len = self.d.numval as usize;
            self.buf.get(start..start + len)
        } else {
            None
        }
    }

    /// If positioned at a UTF-8 token, its content bytes.
    pub fn match_some_udata(&self) -> Option<&'a [u8]> {
        if self.d.error().is_none() && self.d.token_type() == Tt::Udata {
            let start = self.d.index;
            let len = self.d.numval as usize;
            self.buf.get(start..start + len)
        } else {
            None
        }
    }

    pub fn match_udata(&self, s: &str) -> bool {
        self.match_some_udata() == Some(s.as_bytes())
    }

    /// Error out unless the next token is the element closer, then consume it.
    pub fn check_close(&mut self) {
        if self.d.error().is_none() {
            if self.d.token_type() != Tt::NoToken {
                self.d.set_error(CodecError::Nesting);
            } else {
                self.advance();
            }
        }
    }

    /// Skip a whole element subtree, closer included.
    pub fn advance_past_element(&mut self) -> crate::Result<()> {
        if let Some(e) = self.d.error() {
            return Err(e);
        }
        match self.d.token_type() {
            Tt::Dtag | Tt::Tag => {
                let nest = self.d.nest;
                self.advance();
                while self.d.error().is_none() && self.d.nest >= nest {
                    self.advance();
                }
                // nesting drops before the closer is consumed
                self.check_close();
            }
            _ => return Err(CodecError::Schema("not at an element")),
        }
        match self.d.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Parse `<dtag><BLOB/></dtag>` with the blob length in `minlen..=maxlen`
    /// (`maxlen` of `None` means unbounded). Returns the element's start
    /// offset, or latches an error.
    pub fn req_tagged_blob(
        &mut self,
        dtag: DTag,
        minlen: usize,
        maxlen: Option<usize>,
    ) -> Option<usize> {
        let mut len = 0usize;
        if self.match_dtag(dtag) {
            let res = self.d.element_index;
            self.advance();
            if self.match_some_blob() {
                len = self.d.numval as usize;
                self.advance();
            }
            self.check_close();
            if len < minlen || maxlen.is_some_and(|m| len > m) {
                self.fail("blob length out of range");
            }
            if self.failed() {
                return None;
            }
            Some(res)
        } else {
            self.fail("required tagged blob missing");
            None
        }
    }

    /// Like [`req_tagged_blob`](Self::req_tagged_blob) but absent-tag is not
    /// an error.
    pub fn opt_tagged_blob(
        &mut self,
        dtag: DTag,
        minlen: usize,
        maxlen: Option<usize>,
    ) -> Option<usize> {
        if self.match_dtag(dtag) {
            self.req_tagged_blob(dtag, minlen, maxlen)
        } else {
            None
        }
    }

    /// Parse a tagged big-endian unsigned integer of bounded width.
    pub fn req_tagged_binary_number(&mut self, dtag: DTag, minlen: usize, maxlen: usize) -> u64 {
        let mut value = 0u64;
        if minlen <= maxlen && maxlen <= 8 && self.match_dtag(dtag) {
            self.advance();
            let blob = self.match_blob();
            if blob.is_some() {
                self.advance();
            }
            self.check_close();
            if self.failed() {
                return value;
            }
            match blob {
                Some(b) if (minlen..=maxlen).contains(&b.len()) => {
                    for &byte in b {
                        value = (value << 8) + u64::from(byte);
                    }
                }
                _ => self.fail("binary number length out of range"),
            }
        } else {
            self.fail("required tagged binary number missing");
        }
        value
    }

    pub fn opt_tagged_binary_number(
        &mut self,
        dtag: DTag,
        minlen: usize,
        maxlen: usize,
        default_value: u64,
    ) -> u64 {
        if self.match_dtag(dtag) {
            self.req_tagged_binary_number(dtag, minlen, maxlen)
        } else {
            default_value
        }
    }

    pub fn req_tagged_udata(&mut self, dtag: DTag) -> Option<usize> {
        if self.match_dtag(dtag) {
            let res = self.d.element_index;
            self.advance();
            if self.match_some_udata().is_some() {
                self.advance();
            } else {
                self.fail("expected character data");
            }
            self.check_close();
            if self.failed() {
                None
            } else {
                Some(res)
            }
        } else {
            self.fail("required tagged character data missing");
            None
        }
    }

    pub fn opt_tagged_udata(&mut self, dtag: DTag) -> Option<usize> {
        if self.match_dtag(dtag) {
            self.req_tagged_udata(dtag)
        } else {
            None
        }
    }

    /// Parse the current UTF-8 token as a decimal non-negative integer.
    pub fn parse_nonneg_int(&mut self) -> Option<u64> {
        let Some(digits) = self.match_some_udata() else {
            self.fail("expected decimal integer");
            return None;
        };
        if digits.is_empty() {
            self.fail("empty decimal integer");
            return None;
        }
        let mut val: u64 = 0;
        for &c in digits {
            if !c.is_ascii_digit() {
                self.fail("non-digit in decimal integer");
                return None;
            }
            val = match val
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(c - b'0')))
            {
                Some(v) => v,
                None => {
                    self.fail("decimal integer overflow");
                    return None;
                }
            };
        }
        self.advance();
        Some(val)
    }

    pub fn opt_tagged_nonneg_int(&mut self, dtag: DTag) -> Option<u64> {
        if self.match_dtag(dtag) {
            self.advance();
            let res = self.parse_nonneg_int();
            self.check_close();
            if self.failed() {
                None
            } else {
                res
            }
        } else {
            None
        }
    }

    /// Parse a binary timestamp payload: a blob of 3..=7 bytes carrying
    /// seconds with a 12-bit binary fraction.
    pub fn parse_timestamp(&mut self) {
        if self.failed() {
            return;
        }
        match self.match_blob() {
            Some(b) if (3..=7).contains(&b.len()) => self.advance(),
            _ => self.fail("malformed binary timestamp"),
        }
    }

    pub fn req_tagged_timestamp(&mut self, dtag: DTag) -> Option<usize> {
        if self.match_dtag(dtag) {
            let res = self.d.element_index;
            self.advance();
            self.parse_timestamp();
            self.check_close();
            if self.failed() {
                None
            } else {
                Some(res)
            }
        } else {
            self.fail("required timestamp missing");
            None
        }
    }
}

/// Extract the blob content of a `<dtag><BLOB/></dtag>` element occupying
/// exactly `buf[start..stop]`.
pub fn ref_tagged_blob(
    dtag: DTag,
    buf: &[u8],
    start: usize,
    stop: usize,
) -> crate::Result<&[u8]> {
    if stop < start || stop > buf.len() {
        return Err(CodecError::Schema("bad element range"));
    }
    let mut d = BufDecoder::new(&buf[start..stop]);
    if !d.match_dtag(dtag) {
        return Err(CodecError::Schema("unexpected element tag"));
    }
    d.advance();
    let blob = d.match_blob().unwrap_or(&[]);
    if d.match_some_blob() {
        d.advance();
    }
    d.check_close();
    if let Some(e) = d.error() {
        return Err(e);
    }
    if !d.at_end() {
        return Err(CodecError::Truncated);
    }
    Ok(blob)
}

/// Extract the UTF-8 content of a `<dtag>text</dtag>` element occupying
/// exactly `buf[start..stop]`.
pub fn ref_tagged_string(
    dtag: DTag,
    buf: &[u8],
    start: usize,
    stop: usize,
) -> crate::Result<&[u8]> {
    if stop < start || stop > buf.len() {
        return Err(CodecError::Schema("bad element range"));
    }
    let mut d = BufDecoder::new(&buf[start..stop]);
    if !d.match_dtag(dtag) {
        return Err(CodecError::Schema("unexpected element tag"));
    }
    d.advance();
    let text = d.match_some_udata().unwrap_or(&[]);
    if d.match_some_udata().is_some() {
        d.advance();
    }
    d.check_close();
    if let Some(e) = d.error() {
        return Err(e);
    }
    if !d.at_end() {
        return Err(CodecError::Truncated);
    }
    Ok(text)
}

/// Parse a `<dtag>decimal</dtag>` element at `buf[start..stop]`.
pub fn fetch_tagged_nonneg_int(
    dtag: DTag,
    buf: &[u8],
    start: usize,
    stop: usize,
) -> Option<u64> {
    if stop < start || stop > buf.len() {
        return None;
    }
    let mut d = BufDecoder::new(&buf[start..stop]);
    if !d.match_dtag(dtag) {
        return None;
    }
    d.advance();
    let res = d.parse_nonneg_int();
    d.check_close();
    if d.failed() {
        None
    } else {
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charbuf::CharBuf;

    fn tagged_blob(dtag: DTag, data: &[u8]) -> CharBuf {
        let mut c = CharBuf::new();
        c.append_tt(dtag as u64, Tt::Dtag);
        if !data.is_empty() {
            c.append_tt(data.len() as u64, Tt::Blob);
            c.append(data);
        }
        c.append_closer();
        c
    }

    #[test]
    fn req_tagged_blob_extracts_and_bounds() {
        let c = tagged_blob(DTag::Nonce, b"abcd");
        let mut d = BufDecoder::new(c.as_slice());
        assert!(d.req_tagged_blob(DTag::Nonce, 4, Some(64)).is_some());
        assert!(!d.failed());
        assert!(d.at_end());

        let mut d = BufDecoder::new(c.as_slice());
        d.req_tagged_blob(DTag::Nonce, 5, Some(64));
        assert!(d.failed());
    }

    #[test]
    fn opt_tagged_blob_leaves_position_on_miss() {
        let c = tagged_blob(DTag::Nonce, b"abcd");
        let mut d = BufDecoder::new(c.as_slice());
        assert!(d.opt_tagged_blob(DTag::Bloom, 1, None).is_none());
        assert!(!d.failed());
        assert!(d.match_dtag(DTag::Nonce));
    }

    #[test]
    fn binary_number_is_big_endian() {
        let c = tagged_blob(DTag::Type, &[0x0c, 0x04, 0xc0]);
        let mut d = BufDecoder::new(c.as_slice());
        assert_eq!(d.req_tagged_binary_number(DTag::Type, 3, 3), 0x0c04c0);
        assert!(!d.failed());
    }

    #[test]
    fn nonneg_int_parses_digits_only() {
        let mut c = CharBuf::new();
        c.append_tt(DTag::Scope as u64, Tt::Dtag);
        c.append_tt(1, Tt::Udata);
        c.append_string("3");
        c.append_closer();
        let mut d = BufDecoder::new(c.as_slice());
        assert_eq!(d.opt_tagged_nonneg_int(DTag::Scope), Some(3));

        let mut c = CharBuf::new();
        c.append_tt(DTag::Scope as u64, Tt::Dtag);
        c.append_tt(2, Tt::Udata);
        c.append_string("3x");
        c.append_closer();
        let mut d = BufDecoder::new(c.as_slice());
        assert_eq!(d.opt_tagged_nonneg_int(DTag::Scope), None);
        assert!(d.failed());
    }

    #[test]
    fn advance_past_element_skips_subtree() {
        let mut outer = CharBuf::new();
        outer.append_tt(DTag::SignedInfo as u64, Tt::Dtag);
        let inner = tagged_blob(DTag::PublisherPublicKeyDigest, &[9; 32]);
        outer.append_charbuf(&inner);
        outer.append_closer();
        let second = tagged_blob(DTag::Nonce, b"wxyz");

        let mut all = CharBuf::new();
        all.append_tt(DTag::Interest as u64, Tt::Dtag);
        all.append_charbuf(&outer);
        all.append_charbuf(&second);
        all.append_closer();

        let mut d = BufDecoder::new(all.as_slice());
        assert!(d.match_dtag(DTag::Interest));
        d.advance();
        d.advance_past_element().unwrap();
        assert!(d.match_dtag(DTag::Nonce));
    }

    #[test]
    fn ref_tagged_blob_requires_exact_span() {
        let c = tagged_blob(DTag::Witness, b"witness!");
        assert_eq!(
            ref_tagged_blob(DTag::Witness, c.as_slice(), 0, c.len()).unwrap(),
            b"witness!"
        );
        assert!(ref_tagged_blob(DTag::Witness, c.as_slice(), 0, c.len() - 1).is_err());
    }

    #[test]
    fn empty_blob_allowed() {
        let c = tagged_blob(DTag::Content, b"");
        let mut d = BufDecoder::new(c.as_slice());
        assert!(d.req_tagged_blob(DTag::Content, 0, None).is_some());
        assert!(d.at_end());
    }
}
