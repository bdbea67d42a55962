//! Top-level peers of Interest and ContentObject: Link, Collection, and
//! StatusResponse.

use ccnb::{BufDecoder, CharBuf, DTag, IndexBuf};

use crate::error::MsgError;
use crate::name::{parse_name_at, Name};

/// A parsed Link element.
#[derive(Debug, Clone, Default)]
pub struct ParsedLink {
    pub name_ncomps: usize,
    pub b_name: usize,
    pub e_name: usize,
    pub b_label: usize,
    pub e_label: usize,
    pub b_link_authenticator: usize,
    pub e_link_authenticator: usize,
}

/// Parse a Link element at the decoder's position.
pub fn parse_link_at(
    d: &mut BufDecoder<'_>,
    components: Option<&mut IndexBuf>,
) -> crate::Result<ParsedLink> {
    let mut link = ParsedLink::default();
    if !d.match_dtag(DTag::Link) {
        return Err(MsgError::WrongMessageType("Link"));
    }
    d.advance();
    link.b_name = d.token_index();
    link.name_ncomps = parse_name_at(d, components)?;
    link.e_name = d.token_index();
    link.b_label = d.token_index();
    d.opt_tagged_udata(DTag::Label);
    link.e_label = d.token_index();
    link.b_link_authenticator = d.token_index();
    if d.match_dtag(DTag::LinkAuthenticator) {
        d.advance_past_element()?;
    }
    link.e_link_authenticator = d.token_index();
    d.check_close();
    match d.error() {
        Some(e) => Err(e.into()),
        None => Ok(link),
    }
}

/// Parse a standalone encoded Link.
pub fn parse_link(msg: &[u8], components: Option<&mut IndexBuf>) -> crate::Result<ParsedLink> {
    let mut d = BufDecoder::new(msg);
    let link = parse_link_at(&mut d, components)?;
    if !d.at_end() {
        return Err(MsgError::Schema("trailing bytes after Link"));
    }
    Ok(link)
}

/// Encode a Link with an optional label.
pub fn encode_link(name: &Name, label: Option<&str>) -> Vec<u8> {
    let mut c = CharBuf::new();
    c.element_begin(DTag::Link);
    c.append(name.as_ccnb());
    if let Some(l) = label {
        c.append_tagged_udata(DTag::Label, l);
    }
    c.element_end();
    c.into_vec()
}

/// Begin iterating a Collection of Links: consume the Collection opener.
pub fn parse_collection_start(d: &mut BufDecoder<'_>) -> crate::Result<()> {
    if !d.match_dtag(DTag::Collection) {
        return Err(MsgError::WrongMessageType("Collection"));
    }
    d.advance();
    Ok(())
}

/// Fetch the next Link of a Collection, or `None` at the closer.
pub fn parse_collection_next(
    d: &mut BufDecoder<'_>,
    components: Option<&mut IndexBuf>,
) -> crate::Result<Option<ParsedLink>> {
    if d.match_dtag(DTag::Link) {
        Ok(Some(parse_link_at(d, components)?))
    } else {
        d.check_close();
        match d.error() {
            Some(e) => Err(e.into()),
            None => Ok(None),
        }
    }
}

/// Encode a StatusResponse with a 3-digit code and optional text.
pub fn encode_status_response(errcode: u32, errtext: Option<&str>) -> crate::Result<Vec<u8>> {
    if !(100..=999).contains(&errcode) {
        return Err(MsgError::Schema("status code must have three digits"));
    }
    let mut c = CharBuf::new();
    c.element_begin(DTag::StatusResponse);
    c.append_tagged_number(DTag::StatusCode, u64::from(errcode));
    if let Some(text) = errtext {
        if !text.is_empty() {
            c.append_tagged_udata(DTag::StatusText, text);
        }
    }
    c.element_end();
    Ok(c.into_vec())
}

/// Parse a StatusResponse into (code, text).
pub fn parse_status_response(msg: &[u8]) -> crate::Result<(u32, Option<String>)> {
    let mut d = BufDecoder::new(msg);
    if !d.match_dtag(DTag::StatusResponse) {
        return Err(MsgError::WrongMessageType("StatusResponse"));
    }
    d.advance();
    let code = d
        .opt_tagged_nonneg_int(DTag::StatusCode)
        .ok_or(MsgError::Schema("missing StatusCode"))?;
    let mut text = None;
    if d.match_dtag(DTag::StatusText) {
        d.advance();
        if let Some(bytes) = d.match_some_udata() {
            text = Some(String::from_utf8_lossy(bytes).into_owned());
            d.advance();
        }
        d.check_close();
    }
    d.check_close();
    if let Some(e) = d.error() {
        return Err(e.into());
    }
    if !d.at_end() {
        return Err(MsgError::Schema("trailing bytes after StatusResponse"));
    }
    Ok((code as u32, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_round_trips() {
        let msg = encode_status_response(404, Some("no such content")).unwrap();
        let (code, text) = parse_status_response(&msg).unwrap();
        assert_eq!(code, 404);
        assert_eq!(text.as_deref(), Some("no such content"));
    }

    #[test]
    fn status_code_must_be_three_digits() {
        assert!(encode_status_response(99, None).is_err());
        assert!(encode_status_response(1000, None).is_err());
    }

    #[test]
    fn link_round_trips() {
        let mut n = Name::new();
        n.append_str("target");
        let msg = encode_link(&n, Some("alias"));
        let link = parse_link(&msg, None).unwrap();
        assert_eq!(link.name_ncomps, 1);
        assert!(link.b_label < link.e_label);
    }

    #[test]
    fn collection_iterates_links() {
        let mut a = Name::new();
        a.append_str("a");
        let mut b = Name::new();
        b.append_str("b");
        let mut c = CharBuf::new();
        c.element_begin(DTag::Collection);
        c.append(&encode_link(&a, None));
        c.append(&encode_link(&b, None));
        c.element_end();
        let bytes = c.into_vec();
        let mut d = BufDecoder::new(&bytes);
        parse_collection_start(&mut d).unwrap();
        let mut count = 0;
        while parse_collection_next(&mut d, None).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
