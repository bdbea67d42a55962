//! The textual URI form of names.
//!
//! Canonical output percent-escapes every byte outside the URI unreserved
//! set, and a component consisting solely of dots gains three extra leading
//! dots so that `.` and `..` path segments stay available as no-ops.

use crate::error::MsgError;
use crate::name::Name;

fn unreserved(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, b'-' | b'.' | b'_' | b'~')
}

fn push_escaped(out: &mut String, data: &[u8]) {
    if data.iter().all(|&c| c == b'.') {
        out.push_str("...");
    }
    for &ch in data {
        if unreserved(ch) {
            out.push(ch as char);
        } else {
            out.push_str(&format!("%{:02X}", ch));
        }
    }
}

/// Format a name in canonical URI form, with the `ccnx:` scheme.
pub fn format_uri(name: &Name) -> String {
    let mut out = String::from("ccnx:");
    let count = name.count().unwrap_or(0);
    if count == 0 {
        out.push('/');
        return out;
    }
    for i in 0..count {
        out.push('/');
        if let Some(comp) = name.component(i) {
            push_escaped(&mut out, &comp);
        }
    }
    out
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn parse_segment(seg: &str) -> crate::Result<Option<Vec<u8>>> {
    let bytes = seg.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let (hi, lo) = match (bytes.get(i + 1), bytes.get(i + 2)) {
                    (Some(&h), Some(&l)) => (hex_val(h), hex_val(l)),
                    _ => (None, None),
                };
                match (hi, lo) {
                    (Some(h), Some(l)) => {
                        out.push((h << 4) | l);
                        i += 3;
                    }
                    _ => return Err(MsgError::Uri("bad percent escape")),
                }
            }
            c if c.is_ascii_graphic() => {
                out.push(c);
                i += 1;
            }
            _ => return Err(MsgError::Uri("unescaped byte in component")),
        }
    }
    // The dots rule applies to the decoded bytes: empty, ".", and ".."
    // segments are no-ops; longer all-dots segments lose three dots.
    if out.iter().all(|&c| c == b'.') {
        if out.len() < 3 {
            return Ok(None);
        }
        return Ok(Some(out[3..].to_vec()));
    }
    Ok(Some(out))
}

/// Parse a URI into a name. Accepts an optional `ccnx:` scheme; empty and
/// dot segments collapse away.
pub fn parse_uri(uri: &str) -> crate::Result<Name> {
    let mut rest = uri.trim();
    if let Some(stripped) = rest.strip_prefix("ccnx:") {
        rest = stripped;
    }
    if !rest.starts_with('/') {
        return Err(MsgError::Uri("name must start with '/'"));
    }
    let mut name = Name::new();
    for seg in rest.split('/') {
        if let Some(comp) = parse_segment(seg)? {
            name.append(&comp);
        }
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(n: &Name) {
        let uri = format_uri(n);
        let back = parse_uri(&uri).unwrap();
        assert_eq!(n.as_ccnb(), back.as_ccnb(), "uri was {uri}");
    }

    #[test]
    fn root_formats_as_slash() {
        assert_eq!(format_uri(&Name::new()), "ccnx:/");
        assert!(parse_uri("ccnx:/").unwrap().is_empty());
        assert!(parse_uri("/").unwrap().is_empty());
    }

    #[test]
    fn dot_segments_collapse() {
        let n = parse_uri("ccnx:/...//../x").unwrap();
        assert_eq!(n.count().unwrap(), 2);
        assert_eq!(n.component(0).unwrap(), b"");
        assert_eq!(n.component(1).unwrap(), b"x");
    }

    #[test]
    fn single_component_canonical_form() {
        let n = parse_uri("ccnx:////../x/").unwrap();
        assert_eq!(n.count().unwrap(), 1);
        assert_eq!(format_uri(&n), "ccnx:/x");
    }

    #[test]
    fn binary_bytes_percent_escape() {
        let mut n = Name::new();
        n.append(&[0x00, 0x42]);
        n.append(b"ok-name_1.~");
        assert_eq!(format_uri(&n), "ccnx:/%00B/ok-name_1.~");
        roundtrip(&n);
    }

    #[test]
    fn all_dots_gains_three_dots() {
        let mut n = Name::new();
        n.append(b"..");
        assert_eq!(format_uri(&n), "ccnx:/.....");
        roundtrip(&n);
        let mut e = Name::new();
        e.append(b"");
        assert_eq!(format_uri(&e), "ccnx:/...");
        roundtrip(&e);
    }

    #[test]
    fn every_byte_round_trips() {
        let mut comp = Vec::new();
        for b in 0..=255u8 {
            comp.push(b);
        }
        let mut n = Name::new();
        n.append(&comp);
        roundtrip(&n);
    }

    #[test]
    fn bad_escapes_rejected() {
        assert!(parse_uri("ccnx:/%zz").is_err());
        assert!(parse_uri("ccnx:/%4").is_err());
        assert!(parse_uri("no-slash").is_err());
    }
}
