//! Slice definitions and their canonical encoding.

use ccn_msg::{parse_name_at, MsgError, Name};
use ccnb::{BufDecoder, CharBuf, DTag};

use crate::error::Error;
use crate::keys::sha256;

/// Wire version of the slice configuration encoding.
pub const SLICE_VERSION: u64 = 20110614;

/// A registered set of names to synchronize: a topological prefix for the
/// protocol traffic, a naming prefix for the data, and optional filter
/// clauses narrowing the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    topo: Name,
    prefix: Name,
    clauses: Vec<Name>,
}

impl Slice {
    pub fn new(topo: Name, prefix: Name) -> Slice {
        Slice {
            topo,
            prefix,
            clauses: Vec::new(),
        }
    }

    pub fn topo(&self) -> &Name {
        &self.topo
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub fn clauses(&self) -> &[Name] {
        &self.clauses
    }

    pub fn add_clause(&mut self, clause: Name) {
        self.clauses.push(clause);
    }

    /// Does `name` belong to this slice?
    pub fn covers(&self, name: &Name) -> bool {
        if !self.prefix.is_prefix_of(name) {
            return false;
        }
        if self.clauses.is_empty() {
            return true;
        }
        self.clauses.iter().any(|c| c.is_prefix_of(name))
    }

    /// Canonical ccnb encoding of the slice configuration.
    pub fn encode(&self) -> Vec<u8> {
        let mut c = CharBuf::new();
        c.element_begin(DTag::SyncConfigSlice);
        c.append_tagged_number(DTag::SyncVersion, SLICE_VERSION);
        c.append(self.topo.as_ccnb());
        c.append(self.prefix.as_ccnb());
        c.element_begin(DTag::SyncConfigSliceList);
        for clause in &self.clauses {
            c.append_tagged_number(DTag::SyncConfigSliceOp, 0);
            c.append(clause.as_ccnb());
        }
        c.element_end();
        c.element_end();
        c.into_vec()
    }

    /// Parse an encoded slice configuration.
    pub fn parse(bytes: &[u8]) -> crate::Result<Slice> {
        let mut d = BufDecoder::new(bytes);
        if !d.match_dtag(DTag::SyncConfigSlice) {
            return Err(Error::Msg(MsgError::WrongMessageType("SyncConfigSlice")));
        }
        d.advance();
        let version = d
            .opt_tagged_nonneg_int(DTag::SyncVersion)
            .ok_or(Error::Sync("missing slice version"))?;
        if version != SLICE_VERSION {
            return Err(Error::Sync("unsupported slice version"));
        }
        let topo = parse_name_element(&mut d, bytes)?;
        let prefix = parse_name_element(&mut d, bytes)?;
        let mut clauses = Vec::new();
        if !d.match_dtag(DTag::SyncConfigSliceList) {
            return Err(Error::Sync("missing slice clause list"));
        }
        d.advance();
        while d.match_dtag(DTag::SyncConfigSliceOp) {
            d.advance();
            let op = d.parse_nonneg_int();
            d.check_close();
            if d.failed() || op != Some(0) {
                return Err(Error::Sync("unsupported slice clause op"));
            }
            clauses.push(parse_name_element(&mut d, bytes)?);
        }
        d.check_close();
        d.check_close();
        if let Some(e) = d.error() {
            return Err(Error::Codec(e));
        }
        if !d.at_end() {
            return Err(Error::Sync("trailing bytes after slice"));
        }
        Ok(Slice {
            topo,
            prefix,
            clauses,
        })
    }

    /// SHA-256 of the canonical encoding; identifies the slice on the wire.
    pub fn hash(&self) -> [u8; 32] {
        sha256(&self.encode())
    }

    /// The name a stored slice configuration lives under:
    /// `/%C1.M.S.localhost/%C1.S.cs/<slice-hash>`.
    pub fn name(&self) -> Name {
        let mut nm = Name::new();
        nm.append(b"\xC1.M.S.localhost");
        nm.append(super::CMD_SLICE_CONTENT);
        nm.append(&self.hash());
        nm
    }
}

fn parse_name_element(d: &mut BufDecoder<'_>, bytes: &[u8]) -> crate::Result<Name> {
    let start = d.token_index();
    parse_name_at(d, None).map_err(Error::Msg)?;
    let stop = d.token_index();
    Name::from_ccnb(&bytes[start..stop]).map_err(Error::Msg)
}
