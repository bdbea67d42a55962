//! Pending-interest and interest-filter tables.

use crate::upcall::HandlerRef;
use std::time::Instant;

/// Sentinel carried by every expressed interest; damage means memory
/// corruption somewhere, which is a bug worth dying for.
pub(crate) const INTEREST_MAGIC: u32 = 0x7059_e5f4;

/// One expressed interest awaiting content.
pub(crate) struct ExpressedInterest {
    pub magic: u32,
    /// Stable identity so dispatch can re-find the entry after an upcall.
    pub serial: u64,
    /// The encoded interest message; empty once the entry is done.
    pub msg: Vec<u8>,
    pub handler: Option<HandlerRef>,
    /// Desired number of in-flight copies; zero marks the entry for reaping.
    pub target: i32,
    /// Currently outstanding (unanswered) copies; decays by half-lives.
    pub outstanding: i32,
    /// When the interest was last sent; `None` before the first send.
    pub last_sent: Option<Instant>,
}

impl ExpressedInterest {
    pub fn check(&self) {
        assert!(
            self.magic == INTEREST_MAGIC,
            "expressed interest sentinel damaged"
        );
    }

    pub fn live(&self) -> bool {
        self.target > 0 && self.handler.is_some()
    }
}

/// All interests expressed under one name prefix.
#[derive(Default)]
pub(crate) struct PrefixEntry {
    pub list: Vec<ExpressedInterest>,
}

/// One registered interest filter.
pub(crate) struct InterestFilter {
    pub handler: HandlerRef,
}
