//! Upcalls: how the engine notifies application code.
//!
//! A handler is registered once and then invoked for every event on that
//! registration. The engine holds the only long-lived references; when the
//! last registration referring to a handler is dropped, the handler receives
//! exactly one [`UpcallKind::Final`] upcall and can tear down its state.

use std::cell::RefCell;
use std::rc::Rc;

use ccn_msg::{ParsedContentObject, ParsedInterest};
use ccnb::IndexBuf;

use crate::client::Ccn;

/// What kind of event an upcall reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcallKind {
    /// Last upcall this registration will ever receive.
    Final,
    /// An incoming interest matched a registered filter.
    Interest,
    /// An incoming interest already consumed by another handler.
    ConsumedInterest,
    /// Verified content matching an expressed interest.
    Content,
    /// An expressed interest went unanswered past its half-life decay.
    InterestTimedOut,
    /// Content delivered without verification (verification deferred).
    ContentUnverified,
    /// Content whose signature verification failed.
    ContentBad,
    /// Content whose signing key is not available.
    ContentKeyMissing,
    /// Content delivered with verification not attempted.
    ContentRaw,
}

/// What a handler tells the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcallResult {
    /// The handler detected an error.
    Err,
    /// Normal return.
    Ok,
    /// Send the same interest again.
    Reexpress,
    /// The handler claims the incoming interest.
    InterestConsumed,
    /// Verify unverified content and deliver the outcome.
    Verify,
    /// Fetch the missing key, then redeliver.
    FetchKey,
}

/// Event details handed to a handler.
///
/// Everything borrows from the engine's dispatch frame; a handler that wants
/// to keep bytes must copy them.
#[derive(Default)]
pub struct UpcallInfo<'a> {
    /// The matched (or incoming) interest's encoded bytes.
    pub interest_msg: Option<&'a [u8]>,
    pub pi: Option<&'a ParsedInterest>,
    pub interest_comps: Option<&'a IndexBuf>,
    /// How many leading name components the match used.
    pub matched_comps: usize,
    /// Incoming content, for the content upcall kinds.
    pub content_msg: Option<&'a [u8]>,
    pub pco: Option<&'a ParsedContentObject>,
    pub content_comps: Option<&'a IndexBuf>,
}

/// Application code notified of protocol events.
pub trait Handler {
    fn upcall(&mut self, ccn: &mut Ccn, kind: UpcallKind, info: &UpcallInfo<'_>) -> UpcallResult;
}

impl<F> Handler for F
where
    F: FnMut(&mut Ccn, UpcallKind, &UpcallInfo<'_>) -> UpcallResult,
{
    fn upcall(&mut self, ccn: &mut Ccn, kind: UpcallKind, info: &UpcallInfo<'_>) -> UpcallResult {
        self(ccn, kind, info)
    }
}

/// A shared, engine-managed reference to a handler.
///
/// Cloning is registration bookkeeping, not a deep copy: all clones refer to
/// the same handler state.
#[derive(Clone)]
pub struct HandlerRef(Rc<RefCell<dyn Handler>>);

impl HandlerRef {
    pub fn new<H: Handler + 'static>(handler: H) -> HandlerRef {
        HandlerRef(Rc::new(RefCell::new(handler)))
    }

    /// Wrap a closure as a handler.
    pub fn from_fn<F>(f: F) -> HandlerRef
    where
        F: FnMut(&mut Ccn, UpcallKind, &UpcallInfo<'_>) -> UpcallResult + 'static,
    {
        HandlerRef::new(f)
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub(crate) fn call(
        &self,
        ccn: &mut Ccn,
        kind: UpcallKind,
        info: &UpcallInfo<'_>,
    ) -> UpcallResult {
        ccn.enter_upcall();
        let res = self.0.borrow_mut().upcall(ccn, kind, info);
        ccn.leave_upcall();
        res
    }

    /// Points at the same handler?
    pub fn same_as(&self, other: &HandlerRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HandlerRef(refs={})", Rc::strong_count(&self.0))
    }
}
