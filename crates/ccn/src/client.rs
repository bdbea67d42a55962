//! The client handle and its event loop.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ccn_msg::{
    content_matches_interest, parse_content_object, parse_interest, Name, ParsedContentObject,
    ParsedInterest,
};
use ccnb::{CharBuf, DTag, IndexBuf, SkeletonDecoder};
use ccn_transport::{Tap, TransportError, UnixTransport};
use log::{debug, error, info, trace, warn};

use crate::error::Error;
use crate::keys::{self, KeyStore};
use crate::pit::{ExpressedInterest, InterestFilter, PrefixEntry, INTEREST_MAGIC};
use crate::sched::{EventId, Scheduler};
use crate::upcall::{HandlerRef, UpcallInfo, UpcallKind, UpcallResult};
use crate::INTEREST_HALFLIFE_MICROSEC;

/// Inbound read reservation; also bounds one read's size.
const INBUF_RESERVE: usize = 8800;

/// Outcome of [`Ccn::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    /// Written to the socket in full.
    Sent,
    /// Appended to the output queue; the loop will drain it.
    Queued,
}

/// Identifies one expressed interest, for cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestId {
    pub(crate) prefix: Vec<u8>,
    pub(crate) serial: u64,
}

/// A client handle: one connection to the local daemon plus all the state
/// hanging off it.
///
/// Not thread-safe by design; every call must come from the one scheduling
/// context that owns the handle.
pub struct Ccn {
    transport: Option<UnixTransport>,
    outbuf: Vec<u8>,
    outbuf_index: usize,
    inbuf: Vec<u8>,
    decoder: SkeletonDecoder,
    interests_by_prefix: HashMap<Vec<u8>, PrefixEntry>,
    interest_filters: HashMap<Vec<u8>, InterestFilter>,
    default_content_handler: Option<HandlerRef>,
    default_interest_handler: Option<HandlerRef>,
    keystore: KeyStore,
    tap: Option<Tap>,
    pub(crate) sched: Scheduler,
    now: Instant,
    timeout_ms: i64,
    refresh_us: i64,
    last_error: Option<String>,
    verbose_error: bool,
    defer_verification: bool,
    in_upcall: u32,
    next_serial: u64,
}

impl Default for Ccn {
    fn default() -> Self {
        Ccn::new()
    }
}

impl Ccn {
    /// Create an unconnected handle. `CCN_DEBUG` enables verbose error
    /// notes; `CCN_TAP` opens the outbound byte tap.
    pub fn new() -> Ccn {
        let verbose_error = std::env::var(ccn_transport::config::DEBUG_ENV)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        Ccn {
            transport: None,
            outbuf: Vec::new(),
            outbuf_index: 0,
            inbuf: Vec::new(),
            decoder: SkeletonDecoder::new(),
            interests_by_prefix: HashMap::new(),
            interest_filters: HashMap::new(),
            default_content_handler: None,
            default_interest_handler: None,
            keystore: KeyStore::default(),
            tap: Tap::from_env(),
            sched: Scheduler::default(),
            now: Instant::now(),
            timeout_ms: -1,
            refresh_us: 5 * INTEREST_HALFLIFE_MICROSEC,
            last_error: None,
            verbose_error,
            defer_verification: false,
            in_upcall: 0,
            next_serial: 1,
        }
    }

    /// Connect to the daemon. `None` resolves the socket path from the
    /// environment. Pending interests from a previous connection are
    /// re-expressed by the aging pass; interest filters keep dispatching.
    pub fn connect(&mut self, name: Option<&str>) -> crate::Result<()> {
        if self.transport.is_some() {
            return Err(Error::AlreadyConnected);
        }
        let t = UnixTransport::connect(name)?;
        self.install_transport(t);
        Ok(())
    }

    /// Adopt an already-connected stream (tests use socketpairs).
    pub fn connect_stream(&mut self, stream: std::os::unix::net::UnixStream) -> crate::Result<()> {
        if self.transport.is_some() {
            return Err(Error::AlreadyConnected);
        }
        let t = UnixTransport::from_stream(stream)?;
        self.install_transport(t);
        Ok(())
    }

    fn install_transport(&mut self, t: UnixTransport) {
        self.transport = Some(t);
        self.now = Instant::now();
        self.last_error = None;
        info!("connected to daemon");
    }

    /// Drop the connection and its buffered I/O. Idempotent. Expressed
    /// interests survive and are re-expressed after a reconnect.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            debug!("disconnected");
        }
        self.inbuf.clear();
        self.outbuf.clear();
        self.outbuf_index = 0;
        self.decoder.reset();
    }

    pub fn connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Most recent error note, for diagnostics.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn note_error(&mut self, e: &Error) {
        if self.verbose_error {
            error!("client error: {e}");
        }
        self.last_error = Some(e.to_string());
    }

    /// Control where verification happens: when deferred, content arrives
    /// as [`UpcallKind::ContentUnverified`] and handlers opt in with
    /// [`UpcallResult::Verify`].
    pub fn defer_verification(&mut self, defer: bool) {
        self.defer_verification = defer;
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    pub fn keystore_mut(&mut self) -> &mut KeyStore {
        &mut self.keystore
    }

    pub(crate) fn enter_upcall(&mut self) {
        self.in_upcall += 1;
    }

    pub(crate) fn leave_upcall(&mut self) {
        self.in_upcall -= 1;
    }

    pub(crate) fn in_upcall(&self) -> bool {
        self.in_upcall > 0
    }

    /// Schedule a callback `delay` from now; runs inside the event loop.
    /// Returning a duration from the callback reschedules it.
    pub fn schedule(
        &mut self,
        delay: Duration,
        f: Box<dyn FnMut(&mut Ccn) -> Option<Duration>>,
    ) -> EventId {
        let deadline = Instant::now() + delay;
        self.sched.schedule(deadline, f)
    }

    pub fn cancel_event(&mut self, id: EventId) {
        self.sched.cancel(id);
    }

    // ---- output ----

    /// Is there queued output waiting for the socket?
    pub fn output_is_pending(&self) -> bool {
        self.outbuf_index < self.outbuf.len()
    }

    /// Send one complete ccnb element, queueing on backpressure.
    pub fn put(&mut self, bytes: &[u8]) -> crate::Result<PutStatus> {
        SkeletonDecoder::decode_element(bytes)?;
        if let Some(tap) = &mut self.tap {
            tap.write(bytes);
        }
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }
        if self.output_is_pending() {
            self.outbuf.extend_from_slice(bytes);
            self.pushout()?;
            return Ok(if self.output_is_pending() {
                PutStatus::Queued
            } else {
                PutStatus::Sent
            });
        }
        let t = self.transport.as_mut().expect("checked above");
        let written = match t.write(bytes) {
            Ok(n) => n,
            Err(e) if e.is_would_block() => 0,
            Err(e) => {
                let e = Error::from(e);
                self.note_error(&e);
                return Err(e);
            }
        };
        if written == bytes.len() {
            trace!("sent {} bytes", written);
            return Ok(PutStatus::Sent);
        }
        self.outbuf.clear();
        self.outbuf_index = 0;
        self.outbuf.extend_from_slice(&bytes[written..]);
        Ok(PutStatus::Queued)
    }

    /// Push queued output; partial writes advance the consumed cursor.
    pub(crate) fn pushout(&mut self) -> crate::Result<bool> {
        if !self.output_is_pending() {
            return Ok(false);
        }
        let Some(t) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };
        let span = &self.outbuf[self.outbuf_index..];
        let written = match t.write(span) {
            Ok(n) => n,
            Err(e) if e.is_would_block() => 0,
            Err(e) => {
                let e = Error::from(e);
                self.note_error(&e);
                return Err(e);
            }
        };
        self.outbuf_index += written;
        if !self.output_is_pending() {
            self.outbuf.clear();
            self.outbuf_index = 0;
            return Ok(false);
        }
        Ok(true)
    }

    // ---- tables ----

    /// Express an interest for `name`, with optional fields copied from an
    /// encoded `template` interest. The send happens on the next loop pass;
    /// `handler` receives content, timeout, and final upcalls.
    pub fn express_interest(
        &mut self,
        name: &Name,
        handler: HandlerRef,
        template: Option<&[u8]>,
    ) -> crate::Result<InterestId> {
        name.split(None)?;
        let msg = construct_interest(name, template)?;
        let key = name.inner_bytes().to_vec();
        let serial = self.next_serial;
        self.next_serial += 1;
        let entry = self.interests_by_prefix.entry(key.clone()).or_default();
        entry.list.push(ExpressedInterest {
            magic: INTEREST_MAGIC,
            serial,
            msg,
            handler: Some(handler),
            target: 1,
            outstanding: 0,
            last_sent: None,
        });
        trace!("expressed interest #{serial}");
        Ok(InterestId {
            prefix: key,
            serial,
        })
    }

    /// Withdraw an expressed interest; its handler gets a final upcall once
    /// no other registration refers to it.
    pub fn cancel_interest(&mut self, id: &InterestId) {
        let mut removed = None;
        if let Some(entry) = self.interests_by_prefix.get_mut(&id.prefix) {
            if let Some(pos) = entry.list.iter().position(|ie| ie.serial == id.serial) {
                let mut ie = entry.list.remove(pos);
                ie.check();
                removed = ie.handler.take();
            }
            if entry.list.is_empty() {
                self.interests_by_prefix.remove(&id.prefix);
            }
        }
        if let Some(h) = removed {
            self.finish_release(h);
        }
    }

    /// Register (or with `None`, remove) a handler for incoming interests
    /// under `name`.
    pub fn set_interest_filter(
        &mut self,
        name: &Name,
        handler: Option<HandlerRef>,
    ) -> crate::Result<()> {
        name.split(None)?;
        let key = name.inner_bytes().to_vec();
        let old = match handler {
            Some(h) => self
                .interest_filters
                .insert(key, InterestFilter { handler: h }),
            None => self.interest_filters.remove(&key),
        };
        if let Some(f) = old {
            self.finish_release(f.handler);
        }
        Ok(())
    }

    /// Handler consulted for interests no filter consumed.
    pub fn set_default_interest_handler(&mut self, handler: Option<HandlerRef>) {
        let old = std::mem::replace(&mut self.default_interest_handler, handler);
        if let Some(h) = old {
            self.finish_release(h);
        }
    }

    /// Handler offered every arriving content object.
    pub fn set_default_content_handler(&mut self, handler: Option<HandlerRef>) {
        let old = std::mem::replace(&mut self.default_content_handler, handler);
        if let Some(h) = old {
            self.finish_release(h);
        }
    }

    fn find_interest_mut(&mut self, key: &[u8], serial: u64) -> Option<&mut ExpressedInterest> {
        self.interests_by_prefix
            .get_mut(key)
            .and_then(|e| e.list.iter_mut().find(|ie| ie.serial == serial))
    }

    /// Deliver the final upcall when the engine drops its last reference.
    fn finish_release(&mut self, handler: HandlerRef) {
        if handler.strong_count() == 1 {
            let info = UpcallInfo::default();
            let _ = handler.call(self, UpcallKind::Final, &info);
        }
    }

    // ---- verification ----

    /// Verify a content object against the keystore (registered keys, or a
    /// self-certifying embedded Key blob).
    pub fn verify_content(
        &mut self,
        msg: &[u8],
        pco: &ParsedContentObject,
    ) -> crate::Result<()> {
        let digest = pco.publisher_key_digest(msg).map_err(Error::Msg)?;
        let key = match self.keystore.verify_key(digest) {
            Some(k) => k,
            None => match pco.key_locator_key(msg) {
                Some(blob) if keys::sha256(blob)[..] == *digest => self
                    .keystore
                    .admit_key_blob(blob)
                    .ok_or(Error::KeyMissing)?,
                _ => return Err(Error::KeyMissing),
            },
        };
        crate::signing::verify_signature(msg, pco, key.as_ref())
    }

    fn verification_kind(&mut self, msg: &[u8], pco: &ParsedContentObject) -> UpcallKind {
        match self.verify_content(msg, pco) {
            Ok(()) => UpcallKind::Content,
            Err(Error::KeyMissing) => UpcallKind::ContentKeyMissing,
            Err(_) => UpcallKind::ContentBad,
        }
    }

    /// Start fetching the key a KeyName locator points at; once registered,
    /// redelivery of the original content verifies normally.
    fn start_key_fetch(&mut self, msg: &[u8], pco: &ParsedContentObject) {
        let Ok(digest) = pco.publisher_key_digest(msg) else {
            return;
        };
        let wanted: [u8; 32] = match digest.try_into() {
            Ok(d) => d,
            Err(_) => return,
        };
        let Some(keyname_bytes) = pco.key_locator_keyname(msg) else {
            debug!("key missing and no KeyName locator; cannot fetch");
            return;
        };
        let Ok(keyname) = Name::from_ccnb(keyname_bytes) else {
            return;
        };
        let handler = HandlerRef::from_fn(move |ccn: &mut Ccn, kind, info: &UpcallInfo<'_>| {
            if matches!(
                kind,
                UpcallKind::Content
                    | UpcallKind::ContentUnverified
                    | UpcallKind::ContentRaw
                    | UpcallKind::ContentKeyMissing
            ) {
                if let (Some(cmsg), Some(pco)) = (info.content_msg, info.pco) {
                    if let Ok(blob) = pco.content_value(cmsg) {
                        if keys::sha256(blob) == wanted {
                            ccn.keystore_mut().admit_key_blob(blob);
                            debug!("fetched key {}", hex::encode(wanted));
                        }
                    }
                }
            }
            UpcallResult::Ok
        });
        if let Err(e) = self.express_interest(&keyname, handler, None) {
            warn!("key fetch failed to start: {e}");
        }
    }

    // ---- input and dispatch ----

    pub(crate) fn process_input(&mut self) -> crate::Result<()> {
        let Some(t) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };
        let mut chunk = [0u8; INBUF_RESERVE];
        let n = match t.read(&mut chunk) {
            Ok(n) => n,
            Err(TransportError::ConnectionClosed) => {
                debug!("peer closed the connection");
                self.disconnect();
                return Ok(());
            }
            Err(e) => {
                let e = Error::from(e);
                self.note_error(&e);
                return Err(e);
            }
        };
        if n == 0 {
            return Ok(());
        }
        if self.inbuf.is_empty() {
            self.decoder.reset();
        }
        self.inbuf.extend_from_slice(&chunk[..n]);
        let consumed = self.decoder.index;
        self.decoder.decode(&self.inbuf[consumed..]);
        let mut msgstart = 0usize;
        loop {
            if let Some(e) = self.decoder.error() {
                // corrupt framing from the daemon is unrecoverable
                let e = Error::from(e);
                self.note_error(&e);
                self.disconnect();
                return Err(e);
            }
            if !(self.decoder.is_final() && self.decoder.index > msgstart) {
                break;
            }
            let end = self.decoder.index;
            let msg = self.inbuf[msgstart..end].to_vec();
            self.dispatch_message(&msg);
            if self.transport.is_none() {
                // a handler disconnected us
                self.inbuf.clear();
                self.decoder.reset();
                return Ok(());
            }
            msgstart = end;
            if msgstart == self.inbuf.len() {
                self.inbuf.clear();
                self.decoder.reset();
                return Ok(());
            }
            let consumed = self.decoder.index;
            self.decoder.decode(&self.inbuf[consumed..]);
        }
        if msgstart > 0 && msgstart < self.inbuf.len() {
            // keep the partial tail at the buffer start
            self.inbuf.drain(..msgstart);
            self.decoder.index -= msgstart;
        }
        Ok(())
    }

    pub(crate) fn dispatch_message(&mut self, msg: &[u8]) {
        let mut comps = IndexBuf::new();
        match parse_interest(msg, Some(&mut comps)) {
            Ok(pi) => {
                trace!("incoming interest, {} comps", pi.prefix_comps);
                self.deliver_interest(msg, &pi, &comps);
                return;
            }
            Err(_) => comps.clear(),
        }
        match parse_content_object(msg, Some(&mut comps)) {
            Ok(pco) => {
                trace!("incoming content, {} comps", pco.name_ncomps);
                self.deliver_content(msg, pco, &comps);
            }
            Err(e) => {
                debug!("discarding unhandled message: {e}");
            }
        }
    }

    fn deliver_interest(&mut self, msg: &[u8], pi: &ParsedInterest, comps: &IndexBuf) {
        let mut kind = UpcallKind::Interest;
        if !comps.is_empty() {
            let keystart = comps[0];
            for i in (0..=comps.ncomps()).rev() {
                let key = &msg[keystart..comps[i]];
                let handler = self.interest_filters.get(key).map(|f| f.handler.clone());
                if let Some(h) = handler {
                    let info = UpcallInfo {
                        interest_msg: Some(msg),
                        pi: Some(pi),
                        interest_comps: Some(comps),
                        matched_comps: i,
                        ..Default::default()
                    };
                    let res = h.call(self, kind, &info);
                    if res == UpcallResult::InterestConsumed {
                        kind = UpcallKind::ConsumedInterest;
                    }
                }
            }
        }
        if let Some(h) = self.default_interest_handler.clone() {
            let info = UpcallInfo {
                interest_msg: Some(msg),
                pi: Some(pi),
                interest_comps: Some(comps),
                matched_comps: 0,
                ..Default::default()
            };
            let _ = h.call(self, kind, &info);
        }
    }

    fn deliver_content(&mut self, msg: &[u8], mut pco: ParsedContentObject, comps: &IndexBuf) {
        if comps.is_empty() {
            return;
        }
        let keystart = comps[0];
        for i in (0..=comps.ncomps()).rev() {
            let key = msg[keystart..comps[i]].to_vec();
            let serials: Vec<u64> = match self.interests_by_prefix.get(&key) {
                Some(e) => e.list.iter().map(|ie| ie.serial).collect(),
                None => continue,
            };
            for serial in serials {
                let Some((imsg, handler)) = self.find_interest_mut(&key, serial).and_then(|ie| {
                    ie.check();
                    if ie.target > 0 && ie.outstanding > 0 {
                        ie.handler
                            .clone()
                            .map(|h| (ie.msg.clone(), h))
                    } else {
                        None
                    }
                }) else {
                    continue;
                };
                let mut icomps = IndexBuf::new();
                let Ok(pi) = parse_interest(&imsg, Some(&mut icomps)) else {
                    continue;
                };
                if !content_matches_interest(msg, &mut pco, comps, true, &imsg, &pi) {
                    continue;
                }
                if let Some(ie) = self.find_interest_mut(&key, serial) {
                    ie.outstanding -= 1;
                }
                let res =
                    self.content_upcall(&handler, &imsg, &pi, &icomps, i, msg, &mut pco, comps);
                drop(handler);
                if res == UpcallResult::Reexpress {
                    self.refresh_interest_entry(&key, serial);
                } else {
                    let removed = self.find_interest_mut(&key, serial).and_then(|ie| {
                        ie.target = 0;
                        ie.msg.clear();
                        ie.handler.take()
                    });
                    if let Some(h) = removed {
                        self.finish_release(h);
                    }
                }
            }
        }
        if let Some(h) = self.default_content_handler.clone() {
            let info = UpcallInfo {
                content_msg: Some(msg),
                pco: Some(&pco),
                content_comps: Some(comps),
                matched_comps: 0,
                ..Default::default()
            };
            let _ = h.call(self, UpcallKind::Content, &info);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn content_upcall(
        &mut self,
        handler: &HandlerRef,
        imsg: &[u8],
        pi: &ParsedInterest,
        icomps: &IndexBuf,
        matched_comps: usize,
        msg: &[u8],
        pco: &mut ParsedContentObject,
        ccomps: &IndexBuf,
    ) -> UpcallResult {
        let mut kind = if self.defer_verification {
            UpcallKind::ContentUnverified
        } else {
            self.verification_kind(msg, pco)
        };
        loop {
            let res = {
                let info = UpcallInfo {
                    interest_msg: Some(imsg),
                    pi: Some(pi),
                    interest_comps: Some(icomps),
                    matched_comps,
                    content_msg: Some(msg),
                    pco: Some(&*pco),
                    content_comps: Some(ccomps),
                };
                handler.call(self, kind, &info)
            };
            match res {
                UpcallResult::Verify
                    if matches!(
                        kind,
                        UpcallKind::ContentUnverified | UpcallKind::ContentRaw
                    ) =>
                {
                    kind = self.verification_kind(msg, pco);
                }
                UpcallResult::FetchKey if kind == UpcallKind::ContentKeyMissing => {
                    self.start_key_fetch(msg, pco);
                    // refresh so the content comes back once the key is known
                    return UpcallResult::Reexpress;
                }
                other => return other,
            }
        }
    }

    // ---- interest aging ----

    fn refresh_interest_entry(&mut self, key: &[u8], serial: u64) {
        let msg = match self.find_interest_mut(key, serial) {
            Some(ie) if ie.outstanding < ie.target && !ie.msg.is_empty() => ie.msg.clone(),
            _ => return,
        };
        match self.put(&msg) {
            Ok(_) => {
                let now = self.now;
                if let Some(ie) = self.find_interest_mut(key, serial) {
                    ie.outstanding += 1;
                    ie.last_sent = Some(now);
                }
            }
            Err(e) => {
                debug!("interest refresh not sent: {e}");
            }
        }
    }

    fn age_interests(&mut self) {
        if self.output_is_pending() {
            return;
        }
        let now = self.now;
        let keys: Vec<Vec<u8>> = self.interests_by_prefix.keys().cloned().collect();
        for key in keys {
            let serials: Vec<u64> = match self.interests_by_prefix.get(&key) {
                Some(e) => e
                    .list
                    .iter()
                    .map(|ie| {
                        ie.check();
                        ie.serial
                    })
                    .collect(),
                None => continue,
            };
            for serial in serials {
                self.age_one_interest(&key, serial, now);
            }
            self.reap_entry(&key);
        }
    }

    fn age_one_interest(&mut self, key: &[u8], serial: u64, now: Instant) {
        let halflife = INTEREST_HALFLIFE_MICROSEC;
        let mut refresh_candidate = self.refresh_us;
        let staged = {
            let Some(ie) = self.find_interest_mut(key, serial) else {
                return;
            };
            if ie.target <= 0 {
                return;
            }
            let firstcall = ie.last_sent.is_none();
            let mut delta_us: i64 = match ie.last_sent {
                None => 30_000_000,
                Some(t) => now
                    .duration_since(t)
                    .as_micros()
                    .min(i64::MAX as u128) as i64,
            };
            if delta_us > 30_000_000 {
                // clamp so decay arithmetic stays bounded
                ie.outstanding = 0;
                delta_us = 30_000_000;
            }
            while delta_us >= halflife {
                ie.outstanding /= 2;
                delta_us -= halflife;
            }
            refresh_candidate = refresh_candidate.min(halflife - delta_us);
            let carried = Duration::from_micros(delta_us as u64);
            ie.last_sent = Some(now.checked_sub(carried).unwrap_or(now));
            if ie.outstanding == 0 {
                Some((firstcall, ie.msg.clone(), ie.handler.clone()))
            } else {
                None
            }
        };
        self.refresh_us = refresh_candidate;
        let Some((firstcall, msg, handler)) = staged else {
            return;
        };
        let mut res = UpcallResult::Reexpress;
        if !firstcall {
            if let Some(h) = handler {
                let mut comps = IndexBuf::new();
                let pi = parse_interest(&msg, Some(&mut comps))
                    .unwrap_or_else(|e| panic!("expressed interest bytes corrupted: {e}"));
                let info = UpcallInfo {
                    interest_msg: Some(&msg),
                    pi: Some(&pi),
                    interest_comps: Some(&comps),
                    ..Default::default()
                };
                res = h.call(self, UpcallKind::InterestTimedOut, &info);
            } else {
                res = UpcallResult::Ok;
            }
        }
        if res == UpcallResult::Reexpress {
            self.refresh_interest_entry(key, serial);
        } else if let Some(ie) = self.find_interest_mut(key, serial) {
            ie.target = 0;
        }
    }

    fn reap_entry(&mut self, key: &[u8]) {
        let mut released = Vec::new();
        if let Some(entry) = self.interests_by_prefix.get_mut(key) {
            entry.list.retain_mut(|ie| {
                ie.check();
                if ie.target == 0 || !ie.live() {
                    ie.msg.clear();
                    if let Some(h) = ie.handler.take() {
                        released.push(h);
                    }
                    false
                } else {
                    true
                }
            });
            if entry.list.is_empty() {
                self.interests_by_prefix.remove(key);
            }
        }
        for h in released {
            self.finish_release(h);
        }
    }

    // ---- the run loop ----

    /// Re-arm the running loop's budget; 0 makes it return at the next
    /// quiescent point. Returns the previous value.
    pub fn set_run_timeout(&mut self, timeout_ms: i64) -> i64 {
        std::mem::replace(&mut self.timeout_ms, timeout_ms)
    }

    /// Process events until `timeout_ms` elapses (`-1` runs until
    /// disconnect). Errors with [`Error::NotConnected`] when the connection
    /// goes away.
    pub fn run(&mut self, timeout_ms: i64) -> crate::Result<()> {
        if self.in_upcall() {
            return Err(Error::Reentrant);
        }
        self.timeout_ms = timeout_ms;
        let mut start: Option<Instant> = None;
        let mut did_pass = false;
        while self.transport.is_some() {
            self.refresh_us = 5 * INTEREST_HALFLIFE_MICROSEC;
            self.now = Instant::now();
            self.age_interests();
            self.run_due_events();
            if self.transport.is_none() {
                break;
            }
            let timeout = self.timeout_ms;
            let now = self.now;
            let elapsed_ms = match start {
                None => {
                    start = Some(now);
                    0
                }
                Some(s) => now.duration_since(s).as_millis().min(i64::MAX as u128) as i64,
            };
            if timeout >= 0 && (elapsed_ms > timeout || (timeout == 0 && did_pass)) {
                return Ok(());
            }
            let mut millis = self.refresh_us / 1000;
            if let Some(due) = self.sched.next_deadline() {
                let until = due.saturating_duration_since(now).as_millis() as i64;
                millis = millis.min(until.max(1));
            }
            if timeout >= 0 {
                millis = millis.min((timeout - elapsed_ms).max(0));
            }
            let want_write = self.output_is_pending();
            let readiness = match &self.transport {
                Some(t) => t.poll(want_write, millis.clamp(0, i32::MAX as i64) as i32)?,
                None => break,
            };
            if readiness.writable {
                let _ = self.pushout();
            }
            if readiness.readable {
                if let Err(e) = self.process_input() {
                    debug!("input processing error: {e}");
                }
            }
            did_pass = true;
        }
        Err(Error::NotConnected)
    }

    fn run_due_events(&mut self) {
        let due = self.sched.take_due(self.now);
        for (id, mut f) in due {
            if let Some(delay) = f(self) {
                let deadline = Instant::now() + delay;
                self.sched.requeue(id, deadline, f);
            }
        }
    }

    /// Fetch a single content object synchronously.
    ///
    /// Expresses the interest, runs the loop until a matching object
    /// arrives or `timeout_ms` passes, and returns the raw message bytes.
    /// Not callable from inside an upcall.
    pub fn get(
        &mut self,
        name: &Name,
        template: Option<&[u8]>,
        timeout_ms: i64,
    ) -> crate::Result<Option<Vec<u8>>> {
        if self.in_upcall() {
            return Err(Error::Reentrant);
        }
        if self.transport.is_none() {
            return Err(Error::NotConnected);
        }
        let result: Rc<std::cell::RefCell<Option<Vec<u8>>>> =
            Rc::new(std::cell::RefCell::new(None));
        let slot = result.clone();
        let handler = HandlerRef::from_fn(move |ccn: &mut Ccn, kind, info: &UpcallInfo<'_>| {
            match kind {
                UpcallKind::Content | UpcallKind::ContentUnverified | UpcallKind::ContentRaw => {
                    if let Some(msg) = info.content_msg {
                        *slot.borrow_mut() = Some(msg.to_vec());
                    }
                    ccn.set_run_timeout(0);
                    UpcallResult::Ok
                }
                UpcallKind::ContentKeyMissing => UpcallResult::FetchKey,
                UpcallKind::InterestTimedOut => UpcallResult::Reexpress,
                _ => UpcallResult::Ok,
            }
        });
        let id = self.express_interest(name, handler, template)?;
        let saved_timeout = self.timeout_ms;
        let run_res = self.run(timeout_ms.max(0));
        self.cancel_interest(&id);
        self.timeout_ms = saved_timeout;
        match run_res {
            Ok(()) => {}
            Err(Error::NotConnected) if result.borrow().is_some() => {}
            Err(e) => return Err(e),
        }
        let value = result.borrow_mut().take();
        Ok(value)
    }
}

/// Assemble the interest for `name`, copying the optional-field block and
/// the experimental tail from an encoded template.
fn construct_interest(name: &Name, template: Option<&[u8]>) -> crate::Result<Vec<u8>> {
    let mut c = CharBuf::new();
    c.element_begin(DTag::Interest);
    c.append(name.as_ccnb());
    if let Some(t) = template {
        let pi = parse_interest(t, None)?;
        c.append(&t[pi.e_name..pi.e_nonce]);
        if pi.e_other > pi.b_other {
            c.append(&t[pi.b_other..pi.e_other]);
        }
    }
    c.element_end();
    Ok(c.into_vec())
}
