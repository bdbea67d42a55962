//! The sync engine: root advises, node fetches, heartbeat, and update
//! application.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ccn_msg::{component_at, excluded, ExcludeBuilder, InterestTemplate, Name};
use log::{debug, info, trace, warn};

use crate::client::Ccn;
use crate::error::Error;
use crate::keys::{sha256, HmacKey, SigningKey};
use crate::sched::EventId;
use crate::signing::{sign_content, SigningParams};
use crate::sync::cache::{HashCache, STATE_FETCHING, STATE_REMOTE};
use crate::sync::compare::{
    do_comparison, do_preload, note_fetch_failure, CompareState, ComparePhase, StepResult,
};
use crate::sync::node::{build_tree, SyncNode};
use crate::sync::slice::Slice;
use crate::sync::{
    CMD_NODE_FETCH, CMD_ROOT_ADVISE, COMPARE_ASSUME_BAD_SECS, EXCLUSION_LIMIT,
    EXCLUSION_TRIG_SECS, FETCH_LIFETIME_SEC, HEARTBEAT_MICROS, MAX_FETCH_BUSY,
    ROOT_ADVISE_LIFETIME_SEC, UPDATE_STALL_SECS,
};

/// Called once per name newly observed in the slice.
pub type SyncCallback = Box<dyn FnMut(&Name)>;

/// A remote root hash we have recently heard about, most recent first.
struct RemoteSeen {
    hash: Vec<u8>,
    last_seen: Instant,
}

pub(crate) struct RootState {
    slice: Slice,
    slice_hash: [u8; 32],
    current_hash: Vec<u8>,
    cache: HashCache,
    local_names: Vec<Vec<u8>>,
    remote_seen: Vec<RemoteSeen>,
    compare: Option<CompareState>,
    callback: SyncCallback,
    signer: Rc<dyn SigningKey>,
    advise_gen: u64,
    advise_pending: bool,
    closed: bool,
}

/// An open synchronization slice on a handle.
///
/// Dropping the handle does not stop the engine; call
/// [`close`](SyncHandle::close).
pub struct SyncHandle {
    state: Rc<RefCell<RootState>>,
    heartbeat: EventId,
    advise_prefix: Name,
    fetch_prefix: Name,
}

impl SyncHandle {
    /// Start synchronizing `slice`, invoking `callback` for every name the
    /// engine learns from peers.
    pub fn open(ccn: &mut Ccn, slice: &Slice, callback: SyncCallback) -> crate::Result<SyncHandle> {
        let slice_hash = slice.hash();
        let signer: Rc<dyn SigningKey> = match ccn.keystore().signer() {
            Some(s) => s,
            // without a configured key, both peers of a slice derive the
            // same HMAC key; node payloads are hash-checked regardless
            None => Rc::new(HmacKey::new(&slice_hash)),
        };
        let state = Rc::new(RefCell::new(RootState {
            slice: slice.clone(),
            slice_hash,
            current_hash: Vec::new(),
            cache: HashCache::default(),
            local_names: Vec::new(),
            remote_seen: Vec::new(),
            compare: None,
            callback,
            signer,
            advise_gen: 0,
            advise_pending: false,
            closed: false,
        }));

        let advise_prefix = command_prefix(slice, CMD_ROOT_ADVISE, &slice_hash);
        let fetch_prefix = command_prefix(slice, CMD_NODE_FETCH, &slice_hash);
        let hash_index = slice.topo().count().map_err(Error::Msg)? + 2;

        register_advise_filter(ccn, &state, &advise_prefix, hash_index)?;
        register_fetch_filter(ccn, &state, &fetch_prefix, hash_index)?;

        send_root_advise(ccn, &state)?;

        let rc = state.clone();
        let heartbeat = ccn.schedule(
            Duration::from_micros(HEARTBEAT_MICROS),
            Box::new(move |ccn| heartbeat_tick(ccn, &rc)),
        );

        info!("sync open, slice {}", hex::encode(&slice_hash[..8]));
        Ok(SyncHandle {
            state,
            heartbeat,
            advise_prefix,
            fetch_prefix,
        })
    }

    /// The current local root hash (empty while the set is empty).
    pub fn root_hash(&self) -> Vec<u8> {
        self.state.borrow().current_hash.clone()
    }

    /// The names currently in the local set.
    pub fn local_names(&self) -> Vec<Name> {
        self.state
            .borrow()
            .local_names
            .iter()
            .filter_map(|n| Name::from_ccnb(n).ok())
            .collect()
    }

    /// Add a locally known name to the slice; advertises the new root.
    /// Returns false when the name is outside the slice or already present.
    pub fn add_name(&self, ccn: &mut Ccn, name: &Name) -> crate::Result<bool> {
        let changed = {
            let mut st = self.state.borrow_mut();
            if !st.slice.covers(name) {
                return Ok(false);
            }
            if insert_name(&mut st.local_names, name.as_ccnb()) {
                rebuild_local_tree(&mut st);
                true
            } else {
                false
            }
        };
        if changed {
            send_root_advise(ccn, &self.state)?;
        }
        Ok(changed)
    }

    /// Stop the engine, returning the final root hash.
    pub fn close(self, ccn: &mut Ccn) -> Vec<u8> {
        ccn.cancel_event(self.heartbeat);
        let _ = ccn.set_interest_filter(&self.advise_prefix, None);
        let _ = ccn.set_interest_filter(&self.fetch_prefix, None);
        let mut st = self.state.borrow_mut();
        st.closed = true;
        st.compare = None;
        st.current_hash.clone()
    }
}

/// `<topo>/<cmd>/<slice-hash>`
fn command_prefix(slice: &Slice, cmd: &[u8], slice_hash: &[u8; 32]) -> Name {
    let mut n = slice.topo().clone();
    n.append(cmd);
    n.append(slice_hash);
    n
}

fn insert_name(names: &mut Vec<Vec<u8>>, name: &[u8]) -> bool {
    match names.binary_search_by(|probe| ccn_msg::compare_names(probe, name).cmp(&0)) {
        Ok(_) => false,
        Err(pos) => {
            names.insert(pos, name.to_vec());
            true
        }
    }
}

fn rebuild_local_tree(st: &mut RootState) {
    let nodes = build_tree(&st.local_names);
    st.current_hash = match nodes.last() {
        Some(root) => root.hash().to_vec(),
        None => Vec::new(),
    };
    for node in nodes {
        st.cache.store_local(Rc::new(node));
    }
    trace!(
        "local tree rebuilt: {} names, root {}",
        st.local_names.len(),
        hex::encode(&st.current_hash)
    );
}

/// Note a remote root hash: enter it in the cache, keep the seen list in
/// most-recent-first order, and mark it covered if we already own it.
fn note_remote_hash(st: &mut RootState, hash: &[u8]) {
    if hash.is_empty() {
        return;
    }
    let entry = st.cache.enter(hash, STATE_REMOTE);
    entry.is_covered();
    let now = Instant::now();
    entry.last_used = now;
    if let Some(pos) = st.remote_seen.iter().position(|r| r.hash == hash) {
        let mut r = st.remote_seen.remove(pos);
        r.last_seen = now;
        st.remote_seen.insert(0, r);
    } else {
        st.remote_seen.insert(
            0,
            RemoteSeen {
                hash: hash.to_vec(),
                last_seen: now,
            },
        );
    }
}

/// Pick the freshest remote root worth comparing against; prunes entries
/// that are covered or stale.
fn choose_remote_hash(st: &mut RootState) -> Option<Vec<u8>> {
    let now = Instant::now();
    let limit = Duration::from_secs(3 * ROOT_ADVISE_LIFETIME_SEC);
    let RootState {
        remote_seen, cache, ..
    } = st;
    let mut chosen = None;
    remote_seen.retain(|r| {
        if chosen.is_some() {
            return true;
        }
        let covered = cache
            .lookup_mut(&r.hash)
            .map(|e| e.is_covered())
            .unwrap_or(false);
        let fresh = now.duration_since(r.last_seen) < limit;
        if covered || !fresh {
            return false;
        }
        chosen = Some(r.hash.clone());
        true
    });
    chosen
}

/// Build the advise Exclude: our current hash plus recently-seen covered
/// remote roots, canonically sorted, capped near the byte budget.
fn build_exclusions(st: &mut RootState) -> Option<Vec<u8>> {
    let mut builder = ExcludeBuilder::new();
    let mut count = 0usize;
    if !st.current_hash.is_empty() {
        count += st.current_hash.len() + 8;
        builder.push(&st.current_hash);
    }
    let now = Instant::now();
    let trig = Duration::from_secs(EXCLUSION_TRIG_SECS);
    for seen in &st.remote_seen {
        let covered = st
            .cache
            .lookup(&seen.hash)
            .map(|e| e.state & crate::sync::cache::STATE_COVERED != 0)
            .unwrap_or(false);
        if !covered || now.duration_since(seen.last_seen) >= trig {
            continue;
        }
        count += seen.hash.len() + 8;
        if count > EXCLUSION_LIMIT {
            // ignore earlier roots rather than overflow the interest
            break;
        }
        builder.push(&seen.hash);
    }
    builder.encode()
}

/// Express (or re-express under a new generation) our root-advise interest.
fn send_root_advise(ccn: &mut Ccn, state: &Rc<RefCell<RootState>>) -> crate::Result<()> {
    let (name, template, gen, skip) = {
        let mut st = state.borrow_mut();
        if st.closed {
            return Ok(());
        }
        st.advise_gen += 1;
        st.advise_pending = true;
        let gen = st.advise_gen;
        let mut name = command_prefix(&st.slice, CMD_ROOT_ADVISE, &st.slice_hash);
        name.append(&st.current_hash);
        let skip = name.count().map_err(Error::Msg)?;
        let mut t = InterestTemplate::new();
        t.scope = Some(1);
        t.lifetime_units = Some((ROOT_ADVISE_LIFETIME_SEC as u64) << 12);
        t.exclude = build_exclusions(&mut st);
        (name, t.encode(&Name::new()), gen, skip)
    };
    let rc = state.clone();
    let handler = crate::upcall::HandlerRef::from_fn(
        move |ccn: &mut Ccn, kind, info: &crate::upcall::UpcallInfo<'_>| {
            advise_response(ccn, &rc, gen, skip, kind, info)
        },
    );
    ccn.express_interest(&name, handler, Some(&template))?;
    debug!("root advise sent, gen {gen}");
    Ok(())
}

fn advise_response(
    _ccn: &mut Ccn,
    state: &Rc<RefCell<RootState>>,
    gen: u64,
    skip: usize,
    kind: crate::upcall::UpcallKind,
    info: &crate::upcall::UpcallInfo<'_>,
) -> crate::upcall::UpcallResult {
    use crate::upcall::{UpcallKind, UpcallResult};
    match kind {
        UpcallKind::Final => UpcallResult::Ok,
        UpcallKind::InterestTimedOut => {
            let st = state.borrow();
            if st.closed || st.advise_gen != gen {
                return UpcallResult::Ok;
            }
            // keep asking as long as we want a response
            UpcallResult::Reexpress
        }
        UpcallKind::Content
        | UpcallKind::ContentRaw
        | UpcallKind::ContentUnverified
        | UpcallKind::ContentKeyMissing => {
            let (Some(msg), Some(pco), Some(comps)) =
                (info.content_msg, info.pco, info.content_comps)
            else {
                return UpcallResult::Err;
            };
            let Some(peer_hash) = component_at(msg, comps, skip).map(|h| h.to_vec()) else {
                debug!("advise response without a root hash component");
                return UpcallResult::Ok;
            };
            let node = pco
                .content_value(msg)
                .ok()
                .and_then(|payload| extract_node(payload, &peer_hash));
            {
                let mut st = state.borrow_mut();
                if st.closed || st.advise_gen != gen {
                    return UpcallResult::Ok;
                }
                st.advise_pending = false;
                note_remote_hash(&mut st, &peer_hash);
                let covered = st
                    .cache
                    .lookup_mut(&peer_hash)
                    .map(|e| e.is_covered())
                    .unwrap_or(false);
                if !covered {
                    if let Some(node) = node {
                        st.cache.store_remote(Rc::new(node));
                        debug!("remote root entered: {}", hex::encode(&peer_hash));
                    }
                }
            }
            // the heartbeat starts the comparison round
            UpcallResult::Ok
        }
        _ => UpcallResult::Ok,
    }
}

/// Parse a node payload and require that it hashes to its advertised
/// address (node payloads are self-certifying).
fn extract_node(payload: &[u8], expected_hash: &[u8]) -> Option<SyncNode> {
    let node = SyncNode::parse(payload).ok()?;
    if sha256(payload)[..] != *expected_hash {
        warn!("node payload does not match its hash; discarded");
        return None;
    }
    Some(node)
}

fn register_advise_filter(
    ccn: &mut Ccn,
    state: &Rc<RefCell<RootState>>,
    prefix: &Name,
    hash_index: usize,
) -> crate::Result<()> {
    let rc = state.clone();
    let handler = crate::upcall::HandlerRef::from_fn(
        move |ccn: &mut Ccn, kind, info: &crate::upcall::UpcallInfo<'_>| {
            if kind != crate::upcall::UpcallKind::Interest {
                return crate::upcall::UpcallResult::Ok;
            }
            advise_arrived(ccn, &rc, hash_index, info)
        },
    );
    ccn.set_interest_filter(prefix, Some(handler))
}

/// A peer's root-advise interest arrived: note its hash and, when our root
/// is different and not excluded, answer with our root node.
fn advise_arrived(
    ccn: &mut Ccn,
    state: &Rc<RefCell<RootState>>,
    hash_index: usize,
    info: &crate::upcall::UpcallInfo<'_>,
) -> crate::upcall::UpcallResult {
    use crate::upcall::UpcallResult;
    let (Some(msg), Some(pi), Some(comps)) = (info.interest_msg, info.pi, info.interest_comps)
    else {
        return UpcallResult::Err;
    };
    if !pi.answer_origin_kind.new_ok() {
        return UpcallResult::Ok;
    }
    let sender_hash = component_at(msg, comps, hash_index)
        .map(|h| h.to_vec())
        .unwrap_or_default();
    let response = {
        let mut st = state.borrow_mut();
        if st.closed {
            return UpcallResult::Ok;
        }
        if !sender_hash.is_empty() && sender_hash != st.current_hash {
            note_remote_hash(&mut st, &sender_hash);
        }
        if st.current_hash.is_empty() || st.current_hash == sender_hash {
            None
        } else if pi
            .exclude(msg)
            .is_some_and(|excl| excluded(excl, &st.current_hash))
        {
            trace!("our root is excluded; peer already covers it");
            None
        } else {
            let payload = st
                .cache
                .node_for(&st.current_hash)
                .map(|n| n.encoded().to_vec());
            payload.map(|p| {
                let hash = st.current_hash.clone();
                (hash, p, st.signer.clone())
            })
        }
    };
    let Some((our_hash, payload, signer)) = response else {
        return UpcallResult::Ok;
    };
    let Ok(mut name) = Name::from_ccnb(&msg[pi.b_name..pi.e_name]) else {
        return UpcallResult::Err;
    };
    name.append(&our_hash);
    match sign_content(signer.as_ref(), &name, &SigningParams::default(), &payload) {
        Ok(content) => {
            if let Err(e) = ccn.put(&content) {
                warn!("could not answer root advise: {e}");
                return UpcallResult::Ok;
            }
            debug!("answered root advise with {}", hex::encode(&our_hash));
            UpcallResult::InterestConsumed
        }
        Err(e) => {
            warn!("could not sign advise response: {e}");
            UpcallResult::Ok
        }
    }
}

fn register_fetch_filter(
    ccn: &mut Ccn,
    state: &Rc<RefCell<RootState>>,
    prefix: &Name,
    hash_index: usize,
) -> crate::Result<()> {
    let rc = state.clone();
    let handler = crate::upcall::HandlerRef::from_fn(
        move |ccn: &mut Ccn, kind, info: &crate::upcall::UpcallInfo<'_>| {
            if kind != crate::upcall::UpcallKind::Interest {
                return crate::upcall::UpcallResult::Ok;
            }
            fetch_arrived(ccn, &rc, hash_index, info)
        },
    );
    ccn.set_interest_filter(prefix, Some(handler))
}

/// A peer asked for a node by hash; serve it from the cache.
fn fetch_arrived(
    ccn: &mut Ccn,
    state: &Rc<RefCell<RootState>>,
    hash_index: usize,
    info: &crate::upcall::UpcallInfo<'_>,
) -> crate::upcall::UpcallResult {
    use crate::upcall::UpcallResult;
    let (Some(msg), Some(pi), Some(comps)) = (info.interest_msg, info.pi, info.interest_comps)
    else {
        return UpcallResult::Err;
    };
    let Some(hash) = component_at(msg, comps, hash_index).map(|h| h.to_vec()) else {
        return UpcallResult::Ok;
    };
    let response = {
        let st = state.borrow();
        if st.closed {
            return UpcallResult::Ok;
        }
        st.cache
            .node_for(&hash)
            .map(|n| (n.encoded().to_vec(), st.signer.clone()))
    };
    let Some((payload, signer)) = response else {
        trace!("node fetch for unknown hash {}", hex::encode(&hash));
        return UpcallResult::Ok;
    };
    let Ok(name) = Name::from_ccnb(&msg[pi.b_name..pi.e_name]) else {
        return UpcallResult::Err;
    };
    match sign_content(signer.as_ref(), &name, &SigningParams::default(), &payload) {
        Ok(content) => {
            if ccn.put(&content).is_err() {
                return UpcallResult::Ok;
            }
            UpcallResult::InterestConsumed
        }
        Err(e) => {
            warn!("could not sign node response: {e}");
            UpcallResult::Ok
        }
    }
}

/// Express a node-fetch interest for `hash`.
fn start_node_fetch(ccn: &mut Ccn, state: &Rc<RefCell<RootState>>, hash: &[u8]) {
    let name = {
        let mut st = state.borrow_mut();
        if st.closed {
            return;
        }
        let entry = st.cache.enter(hash, STATE_REMOTE);
        if entry.state & STATE_FETCHING != 0 {
            return;
        }
        entry.state |= STATE_FETCHING;
        entry.busy += 1;
        if let Some(comp) = st.compare.as_mut() {
            comp.node_fetch_busy += 1;
        }
        let mut name = command_prefix(&st.slice, CMD_NODE_FETCH, &st.slice_hash);
        name.append(hash);
        name
    };
    let mut t = InterestTemplate::new();
    t.scope = Some(1);
    t.lifetime_units = Some((FETCH_LIFETIME_SEC as u64) << 12);
    t.max_suffix_comps = Some(1);
    let template = t.encode(&Name::new());
    let rc = state.clone();
    let wanted_hash = hash.to_vec();
    let handler = crate::upcall::HandlerRef::from_fn(
        move |ccn: &mut Ccn, kind, info: &crate::upcall::UpcallInfo<'_>| {
            fetch_response(ccn, &rc, &wanted_hash, kind, info)
        },
    );
    match ccn.express_interest(&name, handler, Some(&template)) {
        Ok(_) => trace!("node fetch started"),
        Err(e) => {
            warn!("node fetch failed to start: {e}");
            let mut st = state.borrow_mut();
            let st = &mut *st;
            if let Some(entry) = st.cache.lookup_mut(hash) {
                entry.state &= !STATE_FETCHING;
                entry.busy = entry.busy.saturating_sub(1);
            }
            if let Some(comp) = st.compare.as_mut() {
                comp.node_fetch_busy = comp.node_fetch_busy.saturating_sub(1);
            }
        }
    }
}

fn fetch_response(
    ccn: &mut Ccn,
    state: &Rc<RefCell<RootState>>,
    hash: &[u8],
    kind: crate::upcall::UpcallKind,
    info: &crate::upcall::UpcallInfo<'_>,
) -> crate::upcall::UpcallResult {
    use crate::upcall::{UpcallKind, UpcallResult};
    match kind {
        UpcallKind::Final => UpcallResult::Ok,
        UpcallKind::InterestTimedOut => {
            {
                let mut st = state.borrow_mut();
                if st.closed {
                    return UpcallResult::Ok;
                }
                let st = &mut *st;
                if let Some(e) = st.cache.lookup_mut(hash) {
                    e.state &= !STATE_FETCHING;
                    e.busy = e.busy.saturating_sub(1);
                }
                if let Some(comp) = st.compare.as_mut() {
                    note_fetch_failure(comp, hash);
                }
            }
            kick_compare(ccn, state);
            UpcallResult::Ok
        }
        UpcallKind::Content
        | UpcallKind::ContentRaw
        | UpcallKind::ContentUnverified
        | UpcallKind::ContentKeyMissing => {
            let node = info
                .content_msg
                .zip(info.pco)
                .and_then(|(msg, pco)| pco.content_value(msg).ok())
                .and_then(|payload| extract_node(payload, hash));
            {
                let mut st = state.borrow_mut();
                if st.closed {
                    return UpcallResult::Ok;
                }
                let st = &mut *st;
                if let Some(e) = st.cache.lookup_mut(hash) {
                    e.busy = e.busy.saturating_sub(1);
                }
                match node {
                    Some(node) => {
                        st.cache.store_remote(Rc::new(node));
                        if let Some(comp) = st.compare.as_mut() {
                            comp.node_fetch_busy = comp.node_fetch_busy.saturating_sub(1);
                            comp.last_fetch_ok = Instant::now();
                        }
                        debug!("remote node entered: {}", hex::encode(hash));
                    }
                    None => {
                        if let Some(e) = st.cache.lookup_mut(hash) {
                            e.state &= !STATE_FETCHING;
                        }
                        if let Some(comp) = st.compare.as_mut() {
                            note_fetch_failure(comp, hash);
                        }
                    }
                }
            }
            kick_compare(ccn, state);
            UpcallResult::Ok
        }
        _ => UpcallResult::Ok,
    }
}

/// Begin comparing our tree against the remote root `hash_r`.
fn start_compare(ccn: &mut Ccn, state: &Rc<RefCell<RootState>>, hash_r: &[u8]) {
    {
        let mut st = state.borrow_mut();
        if st.closed || st.compare.is_some() {
            return;
        }
        st.cache.enter(hash_r, STATE_REMOTE);
        let comp = CompareState::new(&st.current_hash.clone(), hash_r);
        info!(
            "compare start: L {}, R {}",
            if st.current_hash.is_empty() {
                "empty".to_string()
            } else {
                hex::encode(&st.current_hash)
            },
            hex::encode(hash_r)
        );
        st.compare = Some(comp);
    }
    kick_compare(ccn, state);
}

/// Schedule a comparison slice soon, once.
fn kick_compare(ccn: &mut Ccn, state: &Rc<RefCell<RootState>>) {
    {
        let mut st = state.borrow_mut();
        let Some(comp) = st.compare.as_mut() else {
            return;
        };
        if comp.ev_scheduled {
            return;
        }
        comp.ev_scheduled = true;
    }
    let rc = state.clone();
    ccn.schedule(
        Duration::from_millis(2),
        Box::new(move |ccn| {
            compare_event(ccn, &rc);
            None
        }),
    );
}

enum CompareOutcome {
    NeedFetch(Vec<Vec<u8>>),
    Aborted(&'static str),
    Finished,
}

fn compare_event(ccn: &mut Ccn, state: &Rc<RefCell<RootState>>) {
    let outcome = {
        let mut st = state.borrow_mut();
        if st.closed {
            return;
        }
        let st = &mut *st;
        let Some(comp) = st.compare.as_mut() else {
            return;
        };
        comp.ev_scheduled = false;
        let mut wanted: Vec<Vec<u8>> = Vec::new();
        let outcome = loop {
            match comp.phase {
                ComparePhase::Init => {
                    comp.phase = ComparePhase::Preload;
                    let hash_r = comp.hash_r.clone();
                    comp.tw_r.init(&hash_r);
                }
                ComparePhase::Preload => {
                    match do_preload(comp, &mut st.cache, MAX_FETCH_BUSY, &mut wanted) {
                        StepResult::Advance => {
                            let hash_r = comp.hash_r.clone();
                            comp.tw_r.init(&hash_r);
                            let hash_l = comp.hash_l.clone();
                            comp.tw_l.init(&hash_l);
                            comp.phase = ComparePhase::Busy;
                        }
                        StepResult::Blocked => break CompareOutcome::NeedFetch(wanted),
                        StepResult::Failed(why) => break CompareOutcome::Aborted(why),
                        StepResult::Finished => unreachable!("preload never finishes the walk"),
                    }
                }
                ComparePhase::Busy => {
                    match do_comparison(comp, &mut st.cache, &mut wanted) {
                        StepResult::Finished => comp.phase = ComparePhase::Waiting,
                        StepResult::Blocked => {
                            if !comp.err_list.is_empty() {
                                // a fetch failed mid-walk; retreat one state
                                comp.phase = ComparePhase::Preload;
                            }
                            break CompareOutcome::NeedFetch(wanted);
                        }
                        StepResult::Failed(why) => break CompareOutcome::Aborted(why),
                        StepResult::Advance => unreachable!("comparison has no advance"),
                    }
                }
                ComparePhase::Waiting => comp.phase = ComparePhase::Done,
                ComparePhase::Done => break CompareOutcome::Finished,
            }
        };
        outcome
    };
    match outcome {
        CompareOutcome::NeedFetch(wanted) => {
            for hash in wanted {
                start_node_fetch(ccn, state, &hash);
            }
        }
        CompareOutcome::Aborted(why) => abort_compare(ccn, state, why),
        CompareOutcome::Finished => finish_compare(ccn, state),
    }
}

/// Adopt the comparison result: deliver the new names, fold them into the
/// local set, and advertise the new root.
fn finish_compare(ccn: &mut Ccn, state: &Rc<RefCell<RootState>>) {
    let changed = {
        let mut st = state.borrow_mut();
        let st = &mut *st;
        let Some(comp) = st.compare.take() else {
            return;
        };
        if let Some(e) = st.cache.lookup_mut(&comp.hash_r) {
            e.set_covered();
            e.busy = e.busy.saturating_sub(1);
        }
        let mut changed = false;
        for name in &comp.names_added {
            if insert_name(&mut st.local_names, name) {
                changed = true;
                if let Ok(n) = Name::from_ccnb(name) {
                    (st.callback)(&n);
                }
            }
        }
        if changed {
            rebuild_local_tree(st);
        }
        info!(
            "compare done: {} names added in {:?}",
            comp.names_added.len(),
            comp.started.elapsed()
        );
        changed
    };
    if changed {
        let _ = send_root_advise(ccn, state);
    }
}

/// A failing comparison evicts the remote root so rediscovery can retry.
fn abort_compare(_ccn: &mut Ccn, state: &Rc<RefCell<RootState>>, why: &'static str) {
    let mut st = state.borrow_mut();
    let st = &mut *st;
    let Some(comp) = st.compare.take() else {
        return;
    };
    warn!("compare aborted: {why}");
    if let Some(pos) = st.remote_seen.iter().position(|r| r.hash == comp.hash_r) {
        st.remote_seen.remove(pos);
    }
    if let Some(e) = st.cache.lookup_mut(&comp.hash_r) {
        e.busy = e.busy.saturating_sub(1);
        e.state &= !STATE_FETCHING;
    }
}

/// Periodic pulse: start comparisons, watch for stalls, keep an advise out.
fn heartbeat_tick(ccn: &mut Ccn, state: &Rc<RefCell<RootState>>) -> Option<Duration> {
    enum Act {
        Nothing,
        Start(Vec<u8>),
        Abort(&'static str),
        Advise,
    }
    let act = {
        let mut st = state.borrow_mut();
        if st.closed {
            return None;
        }
        let now = Instant::now();
        match st.compare.as_mut() {
            None => match choose_remote_hash(&mut st) {
                Some(hash) => Act::Start(hash),
                None if !st.advise_pending => Act::Advise,
                None => Act::Nothing,
            },
            Some(comp) => {
                if now.duration_since(comp.last_mark) > Duration::from_secs(UPDATE_STALL_SECS) {
                    warn!("compare stalled?");
                    comp.last_mark = now;
                }
                if now.duration_since(comp.last_fetch_ok)
                    > Duration::from_secs(COMPARE_ASSUME_BAD_SECS)
                {
                    Act::Abort("no fetch progress")
                } else {
                    Act::Nothing
                }
            }
        }
    };
    match act {
        Act::Nothing => {}
        Act::Start(hash) => start_compare(ccn, state, &hash),
        Act::Abort(why) => abort_compare(ccn, state, why),
        Act::Advise => {
            let _ = send_root_advise(ccn, state);
        }
    }
    Some(Duration::from_micros(HEARTBEAT_MICROS))
}
