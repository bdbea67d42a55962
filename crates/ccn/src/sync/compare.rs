//! The bounded recursive tree comparison.
//!
//! A comparison walks the local (L) and remote (R) trees in canonical name
//! order and emits every name present in R but absent from L. Remote nodes
//! are preloaded by hash before the walk so the busy phase rarely blocks;
//! nodes discovered missing mid-walk fall back to the same fetch path.

use std::collections::HashSet;
use std::time::Instant;

use log::{debug, trace};

use crate::sync::cache::{HashCache, STATE_FETCHING, STATE_REMOTE};
use crate::sync::node::{MinMaxOrder, NodeElem};
use crate::sync::tree::TreeWorker;

/// Phases of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ComparePhase {
    Init,
    Preload,
    Busy,
    Waiting,
    Done,
}

/// State of one in-flight comparison.
pub(crate) struct CompareState {
    pub phase: ComparePhase,
    pub tw_l: TreeWorker,
    pub tw_r: TreeWorker,
    pub hash_l: Vec<u8>,
    pub hash_r: Vec<u8>,
    pub node_fetch_busy: usize,
    /// Hashes whose fetch failed; each is retried once.
    pub err_list: Vec<Vec<u8>>,
    pub retried: HashSet<Vec<u8>>,
    /// Names emitted so far (encoded Name elements).
    pub names_added: Vec<Vec<u8>>,
    pub started: Instant,
    pub last_fetch_ok: Instant,
    pub last_mark: Instant,
    pub ev_scheduled: bool,
}

impl CompareState {
    pub fn new(hash_l: &[u8], hash_r: &[u8]) -> CompareState {
        let now = Instant::now();
        let mut tw_l = TreeWorker::new();
        tw_l.init(hash_l);
        let mut tw_r = TreeWorker::new();
        tw_r.init(hash_r);
        CompareState {
            phase: ComparePhase::Init,
            tw_l,
            tw_r,
            hash_l: hash_l.to_vec(),
            hash_r: hash_r.to_vec(),
            node_fetch_busy: 0,
            err_list: Vec::new(),
            retried: HashSet::new(),
            names_added: Vec::new(),
            started: now,
            last_fetch_ok: now,
            last_mark: now,
            ev_scheduled: false,
        }
    }
}

/// What one slice of comparison work concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StepResult {
    /// Phase finished; caller advances the machine.
    Advance,
    /// Blocked until node fetches complete; `wanted` lists hashes to fetch.
    Blocked,
    /// The walk finished; emitted names are in `names_added`.
    Finished,
    /// Unrecoverable problem with the walk.
    Failed(&'static str),
}

/// Walk R depth-first and surface every reachable remote hash whose node is
/// absent. Returns hashes that still need fetching (the caller expresses the
/// interests), or advance when the whole tree is present.
pub(crate) fn do_preload(
    comp: &mut CompareState,
    cache: &mut HashCache,
    busy_limit: usize,
    wanted: &mut Vec<Vec<u8>>,
) -> StepResult {
    loop {
        if comp.node_fetch_busy + wanted.len() > busy_limit {
            return StepResult::Blocked;
        }
        let Some(top) = comp.tw_r.top().cloned() else {
            break;
        };
        let Some(entry) = cache.lookup_mut(&top.hash) else {
            return StepResult::Failed("preload frame without cache entry");
        };
        let fetching = entry.state & STATE_FETCHING != 0;
        let covered = entry.is_covered();
        let node = entry.any_node();
        if fetching || covered {
            // not a needed node
        } else if let Some(node) = node {
            // visit child subtree references
            let mut pos = top.pos;
            while pos < node.len() && node.elems[pos].is_leaf() {
                pos += 1;
            }
            if pos < node.len() {
                if let NodeElem::Node(sub) = &node.elems[pos] {
                    let sub = *sub;
                    comp.tw_r.top_mut().expect("frame present").pos = pos;
                    let e = cache.enter(&sub, STATE_REMOTE);
                    e.is_covered();
                    comp.tw_r.push(&sub);
                    continue;
                }
            }
        } else {
            wanted.push(top.hash.clone());
        }
        comp.tw_r.pop();
        if let Some(parent) = comp.tw_r.top_mut() {
            parent.pos += 1;
        }
    }
    // retry failed fetches, once each
    while comp.node_fetch_busy + wanted.len() < busy_limit {
        let Some(hash) = comp.err_list.pop() else {
            break;
        };
        if comp.retried.insert(hash.clone()) {
            wanted.push(hash);
        } else {
            return StepResult::Failed("node fetch failed after retry");
        }
    }
    if comp.node_fetch_busy > 0 || !wanted.is_empty() || !comp.err_list.is_empty() {
        return StepResult::Blocked;
    }
    if !comp.tw_r.is_empty() {
        return StepResult::Blocked;
    }
    StepResult::Advance
}

/// One busy-phase slice: walk L and R in canonical order, emitting names
/// only in R, pruning covered subtrees, popping frames whose children are
/// exhausted. Missing nodes land in `wanted` and block the walk.
pub(crate) fn do_comparison(
    comp: &mut CompareState,
    cache: &mut HashCache,
    wanted: &mut Vec<Vec<u8>>,
) -> StepResult {
    loop {
        let Some(top_r) = comp.tw_r.top().cloned() else {
            return StepResult::Finished;
        };
        let Some(ce_r) = cache.lookup_mut(&top_r.hash) else {
            return StepResult::Failed("bad cache entry for R");
        };
        ce_r.last_used = Instant::now();
        if top_r.pos == 0 && ce_r.is_covered() {
            // nothing in this subtree we do not already have
            let c = comp.tw_r.pop().unwrap_or(0);
            if let Some(parent) = comp.tw_r.top_mut() {
                parent.pos += 1;
                parent.count += c;
            }
            continue;
        }
        let Some(nc_r) = ce_r.any_node() else {
            wanted.push(top_r.hash.clone());
            return StepResult::Blocked;
        };
        if top_r.pos >= nc_r.len() {
            // went off the end; an empty contribution marks coverage
            if top_r.count == 0 {
                ce_r.set_covered();
            }
            let c = comp.tw_r.pop().unwrap_or(0);
            if let Some(parent) = comp.tw_r.top_mut() {
                parent.pos += 1;
                parent.count += c;
            }
            continue;
        }
        let elem_r = nc_r.elems[top_r.pos].clone();

        let Some(top_l) = comp.tw_l.top().cloned() else {
            // L exhausted: everything left in R is new
            match elem_r {
                NodeElem::Node(sub) => {
                    let e = cache.enter(&sub, STATE_REMOTE);
                    e.is_covered();
                    comp.tw_r.push(&sub);
                }
                NodeElem::Leaf(name) => {
                    add_from_r(comp, name);
                }
            }
            continue;
        };
        let Some(ce_l) = cache.lookup_mut(&top_l.hash) else {
            return StepResult::Failed("bad cache entry for L");
        };
        ce_l.last_used = Instant::now();
        let Some(nc_l) = ce_l.any_node() else {
            wanted.push(top_l.hash.clone());
            return StepResult::Blocked;
        };
        if top_l.pos >= nc_l.len() {
            comp.tw_l.pop();
            if let Some(parent) = comp.tw_l.top_mut() {
                parent.pos += 1;
            }
            continue;
        }
        let elem_l = nc_l.elems[top_l.pos].clone();

        match elem_r {
            NodeElem::Node(sub_r) => {
                let covered = {
                    let e = cache.enter(&sub_r, STATE_REMOTE);
                    e.is_covered()
                };
                if covered {
                    // nothing to add from this subtree
                    if let Some(t) = comp.tw_r.top_mut() {
                        t.pos += 1;
                    }
                    continue;
                }
                let sub_r_node = cache.node_for(&sub_r);
                let Some(sub_r_node) = sub_r_node else {
                    // hash known, node absent: descend to force the fetch
                    comp.tw_r.push(&sub_r);
                    continue;
                };
                match elem_l {
                    NodeElem::Leaf(name_l) => match sub_r_node.compare_min_max(&name_l) {
                        MinMaxOrder::Before => {
                            if let Some(t) = comp.tw_l.top_mut() {
                                t.pos += 1;
                            }
                        }
                        MinMaxOrder::Max => {
                            if let Some(t) = comp.tw_l.top_mut() {
                                t.pos += 1;
                            }
                            if let Some(t) = comp.tw_r.top_mut() {
                                t.pos += 1;
                            }
                        }
                        _ => comp.tw_r.push(&sub_r),
                    },
                    NodeElem::Node(sub_l) => {
                        let Some(sub_l_node) = cache.node_for(&sub_l) else {
                            return StepResult::Failed("local subtree node missing");
                        };
                        let disjoint = match (&sub_r_node.min_name, &sub_l_node.max_name) {
                            (Some(min_r), Some(max_l)) => {
                                ccn_msg::compare_names(min_r, max_l) > 0
                            }
                            _ => false,
                        };
                        if disjoint {
                            // Min(R) > Max(L): L cannot help; advance it
                            if let Some(t) = comp.tw_l.top_mut() {
                                t.pos += 1;
                            }
                        } else {
                            comp.tw_l.push(&sub_l);
                            comp.tw_r.push(&sub_r);
                        }
                    }
                }
            }
            NodeElem::Leaf(name_r) => match elem_l {
                NodeElem::Leaf(name_l) => {
                    let cmp = ccn_msg::compare_names(&name_l, &name_r);
                    if cmp == 0 {
                        if let Some(t) = comp.tw_l.top_mut() {
                            t.pos += 1;
                        }
                        if let Some(t) = comp.tw_r.top_mut() {
                            t.pos += 1;
                        }
                    } else if cmp < 0 {
                        if let Some(t) = comp.tw_l.top_mut() {
                            t.pos += 1;
                        }
                    } else {
                        add_from_r(comp, name_r);
                    }
                }
                NodeElem::Node(sub_l) => {
                    let Some(sub_l_node) = cache.node_for(&sub_l) else {
                        return StepResult::Failed("local subtree node missing");
                    };
                    match sub_l_node.compare_min_max(&name_r) {
                        MinMaxOrder::Before => add_from_r(comp, name_r),
                        MinMaxOrder::Max => {
                            if let Some(t) = comp.tw_l.top_mut() {
                                t.pos += 1;
                            }
                            if let Some(t) = comp.tw_r.top_mut() {
                                t.pos += 1;
                            }
                        }
                        MinMaxOrder::Min => {
                            if let Some(t) = comp.tw_r.top_mut() {
                                t.pos += 1;
                            }
                        }
                        MinMaxOrder::After => {
                            if let Some(t) = comp.tw_l.top_mut() {
                                t.pos += 1;
                            }
                        }
                        MinMaxOrder::Inside => comp.tw_l.push(&sub_l),
                    }
                }
            },
        }
    }
}

fn add_from_r(comp: &mut CompareState, name: Vec<u8>) {
    trace!("comparison emits a new name");
    if let Some(t) = comp.tw_r.top_mut() {
        t.pos += 1;
        t.count += 1;
    }
    comp.names_added.push(name);
}

/// Forget a failed fetch's busy slot and queue it for one retry.
pub(crate) fn note_fetch_failure(comp: &mut CompareState, hash: &[u8]) {
    debug!("node fetch failed for {}", hex::encode(hash));
    comp.node_fetch_busy = comp.node_fetch_busy.saturating_sub(1);
    comp.err_list.push(hash.to_vec());
}
