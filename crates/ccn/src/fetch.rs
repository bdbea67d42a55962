//! Streaming access to segmented content.
//!
//! A fetch stream reads a named object published as numbered segments
//! (`<base>/%00<n>`), keeping a sliding window of prefetched segments ahead
//! of the read position. Reads never block: they return whatever contiguous
//! bytes have arrived, and the caller drives progress through the handle's
//! run loop (or [`Fetch::poll`]).

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Instant;

use ccn_msg::{InterestTemplate, Name};
use ccnb::Marker;
use log::{debug, trace, warn};

use crate::client::Ccn;
use crate::upcall::{HandlerRef, UpcallInfo, UpcallKind, UpcallResult};

/// Hard cap on the per-stream prefetch window.
const MAX_BUFS_LIMIT: usize = 16;

/// Default per-segment interest budget before the stream reports a timeout.
const INTEREST_TIMEOUT_USECS: i64 = 15_000_000;

/// MaxSuffixComponents for the default data template.
const MAX_SUFFIX_DEFAULT: u32 = 4;

/// Result of a read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRead {
    /// `n >= 1` bytes were copied out.
    Data(usize),
    /// The stream is positioned at its known end.
    End,
    /// Nothing available yet; try again after the loop runs.
    None,
    /// A needed segment timed out; reads stay stuck until a reset.
    Timeout,
    /// A zero-length segment was observed before the final one.
    Zero,
}

struct SegBuffer {
    seg: i64,
    /// Base byte position, or -1 while unknown.
    pos: i64,
    data: Vec<u8>,
}

struct SegRequest {
    seg: i64,
    started: Instant,
}

struct StreamState {
    id: String,
    name: Name,
    template: Vec<u8>,
    max_bufs: usize,
    bufs: Vec<SegBuffer>,
    requests: Vec<SegRequest>,
    req_busy: usize,
    segs_ahead: usize,
    /// -1 variable, 0 fixed-but-unknown, >0 fixed.
    seg_size: i64,
    file_size: i64,
    read_position: i64,
    read_start: i64,
    read_seg: i64,
    timeout_seg: i64,
    zero_len_seg: i64,
    final_seg: i64,
    final_seg_len: i64,
    timeout_usecs: i64,
    timeouts_seen: u64,
    segs_read: u64,
    segs_requested: u64,
}

impl StreamState {
    fn buffer_for_seg(&self, seg: i64) -> Option<usize> {
        self.bufs.iter().position(|b| b.seg == seg)
    }

    fn buffer_for_position(&self, pos: i64) -> Option<usize> {
        self.bufs
            .iter()
            .position(|b| b.pos >= 0 && pos >= b.pos && pos < b.pos + b.data.len() as i64)
    }

    fn infer_position(&self, seg: i64) -> i64 {
        if seg == 0 {
            0
        } else if self.seg_size > 0 {
            seg * self.seg_size
        } else if seg == self.read_seg {
            self.read_start
        } else {
            match self.buffer_for_seg(seg - 1) {
                Some(i) if self.bufs[i].pos >= 0 => {
                    self.bufs[i].pos + self.bufs[i].data.len() as i64
                }
                _ => -1,
            }
        }
    }

    fn add_buffer(&mut self, seg: i64, data: Vec<u8>) {
        let len = data.len() as i64;
        let pos = self.infer_position(seg);
        self.bufs.push(SegBuffer { seg, pos, data });
        self.segs_ahead = (self.segs_ahead + 1).min(self.max_bufs.saturating_sub(1));
        if self.seg_size <= 0 && pos >= 0 {
            // position known: propagate forward through buffers fetched out
            // of order, and maybe learn the file size
            let mut seg = seg;
            let mut pos = pos;
            let mut len = len;
            loop {
                if self.file_size < 0
                    && (seg == self.final_seg
                        || (seg + 1 == self.final_seg && self.final_seg_len == 0))
                {
                    self.file_size = pos + len;
                }
                seg += 1;
                let Some(i) = self.buffer_for_seg(seg) else {
                    break;
                };
                if self.bufs[i].pos >= 0 {
                    break;
                }
                pos += len;
                self.bufs[i].pos = pos;
                len = self.bufs[i].data.len() as i64;
            }
        }
    }

    fn prune(&mut self) {
        let start = self.read_start;
        let max = self.max_bufs;
        let mut n = self.bufs.len();
        self.bufs.retain(|b| {
            if n > max && (max == 0 || (b.pos >= 0 && start > b.pos + b.data.len() as i64)) {
                n -= 1;
                false
            } else {
                true
            }
        });
    }

    fn remove_request(&mut self, seg: i64) {
        if let Some(i) = self.requests.iter().position(|r| r.seg == seg) {
            self.requests.remove(i);
            self.req_busy = self.req_busy.saturating_sub(1);
        }
    }
}

/// An open fetch stream.
pub struct FetchStream {
    state: Rc<RefCell<StreamState>>,
}

/// Manages a set of fetch streams over one handle.
#[derive(Default)]
pub struct Fetch {
    streams: Vec<Weak<RefCell<StreamState>>>,
}

impl Fetch {
    pub fn new() -> Fetch {
        Fetch::default()
    }

    /// Open a stream on `name` (already versioned; segments follow).
    ///
    /// `max_bufs` bounds the prefetch window (clamped to 16); with
    /// `assume_fixed`, all segments but the last are taken to share the
    /// first observed size, which enables seeking by position.
    pub fn open(
        &mut self,
        ccn: &mut Ccn,
        name: &Name,
        id: &str,
        template: Option<&[u8]>,
        max_bufs: usize,
        assume_fixed: bool,
    ) -> crate::Result<FetchStream> {
        if max_bufs == 0 {
            return Err(crate::Error::InvalidArg("max_bufs must be at least 1"));
        }
        let template = match template {
            Some(t) => t.to_vec(),
            None => {
                let mut t = InterestTemplate::new();
                t.max_suffix_comps = Some(MAX_SUFFIX_DEFAULT);
                t.encode(&Name::new())
            }
        };
        let state = Rc::new(RefCell::new(StreamState {
            id: id.to_string(),
            name: name.clone(),
            template,
            max_bufs: max_bufs.min(MAX_BUFS_LIMIT),
            bufs: Vec::new(),
            requests: Vec::new(),
            req_busy: 0,
            segs_ahead: 0,
            seg_size: if assume_fixed { 0 } else { -1 },
            file_size: -1,
            read_position: 0,
            read_start: 0,
            read_seg: 0,
            timeout_seg: -1,
            zero_len_seg: -1,
            final_seg: -1,
            final_seg_len: 0,
            timeout_usecs: INTEREST_TIMEOUT_USECS,
            timeouts_seen: 0,
            segs_read: 0,
            segs_requested: 0,
        }));
        debug!("fetch open, {id}");
        let stream = FetchStream { state };
        self.streams.push(Rc::downgrade(&stream.state));
        need_segment(ccn, &stream.state, 0);
        Ok(stream)
    }

    /// Count streams with data ready (or at end), then give the handle a
    /// zero-timeout pass to make progress.
    pub fn poll(&mut self, ccn: &mut Ccn) -> usize {
        self.streams.retain(|w| w.upgrade().is_some());
        let count = self
            .streams
            .iter()
            .filter_map(|w| w.upgrade())
            .filter(|s| {
                let stream = FetchStream { state: s.clone() };
                matches!(stream.avail(), FetchRead::Data(_) | FetchRead::End)
            })
            .count();
        let _ = ccn.run(0);
        count
    }
}

impl FetchStream {
    /// The stream's diagnostic id.
    pub fn id(&self) -> String {
        self.state.borrow().id.clone()
    }

    /// Current read position in bytes.
    pub fn position(&self) -> i64 {
        self.state.borrow().read_position
    }

    /// Known file size, or `None` while undetermined.
    pub fn file_size(&self) -> Option<i64> {
        let fs = self.state.borrow().file_size;
        (fs >= 0).then_some(fs)
    }

    /// Clear the timeout marker so reads can be retried.
    pub fn reset_timeout(&mut self) {
        let mut fs = self.state.borrow_mut();
        fs.timeout_seg = -1;
        fs.segs_ahead = 0;
    }

    /// What a read would return right now, as a byte count or status.
    pub fn avail(&self) -> FetchRead {
        let fs = self.state.borrow();
        let pos = fs.read_position;
        if fs.file_size >= 0 && pos >= fs.file_size {
            return FetchRead::End;
        }
        let mut seg = fs.read_seg;
        if fs.timeout_seg >= 0 && seg >= fs.timeout_seg {
            return FetchRead::Timeout;
        }
        if fs.zero_len_seg >= 0 && seg >= fs.zero_len_seg {
            return FetchRead::Zero;
        }
        if fs.final_seg >= 0 && seg > fs.final_seg {
            return FetchRead::None;
        }
        let mut avail: i64 = 0;
        let mut pos = pos;
        loop {
            let Some(i) = fs.buffer_for_seg(seg) else {
                break;
            };
            let b = &fs.bufs[i];
            let base = if b.pos < 0 { pos } else { b.pos };
            let mut len = b.data.len() as i64;
            if seg == fs.read_seg {
                let off = pos - base;
                if off > 0 {
                    len -= off;
                }
            }
            avail += len;
            pos += len;
            seg += 1;
        }
        if avail == 0 {
            FetchRead::None
        } else {
            FetchRead::Data(avail as usize)
        }
    }

    /// Copy contiguous bytes at the read position into `buf`, advancing the
    /// position and pruning consumed segments. Never waits.
    pub fn read(&mut self, ccn: &mut Ccn, buf: &mut [u8]) -> FetchRead {
        let status = {
            let mut fs = self.state.borrow_mut();
            let mut pos = fs.read_position;
            if fs.file_size >= 0 && pos >= fs.file_size {
                return FetchRead::End;
            }
            let mut seg = fs.read_seg;
            if fs.timeout_seg >= 0 && seg >= fs.timeout_seg {
                return FetchRead::Timeout;
            }
            if fs.zero_len_seg >= 0 && seg >= fs.zero_len_seg {
                return FetchRead::Zero;
            }
            let mut nread = 0usize;
            let mut remaining = buf.len();
            while remaining > 0 {
                let Some(i) = fs.buffer_for_seg(seg) else {
                    break;
                };
                let lo = if fs.bufs[i].pos < 0 {
                    // segments delivered out of order may land unplaced
                    fs.bufs[i].pos = pos;
                    pos
                } else {
                    fs.bufs[i].pos
                };
                let hi = lo + fs.bufs[i].data.len() as i64;
                if pos < lo || pos >= hi {
                    warn!(
                        "fetch read, {}: seg {seg} does not cover position {pos}",
                        fs.id
                    );
                    break;
                }
                let take = ((hi - pos) as usize).min(remaining);
                let off = (pos - lo) as usize;
                buf[nread..nread + take].copy_from_slice(&fs.bufs[i].data[off..off + take]);
                nread += take;
                remaining -= take;
                pos += take as i64;
                fs.read_position = pos;
                fs.read_start = lo;
                if pos == hi {
                    seg += 1;
                    fs.read_seg = seg;
                    fs.read_start = pos;
                }
            }
            if nread == 0 {
                FetchRead::None
            } else {
                FetchRead::Data(nread)
            }
        };
        need_segments(ccn, &self.state);
        self.state.borrow_mut().prune();
        status
    }

    /// Move the read position. Position 0 also clears the timeout and
    /// zero-length markers. Other positions require a covering buffer or a
    /// known fixed segment size.
    pub fn seek(&mut self, ccn: &mut Ccn, pos: i64) -> crate::Result<()> {
        {
            let mut fs = self.state.borrow_mut();
            let mut seg = 0i64;
            let mut start = 0i64;
            if pos == 0 {
                fs.timeout_seg = -1;
                fs.zero_len_seg = -1;
                fs.segs_ahead = 0;
            } else if pos == fs.read_position {
                return Ok(());
            } else if let Some(i) = fs.buffer_for_position(pos) {
                seg = fs.bufs[i].seg;
                start = fs.bufs[i].pos;
            } else {
                let ss = fs.seg_size;
                if pos < 0 || ss <= 0 {
                    return Err(crate::Error::InvalidArg("seek without known segment size"));
                }
                if fs.file_size >= 0 && pos > fs.file_size {
                    return Err(crate::Error::InvalidArg("seek past end of stream"));
                }
                seg = pos / ss;
                start = seg * ss;
            }
            fs.read_position = pos;
            fs.read_start = start;
            fs.read_seg = seg;
        }
        let seg = self.state.borrow().read_seg;
        need_segment(ccn, &self.state, seg);
        self.state.borrow_mut().prune();
        Ok(())
    }

    /// Close the stream; outstanding segment interests are orphaned and die
    /// quietly.
    pub fn close(self, _ccn: &mut Ccn) {
        let fs = self.state.borrow();
        debug!(
            "fetch close, {}: requested {}, read {}, timeouts {}",
            fs.id, fs.segs_requested, fs.segs_read, fs.timeouts_seen
        );
    }
}

fn sequenced_name(base: &Name, seg: i64) -> Name {
    let mut n = base.clone();
    n.append_numeric(Marker::Seqnum, seg as u64);
    n
}

/// Big-endian number from a FinalBlockID payload (marker byte included; the
/// segment marker is zero so it does not disturb the value).
fn number_from_component(data: &[u8]) -> i64 {
    let mut v: i64 = 0;
    for &b in data {
        v = (v << 8) + i64::from(b);
    }
    v
}

fn final_segment_from(info: &UpcallInfo<'_>) -> i64 {
    match (info.content_msg, info.pco) {
        (Some(msg), Some(pco)) => match pco.final_block_id(msg) {
            Some(fbid) if !fbid.is_empty() => number_from_component(fbid),
            _ => -1,
        },
        _ => -1,
    }
}

/// Request a segment unless it is buffered, beyond the end, past a timeout
/// or zero-length marker, or already in flight.
fn need_segment(ccn: &mut Ccn, state: &Rc<RefCell<StreamState>>, seg: i64) {
    {
        let fs = state.borrow();
        if seg < 0
            || fs.buffer_for_seg(seg).is_some()
            || (fs.final_seg >= 0 && seg > fs.final_seg)
            || (fs.timeout_seg > 0 && seg >= fs.timeout_seg)
            || (fs.zero_len_seg > 0 && seg >= fs.zero_len_seg)
            || fs.requests.iter().any(|r| r.seg == seg)
        {
            return;
        }
    }
    let (name, template) = {
        let mut fs = state.borrow_mut();
        fs.requests.push(SegRequest {
            seg,
            started: Instant::now(),
        });
        (sequenced_name(&fs.name, seg), fs.template.clone())
    };
    let weak = Rc::downgrade(state);
    let handler = HandlerRef::from_fn(move |ccn: &mut Ccn, kind, info: &UpcallInfo<'_>| {
        segment_upcall(&weak, seg, ccn, kind, info)
    });
    match ccn.express_interest(&name, handler, Some(&template)) {
        Ok(_) => {
            let mut fs = state.borrow_mut();
            fs.req_busy += 1;
            fs.segs_requested += 1;
            trace!("fetch need seg {seg}, {}", fs.id);
        }
        Err(e) => {
            let mut fs = state.borrow_mut();
            fs.remove_request(seg);
            warn!("fetch could not express interest for seg {seg}: {e}");
        }
    }
}

/// Keep the prefetch window full from the read segment forward.
fn need_segments(ccn: &mut Ccn, state: &Rc<RefCell<StreamState>>) {
    let (lo, hi) = {
        let fs = state.borrow();
        let lo = fs.read_seg;
        let mut hi = lo + fs.segs_ahead as i64;
        if fs.final_seg >= 0 && hi > fs.final_seg {
            hi = fs.final_seg;
        }
        (lo, hi.max(lo))
    };
    for seg in lo..=hi {
        need_segment(ccn, state, seg);
    }
}

fn segment_upcall(
    weak: &Weak<RefCell<StreamState>>,
    seg: i64,
    ccn: &mut Ccn,
    kind: UpcallKind,
    info: &UpcallInfo<'_>,
) -> UpcallResult {
    let Some(state) = weak.upgrade() else {
        // stream closed; let the registration die
        return UpcallResult::Ok;
    };
    {
        let mut fs = state.borrow_mut();
        if fs.final_seg < 0 {
            let final_seg = final_segment_from(info);
            if final_seg >= 0 {
                fs.final_seg = final_seg;
            }
        }
        match kind {
            UpcallKind::Final => {
                fs.remove_request(seg);
                return UpcallResult::Ok;
            }
            UpcallKind::InterestTimedOut => {
                if fs.final_seg >= 0 && seg > fs.final_seg {
                    return UpcallResult::Ok;
                }
                let started = fs
                    .requests
                    .iter()
                    .find(|r| r.seg == seg)
                    .map(|r| r.started);
                let dt = match started {
                    Some(t) => Instant::now().duration_since(t).as_micros() as i64,
                    None => i64::MAX,
                };
                if dt >= fs.timeout_usecs {
                    fs.timeouts_seen += 1;
                    fs.segs_ahead = 0;
                    if fs.timeout_seg < 0 || seg < fs.timeout_seg {
                        fs.timeout_seg = seg;
                    }
                    debug!("fetch timeout, {}: seg {seg}", fs.id);
                    return UpcallResult::Ok;
                }
                return UpcallResult::Reexpress;
            }
            UpcallKind::ContentUnverified => return UpcallResult::Verify,
            UpcallKind::ContentKeyMissing => return UpcallResult::FetchKey,
            UpcallKind::Content | UpcallKind::ContentRaw => {
                if fs.timeout_seg >= 0 && fs.timeout_seg <= seg {
                    // blocked at an earlier timeout; ignore
                    return UpcallResult::Ok;
                }
            }
            _ => return UpcallResult::Err,
        }

        // content for a segment we may still need
        if fs.buffer_for_seg(seg).is_none() {
            let (Some(msg), Some(pco)) = (info.content_msg, info.pco) else {
                return UpcallResult::Err;
            };
            let data = match pco.content_value(msg) {
                Ok(d) => d,
                Err(_) => &[],
            };
            let final_seg = fs.final_seg;
            if data.is_empty() && seg != final_seg {
                debug!("fetch no data, {}: seg {seg}", fs.id);
                if fs.zero_len_seg < 0 || seg < fs.zero_len_seg {
                    fs.zero_len_seg = seg;
                }
            } else if data.is_empty() && seg == final_seg {
                // end of stream with nothing in the last segment
                if fs.file_size < 0 {
                    fs.file_size = fs.infer_position(seg);
                }
                fs.final_seg = final_seg - 1;
            } else {
                if fs.seg_size == 0 && (seg == 0 || seg < final_seg) {
                    // fixed-size assumption: learn it from a full segment
                    fs.seg_size = data.len() as i64;
                }
                if final_seg < 0 && fs.seg_size > 0 && (data.len() as i64) < fs.seg_size {
                    // a short segment marks the end even without FinalBlockID
                    fs.final_seg = seg;
                }
                let final_seg = fs.final_seg;
                if seg == final_seg {
                    fs.final_seg_len = data.len() as i64;
                }
                fs.add_buffer(seg, data.to_vec());
                if seg == final_seg && fs.file_size < 0 {
                    if fs.seg_size > 0 {
                        fs.file_size = seg * fs.seg_size + data.len() as i64;
                    } else if let Some(i) = fs.buffer_for_seg(seg) {
                        if fs.bufs[i].pos >= 0 {
                            fs.file_size = fs.bufs[i].pos + data.len() as i64;
                        }
                    }
                }
                fs.segs_read += 1;
            }
        }
    }
    // wake any synchronous caller waiting in the run loop
    ccn.set_run_timeout(0);
    UpcallResult::Ok
}
