//! Segmented-fetch scenarios over the forwarder stub.

mod common;

use std::rc::Rc;

use ccn::codec::Marker;
use ccn::msg::parse_uri;
use ccn::{
    sign_content, Ccn, Fetch, FetchRead, HandlerRef, HmacKey, SigningKey, SigningParams,
    UpcallInfo, UpcallKind, UpcallResult,
};
use common::Forwarder;

const SEG_SIZES: [usize; 3] = [4096, 4096, 1808];

fn segment_body(seg: usize) -> Vec<u8> {
    (0..SEG_SIZES[seg])
        .map(|i| ((seg * 131 + i) % 251) as u8)
        .collect()
}

/// Publish the three segments of `/v/1` behind a filter, marking the last
/// with a FinalBlockID equal to its own segment component.
fn serve_segments(producer: &mut Ccn, key: &HmacKey) {
    let mut objects: Vec<Vec<u8>> = Vec::new();
    let base = parse_uri("ccnx:/v/1").unwrap();
    let mut final_comp = base.clone();
    final_comp.append_numeric(Marker::Seqnum, 2);
    let fbid = final_comp.component(2).unwrap();
    for seg in 0..3 {
        let mut name = base.clone();
        name.append_numeric(Marker::Seqnum, seg as u64);
        let params = SigningParams {
            final_block_id: (seg == 2).then(|| fbid.clone()),
            ..Default::default()
        };
        objects.push(sign_content(key, &name, &params, &segment_body(seg)).unwrap());
    }
    producer
        .set_interest_filter(
            &base,
            Some(HandlerRef::from_fn(
                move |ccn: &mut Ccn, kind, info: &UpcallInfo<'_>| {
                    if kind != UpcallKind::Interest {
                        return UpcallResult::Ok;
                    }
                    let (Some(msg), Some(comps)) = (info.interest_msg, info.interest_comps)
                    else {
                        return UpcallResult::Ok;
                    };
                    // segment index from the %00-marked component
                    let Some(comp) = ccn::msg::component_at(msg, comps, 2) else {
                        return UpcallResult::Ok;
                    };
                    if comp.first() != Some(&0x00) {
                        return UpcallResult::Ok;
                    }
                    let seg = comp[1..].iter().fold(0usize, |v, &b| (v << 8) | b as usize);
                    if seg < 3 {
                        ccn.put(&objects[seg].clone()).unwrap();
                        return UpcallResult::InterestConsumed;
                    }
                    UpcallResult::Ok
                },
            )),
        )
        .unwrap();
}

#[test]
fn three_segments_read_in_order_then_end() {
    let key = HmacKey::new(b"segment producer");
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    serve_segments(&mut producer, &key);
    consumer
        .keystore_mut()
        .register_verify_key(key.public_key_digest(), Rc::new(key.clone()));

    let mut fetch = Fetch::new();
    let base = parse_uri("ccnx:/v/1").unwrap();
    let mut stream = fetch
        .open(&mut consumer, &base, "three-segments", None, 4, true)
        .unwrap();

    let mut collected: Vec<u8> = Vec::new();
    let mut chunks: Vec<usize> = Vec::new();
    let mut ended = false;
    for _ in 0..400 {
        let mut buf = vec![0u8; 10000];
        match stream.read(&mut consumer, &mut buf) {
            FetchRead::Data(n) => {
                collected.extend_from_slice(&buf[..n]);
                chunks.push(n);
            }
            FetchRead::End => {
                ended = true;
                break;
            }
            FetchRead::None => {
                let _ = consumer.run(5);
                fwd.pump();
                let _ = producer.run(5);
                fwd.pump();
            }
            other => panic!("unexpected read status {other:?}"),
        }
    }
    assert!(ended, "stream never reported END (chunks: {chunks:?})");
    assert_eq!(collected.len(), 10000);
    let expected: Vec<u8> = (0..3).flat_map(segment_body).collect();
    assert_eq!(collected, expected);
    assert_eq!(stream.file_size(), Some(10000));
    stream.close(&mut consumer);
}

#[test]
fn seek_rereads_the_same_bytes() {
    let key = HmacKey::new(b"segment producer");
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    serve_segments(&mut producer, &key);
    consumer
        .keystore_mut()
        .register_verify_key(key.public_key_digest(), Rc::new(key.clone()));

    let mut fetch = Fetch::new();
    let base = parse_uri("ccnx:/v/1").unwrap();
    let mut stream = fetch
        .open(&mut consumer, &base, "seeker", None, 4, true)
        .unwrap();

    // cold read of everything
    let mut all: Vec<u8> = Vec::new();
    for _ in 0..400 {
        let mut buf = vec![0u8; 8192];
        match stream.read(&mut consumer, &mut buf) {
            FetchRead::Data(n) => all.extend_from_slice(&buf[..n]),
            FetchRead::End => break,
            FetchRead::None => {
                let _ = consumer.run(5);
                fwd.pump();
                let _ = producer.run(5);
                fwd.pump();
            }
            other => panic!("unexpected read status {other:?}"),
        }
    }
    assert_eq!(all.len(), 10000);

    // seek back into the middle of segment 1 and re-read
    let target = 5000i64;
    stream.seek(&mut consumer, target).unwrap();
    assert_eq!(stream.position(), target);
    let mut reread: Vec<u8> = Vec::new();
    for _ in 0..400 {
        if reread.len() >= 1000 {
            break;
        }
        let mut buf = vec![0u8; 1000 - reread.len()];
        match stream.read(&mut consumer, &mut buf) {
            FetchRead::Data(n) => reread.extend_from_slice(&buf[..n]),
            FetchRead::None => {
                let _ = consumer.run(5);
                fwd.pump();
                let _ = producer.run(5);
                fwd.pump();
            }
            other => panic!("unexpected read status {other:?}"),
        }
    }
    assert_eq!(reread, all[5000..6000]);
    stream.close(&mut consumer);
}

#[test]
fn seek_to_zero_clears_markers_and_works_cold() {
    let key = HmacKey::new(b"segment producer");
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    serve_segments(&mut producer, &key);
    consumer
        .keystore_mut()
        .register_verify_key(key.public_key_digest(), Rc::new(key.clone()));

    let mut fetch = Fetch::new();
    let base = parse_uri("ccnx:/v/1").unwrap();
    let mut stream = fetch
        .open(&mut consumer, &base, "rewinder", None, 2, true)
        .unwrap();

    let mut first = vec![0u8; 100];
    let mut got = 0;
    for _ in 0..200 {
        match stream.read(&mut consumer, &mut first[got..]) {
            FetchRead::Data(n) => {
                got += n;
                if got == 100 {
                    break;
                }
            }
            FetchRead::None => {
                let _ = consumer.run(5);
                fwd.pump();
                let _ = producer.run(5);
                fwd.pump();
            }
            other => panic!("unexpected read status {other:?}"),
        }
    }
    assert_eq!(got, 100);
    stream.seek(&mut consumer, 0).unwrap();
    let mut again = vec![0u8; 100];
    let mut got2 = 0;
    for _ in 0..200 {
        match stream.read(&mut consumer, &mut again[got2..]) {
            FetchRead::Data(n) => {
                got2 += n;
                if got2 == 100 {
                    break;
                }
            }
            FetchRead::None => {
                let _ = consumer.run(5);
                fwd.pump();
            }
            other => panic!("unexpected read status {other:?}"),
        }
    }
    assert_eq!(first, again);
    stream.close(&mut consumer);
}

#[test]
fn unanswered_stream_reports_none_not_timeout_at_first() {
    // no producer at all: reads yield NONE until the timeout budget passes
    let (mut _producer, mut consumer, mut fwd) = Forwarder::pair();
    let mut fetch = Fetch::new();
    let base = parse_uri("ccnx:/missing").unwrap();
    let mut stream = fetch
        .open(&mut consumer, &base, "void", None, 2, true)
        .unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(stream.read(&mut consumer, &mut buf), FetchRead::None);
    let _ = consumer.run(10);
    fwd.pump();
    assert_eq!(stream.read(&mut consumer, &mut buf), FetchRead::None);
    stream.close(&mut consumer);
}
