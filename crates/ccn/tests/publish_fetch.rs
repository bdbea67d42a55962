//! Publish-and-fetch scenarios over the forwarder stub.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use ccn::msg::{parse_uri, Name};
use ccn::{
    sign_content, Ccn, HandlerRef, HmacKey, SigningKey, SigningParams, UpcallInfo, UpcallKind,
    UpcallResult,
};
use common::Forwarder;

fn producer_key() -> HmacKey {
    HmacKey::new(b"producer key for tests")
}

/// Register a filter that answers `/test/data` interests with one signed
/// object; returns a flag observing that it ran.
fn serve_test_data(producer: &mut Ccn, flip_signature_bit: bool) -> Rc<RefCell<u32>> {
    let served = Rc::new(RefCell::new(0u32));
    let count = served.clone();
    let prefix = parse_uri("ccnx:/test/data").unwrap();
    let key = producer_key();
    producer
        .set_interest_filter(
            &prefix,
            Some(HandlerRef::from_fn(
                move |ccn: &mut Ccn, kind, _info: &UpcallInfo<'_>| {
                    if kind != UpcallKind::Interest {
                        return UpcallResult::Ok;
                    }
                    let mut name = parse_uri("ccnx:/test/data").unwrap();
                    name.append(&[0x00, 0x42]);
                    let mut msg =
                        sign_content(&key, &name, &SigningParams::default(), b"DATA").unwrap();
                    if flip_signature_bit {
                        // flip one bit inside the final 20 bytes of the message
                        let pos = msg.len() - 10;
                        msg[pos] ^= 0x01;
                    }
                    ccn.put(&msg).unwrap();
                    *count.borrow_mut() += 1;
                    UpcallResult::InterestConsumed
                },
            )),
        )
        .unwrap();
    served
}

#[test]
fn publish_and_fetch_delivers_verified_content() {
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    let served = serve_test_data(&mut producer, false);
    consumer
        .keystore_mut()
        .register_verify_key(producer_key().public_key_digest(), Rc::new(producer_key()));

    let got: Rc<RefCell<Option<(Vec<u8>, usize)>>> = Rc::new(RefCell::new(None));
    let sink = got.clone();
    let handler = HandlerRef::from_fn(move |ccn: &mut Ccn, kind, info: &UpcallInfo<'_>| {
        match kind {
            UpcallKind::Content => {
                let msg = info.content_msg.unwrap();
                let body = info.pco.unwrap().content_value(msg).unwrap();
                *sink.borrow_mut() = Some((body.to_vec(), info.matched_comps));
                ccn.set_run_timeout(0);
                UpcallResult::Ok
            }
            UpcallKind::InterestTimedOut => UpcallResult::Reexpress,
            _ => UpcallResult::Ok,
        }
    });
    let name = parse_uri("ccnx:/test/data").unwrap();
    consumer.express_interest(&name, handler, None).unwrap();

    let converged = common::run_pair(&mut producer, &mut consumer, &mut fwd, 2000, |_, _| {
        got.borrow().is_some()
    });
    assert!(converged, "content never arrived");
    let (body, matched) = got.borrow().clone().unwrap();
    assert_eq!(body, b"DATA");
    assert_eq!(matched, 2);
    assert_eq!(*served.borrow(), 1);
}

#[test]
fn flipped_signature_bit_reports_content_bad() {
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    let _served = serve_test_data(&mut producer, true);
    consumer
        .keystore_mut()
        .register_verify_key(producer_key().public_key_digest(), Rc::new(producer_key()));

    let kinds: Rc<RefCell<Vec<UpcallKind>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = kinds.clone();
    let handler = HandlerRef::from_fn(move |ccn: &mut Ccn, kind, _info: &UpcallInfo<'_>| {
        match kind {
            UpcallKind::ContentBad | UpcallKind::Content => {
                sink.borrow_mut().push(kind);
                ccn.set_run_timeout(0);
                UpcallResult::Ok
            }
            UpcallKind::InterestTimedOut => UpcallResult::Reexpress,
            _ => UpcallResult::Ok,
        }
    });
    let name = parse_uri("ccnx:/test/data").unwrap();
    consumer.express_interest(&name, handler, None).unwrap();

    let saw = common::run_pair(&mut producer, &mut consumer, &mut fwd, 2000, |_, _| {
        !kinds.borrow().is_empty()
    });
    assert!(saw, "no verification verdict arrived");
    assert_eq!(kinds.borrow().as_slice(), &[UpcallKind::ContentBad]);
}

#[test]
fn get_returns_single_object() {
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    let _served = serve_test_data(&mut producer, false);
    consumer
        .keystore_mut()
        .register_verify_key(producer_key().public_key_digest(), Rc::new(producer_key()));

    // interleave manually: run the producer briefly after the consumer's
    // get() expresses its interest
    let name = parse_uri("ccnx:/test/data").unwrap();
    let mut result = None;
    for _ in 0..50 {
        if let Some(bytes) = consumer.get(&name, None, 20).unwrap() {
            result = Some(bytes);
            break;
        }
        fwd.pump();
        let _ = producer.run(5);
        fwd.pump();
    }
    let bytes = result.expect("get returned nothing");
    let pco = ccn::msg::parse_content_object(&bytes, None).unwrap();
    assert_eq!(pco.content_value(&bytes).unwrap(), b"DATA");
}

#[test]
fn consumed_interest_is_answered_once() {
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    let served = serve_test_data(&mut producer, false);

    // a second, less specific filter must see the consumed kind
    let observed: Rc<RefCell<Vec<UpcallKind>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = observed.clone();
    let root = parse_uri("ccnx:/test").unwrap();
    producer
        .set_interest_filter(
            &root,
            Some(HandlerRef::from_fn(
                move |_: &mut Ccn, kind, _: &UpcallInfo<'_>| {
                    if kind != UpcallKind::Final {
                        sink.borrow_mut().push(kind);
                    }
                    UpcallResult::Ok
                },
            )),
        )
        .unwrap();

    let done: Rc<RefCell<bool>> = Rc::new(RefCell::new(false));
    let flag = done.clone();
    let handler = HandlerRef::from_fn(move |ccn: &mut Ccn, kind, _: &UpcallInfo<'_>| {
        if matches!(kind, UpcallKind::Content | UpcallKind::ContentKeyMissing) {
            *flag.borrow_mut() = true;
            ccn.set_run_timeout(0);
        }
        UpcallResult::Ok
    });
    let name = parse_uri("ccnx:/test/data").unwrap();
    consumer.express_interest(&name, handler, None).unwrap();

    common::run_pair(&mut producer, &mut consumer, &mut fwd, 2000, |_, _| {
        *done.borrow()
    });
    assert_eq!(*served.borrow(), 1);
    assert_eq!(observed.borrow().as_slice(), &[UpcallKind::ConsumedInterest]);
}

#[test]
fn name_conventions_round_trip_over_the_wire() {
    // versioned, segmented names survive encode/dispatch/decode intact
    let (mut producer, mut consumer, mut fwd) = Forwarder::pair();
    let key = producer_key();
    consumer
        .keystore_mut()
        .register_verify_key(key.public_key_digest(), Rc::new(key.clone()));

    let mut base = parse_uri("ccnx:/versioned").unwrap();
    base.append_numeric(ccn::codec::Marker::Version, 0x1122334455);
    let mut seg0 = base.clone();
    seg0.append_numeric(ccn::codec::Marker::Seqnum, 0);
    let published = sign_content(&key, &seg0, &SigningParams::default(), b"seg0").unwrap();

    let prefix = parse_uri("ccnx:/versioned").unwrap();
    producer
        .set_interest_filter(
            &prefix,
            Some(HandlerRef::from_fn(
                move |ccn: &mut Ccn, kind, _: &UpcallInfo<'_>| {
                    if kind == UpcallKind::Interest {
                        ccn.put(&published).unwrap();
                        return UpcallResult::InterestConsumed;
                    }
                    UpcallResult::Ok
                },
            )),
        )
        .unwrap();

    let got: Rc<RefCell<Option<Name>>> = Rc::new(RefCell::new(None));
    let sink = got.clone();
    let handler = HandlerRef::from_fn(move |ccn: &mut Ccn, kind, info: &UpcallInfo<'_>| {
        if kind == UpcallKind::Content {
            let msg = info.content_msg.unwrap();
            let pco = info.pco.unwrap();
            let name_bytes = &msg[pco.b_name..pco.e_name];
            *sink.borrow_mut() = Name::from_ccnb(name_bytes).ok();
            ccn.set_run_timeout(0);
        }
        UpcallResult::Ok
    });
    consumer.express_interest(&base, handler, None).unwrap();
    common::run_pair(&mut producer, &mut consumer, &mut fwd, 2000, |_, _| {
        got.borrow().is_some()
    });
    let name = got.borrow().clone().expect("content never arrived");
    assert_eq!(name.count().unwrap(), 3);
    assert_eq!(name.component(1).unwrap()[0], 0xFD);
    assert_eq!(name.component(2).unwrap(), &[0x00]);
}
