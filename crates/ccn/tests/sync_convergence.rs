//! Slice synchronization between two handles.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use ccn::msg::parse_uri;
use ccn::sync::{Slice, SyncHandle};
use common::Forwarder;

fn slice() -> Slice {
    Slice::new(
        parse_uri("ccnx:/t").unwrap(),
        parse_uri("ccnx:/p").unwrap(),
    )
}

#[test_log::test]
fn two_peers_converge_on_the_union() {
    let (mut a, mut b, mut fwd) = Forwarder::pair();

    let seen_a: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen_a.clone();
    let sync_a = SyncHandle::open(
        &mut a,
        &slice(),
        Box::new(move |name| sink.borrow_mut().push(ccn::msg::format_uri(name))),
    )
    .unwrap();

    let seen_b: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen_b.clone();
    let sync_b = SyncHandle::open(
        &mut b,
        &slice(),
        Box::new(move |name| sink.borrow_mut().push(ccn::msg::format_uri(name))),
    )
    .unwrap();

    sync_a
        .add_name(&mut a, &parse_uri("ccnx:/p/a").unwrap())
        .unwrap();
    sync_a
        .add_name(&mut a, &parse_uri("ccnx:/p/b").unwrap())
        .unwrap();
    sync_b
        .add_name(&mut b, &parse_uri("ccnx:/p/a").unwrap())
        .unwrap();
    sync_b
        .add_name(&mut b, &parse_uri("ccnx:/p/c").unwrap())
        .unwrap();

    let converged = common::run_pair(&mut a, &mut b, &mut fwd, 10_000, |_, _| {
        !sync_a.root_hash().is_empty() && sync_a.root_hash() == sync_b.root_hash()
    });
    assert!(
        converged,
        "roots never converged: A {:?} B {:?}, A saw {:?}, B saw {:?}",
        hex::encode(sync_a.root_hash()),
        hex::encode(sync_b.root_hash()),
        seen_a.borrow(),
        seen_b.borrow()
    );

    assert_eq!(seen_a.borrow().as_slice(), &["ccnx:/p/c".to_string()]);
    assert_eq!(seen_b.borrow().as_slice(), &["ccnx:/p/b".to_string()]);

    let names_a: Vec<String> = sync_a
        .local_names()
        .iter()
        .map(ccn::msg::format_uri)
        .collect();
    assert_eq!(names_a, vec!["ccnx:/p/a", "ccnx:/p/b", "ccnx:/p/c"]);

    let final_a = sync_a.close(&mut a);
    let final_b = sync_b.close(&mut b);
    assert_eq!(final_a, final_b);
}

#[test_log::test]
fn subscriber_follows_a_publisher() {
    // one side is empty and simply adopts the other's set
    let (mut pub_side, mut sub_side, mut fwd) = Forwarder::pair();

    let sync_pub = SyncHandle::open(&mut pub_side, &slice(), Box::new(|_| {})).unwrap();
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let sync_sub = SyncHandle::open(
        &mut sub_side,
        &slice(),
        Box::new(move |name| sink.borrow_mut().push(ccn::msg::format_uri(name))),
    )
    .unwrap();

    for uri in ["ccnx:/p/x", "ccnx:/p/y", "ccnx:/p/z"] {
        sync_pub
            .add_name(&mut pub_side, &parse_uri(uri).unwrap())
            .unwrap();
    }

    let converged = common::run_pair(&mut pub_side, &mut sub_side, &mut fwd, 10_000, |_, _| {
        sync_sub.root_hash() == sync_pub.root_hash() && !sync_sub.root_hash().is_empty()
    });
    assert!(converged, "subscriber never caught up; saw {:?}", seen.borrow());
    assert_eq!(seen.borrow().len(), 3);
    // a pure subscriber ends up with exactly the publisher's root
    assert_eq!(sync_sub.root_hash(), sync_pub.root_hash());
}

#[test_log::test]
fn names_outside_the_slice_are_refused() {
    let (mut a, _b, _fwd) = Forwarder::pair();
    let sync_a = SyncHandle::open(&mut a, &slice(), Box::new(|_| {})).unwrap();
    let added = sync_a
        .add_name(&mut a, &parse_uri("ccnx:/elsewhere/x").unwrap())
        .unwrap();
    assert!(!added);
    assert!(sync_a.root_hash().is_empty());
}

#[test_log::test]
fn large_sets_converge_with_bounded_fetches() {
    let (mut a, mut b, mut fwd) = Forwarder::pair();
    let sync_a = SyncHandle::open(&mut a, &slice(), Box::new(|_| {})).unwrap();
    let added: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
    let sink = added.clone();
    let sync_b = SyncHandle::open(
        &mut b,
        &slice(),
        Box::new(move |_| *sink.borrow_mut() += 1),
    )
    .unwrap();

    // enough names to force a multi-node tree on A's side
    for i in 0..120 {
        let uri = format!("ccnx:/p/item-{i:04}");
        sync_a.add_name(&mut a, &parse_uri(&uri).unwrap()).unwrap();
    }

    let converged = common::run_pair(&mut a, &mut b, &mut fwd, 15_000, |_, _| {
        sync_b.root_hash() == sync_a.root_hash() && !sync_b.root_hash().is_empty()
    });
    assert!(converged, "large set never converged ({} added)", added.borrow());
    assert_eq!(*added.borrow(), 120);
}
