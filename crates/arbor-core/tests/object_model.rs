#![forbid(unsafe_code)]

//! End-to-end tests for the object model.
//!
//! Validates:
//! 1. Bound variables write through to caller storage and flag views only
//!    touch their mask.
//! 2. Range operations clamp without overflow.
//! 3. Propagated events reach the target and then every descendant in
//!    pre-order, with identical arguments.
//! 4. Concurrent posts from several threads do not deadlock.
//! 5. Trees survive a save/load round-trip through a file, names included.

use std::sync::{Arc, Barrier};
use std::thread;

use arbor_core::{
    Class, ClassRegistry, EventFlags, Object, ObjectFlags, RangeNames, Slot, Value, load_tree,
    load_tree_from_file, save_tree, save_tree_to_file,
};
use arbor_io::{ConstCoreSource, CoreSource, DataSource};
use parking_lot::Mutex;
use proptest::prelude::*;

#[test]
fn scrollbar_clamps_on_ninth_increment() {
    let value = Slot::new(0i32);
    let sb = Object::plain("scrollbar").unwrap();
    sb.bind_int("value", &value).unwrap();
    sb.set_int("min", 0).unwrap();
    sb.set_int("max", 10).unwrap();
    sb.set_int("visible", 2).unwrap();
    sb.set_int("inc", 1).unwrap();

    let names = RangeNames::default();
    let clamped: Vec<bool> = (0..10).map(|_| sb.increment(&names).unwrap()).collect();
    assert_eq!(clamped.iter().position(|c| *c), Some(8));
    assert!(clamped[9]);
    assert_eq!(value.get(), 8);
}

#[test]
fn ping_sees_template_then_call_args() {
    let x = Object::plain("x").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    x.set_event(
        "ping",
        move |ev| s.lock().extend([ev.int(1), ev.int(2)]),
        "%i",
        &[Value::Int(5)],
    )
    .unwrap();
    x.post_event(None, "ping", "%i", &[Value::Int(7)]).unwrap();
    assert_eq!(*seen.lock(), [5, 7]);
}

#[test]
fn propagation_visits_target_then_descendants() {
    let p = Object::plain("P").unwrap();
    let c1 = Object::plain("C1").unwrap();
    let c2 = Object::plain("C2").unwrap();
    p.attach(&c1).unwrap();
    p.attach(&c2).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    for o in [&p, &c1, &c2] {
        let l = Arc::clone(&log);
        let h = o
            .set_event(
                "refresh",
                move |ev| {
                    l.lock().push((ev.self_obj().name(), ev.string(1).to_owned()));
                },
                "",
                &[],
            )
            .unwrap();
        if Arc::ptr_eq(o, &p) {
            h.set_flags(EventFlags::PROPAGATE);
        }
    }

    let fired = p
        .post_event(None, "refresh", "%s", &[Value::from("all")])
        .unwrap();
    assert_eq!(fired, 3);
    let log = log.lock();
    let order: Vec<&str> = log.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order, ["P", "C1", "C2"]);
    assert!(log.iter().all(|(_, a)| a == "all"));
}

#[test]
fn concurrent_posts_complete() {
    let a = Object::plain("a").unwrap();
    let b = Object::plain("b").unwrap();
    a.attach(&b).unwrap();

    let hits = Arc::new(Mutex::new(0u32));
    for o in [&a, &b] {
        let h = Arc::clone(&hits);
        let peer = if Arc::ptr_eq(o, &a) { Arc::clone(&b) } else { Arc::clone(&a) };
        o.set_event(
            "tick",
            move |ev| {
                *h.lock() += 1;
                // Touch the peer's state while a post is in flight.
                peer.set_int("last", ev.int(1)).unwrap();
            },
            "",
            &[],
        )
        .unwrap();
    }

    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = [Arc::clone(&a), Arc::clone(&b)]
        .into_iter()
        .map(|target| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..200 {
                    target.post_event(None, "tick", "%i", &[Value::Int(i)]).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(*hits.lock(), 400);
}

#[test]
fn find_parent_by_class_after_attach() {
    let window = Class::new("ModelTestWindow").into_arc();
    let button = Class::new("ModelTestButton").into_arc();
    ClassRegistry::global().register(&window).unwrap();
    ClassRegistry::global().register(&button).unwrap();

    let w = Object::new(&window, "win").unwrap();
    let b = Object::new(&button, "ok").unwrap();
    w.attach(&b).unwrap();

    let found = b.find_parent(None, Some("ModelTestWindow:*")).unwrap();
    assert!(Arc::ptr_eq(&found, &w));
    assert!(b.find_parent(None, Some("ModelTestButton")).is_none());
    assert_eq!(b.path(), "/ok");
}

#[test]
fn three_node_tree_roundtrips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.arbor");

    let root = Object::plain("root").unwrap();
    let left = Object::plain("left").unwrap();
    let right = Object::plain("right").unwrap();
    root.attach(&left).unwrap();
    left.attach(&right).unwrap();
    root.set_string("title", "main").unwrap();
    left.set_uint32("count", 3).unwrap();
    right.set_flags(ObjectFlags::READONLY);

    save_tree_to_file(&root, &path).unwrap();
    let back = load_tree_from_file(&path).unwrap();

    assert_eq!(back.get_string("title").unwrap(), "main");
    let l = back.find_path("left").unwrap();
    assert_eq!(l.get_uint32("count").unwrap(), 3);
    let r = back.find_path("left/right").unwrap();
    assert!(r.has_flags(ObjectFlags::READONLY));
    assert_eq!(back.descendant_count(), 2);
}

#[test]
fn generated_names_survive_a_roundtrip() {
    let root = Object::plain("root").unwrap();
    let child = Object::plain("keep").unwrap();
    child.set_flags(ObjectFlags::NAME_ON_ATTACH);
    root.attach(&child).unwrap();
    child.rename("keep").unwrap();

    let mut ds = DataSource::new(CoreSource::auto());
    save_tree(&root, &mut ds).unwrap();
    let mut rd = DataSource::new(ConstCoreSource::new(ds.bytes().unwrap().to_vec()));
    let back = load_tree(&mut rd).unwrap();

    let names: Vec<String> = back.children().iter().map(|c| c.name()).collect();
    assert_eq!(names, ["keep"]);
    assert!(back.children()[0].has_flags(ObjectFlags::NAME_ON_ATTACH));
}

proptest! {
    #[test]
    fn flag_views_touch_only_their_mask(word in any::<u32>(), bit in 0u32..32, on in any::<bool>()) {
        let slot = Slot::new(word);
        let o = Object::plain("flags").unwrap();
        let mask = 1u32 << bit;
        let var = o.bind_flag("f", &slot, mask).unwrap();
        var.lock().unwrap().set_flag(on).unwrap();
        let expected = if on { word | mask } else { word & !mask };
        prop_assert_eq!(slot.get(), expected);
        prop_assert_eq!(var.lock().unwrap().is_set(), on);
    }

    #[test]
    fn range_value_stays_within_bounds(
        start in -50i32..50,
        min in -50i32..0,
        span in 1i32..100,
        vis in 0i32..20,
        inc in 1i32..30,
        ops in proptest::collection::vec(any::<bool>(), 1..40),
    ) {
        let max = min + span + vis;
        let o = Object::plain("range").unwrap();
        o.set_int("value", start.clamp(min, max - vis)).unwrap();
        o.set_int("min", min).unwrap();
        o.set_int("max", max).unwrap();
        o.set_int("visible", vis).unwrap();
        o.set_int("inc", inc).unwrap();
        let names = RangeNames::default();
        for up in ops {
            if up {
                o.increment(&names).unwrap();
            } else {
                o.decrement(&names).unwrap();
            }
            let v = o.get_int("value").unwrap();
            prop_assert!(v >= min && v <= max - vis);
        }
    }
}
