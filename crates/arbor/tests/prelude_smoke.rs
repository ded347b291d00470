#![forbid(unsafe_code)]

//! The prelude alone is enough to build a tree, bind state, and run a loop.

use std::time::Duration;

use arbor::prelude::*;

#[test]
fn prelude_covers_a_small_program() {
    let count = Slot::new(0u32);
    let root = Object::plain("app").unwrap();
    let button = Object::plain("button").unwrap();
    root.attach(&button).unwrap();
    button.bind_uint("clicks", &count).unwrap();
    button
        .set_event(
            "click",
            |ev: &Event| {
                let me = ev.self_obj();
                let n = me.get_uint("clicks").unwrap();
                me.set_uint("clicks", n + 1).unwrap();
            },
            "",
            &[],
        )
        .unwrap();

    let mut ev = EventLoop::new(EventLoopConfig::default().with_detach_queue(false)).unwrap();
    let target = button.clone();
    ev.handle()
        .add_timer(Some(&root), Duration::from_millis(1), "", &[], move |h, _| {
            target.post_event(None, "click", "", &[]).unwrap();
            if target.get_uint("clicks").unwrap() == 3 {
                h.terminate(0);
                return 0;
            }
            1
        })
        .unwrap();
    assert_eq!(ev.run().unwrap(), 0);
    assert_eq!(count.get(), 3);
    assert_eq!(button.path(), "/button");
}
