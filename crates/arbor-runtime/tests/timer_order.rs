#![forbid(unsafe_code)]

//! Property tests for timer scheduling.
//!
//! One-shot timers fire exactly once each, in deadline order, with ties
//! broken by registration order.

use std::sync::Arc;
use std::time::Duration;

use arbor_runtime::{Backend, EventLoop, EventLoopConfig};
use parking_lot::Mutex;
use proptest::prelude::*;

const STEP_MS: u64 = 5;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn one_shot_timers_fire_in_deadline_order(slots in prop::collection::vec(0u64..8, 1..6)) {
        let mut ev = EventLoop::new(
            EventLoopConfig::default()
                .with_backend(Backend::TimedWait)
                .with_max_wait(Duration::from_millis(2))
                .with_detach_queue(false),
        )
        .unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));
        for (i, slot) in slots.iter().enumerate() {
            let f = Arc::clone(&fired);
            ev.handle()
                .add_timer(None, Duration::from_millis(slot * STEP_MS), "", &[], move |_, _| {
                    f.lock().push(i);
                    0
                })
                .unwrap();
        }

        let mut spins = 0;
        while ev.handle().timer_count() > 0 && spins < 1_000 {
            ev.run_once().unwrap();
            spins += 1;
        }

        let mut expected: Vec<usize> = (0..slots.len()).collect();
        expected.sort_by_key(|&i| slots[i]);
        prop_assert_eq!(&*fired.lock(), &expected);
        prop_assert_eq!(ev.handle().timer_count(), 0);
    }
}
