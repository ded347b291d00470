#![forbid(unsafe_code)]

//! End-to-end tests for the event loop.
//!
//! Validates:
//! 1. Repeating timers reschedule from their return value and stop at 0.
//! 2. Timers cancelled from their own callback or another thread never
//!    fire again once cancellation returns.
//! 3. `terminate` from another thread wakes a blocked loop.
//! 4. Scheduled posts reach their target; timers of dropped objects are
//!    cancelled.
//! 5. Deferred detach runs after the epilogue and closing the last main
//!    window ends the loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use arbor_core::{DetachQueue, Object, ObjectFlags, Value};
use arbor_runtime::{Backend, EventLoop, EventLoopConfig, LoopState, SinkControl};

fn config() -> EventLoopConfig {
    EventLoopConfig::default()
        .with_max_wait(Duration::from_millis(50))
        .with_detach_queue(false)
}

/// Stop the loop after `ms` no matter what the test does.
fn watchdog(ev: &EventLoop, ms: u64) {
    ev.handle()
        .add_timer(None, Duration::from_millis(ms), "", &[], |h, _| {
            h.terminate(99);
            0
        })
        .unwrap();
}

#[test]
fn repeating_timer_runs_until_it_returns_zero() {
    let mut ev = EventLoop::new(config()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h2 = Arc::clone(&hits);
    ev.handle()
        .add_timer(None, Duration::from_millis(1), "%i", &[Value::Int(4)], move |h, e| {
            let n = h2.fetch_add(1, Ordering::SeqCst) + 1;
            if n == e.int(1) as usize {
                h.terminate(0);
                return 0;
            }
            2
        })
        .unwrap();
    watchdog(&ev, 5_000);
    assert_eq!(ev.run().unwrap(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    assert_eq!(ev.handle().state(), LoopState::Terminated);
}

#[test]
fn timer_cancelled_from_its_own_callback() {
    let mut ev = EventLoop::new(config()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h2 = Arc::clone(&hits);
    let id_cell = Arc::new(parking_lot::Mutex::new(None));
    let ic = Arc::clone(&id_cell);
    let id = ev
        .handle()
        .add_timer(None, Duration::from_millis(1), "", &[], move |h, _| {
            h2.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *ic.lock() {
                assert!(h.del_timer(id));
            }
            1
        })
        .unwrap();
    *id_cell.lock() = Some(id);
    for _ in 0..20 {
        ev.run_once().unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!ev.handle().timer_pending(id));
}

#[test]
fn timer_cancelled_from_another_thread_stops_firing() {
    let mut ev = EventLoop::new(config().with_max_wait(Duration::from_millis(2))).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h2 = Arc::clone(&hits);
    let id = ev
        .handle()
        .add_timer(None, Duration::from_millis(1), "", &[], move |_, _| {
            h2.fetch_add(1, Ordering::SeqCst);
            1
        })
        .unwrap();

    let handle = ev.handle().clone();
    let hits_seen = Arc::clone(&hits);
    let barrier = Arc::new(Barrier::new(2));
    let b2 = Arc::clone(&barrier);
    let canceller = thread::spawn(move || {
        b2.wait();
        while hits_seen.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.del_timer(id));
        let at_cancel = hits_seen.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(hits_seen.load(Ordering::SeqCst), at_cancel);
        handle.terminate(0);
    });

    barrier.wait();
    watchdog(&ev, 5_000);
    assert_eq!(ev.run().unwrap(), 0);
    canceller.join().unwrap();
    assert!(hits.load(Ordering::SeqCst) >= 3);
}

#[test]
fn terminate_wakes_a_blocked_loop() {
    for backend in [Backend::Auto, Backend::TimedWait] {
        let mut ev = EventLoop::new(
            config()
                .with_backend(backend)
                .with_max_wait(Duration::from_secs(30)),
        )
        .unwrap();
        let handle = ev.handle().clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.terminate(7);
        });
        let start = web_time::Instant::now();
        assert_eq!(ev.run().unwrap(), 7);
        assert!(start.elapsed() < Duration::from_secs(10));
        t.join().unwrap();
    }
}

#[test]
fn scheduled_event_reaches_its_target() {
    let mut ev = EventLoop::new(config()).unwrap();
    let target = Object::plain("target").unwrap();
    let sender = Object::plain("sender").unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let s = Arc::clone(&seen);
    target
        .set_event(
            "later",
            move |e| {
                *s.lock() = Some((e.int(1), e.sender().map(|o| o.name())));
            },
            "",
            &[],
        )
        .unwrap();

    let h = ev.handle().clone();
    h.sched_event(&target, Some(&sender), Duration::from_millis(5), "later", "%i", &[Value::Int(11)])
        .unwrap();
    assert!(h
        .sched_event(&target, None, Duration::from_millis(5), "later", "%i", &[])
        .is_err());
    ev.handle()
        .add_timer(None, Duration::from_millis(40), "", &[], |h, _| {
            h.terminate(0);
            0
        })
        .unwrap();
    ev.run().unwrap();
    assert_eq!(*seen.lock(), Some((11, Some("sender".to_owned()))));
}

#[test]
fn timers_of_dropped_objects_are_cancelled() {
    let mut ev = EventLoop::new(config()).unwrap();
    let obj = Object::plain("short-lived").unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h2 = Arc::clone(&hits);
    let id = ev
        .handle()
        .add_timer(Some(&obj), Duration::from_millis(1), "", &[], move |_, _| {
            h2.fetch_add(1, Ordering::SeqCst);
            1
        })
        .unwrap();
    drop(obj);
    thread::sleep(Duration::from_millis(5));
    ev.run_once().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(!ev.handle().timer_pending(id));
}

#[test]
fn closing_the_last_main_window_ends_the_loop() {
    let mut ev = EventLoop::new(config().with_detach_queue(true)).unwrap();
    let driver = Object::plain("driver").unwrap();
    let win = Object::plain("main-window").unwrap();
    win.set_flags(ObjectFlags::DEFER_DETACH | ObjectFlags::MAIN);
    driver.attach(&win).unwrap();

    let epilogue_saw_attached = Arc::new(AtomicUsize::new(0));
    let e2 = Arc::clone(&epilogue_saw_attached);
    let w2 = Arc::clone(&win);
    ev.handle().add_epilogue(move |_| {
        if w2.is_attached() {
            e2.fetch_add(1, Ordering::SeqCst);
        }
        SinkControl::Keep
    });

    let w3 = Arc::clone(&win);
    ev.handle()
        .add_timer(None, Duration::from_millis(1), "", &[], move |_, _| {
            w3.detach().unwrap();
            assert!(w3.is_attached());
            0
        })
        .unwrap();
    watchdog(&ev, 5_000);

    assert_eq!(ev.run().unwrap(), 0);
    assert!(!win.is_attached());
    assert!(win.is_destroyed());
    assert!(epilogue_saw_attached.load(Ordering::SeqCst) >= 1);
    assert!(DetachQueue::global().is_empty());
}

#[cfg(unix)]
#[test]
fn read_sink_fires_when_data_arrives() {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    let mut ev = EventLoop::new(config().with_backend(Backend::Poll)).unwrap();
    let (rx, tx) = UnixStream::pair().unwrap();
    rx.set_nonblocking(true).unwrap();
    let rx = Arc::new(rx);
    let got = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let g = Arc::clone(&got);
    let r2 = Arc::clone(&rx);
    ev.handle()
        .add_read(rx, move |h| {
            let mut buf = [0u8; 16];
            if let Ok(n) = (&*r2).read(&mut buf) {
                g.lock().extend_from_slice(&buf[..n]);
            }
            h.terminate(0);
            SinkControl::Remove
        })
        .unwrap();

    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        (&tx).write_all(b"ping").unwrap();
        tx
    });
    watchdog(&ev, 5_000);
    assert_eq!(ev.run().unwrap(), 0);
    let _tx = t.join().unwrap();
    assert_eq!(&*got.lock(), b"ping");
}
