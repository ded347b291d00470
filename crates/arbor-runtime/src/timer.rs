//! Timers.
//!
//! A timer owns a callback and a prebuilt [`Event`] whose receiver is the
//! object the timer belongs to. The callback returns the delay until its
//! next run in milliseconds; returning `0` cancels it.
//!
//! # Invariants
//!
//! 1. Firing and cancelling a timer are serialized by the timer's gate, so
//!    once [`Timers::cancel`] returns the callback will not start again.
//! 2. Cancelling from inside the callback is allowed; the gate is
//!    reentrant and the callback is simply not rescheduled.
//! 3. A timer whose object was dropped or destroyed is cancelled instead of
//!    fired.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arbor_core::{Event, Object};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace};
use web_time::Instant;

use crate::event_loop::LoopHandle;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl TimerId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

pub(crate) type TimerFn = dyn FnMut(&LoopHandle, &Event) -> u32 + Send;

struct TimerSlot {
    id: TimerId,
    gate: ReentrantMutex<()>,
    cancelled: AtomicBool,
    func: Mutex<Box<TimerFn>>,
    event: Event,
    object: Option<Weak<Object>>,
}

impl TimerSlot {
    fn object_gone(&self) -> bool {
        self.object
            .as_ref()
            .is_some_and(|w| w.upgrade().is_none_or(|o| o.is_destroyed()))
    }
}

#[derive(Default)]
struct Queue {
    next_id: u64,
    seq: u64,
    heap: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    /// Live timers and the sequence number of their current heap entry.
    slots: HashMap<TimerId, (Arc<TimerSlot>, u64)>,
}

impl Queue {
    fn schedule(&mut self, id: TimerId, at: Instant) {
        self.seq += 1;
        let seq = self.seq;
        if let Some(entry) = self.slots.get_mut(&id) {
            entry.1 = seq;
            self.heap.push(Reverse((at, seq, id)));
        }
    }

    fn is_current(&self, seq: u64, id: TimerId) -> bool {
        self.slots.get(&id).is_some_and(|(_, s)| *s == seq)
    }

    /// Drop heap entries that no longer match a live timer.
    fn prune(&mut self) {
        while let Some(Reverse((_, seq, id))) = self.heap.peek().copied() {
            if self.is_current(seq, id) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// The loop's timer set.
#[derive(Default)]
pub(crate) struct Timers {
    queue: Mutex<Queue>,
}

impl Timers {
    pub fn add(
        &self,
        object: Option<&Arc<Object>>,
        delay: Duration,
        event: Event,
        func: Box<TimerFn>,
    ) -> TimerId {
        let mut q = self.queue.lock();
        q.next_id += 1;
        let id = TimerId(q.next_id);
        let slot = Arc::new(TimerSlot {
            id,
            gate: ReentrantMutex::new(()),
            cancelled: AtomicBool::new(false),
            func: Mutex::new(func),
            event,
            object: object.map(Arc::downgrade),
        });
        q.slots.insert(id, (slot, 0));
        q.schedule(id, Instant::now() + delay);
        debug!(timer = %id, delay_ms = delay.as_millis() as u64, "timer added");
        id
    }

    /// Cancel `id`. Blocks while the timer is firing on another thread.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.queue.lock().slots.remove(&id);
        match removed {
            Some((slot, _)) => {
                let _gate = slot.gate.lock();
                slot.cancelled.store(true, Ordering::Release);
                debug!(timer = %id, "timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.queue.lock().slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().slots.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let mut q = self.queue.lock();
        q.prune();
        q.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    fn pop_due(&self, now: Instant) -> Option<Arc<TimerSlot>> {
        let mut q = self.queue.lock();
        loop {
            q.prune();
            let Reverse((at, seq, id)) = *q.heap.peek()?;
            if at > now {
                return None;
            }
            q.heap.pop();
            if let Some((slot, s)) = q.slots.get(&id) {
                if *s == seq {
                    return Some(Arc::clone(slot));
                }
            }
        }
    }

    /// Run every timer due at `now`. Returns how many callbacks ran.
    pub fn fire_due(&self, now: Instant, handle: &LoopHandle) -> usize {
        let mut fired = 0;
        while let Some(slot) = self.pop_due(now) {
            let _gate = slot.gate.lock();
            if slot.cancelled.load(Ordering::Acquire) {
                continue;
            }
            if slot.object_gone() {
                trace!(timer = %slot.id, "timer object gone");
                self.cancel(slot.id);
                continue;
            }
            let next = {
                let mut func = slot.func.lock();
                (*func)(handle, &slot.event)
            };
            fired += 1;
            if slot.cancelled.load(Ordering::Acquire) {
                continue;
            }
            if next == 0 {
                self.cancel(slot.id);
            } else {
                let at = Instant::now() + Duration::from_millis(u64::from(next));
                self.queue.lock().schedule(slot.id, at);
                trace!(timer = %slot.id, next_ms = next, "timer rescheduled");
            }
        }
        fired
    }
}

impl fmt::Debug for Timers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers").field("pending", &self.len()).finish()
    }
}
