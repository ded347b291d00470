//! Deferred detach.
//!
//! Objects flagged `DEFER_DETACH` (windows, typically) are not detached
//! when asked to; they are queued here and torn down by
//! [`DetachQueue::process_queued`], which the event loop runs after every
//! synchronous handler of the current iteration has returned. This keeps an
//! object alive for the rest of any handler that asked to close it.
//!
//! # Invariants
//!
//! 1. An object is queued at most once; it carries `DETACHING` while queued.
//! 2. Visible objects are hidden (`widget-hidden`) in one cycle and
//!    detached in a later one.
//! 3. `terminate` is reported only when the object just closed was flagged
//!    `MAIN` and no other attached `MAIN` object is left under any
//!    registered driver or under the tree it was detached from.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use tracing::{debug, warn};
use crate::object::{Object, ObjectFlags, ObjectRef};

/// What one [`DetachQueue::process_queued`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOutcome {
    /// Objects sent `widget-hidden` this pass.
    pub hidden: usize,
    /// Objects detached (and destroyed, unless indestructible).
    pub detached: usize,
    /// The last `MAIN` object closed; the loop should terminate.
    pub terminate: bool,
}

/// Objects waiting to be detached at the end of the current cycle.
#[derive(Debug, Default)]
pub struct DetachQueue {
    pending: Mutex<Vec<ObjectRef>>,
    drivers: Mutex<Vec<Weak<Object>>>,
}

impl DetachQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue drained by the event loop.
    pub fn global() -> &'static DetachQueue {
        static GLOBAL: OnceLock<DetachQueue> = OnceLock::new();
        GLOBAL.get_or_init(DetachQueue::new)
    }

    /// Register a driver root. `MAIN` objects anywhere below a registered
    /// driver keep the loop alive. Returns `false` if already registered.
    pub fn add_driver(&self, driver: &ObjectRef) -> bool {
        let mut drivers = self.drivers.lock();
        drivers.retain(|d| d.strong_count() > 0);
        if drivers.iter().any(|d| d.as_ptr() == Arc::as_ptr(driver)) {
            return false;
        }
        drivers.push(Arc::downgrade(driver));
        true
    }

    pub fn remove_driver(&self, driver: &ObjectRef) -> bool {
        let mut drivers = self.drivers.lock();
        let found = drivers.iter().any(|d| d.as_ptr() == Arc::as_ptr(driver));
        drivers.retain(|d| d.strong_count() > 0 && d.as_ptr() != Arc::as_ptr(driver));
        found
    }

    /// Whether an attached `MAIN` object other than `closed` remains under
    /// a registered driver or under `former_root`.
    fn main_object_left(&self, closed: &ObjectRef, former_root: Option<&ObjectRef>) -> bool {
        let mut roots: Vec<ObjectRef> = self
            .drivers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        if let Some(r) = former_root {
            if !roots.iter().any(|d| Arc::ptr_eq(d, r)) {
                roots.push(Arc::clone(r));
            }
        }
        roots.iter().any(|r| has_main_below(r, closed))
    }

    /// Queue `obj`. Returns `false` if it was already queued.
    pub fn enqueue(&self, obj: &ObjectRef) -> bool {
        let mut pending = self.pending.lock();
        if pending.iter().any(|o| Arc::ptr_eq(o, obj)) {
            return false;
        }
        obj.set_flags(ObjectFlags::DETACHING);
        pending.push(Arc::clone(obj));
        debug!(object = %obj.name(), "detach queued");
        true
    }

    #[must_use]
    pub fn is_queued(&self, obj: &ObjectRef) -> bool {
        self.pending.lock().iter().any(|o| Arc::ptr_eq(o, obj))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drain the queue.
    ///
    /// Queued objects that are still visible are sent `widget-hidden` and
    /// kept for the next pass. Otherwise every queued object is detached
    /// (posting `detached`/`child-detached`), its former parent is sent
    /// `window-detached`, and the object is destroyed.
    pub fn process_queued(&self) -> QueueOutcome {
        let mut out = QueueOutcome::default();
        let snapshot = self.pending.lock().clone();
        if snapshot.is_empty() {
            return out;
        }

        for obj in &snapshot {
            if obj.has_flags(ObjectFlags::VISIBLE) {
                obj.clear_flags(ObjectFlags::VISIBLE);
                obj.notify(None, "widget-hidden", "", &[]);
                out.hidden += 1;
            }
        }
        if out.hidden > 0 {
            return out;
        }

        let batch: Vec<ObjectRef> = {
            let mut pending = self.pending.lock();
            let (now, later): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|o| snapshot.iter().any(|s| Arc::ptr_eq(s, o)));
            *pending = later;
            now
        };

        for obj in batch {
            let parent = obj.parent();
            let former_root = parent.as_ref().map(|p| p.root());
            let was_main = obj.has_flags(ObjectFlags::MAIN);
            if parent.is_some() {
                if let Err(err) = obj.detach_now() {
                    warn!(object = %obj.name(), error = %err, "queued detach failed");
                }
            }
            obj.clear_flags(ObjectFlags::DETACHING);
            if let Some(p) = &parent {
                p.notify(Some(&obj), "window-detached", "", &[]);
            }
            if !obj.has_flags(ObjectFlags::INDESTRUCTIBLE) {
                if let Err(err) = obj.destroy() {
                    warn!(object = %obj.name(), error = %err, "queued destroy failed");
                }
            }
            out.detached += 1;

            if was_main {
                if !self.main_object_left(&obj, former_root.as_ref()) {
                    debug!(object = %obj.name(), "last main object closed");
                    out.terminate = true;
                }
            }
        }
        out
    }
}

fn has_main_below(node: &ObjectRef, closed: &ObjectRef) -> bool {
    node.children().iter().any(|c| {
        (!Arc::ptr_eq(c, closed) && c.has_flags(ObjectFlags::MAIN) && !c.is_destroyed())
            || has_main_below(c, closed)
    })
}
