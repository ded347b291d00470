//! The event loop.
//!
//! # Design
//!
//! Each iteration runs four phases in order:
//!
//! 1. **Prologue** sinks.
//! 2. **Wait**: block on the backend until a descriptor is ready, the next
//!    timer is due, another thread wakes the loop, or `max_wait` elapses.
//!    Due timers fire, then ready read/write sinks.
//! 3. **Epilogue** sinks, then the global deferred-detach queue. Everything
//!    posted synchronously during the iteration has returned by now, so
//!    this is where objects are torn down.
//! 4. **Spinner** sinks. While any are registered the wait never blocks
//!    longer than the spinner policy allows.
//!
//! # Invariants
//!
//! 1. [`LoopHandle::terminate`] is cooperative: it is observed at the next
//!    phase boundary and never interrupts a running callback.
//! 2. Sinks, timers and handlers run on the loop thread, one at a time. No
//!    loop-internal lock is held while a callback runs, so callbacks may
//!    add or remove sinks and timers.
//! 3. A sink removed during a pass does not run later in the same pass.
//!
//! # Failure Modes
//!
//! - Backend errors end [`EventLoop::run`] with an error; the loop returns
//!   to [`LoopState::Idle`] and may be run again.
//! - Read/write sinks are rejected with [`LoopError::Unsupported`] on the
//!   timed-wait backend. File-change and process-exit sinks are rejected on
//!   every backend.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arbor_core::args::build_args;
use arbor_core::{DetachQueue, Event, Object, ObjectRef, Value};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use web_time::Instant;

use crate::backend::{self, WaitBackend, Waker};
use crate::config::{EventLoopConfig, SpinnerPolicy};
use crate::error::{LoopError, Result};
use crate::sink::{SinkControl, SinkId, SinkKind, SinkTable};
use crate::timer::{TimerId, Timers};

#[cfg(unix)]
use crate::backend::Watch;
#[cfg(unix)]
use crate::sink::{SinkFd, SinkFn};
#[cfg(unix)]
use std::os::fd::AsFd;

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not running.
    Idle,
    Running,
    /// `terminate` was called; the loop stops at the next boundary.
    BreakRequested,
    /// The loop ran its terminator sinks and returned.
    Terminated,
}

struct Shared {
    state: Mutex<LoopState>,
    exit_code: AtomicI32,
    sinks: Mutex<SinkTable>,
    timers: Timers,
    waker: Arc<dyn Waker>,
    backend: &'static str,
    supports_fds: bool,
}

/// Cloneable, thread-safe access to a loop's sinks, timers and state.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.shared.state.lock()
    }

    /// Exit code recorded by the last [`terminate`](Self::terminate).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.shared.exit_code.load(Ordering::Acquire)
    }

    /// Name of the active wait backend.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.shared.backend
    }

    /// Ask the loop to stop with `code` once the current phase completes.
    pub fn terminate(&self, code: i32) {
        self.shared.exit_code.store(code, Ordering::Release);
        {
            let mut st = self.shared.state.lock();
            if matches!(*st, LoopState::Idle | LoopState::Running) {
                *st = LoopState::BreakRequested;
            }
        }
        info!(code, "event loop termination requested");
        self.wake();
    }

    /// Interrupt a blocking wait.
    pub fn wake(&self) {
        self.shared.waker.wake();
    }

    fn break_requested(&self) -> bool {
        self.state() == LoopState::BreakRequested
    }

    // ── Sinks ──────────────────────────────────────────────────────────

    fn add_sink(
        &self,
        kind: SinkKind,
        ident: u64,
        func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static,
    ) -> SinkId {
        let id = self.shared.sinks.lock().add(kind, ident, Box::new(func));
        debug!(sink = %id, %kind, "sink added");
        id
    }

    /// Run `func` at the start of every iteration.
    pub fn add_prologue(&self, func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static) -> SinkId {
        self.add_sink(SinkKind::Prologue, 0, func)
    }

    /// Run `func` after dispatch in every iteration.
    pub fn add_epilogue(&self, func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static) -> SinkId {
        self.add_sink(SinkKind::Epilogue, 0, func)
    }

    /// Run `func` at the end of every iteration.
    pub fn add_spinner(&self, func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static) -> SinkId {
        self.add_sink(SinkKind::Spinner, 0, func)
    }

    /// Run `func` once when the loop observes termination.
    pub fn add_terminator(&self, func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static) -> SinkId {
        self.add_sink(SinkKind::Terminator, 0, func)
    }

    /// Run `func` when `fd` is readable. The sink's ident is the raw
    /// descriptor number.
    #[cfg(unix)]
    pub fn add_read(
        &self,
        fd: SinkFd,
        func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static,
    ) -> Result<SinkId> {
        self.add_fd_sink(SinkKind::Read, fd, Box::new(func))
    }

    /// Run `func` when `fd` is writable.
    #[cfg(unix)]
    pub fn add_write(
        &self,
        fd: SinkFd,
        func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static,
    ) -> Result<SinkId> {
        self.add_fd_sink(SinkKind::Write, fd, Box::new(func))
    }

    #[cfg(unix)]
    fn add_fd_sink(&self, kind: SinkKind, fd: SinkFd, func: Box<SinkFn>) -> Result<SinkId> {
        if !self.shared.supports_fds {
            return Err(LoopError::Unsupported {
                kind,
                backend: self.shared.backend,
            });
        }
        let id = self.shared.sinks.lock().add_fd(kind, fd, func);
        debug!(sink = %id, %kind, "descriptor sink added");
        self.wake();
        Ok(id)
    }

    /// Watch a file for changes. No backend implements this yet.
    pub fn add_file_change(
        &self,
        _path: &std::path::Path,
        _func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static,
    ) -> Result<SinkId> {
        Err(LoopError::Unsupported {
            kind: SinkKind::FileChange,
            backend: self.shared.backend,
        })
    }

    /// Watch a child process for exit. No backend implements this yet.
    pub fn add_process_exit(
        &self,
        _pid: u32,
        _func: impl FnMut(&LoopHandle) -> SinkControl + Send + 'static,
    ) -> Result<SinkId> {
        Err(LoopError::Unsupported {
            kind: SinkKind::ProcessExit,
            backend: self.shared.backend,
        })
    }

    pub fn del_sink(&self, id: SinkId) -> bool {
        let removed = self.shared.sinks.lock().remove(id);
        if removed {
            debug!(sink = %id, "sink removed");
        }
        removed
    }

    /// Remove every sink of `kind` registered under `ident` (for read and
    /// write sinks, the descriptor number). For [`SinkKind::Timer`] the
    /// ident is a [`TimerId`] value.
    pub fn del_sinks_by_ident(&self, kind: SinkKind, ident: u64) -> usize {
        if kind == SinkKind::Timer {
            return usize::from(self.del_timer(TimerId(ident)));
        }
        let n = self.shared.sinks.lock().remove_by_ident(kind, ident);
        debug!(%kind, ident, removed = n, "sinks removed by ident");
        n
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.shared.sinks.lock().len()
    }

    // ── Timers ─────────────────────────────────────────────────────────

    /// Schedule `func` to run after `delay`, receiving an event whose
    /// receiver is `object` and whose arguments are built from `format`
    /// and `values`. The callback's return value is the next delay in
    /// milliseconds; `0` cancels the timer.
    pub fn add_timer(
        &self,
        object: Option<&ObjectRef>,
        delay: Duration,
        format: &str,
        values: &[Value],
        func: impl FnMut(&LoopHandle, &Event) -> u32 + Send + 'static,
    ) -> Result<TimerId> {
        let event = Event::build(Some("timer"), object, format, values)?;
        let id = self.shared.timers.add(object, delay, event, Box::new(func));
        self.wake();
        Ok(id)
    }

    /// Cancel a timer. Once this returns the callback will not start
    /// again, including when called from the callback itself.
    pub fn del_timer(&self, id: TimerId) -> bool {
        self.shared.timers.cancel(id)
    }

    #[must_use]
    pub fn timer_pending(&self, id: TimerId) -> bool {
        self.shared.timers.is_pending(id)
    }

    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.shared.timers.len()
    }

    /// Post `name` to `target` after `delay`, with the arguments checked
    /// now. Nothing is posted if `target` is dropped first.
    pub fn sched_event(
        &self,
        target: &ObjectRef,
        sender: Option<&ObjectRef>,
        delay: Duration,
        name: &str,
        format: &str,
        values: &[Value],
    ) -> Result<TimerId> {
        build_args(format, values)?;
        let sender: Option<Weak<Object>> = sender.map(Arc::downgrade);
        let name = name.to_owned();
        let format = format.to_owned();
        let values = values.to_vec();
        self.add_timer(Some(target), delay, "", &[], move |_, ev| {
            let target = ev.self_obj();
            let sender = sender.as_ref().and_then(Weak::upgrade);
            if let Err(err) = target.post_event(sender.as_ref(), &name, &format, &values) {
                warn!(event = %name, error = %err, "scheduled event failed");
            }
            0
        })
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    fn run_sinks(&self, kind: SinkKind) -> usize {
        let snapshot = self.shared.sinks.lock().of_kind(kind);
        let mut ran = 0;
        for (id, func) in snapshot {
            if !self.shared.sinks.lock().contains(id) {
                continue;
            }
            let ctl = (*func.lock())(self);
            ran += 1;
            if ctl == SinkControl::Remove {
                self.del_sink(id);
            }
        }
        ran
    }

    fn has_sinks(&self, kind: SinkKind) -> bool {
        self.shared.sinks.lock().has(kind)
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("state", &self.state())
            .field("backend", &self.shared.backend)
            .field("sinks", &*self.shared.sinks.lock())
            .field("timers", &self.shared.timers)
            .finish()
    }
}

/// Counters from one [`EventLoop::run_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationStats {
    pub timers: usize,
    pub ready: usize,
    pub detached: usize,
}

/// An event loop bound to one wait backend.
pub struct EventLoop {
    handle: LoopHandle,
    backend: Box<dyn WaitBackend>,
    config: EventLoopConfig,
    iterations: u64,
}

impl EventLoop {
    pub fn new(config: EventLoopConfig) -> Result<Self> {
        let backend = backend::select(config.backend)?;
        let shared = Shared {
            state: Mutex::new(LoopState::Idle),
            exit_code: AtomicI32::new(0),
            sinks: Mutex::new(SinkTable::default()),
            timers: Timers::default(),
            waker: backend.waker(),
            backend: backend.name(),
            supports_fds: backend.supports_fds(),
        };
        Ok(Self {
            handle: LoopHandle {
                shared: Arc::new(shared),
            },
            backend,
            config,
            iterations: 0,
        })
    }

    /// A loop configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(EventLoopConfig::from_env())
    }

    #[must_use]
    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    #[must_use]
    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    fn wait_timeout(&self) -> Duration {
        let h = &self.handle;
        if h.break_requested() {
            return Duration::ZERO;
        }
        let mut timeout = self.config.max_wait;
        if let Some(at) = h.shared.timers.next_deadline() {
            timeout = timeout.min(at.saturating_duration_since(Instant::now()));
        }
        if h.has_sinks(SinkKind::Spinner) {
            timeout = match self.config.spinner_policy {
                SpinnerPolicy::Busy => Duration::ZERO,
                SpinnerPolicy::Throttle(t) => timeout.min(t),
            };
        }
        timeout
    }

    /// Block, then fire due timers and ready descriptor sinks. Returns
    /// `(timers fired, descriptor sinks run)`.
    #[cfg(unix)]
    fn wait_and_dispatch(&mut self, timeout: Duration) -> Result<(usize, usize)> {
        let fd_sinks = self.handle.shared.sinks.lock().fd_sinks();
        let ready = {
            let watch: Vec<Watch<'_>> = fd_sinks
                .iter()
                .map(|s| Watch {
                    fd: s.fd.as_fd(),
                    write: s.write,
                })
                .collect();
            self.backend.wait(timeout, &watch)?
        };
        let timers = self
            .handle
            .shared
            .timers
            .fire_due(Instant::now(), &self.handle);
        let mut dispatched = 0;
        for i in ready {
            let Some(sink) = fd_sinks.get(i) else {
                continue;
            };
            if !self.handle.shared.sinks.lock().contains(sink.id) {
                continue;
            }
            let ctl = (*sink.func.lock())(&self.handle);
            dispatched += 1;
            if ctl == SinkControl::Remove {
                self.handle.del_sink(sink.id);
            }
        }
        Ok((timers, dispatched))
    }

    #[cfg(not(unix))]
    fn wait_and_dispatch(&mut self, timeout: Duration) -> Result<(usize, usize)> {
        self.backend.wait(timeout, &[])?;
        let timers = self
            .handle
            .shared
            .timers
            .fire_due(Instant::now(), &self.handle);
        Ok((timers, 0))
    }

    /// Run one iteration.
    pub fn run_once(&mut self) -> Result<IterationStats> {
        let h = self.handle.clone();
        let mut stats = IterationStats::default();

        h.run_sinks(SinkKind::Prologue);

        let timeout = self.wait_timeout();
        (stats.timers, stats.ready) = self.wait_and_dispatch(timeout)?;

        h.run_sinks(SinkKind::Epilogue);
        if self.config.process_detach_queue {
            let out = DetachQueue::global().process_queued();
            stats.detached = out.detached;
            if out.terminate {
                h.terminate(0);
            }
        }

        h.run_sinks(SinkKind::Spinner);
        self.iterations += 1;
        trace!(iteration = self.iterations, ?stats, "iteration complete");
        Ok(stats)
    }

    /// Run until [`LoopHandle::terminate`] is called. Returns the exit
    /// code.
    pub fn run(&mut self) -> Result<i32> {
        {
            let mut st = self.handle.shared.state.lock();
            if *st != LoopState::BreakRequested {
                *st = LoopState::Running;
            }
        }
        info!(backend = self.handle.backend(), "event loop started");

        while !self.handle.break_requested() {
            if let Err(err) = self.run_once() {
                warn!(error = %err, "event loop failed");
                *self.handle.shared.state.lock() = LoopState::Idle;
                return Err(err);
            }
        }

        self.handle.run_sinks(SinkKind::Terminator);
        *self.handle.shared.state.lock() = LoopState::Terminated;
        let code = self.handle.exit_code();
        info!(code, iterations = self.iterations, "event loop terminated");
        Ok(code)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;

    fn timed_loop() -> EventLoop {
        EventLoop::new(
            EventLoopConfig::default()
                .with_backend(Backend::TimedWait)
                .with_max_wait(Duration::from_millis(10))
                .with_detach_queue(false),
        )
        .unwrap()
    }

    #[test]
    fn phases_run_in_order() {
        let mut ev = timed_loop();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (kind, tag) in [
            (SinkKind::Spinner, "spin"),
            (SinkKind::Epilogue, "epi"),
            (SinkKind::Prologue, "pro"),
        ] {
            let l = Arc::clone(&log);
            let f = move |_: &LoopHandle| {
                l.lock().push(tag);
                SinkControl::Keep
            };
            match kind {
                SinkKind::Spinner => ev.handle().add_spinner(f),
                SinkKind::Epilogue => ev.handle().add_epilogue(f),
                _ => ev.handle().add_prologue(f),
            };
        }
        ev.run_once().unwrap();
        assert_eq!(*log.lock(), ["pro", "epi", "spin"]);
    }

    #[test]
    fn terminate_before_run_returns_immediately() {
        let mut ev = timed_loop();
        let ran = Arc::new(Mutex::new(0));
        let r = Arc::clone(&ran);
        ev.handle().add_terminator(move |_| {
            *r.lock() += 1;
            SinkControl::Keep
        });
        ev.handle().terminate(3);
        assert_eq!(ev.run().unwrap(), 3);
        assert_eq!(ev.iterations(), 0);
        assert_eq!(*ran.lock(), 1);
        assert_eq!(ev.handle().state(), LoopState::Terminated);
    }

    #[test]
    fn sink_removed_mid_pass_does_not_run() {
        let mut ev = timed_loop();
        let hits = Arc::new(Mutex::new(0));
        let victim = Arc::new(Mutex::new(None::<SinkId>));
        let v = Arc::clone(&victim);
        ev.handle().add_prologue(move |h| {
            if let Some(id) = *v.lock() {
                h.del_sink(id);
            }
            SinkControl::Keep
        });
        let hc = Arc::clone(&hits);
        let id = ev.handle().add_prologue(move |_| {
            *hc.lock() += 1;
            SinkControl::Keep
        });
        *victim.lock() = Some(id);
        ev.run_once().unwrap();
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn remove_control_unregisters() {
        let mut ev = timed_loop();
        ev.handle().add_spinner(|_| SinkControl::Remove);
        assert_eq!(ev.handle().sink_count(), 1);
        ev.run_once().unwrap();
        assert_eq!(ev.handle().sink_count(), 0);
    }

    #[test]
    fn unsupported_sinks_are_rejected() {
        let ev = timed_loop();
        let err = ev
            .handle()
            .add_process_exit(1, |_| SinkControl::Keep)
            .unwrap_err();
        assert!(matches!(
            err,
            LoopError::Unsupported {
                kind: SinkKind::ProcessExit,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn timed_wait_rejects_descriptors() {
        let ev = timed_loop();
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        let err = ev
            .handle()
            .add_read(Arc::new(a), |_| SinkControl::Keep)
            .unwrap_err();
        assert!(matches!(err, LoopError::Unsupported { kind: SinkKind::Read, .. }));
    }
}
