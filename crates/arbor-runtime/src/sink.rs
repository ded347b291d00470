//! Sinks: callbacks the loop runs at fixed phases or on readiness.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event_loop::LoopHandle;

#[cfg(unix)]
use std::os::fd::{AsFd, AsRawFd};

/// Handle to a registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub(crate) u64);

impl SinkId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

/// When a sink runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// Every iteration, before blocking.
    Prologue,
    /// Every iteration, after dispatch.
    Epilogue,
    /// Every iteration, last; keeps the loop from blocking.
    Spinner,
    /// Once, when termination is observed.
    Terminator,
    /// On expiry. Timers are registered through the timer API.
    Timer,
    /// When a descriptor becomes readable.
    Read,
    /// When a descriptor becomes writable.
    Write,
    /// When a watched file changes.
    FileChange,
    /// When a child process exits.
    ProcessExit,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prologue => "prologue",
            Self::Epilogue => "epilogue",
            Self::Spinner => "spinner",
            Self::Terminator => "terminator",
            Self::Timer => "timer",
            Self::Read => "read",
            Self::Write => "write",
            Self::FileChange => "file-change",
            Self::ProcessExit => "process-exit",
        })
    }
}

/// What a sink wants after it ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkControl {
    #[default]
    Keep,
    Remove,
}

pub(crate) type SinkFn = dyn FnMut(&LoopHandle) -> SinkControl + Send;
pub(crate) type SharedSinkFn = Arc<Mutex<Box<SinkFn>>>;

/// A descriptor watched by a read or write sink.
#[cfg(unix)]
pub type SinkFd = Arc<dyn AsFd + Send + Sync>;

struct Sink {
    id: SinkId,
    kind: SinkKind,
    ident: u64,
    func: SharedSinkFn,
    #[cfg(unix)]
    fd: Option<SinkFd>,
}

/// A descriptor sink snapshot taken before blocking.
#[cfg(unix)]
pub(crate) struct FdSink {
    pub id: SinkId,
    pub write: bool,
    pub fd: SinkFd,
    pub func: SharedSinkFn,
}

#[derive(Default)]
pub(crate) struct SinkTable {
    next: u64,
    sinks: Vec<Sink>,
}

impl SinkTable {
    fn push(&mut self, kind: SinkKind, ident: u64, func: Box<SinkFn>) -> &mut Sink {
        self.next += 1;
        self.sinks.push(Sink {
            id: SinkId(self.next),
            kind,
            ident,
            func: Arc::new(Mutex::new(func)),
            #[cfg(unix)]
            fd: None,
        });
        let last = self.sinks.len() - 1;
        &mut self.sinks[last]
    }

    pub fn add(&mut self, kind: SinkKind, ident: u64, func: Box<SinkFn>) -> SinkId {
        self.push(kind, ident, func).id
    }

    #[cfg(unix)]
    pub fn add_fd(&mut self, kind: SinkKind, fd: SinkFd, func: Box<SinkFn>) -> SinkId {
        let ident = fd.as_fd().as_raw_fd() as u64;
        let sink = self.push(kind, ident, func);
        sink.fd = Some(fd);
        sink.id
    }

    pub fn remove(&mut self, id: SinkId) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|s| s.id != id);
        before != self.sinks.len()
    }

    pub fn remove_by_ident(&mut self, kind: SinkKind, ident: u64) -> usize {
        let before = self.sinks.len();
        self.sinks.retain(|s| !(s.kind == kind && s.ident == ident));
        before - self.sinks.len()
    }

    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.iter().any(|s| s.id == id)
    }

    pub fn has(&self, kind: SinkKind) -> bool {
        self.sinks.iter().any(|s| s.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Sinks of `kind` in registration order.
    pub fn of_kind(&self, kind: SinkKind) -> Vec<(SinkId, SharedSinkFn)> {
        self.sinks
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.id, Arc::clone(&s.func)))
            .collect()
    }

    #[cfg(unix)]
    pub fn fd_sinks(&self) -> Vec<FdSink> {
        self.sinks
            .iter()
            .filter_map(|s| {
                s.fd.as_ref().map(|fd| FdSink {
                    id: s.id,
                    write: s.kind == SinkKind::Write,
                    fd: Arc::clone(fd),
                    func: Arc::clone(&s.func),
                })
            })
            .collect()
    }
}

impl fmt::Debug for SinkTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sinks.iter().map(|s| (s.id, s.kind, s.ident)))
            .finish()
    }
}
