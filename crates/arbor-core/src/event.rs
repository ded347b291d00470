//! Event handlers and dispatch.
//!
//! # Design
//!
//! A handler ([`EventHandler`]) is registered on an object under a name,
//! with a template argument list built from a format string. Posting an
//! event builds a fresh [`Event`] per handler:
//!
//! ```text
//! argv: [ self | template args .. | call-time args .. | sender ]
//!         0      1 ..               argc0 ..             argc
//! ```
//!
//! The receiver sits in slot 0 and the sender in the slot just past the
//! last argument. Accessors index user arguments from 1, as `int(1)`.
//!
//! # Invariants
//!
//! 1. Handlers of one name on one object run in registration order.
//! 2. No object lock is held while a handler runs: the handler list is
//!    snapshotted first, so handlers may freely re-enter the object.
//! 3. A propagated event reaches the target first, then every descendant
//!    in pre-order, exactly once each, with the same user arguments.
//! 4. An event never holds more than [`EVENT_ARGS_MAX`] slots.
//!
//! # Failure Modes
//!
//! Malformed formats and argument lists that do not match their format are
//! returned as [`EventError`] at registration or post time. Reading an
//! argument with the wrong accessor is a programmer error and is fatal;
//! use the `try_*` accessors to probe.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use bitflags::bitflags;

use crate::args::{Arg, ArgList, EVENT_ARGS_MAX, build_args};
use crate::error::{EventError, fatal};
use tracing::{trace, warn};
use crate::object::{Object, ObjectRef};
use crate::value::{Pointer, Value, VarType, VarValue};

/// Longest accepted event name is `EVENT_NAME_MAX - 1` bytes.
pub const EVENT_NAME_MAX: usize = 24;

bitflags! {
    /// Dispatch options of a handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventFlags: u32 {
        /// Run on a separate thread instead of the poster's.
        const ASYNC     = 1 << 0;
        /// Forward to every descendant after the target has run.
        const PROPAGATE = 1 << 1;
    }
}

type HandlerFn = dyn Fn(&Event) + Send + Sync;

/// A registered handler.
pub struct EventHandler {
    name: Option<Arc<str>>,
    func: Arc<HandlerFn>,
    template: ArgList,
    flags: AtomicU32,
}

impl EventHandler {
    fn new(
        name: Option<&str>,
        func: impl Fn(&Event) + Send + Sync + 'static,
        format: &str,
        values: &[Value],
    ) -> Result<Self, EventError> {
        if let Some(name) = name.filter(|n| n.len() >= EVENT_NAME_MAX) {
            return Err(EventError::NameTooLong {
                name: name.to_owned(),
                max: EVENT_NAME_MAX - 1,
            });
        }
        Ok(Self {
            name: name.map(Arc::from),
            func: Arc::new(func),
            template: build_args(format, values)?,
            flags: AtomicU32::new(0),
        })
    }

    /// `None` for anonymous handlers registered with [`Object::set_fn`].
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn flags(&self) -> EventFlags {
        EventFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: EventFlags) -> &Self {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        self
    }

    pub fn clear_flags(&self, flags: EventFlags) -> &Self {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        self
    }

    #[must_use]
    pub fn template(&self) -> &[Arg] {
        &self.template
    }

    fn prepare(
        &self,
        receiver: &ObjectRef,
        sender: Option<&ObjectRef>,
        extra: &[Arg],
    ) -> Result<Event, EventError> {
        let mut ev = Event::new(self.name.as_deref());
        ev.set_receiver(receiver);
        ev.set_sender(sender);
        for arg in self.template.iter().chain(extra) {
            ev.push(arg.clone())?;
        }
        ev.argc0 = 1 + self.template.len();
        Ok(ev)
    }

    fn invoke(&self, ev: Event) -> Result<(), EventError> {
        if self.flags().contains(EventFlags::ASYNC) {
            let func = Arc::clone(&self.func);
            thread::Builder::new()
                .name("arbor-event".into())
                .spawn(move || func(&ev))
                .map_err(EventError::Spawn)?;
        } else {
            (self.func)(&ev);
        }
        Ok(())
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("name", &self.name)
            .field("flags", &self.flags())
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

// ── Event ────────────────────────────────────────────────────────────

/// The argument vector a handler is invoked with.
#[derive(Debug, Clone)]
pub struct Event {
    name: Option<Arc<str>>,
    argv: ArgList,
    argc: usize,
    argc0: usize,
}

impl Event {
    /// An empty event with null receiver and sender.
    #[must_use]
    pub fn new(name: Option<&str>) -> Self {
        let mut argv = ArgList::new();
        argv.push(Arg::new(Pointer::Null));
        argv.push(Arg::new(Pointer::Null));
        Self {
            name: name.map(Arc::from),
            argv,
            argc: 1,
            argc0: 1,
        }
    }

    /// A standalone event for `receiver`, outside any handler record. Used
    /// by timers and scheduled posts.
    pub fn build(
        name: Option<&str>,
        receiver: Option<&ObjectRef>,
        format: &str,
        values: &[Value],
    ) -> Result<Self, EventError> {
        let mut ev = Event::new(name);
        if let Some(r) = receiver {
            ev.set_receiver(r);
        }
        for arg in build_args(format, values)? {
            ev.push(arg)?;
        }
        Ok(ev)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Slot count, including the receiver in slot 0.
    #[must_use]
    pub fn argc(&self) -> usize {
        self.argc
    }

    /// Index of the first call-time argument.
    #[must_use]
    pub fn argc0(&self) -> usize {
        self.argc0
    }

    /// User arguments (template then call-time), without receiver and
    /// sender.
    #[must_use]
    pub fn args(&self) -> &[Arg] {
        &self.argv[1..self.argc]
    }

    fn set_receiver(&mut self, receiver: &ObjectRef) {
        self.argv[0].value = Value::Pointer(Pointer::object(receiver));
    }

    fn set_sender(&mut self, sender: Option<&ObjectRef>) {
        let p = sender.map_or(Pointer::Null, Pointer::object);
        self.argv[self.argc].value = Value::Pointer(p);
    }

    /// Append an argument before the sender slot.
    pub fn push(&mut self, arg: Arg) -> Result<(), EventError> {
        if self.argc >= EVENT_ARGS_MAX - 1 {
            return Err(EventError::TooManyArgs {
                max: EVENT_ARGS_MAX - 2,
            });
        }
        self.argv.insert(self.argc, arg);
        self.argc += 1;
        Ok(())
    }

    /// Remove the last call-time argument. Template arguments cannot be
    /// popped.
    pub fn pop(&mut self) -> Result<Arg, EventError> {
        if self.argc <= self.argc0 {
            return Err(EventError::StackUnderflow);
        }
        self.argc -= 1;
        Ok(self.argv.remove(self.argc))
    }

    pub fn try_self_obj(&self) -> Result<ObjectRef, EventError> {
        self.argv[0]
            .value
            .as_pointer()
            .and_then(Pointer::upgrade)
            .ok_or(EventError::NotAnObject(0))
    }

    /// The receiver. Fatal if it has been dropped.
    #[track_caller]
    #[must_use]
    pub fn self_obj(&self) -> ObjectRef {
        match self.try_self_obj() {
            Ok(o) => o,
            Err(e) => fatal(format_args!("{e}")),
        }
    }

    /// The sender, when the event was posted by another object.
    #[must_use]
    pub fn sender(&self) -> Option<ObjectRef> {
        self.argv[self.argc].value.as_pointer().and_then(Pointer::upgrade)
    }

    pub fn try_arg(&self, index: usize) -> Result<&Arg, EventError> {
        if index >= self.argc {
            return Err(EventError::IndexOutOfRange {
                index,
                argc: self.argc,
            });
        }
        Ok(&self.argv[index])
    }

    /// Position of a named argument.
    pub fn index_of(&self, name: &str) -> Result<usize, EventError> {
        self.argv[1..self.argc]
            .iter()
            .position(|a| a.name.as_deref() == Some(name))
            .map(|i| i + 1)
            .ok_or_else(|| EventError::NoSuchArg(name.to_owned()))
    }

    fn try_typed<T: VarValue>(&self, index: usize) -> Result<T, EventError> {
        let arg = self.try_arg(index)?;
        T::from_value(&arg.value).ok_or(EventError::ArgType {
            index,
            expected: T::TYPE,
            actual: arg.value.ty(),
        })
    }

    pub fn try_string(&self, index: usize) -> Result<&str, EventError> {
        let arg = self.try_arg(index)?;
        arg.value.as_str().ok_or(EventError::ArgType {
            index,
            expected: VarType::String,
            actual: arg.value.ty(),
        })
    }

    #[track_caller]
    #[must_use]
    pub fn string(&self, index: usize) -> &str {
        match self.try_string(index) {
            Ok(v) => v,
            Err(e) => fatal(format_args!("{e}")),
        }
    }

    pub fn try_named_string(&self, name: &str) -> Result<&str, EventError> {
        self.try_string(self.index_of(name)?)
    }

    #[track_caller]
    #[must_use]
    pub fn named_string(&self, name: &str) -> &str {
        match self.try_named_string(name) {
            Ok(v) => v,
            Err(e) => fatal(format_args!("{e}")),
        }
    }

    pub fn try_ptr(&self, index: usize) -> Result<&Pointer, EventError> {
        let arg = self.try_arg(index)?;
        arg.value.as_pointer().ok_or(EventError::ArgType {
            index,
            expected: VarType::Pointer,
            actual: arg.value.ty(),
        })
    }

    #[track_caller]
    #[must_use]
    pub fn ptr(&self, index: usize) -> &Pointer {
        match self.try_ptr(index) {
            Ok(v) => v,
            Err(e) => fatal(format_args!("{e}")),
        }
    }

    pub fn try_object(&self, index: usize) -> Result<ObjectRef, EventError> {
        self.try_ptr(index)?
            .upgrade()
            .ok_or(EventError::NotAnObject(index))
    }

    #[track_caller]
    #[must_use]
    pub fn object(&self, index: usize) -> ObjectRef {
        match self.try_object(index) {
            Ok(v) => v,
            Err(e) => fatal(format_args!("{e}")),
        }
    }

    /// An object argument that must be an instance of `pattern`.
    pub fn try_object_of(&self, index: usize, pattern: &str) -> Result<ObjectRef, EventError> {
        let obj = self.try_object(index)?;
        if !obj.of_class(pattern) {
            return Err(EventError::WrongClass {
                index,
                pattern: pattern.to_owned(),
            });
        }
        Ok(obj)
    }

    #[track_caller]
    #[must_use]
    pub fn object_of(&self, index: usize, pattern: &str) -> ObjectRef {
        match self.try_object_of(index, pattern) {
            Ok(v) => v,
            Err(e) => fatal(format_args!("{e}")),
        }
    }

    pub fn try_named_object(&self, name: &str) -> Result<ObjectRef, EventError> {
        self.try_object(self.index_of(name)?)
    }

    #[track_caller]
    #[must_use]
    pub fn named_object(&self, name: &str) -> ObjectRef {
        match self.try_named_object(name) {
            Ok(v) => v,
            Err(e) => fatal(format_args!("{e}")),
        }
    }
}

macro_rules! scalar_accessors {
    ($($get:ident, $try_get:ident, $named:ident, $try_named:ident, $ty:ty;)*) => {
        impl Event {
            $(
                pub fn $try_get(&self, index: usize) -> Result<$ty, EventError> {
                    self.try_typed(index)
                }

                #[track_caller]
                #[must_use]
                pub fn $get(&self, index: usize) -> $ty {
                    match self.$try_get(index) {
                        Ok(v) => v,
                        Err(e) => fatal(format_args!("{e}")),
                    }
                }

                pub fn $try_named(&self, name: &str) -> Result<$ty, EventError> {
                    self.try_typed(self.index_of(name)?)
                }

                #[track_caller]
                #[must_use]
                pub fn $named(&self, name: &str) -> $ty {
                    match self.$try_named(name) {
                        Ok(v) => v,
                        Err(e) => fatal(format_args!("{e}")),
                    }
                }
            )*
        }
    };
}

scalar_accessors! {
    int, try_int, named_int, try_named_int, i32;
    uint, try_uint, named_uint, try_named_uint, u32;
    long, try_long, named_long, try_named_long, i64;
    ulong, try_ulong, named_ulong, try_named_ulong, u64;
    float, try_float, named_float, try_named_float, f32;
    double, try_double, named_double, try_named_double, f64;
}

// ── Registration and dispatch ────────────────────────────────────────

impl Object {
    /// Register `func` under `name`, replacing any handler of that name.
    pub fn set_event(
        &self,
        name: &str,
        func: impl Fn(&Event) + Send + Sync + 'static,
        format: &str,
        values: &[Value],
    ) -> Result<Arc<EventHandler>, EventError> {
        let handler = Arc::new(EventHandler::new(Some(name), func, format, values)?);
        self.with_state(|s| {
            let first = s.events.iter().position(|h| h.name() == Some(name));
            match first {
                Some(i) => {
                    s.events[i] = Arc::clone(&handler);
                    let mut j = 0;
                    s.events.retain(|h| {
                        let keep = j <= i || h.name() != Some(name);
                        j += 1;
                        keep
                    });
                }
                None => s.events.push(Arc::clone(&handler)),
            }
        });
        Ok(handler)
    }

    /// Append `func` under `name`; handlers of one name run in the order
    /// they were added.
    pub fn add_event(
        &self,
        name: &str,
        func: impl Fn(&Event) + Send + Sync + 'static,
        format: &str,
        values: &[Value],
    ) -> Result<Arc<EventHandler>, EventError> {
        let handler = Arc::new(EventHandler::new(Some(name), func, format, values)?);
        self.with_state(|s| s.events.push(Arc::clone(&handler)));
        Ok(handler)
    }

    /// Register an anonymous handler, reachable only through the returned
    /// record (see [`post_event_by_ptr`](Self::post_event_by_ptr)).
    pub fn set_fn(
        &self,
        func: impl Fn(&Event) + Send + Sync + 'static,
        format: &str,
        values: &[Value],
    ) -> Result<Arc<EventHandler>, EventError> {
        let handler = Arc::new(EventHandler::new(None, func, format, values)?);
        self.with_state(|s| s.events.push(Arc::clone(&handler)));
        Ok(handler)
    }

    /// Remove every handler named `name`; returns how many were removed.
    pub fn unset_event(&self, name: &str) -> usize {
        self.with_state(|s| {
            let before = s.events.len();
            s.events.retain(|h| h.name() != Some(name));
            before - s.events.len()
        })
    }

    /// Remove one handler record.
    pub fn remove_event_handler(&self, handler: &Arc<EventHandler>) -> bool {
        self.with_state(|s| {
            let before = s.events.len();
            s.events.retain(|h| !Arc::ptr_eq(h, handler));
            before != s.events.len()
        })
    }

    /// The first handler registered under `name`.
    #[must_use]
    pub fn find_event_handler(&self, name: &str) -> Option<Arc<EventHandler>> {
        self.with_state(|s| s.events.iter().find(|h| h.name() == Some(name)).cloned())
    }

    #[must_use]
    pub fn event_handlers(&self) -> Vec<Arc<EventHandler>> {
        self.with_state(|s| s.events.clone())
    }

    fn handlers_named(&self, name: &str) -> Vec<Arc<EventHandler>> {
        self.with_state(|s| {
            s.events
                .iter()
                .filter(|h| h.name() == Some(name))
                .cloned()
                .collect()
        })
    }

    /// Invoke every handler named `name` on this object, appending the
    /// call-time arguments described by `format` after each handler's
    /// template. Returns the number of handler invocations, including
    /// propagated ones; posting a name with no handler is not an error.
    pub fn post_event(
        self: &Arc<Self>,
        sender: Option<&ObjectRef>,
        name: &str,
        format: &str,
        values: &[Value],
    ) -> Result<usize, EventError> {
        let extra = build_args(format, values)?;
        let handlers = self.handlers_named(name);
        let mut fired = 0;
        let mut propagated = None;
        for h in &handlers {
            let ev = h.prepare(self, sender, &extra)?;
            if propagated.is_none() && h.flags().contains(EventFlags::PROPAGATE) {
                propagated = Some(ev.clone());
            }
            h.invoke(ev)?;
            fired += 1;
        }
        if let Some(ev) = propagated {
            for d in self.descendants() {
                let parent = d.parent();
                fired += d.forward_event(parent.as_ref(), &ev)?;
            }
        }
        trace!(event = name, receiver = %self.name(), fired, "posted");
        Ok(fired)
    }

    /// Invoke one specific handler record on this object.
    pub fn post_event_by_ptr(
        self: &Arc<Self>,
        handler: &Arc<EventHandler>,
        sender: Option<&ObjectRef>,
        format: &str,
        values: &[Value],
    ) -> Result<(), EventError> {
        let extra = build_args(format, values)?;
        let ev = handler.prepare(self, sender, &extra)?;
        handler.invoke(ev)
    }

    /// Re-dispatch an already built event to this object's handlers of the
    /// same name. The receiver slot is replaced with `self` and the sender
    /// with `sender`; this object's own templates are not applied.
    pub fn forward_event(
        self: &Arc<Self>,
        sender: Option<&ObjectRef>,
        ev: &Event,
    ) -> Result<usize, EventError> {
        let Some(name) = ev.name() else {
            return Ok(0);
        };
        let handlers = self.handlers_named(name);
        for h in &handlers {
            let mut fwd = ev.clone();
            fwd.set_receiver(self);
            fwd.set_sender(sender);
            h.invoke(fwd)?;
        }
        Ok(handlers.len())
    }

    /// Post a lifecycle notification; failures are logged, not returned.
    pub(crate) fn notify(
        self: &Arc<Self>,
        sender: Option<&ObjectRef>,
        name: &str,
        format: &str,
        values: &[Value],
    ) {
        if let Err(err) = self.post_event(sender, name, format, values) {
            warn!(event = name, error = %err, "notification failed");
        }
    }
}
