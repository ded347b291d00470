//! The object tree.
//!
//! # Design
//!
//! Objects are reference counted ([`ObjectRef`] = `Arc<Object>`). A parent
//! owns its children through strong references; a child refers back to its
//! parent through a `Weak`, so a child never keeps its parent alive.
//!
//! Each object carries a recursive mutex around its mutable state. Internal
//! accessors take the lock, copy what they need out, and release it before
//! calling anything that may re-enter: user code (event handlers, class
//! slots) never runs with an object's state borrowed.
//!
//! # Invariants
//!
//! 1. The child lists form a forest: an object has at most one parent and
//!    is never its own ancestor.
//! 2. `attach`/`detach` are the only mutators of parent/child links, and
//!    run under the tree-wide lock.
//! 3. When two objects are locked together they are locked in [`ObjectId`]
//!    order.
//! 4. `KEEP_BELOW` children are inserted at the head of the child list,
//!    all others are appended.
//!
//! # Failure Modes
//!
//! Attaching an object that already has a parent, or under one of its own
//! descendants, fails without changing either tree. Destroying an
//! `INDESTRUCTIBLE` object fails and leaves it untouched.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::class::Class;
use crate::detach::DetachQueue;
use crate::error::{ObjectError, VariableError};
use crate::event::EventHandler;
use tracing::{debug, trace, warn};
use crate::value::{Pointer, Value, VarType, VarValue};
use crate::variable::{self, FlagWord, Slot, VarGuard, Variable};

/// Shared handle to an object.
pub type ObjectRef = Arc<Object>;

/// Longest accepted object name is `OBJECT_NAME_MAX - 1` bytes.
pub const OBJECT_NAME_MAX: usize = 64;

/// Dependency count that marks a dependency as wired (never released).
pub const OBJECT_DEP_MAX: u32 = u32::MAX;

/// Serializes structural changes to every tree.
static TREE_LOCK: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique object identity; also the lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

bitflags! {
    /// Per-object flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        /// Log lifecycle and dispatch for this object.
        const DEBUG          = 1 << 0;
        /// Editors must not modify the object.
        const READONLY       = 1 << 1;
        /// `destroy` refuses to run.
        const INDESTRUCTIBLE = 1 << 2;
        /// Skipped when the tree is saved.
        const NON_PERSISTENT = 1 << 3;
        /// Keep dependencies across detach.
        const PRESERVE_DEPS  = 1 << 4;
        /// Generate a unique `<class>#<n>` name on attach.
        const NAME_ON_ATTACH = 1 << 5;
        /// Insert at the head of the parent's child list.
        const KEEP_BELOW     = 1 << 6;
        /// `detach` queues the object instead of detaching it.
        const DEFER_DETACH   = 1 << 7;
        /// Queued for detach.
        const DETACHING      = 1 << 8;
        /// Closing the last such object ends the event loop.
        const MAIN           = 1 << 9;
        const VISIBLE        = 1 << 10;
    }
}

impl ObjectFlags {
    /// Flags that are written when a tree is saved.
    pub const SAVED: Self = Self::DEBUG
        .union(Self::READONLY)
        .union(Self::INDESTRUCTIBLE)
        .union(Self::PRESERVE_DEPS)
        .union(Self::NAME_ON_ATTACH)
        .union(Self::KEEP_BELOW)
        .union(Self::DEFER_DETACH)
        .union(Self::MAIN);
}

/// A counted reference to an object whose state this one depends on.
#[derive(Debug, Clone)]
pub struct Dependency {
    object: Weak<Object>,
    count: u32,
}

impl Dependency {
    #[must_use]
    pub fn object(&self) -> Option<ObjectRef> {
        self.object.upgrade()
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_wired(&self) -> bool {
        self.count == OBJECT_DEP_MAX
    }

    fn refers_to(&self, obj: &ObjectRef) -> bool {
        std::ptr::eq(self.object.as_ptr(), Arc::as_ptr(obj))
    }
}

pub(crate) struct ObjectState {
    pub(crate) name: String,
    pub(crate) flags: ObjectFlags,
    pub(crate) parent: Weak<Object>,
    pub(crate) children: Vec<ObjectRef>,
    pub(crate) vars: Vec<Arc<Variable>>,
    pub(crate) events: Vec<Arc<EventHandler>>,
    pub(crate) deps: Vec<Dependency>,
    pub(crate) destroyed: bool,
}

type StateGuard<'a> = ReentrantMutexGuard<'a, RefCell<ObjectState>>;

/// Holds an object's recursive lock. The same thread may keep calling
/// methods on the object while holding it.
pub struct ObjectLock<'a> {
    _guard: StateGuard<'a>,
}

/// A node in the object tree.
pub struct Object {
    id: ObjectId,
    class: Arc<Class>,
    state: ReentrantMutex<RefCell<ObjectState>>,
    data: Mutex<Option<Box<dyn Any + Send>>>,
}

fn check_name(name: &str) -> Result<(), ObjectError> {
    if name.len() >= OBJECT_NAME_MAX {
        return Err(ObjectError::NameTooLong {
            name: name.to_owned(),
            max: OBJECT_NAME_MAX - 1,
        });
    }
    Ok(())
}

/// Lock two distinct objects in id order; guards come back as `(a, b)`.
fn lock_pair<'a>(a: &'a Object, b: &'a Object) -> (StateGuard<'a>, StateGuard<'a>) {
    if a.id <= b.id {
        let ga = a.state.lock();
        let gb = b.state.lock();
        (ga, gb)
    } else {
        let gb = b.state.lock();
        let ga = a.state.lock();
        (ga, gb)
    }
}

fn unique_name(class: &str, taken: &[String]) -> String {
    (0u64..)
        .map(|n| format!("{class}#{n}"))
        .find(|candidate| !taken.iter().any(|t| t == candidate))
        .unwrap_or_else(|| class.to_owned())
}

impl Object {
    /// Create an instance of `class` and run its `init` slots, root first.
    pub fn new(class: &Arc<Class>, name: &str) -> Result<ObjectRef, ObjectError> {
        check_name(name)?;
        let data = class.find_op(|ops| ops.new_data).map(|f| f());
        let obj = Arc::new(Self {
            id: ObjectId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            class: Arc::clone(class),
            state: ReentrantMutex::new(RefCell::new(ObjectState {
                name: name.to_owned(),
                flags: ObjectFlags::empty(),
                parent: Weak::new(),
                children: Vec::new(),
                vars: Vec::new(),
                events: Vec::new(),
                deps: Vec::new(),
                destroyed: false,
            })),
            data: Mutex::new(data),
        });
        for c in class.lineage() {
            if let Some(init) = c.ops().init {
                init(&obj);
            }
        }
        trace!(object = name, class = class.name(), "object created");
        Ok(obj)
    }

    /// An instance of the base class.
    pub fn plain(name: &str) -> Result<ObjectRef, ObjectError> {
        Self::new(&Class::base(), name)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ObjectState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Take the object's recursive lock to bracket a multi-step update.
    #[must_use]
    pub fn lock(&self) -> ObjectLock<'_> {
        ObjectLock {
            _guard: self.state.lock(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.with_state(|s| s.name.clone())
    }

    /// Rename the object and post `renamed` with the old name as `old`.
    pub fn rename(self: &Arc<Self>, name: &str) -> Result<(), ObjectError> {
        check_name(name)?;
        let old = self.with_state(|s| std::mem::replace(&mut s.name, name.to_owned()));
        self.notify(None, "renamed", "%s(old)", &[Value::String(old)]);
        Ok(())
    }

    #[must_use]
    pub fn flags(&self) -> ObjectFlags {
        self.with_state(|s| s.flags)
    }

    pub fn set_flags(&self, flags: ObjectFlags) {
        self.with_state(|s| s.flags.insert(flags));
    }

    pub fn clear_flags(&self, flags: ObjectFlags) {
        self.with_state(|s| s.flags.remove(flags));
    }

    #[must_use]
    pub fn has_flags(&self, flags: ObjectFlags) -> bool {
        self.with_state(|s| s.flags.contains(flags))
    }

    /// Class "is-a" test against a colon-path pattern.
    #[must_use]
    pub fn of_class(&self, pattern: &str) -> bool {
        self.class.matches(pattern)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.with_state(|s| s.destroyed)
    }

    // ── Tree queries ─────────────────────────────────────────────────

    #[must_use]
    pub fn parent(&self) -> Option<ObjectRef> {
        self.with_state(|s| s.parent.upgrade())
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.parent().is_some()
    }

    /// Snapshot of the child list, in order.
    #[must_use]
    pub fn children(&self) -> Vec<ObjectRef> {
        self.with_state(|s| s.children.clone())
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.with_state(|s| s.children.len())
    }

    /// Every descendant in pre-order.
    #[must_use]
    pub fn descendants(&self) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        let mut stack: Vec<ObjectRef> = self.children().into_iter().rev().collect();
        while let Some(obj) = stack.pop() {
            stack.extend(obj.children().into_iter().rev());
            out.push(obj);
        }
        out
    }

    #[must_use]
    pub fn descendant_count(&self) -> usize {
        self.children()
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    #[must_use]
    pub fn find_child(&self, name: &str) -> Option<ObjectRef> {
        self.children().into_iter().find(|c| c.name() == name)
    }

    /// Resolve a slash-separated path. A leading `/` starts at the root,
    /// anything else is relative to `self`.
    pub fn find_path(self: &Arc<Self>, path: &str) -> Result<ObjectRef, ObjectError> {
        let mut cur = if path.starts_with('/') {
            self.root()
        } else {
            Arc::clone(self)
        };
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            cur = cur
                .find_child(seg)
                .ok_or_else(|| ObjectError::NotFound(path.to_owned()))?;
        }
        Ok(cur)
    }

    /// Nearest ancestor matching every given filter.
    #[must_use]
    pub fn find_parent(&self, name: Option<&str>, class_pattern: Option<&str>) -> Option<ObjectRef> {
        let mut cur = self.parent();
        while let Some(p) = cur {
            let name_ok = name.is_none_or(|n| p.name() == n);
            let class_ok = class_pattern.is_none_or(|pat| p.of_class(pat));
            if name_ok && class_ok {
                return Some(p);
            }
            cur = p.parent();
        }
        None
    }

    #[must_use]
    pub fn root(self: &Arc<Self>) -> ObjectRef {
        let mut cur = Arc::clone(self);
        while let Some(p) = cur.parent() {
            cur = p;
        }
        cur
    }

    /// Slash-joined names from the root (excluded) down to `self`.
    #[must_use]
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        if self.is_attached() {
            names.push(self.name());
        }
        let mut cur = self.parent();
        while let Some(p) = cur {
            let up = p.parent();
            if up.is_some() {
                names.push(p.name());
            }
            cur = up;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    #[must_use]
    pub fn is_ancestor_of(&self, other: &Object) -> bool {
        let mut cur = other.parent();
        while let Some(p) = cur {
            if std::ptr::eq(Arc::as_ptr(&p), self) {
                return true;
            }
            cur = p.parent();
        }
        false
    }

    // ── Attach / detach ──────────────────────────────────────────────

    /// Append `child` to this object's children.
    ///
    /// Posts `attached` to the child (sender: `self`) and `child-attached`
    /// to `self` (sender: the child) once both locks are released.
    pub fn attach(self: &Arc<Self>, child: &ObjectRef) -> Result<(), ObjectError> {
        {
            let _tree = TREE_LOCK.lock();
            if Arc::ptr_eq(self, child) || child.is_ancestor_of(self) {
                return Err(ObjectError::Cycle {
                    parent: self.name(),
                    child: child.name(),
                });
            }
            let taken: Vec<String> = if child.has_flags(ObjectFlags::NAME_ON_ATTACH) {
                self.children().iter().map(|c| c.name()).collect()
            } else {
                Vec::new()
            };
            let (pg, cg) = lock_pair(self, child);
            let mut p = pg.borrow_mut();
            let mut c = cg.borrow_mut();
            if c.parent.upgrade().is_some() {
                return Err(ObjectError::AlreadyAttached(c.name.clone()));
            }
            if c.flags.contains(ObjectFlags::NAME_ON_ATTACH) {
                c.name = unique_name(child.class.name(), &taken);
            }
            c.parent = Arc::downgrade(self);
            if c.flags.contains(ObjectFlags::KEEP_BELOW) {
                p.children.insert(0, Arc::clone(child));
            } else {
                p.children.push(Arc::clone(child));
            }
            debug!(parent = %p.name, child = %c.name, "attached");
        }
        child.notify(Some(self), "attached", "", &[]);
        self.notify(Some(child), "child-attached", "", &[]);
        Ok(())
    }

    /// Detach from the parent, or queue the detach if the object is flagged
    /// `DEFER_DETACH`. Queueing an already queued object is a no-op.
    pub fn detach(self: &Arc<Self>) -> Result<(), ObjectError> {
        if self.has_flags(ObjectFlags::DEFER_DETACH) {
            if !self.is_attached() {
                return Err(ObjectError::NotAttached(self.name()));
            }
            DetachQueue::global().enqueue(self);
            return Ok(());
        }
        self.detach_now()
    }

    /// Detach immediately, ignoring `DEFER_DETACH`.
    ///
    /// Posts `detached` to `self` (sender: the old parent) and
    /// `child-detached` to the old parent (sender: `self`).
    pub fn detach_now(self: &Arc<Self>) -> Result<(), ObjectError> {
        let parent = {
            let _tree = TREE_LOCK.lock();
            let parent = self
                .parent()
                .ok_or_else(|| ObjectError::NotAttached(self.name()))?;
            {
                let (pg, cg) = lock_pair(&parent, self);
                let mut p = pg.borrow_mut();
                let mut c = cg.borrow_mut();
                p.children.retain(|x| !Arc::ptr_eq(x, self));
                c.parent = Weak::new();
                c.flags.remove(ObjectFlags::DETACHING);
                if !c.flags.contains(ObjectFlags::PRESERVE_DEPS) {
                    c.deps.retain(Dependency::is_wired);
                }
                debug!(parent = %p.name, child = %c.name, "detached");
            }
            parent
        };
        self.notify(Some(&parent), "detached", "", &[]);
        parent.notify(Some(self), "child-detached", "", &[]);
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Run the class `reset` slots, leaf first.
    pub fn reset(self: &Arc<Self>) {
        for c in self.class.lineage().into_iter().rev() {
            if let Some(reset) = c.ops().reset {
                reset(self);
            }
        }
    }

    /// Detach, destroy every child, run the class `destroy` slots (leaf
    /// first) and release variables, handlers, dependencies and private
    /// data. Destroying twice is a no-op.
    pub fn destroy(self: &Arc<Self>) -> Result<(), ObjectError> {
        let (destroyed, indestructible) = self.with_state(|s| {
            (s.destroyed, s.flags.contains(ObjectFlags::INDESTRUCTIBLE))
        });
        if destroyed {
            return Ok(());
        }
        if indestructible {
            return Err(ObjectError::Indestructible(self.name()));
        }
        if self.is_attached() {
            self.detach_now()?;
        }
        for child in self.children() {
            if let Err(err) = child.detach_now().and_then(|()| child.destroy()) {
                warn!(child = %child.name(), error = %err, "child not destroyed");
            }
        }
        for c in self.class.lineage().into_iter().rev() {
            if let Some(destroy) = c.ops().destroy {
                destroy(self);
            }
        }
        let released = self.with_state(|s| {
            s.destroyed = true;
            (
                std::mem::take(&mut s.vars),
                std::mem::take(&mut s.events),
                std::mem::take(&mut s.deps),
            )
        });
        drop(released);
        self.data.lock().take();
        debug!(object = %self.name(), "destroyed");
        Ok(())
    }

    /// The editor object returned by the class `edit` slot.
    #[must_use]
    pub fn edit(self: &Arc<Self>) -> Option<ObjectRef> {
        self.class.find_op(|ops| ops.edit).and_then(|edit| edit(self))
    }

    // ── Private data ─────────────────────────────────────────────────

    pub fn set_data(&self, data: Box<dyn Any + Send>) {
        *self.data.lock() = Some(data);
    }

    /// Run `f` on the private data if it is a `T`.
    pub fn with_data<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut data = self.data.lock();
        data.as_mut()?.downcast_mut::<T>().map(f)
    }

    // ── Dependencies ─────────────────────────────────────────────────

    /// Add a reference to `dep`; returns the new count.
    pub fn add_dep(&self, dep: &ObjectRef) -> u32 {
        self.with_state(|s| match s.deps.iter_mut().find(|d| d.refers_to(dep)) {
            Some(d) => {
                if !d.is_wired() {
                    d.count = (d.count + 1).min(OBJECT_DEP_MAX - 1);
                }
                d.count
            }
            None => {
                s.deps.push(Dependency {
                    object: Arc::downgrade(dep),
                    count: 1,
                });
                1
            }
        })
    }

    /// Add a dependency that is never released by [`del_dep`](Self::del_dep).
    pub fn add_dep_wired(&self, dep: &ObjectRef) {
        self.with_state(|s| match s.deps.iter_mut().find(|d| d.refers_to(dep)) {
            Some(d) => d.count = OBJECT_DEP_MAX,
            None => s.deps.push(Dependency {
                object: Arc::downgrade(dep),
                count: OBJECT_DEP_MAX,
            }),
        });
    }

    /// Drop one reference to `dep`; returns the remaining count.
    pub fn del_dep(&self, dep: &ObjectRef) -> Result<u32, ObjectError> {
        let remaining = self.with_state(|s| {
            let i = s.deps.iter().position(|d| d.refers_to(dep))?;
            let d = &mut s.deps[i];
            if d.is_wired() {
                return Some(d.count);
            }
            d.count -= 1;
            let left = d.count;
            if left == 0 {
                s.deps.remove(i);
            }
            Some(left)
        });
        remaining.ok_or_else(|| ObjectError::NoSuchDependency {
            object: self.name(),
            dep: dep.name(),
        })
    }

    #[must_use]
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.with_state(|s| s.deps.clone())
    }

    // ── Variables ────────────────────────────────────────────────────

    fn put_variable(&self, var: Variable) -> Arc<Variable> {
        let var = Arc::new(var);
        self.with_state(|s| {
            match s.vars.iter().position(|v| v.name() == var.name()) {
                Some(i) => s.vars[i] = Arc::clone(&var),
                None => s.vars.push(Arc::clone(&var)),
            }
        });
        var
    }

    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<Arc<Variable>> {
        self.with_state(|s| s.vars.iter().find(|v| v.name() == name).cloned())
    }

    pub fn get_variable(&self, name: &str) -> Result<Arc<Variable>, VariableError> {
        self.find_variable(name)
            .ok_or_else(|| VariableError::NotFound(name.to_owned()))
    }

    /// Look up and lock a variable. Release the guard before locking any
    /// other object.
    pub fn lock_variable(&self, name: &str) -> Result<VarGuard, VariableError> {
        self.get_variable(name)?.lock()
    }

    pub fn get<T: VarValue>(&self, name: &str) -> Result<T, VariableError> {
        self.get_variable(name)?.get()
    }

    /// Store `value` under `name`, creating a by-value variable if none
    /// exists. An existing binding is written through.
    pub fn set_value(&self, name: &str, value: Value) -> Result<Arc<Variable>, VariableError> {
        variable::check_name(name)?;
        let (var, created) = self.with_state(|s| {
            match s.vars.iter().find(|v| v.name() == name) {
                Some(v) => (Arc::clone(v), false),
                None => {
                    let v = Arc::new(Variable::by_value(name, value.clone()));
                    s.vars.push(Arc::clone(&v));
                    (v, true)
                }
            }
        });
        if !created {
            var.lock()?.set(value)?;
        }
        Ok(var)
    }

    pub fn set<T: VarValue>(&self, name: &str, v: T) -> Result<Arc<Variable>, VariableError> {
        self.set_as(name, v, T::TYPE)
    }

    /// Like [`set`](Self::set) with an explicit kind, e.g. `Long` for an
    /// `i64`.
    pub fn set_as<T: VarValue>(
        &self,
        name: &str,
        v: T,
        ty: VarType,
    ) -> Result<Arc<Variable>, VariableError> {
        if !T::accepts(ty) {
            return Err(VariableError::TypeMismatch {
                name: name.to_owned(),
                expected: ty,
                actual: T::TYPE,
            });
        }
        self.set_value(name, v.into_value_as(ty))
    }

    /// Bind `name` to caller-owned storage, replacing any previous binding.
    pub fn bind<T: VarValue>(&self, name: &str, slot: &Slot<T>) -> Result<Arc<Variable>, VariableError> {
        self.bind_as(name, slot, T::TYPE)
    }

    pub fn bind_as<T: VarValue>(
        &self,
        name: &str,
        slot: &Slot<T>,
        ty: VarType,
    ) -> Result<Arc<Variable>, VariableError> {
        variable::check_name(name)?;
        if !T::accepts(ty) {
            return Err(VariableError::TypeMismatch {
                name: name.to_owned(),
                expected: ty,
                actual: T::TYPE,
            });
        }
        Ok(self.put_variable(Variable::external(name, ty, slot.cell())))
    }

    /// Bind a view onto the bits of `word` selected by `mask`.
    pub fn bind_flag_word<T: FlagWord>(
        &self,
        name: &str,
        word: &Slot<T>,
        mask: T,
    ) -> Result<Arc<Variable>, VariableError> {
        self.bind_flag_as(name, word, mask, T::TYPE)
    }

    fn bind_flag_as<T: FlagWord>(
        &self,
        name: &str,
        word: &Slot<T>,
        mask: T,
        ty: VarType,
    ) -> Result<Arc<Variable>, VariableError> {
        variable::check_name(name)?;
        Ok(self.put_variable(Variable::flag(name, ty, word.cell(), mask.into())))
    }

    pub fn bind_flag(&self, name: &str, word: &Slot<u32>, mask: u32) -> Result<Arc<Variable>, VariableError> {
        self.bind_flag_as(name, word, mask, VarType::Uint)
    }

    pub fn bind_flag8(&self, name: &str, word: &Slot<u8>, mask: u8) -> Result<Arc<Variable>, VariableError> {
        self.bind_flag_as(name, word, mask, VarType::Uint8)
    }

    pub fn bind_flag16(&self, name: &str, word: &Slot<u16>, mask: u16) -> Result<Arc<Variable>, VariableError> {
        self.bind_flag_as(name, word, mask, VarType::Uint16)
    }

    pub fn bind_flag32(&self, name: &str, word: &Slot<u32>, mask: u32) -> Result<Arc<Variable>, VariableError> {
        self.bind_flag_as(name, word, mask, VarType::Uint32)
    }

    pub fn set_string(&self, name: &str, v: impl Into<String>) -> Result<Arc<Variable>, VariableError> {
        self.set(name, v.into())
    }

    pub fn bind_string(&self, name: &str, slot: &Slot<String>) -> Result<Arc<Variable>, VariableError> {
        self.bind(name, slot)
    }

    pub fn get_string(&self, name: &str) -> Result<String, VariableError> {
        self.get(name)
    }

    /// Remove a variable; returns whether it existed.
    pub fn unset_variable(&self, name: &str) -> bool {
        self.with_state(|s| {
            let before = s.vars.len();
            s.vars.retain(|v| v.name() != name);
            before != s.vars.len()
        })
    }

    /// Copy the current value of `name` into `dst` as a by-value variable
    /// (or through `dst`'s binding of the same name).
    pub fn copy_variable(&self, dst: &Object, name: &str) -> Result<Arc<Variable>, VariableError> {
        let value = self.lock_variable(name)?.get();
        dst.set_value(name, value)
    }

    /// Snapshot of the variable list, in creation order.
    #[must_use]
    pub fn variables(&self) -> Vec<Arc<Variable>> {
        self.with_state(|s| s.vars.clone())
    }
}

macro_rules! typed_vars {
    ($($set:ident, $bind:ident, $get:ident, $ty:ty, $kind:ident;)*) => {
        impl Object {
            $(
                pub fn $set(&self, name: &str, v: $ty) -> Result<Arc<Variable>, VariableError> {
                    self.set_as(name, v, VarType::$kind)
                }

                pub fn $bind(&self, name: &str, slot: &Slot<$ty>) -> Result<Arc<Variable>, VariableError> {
                    self.bind_as(name, slot, VarType::$kind)
                }

                pub fn $get(&self, name: &str) -> Result<$ty, VariableError> {
                    self.get(name)
                }
            )*
        }
    };
}

typed_vars! {
    set_int, bind_int, get_int, i32, Int;
    set_uint, bind_uint, get_uint, u32, Uint;
    set_long, bind_long, get_long, i64, Long;
    set_ulong, bind_ulong, get_ulong, u64, Ulong;
    set_float, bind_float, get_float, f32, Float;
    set_double, bind_double, get_double, f64, Double;
    set_long_double, bind_long_double, get_long_double, f64, LongDouble;
    set_uint8, bind_uint8, get_uint8, u8, Uint8;
    set_sint8, bind_sint8, get_sint8, i8, Sint8;
    set_uint16, bind_uint16, get_uint16, u16, Uint16;
    set_sint16, bind_sint16, get_sint16, i16, Sint16;
    set_uint32, bind_uint32, get_uint32, u32, Uint32;
    set_sint32, bind_sint32, get_sint32, i32, Sint32;
    set_uint64, bind_uint64, get_uint64, u64, Uint64;
    set_sint64, bind_sint64, get_sint64, i64, Sint64;
    set_pointer, bind_pointer, get_pointer, Pointer, Pointer;
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id.0)
            .field("class", &self.class.name())
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
