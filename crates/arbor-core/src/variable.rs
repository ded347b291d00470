//! Named, typed bindings.
//!
//! # Design
//!
//! A [`Variable`] either owns its value or views storage owned by someone
//! else. Externally owned storage is a [`Slot<T>`]: the caller keeps the
//! slot, hands a reference to `bind_*`, and reads or writes it directly
//! whenever it likes. Both sides go through the slot's own mutex, so a
//! binding is never torn by concurrent access.
//!
//! Flag views (`bind_flag*`) share one integer word between several
//! variables, each owning a subset of its bits.
//!
//! # Invariants
//!
//! 1. A variable's [`VarType`] never changes after creation.
//! 2. A variable never keeps external storage alive. Once the last `Slot`
//!    clone is dropped, access fails with [`VariableError::Dangling`].
//! 3. A flag-view write only changes the bits under its mask.
//!
//! # Lock order
//!
//! A [`VarGuard`] holds only the variable's storage mutex. Do not acquire an
//! object lock while holding one.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use crate::error::{VariableError, fatal};
use crate::value::{Value, VarType, VarValue};

/// Longest accepted variable name is `VARIABLE_NAME_MAX - 1` bytes.
pub const VARIABLE_NAME_MAX: usize = 28;

type Cell = Arc<Mutex<Value>>;

pub(crate) fn check_name(name: &str) -> Result<(), VariableError> {
    if name.len() >= VARIABLE_NAME_MAX {
        return Err(VariableError::NameTooLong {
            name: name.to_owned(),
            max: VARIABLE_NAME_MAX - 1,
        });
    }
    Ok(())
}

// ── Slot ─────────────────────────────────────────────────────────────

/// Caller-owned storage a variable can be bound to.
///
/// Cloning a slot clones the handle, not the value.
pub struct Slot<T: VarValue> {
    cell: Cell,
    _ty: PhantomData<fn() -> T>,
}

impl<T: VarValue> Slot<T> {
    #[must_use]
    pub fn new(v: T) -> Self {
        Self {
            cell: Arc::new(Mutex::new(v.into_value())),
            _ty: PhantomData,
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        match T::from_value(&self.cell.lock()) {
            Some(v) => v,
            None => fatal(format_args!("slot does not hold a {}", T::TYPE)),
        }
    }

    pub fn set(&self, v: T) {
        let mut g = self.cell.lock();
        let ty = g.ty();
        *g = v.into_value_as(ty);
    }

    /// Read-modify-write under the slot's lock.
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        let mut g = self.cell.lock();
        let ty = g.ty();
        let Some(cur) = T::from_value(&g) else {
            fatal(format_args!("slot does not hold a {}", T::TYPE));
        };
        *g = f(cur).into_value_as(ty);
    }

    pub(crate) fn cell(&self) -> &Cell {
        &self.cell
    }
}

impl<T: VarValue> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            _ty: PhantomData,
        }
    }
}

impl<T: VarValue> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&*self.cell.lock()).finish()
    }
}

impl<T: VarValue + Default> Default for Slot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Unsigned integer types usable as a packed flag word.
pub trait FlagWord: VarValue + Copy + Into<u64> {}

impl FlagWord for u8 {}
impl FlagWord for u16 {}
impl FlagWord for u32 {}
impl FlagWord for u64 {}

// ── Variable ─────────────────────────────────────────────────────────

enum Storage {
    Owned(Cell),
    External(Weak<Mutex<Value>>),
    Flag { word: Weak<Mutex<Value>>, mask: u64 },
}

/// A named, typed binding attached to an object.
pub struct Variable {
    name: Arc<str>,
    ty: VarType,
    storage: Storage,
}

impl Variable {
    pub(crate) fn by_value(name: &str, value: Value) -> Self {
        Self {
            name: name.into(),
            ty: value.ty(),
            storage: Storage::Owned(Arc::new(Mutex::new(value))),
        }
    }

    pub(crate) fn external(name: &str, ty: VarType, cell: &Cell) -> Self {
        Self {
            name: name.into(),
            ty,
            storage: Storage::External(Arc::downgrade(cell)),
        }
    }

    pub(crate) fn flag(name: &str, ty: VarType, cell: &Cell, mask: u64) -> Self {
        Self {
            name: name.into(),
            ty,
            storage: Storage::Flag {
                word: Arc::downgrade(cell),
                mask,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn ty(&self) -> VarType {
        self.ty
    }

    /// True when the value lives in caller-owned storage.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !matches!(self.storage, Storage::Owned(_))
    }

    #[must_use]
    pub fn flag_mask(&self) -> Option<u64> {
        match self.storage {
            Storage::Flag { mask, .. } => Some(mask),
            _ => None,
        }
    }

    /// Lock the storage. The guard must be held across any
    /// read-modify-write.
    pub fn lock(&self) -> Result<VarGuard, VariableError> {
        let (cell, mask) = match &self.storage {
            Storage::Owned(c) => (Arc::clone(c), None),
            Storage::External(w) => (self.upgrade(w)?, None),
            Storage::Flag { word, mask } => (self.upgrade(word)?, Some(*mask)),
        };
        Ok(VarGuard {
            guard: cell.lock_arc(),
            name: Arc::clone(&self.name),
            ty: self.ty,
            mask,
        })
    }

    fn upgrade(&self, w: &Weak<Mutex<Value>>) -> Result<Cell, VariableError> {
        w.upgrade()
            .ok_or_else(|| VariableError::Dangling(self.name.to_string()))
    }

    pub fn get<T: VarValue>(&self) -> Result<T, VariableError> {
        self.lock()?.try_get_as()
    }

    pub fn set<T: VarValue>(&self, v: T) -> Result<(), VariableError> {
        self.lock()?.set_as(v)
    }

    /// Current value formatted for display, or `<dangling>`.
    #[must_use]
    pub fn print(&self) -> String {
        match self.lock() {
            Ok(g) => g.get().to_string(),
            Err(_) => "<dangling>".to_owned(),
        }
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("bound", &self.is_bound())
            .field("value", &self.print())
            .finish()
    }
}

// ── Guard ────────────────────────────────────────────────────────────

/// Exclusive access to a variable's storage.
pub struct VarGuard {
    guard: ArcMutexGuard<RawMutex, Value>,
    name: Arc<str>,
    ty: VarType,
    mask: Option<u64>,
}

impl VarGuard {
    #[must_use]
    pub fn ty(&self) -> VarType {
        self.ty
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn mismatch(&self, expected: VarType, actual: VarType) -> VariableError {
        VariableError::TypeMismatch {
            name: self.name.to_string(),
            expected,
            actual,
        }
    }

    /// The current value, tagged with the variable's type. A flag view
    /// yields only its masked bits.
    #[must_use]
    pub fn get(&self) -> Value {
        let v = (*self.guard).clone();
        let v = match self.mask {
            Some(mask) => v
                .to_bits()
                .and_then(|b| Value::from_bits(self.ty, b & mask))
                .unwrap_or(v),
            None => v,
        };
        v.coerce(self.ty)
            .unwrap_or_else(|| Value::default_for(self.ty))
    }

    /// Store `v`, which must share the variable's representation.
    pub fn set(&mut self, v: Value) -> Result<(), VariableError> {
        let actual = v.ty();
        let v = v.coerce(self.ty).ok_or_else(|| self.mismatch(self.ty, actual))?;
        match self.mask {
            Some(mask) => {
                let word = self.guard.to_bits().unwrap_or(0);
                let bits = v.to_bits().unwrap_or(0);
                let merged = (word & !mask) | (bits & mask);
                let word_ty = self.guard.ty();
                if let Some(w) = Value::from_bits(word_ty, merged) {
                    *self.guard = w;
                }
            }
            None => *self.guard = v,
        }
        Ok(())
    }

    pub fn try_get_as<T: VarValue>(&self) -> Result<T, VariableError> {
        if !T::accepts(self.ty) {
            return Err(self.mismatch(T::TYPE, self.ty));
        }
        T::from_value(&self.get()).ok_or_else(|| self.mismatch(T::TYPE, self.ty))
    }

    /// Typed read; a type mismatch is a programmer error.
    #[track_caller]
    #[must_use]
    pub fn get_as<T: VarValue>(&self) -> T {
        match self.try_get_as() {
            Ok(v) => v,
            Err(e) => fatal(format_args!("{e}")),
        }
    }

    pub fn set_as<T: VarValue>(&mut self, v: T) -> Result<(), VariableError> {
        if !T::accepts(self.ty) {
            return Err(self.mismatch(self.ty, T::TYPE));
        }
        self.set(v.into_value_as(self.ty))
    }

    /// Whether a flag view's bits are set, or a numeric value is non-zero.
    #[must_use]
    pub fn is_set(&self) -> bool {
        match self.mask {
            Some(mask) => self.guard.to_bits().is_some_and(|b| b & mask != 0),
            None => self.get().as_f64().is_some_and(|x| x != 0.0),
        }
    }

    /// Set or clear every bit of a flag view.
    pub fn set_flag(&mut self, on: bool) -> Result<(), VariableError> {
        let Some(mask) = self.mask else {
            return Err(VariableError::NotAFlag(self.name.to_string()));
        };
        let word = self.guard.to_bits().unwrap_or(0);
        let merged = if on { word | mask } else { word & !mask };
        if let Some(w) = Value::from_bits(self.guard.ty(), merged) {
            *self.guard = w;
        }
        Ok(())
    }

    /// Direct access to the stored value. `None` for flag views, whose
    /// word is shared with other bindings.
    pub fn raw_mut(&mut self) -> Option<&mut Value> {
        match self.mask {
            Some(_) => None,
            None => Some(&mut *self.guard),
        }
    }
}

impl fmt::Debug for VarGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VarGuard")
            .field("name", &self.name)
            .field("value", &self.get())
            .finish()
    }
}
