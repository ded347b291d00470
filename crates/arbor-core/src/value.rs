//! The closed set of value kinds a [`Variable`](crate::Variable) or event
//! argument can hold.
//!
//! # Invariants
//!
//! 1. `Value::ty()` always names the variant that is populated.
//! 2. Kinds that share a Rust representation (`Int`/`Sint32`,
//!    `Uint`/`Uint32`, `Long`/`Sint64`, `Ulong`/`Uint64`,
//!    `Double`/`LongDouble`) convert into each other with
//!    [`Value::coerce`]; no other conversion is implicit.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::object::{Object, ObjectRef};

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VarType {
    Pointer = 0,
    String = 1,
    Int = 2,
    Uint = 3,
    Long = 4,
    Ulong = 5,
    Float = 6,
    Double = 7,
    /// No extended float in Rust; stored as `f64` but tagged apart.
    LongDouble = 8,
    Uint8 = 9,
    Sint8 = 10,
    Uint16 = 11,
    Sint16 = 12,
    Uint32 = 13,
    Sint32 = 14,
    Uint64 = 15,
    Sint64 = 16,
}

impl VarType {
    const ALL: [VarType; 17] = [
        Self::Pointer,
        Self::String,
        Self::Int,
        Self::Uint,
        Self::Long,
        Self::Ulong,
        Self::Float,
        Self::Double,
        Self::LongDouble,
        Self::Uint8,
        Self::Sint8,
        Self::Uint16,
        Self::Sint16,
        Self::Uint32,
        Self::Sint32,
        Self::Uint64,
        Self::Sint64,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pointer => "pointer",
            Self::String => "string",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Long => "long",
            Self::Ulong => "ulong",
            Self::Float => "float",
            Self::Double => "double",
            Self::LongDouble => "long double",
            Self::Uint8 => "uint8",
            Self::Sint8 => "sint8",
            Self::Uint16 => "uint16",
            Self::Sint16 => "sint16",
            Self::Uint32 => "uint32",
            Self::Sint32 => "sint32",
            Self::Uint64 => "uint64",
            Self::Sint64 => "sint64",
        }
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Pointer | Self::String)
    }

    /// Stable wire code used by object serialization.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A non-owning or shared reference carried by a `Pointer` value.
///
/// Object references are weak: an argument or variable never keeps an
/// object alive.
#[derive(Clone, Default)]
pub enum Pointer {
    #[default]
    Null,
    Object(Weak<Object>),
    Any(Arc<dyn Any + Send + Sync>),
}

impl Pointer {
    #[must_use]
    pub fn object(obj: &ObjectRef) -> Self {
        Self::Object(Arc::downgrade(obj))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The referenced object, if this points at one that is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ObjectRef> {
        match self {
            Self::Object(w) => w.upgrade(),
            _ => None,
        }
    }

    /// Downcast an opaque pointer.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Any(a) => Arc::clone(a).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Identity comparison.
    #[must_use]
    pub fn ptr_eq(&self, other: &Pointer) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Any(a), Self::Any(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Object(w) => match w.upgrade() {
                Some(o) => write!(f, "Object({})", o.name()),
                None => f.write_str("Object(<dropped>)"),
            },
            Self::Any(a) => write!(f, "Any({:p})", Arc::as_ptr(a)),
        }
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone)]
pub enum Value {
    Pointer(Pointer),
    String(String),
    Int(i32),
    Uint(u32),
    Long(i64),
    Ulong(u64),
    Float(f32),
    Double(f64),
    LongDouble(f64),
    Uint8(u8),
    Sint8(i8),
    Uint16(u16),
    Sint16(i16),
    Uint32(u32),
    Sint32(i32),
    Uint64(u64),
    Sint64(i64),
}

impl Value {
    #[must_use]
    pub fn ty(&self) -> VarType {
        match self {
            Self::Pointer(_) => VarType::Pointer,
            Self::String(_) => VarType::String,
            Self::Int(_) => VarType::Int,
            Self::Uint(_) => VarType::Uint,
            Self::Long(_) => VarType::Long,
            Self::Ulong(_) => VarType::Ulong,
            Self::Float(_) => VarType::Float,
            Self::Double(_) => VarType::Double,
            Self::LongDouble(_) => VarType::LongDouble,
            Self::Uint8(_) => VarType::Uint8,
            Self::Sint8(_) => VarType::Sint8,
            Self::Uint16(_) => VarType::Uint16,
            Self::Sint16(_) => VarType::Sint16,
            Self::Uint32(_) => VarType::Uint32,
            Self::Sint32(_) => VarType::Sint32,
            Self::Uint64(_) => VarType::Uint64,
            Self::Sint64(_) => VarType::Sint64,
        }
    }

    /// The zero value of a kind.
    #[must_use]
    pub fn default_for(ty: VarType) -> Self {
        match ty {
            VarType::Pointer => Self::Pointer(Pointer::Null),
            VarType::String => Self::String(String::new()),
            VarType::Int => Self::Int(0),
            VarType::Uint => Self::Uint(0),
            VarType::Long => Self::Long(0),
            VarType::Ulong => Self::Ulong(0),
            VarType::Float => Self::Float(0.0),
            VarType::Double => Self::Double(0.0),
            VarType::LongDouble => Self::LongDouble(0.0),
            VarType::Uint8 => Self::Uint8(0),
            VarType::Sint8 => Self::Sint8(0),
            VarType::Uint16 => Self::Uint16(0),
            VarType::Sint16 => Self::Sint16(0),
            VarType::Uint32 => Self::Uint32(0),
            VarType::Sint32 => Self::Sint32(0),
            VarType::Uint64 => Self::Uint64(0),
            VarType::Sint64 => Self::Sint64(0),
        }
    }

    /// Re-tag as `ty` if both kinds share a representation.
    #[must_use]
    pub fn coerce(self, ty: VarType) -> Option<Self> {
        use Value as V;
        use VarType as T;
        Some(match (self, ty) {
            (V::Int(x) | V::Sint32(x), T::Int) => V::Int(x),
            (V::Int(x) | V::Sint32(x), T::Sint32) => V::Sint32(x),
            (V::Uint(x) | V::Uint32(x), T::Uint) => V::Uint(x),
            (V::Uint(x) | V::Uint32(x), T::Uint32) => V::Uint32(x),
            (V::Long(x) | V::Sint64(x), T::Long) => V::Long(x),
            (V::Long(x) | V::Sint64(x), T::Sint64) => V::Sint64(x),
            (V::Ulong(x) | V::Uint64(x), T::Ulong) => V::Ulong(x),
            (V::Ulong(x) | V::Uint64(x), T::Uint64) => V::Uint64(x),
            (V::Double(x) | V::LongDouble(x), T::Double) => V::Double(x),
            (V::Double(x) | V::LongDouble(x), T::LongDouble) => V::LongDouble(x),
            (v, t) if v.ty() == t => v,
            _ => return None,
        })
    }

    /// Numeric value widened to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Self::Int(x) | Self::Sint32(x) => f64::from(x),
            Self::Uint(x) | Self::Uint32(x) => f64::from(x),
            Self::Long(x) | Self::Sint64(x) => x as f64,
            Self::Ulong(x) | Self::Uint64(x) => x as f64,
            Self::Float(x) => f64::from(x),
            Self::Double(x) | Self::LongDouble(x) => x,
            Self::Uint8(x) => f64::from(x),
            Self::Sint8(x) => f64::from(x),
            Self::Uint16(x) => f64::from(x),
            Self::Sint16(x) => f64::from(x),
            Self::Pointer(_) | Self::String(_) => return None,
        })
    }

    /// Raw bits of an unsigned integer value (flag words).
    #[must_use]
    pub(crate) fn to_bits(&self) -> Option<u64> {
        Some(match *self {
            Self::Uint8(x) => u64::from(x),
            Self::Uint16(x) => u64::from(x),
            Self::Uint(x) | Self::Uint32(x) => u64::from(x),
            Self::Ulong(x) | Self::Uint64(x) => x,
            _ => return None,
        })
    }

    /// Inverse of [`to_bits`](Self::to_bits), truncating to the kind's width.
    #[must_use]
    pub(crate) fn from_bits(ty: VarType, bits: u64) -> Option<Self> {
        Some(match ty {
            VarType::Uint8 => Self::Uint8(bits as u8),
            VarType::Uint16 => Self::Uint16(bits as u16),
            VarType::Uint => Self::Uint(bits as u32),
            VarType::Uint32 => Self::Uint32(bits as u32),
            VarType::Ulong => Self::Ulong(bits),
            VarType::Uint64 => Self::Uint64(bits),
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Self::Pointer(p) => Some(p),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pointer(a), Self::Pointer(b)) => a.ptr_eq(b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Int(b)) | (Self::Sint32(a), Self::Sint32(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) | (Self::Uint32(a), Self::Uint32(b)) => a == b,
            (Self::Long(a), Self::Long(b)) | (Self::Sint64(a), Self::Sint64(b)) => a == b,
            (Self::Ulong(a), Self::Ulong(b)) | (Self::Uint64(a), Self::Uint64(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Double(a), Self::Double(b)) | (Self::LongDouble(a), Self::LongDouble(b)) => {
                a == b
            }
            (Self::Uint8(a), Self::Uint8(b)) => a == b,
            (Self::Sint8(a), Self::Sint8(b)) => a == b,
            (Self::Uint16(a), Self::Uint16(b)) => a == b,
            (Self::Sint16(a), Self::Sint16(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pointer(p) => write!(f, "{p:?}"),
            Self::String(s) => f.write_str(s),
            Self::Int(x) | Self::Sint32(x) => write!(f, "{x}"),
            Self::Uint(x) | Self::Uint32(x) => write!(f, "{x}"),
            Self::Long(x) | Self::Sint64(x) => write!(f, "{x}"),
            Self::Ulong(x) | Self::Uint64(x) => write!(f, "{x}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Double(x) | Self::LongDouble(x) => write!(f, "{x}"),
            Self::Uint8(x) => write!(f, "{x}"),
            Self::Sint8(x) => write!(f, "{x}"),
            Self::Uint16(x) => write!(f, "{x}"),
            Self::Sint16(x) => write!(f, "{x}"),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

/// A Rust type that can be stored in a [`Value`].
///
/// `TYPE` is the kind a fresh value of this type is tagged with; `accepts`
/// lists every kind sharing its representation.
pub trait VarValue: Sized + Send + 'static {
    const TYPE: VarType;

    fn accepts(ty: VarType) -> bool {
        ty == Self::TYPE
    }

    fn from_value(v: &Value) -> Option<Self>;

    /// Tag as `ty`, which must satisfy [`accepts`](Self::accepts).
    fn into_value_as(self, ty: VarType) -> Value;

    fn into_value(self) -> Value {
        self.into_value_as(Self::TYPE)
    }
}

macro_rules! var_value {
    ($($ty:ty => $canon:ident $(| $alt:ident)*;)*) => {
        $(
            impl VarValue for $ty {
                const TYPE: VarType = VarType::$canon;

                fn accepts(ty: VarType) -> bool {
                    matches!(ty, VarType::$canon $(| VarType::$alt)*)
                }

                fn from_value(v: &Value) -> Option<Self> {
                    match v {
                        Value::$canon(x) $(| Value::$alt(x))* => Some(*x),
                        _ => None,
                    }
                }

                fn into_value_as(self, ty: VarType) -> Value {
                    match ty {
                        $(VarType::$alt => Value::$alt(self),)*
                        _ => Value::$canon(self),
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    v.into_value()
                }
            }
        )*
    };
}

var_value! {
    i32 => Int | Sint32;
    u32 => Uint | Uint32;
    i64 => Sint64 | Long;
    u64 => Uint64 | Ulong;
    f32 => Float;
    f64 => Double | LongDouble;
    i8 => Sint8;
    u8 => Uint8;
    i16 => Sint16;
    u16 => Uint16;
}

impl VarValue for String {
    const TYPE: VarType = VarType::String;

    fn from_value(v: &Value) -> Option<Self> {
        v.as_str().map(str::to_owned)
    }

    fn into_value_as(self, _ty: VarType) -> Value {
        Value::String(self)
    }
}

impl VarValue for Pointer {
    const TYPE: VarType = VarType::Pointer;

    fn from_value(v: &Value) -> Option<Self> {
        v.as_pointer().cloned()
    }

    fn into_value_as(self, _ty: VarType) -> Value {
        Value::Pointer(self)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Pointer> for Value {
    fn from(v: Pointer) -> Self {
        Self::Pointer(v)
    }
}

impl From<&ObjectRef> for Value {
    fn from(v: &ObjectRef) -> Self {
        Self::Pointer(Pointer::object(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for ty in VarType::ALL {
            assert_eq!(VarType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(VarType::from_code(200), None);
    }

    #[test]
    fn coerce_only_within_representation() {
        assert_eq!(Value::Int(3).coerce(VarType::Sint32), Some(Value::Sint32(3)));
        assert_eq!(Value::Sint64(-1).coerce(VarType::Long), Some(Value::Long(-1)));
        assert_eq!(Value::Int(3).coerce(VarType::Long), None);
        assert_eq!(Value::Float(1.0).coerce(VarType::Double), None);
        assert_eq!(
            Value::from("x").coerce(VarType::String),
            Some(Value::String("x".into()))
        );
    }

    #[test]
    fn var_value_accepts_aliases() {
        assert!(i32::accepts(VarType::Sint32));
        assert!(!i32::accepts(VarType::Sint16));
        assert_eq!(i64::from_value(&Value::Long(9)), Some(9));
        assert_eq!(7u32.into_value_as(VarType::Uint32), Value::Uint32(7));
        assert_eq!(Value::from(7u32), Value::Uint(7));
    }

    #[test]
    fn flag_bits_truncate_to_width() {
        assert_eq!(
            Value::from_bits(VarType::Uint8, 0x1ff),
            Some(Value::Uint8(0xff))
        );
        assert_eq!(Value::Uint16(5).to_bits(), Some(5));
        assert_eq!(Value::Int(5).to_bits(), None);
    }

    #[test]
    fn display_prints_plain_values() {
        assert_eq!(Value::Int(-4).to_string(), "-4");
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::Pointer(Pointer::Null).to_string(), "NULL");
    }

    #[test]
    fn opaque_pointer_downcasts() {
        let p = Pointer::Any(Arc::new(42u64));
        assert_eq!(p.downcast::<u64>().as_deref(), Some(&42));
        assert!(p.downcast::<i32>().is_none());
        assert!(p.ptr_eq(&p.clone()));
    }
}
