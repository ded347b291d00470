//! Scrollbar-style numeric range operations.
//!
//! A range is four or five variables on one object: a value, `min`, `max`,
//! an increment and a visible extent. Every operation dispatches on the
//! value's [`VarType`] to one generic implementation, so all integer and
//! float kinds behave alike.
//!
//! # Invariants
//!
//! 1. `increment`/`decrement` keep the value within `[min, max - visible]`
//!    and never overflow. They report whether the value clamped.
//! 2. The bounds are read before the value is locked, and the value's lock
//!    is held across its read-modify-write.

use crate::error::VariableError;
use crate::object::Object;
use crate::value::{Value, VarType, VarValue};

/// Variable names making up a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeNames<'a> {
    pub value: &'a str,
    pub min: &'a str,
    pub max: &'a str,
    pub inc: &'a str,
    pub visible: &'a str,
}

impl Default for RangeNames<'_> {
    fn default() -> Self {
        Self {
            value: "value",
            min: "min",
            max: "max",
            inc: "inc",
            visible: "visible",
        }
    }
}

/// Thumb position and length along a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PxCoords {
    pub x: i32,
    pub len: i32,
}

trait RangeNum: VarValue + Copy + PartialOrd {
    const ZERO: Self;
    const ONE: Self;
    fn add_sat(self, o: Self) -> Self;
    fn sub_sat(self, o: Self) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

macro_rules! range_int {
    ($($ty:ty),*) => {$(
        impl RangeNum for $ty {
            const ZERO: Self = 0;
            const ONE: Self = 1;
            fn add_sat(self, o: Self) -> Self { self.saturating_add(o) }
            fn sub_sat(self, o: Self) -> Self { self.saturating_sub(o) }
            fn to_f64(self) -> f64 { self as f64 }
            fn from_f64(v: f64) -> Self { v as $ty }
        }
    )*};
}

macro_rules! range_float {
    ($($ty:ty),*) => {$(
        impl RangeNum for $ty {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            fn add_sat(self, o: Self) -> Self { self + o }
            fn sub_sat(self, o: Self) -> Self { self - o }
            fn to_f64(self) -> f64 { f64::from(self) }
            fn from_f64(v: f64) -> Self { v as $ty }
        }
    )*};
}

range_int!(i8, u8, i16, u16, i32, u32, i64, u64);
range_float!(f32, f64);

/// Bound snapshot, in the value's representation.
struct Bounds<T> {
    min: T,
    max: T,
    inc: T,
    vis: T,
}

fn num<T: RangeNum>(name: &str, v: &Value) -> Result<T, VariableError> {
    if let Some(x) = T::from_value(v) {
        return Ok(x);
    }
    v.as_f64().map(T::from_f64).ok_or_else(|| VariableError::NotNumeric {
        name: name.to_owned(),
        ty: v.ty(),
    })
}

impl Object {
    fn range_value(&self, name: &str) -> Result<Option<Value>, VariableError> {
        match self.find_variable(name) {
            Some(v) => Ok(Some(v.lock()?.get())),
            None => Ok(None),
        }
    }

    fn bounds<T: RangeNum>(&self, n: &RangeNames<'_>) -> Result<Bounds<T>, VariableError> {
        let req = |name: &str| -> Result<T, VariableError> {
            let v = self
                .range_value(name)?
                .ok_or_else(|| VariableError::NotFound(name.to_owned()))?;
            num(name, &v)
        };
        let opt = |name: &str, dflt: T| -> Result<T, VariableError> {
            match self.range_value(name)? {
                Some(v) => num(name, &v),
                None => Ok(dflt),
            }
        };
        Ok(Bounds {
            min: req(n.min)?,
            max: req(n.max)?,
            inc: opt(n.inc, T::ONE)?,
            vis: opt(n.visible, T::ZERO)?,
        })
    }

    fn value_type(&self, n: &RangeNames<'_>) -> Result<VarType, VariableError> {
        let ty = self.get_variable(n.value)?.ty();
        if !ty.is_numeric() {
            return Err(VariableError::NotNumeric {
                name: n.value.to_owned(),
                ty,
            });
        }
        Ok(ty)
    }

    fn step<T: RangeNum>(&self, n: &RangeNames<'_>, up: bool) -> Result<bool, VariableError> {
        let b = self.bounds::<T>(n)?;
        let var = self.get_variable(n.value)?;
        let mut g = var.lock()?;
        let val: T = g.try_get_as()?;
        if b.max <= b.vis {
            return Ok(false);
        }
        let (next, clamped) = if up {
            let lim = b.max.sub_sat(b.vis);
            if val.add_sat(b.inc) > lim {
                (lim, true)
            } else {
                (val.add_sat(b.inc), false)
            }
        } else if val < b.min.add_sat(b.inc) {
            (b.min, true)
        } else {
            (val.sub_sat(b.inc), false)
        };
        g.set_as(next)?;
        Ok(clamped)
    }

    fn seek_px<T: RangeNum>(&self, n: &RangeNames<'_>, x: i32, extent: i32) -> Result<(), VariableError> {
        let b = self.bounds::<T>(n)?;
        let var = self.get_variable(n.value)?;
        let mut g = var.lock()?;
        let top = b.max.sub_sat(b.vis);
        let next = if x <= 0 {
            b.min
        } else if x >= extent {
            if top > b.min { top } else { b.min }
        } else {
            let span = top.to_f64() - b.min.to_f64();
            T::from_f64(b.min.to_f64() + f64::from(x) * span / f64::from(extent))
        };
        g.set_as(next)
    }

    fn px<T: RangeNum>(&self, n: &RangeNames<'_>, length: i32) -> Result<Option<PxCoords>, VariableError> {
        let b = self.bounds::<T>(n)?;
        let val: T = self.get_variable(n.value)?.lock()?.try_get_as()?;
        let (min, max, vis) = (b.min.to_f64(), b.max.to_f64(), b.vis.to_f64());
        // Fewer than one value step per track: no meaningful thumb position.
        if min >= max - vis || max - vis - min < 1.0 {
            return Ok(None);
        }
        let length = f64::from(length);
        let len = vis * length / (max - min);
        let extent = length - len;
        let x = (val.to_f64() - min) * extent / (max - vis - min);
        Ok(Some(PxCoords {
            x: x as i32,
            len: len as i32,
        }))
    }
}

macro_rules! dispatch {
    ($self:ident, $n:ident, $method:ident ( $($arg:expr),* )) => {
        match $self.value_type($n)? {
            VarType::Int | VarType::Sint32 => $self.$method::<i32>($n $(, $arg)*),
            VarType::Uint | VarType::Uint32 => $self.$method::<u32>($n $(, $arg)*),
            VarType::Long | VarType::Sint64 => $self.$method::<i64>($n $(, $arg)*),
            VarType::Ulong | VarType::Uint64 => $self.$method::<u64>($n $(, $arg)*),
            VarType::Sint8 => $self.$method::<i8>($n $(, $arg)*),
            VarType::Uint8 => $self.$method::<u8>($n $(, $arg)*),
            VarType::Sint16 => $self.$method::<i16>($n $(, $arg)*),
            VarType::Uint16 => $self.$method::<u16>($n $(, $arg)*),
            VarType::Float => $self.$method::<f32>($n $(, $arg)*),
            VarType::Double | VarType::LongDouble => $self.$method::<f64>($n $(, $arg)*),
            ty @ (VarType::String | VarType::Pointer) => Err(VariableError::NotNumeric {
                name: $n.value.to_owned(),
                ty,
            }),
        }
    };
}

impl Object {
    /// Add `inc` to the value, saturating at `max - visible`. Returns
    /// whether the value clamped.
    pub fn increment(&self, names: &RangeNames<'_>) -> Result<bool, VariableError> {
        dispatch!(self, names, step(true))
    }

    /// Subtract `inc` from the value, saturating at `min`. Returns whether
    /// the value clamped.
    pub fn decrement(&self, names: &RangeNames<'_>) -> Result<bool, VariableError> {
        dispatch!(self, names, step(false))
    }

    /// Set the value from a pixel position `x` along a track `extent`
    /// pixels long.
    pub fn seek_to_px(&self, names: &RangeNames<'_>, x: i32, extent: i32) -> Result<(), VariableError> {
        dispatch!(self, names, seek_px(x, extent))
    }

    /// Thumb position and length for a track `length` pixels long, or
    /// `None` when the whole range is visible.
    pub fn px_coords(&self, names: &RangeNames<'_>, length: i32) -> Result<Option<PxCoords>, VariableError> {
        dispatch!(self, names, px(length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use crate::variable::Slot;

    fn scrollbar(value: &Slot<i32>) -> ObjectRef {
        let sb = Object::plain("sb").unwrap();
        sb.bind_int("value", value).unwrap();
        sb.set_int("min", 0).unwrap();
        sb.set_int("max", 10).unwrap();
        sb.set_int("visible", 2).unwrap();
        sb.set_int("inc", 1).unwrap();
        sb
    }

    #[test]
    fn increment_clamps_at_max_minus_visible() {
        let v = Slot::new(0);
        let sb = scrollbar(&v);
        let n = RangeNames::default();
        for _ in 0..8 {
            assert!(!sb.increment(&n).unwrap());
        }
        assert_eq!(v.get(), 8);
        assert!(sb.increment(&n).unwrap());
        assert_eq!(v.get(), 8);
    }

    #[test]
    fn decrement_clamps_at_min() {
        let v = Slot::new(2);
        let sb = scrollbar(&v);
        let n = RangeNames::default();
        assert!(!sb.decrement(&n).unwrap());
        assert!(!sb.decrement(&n).unwrap());
        assert_eq!(v.get(), 0);
        assert!(sb.decrement(&n).unwrap());
        assert_eq!(v.get(), 0);
    }

    #[test]
    fn unsigned_never_wraps() {
        let o = Object::plain("o").unwrap();
        o.set_uint8("value", 250).unwrap();
        o.set_uint8("min", 0).unwrap();
        o.set_uint8("max", 254).unwrap();
        o.set_uint8("inc", 20).unwrap();
        let n = RangeNames::default();
        assert!(o.increment(&n).unwrap());
        assert_eq!(o.get_uint8("value").unwrap(), 254);
        o.set_uint8("value", 5).unwrap();
        assert!(o.decrement(&n).unwrap());
        assert_eq!(o.get_uint8("value").unwrap(), 0);
    }

    #[test]
    fn float_ranges() {
        let o = Object::plain("o").unwrap();
        o.set_double("value", 0.5).unwrap();
        o.set_double("min", 0.0).unwrap();
        o.set_double("max", 1.0).unwrap();
        o.set_double("inc", 0.25).unwrap();
        let n = RangeNames::default();
        assert!(!o.increment(&n).unwrap());
        assert!(!o.increment(&n).unwrap());
        assert!(o.increment(&n).unwrap());
        assert_eq!(o.get_double("value").unwrap(), 1.0);
    }

    #[test]
    fn seek_and_px_coords() {
        let v = Slot::new(0);
        let sb = scrollbar(&v);
        let n = RangeNames::default();
        sb.seek_to_px(&n, 50, 100).unwrap();
        assert_eq!(v.get(), 4);
        sb.seek_to_px(&n, 200, 100).unwrap();
        assert_eq!(v.get(), 8);
        sb.seek_to_px(&n, -3, 100).unwrap();
        assert_eq!(v.get(), 0);

        v.set(4);
        let px = sb.px_coords(&n, 100).unwrap().unwrap();
        assert_eq!(px, PxCoords { x: 40, len: 20 });

        sb.set_int("visible", 10).unwrap();
        assert_eq!(sb.px_coords(&n, 100).unwrap(), None);
    }

    #[test]
    fn sub_unit_float_span_has_no_px_coords() {
        let o = Object::plain("o").unwrap();
        o.set_double("value", 0.25).unwrap();
        o.set_double("min", 0.0).unwrap();
        o.set_double("max", 1.5).unwrap();
        o.set_double("visible", 0.75).unwrap();
        let n = RangeNames::default();
        assert_eq!(o.px_coords(&n, 100).unwrap(), None);

        o.set_double("max", 10.0).unwrap();
        o.set_double("visible", 2.0).unwrap();
        o.set_double("value", 4.0).unwrap();
        assert_eq!(o.px_coords(&n, 100).unwrap(), Some(PxCoords { x: 40, len: 20 }));
    }

    #[test]
    fn custom_names_and_missing_bounds() {
        let o = Object::plain("o").unwrap();
        o.set_int("pos", 0).unwrap();
        o.set_int("lo", 0).unwrap();
        o.set_int("hi", 3).unwrap();
        let n = RangeNames {
            value: "pos",
            min: "lo",
            max: "hi",
            ..RangeNames::default()
        };
        assert!(!o.increment(&n).unwrap());
        assert_eq!(o.get_int("pos").unwrap(), 1);
        assert!(matches!(
            o.increment(&RangeNames::default()),
            Err(VariableError::NotFound(_))
        ));
        o.set_string("value", "x").unwrap();
        assert!(matches!(
            o.increment(&RangeNames::default()),
            Err(VariableError::NotNumeric { .. })
        ));
    }
}
