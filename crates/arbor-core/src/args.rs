//! Event arguments and the format mini-language.
//!
//! A format string lists one conversion per argument:
//!
//! | Conversion | Kind |
//! |------------|------|
//! | `%p` | pointer |
//! | `%i` / `%u` | int / uint |
//! | `%li` / `%lu` | long / ulong |
//! | `%f` / `%d` / `%ld` | float / double / long double |
//! | `%s` | string |
//!
//! A conversion may be followed by `(name)` to make the argument reachable
//! by name. Spaces and commas between conversions are ignored, so
//! `"%i(x), %i(y)"` and `"%i(x)%i(y)"` are the same format.

use smallvec::SmallVec;

use crate::error::EventError;
use crate::value::{Value, VarType};

/// Capacity of an event's argument vector, counting the receiver in slot
/// 0 and the sender slot after the last argument.
pub const EVENT_ARGS_MAX: usize = 8;

/// One (optionally named) argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Value,
}

impl Arg {
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

pub type ArgList = SmallVec<[Arg; EVENT_ARGS_MAX]>;

/// A parsed conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub ty: VarType,
    pub name: Option<String>,
}

fn bad(format: &str, reason: &'static str) -> EventError {
    EventError::BadFormat {
        format: format.to_owned(),
        reason,
    }
}

/// Parse a format string into its conversions.
pub fn parse_format(format: &str) -> Result<Vec<ArgSpec>, EventError> {
    let mut specs = Vec::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ' ' | ',' => continue,
            '%' => {}
            _ => return Err(bad(format, "expected `%`")),
        }
        let long = chars.next_if_eq(&'l').is_some();
        let ty = match (long, chars.next()) {
            (false, Some('p')) => VarType::Pointer,
            (false, Some('s')) => VarType::String,
            (false, Some('i')) => VarType::Int,
            (false, Some('u')) => VarType::Uint,
            (false, Some('f')) => VarType::Float,
            (false, Some('d')) => VarType::Double,
            (true, Some('i')) => VarType::Long,
            (true, Some('u')) => VarType::Ulong,
            (true, Some('d')) => VarType::LongDouble,
            (_, None) => return Err(bad(format, "truncated conversion")),
            _ => return Err(bad(format, "unknown conversion")),
        };
        let name = if chars.next_if_eq(&'(').is_some() {
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(')') => break,
                    Some(ch) => name.push(ch),
                    None => return Err(bad(format, "unterminated argument name")),
                }
            }
            if name.is_empty() {
                return Err(bad(format, "empty argument name"));
            }
            Some(name)
        } else {
            None
        };
        specs.push(ArgSpec { ty, name });
    }
    Ok(specs)
}

/// Parse `format` and pair each conversion with the matching value.
///
/// Values must share the representation of their conversion (see
/// [`Value::coerce`]); they are re-tagged to the declared kind.
pub fn build_args(format: &str, values: &[Value]) -> Result<ArgList, EventError> {
    let specs = parse_format(format)?;
    if specs.len() != values.len() {
        return Err(EventError::ArgCount {
            format: format.to_owned(),
            expected: specs.len(),
            got: values.len(),
        });
    }
    if specs.len() > EVENT_ARGS_MAX - 2 {
        return Err(EventError::TooManyArgs {
            max: EVENT_ARGS_MAX - 2,
        });
    }
    specs
        .into_iter()
        .zip(values)
        .enumerate()
        .map(|(i, (spec, v))| {
            let actual = v.ty();
            let value = v.clone().coerce(spec.ty).ok_or(EventError::ArgType {
                index: i + 1,
                expected: spec.ty,
                actual,
            })?;
            Ok(Arg {
                name: spec.name,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_conversion() {
        let specs = parse_format("%p %s %i %u %f %d %li %lu %ld").unwrap();
        let tys: Vec<_> = specs.iter().map(|s| s.ty).collect();
        assert_eq!(
            tys,
            [
                VarType::Pointer,
                VarType::String,
                VarType::Int,
                VarType::Uint,
                VarType::Float,
                VarType::Double,
                VarType::Long,
                VarType::Ulong,
                VarType::LongDouble,
            ]
        );
    }

    #[test]
    fn named_conversions_and_separators() {
        let specs = parse_format("%i(x), %i(y)%s").unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].name.as_deref(), Some("x"));
        assert_eq!(specs[1].name.as_deref(), Some("y"));
        assert_eq!(specs[2].name, None);
        assert!(parse_format("").unwrap().is_empty());
    }

    #[test]
    fn malformed_formats() {
        assert!(parse_format("%q").is_err());
        assert!(parse_format("%").is_err());
        assert!(parse_format("%i(x").is_err());
        assert!(parse_format("%i()").is_err());
        assert!(parse_format("i").is_err());
        assert!(parse_format("%lp").is_err());
    }

    #[test]
    fn build_checks_count_and_kind() {
        let args = build_args("%i(n) %li", &[5.into(), 9i64.into()]).unwrap();
        assert_eq!(args[0], Arg::named("n", 5));
        assert_eq!(args[1].value, Value::Long(9));

        assert!(matches!(
            build_args("%i", &[]),
            Err(EventError::ArgCount { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            build_args("%s", &[1.into()]),
            Err(EventError::ArgType { index: 1, .. })
        ));
    }

    #[test]
    fn build_enforces_capacity() {
        let values: Vec<Value> = (0..7).map(Value::from).collect();
        assert!(matches!(
            build_args("%i %i %i %i %i %i %i", &values),
            Err(EventError::TooManyArgs { .. })
        ));
        assert!(build_args("%i %i %i %i %i %i", &values[..6]).is_ok());
    }
}
