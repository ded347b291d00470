//! Object tree serialization.
//!
//! A stream starts with an 8-byte magic and a format version, followed by
//! the root node. Each node is written as:
//!
//! ```text
//! class path     string
//! class version  u32 major, u32 minor
//! name           string
//! flags          u32 (persistent flags only)
//! variables      u32 count, then (name string, type code u8, value)
//! class payload  u32 length, then bytes written by the class `save` slots
//! children       u32 count, then each child node
//! ```
//!
//! Strings are length-prefixed as in [`DataSource::write_string`]; all
//! integers follow the stream's byte order.
//!
//! # Failure Modes
//!
//! - Pointer variables, bindings onto caller-owned slots, and dependencies
//!   are not written. They are process-local.
//! - Children flagged `NON_PERSISTENT` are skipped with their subtrees.
//! - A class payload must be consumed exactly by the `load` slots, otherwise
//!   loading fails with [`PersistError::Payload`]. Payloads longer than
//!   [`PAYLOAD_MAX`] are rejected before anything is allocated.
//! - A node saved by a different major version of its class fails with
//!   [`PersistError::Class`].

use std::path::Path;
use std::sync::Arc;

use arbor_io::{ConstCoreSource, CoreSource, DataSource, FileSource};

use crate::class::{ClassRegistry, Version};
use crate::error::PersistError;
use tracing::{debug, trace};
use crate::object::{Object, ObjectFlags, ObjectRef};
use crate::value::{Value, VarType};

/// Stream signature.
pub const MAGIC: &[u8; 8] = b"ARBOROBJ";

/// Format version written by [`save_tree`]. Streams with another major
/// version are rejected.
pub const FORMAT_VERSION: Version = Version::new(1, 0);

/// Largest class payload accepted by [`load_tree`].
pub const PAYLOAD_MAX: usize = 1 << 24;

// ── Saving ─────────────────────────────────────────────────────────────────

/// Write `root` and its persistent descendants to `ds`.
pub fn save_tree(root: &ObjectRef, ds: &mut DataSource) -> Result<(), PersistError> {
    ds.write_all(MAGIC)?;
    ds.write_u32(FORMAT_VERSION.major)?;
    ds.write_u32(FORMAT_VERSION.minor)?;
    save_node(root, ds)?;
    debug!(root = %root.name(), "object tree saved");
    Ok(())
}

/// Save `root` to a file at `path`, replacing any existing file.
pub fn save_tree_to_file(root: &ObjectRef, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let mut ds = DataSource::new(FileSource::create(path)?);
    save_tree(root, &mut ds)?;
    ds.flush()?;
    Ok(())
}

fn save_node(obj: &ObjectRef, ds: &mut DataSource) -> Result<(), PersistError> {
    let class = obj.class();
    ds.write_string(class.hier())?;
    ds.write_u32(class.version().major)?;
    ds.write_u32(class.version().minor)?;
    ds.write_string(&obj.name())?;
    ds.write_u32((obj.flags() & ObjectFlags::SAVED).bits())?;

    let mut vars = Vec::new();
    for var in obj.variables() {
        if var.is_bound() || var.ty() == VarType::Pointer {
            continue;
        }
        vars.push((var.name().to_owned(), var.lock()?.get()));
    }
    ds.write_u32(vars.len() as u32)?;
    for (name, value) in &vars {
        ds.write_string(name)?;
        ds.write_u8(value.ty().code())?;
        write_value(ds, value)?;
    }

    let mut payload = DataSource::new(CoreSource::auto());
    payload.set_byte_order(ds.byte_order());
    for c in class.lineage() {
        if let Some(save) = c.ops().save {
            save(obj, &mut payload)?;
        }
    }
    let bytes = payload.bytes().unwrap_or_default();
    ds.write_u32(bytes.len() as u32)?;
    ds.write_all(bytes)?;

    let children: Vec<ObjectRef> = obj
        .children()
        .into_iter()
        .filter(|c| !c.has_flags(ObjectFlags::NON_PERSISTENT))
        .collect();
    ds.write_u32(children.len() as u32)?;
    for child in &children {
        save_node(child, ds)?;
    }
    trace!(object = %obj.name(), vars = vars.len(), children = children.len(), "node saved");
    Ok(())
}

fn write_value(ds: &mut DataSource, v: &Value) -> Result<(), PersistError> {
    match v {
        Value::Int(x) | Value::Sint32(x) => ds.write_i32(*x)?,
        Value::Uint(x) | Value::Uint32(x) => ds.write_u32(*x)?,
        Value::Long(x) | Value::Sint64(x) => ds.write_i64(*x)?,
        Value::Ulong(x) | Value::Uint64(x) => ds.write_u64(*x)?,
        Value::Float(x) => ds.write_f32(*x)?,
        Value::Double(x) | Value::LongDouble(x) => ds.write_f64(*x)?,
        Value::Uint8(x) => ds.write_u8(*x)?,
        Value::Sint8(x) => ds.write_i8(*x)?,
        Value::Uint16(x) => ds.write_u16(*x)?,
        Value::Sint16(x) => ds.write_i16(*x)?,
        Value::String(s) => ds.write_string(s)?,
        Value::Pointer(_) => return Err(PersistError::BadTypeCode(VarType::Pointer.code())),
    }
    Ok(())
}

// ── Loading ────────────────────────────────────────────────────────────────

/// Read a tree written by [`save_tree`], resolving classes through the
/// global registry.
pub fn load_tree(ds: &mut DataSource) -> Result<ObjectRef, PersistError> {
    load_tree_with(ClassRegistry::global(), ds)
}

/// Read a tree written by [`save_tree`], resolving classes through
/// `registry`.
pub fn load_tree_with(
    registry: &ClassRegistry,
    ds: &mut DataSource,
) -> Result<ObjectRef, PersistError> {
    let mut magic = [0u8; 8];
    ds.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PersistError::BadMagic);
    }
    let major = ds.read_u32()?;
    let minor = ds.read_u32()?;
    if major != FORMAT_VERSION.major {
        return Err(PersistError::Version { major, minor });
    }
    let (root, flags) = load_node(registry, ds)?;
    root.set_flags(flags);
    debug!(root = %root.name(), "object tree loaded");
    Ok(root)
}

/// Load a tree from the file at `path`.
pub fn load_tree_from_file(path: impl AsRef<Path>) -> Result<ObjectRef, PersistError> {
    let mut ds = DataSource::new(FileSource::open(path)?);
    load_tree(&mut ds)
}

/// Load one node and its subtree. The node's saved flags are returned
/// rather than applied, so that `NAME_ON_ATTACH` cannot rename it while the
/// caller attaches it.
fn load_node(
    registry: &ClassRegistry,
    ds: &mut DataSource,
) -> Result<(ObjectRef, ObjectFlags), PersistError> {
    let class = registry.lookup(&ds.read_string()?)?;
    let version = Version::new(ds.read_u32()?, ds.read_u32()?);
    if version.major != class.version().major {
        return Err(PersistError::Class {
            class: class.name().to_owned(),
            message: format!("saved as version {version}, loader is {}", class.version()),
        });
    }
    let name = ds.read_string()?;
    let flags = ObjectFlags::from_bits_truncate(ds.read_u32()?) & ObjectFlags::SAVED;

    let obj = Object::new(&class, &name)?;

    let nvars = ds.read_u32()?;
    for _ in 0..nvars {
        let vname = ds.read_string()?;
        let code = ds.read_u8()?;
        let ty = VarType::from_code(code).ok_or(PersistError::BadTypeCode(code))?;
        let value = read_value(ds, ty)?;
        obj.set_value(&vname, value)?;
    }

    let len = ds.read_u32()? as usize;
    if len > PAYLOAD_MAX {
        return Err(PersistError::PayloadTooLarge {
            class: class.name().to_owned(),
            len: len as u64,
            max: PAYLOAD_MAX,
        });
    }
    let mut bytes = vec![0u8; len];
    ds.read_exact(&mut bytes)?;
    if len > 0 {
        let mut payload = DataSource::new(ConstCoreSource::new(bytes));
        payload.set_byte_order(ds.byte_order());
        for c in class.lineage() {
            if let Some(load) = c.ops().load {
                load(&obj, &mut payload, version)?;
            }
        }
        let consumed = payload.tell()?;
        if consumed != len as u64 {
            return Err(PersistError::Payload {
                class: class.name().to_owned(),
                declared: len as u64,
                consumed,
            });
        }
    }

    let nchildren = ds.read_u32()?;
    for _ in 0..nchildren {
        let (child, child_flags) = load_node(registry, ds)?;
        obj.attach(&child)?;
        child.set_flags(child_flags);
    }
    Ok((obj, flags))
}

fn read_value(ds: &mut DataSource, ty: VarType) -> Result<Value, PersistError> {
    Ok(match ty {
        VarType::Int => Value::Int(ds.read_i32()?),
        VarType::Sint32 => Value::Sint32(ds.read_i32()?),
        VarType::Uint => Value::Uint(ds.read_u32()?),
        VarType::Uint32 => Value::Uint32(ds.read_u32()?),
        VarType::Long => Value::Long(ds.read_i64()?),
        VarType::Sint64 => Value::Sint64(ds.read_i64()?),
        VarType::Ulong => Value::Ulong(ds.read_u64()?),
        VarType::Uint64 => Value::Uint64(ds.read_u64()?),
        VarType::Float => Value::Float(ds.read_f32()?),
        VarType::Double => Value::Double(ds.read_f64()?),
        VarType::LongDouble => Value::LongDouble(ds.read_f64()?),
        VarType::Uint8 => Value::Uint8(ds.read_u8()?),
        VarType::Sint8 => Value::Sint8(ds.read_i8()?),
        VarType::Uint16 => Value::Uint16(ds.read_u16()?),
        VarType::Sint16 => Value::Sint16(ds.read_i16()?),
        VarType::String => Value::String(ds.read_string()?),
        VarType::Pointer => return Err(PersistError::BadTypeCode(ty.code())),
    })
}

impl Object {
    /// Save this object and its persistent descendants to `ds`.
    pub fn save(self: &Arc<Self>, ds: &mut DataSource) -> Result<(), PersistError> {
        save_tree(self, ds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Class, ClassOps};
    use crate::variable::Slot;

    fn roundtrip(root: &ObjectRef) -> ObjectRef {
        let mut ds = DataSource::new(CoreSource::auto());
        save_tree(root, &mut ds).unwrap();
        let bytes = ds.bytes().unwrap().to_vec();
        let mut rd = DataSource::new(ConstCoreSource::new(bytes));
        load_tree(&mut rd).unwrap()
    }

    #[test]
    fn variables_and_flags_survive() {
        let root = Object::plain("root").unwrap();
        root.set_int("x", -7).unwrap();
        root.set_string("title", "hello").unwrap();
        root.set_double("ratio", 0.25).unwrap();
        root.set_uint16("port", 8080).unwrap();
        root.set_flags(ObjectFlags::READONLY | ObjectFlags::VISIBLE);

        let back = roundtrip(&root);
        assert_eq!(back.name(), "root");
        assert_eq!(back.get_int("x").unwrap(), -7);
        assert_eq!(back.get_string("title").unwrap(), "hello");
        assert_eq!(back.get_double("ratio").unwrap(), 0.25);
        assert_eq!(back.get_uint16("port").unwrap(), 8080);
        assert!(back.has_flags(ObjectFlags::READONLY));
        assert!(!back.has_flags(ObjectFlags::VISIBLE));
    }

    #[test]
    fn bindings_pointers_and_volatile_children_are_skipped() {
        let root = Object::plain("root").unwrap();
        let slot = Slot::new(3);
        root.bind_int("bound", &slot).unwrap();
        root.set_pointer("self", crate::value::Pointer::object(&root))
            .unwrap();
        let keep = Object::plain("keep").unwrap();
        let temp = Object::plain("temp").unwrap();
        temp.set_flags(ObjectFlags::NON_PERSISTENT);
        root.attach(&keep).unwrap();
        root.attach(&temp).unwrap();

        let back = roundtrip(&root);
        assert!(back.find_variable("bound").is_none());
        assert!(back.find_variable("self").is_none());
        let names: Vec<String> = back.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["keep".to_owned()]);
    }

    #[test]
    fn class_payload_roundtrip() {
        fn save(obj: &ObjectRef, ds: &mut DataSource) -> Result<(), PersistError> {
            ds.write_u32(obj.get_uint("secret").unwrap_or(0) * 2)?;
            Ok(())
        }
        fn load(obj: &ObjectRef, ds: &mut DataSource, v: Version) -> Result<(), PersistError> {
            assert_eq!(v, Version::new(2, 1));
            obj.set_uint("restored", ds.read_u32()?)?;
            Ok(())
        }
        let class = Class::new("PersistPayloadWidget")
            .with_version(2, 1)
            .with_ops(ClassOps {
                save: Some(save),
                load: Some(load),
                ..ClassOps::default()
            })
            .into_arc();
        ClassRegistry::global().register(&class).unwrap();

        let obj = Object::new(&class, "w").unwrap();
        obj.set_uint("secret", 21).unwrap();
        let back = roundtrip(&obj);
        assert!(Arc::ptr_eq(back.class(), &class));
        assert_eq!(back.get_uint("restored").unwrap(), 42);
    }

    #[test]
    fn rejects_foreign_streams() {
        let mut ds = DataSource::new(ConstCoreSource::new(b"NOTARBOR\0\0\0\x01".to_vec()));
        assert!(matches!(load_tree(&mut ds), Err(PersistError::BadMagic)));

        let mut w = DataSource::new(CoreSource::auto());
        w.write_all(MAGIC).unwrap();
        w.write_u32(9).unwrap();
        w.write_u32(0).unwrap();
        let mut ds = DataSource::new(ConstCoreSource::new(w.bytes().unwrap().to_vec()));
        assert!(matches!(
            load_tree(&mut ds),
            Err(PersistError::Version { major: 9, .. })
        ));
    }

    #[test]
    fn class_major_version_mismatch_is_rejected() {
        let saved = Class::new("PersistVersioned").with_version(2, 0).into_arc();
        let obj = Object::new(&saved, "v").unwrap();
        let mut ds = DataSource::new(CoreSource::auto());
        save_tree(&obj, &mut ds).unwrap();
        let bytes = ds.bytes().unwrap().to_vec();

        let reg = ClassRegistry::new();
        reg.register(&Class::new("PersistVersioned").with_version(3, 0).into_arc())
            .unwrap();
        let mut rd = DataSource::new(ConstCoreSource::new(bytes.clone()));
        assert!(matches!(
            load_tree_with(&reg, &mut rd),
            Err(PersistError::Class { .. })
        ));

        let reg = ClassRegistry::new();
        reg.register(&Class::new("PersistVersioned").with_version(2, 7).into_arc())
            .unwrap();
        let mut rd = DataSource::new(ConstCoreSource::new(bytes));
        assert_eq!(load_tree_with(&reg, &mut rd).unwrap().name(), "v");
    }

    #[test]
    fn oversized_payload_length_is_rejected() {
        let obj = Object::plain("p").unwrap();
        let mut ds = DataSource::new(CoreSource::auto());
        save_tree(&obj, &mut ds).unwrap();
        let mut bytes = ds.bytes().unwrap().to_vec();
        // A leaf node ends with the payload length and the child count.
        let n = bytes.len();
        bytes[n - 8..n - 4].copy_from_slice(&[0xff; 4]);
        let mut rd = DataSource::new(ConstCoreSource::new(bytes));
        assert!(matches!(
            load_tree(&mut rd),
            Err(PersistError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_class_is_an_error() {
        let ghost = Class::new("PersistGhost").into_arc();
        let obj = Object::new(&ghost, "g").unwrap();
        let mut ds = DataSource::new(CoreSource::auto());
        save_tree(&obj, &mut ds).unwrap();
        let mut rd = DataSource::new(ConstCoreSource::new(ds.bytes().unwrap().to_vec()));
        assert!(matches!(load_tree(&mut rd), Err(PersistError::Registry(_))));
    }
}
