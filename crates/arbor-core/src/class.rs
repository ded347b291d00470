//! Class descriptors and the class registry.
//!
//! # Design
//!
//! A [`Class`] is a plain descriptor: a name, an optional superclass, a
//! version and a table of optional function slots ([`ClassOps`]). The
//! inheritance chain is flattened into a colon-delimited path
//! (`"AG_Widget:AG_Window"`), and "is-a" tests are string pattern matches
//! over that path (see [`of_class_path`]).
//!
//! Namespaces abbreviate prefixed names: with `Agar` mapped to `AG_`, the
//! pattern `Agar(Widget:Window)` expands to `AG_Widget:AG_Window`.
//!
//! # Invariants
//!
//! 1. The base class is named `Object`; it is the implicit root of every
//!    chain and does not appear in any other class's path.
//! 2. `init` slots run root to leaf; `reset` and `destroy` slots run leaf to
//!    root.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use arbor_io::DataSource;
use parking_lot::RwLock;

use crate::error::{ClassError, PersistError};
use crate::object::ObjectRef;

/// Name of the implicit root class.
pub const BASE_CLASS: &str = "Object";

/// Class (or stream) version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub type LifecycleFn = fn(&ObjectRef);
pub type LoadFn = fn(&ObjectRef, &mut DataSource, Version) -> Result<(), PersistError>;
pub type SaveFn = fn(&ObjectRef, &mut DataSource) -> Result<(), PersistError>;
pub type EditFn = fn(&ObjectRef) -> Option<ObjectRef>;
pub type NewDataFn = fn() -> Box<dyn Any + Send>;

/// Optional per-class function slots.
#[derive(Clone, Copy, Default)]
pub struct ClassOps {
    /// Builds the instance's private data.
    pub new_data: Option<NewDataFn>,
    pub init: Option<LifecycleFn>,
    pub reset: Option<LifecycleFn>,
    pub destroy: Option<LifecycleFn>,
    pub load: Option<LoadFn>,
    pub save: Option<SaveFn>,
    /// Returns an editor object for the instance.
    pub edit: Option<EditFn>,
}

impl fmt::Debug for ClassOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassOps")
            .field("new_data", &self.new_data.is_some())
            .field("init", &self.init.is_some())
            .field("reset", &self.reset.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("load", &self.load.is_some())
            .field("save", &self.save.is_some())
            .field("edit", &self.edit.is_some())
            .finish()
    }
}

/// A class descriptor.
#[derive(Debug, Clone)]
pub struct Class {
    name: String,
    hier: String,
    version: Version,
    superclass: Option<Arc<Class>>,
    ops: ClassOps,
}

impl Class {
    /// A new direct subclass of `Object`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            hier: name.clone(),
            name,
            version: Version::default(),
            superclass: Some(Self::base()),
            ops: ClassOps::default(),
        }
    }

    /// The shared root class.
    #[must_use]
    pub fn base() -> Arc<Class> {
        static BASE: OnceLock<Arc<Class>> = OnceLock::new();
        Arc::clone(BASE.get_or_init(|| {
            Arc::new(Class {
                name: BASE_CLASS.to_owned(),
                hier: BASE_CLASS.to_owned(),
                version: Version::default(),
                superclass: None,
                ops: ClassOps::default(),
            })
        }))
    }

    #[must_use]
    pub fn with_superclass(mut self, superclass: &Arc<Class>) -> Self {
        self.hier = if superclass.is_base() {
            self.name.clone()
        } else {
            format!("{}:{}", superclass.hier, self.name)
        };
        self.superclass = Some(Arc::clone(superclass));
        self
    }

    #[must_use]
    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.version = Version::new(major, minor);
        self
    }

    #[must_use]
    pub fn with_ops(mut self, ops: ClassOps) -> Self {
        self.ops = ops;
        self
    }

    #[must_use]
    pub fn into_arc(self) -> Arc<Class> {
        Arc::new(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Colon-delimited inheritance path, root first.
    #[must_use]
    pub fn hier(&self) -> &str {
        &self.hier
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    #[must_use]
    pub fn ops(&self) -> &ClassOps {
        &self.ops
    }

    #[must_use]
    pub fn is_base(&self) -> bool {
        self.superclass.is_none()
    }

    /// The chain from the root class down to `self`.
    #[must_use]
    pub fn lineage(&self) -> Vec<&Class> {
        let mut chain = vec![self];
        let mut cur = self;
        while let Some(sup) = cur.superclass.as_deref() {
            chain.push(sup);
            cur = sup;
        }
        chain.reverse();
        chain
    }

    /// The leaf-most slot selected by `pick`.
    pub(crate) fn find_op<T: Copy>(&self, pick: impl Fn(&ClassOps) -> Option<T>) -> Option<T> {
        self.lineage().into_iter().rev().find_map(|c| pick(&c.ops))
    }

    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.lineage()
            .iter()
            .any(|c| c.name == other.name && c.hier == other.hier)
    }

    /// Pattern match against this class's path. Namespaced patterns are
    /// expanded through the global registry first.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        if self.is_base() {
            return pattern == BASE_CLASS || pattern == "*";
        }
        match ClassRegistry::global().expand(pattern) {
            Ok(p) => of_class_path(&self.hier, &p),
            Err(_) => false,
        }
    }
}

/// Match a class path against a pattern.
///
/// Segments are separated by `:`. A `*` segment matches exactly one path
/// segment. A trailing `:*` matches the prefix class itself and any of its
/// descendants. A bare `*` matches everything.
#[must_use]
pub fn of_class_path(hier: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let path: Vec<&str> = hier.split(':').collect();
    let (pat, open) = match pattern.strip_suffix(":*") {
        Some(prefix) => (prefix, true),
        None => (pattern, false),
    };
    let pat: Vec<&str> = pat.split(':').collect();
    if open {
        if path.len() < pat.len() {
            return false;
        }
    } else if path.len() != pat.len() {
        return false;
    }
    pat.iter()
        .zip(&path)
        .all(|(p, seg)| *p == "*" || p == seg)
}

// ── Registry ─────────────────────────────────────────────────────────

/// Registered classes and namespaces.
#[derive(Debug)]
pub struct ClassRegistry {
    classes: RwLock<AHashMap<String, Arc<Class>>>,
    namespaces: RwLock<AHashMap<String, String>>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// A registry holding the base class and the `Agar` namespace.
    #[must_use]
    pub fn new() -> Self {
        let mut classes = AHashMap::new();
        classes.insert(BASE_CLASS.to_owned(), Class::base());
        let mut namespaces = AHashMap::new();
        namespaces.insert("Agar".to_owned(), "AG_".to_owned());
        Self {
            classes: RwLock::new(classes),
            namespaces: RwLock::new(namespaces),
        }
    }

    pub fn global() -> &'static ClassRegistry {
        static GLOBAL: OnceLock<ClassRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ClassRegistry::new)
    }

    /// Register a class. Registering the same descriptor twice is a no-op.
    pub fn register(&self, class: &Arc<Class>) -> Result<(), ClassError> {
        let mut classes = self.classes.write();
        match classes.get(class.name()) {
            Some(existing) if Arc::ptr_eq(existing, class) => Ok(()),
            Some(_) => Err(ClassError::AlreadyRegistered(class.name().to_owned())),
            None => {
                tracing::debug!(class = class.name(), hier = class.hier(), "class registered");
                classes.insert(class.name().to_owned(), Arc::clone(class));
                Ok(())
            }
        }
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Class>> {
        if name == BASE_CLASS {
            return None;
        }
        self.classes.write().remove(name)
    }

    /// Look up by class name or by (possibly namespaced) path; a path
    /// resolves to its last segment.
    pub fn lookup(&self, spec: &str) -> Result<Arc<Class>, ClassError> {
        let expanded = self.expand(spec)?;
        let leaf = expanded.rsplit(':').next().unwrap_or(&expanded);
        self.classes
            .read()
            .get(leaf)
            .cloned()
            .ok_or_else(|| ClassError::NotFound(spec.to_owned()))
    }

    #[must_use]
    pub fn classes(&self) -> Vec<Arc<Class>> {
        self.classes.read().values().cloned().collect()
    }

    pub fn register_namespace(&self, name: &str, prefix: &str) -> Result<(), ClassError> {
        let mut ns = self.namespaces.write();
        if ns.contains_key(name) {
            return Err(ClassError::NamespaceExists(name.to_owned()));
        }
        ns.insert(name.to_owned(), prefix.to_owned());
        Ok(())
    }

    pub fn unregister_namespace(&self, name: &str) -> bool {
        self.namespaces.write().remove(name).is_some()
    }

    /// Expand `Ns(A:B)` groups into prefixed segments. Wildcard segments are
    /// left alone.
    pub fn expand(&self, pattern: &str) -> Result<String, ClassError> {
        if !pattern.contains('(') {
            return Ok(pattern.to_owned());
        }
        let ns = self.namespaces.read();
        let mut out = String::with_capacity(pattern.len() + 8);
        let mut rest = pattern;
        while let Some(open) = rest.find('(') {
            let head = &rest[..open];
            let (before, ns_name) = match head.rfind(':') {
                Some(i) => (&head[..=i], &head[i + 1..]),
                None => ("", head),
            };
            let close = rest[open..]
                .find(')')
                .map(|i| open + i)
                .ok_or_else(|| ClassError::BadPattern(pattern.to_owned()))?;
            let prefix = ns
                .get(ns_name)
                .ok_or_else(|| ClassError::UnknownNamespace(ns_name.to_owned()))?;
            out.push_str(before);
            for (i, seg) in rest[open + 1..close].split(':').enumerate() {
                if i > 0 {
                    out.push(':');
                }
                if seg != "*" {
                    out.push_str(prefix);
                }
                out.push_str(seg);
            }
            rest = &rest[close + 1..];
        }
        if rest.contains(')') {
            return Err(ClassError::BadPattern(pattern.to_owned()));
        }
        out.push_str(rest);
        Ok(out)
    }
}
