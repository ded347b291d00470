#![forbid(unsafe_code)]

//! Core: object tree, typed variable bindings, classes, and event dispatch.
//!
//! Every node in an arbor application is an [`Object`]: an instance of a
//! [`Class`] that sits in a tree, owns a list of named [`Variable`]s, and a
//! list of named event handlers. Widgets bind their state through variables
//! (either by value or onto caller-owned [`Slot`]s) and talk to each other
//! by posting events.

pub mod args;
pub mod class;
pub mod detach;
pub mod error;
pub mod event;
pub mod logging;
pub mod object;
pub mod persist;
pub mod range;
pub mod value;
pub mod variable;

pub use args::{Arg, ArgList, EVENT_ARGS_MAX};
pub use class::{Class, ClassOps, ClassRegistry, Version, of_class_path};
pub use detach::{DetachQueue, QueueOutcome};
pub use error::{ClassError, EventError, ObjectError, PersistError, VariableError};
pub use event::{EVENT_NAME_MAX, Event, EventFlags, EventHandler};
pub use object::{
    Dependency, OBJECT_DEP_MAX, OBJECT_NAME_MAX, Object, ObjectFlags, ObjectId, ObjectLock,
    ObjectRef,
};
pub use persist::{FORMAT_VERSION, MAGIC, PAYLOAD_MAX, load_tree, load_tree_from_file, load_tree_with, save_tree, save_tree_to_file};
pub use range::{PxCoords, RangeNames};
pub use value::{Pointer, Value, VarType, VarValue};
pub use variable::{FlagWord, Slot, VARIABLE_NAME_MAX, VarGuard, Variable};
