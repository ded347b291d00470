#![forbid(unsafe_code)]

//! arbor public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users: the
//! object tree and event dispatch from `arbor-core`, byte streams from
//! `arbor-io`, and (with the default `runtime` feature) the event loop.

pub use arbor_core as core;
pub use arbor_io as io;
#[cfg(feature = "runtime")]
pub use arbor_runtime as runtime;

pub mod prelude {
    pub use arbor_core::{
        Class, ClassOps, ClassRegistry, Event, EventFlags, Object, ObjectFlags, ObjectRef,
        Pointer, RangeNames, Slot, Value, VarType, Variable,
    };
    pub use arbor_io::{ByteOrder, DataSource};
    #[cfg(feature = "runtime")]
    pub use arbor_runtime::{EventLoop, EventLoopConfig, LoopHandle, SinkControl, TimerId};
}
