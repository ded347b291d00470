#![forbid(unsafe_code)]

//! Byte streams for arbor persistence.
//!
//! A [`DataSource`] is a sequential-or-random-access stream with a
//! configurable [`ByteOrder`] for typed integer, float and string encoding.
//! Three backends are provided:
//!
//! - [`FileSource`]: a file on disk.
//! - [`CoreSource`]: a mutable memory block (fixed size or auto-growing).
//! - [`ConstCoreSource`]: a read-only memory block.
//!
//! Every transfer reports an [`IoStatus`]: `Success` when the whole buffer
//! moved, `Eof` when the stream ended first. Hard failures come back as
//! [`DataSourceError`].

pub mod byte_order;
pub mod data_source;
pub mod error;
pub mod file;
pub mod memory;

pub use byte_order::ByteOrder;
pub use data_source::{DataSource, IoStatus, SeekMode, SourceBackend, Transfer};
pub use error::{DataSourceError, Result};
pub use file::FileSource;
pub use memory::{ConstCoreSource, CoreSource};
