//! Error types for the event loop.

use std::io;

use arbor_core::EventError;
use thiserror::Error;

use crate::sink::SinkKind;

/// Result alias for loop operations.
pub type Result<T> = std::result::Result<T, LoopError>;

#[derive(Debug, Error)]
pub enum LoopError {
    /// The active wait backend cannot watch this kind of sink.
    #[error("{kind} sinks are not supported by the {backend} backend")]
    Unsupported {
        kind: SinkKind,
        backend: &'static str,
    },

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("backend I/O error")]
    Io(#[from] io::Error),

    #[cfg(unix)]
    #[error("poll failed")]
    Poll(#[source] nix::Error),
}
