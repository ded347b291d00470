use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataSourceError>;

/// Hard failures reported by a [`DataSource`](crate::DataSource).
///
/// End-of-stream is not an error for raw transfers (see
/// [`IoStatus::Eof`](crate::IoStatus::Eof)); it only becomes
/// [`UnexpectedEof`](DataSourceError::UnexpectedEof) when a typed read
/// needs more bytes than the stream has left.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad offset {offset}")]
    BadOffset { offset: i128 },

    #[error("unexpected end of stream (wanted {wanted} bytes, got {got})")]
    UnexpectedEof { wanted: usize, got: usize },

    #[error("data source is read-only")]
    ReadOnly,

    #[error("string of {len} bytes exceeds limit of {max}")]
    StringTooLong { len: usize, max: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("bad operation: {0}")]
    Unsupported(&'static str),
}
