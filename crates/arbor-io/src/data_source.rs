//! The [`DataSource`] stream and its backend contract.
//!
//! # Design
//!
//! A [`DataSource`] owns a boxed [`SourceBackend`] that does the raw byte
//! movement, and layers on top of it everything that is common to every
//! backend: byte order, transfer statistics, and typed encoding.
//!
//! # Invariants
//!
//! 1. `read`/`write` advance the position by exactly the number of bytes
//!    transferred; `read_at`/`write_at` never move it.
//! 2. A transfer that moves fewer bytes than requested reports
//!    [`IoStatus::Eof`], never `Success`.
//! 3. Typed reads either consume their full width or fail with
//!    [`DataSourceError::UnexpectedEof`].

use crate::byte_order::ByteOrder;
use crate::error::{DataSourceError, Result};

/// Outcome of a raw transfer that did not hard-fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The whole buffer was transferred.
    Success,
    /// The stream ended before the whole buffer was transferred.
    Eof,
}

/// Number of bytes moved plus the resulting status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub len: usize,
    pub status: IoStatus,
}

impl Transfer {
    #[must_use]
    pub const fn complete(len: usize) -> Self {
        Self {
            len,
            status: IoStatus::Success,
        }
    }

    #[must_use]
    pub const fn eof(len: usize) -> Self {
        Self {
            len,
            status: IoStatus::Eof,
        }
    }

    #[must_use]
    pub const fn is_eof(&self) -> bool {
        matches!(self.status, IoStatus::Eof)
    }
}

/// Origin for [`DataSource::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Absolute position.
    Set,
    /// Relative to the current position.
    Cur,
    /// Counted backwards from the end of the stream.
    End,
}

/// Raw byte movement for one kind of storage.
pub trait SourceBackend: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<Transfer>;
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<Transfer>;
    fn write(&mut self, buf: &[u8]) -> Result<Transfer>;
    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<Transfer>;
    fn tell(&mut self) -> Result<u64>;
    fn seek(&mut self, offset: i64, mode: SeekMode) -> Result<u64>;

    /// Flush buffered writes. Memory backends have nothing to do.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Backing bytes, for memory backends.
    fn bytes(&self) -> Option<&[u8]> {
        None
    }
}

/// Maximum accepted length for a length-prefixed string.
pub const STRING_MAX: usize = 1 << 24;

/// A byte stream with byte-order aware typed encoding.
pub struct DataSource {
    backend: Box<dyn SourceBackend>,
    byte_order: ByteOrder,
    rd_last: usize,
    wr_last: usize,
    rd_total: u64,
    wr_total: u64,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("byte_order", &self.byte_order)
            .field("rd_total", &self.rd_total)
            .field("wr_total", &self.wr_total)
            .finish_non_exhaustive()
    }
}

impl DataSource {
    /// Wrap a backend. The stream starts in big-endian order.
    #[must_use]
    pub fn new(backend: impl SourceBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            byte_order: ByteOrder::default(),
            rd_last: 0,
            wr_last: 0,
            rd_total: 0,
            wr_total: 0,
        }
    }

    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Bytes moved by the last read.
    #[must_use]
    pub fn last_read(&self) -> usize {
        self.rd_last
    }

    /// Bytes moved by the last write.
    #[must_use]
    pub fn last_written(&self) -> usize {
        self.wr_last
    }

    #[must_use]
    pub fn total_read(&self) -> u64 {
        self.rd_total
    }

    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.wr_total
    }

    // ── Raw transfers ────────────────────────────────────────────────

    pub fn read(&mut self, buf: &mut [u8]) -> Result<Transfer> {
        let t = self.backend.read(buf)?;
        self.note_read(t.len);
        Ok(t)
    }

    pub fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<Transfer> {
        let t = self.backend.read_at(buf, pos)?;
        self.note_read(t.len);
        Ok(t)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<Transfer> {
        let t = self.backend.write(buf)?;
        self.note_write(t.len);
        Ok(t)
    }

    pub fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<Transfer> {
        let t = self.backend.write_at(buf, pos)?;
        self.note_write(t.len);
        Ok(t)
    }

    pub fn tell(&mut self) -> Result<u64> {
        self.backend.tell()
    }

    pub fn seek(&mut self, offset: i64, mode: SeekMode) -> Result<u64> {
        self.backend.seek(offset, mode)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush()
    }

    /// Backing bytes of a memory stream; `None` for files.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.backend.bytes()
    }

    fn note_read(&mut self, len: usize) {
        self.rd_last = len;
        self.rd_total += len as u64;
    }

    fn note_write(&mut self, len: usize) {
        self.wr_last = len;
        self.wr_total += len as u64;
    }

    // ── Exact transfers ──────────────────────────────────────────────

    /// Read exactly `buf.len()` bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let t = self.read(buf)?;
        if t.len < buf.len() {
            return Err(DataSourceError::UnexpectedEof {
                wanted: buf.len(),
                got: t.len,
            });
        }
        Ok(())
    }

    /// Write exactly `buf.len()` bytes.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let t = self.write(buf)?;
        if t.len < buf.len() {
            return Err(DataSourceError::UnexpectedEof {
                wanted: buf.len(),
                got: t.len,
            });
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut b = [0u8; N];
        self.read_exact(&mut b)?;
        Ok(b)
    }

    // ── Typed encoding ───────────────────────────────────────────────

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])
    }

    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_u8(v as u8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(u8::from(v))
    }

    /// Read a `u32`-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > STRING_MAX {
            return Err(DataSourceError::StringTooLong {
                len,
                max: STRING_MAX,
            });
        }
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| DataSourceError::InvalidUtf8)
    }

    /// Write a `u32`-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        if s.len() > STRING_MAX {
            return Err(DataSourceError::StringTooLong {
                len: s.len(),
                max: STRING_MAX,
            });
        }
        self.write_u32(s.len() as u32)?;
        self.write_all(s.as_bytes())
    }
}

macro_rules! typed_io {
    ($($read:ident, $write:ident, $enc:ident, $dec:ident, $ty:ty;)*) => {
        impl DataSource {
            $(
                pub fn $read(&mut self) -> Result<$ty> {
                    let b = self.read_array::<{ std::mem::size_of::<$ty>() }>()?;
                    Ok(self.byte_order.$dec(b))
                }

                pub fn $write(&mut self, v: $ty) -> Result<()> {
                    let b = self.byte_order.$enc(v);
                    self.write_all(&b)
                }
            )*
        }
    };
}

typed_io! {
    read_u16, write_u16, encode_u16, decode_u16, u16;
    read_u32, write_u32, encode_u32, decode_u32, u32;
    read_u64, write_u64, encode_u64, decode_u64, u64;
    read_i16, write_i16, encode_i16, decode_i16, i16;
    read_i32, write_i32, encode_i32, decode_i32, i32;
    read_i64, write_i64, encode_i64, decode_i64, i64;
    read_f32, write_f32, encode_f32, decode_f32, f32;
    read_f64, write_f64, encode_f64, decode_f64, f64;
}
