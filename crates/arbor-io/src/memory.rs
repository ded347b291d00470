//! Memory-backed streams.
//!
//! [`CoreSource`] is a mutable block. A fixed block reports
//! [`IoStatus::Eof`](crate::IoStatus::Eof) once a write reaches its end; an
//! auto block (see [`CoreSource::auto`]) grows instead. [`ConstCoreSource`]
//! is read-only and rejects every write with
//! [`DataSourceError::ReadOnly`].

use crate::data_source::{SeekMode, SourceBackend, Transfer};
use crate::error::{DataSourceError, Result};

/// Resolve a seek against a block of `size` bytes.
///
/// `End` counts backwards from the end of the block. The resulting position
/// must lie within `0..=size`.
fn resolve_seek(cur: usize, size: usize, offset: i64, mode: SeekMode) -> Result<usize> {
    let base = match mode {
        SeekMode::Set => 0i128,
        SeekMode::Cur => cur as i128,
        SeekMode::End => size as i128,
    };
    let target = match mode {
        SeekMode::End => base - offset as i128,
        _ => base + offset as i128,
    };
    if target < 0 || target > size as i128 {
        return Err(DataSourceError::BadOffset { offset: target });
    }
    Ok(target as usize)
}

fn offset(pos: u64) -> Result<usize> {
    usize::try_from(pos).map_err(|_| DataSourceError::BadOffset { offset: pos.into() })
}

fn copy_out(data: &[u8], pos: usize, buf: &mut [u8]) -> Transfer {
    if pos >= data.len() {
        return Transfer::eof(0);
    }
    let n = buf.len().min(data.len() - pos);
    buf[..n].copy_from_slice(&data[pos..pos + n]);
    if n < buf.len() {
        Transfer::eof(n)
    } else {
        Transfer::complete(n)
    }
}

/// A mutable in-memory block.
#[derive(Debug, Clone, Default)]
pub struct CoreSource {
    data: Vec<u8>,
    offs: usize,
    growable: bool,
}

impl CoreSource {
    /// A fixed-size block; writes past its end report EOF.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            offs: 0,
            growable: false,
        }
    }

    /// An empty block that grows on write.
    #[must_use]
    pub fn auto() -> Self {
        Self {
            data: Vec::new(),
            offs: 0,
            growable: true,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn put(&mut self, pos: usize, buf: &[u8]) -> Result<Transfer> {
        if self.growable {
            let end = pos
                .checked_add(buf.len())
                .ok_or(DataSourceError::BadOffset { offset: pos as i128 })?;
            if end > self.data.len() {
                self.data.resize(end, 0);
            }
            self.data[pos..end].copy_from_slice(buf);
            return Ok(Transfer::complete(buf.len()));
        }
        if pos >= self.data.len() {
            return Ok(Transfer::eof(0));
        }
        let n = buf.len().min(self.data.len() - pos);
        self.data[pos..pos + n].copy_from_slice(&buf[..n]);
        if n < buf.len() {
            Ok(Transfer::eof(n))
        } else {
            Ok(Transfer::complete(n))
        }
    }
}

impl SourceBackend for CoreSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Transfer> {
        let t = copy_out(&self.data, self.offs, buf);
        self.offs += t.len;
        Ok(t)
    }

    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<Transfer> {
        Ok(copy_out(&self.data, offset(pos)?, buf))
    }

    fn write(&mut self, buf: &[u8]) -> Result<Transfer> {
        let t = self.put(self.offs, buf)?;
        self.offs += t.len;
        Ok(t)
    }

    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<Transfer> {
        self.put(offset(pos)?, buf)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.offs as u64)
    }

    fn seek(&mut self, offset: i64, mode: SeekMode) -> Result<u64> {
        self.offs = resolve_seek(self.offs, self.data.len(), offset, mode)?;
        Ok(self.offs as u64)
    }

    fn bytes(&self) -> Option<&[u8]> {
        Some(&self.data)
    }
}

/// A read-only in-memory block.
#[derive(Debug, Clone, Default)]
pub struct ConstCoreSource {
    data: std::sync::Arc<[u8]>,
    offs: usize,
}

impl ConstCoreSource {
    #[must_use]
    pub fn new(data: impl Into<std::sync::Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            offs: 0,
        }
    }
}

impl SourceBackend for ConstCoreSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Transfer> {
        let t = copy_out(&self.data, self.offs, buf);
        self.offs += t.len;
        Ok(t)
    }

    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<Transfer> {
        Ok(copy_out(&self.data, offset(pos)?, buf))
    }

    fn write(&mut self, _buf: &[u8]) -> Result<Transfer> {
        Err(DataSourceError::ReadOnly)
    }

    fn write_at(&mut self, _buf: &[u8], _pos: u64) -> Result<Transfer> {
        Err(DataSourceError::ReadOnly)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.offs as u64)
    }

    fn seek(&mut self, offset: i64, mode: SeekMode) -> Result<u64> {
        self.offs = resolve_seek(self.offs, self.data.len(), offset, mode)?;
        Ok(self.offs as u64)
    }

    fn bytes(&self) -> Option<&[u8]> {
        Some(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::IoStatus;

    #[test]
    fn fixed_block_reports_eof_on_overflowing_write() {
        let mut cs = CoreSource::new(vec![0; 4]);
        let t = cs.write(&[1, 2, 3]).unwrap();
        assert_eq!(t, Transfer::complete(3));
        let t = cs.write(&[4, 5, 6]).unwrap();
        assert_eq!(t.len, 1);
        assert_eq!(t.status, IoStatus::Eof);
        assert_eq!(cs.into_inner(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn auto_block_grows() {
        let mut cs = CoreSource::auto();
        cs.write(&[9; 10]).unwrap();
        cs.write_at(&[1], 12).unwrap();
        assert_eq!(cs.bytes().unwrap().len(), 13);
    }

    #[test]
    fn read_past_end_is_eof() {
        let mut cs = CoreSource::new(vec![7, 8]);
        let mut buf = [0u8; 4];
        let t = cs.read(&mut buf).unwrap();
        assert_eq!(t, Transfer::eof(2));
        assert_eq!(&buf[..2], &[7, 8]);
        assert_eq!(cs.read(&mut buf).unwrap(), Transfer::eof(0));
    }

    #[test]
    fn read_at_does_not_move_position() {
        let mut cs = CoreSource::new(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        cs.read_at(&mut buf, 2).unwrap();
        assert_eq!(buf, [3, 4]);
        assert_eq!(cs.tell().unwrap(), 0);
    }

    #[test]
    fn seek_end_counts_backwards() {
        let mut cs = CoreSource::new(vec![0; 10]);
        assert_eq!(cs.seek(3, SeekMode::End).unwrap(), 7);
        assert_eq!(cs.seek(-2, SeekMode::Cur).unwrap(), 5);
        assert!(matches!(
            cs.seek(11, SeekMode::Set),
            Err(DataSourceError::BadOffset { offset: 11 })
        ));
        assert!(cs.seek(-1, SeekMode::Set).is_err());
    }

    #[test]
    fn offsets_past_the_address_space_are_bad() {
        let mut cs = CoreSource::auto();
        assert!(matches!(
            cs.write_at(&[1], u64::MAX),
            Err(DataSourceError::BadOffset { .. })
        ));
        assert!(cs.bytes().unwrap().is_empty());

        let mut fixed = CoreSource::new(vec![0; 4]);
        assert_eq!(fixed.write_at(&[1], u64::MAX).unwrap(), Transfer::eof(0));
        let mut buf = [0u8; 1];
        assert_eq!(fixed.read_at(&mut buf, u64::MAX).unwrap(), Transfer::eof(0));
    }

    #[test]
    fn const_block_rejects_writes() {
        let mut cs = ConstCoreSource::new(vec![1u8, 2, 3]);
        assert!(matches!(cs.write(&[0]), Err(DataSourceError::ReadOnly)));
        assert!(matches!(cs.write_at(&[0], 0), Err(DataSourceError::ReadOnly)));
        let mut buf = [0u8; 3];
        assert_eq!(cs.read(&mut buf).unwrap(), Transfer::complete(3));
    }
}
