//! File-backed streams.
//!
//! [`FileSource`] buffers in both directions. Reads go through a
//! [`BufReader`]; writes collect in a pending block that is written out
//! before any read, seek, positioned transfer or flush, and when the source
//! is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::data_source::{SeekMode, SourceBackend, Transfer};
use crate::error::{DataSourceError, Result};

const BUF_CAPACITY: usize = 8 * 1024;

/// A buffered stream over a file on disk.
#[derive(Debug)]
pub struct FileSource {
    reader: BufReader<File>,
    /// Bytes written at the current position but not yet handed to the
    /// file. Non-empty only while the read buffer is empty.
    pending: Vec<u8>,
    path: Option<PathBuf>,
}

impl FileSource {
    fn with_file(file: File, path: Option<PathBuf>) -> Self {
        Self {
            reader: BufReader::with_capacity(BUF_CAPACITY, file),
            pending: Vec::new(),
            path,
        }
    }

    /// Open an existing file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!(path = %path.display(), "file source opened");
        Ok(Self::with_file(file, Some(path.to_path_buf())))
    }

    /// Create (or truncate) a file for reading and writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        debug!(path = %path.display(), "file source created");
        Ok(Self::with_file(file, Some(path.to_path_buf())))
    }

    /// Wrap an already-open file handle.
    #[must_use]
    pub fn from_file(file: File) -> Self {
        Self::with_file(file, None)
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Hand pending writes to the file.
    fn write_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let file = self.reader.get_mut();
        let mut done = 0;
        while done < self.pending.len() {
            match file.write(&self.pending[done..]) {
                Ok(0) => {
                    self.pending.drain(..done);
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.pending.drain(..done);
                    return Err(e.into());
                }
            }
        }
        self.pending.clear();
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<Transfer> {
        self.write_pending()?;
        let mut done = 0;
        while done < buf.len() {
            match self.reader.read(&mut buf[done..]) {
                Ok(0) => return Ok(Transfer::eof(done)),
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Transfer::complete(done))
    }

    fn drain(&mut self, buf: &[u8]) -> Result<Transfer> {
        if !self.reader.buffer().is_empty() {
            // Drop read-ahead so the file offset matches the logical one.
            self.reader.seek(SeekFrom::Current(0))?;
        }
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= BUF_CAPACITY {
            self.write_pending()?;
        }
        Ok(Transfer::complete(buf.len()))
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.reader.stream_position()? + self.pending.len() as u64)
    }

    /// Run `op` at `pos`, restoring the saved position afterwards.
    fn at<T>(&mut self, pos: u64, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.write_pending()?;
        let saved = self.reader.stream_position()?;
        self.reader.seek(SeekFrom::Start(pos))?;
        let out = op(self);
        self.write_pending()?;
        self.reader.seek(SeekFrom::Start(saved))?;
        out
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        if let Err(err) = self.write_pending() {
            warn!(error = %err, "buffered file writes lost");
        }
    }
}

impl SourceBackend for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Transfer> {
        self.fill(buf)
    }

    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<Transfer> {
        self.at(pos, |s| s.fill(buf))
    }

    fn write(&mut self, buf: &[u8]) -> Result<Transfer> {
        self.drain(buf)
    }

    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<Transfer> {
        self.at(pos, |s| s.drain(buf))
    }

    fn tell(&mut self) -> Result<u64> {
        self.position()
    }

    fn seek(&mut self, offset: i64, mode: SeekMode) -> Result<u64> {
        let from = match mode {
            SeekMode::Set => {
                if offset < 0 {
                    return Err(DataSourceError::BadOffset {
                        offset: offset.into(),
                    });
                }
                SeekFrom::Start(offset as u64)
            }
            SeekMode::Cur => SeekFrom::Current(offset),
            SeekMode::End => SeekFrom::End(offset.checked_neg().ok_or(
                DataSourceError::BadOffset {
                    offset: -i128::from(offset),
                },
            )?),
        };
        self.write_pending()?;
        Ok(self.reader.seek(from)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.write_pending()?;
        Ok(self.reader.get_mut().flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.bin");
        (dir, path)
    }

    #[test]
    fn pending_writes_are_visible_to_reads() {
        let (_dir, path) = scratch();
        let mut fs = FileSource::create(&path).unwrap();
        fs.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(fs.tell().unwrap(), 4);
        fs.seek(0, SeekMode::Set).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(&mut buf).unwrap(), Transfer::complete(4));
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn write_after_read_lands_at_logical_position() {
        let (_dir, path) = scratch();
        let mut fs = FileSource::create(&path).unwrap();
        fs.write(&[0; 16]).unwrap();
        fs.seek(0, SeekMode::Set).unwrap();
        let mut two = [0u8; 2];
        fs.read(&mut two).unwrap();
        fs.write(&[9, 9]).unwrap();
        assert_eq!(fs.tell().unwrap(), 4);
        drop(fs);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..6], &[0, 0, 9, 9, 0, 0]);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn drop_writes_out_pending_bytes() {
        let (_dir, path) = scratch();
        let mut fs = FileSource::create(&path).unwrap();
        let big = vec![7u8; BUF_CAPACITY + 100];
        fs.write(&big).unwrap();
        fs.write(&[1]).unwrap();
        drop(fs);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), big.len() as u64 + 1);
    }

    #[test]
    fn positioned_write_keeps_sequential_position() {
        let (_dir, path) = scratch();
        let mut fs = FileSource::create(&path).unwrap();
        fs.write(&[1, 2, 3]).unwrap();
        fs.write_at(&[8], 0).unwrap();
        fs.write(&[4]).unwrap();
        fs.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), [8, 2, 3, 4]);
    }

    #[test]
    fn unrepresentable_end_offset_is_bad() {
        let (_dir, path) = scratch();
        let mut fs = FileSource::create(&path).unwrap();
        assert!(matches!(
            fs.seek(i64::MIN, SeekMode::End),
            Err(DataSourceError::BadOffset { .. })
        ));
    }
}
