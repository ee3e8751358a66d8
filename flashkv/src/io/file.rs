//! File functions
//!
//! The store only needs a small random access surface from its backing file, expressed
//! by [`Storage`]. [`DiskFile`] provides it over `std::fs`; [`MemoryFile`] keeps the
//! whole file in RAM.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random access file used as the backing store.
pub trait Storage: Debug + Send {
    /// Fill `buf` from `offset`. Running out of data is an error.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` at `offset`, extending the file if required.
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Current length in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Is the file empty?
    fn is_empty(&mut self) -> io::Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Discard the contents, leaving an empty file.
    fn truncate(&mut self) -> io::Result<()>;

    /// Cut the file back (or zero extend it) to `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Make previous writes durable.
    fn flush(&mut self) -> io::Result<()>;
}

/// A [`Storage`] backed by a file on disk.
#[derive(Debug)]
pub struct DiskFile {
    file: File,
    path: PathBuf,
}

impl DiskFile {
    /// Open `path` for reading and writing, creating it if missing.
    ///
    /// Directories are rejected.
    pub fn try_open(path: &Path) -> io::Result<Self> {
        if path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file,
            path: path.into(),
        })
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for DiskFile {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        self.file.metadata().map(|m| m.len())
    }

    fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// A [`Storage`] held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryFile {
    data: Vec<u8>,
}

impl MemoryFile {
    /// An empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// A file with existing contents.
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Current contents.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl Storage for MemoryFile {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| eof())?;
        let end = start.checked_add(buf.len()).ok_or_else(eof)?;
        let src = self.data.get(start..end).ok_or_else(eof)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn truncate(&mut self) -> io::Result<()> {
        self.data.clear();
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len =
            usize::try_from(len).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.data.resize(len, 0);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn eof() -> io::Error {
    io::Error::from(io::ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_creates_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("file_create.db");
        let mut file = DiskFile::try_open(&path).expect("creates file");
        assert_eq!(file.len().expect("len"), 0);
        assert_eq!(file.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn it_rejects_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(DiskFile::try_open(dir.path()).is_err());
    }

    #[test]
    fn it_reads_back_and_truncates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("file_rw.db");
        let mut file = DiskFile::try_open(&path).expect("creates file");
        file.write_all_at(0, b"hello").expect("write");
        file.write_all_at(5, b" world").expect("write");
        file.flush().expect("flushed away");
        drop(file);

        let mut file = DiskFile::try_open(&path).expect("opens file");
        let mut buf = [0; 5];
        file.read_exact_at(6, &mut buf).expect("read");
        assert_eq!(&buf, b"world");
        assert!(file.read_exact_at(8, &mut buf).is_err());

        file.truncate().expect("truncated");
        assert!(file.is_empty().expect("len"));
    }

    #[test]
    fn it_sets_length() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("file_len.db");
        let mut file = DiskFile::try_open(&path).expect("creates file");
        file.write_all_at(0, b"hello world").expect("write");
        file.set_len(5).expect("cut back");
        assert_eq!(file.len().expect("len"), 5);

        let mut memory = MemoryFile::with_contents(b"hello world".to_vec());
        memory.set_len(5).expect("cut back");
        assert_eq!(memory.contents(), b"hello");
        memory.set_len(7).expect("extended");
        assert_eq!(memory.contents(), b"hello\0\0");
    }

    #[test]
    fn it_grows_memory_file_on_write() {
        let mut file = MemoryFile::new();
        file.write_all_at(4, &[1, 2]).expect("write");
        assert_eq!(file.contents(), &[0, 0, 0, 0, 1, 2]);
        let mut buf = [0; 3];
        assert_eq!(
            file.read_exact_at(4, &mut buf).map_err(|e| e.kind()),
            Err(io::ErrorKind::UnexpectedEof)
        );
        file.truncate().expect("truncated");
        assert_eq!(file.len().expect("len"), 0);
    }
}
