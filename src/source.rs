//! Content sources: where an entry's bytes come from
//!
//! A [`ContentSource`] is opened only when its entry is about to be written
//! and the returned reader is dropped as soon as the entry is closed, so at
//! most one source is live at a time.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

/// Capability producing an entry's bytes as a stream
///
/// `open` hands out a reader; reading until `Ok(0)` consumes the content and
/// dropping the reader releases whatever `open` acquired.
pub trait ContentSource {
    /// Acquire the underlying resource and return a reader over its bytes
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>>;

    /// Uncompressed length, if known without opening
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// A named source waiting to become one archive entry
pub struct EntryDescriptor {
    pub(crate) name: String,
    pub(crate) source: Box<dyn ContentSource>,
}

impl EntryDescriptor {
    pub fn new(name: impl Into<String>, source: impl ContentSource + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Entry backed by a file on disk, opened lazily
    pub fn from_file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, FileSource::new(path))
    }

    /// Entry backed by bytes already in memory
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(name, BytesSource::new(bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.source.size_hint()
    }
}

impl fmt::Debug for EntryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryDescriptor")
            .field("name", &self.name)
            .field("size_hint", &self.size_hint())
            .finish()
    }
}

/// File on disk; the handle exists only while the entry is written
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ContentSource for FileSource {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn size_hint(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// Owned in-memory bytes
#[derive(Debug, Clone)]
pub struct BytesSource {
    bytes: Vec<u8>,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl ContentSource for BytesSource {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.bytes.as_slice()))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }
}

/// Lazy supplier: the closure runs on `open` and builds a fresh reader
pub struct FnSource<F> {
    supplier: F,
    size_hint: Option<u64>,
}

impl<F, R> FnSource<F>
where
    F: FnMut() -> io::Result<R>,
    R: Read + 'static,
{
    pub fn new(supplier: F) -> Self {
        Self {
            supplier,
            size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }
}

impl<F, R> ContentSource for FnSource<F>
where
    F: FnMut() -> io::Result<R>,
    R: Read + 'static,
{
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new((self.supplier)()?))
    }

    fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }
}

/// An already-open reader; it can be consumed only once
pub struct ReaderSource<R> {
    reader: Option<R>,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }
}

impl<R: Read> ContentSource for ReaderSource<R> {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        match self.reader.take() {
            Some(reader) => Ok(Box::new(reader)),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "reader source was already consumed",
            )),
        }
    }
}

/// `len` copies of one byte, produced without allocating the content
#[derive(Debug, Clone, Copy)]
pub struct GeneratedSource {
    byte: u8,
    len: u64,
}

impl GeneratedSource {
    pub fn new(byte: u8, len: u64) -> Self {
        Self { byte, len }
    }

    pub fn zeros(len: u64) -> Self {
        Self::new(0, len)
    }
}

impl ContentSource for GeneratedSource {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(io::repeat(self.byte).take(self.len)))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn drain(source: &mut dyn ContentSource) -> Vec<u8> {
        let mut out = Vec::new();
        source.open().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn bytes_source_reopens() {
        let mut source = BytesSource::new(b"abc".to_vec());
        assert_eq!(source.size_hint(), Some(3));
        assert_eq!(drain(&mut source), b"abc");
        assert_eq!(drain(&mut source), b"abc");
    }

    #[test]
    fn generated_source_has_exact_length() {
        let mut source = GeneratedSource::new(7, 10_000);
        let data = drain(&mut source);
        assert_eq!(data.len(), 10_000);
        assert!(data.iter().all(|&b| b == 7));
    }

    #[test]
    fn fn_source_calls_supplier_per_open() {
        let mut calls = 0;
        let mut source = FnSource::new(|| {
            calls += 1;
            Ok(io::Cursor::new(vec![1u8, 2, 3]))
        })
        .with_size_hint(3);
        assert_eq!(source.size_hint(), Some(3));
        assert_eq!(drain(&mut source), [1, 2, 3]);
        assert_eq!(drain(&mut source), [1, 2, 3]);
        drop(source);
        assert_eq!(calls, 2);
    }

    #[test]
    fn reader_source_is_single_use() {
        let mut source = ReaderSource::new(&b"once"[..]);
        assert_eq!(drain(&mut source), b"once");
        assert!(source.open().is_err());
    }

    #[test]
    fn file_source_opens_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.txt");
        let mut source = FileSource::new(&path);
        assert!(source.size_hint().is_none());
        assert_eq!(source.open().err().map(|e| e.kind()), Some(io::ErrorKind::NotFound));

        File::create(&path).unwrap().write_all(b"now it exists").unwrap();
        assert_eq!(source.size_hint(), Some(13));
        assert_eq!(drain(&mut source), b"now it exists");
    }

    #[test]
    fn descriptor_debug_shows_name() {
        let entry = EntryDescriptor::from_bytes("notes.txt", "hi");
        assert_eq!(entry.name(), "notes.txt");
        assert_eq!(
            format!("{entry:?}"),
            "EntryDescriptor { name: \"notes.txt\", size_hint: Some(2) }"
        );
    }
}
