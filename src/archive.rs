//! Batch archive writer with bounded memory
//!
//! [`ArchiveStreamWriter`] takes a lazy sequence of [`EntryDescriptor`]s and
//! streams each one into a single ZIP archive, one chunk at a time. Only one
//! source is open at any moment and the chunk buffer is allocated once and
//! reused for every entry, so peak memory depends on the configuration, not
//! on how many entries there are or how large they get.

use crate::error::{ZipError, ZipResult};
use crate::source::EntryDescriptor;
use crate::writer::{CompressionMethod, StreamingZipWriter, DEFAULT_FLUSH_THRESHOLD};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::Path;

/// Default read size per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Configuration for [`ArchiveStreamWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Bytes read from a source per chunk (default: 4096)
    pub chunk_size: usize,
    /// Compression method for every entry (default: Deflate)
    pub compression_method: CompressionMethod,
    /// Compression level (default: 6)
    pub compression_level: u32,
    /// Staged compressed bytes before they are written out (default: 64 KiB)
    pub flush_threshold: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_method: CompressionMethod::Deflate,
            compression_level: 6,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl ArchiveConfig {
    /// Favour throughput over ratio
    pub fn fast() -> Self {
        Self::default().with_compression(CompressionMethod::Deflate, 1)
    }

    /// Favour ratio over throughput
    pub fn compact() -> Self {
        Self::default().with_compression(CompressionMethod::Deflate, 9)
    }

    /// No compression at all
    pub fn stored() -> Self {
        Self::default().with_compression(CompressionMethod::Stored, 0)
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "chunk_size must be at least 1 byte");
        self.chunk_size = bytes;
        self
    }

    /// Set compression method and level
    pub fn with_compression(mut self, method: CompressionMethod, level: u32) -> Self {
        self.compression_method = method;
        self.compression_level = level;
        self
    }

    /// Set the staging flush threshold
    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "flush_threshold must be at least 1 byte");
        self.flush_threshold = bytes;
        self
    }

    /// Reject settings the `with_*` setters would have refused
    ///
    /// The fields are public, so a struct literal can bypass the setters.
    pub fn validate(&self) -> ZipResult<()> {
        if self.chunk_size == 0 {
            return Err(ZipError::InvariantViolation("chunk_size must be at least 1 byte"));
        }
        if self.flush_threshold == 0 {
            return Err(ZipError::InvariantViolation(
                "flush_threshold must be at least 1 byte",
            ));
        }
        Ok(())
    }

    /// Upper estimate of the buffers held while an entry is written,
    /// excluding compressor state
    pub fn estimated_buffer_bytes(&self) -> usize {
        // the staging buffer can overshoot the threshold by one compressor burst
        self.chunk_size + 2 * self.flush_threshold
    }
}

/// What one call to [`ArchiveStreamWriter::write`] produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

/// Streams many named sources into one ZIP archive
///
/// ```no_run
/// use lazy_zip::{ArchiveStreamWriter, EntryDescriptor};
///
/// let entries = (1..100).map(|i| {
///     EntryDescriptor::from_file(format!("test {i}"), "payload.bin")
/// });
///
/// let mut writer = ArchiveStreamWriter::new();
/// let summary = writer.write_to_path(entries, "output.zip")?;
/// println!("{} entries", summary.entries);
/// # Ok::<(), lazy_zip::ZipError>(())
/// ```
#[derive(Debug)]
pub struct ArchiveStreamWriter {
    config: ArchiveConfig,
    chunk: Vec<u8>,
    last_summary: Option<ArchiveSummary>,
}

impl Default for ArchiveStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveStreamWriter {
    pub fn new() -> Self {
        Self::with_config(ArchiveConfig::default())
    }

    pub fn with_config(config: ArchiveConfig) -> Self {
        let chunk = vec![0u8; config.chunk_size];
        Self {
            config,
            chunk,
            last_summary: None,
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Summary of the most recent successful `write`
    pub fn last_summary(&self) -> Option<ArchiveSummary> {
        self.last_summary
    }

    /// Write every entry, in order, to `destination` and finalize the archive
    ///
    /// Returns the destination once the end of central directory record has
    /// been written and flushed. On error nothing is retried and the partially
    /// written destination is not a valid archive; pass `&mut W` to keep hold
    /// of it for cleanup. An invalid configuration fails before anything is
    /// written.
    pub fn write<I, W>(&mut self, entries: I, destination: W) -> ZipResult<W>
    where
        I: IntoIterator<Item = EntryDescriptor>,
        W: Write + Seek,
    {
        self.last_summary = None;
        self.config.validate()?;
        let (output, summary) = self.write_archive(entries, destination)?;
        self.last_summary = Some(summary);
        Ok(output)
    }

    /// Write to a new file at `path`, deleting it again if anything fails
    pub fn write_to_path<I, P>(&mut self, entries: I, path: P) -> ZipResult<ArchiveSummary>
    where
        I: IntoIterator<Item = EntryDescriptor>,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        self.last_summary = None;
        self.config.validate()?;
        let file = File::create(path).map_err(ZipError::SinkUnavailable)?;
        match self.write_archive(entries, BufWriter::new(file)) {
            Ok((_, summary)) => {
                self.last_summary = Some(summary);
                Ok(summary)
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(path) {
                    warn!("Could not remove incomplete archive {}: {}", path.display(), cleanup);
                }
                Err(err)
            }
        }
    }

    fn write_archive<I, W>(&mut self, entries: I, destination: W) -> ZipResult<(W, ArchiveSummary)>
    where
        I: IntoIterator<Item = EntryDescriptor>,
        W: Write + Seek,
    {
        let mut sink = StreamingZipWriter::from_writer_with_method(
            destination,
            self.config.compression_method,
            self.config.compression_level,
        )?
        .with_flush_threshold(self.config.flush_threshold);

        let mut summary = ArchiveSummary::default();
        for entry in entries {
            if let Err(err) = self.write_entry(&mut sink, entry, &mut summary) {
                warn!(
                    "Archive aborted after {} complete entries; output is unusable: {}",
                    summary.entries, err
                );
                return Err(err);
            }
        }

        summary.compressed_bytes = sink.bytes_written();
        let output = sink.finish().map_err(|err| {
            warn!("Archive could not be finalized; output is unusable: {}", err);
            err
        })?;
        info!(
            "Wrote archive: {} entries, {} bytes -> {} bytes",
            summary.entries, summary.uncompressed_bytes, summary.compressed_bytes
        );
        Ok((output, summary))
    }

    fn write_entry<W: Write + Seek>(
        &mut self,
        sink: &mut StreamingZipWriter<W>,
        entry: EntryDescriptor,
        summary: &mut ArchiveSummary,
    ) -> ZipResult<()> {
        let EntryDescriptor { name, mut source } = entry;
        sink.check_entry_name(&name)?;

        let size_hint = source.size_hint();
        let mut reader = source
            .open()
            .map_err(|err| ZipError::source_unavailable(&name, err))?;

        sink.start_entry_with_hint(&name, size_hint)?;
        let copied = copy_chunks(&mut reader, sink, &mut self.chunk, &name)?;
        sink.close_entry()?;
        drop(reader);

        debug!("Streamed {name:?}: {copied} bytes");
        summary.entries += 1;
        summary.uncompressed_bytes += copied;
        Ok(())
    }
}

/// Move `reader` into the open entry one chunk at a time
fn copy_chunks<R, W>(
    reader: &mut R,
    sink: &mut StreamingZipWriter<W>,
    chunk: &mut [u8],
    name: &str,
) -> ZipResult<u64>
where
    R: Read + ?Sized,
    W: Write + Seek,
{
    let mut copied = 0u64;
    loop {
        let len = match reader.read(chunk) {
            Ok(0) => return Ok(copied),
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(ZipError::source_unavailable(name, err)),
        };
        sink.write_data(&chunk[..len])?;
        copied += len as u64;
    }
}
