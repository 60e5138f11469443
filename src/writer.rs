//! Streaming ZIP writer that compresses entry data on-the-fly
//!
//! Entries are written with a data descriptor (general purpose bit 3), so the
//! writer never seeks backwards and never needs to know an entry's size up
//! front. Compressed output is staged in a small buffer that is drained to the
//! output whenever it crosses the flush threshold, which keeps memory flat no
//! matter how large an entry grows.
//!
//! The protocol is explicit: `start_entry`, any number of `write_data`,
//! `close_entry`, and finally `finish`. Any call out of that order fails with
//! [`ZipError::InvariantViolation`].

use crate::error::{ZipError, ZipResult};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::debug;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;

/// Default size at which staged compressed data is drained to the output
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64 * 1024;

pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x07, 0x08];
pub(crate) const CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
pub(crate) const END_OF_CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];
const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];

/// Bit 3: sizes and CRC follow the data. Bit 11: the name is UTF-8.
const GENERAL_PURPOSE_FLAGS: u16 = 0x0008 | 0x0800;
const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
/// 1980-01-01 00:00:00, the earliest MS-DOS timestamp
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = (1 << 5) | 1;

pub(crate) const METHOD_STORED: u16 = 0;
pub(crate) const METHOD_DEFLATE: u16 = 8;
pub(crate) const METHOD_ZSTD: u16 = 93;

/// Compression method to use for ZIP entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (stored)
    Stored,
    /// DEFLATE compression (most common)
    Deflate,
    /// Zstd compression (requires zstd-support feature)
    #[cfg(feature = "zstd-support")]
    Zstd,
}

impl CompressionMethod {
    pub(crate) fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => METHOD_STORED,
            CompressionMethod::Deflate => METHOD_DEFLATE,
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => METHOD_ZSTD,
        }
    }
}

/// Central directory record for an entry that has been closed
struct FinishedEntry {
    name: String,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    compression_method: u16,
}

impl FinishedEntry {
    fn needs_zip64(&self) -> bool {
        self.compressed_size > u32::MAX as u64
            || self.uncompressed_size > u32::MAX as u64
            || self.local_header_offset > u32::MAX as u64
    }
}

struct CurrentEntry {
    name: String,
    local_header_offset: u64,
    encoder: Box<dyn CompressorWrite>,
    counter: CrcCounter,
    compression_method: u16,
    /// Local header carries a ZIP64 extra field, so the descriptor uses 8-byte sizes
    zip64: bool,
}

trait CompressorWrite: Write {
    fn finish_compression(self: Box<Self>) -> io::Result<CompressedBuffer>;
    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer;
}

struct StoredCompressor {
    buffer: CompressedBuffer,
}

impl Write for StoredCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CompressorWrite for StoredCompressor {
    fn finish_compression(self: Box<Self>) -> io::Result<CompressedBuffer> {
        Ok(self.buffer)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        &mut self.buffer
    }
}

struct DeflateCompressor {
    encoder: DeflateEncoder<CompressedBuffer>,
}

impl Write for DeflateCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl CompressorWrite for DeflateCompressor {
    fn finish_compression(self: Box<Self>) -> io::Result<CompressedBuffer> {
        self.encoder.finish()
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

#[cfg(feature = "zstd-support")]
struct ZstdCompressor {
    encoder: zstd::Encoder<'static, CompressedBuffer>,
}

#[cfg(feature = "zstd-support")]
impl Write for ZstdCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

#[cfg(feature = "zstd-support")]
impl CompressorWrite for ZstdCompressor {
    fn finish_compression(self: Box<Self>) -> io::Result<CompressedBuffer> {
        self.encoder.finish()
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

/// Metadata tracker for CRC and byte counts
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Staging buffer for compressed bytes
///
/// The buffer keeps its allocation between drains, so its footprint settles
/// at roughly the flush threshold plus one compressor burst.
struct CompressedBuffer {
    buffer: Vec<u8>,
    flush_threshold: usize,
}

impl CompressedBuffer {
    /// Small entries get a small initial allocation; nothing ever starts
    /// larger than the threshold.
    fn with_size_hint(flush_threshold: usize, size_hint: Option<u64>) -> Self {
        let initial_capacity = match size_hint {
            Some(size) if size < flush_threshold as u64 => size as usize,
            Some(_) => flush_threshold,
            None => flush_threshold.min(8 * 1024),
        };

        Self {
            buffer: Vec::with_capacity(initial_capacity),
            flush_threshold,
        }
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }

    /// Write everything staged so far to `output` and return the byte count
    fn drain_into<W: Write>(&mut self, output: &mut W) -> io::Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        output.write_all(&self.buffer)?;
        let count = self.buffer.len() as u64;
        self.buffer.clear();
        Ok(count)
    }
}

impl Write for CompressedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streaming ZIP writer that compresses data on-the-fly
pub struct StreamingZipWriter<W: Write + Seek> {
    output: W,
    entries: Vec<FinishedEntry>,
    names: HashSet<String>,
    current_entry: Option<CurrentEntry>,
    compression_level: u32,
    compression_method: CompressionMethod,
    flush_threshold: usize,
    bytes_written: u64,
    poisoned: bool,
}

impl StreamingZipWriter<BufWriter<File>> {
    /// Create a new ZIP file with default compression level (6) using DEFLATE
    pub fn new<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        Self::with_compression(path, 6)
    }

    /// Create a new ZIP file with custom compression level (0-9) using DEFLATE
    pub fn with_compression<P: AsRef<Path>>(path: P, compression_level: u32) -> ZipResult<Self> {
        Self::with_method(path, CompressionMethod::Deflate, compression_level)
    }

    /// Create a new ZIP file with specified compression method and level
    ///
    /// # Arguments
    /// * `path` - Path to the output ZIP file
    /// * `method` - Compression method to use (Deflate, Zstd, or Stored)
    /// * `compression_level` - Compression level (0-9 for DEFLATE, 1-21 for Zstd)
    pub fn with_method<P: AsRef<Path>>(
        path: P,
        method: CompressionMethod,
        compression_level: u32,
    ) -> ZipResult<Self> {
        let output = File::create(path).map_err(ZipError::SinkUnavailable)?;
        Self::from_writer_with_method(BufWriter::new(output), method, compression_level)
    }
}

impl<W: Write + Seek> StreamingZipWriter<W> {
    /// Create a new ZIP writer from an arbitrary writer with default compression level (6) using DEFLATE
    pub fn from_writer(writer: W) -> ZipResult<Self> {
        Self::from_writer_with_method(writer, CompressionMethod::Deflate, 6)
    }

    /// Create a new ZIP writer from an arbitrary writer with specified compression method and level
    pub fn from_writer_with_method(
        writer: W,
        method: CompressionMethod,
        compression_level: u32,
    ) -> ZipResult<Self> {
        Ok(Self {
            output: writer,
            entries: Vec::new(),
            names: HashSet::new(),
            current_entry: None,
            compression_level,
            compression_method: method,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            bytes_written: 0,
            poisoned: false,
        })
    }

    /// Set the staging size at which compressed data is written to the output
    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "flush threshold must be at least 1 byte");
        self.flush_threshold = bytes;
        self
    }

    /// Number of entries closed so far
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Compressed bytes of all closed entries (headers excluded)
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether an entry is currently open for writing
    pub fn is_entry_open(&self) -> bool {
        self.current_entry.is_some()
    }

    /// Check that `name` could be used for the next entry, without writing anything
    pub fn check_entry_name(&self, name: &str) -> ZipResult<()> {
        if name.is_empty() {
            return Err(ZipError::InvariantViolation("entry name must not be empty"));
        }
        if name.len() > u16::MAX as usize {
            return Err(ZipError::InvariantViolation(
                "entry name must be at most 65535 bytes",
            ));
        }
        if self.names.contains(name) {
            return Err(ZipError::DuplicateEntryName(name.to_string()));
        }
        Ok(())
    }

    /// Start a new entry (file) in the ZIP
    pub fn start_entry(&mut self, name: &str) -> ZipResult<()> {
        self.start_entry_with_hint(name, None)
    }

    /// Start a new entry with an uncompressed size hint
    ///
    /// The hint sizes the initial staging allocation. A hint above 4 GiB also
    /// marks the local header as ZIP64, so the data descriptor is written with
    /// 8-byte sizes. An unhinted entry that outgrows 4 GiB still gets an 8-byte
    /// descriptor, and then only the central directory describes it correctly.
    pub fn start_entry_with_hint(&mut self, name: &str, size_hint: Option<u64>) -> ZipResult<()> {
        self.ensure_usable()?;
        if self.current_entry.is_some() {
            return Err(ZipError::InvariantViolation(
                "previous entry must be closed before starting another",
            ));
        }
        self.check_entry_name(name)?;

        let compression_method = self.compression_method.to_zip_method();
        let zip64 = size_hint.is_some_and(|size| size > u32::MAX as u64);
        let result = self.output.stream_position().and_then(|offset| {
            write_local_header(&mut self.output, name, compression_method, zip64).map(|()| offset)
        });
        let local_header_offset = self.sink(result)?;

        let staging = CompressedBuffer::with_size_hint(self.flush_threshold, size_hint);
        let encoder: Box<dyn CompressorWrite> = match self.compression_method {
            CompressionMethod::Stored => Box::new(StoredCompressor { buffer: staging }),
            CompressionMethod::Deflate => Box::new(DeflateCompressor {
                encoder: DeflateEncoder::new(staging, Compression::new(self.compression_level)),
            }),
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => {
                let result = zstd::Encoder::new(staging, self.compression_level as i32)
                    .and_then(|mut encoder| {
                        // ZIP carries a CRC32, the zstd frame checksum is redundant
                        encoder.include_checksum(false)?;
                        Ok(encoder)
                    });
                let encoder = self.sink(result)?;
                Box::new(ZstdCompressor { encoder })
            }
        };

        debug!("Starting entry {name:?} at offset {local_header_offset}");
        self.names.insert(name.to_string());
        self.current_entry = Some(CurrentEntry {
            name: name.to_string(),
            local_header_offset,
            encoder,
            counter: CrcCounter::new(),
            compression_method,
            zip64,
        });

        Ok(())
    }

    /// Write uncompressed data to the open entry (compressed on-the-fly)
    pub fn write_data(&mut self, data: &[u8]) -> ZipResult<()> {
        self.ensure_usable()?;
        let entry = self
            .current_entry
            .as_mut()
            .ok_or(ZipError::InvariantViolation("no entry started"))?;

        entry.counter.update_uncompressed(data);
        let result = stage(entry, &mut self.output, data);
        self.sink(result)
    }

    /// Close the open entry: flush the compressor and write the data descriptor
    pub fn close_entry(&mut self) -> ZipResult<()> {
        self.ensure_usable()?;
        let entry = self
            .current_entry
            .take()
            .ok_or(ZipError::InvariantViolation("no entry to close"))?;

        let result = write_entry_trailer(entry, &mut self.output);
        let finished = self.sink(result)?;
        debug!(
            "Closed entry {:?}: {} bytes -> {} bytes, crc32 {:08x}",
            finished.name, finished.uncompressed_size, finished.compressed_size, finished.crc32
        );
        self.bytes_written += finished.compressed_size;
        self.entries.push(finished);
        Ok(())
    }

    /// Finish the ZIP file (write central directory and return the writer)
    ///
    /// Every entry must have been closed with [`close_entry`](Self::close_entry).
    pub fn finish(mut self) -> ZipResult<W> {
        self.ensure_usable()?;
        if self.current_entry.is_some() {
            return Err(ZipError::InvariantViolation(
                "entry must be closed before finishing the archive",
            ));
        }

        let result = write_central_directory(&mut self.output, &self.entries)
            .and_then(|()| self.output.flush());
        self.sink(result)?;
        debug!("Finished archive with {} entries", self.entries.len());
        Ok(self.output)
    }

    fn ensure_usable(&self) -> ZipResult<()> {
        if self.poisoned {
            return Err(ZipError::InvariantViolation(
                "archive writer already failed; the archive must be discarded",
            ));
        }
        Ok(())
    }

    /// Map an output failure to `SinkUnavailable` and refuse all later calls
    fn sink<T>(&mut self, result: io::Result<T>) -> ZipResult<T> {
        result.map_err(|e| {
            self.poisoned = true;
            self.current_entry = None;
            ZipError::SinkUnavailable(e)
        })
    }
}

fn stage<W: Write>(entry: &mut CurrentEntry, output: &mut W, data: &[u8]) -> io::Result<()> {
    entry.encoder.write_all(data)?;
    let buffer = entry.encoder.get_buffer_mut();
    if buffer.should_flush() {
        let count = buffer.drain_into(output)?;
        entry.counter.add_compressed(count);
    }
    Ok(())
}

fn write_local_header<W: Write>(
    output: &mut W,
    name: &str,
    method: u16,
    zip64: bool,
) -> io::Result<()> {
    let (version, size_field, extra_len) = if zip64 {
        (VERSION_ZIP64, u32::MAX, 20u16)
    } else {
        (VERSION_DEFAULT, 0, 0u16)
    };

    output.write_all(&LOCAL_FILE_HEADER_SIGNATURE)?;
    output.write_all(&version.to_le_bytes())?; // version needed
    output.write_all(&GENERAL_PURPOSE_FLAGS.to_le_bytes())?;
    output.write_all(&method.to_le_bytes())?;
    output.write_all(&DOS_TIME.to_le_bytes())?;
    output.write_all(&DOS_DATE.to_le_bytes())?;
    output.write_all(&0u32.to_le_bytes())?; // crc32, in data descriptor
    output.write_all(&size_field.to_le_bytes())?; // compressed size, in data descriptor
    output.write_all(&size_field.to_le_bytes())?; // uncompressed size, in data descriptor
    output.write_all(&(name.len() as u16).to_le_bytes())?;
    output.write_all(&extra_len.to_le_bytes())?;
    output.write_all(name.as_bytes())?;

    if zip64 {
        // sizes are deferred to the descriptor, so both values are zero here
        output.write_all(&0x0001u16.to_le_bytes())?;
        output.write_all(&16u16.to_le_bytes())?;
        output.write_all(&0u64.to_le_bytes())?; // uncompressed
        output.write_all(&0u64.to_le_bytes())?; // compressed
    }
    Ok(())
}

fn write_entry_trailer<W: Write>(
    mut entry: CurrentEntry,
    output: &mut W,
) -> io::Result<FinishedEntry> {
    let mut buffer = entry.encoder.finish_compression()?;
    let remaining = buffer.drain_into(output)?;
    entry.counter.add_compressed(remaining);

    let crc32 = entry.counter.finalize();
    let compressed_size = entry.counter.compressed_count;
    let uncompressed_size = entry.counter.uncompressed_count;

    output.write_all(&DATA_DESCRIPTOR_SIGNATURE)?;
    output.write_all(&crc32.to_le_bytes())?;
    // ZIP64 data descriptors carry 8-byte sizes
    if entry.zip64 || compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64 {
        output.write_all(&compressed_size.to_le_bytes())?;
        output.write_all(&uncompressed_size.to_le_bytes())?;
    } else {
        output.write_all(&(compressed_size as u32).to_le_bytes())?;
        output.write_all(&(uncompressed_size as u32).to_le_bytes())?;
    }

    Ok(FinishedEntry {
        name: entry.name,
        local_header_offset: entry.local_header_offset,
        crc32,
        compressed_size,
        uncompressed_size,
        compression_method: entry.compression_method,
    })
}

/// Clamp a 64-bit value to its 32-bit field, using the ZIP64 marker on overflow
fn field_u32(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        u32::MAX
    } else {
        value as u32
    }
}

fn write_central_directory<W: Write + Seek>(
    output: &mut W,
    entries: &[FinishedEntry],
) -> io::Result<()> {
    let central_dir_offset = output.stream_position()?;

    for entry in entries {
        let zip64 = entry.needs_zip64();
        let version = if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

        // ZIP64 extra field (0x0001): only the overflowing values, in fixed order
        let mut extra_field: Vec<u8> = Vec::new();
        if zip64 {
            let mut data: Vec<u8> = Vec::with_capacity(24);
            if entry.uncompressed_size > u32::MAX as u64 {
                data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
            }
            if entry.compressed_size > u32::MAX as u64 {
                data.extend_from_slice(&entry.compressed_size.to_le_bytes());
            }
            if entry.local_header_offset > u32::MAX as u64 {
                data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
            }
            extra_field.extend_from_slice(&0x0001u16.to_le_bytes());
            extra_field.extend_from_slice(&(data.len() as u16).to_le_bytes());
            extra_field.extend_from_slice(&data);
        }

        output.write_all(&CENTRAL_DIRECTORY_SIGNATURE)?;
        output.write_all(&version.to_le_bytes())?; // version made by
        output.write_all(&version.to_le_bytes())?; // version needed
        output.write_all(&GENERAL_PURPOSE_FLAGS.to_le_bytes())?;
        output.write_all(&entry.compression_method.to_le_bytes())?;
        output.write_all(&DOS_TIME.to_le_bytes())?;
        output.write_all(&DOS_DATE.to_le_bytes())?;
        output.write_all(&entry.crc32.to_le_bytes())?;
        output.write_all(&field_u32(entry.compressed_size).to_le_bytes())?;
        output.write_all(&field_u32(entry.uncompressed_size).to_le_bytes())?;
        output.write_all(&(entry.name.len() as u16).to_le_bytes())?;
        output.write_all(&(extra_field.len() as u16).to_le_bytes())?;
        output.write_all(&0u16.to_le_bytes())?; // file comment len
        output.write_all(&0u16.to_le_bytes())?; // disk number start
        output.write_all(&0u16.to_le_bytes())?; // internal attrs
        output.write_all(&0u32.to_le_bytes())?; // external attrs
        output.write_all(&field_u32(entry.local_header_offset).to_le_bytes())?;
        output.write_all(entry.name.as_bytes())?;
        output.write_all(&extra_field)?;
    }

    let central_dir_size = output.stream_position()? - central_dir_offset;
    let entry_count = entries.len() as u64;

    let need_zip64 = entry_count >= u16::MAX as u64
        || central_dir_size > u32::MAX as u64
        || central_dir_offset > u32::MAX as u64;

    if need_zip64 {
        let zip64_eocd_offset = central_dir_offset + central_dir_size;

        output.write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        output.write_all(&44u64.to_le_bytes())?; // size of the remaining record
        output.write_all(&VERSION_ZIP64.to_le_bytes())?; // version made by
        output.write_all(&VERSION_ZIP64.to_le_bytes())?; // version needed
        output.write_all(&0u32.to_le_bytes())?; // this disk
        output.write_all(&0u32.to_le_bytes())?; // disk with central dir
        output.write_all(&entry_count.to_le_bytes())?; // entries on this disk
        output.write_all(&entry_count.to_le_bytes())?; // total entries
        output.write_all(&central_dir_size.to_le_bytes())?;
        output.write_all(&central_dir_offset.to_le_bytes())?;

        output.write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE)?;
        output.write_all(&0u32.to_le_bytes())?; // disk with ZIP64 EOCD
        output.write_all(&zip64_eocd_offset.to_le_bytes())?;
        output.write_all(&1u32.to_le_bytes())?; // total disks
    }

    let count_16 = if entry_count >= u16::MAX as u64 {
        u16::MAX
    } else {
        entry_count as u16
    };

    output.write_all(&END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
    output.write_all(&0u16.to_le_bytes())?; // disk number
    output.write_all(&0u16.to_le_bytes())?; // disk with central dir
    output.write_all(&count_16.to_le_bytes())?; // entries on this disk
    output.write_all(&count_16.to_le_bytes())?; // total entries
    output.write_all(&field_u32(central_dir_size).to_le_bytes())?;
    output.write_all(&field_u32(central_dir_offset).to_le_bytes())?;
    output.write_all(&0u16.to_le_bytes())?; // comment len
    Ok(())
}
