//! Streaming ZIP reader
//!
//! Loads the central directory once, then decompresses individual entries on
//! demand. Streaming reads verify the entry's CRC-32 when they reach the end
//! of the data.

use crate::error::{ZipError, ZipResult};
use crate::writer::{
    CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE,
    METHOD_DEFLATE, METHOD_STORED, METHOD_ZSTD,
};
use crc32fast::Hasher;
use flate2::read::DeflateDecoder;
use log::trace;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
const ZIP64_LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];
const EOCD_MIN_LEN: u64 = 22;
/// EOCD plus the longest possible archive comment
const EOCD_SEARCH_LEN: u64 = EOCD_MIN_LEN + u16::MAX as u64;

/// Entry in the ZIP central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub crc32: u32,
    pub offset: u64,
}

/// Streaming ZIP archive reader
pub struct StreamingZipReader<R: Read + Seek> {
    input: R,
    entries: Vec<ZipEntry>,
}

impl StreamingZipReader<BufReader<File>> {
    /// Open a ZIP file and read its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> StreamingZipReader<R> {
    /// Read the central directory from any seekable input
    pub fn from_reader(mut input: R) -> ZipResult<Self> {
        let entries = read_central_directory(&mut input)?;
        Ok(Self { input, entries })
    }

    /// All entries, in central directory order
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry's decompressed data into a vector
    pub fn read_entry(&mut self, entry: &ZipEntry) -> ZipResult<Vec<u8>> {
        let capacity = entry.uncompressed_size.min(16 * 1024 * 1024) as usize;
        let mut data = Vec::with_capacity(capacity);
        self.read_entry_streaming(entry)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> ZipResult<Vec<u8>> {
        let entry = self.lookup(name)?;
        self.read_entry(&entry)
    }

    /// Get a reader that decompresses the entry on-the-fly
    ///
    /// The returned reader fails with `InvalidData` at end of stream if the
    /// CRC-32 does not match the central directory.
    pub fn read_entry_streaming(&mut self, entry: &ZipEntry) -> ZipResult<Box<dyn Read + '_>> {
        self.seek_to_data(entry)?;
        let limited = (&mut self.input).take(entry.compressed_size);

        let decoded: Box<dyn Read + '_> = match entry.compression_method {
            METHOD_STORED => Box::new(limited),
            METHOD_DEFLATE => Box::new(DeflateDecoder::new(limited)),
            #[cfg(feature = "zstd-support")]
            METHOD_ZSTD => Box::new(zstd::Decoder::new(limited)?),
            #[cfg(not(feature = "zstd-support"))]
            METHOD_ZSTD => return Err(ZipError::UnsupportedCompression(METHOD_ZSTD)),
            other => return Err(ZipError::UnsupportedCompression(other)),
        };

        Ok(Box::new(Crc32Reader::new(decoded, entry.crc32)))
    }

    /// Get a streaming reader for an entry by name
    pub fn read_entry_streaming_by_name(&mut self, name: &str) -> ZipResult<Box<dyn Read + '_>> {
        let entry = self.lookup(name)?;
        self.read_entry_streaming(&entry)
    }

    /// Give back the underlying input
    pub fn into_inner(self) -> R {
        self.input
    }

    fn lookup(&self, name: &str) -> ZipResult<ZipEntry> {
        self.find_entry(name)
            .cloned()
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))
    }

    /// Position the input at the first byte of the entry's data
    fn seek_to_data(&mut self, entry: &ZipEntry) -> ZipResult<()> {
        self.input.seek(SeekFrom::Start(entry.offset))?;
        let mut header = [0u8; 30];
        self.input.read_exact(&mut header)?;
        if header[0..4] != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ZipError::InvalidFormat(format!(
                "Invalid local file header signature for {}",
                entry.name
            )));
        }
        let mut fields = Fields::new(&header[26..]);
        let name_len = fields.u16()? as i64;
        let extra_len = fields.u16()? as i64;
        self.input.seek(SeekFrom::Current(name_len + extra_len))?;
        Ok(())
    }
}

/// Little-endian cursor over an in-memory record
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> ZipResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| ZipError::InvalidFormat("Truncated record".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> ZipResult<()> {
        self.bytes(len).map(|_| ())
    }

    fn u16(&mut self) -> ZipResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> ZipResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> ZipResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

/// Location of the central directory, from the (ZIP64) end record
#[derive(Debug)]
struct DirectoryLocation {
    total_entries: u64,
    size: u64,
    offset: u64,
}

fn read_central_directory<R: Read + Seek>(input: &mut R) -> ZipResult<Vec<ZipEntry>> {
    let (eocd_offset, tail) = find_eocd(input)?;
    let mut fields = Fields::new(&tail);
    fields.skip(4 + 2 + 2 + 2)?; // signature, disk numbers, entries on this disk
    let total_entries_16 = fields.u16()?;
    let cd_size_32 = fields.u32()?;
    let cd_offset_32 = fields.u32()?;

    let mut location = DirectoryLocation {
        total_entries: total_entries_16 as u64,
        size: cd_size_32 as u64,
        offset: cd_offset_32 as u64,
    };
    if total_entries_16 == u16::MAX || cd_size_32 == u32::MAX || cd_offset_32 == u32::MAX {
        location = read_zip64_eocd(input, eocd_offset)?;
    }
    trace!("{:?}", location);

    input.seek(SeekFrom::Start(location.offset))?;
    let mut directory = Vec::new();
    input.by_ref().take(location.size).read_to_end(&mut directory)?;
    if (directory.len() as u64) < location.size {
        return Err(ZipError::InvalidFormat(
            "Central directory extends past end of file".to_string(),
        ));
    }

    let mut fields = Fields::new(&directory);
    let mut entries = Vec::with_capacity(location.total_entries.min(1 << 16) as usize);
    for _ in 0..location.total_entries {
        let entry = read_directory_record(&mut fields)?;
        trace!("{:?}", entry);
        entries.push(entry);
    }
    Ok(entries)
}

fn read_directory_record(fields: &mut Fields<'_>) -> ZipResult<ZipEntry> {
    if fields.bytes(4)? != CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ZipError::InvalidFormat(
            "Invalid central directory signature".to_string(),
        ));
    }
    fields.skip(6)?; // version made by, version needed, flags
    let compression_method = fields.u16()?;
    fields.skip(4)?; // mod time/date
    let crc32 = fields.u32()?;
    let compressed_size_32 = fields.u32()?;
    let uncompressed_size_32 = fields.u32()?;
    let name_len = fields.u16()? as usize;
    let extra_len = fields.u16()? as usize;
    let comment_len = fields.u16()? as usize;
    fields.skip(8)?; // disk number, internal attrs, external attrs
    let offset_32 = fields.u32()?;
    let name = String::from_utf8_lossy(fields.bytes(name_len)?).into_owned();
    let extra = fields.bytes(extra_len)?;
    fields.skip(comment_len)?;

    let mut entry = ZipEntry {
        name,
        compressed_size: compressed_size_32 as u64,
        uncompressed_size: uncompressed_size_32 as u64,
        compression_method,
        crc32,
        offset: offset_32 as u64,
    };

    // ZIP64 extra field (0x0001) holds only the values whose 32-bit field
    // is saturated, in the order uncompressed, compressed, offset.
    let mut extra_fields = Fields::new(extra);
    while let (Ok(id), Ok(len)) = (extra_fields.u16(), extra_fields.u16()) {
        let mut data = Fields::new(extra_fields.bytes(len as usize)?);
        if id != 0x0001 {
            continue;
        }
        if uncompressed_size_32 == u32::MAX {
            entry.uncompressed_size = data.u64()?;
        }
        if compressed_size_32 == u32::MAX {
            entry.compressed_size = data.u64()?;
        }
        if offset_32 == u32::MAX {
            entry.offset = data.u64()?;
        }
        break;
    }

    Ok(entry)
}

/// Find the end of central directory record, returning its offset and bytes
fn find_eocd<R: Read + Seek>(input: &mut R) -> ZipResult<(u64, Vec<u8>)> {
    let file_size = input.seek(SeekFrom::End(0))?;
    if file_size < EOCD_MIN_LEN {
        return Err(ZipError::InvalidFormat("File too small to be a ZIP".to_string()));
    }
    let search_start = file_size.saturating_sub(EOCD_SEARCH_LEN);
    input.seek(SeekFrom::Start(search_start))?;
    let mut buffer = Vec::new();
    input.read_to_end(&mut buffer)?;

    let last_candidate = buffer.len() - EOCD_MIN_LEN as usize;
    let pos = (0..=last_candidate)
        .rev()
        .find(|&i| buffer[i..i + 4] == END_OF_CENTRAL_DIRECTORY_SIGNATURE)
        .ok_or_else(|| {
            ZipError::InvalidFormat("End of central directory not found".to_string())
        })?;

    Ok((search_start + pos as u64, buffer.split_off(pos)))
}

fn read_zip64_eocd<R: Read + Seek>(input: &mut R, eocd_offset: u64) -> ZipResult<DirectoryLocation> {
    // The locator is 20 bytes and sits right before the classic EOCD
    let locator_offset = eocd_offset
        .checked_sub(20)
        .ok_or_else(|| ZipError::InvalidFormat("ZIP64 EOCD locator not found".to_string()))?;
    input.seek(SeekFrom::Start(locator_offset))?;
    let mut locator = [0u8; 20];
    input.read_exact(&mut locator)?;
    if locator[0..4] != ZIP64_LOCATOR_SIGNATURE {
        return Err(ZipError::InvalidFormat(
            "ZIP64 EOCD locator not found".to_string(),
        ));
    }
    let mut fields = Fields::new(&locator[8..16]);
    let zip64_eocd_offset = fields.u64()?;

    input.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let mut record = [0u8; 56];
    input.read_exact(&mut record)?;
    let mut fields = Fields::new(&record);
    let signature = fields.u32()?;
    if signature != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ZipError::InvalidFormat(format!(
            "Invalid ZIP64 EOCD signature: 0x{:08x}",
            signature
        )));
    }
    // record size, versions, disk numbers, entries on this disk
    fields.skip(8 + 2 + 2 + 4 + 4 + 8)?;
    Ok(DirectoryLocation {
        total_entries: fields.u64()?,
        size: fields.u64()?,
        offset: fields.u64()?,
    })
}

/// Reader that validates the CRC32 when it reaches the EOF.
struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    fn new(inner: R, expected: u32) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            let actual = self.hasher.clone().finalize();
            if actual != self.expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CRC-32 mismatch: expected {:08x}, got {:08x}",
                        self.expected, actual
                    ),
                ));
            }
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}
