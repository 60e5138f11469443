//! # lazy-zip: Bounded-Memory Batch ZIP Writer
//!
//! `lazy-zip` writes many logical files into one ZIP archive while keeping
//! memory flat. Each entry's content is opened only when its turn comes and is
//! streamed into the archive in fixed-size chunks, so the peak footprint is a
//! few small buffers no matter how many entries there are or how big they get.
//!
//! ## Features
//!
//! - **Lazy Sources**: files, closures, readers or generated bytes, opened one at a time
//! - **Chunked Streaming**: one reusable chunk buffer for the whole archive
//! - **Strict Protocol**: duplicate names and out-of-order calls are errors, not surprises
//! - **Fail Fast**: the first source or sink failure aborts the archive
//! - **Read Back**: a small streaming reader with CRC-32 verification
//!
//! ## Quick Start
//!
//! ### Writing many files
//!
//! ```no_run
//! use lazy_zip::{ArchiveStreamWriter, EntryDescriptor, GeneratedSource};
//!
//! let entries = (1..100).map(|i| {
//!     EntryDescriptor::new(format!("test {i}"), GeneratedSource::zeros(10 * 1024 * 1024))
//! });
//!
//! let mut writer = ArchiveStreamWriter::new();
//! let summary = writer.write_to_path(entries, "output.zip")?;
//! println!("{} entries, {} bytes", summary.entries, summary.uncompressed_bytes);
//! # Ok::<(), lazy_zip::ZipError>(())
//! ```
//!
//! ### Driving the encoder directly
//!
//! ```no_run
//! use lazy_zip::StreamingZipWriter;
//! use std::io::Cursor;
//!
//! let mut writer = StreamingZipWriter::from_writer(Cursor::new(Vec::new()))?;
//!
//! writer.start_entry("data.txt")?;
//! writer.write_data(b"In-memory ZIP content")?;
//! writer.close_entry()?;
//!
//! // finish() returns the writer, allowing you to extract the data
//! let zip_bytes = writer.finish()?.into_inner();
//! println!("Created ZIP with {} bytes", zip_bytes.len());
//! # Ok::<(), lazy_zip::ZipError>(())
//! ```
//!
//! ### Reading it back
//!
//! ```no_run
//! use lazy_zip::StreamingZipReader;
//!
//! let mut reader = StreamingZipReader::open("output.zip")?;
//! for entry in reader.entries() {
//!     println!("{}: {} bytes", entry.name, entry.uncompressed_size);
//! }
//! let data = reader.read_entry_by_name("test 1")?;
//! # Ok::<(), lazy_zip::ZipError>(())
//! ```

pub mod archive;
pub mod error;
pub mod reader;
pub mod source;
pub mod writer;

pub use archive::{ArchiveConfig, ArchiveStreamWriter, ArchiveSummary, DEFAULT_CHUNK_SIZE};
pub use error::{ZipError, ZipResult};
pub use reader::{StreamingZipReader, ZipEntry};
pub use source::{
    BytesSource, ContentSource, EntryDescriptor, FileSource, FnSource, GeneratedSource,
    ReaderSource,
};
pub use writer::{CompressionMethod, StreamingZipWriter};
