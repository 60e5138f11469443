//! Basic usage example for lazy-zip

use lazy_zip::{
    ArchiveStreamWriter, EntryDescriptor, FnSource, GeneratedSource, StreamingZipReader,
};
use std::io::Cursor;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== lazy-zip Basic Example ===\n");

    // Nothing is read until the writer reaches each entry
    let entries = vec![
        EntryDescriptor::from_bytes("hello.txt", "Hello, lazy-zip!"),
        EntryDescriptor::new(
            "folder/generated.txt",
            FnSource::new(|| Ok(Cursor::new(b"Line 1\nLine 2\nLine 3\n".to_vec()))),
        ),
        EntryDescriptor::new("zeros.bin", GeneratedSource::zeros(1024 * 1024)),
    ];

    println!("Creating test.zip...");
    let summary = ArchiveStreamWriter::new().write_to_path(entries, "test.zip")?;
    println!(
        "✓ Created test.zip: {} entries, {} bytes -> {} bytes\n",
        summary.entries, summary.uncompressed_bytes, summary.compressed_bytes
    );

    println!("Reading test.zip...");
    let mut reader = StreamingZipReader::open("test.zip")?;

    println!("Entries in ZIP:");
    for entry in reader.entries() {
        println!("  - {} ({} bytes)", entry.name, entry.uncompressed_size);
    }
    println!();

    println!("Reading folder/generated.txt:");
    let data = reader.read_entry_by_name("folder/generated.txt")?;
    println!("  Content:\n{}", String::from_utf8_lossy(&data));

    println!("✓ All done!");

    Ok(())
}
