//! Lazy vs. eager: 99 entries of 10 MB each
//!
//! Streams `test 1`..`test 99`, all backed by the same 10 MB file, into one
//! archive with 4 KiB chunks and reports resident memory as it goes. With
//! `--eager` it instead loads every entry's bytes up front, the way a naive
//! implementation would, and reports how far memory climbs.
//!
//! Run with:
//! ```bash
//! cargo run --example memory_scenario --release
//! cargo run --example memory_scenario --release -- --eager
//! ```
//!
//! Under a 256 MB cap (`ulimit -v 262144`) the streaming run completes while
//! the eager run is killed or fails to allocate.

use lazy_zip::{ArchiveStreamWriter, EntryDescriptor, StreamingZipReader};
use std::path::Path;
use std::time::Instant;

const MEGA_BYTE: usize = 1024 * 1024;
const ENTRY_COUNT: usize = 100;

/// Get current memory usage in MB (Linux only)
#[cfg(target_os = "linux")]
fn get_memory_usage_mb() -> f64 {
    let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<f64>().ok())
        .map(|kb| kb / 1024.0)
        .unwrap_or(0.0)
}

#[cfg(not(target_os = "linux"))]
fn get_memory_usage_mb() -> f64 {
    0.0 // Not supported on non-Linux
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let eager = std::env::args().any(|arg| arg == "--eager");

    let dir = tempfile::tempdir()?;
    let payload = dir.path().join("eager-allocation");
    std::fs::write(&payload, vec![0u8; 10 * MEGA_BYTE])?;

    println!("Initial memory: {:.2} MB", get_memory_usage_mb());
    if eager {
        eager_load(&payload)
    } else {
        stream(&payload, &dir.path().join("output.zip"))
    }
}

fn stream(payload: &Path, zip_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Streaming {} entries of 10 MB...", ENTRY_COUNT - 1);
    let start = Instant::now();
    let mut max_mem: f64 = 0.0;

    // descriptors are built on demand, after the previous entry is closed
    let entries = (1..ENTRY_COUNT).map(|i| {
        let current = get_memory_usage_mb();
        max_mem = max_mem.max(current);
        if i % 10 == 0 {
            println!("   Entry {i} - Memory: {current:.2} MB");
        }
        EntryDescriptor::from_file(format!("test {i}"), payload)
    });

    let summary = ArchiveStreamWriter::new().write_to_path(entries, zip_path)?;
    let duration = start.elapsed();

    let reader = StreamingZipReader::open(zip_path)?;
    println!("\nResults:");
    println!("   • Entries: {} ({} in archive)", summary.entries, reader.entries().len());
    println!(
        "   • Content: {} MB -> {:.2} MB",
        summary.uncompressed_bytes / MEGA_BYTE as u64,
        summary.compressed_bytes as f64 / MEGA_BYTE as f64
    );
    println!("   • Time taken: {:.2}s", duration.as_secs_f64());
    println!("   • Max memory: {:.2} MB", max_mem);
    Ok(())
}

fn eager_load(payload: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading {} entries of 10 MB eagerly...", ENTRY_COUNT - 1);
    let mut loaded: Vec<Vec<u8>> = Vec::new();
    for i in 1..ENTRY_COUNT {
        loaded.push(std::fs::read(payload)?);
        if i % 10 == 0 {
            println!("   Entry {i} - Memory: {:.2} MB", get_memory_usage_mb());
        }
    }
    let total: usize = loaded.iter().map(Vec::len).sum();
    println!("\nHeld {} MB in memory at once", total / MEGA_BYTE);
    println!("   • Memory: {:.2} MB", get_memory_usage_mb());
    Ok(())
}
