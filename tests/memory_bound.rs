//! Peak heap usage of a batch write stays flat while the content grows.
//!
//! A counting global allocator tracks live and peak bytes. The file holds a
//! single test so no other test thread allocates while it measures.

use lazy_zip::{ArchiveConfig, ArchiveStreamWriter, EntryDescriptor, GeneratedSource};
use std::alloc::{GlobalAlloc, Layout, System};
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountingAllocator;

static LIVE: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            let live = LIVE.fetch_add(layout.size(), Ordering::SeqCst) + layout.size();
            PEAK.fetch_max(live, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        LIVE.fetch_sub(layout.size(), Ordering::SeqCst);
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

/// Discards bytes, remembering only how many arrived
struct CountingSink {
    position: u64,
}

impl Write for CountingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for CountingSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(io::ErrorKind::Unsupported, "append only")),
        }
    }
}

/// Run `f` and return the peak heap growth it caused
fn peak_growth<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let baseline = LIVE.load(Ordering::SeqCst);
    PEAK.store(baseline, Ordering::SeqCst);
    let result = f();
    (result, PEAK.load(Ordering::SeqCst) - baseline)
}

fn streamed_peak(config: &ArchiveConfig, count: usize, size: u64) -> usize {
    let (written, peak) = peak_growth(|| {
        let entries =
            (1..=count).map(|i| EntryDescriptor::new(format!("test {i}"), GeneratedSource::zeros(size)));
        let mut writer = ArchiveStreamWriter::with_config(config.clone());
        let sink = writer.write(entries, CountingSink { position: 0 }).unwrap();
        sink.position
    });
    assert!(written > 0);
    peak
}

#[test]
fn streaming_peak_is_independent_of_content_size() {
    const MEGA_BYTE: u64 = 1024 * 1024;
    // compressor state plus a few buffers, far below the content volume
    const BOUND: usize = 8 * 1024 * 1024;

    for config in [ArchiveConfig::stored(), ArchiveConfig::fast()] {
        let small = streamed_peak(&config, 4, MEGA_BYTE / 2);
        let large = streamed_peak(&config, 16, 2 * MEGA_BYTE);
        assert!(small < BOUND, "{config:?}: small batch peaked at {small} bytes");
        assert!(large < BOUND, "{config:?}: large batch peaked at {large} bytes");
        // 16x the content, but only per-entry bookkeeping may grow
        assert!(
            large < small + 256 * 1024,
            "{config:?}: peak grew from {small} to {large} bytes"
        );
    }

    // The eager alternative: every entry's bytes materialised up front
    let (eager, eager_peak) = peak_growth(|| {
        (1..=16)
            .map(|_| vec![0u8; 2 * MEGA_BYTE as usize])
            .collect::<Vec<_>>()
    });
    assert_eq!(eager.len(), 16);
    drop(eager);
    assert!(
        eager_peak >= 32 * MEGA_BYTE as usize && eager_peak > 3 * BOUND,
        "eager load only peaked at {eager_peak} bytes"
    );
}
