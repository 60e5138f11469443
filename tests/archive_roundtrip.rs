use lazy_zip::{
    ArchiveConfig, ArchiveStreamWriter, EntryDescriptor, FnSource, StreamingZipReader, ZipError,
};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::tempdir;

const MEGA_BYTE: usize = 1024 * 1024;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Pseudo-random bytes so deflate cannot hide mistakes behind runs of zeros
fn create_file(path: &Path, size: usize) -> Vec<u8> {
    let mut state = 0x12345678u32;
    let data: Vec<u8> = (0..size)
        .map(|_| {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            (state >> 16) as u8
        })
        .collect();
    File::create(path).unwrap().write_all(&data).unwrap();
    data
}

fn test_entries(count: usize, path: &Path) -> impl Iterator<Item = EntryDescriptor> + '_ {
    (1..count).map(move |i| EntryDescriptor::from_file(format!("test {i}"), path))
}

#[test]
fn file_backed_entries_round_trip() {
    init_logging();
    let dir = tempdir().unwrap();
    let payload = dir.path().join("payload.bin");
    let expected = create_file(&payload, 64 * 1024 + 123);
    let zip_path = dir.path().join("output.zip");

    let mut writer = ArchiveStreamWriter::new();
    let summary = writer
        .write_to_path(test_entries(100, &payload), &zip_path)
        .unwrap();
    assert_eq!(summary.entries, 99);
    assert_eq!(summary.uncompressed_bytes, 99 * expected.len() as u64);

    let mut reader = StreamingZipReader::open(&zip_path).unwrap();
    let names: Vec<String> = reader.entries().iter().map(|e| e.name.clone()).collect();
    let wanted: Vec<String> = (1..100).map(|i| format!("test {i}")).collect();
    assert_eq!(names, wanted);

    for name in ["test 1", "test 50", "test 99"] {
        let mut stream = reader.read_entry_streaming_by_name(name).unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, expected, "content of {name}");
    }
    assert!(matches!(
        reader.read_entry_by_name("test 100"),
        Err(ZipError::EntryNotFound(_))
    ));
}

#[test]
fn lazy_suppliers_open_one_source_at_a_time() {
    init_logging();
    let dir = tempdir().unwrap();
    let payload = dir.path().join("payload.bin");
    let expected = create_file(&payload, 10_000);

    let open_now = std::rc::Rc::new(std::cell::Cell::new(0usize));
    let max_open = std::rc::Rc::new(std::cell::Cell::new(0usize));

    /// Counts itself as open until dropped
    struct Tracked {
        file: File,
        open_now: std::rc::Rc<std::cell::Cell<usize>>,
    }
    impl Read for Tracked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }
    }
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.open_now.set(self.open_now.get() - 1);
        }
    }

    let entries: Vec<EntryDescriptor> = (1..20)
        .map(|i| {
            let path = payload.clone();
            let open_now = open_now.clone();
            let max_open = max_open.clone();
            EntryDescriptor::new(
                format!("lazy {i}"),
                FnSource::new(move || {
                    open_now.set(open_now.get() + 1);
                    max_open.set(max_open.get().max(open_now.get()));
                    Ok(Tracked {
                        file: File::open(&path)?,
                        open_now: open_now.clone(),
                    })
                }),
            )
        })
        .collect();

    let mut writer = ArchiveStreamWriter::with_config(ArchiveConfig::fast());
    let output = writer.write(entries, io::Cursor::new(Vec::new())).unwrap();

    assert_eq!(open_now.get(), 0);
    assert_eq!(max_open.get(), 1);

    let mut reader = StreamingZipReader::from_reader(io::Cursor::new(output.into_inner())).unwrap();
    assert_eq!(reader.entries().len(), 19);
    assert_eq!(reader.read_entry_by_name("lazy 19").unwrap(), expected);
}

#[test]
fn source_deleted_mid_batch_aborts_and_discards() {
    init_logging();
    let dir = tempdir().unwrap();
    let present = dir.path().join("present.bin");
    create_file(&present, 4096);
    let missing = dir.path().join("missing.bin");
    let zip_path = dir.path().join("output.zip");

    let entries = vec![
        EntryDescriptor::from_file("a", &present),
        EntryDescriptor::from_file("b", &present),
        EntryDescriptor::from_file("c", &missing),
    ];
    let err = ArchiveStreamWriter::new()
        .write_to_path(entries, &zip_path)
        .unwrap_err();
    match err {
        ZipError::SourceUnavailable { name, source } => {
            assert_eq!(name, "c");
            assert_eq!(source.kind(), io::ErrorKind::NotFound);
        }
        other => panic!("expected SourceUnavailable, got {other:?}"),
    }
    assert!(!zip_path.exists());
}

// The full-size scenario: 99 entries backed by one 10 MB file, 4 KiB chunks.
// Slow in debug builds; run with `cargo test --release -- --ignored`.
#[test]
#[ignore]
fn hundred_entries_of_ten_megabytes() {
    init_logging();
    let dir = tempdir().unwrap();
    let payload = dir.path().join("eager-allocation");
    std::fs::write(&payload, vec![0u8; 10 * MEGA_BYTE]).unwrap();
    let zip_path = dir.path().join("root.zip");

    let mut writer = ArchiveStreamWriter::new();
    let summary = writer
        .write_to_path(test_entries(100, &payload), &zip_path)
        .unwrap();
    assert_eq!(summary.entries, 99);
    assert_eq!(summary.uncompressed_bytes, 99 * 10 * MEGA_BYTE as u64);

    let reader = StreamingZipReader::open(&zip_path).unwrap();
    assert_eq!(reader.entries().len(), 99);
    assert!(reader
        .entries()
        .iter()
        .all(|e| e.uncompressed_size == 10 * MEGA_BYTE as u64));
}
