//! End-to-end archive tests.
//!
//! Archives are produced into memory and into files, then read back with the
//! `tar` crate to check that entry names, sizes, modes and contents survive.

use std::{
    fs,
    io::Read,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use similar_asserts::assert_eq;

use tarflow::{
    create_tar, create_tar_file, write_archive, ArchiveOptions, ArchiveProducer, ContentStrategy,
    Error, IoExecutor, Publisher, Result, Segment, Subscriber,
};

fn content(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Read an archive back as (name, size, mode, content) tuples.
fn read_back(archive: &[u8]) -> Vec<(String, u64, u32, Vec<u8>)> {
    let mut reader = tar::Archive::new(archive);
    reader
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.entry_type(), tar::EntryType::Regular);
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let size = header.size().unwrap();
            let mode = header.mode().unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (name, size, mode, data)
        })
        .collect()
}

/// Records segments, errors and completions.
#[derive(Default)]
struct Recorder {
    segments: Vec<Segment>,
    errors: Vec<Error>,
    completions: usize,
}

impl Subscriber<Segment> for Recorder {
    fn on_next(&mut self, segment: Segment) -> Result<()> {
        assert_eq!(self.completions, 0);
        self.segments.push(segment);
        Ok(())
    }

    fn on_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    fn on_complete(&mut self) {
        self.completions += 1;
    }
}

impl Recorder {
    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in &self.segments {
            segment.write_to(&mut out).unwrap();
        }
        out
    }
}

#[test]
fn test_single_small_file() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a.txt", b"hello");
    fs::set_permissions(&a, fs::Permissions::from_mode(0o640)).unwrap();

    let mut archive = Vec::new();
    let summary = write_archive(&mut archive, [&a], ArchiveOptions::default()).unwrap();
    assert_eq!(summary.bytes, 2048);
    assert_eq!(archive.len(), 2048);

    // header, then content, then zeros to the end
    assert_eq!(&archive[..5], b"a.txt");
    assert_eq!(&archive[257..263], b"ustar\0");
    assert_eq!(&archive[512..517], b"hello");
    assert!(archive[517..].iter().all(|&b| b == 0));

    let header = ustar_header::Header::from_bytes(&archive).unwrap();
    header.verify_checksum().unwrap();
    assert_eq!(header.entry_size().unwrap(), 5);

    assert_eq!(
        read_back(&archive),
        vec![("a.txt".to_owned(), 5, 0o640, b"hello".to_vec())]
    );
}

#[test]
fn test_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let empty = write_file(dir.path(), "empty", b"");

    let mut archive = Vec::new();
    write_archive(&mut archive, [&empty], ArchiveOptions::default()).unwrap();
    assert_eq!(archive.len(), 512 + 1024);
    assert_eq!(read_back(&archive)[0].1, 0);
}

#[test]
fn test_reverse_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a", &content(100, 1));
    let b = write_file(dir.path(), "b", &content(200, 2));

    let mut archive = Vec::new();
    write_archive(&mut archive, [&a, &b], ArchiveOptions::default()).unwrap();

    let entries = read_back(&archive);
    let names: Vec<_> = entries.iter().map(|e| e.0.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
    assert_eq!(entries[0].3, content(200, 2));
    assert_eq!(entries[1].3, content(100, 1));
}

#[test]
fn test_chunked_large_file() {
    let dir = tempfile::tempdir().unwrap();
    let data = content(10 << 20, 7);
    let big = write_file(dir.path(), "big.bin", &data);

    let options = ArchiveOptions::default().strategy(ContentStrategy::mmap());
    let mut recorder = Recorder::default();
    ArchiveProducer::new([&big], options)
        .unwrap()
        .request(i64::MAX, &mut recorder);

    let lens: Vec<u64> = recorder.segments.iter().map(Segment::len).collect();
    // header, three chunks, a full padding block, end marker
    assert_eq!(lens, vec![512, 4 << 20, 4 << 20, 2 << 20, 512, 1024]);
    assert_eq!(recorder.completions, 1);

    let archive = recorder.bytes();
    let entries = read_back(&archive);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].3 == data);
}

#[test]
fn test_demand_split() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a", &content(5, 0));
    let b = write_file(dir.path(), "b", &content(5, 1));

    let mut whole = Vec::new();
    write_archive(&mut whole, [&a, &b], ArchiveOptions::default()).unwrap();

    let mut producer = ArchiveProducer::new([&a, &b], ArchiveOptions::default()).unwrap();
    let mut recorder = Recorder::default();
    producer.request(3, &mut recorder);
    assert_eq!(recorder.segments.len(), 3);
    producer.request(2, &mut recorder);
    assert_eq!(recorder.segments.len(), 5);
    assert_eq!(recorder.completions, 0);
    producer.request(100, &mut recorder);
    assert_eq!(recorder.segments.len(), 7);
    assert_eq!(recorder.completions, 1);

    assert_eq!(recorder.bytes(), whole);
}

#[test]
fn test_rejects_directory() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a", b"x");
    let sub = dir.path().join("sub");
    fs::create_dir(&sub).unwrap();

    let mut archive = Vec::new();
    let err = write_archive(&mut archive, [&a, &sub], ArchiveOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Directory(ref p) if *p == sub));
    assert!(err.is_validation());
    assert!(archive.is_empty());
}

#[test]
fn test_rejects_special_files() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a", b"x");
    let fifo = dir.path().join("pipe");
    rustix::fs::mknodat(
        rustix::fs::CWD,
        &fifo,
        rustix::fs::FileType::Fifo,
        rustix::fs::Mode::from_raw_mode(0o600),
        0,
    )
    .unwrap();

    for special in [fifo.as_path(), Path::new("/dev/null")] {
        let mut archive = Vec::new();
        let err =
            write_archive(&mut archive, [a.as_path(), special], ArchiveOptions::default())
                .unwrap_err();
        assert!(matches!(err, Error::NotRegularFile(ref p) if p == special));
        assert!(err.is_validation());
        assert!(archive.is_empty());
    }
}

#[test]
fn test_cancel_after_header() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a", b"abc");

    let mut producer = ArchiveProducer::new([&a], ArchiveOptions::default()).unwrap();
    let mut recorder = Recorder::default();
    producer.request(1, &mut recorder);
    producer.cancel(&mut recorder);
    producer.request(10, &mut recorder);

    assert_eq!(recorder.segments.len(), 1);
    assert!(recorder.segments[0].is_header());
    assert_eq!(recorder.completions, 1);
    assert!(recorder.errors.is_empty());
}

#[test]
fn test_tar_file_on_executor() {
    let dir = tempfile::tempdir().unwrap();
    let inputs: Vec<_> = [0, 1, 511, 512, 513, 70_000]
        .iter()
        .enumerate()
        .map(|(i, &len)| write_file(dir.path(), &format!("f{i}"), &content(len, i as u8)))
        .collect();
    let archive_path = dir.path().join("out.tar");

    let executor = IoExecutor::start().unwrap();
    for strategy in [ContentStrategy::Transfer, ContentStrategy::Mmap { chunk_size: 4096 }] {
        let options = ArchiveOptions::default().strategy(strategy);
        let summary = create_tar_file(&executor, &archive_path, &inputs, options)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(summary.files, inputs.len());

        let archive = fs::read(&archive_path).unwrap();
        assert_eq!(archive.len() as u64, summary.bytes);
        assert_eq!(archive.len() % 512, 0);

        let entries = read_back(&archive);
        for (entry, (i, &len)) in entries
            .iter()
            .zip([0, 1, 511, 512, 513, 70_000].iter().enumerate().rev())
        {
            assert_eq!(entry.0, format!("f{i}"));
            assert_eq!(entry.1, len as u64);
            assert!(entry.3 == content(len, i as u8));
        }
    }
    executor.shutdown();
}

#[test]
fn test_shared_sink_on_executor() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a", &content(1234, 3));
    let sink = Arc::new(Mutex::new(Vec::new()));

    let executor = IoExecutor::start().unwrap();
    let summary = create_tar(&executor, Arc::clone(&sink), [&a], ArchiveOptions::default())
        .unwrap()
        .join()
        .unwrap();
    executor.shutdown();

    let archive = sink.lock().unwrap().clone();
    assert_eq!(archive.len() as u64, summary.bytes);
    assert_eq!(read_back(&archive)[0].3, content(1234, 3));
}
