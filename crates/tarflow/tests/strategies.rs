//! Property tests: whichever strategy and however demand is split, the
//! archive bytes come out the same.

use std::{fs, path::PathBuf};

use proptest::prelude::*;

use tarflow::{
    ArchiveOptions, ArchiveProducer, ContentStrategy, Error, Publisher, Result, Segment, Subscriber,
};

#[derive(Default)]
struct Capture {
    out: Vec<u8>,
    segments: usize,
    completions: usize,
}

impl Subscriber<Segment> for Capture {
    fn on_next(&mut self, segment: Segment) -> Result<()> {
        assert_eq!(self.completions, 0);
        segment.write_to(&mut self.out)?;
        self.segments += 1;
        Ok(())
    }

    fn on_error(&mut self, error: Error) {
        panic!("unexpected error: {error}");
    }

    fn on_complete(&mut self) {
        self.completions += 1;
    }
}

fn fixtures(dir: &tempfile::TempDir, sizes: &[usize]) -> Vec<PathBuf> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            let path = dir.path().join(format!("file-{i}"));
            let data: Vec<u8> = (0..len).map(|j| (j * 7 + i) as u8).collect();
            fs::write(&path, data).unwrap();
            path
        })
        .collect()
}

/// Drive a producer with the given request sizes, cycling through them until
/// it completes.
fn produce(paths: &[PathBuf], strategy: ContentStrategy, requests: &[i64]) -> Capture {
    let options = ArchiveOptions::default().strategy(strategy);
    let mut producer = ArchiveProducer::new(paths.iter().cloned(), options).unwrap();
    let mut sink = Capture::default();
    let mut delivered = 0;
    for &n in requests.iter().cycle() {
        producer.request(n, &mut sink);
        delivered += n as usize;
        assert!(sink.segments <= delivered, "more segments than requested");
        if sink.completions > 0 {
            break;
        }
    }
    assert_eq!(sink.completions, 1);
    sink
}

fn sizes_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(
        prop_oneof![
            Just(0usize),
            1usize..1024,
            Just(512usize),
            Just(4096usize),
            1024usize..20_000,
        ],
        0..5,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn test_strategies_identical(
        sizes in sizes_strategy(),
        blocks in 1usize..10,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures(&dir, &sizes);

        let transfer = produce(&paths, ContentStrategy::Transfer, &[i64::MAX]);
        let mmap = produce(&paths, ContentStrategy::Mmap { chunk_size: blocks * 512 }, &[i64::MAX]);
        prop_assert!(transfer.out == mmap.out);

        // content is always followed by 1..=512 bytes of padding
        let expected: usize = sizes
            .iter()
            .map(|&len| if len == 0 { 512 } else { 512 + (len / 512 + 1) * 512 })
            .sum::<usize>()
            + 1024;
        prop_assert_eq!(transfer.out.len(), expected);
    }

    #[test]
    fn test_demand_split_identical(
        sizes in sizes_strategy(),
        requests in prop::collection::vec(0i64..5, 1..6),
        chunked in any::<bool>(),
    ) {
        prop_assume!(requests.iter().any(|&n| n > 0));
        let dir = tempfile::tempdir().unwrap();
        let paths = fixtures(&dir, &sizes);
        let strategy = if chunked {
            ContentStrategy::Mmap { chunk_size: 1024 }
        } else {
            ContentStrategy::Transfer
        };

        let whole = produce(&paths, strategy, &[i64::MAX]);
        let split = produce(&paths, strategy, &requests);
        prop_assert!(whole.out == split.out);
        prop_assert_eq!(whole.segments, split.segments);
    }
}
