//! Test utilities for tarflow.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    flow::Subscriber,
    segment::Segment,
};

/// Records everything a publisher signals.
#[derive(Debug)]
pub(crate) struct Collector<T> {
    pub items: Vec<T>,
    pub errors: Vec<Error>,
    pub completions: usize,
    /// Fail `on_next` once this many items have been received.
    pub fail_after: Option<usize>,
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
            completions: 0,
            fail_after: None,
        }
    }
}

impl<T> Subscriber<T> for Collector<T> {
    fn on_next(&mut self, item: T) -> Result<()> {
        assert_eq!(self.completions, 0, "item delivered after completion");
        if self.fail_after == Some(self.items.len()) {
            return Err(Error::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        self.items.push(item);
        Ok(())
    }

    fn on_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    fn on_complete(&mut self) {
        self.completions += 1;
    }
}

impl Collector<Segment> {
    /// Concatenate the bytes of every collected segment.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in &self.items {
            segment.write_to(&mut out).unwrap();
        }
        out
    }

    pub fn lens(&self) -> Vec<u64> {
        self.items.iter().map(Segment::len).collect()
    }
}

/// Deterministic, position-dependent content so misplaced bytes show up.
pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) | 1)
        .collect()
}

/// Write a fixture file of `len` patterned bytes into `dir`.
pub(crate) fn fixture(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, pattern(len, name.len() as u8)).unwrap();
    path
}
