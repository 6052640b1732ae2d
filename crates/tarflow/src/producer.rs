//! The archive producer.
//!
//! [`ArchiveProducer`] is a [`Publisher`] of [`Segment`]s.  Each request for
//! `n` segments delivers at most `n`, and whatever cannot be delivered yet
//! waits in a small staging queue until the next request.  Files are archived
//! in the reverse of the order they were given in.

use std::{
    collections::VecDeque,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, trace, warn};

use crate::{
    entry::{ContentSource, Entry},
    error::{Error, Result},
    flow::{Publisher, Subscriber},
    forward::{ChunkForwarder, Forwarded, Outcome},
    mmap::{validate_chunk_size, MmapPublisher, DEFAULT_CHUNK_SIZE},
    padding::{end_of_archive, padding_for},
    segment::{FileContent, Segment},
};

/// Most segments ever waiting for demand at once: a padding block, the next
/// header and the end-of-archive marker.
pub const STAGING_CAPACITY: usize = 3;

/// How file content is carried in the segment stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentStrategy {
    /// One [`Segment::File`] per file, moved with `sendfile(2)` when the sink
    /// is a regular file.
    #[default]
    Transfer,
    /// The file is memory-mapped and delivered as [`Segment::Chunk`]s of
    /// `chunk_size` bytes, one per unit of demand.
    Mmap { chunk_size: usize },
}

impl ContentStrategy {
    /// Memory-mapped delivery with [`DEFAULT_CHUNK_SIZE`] chunks.
    pub fn mmap() -> Self {
        ContentStrategy::Mmap {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// What a request for a negative number of segments does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DemandPolicy {
    /// Report [`Error::ProtocolViolation`] and carry on.
    #[default]
    Lenient,
    /// Report [`Error::ProtocolViolation`] and end the sequence.
    Strict,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub strategy: ContentStrategy,
    pub demand_policy: DemandPolicy,
}

impl ArchiveOptions {
    pub fn strategy(mut self, strategy: ContentStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn demand_policy(mut self, demand_policy: DemandPolicy) -> Self {
        self.demand_policy = demand_policy;
        self
    }
}

/// Cooperative cancellation for a producer running elsewhere.
///
/// The producer checks the flag before each step of a request and, once it
/// is raised, cancels itself: the subscriber sees `on_complete` and nothing
/// more.  A segment already being written is finished first.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
enum InFlight {
    File(FileContent),
    Chunks(ChunkForwarder<MmapPublisher>),
}

impl From<ContentSource> for InFlight {
    fn from(source: ContentSource) -> Self {
        match source {
            ContentSource::File(content) => InFlight::File(content),
            ContentSource::Chunks(publisher) => InFlight::Chunks(ChunkForwarder::new(publisher)),
        }
    }
}

#[derive(Debug)]
pub struct ArchiveProducer {
    paths: Vec<PathBuf>,
    /// Files not yet started; the next one is `paths[remaining - 1]`.
    remaining: usize,
    options: ArchiveOptions,
    staged: VecDeque<Segment>,
    in_flight: Option<InFlight>,
    trailer_staged: bool,
    terminated: bool,
    cancel_flag: CancelHandle,
}

/// Reject inputs that can never be archived before producing anything.
fn validate_path(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(Error::Directory(path.to_owned())),
        Ok(metadata) if !metadata.is_file() => Err(Error::NotRegularFile(path.to_owned())),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(path.to_owned())),
        Err(e) => Err(Error::Header {
            path: path.to_owned(),
            source: e.into(),
        }),
    }
}

impl ArchiveProducer {
    /// Prepare an archive of `paths`.
    ///
    /// Every path is checked up front: directories, missing files and
    /// anything else that is not a regular file are rejected here, and so is a chunk size that is not a non-zero multiple
    /// of 512.  Nothing is opened until segments are requested.
    pub fn new<I>(paths: I, options: ArchiveOptions) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        if let ContentStrategy::Mmap { chunk_size } = options.strategy {
            validate_chunk_size(chunk_size)?;
        }
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        for path in &paths {
            validate_path(path)?;
        }
        debug!("archiving {} files with {:?}", paths.len(), options);

        Ok(Self {
            remaining: paths.len(),
            paths,
            options,
            staged: VecDeque::with_capacity(STAGING_CAPACITY),
            in_flight: None,
            trailer_staged: false,
            terminated: false,
            cancel_flag: CancelHandle::default(),
        })
    }

    /// A handle that cancels this producer from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_flag.clone()
    }

    /// Number of files not yet started.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Whether the sequence has ended by completion, error or cancellation.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn stage(&mut self, segment: Segment) {
        debug_assert!(self.staged.len() < STAGING_CAPACITY);
        trace!("staging {segment:?}");
        self.staged.push_back(segment);
    }

    /// Hand `segment` downstream if there is demand for it, else stage it.
    fn deliver(
        &mut self,
        segment: Segment,
        demand: &mut u64,
        subscriber: &mut dyn Subscriber<Segment>,
    ) -> Result<()> {
        if *demand == 0 {
            self.stage(segment);
            return Ok(());
        }
        trace!("delivering {segment:?}");
        subscriber.on_next(segment)?;
        *demand -= 1;
        Ok(())
    }

    fn drain_staged(
        &mut self,
        demand: &mut u64,
        subscriber: &mut dyn Subscriber<Segment>,
    ) -> Result<()> {
        while *demand > 0 {
            let Some(segment) = self.staged.pop_front() else {
                break;
            };
            trace!("delivering staged {segment:?}");
            subscriber.on_next(segment)?;
            *demand -= 1;
        }
        Ok(())
    }

    fn start_next_file(&mut self) -> Result<()> {
        self.remaining -= 1;
        let entry = Entry::open(&self.paths[self.remaining], self.options.strategy)?;
        debug!(
            "starting {} ({} left)",
            entry.path().display(),
            self.remaining
        );
        let (header, content) = entry.into_parts();
        self.stage(Segment::Header(Box::new(header)));
        self.in_flight = content.map(InFlight::from);
        Ok(())
    }

    /// Deliver as much in-flight content as demand allows, followed by its
    /// padding.  Returns whether anything happened.
    fn deliver_content(
        &mut self,
        demand: &mut u64,
        subscriber: &mut dyn Subscriber<Segment>,
    ) -> Result<bool> {
        match self.in_flight.take() {
            None => Ok(false),
            Some(InFlight::File(content)) => {
                let padding = padding_for(content.len());
                self.deliver(Segment::File(content), demand, subscriber)?;
                self.deliver(Segment::Padding(padding), demand, subscriber)?;
                Ok(true)
            }
            Some(InFlight::Chunks(mut forwarder)) => {
                let Forwarded { delivered, outcome } = forwarder.forward(*demand, subscriber);
                *demand = demand.saturating_sub(delivered);
                match outcome {
                    Outcome::Pending => {
                        self.in_flight = Some(InFlight::Chunks(forwarder));
                        Ok(delivered > 0)
                    }
                    Outcome::Finished { last_len } => {
                        if let Some(len) = last_len {
                            let padding = Segment::Padding(padding_for(len as u64));
                            self.deliver(padding, demand, subscriber)?;
                        }
                        Ok(true)
                    }
                    Outcome::Failed(error) => Err(error),
                }
            }
        }
    }

    fn produce(
        &mut self,
        demand: &mut u64,
        subscriber: &mut dyn Subscriber<Segment>,
    ) -> Result<()> {
        while *demand > 0 && !self.cancel_flag.is_cancelled() {
            if self.in_flight.is_none() && self.remaining > 0 {
                self.start_next_file()?;
            }

            self.drain_staged(demand, subscriber)?;
            if *demand == 0 {
                break;
            }

            let progressed = self.deliver_content(demand, subscriber)?;
            if self.in_flight.is_none() && self.remaining == 0 {
                break;
            }
            if !progressed && self.in_flight.is_some() {
                // chunk publisher has nothing for us right now
                break;
            }
        }
        Ok(())
    }

    /// Emit the end-of-archive marker once everything else is out, and
    /// complete once it has been delivered.
    fn finish(
        &mut self,
        mut demand: u64,
        subscriber: &mut dyn Subscriber<Segment>,
    ) -> Result<()> {
        if self.remaining > 0 || self.in_flight.is_some() {
            return Ok(());
        }
        if !self.trailer_staged {
            self.trailer_staged = true;
            self.deliver(Segment::Padding(end_of_archive()), &mut demand, subscriber)?;
        }
        if self.staged.is_empty() {
            self.terminated = true;
            debug!("archive complete");
            subscriber.on_complete();
        }
        Ok(())
    }

    fn shut_down(&mut self) {
        self.terminated = true;
        self.remaining = 0;
        self.staged.clear();
        if let Some(InFlight::Chunks(mut forwarder)) = self.in_flight.take() {
            forwarder.cancel();
        }
    }

    fn fail(&mut self, error: Error, subscriber: &mut dyn Subscriber<Segment>) {
        warn!("archive failed: {error}");
        self.shut_down();
        subscriber.on_error(error);
    }
}

impl Publisher for ArchiveProducer {
    type Item = Segment;

    fn request(&mut self, n: i64, subscriber: &mut dyn Subscriber<Segment>) {
        if self.terminated || n == 0 {
            return;
        }
        if n < 0 {
            match self.options.demand_policy {
                DemandPolicy::Lenient => {
                    warn!("ignoring request for {n} segments");
                    subscriber.on_error(Error::ProtocolViolation(n));
                }
                DemandPolicy::Strict => self.fail(Error::ProtocolViolation(n), subscriber),
            }
            return;
        }

        let mut demand = n as u64;
        let mut result = self.produce(&mut demand, subscriber);
        if result.is_ok() && !self.cancel_flag.is_cancelled() {
            result = self.finish(demand, subscriber);
        }
        match result {
            Err(error) => self.fail(error, subscriber),
            Ok(()) if self.cancel_flag.is_cancelled() => self.cancel(subscriber),
            Ok(()) => {}
        }
    }

    fn cancel(&mut self, subscriber: &mut dyn Subscriber<Segment>) {
        self.cancel_flag.cancel();
        if !self.terminated {
            debug!("archive cancelled with {} files left", self.remaining);
            self.shut_down();
            subscriber.on_complete();
        }
    }
}
