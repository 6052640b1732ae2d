//! Writing whole archives into sinks.
//!
//! These functions drive an [`ArchiveProducer`] with unbounded demand and
//! write every segment it delivers to a [`Sink`].  [`create_tar`] and
//! [`create_tar_file`] run on an [`IoExecutor`] and return an
//! [`ArchiveTask`]; [`write_archive`] runs on the calling thread.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, error, trace};
use tokio::sync::oneshot;

use crate::{
    error::{Error, Result},
    executor::IoExecutor,
    flow::{Publisher, Subscriber, Subscription},
    producer::{ArchiveOptions, ArchiveProducer, CancelHandle},
    segment::Segment,
    sink::Sink,
};

/// A sink shared between the caller and the executor.
pub type SharedSink<S> = Arc<Mutex<S>>;

/// What a finished archive contains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Number of entries (headers) written.
    pub files: usize,
    /// Number of segments written.
    pub segments: u64,
    /// Total archive size in bytes.
    pub bytes: u64,
}

/// Access to a sink for the duration of one segment.
trait SinkAccess {
    fn with_sink<R>(&mut self, f: impl FnOnce(&mut dyn Sink) -> R) -> R;
}

impl<S: Sink> SinkAccess for SharedSink<S> {
    fn with_sink<R>(&mut self, f: impl FnOnce(&mut dyn Sink) -> R) -> R {
        let mut guard = self
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut *guard)
    }
}

impl<S: Sink> SinkAccess for &mut S {
    fn with_sink<R>(&mut self, f: impl FnOnce(&mut dyn Sink) -> R) -> R {
        f(&mut **self)
    }
}

/// Writes each segment to a sink and reports the first terminal signal.
struct SinkSubscriber<A> {
    sink: A,
    summary: ArchiveSummary,
    outcome: Option<oneshot::Sender<Result<ArchiveSummary>>>,
}

impl<A: SinkAccess> SinkSubscriber<A> {
    fn new(sink: A, outcome: oneshot::Sender<Result<ArchiveSummary>>) -> Self {
        Self {
            sink,
            summary: ArchiveSummary::default(),
            outcome: Some(outcome),
        }
    }

    fn resolve(&mut self, result: Result<ArchiveSummary>) {
        // a receiver that was dropped no longer cares
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(result);
        }
    }
}

impl<A: SinkAccess> Subscriber<Segment> for SinkSubscriber<A> {
    fn on_next(&mut self, segment: Segment) -> Result<()> {
        let written = self.sink.with_sink(|sink| segment.write_to(sink))?;
        trace!("wrote {segment:?}");
        self.summary.segments += 1;
        self.summary.bytes += written;
        if segment.is_header() {
            self.summary.files += 1;
        }
        Ok(())
    }

    fn on_error(&mut self, error: Error) {
        error!("archive failed after {} bytes: {error}", self.summary.bytes);
        self.resolve(Err(error));
    }

    fn on_complete(&mut self) {
        let result = match self.sink.with_sink(|sink| sink.flush()) {
            Ok(()) => {
                debug!(
                    "archive finished: {} files, {} bytes",
                    self.summary.files, self.summary.bytes
                );
                Ok(self.summary)
            }
            Err(err) => Err(err.into()),
        };
        self.resolve(result);
    }
}

/// An archive being produced on an [`IoExecutor`].
#[derive(Debug)]
pub struct ArchiveTask {
    outcome: oneshot::Receiver<Result<ArchiveSummary>>,
    cancel: CancelHandle,
}

impl ArchiveTask {
    /// Stop producing the archive.  Whatever was already written stays in the
    /// sink and the task resolves successfully with what was written so far.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the archive to finish.
    pub async fn wait(self) -> Result<ArchiveSummary> {
        self.outcome.await.unwrap_or(Err(Error::Aborted))
    }

    /// Block the current thread until the archive finishes.
    ///
    /// Must not be called from within an async context; use
    /// [`ArchiveTask::wait`] there.
    pub fn join(self) -> Result<ArchiveSummary> {
        self.outcome.blocking_recv().unwrap_or(Err(Error::Aborted))
    }
}

/// Start writing an archive of `paths` into `sink` on `executor`.
///
/// The paths are validated before this returns, so a directory or a missing
/// file is reported here rather than through the task.  Files are archived
/// in reverse order.
pub fn create_tar<S, I>(
    executor: &IoExecutor,
    sink: SharedSink<S>,
    paths: I,
    options: ArchiveOptions,
) -> Result<ArchiveTask>
where
    S: Sink + Send + 'static,
    I: IntoIterator,
    I::Item: Into<PathBuf>,
{
    let producer = ArchiveProducer::new(paths, options)?;
    let cancel = producer.cancel_handle();
    let (sender, outcome) = oneshot::channel();
    let subscription = Subscription::new(producer, SinkSubscriber::new(sink, sender));

    executor.spawn(move || subscription.request(i64::MAX));
    Ok(ArchiveTask { outcome, cancel })
}

/// Start writing an archive of `paths` into a new file at `archive_path`,
/// replacing any existing file.
pub fn create_tar_file<I>(
    executor: &IoExecutor,
    archive_path: impl AsRef<Path>,
    paths: I,
    options: ArchiveOptions,
) -> Result<ArchiveTask>
where
    I: IntoIterator,
    I::Item: Into<PathBuf>,
{
    // validate before touching the destination
    let producer = ArchiveProducer::new(paths, options)?;
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(archive_path.as_ref())?;
    debug!("writing archive to {}", archive_path.as_ref().display());

    let cancel = producer.cancel_handle();
    let (sender, outcome) = oneshot::channel();
    let subscription = Subscription::new(
        producer,
        SinkSubscriber::new(Arc::new(Mutex::new(file)), sender),
    );

    executor.spawn(move || subscription.request(i64::MAX));
    Ok(ArchiveTask { outcome, cancel })
}

/// Write an archive of `paths` into `sink` on the calling thread.
pub fn write_archive<S, I>(
    sink: &mut S,
    paths: I,
    options: ArchiveOptions,
) -> Result<ArchiveSummary>
where
    S: Sink,
    I: IntoIterator,
    I::Item: Into<PathBuf>,
{
    let mut producer = ArchiveProducer::new(paths, options)?;
    let (sender, mut outcome) = oneshot::channel();
    let mut subscriber = SinkSubscriber::new(sink, sender);
    producer.request(i64::MAX, &mut subscriber);
    outcome.try_recv().unwrap_or(Err(Error::Aborted))
}
