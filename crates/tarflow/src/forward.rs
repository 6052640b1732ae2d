//! Relays a chunk publisher's output into the segment stream.

use log::trace;

use crate::{
    error::{Error, Result},
    flow::{Publisher, Subscriber},
    mmap::FileChunk,
    segment::Segment,
};

/// What a call to [`ChunkForwarder::forward`] achieved.
#[derive(Debug)]
pub struct Forwarded {
    /// Chunks handed downstream, each one unit of demand.
    pub delivered: u64,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub enum Outcome {
    /// The chunk publisher has more to give.
    Pending,
    /// The chunk publisher completed.  `last_len` is the length of the final
    /// chunk, or `None` if there were no chunks at all.
    Finished { last_len: Option<usize> },
    /// The chunk publisher, or the downstream subscriber, failed.
    Failed(Error),
}

/// Passes demand 1:1 from the archive stream to a chunk publisher and chunks
/// back as [`Segment::Chunk`]s, remembering how long the last one was.
#[derive(Debug)]
pub struct ChunkForwarder<P> {
    publisher: P,
    last_len: Option<usize>,
}

struct Relay<'a> {
    downstream: &'a mut dyn Subscriber<Segment>,
    delivered: u64,
    last_len: &'a mut Option<usize>,
    completed: bool,
    error: Option<Error>,
}

impl Subscriber<FileChunk> for Relay<'_> {
    fn on_next(&mut self, chunk: FileChunk) -> Result<()> {
        trace!("forwarding chunk {}/{}", chunk.index + 1, chunk.count);
        *self.last_len = Some(chunk.buffer.len());
        self.downstream.on_next(Segment::Chunk(chunk.buffer))?;
        self.delivered += 1;
        Ok(())
    }

    fn on_error(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }

    fn on_complete(&mut self) {
        self.completed = true;
    }
}

impl<P: Publisher<Item = FileChunk>> ChunkForwarder<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            last_len: None,
        }
    }

    /// Ask the chunk publisher for `demand` chunks and deliver whatever it
    /// produces to `downstream`.
    pub fn forward(
        &mut self,
        demand: u64,
        downstream: &mut dyn Subscriber<Segment>,
    ) -> Forwarded {
        let mut relay = Relay {
            downstream,
            delivered: 0,
            last_len: &mut self.last_len,
            completed: false,
            error: None,
        };
        self.publisher
            .request(i64::try_from(demand).unwrap_or(i64::MAX), &mut relay);

        let outcome = match (relay.error.take(), relay.completed) {
            (Some(error), _) => Outcome::Failed(error),
            (None, true) => Outcome::Finished {
                last_len: *relay.last_len,
            },
            (None, false) => Outcome::Pending,
        };
        Forwarded {
            delivered: relay.delivered,
            outcome,
        }
    }

    /// Stop the chunk publisher, discarding its completion signal.
    pub fn cancel(&mut self) {
        self.publisher.cancel(&mut Discard);
    }
}

struct Discard;

impl Subscriber<FileChunk> for Discard {
    fn on_next(&mut self, _: FileChunk) -> Result<()> {
        Ok(())
    }

    fn on_error(&mut self, _: Error) {}

    fn on_complete(&mut self) {}
}
