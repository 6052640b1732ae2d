//! A small pull-based streaming protocol.
//!
//! A [`Publisher`] produces items only in response to demand expressed with
//! [`Publisher::request`], and hands them to a [`Subscriber`] passed in with
//! each call.  The rules every publisher in this crate follows:
//!
//! - the number of items delivered never exceeds the total demand requested;
//! - `request(0)` does nothing;
//! - a negative request is reported as [`Error::ProtocolViolation`];
//! - `on_complete` or a terminal `on_error` is signalled at most once, and no
//!   item follows it.
//!
//! A [`Subscription`] pairs a publisher with its subscriber behind a mutex so
//! requests from several threads are serialized.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::error::{Error, Result};

pub trait Subscriber<T> {
    /// Receive the next item.
    ///
    /// Returning an error ends the sequence: the publisher stops and reports
    /// the error back through [`Subscriber::on_error`].
    fn on_next(&mut self, item: T) -> Result<()>;

    fn on_error(&mut self, error: Error);

    fn on_complete(&mut self);
}

pub trait Publisher {
    type Item;

    /// Ask for up to `n` more items.
    ///
    /// Implementations must not call back into `request` from inside the
    /// subscriber callbacks they invoke.
    fn request(&mut self, n: i64, subscriber: &mut dyn Subscriber<Self::Item>);

    /// Stop producing.  The subscriber sees `on_complete` unless the sequence
    /// had already ended.
    fn cancel(&mut self, subscriber: &mut dyn Subscriber<Self::Item>);
}

struct Linked<P, S> {
    publisher: P,
    subscriber: S,
}

/// A publisher and its subscriber, shareable across threads.
///
/// Cloning a `Subscription` yields another handle to the same pair.  Calls
/// through any handle are serialized: a second `request` waits until the one
/// in progress has returned.  Subscriber callbacks must not use a handle to
/// their own subscription, since that would wait on itself.
pub struct Subscription<P, S> {
    linked: Arc<Mutex<Linked<P, S>>>,
}

impl<P, S> Clone for Subscription<P, S> {
    fn clone(&self) -> Self {
        Self {
            linked: Arc::clone(&self.linked),
        }
    }
}

impl<P, S> fmt::Debug for Subscription<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl<P, S> Subscription<P, S>
where
    P: Publisher,
    S: Subscriber<P::Item>,
{
    pub fn new(publisher: P, subscriber: S) -> Self {
        Self {
            linked: Arc::new(Mutex::new(Linked {
                publisher,
                subscriber,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Linked<P, S>> {
        // A panicking subscriber leaves the pair usable; the publisher's own
        // state decides what happens next.
        self.linked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn request(&self, n: i64) {
        let mut guard = self.lock();
        let Linked {
            publisher,
            subscriber,
        } = &mut *guard;
        publisher.request(n, subscriber);
    }

    pub fn cancel(&self) {
        let mut guard = self.lock();
        let Linked {
            publisher,
            subscriber,
        } = &mut *guard;
        publisher.cancel(subscriber);
    }

    /// Run `f` with the subscriber, for example to inspect what it collected.
    pub fn with_subscriber<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock().subscriber)
    }
}
