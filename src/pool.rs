//! Reuse pools for encoder and decoder state.
//!
//! A [`Pool`] is a free list of idle instances behind a mutex. Checking out
//! pops an idle instance or builds a fresh one; the returned [`Pooled`] guard
//! puts the instance back when it is dropped, on every exit path.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::codec::{SnappyDecoder, SnappyEncoder};

/// Pool of snappy encoders used by [`CompressionLayer`](crate::CompressionLayer).
pub type EncoderPool = Pool<SnappyEncoder>;

/// Pool of snappy decoders used by [`DecompressionLayer`](crate::DecompressionLayer).
pub type DecoderPool = Pool<SnappyDecoder>;

/// State that can be rewound for reuse by a new stream.
pub trait Reset {
    /// Discards any per-stream state, keeping allocations.
    fn reset(&mut self);
}

/// A thread-safe cache of reusable instances.
///
/// Cloning a pool is cheap and yields a handle to the same free list, so one
/// pool can be shared by every service a layer produces. The pool is
/// unbounded unless built with [`Pool::with_max_idle`].
pub struct Pool<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    idle: Mutex<Vec<T>>,
    make: Box<dyn Fn() -> T + Send + Sync>,
    max_idle: usize,
    created: AtomicUsize,
}

impl<T: Reset> Pool<T> {
    /// Creates an unbounded pool that builds new instances with `make`.
    pub fn new<F>(make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_max_idle(make, usize::MAX)
    }

    /// Creates a pool that keeps at most `max_idle` idle instances.
    ///
    /// Instances returned while the pool is full are dropped.
    pub fn with_max_idle<F>(make: F, max_idle: usize) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(Vec::new()),
                make: Box::new(make),
                max_idle,
                created: AtomicUsize::new(0),
            }),
        }
    }

    /// Checks out an instance, reset and exclusively owned by the guard.
    pub fn checkout(&self) -> Pooled<T> {
        let idle = self.shared.idle.lock().pop();
        let mut item = match idle {
            Some(item) => item,
            None => {
                let created = self.shared.created.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(created, "building new pooled instance");
                (self.shared.make)()
            }
        };
        item.reset();

        Pooled {
            item: Some(item),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Pool<T> {
    /// Returns how many instances this pool has constructed so far.
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::Relaxed)
    }

    /// Returns how many instances are currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.shared.idle.lock().len()
    }
}

impl<T: Reset + Default + 'static> Default for Pool<T> {
    fn default() -> Self {
        Self::new(T::default)
    }
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle())
            .field("created", &self.created())
            .finish()
    }
}

/// An instance checked out of a [`Pool`].
///
/// Dropping the guard returns the instance to its pool.
pub struct Pooled<T> {
    item: Option<T>,
    shared: Arc<Shared<T>>,
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item is present until drop")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item is present until drop")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        let Some(item) = self.item.take() else {
            return;
        };

        let mut idle = self.shared.idle.lock();
        if idle.len() < self.shared.max_idle {
            idle.push(item);
        } else {
            drop(idle);
            tracing::debug!(max_idle = self.shared.max_idle, "pool full, dropping instance");
        }
    }
}

impl<T> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").finish_non_exhaustive()
    }
}
