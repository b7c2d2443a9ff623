//! Shared buffer with a scoped "ready" flag.
//!
//! The raw peak store and the averaged block store are each mutated by more than one
//! task. Access follows a claim/release discipline: a task observes the buffer as
//! ready, claims it (the buffer is no longer ready), mutates it and releases it. The
//! claim is a [`BufferGuard`]; dropping the guard releases the buffer on every exit
//! path, including early returns and panics.
//!
//! The flag is backed by a real mutex. Its guard is `!Send`, so a task spawned on the
//! runtime cannot hold a claim across an `.await`: "never suspend while holding the
//! buffer" is enforced by the compiler rather than by convention.
//!
//! Waiting for new data uses [`Notify`] instead of polling. Every mutable access through
//! a guard stores a wake-up permit for the consumer.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::sync::Notify;

/// A value shared between pipeline tasks.
#[derive(Debug, Default)]
pub struct SharedBuffer<T> {
    data: Mutex<T>,
    changed: Notify,
}

impl<T> SharedBuffer<T> {
    /// Wrap `value`.
    pub fn new(value: T) -> Self {
        Self {
            data: Mutex::new(value),
            changed: Notify::new(),
        }
    }

    /// `true` when nobody holds a claim.
    pub fn is_ready(&self) -> bool {
        !self.data.is_locked()
    }

    /// Claim exclusive access, waiting for the current holder to release.
    pub fn claim(&self) -> BufferGuard<'_, T> {
        BufferGuard {
            guard: self.data.lock(),
            changed: &self.changed,
            modified: false,
        }
    }

    /// Claim exclusive access only if the buffer is ready right now.
    pub fn try_claim(&self) -> Option<BufferGuard<'_, T>> {
        self.data.try_lock().map(|guard| BufferGuard {
            guard,
            changed: &self.changed,
            modified: false,
        })
    }

    /// Wait until the buffer was modified or `limit` elapsed, whichever comes first.
    pub async fn wait_for_change(&self, limit: Duration) {
        let _ = tokio::time::timeout(limit, self.changed.notified()).await;
    }
}

/// Exclusive claim on a [`SharedBuffer`]. Releases the buffer when dropped.
pub struct BufferGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    changed: &'a Notify,
    modified: bool,
}

impl<T> Deref for BufferGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for BufferGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.modified = true;
        &mut self.guard
    }
}

impl<T> Drop for BufferGuard<'_, T> {
    fn drop(&mut self) {
        if self.modified {
            self.changed.notify_one();
        }
    }
}
