//! Single-slot delivery channel between the sampling task and its consumers.
//!
//! The producer overwrites whatever the consumer has not read yet; there is no
//! queue. Every lock is held only for a slot swap or a clone of the stored
//! value, so neither side waits on the other's work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Overwrite-on-full mailbox holding at most one unread value.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    latest: Mutex<Option<T>>,
    published: AtomicU64,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            latest: Mutex::new(None),
            published: AtomicU64::new(0),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Clone> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any unread one.
    pub fn publish(&self, value: T) {
        *lock(&self.latest) = Some(value.clone());
        *lock(&self.slot) = Some(value);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes the unread value, if any. A value is returned at most once.
    pub fn try_take(&self) -> Option<T> {
        lock(&self.slot).take()
    }

    /// Last published value, read or not.
    pub fn latest(&self) -> Option<T> {
        lock(&self.latest).clone()
    }

    pub fn has_unread(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Number of values published since creation.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
