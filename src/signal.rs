//! Single-slot notifications shared between tasks.
//!
//! A [`Signal`] holds at most one pending notification: raising it while a
//! notification is already pending is a no-op. A [`Slot`] pairs a signal with
//! exactly one value handed from a producer to a single waiting consumer.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;

/// Binary notification without a queue.
#[derive(Debug, Default)]
pub struct Signal {
    pending: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    ///
    /// Callable from interrupt context: it never waits, allocates or logs.
    pub fn raise(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Drop a pending notification without waking anybody.
    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Wait until the signal is raised and consume the notification.
    pub async fn wait(&self) {
        loop {
            // register interest before checking the flag so a concurrent raise is not lost
            let notified = self.notify.notified();

            if self.pending.swap(false, Ordering::AcqRel) {
                return;
            }

            notified.await;
        }
    }
}

/// Single-slot hand-over of one value.
#[derive(Debug)]
pub struct Slot<T> {
    value: Mutex<Option<T>>,
    signal: Signal,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
            signal: Signal::new(),
        }
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and wake the receiver.
    ///
    /// Returns `false` and drops `value` if another value is still pending.
    pub fn offer(&self, value: T) -> bool {
        {
            let mut pending = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.is_some() {
                return false;
            }
            *pending = Some(value);
        }

        self.signal.raise();
        true
    }

    /// Wait for a value and take it out of the slot.
    pub async fn take(&self) -> T {
        loop {
            self.signal.wait().await;

            let value = self
                .value
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            if let Some(value) = value {
                return value;
            }
        }
    }
}
