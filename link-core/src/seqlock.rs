//! A single-writer, wait-free-reader sequence lock. The IO thread is
//! the sole writer (`store`); the audio thread is the sole reader
//! (`load`) and never blocks, retrying instead if it races a write.
//! This backs the audio-thread side of
//! [`crate::controller::Controller::capture_audio_session_state`].

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct SeqLock<T: Copy> {
    sequence: AtomicUsize,
    value: UnsafeCell<T>,
}

unsafe impl<T: Copy + Send> Send for SeqLock<T> {}
unsafe impl<T: Copy + Send> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    pub fn new(value: T) -> Self {
        SeqLock { sequence: AtomicUsize::new(0), value: UnsafeCell::new(value) }
    }

    /// Called only from the writer (IO thread).
    pub fn store(&self, value: T) {
        self.sequence.fetch_add(1, Ordering::AcqRel);
        unsafe { *self.value.get() = value };
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// Wait-free read: retries if a write was in flight, never locks.
    pub fn load(&self) -> T {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before % 2 != 0 {
                core::hint::spin_loop();
                continue;
            }
            let value = unsafe { *self.value.get() };
            let after = self.sequence.load(Ordering::Acquire);
            if before == after {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_last_stored_value() {
        let lock = SeqLock::new(0i64);
        lock.store(1);
        lock.store(42);
        assert_eq!(lock.load(), 42);
    }
}
