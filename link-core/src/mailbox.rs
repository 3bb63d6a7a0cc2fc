//! A single-slot, lock-free mailbox used for the real-time commit
//! path: the audio thread posts at most one pending commit, dropping
//! whatever was previously pending, and the IO thread drains it at
//! its own pace. Neither side ever blocks the other.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::spinlock::SpinLock;

pub struct Mailbox<T> {
    has_value: AtomicBool,
    slot: SpinLock<Option<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Mailbox { has_value: AtomicBool::new(false), slot: SpinLock::new(None) }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a value, silently dropping any value not yet drained.
    pub fn post(&self, value: T) {
        self.slot.with(|slot| *slot = Some(value));
        self.has_value.store(true, Ordering::Release);
    }

    pub fn has_pending(&self) -> bool {
        self.has_value.load(Ordering::Acquire)
    }

    /// Take the pending value, if any.
    pub fn drain(&self) -> Option<T> {
        if !self.has_value.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.slot.with(|slot| slot.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_post_replaces_earlier_undrained_one() {
        let mailbox = Mailbox::new();
        mailbox.post(1);
        mailbox.post(2);
        assert_eq!(mailbox.drain(), Some(2));
        assert_eq!(mailbox.drain(), None);
    }
}
