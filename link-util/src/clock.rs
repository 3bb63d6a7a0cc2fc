//! The concrete [`link_core::Clock`] implementation used outside
//! tests: Linux's raw monotonic clock, in microseconds. Grounded on
//! `bark::time::now`, generalized from `bark`'s `TimestampMicros`
//! newtype to the bare `i64` micros `link_core::Clock` expects.

use nix::sys::time::TimeValLike;
use nix::time::ClockId;

use link_core::Clock;

#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_micros(&self) -> i64 {
        let timespec = nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC_RAW)
            .expect("clock_gettime(CLOCK_MONOTONIC_RAW) failed, are we on Linux?");

        timespec.num_microseconds()
    }
}
