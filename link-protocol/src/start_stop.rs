/// Transport start/stop state shared between peers. Two states are
/// compared by timestamp alone: the later timestamp always wins,
/// regardless of which peer produced it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StartStopState {
    pub is_playing: bool,
    pub timestamp_micros: i64,
}

impl StartStopState {
    pub const STOPPED_AT_ZERO: StartStopState = StartStopState { is_playing: false, timestamp_micros: 0 };

    /// Resolve two observations of start/stop state, keeping whichever
    /// carries the later timestamp.
    pub fn resolve(self, other: StartStopState) -> StartStopState {
        if other.timestamp_micros > self.timestamp_micros {
            other
        } else {
            self
        }
    }
}

/// The pair of (Timeline, StartStopState) that fully describes a
/// session's shared clock at a point in time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionState {
    pub timeline: crate::timeline::Timeline,
    pub start_stop: StartStopState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_timestamp_wins() {
        let a = StartStopState { is_playing: true, timestamp_micros: 10 };
        let b = StartStopState { is_playing: false, timestamp_micros: 20 };
        assert_eq!(a.resolve(b), b);
        assert_eq!(b.resolve(a), b);
    }
}
