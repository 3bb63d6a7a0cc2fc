use crate::beats::{self, Beats};
use crate::tempo::{self, Tempo};

/// A bijection between ghost time and beats: `(tempo, beatOrigin,
/// timeOrigin)`. Also doubles as a wire payload entry (key `tmln`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Timeline {
    pub tempo: Tempo,
    pub beat_origin: Beats,
    pub time_origin_micros: i64,
}

impl Timeline {
    pub fn to_beats(self, ghost_micros: i64) -> Beats {
        self.beat_origin + tempo::micros_to_beats(self.tempo, ghost_micros - self.time_origin_micros)
    }

    pub fn from_beats(self, beats: Beats) -> i64 {
        self.time_origin_micros + tempo::beats_to_micros(self.tempo, beats - self.beat_origin)
    }

    /// Apply a new tempo at `at_ghost_micros`, holding the beat value
    /// at that instant fixed.
    pub fn with_tempo_at(self, new_tempo: Tempo, at_ghost_micros: i64) -> Timeline {
        let beat_at = self.to_beats(at_ghost_micros);
        Timeline {
            tempo: new_tempo,
            beat_origin: beat_at,
            time_origin_micros: at_ghost_micros,
        }
    }

    /// The beat at `ghost_micros`, folded into `[0, quantum)`. Two
    /// peers with drifted origins but the same tempo and quantum
    /// compute the same phase-encoded value, which is what lets a
    /// fresh joiner align without knowing the session's exact origin.
    pub fn to_phase_encoded_beats(self, ghost_micros: i64, quantum: Beats) -> Beats {
        beats::phase(self.to_beats(ghost_micros), quantum)
    }

    /// Inverse of [`Timeline::to_phase_encoded_beats`]: the ghost time
    /// nearest to `ghost_micros` whose beat value has the given phase.
    pub fn from_phase_encoded_beats(self, phase_beats: Beats, near_ghost_micros: i64, quantum: Beats) -> i64 {
        let near_beats = self.to_beats(near_ghost_micros);
        let matched = beats::closest_phase_match(near_beats, phase_beats, quantum);
        self.from_beats(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_beats_and_from_beats_round_trip() {
        let tl = Timeline {
            tempo: Tempo::from_bpm(120.0),
            beat_origin: Beats::ZERO,
            time_origin_micros: 1_000_000,
        };
        let b = tl.to_beats(5_500_000);
        let t = tl.from_beats(b);
        assert!((t - 5_500_000).abs() <= 1);
    }

    #[test]
    fn phase_encoded_beats_round_trip_near_the_anchor() {
        let tl = Timeline {
            tempo: Tempo::from_bpm(120.0),
            beat_origin: Beats::ZERO,
            time_origin_micros: 0,
        };
        let quantum = Beats::from_f64(4.0);
        let phase = tl.to_phase_encoded_beats(3_500_000, quantum);
        let back = tl.from_phase_encoded_beats(phase, 3_500_000, quantum);
        assert!((back - 3_500_000).abs() <= 1);
    }

    #[test]
    fn with_tempo_at_preserves_beat_at_instant() {
        let tl = Timeline {
            tempo: Tempo::from_bpm(120.0),
            beat_origin: Beats::ZERO,
            time_origin_micros: 0,
        };
        let at = 2_000_000;
        let before = tl.to_beats(at);
        let tl2 = tl.with_tempo_at(Tempo::from_bpm(140.0), at);
        let after = tl2.to_beats(at);
        assert!((before.as_f64() - after.as_f64()).abs() < 1e-6);
    }
}
