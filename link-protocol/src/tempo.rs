use core::fmt;

use crate::beats::Beats;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 999.0;

/// Tempo stored as microseconds-per-beat. BPM is always a derived
/// view; storing the reciprocal keeps beat/time conversions exact
/// integer round-trips instead of compounding floating point error.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Tempo {
    micros_per_beat: i64,
}

impl Tempo {
    pub fn from_bpm(bpm: f64) -> Self {
        let bpm = clamp_bpm(bpm);
        let micros_per_beat = (1e6 / (bpm / 60.0)).round() as i64;
        Tempo { micros_per_beat }
    }

    pub fn from_micros_per_beat(micros_per_beat: i64) -> Self {
        Tempo { micros_per_beat }
    }

    pub fn bpm(self) -> f64 {
        60.0 / (self.micros_per_beat as f64 / 1e6)
    }

    pub fn micros_per_beat(self) -> i64 {
        self.micros_per_beat
    }
}

impl fmt::Debug for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}bpm", self.bpm())
    }
}

pub fn clamp_bpm(bpm: f64) -> f64 {
    bpm.clamp(MIN_BPM, MAX_BPM)
}

pub fn micros_to_beats(tempo: Tempo, micros: i64) -> Beats {
    Beats::from_f64(micros as f64 / tempo.micros_per_beat as f64)
}

pub fn beats_to_micros(tempo: Tempo, beats: Beats) -> i64 {
    (beats.as_f64() * tempo.micros_per_beat as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_round_trips_through_micros_per_beat() {
        let t = Tempo::from_bpm(120.0);
        assert!((t.bpm() - 120.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_bpm_is_clamped() {
        assert_eq!(Tempo::from_bpm(1.0).bpm(), MIN_BPM);
        assert_eq!(Tempo::from_bpm(1e6).bpm(), MAX_BPM);
    }

    #[test]
    fn beats_and_micros_round_trip() {
        let t = Tempo::from_bpm(128.0);
        let b = Beats::from_f64(16.0);
        let micros = beats_to_micros(t, b);
        let back = micros_to_beats(t, micros);
        assert!((back.as_f64() - b.as_f64()).abs() < 1e-6);
    }
}
