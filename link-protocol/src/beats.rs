use core::fmt;
use core::ops::{Add, Rem, Sub};

/// A musical beat position, stored as micro-beats (1 beat = 1_000_000
/// micro-beats) so that all beat arithmetic is exact integer math.
/// May be negative to represent a count-in before beat zero.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Beats(pub i64);

impl Beats {
    pub const ZERO: Beats = Beats(0);

    pub fn from_f64(beats: f64) -> Self {
        Beats((beats * 1e6).round() as i64)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 1e6
    }

    pub fn micro_beats(self) -> i64 {
        self.0
    }
}

impl Add for Beats {
    type Output = Beats;
    fn add(self, rhs: Beats) -> Beats {
        Beats(self.0 + rhs.0)
    }
}

impl Sub for Beats {
    type Output = Beats;
    fn sub(self, rhs: Beats) -> Beats {
        Beats(self.0 - rhs.0)
    }
}

impl Rem for Beats {
    type Output = Beats;
    fn rem(self, rhs: Beats) -> Beats {
        Beats(self.0 % rhs.0)
    }
}

impl fmt::Debug for Beats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}b", self.as_f64())
    }
}

/// Reduce `x` into `[0, quantum)`, handling negative `x` by shifting
/// by enough whole quanta first. `quantum` must be strictly positive.
pub fn phase(x: Beats, quantum: Beats) -> Beats {
    let quantum_micros = quantum.micro_beats();
    debug_assert!(quantum_micros > 0);
    let quantum_bins = (x.micro_beats().abs() + quantum_micros) / quantum_micros;
    let shift = Beats(quantum_bins * quantum_micros);
    (x + shift) % quantum
}

/// The least value `y >= x` such that `phase(y, quantum) ==
/// phase(target, quantum)`. If `quantum` is not strictly positive, `x`
/// is returned unchanged.
pub fn next_phase_match(x: Beats, target: Beats, quantum: Beats) -> Beats {
    if quantum.micro_beats() > 0 {
        let desired = phase(target, quantum);
        let at_x = phase(x, quantum);
        let diff = (desired - at_x + quantum) % quantum;
        x + diff
    } else {
        x
    }
}

/// The phase match nearest to `x`, which may be up to half a quantum
/// earlier than `x`. Used when minimizing the jump a client's visible
/// beat makes across a session join or reset.
pub fn closest_phase_match(x: Beats, target: Beats, quantum: Beats) -> Beats {
    if quantum.micro_beats() > 0 {
        let half = Beats::from_f64(0.5 * quantum.as_f64());
        next_phase_match(x - half, target, quantum)
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_is_always_in_range() {
        for b in [-1_000_000i64, -1, 0, 1, 999_999, 4_500_000] {
            let p = phase(Beats(b), Beats::from_f64(4.0));
            assert!(p.micro_beats() >= 0 && p.micro_beats() < 4_000_000);
        }
    }

    #[test]
    fn next_phase_match_is_not_before_x() {
        let x = Beats::from_f64(10.3);
        let target = Beats::from_f64(2.0);
        let q = Beats::from_f64(4.0);
        let y = next_phase_match(x, target, q);
        assert!(y >= x);
        assert_eq!(phase(y, q), phase(target, q));
    }

    #[test]
    fn closest_phase_match_is_within_half_quantum() {
        let x = Beats::from_f64(10.3);
        let target = Beats::from_f64(2.0);
        let q = Beats::from_f64(4.0);
        let y = closest_phase_match(x, target, q);
        assert_eq!(phase(y, q), phase(target, q));
        assert!((y.as_f64() - x.as_f64()).abs() <= q.as_f64() / 2.0 + 1e-9);
    }
}
