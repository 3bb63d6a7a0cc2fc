//! The client's own view of the beat grid. It tracks the session
//! [`Timeline`] and [`GhostXForm`] like everything else, but adds a
//! `clientOffset` that absorbs the phase jumps session joins and
//! quantised resets would otherwise cause, so the value returned to
//! the application never jumps backwards by more than a quantum.
//!
//! Every operation here is O(1) and allocation-free: this is called
//! directly from the audio thread, guarded by a [`SpinLock`] rather
//! than a mutex so it never blocks on the IO thread.

use link_protocol::beats::{self, Beats};
use link_protocol::{GhostXForm, Tempo, Timeline};

use crate::spinlock::SpinLock;

struct State {
    client_offset: Beats,
    timeline: Timeline,
    xform: GhostXForm,
}

pub struct ClientBeatTimeline {
    state: SpinLock<State>,
}

impl ClientBeatTimeline {
    pub fn new(timeline: Timeline, xform: GhostXForm) -> Self {
        ClientBeatTimeline {
            state: SpinLock::new(State { client_offset: Beats::ZERO, timeline, xform }),
        }
    }

    pub fn tempo(&self) -> Tempo {
        self.state.with(|s| s.timeline.tempo)
    }

    pub fn host_to_beats(&self, host_micros: i64) -> Beats {
        self.state.with(|s| host_to_session_beats(s, host_micros) + s.client_offset)
    }

    pub fn beats_to_host(&self, beats: Beats) -> i64 {
        self.state.with(|s| {
            s.xform.ghost_to_host(s.timeline.from_beats(beats - s.client_offset))
        })
    }

    /// The caller asks that `beats` land at `host`, respecting
    /// `quantum`. Returns the beat actually applied, which may differ
    /// from the request by up to `quantum`.
    pub fn reset_beats(&self, beats: Beats, host_micros: i64, quantum: Beats) -> Beats {
        self.state.with(|s| {
            let cur_beats = host_to_session_beats(s, host_micros);
            let matched = phase_match(cur_beats, beats, quantum);
            s.client_offset = beats - matched;
            beats - (matched - cur_beats)
        })
    }

    /// Like [`Self::reset_beats`] but rewrites the session timeline
    /// itself (phase-matched by the minimal shift, at most half a
    /// quantum) instead of only the local offset, so the change
    /// propagates to every peer once broadcast.
    pub fn force_beats(&self, tempo: Tempo, beats: Beats, host_micros: i64, quantum: Beats) -> Timeline {
        self.state.with(|s| {
            let ghost = s.xform.host_to_ghost(host_micros);
            let cur_beats = s.timeline.to_beats(ghost);
            let half = Beats::from_f64(0.5 * quantum.as_f64());
            let matched = phase_match(cur_beats - half, beats, quantum);
            s.client_offset = beats - matched;

            // anchor so that `cur_beats` is exactly the new origin, at `matched`'s phase.
            let provisional = Timeline { tempo, beat_origin: matched, time_origin_micros: ghost };
            let new_tl = Timeline {
                tempo,
                beat_origin: cur_beats,
                time_origin_micros: provisional.from_beats(cur_beats),
            };
            s.timeline = new_tl;
            new_tl
        })
    }

    pub fn phase(&self, beats: Beats, quantum: Beats) -> Beats {
        if quantum == Beats::ZERO {
            return Beats::ZERO;
        }
        self.state.with(|s| beats::phase(beats - s.client_offset, quantum))
    }

    /// Apply a new tempo as of `at_host_micros`, holding the client's
    /// visible beat fixed at that instant. Returns the new timeline.
    pub fn update_tempo(&self, new_tempo: Tempo, at_host_micros: i64) -> Timeline {
        self.state.with(|s| {
            let ghost = s.xform.host_to_ghost(at_host_micros);
            s.timeline = s.timeline.with_tempo_at(new_tempo, ghost);
            s.timeline
        })
    }

    pub fn update_timeline(&self, timeline: Timeline) {
        self.state.with(|s| s.timeline = timeline);
    }

    /// Rewrite the timeline's origin directly, clearing the client
    /// offset. Used when there are no peers, so quantisation can be
    /// skipped entirely.
    pub fn update_origin(&self, beats: Beats, host_micros: i64) -> Timeline {
        self.state.with(|s| {
            s.client_offset = Beats::ZERO;
            s.timeline.beat_origin = beats;
            s.timeline.time_origin_micros = s.xform.host_to_ghost(host_micros);
            s.timeline
        })
    }

    /// Re-anchor with a fresh ghost transform (used by `resetState`):
    /// the beat value the client was showing at `host` is preserved
    /// as the new origin, and the client offset is cleared.
    pub fn reset(&self, host_micros: i64, xform: GhostXForm) -> Timeline {
        self.state.with(|s| {
            s.timeline.beat_origin = host_to_session_beats(s, host_micros) + s.client_offset;
            s.client_offset = Beats::ZERO;
            s.xform = xform;
            s.timeline.time_origin_micros = xform.host_to_ghost(host_micros);
            s.timeline
        })
    }

    /// Switch to a newly joined session's `(timeline, xform)`. The
    /// client's visible beat moves by at most half a quantum as a
    /// result, in either direction.
    pub fn update_session(&self, timeline: Timeline, xform: GhostXForm, at_host_micros: i64, quantum: Beats) {
        self.state.with(|s| {
            let old_beats = host_to_session_beats(s, at_host_micros);
            s.timeline = timeline;
            s.xform = xform;
            let new_beats = host_to_session_beats(s, at_host_micros);
            let half = Beats::from_f64(0.5 * quantum.as_f64());
            let matched = phase_match(old_beats - half, new_beats, quantum);
            s.client_offset = matched + s.client_offset - new_beats;
        });
    }

    /// Replace timeline, xform, and clear the client offset outright.
    /// Used when an application-level commit (not a realtime op)
    /// supplies an already-resolved `SessionState`: there is no
    /// offset left to preserve once the caller has applied its own
    /// phase matching.
    pub fn overwrite(&self, timeline: Timeline, xform: GhostXForm) {
        self.state.with(|s| {
            s.client_offset = Beats::ZERO;
            s.timeline = timeline;
            s.xform = xform;
        });
    }

    pub fn snapshot(&self) -> (Timeline, GhostXForm, Beats) {
        self.state.with(|s| (s.timeline, s.xform, s.client_offset))
    }
}

fn host_to_session_beats(s: &State, host_micros: i64) -> Beats {
    s.timeline.to_beats(s.xform.host_to_ghost(host_micros))
}

/// The least value `>= x` whose phase matches `target`'s, per §4.7.
fn phase_match(x: Beats, target: Beats, quantum: Beats) -> Beats {
    beats::next_phase_match(x, target, quantum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tl(beat_origin: f64) -> Timeline {
        Timeline { tempo: Tempo::from_bpm(120.0), beat_origin: Beats::from_f64(beat_origin), time_origin_micros: 0 }
    }

    fn identity_xform() -> GhostXForm {
        GhostXForm { slope: 1.0, intercept_micros: 0 }
    }

    #[test]
    fn host_and_beats_round_trip() {
        let cbt = ClientBeatTimeline::new(tl(0.0), identity_xform());
        let b = cbt.host_to_beats(5_000_000);
        let h = cbt.beats_to_host(b);
        assert!((h - 5_000_000).abs() <= 1);
    }

    #[test]
    fn reset_beats_applies_within_a_quantum() {
        let cbt = ClientBeatTimeline::new(tl(0.0), identity_xform());
        let quantum = Beats::from_f64(4.0);
        let applied = cbt.reset_beats(Beats::from_f64(10.0), 1_000_000, quantum);
        assert!(applied.as_f64() <= 10.0 + 1e-6);
        assert!(10.0 - applied.as_f64() < 4.0);
    }

    #[test]
    fn reset_beats_with_no_drift_returns_the_requested_value_exactly() {
        let cbt = ClientBeatTimeline::new(tl(0.0), identity_xform());
        let quantum = Beats::from_f64(4.0);
        // at host=0 the current session beat is exactly 0, already in phase
        // with a request of 8 beats (both multiples of the quantum).
        let applied = cbt.reset_beats(Beats::from_f64(8.0), 0, quantum);
        assert!((applied.as_f64() - 8.0).abs() < 1e-6);
    }

    #[test]
    fn update_session_moves_by_at_most_half_a_quantum() {
        let cbt = ClientBeatTimeline::new(tl(0.0), identity_xform());
        let quantum = Beats::from_f64(4.0);
        let before = cbt.host_to_beats(2_000_000);
        let new_tl = Timeline { tempo: Tempo::from_bpm(128.0), beat_origin: Beats::from_f64(1.3), time_origin_micros: 0 };
        cbt.update_session(new_tl, identity_xform(), 2_000_000, quantum);
        let after = cbt.host_to_beats(2_000_000);
        assert!((after.as_f64() - before.as_f64()).abs() <= 2.0 + 1e-6);
    }

    #[test]
    fn phase_is_always_in_range_of_quantum() {
        let cbt = ClientBeatTimeline::new(tl(0.0), identity_xform());
        let quantum = Beats::from_f64(4.0);
        for b in [-10.0, -0.1, 0.0, 3.9, 100.25] {
            let p = cbt.phase(Beats::from_f64(b), quantum);
            assert!(p.as_f64() >= 0.0 && p.as_f64() < 4.0);
        }
    }
}
