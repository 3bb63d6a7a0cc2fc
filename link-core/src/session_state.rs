//! The capture/commit view of a session's shared clock: an immutable
//! `(Timeline, StartStopState)` snapshot plus the [`GhostXForm`] it was
//! captured with, so beat/time conversions and quantised edits can be
//! computed against it without re-locking the Controller.
//!
//! A caller captures a snapshot, derives a new one with the op methods
//! below (all of which return a fresh value; none mutate in place),
//! then commits it back. This mirrors how [`crate::client_beat_timeline::ClientBeatTimeline`]
//! handles the realtime path, but without a lingering client offset:
//! per the invariant that a committed session state and the Session's
//! own timeline agree exactly, there is nothing left to absorb.

use link_protocol::beats::Beats;
use link_protocol::{GhostXForm, SessionState as TimelineAndStartStop, StartStopState, Tempo};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionState {
    inner: TimelineAndStartStop,
    xform: GhostXForm,
}

impl SessionState {
    pub fn new(inner: TimelineAndStartStop, xform: GhostXForm) -> Self {
        SessionState { inner, xform }
    }

    pub fn timeline_and_start_stop(&self) -> TimelineAndStartStop {
        self.inner
    }

    pub fn xform(&self) -> GhostXForm {
        self.xform
    }

    pub fn tempo(&self) -> Tempo {
        self.inner.timeline.tempo
    }

    pub fn set_tempo(&self, bpm: f64, at_host_micros: i64) -> SessionState {
        let ghost = self.xform.host_to_ghost(at_host_micros);
        let timeline = self.inner.timeline.with_tempo_at(Tempo::from_bpm(bpm), ghost);
        SessionState { inner: TimelineAndStartStop { timeline, ..self.inner }, xform: self.xform }
    }

    pub fn beat_at_time(&self, host_micros: i64) -> Beats {
        self.inner.timeline.to_beats(self.xform.host_to_ghost(host_micros))
    }

    pub fn phase_at_time(&self, host_micros: i64, quantum: Beats) -> Beats {
        self.inner.timeline.to_phase_encoded_beats(self.xform.host_to_ghost(host_micros), quantum)
    }

    pub fn time_at_beat(&self, beats: Beats) -> i64 {
        self.xform.ghost_to_host(self.inner.timeline.from_beats(beats))
    }

    /// Request that `beats` land at `host`, phase-matched to `quantum`
    /// without moving before `host`. Returns the value actually
    /// applied, which agrees with `beats` exactly once peer-free.
    pub fn request_beat_at_time(&self, beats: Beats, host_micros: i64, quantum: Beats) -> SessionState {
        let ghost = self.xform.host_to_ghost(host_micros);
        let cur = self.inner.timeline.to_beats(ghost);
        let matched = link_protocol::beats::next_phase_match(cur, beats, quantum);
        let timeline = link_protocol::Timeline { beat_origin: matched, time_origin_micros: ghost, ..self.inner.timeline };
        SessionState { inner: TimelineAndStartStop { timeline, ..self.inner }, xform: self.xform }
    }

    /// Rewrite the timeline so `beats` lands at `host`, moving by at
    /// most half `quantum` either direction.
    pub fn force_beat_at_time(&self, beats: Beats, host_micros: i64, quantum: Beats) -> SessionState {
        let ghost = self.xform.host_to_ghost(host_micros);
        let cur = self.inner.timeline.to_beats(ghost);
        let matched = link_protocol::beats::closest_phase_match(cur, beats, quantum);
        let timeline = link_protocol::Timeline { beat_origin: matched, time_origin_micros: ghost, ..self.inner.timeline };
        SessionState { inner: TimelineAndStartStop { timeline, ..self.inner }, xform: self.xform }
    }

    pub fn is_playing(&self) -> bool {
        self.inner.start_stop.is_playing
    }

    pub fn time_for_is_playing(&self) -> i64 {
        self.xform.ghost_to_host(self.inner.start_stop.timestamp_micros)
    }

    pub fn set_is_playing(&self, is_playing: bool, host_micros: i64) -> SessionState {
        let start_stop = StartStopState { is_playing, timestamp_micros: self.xform.host_to_ghost(host_micros) };
        SessionState { inner: TimelineAndStartStop { start_stop, ..self.inner }, xform: self.xform }
    }

    /// The beat value at which transport would start if `setIsPlaying(true,
    /// ...)` were issued for the start of the next quantum boundary.
    pub fn request_beat_at_start_playing_time(&self, beats: Beats, quantum: Beats) -> Beats {
        let cur = self.inner.timeline.beat_origin;
        link_protocol::beats::next_phase_match(cur, beats, quantum)
    }

    pub fn set_is_playing_and_request_beat_at_time(
        &self,
        is_playing: bool,
        host_micros: i64,
        beats: Beats,
        quantum: Beats,
    ) -> SessionState {
        self.request_beat_at_time(beats, host_micros, quantum).set_is_playing(is_playing, host_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_protocol::Timeline;

    fn snapshot() -> SessionState {
        let timeline = Timeline { tempo: Tempo::from_bpm(120.0), beat_origin: Beats::ZERO, time_origin_micros: 0 };
        let inner = TimelineAndStartStop { timeline, start_stop: StartStopState::STOPPED_AT_ZERO };
        SessionState::new(inner, GhostXForm { slope: 1.0, intercept_micros: 0 })
    }

    #[test]
    fn set_tempo_preserves_beat_at_instant() {
        let s = snapshot();
        let before = s.beat_at_time(2_000_000);
        let s2 = s.set_tempo(140.0, 2_000_000);
        let after = s2.beat_at_time(2_000_000);
        assert!((before.as_f64() - after.as_f64()).abs() < 1e-6);
    }

    #[test]
    fn request_beat_at_time_peerless_is_exact() {
        let s = snapshot();
        let quantum = Beats::from_f64(4.0);
        let s2 = s.request_beat_at_time(Beats::from_f64(8.0), 0, quantum);
        assert!((s2.beat_at_time(0).as_f64() - 8.0).abs() < 1e-6);
    }

    #[test]
    fn set_is_playing_round_trips() {
        let s = snapshot().set_is_playing(true, 5_000_000);
        assert!(s.is_playing());
        assert!((s.time_for_is_playing() - 5_000_000).abs() <= 1);
    }
}
