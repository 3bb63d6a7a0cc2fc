//! Ping/pong round-trip measurement: the initiator side collects data
//! points for the Kalman filter in [`crate::kalman`]; the responder
//! side is a pure function called by whatever owns the measurement
//! socket.
//!
//! This module only computes *what* to send and *what was learned*;
//! actually sending bytes and scheduling the retry timer is the IO
//! layer's job (`link-network`), so the state machine here is
//! transport-agnostic and trivially testable with recorded traffic.

use link_protocol::wire::payload::Payload;
use link_protocol::{GhostXForm, SessionId};

pub const NUMBER_DATA_POINTS: usize = 100;
pub const NUMBER_MEASUREMENTS: usize = 5;
pub const RETRY_INTERVAL_MICROS: i64 = 50_000;

#[derive(Debug, thiserror::Error)]
pub enum MeasurementAbort {
    #[error("pong reported session {reported:?}, expected {expected:?}")]
    SessionMismatch { expected: SessionId, reported: SessionId },
    #[error("no pong received after {0} attempts")]
    RetriesExhausted(usize),
}

pub enum MeasurementOutcome {
    /// Keep going: here is the next ping payload to send.
    SendPing(Payload),
    /// Enough data points were collected; this is the filtered result.
    Done(GhostXForm),
    Aborted(MeasurementAbort),
}

pub struct Measurement {
    session_id: SessionId,
    data: Vec<(f64, f64)>,
    measurements_started: usize,
    last_host_time: i64,
    last_ghost_time: Option<i64>,
}

impl Measurement {
    /// Begin a measurement against a peer known to be a member of
    /// `session_id`. Returns the state machine plus the first ping's
    /// payload to send.
    pub fn start(session_id: SessionId, now_micros: i64) -> (Self, Payload) {
        let m = Measurement {
            session_id,
            data: Vec::new(),
            measurements_started: 0,
            last_host_time: now_micros,
            last_ghost_time: None,
        };
        let payload = Payload::new().with(link_protocol::wire::payload::PayloadEntry::HostTime(now_micros));
        (m, payload)
    }

    /// The 50ms retry timer fired without a pong having arrived.
    pub fn on_retry_timeout(&mut self, now_micros: i64) -> MeasurementOutcome {
        if self.measurements_started >= NUMBER_MEASUREMENTS {
            return MeasurementOutcome::Aborted(MeasurementAbort::RetriesExhausted(self.measurements_started));
        }
        self.measurements_started += 1;
        self.last_host_time = now_micros;
        let mut payload = Payload::new().with(link_protocol::wire::payload::PayloadEntry::HostTime(now_micros));
        if let Some(prev_ghost) = self.last_ghost_time {
            payload.push(link_protocol::wire::payload::PayloadEntry::PrevGhostTime(prev_ghost));
        }
        MeasurementOutcome::SendPing(payload)
    }

    /// A pong arrived. `pong_payload` carries the responder's session
    /// membership and ghost time, plus the initiator's own ping
    /// payload echoed back (used to recover round-trip host times).
    pub fn on_pong(&mut self, pong_payload: &Payload, now_micros: i64) -> MeasurementOutcome {
        let reported_session = pong_payload.session_membership().unwrap_or(SessionId(link_protocol::NodeId([0; 8])));
        if reported_session != self.session_id {
            return MeasurementOutcome::Aborted(MeasurementAbort::SessionMismatch {
                expected: self.session_id,
                reported: reported_session,
            });
        }

        let ghost_time = pong_payload.ghost_time().unwrap_or(0);
        let echoed_host_time = pong_payload.host_time().unwrap_or(self.last_host_time);

        if let Some(prev_ghost) = pong_payload.prev_ghost_time().filter(|g| *g != 0) {
            self.data.push(((now_micros as f64 + echoed_host_time as f64) * 0.5, ghost_time as f64));
            self.data.push((echoed_host_time as f64, (ghost_time as f64 + prev_ghost as f64) * 0.5));
        }

        self.last_ghost_time = Some(ghost_time);
        self.last_host_time = now_micros;

        if self.data.len() > NUMBER_DATA_POINTS {
            match crate::kalman::filter_ghost_xform(&self.data) {
                Some(xform) => MeasurementOutcome::Done(xform),
                None => MeasurementOutcome::Aborted(MeasurementAbort::RetriesExhausted(self.measurements_started)),
            }
        } else {
            let mut payload = Payload::new().with(link_protocol::wire::payload::PayloadEntry::HostTime(now_micros));
            payload.push(link_protocol::wire::payload::PayloadEntry::PrevGhostTime(ghost_time));
            MeasurementOutcome::SendPing(payload)
        }
    }
}

/// Pure responder logic: given the local node's current session and
/// ghost transform, build the pong payload to send back. The caller
/// is responsible for appending the original ping's payload bytes
/// after this one, as the wire format requires, so the initiator can
/// recover its own host-time echo.
pub fn respond_to_ping(local_session_id: SessionId, local_xform: GhostXForm, now_micros: i64) -> Payload {
    use link_protocol::wire::payload::PayloadEntry;
    Payload::new()
        .with(PayloadEntry::SessionMembership(local_session_id))
        .with(PayloadEntry::GhostTime(local_xform.host_to_ghost(now_micros)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_protocol::wire::payload::PayloadEntry;
    use link_protocol::NodeId;

    #[test]
    fn session_mismatch_aborts() {
        let sid = SessionId(NodeId([1; 8]));
        let (mut m, _) = Measurement::start(sid, 0);
        let pong = Payload::new()
            .with(PayloadEntry::SessionMembership(SessionId(NodeId([2; 8]))))
            .with(PayloadEntry::GhostTime(100));
        assert!(matches!(m.on_pong(&pong, 10), MeasurementOutcome::Aborted(MeasurementAbort::SessionMismatch { .. })));
    }

    #[test]
    fn retry_budget_is_exhausted_after_five_attempts() {
        let sid = SessionId(NodeId([1; 8]));
        let (mut m, _) = Measurement::start(sid, 0);
        for _ in 0..NUMBER_MEASUREMENTS {
            assert!(matches!(m.on_retry_timeout(0), MeasurementOutcome::SendPing(_)));
        }
        assert!(matches!(m.on_retry_timeout(0), MeasurementOutcome::Aborted(MeasurementAbort::RetriesExhausted(_))));
    }

    #[test]
    fn enough_pongs_complete_measurement() {
        let sid = SessionId(NodeId([1; 8]));
        let (mut m, _) = Measurement::start(sid, 0);
        let mut now = 0i64;
        let mut outcome = MeasurementOutcome::SendPing(Payload::new());
        for i in 0..(NUMBER_DATA_POINTS / 2 + 2) {
            now += 1000;
            let pong = Payload::new()
                .with(PayloadEntry::SessionMembership(sid))
                .with(PayloadEntry::GhostTime(now + 5000))
                .with(PayloadEntry::PrevGhostTime(if i == 0 { 1 } else { now - 1000 + 5000 }));
            outcome = m.on_pong(&pong, now);
        }
        assert!(matches!(outcome, MeasurementOutcome::Done(_)));
    }
}
