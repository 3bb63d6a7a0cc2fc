//! Tracks every session currently visible on the network, measures
//! their founders, and decides which one the local node should
//! consider "current". Election favors the session with the earlier
//! (ghost-time-adjusted) founding instant, with a deterministic
//! sessionId tie-break to avoid flapping between near-identical
//! candidates.

use link_protocol::{GhostXForm, SessionId, Timeline};

/// Ghost-time difference, in microseconds, below which two sessions
/// are considered roughly simultaneous and the tie-break falls back
/// to comparing sessionId.
pub const SESSION_EPS_MICROS: i64 = 500_000;

/// How long after adopting a session to re-measure it, to track clock
/// drift against its founder.
pub const REMEASURE_INTERVAL_MICROS: i64 = 30_000_000;

#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: SessionId,
    pub timeline: Timeline,
    pub xform: Option<GhostXForm>,
}

impl Session {
    pub fn new(session_id: SessionId, timeline: Timeline) -> Self {
        Session { session_id, timeline, xform: None }
    }

    fn ghost_now(&self, now_host_micros: i64) -> Option<i64> {
        self.xform.map(|x| x.host_to_ghost(now_host_micros))
    }
}

pub enum SessionAction {
    LaunchMeasurement(SessionId),
    ScheduleRemeasurement { session_id: SessionId, at_host_micros: i64 },
    SessionChanged(Session),
    Dropped(SessionId),
    /// The current session's timeline advanced from a peer's
    /// broadcast; the caller should fold this into its own
    /// authoritative copy and re-broadcast.
    CurrentTimelineAdvanced(Timeline),
}

pub struct Sessions {
    current: Session,
    others: Vec<Session>,
}

impl Sessions {
    pub fn new(initial: Session) -> Self {
        Sessions { current: initial, others: Vec::new() }
    }

    pub fn current(&self) -> &Session {
        &self.current
    }

    pub fn others(&self) -> &[Session] {
        &self.others
    }

    /// The local node just broadcast a new timeline for the current
    /// session (e.g. a tempo change); fold it in without re-electing.
    pub fn reset_timeline(&mut self, timeline: Timeline) {
        self.current.timeline = timeline;
    }

    /// The local node became the founder of a brand new session
    /// (`resetState`): drop every other candidate, since they belong
    /// to a session the node will no longer try to converge with.
    pub fn reset_session(&mut self, session: Session) {
        self.current = session;
        self.others.clear();
    }

    /// A peer broadcast `(sid, tl)`. Adopt it if it wins on
    /// `beatOrigin` priority within its session; launch a measurement
    /// for a never-before-seen session.
    pub fn saw_session_timeline(&mut self, sid: SessionId, tl: Timeline) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if sid == self.current.session_id {
            if tl.beat_origin > self.current.timeline.beat_origin {
                self.current.timeline = tl;
                actions.push(SessionAction::CurrentTimelineAdvanced(tl));
            }
            return actions;
        }

        if let Some(existing) = self.others.iter_mut().find(|s| s.session_id == sid) {
            if tl.beat_origin > existing.timeline.beat_origin {
                existing.timeline = tl;
            }
        } else {
            self.others.push(Session::new(sid, tl));
            actions.push(SessionAction::LaunchMeasurement(sid));
        }

        actions
    }

    /// A measurement against `sid` succeeded with `xform`, at local
    /// host time `now_host_micros`.
    pub fn measurement_succeeded(&mut self, sid: SessionId, xform: GhostXForm, now_host_micros: i64) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if sid == self.current.session_id {
            self.current.xform = Some(xform);
            // Re-anchor the client-visible timeline against the freshly
            // measured xform the same way a fresh join would, so 30s
            // drift correction doesn't get silently discarded.
            actions.push(SessionAction::SessionChanged(self.current.clone()));
            actions.push(SessionAction::ScheduleRemeasurement {
                session_id: sid,
                at_host_micros: now_host_micros + REMEASURE_INTERVAL_MICROS,
            });
            return actions;
        }

        let Some(idx) = self.others.iter().position(|s| s.session_id == sid) else {
            return actions;
        };
        self.others[idx].xform = Some(xform);

        let cur_ghost = self.current.xform.map(|x| x.host_to_ghost(now_host_micros));
        let new_ghost = self.others[idx].ghost_now(now_host_micros);

        let should_switch = match (cur_ghost, new_ghost) {
            (Some(cur), Some(new)) => {
                let diff = new - cur;
                diff > SESSION_EPS_MICROS || (diff.abs() < SESSION_EPS_MICROS && sid < self.current.session_id)
            }
            // We have no measurement of our own session yet; any
            // measured candidate is strictly more useful.
            (None, Some(_)) => true,
            _ => false,
        };

        if should_switch {
            let mut new_current = self.others.remove(idx);
            std::mem::swap(&mut self.current, &mut new_current);
            self.others.push(new_current);
            actions.push(SessionAction::SessionChanged(self.current.clone()));
            actions.push(SessionAction::ScheduleRemeasurement {
                session_id: self.current.session_id,
                at_host_micros: now_host_micros + REMEASURE_INTERVAL_MICROS,
            });
        }

        actions
    }

    /// A measurement failed. The current session retries in 30s;
    /// any other session is dropped along with its peers.
    pub fn measurement_failed(&mut self, sid: SessionId, now_host_micros: i64) -> Vec<SessionAction> {
        if sid == self.current.session_id {
            return vec![SessionAction::ScheduleRemeasurement {
                session_id: sid,
                at_host_micros: now_host_micros + REMEASURE_INTERVAL_MICROS,
            }];
        }

        if let Some(idx) = self.others.iter().position(|s| s.session_id == sid) {
            self.others.remove(idx);
            return vec![SessionAction::Dropped(sid)];
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_protocol::{Beats, NodeId, Tempo};

    fn sid(n: u8) -> SessionId {
        SessionId(NodeId([n; 8]))
    }

    fn tl(beat_origin: i64) -> Timeline {
        Timeline { tempo: Tempo::from_bpm(120.0), beat_origin: Beats(beat_origin), time_origin_micros: 0 }
    }

    #[test]
    fn unknown_session_launches_measurement() {
        let mut sessions = Sessions::new(Session::new(sid(1), tl(0)));
        let actions = sessions.saw_session_timeline(sid(2), tl(0));
        assert!(actions.iter().any(|a| matches!(a, SessionAction::LaunchMeasurement(s) if *s == sid(2))));
    }

    #[test]
    fn current_session_adopts_greater_beat_origin() {
        let mut sessions = Sessions::new(Session::new(sid(1), tl(0)));
        sessions.saw_session_timeline(sid(1), tl(10));
        assert_eq!(sessions.current().timeline.beat_origin, Beats(10));
    }

    #[test]
    fn far_ahead_other_session_wins_switch() {
        let mut sessions = Sessions::new(Session::new(sid(5), tl(0)));
        sessions.current.xform = Some(GhostXForm { slope: 1.0, intercept_micros: 0 });
        sessions.saw_session_timeline(sid(1), tl(0));
        let actions = sessions.measurement_succeeded(sid(1), GhostXForm { slope: 1.0, intercept_micros: 1_000_000 }, 0);
        assert!(actions.iter().any(|a| matches!(a, SessionAction::SessionChanged(s) if s.session_id == sid(1))));
        assert_eq!(sessions.current().session_id, sid(1));
    }

    #[test]
    fn close_ghost_diff_breaks_tie_by_session_id() {
        let mut sessions = Sessions::new(Session::new(sid(9), tl(0)));
        sessions.current.xform = Some(GhostXForm { slope: 1.0, intercept_micros: 0 });
        sessions.saw_session_timeline(sid(1), tl(0));
        let actions = sessions.measurement_succeeded(sid(1), GhostXForm { slope: 1.0, intercept_micros: 0 }, 0);
        assert!(actions.iter().any(|a| matches!(a, SessionAction::SessionChanged(_))));
        assert_eq!(sessions.current().session_id, sid(1));
    }
}
