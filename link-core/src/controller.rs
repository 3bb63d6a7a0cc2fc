//! Orchestrates a single node's view of a Link session: owns the
//! authoritative `NodeState` (node id, session id, timeline,
//! start/stop), the [`ClientBeatTimeline`] realtime view, the
//! [`Peers`] registry and [`Sessions`] engine, and the two
//! lock-free channels that let an audio thread read and write
//! session state without ever touching a mutex owned by the IO
//! thread.
//!
//! This module owns no socket or timer: the abstraction points the
//! teacher's C++ source expresses as SFINAE/ADL "concepts" (Clock,
//! IoContext, Platform, Log) are replaced here by a generic `Clock`
//! type parameter plus an explicit effects-return style — mutating
//! calls return what changed (a peer count, a timeline to broadcast,
//! a measurement to launch) and the caller (`link-network`'s reactor)
//! performs the actual IO. This keeps the engine itself transport-free
//! and testable with a scripted clock, matching the conventions
//! already used by [`crate::peers`] and [`crate::sessions`].

use std::net::SocketAddr;
use std::sync::Arc;

use link_protocol::beats::Beats;
use link_protocol::{GhostXForm, NodeId, SessionId, StartStopState, Tempo, Timeline};

use crate::client_beat_timeline::ClientBeatTimeline;
use crate::clock::Clock;
use crate::mailbox::Mailbox;
use crate::peers::{PeerState, Peers};
use crate::seqlock::SeqLock;
use crate::session_state::SessionState;
use crate::sessions::{self, Session, Sessions};

/// The authoritative state broadcast to every gateway after a
/// mutation. Carries everything a wire `Alive`/`Response` frame needs.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BroadcastState {
    pub node_id: NodeId,
    pub session_id: SessionId,
    pub timeline: Timeline,
    pub start_stop: StartStopState,
}

/// What a freshly observed peer sighting implies for the caller.
#[derive(Default, Debug)]
pub struct AliveEffect {
    pub launch_measurement: Option<SessionId>,
    pub broadcast: Option<BroadcastState>,
}

/// Non-broadcast outcomes of a completed or failed measurement, after
/// the Controller has folded in any resulting session switch.
pub enum ControllerAction {
    LaunchMeasurement(SessionId),
    ScheduleRemeasurement { session_id: SessionId, at_host_micros: i64 },
    SessionDropped(SessionId),
    Broadcast(BroadcastState),
}

/// Cheap, `Send + Sync` handle to the realtime capture/commit path.
/// Safe to hand to an audio thread: [`Self::capture`] never blocks,
/// and [`Self::commit`] never allocates or blocks the caller.
#[derive(Clone)]
pub struct AudioIo {
    state: Arc<SeqLock<SessionState>>,
    commits: Arc<Mailbox<SessionState>>,
}

impl AudioIo {
    pub fn capture(&self) -> SessionState {
        self.state.load()
    }

    pub fn commit(&self, session_state: SessionState) {
        self.commits.post(session_state);
    }
}

pub struct Controller<C: Clock> {
    clock: C,
    rand_byte: Box<dyn FnMut() -> u8 + Send>,

    enabled: bool,
    start_stop_sync_enabled: bool,
    quantum: Beats,

    node_id: NodeId,
    session_id: SessionId,
    timeline: Timeline,
    start_stop: StartStopState,
    xform: GhostXForm,

    client_beat_timeline: ClientBeatTimeline,
    peers: Peers,
    sessions: Sessions,
    session_peer_count: usize,

    rt_state: Arc<SeqLock<SessionState>>,
    rt_commits: Arc<Mailbox<SessionState>>,

    num_peers_cb: Option<Box<dyn FnMut(usize) + Send>>,
    tempo_cb: Option<Box<dyn FnMut(Tempo) + Send>>,
    start_stop_cb: Option<Box<dyn FnMut(StartStopState) + Send>>,
}

impl<C: Clock> Controller<C> {
    pub fn new(
        clock: C,
        initial_bpm: f64,
        quantum: Beats,
        rand_byte: impl FnMut() -> u8 + Send + 'static,
    ) -> (Self, AudioIo) {
        let mut rand_byte: Box<dyn FnMut() -> u8 + Send> = Box::new(rand_byte);
        let now = clock.now_micros();
        let node_id = NodeId::random(&mut rand_byte);
        let session_id = SessionId(node_id);
        let xform = GhostXForm::identity_at(now);
        let timeline = Timeline { tempo: Tempo::from_bpm(initial_bpm), beat_origin: Beats::ZERO, time_origin_micros: 0 };
        let start_stop = StartStopState::STOPPED_AT_ZERO;

        let rt_state = Arc::new(SeqLock::new(SessionState::new(
            link_protocol::SessionState { timeline, start_stop },
            xform,
        )));
        let rt_commits = Arc::new(Mailbox::new());

        let controller = Controller {
            clock,
            rand_byte,
            enabled: false,
            start_stop_sync_enabled: false,
            quantum,
            node_id,
            session_id,
            timeline,
            start_stop,
            xform,
            client_beat_timeline: ClientBeatTimeline::new(timeline, xform),
            peers: Peers::new(),
            sessions: Sessions::new(Session { session_id, timeline, xform: None }),
            session_peer_count: 0,
            rt_state: rt_state.clone(),
            rt_commits: rt_commits.clone(),
            num_peers_cb: None,
            tempo_cb: None,
            start_stop_cb: None,
        };
        let audio_io = AudioIo { state: rt_state, commits: rt_commits };
        (controller, audio_io)
    }

    pub fn set_num_peers_callback(&mut self, cb: impl FnMut(usize) + Send + 'static) {
        self.num_peers_cb = Some(Box::new(cb));
    }

    pub fn set_tempo_callback(&mut self, cb: impl FnMut(Tempo) + Send + 'static) {
        self.tempo_cb = Some(Box::new(cb));
    }

    pub fn set_start_stop_callback(&mut self, cb: impl FnMut(StartStopState) + Send + 'static) {
        self.start_stop_cb = Some(Box::new(cb));
    }

    fn now_micros(&self) -> i64 {
        self.clock.now_micros()
    }

    /// Returns whether enablement actually changed; the caller starts
    /// or tears down discovery gateways accordingly.
    pub fn enable(&mut self, on: bool) -> (bool, Option<BroadcastState>) {
        if self.enabled == on {
            return (false, None);
        }
        self.enabled = on;
        let broadcast = if on { Some(self.reset_state()) } else { None };
        (true, broadcast)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_start_stop_sync_enabled(&self) -> bool {
        self.start_stop_sync_enabled
    }

    pub fn enable_start_stop_sync(&mut self, on: bool) {
        self.start_stop_sync_enabled = on;
    }

    pub fn num_peers(&self) -> usize {
        self.session_peer_count
    }

    pub fn quantum(&self) -> Beats {
        self.quantum
    }

    pub fn set_quantum(&mut self, quantum: Beats) {
        self.quantum = quantum;
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn tempo(&self) -> Tempo {
        self.timeline.tempo
    }

    pub fn ghost_xform(&self) -> GhostXForm {
        self.xform
    }

    /// The state to advertise on the wire right now, independent of
    /// any mutation having just happened. Used by the discovery
    /// transport's heartbeat loop.
    pub fn current_broadcast_state(&self) -> BroadcastState {
        self.broadcast_state()
    }

    /// Where to send a `Ping` to measure session `sid`: its founder if
    /// known to the peer registry, else any other known member. `None`
    /// if the registry has no peers in that session at all.
    pub fn first_peer_in_session(&self, sid: SessionId) -> Option<PeerState> {
        self.peers.first_peer_in_session(sid).copied()
    }

    /// Accepted iff `now <= atHost < now + 1s`; otherwise silently
    /// ignored, per the tempo-change window invariant.
    pub fn set_tempo(&mut self, bpm: f64, at_host_micros: i64) -> Option<BroadcastState> {
        let now = self.now_micros();
        let at = at_host_micros.max(now);
        if at >= now + 1_000_000 {
            return None;
        }
        let tempo = Tempo::from_bpm(bpm);
        let new_tl = self.client_beat_timeline.update_tempo(tempo, at);
        Some(self.post_timeline(new_tl))
    }

    /// With no peers, rewrites the origin directly and returns the
    /// request untouched. With peers present, delegates to the
    /// quantised [`ClientBeatTimeline::reset_beats`] and does not
    /// broadcast, since only the local client's view changed.
    pub fn reset_beats(&mut self, beats: Beats, at_host_micros: i64) -> (Beats, Option<BroadcastState>) {
        if self.session_peer_count == 0 {
            let new_tl = self.client_beat_timeline.update_origin(beats, at_host_micros);
            (beats, Some(self.post_timeline(new_tl)))
        } else {
            let applied = self.client_beat_timeline.reset_beats(beats, at_host_micros, self.quantum);
            (applied, None)
        }
    }

    /// Always rewrites and broadcasts the shared timeline.
    pub fn force_beats(&mut self, bpm: f64, beats: Beats, at_host_micros: i64) -> BroadcastState {
        let tempo = Tempo::from_bpm(bpm);
        let new_tl = self.client_beat_timeline.force_beats(tempo, beats, at_host_micros, self.quantum);
        self.post_timeline(new_tl)
    }

    pub fn time_to_beats(&self, host_micros: i64) -> Beats {
        self.client_beat_timeline.host_to_beats(host_micros)
    }

    pub fn beats_to_time(&self, beats: Beats) -> i64 {
        self.client_beat_timeline.beats_to_host(beats)
    }

    pub fn phase(&self, beats: Beats, quantum: Beats) -> Beats {
        self.client_beat_timeline.phase(beats, quantum)
    }

    pub fn capture_app_session_state(&self) -> SessionState {
        SessionState::new(link_protocol::SessionState { timeline: self.timeline, start_stop: self.start_stop }, self.xform)
    }

    pub fn capture_audio_session_state(&self) -> SessionState {
        self.rt_state.load()
    }

    /// No-op if the snapshot is unchanged from the current state.
    pub fn commit_app_session_state(&mut self, session_state: SessionState) -> Option<BroadcastState> {
        let proposed = session_state.timeline_and_start_stop();
        if proposed.timeline == self.timeline && proposed.start_stop == self.start_stop {
            return None;
        }
        let tempo_changed = proposed.timeline.tempo != self.timeline.tempo;
        let start_stop_changed = proposed.start_stop != self.start_stop;

        self.timeline = proposed.timeline;
        self.start_stop = proposed.start_stop;
        self.xform = session_state.xform();
        self.client_beat_timeline.overwrite(proposed.timeline, self.xform);
        self.sessions.reset_timeline(proposed.timeline);
        self.publish_rt_state();

        if tempo_changed {
            if let Some(cb) = self.tempo_cb.as_mut() {
                cb(proposed.timeline.tempo);
            }
        }
        if start_stop_changed {
            if let Some(cb) = self.start_stop_cb.as_mut() {
                cb(proposed.start_stop);
            }
        }
        Some(self.broadcast_state())
    }

    /// RT-safe: posts to a single-slot mailbox, dropping any earlier
    /// uncommitted value. Call [`Self::drain_audio_commits`] from the
    /// IO thread to apply it.
    pub fn commit_audio_session_state(&self, session_state: SessionState) {
        self.rt_commits.post(session_state);
    }

    /// Drain any pending realtime commit and apply it the same way
    /// [`Self::commit_app_session_state`] would. Call periodically
    /// from the IO thread.
    pub fn drain_audio_commits(&mut self) -> Option<BroadcastState> {
        self.rt_commits.drain().and_then(|s| self.commit_app_session_state(s))
    }

    pub fn audio_io(&self) -> AudioIo {
        AudioIo { state: self.rt_state.clone(), commits: self.rt_commits.clone() }
    }

    /// A gateway observed an `Alive`/`Response` from `state.node_id`.
    pub fn on_alive(&mut self, state: PeerState, gateway: SocketAddr) -> AliveEffect {
        let saw = self.peers.saw_peer(state, gateway);
        let mut launch_measurement = None;
        let mut broadcast = None;

        if let Some((sid, tl)) = saw.new_session_timeline {
            for action in self.sessions.saw_session_timeline(sid, tl) {
                match action {
                    sessions::SessionAction::LaunchMeasurement(s) => launch_measurement = Some(s),
                    sessions::SessionAction::CurrentTimelineAdvanced(tl) => {
                        broadcast = Some(self.post_timeline(tl));
                    }
                    _ => {}
                }
            }
        }

        if saw.membership_changed {
            if let Some(b) = self.recompute_peer_count() {
                broadcast = Some(b);
            }
        }

        AliveEffect { launch_measurement, broadcast }
    }

    pub fn on_peer_left(&mut self, node_id: NodeId, gateway: SocketAddr) -> Option<BroadcastState> {
        if self.peers.peer_left(node_id, gateway) {
            self.recompute_peer_count()
        } else {
            None
        }
    }

    pub fn on_peer_timed_out(&mut self, node_id: NodeId, gateway: SocketAddr) -> Option<BroadcastState> {
        self.on_peer_left(node_id, gateway)
    }

    pub fn on_gateway_closed(&mut self, gateway: SocketAddr) -> Option<BroadcastState> {
        if self.peers.gateway_closed(gateway) {
            self.recompute_peer_count()
        } else {
            None
        }
    }

    pub fn on_measurement_succeeded(&mut self, sid: SessionId, xform: GhostXForm, now_micros: i64) -> Vec<ControllerAction> {
        let actions = self.sessions.measurement_succeeded(sid, xform, now_micros);
        self.translate_session_actions(actions, now_micros)
    }

    pub fn on_measurement_failed(&mut self, sid: SessionId, now_micros: i64) -> Vec<ControllerAction> {
        let actions = self.sessions.measurement_failed(sid, now_micros);
        self.translate_session_actions(actions, now_micros)
    }

    fn translate_session_actions(&mut self, actions: Vec<sessions::SessionAction>, now_micros: i64) -> Vec<ControllerAction> {
        let mut out = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                sessions::SessionAction::LaunchMeasurement(sid) => out.push(ControllerAction::LaunchMeasurement(sid)),
                sessions::SessionAction::ScheduleRemeasurement { session_id, at_host_micros } => {
                    out.push(ControllerAction::ScheduleRemeasurement { session_id, at_host_micros })
                }
                sessions::SessionAction::Dropped(sid) => {
                    self.peers.forget_session(sid);
                    out.push(ControllerAction::SessionDropped(sid));
                }
                sessions::SessionAction::CurrentTimelineAdvanced(tl) => {
                    out.push(ControllerAction::Broadcast(self.post_timeline(tl)))
                }
                sessions::SessionAction::SessionChanged(session) => {
                    if let Some(b) = self.join_session(session, now_micros) {
                        out.push(ControllerAction::Broadcast(b));
                    }
                }
            }
        }
        out
    }

    /// The last member of a dying session becomes the founder of a
    /// fresh one: new node id, identity transform, timeline preserved,
    /// peer registry cleared.
    fn reset_state(&mut self) -> BroadcastState {
        let now = self.now_micros();
        let new_id = NodeId::random(&mut self.rand_byte);
        let xform = GhostXForm::identity_at(now);
        let new_tl = self.client_beat_timeline.reset(now, xform);

        self.node_id = new_id;
        self.session_id = SessionId(new_id);
        self.timeline = new_tl;
        self.xform = xform;
        self.peers.reset();
        self.sessions.reset_session(Session { session_id: self.session_id, timeline: new_tl, xform: Some(xform) });
        self.session_peer_count = 0;
        self.publish_rt_state();
        self.broadcast_state()
    }

    fn join_session(&mut self, session: Session, now_micros: i64) -> Option<BroadcastState> {
        let session_id_changed = self.session_id != session.session_id;
        let tempo_changed = self.timeline.tempo != session.timeline.tempo;

        self.session_id = session.session_id;
        self.timeline = session.timeline;
        if let Some(xform) = session.xform {
            self.xform = xform;
            self.client_beat_timeline.update_session(session.timeline, xform, now_micros, self.quantum);
        } else {
            self.client_beat_timeline.update_timeline(session.timeline);
        }
        self.publish_rt_state();

        let broadcast = if session_id_changed {
            let count = self.peers.unique_session_peer_count(self.session_id);
            self.session_peer_count = count;
            if let Some(cb) = self.num_peers_cb.as_mut() {
                cb(count);
            }
            Some(self.broadcast_state())
        } else {
            None
        };

        if tempo_changed {
            if let Some(cb) = self.tempo_cb.as_mut() {
                cb(session.timeline.tempo);
            }
        }

        broadcast
    }

    fn recompute_peer_count(&mut self) -> Option<BroadcastState> {
        let count = self.peers.unique_session_peer_count(self.session_id);
        if count == self.session_peer_count {
            return None;
        }
        self.session_peer_count = count;
        let broadcast = if count == 0 { Some(self.reset_state()) } else { None };
        if let Some(cb) = self.num_peers_cb.as_mut() {
            cb(count);
        }
        broadcast
    }

    fn post_timeline(&mut self, timeline: Timeline) -> BroadcastState {
        let same_tempo = self.timeline.tempo == timeline.tempo;
        self.timeline = timeline;
        self.sessions.reset_timeline(timeline);
        self.publish_rt_state();
        if !same_tempo {
            if let Some(cb) = self.tempo_cb.as_mut() {
                cb(timeline.tempo);
            }
        }
        self.broadcast_state()
    }

    fn publish_rt_state(&self) {
        let snapshot =
            SessionState::new(link_protocol::SessionState { timeline: self.timeline, start_stop: self.start_stop }, self.xform);
        self.rt_state.store(snapshot);
    }

    fn broadcast_state(&self) -> BroadcastState {
        BroadcastState { node_id: self.node_id, session_id: self.session_id, timeline: self.timeline, start_stop: self.start_stop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::net::{IpAddr, Ipv4Addr};

    fn controller(bpm: f64) -> (Controller<VirtualClock>, AudioIo) {
        let clock = VirtualClock::new(0);
        let mut counter = 0u8;
        Controller::new(clock, bpm, Beats::from_f64(4.0), move || {
            counter = counter.wrapping_add(1);
            counter
        })
    }

    fn gw(n: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), 20808)
    }

    #[test]
    fn construction_clamps_out_of_range_bpm() {
        let (c, _) = controller(1.0);
        assert!((c.tempo().bpm() - 20.0).abs() < 1e-6);
        assert!(!c.is_enabled());
        assert_eq!(c.num_peers(), 0);
    }

    #[test]
    fn set_tempo_outside_window_is_ignored() {
        let (mut c, _) = controller(120.0);
        let broadcast = c.set_tempo(130.0, 2_000_000);
        assert!(broadcast.is_none());
        assert!((c.tempo().bpm() - 120.0).abs() < 1e-6);
    }

    #[test]
    fn set_tempo_within_window_is_applied_and_broadcasts() {
        let (mut c, _) = controller(120.0);
        let broadcast = c.set_tempo(130.0, 500_000);
        assert!(broadcast.is_some());
        assert!((c.tempo().bpm() - 130.0).abs() < 1e-6);
    }

    #[test]
    fn reset_beats_peerless_returns_the_request_exactly() {
        let (mut c, _) = controller(120.0);
        let (applied, broadcast) = c.reset_beats(Beats::from_f64(10.0), 0);
        assert!((applied.as_f64() - 10.0).abs() < 1e-6);
        assert!(broadcast.is_some());
    }

    #[test]
    fn peer_count_reaching_zero_resets_identity_but_keeps_timeline_shape() {
        let (mut c, _) = controller(120.0);
        let node = NodeId([9; 8]);
        let state = PeerState {
            node_id: node,
            session_id: c.session_id(),
            timeline: c.timeline,
            measurement_endpoint: gw(1),
            ttl_secs: 5,
        };
        c.on_alive(state, gw(1));
        assert_eq!(c.num_peers(), 1);
        let old_id = c.node_id();
        c.on_peer_left(node, gw(1));
        assert_eq!(c.num_peers(), 0);
        assert_ne!(c.node_id(), old_id);
    }

    #[test]
    fn audio_capture_and_commit_round_trip_without_touching_the_app_path() {
        let (c, audio) = controller(120.0);
        let captured = audio.capture();
        assert!((captured.tempo().bpm() - 120.0).abs() < 1e-6);
        let next = captured.set_tempo(121.0, 0);
        audio.commit(next);
        assert!(c.rt_commits.has_pending());
    }

    #[test]
    fn remeasuring_the_current_session_reanchors_the_authoritative_xform() {
        let (mut c, _) = controller(120.0);
        let sid = c.session_id();
        let fresh_xform = GhostXForm { slope: 1.0, intercept_micros: 12_345 };
        let actions = c.on_measurement_succeeded(sid, fresh_xform, 0);
        assert_eq!(c.ghost_xform(), fresh_xform);
        assert!(actions
            .iter()
            .any(|a| matches!(a, ControllerAction::ScheduleRemeasurement { session_id, .. } if *session_id == sid)));
    }

    #[test]
    fn failed_measurement_of_another_session_forgets_its_peers() {
        let (mut c, _) = controller(120.0);
        let other_sid = SessionId(NodeId([7; 8]));
        let peer_state = PeerState {
            node_id: NodeId([7; 8]),
            session_id: other_sid,
            timeline: c.timeline,
            measurement_endpoint: gw(7),
            ttl_secs: 5,
        };
        c.on_alive(peer_state, gw(7));
        assert!(c.peers.session_peers(other_sid).next().is_some());

        c.on_measurement_failed(other_sid, 0);
        assert!(c.peers.session_peers(other_sid).next().is_none());
    }
}
