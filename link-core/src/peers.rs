//! Peer registry: deduplicates observations of other nodes across
//! however many discovery gateways see them, and tells the caller
//! when session membership or a (session, timeline) pair changes.

use std::net::SocketAddr;

use link_protocol::{NodeId, SessionId, Timeline};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PeerState {
    pub node_id: NodeId,
    pub session_id: SessionId,
    pub timeline: Timeline,
    pub measurement_endpoint: SocketAddr,
    pub ttl_secs: u8,
}

#[derive(Debug)]
struct Entry {
    state: PeerState,
    gateway: SocketAddr,
}

/// Result of a registry mutation: whether to notify the peer-count
/// callback, and whether a freshly observed `(session, timeline)` pair
/// should be handed to the sessions engine.
#[derive(Default, Debug)]
pub struct SawPeerEffect {
    pub membership_changed: bool,
    pub new_session_timeline: Option<(SessionId, Timeline)>,
}

#[derive(Default)]
pub struct Peers {
    entries: Vec<Entry>,
}

impl Peers {
    pub fn new() -> Self {
        Peers { entries: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn saw_peer(&mut self, state: PeerState, gateway: SocketAddr) -> SawPeerEffect {
        let mut effect = SawPeerEffect::default();

        let known_pair = self
            .entries
            .iter()
            .any(|e| e.state.session_id == state.session_id && e.state.timeline == state.timeline);

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.state.node_id == state.node_id && e.gateway == gateway)
        {
            if existing.state.session_id != state.session_id {
                effect.membership_changed = true;
            }
            existing.state = state;
        } else {
            effect.membership_changed = true;
            let pos = self
                .entries
                .partition_point(|e| (e.state.node_id, e.gateway) < (state.node_id, gateway));
            self.entries.insert(pos, Entry { state, gateway });
        }

        if !known_pair {
            effect.new_session_timeline = Some((state.session_id, state.timeline));
        }

        effect
    }

    pub fn peer_left(&mut self, node_id: NodeId, gateway: SocketAddr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.state.node_id == node_id && e.gateway == gateway));
        self.entries.len() != before
    }

    pub fn peer_timed_out(&mut self, node_id: NodeId, gateway: SocketAddr) -> bool {
        self.peer_left(node_id, gateway)
    }

    pub fn gateway_closed(&mut self, gateway: SocketAddr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.gateway != gateway);
        self.entries.len() != before
    }

    pub fn session_peers(&self, session_id: SessionId) -> impl Iterator<Item = &PeerState> {
        self.entries.iter().filter(move |e| e.state.session_id == session_id).map(|e| &e.state)
    }

    pub fn unique_session_peer_count(&self, session_id: SessionId) -> usize {
        let mut ids: Vec<NodeId> = self.session_peers(session_id).map(|p| p.node_id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn total_unique_peer_count(&self) -> usize {
        let mut ids: Vec<NodeId> = self.entries.iter().map(|e| e.state.node_id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn session_timeline_exists(&self, session_id: SessionId, timeline: Timeline) -> bool {
        self.entries.iter().any(|e| e.state.session_id == session_id && e.state.timeline == timeline)
    }

    /// The peer to measure a session against: its founder if known,
    /// else any other known member.
    pub fn first_peer_in_session(&self, session_id: SessionId) -> Option<&PeerState> {
        let mut peers = self.session_peers(session_id);
        let first = peers.next()?;
        if first.node_id == session_id.0 {
            return Some(first);
        }
        self.session_peers(session_id).find(|p| p.node_id == session_id.0).or(Some(first))
    }

    /// Forget every peer belonging to `session_id`, e.g. after its
    /// measurement has failed and the session itself was dropped.
    pub fn forget_session(&mut self, session_id: SessionId) {
        self.entries.retain(|e| e.state.session_id != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_protocol::{Beats, Tempo};
    use std::net::{IpAddr, Ipv4Addr};

    fn gw(n: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), 20808)
    }

    fn node(n: u8) -> NodeId {
        NodeId([n; 8])
    }

    fn state(n: u8, sid: u8) -> PeerState {
        PeerState {
            node_id: node(n),
            session_id: SessionId(node(sid)),
            timeline: Timeline { tempo: Tempo::from_bpm(120.0), beat_origin: Beats::ZERO, time_origin_micros: 0 },
            measurement_endpoint: gw(n),
            ttl_secs: 5,
        }
    }

    #[test]
    fn first_sighting_changes_membership_and_reports_new_timeline() {
        let mut peers = Peers::new();
        let effect = peers.saw_peer(state(1, 1), gw(1));
        assert!(effect.membership_changed);
        assert!(effect.new_session_timeline.is_some());
    }

    #[test]
    fn repeat_sighting_of_same_timeline_is_quiet() {
        let mut peers = Peers::new();
        peers.saw_peer(state(1, 1), gw(1));
        let effect = peers.saw_peer(state(1, 1), gw(1));
        assert!(!effect.membership_changed);
        assert!(effect.new_session_timeline.is_none());
    }

    #[test]
    fn gateway_closed_removes_only_that_gateways_peers() {
        let mut peers = Peers::new();
        peers.saw_peer(state(1, 1), gw(1));
        peers.saw_peer(state(2, 1), gw(2));
        assert!(peers.gateway_closed(gw(1)));
        assert_eq!(peers.unique_session_peer_count(SessionId(node(1))), 1);
    }

    #[test]
    fn unique_peer_count_dedupes_across_gateways() {
        let mut peers = Peers::new();
        peers.saw_peer(state(1, 1), gw(1));
        peers.saw_peer(state(1, 1), gw(2));
        assert_eq!(peers.unique_session_peer_count(SessionId(node(1))), 1);
    }

    #[test]
    fn first_peer_in_session_prefers_the_founder_regardless_of_sighting_order() {
        let mut peers = Peers::new();
        peers.saw_peer(state(2, 1), gw(2));
        peers.saw_peer(state(1, 1), gw(1));
        let founder = peers.first_peer_in_session(SessionId(node(1))).unwrap();
        assert_eq!(founder.node_id, node(1));
    }

    #[test]
    fn first_peer_in_session_falls_back_when_founder_unknown() {
        let mut peers = Peers::new();
        peers.saw_peer(state(2, 1), gw(2));
        peers.saw_peer(state(3, 1), gw(3));
        let fallback = peers.first_peer_in_session(SessionId(node(1))).unwrap();
        assert_eq!(fallback.node_id, node(2));
    }

    #[test]
    fn forget_session_removes_only_that_sessions_peers() {
        let mut peers = Peers::new();
        peers.saw_peer(state(1, 1), gw(1));
        peers.saw_peer(state(2, 2), gw(2));
        peers.forget_session(SessionId(node(1)));
        assert_eq!(peers.unique_session_peer_count(SessionId(node(1))), 0);
        assert_eq!(peers.unique_session_peer_count(SessionId(node(2))), 1);
    }
}
