//! The single-threaded cooperative reactor: owns every gateway socket
//! and the timer queue that drives heartbeats, interface rescans,
//! peer expiry, and measurement retries, and is the only thing that
//! ever calls into [`Controller`]'s mutating methods. Grounded on
//! `ableton::discovery::PeerGateway`/`InterfaceScanner` for the
//! behaviors, and structured as a poll-based loop the way the
//! teacher's own network thread (`bark::socket::Socket::recv_from`,
//! driven from a dedicated OS thread in `bark::stream::network_thread`)
//! blocks on a small fixed set of sockets rather than spinning.
//!
//! There is no `async`/`Platform`-trait executor here: the teacher's
//! own async decode pipeline (`bark-core::receive::task`) is built
//! around an audio callback, a concern this crate doesn't have, so
//! the reactor instead follows the teacher's *other* concurrency
//! idiom: a dedicated thread blocked in `nix::poll`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use nix::poll::PollTimeout;

use link_core::{Clock, Controller, ControllerAction, PeerState};
use link_protocol::wire::message::{Message, MessageType};
use link_protocol::wire::payload::{MeasurementEndpointV4, Payload, PayloadEntry};
use link_protocol::{NodeId, SessionId};

use crate::gateway::{self, Gateway};
use crate::interfaces::Platform;
use crate::socket::ListenError;

const HEARTBEAT_INTERVAL_MICROS: i64 = 250_000;
const INTERFACE_RESCAN_INTERVAL_MICROS: i64 = 5_000_000;
const PEER_TTL_SWEEP_INTERVAL_MICROS: i64 = 1_000_000;
const PEER_TTL_GRACE_MICROS: i64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum TimerKind {
    Heartbeat,
    InterfaceRescan,
    PeerTtlSweep,
    MeasurementRetry(SessionId, usize),
    SessionRemeasure(SessionId),
}

struct PendingMeasurement {
    target: SocketAddr,
    attempt: usize,
    state: link_core::Measurement,
}

/// Owns everything the `link-core` `Controller` cannot: sockets,
/// timers, and interface enumeration. One of these runs per process,
/// on its own thread, driving a single `Controller`.
pub struct Reactor<C: Clock, P: Platform> {
    clock: C,
    controller: Controller<C>,
    platform: P,
    gateways: HashMap<Ipv4Addr, Gateway>,
    measurements: HashMap<SessionId, PendingMeasurement>,
    peer_expiry: HashMap<(NodeId, SocketAddr), i64>,
    timers: BinaryHeap<(Reverse<i64>, TimerKind)>,
}

impl<C: Clock, P: Platform> Reactor<C, P> {
    pub fn new(controller: Controller<C>, clock: C, platform: P) -> Self {
        Reactor {
            clock,
            controller,
            platform,
            gateways: HashMap::new(),
            measurements: HashMap::new(),
            peer_expiry: HashMap::new(),
            timers: BinaryHeap::new(),
        }
    }

    pub fn controller(&self) -> &Controller<C> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller<C> {
        &mut self.controller
    }

    fn schedule(&mut self, at_micros: i64, kind: TimerKind) {
        self.timers.push((Reverse(at_micros), kind));
    }

    /// Drives the reactor forever. Never returns; run it on its own
    /// thread (`link-util::thread::spawn_named` is the idiom the
    /// binary crate uses).
    pub fn run(mut self) -> ! {
        let now = self.clock.now_micros();
        self.rescan_interfaces(now);
        self.schedule(now + HEARTBEAT_INTERVAL_MICROS, TimerKind::Heartbeat);
        self.schedule(now + INTERFACE_RESCAN_INTERVAL_MICROS, TimerKind::InterfaceRescan);
        self.schedule(now + PEER_TTL_SWEEP_INTERVAL_MICROS, TimerKind::PeerTtlSweep);

        loop {
            let now = self.clock.now_micros();
            let timeout = self.next_timeout(now);

            if let Err(e) = self.poll_once(timeout) {
                log::warn!("error polling gateways: {e}");
            }

            self.fire_due_timers(self.clock.now_micros());
        }
    }

    fn next_timeout(&self, now: i64) -> PollTimeout {
        match self.timers.peek() {
            Some((Reverse(deadline), _)) => {
                let millis = (*deadline - now).max(0) / 1_000;
                let clamped = millis.clamp(0, i32::MAX as i64) as i32;
                PollTimeout::try_from(clamped).unwrap_or(PollTimeout::NONE)
            }
            None => PollTimeout::NONE,
        }
    }

    fn fire_due_timers(&mut self, now: i64) {
        while let Some(&(Reverse(deadline), kind)) = self.timers.peek() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            self.fire_timer(kind, now);
        }
    }

    fn fire_timer(&mut self, kind: TimerKind, now: i64) {
        match kind {
            TimerKind::Heartbeat => {
                let state = self.controller.current_broadcast_state();
                self.broadcast_now(state);
                self.schedule(now + HEARTBEAT_INTERVAL_MICROS, TimerKind::Heartbeat);
            }
            TimerKind::InterfaceRescan => {
                self.rescan_interfaces(now);
                self.schedule(now + INTERFACE_RESCAN_INTERVAL_MICROS, TimerKind::InterfaceRescan);
            }
            TimerKind::PeerTtlSweep => {
                self.sweep_expired_peers(now);
                self.schedule(now + PEER_TTL_SWEEP_INTERVAL_MICROS, TimerKind::PeerTtlSweep);
            }
            TimerKind::MeasurementRetry(sid, attempt) => self.on_measurement_retry(sid, attempt, now),
            TimerKind::SessionRemeasure(sid) => self.start_measurement(sid, now),
        }
    }

    // -- interface / gateway lifecycle --------------------------------

    fn rescan_interfaces(&mut self, now: i64) {
        let current: Vec<Ipv4Addr> = self.platform.scan_interfaces();

        let stale: Vec<Ipv4Addr> = self.gateways.keys().copied().filter(|a| !current.contains(a)).collect();
        for addr in stale {
            self.gateways.remove(&addr);
            let key = gateway_key(addr);
            if let Some(state) = self.controller.on_gateway_closed(key) {
                self.broadcast_now(state);
            }
            self.peer_expiry.retain(|(_, gw), _| *gw != key);
        }

        for addr in current {
            if self.gateways.contains_key(&addr) {
                continue;
            }
            match Gateway::open(addr) {
                Ok(gw) => {
                    log::info!("opened discovery gateway on {addr}");
                    self.gateways.insert(addr, gw);
                    let state = self.controller.current_broadcast_state();
                    self.broadcast_one(addr, state);
                }
                Err(e) => log::warn!("failed to open gateway on {addr}: {e}, will retry next scan"),
            }
        }

        let _: Result<(), ListenError> = Ok(());
        let _ = now;
    }

    fn sweep_expired_peers(&mut self, now: i64) {
        let expired: Vec<(NodeId, SocketAddr)> =
            self.peer_expiry.iter().filter(|(_, expiry)| **expiry <= now).map(|(k, _)| *k).collect();

        for (node_id, gateway) in expired {
            self.peer_expiry.remove(&(node_id, gateway));
            if let Some(state) = self.controller.on_peer_timed_out(node_id, gateway) {
                self.broadcast_now(state);
            }
        }
    }

    // -- datagram IO ---------------------------------------------------

    fn poll_once(&mut self, timeout: PollTimeout) -> std::io::Result<()> {
        let addrs: Vec<Ipv4Addr> = self.gateways.keys().copied().collect();
        let mut incoming: Vec<(Ipv4Addr, Vec<u8>, SocketAddr)> = Vec::new();

        {
            let mut fds = Vec::with_capacity(addrs.len() * 2);
            for addr in &addrs {
                let [tx_fd, rx_fd] = self.gateways[addr].socket().poll_fds();
                fds.push(tx_fd);
                fds.push(rx_fd);
            }

            if fds.is_empty() {
                // nothing to wait on yet; sleep for the remaining timeout
                // so the timer loop still makes progress.
                std::thread::sleep(std::time::Duration::from_millis(10));
                return Ok(());
            }

            let n = nix::poll::poll(&mut fds, timeout)?;
            if n == 0 {
                return Ok(());
            }

            let mut buf = vec![0u8; link_protocol::wire::MAX_DATAGRAM_SIZE];
            for (i, addr) in addrs.iter().enumerate() {
                let gw = &self.gateways[addr];
                if fds[i * 2].any() == Some(true) {
                    if let Ok((n, peer)) = gw.socket().recv_tx(&mut buf) {
                        incoming.push((*addr, buf[..n].to_vec(), peer));
                    }
                }
                if fds[i * 2 + 1].any() == Some(true) {
                    if let Ok((n, peer)) = gw.socket().recv_rx(&mut buf) {
                        incoming.push((*addr, buf[..n].to_vec(), peer));
                    }
                }
            }
        }

        for (gateway_addr, bytes, peer) in incoming {
            self.handle_datagram(gateway_addr, &bytes, peer);
        }

        Ok(())
    }

    fn handle_datagram(&mut self, gateway_addr: Ipv4Addr, bytes: &[u8], peer: SocketAddr) {
        let Some(msg) = Gateway::parse(bytes, self.controller.node_id()) else {
            return;
        };
        let now = self.clock.now_micros();
        let key = gateway_key(gateway_addr);

        match msg.header.message_type {
            MessageType::Alive => {
                if let Some(state) = self.observe_peer(&msg, key, now) {
                    self.respond(gateway_addr, &msg, peer);
                    let _ = state;
                }
            }
            MessageType::Response => {
                self.observe_peer(&msg, key, now);
            }
            MessageType::ByeBye => {
                if let Some(state) = self.controller.on_peer_left(msg.header.ident, key) {
                    self.broadcast_now(state);
                }
                self.peer_expiry.remove(&(msg.header.ident, key));
            }
            MessageType::Ping => self.respond_to_ping(gateway_addr, &msg, peer),
            MessageType::Pong => self.on_pong(&msg, peer, now),
            MessageType::Invalid => {}
        }
    }

    fn observe_peer(&mut self, msg: &Message, gateway: SocketAddr, now: i64) -> Option<PeerState> {
        let state = peer_state_from_message(msg)?;
        self.peer_expiry.insert((state.node_id, gateway), now + (state.ttl_secs as i64) * 1_000_000 + PEER_TTL_GRACE_MICROS);

        let effect = self.controller.on_alive(state, gateway);
        if let Some(sid) = effect.launch_measurement {
            self.start_measurement(sid, now);
        }
        if let Some(broadcast) = effect.broadcast {
            self.broadcast_now(broadcast);
        }
        Some(state)
    }

    fn respond(&self, gateway_addr: Ipv4Addr, _incoming: &Message, peer: SocketAddr) {
        let Some(gw) = self.gateways.get(&gateway_addr) else { return };
        let Ok(payload) = self.gateway_payload(gw) else { return };
        let msg = gateway::response_message(self.controller.node_id(), payload);
        if let Err(e) = gw.send_to(&msg, peer) {
            log::warn!("sending discovery response to {peer}: {e}");
        }
    }

    fn gateway_payload(&self, gw: &Gateway) -> std::io::Result<Payload> {
        let state = self.controller.current_broadcast_state();
        let SocketAddr::V4(ep) = gw.measurement_endpoint()? else {
            return Ok(Payload::new());
        };
        Ok(Payload::new()
            .with(PayloadEntry::Timeline(state.timeline))
            .with(PayloadEntry::SessionMembership(state.session_id))
            .with(PayloadEntry::MeasurementEndpoint(MeasurementEndpointV4 { addr: *ep.ip(), port: ep.port() }))
            .with(PayloadEntry::StartStop(state.start_stop)))
    }

    fn broadcast_now(&self, state: link_core::BroadcastState) {
        for (addr, gw) in &self.gateways {
            self.broadcast_one(*addr, state);
            let _ = gw;
        }
    }

    fn broadcast_one(&self, addr: Ipv4Addr, state: link_core::BroadcastState) {
        let Some(gw) = self.gateways.get(&addr) else { return };
        let Ok(payload) = self.payload_for(gw, state) else { return };
        let msg = gateway::alive_message(state.node_id, payload);
        if let Err(e) = gw.broadcast(&msg) {
            log::warn!("broadcasting on {addr}: {e}");
        }
    }

    fn payload_for(&self, gw: &Gateway, state: link_core::BroadcastState) -> std::io::Result<Payload> {
        let SocketAddr::V4(ep) = gw.measurement_endpoint()? else {
            return Ok(Payload::new());
        };
        Ok(Payload::new()
            .with(PayloadEntry::Timeline(state.timeline))
            .with(PayloadEntry::SessionMembership(state.session_id))
            .with(PayloadEntry::MeasurementEndpoint(MeasurementEndpointV4 { addr: *ep.ip(), port: ep.port() }))
            .with(PayloadEntry::StartStop(state.start_stop)))
    }

    // -- measurement -----------------------------------------------------

    fn start_measurement(&mut self, sid: SessionId, now: i64) {
        if self.measurements.contains_key(&sid) {
            return;
        }
        let Some(peer) = self.controller.first_peer_in_session(sid) else {
            return;
        };
        let Some(gw) = self.gateways.values().next() else {
            return;
        };

        let (state, payload) = link_core::Measurement::start(sid, now);
        let msg = gateway::ping_message(self.controller.node_id(), payload);
        if let Err(e) = gw.send_to(&msg, peer.measurement_endpoint) {
            log::warn!("sending initial ping for session {sid:?}: {e}");
            return;
        }

        self.measurements.insert(sid, PendingMeasurement { target: peer.measurement_endpoint, attempt: 0, state });
        self.schedule(now + link_core::measurement::RETRY_INTERVAL_MICROS, TimerKind::MeasurementRetry(sid, 0));
    }

    fn on_measurement_retry(&mut self, sid: SessionId, attempt: usize, now: i64) {
        let Some(pending) = self.measurements.get_mut(&sid) else {
            return;
        };
        if pending.attempt != attempt {
            // a pong already advanced this measurement past this retry.
            return;
        }

        match pending.state.on_retry_timeout(now) {
            link_core::MeasurementOutcome::SendPing(payload) => {
                let target = pending.target;
                pending.attempt += 1;
                let next_attempt = pending.attempt;
                let msg = gateway::ping_message(self.controller.node_id(), payload);
                if let Some(gw) = self.gateways.values().next() {
                    if let Err(e) = gw.send_to(&msg, target) {
                        log::warn!("retrying ping for session {sid:?}: {e}");
                    }
                }
                self.schedule(now + link_core::measurement::RETRY_INTERVAL_MICROS, TimerKind::MeasurementRetry(sid, next_attempt));
            }
            link_core::MeasurementOutcome::Done(xform) => {
                self.measurements.remove(&sid);
                let actions = self.controller.on_measurement_succeeded(sid, xform, now);
                self.dispatch_actions(actions);
            }
            link_core::MeasurementOutcome::Aborted(reason) => {
                log::debug!("measurement of session {sid:?} aborted: {reason}");
                self.measurements.remove(&sid);
                let actions = self.controller.on_measurement_failed(sid, now);
                self.dispatch_actions(actions);
            }
        }
    }

    fn respond_to_ping(&self, gateway_addr: Ipv4Addr, msg: &Message, peer: SocketAddr) {
        let Some(gw) = self.gateways.get(&gateway_addr) else { return };
        let now = self.clock.now_micros();
        let pong_payload = link_core::measurement::respond_to_ping(self.controller.session_id(), self.controller.ghost_xform(), now)
            .concat(msg.payload.clone());
        let response = gateway::pong_message(self.controller.node_id(), pong_payload);
        if let Err(e) = gw.send_to(&response, peer) {
            log::warn!("sending pong to {peer}: {e}");
        }
    }

    fn on_pong(&mut self, msg: &Message, peer: SocketAddr, now: i64) {
        let Some(sid) = self.measurements.iter().find(|(_, m)| m.target == peer).map(|(sid, _)| *sid) else {
            return;
        };
        let Some(pending) = self.measurements.get_mut(&sid) else {
            return;
        };

        match pending.state.on_pong(&msg.payload, now) {
            link_core::MeasurementOutcome::SendPing(payload) => {
                let target = pending.target;
                let msg = gateway::ping_message(self.controller.node_id(), payload);
                if let Some(gw) = self.gateways.values().next() {
                    if let Err(e) = gw.send_to(&msg, target) {
                        log::warn!("continuing measurement for session {sid:?}: {e}");
                    }
                }
            }
            link_core::MeasurementOutcome::Done(xform) => {
                self.measurements.remove(&sid);
                let actions = self.controller.on_measurement_succeeded(sid, xform, now);
                self.dispatch_actions(actions);
            }
            link_core::MeasurementOutcome::Aborted(reason) => {
                log::debug!("measurement of session {sid:?} aborted: {reason}");
                self.measurements.remove(&sid);
                let actions = self.controller.on_measurement_failed(sid, now);
                self.dispatch_actions(actions);
            }
        }
    }

    fn dispatch_actions(&mut self, actions: Vec<ControllerAction>) {
        for action in actions {
            match action {
                ControllerAction::LaunchMeasurement(sid) => self.start_measurement(sid, self.clock.now_micros()),
                ControllerAction::ScheduleRemeasurement { session_id, at_host_micros } => {
                    self.schedule(at_host_micros, TimerKind::SessionRemeasure(session_id))
                }
                ControllerAction::SessionDropped(sid) => {
                    log::debug!("dropped session {sid:?}");
                }
                ControllerAction::Broadcast(state) => self.broadcast_now(state),
            }
        }
    }
}

fn gateway_key(addr: Ipv4Addr) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(addr, link_protocol::MULTICAST_PORT))
}

fn peer_state_from_message(msg: &Message) -> Option<PeerState> {
    let timeline = msg.payload.timeline()?;
    let session_id = msg.payload.session_membership()?;
    let ep = msg.payload.measurement_endpoint()?;

    Some(PeerState {
        node_id: msg.header.ident,
        session_id,
        timeline,
        measurement_endpoint: SocketAddr::new(IpAddr::V4(ep.addr), ep.port),
        ttl_secs: msg.header.ttl,
    })
}
