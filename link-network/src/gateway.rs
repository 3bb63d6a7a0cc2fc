//! One [`Gateway`] per local IPv4 interface: owns the multicast +
//! unicast sockets for that interface and frames/parses the
//! `_asdp_v` discovery messages flowing over them. Grounded on
//! `ableton::link::Gateway`/`ableton::discovery::PeerGateway` for the
//! responsibilities, and on the teacher's `bark::socket::Socket` for
//! how the sockets themselves are opened and multiplexed.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use link_protocol::wire::message::{Message, MessageType};
use link_protocol::wire::payload::Payload;
use link_protocol::NodeId;

use crate::socket::{GatewaySocket, ListenError};

pub struct Gateway {
    pub local_addr: Ipv4Addr,
    socket: GatewaySocket,
}

impl Gateway {
    pub fn open(local_addr: Ipv4Addr) -> Result<Gateway, ListenError> {
        let socket = GatewaySocket::open(local_addr)?;
        Ok(Gateway { local_addr, socket })
    }

    /// The unicast address peers should send Pings/Responses to,
    /// advertised on the wire as `MeasurementEndpointV4`.
    pub fn measurement_endpoint(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn broadcast(&self, msg: &Message) -> io::Result<()> {
        self.socket.broadcast(&msg.encode())
    }

    pub fn send_to(&self, msg: &Message, dest: SocketAddr) -> io::Result<()> {
        self.socket.send_to(&msg.encode(), dest)
    }

    pub fn socket(&self) -> &GatewaySocket {
        &self.socket
    }

    /// Parse a datagram read from either of this gateway's sockets.
    /// Returns `None` for anything that doesn't frame as an `_asdp_v`
    /// message, or that the reactor should ignore outright (looped
    /// back from ourselves, or addressed to a different multicast
    /// group).
    pub fn parse(bytes: &[u8], self_id: NodeId) -> Option<Message> {
        let msg = Message::parse(bytes).ok()?;
        if msg.header.ident == self_id || msg.header.group_id != 0 {
            return None;
        }
        Some(msg)
    }
}

pub fn alive_message(ident: NodeId, payload: Payload) -> Message {
    Message::new(MessageType::Alive, 5, ident, payload)
}

pub fn response_message(ident: NodeId, payload: Payload) -> Message {
    Message::new(MessageType::Response, 5, ident, payload)
}

pub fn byebye_message(ident: NodeId, payload: Payload) -> Message {
    Message::new(MessageType::ByeBye, 5, ident, payload)
}

pub fn ping_message(ident: NodeId, payload: Payload) -> Message {
    Message::new(MessageType::Ping, 5, ident, payload)
}

pub fn pong_message(ident: NodeId, payload: Payload) -> Message {
    Message::new(MessageType::Pong, 5, ident, payload)
}
