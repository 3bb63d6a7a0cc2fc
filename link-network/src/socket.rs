//! Per-interface multicast/unicast UDP sockets, one pair per
//! [`crate::gateway::Gateway`]. Grounded directly on the teacher's
//! `bark::socket` module: the same split between a `tx` socket (bound
//! to the interface address on an ephemeral port, used for unicast
//! sends/receives and for sending to the multicast group) and an `rx`
//! socket (bound to the multicast group itself, used only to receive
//! multicast traffic).

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::AsFd;

use nix::poll::{PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Type};
use thiserror::Error;

use link_protocol::{MULTICAST_ADDR, MULTICAST_PORT};

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("creating socket: {0}")]
    Socket(io::Error),
    #[error("setting SO_REUSEADDR: {0}")]
    SetReuseAddr(io::Error),
    #[error("setting SO_BROADCAST: {0}")]
    SetBroadcast(io::Error),
    #[error("binding {0}: {1}")]
    Bind(SocketAddrV4, io::Error),
    #[error("joining multicast group {0}: {1}")]
    JoinMulticastGroup(Ipv4Addr, io::Error),
}

/// The pair of sockets a [`crate::gateway::Gateway`] owns for one
/// local IPv4 interface address.
pub struct GatewaySocket {
    // bound to `local_addr:0`; sends unicast replies/pings and
    // broadcasts to the multicast group; receives unicast traffic.
    tx: UdpSocket,
    // bound to `224.76.78.75:20808`; receives multicast traffic only.
    rx: UdpSocket,
}

impl GatewaySocket {
    pub fn open(local_addr: Ipv4Addr) -> Result<GatewaySocket, ListenError> {
        let tx = bind_socket(SocketAddrV4::new(local_addr, 0))?;
        let rx = open_multicast(local_addr)?;

        Ok(GatewaySocket { tx: tx.into(), rx: rx.into() })
    }

    /// The address other peers should use to reach this gateway
    /// unicast, published as the wire `MeasurementEndpointV4` entry.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tx.local_addr()
    }

    pub fn broadcast(&self, bytes: &[u8]) -> io::Result<()> {
        self.tx.send_to(bytes, (MULTICAST_ADDR, MULTICAST_PORT))?;
        Ok(())
    }

    pub fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.tx.send_to(bytes, dest)?;
        Ok(())
    }

    /// Blocks until either socket is readable, then reads from
    /// whichever is. Never blocks past `timeout` when given. Used when
    /// a single gateway is the only thing a caller waits on; the
    /// reactor instead polls every gateway's fds in one syscall via
    /// [`Self::poll_fds`] and [`Self::recv_tx`]/[`Self::recv_rx`].
    pub fn recv_from(&self, buf: &mut [u8], timeout: PollTimeout) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut fds = self.poll_fds();
        let n = nix::poll::poll(&mut fds, timeout)?;
        if n == 0 {
            return Ok(None);
        }

        if fds[0].any() == Some(true) {
            return Ok(Some(self.recv_tx(buf)?));
        }
        if fds[1].any() == Some(true) {
            return Ok(Some(self.recv_rx(buf)?));
        }

        Ok(None)
    }

    pub fn poll_fds(&self) -> [PollFd<'_>; 2] {
        [PollFd::new(self.tx.as_fd(), PollFlags::POLLIN), PollFd::new(self.rx.as_fd(), PollFlags::POLLIN)]
    }

    pub fn recv_tx(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.tx.recv_from(buf)
    }

    pub fn recv_rx(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.rx.recv_from(buf)
    }
}

fn open_multicast(local_addr: Ipv4Addr) -> Result<socket2::Socket, ListenError> {
    let socket = bind_socket(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT))?;

    socket
        .join_multicast_v4(&MULTICAST_ADDR, &local_addr)
        .map_err(|e| ListenError::JoinMulticastGroup(MULTICAST_ADDR, e))?;

    socket.set_broadcast(true).map_err(ListenError::SetBroadcast)?;
    let _ = socket.set_multicast_loop_v4(local_addr.is_loopback());

    Ok(socket)
}

fn bind_socket(bind: SocketAddrV4) -> Result<socket2::Socket, ListenError> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(ListenError::Socket)?;

    socket.set_reuse_address(true).map_err(ListenError::SetReuseAddr)?;
    socket.bind(&bind.into()).map_err(|e| ListenError::Bind(bind, e))?;

    Ok(socket)
}
