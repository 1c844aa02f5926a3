//! UDP multicast transport
//!
//! One socket is bound to `0.0.0.0:port` and joined to the DCS-BIOS group.
//! The receive side is a tokio socket driven by the inbound task; the send
//! side is a cloned std handle so blocking endpoint threads can transmit
//! without entering the runtime.
//!
//! Endpoint output sent to the group must never come back in as export
//! data: multicast loopback is disabled on the socket, and the inbound side
//! drops datagrams from [`UdpSender::source_addrs`].

use crate::constants::{MAX_SOCKET_RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS};
use crate::error::{BridgeError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Where endpoint output and commands are sent
#[derive(Clone)]
pub struct UdpSender {
    socket: Arc<std::net::UdpSocket>,
    dest: SocketAddr,
}

impl UdpSender {
    pub fn new(socket: Arc<std::net::UdpSocket>, dest: SocketAddr) -> Self {
        Self { socket, dest }
    }

    pub fn destination(&self) -> SocketAddr {
        self.dest
    }

    /// Addresses our own datagrams to the destination arrive from
    ///
    /// For a socket bound to the any-address this is the loopback address
    /// plus the interface address the kernel routes `dest` through, all on
    /// the bound port.
    pub fn source_addrs(&self) -> Vec<SocketAddr> {
        let Ok(local) = self.socket.local_addr() else {
            return Vec::new();
        };
        if !local.ip().is_unspecified() {
            return vec![local];
        }

        let port = local.port();
        let mut addrs = vec![SocketAddr::from((Ipv4Addr::LOCALHOST, port))];
        match route_source(self.dest) {
            Ok(ip) if !ip.is_unspecified() && !ip.is_loopback() => {
                addrs.push(SocketAddr::new(ip, port));
            }
            Ok(_) => {}
            Err(e) => debug!(dest = %self.dest, error = %e, "Cannot resolve outgoing interface"),
        }
        addrs
    }

    /// Send one datagram to the destination
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send_to(data, self.dest)
    }
}

/// The bridge's multicast socket, split into receive and send handles
pub struct MulticastSocket {
    pub recv: UdpSocket,
    pub send: Arc<std::net::UdpSocket>,
}

impl MulticastSocket {
    /// Bind `0.0.0.0:port` with SO_REUSEADDR and join `group`
    ///
    /// Retries the bind a few times if the port is still held by a previous
    /// run. Must be called within a tokio runtime.
    pub fn bind(group: Ipv4Addr, port: u16) -> Result<Self> {
        if !group.is_multicast() {
            return Err(BridgeError::NotMulticast { group });
        }
        let socket = bind_reusable(port)?;
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| BridgeError::MulticastJoin { group, source: e })?;
        socket
            .set_multicast_loop_v4(false)
            .map_err(|e| BridgeError::MulticastJoin { group, source: e })?;
        debug!(%group, port, "Joined multicast group");

        let map_err = |e| BridgeError::UdpBind { port, source: e };
        let sender = socket.try_clone().map_err(map_err)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let recv = UdpSocket::from_std(std_socket).map_err(map_err)?;

        Ok(Self {
            recv,
            send: Arc::new(sender.into()),
        })
    }

    pub fn local_port(&self) -> Option<u16> {
        self.recv.local_addr().ok().map(|a| a.port())
    }
}

/// Local IP the kernel would send to `dest` from (no packet is sent)
fn route_source(dest: SocketAddr) -> io::Result<IpAddr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(dest)?;
    Ok(socket.local_addr()?.ip())
}

fn bind_reusable(port: u16) -> Result<Socket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let map_err = |e| BridgeError::UdpBind { port, source: e };

    // Try up to MAX_SOCKET_RETRY_ATTEMPTS times with increasing delay
    for attempt in 0..MAX_SOCKET_RETRY_ATTEMPTS {
        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(map_err)?;
        socket.set_reuse_address(true).map_err(map_err)?;
        socket.set_nonblocking(true).map_err(map_err)?;

        match socket.bind(&addr.into()) {
            Ok(_) => return Ok(socket),
            Err(_) if attempt < MAX_SOCKET_RETRY_ATTEMPTS - 1 => {
                // Exponential backoff: 200ms, 400ms, 800ms, 1600ms
                std::thread::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << attempt)));
            }
            Err(e) => return Err(map_err(e)),
        }
    }

    Err(BridgeError::UdpBind {
        port,
        source: io::Error::new(io::ErrorKind::AddrInUse, "failed after retries"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unicast_group() {
        let err = MulticastSocket::bind(Ipv4Addr::new(10, 1, 1, 1), 0).err().unwrap();
        assert!(matches!(err, BridgeError::NotMulticast { .. }));
    }

    #[tokio::test]
    async fn test_bound_socket_does_not_loop_back() {
        let socket = MulticastSocket::bind(Ipv4Addr::new(239, 255, 50, 10), 0).unwrap();
        assert!(!socket.send.multicast_loop_v4().unwrap());
    }

    #[test]
    fn test_source_addrs_of_specific_bind() {
        let local = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = local.local_addr().unwrap();
        let sender = UdpSender::new(Arc::new(local), "127.0.0.1:7778".parse().unwrap());
        assert_eq!(sender.source_addrs(), vec![addr]);
    }

    #[test]
    fn test_source_addrs_of_any_address_bind() {
        let local = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = local.local_addr().unwrap().port();
        let sender = UdpSender::new(Arc::new(local), "127.0.0.1:7778".parse().unwrap());

        let addrs = sender.source_addrs();
        assert_eq!(addrs[0], SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
        assert!(addrs.iter().all(|a| a.port() == port));
    }

    #[tokio::test]
    async fn test_sender_reaches_unicast_peer() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let local = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        let sender = UdpSender::new(Arc::new(local), peer.local_addr().unwrap());
        sender.send(b"MASTER_ARM 1\n").unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"MASTER_ARM 1\n");
    }
}
