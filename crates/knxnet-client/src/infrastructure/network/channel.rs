//! UDP channel factory: one socket per logical channel role.
//!
//! - Tunneling channels bind an ephemeral port and connect to the gateway,
//!   so the OS filters inbound datagrams to that peer.
//! - Discovery channels bind ephemeral and target the system-setup
//!   multicast group without joining it (search responses come back
//!   unicast).
//! - Routing channels bind the multicast port, join the group, and record
//!   the membership so close can leave it again.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Largest datagram the inbox reads in one call. KNX Net/IP frames are
/// small; this leaves generous headroom.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// One UDP socket plus the channel-role bookkeeping needed to close it.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    target: SocketAddrV4,
    /// Connected sockets use `send`, unconnected ones `send_to(target)`.
    connected: bool,
    /// `(group, interface)` to leave on close.
    multicast_membership: Option<(Ipv4Addr, Ipv4Addr)>,
    closed: AtomicBool,
}

impl UdpChannel {
    /// Channel for tunneling control/data traffic with one gateway.
    pub async fn tunnel(gateway: SocketAddrV4) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(gateway).await?;
        debug!(local = %socket.local_addr()?, %gateway, "tunnel channel bound");
        Ok(Self {
            socket,
            target: gateway,
            connected: true,
            multicast_membership: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Channel for multicasting search requests and receiving unicast
    /// search responses.
    pub async fn discovery(multicast: SocketAddrV4) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        debug!(local = %socket.local_addr()?, %multicast, "discovery channel bound");
        Ok(Self {
            socket,
            target: multicast,
            connected: false,
            multicast_membership: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Channel for routing mode: member of the multicast group on its
    /// well-known port.
    pub async fn routing(multicast: SocketAddrV4) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, multicast.port())).await?;
        let interface = Ipv4Addr::UNSPECIFIED;
        socket.join_multicast_v4(*multicast.ip(), interface)?;
        debug!(group = %multicast, "routing channel joined multicast group");
        Ok(Self {
            socket,
            target: multicast,
            connected: false,
            multicast_membership: Some((*multicast.ip(), interface)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Writes one datagram to the channel's peer or group.
    pub async fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        if self.connected {
            self.socket.send(bytes).await?;
        } else {
            self.socket.send_to(bytes, self.target).await?;
        }
        Ok(())
    }

    /// Reads one datagram. The buffer should be [`MAX_DATAGRAM_SIZE`].
    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Idempotent channel-role cleanup. The socket itself closes when the
    /// channel is dropped; leaving the multicast group must not outlive
    /// that, and a failure to leave is logged, never escalated.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((group, interface)) = self.multicast_membership {
            if let Err(e) = self.socket.leave_multicast_v4(group, interface) {
                warn!(%group, "failed to leave multicast group: {e}");
            } else {
                debug!(%group, "left multicast group");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tunnel_channel_binds_ephemeral_and_reaches_peer() {
        // Arrange – a loopback peer standing in for the gateway
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = match peer.local_addr().unwrap() {
            SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };

        // Act
        let channel = UdpChannel::tunnel(peer_addr).await.unwrap();
        channel.send(&[0x06, 0x10]).await.unwrap();

        // Assert
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x06, 0x10]);
        assert_eq!(from, channel.local_addr().unwrap());
        assert_ne!(channel.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        // Arrange
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = match peer.local_addr().unwrap() {
            SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };
        let channel = UdpChannel::tunnel(peer_addr).await.unwrap();

        // Act / Assert – closing twice must be safe
        assert!(!channel.is_closed());
        channel.close();
        assert!(channel.is_closed());
        channel.close();
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_discovery_channel_targets_multicast_without_joining() {
        // Act
        let channel = UdpChannel::discovery("224.0.23.12:3671".parse().unwrap())
            .await
            .unwrap();

        // Assert – ephemeral local port, no membership to tear down
        assert_ne!(channel.local_addr().unwrap().port(), 3671);
        assert!(channel.multicast_membership.is_none());
    }
}
