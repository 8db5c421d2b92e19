//! Router Solicitation emission via raw ICMPv6 socket.
//!
//! The transport owns the socket; RA reception and parsing live with the
//! embedding application, which feeds parsed items back through the
//! engine's `add_*` helpers.

use std::net::{Ipv6Addr, SocketAddrV6};

use anyhow::{Context as _, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

/// All-routers link-local multicast group, the RS destination.
const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

const ICMPV6_ROUTER_SOLICITATION: u8 = 133;
const OPT_SOURCE_LINK_ADDR: u8 = 1;

/// What the engine needs from its transport. `send_rs` failures are
/// reported with a message the pacer debounces; they never stop the
/// engine.
pub trait Transport: Send {
    /// Called once from `start`, before the first solicitation.
    fn start(&mut self) -> Result<()>;

    /// Emit one Router Solicitation.
    fn send_rs(&mut self) -> Result<()>;
}

/// Raw-socket transport for a single interface.
pub struct Icmpv6Transport {
    ifname: String,
    link_addr: Option<[u8; 6]>,
    socket: Option<Socket>,
}

impl Icmpv6Transport {
    /// `link_addr` is the interface's MAC, attached as the source
    /// link-layer address option when known.
    pub fn new(ifname: impl Into<String>, link_addr: Option<[u8; 6]>) -> Self {
        Self {
            ifname: ifname.into(),
            link_addr,
            socket: None,
        }
    }
}

impl Transport for Icmpv6Transport {
    fn start(&mut self) -> Result<()> {
        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .context("failed to open raw ICMPv6 socket")?;

        // ND messages must go out with hop limit 255 (RFC 4861 §4.1).
        socket.set_multicast_hops_v6(255)?;
        socket.set_unicast_hops_v6(255)?;

        #[cfg(target_os = "linux")]
        socket.bind_device(Some(self.ifname.as_bytes()))?;

        debug!("router solicitation socket open on {}", self.ifname);
        self.socket = Some(socket);
        Ok(())
    }

    fn send_rs(&mut self) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .context("transport not started")?;

        let packet = build_rs_packet(self.link_addr);
        let dest: socket2::SockAddr = SocketAddrV6::new(ALL_ROUTERS, 0, 0, 0).into();
        socket
            .send_to(&packet, &dest)
            .with_context(|| format!("failed to send router solicitation on {}", self.ifname))?;
        Ok(())
    }
}

/// Build an ICMPv6 Router Solicitation. The kernel fills in the checksum
/// on raw ICMPv6 sockets.
fn build_rs_packet(link_addr: Option<[u8; 6]>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);

    buf.push(ICMPV6_ROUTER_SOLICITATION);
    buf.push(0); // Code
    buf.extend_from_slice(&[0, 0]); // Checksum (kernel computes)
    buf.extend_from_slice(&0u32.to_be_bytes()); // Reserved

    // Source Link-Layer Address option (type=1, length=1 = 8 bytes)
    if let Some(mac) = link_addr {
        buf.push(OPT_SOURCE_LINK_ADDR);
        buf.push(1);
        buf.extend_from_slice(&mac);
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rs_packet_without_slla() {
        let packet = build_rs_packet(None);
        assert_eq!(packet, [133, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn rs_packet_with_slla() {
        let packet = build_rs_packet(Some([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
        assert_eq!(packet.len(), 16);
        assert_eq!(&packet[..8], &[133, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&packet[8..10], &[OPT_SOURCE_LINK_ADDR, 1]);
        assert_eq!(&packet[10..], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }
}
