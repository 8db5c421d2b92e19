//! Data learned from Router Advertisements: record types, the change mask
//! and the events published to consumers.

use std::fmt;
use std::net::Ipv6Addr;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Lifetime sentinel meaning "never expires" (RFC 4861 all-ones).
pub const LIFETIME_INFINITE: u32 = u32::MAX;

/// Route/gateway preference (RFC 4191). Ordering: low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePreference {
    Low,
    #[default]
    Medium,
    High,
}

impl RoutePreference {
    /// Decode the 2-bit wire encoding. The reserved value (0b10) is treated
    /// as medium, as receivers must (RFC 4191 §2.1).
    pub fn from_wire(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => Self::High,
            0b11 => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::High => 0b01,
            Self::Medium => 0b00,
            Self::Low => 0b11,
        }
    }
}

impl fmt::Display for RoutePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Whether the router advertised that DHCPv6 should run, derived from the
/// RA M/O flags by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DhcpLevel {
    #[default]
    None,
    Otherconf,
    Managed,
}

impl fmt::Display for DhcpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Otherconf => write!(f, "otherconf"),
            Self::Managed => write!(f, "managed"),
        }
    }
}

/// A default router learned from an RA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub addr: Ipv6Addr,
    /// Monotonic seconds at which the lifetime started.
    pub timestamp: i64,
    pub lifetime: u32,
    pub preference: RoutePreference,
}

impl Gateway {
    pub fn expiry(&self) -> i64 {
        self.timestamp + i64::from(self.lifetime)
    }
}

/// An autoconfigured address (prefix + completed host bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaacAddress {
    pub addr: Ipv6Addr,
    pub timestamp: i64,
    /// Valid lifetime in seconds.
    pub lifetime: u32,
    /// Preferred lifetime; never exceeds `lifetime`.
    pub preferred: u32,
    /// How many host-bit candidates were already generated for this prefix.
    pub dad_counter: u32,
}

impl SlaacAddress {
    pub fn expiry(&self) -> i64 {
        self.timestamp + i64::from(self.lifetime)
    }

    pub fn preferred_expiry(&self) -> i64 {
        self.timestamp + i64::from(self.preferred)
    }
}

/// A more-specific route learned from an RA route information option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub network: Ipv6Addr,
    /// Prefix length, 1..=128. Default routes are expressed as gateways.
    pub plen: u8,
    pub gateway: Ipv6Addr,
    pub timestamp: i64,
    pub lifetime: u32,
    pub preference: RoutePreference,
}

impl Route {
    pub fn expiry(&self) -> i64 {
        self.timestamp + i64::from(self.lifetime)
    }
}

/// A recursive DNS server learned from an RDNSS option (RFC 8106).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsServer {
    pub addr: Ipv6Addr,
    pub timestamp: i64,
    pub lifetime: u32,
}

impl DnsServer {
    pub fn expiry(&self) -> i64 {
        self.timestamp + i64::from(self.lifetime)
    }
}

/// A DNS search domain learned from a DNSSL option (RFC 8106).
/// The store owns the domain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsDomain {
    pub name: String,
    pub timestamp: i64,
    pub lifetime: u32,
}

impl DnsDomain {
    pub fn expiry(&self) -> i64 {
        self.timestamp + i64::from(self.lifetime)
    }
}

/// A 64-bit IPv6 interface identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ipv6IfaceId(pub [u8; 8]);

impl Ipv6IfaceId {
    /// Modified EUI-64 identifier from a MAC address: flip the
    /// universal/local bit and insert `ff:fe` in the middle.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        Self([
            mac[0] ^ 0x02,
            mac[1],
            mac[2],
            mac[3],
            0xff,
            0xfe,
            mac[4],
            mac[5],
        ])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }

    /// Write this identifier into the low 64 bits of `addr`, keeping the
    /// prefix intact.
    pub fn overlay(&self, addr: Ipv6Addr) -> Ipv6Addr {
        let mut octets = addr.octets();
        octets[8..].copy_from_slice(&self.0);
        Ipv6Addr::from(octets)
    }
}

/// Bit set naming which parts of the learned configuration changed.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeMask(u32);

impl ChangeMask {
    pub const NONE: Self = Self(0);
    pub const DHCP_LEVEL: Self = Self(1 << 0);
    pub const GATEWAYS: Self = Self(1 << 1);
    pub const ADDRESSES: Self = Self(1 << 2);
    pub const ROUTES: Self = Self(1 << 3);
    pub const DNS_SERVERS: Self = Self(1 << 4);
    pub const DNS_DOMAINS: Self = Self(1 << 5);
    pub const HOP_LIMIT: Self = Self(1 << 6);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ChangeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChangeMask {
    /// Compact form used in log headers: one letter per set bit.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bit, letter) in [
            (Self::DHCP_LEVEL, 'd'),
            (Self::GATEWAYS, 'G'),
            (Self::ADDRESSES, 'A'),
            (Self::ROUTES, 'R'),
            (Self::DNS_SERVERS, 'S'),
            (Self::DNS_DOMAINS, 'D'),
            (Self::HOP_LIMIT, 'H'),
        ] {
            if self.contains(bit) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ChangeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeMask({self})")
    }
}

/// Owned aggregate of everything currently learned, attached to
/// [`NdiscEvent::ConfigChanged`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NdiscData {
    pub dhcp_level: DhcpLevel,
    pub hop_limit: u8,
    pub gateways: Vec<Gateway>,
    pub addresses: Vec<SlaacAddress>,
    pub routes: Vec<Route>,
    pub dns_servers: Vec<DnsServer>,
    pub dns_domains: Vec<DnsDomain>,
}

impl Default for NdiscData {
    fn default() -> Self {
        Self {
            dhcp_level: DhcpLevel::None,
            hop_limit: 64,
            gateways: Vec::new(),
            addresses: Vec::new(),
            routes: Vec::new(),
            dns_servers: Vec::new(),
            dns_domains: Vec::new(),
        }
    }
}

/// Events published by the engine.
#[derive(Debug, Clone)]
pub enum NdiscEvent {
    /// The learned configuration changed; `changed` names what did.
    ConfigChanged { data: NdiscData, changed: ChangeMask },
    /// No Router Advertisement arrived within the first-RA window.
    RaTimeout,
}
