//! IPv6 Neighbor Discovery / SLAAC state engine for one interface.
//!
//! The engine solicits routers, merges what Router Advertisements carry
//! (gateways, autoconf prefixes, routes, DNS), ages it all out on a
//! monotonic clock and publishes change events. It installs nothing into
//! the kernel and parses no RA bytes; both stay with the embedding
//! application.

pub mod addrgen;
pub mod config;
pub mod engine;
mod pacer;
pub mod platform;
pub mod service;
pub mod store;
pub mod timers;
pub mod transport;
pub mod types;

pub use config::{AddrGenMode, NdiscConfig, StableType};
pub use engine::NdiscEngine;
pub use platform::{HostPlatform, NetnsGuard, Platform};
pub use service::{NdiscInput, RaPayload};
pub use store::{NdiscSnapshot, NdiscStore, SweepOutcome};
pub use timers::{TimerRole, Timers, TokioTimers};
pub use transport::{Icmpv6Transport, Transport};
pub use types::{
    ChangeMask, DhcpLevel, DnsDomain, DnsServer, Gateway, Ipv6IfaceId, LIFETIME_INFINITE,
    NdiscData, NdiscEvent, Route, RoutePreference, SlaacAddress,
};
