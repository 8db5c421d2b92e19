//! Host event-loop glue: owns an engine and drives it from parsed-RA
//! input and fired timers. Library consumers may also drive the engine
//! directly.

use std::net::Ipv6Addr;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use crate::engine::NdiscEngine;
use crate::timers::TimerRole;
use crate::types::{ChangeMask, DhcpLevel, DnsDomain, DnsServer, Gateway, Ipv6IfaceId, Route, SlaacAddress};

/// Everything one parsed Router Advertisement taught us, as produced by
/// whatever parses RA bytes on the socket side.
#[derive(Debug, Clone, Default)]
pub struct RaPayload {
    pub dhcp_level: Option<DhcpLevel>,
    pub hop_limit: Option<u8>,
    pub gateways: Vec<Gateway>,
    pub addresses: Vec<SlaacAddress>,
    pub routes: Vec<Route>,
    pub dns_servers: Vec<DnsServer>,
    pub dns_domains: Vec<DnsDomain>,
}

/// Inputs the loop accepts from the outside world.
#[derive(Debug, Clone)]
pub enum NdiscInput {
    /// A parsed Router Advertisement.
    Ra(RaPayload),
    /// The kernel reported a duplicate for this address.
    DadFailed(Ipv6Addr),
    /// The link yielded (or the operator set) an interface identifier.
    SetIfaceId(Ipv6IfaceId),
}

/// Apply one parsed RA through the engine's merge helpers, collecting the
/// change mask the helpers report, then complete with `ra_received`.
pub fn apply_ra(engine: &mut NdiscEngine, ra: RaPayload) {
    let mut changed = ChangeMask::NONE;

    if let Some(level) = ra.dhcp_level {
        if engine.set_dhcp_level(level) {
            changed |= ChangeMask::DHCP_LEVEL;
        }
    }
    if let Some(hop_limit) = ra.hop_limit {
        if engine.set_hop_limit(hop_limit) {
            changed |= ChangeMask::HOP_LIMIT;
        }
    }

    for gateway in ra.gateways {
        if engine.add_gateway(gateway) {
            changed |= ChangeMask::GATEWAYS;
        }
    }
    for address in ra.addresses {
        if engine.add_address(address) {
            changed |= ChangeMask::ADDRESSES;
        }
    }
    for route in ra.routes {
        if engine.add_route(route) {
            changed |= ChangeMask::ROUTES;
        }
    }
    for server in ra.dns_servers {
        if engine.add_dns_server(server) {
            changed |= ChangeMask::DNS_SERVERS;
        }
    }
    for domain in ra.dns_domains {
        if engine.add_dns_domain(domain) {
            changed |= ChangeMask::DNS_DOMAINS;
        }
    }

    let now = engine.now();
    engine.ra_received(now, changed);
}

/// Run neighbor discovery until the input channel closes. `fired` is the
/// receiver returned by [`crate::timers::TokioTimers::new`].
pub async fn run(
    mut engine: NdiscEngine,
    mut inputs: mpsc::UnboundedReceiver<NdiscInput>,
    mut fired: mpsc::UnboundedReceiver<TimerRole>,
) -> Result<()> {
    engine.start()?;

    loop {
        tokio::select! {
            Some(role) = fired.recv() => engine.timer_fired(role),
            input = inputs.recv() => match input {
                Some(NdiscInput::Ra(ra)) => apply_ra(&mut engine, ra),
                Some(NdiscInput::DadFailed(addr)) => engine.dad_failed(addr),
                Some(NdiscInput::SetIfaceId(iid)) => {
                    engine.set_iid(iid);
                }
                None => break,
            },
        }
    }

    info!("neighbor discovery on {} shutting down", engine.config().ifname);
    Ok(())
}
