//! Store for everything learned from Router Advertisements: five ordered
//! collections with per-type merge semantics, plus the expiry sweep.

use tracing::warn;

use crate::types::{
    ChangeMask, DhcpLevel, DnsDomain, DnsServer, Gateway, LIFETIME_INFINITE, NdiscData, Route,
    SlaacAddress,
};

/// Result of one expiry sweep over all collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Collections that lost items to expiry.
    pub changed: ChangeMask,
    /// Earliest upcoming deadline (absolute monotonic seconds), if any.
    pub next_event: Option<i64>,
    /// A DNS server or domain crossed its lifetime midpoint; the caller
    /// should solicit a refresh (RFC 8106).
    pub refresh_dns: bool,
}

/// Borrowed read-only view of everything learned, valid until the next
/// mutating call on the store.
#[derive(Debug, Clone, Copy)]
pub struct NdiscSnapshot<'a> {
    pub dhcp_level: DhcpLevel,
    pub hop_limit: u8,
    pub gateways: &'a [Gateway],
    pub addresses: &'a [SlaacAddress],
    pub routes: &'a [Route],
    pub dns_servers: &'a [DnsServer],
    pub dns_domains: &'a [DnsDomain],
}

/// The learned-item collections. Gateways and routes are kept in
/// non-increasing preference order; within each collection identities are
/// unique.
#[derive(Debug, Default)]
pub struct NdiscStore {
    dhcp_level: DhcpLevel,
    hop_limit: u8,
    gateways: Vec<Gateway>,
    addresses: Vec<SlaacAddress>,
    routes: Vec<Route>,
    dns_servers: Vec<DnsServer>,
    dns_domains: Vec<DnsDomain>,
}

impl NdiscStore {
    pub fn new() -> Self {
        Self {
            hop_limit: 64,
            ..Self::default()
        }
    }

    pub fn dhcp_level(&self) -> DhcpLevel {
        self.dhcp_level
    }

    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    pub fn gateways(&self) -> &[Gateway] {
        &self.gateways
    }

    pub fn addresses(&self) -> &[SlaacAddress] {
        &self.addresses
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn dns_servers(&self) -> &[DnsServer] {
        &self.dns_servers
    }

    pub fn dns_domains(&self) -> &[DnsDomain] {
        &self.dns_domains
    }

    pub fn snapshot(&self) -> NdiscSnapshot<'_> {
        NdiscSnapshot {
            dhcp_level: self.dhcp_level,
            hop_limit: self.hop_limit,
            gateways: &self.gateways,
            addresses: &self.addresses,
            routes: &self.routes,
            dns_servers: &self.dns_servers,
            dns_domains: &self.dns_domains,
        }
    }

    /// Owned copy of everything, for publishing with an event.
    pub fn to_data(&self) -> NdiscData {
        NdiscData {
            dhcp_level: self.dhcp_level,
            hop_limit: self.hop_limit,
            gateways: self.gateways.clone(),
            addresses: self.addresses.clone(),
            routes: self.routes.clone(),
            dns_servers: self.dns_servers.clone(),
            dns_domains: self.dns_domains.clone(),
        }
    }

    pub fn set_dhcp_level(&mut self, level: DhcpLevel) -> bool {
        if self.dhcp_level == level {
            return false;
        }
        self.dhcp_level = level;
        true
    }

    pub fn set_hop_limit(&mut self, hop_limit: u8) -> bool {
        if self.hop_limit == hop_limit {
            return false;
        }
        self.hop_limit = hop_limit;
        true
    }

    /// Merge a gateway. Zero lifetime withdraws; a preference change
    /// removes the stale entry and re-inserts the new one in order; a pure
    /// refresh overwrites in place and is not reported as a change.
    pub fn add_gateway(&mut self, new: Gateway) -> bool {
        let mut i = 0;
        while i < self.gateways.len() {
            let item = &mut self.gateways[i];
            if item.addr == new.addr {
                if new.lifetime == 0 {
                    self.gateways.remove(i);
                    return true;
                }
                if item.preference != new.preference {
                    self.gateways.remove(i);
                    continue;
                }
                *item = new;
                return false;
            }
            i += 1;
        }

        if new.lifetime == 0 {
            return false;
        }
        // Before the first strictly less-preferred entry; ties stay in
        // insertion order.
        let at = self
            .gateways
            .iter()
            .position(|item| item.preference < new.preference)
            .unwrap_or(self.gateways.len());
        self.gateways.insert(at, new);
        true
    }

    /// Merge an autoconfigured address whose host bits are already
    /// completed. An overwrite counts as a change only when the valid or
    /// preferred expiry actually moved.
    pub fn add_address(&mut self, new: SlaacAddress, max_addresses: u32) -> bool {
        let mut new = new;
        if new.preferred > new.lifetime {
            new.preferred = new.lifetime;
        }

        for i in 0..self.addresses.len() {
            if self.addresses[i].addr == new.addr {
                if new.lifetime == 0 {
                    self.addresses.remove(i);
                    return true;
                }
                let item = &mut self.addresses[i];
                let changed = item.expiry() != new.expiry()
                    || item.preferred_expiry() != new.preferred_expiry();
                *item = new;
                return changed;
            }
        }

        // The cap counts only our own autoconf addresses, not unrelated
        // kernel addresses.
        if max_addresses > 0 && self.addresses.len() as u32 >= max_addresses {
            return false;
        }

        if new.lifetime == 0 {
            return false;
        }
        self.addresses.push(new);
        true
    }

    /// Merge a route, keyed on (network, plen). Same ordering rules as
    /// gateways. Routers never legitimately advertise plen 0 here, so out
    /// of range values are rejected as caller bugs.
    pub fn add_route(&mut self, new: Route) -> bool {
        if new.plen == 0 || new.plen > 128 {
            // Caller bug: default routes come in as gateways and upper
            // layers never expect a plen outside 1..=128.
            warn!("ignoring route {}/{}: prefix length out of range", new.network, new.plen);
            return false;
        }

        let mut i = 0;
        while i < self.routes.len() {
            let item = &mut self.routes[i];
            if item.network == new.network && item.plen == new.plen {
                if new.lifetime == 0 {
                    self.routes.remove(i);
                    return true;
                }
                if item.preference != new.preference {
                    self.routes.remove(i);
                    continue;
                }
                *item = new;
                return false;
            }
            i += 1;
        }

        if new.lifetime == 0 {
            return false;
        }
        let at = self
            .routes
            .iter()
            .position(|item| item.preference < new.preference)
            .unwrap_or(self.routes.len());
        self.routes.insert(at, new);
        true
    }

    /// Merge a DNS server. A refresh counts as a change whenever timestamp
    /// or lifetime differ, so consumers can re-arm their own expiries.
    pub fn add_dns_server(&mut self, new: DnsServer) -> bool {
        for i in 0..self.dns_servers.len() {
            if self.dns_servers[i].addr == new.addr {
                if new.lifetime == 0 {
                    self.dns_servers.remove(i);
                    return true;
                }
                let item = &mut self.dns_servers[i];
                if item.timestamp != new.timestamp || item.lifetime != new.lifetime {
                    *item = new;
                    return true;
                }
                return false;
            }
        }

        if new.lifetime == 0 {
            return false;
        }
        self.dns_servers.push(new);
        true
    }

    /// Merge a DNS search domain. The store owns the name; a refresh only
    /// touches timestamp and lifetime.
    pub fn add_dns_domain(&mut self, new: DnsDomain) -> bool {
        for i in 0..self.dns_domains.len() {
            if self.dns_domains[i].name == new.name {
                if new.lifetime == 0 {
                    self.dns_domains.remove(i);
                    return true;
                }
                let item = &mut self.dns_domains[i];
                if item.timestamp != new.timestamp || item.lifetime != new.lifetime {
                    item.timestamp = new.timestamp;
                    item.lifetime = new.lifetime;
                    return true;
                }
                return false;
            }
        }

        if new.lifetime == 0 {
            return false;
        }
        self.dns_domains.push(new);
        true
    }

    pub(crate) fn addresses_mut(&mut self) -> &mut Vec<SlaacAddress> {
        &mut self.addresses
    }

    /// Drop all autoconf addresses (interface identifier changed). Returns
    /// whether there was anything to drop.
    pub(crate) fn flush_addresses(&mut self) -> bool {
        if self.addresses.is_empty() {
            return false;
        }
        self.addresses.clear();
        true
    }

    /// Drop everything whose lifetime ran out and collect the earliest
    /// upcoming deadline. DNS entries ask for a refresh solicitation at
    /// their lifetime midpoint.
    pub fn sweep(&mut self, now: i64) -> SweepOutcome {
        let mut out = SweepOutcome {
            changed: ChangeMask::NONE,
            next_event: None,
            refresh_dns: false,
        };

        sweep_items(
            &mut self.gateways,
            now,
            &mut out,
            ChangeMask::GATEWAYS,
            |item| (item.lifetime, item.expiry()),
        );
        sweep_items(
            &mut self.addresses,
            now,
            &mut out,
            ChangeMask::ADDRESSES,
            |item| (item.lifetime, item.expiry()),
        );
        sweep_items(&mut self.routes, now, &mut out, ChangeMask::ROUTES, |item| {
            (item.lifetime, item.expiry())
        });

        sweep_dns(&mut self.dns_servers, now, &mut out, ChangeMask::DNS_SERVERS, |item| {
            (item.lifetime, item.timestamp)
        });
        sweep_dns(&mut self.dns_domains, now, &mut out, ChangeMask::DNS_DOMAINS, |item| {
            (item.lifetime, item.timestamp)
        });

        out
    }
}

fn fold_deadline(next_event: &mut Option<i64>, deadline: i64) {
    if next_event.is_none_or(|next| deadline < next) {
        *next_event = Some(deadline);
    }
}

fn sweep_items<T>(
    items: &mut Vec<T>,
    now: i64,
    out: &mut SweepOutcome,
    bit: ChangeMask,
    fields: impl Fn(&T) -> (u32, i64),
) {
    let mut i = 0;
    while i < items.len() {
        let (lifetime, expiry) = fields(&items[i]);
        if lifetime == LIFETIME_INFINITE {
            i += 1;
            continue;
        }
        if now >= expiry {
            items.remove(i);
            out.changed |= bit;
            continue;
        }
        fold_deadline(&mut out.next_event, expiry);
        i += 1;
    }
}

fn sweep_dns<T>(
    items: &mut Vec<T>,
    now: i64,
    out: &mut SweepOutcome,
    bit: ChangeMask,
    fields: impl Fn(&T) -> (u32, i64),
) {
    let mut i = 0;
    while i < items.len() {
        let (lifetime, timestamp) = fields(&items[i]);
        if lifetime == LIFETIME_INFINITE {
            i += 1;
            continue;
        }
        let expiry = timestamp + i64::from(lifetime);
        let refresh = timestamp + i64::from(lifetime / 2);
        if now >= expiry {
            items.remove(i);
            out.changed |= bit;
            continue;
        }
        if now >= refresh {
            out.refresh_dns = true;
            fold_deadline(&mut out.next_event, expiry);
        } else {
            fold_deadline(&mut out.next_event, refresh);
        }
        i += 1;
    }
}
