//! The per-interface neighbor discovery engine: drives Router
//! Solicitations, merges what Router Advertisements taught us, expires it
//! on time, and tells consumers when the picture changed.

use std::net::Ipv6Addr;

use anyhow::{Result, ensure};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::addrgen;
use crate::config::{AddrGenMode, NdiscConfig};
use crate::pacer::SolicitPacer;
use crate::platform::Platform;
use crate::store::{NdiscSnapshot, NdiscStore};
use crate::timers::{TimerRole, Timers};
use crate::transport::Transport;
use crate::types::{
    ChangeMask, DhcpLevel, DnsDomain, DnsServer, Gateway, Ipv6IfaceId, NdiscEvent, Route,
    SlaacAddress,
};

pub struct NdiscEngine {
    config: NdiscConfig,
    platform: Box<dyn Platform>,
    transport: Box<dyn Transport>,
    timers: Box<dyn Timers>,
    events: mpsc::UnboundedSender<NdiscEvent>,
    store: NdiscStore,
    pacer: SolicitPacer,
    iid: Option<Ipv6IfaceId>,
    started: bool,
}

impl NdiscEngine {
    /// Build an engine for one interface. Returns the engine and the
    /// receiver of its events.
    pub fn new(
        config: NdiscConfig,
        platform: Box<dyn Platform>,
        transport: Box<dyn Transport>,
        timers: Box<dyn Timers>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NdiscEvent>)> {
        config.validate()?;
        let (events, events_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                config,
                platform,
                transport,
                timers,
                events,
                store: NdiscStore::new(),
                pacer: SolicitPacer::new(),
                iid: None,
                started: false,
            },
            events_rx,
        ))
    }

    pub fn config(&self) -> &NdiscConfig {
        &self.config
    }

    /// Current monotonic seconds, for callers stamping items they feed in.
    pub fn now(&self) -> i64 {
        self.platform.monotonic_secs()
    }

    /// Read-only view of everything learned; valid until the next
    /// mutating call.
    pub fn snapshot(&self) -> NdiscSnapshot<'_> {
        self.store.snapshot()
    }

    /// Begin neighbor discovery: arm the first-RA timeout, start the
    /// transport and solicit. Calling it twice is a caller bug.
    pub fn start(&mut self) -> Result<()> {
        ensure!(!self.started, "neighbor discovery already started on {}", self.config.ifname);

        debug!(
            "starting neighbor discovery on {} (ifindex {})",
            self.config.ifname, self.config.ifindex
        );

        let _netns = self.platform.enter_netns()?;

        self.started = true;
        let ra_wait = self.config.first_ra_timeout_secs();
        self.timers.arm(TimerRole::FirstRa, ra_wait);
        debug!("waiting up to {ra_wait}s for the first router advertisement");

        self.transport.start()?;

        let now = self.platform.monotonic_secs();
        self.pacer.solicit(now, &self.config, self.timers.as_mut());
        Ok(())
    }

    /// Merge a gateway advertised in an RA. Returns whether the learned
    /// set visibly changed.
    pub fn add_gateway(&mut self, gateway: Gateway) -> bool {
        self.store.add_gateway(gateway)
    }

    /// Complete the host bits of `address` and merge it. Completion
    /// failures (no IID yet, exhausted EUI-64, counter overflow) drop the
    /// address with a warning.
    pub fn add_address(&mut self, mut address: SlaacAddress) -> bool {
        if let Err(err) = addrgen::complete_address(&self.config, self.iid, &mut address) {
            warn!("cannot complete address {} on {}: {err}", address.addr, self.config.ifname);
            return false;
        }
        self.store.add_address(address, self.config.max_addresses)
    }

    pub fn add_route(&mut self, route: Route) -> bool {
        self.store.add_route(route)
    }

    pub fn add_dns_server(&mut self, server: DnsServer) -> bool {
        self.store.add_dns_server(server)
    }

    pub fn add_dns_domain(&mut self, domain: DnsDomain) -> bool {
        self.store.add_dns_domain(domain)
    }

    /// Record the DHCP level derived from the RA M/O flags. The returned
    /// flag belongs in the mask passed to [`Self::ra_received`].
    pub fn set_dhcp_level(&mut self, level: DhcpLevel) -> bool {
        self.store.set_dhcp_level(level)
    }

    /// Record the RA's current hop limit. Same contract as
    /// [`Self::set_dhcp_level`]: the returned flag maps to the hop-limit
    /// mask bit.
    pub fn set_hop_limit(&mut self, hop_limit: u8) -> bool {
        self.store.set_hop_limit(hop_limit)
    }

    /// A Router Advertisement was fully applied via the `add_*` helpers:
    /// stop waiting, forget stale send errors and re-evaluate lifetimes.
    /// `changed` carries whatever the caller already knows changed
    /// (DHCP level, collections it touched).
    pub fn ra_received(&mut self, now: i64, changed: ChangeMask) {
        self.timers.cancel(TimerRole::FirstRa);
        self.pacer.cancel_pending_send(self.timers.as_mut());
        self.pacer.clear_last_error();
        self.sweep(now, changed);
    }

    /// Duplicate Address Detection failed for `addr`: generate a new
    /// candidate where possible, drop the address where not.
    pub fn dad_failed(&mut self, addr: Ipv6Addr) {
        let mut changed = false;

        let config = &self.config;
        let iid = self.iid;
        let addresses = self.store.addresses_mut();
        let mut i = 0;
        while i < addresses.len() {
            if addresses[i].addr != addr {
                i += 1;
                continue;
            }

            debug!("duplicate address detection failed for {addr} on {}", config.ifname);
            changed = true;
            match addrgen::complete_address(config, iid, &mut addresses[i]) {
                Ok(()) => i += 1,
                Err(err) => {
                    warn!("cannot regenerate {addr}: {err}");
                    addresses.remove(i);
                }
            }
        }

        if changed {
            self.emit_config_change(ChangeMask::ADDRESSES);
        }
    }

    /// Set the interface identifier used for EUI-64 completion. Returns
    /// whether addresses need to be regenerated (the caller should expect
    /// fresh RAs to rebuild them; a solicitation is already under way).
    ///
    /// Under stable-privacy the identifier is recorded but the generated
    /// addresses do not depend on it, so nothing is regenerated.
    pub fn set_iid(&mut self, iid: Ipv6IfaceId) -> bool {
        if self.iid == Some(iid) {
            return false;
        }
        self.iid = Some(iid);

        if self.config.addr_gen_mode == AddrGenMode::StablePrivacy {
            return false;
        }

        if self.store.flush_addresses() {
            debug!("interface identifier changed on {}, flushing addresses", self.config.ifname);
            self.emit_config_change(ChangeMask::ADDRESSES);
            let now = self.platform.monotonic_secs();
            self.pacer.solicit(now, &self.config, self.timers.as_mut());
        }
        true
    }

    /// Dispatch a fired timer. The host loop calls this with whatever
    /// [`crate::timers::Timers`] implementation delivered.
    pub fn timer_fired(&mut self, role: TimerRole) {
        let now = self.platform.monotonic_secs();
        match role {
            TimerRole::FirstRa => {
                debug!("no router advertisement on {} within the wait window", self.config.ifname);
                let _ = self.events.send(NdiscEvent::RaTimeout);
            }
            TimerRole::SendRs => {
                self.pacer.send_tick(
                    now,
                    &self.config,
                    self.transport.as_mut(),
                    self.platform.as_ref(),
                    self.timers.as_mut(),
                );
            }
            TimerRole::Sweep => self.sweep(now, ChangeMask::NONE),
        }
    }

    /// Drop expired items, solicit a DNS refresh when due, publish what
    /// changed and arm the next check.
    fn sweep(&mut self, now: i64, initial: ChangeMask) {
        self.timers.cancel(TimerRole::Sweep);

        let outcome = self.store.sweep(now);
        let changed = initial | outcome.changed;

        if outcome.refresh_dns {
            self.pacer.solicit(now, &self.config, self.timers.as_mut());
        }

        if !changed.is_empty() {
            self.emit_config_change(changed);
        }

        if let Some(next_event) = outcome.next_event {
            if next_event > now {
                let delay = u32::try_from(next_event - now).unwrap_or(u32::MAX);
                debug!("next lifetime check on {} in {delay}s", self.config.ifname);
                self.timers.arm(TimerRole::Sweep, delay);
            }
        }
    }

    fn emit_config_change(&self, changed: ChangeMask) {
        self.log_config_change(changed);
        let _ = self.events.send(NdiscEvent::ConfigChanged {
            data: self.store.to_data(),
            changed,
        });
    }

    fn log_config_change(&self, changed: ChangeMask) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }

        debug!("{}: neighbor discovery configuration changed [{changed}]:", self.config.ifname);
        debug!("  dhcp-level {}", self.store.dhcp_level());
        for gateway in self.store.gateways() {
            debug!(
                "  gateway {} pref {} exp {}",
                gateway.addr,
                gateway.preference,
                gateway.expiry()
            );
        }
        for address in self.store.addresses() {
            debug!("  address {} exp {}", address.addr, address.expiry());
        }
        for route in self.store.routes() {
            debug!(
                "  route {}/{} via {} pref {} exp {}",
                route.network,
                route.plen,
                route.gateway,
                route.preference,
                route.expiry()
            );
        }
        for server in self.store.dns_servers() {
            debug!("  dns-server {} exp {}", server.addr, server.expiry());
        }
        for domain in self.store.dns_domains() {
            debug!("  dns-domain {} exp {}", domain.name, domain.expiry());
        }
    }
}

impl Drop for NdiscEngine {
    fn drop(&mut self) {
        self.timers.cancel(TimerRole::FirstRa);
        self.timers.cancel(TimerRole::SendRs);
        self.timers.cancel(TimerRole::Sweep);
    }
}
