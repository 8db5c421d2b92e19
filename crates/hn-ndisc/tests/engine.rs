//! End-to-end engine scenarios driven with a fake clock and manual
//! timers: the host loop is the test itself.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use tokio::sync::mpsc;

use hn_ndisc::{
    AddrGenMode, ChangeMask, DnsServer, Gateway, Ipv6IfaceId, NdiscConfig, NdiscEngine,
    NdiscEvent, NetnsGuard, Platform, RoutePreference, SlaacAddress, TimerRole, Timers, Transport,
};

#[derive(Clone)]
struct TestClock(Arc<AtomicI64>);

impl TestClock {
    fn new() -> Self {
        Self(Arc::new(AtomicI64::new(0)))
    }

    fn set(&self, secs: i64) {
        self.0.store(secs, Ordering::SeqCst);
    }
}

struct TestPlatform {
    clock: TestClock,
}

impl Platform for TestPlatform {
    fn monotonic_secs(&self) -> i64 {
        self.clock.0.load(Ordering::SeqCst)
    }

    fn enter_netns(&self) -> Result<NetnsGuard> {
        Ok(NetnsGuard::none())
    }
}

#[derive(Clone, Default)]
struct TestTimers {
    armed: Arc<Mutex<HashMap<TimerRole, u32>>>,
}

impl TestTimers {
    fn armed(&self, role: TimerRole) -> Option<u32> {
        self.armed.lock().unwrap().get(&role).copied()
    }

    /// Simulate the timer elapsing: disarm and hand back the delay.
    fn fire(&self, role: TimerRole) -> Option<u32> {
        self.armed.lock().unwrap().remove(&role)
    }
}

impl Timers for TestTimers {
    fn arm(&mut self, role: TimerRole, delay_secs: u32) {
        self.armed.lock().unwrap().insert(role, delay_secs);
    }

    fn cancel(&mut self, role: TimerRole) {
        self.armed.lock().unwrap().remove(&role);
    }
}

#[derive(Clone, Default)]
struct TestTransport {
    sent: Arc<AtomicUsize>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl TestTransport {
    fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Transport for TestTransport {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn send_rs(&mut self) -> Result<()> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            bail!("{message}");
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    engine: NdiscEngine,
    events: mpsc::UnboundedReceiver<NdiscEvent>,
    clock: TestClock,
    timers: TestTimers,
    transport: TestTransport,
}

impl Harness {
    fn new(config: NdiscConfig) -> Self {
        let clock = TestClock::new();
        let timers = TestTimers::default();
        let transport = TestTransport::default();
        let (engine, events) = NdiscEngine::new(
            config,
            Box::new(TestPlatform { clock: clock.clone() }),
            Box::new(transport.clone()),
            Box::new(timers.clone()),
        )
        .unwrap();
        Self {
            engine,
            events,
            clock,
            timers,
            transport,
        }
    }

    fn drain_events(&mut self) -> Vec<NdiscEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// The latest ConfigChanged, if any arrived since the last drain.
    fn last_config_change(&mut self) -> Option<(hn_ndisc::NdiscData, ChangeMask)> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                NdiscEvent::ConfigChanged { data, changed } => Some((data, changed)),
                NdiscEvent::RaTimeout => None,
            })
            .last()
    }
}

fn config() -> NdiscConfig {
    NdiscConfig::new(2, "eth0")
}

fn stable_config() -> NdiscConfig {
    let mut config = config();
    config.addr_gen_mode = AddrGenMode::StablePrivacy;
    config.network_id = "home-net".into();
    config
}

fn test_iid() -> Ipv6IfaceId {
    Ipv6IfaceId([0x02, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66])
}

fn gateway(addr: &str, timestamp: i64, lifetime: u32) -> Gateway {
    Gateway {
        addr: addr.parse().unwrap(),
        timestamp,
        lifetime,
        preference: RoutePreference::Medium,
    }
}

fn prefix_address(prefix: &str, timestamp: i64, lifetime: u32, preferred: u32) -> SlaacAddress {
    SlaacAddress {
        addr: prefix.parse().unwrap(),
        timestamp,
        lifetime,
        preferred,
        dad_counter: 0,
    }
}

fn dns_server(addr: &str, timestamp: i64, lifetime: u32) -> DnsServer {
    DnsServer {
        addr: addr.parse().unwrap(),
        timestamp,
        lifetime,
    }
}

/// Scenario: start, one RA carrying a gateway, a prefix and a DNS server.
fn single_ra_harness() -> Harness {
    let mut h = Harness::new(config());
    h.engine.set_iid(test_iid());
    h.engine.start().unwrap();
    h.drain_events();

    h.clock.set(1);
    let mut changed = ChangeMask::NONE;
    if h.engine.add_gateway(gateway("fe80::1", 1, 1800)) {
        changed |= ChangeMask::GATEWAYS;
    }
    if h.engine.add_address(prefix_address("2001:db8::", 1, 3600, 1800)) {
        changed |= ChangeMask::ADDRESSES;
    }
    if h.engine.add_dns_server(dns_server("2001:db8::53", 1, 600)) {
        changed |= ChangeMask::DNS_SERVERS;
    }
    h.engine.ra_received(1, changed);
    h
}

#[test]
fn start_arms_first_ra_timeout_and_immediate_solicit() {
    let mut h = Harness::new(config());
    h.engine.start().unwrap();

    // clamp(3 * 4 + 1, 30, 120) = 30
    assert_eq!(h.timers.armed(TimerRole::FirstRa), Some(30));
    assert_eq!(h.timers.armed(TimerRole::SendRs), Some(0));
}

#[test]
fn double_start_is_rejected() {
    let mut h = Harness::new(config());
    h.engine.start().unwrap();
    assert!(h.engine.start().is_err());
}

#[test]
fn single_ra_learns_gateway_address_and_dns() {
    let mut h = single_ra_harness();

    let (data, changed) = h.last_config_change().expect("a config change event");
    assert_eq!(
        changed,
        ChangeMask::GATEWAYS | ChangeMask::ADDRESSES | ChangeMask::DNS_SERVERS
    );

    assert_eq!(data.gateways.len(), 1);
    assert_eq!(data.gateways[0].addr, "fe80::1".parse::<Ipv6Addr>().unwrap());

    // EUI-64 completion applied to the advertised prefix.
    assert_eq!(data.addresses.len(), 1);
    assert_eq!(
        data.addresses[0].addr,
        "2001:db8::200:1122:3344:5566".parse::<Ipv6Addr>().unwrap()
    );

    assert_eq!(data.dns_servers.len(), 1);

    // RA arrived: no more first-RA timeout, no pending solicitation.
    assert_eq!(h.timers.armed(TimerRole::FirstRa), None);
    assert_eq!(h.timers.armed(TimerRole::SendRs), None);

    // Next wake-up is the DNS midpoint: (1 + 300) - 1.
    assert_eq!(h.timers.armed(TimerRole::Sweep), Some(300));
}

#[test]
fn zero_lifetime_withdraws_a_gateway() {
    let mut h = single_ra_harness();
    h.drain_events();

    h.clock.set(100);
    let mut changed = ChangeMask::NONE;
    if h.engine.add_gateway(gateway("fe80::1", 100, 0)) {
        changed |= ChangeMask::GATEWAYS;
    }
    h.engine.ra_received(100, changed);

    let (data, changed) = h.last_config_change().expect("a config change event");
    assert!(changed.contains(ChangeMask::GATEWAYS));
    assert!(data.gateways.is_empty());

    // Addresses and DNS are untouched.
    assert_eq!(data.addresses.len(), 1);
    assert_eq!(data.dns_servers.len(), 1);
}

#[test]
fn withdraw_of_unknown_items_changes_nothing() {
    let mut h = single_ra_harness();
    h.drain_events();

    assert!(!h.engine.add_gateway(gateway("fe80::99", 100, 0)));
    assert!(!h.engine.add_dns_server(dns_server("2001:db8::99", 100, 0)));
    assert_eq!(h.engine.snapshot().gateways.len(), 1);
}

#[test]
fn dad_failure_removes_eui64_address() {
    let mut h = single_ra_harness();
    h.drain_events();

    h.clock.set(5);
    h.engine
        .dad_failed("2001:db8::200:1122:3344:5566".parse().unwrap());

    let (data, changed) = h.last_config_change().expect("a config change event");
    assert_eq!(changed, ChangeMask::ADDRESSES);
    assert!(data.addresses.is_empty());
}

#[test]
fn dad_failure_regenerates_stable_privacy_address() {
    let mut h = Harness::new(stable_config());
    h.engine.start().unwrap();
    h.drain_events();

    assert!(h.engine.add_address(prefix_address("2001:db8::", 0, 3600, 1800)));
    h.engine.ra_received(0, ChangeMask::ADDRESSES);
    h.drain_events();

    let first = h.engine.snapshot().addresses[0].addr;
    assert_eq!(h.engine.snapshot().addresses[0].dad_counter, 1);

    h.engine.dad_failed(first);

    let (data, changed) = h.last_config_change().expect("a config change event");
    assert_eq!(changed, ChangeMask::ADDRESSES);
    assert_eq!(data.addresses.len(), 1);
    assert_ne!(data.addresses[0].addr, first);
    assert_eq!(data.addresses[0].dad_counter, 2);

    // Prefix survived the regeneration.
    assert_eq!(data.addresses[0].addr.octets()[..8], first.octets()[..8]);
}

#[test]
fn first_ra_timeout_fires_and_engine_stays_live() {
    let mut h = Harness::new(config());
    h.engine.start().unwrap();
    assert_eq!(h.timers.armed(TimerRole::FirstRa), Some(30));

    h.clock.set(30);
    h.timers.fire(TimerRole::FirstRa);
    h.engine.timer_fired(TimerRole::FirstRa);

    let events = h.drain_events();
    assert!(matches!(events.as_slice(), [NdiscEvent::RaTimeout]));

    // A late RA is still processed normally.
    h.clock.set(40);
    assert!(h.engine.add_gateway(gateway("fe80::1", 40, 1800)));
    h.engine.ra_received(40, ChangeMask::GATEWAYS);
    let (data, _) = h.last_config_change().expect("a config change event");
    assert_eq!(data.gateways.len(), 1);
}

#[test]
fn dns_midpoint_solicits_and_expiry_removes() {
    let mut h = Harness::new(config());
    assert!(h.engine.add_dns_server(dns_server("2001:db8::53", 0, 600)));
    h.engine.ra_received(0, ChangeMask::DNS_SERVERS);
    h.drain_events();
    assert_eq!(h.timers.armed(TimerRole::Sweep), Some(300));

    // Midpoint: refresh solicitation, entry retained.
    h.clock.set(300);
    h.timers.fire(TimerRole::Sweep);
    h.engine.timer_fired(TimerRole::Sweep);

    assert_eq!(h.engine.snapshot().dns_servers.len(), 1);
    assert_eq!(h.timers.armed(TimerRole::SendRs), Some(0));
    h.timers.fire(TimerRole::SendRs);
    h.engine.timer_fired(TimerRole::SendRs);
    assert_eq!(h.transport.sent(), 1);

    // Expiry: entry dropped, DNS_SERVERS reported.
    assert_eq!(h.timers.armed(TimerRole::Sweep), Some(300));
    h.clock.set(601);
    h.timers.fire(TimerRole::Sweep);
    h.engine.timer_fired(TimerRole::Sweep);

    let (data, changed) = h.last_config_change().expect("a config change event");
    assert!(changed.contains(ChangeMask::DNS_SERVERS));
    assert!(data.dns_servers.is_empty());
}

#[test]
fn solicitation_burst_is_bounded() {
    let mut h = Harness::new(config());
    h.engine.start().unwrap();

    let mut fired = 0;
    while h.timers.fire(TimerRole::SendRs).is_some() {
        h.engine.timer_fired(TimerRole::SendRs);
        fired += 1;
        assert!(fired <= 3, "burst must stop after router_solicitations sends");
    }
    assert_eq!(h.transport.sent(), 3);
}

#[test]
fn address_cap_is_enforced_at_insert() {
    let mut cfg = config();
    cfg.max_addresses = 1;
    let mut h = Harness::new(cfg);
    h.engine.set_iid(test_iid());

    assert!(h.engine.add_address(prefix_address("2001:db8:1::", 0, 3600, 1800)));
    assert!(!h.engine.add_address(prefix_address("2001:db8:2::", 0, 3600, 1800)));
    assert_eq!(h.engine.snapshot().addresses.len(), 1);
}

#[test]
fn address_without_iid_is_dropped() {
    let mut h = Harness::new(config());
    assert!(!h.engine.add_address(prefix_address("2001:db8::", 0, 3600, 1800)));
    assert!(h.engine.snapshot().addresses.is_empty());
}

#[test]
fn iid_change_flushes_eui64_addresses_and_resolicits() {
    let mut h = single_ra_harness();
    h.drain_events();
    assert_eq!(h.engine.snapshot().addresses.len(), 1);

    let changed = h.engine.set_iid(Ipv6IfaceId::from_mac([0xaa, 0xbb, 0xcc, 0x11, 0x22, 0x33]));
    assert!(changed);

    let (data, mask) = h.last_config_change().expect("a config change event");
    assert_eq!(mask, ChangeMask::ADDRESSES);
    assert!(data.addresses.is_empty());

    // A refresh burst is under way again.
    assert!(h.timers.armed(TimerRole::SendRs).is_some());
}

#[test]
fn iid_set_is_idempotent_and_inert_for_stable_privacy() {
    let mut h = single_ra_harness();
    h.drain_events();
    assert!(!h.engine.set_iid(test_iid()));
    assert!(h.last_config_change().is_none());

    let mut h = Harness::new(stable_config());
    assert!(h.engine.add_address(prefix_address("2001:db8::", 0, 3600, 1800)));
    assert!(!h.engine.set_iid(test_iid()));
    assert_eq!(h.engine.snapshot().addresses.len(), 1);
}

#[test]
fn expired_items_are_swept_with_their_mask_bits() {
    let mut h = single_ra_harness();
    h.drain_events();

    // Gateway lifetime 1800 from t=1; addresses live to 3601.
    h.clock.set(1801);
    h.timers.fire(TimerRole::Sweep);
    h.engine.timer_fired(TimerRole::Sweep);

    let (data, changed) = h.last_config_change().expect("a config change event");
    assert!(changed.contains(ChangeMask::GATEWAYS));
    assert!(changed.contains(ChangeMask::DNS_SERVERS));
    assert!(data.gateways.is_empty());
    assert!(data.dns_servers.is_empty());
    assert_eq!(data.addresses.len(), 1);

    // Everything still present outlives now (the address until 3601).
    assert_eq!(h.timers.armed(TimerRole::Sweep), Some(1800));
}

#[test]
fn ra_received_replaces_pending_burst() {
    let mut h = Harness::new(config());
    h.engine.start().unwrap();
    assert!(h.timers.armed(TimerRole::SendRs).is_some());

    h.engine.ra_received(0, ChangeMask::NONE);
    assert_eq!(h.timers.armed(TimerRole::SendRs), None);
    assert_eq!(h.timers.armed(TimerRole::FirstRa), None);
}
