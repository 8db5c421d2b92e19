use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// How host bits of autoconfigured addresses are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddrGenMode {
    /// Overlay the interface identifier (modified EUI-64).
    #[default]
    Eui64,
    /// Derive opaque stable host bits per RFC 7217.
    StablePrivacy,
}

/// Domain tag mixed into the stable-privacy derivation, so that different
/// kinds of network identifiers never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StableType {
    #[default]
    Uuid,
    StableId,
}

impl StableType {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Uuid => 0,
            Self::StableId => 1,
        }
    }
}

/// Per-interface engine configuration. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NdiscConfig {
    pub ifindex: i32,
    pub ifname: String,
    /// Salt for stable-privacy derivation (connection/network identity).
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub addr_gen_mode: AddrGenMode,
    #[serde(default)]
    pub stable_type: StableType,
    /// Cap on autoconf addresses; 0 means no cap.
    #[serde(default = "default_max_addresses")]
    pub max_addresses: u32,
    /// Number of Router Solicitations per burst.
    #[serde(default = "default_router_solicitations")]
    pub router_solicitations: u32,
    /// Seconds between Router Solicitations.
    #[serde(default = "default_router_solicitation_interval")]
    pub router_solicitation_interval: u32,
}

fn default_max_addresses() -> u32 {
    16
}

fn default_router_solicitations() -> u32 {
    3
}

fn default_router_solicitation_interval() -> u32 {
    4
}

impl NdiscConfig {
    pub fn new(ifindex: i32, ifname: impl Into<String>) -> Self {
        Self {
            ifindex,
            ifname: ifname.into(),
            network_id: String::new(),
            addr_gen_mode: AddrGenMode::default(),
            stable_type: StableType::default(),
            max_addresses: default_max_addresses(),
            router_solicitations: default_router_solicitations(),
            router_solicitation_interval: default_router_solicitation_interval(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ifindex <= 0 {
            bail!("invalid ifindex {}", self.ifindex);
        }
        if self.ifname.is_empty() {
            bail!("interface name must not be empty");
        }
        if self.router_solicitations == 0 {
            bail!("router_solicitations must be at least 1");
        }
        if self.router_solicitation_interval == 0 {
            bail!("router_solicitation_interval must be at least 1 second");
        }
        Ok(())
    }

    /// How long to wait for the first RA before reporting a timeout:
    /// one full solicitation burst plus a second, clamped to [30, 120].
    pub fn first_ra_timeout_secs(&self) -> u32 {
        let burst = i64::from(self.router_solicitations)
            * i64::from(self.router_solicitation_interval)
            + 1;
        burst.clamp(30, 120) as u32
    }
}
