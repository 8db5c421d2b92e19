//! Interface-identifier completion for autoconfigured addresses:
//! modified EUI-64 overlay or RFC 7217 stable-privacy derivation.

use std::net::Ipv6Addr;

use ring::digest::{Context, SHA256};
use thiserror::Error;

use crate::config::{AddrGenMode, NdiscConfig};
use crate::types::{Ipv6IfaceId, SlaacAddress};

#[derive(Debug, Error)]
pub enum AddrGenError {
    #[error("no interface identifier known yet")]
    NoIfaceId,
    #[error("address already has host bits; EUI-64 has no second candidate")]
    Eui64Exhausted,
    #[error("DAD counter overflow")]
    DadCounterOverflow,
}

/// Fill in the host bits of `addr`.
///
/// Stable-privacy derives a fresh candidate from the prefix and the
/// address's DAD counter, then advances the counter, so a later call after
/// a DAD failure yields a different address. EUI-64 only ever has one
/// candidate: it overlays the interface identifier when the host bits are
/// still zero and fails otherwise.
///
/// On success the prefix is untouched; on failure the address is unchanged.
pub fn complete_address(
    config: &NdiscConfig,
    iid: Option<Ipv6IfaceId>,
    addr: &mut SlaacAddress,
) -> Result<(), AddrGenError> {
    match config.addr_gen_mode {
        AddrGenMode::StablePrivacy => {
            let counter = addr.dad_counter;
            let next = counter.checked_add(1).ok_or(AddrGenError::DadCounterOverflow)?;
            let host = stable_privacy_host_bits(config, addr.addr, counter);
            addr.addr = host.overlay(addr.addr);
            addr.dad_counter = next;
            Ok(())
        }
        AddrGenMode::Eui64 => {
            let iid = iid.filter(|iid| !iid.is_zero()).ok_or(AddrGenError::NoIfaceId)?;
            if addr.addr.octets()[8..] != [0u8; 8] {
                return Err(AddrGenError::Eui64Exhausted);
            }
            addr.addr = iid.overlay(addr.addr);
            Ok(())
        }
    }
}

/// RFC 7217-style opaque identifier: SHA-256 over the stable inputs, low
/// 64 bits of the address taken from the head of the digest.
fn stable_privacy_host_bits(config: &NdiscConfig, addr: Ipv6Addr, dad_counter: u32) -> Ipv6IfaceId {
    let mut ctx = Context::new(&SHA256);
    ctx.update(&[config.stable_type.tag()]);
    ctx.update(config.network_id.as_bytes());
    ctx.update(&[0]);
    ctx.update(config.ifname.as_bytes());
    ctx.update(&[0]);
    ctx.update(&dad_counter.to_be_bytes());
    ctx.update(&addr.octets()[..8]);
    let digest = ctx.finish();

    let mut host = [0u8; 8];
    host.copy_from_slice(&digest.as_ref()[..8]);
    Ipv6IfaceId(host)
}
