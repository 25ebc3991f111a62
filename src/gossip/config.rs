//! Typed configuration property bag.
//!
//! File-format parsing and CLI wiring are out of scope for this
//! crate; callers build a `Config` programmatically (or from whatever
//! config format their host process already uses) and pass it to
//! `graph::bootstrap` or to `node::spawn` directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Wire transport preference. Only `Tcp` is implemented; `Udp` is
/// accepted in configuration for forward compatibility with the
/// source property bag, but rejected at validation time.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Process-wide gossip configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Externally routable address of this node. `None` means
    /// auto-detect (see `Config::eripa_or_detect`).
    pub eripa: Option<IpAddr>,
    /// Bootstrap list of peer addresses, consulted by the graph
    /// builder / administrative surface when wiring up remote
    /// neighbors.
    pub all_known_addresses: Vec<SocketAddr>,
    /// Listening port for the primary node at this address.
    pub gossip_port: u16,
    /// `Tcp` or `Udp`; only `Tcp` is implemented.
    pub preferred_protocol: Protocol,
    /// Number of local Gossip Nodes `graph::bootstrap` spawns at this
    /// address. `0` forces zero local nodes (the process only proxies).
    pub numnodes: u32,
    /// Default TTL applied to messages injected via the Solicitation
    /// API when the caller doesn't override it.
    pub default_ttl: Duration,
    /// Default deadline for `solicit_wait` / `solicit_direct`.
    pub solicit_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            eripa: None,
            all_known_addresses: Vec::new(),
            gossip_port: 9001,
            preferred_protocol: Protocol::Tcp,
            numnodes: 1,
            default_ttl: Duration::from_secs(30),
            solicit_deadline: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// The secondary port used by local co-tenants at the same
    /// address: the primary port plus one.
    pub fn secondary_port(&self) -> u16 {
        self.gossip_port + 1
    }

    /// Resolves `eripa`, falling back to an auto-detection best
    /// effort (the unspecified address) when unset. Real
    /// auto-detection (e.g. STUN, route table inspection) is a host
    /// process concern; this crate only guarantees a usable default.
    pub fn eripa_or_detect(&self) -> IpAddr {
        self.eripa
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// Validates the property bag, returning a protocol-level error if
    /// a value is outside of what this implementation supports.
    pub fn validate(&self) -> crate::gossip::error::Result<()> {
        use crate::gossip::error::{Error, ErrorKind};

        if self.preferred_protocol != Protocol::Tcp {
            return Err(Error::simple(ErrorKind::Config));
        }
        if self.default_ttl.as_secs() == 0 {
            return Err(Error::simple(ErrorKind::Config));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_numnodes_is_one() {
        assert_eq!(Config::default().numnodes, 1);
    }

    #[test]
    fn secondary_port_is_primary_plus_one() {
        let c = Config::default();
        assert_eq!(c.secondary_port(), c.gossip_port + 1);
    }

    #[test]
    fn udp_preference_fails_validation() {
        let mut c = Config::default();
        c.preferred_protocol = Protocol::Udp;
        assert!(c.validate().is_err());
    }
}
