//! The probe: a described set of packets travelling through equipment.
//!
//! The request part is immutable for the lifetime of a probe. Everything else
//! (ttl, tag, route-to override, outgoing link, per-direction results) is
//! traversal state owned by the probe itself; cloning a probe for an
//! alternative route copies that state.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Serialize;

use crate::addr::{AddrRange, AddressFamily};
use crate::error::{EvalError, ValueError};
use crate::port::PortSpec;
use crate::proto::{ProtocolSet, ICMP, ICMP6};
use crate::tcp_flags::TcpFlags;
use crate::verdict::{DirectionResult, ProbeResults};

pub const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl FromStr for Direction {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            other => Err(ValueError::new("direction", other, "expected in or out")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("in"),
            Self::Out => f.write_str("out"),
        }
    }
}

/// An equipment interface a probe enters or leaves through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Link {
    iface: String,
}

impl Link {
    pub fn new(iface: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
        }
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.iface)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeOptions {
    /// The probe belongs to an established connection.
    pub state: bool,
    /// Evaluate without tag or route-to side effects.
    pub match_only: bool,
}

/// Packet fields beyond the address pair. `None` means "not specified":
/// evaluators skip the corresponding rule test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeRequest {
    pub protocols: Option<ProtocolSet>,
    pub source_port: Option<PortSpec>,
    pub destination_port: Option<PortSpec>,
    pub icmp_type: Option<u8>,
    pub icmp_code: Option<u8>,
    pub tcp_flags: Vec<TcpFlags>,
    pub options: ProbeOptions,
}

impl ProbeRequest {
    pub fn carries_protocol(&self, protocol: u8) -> bool {
        self.protocols
            .as_ref()
            .is_some_and(|protocols| protocols.contains(protocol))
    }

    /// Address family implied by the ICMP flavour among the probe protocols.
    pub fn icmp_family(&self) -> Option<AddressFamily> {
        if self.carries_protocol(ICMP) {
            Some(AddressFamily::Inet)
        } else if self.carries_protocol(ICMP6) {
            Some(AddressFamily::Inet6)
        } else {
            None
        }
    }
}

/// Egress forced by a `route-to` rule for the rest of this probe's traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOverride {
    pub link: Link,
    pub next_hop: Option<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct Probe {
    source: AddrRange,
    destination: AddrRange,
    request: ProbeRequest,
    ttl: u8,
    tag: Option<String>,
    route_override: Option<RouteOverride>,
    outgoing: Option<Link>,
    next_hop: Option<IpAddr>,
    results: ProbeResults,
    killed: Option<String>,
}

impl Probe {
    pub fn new(
        source: AddrRange,
        destination: AddrRange,
        request: ProbeRequest,
    ) -> Result<Self, EvalError> {
        if source.family() != destination.family() {
            return Err(EvalError::FamilyMismatch {
                first: source.first(),
                second: destination.first(),
            });
        }
        Ok(Self {
            source,
            destination,
            request,
            ttl: DEFAULT_TTL,
            tag: None,
            route_override: None,
            outgoing: None,
            next_hop: None,
            results: ProbeResults::default(),
            killed: None,
        })
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn source(&self) -> &AddrRange {
        &self.source
    }

    pub fn destination(&self) -> &AddrRange {
        &self.destination
    }

    pub fn family(&self) -> AddressFamily {
        self.source.family()
    }

    pub fn request(&self) -> &ProbeRequest {
        &self.request
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Returns `false` once the probe has run out of hops.
    pub fn decrement_ttl(&mut self) -> bool {
        if self.ttl == 0 {
            return false;
        }
        self.ttl -= 1;
        self.ttl > 0
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = Some(tag.into());
    }

    pub fn route_override(&self) -> Option<&RouteOverride> {
        self.route_override.as_ref()
    }

    pub fn set_route_override(&mut self, route: RouteOverride) {
        self.route_override = Some(route);
    }

    pub fn take_route_override(&mut self) -> Option<RouteOverride> {
        self.route_override.take()
    }

    pub fn outgoing(&self) -> Option<&Link> {
        self.outgoing.as_ref()
    }

    pub fn next_hop(&self) -> Option<IpAddr> {
        self.next_hop
    }

    pub fn set_outgoing(&mut self, link: Link, next_hop: Option<IpAddr>) {
        self.outgoing = Some(link);
        self.next_hop = next_hop;
    }

    pub fn results(&self) -> &ProbeResults {
        &self.results
    }

    pub fn record(&mut self, direction: Direction, result: DirectionResult) {
        self.results.record(direction, result);
    }

    pub fn kill(&mut self, reason: impl Into<String>) {
        self.killed = Some(reason.into());
    }

    pub fn killed(&self) -> Option<&str> {
        self.killed.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::{Probe, ProbeRequest};
    use crate::addr::AddrRange;

    fn addr(s: &str) -> AddrRange {
        s.parse().expect("address")
    }

    #[test]
    fn mixed_families_are_rejected() {
        let probe = Probe::new(addr("10.0.0.1"), addr("2001:db8::1"), ProbeRequest::default());
        assert!(probe.is_err());
    }

    #[test]
    fn ttl_expires_after_last_hop() {
        let mut probe = Probe::new(addr("10.0.0.1"), addr("10.0.0.2"), ProbeRequest::default())
            .expect("probe")
            .with_ttl(2);
        assert!(probe.decrement_ttl());
        assert!(!probe.decrement_ttl());
        assert!(!probe.decrement_ttl());
    }

    #[test]
    fn clones_carry_independent_tags() {
        let mut probe = Probe::new(addr("10.0.0.1"), addr("10.0.0.2"), ProbeRequest::default())
            .expect("probe");
        let fork = probe.clone();
        probe.set_tag("WEB");
        assert_eq!(probe.tag(), Some("WEB"));
        assert_eq!(fork.tag(), None);
    }
}
