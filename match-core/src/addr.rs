use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;
use serde::Serialize;

use crate::error::{EvalError, ValueError};
use crate::result::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Inet,
            IpAddr::V6(_) => Self::Inet6,
        }
    }
}

impl FromStr for AddressFamily {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "inet" | "ipv4" => Ok(Self::Inet),
            "inet6" | "ipv6" => Ok(Self::Inet6),
            other => Err(ValueError::new(
                "address family",
                other,
                "expected inet or inet6",
            )),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet => f.write_str("inet"),
            Self::Inet6 => f.write_str("inet6"),
        }
    }
}

/// Inclusive range of addresses of a single family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddrRange {
    first: IpAddr,
    last: IpAddr,
}

impl AddrRange {
    /// Build a range from two bounds, swapping them when given reversed.
    pub fn new(first: IpAddr, last: IpAddr) -> Result<Self, EvalError> {
        if AddressFamily::of(&first) != AddressFamily::of(&last) {
            return Err(EvalError::FamilyMismatch {
                first,
                second: last,
            });
        }
        if first <= last {
            Ok(Self { first, last })
        } else {
            Ok(Self {
                first: last,
                last: first,
            })
        }
    }

    pub fn host(addr: IpAddr) -> Self {
        Self {
            first: addr,
            last: addr,
        }
    }

    pub fn from_net(net: IpNet) -> Self {
        Self {
            first: net.network(),
            last: net.broadcast(),
        }
    }

    /// Whole address space of a family.
    pub fn any(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Inet => Self {
                first: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                last: IpAddr::V4(Ipv4Addr::BROADCAST),
            },
            AddressFamily::Inet6 => Self {
                first: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                last: IpAddr::V6(Ipv6Addr::from(u128::MAX)),
            },
        }
    }

    pub fn first(&self) -> IpAddr {
        self.first
    }

    pub fn last(&self) -> IpAddr {
        self.last
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.first)
    }

    pub fn is_host(&self) -> bool {
        self.first == self.last
    }

    pub fn contains_addr(&self, addr: &IpAddr) -> bool {
        AddressFamily::of(addr) == self.family() && self.first <= *addr && *addr <= self.last
    }

    /// True when every address of `other` lies inside this range.
    pub fn contains(&self, other: &AddrRange) -> bool {
        self.family() == other.family() && self.first <= other.first && other.last <= self.last
    }

    pub fn overlaps(&self, other: &AddrRange) -> bool {
        self.family() == other.family() && self.first <= other.last && other.first <= self.last
    }

    /// Tests `candidate` against this range used as a rule spec.
    pub fn matches(&self, candidate: &AddrRange) -> MatchResult {
        if self.contains(candidate) {
            MatchResult::All
        } else if self.overlaps(candidate) {
            MatchResult::Match
        } else {
            MatchResult::Not
        }
    }

    /// Parts of this range not covered by `other`, in address order.
    pub fn subtract(&self, other: &AddrRange) -> Vec<AddrRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let family = self.family();
        let mut parts = Vec::with_capacity(2);
        if other.first > self.first {
            parts.push(Self {
                first: self.first,
                last: from_bits(family, to_bits(other.first) - 1),
            });
        }
        if other.last < self.last {
            parts.push(Self {
                first: from_bits(family, to_bits(other.last) + 1),
                last: self.last,
            });
        }
        parts
    }

    fn as_net(&self) -> Option<IpNet> {
        let max = match self.family() {
            AddressFamily::Inet => 32,
            AddressFamily::Inet6 => 128,
        };
        (0..=max).find_map(|prefix| {
            let net = IpNet::new(self.first, prefix).ok()?;
            (net.network() == self.first && net.broadcast() == self.last).then_some(net)
        })
    }
}

impl From<IpNet> for AddrRange {
    fn from(net: IpNet) -> Self {
        Self::from_net(net)
    }
}

impl From<IpAddr> for AddrRange {
    fn from(addr: IpAddr) -> Self {
        Self::host(addr)
    }
}

fn to_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(addr) => u128::from(u32::from(addr)),
        IpAddr::V6(addr) => u128::from(addr),
    }
}

fn from_bits(family: AddressFamily, bits: u128) -> IpAddr {
    match family {
        AddressFamily::Inet => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        AddressFamily::Inet6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

/// Accepts `10.0.0.1`, `10.0.0.0/24`, `10.0.0.1-10.0.0.9` and `10.0.0.1 - 10.0.0.9`.
impl FromStr for AddrRange {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if let Some((lo, hi)) = raw.split_once('-') {
            let first = parse_ip(lo.trim(), raw)?;
            let last = parse_ip(hi.trim(), raw)?;
            return AddrRange::new(first, last)
                .map_err(|err| ValueError::new("address range", raw, err.to_string()));
        }
        if raw.contains('/') {
            let net = IpNet::from_str(raw)
                .map_err(|err| ValueError::new("address", raw, err.to_string()))?;
            return Ok(Self::from_net(net));
        }
        parse_ip(raw, raw).map(Self::host)
    }
}

fn parse_ip(token: &str, whole: &str) -> Result<IpAddr, ValueError> {
    IpAddr::from_str(token).map_err(|err| ValueError::new("address", whole, err.to_string()))
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            return write!(f, "{}", self.first);
        }
        match self.as_net() {
            Some(net) => write!(f, "{net}"),
            None => write!(f, "{}-{}", self.first, self.last),
        }
    }
}

impl Serialize for AddrRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
