use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use match_core::proto::protocol_name;
use match_core::{AddressFamily, Direction, FlagsTest, IcmpEntry, PortSpec, ValueError};
use serde::Serialize;

use super::anchor::AnchorId;
use super::host::IpSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PfAction {
    Pass,
    Match,
    Block,
}

impl FromStr for PfAction {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pass" => Ok(Self::Pass),
            "match" => Ok(Self::Match),
            "block" => Ok(Self::Block),
            other => Err(ValueError::new("action", other, "expected pass, match or block")),
        }
    }
}

impl fmt::Display for PfAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Match => f.write_str("match"),
            Self::Block => f.write_str("block"),
        }
    }
}

/// `on em0` / `on !em0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfSpec {
    pub name: String,
    pub not: bool,
}

impl IfSpec {
    pub fn matches(&self, iface: &str) -> bool {
        (self.name == iface) != self.not
    }
}

impl FromStr for IfSpec {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (not, name) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };
        if name.is_empty() {
            return Err(ValueError::new("interface", raw, "empty interface name"));
        }
        Ok(Self {
            name: name.to_string(),
            not,
        })
    }
}

impl fmt::Display for IfSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.not {
            f.write_str("!")?;
        }
        f.write_str(&self.name)
    }
}

/// `tagged TAG` / `! tagged TAG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedOpt {
    pub tag: String,
    pub not: bool,
}

impl TaggedOpt {
    pub fn matches(&self, tag: Option<&str>) -> bool {
        (tag == Some(self.tag.as_str())) != self.not
    }
}

impl FromStr for TaggedOpt {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let IfSpec { name, not } = s
            .parse::<IfSpec>()
            .map_err(|_| ValueError::new("tagged", s, "empty tag"))?;
        Ok(Self { tag: name, not })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpSpec {
    pub family: AddressFamily,
    pub entries: Vec<IcmpEntry>,
}

/// `route-to (iface next-hop)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTo {
    pub iface: String,
    pub next_hop: Option<IpAddr>,
}

/// Packet-matching part shared by filter rules and anchor rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterClause {
    /// `None` matches both directions.
    pub direction: Option<Direction>,
    pub on: Vec<IfSpec>,
    pub af: Option<AddressFamily>,
    pub protocols: Vec<u8>,
    /// `all`: addresses and ports are not tested.
    pub all: bool,
    pub from: IpSpec,
    pub from_ports: Vec<PortSpec>,
    pub to: IpSpec,
    pub to_ports: Vec<PortSpec>,
    pub icmp: Option<IcmpSpec>,
    pub flags: Option<FlagsTest>,
    pub tagged: Option<TaggedOpt>,
}

impl fmt::Display for FilterClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(direction) = self.direction {
            parts.push(direction.to_string());
        }
        if !self.on.is_empty() {
            parts.push(format!("on {}", braced(&self.on)));
        }
        if let Some(af) = self.af {
            parts.push(af.to_string());
        }
        if !self.protocols.is_empty() {
            let names: Vec<String> = self.protocols.iter().map(|p| protocol_name(*p)).collect();
            parts.push(format!("proto {}", braced(&names)));
        }
        if self.all {
            parts.push("all".to_string());
        } else if !(self.from.is_empty()
            && self.to.is_empty()
            && self.from_ports.is_empty()
            && self.to_ports.is_empty())
        {
            parts.push(format!("from {}", self.from));
            if !self.from_ports.is_empty() {
                parts.push(format!("port {}", braced(&self.from_ports)));
            }
            parts.push(format!("to {}", self.to));
            if !self.to_ports.is_empty() {
                parts.push(format!("port {}", braced(&self.to_ports)));
            }
        }
        if let Some(icmp) = &self.icmp {
            let keyword = match icmp.family {
                AddressFamily::Inet => "icmp-type",
                AddressFamily::Inet6 => "icmp6-type",
            };
            parts.push(format!("{keyword} {}", braced(&icmp.entries)));
        }
        if let Some(flags) = &self.flags {
            parts.push(format!("flags {flags}"));
        }
        if let Some(tagged) = &self.tagged {
            let bang = if tagged.not { "! " } else { "" };
            parts.push(format!("{bang}tagged {}", tagged.tag));
        }
        f.write_str(&parts.join(" "))
    }
}

fn braced<T: fmt::Display>(items: &[T]) -> String {
    match items {
        [single] => single.to_string(),
        many => {
            let parts: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("{{ {} }}", parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfRule {
    pub text: String,
    pub action: PfAction,
    pub quick: bool,
    pub clause: FilterClause,
    pub tag: Option<String>,
    pub route_to: Option<RouteTo>,
    pub keep_state: bool,
}

impl fmt::Display for PfRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)?;
        if self.quick {
            f.write_str(" quick")?;
        }
        let clause = self.clause.to_string();
        if !clause.is_empty() {
            write!(f, " {clause}")?;
        }
        if let Some(route) = &self.route_to {
            match route.next_hop {
                Some(hop) => write!(f, " route-to ({} {hop})", route.iface)?,
                None => write!(f, " route-to {}", route.iface)?,
            }
        }
        if let Some(tag) = &self.tag {
            write!(f, " tag {tag}")?;
        }
        if self.keep_state {
            f.write_str(" keep state")?;
        }
        Ok(())
    }
}

/// Where an anchor rule sends evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorTarget {
    /// Anchor declared with a rule body at this point of the ruleset.
    Inlined(AnchorId),
    /// Path resolved at evaluation time relative to the owning anchor.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRule {
    pub text: String,
    pub quick: bool,
    pub clause: FilterClause,
    pub target: AnchorTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PfGenericRule {
    Filter(PfRule),
    Anchor(AnchorRule),
}

impl PfGenericRule {
    pub fn text(&self) -> &str {
        match self {
            Self::Filter(rule) => &rule.text,
            Self::Anchor(rule) => &rule.text,
        }
    }
}
