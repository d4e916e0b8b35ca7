use std::fmt;
use std::str::FromStr;

use match_core::proto::protocol_name;
use match_core::{AddrRange, IcmpEntry, PortSpec, ValueError};
use serde::Serialize;

use super::group::{GroupId, GroupTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Permit,
    Deny,
}

impl FromStr for AclAction {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "permit" => Ok(Self::Permit),
            "deny" => Ok(Self::Deny),
            other => Err(ValueError::new("action", other, "expected permit or deny")),
        }
    }
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permit => f.write_str("permit"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    Any,
    Range(AddrRange),
    Group(GroupId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolSpec {
    /// A protocol number; `0` (`ip`) matches every protocol.
    Number(u8),
    Group(GroupId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortMatch {
    Spec(PortSpec),
    Group(GroupId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpMatch {
    Entry(IcmpEntry),
    Group(GroupId),
}

/// One line of an access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessListEntry {
    pub text: String,
    pub action: AclAction,
    pub protocol: Option<ProtocolSpec>,
    pub source: AddressSpec,
    pub destination: AddressSpec,
    pub source_port: Option<PortMatch>,
    pub destination_port: Option<PortMatch>,
    pub icmp: Option<IcmpMatch>,
    /// Enhanced service group, exclusive with `protocol` and ports.
    pub service: Option<GroupId>,
    pub inactive: bool,
    pub remark: bool,
    pub implicit: bool,
}

impl AccessListEntry {
    /// An entry matching every packet.
    pub fn any(action: AclAction, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action,
            protocol: None,
            source: AddressSpec::Any,
            destination: AddressSpec::Any,
            source_port: None,
            destination_port: None,
            icmp: None,
            service: None,
            inactive: false,
            remark: false,
            implicit: false,
        }
    }

    pub fn remark(list: &str, text: &str) -> Self {
        Self {
            remark: true,
            ..Self::any(AclAction::Permit, format!("access-list {list} remark {text}"))
        }
    }

    pub fn implicit_deny(list: &str) -> Self {
        Self {
            implicit: true,
            ..Self::any(
                AclAction::Deny,
                format!("access-list {list} *** implicit deny ***"),
            )
        }
    }

    /// Renders the entry in access-list syntax.
    pub fn describe(&self, list: &str, groups: &GroupTable) -> String {
        let group = |id: GroupId| {
            groups
                .get(id)
                .map_or_else(|_| format!("#{}", id.index()), |g| g.name.clone())
        };
        let mut parts = vec![
            "access-list".to_string(),
            list.to_string(),
            "extended".to_string(),
            self.action.to_string(),
        ];
        match (&self.service, &self.protocol) {
            (Some(id), _) => parts.push(format!("object-group {}", group(*id))),
            (None, Some(ProtocolSpec::Number(p))) => parts.push(protocol_name(*p)),
            (None, Some(ProtocolSpec::Group(id))) => parts.push(format!("object-group {}", group(*id))),
            (None, None) => parts.push("ip".to_string()),
        }
        parts.push(describe_address(&self.source, &group));
        if let Some(port) = &self.source_port {
            parts.push(describe_port(port, &group));
        }
        parts.push(describe_address(&self.destination, &group));
        if let Some(port) = &self.destination_port {
            parts.push(describe_port(port, &group));
        }
        match &self.icmp {
            Some(IcmpMatch::Entry(entry)) => parts.push(entry.to_string()),
            Some(IcmpMatch::Group(id)) => parts.push(format!("object-group {}", group(*id))),
            None => {}
        }
        if self.inactive {
            parts.push("inactive".to_string());
        }
        parts.join(" ")
    }
}

fn describe_address(spec: &AddressSpec, group: &dyn Fn(GroupId) -> String) -> String {
    match spec {
        AddressSpec::Any => "any".to_string(),
        AddressSpec::Range(range) if range.is_host() => format!("host {range}"),
        AddressSpec::Range(range) => range.to_string(),
        AddressSpec::Group(id) => format!("object-group {}", group(*id)),
    }
}

fn describe_port(spec: &PortMatch, group: &dyn Fn(GroupId) -> String) -> String {
    match spec {
        PortMatch::Spec(port) => port.to_string(),
        PortMatch::Group(id) => format!("object-group {}", group(*id)),
    }
}
