//! Object groups: named, typed, possibly nested sets of match leaves.
//!
//! Groups live in an arena ([`GroupTable`]) and reference each other by
//! [`GroupId`]. Building the table rejects self-references, references to a
//! group of another kind and indirect cycles; sealing it computes the
//! leaf-only expansion of every group once.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use match_core::proto::{protocol_name, TCP, UDP};
use match_core::result::any_of;
use match_core::{AddrRange, EvalError, MatchResult, PortSpec, ProtocolSet, ValueError};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(usize);

impl GroupId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    Network,
    Service,
    Protocol,
    Icmp,
    EnhancedService,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Network => "network",
            Self::Service => "service",
            Self::Protocol => "protocol",
            Self::Icmp => "icmp-type",
            Self::EnhancedService => "enhanced-service",
        };
        f.write_str(text)
    }
}

/// Transport a port-based service group applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceProtocol {
    Tcp,
    Udp,
    TcpUdp,
}

impl ServiceProtocol {
    pub fn covers(self, protocol: u8) -> bool {
        match self {
            Self::Tcp => protocol == TCP,
            Self::Udp => protocol == UDP,
            Self::TcpUdp => protocol == TCP || protocol == UDP,
        }
    }
}

impl FromStr for ServiceProtocol {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "tcp-udp" => Ok(Self::TcpUdp),
            other => Err(ValueError::new(
                "service protocol",
                other,
                "expected tcp, udp or tcp-udp",
            )),
        }
    }
}

impl fmt::Display for ServiceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::TcpUdp => f.write_str("tcp-udp"),
        }
    }
}

/// Leaf of an enhanced service group: a protocol with an optional port test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceObject {
    pub protocol: u8,
    pub port: Option<PortSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupLeaf {
    Network(AddrRange),
    Port(PortSpec),
    Protocol(u8),
    Icmp(u8),
    Service(ServiceObject),
}

impl GroupLeaf {
    fn kind(&self) -> GroupKind {
        match self {
            Self::Network(_) => GroupKind::Network,
            Self::Port(_) => GroupKind::Service,
            Self::Protocol(_) => GroupKind::Protocol,
            Self::Icmp(_) => GroupKind::Icmp,
            Self::Service(_) => GroupKind::EnhancedService,
        }
    }
}

impl fmt::Display for GroupLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(range) => write!(f, "network-object {range}"),
            Self::Port(port) => write!(f, "port-object {port}"),
            Self::Protocol(protocol) => write!(f, "protocol-object {}", protocol_name(*protocol)),
            Self::Icmp(icmp_type) => write!(f, "icmp-object {icmp_type}"),
            Self::Service(service) => match &service.port {
                Some(port) => write!(
                    f,
                    "service-object {} destination {port}",
                    protocol_name(service.protocol)
                ),
                None => write!(f, "service-object {}", protocol_name(service.protocol)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupItem {
    Leaf(GroupLeaf),
    Ref(GroupId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectGroup {
    pub name: String,
    pub kind: GroupKind,
    pub protocol: Option<ServiceProtocol>,
    pub items: Vec<GroupItem>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    groups: Vec<ObjectGroup>,
    by_name: HashMap<String, GroupId>,
    expanded: Vec<Vec<GroupLeaf>>,
}

impl GroupTable {
    pub fn declare(
        &mut self,
        name: &str,
        kind: GroupKind,
        protocol: Option<ServiceProtocol>,
    ) -> Result<GroupId, ConfigError> {
        if self.by_name.contains_key(name) {
            return Err(ConfigError::Duplicate {
                kind: "object-group",
                name: name.to_string(),
            });
        }
        let id = GroupId(self.groups.len());
        self.groups.push(ObjectGroup {
            name: name.to_string(),
            kind,
            protocol,
            items: Vec::new(),
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn id(&self, name: &str) -> Option<GroupId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GroupId, &ObjectGroup)> {
        self.groups
            .iter()
            .enumerate()
            .map(|(index, group)| (GroupId(index), group))
    }

    pub fn get(&self, id: GroupId) -> Result<&ObjectGroup, EvalError> {
        self.groups.get(id.0).ok_or(EvalError::DanglingId {
            arena: "object-group",
            id: id.0,
        })
    }

    pub fn add_leaf(&mut self, group: GroupId, leaf: GroupLeaf) -> Result<(), ConfigError> {
        let target = self.group_mut(group)?;
        if leaf.kind() != target.kind {
            return Err(ConfigError::conflict(
                format!("object-group {}", target.name),
                format!("'{leaf}' does not belong in a {} group", target.kind),
            ));
        }
        target.items.push(GroupItem::Leaf(leaf));
        Ok(())
    }

    /// Adds a `group-object` reference to a group of the same kind.
    pub fn add_reference(&mut self, group: GroupId, target: &str) -> Result<(), ConfigError> {
        let owner = self.group_mut(group)?;
        if owner.name == target {
            return Err(ConfigError::SelfReference(target.to_string()));
        }
        let owner_name = owner.name.clone();
        let owner_kind = owner.kind;
        let target_id = self
            .id(target)
            .ok_or_else(|| ConfigError::UnknownReference {
                kind: "object-group",
                name: target.to_string(),
                by: format!("object-group {owner_name}"),
            })?;
        let target_kind = self.groups[target_id.0].kind;
        if target_kind != owner_kind {
            return Err(ConfigError::KindMismatch {
                group: owner_name,
                target: target.to_string(),
                expected: owner_kind.to_string(),
                found: target_kind.to_string(),
            });
        }
        self.groups[group.0].items.push(GroupItem::Ref(target_id));
        Ok(())
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut ObjectGroup, ConfigError> {
        self.groups
            .get_mut(id.0)
            .ok_or_else(|| ConfigError::conflict("object-group", format!("dangling id {}", id.0)))
    }

    /// Rejects reference cycles and caches every group's expansion.
    pub fn seal(&mut self) -> Result<(), ConfigError> {
        let mut expanded = Vec::with_capacity(self.groups.len());
        for (id, group) in self.iter() {
            let mut path = vec![id];
            let mut leaves = Vec::new();
            self.collect(group, &mut path, &mut leaves).map_err(|err| match err {
                EvalError::ReferenceCycle { name, .. } => ConfigError::Cycle(name),
                other => ConfigError::conflict(format!("object-group {}", group.name), other.to_string()),
            })?;
            expanded.push(leaves);
        }
        self.expanded = expanded;
        Ok(())
    }

    /// Cached leaf-only expansion of a sealed group.
    pub fn expanded(&self, id: GroupId) -> Result<&[GroupLeaf], EvalError> {
        self.expanded
            .get(id.0)
            .map(Vec::as_slice)
            .ok_or(EvalError::DanglingId {
                arena: "object-group expansion",
                id: id.0,
            })
    }

    /// Depth-first expansion of any group: nested references are replaced
    /// by their leaves, in order. The group itself is left untouched.
    pub fn expand_group(&self, group: &ObjectGroup) -> Result<Vec<GroupLeaf>, EvalError> {
        let mut path: Vec<GroupId> = self.id(&group.name).into_iter().collect();
        let mut leaves = Vec::new();
        self.collect(group, &mut path, &mut leaves)?;
        Ok(leaves)
    }

    /// Leaf-only copy of a group.
    pub fn flatten(&self, id: GroupId) -> Result<ObjectGroup, EvalError> {
        let group = self.get(id)?;
        let items = self
            .expand_group(group)?
            .into_iter()
            .map(GroupItem::Leaf)
            .collect();
        Ok(ObjectGroup {
            name: group.name.clone(),
            kind: group.kind,
            protocol: group.protocol,
            items,
        })
    }

    /// The group and every group reachable from it, each listed once.
    pub fn closure(&self, id: GroupId) -> Result<Vec<GroupId>, EvalError> {
        let mut seen = vec![id];
        let mut index = 0;
        while index < seen.len() {
            for item in &self.get(seen[index])?.items {
                if let GroupItem::Ref(next) = item {
                    if !seen.contains(next) {
                        seen.push(*next);
                    }
                }
            }
            index += 1;
        }
        Ok(seen)
    }

    fn collect(
        &self,
        group: &ObjectGroup,
        path: &mut Vec<GroupId>,
        out: &mut Vec<GroupLeaf>,
    ) -> Result<(), EvalError> {
        for item in &group.items {
            match item {
                GroupItem::Leaf(leaf) => out.push(leaf.clone()),
                GroupItem::Ref(next) => {
                    if path.contains(next) {
                        let mut names: Vec<&str> = Vec::with_capacity(path.len() + 1);
                        for id in path.iter().chain(std::iter::once(next)) {
                            names.push(&self.get(*id)?.name);
                        }
                        return Err(EvalError::ReferenceCycle {
                            kind: "object-group",
                            name: names.join(" -> "),
                        });
                    }
                    path.push(*next);
                    self.collect(self.get(*next)?, path, out)?;
                    path.pop();
                }
            }
        }
        Ok(())
    }

    /// Network group: the best result over its address leaves.
    pub fn match_network(&self, id: GroupId, candidate: &AddrRange) -> Result<MatchResult, EvalError> {
        Ok(any_of(self.expanded(id)?.iter().map(|leaf| match leaf {
            GroupLeaf::Network(range) => range.matches(candidate),
            _ => MatchResult::Not,
        })))
    }

    /// Service group: port leaves, restricted to the transports the group
    /// declares. Without probe protocols only the ports are tested.
    pub fn match_service(
        &self,
        id: GroupId,
        protocols: Option<&ProtocolSet>,
        port: &PortSpec,
    ) -> Result<MatchResult, EvalError> {
        let ports = any_of(self.expanded(id)?.iter().map(|leaf| match leaf {
            GroupLeaf::Port(spec) => spec.matches(port),
            _ => MatchResult::Not,
        }));
        let transport = self.get(id)?.protocol.unwrap_or(ServiceProtocol::TcpUdp);
        Ok(match protocols {
            None => ports,
            Some(protocols) => any_of(protocols.iter().map(|protocol| {
                if transport.covers(protocol) {
                    ports
                } else {
                    MatchResult::Not
                }
            })),
        })
    }

    pub fn match_protocol(&self, id: GroupId, protocols: &ProtocolSet) -> Result<MatchResult, EvalError> {
        Ok(any_of(self.expanded(id)?.iter().map(|leaf| match leaf {
            GroupLeaf::Protocol(protocol) => protocols.matches(*protocol),
            _ => MatchResult::Not,
        })))
    }

    pub fn match_icmp(&self, id: GroupId, icmp_type: u8) -> Result<MatchResult, EvalError> {
        let hit = self
            .expanded(id)?
            .iter()
            .any(|leaf| matches!(leaf, GroupLeaf::Icmp(t) if *t == icmp_type));
        Ok(if hit { MatchResult::All } else { MatchResult::Not })
    }

    /// Enhanced service group: a leaf holds when its protocol test and, if
    /// both sides carry one, its port test hold.
    pub fn match_enhanced(
        &self,
        id: GroupId,
        protocols: Option<&ProtocolSet>,
        port: Option<&PortSpec>,
    ) -> Result<MatchResult, EvalError> {
        Ok(any_of(self.expanded(id)?.iter().map(|leaf| match leaf {
            GroupLeaf::Service(service) => {
                let protocol = protocols.map_or(MatchResult::All, |p| p.matches(service.protocol));
                let port = match (&service.port, port) {
                    (Some(spec), Some(candidate)) => spec.matches(candidate),
                    _ => MatchResult::All,
                };
                protocol.and(port)
            }
            _ => MatchResult::Not,
        })))
    }
}
