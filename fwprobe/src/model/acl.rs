use match_core::icmp::parse_icmp_type;
use match_core::proto::{parse_protocol, ICMP, ICMP6, SCTP, TCP, UDP};
use match_core::{AddrRange, Direction, IcmpEntry, PortSpec, ValueError};
use tracing::info;

use super::{parse_value, EntrySection, GroupItemSection, InterfaceNames, LoadNote, ModelFile, ObjectGroupSection};
use crate::acl::{
    AccessList, AccessListEntry, AclAction, AclFirewall, AddressSpec, GroupId, GroupKind,
    GroupLeaf, GroupTable, IcmpMatch, PortMatch, ProtocolSpec, ServiceObject, ServiceProtocol,
};
use crate::equipment::Firewall;
use crate::error::ConfigError;
use crate::usage::{UsageCounters, UsageKind};

pub(super) fn build(
    file: &ModelFile,
    known: &InterfaceNames<'_>,
    notes: &mut Vec<LoadNote>,
) -> Result<(Firewall, UsageCounters), ConfigError> {
    let mut usage = UsageCounters::default();
    let groups = build_groups(&file.object_groups, &mut usage)?;
    let mut firewall = AclFirewall::new(groups);

    for section in &file.access_lists {
        usage.declare(UsageKind::AccessList, &section.name);
        let mut list = AccessList::new(section.name.clone());
        for (index, entry) in section.entries.iter().enumerate() {
            list.push(build_entry(firewall.groups(), &section.name, index, entry, &mut usage)?);
        }
        firewall.add_list(list)?;
    }

    for binding in &file.access_groups {
        let by = format!("access-group {} on {}", binding.list, binding.iface);
        let direction: Direction = parse_value(|| by.clone(), &binding.direction)?;
        known.check(&binding.iface, by.as_str(), notes);
        firewall.bind(&binding.list, &binding.iface, direction)?;
        usage.note(UsageKind::AccessList, &binding.list);
    }

    info!(
        groups = firewall.groups().len(),
        lists = firewall.lists().len(),
        bindings = firewall.bindings().len(),
        "access-list model loaded"
    );
    Ok((Firewall::AccessList(firewall), usage))
}

/// Declares every group first so references may point forward, then fills
/// items and seals the table.
fn build_groups(
    sections: &[ObjectGroupSection],
    usage: &mut UsageCounters,
) -> Result<GroupTable, ConfigError> {
    let mut groups = GroupTable::default();
    let mut ids = Vec::with_capacity(sections.len());
    for section in sections {
        let context = format!("object-group {}", section.name);
        let protocol = match (&section.protocol, section.kind) {
            (None, _) => None,
            (Some(raw), GroupKind::Service) => Some(parse_value::<ServiceProtocol>(|| context.clone(), raw)?),
            (Some(_), kind) => {
                return Err(ConfigError::conflict(
                    context,
                    format!("a {kind} group takes no protocol"),
                ))
            }
        };
        ids.push(groups.declare(&section.name, section.kind, protocol)?);
        usage.declare(UsageKind::ObjectGroup, &section.name);
    }

    for (section, id) in sections.iter().zip(ids) {
        let context = || format!("object-group {}", section.name);
        for item in &section.items {
            let leaf = match item {
                GroupItemSection::Group(target) => {
                    groups.add_reference(id, target)?;
                    usage.note(UsageKind::ObjectGroup, target);
                    continue;
                }
                GroupItemSection::Net(raw) => GroupLeaf::Network(parse_value(context, raw)?),
                GroupItemSection::Port(raw) => GroupLeaf::Port(parse_value(context, raw)?),
                GroupItemSection::Protocol(raw) => {
                    GroupLeaf::Protocol(value(parse_protocol(raw), context)?)
                }
                GroupItemSection::Icmp(raw) => GroupLeaf::Icmp(value(parse_icmp_type(raw), context)?),
                GroupItemSection::Service { protocol, port } => {
                    let protocol = value(parse_protocol(protocol), context)?;
                    let port = port
                        .as_deref()
                        .map(|raw| parse_value::<PortSpec>(context, raw))
                        .transpose()?;
                    if port.is_some() && !carries_ports(protocol) {
                        return Err(ConfigError::conflict(
                            context(),
                            "service-object ports need tcp, udp or sctp",
                        ));
                    }
                    GroupLeaf::Service(ServiceObject { protocol, port })
                }
            };
            groups.add_leaf(id, leaf)?;
        }
    }

    groups.seal()?;
    Ok(groups)
}

fn build_entry(
    groups: &GroupTable,
    list: &str,
    index: usize,
    section: &EntrySection,
    usage: &mut UsageCounters,
) -> Result<AccessListEntry, ConfigError> {
    let by = format!("access-list {list} entry {index}");
    let context = || by.clone();

    if let Some(remark) = &section.remark {
        if section.action.is_some() {
            return Err(ConfigError::conflict(by, "a remark takes no action"));
        }
        return Ok(AccessListEntry::remark(list, remark));
    }
    let action: AclAction = match &section.action {
        Some(raw) => parse_value(context, raw)?,
        None => return Err(ConfigError::conflict(by, "missing action")),
    };

    let mut entry = AccessListEntry::any(action, String::new());
    entry.inactive = section.inactive;

    let has_ports = section.source_port.is_some() || section.destination_port.is_some();
    if let Some(name) = &section.service {
        if section.protocol.is_some() || has_ports {
            return Err(ConfigError::conflict(
                by,
                "a service group replaces protocol and ports",
            ));
        }
        entry.service = Some(group_ref(groups, name, GroupKind::EnhancedService, &by, usage)?);
    }

    if let Some(raw) = &section.protocol {
        entry.protocol = Some(match object_group(raw) {
            Some(name) => ProtocolSpec::Group(group_ref(groups, name, GroupKind::Protocol, &by, usage)?),
            None => ProtocolSpec::Number(value(parse_protocol(raw), context)?),
        });
    }
    if let Some(raw) = &section.source {
        entry.source = address(groups, raw, &by, usage)?;
    }
    if let Some(raw) = &section.destination {
        entry.destination = address(groups, raw, &by, usage)?;
    }
    if let Some(raw) = &section.source_port {
        entry.source_port = Some(port(groups, raw, &by, usage)?);
    }
    if let Some(raw) = &section.destination_port {
        entry.destination_port = Some(port(groups, raw, &by, usage)?);
    }
    if let Some(raw) = &section.icmp {
        entry.icmp = Some(match object_group(raw) {
            Some(name) => IcmpMatch::Group(group_ref(groups, name, GroupKind::Icmp, &by, usage)?),
            None => IcmpMatch::Entry(parse_value::<IcmpEntry>(context, raw)?),
        });
    }

    match &entry.protocol {
        Some(ProtocolSpec::Number(protocol)) => {
            if has_ports && !carries_ports(*protocol) {
                return Err(ConfigError::conflict(by, "ports need tcp, udp or sctp"));
            }
            if entry.icmp.is_some() && *protocol != ICMP && *protocol != ICMP6 {
                return Err(ConfigError::conflict(by, "icmp type needs icmp or icmp6"));
            }
        }
        Some(ProtocolSpec::Group(_)) => {}
        None if has_ports && entry.service.is_none() => {
            return Err(ConfigError::conflict(by, "ports need a protocol"));
        }
        None if entry.icmp.is_some() => {
            return Err(ConfigError::conflict(by, "icmp type needs icmp or icmp6"));
        }
        None => {}
    }

    entry.text = match &section.text {
        Some(text) => text.clone(),
        None => entry.describe(list, groups),
    };
    Ok(entry)
}

fn carries_ports(protocol: u8) -> bool {
    matches!(protocol, TCP | UDP | SCTP)
}

fn object_group(raw: &str) -> Option<&str> {
    raw.trim().strip_prefix("object-group ").map(str::trim)
}

fn value<T>(result: Result<T, ValueError>, context: impl Fn() -> String) -> Result<T, ConfigError> {
    result.map_err(|err| ConfigError::value(context(), err))
}

fn address(
    groups: &GroupTable,
    raw: &str,
    by: &str,
    usage: &mut UsageCounters,
) -> Result<AddressSpec, ConfigError> {
    let raw = raw.trim();
    if raw == "any" {
        return Ok(AddressSpec::Any);
    }
    if let Some(name) = object_group(raw) {
        return Ok(AddressSpec::Group(group_ref(groups, name, GroupKind::Network, by, usage)?));
    }
    let literal = raw.strip_prefix("host ").unwrap_or(raw);
    Ok(AddressSpec::Range(parse_value::<AddrRange>(|| by.to_string(), literal)?))
}

fn port(
    groups: &GroupTable,
    raw: &str,
    by: &str,
    usage: &mut UsageCounters,
) -> Result<PortMatch, ConfigError> {
    match object_group(raw) {
        Some(name) => Ok(PortMatch::Group(group_ref(groups, name, GroupKind::Service, by, usage)?)),
        None => Ok(PortMatch::Spec(parse_value(|| by.to_string(), raw)?)),
    }
}

fn group_ref(
    groups: &GroupTable,
    name: &str,
    expected: GroupKind,
    by: &str,
    usage: &mut UsageCounters,
) -> Result<GroupId, ConfigError> {
    let id = groups.id(name).ok_or_else(|| ConfigError::UnknownReference {
        kind: "object-group",
        name: name.to_string(),
        by: by.to_string(),
    })?;
    let found = groups
        .get(id)
        .map_err(|err| ConfigError::conflict(by, err.to_string()))?
        .kind;
    if found != expected {
        return Err(ConfigError::conflict(
            by,
            format!("object-group {name} is a {found} group, expected {expected}"),
        ));
    }
    usage.note(UsageKind::ObjectGroup, name);
    Ok(id)
}
