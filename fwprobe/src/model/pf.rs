use std::collections::HashMap;

use match_core::proto::{parse_protocol, ICMP, ICMP6, SCTP, TCP, UDP};
use match_core::{AddressFamily, Direction, FlagsTest, IcmpEntry, PortSpec};
use tracing::info;

use super::{parse_value, InterfaceNames, LoadNote, ModelFile, RuleSection};
use crate::equipment::Firewall;
use crate::error::ConfigError;
use crate::pf::{
    AnchorId, AnchorRule, AnchorTarget, AnchorTree, FilterClause, HostKind, HostSpec, IcmpSpec,
    IfSpec, IpSpec, PfAction, PfFirewall, PfGenericRule, PfRule, RouteTo, Table, TaggedOpt,
};
use crate::usage::{UsageCounters, UsageKind};

pub(super) fn build(
    file: &ModelFile,
    known: &InterfaceNames<'_>,
    notes: &mut Vec<LoadNote>,
) -> Result<(Firewall, UsageCounters), ConfigError> {
    let mut usage = UsageCounters::default();
    let mut tree = AnchorTree::new();

    for iface in &file.skip {
        known.check(iface, "set skip", notes);
    }

    for section in &file.tables {
        let scope = scope_anchor(&mut tree, section.scope.as_deref())?;
        let context = || format!("table <{}>", section.name);
        let mut entries = Vec::with_capacity(section.entries.len());
        for raw in &section.entries {
            let host: HostSpec = parse_value(context, raw)?;
            if !host.is_table_entry() {
                return Err(ConfigError::conflict(
                    context(),
                    format!("'{raw}' cannot be a table entry"),
                ));
            }
            entries.push(host);
        }
        usage.declare(UsageKind::Table, &table_key(&tree, scope, &section.name));
        tree.add_table(
            scope,
            Table {
                name: section.name.clone(),
                entries,
            },
        )?;
    }

    let mut numbers: HashMap<AnchorId, usize> = HashMap::new();
    let mut named = Vec::new();
    for section in &file.rules {
        let scope = scope_anchor(&mut tree, section.scope.as_deref())?;
        let number = numbers.entry(scope).or_insert(0);
        let rule = build_rule(&mut tree, scope, *number, section, known, notes)?;
        *number += 1;
        if let PfGenericRule::Anchor(AnchorRule {
            target: AnchorTarget::Named(path),
            text,
            ..
        }) = &rule
        {
            named.push((scope, path.clone(), text.clone()));
        }
        tree.push_rule(scope, rule)?;
    }

    for (scope, path, text) in named {
        match tree.find_anchors(scope, &path) {
            None => return Err(ConfigError::AnchorPath(path)),
            Some(targets) if targets.is_empty() => notes.push(LoadNote::new(
                "unresolved_anchor",
                format!("'{text}' refers to anchor '{path}' which has no rules loaded"),
            )),
            Some(_) => {}
        }
    }

    count_table_references(&tree, &mut usage, notes)?;

    info!(
        anchors = tree.len(),
        rules = file.rules.len(),
        tables = file.tables.len(),
        "packet-filter model loaded"
    );
    let comments = file
        .interfaces
        .iter()
        .filter_map(|iface| Some((iface.name.clone(), iface.comment.clone()?)));
    let firewall = PfFirewall::new(tree, file.skip.clone()).with_comments(comments);
    Ok((Firewall::PacketFilter(firewall), usage))
}

fn scope_anchor(tree: &mut AnchorTree, scope: Option<&str>) -> Result<AnchorId, ConfigError> {
    let root = tree.root();
    match scope {
        None => Ok(root),
        Some(path) => tree
            .find_or_create(root, path)
            .ok_or_else(|| ConfigError::AnchorPath(path.to_string())),
    }
}

fn table_key(tree: &AnchorTree, anchor: AnchorId, name: &str) -> String {
    let path = tree.path(anchor);
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}/{name}")
    }
}

/// Notes every table reference against its owner and reports references
/// that resolve to nothing.
fn count_table_references(
    tree: &AnchorTree,
    usage: &mut UsageCounters,
    notes: &mut Vec<LoadNote>,
) -> Result<(), ConfigError> {
    for anchor_id in tree.ids() {
        let anchor = tree
            .get(anchor_id)
            .map_err(|err| ConfigError::AnchorPath(err.to_string()))?;
        let mut references: Vec<(String, &str)> = Vec::new();
        for rule in anchor.rules() {
            let clause = match rule {
                PfGenericRule::Filter(rule) => &rule.clause,
                PfGenericRule::Anchor(rule) => &rule.clause,
            };
            for name in clause.from.tables().chain(clause.to.tables()) {
                references.push((format!("'{}'", rule.text()), name));
            }
        }
        for table in anchor.tables() {
            for entry in &table.entries {
                if let HostKind::Table(name) = &entry.kind {
                    references.push((format!("table <{}>", table.name), name));
                }
            }
        }

        for (by, name) in references {
            match tree.resolve_table(anchor_id, name) {
                Some((owner, _)) => usage.note(UsageKind::Table, &table_key(tree, owner, name)),
                None => notes.push(LoadNote::new(
                    "missing_table",
                    format!("{by} references missing table <{name}>, which matches nothing"),
                )),
            }
        }
    }
    Ok(())
}

fn build_rule(
    tree: &mut AnchorTree,
    scope: AnchorId,
    number: usize,
    section: &RuleSection,
    known: &InterfaceNames<'_>,
    notes: &mut Vec<LoadNote>,
) -> Result<PfGenericRule, ConfigError> {
    let location = tree.path(scope);
    let context = format!(
        "rule @{number} in {}",
        if location.is_empty() { "main ruleset" } else { location.as_str() }
    );
    let clause = build_clause(section, &context, known, notes)?;

    match section.action.trim() {
        "" => Err(ConfigError::conflict(context, "missing action")),
        "anchor" => {
            if section.tag.is_some() || section.route_to.is_some() || section.keep_state {
                return Err(ConfigError::conflict(
                    context,
                    "anchor rules take no tag, route-to or keep state",
                ));
            }
            let Some(path) = &section.target else {
                return Err(ConfigError::conflict(context, "anchor rule without target"));
            };
            let target = if section.inline {
                let id = tree
                    .find_or_create(scope, path)
                    .ok_or_else(|| ConfigError::AnchorPath(path.clone()))?;
                AnchorTarget::Inlined(id)
            } else {
                AnchorTarget::Named(path.clone())
            };
            let text = section.text.clone().unwrap_or_else(|| {
                let quick = if section.quick { " quick" } else { "" };
                let rendered = clause.to_string();
                let sep = if rendered.is_empty() { "" } else { " " };
                format!("@{number} anchor{quick} \"{path}\"{sep}{rendered}")
            });
            Ok(PfGenericRule::Anchor(AnchorRule {
                text,
                quick: section.quick,
                clause,
                target,
            }))
        }
        raw => {
            let action: PfAction = parse_value(|| context.clone(), raw)?;
            if section.target.is_some() || section.inline {
                return Err(ConfigError::conflict(context, "only anchor rules take a target"));
            }
            if section.route_to.is_some() && action != PfAction::Pass {
                return Err(ConfigError::conflict(context, "route-to needs a pass rule"));
            }
            let route_to = section.route_to.as_ref().map(|route| {
                known.check(&route.iface, format!("{context} route-to"), notes);
                RouteTo {
                    iface: route.iface.clone(),
                    next_hop: route.next_hop,
                }
            });
            let mut rule = PfRule {
                text: String::new(),
                action,
                quick: section.quick,
                clause,
                tag: section.tag.clone(),
                route_to,
                keep_state: section.keep_state,
            };
            rule.text = match &section.text {
                Some(text) => text.clone(),
                None => format!("@{number} {rule}"),
            };
            Ok(PfGenericRule::Filter(rule))
        }
    }
}

fn build_clause(
    section: &RuleSection,
    context: &str,
    known: &InterfaceNames<'_>,
    notes: &mut Vec<LoadNote>,
) -> Result<FilterClause, ConfigError> {
    let ctx = || context.to_string();
    let list = |raws: &[String]| -> Result<Vec<HostSpec>, ConfigError> {
        raws.iter().map(|raw| parse_value(ctx, raw)).collect()
    };
    let ports = |raws: &[String]| -> Result<Vec<PortSpec>, ConfigError> {
        raws.iter().map(|raw| parse_value(ctx, raw)).collect()
    };

    let direction = section
        .direction
        .as_deref()
        .map(|raw| parse_value::<Direction>(ctx, raw))
        .transpose()?;
    let on = section
        .on
        .iter()
        .map(|raw| parse_value::<IfSpec>(ctx, raw))
        .collect::<Result<Vec<_>, _>>()?;
    for iface in &on {
        known.check(&iface.name, context, notes);
    }
    let af = section
        .af
        .as_deref()
        .map(|raw| parse_value::<AddressFamily>(ctx, raw))
        .transpose()?;
    let protocols = section
        .proto
        .iter()
        .map(|raw| parse_protocol(raw).map_err(|err| ConfigError::value(ctx(), err)))
        .collect::<Result<Vec<u8>, _>>()?;

    let from = IpSpec::new(list(&section.from)?);
    let to = IpSpec::new(list(&section.to)?);
    let from_ports = ports(&section.from_port)?;
    let to_ports = ports(&section.to_port)?;

    if section.all && !(from.is_empty() && to.is_empty() && from_ports.is_empty() && to_ports.is_empty()) {
        return Err(ConfigError::conflict(context, "'all' excludes from, to and ports"));
    }
    if (!from_ports.is_empty() || !to_ports.is_empty())
        && !protocols.iter().any(|p| matches!(*p, TCP | UDP | SCTP))
    {
        return Err(ConfigError::conflict(context, "ports need proto tcp, udp or sctp"));
    }
    if let Some(af) = af {
        let mismatch = from
            .hosts
            .iter()
            .chain(to.hosts.iter())
            .flat_map(|host| match &host.kind {
                HostKind::Addresses(list) => list.clone(),
                HostKind::Range(range) => vec![*range],
                _ => Vec::new(),
            })
            .find(|range| range.family() != af);
        if let Some(range) = mismatch {
            return Err(ConfigError::conflict(context, format!("{range} is not {af}")));
        }
    }

    let icmp = if section.icmp.is_empty() {
        None
    } else {
        let family = match section.icmp_af.as_deref() {
            Some(raw) => parse_value::<AddressFamily>(ctx, raw)?,
            None if protocols.contains(&ICMP6) && !protocols.contains(&ICMP) => AddressFamily::Inet6,
            None => AddressFamily::Inet,
        };
        let needed = match family {
            AddressFamily::Inet => ICMP,
            AddressFamily::Inet6 => ICMP6,
        };
        if !protocols.contains(&needed) {
            return Err(ConfigError::conflict(
                context,
                format!("icmp types for {family} need proto {}", if needed == ICMP { "icmp" } else { "icmp6" }),
            ));
        }
        let entries = section
            .icmp
            .iter()
            .map(|raw| parse_value::<IcmpEntry>(ctx, raw))
            .collect::<Result<Vec<_>, _>>()?;
        Some(IcmpSpec { family, entries })
    };

    let flags = match section.flags.as_deref() {
        None => None,
        Some(raw) => {
            if !protocols.contains(&TCP) {
                return Err(ConfigError::conflict(context, "flags need proto tcp"));
            }
            Some(parse_value::<FlagsTest>(ctx, raw)?)
        }
    };
    let tagged = section
        .tagged
        .as_deref()
        .map(|raw| parse_value::<TaggedOpt>(ctx, raw))
        .transpose()?;

    Ok(FilterClause {
        direction,
        on,
        af,
        protocols,
        all: section.all,
        from,
        from_ports,
        to,
        to_ports,
        icmp,
        flags,
        tagged,
    })
}
