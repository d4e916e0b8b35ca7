use std::net::IpAddr;

use colored::Colorize;
use match_core::{DirectionResult, EvalError, FwResult, Probe};
use serde::Serialize;

use crate::acl::GroupTable;
use crate::equipment::summarize;

/// One egress path of a probe through an equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathReport {
    pub egress: Option<String>,
    pub next_hop: Option<IpAddr>,
    pub tag: Option<String>,
    pub killed: Option<String>,
    pub incoming: Option<DirectionResult>,
    pub outgoing: Option<DirectionResult>,
    pub verdict: Option<FwResult>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub equipment: String,
    pub source: String,
    pub destination: String,
    pub paths: Vec<PathReport>,
    pub verdict: Option<FwResult>,
}

pub fn build_probe_report(equipment: &str, probes: &[Probe]) -> ProbeReport {
    let paths = probes
        .iter()
        .map(|probe| PathReport {
            egress: probe.outgoing().map(|link| link.iface().to_string()),
            next_hop: probe.next_hop(),
            tag: probe.tag().map(str::to_string),
            killed: probe.killed().map(str::to_string),
            incoming: probe.results().incoming.clone(),
            outgoing: probe.results().outgoing.clone(),
            verdict: probe.results().path_verdict(),
            note: path_note(probe),
        })
        .collect();
    let (source, destination) = probes
        .first()
        .map(|probe| (probe.source().to_string(), probe.destination().to_string()))
        .unwrap_or_default();
    ProbeReport {
        equipment: equipment.to_string(),
        source,
        destination,
        paths,
        verdict: summarize(probes),
    }
}

/// Traversal stops after an inbound deny, so the outbound filter never runs.
fn path_note(probe: &Probe) -> Option<String> {
    let results = probe.results();
    let denied = results
        .incoming
        .as_ref()
        .is_some_and(|result| result.verdict == FwResult::DENY);
    (denied && results.outgoing.is_none() && probe.killed().is_none())
        .then(|| "outbound filter not evaluated: denied on ingress".to_string())
}

/// Render a probe report for terminal output.
pub fn render_probe_text(report: &ProbeReport) -> String {
    let mut out = Vec::new();
    out.push(
        format!(
            "probe equipment={} src={} dst={} paths={}",
            report.equipment,
            report.source,
            report.destination,
            report.paths.len()
        )
        .cyan()
        .to_string(),
    );
    for (index, path) in report.paths.iter().enumerate() {
        let egress = path.egress.as_deref().unwrap_or("-");
        let mut header = format!("path {index} egress={egress}");
        if let Some(hop) = path.next_hop {
            header.push_str(&format!(" next-hop={hop}"));
        }
        if let Some(tag) = &path.tag {
            header.push_str(&format!(" tag={tag}"));
        }
        out.push(header);
        if let Some(result) = &path.incoming {
            render_direction(&mut out, "in", result);
        }
        if let Some(result) = &path.outgoing {
            render_direction(&mut out, "out", result);
        }
        if let Some(reason) = &path.killed {
            out.push(format!("  status: {}", reason.red()));
        }
        if let Some(note) = &path.note {
            out.push(format!("  note: {note}"));
        }
    }
    let verdict = report
        .verdict
        .map_or_else(|| "NONE".to_string(), paint);
    out.push(format!("verdict: {verdict}"));
    out.join("\n")
}

fn render_direction(out: &mut Vec<String>, label: &str, result: &DirectionResult) {
    out.push(format!("  {label} {}: {}", result.interface, paint(result.verdict)));
    let active = result.active.as_ref();
    for entry in &result.matching {
        let marker = if active == Some(entry) { "*" } else { " " };
        out.push(format!("   {marker} {} => {}", entry.text, paint(entry.result)));
    }
}

fn paint(verdict: FwResult) -> String {
    let text = verdict.to_string();
    if verdict.is_may() {
        text.yellow().to_string()
    } else if verdict.is_deny() {
        text.red().to_string()
    } else if verdict.is_accept() {
        text.green().to_string()
    } else {
        text
    }
}

/// Render object groups with their expanded members.
pub fn render_groups(groups: &GroupTable, name: Option<&str>) -> Result<String, EvalError> {
    let mut out = Vec::new();
    for (id, group) in groups.iter() {
        if name.is_some_and(|wanted| wanted != group.name) {
            continue;
        }
        let protocol = group
            .protocol
            .map(|p| format!(" {p}"))
            .unwrap_or_default();
        out.push(format!("object-group {} {}{protocol}", group.kind, group.name).cyan().to_string());
        let leaves = groups.expanded(id)?;
        if leaves.is_empty() {
            out.push("  (empty)".to_string());
        }
        for leaf in leaves {
            out.push(format!("  {leaf}"));
        }
    }
    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::{build_probe_report, render_groups, render_probe_text};
    use crate::acl::{GroupKind, GroupLeaf, GroupTable};
    use match_core::{AclEntry, AddrRange, Direction, DirectionResult, FwResult, Probe, ProbeRequest};

    fn addr(s: &str) -> AddrRange {
        s.parse().expect("address")
    }

    #[test]
    fn probe_report_lists_trail_and_verdict() {
        colored::control::set_override(false);
        let mut probe = Probe::new(addr("192.0.2.1"), addr("10.0.0.5"), ProbeRequest::default()).expect("probe");
        let active = AclEntry::new("access-list IN extended permit ip any any", FwResult::ACCEPT);
        probe.record(
            Direction::In,
            DirectionResult {
                interface: "outside".to_string(),
                matching: vec![active.clone()],
                active: Some(active),
                verdict: FwResult::ACCEPT,
            },
        );
        let report = build_probe_report("edge", &[probe]);
        assert_eq!(report.verdict, Some(FwResult::ACCEPT));
        let text = render_probe_text(&report);
        assert!(text.contains("probe equipment=edge src=192.0.2.1 dst=10.0.0.5 paths=1"));
        assert!(text.contains("  in outside: ACCEPT"));
        assert!(text.contains("   * access-list IN extended permit ip any any => ACCEPT"));
        assert!(text.ends_with("verdict: ACCEPT"));
        assert!(!text.contains("note:"));
    }

    #[test]
    fn inbound_deny_explains_the_missing_outbound_section() {
        colored::control::set_override(false);
        let mut probe = Probe::new(addr("198.51.100.7"), addr("10.0.0.5"), ProbeRequest::default()).expect("probe");
        let block = AclEntry::new("@0 block quick in on em0 from <badhosts> to any", FwResult::DENY);
        probe.record(
            Direction::In,
            DirectionResult {
                interface: "em0 (wan)".to_string(),
                matching: vec![block.clone()],
                active: Some(block),
                verdict: FwResult::DENY,
            },
        );
        let report = build_probe_report("gw", &[probe]);
        assert_eq!(
            report.paths[0].note.as_deref(),
            Some("outbound filter not evaluated: denied on ingress")
        );
        let text = render_probe_text(&report);
        assert!(text.contains("  in em0 (wan): DENY"));
        assert!(text.contains("  note: outbound filter not evaluated: denied on ingress"));
        assert!(text.ends_with("verdict: DENY"));
    }

    #[test]
    fn groups_render_expanded() {
        colored::control::set_override(false);
        let mut groups = GroupTable::default();
        let outer = groups.declare("OUTER", GroupKind::Network, None).expect("outer");
        let inner = groups.declare("INNER", GroupKind::Network, None).expect("inner");
        groups.add_reference(outer, "INNER").expect("ref");
        groups
            .add_leaf(inner, GroupLeaf::Network(addr("192.168.1.1")))
            .expect("leaf");
        groups.seal().expect("seal");

        let text = render_groups(&groups, Some("OUTER")).expect("render");
        assert_eq!(text, "object-group network OUTER\n  network-object 192.168.1.1");
    }
}
