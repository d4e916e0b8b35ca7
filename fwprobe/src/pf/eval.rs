//! Last-match-wins evaluation of an anchor tree.
//!
//! Rules of an anchor are scanned in order and every rule the probe may hit
//! is appended to the trail. The last `pass`/`block` rule decides unless a
//! `quick` rule fires first, which stops scanning in its anchor and every
//! enclosing one. Anchor rules recurse into their targets; when the anchor
//! rule itself only partially matches the probe, every nested result is
//! downgraded to that partial certainty.

use match_core::result::{all_of, any_of};
use match_core::{
    AddrRange, AddressFamily, Direction, EvalError, FwResult, Link, MatchResult, PortSpec, Probe,
    RouteLookup,
};
use tracing::{debug, trace};

use super::anchor::{AnchorId, AnchorTree};
use super::host::{HostKind, HostSpec, IpSpec};
use super::rule::{AnchorTarget, FilterClause, IcmpSpec, PfAction, PfGenericRule, RouteTo};

/// Everything evaluation reads besides the probe.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub tree: &'a AnchorTree,
    pub routes: &'a dyn RouteLookup,
    pub link: &'a Link,
    pub direction: Direction,
    /// Whether `tag` may be applied. Cleared for match-only analysis and
    /// below partially matching anchor rules.
    pub side_effects: bool,
}

/// A rule the probe may hit, with the certainty it hits it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResult {
    pub anchor: AnchorId,
    pub index: usize,
    pub text: String,
    pub action: PfAction,
    pub certainty: MatchResult,
    pub route_to: Option<RouteTo>,
}

impl RuleResult {
    pub fn verdict(&self) -> FwResult {
        match self.action {
            PfAction::Pass => FwResult::decision(false, self.certainty),
            PfAction::Block => FwResult::decision(true, self.certainty),
            PfAction::Match => FwResult::MATCH.qualified(self.certainty),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorOutcome {
    pub trail: Vec<RuleResult>,
    pub last: Option<RuleResult>,
    pub quick: bool,
}

/// Evaluates the rules of `anchor` and, recursively, the anchors they reference.
pub fn evaluate_anchor(
    ctx: &EvalContext<'_>,
    anchor: AnchorId,
    probe: &mut Probe,
) -> Result<AnchorOutcome, EvalError> {
    let mut outcome = AnchorOutcome::default();
    let path = ctx.tree.path(anchor);

    for (index, rule) in ctx.tree.get(anchor)?.rules().iter().enumerate() {
        match rule {
            PfGenericRule::Filter(rule) => {
                let certainty = rule_filter(ctx, anchor, &rule.clause, probe)?;
                if certainty.is_not() {
                    continue;
                }
                if ctx.side_effects && certainty.is_all() && rule.action != PfAction::Block {
                    if let Some(tag) = &rule.tag {
                        probe.set_tag(tag.clone());
                    }
                }
                let result = RuleResult {
                    anchor,
                    index,
                    text: rule_text(&path, &rule.text),
                    action: rule.action,
                    certainty,
                    route_to: rule.route_to.clone(),
                };
                debug!(rule = %result.text, %certainty, "pf rule matched");
                outcome.trail.push(result.clone());
                if rule.action != PfAction::Match {
                    outcome.last = Some(result);
                    if rule.quick {
                        outcome.quick = true;
                        break;
                    }
                }
            }
            PfGenericRule::Anchor(anchor_rule) => {
                let gate = rule_filter(ctx, anchor, &anchor_rule.clause, probe)?;
                if gate.is_not() {
                    continue;
                }
                let targets = match &anchor_rule.target {
                    AnchorTarget::Inlined(id) => vec![*id],
                    AnchorTarget::Named(target) => {
                        ctx.tree.find_anchors(anchor, target).unwrap_or_default()
                    }
                };
                let nested_ctx = EvalContext {
                    side_effects: ctx.side_effects && gate.is_all(),
                    ..*ctx
                };

                let mut nested_trail = Vec::new();
                let mut nested_last = None;
                let mut nested_quick = false;
                for target in targets {
                    let mut nested = evaluate_anchor(&nested_ctx, target, probe)?;
                    if gate.is_partial() {
                        downgrade(&mut nested, gate);
                    }
                    nested_trail.append(&mut nested.trail);
                    if nested.last.is_some() {
                        nested_last = nested.last;
                    }
                    if nested.quick {
                        nested_quick = true;
                        break;
                    }
                }

                if let Some(last) = nested_last {
                    outcome.trail.push(RuleResult {
                        anchor,
                        index,
                        text: rule_text(&path, &anchor_rule.text),
                        action: last.action,
                        certainty: last.certainty,
                        route_to: None,
                    });
                    outcome.trail.append(&mut nested_trail);
                    outcome.last = Some(last);
                    if nested_quick || anchor_rule.quick {
                        outcome.quick = true;
                        break;
                    }
                } else {
                    outcome.trail.append(&mut nested_trail);
                }
            }
        }
    }
    Ok(outcome)
}

fn downgrade(outcome: &mut AnchorOutcome, gate: MatchResult) {
    for result in outcome.trail.iter_mut().chain(outcome.last.iter_mut()) {
        if result.certainty != MatchResult::Unknown {
            result.certainty = gate;
        }
    }
}

fn rule_text(path: &str, text: &str) -> String {
    if path.is_empty() {
        text.to_string()
    } else {
        format!("[{path}] {text}")
    }
}

/// Tests the packet-matching part of a rule against the probe.
pub fn rule_filter(
    ctx: &EvalContext<'_>,
    anchor: AnchorId,
    clause: &FilterClause,
    probe: &Probe,
) -> Result<MatchResult, EvalError> {
    let request = probe.request();

    if clause.direction.is_some_and(|d| d != ctx.direction) {
        return Ok(miss("direction"));
    }
    if !clause.on.is_empty() && !clause.on.iter().any(|spec| spec.matches(ctx.link.iface())) {
        return Ok(miss("interface"));
    }
    if let Some(tagged) = &clause.tagged {
        if !tagged.matches(probe.tag()) {
            return Ok(miss("tagged"));
        }
    }
    if clause.af.is_some_and(|af| af != probe.family()) {
        return Ok(miss("address family"));
    }

    let mut results = Vec::with_capacity(7);
    if let (false, Some(protocols)) = (clause.protocols.is_empty(), &request.protocols) {
        let result = protocols.matches_any(&clause.protocols);
        if result.is_not() {
            return Ok(miss("protocol"));
        }
        results.push(result);
    }
    if !clause.all {
        let source = ipspec_filter(ctx, anchor, &clause.from, clause.af, probe.source())?;
        if source.is_not() {
            return Ok(miss("from"));
        }
        results.push(source);

        if let Some(port) = &request.source_port {
            let result = ports_filter(&clause.from_ports, port);
            if result.is_not() {
                return Ok(miss("from port"));
            }
            results.push(result);
        }

        let destination = ipspec_filter(ctx, anchor, &clause.to, clause.af, probe.destination())?;
        if destination.is_not() {
            return Ok(miss("to"));
        }
        results.push(destination);

        if let Some(port) = &request.destination_port {
            let result = ports_filter(&clause.to_ports, port);
            if result.is_not() {
                return Ok(miss("to port"));
            }
            results.push(result);
        }
    }

    // A type without icmp or icmp6 among the protocols has no family to test.
    if let (Some(icmp), Some(icmp_type), Some(family)) =
        (&clause.icmp, request.icmp_type, request.icmp_family())
    {
        let result = icmp_filter(icmp, family, icmp_type, request.icmp_code);
        if result.is_not() {
            return Ok(miss("icmp type"));
        }
        results.push(result);
    }

    if let Some(flags) = &clause.flags {
        if !request.tcp_flags.is_empty() {
            let result = flags.matches(&request.tcp_flags);
            if result.is_not() {
                return Ok(miss("flags"));
            }
            results.push(result);
        }
    }

    Ok(all_of(results))
}

fn miss(field: &str) -> MatchResult {
    trace!(field, "pf rule does not match");
    MatchResult::Not
}

fn ports_filter(specs: &[PortSpec], candidate: &PortSpec) -> MatchResult {
    if specs.is_empty() {
        return MatchResult::All;
    }
    any_of(specs.iter().map(|spec| spec.matches(candidate)))
}

fn icmp_filter(
    spec: &IcmpSpec,
    family: AddressFamily,
    icmp_type: u8,
    code: Option<u8>,
) -> MatchResult {
    if spec.entries.is_empty() {
        return MatchResult::All;
    }
    if family != spec.family {
        return MatchResult::Not;
    }
    any_of(spec.entries.iter().map(|entry| entry.matches(icmp_type, code)))
}

/// Any-of over the hosts of an address clause; an empty clause is `All`.
pub fn ipspec_filter(
    ctx: &EvalContext<'_>,
    anchor: AnchorId,
    spec: &IpSpec,
    af: Option<AddressFamily>,
    candidate: &AddrRange,
) -> Result<MatchResult, EvalError> {
    if spec.is_empty() {
        return Ok(MatchResult::All);
    }
    let mut visiting = Vec::new();
    let mut best = MatchResult::Not;
    for host in &spec.hosts {
        best = best.or(host_filter(ctx, anchor, host, af, candidate, &mut visiting)?);
        if best.is_all() {
            break;
        }
    }
    Ok(best)
}

fn host_filter(
    ctx: &EvalContext<'_>,
    anchor: AnchorId,
    host: &HostSpec,
    af: Option<AddressFamily>,
    candidate: &AddrRange,
    visiting: &mut Vec<String>,
) -> Result<MatchResult, EvalError> {
    let result = match &host.kind {
        HostKind::Any => {
            if af.map_or(true, |af| af == candidate.family()) {
                MatchResult::All
            } else {
                MatchResult::Not
            }
        }
        HostKind::NoRoute => {
            if ctx.routes.routes(candidate).is_empty() {
                MatchResult::All
            } else {
                MatchResult::Not
            }
        }
        HostKind::UrpfFailed => {
            let back = ctx.routes.routes(candidate);
            if back.iter().any(|route| &route.link == ctx.link) {
                MatchResult::Not
            } else {
                MatchResult::All
            }
        }
        HostKind::RouteLabel(_) => MatchResult::Unknown,
        HostKind::Table(name) => table_filter(ctx, anchor, name, af, candidate, visiting)?,
        HostKind::Range(range) => range.matches(candidate),
        HostKind::Addresses(list) => any_of(
            list.iter()
                .filter(|range| af.map_or(true, |af| af == range.family()))
                .map(|range| range.matches(candidate)),
        ),
    };
    Ok(result.negate_if(host.not))
}

/// Resolves a table (local anchor, then root). Missing and empty tables
/// match nothing. Negated entries carve exclusions out of the positive ones.
fn table_filter(
    ctx: &EvalContext<'_>,
    anchor: AnchorId,
    name: &str,
    af: Option<AddressFamily>,
    candidate: &AddrRange,
    visiting: &mut Vec<String>,
) -> Result<MatchResult, EvalError> {
    if visiting.iter().any(|seen| seen == name) {
        return Err(EvalError::ReferenceCycle {
            kind: "table",
            name: name.to_string(),
        });
    }
    let Some(table) = ctx.tree.find_table(anchor, name) else {
        trace!(table = name, "table not found");
        return Ok(MatchResult::Not);
    };

    visiting.push(name.to_string());
    let mut positive = MatchResult::Not;
    let mut excluded = MatchResult::Not;
    for entry in &table.entries {
        let plain = HostSpec::new(entry.kind.clone());
        let result = host_filter(ctx, anchor, &plain, af, candidate, visiting)?;
        if entry.not {
            excluded = excluded.or(result);
        } else {
            positive = positive.or(result);
        }
    }
    visiting.pop();

    Ok(match excluded {
        MatchResult::All => MatchResult::Not,
        MatchResult::Match | MatchResult::Unknown if positive.is_all() => excluded,
        _ => positive,
    })
}

#[cfg(test)]
mod tests {
    use super::{evaluate_anchor, ipspec_filter, EvalContext};
    use crate::pf::anchor::AnchorTree;
    use crate::pf::host::{HostSpec, IpSpec, Table};
    use crate::pf::rule::{
        AnchorRule, AnchorTarget, FilterClause, IcmpSpec, PfAction, PfGenericRule, PfRule,
    };
    use match_core::proto::ICMP;
    use match_core::{
        AddrRange, AddressFamily, Direction, EvalError, IcmpEntry, Link, MatchResult, Probe,
        ProbeRequest, ProtocolSet, Route, StaticRoutes,
    };

    fn addr(s: &str) -> AddrRange {
        s.parse().expect("address")
    }

    fn spec(hosts: &[&str]) -> IpSpec {
        IpSpec::new(hosts.iter().map(|h| h.parse::<HostSpec>().expect("host")).collect())
    }

    fn table(name: &str, entries: &[&str]) -> Table {
        Table {
            name: name.to_string(),
            entries: entries.iter().map(|e| e.parse().expect("entry")).collect(),
        }
    }

    fn filter(text: &str, action: PfAction, quick: bool, clause: FilterClause) -> PfGenericRule {
        PfGenericRule::Filter(PfRule {
            text: text.to_string(),
            action,
            quick,
            clause,
            tag: None,
            route_to: None,
            keep_state: false,
        })
    }

    fn probe(src: &str, dst: &str) -> Probe {
        Probe::new(addr(src), addr(dst), ProbeRequest::default()).expect("probe")
    }

    fn with_ctx<T>(tree: &AnchorTree, routes: &StaticRoutes, f: impl FnOnce(&EvalContext<'_>) -> T) -> T {
        let link = Link::new("em0");
        let ctx = EvalContext {
            tree,
            routes,
            link: &link,
            direction: Direction::In,
            side_effects: true,
        };
        f(&ctx)
    }

    #[test]
    fn tables_resolve_transitively() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        tree.add_table(root, table("outer", &["<inner>", "10.0.0.0/24"])).expect("outer");
        tree.add_table(root, table("inner", &["192.168.1.0/24"])).expect("inner");
        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let outer = spec(&["<outer>"]);
            let hit = ipspec_filter(ctx, root, &outer, None, &addr("192.168.1.9")).expect("eval");
            assert_eq!(hit, MatchResult::All);
            let hit = ipspec_filter(ctx, root, &outer, None, &addr("10.0.0.9")).expect("eval");
            assert_eq!(hit, MatchResult::All);
            let miss = ipspec_filter(ctx, root, &outer, None, &addr("172.16.0.1")).expect("eval");
            assert_eq!(miss, MatchResult::Not);
        });
    }

    #[test]
    fn empty_and_missing_tables_match_nothing() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        tree.add_table(root, table("empty", &[])).expect("empty");
        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            for host in ["<empty>", "<missing>"] {
                let result =
                    ipspec_filter(ctx, root, &spec(&[host]), None, &addr("10.0.0.1")).expect("eval");
                assert_eq!(result, MatchResult::Not, "{host}");
            }
            let negated =
                ipspec_filter(ctx, root, &spec(&["!<empty>"]), None, &addr("10.0.0.1")).expect("eval");
            assert_eq!(negated, MatchResult::All);
        });
    }

    #[test]
    fn table_exclusions_carve_out_addresses() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        tree.add_table(root, table("lan", &["10.0.0.0/24", "!10.0.0.7"])).expect("lan");
        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let lan = spec(&["<lan>"]);
            assert_eq!(
                ipspec_filter(ctx, root, &lan, None, &addr("10.0.0.7")).expect("eval"),
                MatchResult::Not
            );
            assert_eq!(
                ipspec_filter(ctx, root, &lan, None, &addr("10.0.0.8")).expect("eval"),
                MatchResult::All
            );
            assert_eq!(
                ipspec_filter(ctx, root, &lan, None, &addr("10.0.0.0/29")).expect("eval"),
                MatchResult::Match
            );
        });
    }

    #[test]
    fn table_cycle_is_fatal() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        tree.add_table(root, table("a", &["<b>"])).expect("a");
        tree.add_table(root, table("b", &["<a>"])).expect("b");
        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let result = ipspec_filter(ctx, root, &spec(&["<a>"]), None, &addr("10.0.0.1"));
            assert!(matches!(result, Err(EvalError::ReferenceCycle { .. })));
        });
    }

    #[test]
    fn negated_address_partially_covering_stays_partial() {
        let tree = AnchorTree::new();
        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let root = tree.root();
            let not_lan = spec(&["!10.0.0.0/24"]);
            let eval = |c: &str| ipspec_filter(ctx, root, &not_lan, None, &addr(c)).expect("eval");
            assert_eq!(eval("10.0.0.5"), MatchResult::Not);
            assert_eq!(eval("10.0.0.0/23"), MatchResult::Match);
            assert_eq!(eval("192.0.2.1"), MatchResult::All);
        });
    }

    #[test]
    fn negated_address_excludes_contained_candidates() {
        let tree = AnchorTree::new();
        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let root = tree.root();
            let not_hosts = spec(&["!10.0.0.0/24, 10.0.1.0/25"]);
            let eval = |c: &str| ipspec_filter(ctx, root, &not_hosts, None, &addr(c)).expect("eval");
            assert_eq!(eval("10.0.0.0/25"), MatchResult::Not);
            assert_eq!(eval("10.0.1.0/24"), MatchResult::Match);
            assert_eq!(eval("10.0.2.0/24"), MatchResult::All);
        });
    }

    #[test]
    fn icmp_type_is_ignored_without_an_icmp_protocol() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        let echo = FilterClause {
            protocols: vec![ICMP],
            all: true,
            icmp: Some(IcmpSpec {
                family: AddressFamily::Inet,
                entries: vec![IcmpEntry::new(8, None)],
            }),
            ..FilterClause::default()
        };
        tree.push_rule(root, filter("@0 pass proto icmp all icmp-type echoreq", PfAction::Pass, false, echo))
            .expect("rule");

        let request = |protocols: Option<ProtocolSet>, icmp_type: u8| ProbeRequest {
            protocols,
            icmp_type: Some(icmp_type),
            ..ProbeRequest::default()
        };
        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let mut untyped = Probe::new(addr("192.0.2.1"), addr("10.0.0.1"), request(None, 8)).expect("probe");
            let outcome = evaluate_anchor(ctx, root, &mut untyped).expect("eval");
            assert_eq!(outcome.trail.len(), 1);
            assert_eq!(outcome.last.map(|r| r.certainty), Some(MatchResult::All));

            let icmp = Some(ProtocolSet::new([ICMP]));
            let mut reply = Probe::new(addr("192.0.2.1"), addr("10.0.0.1"), request(icmp, 0)).expect("probe");
            let outcome = evaluate_anchor(ctx, root, &mut reply).expect("eval");
            assert!(outcome.trail.is_empty());
            assert!(outcome.last.is_none());
        });
    }

    #[test]
    fn routing_dependent_hosts() {
        let tree = AnchorTree::new();
        let routes = StaticRoutes::new(vec![Route {
            prefix: "10.0.0.0/8".parse().expect("prefix"),
            link: Link::new("em0"),
            next_hop: None,
        }]);
        with_ctx(&tree, &routes, |ctx| {
            let root = tree.root();
            let eval = |h: &str, c: &str| ipspec_filter(ctx, root, &spec(&[h]), None, &addr(c)).expect("eval");
            assert_eq!(eval("no-route", "192.0.2.1"), MatchResult::All);
            assert_eq!(eval("no-route", "10.1.1.1"), MatchResult::Not);
            assert_eq!(eval("urpf-failed", "10.1.1.1"), MatchResult::Not);
            assert_eq!(eval("urpf-failed", "192.0.2.1"), MatchResult::All);
            assert_eq!(eval("route wan", "10.1.1.1"), MatchResult::Unknown);
        });
    }

    #[test]
    fn partial_gate_downgrades_nested_results() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        let inner = tree.find_or_create(root, "inner").expect("inner");
        tree.push_rule(inner, filter("pass all", PfAction::Pass, false, FilterClause::default()))
            .expect("rule");
        tree.push_rule(
            root,
            PfGenericRule::Anchor(AnchorRule {
                text: "anchor inner from 10.0.0.0/25".to_string(),
                quick: false,
                clause: FilterClause {
                    from: spec(&["10.0.0.0/25"]),
                    ..FilterClause::default()
                },
                target: AnchorTarget::Named("inner".to_string()),
            }),
        )
        .expect("anchor");

        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let mut probe = probe("10.0.0.0/24", "192.0.2.1");
            let outcome = evaluate_anchor(ctx, root, &mut probe).expect("eval");
            let texts: Vec<&str> = outcome.trail.iter().map(|r| r.text.as_str()).collect();
            assert_eq!(texts, vec!["anchor inner from 10.0.0.0/25", "[/inner] pass all"]);
            assert!(outcome.trail.iter().all(|r| r.certainty == MatchResult::Match));
            let last = outcome.last.expect("last");
            assert_eq!(last.certainty, MatchResult::Match);
            assert_eq!(last.action, PfAction::Pass);
        });
    }

    #[test]
    fn anchor_without_result_leaves_no_trace() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        tree.push_rule(
            root,
            PfGenericRule::Anchor(AnchorRule {
                text: "anchor \"missing/*\"".to_string(),
                quick: true,
                clause: FilterClause::default(),
                target: AnchorTarget::Named("missing/*".to_string()),
            }),
        )
        .expect("anchor");
        tree.push_rule(root, filter("block all", PfAction::Block, false, FilterClause::default()))
            .expect("rule");

        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let mut probe = probe("10.0.0.1", "10.0.0.2");
            let outcome = evaluate_anchor(ctx, root, &mut probe).expect("eval");
            assert_eq!(outcome.trail.len(), 1);
            assert!(!outcome.quick);
            assert_eq!(outcome.last.map(|r| r.action), Some(PfAction::Block));
        });
    }

    #[test]
    fn quick_inside_anchor_stops_the_enclosing_scope() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        let inner = tree.find_or_create(root, "inner").expect("inner");
        tree.push_rule(inner, filter("pass quick all", PfAction::Pass, true, FilterClause::default()))
            .expect("rule");
        tree.push_rule(
            root,
            PfGenericRule::Anchor(AnchorRule {
                text: "anchor inner".to_string(),
                quick: false,
                clause: FilterClause::default(),
                target: AnchorTarget::Inlined(inner),
            }),
        )
        .expect("anchor");
        tree.push_rule(root, filter("block all", PfAction::Block, false, FilterClause::default()))
            .expect("rule");

        let routes = StaticRoutes::default();
        with_ctx(&tree, &routes, |ctx| {
            let mut probe = probe("10.0.0.1", "10.0.0.2");
            let outcome = evaluate_anchor(ctx, root, &mut probe).expect("eval");
            assert!(outcome.quick);
            assert_eq!(outcome.trail.len(), 2);
            assert_eq!(outcome.last.map(|r| r.action), Some(PfAction::Pass));
        });
    }
}
