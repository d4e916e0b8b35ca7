use std::collections::HashMap;

use match_core::{
    AclEntry, Direction, DirectionResult, EvalError, FwResult, Link, Probe, RouteLookup,
    RouteOverride,
};
use tracing::debug;

use super::anchor::AnchorTree;
use super::eval::{evaluate_anchor, EvalContext};
use super::rule::PfAction;
use crate::usage::RuleHits;

/// A pf-style packet filter: an anchor tree plus `set skip on` interfaces.
#[derive(Debug)]
pub struct PfFirewall {
    tree: AnchorTree,
    skip: Vec<String>,
    comments: HashMap<String, String>,
    hits: RuleHits,
}

impl PfFirewall {
    pub fn new(tree: AnchorTree, skip: Vec<String>) -> Self {
        let sizes: Vec<usize> = tree
            .ids()
            .map(|id| tree.get(id).map_or(0, |anchor| anchor.rules().len()))
            .collect();
        Self {
            tree,
            skip,
            comments: HashMap::new(),
            hits: RuleHits::with_sizes(sizes),
        }
    }

    /// Interface comments shown next to the name in results.
    pub fn with_comments(mut self, comments: impl IntoIterator<Item = (String, String)>) -> Self {
        self.comments.extend(comments);
        self
    }

    fn describe(&self, iface: &str) -> String {
        match self.comments.get(iface) {
            Some(comment) => format!("{iface} ({comment})"),
            None => iface.to_string(),
        }
    }

    pub fn tree(&self) -> &AnchorTree {
        &self.tree
    }

    pub fn skip(&self) -> &[String] {
        &self.skip
    }

    /// Hit counters addressed by `(anchor index, rule index)`.
    pub fn hits(&self) -> &RuleHits {
        &self.hits
    }

    /// Filters `probe` on `link` and records the outcome in its results.
    ///
    /// The last matching rule decides; with no matching rule the packet
    /// passes. A `route-to` on a certain, authoritative `pass` is installed
    /// as the probe's egress override.
    pub fn packet_filter(
        &self,
        link: &Link,
        direction: Direction,
        probe: &mut Probe,
        routes: &dyn RouteLookup,
    ) -> Result<(), EvalError> {
        let iface = link.iface();
        let description = self.describe(iface);
        if self.skip.iter().any(|skipped| skipped == iface) {
            probe.record(
                direction,
                DirectionResult::without_rules(format!("{description} SKIPPED"), FwResult::ACCEPT),
            );
            return Ok(());
        }

        let side_effects = !probe.request().options.match_only;
        let ctx = EvalContext {
            tree: &self.tree,
            routes,
            link,
            direction,
            side_effects,
        };
        let outcome = evaluate_anchor(&ctx, self.tree.root(), probe)?;

        let active = outcome.last.as_ref().map(|last| {
            self.hits.hit(last.anchor.index(), last.index);
            AclEntry::new(last.text.clone(), last.verdict())
        });
        let verdict = active.as_ref().map_or(FwResult::ACCEPT, |entry| entry.result);
        debug!(iface, %direction, %verdict, quick = outcome.quick, matched = outcome.trail.len(), "pf ruleset evaluated");

        if let Some(last) = &outcome.last {
            if side_effects && last.action == PfAction::Pass && last.certainty.is_all() {
                if let Some(route) = &last.route_to {
                    debug!(iface = %route.iface, "route-to override installed");
                    probe.set_route_override(RouteOverride {
                        link: Link::new(route.iface.clone()),
                        next_hop: route.next_hop,
                    });
                }
            }
        }

        probe.record(
            direction,
            DirectionResult {
                interface: description,
                matching: outcome
                    .trail
                    .iter()
                    .map(|result| AclEntry::new(result.text.clone(), result.verdict()))
                    .collect(),
                active,
                verdict,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::PfFirewall;
    use crate::pf::anchor::AnchorTree;
    use crate::pf::host::Table;
    use crate::pf::rule::{FilterClause, PfAction, PfGenericRule, PfRule, RouteTo};
    use crate::pf::host::IpSpec;
    use match_core::{
        AddrRange, Direction, FwResult, Link, Probe, ProbeOptions, ProbeRequest, StaticRoutes,
    };
    use pretty_assertions::assert_eq;

    fn rule(text: &str, action: PfAction, quick: bool, clause: FilterClause) -> PfRule {
        PfRule {
            text: text.to_string(),
            action,
            quick,
            clause,
            tag: None,
            route_to: None,
            keep_state: false,
        }
    }

    fn probe(src: &str, dst: &str, options: ProbeOptions) -> Probe {
        let addr = |s: &str| s.parse::<AddrRange>().expect("address");
        let request = ProbeRequest {
            options,
            ..ProbeRequest::default()
        };
        Probe::new(addr(src), addr(dst), request).expect("probe")
    }

    fn badhosts_firewall(quick: bool) -> PfFirewall {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        tree.add_table(
            root,
            Table {
                name: "badhosts".to_string(),
                entries: vec!["198.51.100.0/24".parse().expect("entry")],
            },
        )
        .expect("table");
        let from_bad = FilterClause {
            from: IpSpec::new(vec!["<badhosts>".parse().expect("host")]),
            ..FilterClause::default()
        };
        tree.push_rule(
            root,
            PfGenericRule::Filter(rule("@0 block quick from <badhosts> to any", PfAction::Block, quick, from_bad)),
        )
        .expect("rule");
        tree.push_rule(
            root,
            PfGenericRule::Filter(rule("@1 pass all", PfAction::Pass, false, FilterClause::default())),
        )
        .expect("rule");
        PfFirewall::new(tree, vec!["lo0".to_string()])
    }

    #[test]
    fn quick_block_is_final() {
        let firewall = badhosts_firewall(true);
        let mut probe = probe("198.51.100.7", "192.0.2.1", ProbeOptions::default());
        firewall
            .packet_filter(&Link::new("em0"), Direction::In, &mut probe, &StaticRoutes::default())
            .expect("eval");
        let result = probe.results().get(Direction::In).expect("in");
        assert_eq!(result.verdict, FwResult::DENY);
        assert_eq!(result.matching.len(), 1);
        assert_eq!(firewall.hits().get(0, 0), 1);
    }

    #[test]
    fn without_quick_the_last_rule_wins() {
        let firewall = badhosts_firewall(false);
        let mut probe = probe("198.51.100.7", "192.0.2.1", ProbeOptions::default());
        firewall
            .packet_filter(&Link::new("em0"), Direction::In, &mut probe, &StaticRoutes::default())
            .expect("eval");
        let result = probe.results().get(Direction::In).expect("in");
        assert_eq!(result.verdict, FwResult::ACCEPT);
        assert_eq!(result.matching.len(), 2);
        assert_eq!(result.active.as_ref().map(|a| a.text.as_str()), Some("@1 pass all"));
    }

    #[test]
    fn skipped_interfaces_pass_untested() {
        let firewall = badhosts_firewall(true);
        let mut probe = probe("198.51.100.7", "192.0.2.1", ProbeOptions::default());
        firewall
            .packet_filter(&Link::new("lo0"), Direction::In, &mut probe, &StaticRoutes::default())
            .expect("eval");
        let result = probe.results().get(Direction::In).expect("in");
        assert_eq!(result.interface, "lo0 SKIPPED");
        assert_eq!(result.verdict, FwResult::ACCEPT);
        assert!(result.matching.is_empty());
    }

    #[test]
    fn interface_comments_are_carried_into_results() {
        let firewall = badhosts_firewall(true).with_comments([
            ("em0".to_string(), "wan".to_string()),
            ("lo0".to_string(), "loopback".to_string()),
        ]);
        let routes = StaticRoutes::default();

        let mut blocked = probe("198.51.100.7", "192.0.2.1", ProbeOptions::default());
        firewall.packet_filter(&Link::new("em0"), Direction::In, &mut blocked, &routes).expect("eval");
        assert_eq!(blocked.results().get(Direction::In).expect("in").interface, "em0 (wan)");

        let mut skipped = probe("198.51.100.7", "192.0.2.1", ProbeOptions::default());
        firewall.packet_filter(&Link::new("lo0"), Direction::In, &mut skipped, &routes).expect("eval");
        assert_eq!(
            skipped.results().get(Direction::In).expect("in").interface,
            "lo0 (loopback) SKIPPED"
        );

        let mut plain = probe("10.0.0.1", "192.0.2.1", ProbeOptions::default());
        firewall.packet_filter(&Link::new("em1"), Direction::In, &mut plain, &routes).expect("eval");
        assert_eq!(plain.results().get(Direction::In).expect("in").interface, "em1");
    }

    #[test]
    fn empty_ruleset_passes() {
        let firewall = PfFirewall::new(AnchorTree::new(), Vec::new());
        let mut probe = probe("10.0.0.1", "10.0.0.2", ProbeOptions::default());
        firewall
            .packet_filter(&Link::new("em0"), Direction::Out, &mut probe, &StaticRoutes::default())
            .expect("eval");
        let result = probe.results().get(Direction::Out).expect("out");
        assert_eq!(result.verdict, FwResult::ACCEPT);
        assert_eq!(result.active, None);
    }

    #[test]
    fn route_to_needs_a_certain_pass_and_side_effects() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        let mut pass = rule(
            "@0 pass in route-to (em2 192.0.2.254) from 10.0.0.0/24",
            PfAction::Pass,
            false,
            FilterClause {
                direction: Some(Direction::In),
                from: IpSpec::new(vec!["10.0.0.0/24".parse().expect("host")]),
                ..FilterClause::default()
            },
        );
        pass.route_to = Some(RouteTo {
            iface: "em2".to_string(),
            next_hop: Some("192.0.2.254".parse().expect("hop")),
        });
        tree.push_rule(root, PfGenericRule::Filter(pass)).expect("rule");
        let firewall = PfFirewall::new(tree, Vec::new());
        let link = Link::new("em0");
        let routes = StaticRoutes::default();

        let mut certain = probe("10.0.0.9", "203.0.113.1", ProbeOptions::default());
        firewall.packet_filter(&link, Direction::In, &mut certain, &routes).expect("eval");
        assert_eq!(
            certain.route_override().map(|r| r.link.iface()),
            Some("em2")
        );

        let mut partial = probe("10.0.0.0/23", "203.0.113.1", ProbeOptions::default());
        firewall.packet_filter(&link, Direction::In, &mut partial, &routes).expect("eval");
        assert!(partial.route_override().is_none());

        let analysis = ProbeOptions {
            match_only: true,
            ..ProbeOptions::default()
        };
        let mut dry = probe("10.0.0.9", "203.0.113.1", analysis);
        firewall.packet_filter(&link, Direction::In, &mut dry, &routes).expect("eval");
        assert!(dry.route_override().is_none());
    }
}
