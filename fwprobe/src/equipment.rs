//! A modeled device: interfaces, a static routing table and one firewall.

use std::net::IpAddr;

use match_core::{
    Direction, EvalError, FwResult, Link, Probe, RouteLookup, StaticRoutes,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::acl::AclFirewall;
use crate::pf::PfFirewall;

/// Which rule discipline an equipment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirewallKind {
    AccessList,
    PacketFilter,
}

#[derive(Debug)]
pub enum Firewall {
    AccessList(AclFirewall),
    PacketFilter(PfFirewall),
}

impl Firewall {
    pub fn kind(&self) -> FirewallKind {
        match self {
            Self::AccessList(_) => FirewallKind::AccessList,
            Self::PacketFilter(_) => FirewallKind::PacketFilter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    pub comment: Option<String>,
}

#[derive(Debug)]
pub struct Equipment {
    pub name: String,
    pub interfaces: Vec<Interface>,
    pub routes: StaticRoutes,
    pub firewall: Firewall,
}

impl Equipment {
    pub fn has_interface(&self, name: &str) -> bool {
        self.interfaces.iter().any(|iface| iface.name == name)
    }

    /// Runs the firewall for one direction on one link.
    pub fn packet_filter(
        &self,
        link: &Link,
        direction: Direction,
        probe: &mut Probe,
    ) -> Result<(), EvalError> {
        match &self.firewall {
            Firewall::AccessList(firewall) => firewall.packet_filter(link, direction, probe),
            Firewall::PacketFilter(firewall) => {
                firewall.packet_filter(link, direction, probe, &self.routes)
            }
        }
    }

    /// Carries `probe` through the equipment: inbound filter on `ingress`,
    /// egress selection, then one outbound filter per egress path.
    ///
    /// Egress is, in order of preference, a `route-to` installed by the
    /// inbound filter, the explicit `egress` link, or the routing table. A
    /// probe whose destination spans several routes is cloned once per route.
    pub fn traverse(
        &self,
        mut probe: Probe,
        ingress: &Link,
        egress: Option<&Link>,
    ) -> Result<Vec<Probe>, EvalError> {
        if !probe.decrement_ttl() {
            probe.kill("ttl expired");
            return Ok(vec![probe]);
        }

        self.packet_filter(ingress, Direction::In, &mut probe)?;
        let denied = probe
            .results()
            .get(Direction::In)
            .is_some_and(|result| result.verdict == FwResult::DENY);
        if denied {
            debug!(equipment = %self.name, iface = ingress.iface(), "probe denied on ingress");
            return Ok(vec![probe]);
        }

        let paths: Vec<(Link, Option<IpAddr>)> = if let Some(forced) = probe.take_route_override() {
            vec![(forced.link, forced.next_hop)]
        } else if let Some(link) = egress {
            vec![(link.clone(), None)]
        } else {
            self.routes
                .routes(probe.destination())
                .into_iter()
                .map(|route| (route.link, route.next_hop))
                .collect()
        };
        if paths.is_empty() {
            probe.kill("no route");
            return Ok(vec![probe]);
        }
        if paths.len() > 1 {
            info!(equipment = %self.name, paths = paths.len(), "probe split across routes");
        }

        let mut probes = Vec::with_capacity(paths.len());
        for (link, next_hop) in paths {
            let mut branch = probe.clone();
            branch.set_outgoing(link.clone(), next_hop);
            self.packet_filter(&link, Direction::Out, &mut branch)?;
            probes.push(branch);
        }
        Ok(probes)
    }
}

/// Overall verdict of a traversal: each probe's path verdict, summed across
/// alternative paths. Killed probes count as denied.
pub fn summarize(probes: &[Probe]) -> Option<FwResult> {
    probes
        .iter()
        .filter_map(|probe| {
            if probe.killed().is_some() {
                Some(FwResult::DENY)
            } else {
                probe.results().path_verdict()
            }
        })
        .reduce(FwResult::sum_path)
}

#[cfg(test)]
mod tests {
    use super::{summarize, Equipment, Firewall, Interface};
    use crate::acl::{AccessList, AccessListEntry, AclAction, AclFirewall, AddressSpec, GroupTable};
    use crate::pf::{AnchorTree, FilterClause, IpSpec, PfAction, PfFirewall, PfGenericRule, PfRule, RouteTo};
    use match_core::{
        AddrRange, Direction, FwResult, Link, Probe, ProbeRequest, Route, StaticRoutes,
    };
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> AddrRange {
        s.parse().expect("address")
    }

    fn route(prefix: &str, iface: &str) -> Route {
        Route {
            prefix: prefix.parse().expect("prefix"),
            link: Link::new(iface),
            next_hop: None,
        }
    }

    fn interfaces(names: &[&str]) -> Vec<Interface> {
        names
            .iter()
            .map(|name| Interface {
                name: name.to_string(),
                comment: None,
            })
            .collect()
    }

    fn deny_lan_out() -> Equipment {
        let mut firewall = AclFirewall::new(GroupTable::default());
        let mut list = AccessList::new("LAN_OUT");
        let mut deny = AccessListEntry::any(AclAction::Deny, "access-list LAN_OUT deny ip any 10.1.0.0/16");
        deny.destination = AddressSpec::Range(addr("10.1.0.0/16"));
        list.push(deny);
        list.push(AccessListEntry::any(AclAction::Permit, "access-list LAN_OUT permit ip any any"));
        firewall.add_list(list).expect("list");
        firewall.bind("LAN_OUT", "inside", Direction::Out).expect("bind");
        Equipment {
            name: "edge".to_string(),
            interfaces: interfaces(&["outside", "inside", "dmz"]),
            routes: StaticRoutes::new(vec![
                route("10.1.0.0/16", "inside"),
                route("10.2.0.0/16", "dmz"),
                route("0.0.0.0/0", "outside"),
            ]),
            firewall: Firewall::AccessList(firewall),
        }
    }

    fn probe(src: &str, dst: &str) -> Probe {
        Probe::new(addr(src), addr(dst), ProbeRequest::default()).expect("probe")
    }

    #[test]
    fn routes_to_the_longest_prefix() {
        let edge = deny_lan_out();
        let probes = edge
            .traverse(probe("192.0.2.1", "10.2.3.4"), &Link::new("outside"), None)
            .expect("traverse");
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].outgoing().map(Link::iface), Some("dmz"));
        assert_eq!(summarize(&probes), Some(FwResult::ACCEPT));
    }

    #[test]
    fn spanning_destinations_are_cloned_per_route() {
        let mut edge = deny_lan_out();
        edge.routes = StaticRoutes::new(vec![route("10.1.0.0/16", "inside"), route("10.2.0.0/16", "dmz")]);
        let probes = edge
            .traverse(probe("192.0.2.1", "10.0.0.0/14"), &Link::new("outside"), None)
            .expect("traverse");
        let mut egress: Vec<&str> = probes.iter().filter_map(|p| p.outgoing().map(Link::iface)).collect();
        egress.sort_unstable();
        assert_eq!(egress, vec!["dmz", "inside"]);
        assert_eq!(
            summarize(&probes),
            Some(FwResult::MAY | FwResult::DENY)
        );
    }

    #[test]
    fn unroutable_probes_are_killed() {
        let mut edge = deny_lan_out();
        edge.routes = StaticRoutes::new(vec![route("10.1.0.0/16", "inside")]);
        let probes = edge
            .traverse(probe("10.1.0.1", "203.0.113.1"), &Link::new("inside"), None)
            .expect("traverse");
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].killed(), Some("no route"));
        assert!(probes[0].results().get(Direction::Out).is_none());
    }

    #[test]
    fn expired_ttl_stops_before_filtering() {
        let edge = deny_lan_out();
        let probes = edge
            .traverse(probe("192.0.2.1", "10.1.0.1").with_ttl(1), &Link::new("outside"), None)
            .expect("traverse");
        assert_eq!(probes[0].killed(), Some("ttl expired"));
        assert!(probes[0].results().get(Direction::In).is_none());
    }

    #[test]
    fn route_to_overrides_the_routing_table() {
        let mut tree = AnchorTree::new();
        let root = tree.root();
        tree.push_rule(
            root,
            PfGenericRule::Filter(PfRule {
                text: "@0 pass in on em0 route-to (em2 192.0.2.254) from 10.0.0.0/24".to_string(),
                action: PfAction::Pass,
                quick: false,
                clause: FilterClause {
                    direction: Some(Direction::In),
                    on: vec!["em0".parse().expect("if")],
                    from: IpSpec::new(vec!["10.0.0.0/24".parse().expect("host")]),
                    ..FilterClause::default()
                },
                tag: None,
                route_to: Some(RouteTo {
                    iface: "em2".to_string(),
                    next_hop: Some("192.0.2.254".parse().expect("hop")),
                }),
                keep_state: true,
            }),
        )
        .expect("rule");
        let gateway = Equipment {
            name: "gw".to_string(),
            interfaces: interfaces(&["em0", "em1", "em2"]),
            routes: StaticRoutes::new(vec![route("0.0.0.0/0", "em1")]),
            firewall: Firewall::PacketFilter(PfFirewall::new(tree, Vec::new())),
        };
        let probes = gateway
            .traverse(probe("10.0.0.5", "198.51.100.1"), &Link::new("em0"), None)
            .expect("traverse");
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].outgoing().map(Link::iface), Some("em2"));
        assert_eq!(probes[0].next_hop(), Some("192.0.2.254".parse().expect("hop")));
        assert!(probes[0].route_override().is_none());
    }
}
