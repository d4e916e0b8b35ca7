use std::net::IpAddr;

use ipnet::IpNet;

use crate::addr::AddrRange;
use crate::probe::Link;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: IpNet,
    pub link: Link,
    pub next_hop: Option<IpAddr>,
}

/// Routing collaborator consulted by `no-route`/`urpf-failed` tests and by
/// egress selection.
pub trait RouteLookup {
    /// Routes a packet towards `destination` may take. Empty when unroutable.
    fn routes(&self, destination: &AddrRange) -> Vec<Route>;
}

/// A plain prefix table.
#[derive(Debug, Clone, Default)]
pub struct StaticRoutes {
    routes: Vec<Route>,
}

impl StaticRoutes {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn push(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteLookup for StaticRoutes {
    /// Longest-prefix match over the whole destination: routes are tried from
    /// the most specific down and each one is kept while it still reaches an
    /// address no more specific route took. Equal prefixes are kept side by
    /// side.
    fn routes(&self, destination: &AddrRange) -> Vec<Route> {
        let mut candidates: Vec<&Route> = self
            .routes
            .iter()
            .filter(|route| AddrRange::from_net(route.prefix).overlaps(destination))
            .collect();
        candidates.sort_by(|a, b| b.prefix.prefix_len().cmp(&a.prefix.prefix_len()));

        let mut remaining = vec![*destination];
        let mut chosen: Vec<Route> = Vec::new();
        for route in candidates {
            let range = AddrRange::from_net(route.prefix);
            let tie = chosen.iter().any(|kept| kept.prefix == route.prefix);
            if !tie && !remaining.iter().any(|part| part.overlaps(&range)) {
                continue;
            }
            remaining = remaining
                .iter()
                .flat_map(|part| part.subtract(&range))
                .collect();
            chosen.push(route.clone());
        }
        chosen
    }
}
