use std::collections::HashMap;

use match_core::{
    AclEntry, Direction, DirectionResult, EvalError, FwResult, Link, Probe,
};
use tracing::debug;

use super::eval::evaluate;
use super::group::GroupTable;
use super::list::{AccessGroup, AccessList};
use crate::error::ConfigError;
use crate::usage::RuleHits;

/// A Cisco-style firewall: object groups, access lists and their bindings.
#[derive(Debug, Default)]
pub struct AclFirewall {
    groups: GroupTable,
    lists: Vec<AccessList>,
    list_index: HashMap<String, usize>,
    bindings: Vec<AccessGroup>,
    hits: RuleHits,
}

impl AclFirewall {
    pub fn new(groups: GroupTable) -> Self {
        Self {
            groups,
            ..Self::default()
        }
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub fn lists(&self) -> &[AccessList] {
        &self.lists
    }

    pub fn list(&self, name: &str) -> Option<&AccessList> {
        self.list_index.get(name).map(|index| &self.lists[*index])
    }

    pub fn bindings(&self) -> &[AccessGroup] {
        &self.bindings
    }

    pub fn hits(&self) -> &RuleHits {
        &self.hits
    }

    /// Adds a list, sealing it with its implicit deny.
    pub fn add_list(&mut self, mut list: AccessList) -> Result<(), ConfigError> {
        if self.list_index.contains_key(list.name()) {
            return Err(ConfigError::Duplicate {
                kind: "access-list",
                name: list.name().to_string(),
            });
        }
        list.seal();
        self.list_index
            .insert(list.name().to_string(), self.lists.len());
        self.lists.push(list);
        self.hits = RuleHits::with_sizes(self.lists.iter().map(|l| l.entries().len()));
        Ok(())
    }

    pub fn bind(&mut self, list: &str, iface: &str, direction: Direction) -> Result<(), ConfigError> {
        if !self.list_index.contains_key(list) {
            return Err(ConfigError::UnknownReference {
                kind: "access-list",
                name: list.to_string(),
                by: format!("access-group on {iface} {direction}"),
            });
        }
        self.bindings.push(AccessGroup {
            list: list.to_string(),
            iface: iface.to_string(),
            direction,
        });
        Ok(())
    }

    /// Filters `probe` on `link` and records the outcome in its results.
    pub fn packet_filter(
        &self,
        link: &Link,
        direction: Direction,
        probe: &mut Probe,
    ) -> Result<(), EvalError> {
        let iface = link.iface();
        if probe.request().options.state {
            probe.record(
                direction,
                DirectionResult::without_rules(format!("{iface} # STATE MATCH"), FwResult::ACCEPT),
            );
            return Ok(());
        }

        let lists: Vec<(usize, &AccessList)> = self
            .bindings
            .iter()
            .filter(|binding| binding.iface == iface && binding.direction == direction)
            .filter_map(|binding| {
                self.list_index
                    .get(&binding.list)
                    .map(|index| (*index, &self.lists[*index]))
            })
            .collect();
        if lists.is_empty() {
            probe.record(
                direction,
                DirectionResult::without_rules(format!("{iface} (unfiltered)"), FwResult::ACCEPT),
            );
            return Ok(());
        }

        let trail = evaluate(&self.groups, &lists, probe)?;
        let active = trail.first().map(|first| {
            self.hits.hit(first.list, first.entry);
            AclEntry::new(first.text.clone(), first.result)
        });
        let verdict = active.as_ref().map_or(FwResult::DENY, |entry| entry.result);
        debug!(iface, %direction, %verdict, matched = trail.matches.len(), "access lists evaluated");

        probe.record(
            direction,
            DirectionResult {
                interface: iface.to_string(),
                matching: trail
                    .matches
                    .into_iter()
                    .map(|m| AclEntry::new(m.text, m.result))
                    .collect(),
                active,
                verdict,
            },
        );
        Ok(())
    }
}
