//! Reference and hit bookkeeping.
//!
//! [`UsageCounters`] are filled while a model is loaded and record how often
//! each named object is referenced. [`RuleHits`] counts how often a rule was
//! authoritative during evaluation; they are atomics so a loaded firewall can
//! be shared between threads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageKind {
    ObjectGroup,
    AccessList,
    Table,
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectGroup => f.write_str("object-group"),
            Self::AccessList => f.write_str("access-list"),
            Self::Table => f.write_str("table"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageCounters {
    counts: BTreeMap<(UsageKind, String), usize>,
}

impl UsageCounters {
    /// Registers a declared object with no references yet.
    pub fn declare(&mut self, kind: UsageKind, name: &str) {
        self.counts.entry((kind, name.to_string())).or_insert(0);
    }

    pub fn note(&mut self, kind: UsageKind, name: &str) {
        *self.counts.entry((kind, name.to_string())).or_insert(0) += 1;
    }

    pub fn count(&self, kind: UsageKind, name: &str) -> usize {
        self.counts
            .get(&(kind, name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Declared objects nothing refers to, in kind then name order.
    pub fn unused(&self) -> Vec<(UsageKind, &str)> {
        self.counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|((kind, name), _)| (*kind, name.as_str()))
            .collect()
    }
}

/// Per-rule authoritative hit counters, addressed by `(scope, index)`.
#[derive(Debug, Default)]
pub struct RuleHits {
    scopes: Vec<Vec<AtomicU64>>,
}

impl RuleHits {
    pub fn with_sizes(sizes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            scopes: sizes
                .into_iter()
                .map(|size| (0..size).map(|_| AtomicU64::new(0)).collect())
                .collect(),
        }
    }

    pub fn hit(&self, scope: usize, index: usize) {
        if let Some(counter) = self.scopes.get(scope).and_then(|s| s.get(index)) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, scope: usize, index: usize) -> u64 {
        self.scopes
            .get(scope)
            .and_then(|s| s.get(index))
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::{RuleHits, UsageCounters, UsageKind};

    #[test]
    fn unused_lists_declared_but_unreferenced() {
        let mut usage = UsageCounters::default();
        usage.declare(UsageKind::ObjectGroup, "WEB");
        usage.declare(UsageKind::ObjectGroup, "DNS");
        usage.note(UsageKind::ObjectGroup, "WEB");
        usage.note(UsageKind::ObjectGroup, "WEB");
        assert_eq!(usage.count(UsageKind::ObjectGroup, "WEB"), 2);
        assert_eq!(usage.unused(), vec![(UsageKind::ObjectGroup, "DNS")]);
    }

    #[test]
    fn hits_ignore_out_of_range_slots() {
        let hits = RuleHits::with_sizes([2, 1]);
        hits.hit(0, 1);
        hits.hit(0, 1);
        hits.hit(5, 0);
        assert_eq!(hits.get(0, 1), 2);
        assert_eq!(hits.get(1, 0), 0);
        assert_eq!(hits.get(5, 0), 0);
    }
}
