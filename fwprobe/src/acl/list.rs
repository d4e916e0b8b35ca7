use match_core::Direction;
use serde::Serialize;

use super::entry::AccessListEntry;

/// An ordered rule list. Sealing appends the implicit deny exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessList {
    name: String,
    entries: Vec<AccessListEntry>,
}

impl AccessList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[AccessListEntry] {
        &self.entries
    }

    pub fn is_sealed(&self) -> bool {
        self.entries.last().is_some_and(|entry| entry.implicit)
    }

    /// Appends an entry in front of the implicit deny, if already sealed.
    pub fn push(&mut self, entry: AccessListEntry) {
        if self.is_sealed() {
            let at = self.entries.len() - 1;
            self.entries.insert(at, entry);
        } else {
            self.entries.push(entry);
        }
    }

    pub fn seal(&mut self) {
        if !self.is_sealed() {
            self.entries.push(AccessListEntry::implicit_deny(&self.name));
        }
    }

    /// Entries that take part in matching.
    pub fn active_entries(&self) -> impl Iterator<Item = (usize, &AccessListEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.remark && !entry.inactive)
    }
}

/// Binding of a list to an interface and direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessGroup {
    pub list: String,
    pub iface: String,
    pub direction: Direction,
}
