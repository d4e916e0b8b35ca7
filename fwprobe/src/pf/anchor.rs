//! The anchor tree.
//!
//! Anchors are stored in an arena; the root (id 0) is named `/` and has an
//! empty path. Paths follow pf conventions: a leading `/` starts at the
//! root, `..` climbs to the parent, `*` stands for every child in
//! alphabetical order and repeated separators are ignored.

use std::collections::{BTreeMap, HashMap};

use match_core::EvalError;
use serde::Serialize;

use super::host::Table;
use super::rule::PfGenericRule;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AnchorId(usize);

impl AnchorId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Anchor {
    name: String,
    parent: Option<AnchorId>,
    children: BTreeMap<String, AnchorId>,
    rules: Vec<PfGenericRule>,
    tables: HashMap<String, Table>,
}

impl Anchor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<AnchorId> {
        self.parent
    }

    pub fn rules(&self) -> &[PfGenericRule] {
        &self.rules
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

#[derive(Debug, Clone)]
pub struct AnchorTree {
    nodes: Vec<Anchor>,
}

impl Default for AnchorTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Anchor {
                name: "/".to_string(),
                ..Anchor::default()
            }],
        }
    }

    pub fn root(&self) -> AnchorId {
        AnchorId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = AnchorId> {
        (0..self.nodes.len()).map(AnchorId)
    }

    pub fn get(&self, id: AnchorId) -> Result<&Anchor, EvalError> {
        self.nodes.get(id.0).ok_or(EvalError::DanglingId {
            arena: "anchor",
            id: id.0,
        })
    }

    fn node(&self, id: AnchorId) -> Option<&Anchor> {
        self.nodes.get(id.0)
    }

    /// `""` for the root, `/a/b` otherwise.
    pub fn path(&self, id: AnchorId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(at) = current {
            let Some(node) = self.node(at) else { break };
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            current = node.parent;
        }
        names.iter().rev().map(|name| format!("/{name}")).collect()
    }

    /// Resolves `path` relative to `from`.
    ///
    /// `None` means the path is invalid (`..` above the root, `*` followed by
    /// more segments); an empty list means nothing by that name exists.
    pub fn find_anchors(&self, from: AnchorId, path: &str) -> Option<Vec<AnchorId>> {
        if let Some(rest) = path.strip_prefix('/') {
            return self.find_anchors(self.root(), rest.trim_start_matches('/'));
        }
        let (head, rest) = split_segment(path);
        let node = self.node(from)?;
        match head {
            "" => Some(vec![from]),
            ".." => {
                let parent = node.parent?;
                self.find_anchors(parent, rest)
            }
            "*" => {
                if !rest.is_empty() {
                    return None;
                }
                Some(node.children.values().copied().collect())
            }
            name => match node.children.get(name) {
                None => Some(Vec::new()),
                Some(child) => self.find_anchors(*child, rest),
            },
        }
    }

    /// Resolves `path` relative to `from`, creating missing anchors.
    /// A trailing `*` is ignored; `..` above the root yields `None`.
    pub fn find_or_create(&mut self, from: AnchorId, path: &str) -> Option<AnchorId> {
        let path = path.strip_suffix('*').unwrap_or(path);
        if let Some(rest) = path.strip_prefix('/') {
            let root = self.root();
            return self.find_or_create(root, rest.trim_start_matches('/'));
        }
        let (head, rest) = split_segment(path);
        self.node(from)?;
        match head {
            "" => Some(from),
            ".." => {
                let parent = self.nodes[from.0].parent?;
                self.find_or_create(parent, rest)
            }
            name => {
                let child = match self.nodes[from.0].children.get(name) {
                    Some(child) => *child,
                    None => {
                        let child = AnchorId(self.nodes.len());
                        self.nodes.push(Anchor {
                            name: name.to_string(),
                            parent: Some(from),
                            ..Anchor::default()
                        });
                        self.nodes[from.0].children.insert(name.to_string(), child);
                        child
                    }
                };
                self.find_or_create(child, rest)
            }
        }
    }

    pub fn push_rule(&mut self, anchor: AnchorId, rule: PfGenericRule) -> Result<(), ConfigError> {
        let path = self.path(anchor);
        let node = self
            .nodes
            .get_mut(anchor.0)
            .ok_or(ConfigError::AnchorPath(path))?;
        node.rules.push(rule);
        Ok(())
    }

    pub fn add_table(&mut self, anchor: AnchorId, table: Table) -> Result<(), ConfigError> {
        let path = self.path(anchor);
        let node = self
            .nodes
            .get_mut(anchor.0)
            .ok_or_else(|| ConfigError::AnchorPath(path.clone()))?;
        if node.tables.contains_key(&table.name) {
            return Err(ConfigError::Duplicate {
                kind: "table",
                name: format!("{path}/<{}>", table.name),
            });
        }
        node.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Table lookup: the anchor's own tables, then the root's.
    pub fn find_table(&self, from: AnchorId, name: &str) -> Option<&Table> {
        self.resolve_table(from, name).map(|(_, table)| table)
    }

    /// Like [`find_table`](Self::find_table), also naming the owning anchor.
    pub fn resolve_table(&self, from: AnchorId, name: &str) -> Option<(AnchorId, &Table)> {
        if let Some(table) = self.node(from).and_then(|node| node.tables.get(name)) {
            return Some((from, table));
        }
        let root = self.root();
        self.node(root)
            .and_then(|node| node.tables.get(name))
            .map(|table| (root, table))
    }
}

fn split_segment(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((head, rest)) => (head, rest.trim_start_matches('/')),
        None => (path, ""),
    }
}
