//! Hierarchies of statistic factories and providers
//!
//! A node's parent is the most specific registered node whose id is a
//! hierarchical prefix of its own id. Factories use dotted ids
//! (`ejb.call.count` under `ejb.call`), providers use slashed ids
//! (`server/container/bean` under `server/container`).
//!
//! A node in [`NodeMode::Inherit`] takes its parent's effective state; the
//! implicit root is enabled unless configured otherwise. Every mutation
//! returns the ids whose effective state was re-evaluated so the caller can
//! refresh what depends on them.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Statistics failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatisticError {
    /// Id already registered
    #[error("{kind} '{id}' is already registered")]
    Duplicate {
        /// Tree kind (factory or provider)
        kind: &'static str,
        /// Node id
        id: String,
    },

    /// Id not registered
    #[error("{kind} '{id}' is not registered")]
    Unknown {
        /// Tree kind (factory or provider)
        kind: &'static str,
        /// Node id
        id: String,
    },

    /// No statistic for the pair
    #[error("No statistic for factory '{factory}' and provider '{provider}'")]
    UnknownStatistic {
        /// Factory id
        factory: String,
        /// Provider id
        provider: String,
    },

    /// Id is empty or malformed
    #[error("Invalid id '{0}'")]
    InvalidId(String),
}

/// How ancestors are recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRule {
    /// `p` is an ancestor of `id` iff `id` starts with `p + "."`
    DotSuffix,
    /// `p` is an ancestor of `id` iff `id` starts with `p + "/"`
    SlashPrefix,
}

impl ParentRule {
    /// Separator character
    pub fn separator(self) -> char {
        match self {
            ParentRule::DotSuffix => '.',
            ParentRule::SlashPrefix => '/',
        }
    }

    /// Whether `candidate` is an ancestor of `id`
    pub fn is_ancestor(self, candidate: &str, id: &str) -> bool {
        id.len() > candidate.len()
            && id.starts_with(candidate)
            && id[candidate.len()..].starts_with(self.separator())
    }
}

/// State of a factory or provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    /// Follow the parent
    #[default]
    Inherit,
    /// Fixed state
    Manual(bool),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<String>,
    children: BTreeSet<String>,
    mode: NodeMode,
    effective: bool,
}

/// One hierarchy
#[derive(Debug, Clone)]
pub struct HierarchyTree {
    kind: &'static str,
    rule: ParentRule,
    root_enabled: bool,
    nodes: BTreeMap<String, Node>,
    roots: BTreeSet<String>,
}

impl HierarchyTree {
    /// Create an empty tree
    pub fn new(kind: &'static str, rule: ParentRule, root_enabled: bool) -> Self {
        Self {
            kind,
            rule,
            root_enabled,
            nodes: BTreeMap::new(),
            roots: BTreeSet::new(),
        }
    }

    /// Parent rule
    pub fn rule(&self) -> ParentRule {
        self.rule
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Registered ids in order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Parent of `id` (none for top-level nodes)
    pub fn parent(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).and_then(|n| n.parent.as_deref())
    }

    /// Children of `id`
    pub fn children(&self, id: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `id` and all its ancestors, nearest first
    pub fn lineage(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(id).map(|_| id.to_string());
        while let Some(node_id) = current {
            current = self.parent(&node_id).map(str::to_string);
            out.push(node_id);
        }
        out
    }

    /// Mode of `id`
    pub fn mode(&self, id: &str) -> Option<NodeMode> {
        self.nodes.get(id).map(|n| n.mode)
    }

    /// Effective state of `id`
    pub fn effective(&self, id: &str) -> Option<bool> {
        self.nodes.get(id).map(|n| n.effective)
    }

    /// Effective state of the implicit root
    pub fn root_enabled(&self) -> bool {
        self.root_enabled
    }

    fn unknown(&self, id: &str) -> StatisticError {
        StatisticError::Unknown {
            kind: self.kind,
            id: id.to_string(),
        }
    }

    fn most_specific_ancestor(&self, id: &str) -> Option<String> {
        self.nodes
            .keys()
            .filter(|candidate| self.rule.is_ancestor(candidate, id))
            .max_by_key(|candidate| candidate.len())
            .cloned()
    }

    fn attach(&mut self, id: &str, parent: Option<String>) {
        match &parent {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(p) {
                    node.children.insert(id.to_string());
                }
            }
            None => {
                self.roots.insert(id.to_string());
            }
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = parent;
        }
    }

    fn detach(&mut self, id: &str) {
        let parent = self.nodes.get(id).and_then(|n| n.parent.clone());
        match parent {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.children.remove(id);
                }
            }
            None => {
                self.roots.remove(id);
            }
        }
    }

    /// Register `id`
    ///
    /// Existing nodes for which `id` becomes the most specific ancestor are
    /// adopted. Returns the re-evaluated ids.
    pub fn add(&mut self, id: &str, mode: NodeMode) -> Result<Vec<String>, StatisticError> {
        let sep = self.rule.separator();
        if id.is_empty() || id.starts_with(sep) || id.ends_with(sep) {
            return Err(StatisticError::InvalidId(id.to_string()));
        }
        if self.nodes.contains_key(id) {
            return Err(StatisticError::Duplicate {
                kind: self.kind,
                id: id.to_string(),
            });
        }

        let parent = self.most_specific_ancestor(id);
        self.nodes.insert(
            id.to_string(),
            Node {
                parent: None,
                children: BTreeSet::new(),
                mode,
                effective: self.root_enabled,
            },
        );
        self.attach(id, parent.clone());

        let adopted: Vec<String> = self
            .nodes
            .iter()
            .filter(|(other, node)| {
                other.as_str() != id
                    && self.rule.is_ancestor(id, other)
                    && node.parent == parent
            })
            .map(|(other, _)| other.clone())
            .collect();
        for child in &adopted {
            self.detach(child);
            self.attach(child, Some(id.to_string()));
        }

        let mut updated = Vec::new();
        self.update(id, &mut updated);
        Ok(updated)
    }

    /// Unregister `id`, re-parenting its children to its parent
    ///
    /// Returns the re-evaluated ids.
    pub fn remove(&mut self, id: &str) -> Result<Vec<String>, StatisticError> {
        let node = self.nodes.get(id).cloned().ok_or_else(|| self.unknown(id))?;
        self.detach(id);
        self.nodes.remove(id);

        let mut updated = Vec::new();
        for child in &node.children {
            self.attach(child, node.parent.clone());
            self.update(child, &mut updated);
        }
        Ok(updated)
    }

    /// Change the mode of `id`; returns the re-evaluated ids
    pub fn set_mode(&mut self, id: &str, mode: NodeMode) -> Result<Vec<String>, StatisticError> {
        let node = self.nodes.get_mut(id).ok_or_else(|| StatisticError::Unknown {
            kind: self.kind,
            id: id.to_string(),
        })?;
        node.mode = mode;
        let mut updated = Vec::new();
        self.update(id, &mut updated);
        Ok(updated)
    }

    /// Change the root state; returns the re-evaluated ids
    pub fn set_root_enabled(&mut self, enabled: bool) -> Vec<String> {
        self.root_enabled = enabled;
        let mut updated = Vec::new();
        let roots: Vec<String> = self.roots.iter().cloned().collect();
        for root in roots {
            self.update(&root, &mut updated);
        }
        updated
    }

    /// Re-evaluate `id` and propagate to inheriting descendants
    fn update(&mut self, id: &str, updated: &mut Vec<String>) {
        let parent_effective = self
            .parent(id)
            .and_then(|p| self.effective(p))
            .unwrap_or(self.root_enabled);
        let children = match self.nodes.get_mut(id) {
            Some(node) => {
                node.effective = match node.mode {
                    NodeMode::Manual(value) => value,
                    NodeMode::Inherit => parent_effective,
                };
                node.children.iter().cloned().collect::<Vec<_>>()
            }
            None => return,
        };
        updated.push(id.to_string());
        for child in children {
            if self.mode(&child) == Some(NodeMode::Inherit) {
                self.update(&child, updated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factories() -> HierarchyTree {
        HierarchyTree::new("factory", ParentRule::DotSuffix, true)
    }

    #[test]
    fn test_parent_rules_are_distinct() {
        assert!(ParentRule::DotSuffix.is_ancestor("ejb", "ejb.call"));
        assert!(!ParentRule::DotSuffix.is_ancestor("ejb", "ejbx.call"));
        assert!(!ParentRule::DotSuffix.is_ancestor("ejb", "ejb/call"));
        assert!(ParentRule::SlashPrefix.is_ancestor("srv", "srv/c1"));
        assert!(!ParentRule::SlashPrefix.is_ancestor("srv", "srv.c1"));
        assert!(!ParentRule::SlashPrefix.is_ancestor("srv/c1", "srv/c1"));
    }

    #[test]
    fn test_most_specific_parent() {
        let mut tree = factories();
        tree.add("ejb", NodeMode::Inherit).unwrap();
        tree.add("ejb.call", NodeMode::Inherit).unwrap();
        tree.add("ejb.call.count", NodeMode::Inherit).unwrap();
        assert_eq!(tree.parent("ejb.call.count"), Some("ejb.call"));
        assert_eq!(tree.parent("ejb"), None);
    }

    #[test]
    fn test_adoption_of_existing_nodes() {
        let mut tree = factories();
        tree.add("ejb", NodeMode::Inherit).unwrap();
        tree.add("ejb.call.count", NodeMode::Inherit).unwrap();
        assert_eq!(tree.parent("ejb.call.count"), Some("ejb"));
        tree.add("ejb.call", NodeMode::Manual(false)).unwrap();
        assert_eq!(tree.parent("ejb.call.count"), Some("ejb.call"));
        assert_eq!(tree.effective("ejb.call.count"), Some(false));
        assert_eq!(tree.children("ejb"), vec!["ejb.call".to_string()]);
    }

    #[test]
    fn test_manual_override_and_propagation() {
        let mut tree = factories();
        tree.add("ejb", NodeMode::Inherit).unwrap();
        tree.add("ejb.call", NodeMode::Inherit).unwrap();
        tree.add("ejb.call.count", NodeMode::Manual(true)).unwrap();

        let updated = tree.set_mode("ejb", NodeMode::Manual(false)).unwrap();
        assert_eq!(tree.effective("ejb.call"), Some(false));
        assert_eq!(tree.effective("ejb.call.count"), Some(true));
        assert!(updated.contains(&"ejb.call".to_string()));
        assert!(!updated.contains(&"ejb.call.count".to_string()));
    }

    #[test]
    fn test_remove_reparents_children() {
        let mut tree = factories();
        tree.add("ejb", NodeMode::Manual(false)).unwrap();
        tree.add("ejb.call", NodeMode::Manual(true)).unwrap();
        tree.add("ejb.call.count", NodeMode::Inherit).unwrap();
        assert_eq!(tree.effective("ejb.call.count"), Some(true));

        tree.remove("ejb.call").unwrap();
        assert_eq!(tree.parent("ejb.call.count"), Some("ejb"));
        assert_eq!(tree.effective("ejb.call.count"), Some(false));

        tree.remove("ejb").unwrap();
        assert_eq!(tree.parent("ejb.call.count"), None);
        assert_eq!(tree.effective("ejb.call.count"), Some(true));
    }

    #[test]
    fn test_root_state() {
        let mut tree = HierarchyTree::new("provider", ParentRule::SlashPrefix, false);
        tree.add("srv", NodeMode::Inherit).unwrap();
        tree.add("srv/c1", NodeMode::Inherit).unwrap();
        assert_eq!(tree.effective("srv/c1"), Some(false));
        tree.set_root_enabled(true);
        assert_eq!(tree.effective("srv/c1"), Some(true));
    }

    #[test]
    fn test_duplicates_and_invalid_ids() {
        let mut tree = factories();
        tree.add("ejb", NodeMode::Inherit).unwrap();
        assert!(matches!(
            tree.add("ejb", NodeMode::Inherit),
            Err(StatisticError::Duplicate { .. })
        ));
        assert!(matches!(tree.add("", NodeMode::Inherit), Err(StatisticError::InvalidId(_))));
        assert!(matches!(tree.add("a.", NodeMode::Inherit), Err(StatisticError::InvalidId(_))));
        assert!(matches!(tree.remove("nope"), Err(StatisticError::Unknown { .. })));
    }
}
