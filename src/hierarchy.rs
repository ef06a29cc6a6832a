//! Registry Hierarchy
//!
//! Registries form a DAG stored in a petgraph `DiGraph`, with edges pointing
//! from parent to child. The effective tag table of a registry is the union of
//! the own tables of every node reachable from it, so a variant bound to a
//! child is visible through all of its ancestors.
//!
//! Cycles and cross-branch tag collisions are rejected when an edge is added,
//! which keeps every query-time aggregation well defined.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::table::TagTable;
use crate::variant::VariantKey;

/// Opaque, stable identity of a declared registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryId {
    universe: u32,
    index: u32,
}

impl RegistryId {
    pub(crate) fn new(universe: u32, index: u32) -> Self {
        Self { universe, index }
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry#{}.{}", self.universe, self.index)
    }
}

/// A declared registry: discriminator field plus the tags it owns directly
#[derive(Debug)]
pub(crate) struct RegistryNode {
    pub name: String,
    pub tag_field: String,
    pub table: TagTable,
}

/// One row of an effective tag table
#[derive(Debug, Clone, Copy)]
pub(crate) struct EffectiveEntry {
    pub key: VariantKey,
    /// Most specific registry the entry was bound on
    pub owner: NodeIndex,
}

pub(crate) type EffectiveEntries = BTreeMap<String, EffectiveEntry>;

#[derive(Debug)]
pub(crate) struct RegistryGraph {
    universe: u32,
    graph: DiGraph<RegistryNode, ()>,
}

impl RegistryGraph {
    pub fn new(universe: u32) -> Self {
        Self {
            universe,
            graph: DiGraph::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Map an identity to its node, rejecting identities from other universes
    pub fn index(&self, id: RegistryId) -> Result<NodeIndex> {
        let idx = NodeIndex::new(id.index as usize);
        if id.universe != self.universe || self.graph.node_weight(idx).is_none() {
            return Err(RegistryError::UnknownRegistry(id));
        }
        Ok(idx)
    }

    pub fn indices(&self, ids: &[RegistryId]) -> Result<Vec<NodeIndex>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let idx = self.index(*id)?;
            if !out.contains(&idx) {
                out.push(idx);
            }
        }
        Ok(out)
    }

    pub fn id(&self, idx: NodeIndex) -> RegistryId {
        RegistryId::new(self.universe, idx.index() as u32)
    }

    pub fn node(&self, idx: NodeIndex) -> &RegistryNode {
        &self.graph[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut RegistryNode {
        &mut self.graph[idx]
    }

    pub fn name(&self, idx: NodeIndex) -> String {
        self.graph[idx].name.clone()
    }

    pub fn add_root(&mut self, name: &str, tag_field: &str) -> NodeIndex {
        self.graph.add_node(RegistryNode {
            name: name.to_string(),
            tag_field: tag_field.to_string(),
            table: TagTable::new(),
        })
    }

    /// Add a fresh registry beneath every parent. It inherits their discriminator field.
    pub fn add_derived(&mut self, name: &str, parents: &[NodeIndex]) -> Result<NodeIndex> {
        let tag_field = self.common_tag_field(name, parents)?;
        let child = self.add_root(name, &tag_field);
        for &parent in parents {
            self.graph.update_edge(parent, child, ());
        }
        Ok(child)
    }

    /// Place an existing registry beneath additional parents.
    ///
    /// Fails without touching the graph if a parent is the child itself or one
    /// of its descendants, if discriminator fields differ, or if any ancestor
    /// would end up aggregating two different types under one tag.
    pub fn link(&mut self, child: NodeIndex, parents: &[NodeIndex]) -> Result<()> {
        let child_field = self.graph[child].tag_field.clone();

        for &parent in parents {
            if parent == child || has_path_connecting(&self.graph, child, parent, None) {
                return Err(RegistryError::CyclicHierarchy {
                    registry: self.name(child),
                    parent: self.name(parent),
                });
            }
            let parent_field = &self.graph[parent].tag_field;
            if *parent_field != child_field {
                return Err(RegistryError::Configuration(format!(
                    "registry {} uses discriminator '{}' but parent {} uses '{}'",
                    self.graph[child].name, child_field, self.graph[parent].name, parent_field
                )));
            }
        }

        let mut added = Vec::new();
        for &parent in parents {
            if self.graph.find_edge(parent, child).is_none() {
                added.push(self.graph.add_edge(parent, child, ()));
            }
        }

        // Only ancestors of the child gained new descendants
        let collision = self
            .ancestors(&[child])
            .into_iter()
            .find_map(|idx| self.effective(idx).err());

        if let Some(err) = collision {
            debug!(registry = %self.graph[child].name, error = %err, "rolling back link");
            // Newest edge first: removal then never reindexes another added edge
            for edge in added.into_iter().rev() {
                self.graph.remove_edge(edge);
            }
            return Err(err);
        }

        Ok(())
    }

    pub fn parents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut parents: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        parents.sort();
        parents
    }

    pub fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut children: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        children.sort();
        children
    }

    /// Every registry that aggregates over any of `starts`, the starts included
    pub fn ancestors(&self, starts: &[NodeIndex]) -> Vec<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for &start in starts {
            let mut dfs = Dfs::new(reversed, start);
            while let Some(node) = dfs.next(reversed) {
                if seen.insert(node) {
                    out.push(node);
                }
            }
        }
        out
    }

    /// Depth-first union of the own tables of `idx` and all its descendants
    pub fn effective(&self, idx: NodeIndex) -> Result<EffectiveEntries> {
        let mut entries = EffectiveEntries::new();
        let mut dfs = Dfs::new(&self.graph, idx);
        while let Some(node) = dfs.next(&self.graph) {
            for (tag, key) in self.graph[node].table.iter() {
                match entries.get(tag) {
                    Some(existing) if existing.key != key => {
                        return Err(RegistryError::DuplicateTag {
                            tag: tag.to_string(),
                            registry: self.name(node),
                            existing: existing.key.type_name,
                        });
                    }
                    Some(_) => {}
                    None => {
                        entries.insert(tag.to_string(), EffectiveEntry { key, owner: node });
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Check that binding `key` under `tag` to every target keeps all
    /// affected effective tables collision free.
    pub fn check_tag_free(&self, tag: &str, key: VariantKey, targets: &[NodeIndex]) -> Result<()> {
        for &target in targets {
            if let Some(existing) = self.graph[target].table.get(tag) {
                return Err(RegistryError::DuplicateTag {
                    tag: tag.to_string(),
                    registry: self.name(target),
                    existing: existing.type_name,
                });
            }
        }

        for idx in self.ancestors(targets) {
            let entries = self.effective(idx)?;
            if let Some(entry) = entries.get(tag) {
                if entry.key != key {
                    return Err(RegistryError::DuplicateTag {
                        tag: tag.to_string(),
                        registry: self.name(entry.owner),
                        existing: entry.key.type_name,
                    });
                }
            }
        }

        Ok(())
    }

    /// The discriminator field shared by all `nodes`
    pub fn common_tag_field(&self, name: &str, nodes: &[NodeIndex]) -> Result<String> {
        let Some((&first, rest)) = nodes.split_first() else {
            return Err(RegistryError::Configuration(format!(
                "registry {name} must have at least one parent"
            )));
        };
        let field = &self.graph[first].tag_field;
        for &other in rest {
            let other_field = &self.graph[other].tag_field;
            if other_field != field {
                return Err(RegistryError::Configuration(format!(
                    "registries for {} disagree on discriminator field: {} uses '{}', {} uses '{}'",
                    name, self.graph[first].name, field, self.graph[other].name, other_field
                )));
            }
        }
        Ok(field.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct C;

    fn bind(graph: &mut RegistryGraph, idx: NodeIndex, tag: &str, key: VariantKey) {
        graph.node_mut(idx).table.insert(tag, key).unwrap();
    }

    fn tags(graph: &RegistryGraph, idx: NodeIndex) -> Vec<String> {
        graph.effective(idx).unwrap().into_keys().collect()
    }

    #[test]
    fn test_foreign_identity_rejected() {
        let mut graph = RegistryGraph::new(1);
        let root = graph.add_root("Root", "_type_tag");
        assert_eq!(graph.index(graph.id(root)).unwrap(), root);

        let foreign = RegistryId::new(2, 0);
        assert!(matches!(
            graph.index(foreign),
            Err(RegistryError::UnknownRegistry(id)) if id == foreign
        ));
        let missing = RegistryId::new(1, 5);
        assert!(graph.index(missing).is_err());
    }

    #[test]
    fn test_child_entries_visible_through_ancestors() {
        let mut graph = RegistryGraph::new(1);
        let root = graph.add_root("Root", "_type_tag");
        let mid = graph.add_derived("Mid", &[root]).unwrap();
        let leaf = graph.add_derived("Leaf", &[mid]).unwrap();

        bind(&mut graph, root, "a", VariantKey::of::<A>());
        bind(&mut graph, leaf, "c", VariantKey::of::<C>());

        assert_eq!(tags(&graph, root), vec!["a", "c"]);
        assert_eq!(tags(&graph, mid), vec!["c"]);
        assert_eq!(tags(&graph, leaf), vec!["c"]);
        assert_eq!(graph.effective(root).unwrap()["c"].owner, leaf);
    }

    #[test]
    fn test_diamond_aggregates_once() {
        let mut graph = RegistryGraph::new(1);
        let root = graph.add_root("Root", "_type_tag");
        let left = graph.add_derived("Left", &[root]).unwrap();
        let right = graph.add_derived("Right", &[root]).unwrap();
        let bottom = graph.add_derived("Bottom", &[left, right]).unwrap();

        bind(&mut graph, bottom, "b", VariantKey::of::<B>());
        assert_eq!(tags(&graph, root), vec!["b"]);
        assert_eq!(graph.parents(bottom), vec![left, right]);
        assert_eq!(graph.children(root), vec![left, right]);

        let ancestors: HashSet<_> = graph.ancestors(&[bottom]).into_iter().collect();
        assert_eq!(ancestors, HashSet::from([bottom, left, right, root]));
    }

    #[test]
    fn test_same_type_same_tag_in_siblings_is_not_a_collision() {
        let mut graph = RegistryGraph::new(1);
        let root = graph.add_root("Root", "_type_tag");
        let left = graph.add_derived("Left", &[root]).unwrap();
        let right = graph.add_derived("Right", &[root]).unwrap();

        bind(&mut graph, left, "a", VariantKey::of::<A>());
        graph
            .check_tag_free("a", VariantKey::of::<A>(), &[right])
            .unwrap();
        let err = graph
            .check_tag_free("a", VariantKey::of::<B>(), &[right])
            .unwrap_err();
        match err {
            RegistryError::DuplicateTag { registry, existing, .. } => {
                assert_eq!(registry, "Left");
                assert!(existing.ends_with("A"));
            }
            other => panic!("Expected DuplicateTag, got {:?}", other),
        }
    }

    #[test]
    fn test_check_tag_free_rejects_own_rebind() {
        let mut graph = RegistryGraph::new(1);
        let root = graph.add_root("Root", "_type_tag");
        bind(&mut graph, root, "a", VariantKey::of::<A>());

        let err = graph
            .check_tag_free("a", VariantKey::of::<A>(), &[root])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTag { .. }));
    }

    #[test]
    fn test_link_rejects_cycles() {
        let mut graph = RegistryGraph::new(1);
        let root = graph.add_root("Root", "_type_tag");
        let child = graph.add_derived("Child", &[root]).unwrap();
        let grandchild = graph.add_derived("Grandchild", &[child]).unwrap();

        let err = graph.link(root, &[grandchild]).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicHierarchy { .. }));
        let err = graph.link(root, &[root]).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicHierarchy { .. }));
        assert!(graph.parents(root).is_empty());
    }

    #[test]
    fn test_link_detects_cross_branch_collision_and_rolls_back() {
        let mut graph = RegistryGraph::new(1);
        let left = graph.add_root("Left", "_type_tag");
        let right = graph.add_root("Right", "_type_tag");
        let common = graph.add_root("Common", "_type_tag");
        bind(&mut graph, left, "x", VariantKey::of::<A>());
        bind(&mut graph, right, "x", VariantKey::of::<B>());

        graph.link(left, &[common]).unwrap();
        let err = graph.link(right, &[common]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTag { ref tag, .. } if tag == "x"));

        assert!(graph.parents(right).is_empty());
        assert_eq!(graph.parents(left), vec![common]);
        assert_eq!(tags(&graph, common), vec!["x"]);
    }

    #[test]
    fn test_link_requires_matching_fields() {
        let mut graph = RegistryGraph::new(1);
        let plain = graph.add_root("Plain", "_type_tag");
        let kinded = graph.add_root("Kinded", "kind");

        assert!(matches!(
            graph.link(plain, &[kinded]),
            Err(RegistryError::Configuration(_))
        ));
        assert!(matches!(
            graph.add_derived("Both", &[plain, kinded]),
            Err(RegistryError::Configuration(_))
        ));
        assert!(matches!(
            graph.add_derived("Orphan", &[]),
            Err(RegistryError::Configuration(_))
        ));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_derived_inherits_field() {
        let mut graph = RegistryGraph::new(1);
        let root = graph.add_root("Root", "kind");
        let child = graph.add_derived("Child", &[root, root]).unwrap();
        assert_eq!(graph.node(child).tag_field, "kind");
        assert_eq!(graph.parents(child), vec![root]);
    }
}
