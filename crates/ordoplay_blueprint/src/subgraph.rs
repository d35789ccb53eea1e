// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nesting of sub-graph hosts, for per-instance overrides.
//!
//! Entries are keyed by the full path of host ids from the top-level graph,
//! so one asset hosted at two places gets two independent entries.

use crate::blackboard::Blackboard;
use crate::id::{GraphAssetId, NodeId};
use crate::library::GraphLibrary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;
use uuid::Uuid;

/// One sub-graph host at one position in the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphEntry {
    /// Host node, as authored in its graph
    pub id: NodeId,
    /// Entry of the graph that contains the host; `None` at top level
    pub parent: Option<usize>,
    /// Hosted asset
    pub asset: Option<GraphAssetId>,
    /// Blackboard values applied on top of the asset's defaults
    pub overrides: Option<Blackboard>,
    children: Vec<usize>,
}

impl SubgraphEntry {
    /// Entries for hosts inside this entry's graph
    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

/// Forest of sub-graph hosts.
///
/// Each tree gets its own identity, clones included, so compiled results are
/// never shared between trees whose edit counters happen to agree.
#[derive(Debug)]
pub struct SubgraphTree {
    id: Uuid,
    entries: Vec<Option<SubgraphEntry>>,
    lookup: HashMap<(Option<usize>, NodeId), usize>,
    roots: Vec<usize>,
    allow_defragmentation: bool,
    pending_defragmentation: bool,
    version: u64,
}

impl Default for SubgraphTree {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: Vec::new(),
            lookup: HashMap::new(),
            roots: Vec::new(),
            allow_defragmentation: true,
            pending_defragmentation: false,
            version: 0,
        }
    }
}

impl Clone for SubgraphTree {
    fn clone(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: self.entries.clone(),
            lookup: self.lookup.clone(),
            roots: self.roots.clone(),
            allow_defragmentation: self.allow_defragmentation,
            pending_defragmentation: self.pending_defragmentation,
            version: self.version,
        }
    }
}

impl SubgraphTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of this tree instance
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Edit counter
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Whether the tree has no entries
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Number of backing slots, including holes left by removals
    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }

    /// Find or create the entry for `id` under `parent`.
    ///
    /// Returns `None` if `parent` is not a live entry.
    pub fn get_or_add_node(&mut self, id: NodeId, parent: Option<usize>) -> Option<usize> {
        if let Some(&index) = self.lookup.get(&(parent, id)) {
            return Some(index);
        }

        let index = self.entries.len();
        match parent {
            Some(parent) => self.entry_mut(parent)?.children.push(index),
            None => self.roots.push(index),
        }
        self.entries.push(Some(SubgraphEntry {
            id,
            parent,
            asset: None,
            overrides: None,
            children: Vec::new(),
        }));
        self.lookup.insert((parent, id), index);
        self.version += 1;
        trace!(host = %id, index, "Sub-graph entry added");
        Some(index)
    }

    /// Remove the entry for `id` under `parent`, with everything below it
    pub fn remove_node(&mut self, id: NodeId, parent: Option<usize>) -> bool {
        let Some(&index) = self.lookup.get(&(parent, id)) else {
            return false;
        };

        match parent {
            Some(parent) => {
                if let Some(entry) = self.entry_mut(parent) {
                    entry.children.retain(|&child| child != index);
                }
            }
            None => self.roots.retain(|&root| root != index),
        }
        self.remove_subtree(index);
        self.version += 1;

        if self.allow_defragmentation {
            self.defragment();
        } else {
            self.pending_defragmentation = true;
        }
        true
    }

    /// Remove every direct child of `parent` matching `predicate`.
    ///
    /// Returns the number of entries removed at that level.
    pub fn remove_node_if(
        &mut self,
        parent: Option<usize>,
        mut predicate: impl FnMut(&SubgraphEntry) -> bool,
    ) -> usize {
        let doomed: Vec<NodeId> = self
            .children(parent)
            .iter()
            .filter_map(|&index| self.entry(index))
            .filter(|entry| predicate(*entry))
            .map(|entry| entry.id)
            .collect();

        let batch = self.allow_defragmentation;
        self.allow_defragmentation = false;
        for &id in &doomed {
            self.remove_node(id, parent);
        }
        self.allow_defragmentation(batch);
        doomed.len()
    }

    fn remove_subtree(&mut self, index: usize) {
        let Some(entry) = self.entries.get_mut(index).and_then(Option::take) else {
            return;
        };
        self.lookup.remove(&(entry.parent, entry.id));
        for child in entry.children {
            self.remove_subtree(child);
        }
    }

    /// Index of the entry for `id` under `parent`
    pub fn find(&self, id: NodeId, parent: Option<usize>) -> Option<usize> {
        self.lookup.get(&(parent, id)).copied()
    }

    /// Index of the entry at the end of a host path
    pub fn find_path(&self, path: &[NodeId]) -> Option<usize> {
        path.iter()
            .try_fold(None, |parent, &id| self.find(id, parent).map(Some))
            .flatten()
    }

    /// Host path from the top-level graph down to an entry
    pub fn path(&self, index: usize) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = self.entry(index);
        while let Some(entry) = current {
            path.push(entry.id);
            current = entry.parent.and_then(|parent| self.entry(parent));
        }
        path.reverse();
        path
    }

    /// Get an entry
    pub fn entry(&self, index: usize) -> Option<&SubgraphEntry> {
        self.entries.get(index)?.as_ref()
    }

    fn entry_mut(&mut self, index: usize) -> Option<&mut SubgraphEntry> {
        self.entries.get_mut(index)?.as_mut()
    }

    /// Entries directly under `parent`
    pub fn children(&self, parent: Option<usize>) -> &[usize] {
        match parent {
            Some(parent) => self
                .entry(parent)
                .map(SubgraphEntry::children)
                .unwrap_or_default(),
            None => &self.roots,
        }
    }

    /// Set the hosted asset. A different asset drops the old overrides.
    pub fn set_asset(&mut self, index: usize, asset: Option<GraphAssetId>) -> bool {
        let Some(entry) = self.entry_mut(index) else {
            return false;
        };
        if entry.asset != asset {
            entry.asset = asset;
            entry.overrides = None;
            self.version += 1;
        }
        true
    }

    /// Set per-instance blackboard overrides
    pub fn set_overrides(&mut self, index: usize, overrides: Option<Blackboard>) -> bool {
        let Some(entry) = self.entry_mut(index) else {
            return false;
        };
        entry.overrides = overrides;
        self.version += 1;
        true
    }

    /// Enable or suspend compaction.
    ///
    /// While suspended, indices stay stable across removals. Re-enabling
    /// compacts once, which may renumber entries.
    pub fn allow_defragmentation(&mut self, allow: bool) {
        self.allow_defragmentation = allow;
        if allow && self.pending_defragmentation {
            self.defragment();
        }
    }

    fn defragment(&mut self) {
        self.pending_defragmentation = false;
        if self.entries.iter().all(Option::is_some) {
            return;
        }

        let mut remap = vec![None; self.entries.len()];
        let mut next = 0;
        for (old, entry) in self.entries.iter().enumerate() {
            if entry.is_some() {
                remap[old] = Some(next);
                next += 1;
            }
        }

        self.entries.retain(Option::is_some);
        for entry in self.entries.iter_mut().flatten() {
            entry.parent = entry.parent.and_then(|parent| remap[parent]);
            entry.children = entry
                .children
                .iter()
                .filter_map(|&child| remap[child])
                .collect();
        }
        self.roots = self.roots.iter().filter_map(|&root| remap[root]).collect();
        self.lookup = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                entry
                    .as_ref()
                    .map(|entry| ((entry.parent, entry.id), index))
            })
            .collect();
    }

    /// Rebuild the tree below the top-level graph `root` from the library.
    ///
    /// Entries whose host disappeared are removed; overrides of surviving
    /// entries are kept.
    pub fn sync(&mut self, library: &GraphLibrary, root: GraphAssetId) {
        self.allow_defragmentation(false);
        let mut stack = vec![root];
        self.sync_level(library, root, None, &mut stack);
        self.allow_defragmentation(true);
    }

    fn sync_level(
        &mut self,
        library: &GraphLibrary,
        asset: GraphAssetId,
        parent: Option<usize>,
        stack: &mut Vec<GraphAssetId>,
    ) {
        let hosts: Vec<(NodeId, GraphAssetId)> = library
            .graph(asset)
            .map(|meta| meta.subgraphs().collect())
            .unwrap_or_default();
        self.remove_node_if(parent, |entry| !hosts.iter().any(|(host, _)| *host == entry.id));

        for (host, child) in hosts {
            let Some(index) = self.get_or_add_node(host, parent) else {
                continue;
            };
            self.set_asset(index, Some(child));
            // Cycles are left for the compiler to report
            if stack.contains(&child) {
                continue;
            }
            stack.push(child);
            self.sync_level(library, child, Some(index), stack);
            stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Root, Subgraph};

    #[test]
    fn test_same_host_id_at_two_paths() {
        let mut tree = SubgraphTree::new();
        let host = NodeId::new(1, 1);
        let a = tree.get_or_add_node(NodeId::new(1, 2), None).unwrap();
        let b = tree.get_or_add_node(NodeId::new(1, 3), None).unwrap();

        let under_a = tree.get_or_add_node(host, Some(a)).unwrap();
        let under_b = tree.get_or_add_node(host, Some(b)).unwrap();
        assert_ne!(under_a, under_b);
        assert_eq!(tree.get_or_add_node(host, Some(a)), Some(under_a));

        tree.set_overrides(under_a, Some(Blackboard::new().with("speed", 2.0f32)));
        assert!(tree.entry(under_b).unwrap().overrides.is_none());
        assert_eq!(tree.path(under_b), vec![NodeId::new(1, 3), host]);
        assert_eq!(tree.find_path(&[NodeId::new(1, 2), host]), Some(under_a));
    }

    #[test]
    fn test_remove_is_recursive() {
        let mut tree = SubgraphTree::new();
        let top = tree.get_or_add_node(NodeId::new(1, 1), None).unwrap();
        let mid = tree.get_or_add_node(NodeId::new(2, 1), Some(top)).unwrap();
        tree.get_or_add_node(NodeId::new(3, 1), Some(mid)).unwrap();
        let other = tree.get_or_add_node(NodeId::new(1, 2), None).unwrap();
        assert_eq!(tree.len(), 4);

        assert!(tree.remove_node(NodeId::new(1, 1), None));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.slot_count(), 1);

        // Compaction renumbers, lookups stay correct
        assert_eq!(other, 3);
        let other = tree.find(NodeId::new(1, 2), None).unwrap();
        assert_eq!(other, 0);
        assert_eq!(tree.entry(other).unwrap().id, NodeId::new(1, 2));
        assert_eq!(tree.children(None), &[other]);
    }

    #[test]
    fn test_defragmentation_batching() {
        let mut tree = SubgraphTree::new();
        let ids: Vec<_> = (1..=4).map(|local| NodeId::new(1, local)).collect();
        for &id in &ids {
            tree.get_or_add_node(id, None);
        }

        tree.allow_defragmentation(false);
        assert!(tree.remove_node(ids[0], None));
        assert!(tree.remove_node(ids[2], None));
        assert_eq!(tree.slot_count(), 4);
        assert_eq!(tree.find(ids[3], None), Some(3));

        tree.allow_defragmentation(true);
        assert_eq!(tree.slot_count(), 2);
        assert_eq!(tree.find(ids[1], None), Some(0));
        assert_eq!(tree.find(ids[3], None), Some(1));
    }

    #[test]
    fn test_remove_node_if() {
        let mut tree = SubgraphTree::new();
        for local in 1..=5 {
            tree.get_or_add_node(NodeId::new(1, local), None);
        }
        let keep = [NodeId::new(1, 2), NodeId::new(1, 4)];

        let removed = tree.remove_node_if(None, |entry| !keep.contains(&entry.id));
        assert_eq!(removed, 3);
        let ids: Vec<_> = tree
            .children(None)
            .iter()
            .map(|&index| tree.entry(index).unwrap().id)
            .collect();
        assert_eq!(ids, keep);
    }

    #[test]
    fn test_sync_follows_library() {
        let mut library = GraphLibrary::new();
        let leaf = library.create_graph("Leaf");
        library
            .graph_mut(leaf)
            .unwrap()
            .add_node(Root::new().with_enter("Run"))
            .unwrap();
        let main = library.create_graph("Main");
        let first = library.graph_mut(main).unwrap().add_node(Subgraph::default()).unwrap();
        let second = library.graph_mut(main).unwrap().add_node(Subgraph::default()).unwrap();
        library.assign_subgraph(main, first, Some(leaf)).unwrap();
        library.assign_subgraph(main, second, Some(leaf)).unwrap();

        let mut tree = SubgraphTree::new();
        tree.sync(&library, main);
        assert_eq!(tree.len(), 2);
        let index = tree.find(second, None).unwrap();
        tree.set_overrides(index, Some(Blackboard::new().with("name", "kept")));

        library.assign_subgraph(main, first, None).unwrap();
        tree.sync(&library, main);
        assert_eq!(tree.len(), 1);
        let index = tree.find(second, None).unwrap();
        assert_eq!(tree.entry(index).unwrap().asset, Some(leaf));
        assert!(tree.entry(index).unwrap().overrides.is_some());
    }
}
