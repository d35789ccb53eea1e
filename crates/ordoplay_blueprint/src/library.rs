// SPDX-License-Identifier: MIT OR Apache-2.0
//! The set of graph assets a blueprint can be compiled from.

use crate::id::{GraphAssetId, NodeId};
use crate::meta::{GraphMeta, MetaError};
use crate::nodes::Subgraph;
use crate::port::Port;
use indexmap::IndexMap;
use tracing::debug;

/// Error when editing the library
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LibraryError {
    /// No graph with this id
    #[error("Unknown graph: {0}")]
    UnknownGraph(GraphAssetId),

    /// Graph edit failed
    #[error(transparent)]
    Meta(#[from] MetaError),
}

/// Owns graph assets and hands out unique node store ids
#[derive(Debug, Clone)]
pub struct GraphLibrary {
    graphs: IndexMap<GraphAssetId, GraphMeta>,
    next_store: u32,
}

impl Default for GraphLibrary {
    fn default() -> Self {
        Self {
            graphs: IndexMap::new(),
            // Store 0 holds compiled templates
            next_store: 1,
        }
    }
}

impl GraphLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph with its own node store
    pub fn create_graph(&mut self, name: impl Into<String>) -> GraphAssetId {
        let meta = GraphMeta::with_store(name, self.next_store);
        self.next_store += 1;
        self.insert(meta)
    }

    /// Add an existing graph.
    ///
    /// The graph keeps its store id; graphs built elsewhere should use distinct
    /// stores so their node ids do not collide.
    pub fn insert(&mut self, meta: GraphMeta) -> GraphAssetId {
        let id = meta.id();
        self.next_store = self.next_store.max(meta.store().store_id() + 1);
        self.graphs.insert(id, meta);
        id
    }

    /// Remove a graph
    pub fn remove(&mut self, id: GraphAssetId) -> Option<GraphMeta> {
        self.graphs.shift_remove(&id)
    }

    /// Get a graph
    pub fn graph(&self, id: GraphAssetId) -> Option<&GraphMeta> {
        self.graphs.get(&id)
    }

    /// Get a graph mutably
    pub fn graph_mut(&mut self, id: GraphAssetId) -> Option<&mut GraphMeta> {
        self.graphs.get_mut(&id)
    }

    /// Whether a graph is in the library
    pub fn contains(&self, id: GraphAssetId) -> bool {
        self.graphs.contains_key(&id)
    }

    /// All graphs, in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (GraphAssetId, &GraphMeta)> {
        self.graphs.iter().map(|(id, meta)| (*id, meta))
    }

    /// Number of graphs
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Make a [`Subgraph`] node host `asset`, or nothing.
    ///
    /// The host's ports are rebuilt from the asset's signature and links that no
    /// longer fit are dropped.
    pub fn assign_subgraph(
        &mut self,
        graph: GraphAssetId,
        host: NodeId,
        asset: Option<GraphAssetId>,
    ) -> Result<(), LibraryError> {
        let ports = match asset {
            Some(asset) => self
                .graphs
                .get(&asset)
                .ok_or(LibraryError::UnknownGraph(asset))?
                .signature()
                .host_ports(),
            None => Vec::new(),
        };

        let meta = self
            .graphs
            .get_mut(&graph)
            .ok_or(LibraryError::UnknownGraph(graph))?;
        meta.node_mut::<Subgraph>(host)?.bind(asset, ports);
        match asset {
            Some(asset) => meta.set_subgraph(host, asset)?,
            None => {
                meta.clear_subgraph(host);
            }
        }
        meta.invalidate_node(host, true)?;
        debug!(graph = %meta.name, host = %host, "Sub-graph assigned");
        Ok(())
    }

    /// Rebind every host of `asset` to its current signature.
    ///
    /// Returns the number of hosts whose ports changed.
    pub fn refresh_subgraph_hosts(&mut self, asset: GraphAssetId) -> Result<usize, LibraryError> {
        let hosts: Vec<(GraphAssetId, NodeId)> = self
            .graphs
            .iter()
            .flat_map(|(graph, meta)| {
                meta.subgraphs()
                    .filter(move |(_, hosted)| *hosted == asset)
                    .map(move |(host, _)| (*graph, host))
            })
            .collect();

        let mut changed = 0;
        for (graph, host) in hosts {
            let before = self.host_ports(graph, host);
            self.assign_subgraph(graph, host, Some(asset))?;
            if self.host_ports(graph, host) != before {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn host_ports(&self, graph: GraphAssetId, host: NodeId) -> Option<Vec<Port>> {
        self.graphs.get(&graph)?.ports(host).map(<[Port]>::to_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Root;
    use crate::port::PortKind;
    use crate::value::DataType;

    #[test]
    fn test_create_graph_uses_distinct_stores() {
        let mut library = GraphLibrary::new();
        let a = library.create_graph("A");
        let b = library.create_graph("B");

        let store_a = library.graph(a).unwrap().store().store_id();
        let store_b = library.graph(b).unwrap().store().store_id();
        assert_ne!(store_a, store_b);
        assert_ne!(store_a, 0);
        assert_eq!(library.len(), 2);
    }

    #[test]
    fn test_assign_subgraph_mirrors_signature() {
        let mut library = GraphLibrary::new();
        let child = library.create_graph("Child");
        let root = library
            .graph_mut(child)
            .unwrap()
            .add_node(Root::new().with_enter("Run").with_input("Count", DataType::Int))
            .unwrap();
        let parent = library.create_graph("Parent");
        let host = library
            .graph_mut(parent)
            .unwrap()
            .add_node(Subgraph::default())
            .unwrap();

        library.assign_subgraph(parent, host, Some(child)).unwrap();

        let meta = library.graph(parent).unwrap();
        let kinds: Vec<_> = meta.ports(host).unwrap().iter().map(|port| port.kind).collect();
        assert_eq!(kinds, vec![PortKind::Enter, PortKind::Input]);
        assert_eq!(meta.subgraph(host), Some(child));
        assert_eq!(meta.node::<Subgraph>(host).unwrap().asset(), Some(child));

        // Inside the child the same ports face the other way
        let inner: Vec<_> = library
            .graph(child)
            .unwrap()
            .ports(root)
            .unwrap()
            .iter()
            .map(|port| (port.kind, port.signature))
            .collect();
        assert_eq!(inner, vec![(PortKind::Exit, true), (PortKind::Output, true)]);

        library.assign_subgraph(parent, host, None).unwrap();
        let meta = library.graph(parent).unwrap();
        assert!(meta.ports(host).unwrap().is_empty());
        assert_eq!(meta.subgraph(host), None);
    }

    #[test]
    fn test_refresh_after_signature_change() {
        let mut library = GraphLibrary::new();
        let child = library.create_graph("Child");
        let root = library
            .graph_mut(child)
            .unwrap()
            .add_node(Root::new().with_enter("Run"))
            .unwrap();
        let parent = library.create_graph("Parent");
        let host = library
            .graph_mut(parent)
            .unwrap()
            .add_node(Subgraph::default())
            .unwrap();
        library.assign_subgraph(parent, host, Some(child)).unwrap();

        let child_meta = library.graph_mut(child).unwrap();
        child_meta.node_mut::<Root>(root).unwrap().ports.clear();
        child_meta.invalidate_node(root, true).unwrap();

        assert_eq!(library.refresh_subgraph_hosts(child).unwrap(), 1);
        assert_eq!(library.refresh_subgraph_hosts(child).unwrap(), 0);
        assert!(library.graph(parent).unwrap().ports(host).unwrap().is_empty());
    }

    #[test]
    fn test_assign_unknown_graph() {
        let mut library = GraphLibrary::new();
        let parent = library.create_graph("Parent");
        let missing = GraphAssetId::new();
        assert_eq!(
            library.assign_subgraph(parent, NodeId::new(1, 1), Some(missing)),
            Err(LibraryError::UnknownGraph(missing))
        );
    }
}
