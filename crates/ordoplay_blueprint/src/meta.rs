// SPDX-License-Identifier: MIT OR Apache-2.0
//! Authoring-time graph: nodes, their ports, and the links between them.
//!
//! Ports are never edited directly. A node declares them from
//! [`BlueprintNode::create_ports`], which the meta re-runs whenever the node
//! is invalidated. Link edits notify the nodes on both ends, which is how
//! dynamic port types propagate through a graph.

use crate::blackboard::Blackboard;
use crate::compiler::Signature;
use crate::id::{GraphAssetId, NodeId, PortAddress};
use crate::link::Link;
use crate::node::{BlueprintNode, NodeKindId, NodeRegistry, NodeVTable};
use crate::port::{Capacity, Port, PortKind};
use crate::storage::{NodeStorage, StorageError};
use crate::value::DataType;
use indexmap::IndexMap;
use tracing::{debug, trace};

/// Error when editing links
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Port not found
    #[error("Port not found: {}#{}", .0.node, .0.port)]
    PortNotFound(PortAddress),

    /// Port kinds cannot be linked in this direction
    #[error("Cannot link a {from:?} port to a {to:?} port")]
    IncompatibleKinds {
        /// Kind of the producing end
        from: PortKind,
        /// Kind of the consuming end
        to: PortKind,
    },

    /// Data types do not convert
    #[error("Incompatible port types: {from:?} -> {to:?}")]
    IncompatibleTypes {
        /// Type of the producing end
        from: Option<DataType>,
        /// Type of the consuming end
        to: Option<DataType>,
    },

    /// A single-capacity port already has a link
    #[error("Port already linked: {}#{}", .0.node, .0.port)]
    CapacityViolation(PortAddress),

    /// The same link already exists
    #[error("Link already exists")]
    DuplicateLink(Link),
}

/// Error when editing a graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetaError {
    /// Node storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Link edit rejected
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Node not in this graph
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Node kind was never registered with this graph
    #[error("Unknown node kind: {0}")]
    UnknownKind(NodeKindId),

    /// `add_port` called outside the node's `create_ports`
    #[error("Node {0} is not creating ports")]
    NotCreatingPorts(NodeId),
}

/// Result type for graph edits
pub type Result<T> = std::result::Result<T, MetaError>;

/// Authoring data for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    /// Node kind
    pub kind: NodeKindId,
    /// Ports, by declaration index
    pub ports: Vec<Port>,
}

/// An authoring graph
#[derive(Debug, Clone)]
pub struct GraphMeta {
    /// Graph name
    pub name: String,
    id: GraphAssetId,
    store: NodeStorage,
    registry: NodeRegistry,
    nodes: IndexMap<NodeId, NodeMeta>,
    links: Vec<Link>,
    subgraphs: IndexMap<NodeId, GraphAssetId>,
    blackboard: Blackboard,
    version: u64,
    building: Vec<(NodeId, Vec<Port>)>,
}

impl GraphMeta {
    /// Create a new empty graph using store 1
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_store(name, 1)
    }

    /// Create a new empty graph whose nodes live in the given store
    pub fn with_store(name: impl Into<String>, store_id: u32) -> Self {
        Self {
            name: name.into(),
            id: GraphAssetId::new(),
            store: NodeStorage::new(store_id),
            registry: NodeRegistry::new(),
            nodes: IndexMap::new(),
            links: Vec::new(),
            subgraphs: IndexMap::new(),
            blackboard: Blackboard::new(),
            version: 0,
            building: Vec::new(),
        }
    }

    /// Asset id of this graph
    pub fn id(&self) -> GraphAssetId {
        self.id
    }

    /// Edit counter, bumped on every structural or node change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Node storage backing this graph
    pub fn store(&self) -> &NodeStorage {
        &self.store
    }

    /// Kinds used by this graph
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Default blackboard values
    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    /// Mutable default blackboard values
    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        self.version += 1;
        &mut self.blackboard
    }

    /// Add a node and build its ports
    pub fn add_node<T: BlueprintNode>(&mut self, node: T) -> Result<NodeId> {
        let id = self.store.add_node(node);
        self.registry.register::<T>();
        self.nodes.insert(
            id,
            NodeMeta {
                kind: T::KIND,
                ports: Vec::new(),
            },
        );

        if let Err(err) = self.initialize_node(id) {
            self.nodes.shift_remove(&id);
            self.store.remove_node(id);
            return Err(err);
        }

        self.version += 1;
        trace!(graph = %self.name, node = %id, kind = %T::KIND, "Node added");
        Ok(id)
    }

    /// Copy a node from another graph. Links are not copied.
    pub fn copy_node(&mut self, source: &GraphMeta, id: NodeId) -> Result<NodeId> {
        let kind = source.kind_of(id).ok_or(MetaError::NodeNotFound(id))?;
        let vtable = *source
            .registry
            .get(kind)
            .ok_or(MetaError::UnknownKind(kind))?;

        let copy = self.store.add_node_copy(&source.store, id)?;
        self.registry.insert(vtable);
        self.insert_copy(copy, kind, source.subgraph(id))
    }

    /// Copy a node within this graph. Links are not copied.
    pub fn duplicate_node(&mut self, id: NodeId) -> Result<NodeId> {
        let kind = self.kind_of(id).ok_or(MetaError::NodeNotFound(id))?;
        let copy = self.store.duplicate_node(id)?;
        let subgraph = self.subgraph(id);
        self.insert_copy(copy, kind, subgraph)
    }

    fn insert_copy(
        &mut self,
        id: NodeId,
        kind: NodeKindId,
        subgraph: Option<GraphAssetId>,
    ) -> Result<NodeId> {
        self.nodes.insert(
            id,
            NodeMeta {
                kind,
                ports: Vec::new(),
            },
        );
        if let Some(asset) = subgraph {
            self.subgraphs.insert(id, asset);
        }
        self.invalidate_node(id, false)?;
        self.version += 1;
        trace!(graph = %self.name, node = %id, kind = %kind, "Node copied");
        Ok(id)
    }

    fn initialize_node(&mut self, id: NodeId) -> Result<()> {
        let vtable = self.vtable(id).ok_or(MetaError::NodeNotFound(id))?;
        (vtable.on_set_defaults)(self, id)?;
        if vtable.capabilities.validate {
            (vtable.on_validate)(self, id)?;
        }
        self.invalidate_node(id, false)?;
        Ok(())
    }

    /// Remove a node and every link attached to it
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        if self.nodes.shift_remove(&id).is_none() {
            return Err(MetaError::NodeNotFound(id));
        }

        let (removed, kept): (Vec<Link>, Vec<Link>) =
            self.links.drain(..).partition(|link| link.involves_node(id));
        self.links = kept;
        self.subgraphs.shift_remove(&id);
        self.store.remove_node(id);
        self.version += 1;
        trace!(graph = %self.name, node = %id, "Node removed");

        for link in removed {
            for end in [link.from, link.to] {
                if end.node != id {
                    self.notify_links_changed(end)?;
                }
            }
        }
        Ok(())
    }

    /// Whether a node is in this graph
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Kind of a node
    pub fn kind_of(&self, id: NodeId) -> Option<NodeKindId> {
        self.nodes.get(&id).map(|node| node.kind)
    }

    /// Get a node's fields
    pub fn node<T: BlueprintNode>(&self, id: NodeId) -> Result<&T> {
        Ok(self.store.get::<T>(id)?)
    }

    /// Get a node's fields mutably.
    ///
    /// Call [`GraphMeta::invalidate_node`] afterwards if the edit affects ports.
    pub fn node_mut<T: BlueprintNode>(&mut self, id: NodeId) -> Result<&mut T> {
        self.version += 1;
        Ok(self.store.get_mut::<T>(id)?)
    }

    /// Authoring data for a node
    pub fn node_meta(&self, id: NodeId) -> Option<&NodeMeta> {
        self.nodes.get(&id)
    }

    /// All nodes, in creation order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeMeta)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Ports of a node
    pub fn ports(&self, id: NodeId) -> Option<&[Port]> {
        self.nodes.get(&id).map(|node| node.ports.as_slice())
    }

    /// A single port
    pub fn port(&self, address: PortAddress) -> Option<&Port> {
        self.nodes.get(&address.node)?.ports.get(address.port)
    }

    /// Declare a port. Only valid from the node's own `create_ports`.
    pub fn add_port(&mut self, id: NodeId, port: Port) -> Result<usize> {
        match self.building.last_mut() {
            Some((building, ports)) if *building == id => {
                ports.push(port);
                Ok(ports.len() - 1)
            }
            _ => Err(MetaError::NotCreatingPorts(id)),
        }
    }

    /// Rebuild a node's ports.
    ///
    /// With `invalidate_links`, links that no longer fit the new ports are
    /// dropped, and a port that became single keeps only its oldest link.
    /// Nodes on the other end of a changed port are notified. Returns whether
    /// the ports changed.
    pub fn invalidate_node(&mut self, id: NodeId, invalidate_links: bool) -> Result<bool> {
        let vtable = self.vtable(id).ok_or(MetaError::NodeNotFound(id))?;

        self.building.push((id, Vec::new()));
        let result = (vtable.create_ports)(self, id);
        let ports = self
            .building
            .pop()
            .map(|(_, ports)| ports)
            .unwrap_or_default();
        result?;

        let node = self.nodes.get_mut(&id).ok_or(MetaError::NodeNotFound(id))?;
        if node.ports == ports {
            return Ok(false);
        }
        let old = std::mem::replace(&mut node.ports, ports);
        self.version += 1;

        let mut touched = Vec::new();
        if invalidate_links {
            let mut stale: Vec<Link> = Vec::new();
            let mut occupied: Vec<PortAddress> = Vec::new();
            for link in self.links.iter().filter(|link| link.involves_node(id)) {
                if !self.link_fits(link) {
                    stale.push(*link);
                    continue;
                }
                // Single ports keep their oldest link
                let singles: Vec<PortAddress> = [link.from, link.to]
                    .into_iter()
                    .filter(|end| end.node == id)
                    .filter(|end| {
                        self.port(*end)
                            .is_some_and(|port| port.capacity == Capacity::Single)
                    })
                    .collect();
                if singles.iter().any(|end| occupied.contains(end)) {
                    stale.push(*link);
                } else {
                    occupied.extend(singles);
                }
            }
            self.links.retain(|link| !stale.contains(link));
            for link in &stale {
                debug!(graph = %self.name, node = %id, "Dropped link after port change");
                touched.push(link.from);
                touched.push(link.to);
            }
        }

        let new_len = self.ports(id).map_or(0, <[Port]>::len);
        for port in 0..old.len().max(new_len) {
            let address = PortAddress::new(id, port);
            if old.get(port) == self.port(address) {
                continue;
            }
            touched.extend(
                self.links
                    .iter()
                    .filter_map(|link| link.other_end(address)),
            );
        }

        let mut notified = Vec::new();
        for address in touched {
            if address.node != id && !notified.contains(&address) {
                notified.push(address);
                self.notify_links_changed(address)?;
            }
        }
        Ok(true)
    }

    /// Re-run a node's validation and rebuild its ports
    pub fn validate_node(&mut self, id: NodeId) -> Result<()> {
        let vtable = self.vtable(id).ok_or(MetaError::NodeNotFound(id))?;
        if vtable.capabilities.validate {
            (vtable.on_validate)(self, id)?;
        }
        self.invalidate_node(id, true)?;
        Ok(())
    }

    /// Link two ports
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_port: usize,
        to_node: NodeId,
        to_port: usize,
    ) -> Result<()> {
        self.try_add_link(Link::new(from_node, from_port, to_node, to_port))
    }

    /// Add a link. On failure the graph is unchanged.
    pub fn try_add_link(&mut self, link: Link) -> Result<()> {
        self.check_link(&link)?;
        self.links.push(link);
        self.version += 1;
        trace!(graph = %self.name, from = %link.from.node, to = %link.to.node, "Link added");

        self.notify_links_changed(link.from)?;
        self.notify_links_changed(link.to)?;
        Ok(())
    }

    fn check_link(&self, link: &Link) -> std::result::Result<(), LinkError> {
        let from_node = self
            .nodes
            .get(&link.from.node)
            .ok_or(LinkError::NodeNotFound(link.from.node))?;
        let to_node = self
            .nodes
            .get(&link.to.node)
            .ok_or(LinkError::NodeNotFound(link.to.node))?;

        let from = from_node
            .ports
            .get(link.from.port)
            .ok_or(LinkError::PortNotFound(link.from))?;
        let to = to_node
            .ports
            .get(link.to.port)
            .ok_or(LinkError::PortNotFound(link.to))?;

        if !from.kind.can_link_to(to.kind) {
            return Err(LinkError::IncompatibleKinds {
                from: from.kind,
                to: to.kind,
            });
        }
        if !from.can_link(to) {
            return Err(LinkError::IncompatibleTypes {
                from: from.data_type.clone(),
                to: to.data_type.clone(),
            });
        }
        if self.links.contains(link) {
            return Err(LinkError::DuplicateLink(*link));
        }
        if from.capacity == Capacity::Single && self.has_links(link.from) {
            return Err(LinkError::CapacityViolation(link.from));
        }
        if to.capacity == Capacity::Single && self.has_links(link.to) {
            return Err(LinkError::CapacityViolation(link.to));
        }
        Ok(())
    }

    fn link_fits(&self, link: &Link) -> bool {
        match (self.port(link.from), self.port(link.to)) {
            (Some(from), Some(to)) => from.can_link(to),
            _ => false,
        }
    }

    /// Remove a link. Returns whether it existed.
    pub fn remove_link(&mut self, link: Link) -> Result<bool> {
        let Some(index) = self.links.iter().position(|existing| *existing == link) else {
            return Ok(false);
        };
        self.links.remove(index);
        self.version += 1;
        trace!(graph = %self.name, from = %link.from.node, to = %link.to.node, "Link removed");

        self.notify_links_changed(link.from)?;
        self.notify_links_changed(link.to)?;
        Ok(true)
    }

    /// All links, in insertion order
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Links leaving a port, in insertion order
    pub fn links_from(&self, node: NodeId, port: usize) -> impl Iterator<Item = &Link> {
        let address = PortAddress::new(node, port);
        self.links.iter().filter(move |link| link.from == address)
    }

    /// Links arriving at a port, in insertion order
    pub fn links_to(&self, node: NodeId, port: usize) -> impl Iterator<Item = &Link> {
        let address = PortAddress::new(node, port);
        self.links.iter().filter(move |link| link.to == address)
    }

    /// Whether any link touches a port
    pub fn has_links(&self, address: PortAddress) -> bool {
        self.links.iter().any(|link| link.involves_port(address))
    }

    fn notify_links_changed(&mut self, address: PortAddress) -> Result<()> {
        let Some(vtable) = self.vtable(address.node) else {
            return Ok(());
        };
        if vtable.capabilities.links_changed {
            (vtable.on_links_changed)(self, address.node, address.port)?;
        }
        Ok(())
    }

    pub(crate) fn vtable(&self, id: NodeId) -> Option<NodeVTable> {
        let kind = self.nodes.get(&id)?.kind;
        self.registry.get(kind).copied()
    }

    /// Record that a node hosts a sub-graph
    pub fn set_subgraph(&mut self, host: NodeId, asset: GraphAssetId) -> Result<()> {
        if !self.nodes.contains_key(&host) {
            return Err(MetaError::NodeNotFound(host));
        }
        self.subgraphs.insert(host, asset);
        self.version += 1;
        Ok(())
    }

    /// Forget a node's sub-graph
    pub fn clear_subgraph(&mut self, host: NodeId) -> Option<GraphAssetId> {
        let previous = self.subgraphs.shift_remove(&host);
        if previous.is_some() {
            self.version += 1;
        }
        previous
    }

    /// Sub-graph hosted by a node
    pub fn subgraph(&self, host: NodeId) -> Option<GraphAssetId> {
        self.subgraphs.get(&host).copied()
    }

    /// All sub-graph hosts, in insertion order
    pub fn subgraphs(&self) -> impl Iterator<Item = (NodeId, GraphAssetId)> + '_ {
        self.subgraphs.iter().map(|(host, asset)| (*host, *asset))
    }

    /// External surface of this graph when used as a sub-graph
    pub fn signature(&self) -> Signature {
        Signature::collect(self)
    }
}
