// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compilation of authoring graphs into runtime tables.
//!
//! The compiler expands every sub-graph host in place, so each node reachable
//! from the top-level graph gets its own slot in a template [`NodeStorage`].
//! Links are resolved to those slots, label links are synthesized, and every
//! problem found along the way is reported together.

use crate::blackboard::Blackboard;
use crate::id::{GraphAssetId, NodeId, PortAddress};
use crate::library::GraphLibrary;
use crate::meta::GraphMeta;
use crate::node::{HashLink, NodeKindId, NodeRegistry};
use crate::port::{Port, PortKind};
use crate::settings::CompilerSettings;
use crate::storage::NodeStorage;
use crate::subgraph::SubgraphTree;
use crate::value::DataType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Store id of compiled templates
pub const TEMPLATE_STORE: u32 = 0;

/// A problem that prevents compilation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// The graph to compile is not in the library
    #[error("Unknown graph: {0}")]
    UnknownGraph(GraphAssetId),

    /// A label link has nothing to link to
    #[error("{graph}: no target for the label link of node {node}")]
    DanglingHashLink {
        /// Graph name
        graph: String,
        /// Node declaring the label
        node: NodeId,
        /// Producing port
        port: usize,
    },

    /// A linked dynamic port never got a type
    #[error("{graph}: port `{port}` of node {node} has no resolved type")]
    UnresolvedPort {
        /// Graph name
        graph: String,
        /// Node owning the port
        node: NodeId,
        /// Port name
        port: String,
    },

    /// A graph hosts itself, directly or through other graphs
    #[error("Sub-graph cycle: {}", .path.join(" -> "))]
    CyclicSubgraph {
        /// Graph names along the cycle
        path: Vec<String>,
    },

    /// A link joins ports whose types stopped matching
    #[error(
        "{graph}: link from {}:{} to {}:{} joins incompatible ports",
        .from.node, .from.port, .to.node, .to.port
    )]
    IncompatibleLink {
        /// Graph name
        graph: String,
        /// Producing port, as authored
        from: PortAddress,
        /// Consuming port, as authored
        to: PortAddress,
    },

    /// A host references a graph that is not in the library
    #[error("{graph}: node {node} hosts missing graph {asset}")]
    MissingGraph {
        /// Graph name
        graph: String,
        /// Host node
        node: NodeId,
        /// Missing asset
        asset: GraphAssetId,
    },

    /// A host's ports no longer match its graph's signature
    #[error("{graph}: ports of sub-graph host {node} are out of date")]
    StaleSubgraphPorts {
        /// Graph name
        graph: String,
        /// Host node
        node: NodeId,
    },

    /// A node kind used by the graph is not registered
    #[error("{graph}: node {node} has unknown kind {kind}")]
    UnknownKind {
        /// Graph name
        graph: String,
        /// Node
        node: NodeId,
        /// Kind
        kind: NodeKindId,
    },

    /// A node reported a problem
    #[error("{graph}: node {node}: {message}")]
    Node {
        /// Graph name
        graph: String,
        /// Node
        node: NodeId,
        /// Problem reported by the node
        message: String,
    },
}

/// Every problem found by one compilation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Compilation failed with {} error(s)", .0.len())]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    /// Iterate the errors in the order they were found
    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.0.iter()
    }

    /// Number of errors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no errors
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One port of a graph's external surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignaturePort {
    /// Port name
    pub name: String,
    /// Kind seen from the host
    pub kind: PortKind,
    /// Data type, for data ports
    pub data_type: Option<DataType>,
    /// Node declaring the port inside the graph
    pub root: NodeId,
    /// Port index on that node
    pub root_port: usize,
}

/// External surface of a graph, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Ports
    pub ports: Vec<SignaturePort>,
}

impl Signature {
    /// Collect the signature ports of a graph
    pub fn collect(meta: &GraphMeta) -> Self {
        let ports = meta
            .nodes()
            .flat_map(|(id, node)| {
                node.ports
                    .iter()
                    .enumerate()
                    .filter(|(_, port)| port.signature)
                    .map(move |(index, port)| SignaturePort {
                        name: port.name.clone(),
                        kind: port.kind.counterpart(),
                        data_type: port.data_type.clone(),
                        root: id,
                        root_port: index,
                    })
            })
            .collect();
        Self { ports }
    }

    /// Ports a host node exposes for this signature
    pub fn host_ports(&self) -> Vec<Port> {
        self.ports
            .iter()
            .map(|port| Port::new(port.name.clone(), port.kind, port.data_type.clone()))
            .collect()
    }

    /// Index of the first port with this name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|port| port.name == name)
    }

    /// Number of ports
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether the graph has no external surface
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// Versions a compiled graph was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileKey {
    /// Top-level graph
    pub root: GraphAssetId,
    /// Every reachable graph with its version, in discovery order
    pub versions: Vec<(GraphAssetId, u64)>,
    /// Sub-graph tree instance
    pub tree: Uuid,
    /// Sub-graph tree version
    pub tree_version: u64,
}

impl CompileKey {
    /// Compute the key for compiling `root` right now
    pub fn of(library: &GraphLibrary, tree: &SubgraphTree, root: GraphAssetId) -> Option<Self> {
        library.graph(root)?;

        let mut versions = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![root];
        while let Some(asset) = pending.pop() {
            if !seen.insert(asset) {
                continue;
            }
            let Some(meta) = library.graph(asset) else {
                continue;
            };
            versions.push((asset, meta.version()));
            pending.extend(meta.subgraphs().map(|(_, child)| child));
        }

        Some(Self {
            root,
            versions,
            tree: tree.id(),
            tree_version: tree.version(),
        })
    }
}

/// One runtime node slot
#[derive(Debug, Clone)]
pub struct CompiledNode {
    /// Node kind
    pub kind: NodeKindId,
    /// Graph the node was authored in
    pub graph: GraphAssetId,
    /// Id of the node in its graph
    pub source: NodeId,
    /// Host whose scope the node runs in; `NONE` at top level
    pub root: NodeId,
    /// Ports at compile time
    pub ports: Vec<Port>,
    /// For an expanded sub-graph host, the inner signature ports by host port index
    pub host: Option<Vec<PortAddress>>,
}

/// Read-only, address-resolved form of a graph and its sub-graphs
#[derive(Debug)]
pub struct CompiledGraph {
    key: CompileKey,
    registry: NodeRegistry,
    template: NodeStorage,
    nodes: IndexMap<NodeId, CompiledNode>,
    links_from: HashMap<PortAddress, Vec<PortAddress>>,
    links_to: HashMap<PortAddress, Vec<PortAddress>>,
    forwards: HashMap<PortAddress, Vec<PortAddress>>,
    root_ports: HashMap<PortAddress, usize>,
    signature: Signature,
    signature_addresses: Vec<PortAddress>,
    scopes: IndexMap<NodeId, Blackboard>,
}

impl CompiledGraph {
    /// Versions this graph was compiled from
    pub fn key(&self) -> &CompileKey {
        &self.key
    }

    /// Every kind used by the graph
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Initial node state; each blueprint runs on its own copy
    pub fn template(&self) -> &NodeStorage {
        &self.template
    }

    /// Get a runtime node
    pub fn node(&self, id: NodeId) -> Option<&CompiledNode> {
        self.nodes.get(&id)
    }

    /// All runtime nodes, parents before the sub-graphs they host
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &CompiledNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Number of runtime nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Runtime id of a node of the top-level graph
    pub fn runtime_id(&self, source: NodeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.source == source && node.root.is_none())
            .map(|(id, _)| *id)
    }

    /// Runtime ids of every instance of an authored node
    pub fn instances_of(&self, source: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(move |(_, node)| node.source == source)
            .map(|(id, _)| *id)
    }

    /// Consumers linked to a producing port, in link order
    pub fn links_from(&self, address: PortAddress) -> &[PortAddress] {
        self.links_from.get(&address).map_or(&[], Vec::as_slice)
    }

    /// Producers linked to a consuming port, in link order
    pub fn links_to(&self, address: PortAddress) -> &[PortAddress] {
        self.links_to.get(&address).map_or(&[], Vec::as_slice)
    }

    /// Ports of the same node a port forwards to
    pub fn forwards(&self, address: PortAddress) -> &[PortAddress] {
        self.forwards.get(&address).map_or(&[], Vec::as_slice)
    }

    /// Signature index of a root port
    pub fn root_port(&self, address: PortAddress) -> Option<usize> {
        self.root_ports.get(&address).copied()
    }

    /// External surface of the top-level graph
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Root port backing a top-level signature port
    pub fn signature_address(&self, index: usize) -> Option<PortAddress> {
        self.signature_addresses.get(index).copied()
    }

    /// Initial blackboards, keyed by scope root
    pub fn scopes(&self) -> impl Iterator<Item = (NodeId, &Blackboard)> {
        self.scopes.iter().map(|(root, blackboard)| (*root, blackboard))
    }
}

/// Compiles graphs and caches the results
#[derive(Debug, Default)]
pub struct Compiler {
    settings: CompilerSettings,
    cache: HashMap<GraphAssetId, Arc<CompiledGraph>>,
}

impl Compiler {
    /// Create a compiler
    pub fn new(settings: CompilerSettings) -> Self {
        Self {
            settings,
            cache: HashMap::new(),
        }
    }

    /// Compiler settings
    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Compile `root` and everything it hosts.
    ///
    /// Returns the cached result if no reachable graph and not the tree changed
    /// since the last compilation.
    pub fn compile(
        &mut self,
        library: &GraphLibrary,
        tree: &SubgraphTree,
        root: GraphAssetId,
    ) -> Result<Arc<CompiledGraph>, CompileErrors> {
        let key = CompileKey::of(library, tree, root)
            .ok_or_else(|| CompileErrors(vec![CompileError::UnknownGraph(root)]))?;

        if self.settings.cache {
            if let Some(compiled) = self.cache.get(&root) {
                if compiled.key == key {
                    debug!(graph = %root, "Compile cache hit");
                    return Ok(Arc::clone(compiled));
                }
            }
        }

        debug!(graph = %root, graphs = key.versions.len(), "Compiling");
        let compiled = match Expansion::new(library, tree, &self.settings).run(key) {
            Ok(compiled) => Arc::new(compiled),
            Err(errors) => {
                warn!(graph = %root, errors = errors.len(), "Compilation failed");
                self.cache.remove(&root);
                return Err(errors);
            }
        };
        debug!(graph = %root, nodes = compiled.node_count(), "Compiled");

        if self.settings.cache {
            self.cache.insert(root, Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    /// Drop the cached result for one graph
    pub fn invalidate(&mut self, root: GraphAssetId) {
        self.cache.remove(&root);
    }

    /// Drop every cached result
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Position in the sub-graph tree while expanding
#[derive(Debug, Clone, Copy)]
enum TreeCursor {
    Top,
    Entry(usize),
    Detached,
}

impl TreeCursor {
    fn child(self, tree: &SubgraphTree, host: NodeId) -> Self {
        let parent = match self {
            Self::Top => None,
            Self::Entry(index) => Some(index),
            Self::Detached => return Self::Detached,
        };
        tree.find(host, parent).map_or(Self::Detached, Self::Entry)
    }

    fn overrides(self, tree: &SubgraphTree) -> Option<&Blackboard> {
        match self {
            Self::Entry(index) => tree.entry(index)?.overrides.as_ref(),
            Self::Top | Self::Detached => None,
        }
    }
}

/// State of one compilation
struct Expansion<'a> {
    library: &'a GraphLibrary,
    tree: &'a SubgraphTree,
    settings: &'a CompilerSettings,
    template: NodeStorage,
    registry: NodeRegistry,
    nodes: IndexMap<NodeId, CompiledNode>,
    links: Vec<(PortAddress, PortAddress)>,
    forwards: HashMap<PortAddress, Vec<PortAddress>>,
    root_ports: HashMap<PortAddress, usize>,
    scopes: IndexMap<NodeId, Blackboard>,
    stack: Vec<GraphAssetId>,
    errors: Vec<CompileError>,
}

impl<'a> Expansion<'a> {
    fn new(library: &'a GraphLibrary, tree: &'a SubgraphTree, settings: &'a CompilerSettings) -> Self {
        Self {
            library,
            tree,
            settings,
            template: NodeStorage::new(TEMPLATE_STORE),
            registry: NodeRegistry::new(),
            nodes: IndexMap::new(),
            links: Vec::new(),
            forwards: HashMap::new(),
            root_ports: HashMap::new(),
            scopes: IndexMap::new(),
            stack: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self, key: CompileKey) -> Result<CompiledGraph, CompileErrors> {
        let library = self.library;
        let meta = library
            .graph(key.root)
            .ok_or_else(|| CompileErrors(vec![CompileError::UnknownGraph(key.root)]))?;

        self.scopes.insert(NodeId::NONE, meta.blackboard().clone());
        let signature_addresses = self.expand(meta, NodeId::NONE, TreeCursor::Top);

        if !self.errors.is_empty() {
            return Err(CompileErrors(self.errors));
        }

        let mut links_from: HashMap<PortAddress, Vec<PortAddress>> = HashMap::new();
        let mut links_to: HashMap<PortAddress, Vec<PortAddress>> = HashMap::new();
        for (from, to) in self.links {
            links_from.entry(from).or_default().push(to);
            links_to.entry(to).or_default().push(from);
        }

        Ok(CompiledGraph {
            key,
            registry: self.registry,
            template: self.template,
            nodes: self.nodes,
            links_from,
            links_to,
            forwards: self.forwards,
            root_ports: self.root_ports,
            signature: meta.signature(),
            signature_addresses,
            scopes: self.scopes,
        })
    }

    /// Instantiate one graph in the scope of `scope` and return its root
    /// signature ports in runtime space.
    fn expand(&mut self, meta: &'a GraphMeta, scope: NodeId, cursor: TreeCursor) -> Vec<PortAddress> {
        self.stack.push(meta.id());

        let mut runtime_ids = HashMap::new();
        for (id, node) in meta.nodes() {
            if let Some(runtime) = self.instantiate(meta, id, scope) {
                runtime_ids.insert(id, runtime);
            }
            self.check_ports(meta, id, &node.ports);
        }
        let to_runtime = |address: PortAddress| {
            runtime_ids
                .get(&address.node)
                .map(|&node| PortAddress::new(node, address.port))
        };

        for link in meta.links() {
            let fits = match (meta.port(link.from), meta.port(link.to)) {
                (Some(from), Some(to)) => from.can_link(to),
                _ => false,
            };
            if !fits {
                self.errors.push(CompileError::IncompatibleLink {
                    graph: meta.name.clone(),
                    from: link.from,
                    to: link.to,
                });
                continue;
            }
            if let (Some(from), Some(to)) = (to_runtime(link.from), to_runtime(link.to)) {
                self.links.push((from, to));
            }
        }

        for (from, to) in self.hash_links(meta) {
            if let (Some(from), Some(to)) = (to_runtime(from), to_runtime(to)) {
                trace!(graph = %meta.name, from = %from.node, to = %to.node, "Label link");
                self.links.push((from, to));
            }
        }

        for (from, targets) in Self::internal_links(meta) {
            if let Some(from) = to_runtime(from) {
                let targets = targets.into_iter().filter_map(to_runtime).collect();
                self.forwards.insert(from, targets);
            }
        }

        let signature_addresses: Vec<PortAddress> = meta
            .signature()
            .ports
            .iter()
            .filter_map(|port| to_runtime(PortAddress::new(port.root, port.root_port)))
            .collect();
        for (index, address) in signature_addresses.iter().enumerate() {
            self.root_ports.insert(*address, index);
        }

        for (host, asset) in meta.subgraphs() {
            if let Some(&runtime_host) = runtime_ids.get(&host) {
                self.expand_host(meta, host, runtime_host, asset, cursor);
            }
        }

        self.stack.pop();
        signature_addresses
    }

    fn instantiate(&mut self, meta: &GraphMeta, id: NodeId, scope: NodeId) -> Option<NodeId> {
        let node = meta.node_meta(id)?;
        let Some(vtable) = meta.registry().get(node.kind).copied() else {
            self.errors.push(CompileError::UnknownKind {
                graph: meta.name.clone(),
                node: id,
                kind: node.kind,
            });
            return None;
        };

        let runtime = match self.template.add_node_copy(meta.store(), id) {
            Ok(runtime) => runtime,
            Err(err) => {
                self.errors.push(CompileError::Node {
                    graph: meta.name.clone(),
                    node: id,
                    message: err.to_string(),
                });
                return None;
            }
        };
        self.registry.insert(vtable);
        self.nodes.insert(
            runtime,
            CompiledNode {
                kind: node.kind,
                graph: meta.id(),
                source: id,
                root: scope,
                ports: node.ports.clone(),
                host: None,
            },
        );

        if let Some(err) = vtable.compile_check(meta, id) {
            self.errors.push(err);
        }
        Some(runtime)
    }

    fn check_ports(&mut self, meta: &GraphMeta, id: NodeId, ports: &[Port]) {
        if !self.settings.require_resolved_ports {
            return;
        }
        for (index, port) in ports.iter().enumerate() {
            if port.is_unresolved() && meta.has_links(PortAddress::new(id, index)) {
                self.errors.push(CompileError::UnresolvedPort {
                    graph: meta.name.clone(),
                    node: id,
                    port: port.name.clone(),
                });
            }
        }
    }

    /// Match label producers to consumers within one graph
    fn hash_links(&mut self, meta: &GraphMeta) -> Vec<(PortAddress, PortAddress)> {
        let mut producers = Vec::new();
        let mut consumers = Vec::new();
        for (id, node) in meta.nodes() {
            let Some(vtable) = meta.vtable(id) else {
                continue;
            };
            if !vtable.capabilities.hash_link {
                continue;
            }
            let Some(HashLink { hash, port }) = (vtable.hash_link)(meta, id) else {
                continue;
            };
            match node.ports.get(port) {
                Some(declared) if declared.kind.is_producer() => {
                    producers.push((hash, PortAddress::new(id, port), declared.kind));
                }
                Some(declared) => consumers.push((hash, PortAddress::new(id, port), declared.kind)),
                None => self.errors.push(CompileError::Node {
                    graph: meta.name.clone(),
                    node: id,
                    message: format!("label port {port} does not exist"),
                }),
            }
        }

        let mut links = Vec::new();
        for (hash, from, kind) in producers {
            let before = links.len();
            links.extend(
                consumers
                    .iter()
                    .filter(|(other, _, target)| *other == hash && kind.can_link_to(*target))
                    .map(|(_, to, _)| (from, *to)),
            );
            if links.len() == before {
                self.errors.push(CompileError::DanglingHashLink {
                    graph: meta.name.clone(),
                    node: from.node,
                    port: from.port,
                });
            }
        }
        links
    }

    /// Ports each node forwards to within itself
    fn internal_links(meta: &GraphMeta) -> Vec<(PortAddress, Vec<PortAddress>)> {
        let mut forwards = Vec::new();
        for (id, node) in meta.nodes() {
            let Some(vtable) = meta.vtable(id) else {
                continue;
            };
            if !vtable.capabilities.internal_links {
                continue;
            }
            for port in 0..node.ports.len() {
                let targets = (vtable.linked_ports)(meta, id, port);
                if !targets.is_empty() {
                    forwards.push((
                        PortAddress::new(id, port),
                        targets
                            .into_iter()
                            .map(|target| PortAddress::new(id, target))
                            .collect(),
                    ));
                }
            }
        }
        forwards
    }

    fn expand_host(
        &mut self,
        meta: &GraphMeta,
        host: NodeId,
        runtime_host: NodeId,
        asset: GraphAssetId,
        cursor: TreeCursor,
    ) {
        let library = self.library;
        let Some(child) = library.graph(asset) else {
            self.errors.push(CompileError::MissingGraph {
                graph: meta.name.clone(),
                node: host,
                asset,
            });
            return;
        };

        if let Some(start) = self.stack.iter().position(|&entered| entered == asset) {
            let mut path: Vec<String> = self.stack[start..]
                .iter()
                .filter_map(|&entered| library.graph(entered).map(|graph| graph.name.clone()))
                .collect();
            path.push(child.name.clone());
            self.errors.push(CompileError::CyclicSubgraph { path });
            return;
        }

        let expected = child.signature().host_ports();
        if meta.ports(host) != Some(expected.as_slice()) {
            self.errors.push(CompileError::StaleSubgraphPorts {
                graph: meta.name.clone(),
                node: host,
            });
            return;
        }

        let cursor = cursor.child(self.tree, host);
        let mut scope = child.blackboard().clone();
        if let Some(overrides) = cursor.overrides(self.tree) {
            scope.overlay(overrides);
        }
        self.scopes.insert(runtime_host, scope);

        let inner = self.expand(child, runtime_host, cursor);
        if let Some(node) = self.nodes.get_mut(&runtime_host) {
            node.host = Some(inner);
        }
    }
}
