// SPDX-License-Identifier: MIT OR Apache-2.0
//! The contract node kinds implement, and the per-kind dispatch table.
//!
//! Node kinds are plain value types. Their hooks are associated functions that
//! receive the graph or blueprint plus the node's id, and reach their own
//! fields through it, so a handler can call into other nodes (or re-enter
//! itself) without holding a borrow of its own storage slot.

use crate::compiler::CompileError;
use crate::id::{NodeId, NodeToken};
use crate::meta::{GraphMeta, MetaError};
use crate::runtime::{Blueprint, RuntimeError};
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;

/// Result type returned by runtime hooks
pub type NodeResult<T = ()> = Result<T, RuntimeError>;

/// Identifier of a node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKindId(&'static str);

impl NodeKindId {
    /// Create a kind id from its name
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Kind name
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for NodeKindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Optional behaviours a node kind opts into.
///
/// The engine only invokes a hook whose capability is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Handles calls on its enter ports
    pub enter_port: bool,
    /// Produces values on its output ports
    pub port_value: bool,
    /// Wants to hear about link changes on its ports
    pub links_changed: bool,
    /// Forwards some ports straight to other ports of the same node
    pub internal_links: bool,
    /// Links to other nodes through a shared label hash
    pub hash_link: bool,
    /// Validates its own fields
    pub validate: bool,
    /// Reports compile-time problems
    pub compile: bool,
}

impl Capabilities {
    /// No optional behaviour
    pub const NONE: Self = Self {
        enter_port: false,
        port_value: false,
        links_changed: false,
        internal_links: false,
        hash_link: false,
        validate: false,
        compile: false,
    };

    /// Opt into [`BlueprintNode::on_enter_port`]
    pub const fn with_enter_port(mut self) -> Self {
        self.enter_port = true;
        self
    }

    /// Opt into [`BlueprintNode::port_value`]
    pub const fn with_port_value(mut self) -> Self {
        self.port_value = true;
        self
    }

    /// Opt into [`BlueprintNode::on_links_changed`]
    pub const fn with_links_changed(mut self) -> Self {
        self.links_changed = true;
        self
    }

    /// Opt into [`BlueprintNode::linked_ports`]
    pub const fn with_internal_links(mut self) -> Self {
        self.internal_links = true;
        self
    }

    /// Opt into [`BlueprintNode::hash_link`]
    pub const fn with_hash_link(mut self) -> Self {
        self.hash_link = true;
        self
    }

    /// Opt into [`BlueprintNode::on_validate`]
    pub const fn with_validate(mut self) -> Self {
        self.validate = true;
        self
    }

    /// Opt into [`BlueprintNode::on_compile`]
    pub const fn with_compile(mut self) -> Self {
        self.compile = true;
        self
    }
}

/// A port that links by label hash instead of a drawn link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashLink {
    /// Label hash shared by both ends
    pub hash: u64,
    /// Port that takes part in the link; its kind decides which end it is
    pub port: usize,
}

/// A node kind.
///
/// `create_ports` must be a pure function of the node's fields and the links
/// currently attached to it: it is re-run whenever either changes.
pub trait BlueprintNode: Clone + Default + fmt::Debug + 'static {
    /// Kind identifier, unique across the node libraries in use
    const KIND: NodeKindId;

    /// Optional hooks this kind implements
    const CAPABILITIES: Capabilities = Capabilities::NONE;

    /// Declare the node's ports with [`GraphMeta::add_port`]
    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError>;

    /// Initialize fields right after the node is added
    fn on_set_defaults(_meta: &mut GraphMeta, _id: NodeId) -> Result<(), MetaError> {
        Ok(())
    }

    /// Fix up fields after creation or an editor revalidation
    fn on_validate(_meta: &mut GraphMeta, _id: NodeId) -> Result<(), MetaError> {
        Ok(())
    }

    /// A link was added to or removed from `port`
    fn on_links_changed(_meta: &mut GraphMeta, _id: NodeId, _port: usize) -> Result<(), MetaError> {
        Ok(())
    }

    /// Ports that `port` forwards to within this node
    fn linked_ports(_meta: &GraphMeta, _id: NodeId, _port: usize) -> Vec<usize> {
        Vec::new()
    }

    /// Label this node links through, if any
    fn hash_link(_meta: &GraphMeta, _id: NodeId) -> Option<HashLink> {
        None
    }

    /// Report a problem that prevents compilation
    fn on_compile(_meta: &GraphMeta, _id: NodeId) -> Result<(), String> {
        Ok(())
    }

    /// Called once when the owning blueprint activates
    fn on_initialize(_blueprint: &mut Blueprint, _token: NodeToken) -> NodeResult {
        Ok(())
    }

    /// Called once when the owning blueprint deactivates
    fn on_deinitialize(_blueprint: &mut Blueprint, _token: NodeToken) -> NodeResult {
        Ok(())
    }

    /// An enter port was called
    fn on_enter_port(_blueprint: &mut Blueprint, _token: NodeToken, _port: usize) -> NodeResult {
        Ok(())
    }

    /// Produce the value of an output port
    fn port_value(_blueprint: &mut Blueprint, _token: NodeToken, _port: usize) -> NodeResult<Value> {
        Ok(Value::None)
    }
}

/// Per-kind table of hook functions
#[derive(Clone, Copy)]
pub struct NodeVTable {
    /// Kind identifier
    pub kind: NodeKindId,
    /// Declared capabilities
    pub capabilities: Capabilities,
    pub(crate) create_ports: fn(&mut GraphMeta, NodeId) -> Result<(), MetaError>,
    pub(crate) on_set_defaults: fn(&mut GraphMeta, NodeId) -> Result<(), MetaError>,
    pub(crate) on_validate: fn(&mut GraphMeta, NodeId) -> Result<(), MetaError>,
    pub(crate) on_links_changed: fn(&mut GraphMeta, NodeId, usize) -> Result<(), MetaError>,
    pub(crate) linked_ports: fn(&GraphMeta, NodeId, usize) -> Vec<usize>,
    pub(crate) hash_link: fn(&GraphMeta, NodeId) -> Option<HashLink>,
    pub(crate) on_compile: fn(&GraphMeta, NodeId) -> Result<(), String>,
    pub(crate) on_initialize: fn(&mut Blueprint, NodeToken) -> NodeResult,
    pub(crate) on_deinitialize: fn(&mut Blueprint, NodeToken) -> NodeResult,
    pub(crate) on_enter_port: fn(&mut Blueprint, NodeToken, usize) -> NodeResult,
    pub(crate) port_value: fn(&mut Blueprint, NodeToken, usize) -> NodeResult<Value>,
}

impl NodeVTable {
    /// Build the table for a node kind
    pub fn of<T: BlueprintNode>() -> Self {
        Self {
            kind: T::KIND,
            capabilities: T::CAPABILITIES,
            create_ports: T::create_ports,
            on_set_defaults: T::on_set_defaults,
            on_validate: T::on_validate,
            on_links_changed: T::on_links_changed,
            linked_ports: T::linked_ports,
            hash_link: T::hash_link,
            on_compile: T::on_compile,
            on_initialize: T::on_initialize,
            on_deinitialize: T::on_deinitialize,
            on_enter_port: T::on_enter_port,
            port_value: T::port_value,
        }
    }

    /// Run the node's compile hook, if it has one
    pub(crate) fn compile_check(&self, meta: &GraphMeta, id: NodeId) -> Option<CompileError> {
        if !self.capabilities.compile {
            return None;
        }
        (self.on_compile)(meta, id)
            .err()
            .map(|message| CompileError::Node {
                graph: meta.name.clone(),
                node: id,
                message,
            })
    }
}

impl fmt::Debug for NodeVTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeVTable")
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Registry of available node kinds
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    kinds: IndexMap<NodeKindId, NodeVTable>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node kind
    pub fn register<T: BlueprintNode>(&mut self) {
        self.insert(NodeVTable::of::<T>());
    }

    /// Register a kind from its table
    pub fn insert(&mut self, vtable: NodeVTable) {
        self.kinds.entry(vtable.kind).or_insert(vtable);
    }

    /// Add every kind from another registry
    pub fn merge(&mut self, other: &NodeRegistry) {
        for vtable in other.kinds.values() {
            self.insert(*vtable);
        }
    }

    /// Get a kind's table
    pub fn get(&self, kind: NodeKindId) -> Option<&NodeVTable> {
        self.kinds.get(&kind)
    }

    /// Whether a kind is registered
    pub fn contains(&self, kind: NodeKindId) -> bool {
        self.kinds.contains_key(&kind)
    }

    /// Get all registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = NodeKindId> + '_ {
        self.kinds.keys().copied()
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether no kind is registered
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
