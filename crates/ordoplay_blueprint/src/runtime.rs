// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interpreter for compiled graphs.
//!
//! Control flow is pushed with [`Blueprint::call`]: entering a port runs the
//! node's handler, and calling an exit runs every linked enter port
//! synchronously, depth-first, in link order. Data is pulled with
//! [`Blueprint::read`]: reading an input reads the linked output, which runs
//! the producing node's `port_value`. Nothing is memoized.
//!
//! Sub-graph hosts and root ports are handled here rather than by node kinds:
//! calls and reads cross a host boundary by switching the token's scope root.

use crate::blackboard::Blackboard;
use crate::compiler::{CompiledGraph, CompiledNode};
use crate::id::{NodeId, NodeToken, PortAddress};
use crate::node::{BlueprintNode, NodeKindId, NodeResult, NodeVTable};
use crate::port::PortKind;
use crate::settings::RuntimeSettings;
use crate::storage::{NodeStorage, StorageError};
use crate::value::{FromValue, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Error raised while running a blueprint
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// Call or read outside the initialized window
    #[error("Blueprint is not initialized")]
    NotInitialized,

    /// Initialize called twice without deinitializing
    #[error("Blueprint is already initialized")]
    AlreadyInitialized,

    /// No runtime node with this id
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Node has no such port
    #[error("Node {node} has no port {port}")]
    UnknownPort {
        /// Node
        node: NodeId,
        /// Port index
        port: usize,
    },

    /// Port cannot be used this way
    #[error("Port {port} of node {node} is a {kind:?} port")]
    WrongPortKind {
        /// Node
        node: NodeId,
        /// Port index
        port: usize,
        /// Actual kind
        kind: PortKind,
    },

    /// Node kind does not implement the hook needed
    #[error("Node kind {kind} does not support {what}")]
    Unsupported {
        /// Node kind
        kind: NodeKindId,
        /// Missing behaviour
        what: &'static str,
    },

    /// Top-level signature has no such port
    #[error("Unknown signature port: {0}")]
    UnknownSignaturePort(usize),

    /// Node storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Failure raised by node logic
    #[error("{0}")]
    Node(String),
}

/// Activation state of a blueprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, not yet initialized
    Uninitialized,
    /// Accepting calls and reads
    Initialized,
    /// Deinitialized; may be initialized again
    DeInitialized,
}

/// A running instance of a compiled graph
#[derive(Debug)]
pub struct Blueprint {
    compiled: Arc<CompiledGraph>,
    storage: NodeStorage,
    blackboards: HashMap<NodeId, Blackboard>,
    state: LifecycleState,
    settings: RuntimeSettings,
    signature_exits: Vec<usize>,
}

impl Blueprint {
    /// Create an instance with its own copy of the node state
    pub fn new(compiled: Arc<CompiledGraph>, settings: RuntimeSettings) -> Self {
        let storage = compiled.template().clone();
        let blackboards = compiled
            .scopes()
            .map(|(root, blackboard)| (root, blackboard.clone()))
            .collect();
        Self {
            compiled,
            storage,
            blackboards,
            state: LifecycleState::Uninitialized,
            settings,
            signature_exits: Vec::new(),
        }
    }

    /// Compiled graph this instance runs
    pub fn compiled(&self) -> &Arc<CompiledGraph> {
        &self.compiled
    }

    /// Activation state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run every node's `on_initialize`, parents first.
    ///
    /// If a node fails, the nodes initialized before it are deinitialized in
    /// reverse order and the previous state is restored.
    pub fn initialize(&mut self) -> NodeResult {
        if self.state == LifecycleState::Initialized {
            return Err(RuntimeError::AlreadyInitialized);
        }
        let previous = self.state;
        // Hooks may already call into the graph
        self.state = LifecycleState::Initialized;

        let compiled = Arc::clone(&self.compiled);
        let mut done = Vec::new();
        for (id, node) in compiled.nodes() {
            let token = NodeToken::new(node.root, id);
            let outcome = Self::vtable_of(&compiled, node)
                .and_then(|vtable| (vtable.on_initialize)(self, token).map(|()| vtable));
            match outcome {
                Ok(vtable) => done.push((vtable, token)),
                Err(err) => {
                    warn!(node = %id, error = %err, "Initialization failed, rolling back");
                    for (vtable, token) in done.into_iter().rev() {
                        if let Err(err) = (vtable.on_deinitialize)(self, token) {
                            warn!(node = %token.node, error = %err, "Rollback failed");
                        }
                    }
                    self.state = previous;
                    self.signature_exits.clear();
                    return Err(err);
                }
            }
        }
        debug!(nodes = compiled.node_count(), "Blueprint initialized");
        Ok(())
    }

    /// Run every node's `on_deinitialize`, in reverse order
    pub fn deinitialize(&mut self) -> NodeResult {
        self.ensure_initialized()?;

        let compiled = Arc::clone(&self.compiled);
        let mut result = Ok(());
        for (id, node) in compiled.nodes().collect::<Vec<_>>().into_iter().rev() {
            let outcome = Self::vtable_of(&compiled, node)
                .and_then(|vtable| (vtable.on_deinitialize)(self, NodeToken::new(node.root, id)));
            if result.is_ok() {
                result = outcome;
            }
        }
        self.state = LifecycleState::DeInitialized;
        self.signature_exits.clear();
        debug!("Blueprint deinitialized");
        result
    }

    fn ensure_initialized(&self) -> NodeResult {
        if self.state == LifecycleState::Initialized {
            Ok(())
        } else {
            Err(RuntimeError::NotInitialized)
        }
    }

    fn vtable_of(compiled: &CompiledGraph, node: &CompiledNode) -> Result<NodeVTable, RuntimeError> {
        compiled
            .registry()
            .get(node.kind)
            .copied()
            .ok_or(RuntimeError::Unsupported {
                kind: node.kind,
                what: "dispatch",
            })
    }

    fn port_kind(node: &CompiledNode, token: NodeToken, port: usize) -> Result<PortKind, RuntimeError> {
        node.ports
            .get(port)
            .map(|declared| declared.kind)
            .ok_or(RuntimeError::UnknownPort {
                node: token.node,
                port,
            })
    }

    /// Push control flow into a port.
    ///
    /// On an enter port the node's handler runs. On an exit port every linked
    /// enter port is called, in link order.
    pub fn call(&mut self, token: NodeToken, port: usize) -> NodeResult {
        self.ensure_initialized()?;
        let compiled = Arc::clone(&self.compiled);
        let node = compiled
            .node(token.node)
            .ok_or(RuntimeError::UnknownNode(token.node))?;
        let address = PortAddress::new(token.node, port);
        if self.settings.trace_calls {
            trace!(node = %token.node, kind = %node.kind, port, "Call");
        }

        match Self::port_kind(node, token, port)? {
            PortKind::Exit => {
                for target in compiled.links_from(address) {
                    self.call(token.with_node(target.node), target.port)?;
                }
                Ok(())
            }
            PortKind::Enter => {
                if let Some(inner) = &node.host {
                    let inner = inner.get(port).ok_or(RuntimeError::UnknownPort {
                        node: token.node,
                        port,
                    })?;
                    return self.call(NodeToken::new(token.node, inner.node), inner.port);
                }
                if let Some(index) = compiled.root_port(address) {
                    return self.leave_scope(&compiled, token, index);
                }
                let forwards = compiled.forwards(address);
                if !forwards.is_empty() {
                    for target in forwards {
                        self.call(token.with_node(target.node), target.port)?;
                    }
                    return Ok(());
                }

                let vtable = Self::vtable_of(&compiled, node)?;
                if !vtable.capabilities.enter_port {
                    return Err(RuntimeError::Unsupported {
                        kind: node.kind,
                        what: "enter ports",
                    });
                }
                (vtable.on_enter_port)(self, token, port)
            }
            kind => Err(RuntimeError::WrongPortKind {
                node: token.node,
                port,
                kind,
            }),
        }
    }

    /// Flow reached a root enter port: continue at the host's matching exit
    fn leave_scope(&mut self, compiled: &CompiledGraph, token: NodeToken, index: usize) -> NodeResult {
        if token.root.is_none() {
            self.signature_exits.push(index);
            return Ok(());
        }
        let host_scope = compiled
            .node(token.root)
            .ok_or(RuntimeError::UnknownNode(token.root))?
            .root;
        self.call(NodeToken::new(host_scope, token.root), index)
    }

    /// Pull the value of a port, coerced to `T` (or `T::default()`)
    pub fn read<T: FromValue + Default>(&mut self, token: NodeToken, port: usize) -> Result<T, RuntimeError> {
        Ok(T::from_value(self.read_value(token, port)?).unwrap_or_default())
    }

    /// Pull the value of a port.
    ///
    /// An unlinked input yields its default value, or [`Value::None`].
    pub fn read_value(&mut self, token: NodeToken, port: usize) -> Result<Value, RuntimeError> {
        self.ensure_initialized()?;
        let compiled = Arc::clone(&self.compiled);
        let node = compiled
            .node(token.node)
            .ok_or(RuntimeError::UnknownNode(token.node))?;
        let address = PortAddress::new(token.node, port);
        if self.settings.trace_calls {
            trace!(node = %token.node, kind = %node.kind, port, "Read");
        }

        match Self::port_kind(node, token, port)? {
            PortKind::Input => match compiled.links_to(address).first() {
                Some(source) => self.read_value(token.with_node(source.node), source.port),
                None => Ok(node.ports[port].default_value.clone().unwrap_or_default()),
            },
            PortKind::Output => {
                if let Some(inner) = &node.host {
                    let inner = inner.get(port).ok_or(RuntimeError::UnknownPort {
                        node: token.node,
                        port,
                    })?;
                    return self.read_value(NodeToken::new(token.node, inner.node), inner.port);
                }
                if let Some(index) = compiled.root_port(address) {
                    return self.read_parameter(&compiled, node, token, port, index);
                }
                if let Some(target) = compiled.forwards(address).first() {
                    return self.read_value(token.with_node(target.node), target.port);
                }

                let vtable = Self::vtable_of(&compiled, node)?;
                if !vtable.capabilities.port_value {
                    return Err(RuntimeError::Unsupported {
                        kind: node.kind,
                        what: "output values",
                    });
                }
                (vtable.port_value)(self, token, port)
            }
            kind => Err(RuntimeError::WrongPortKind {
                node: token.node,
                port,
                kind,
            }),
        }
    }

    /// A root output was read: take the value from the host's matching input,
    /// or from the top-level blackboard.
    fn read_parameter(
        &mut self,
        compiled: &CompiledGraph,
        node: &CompiledNode,
        token: NodeToken,
        port: usize,
        index: usize,
    ) -> Result<Value, RuntimeError> {
        if token.root.is_none() {
            let name = &node.ports[port].name;
            return Ok(self
                .blackboards
                .get(&NodeId::NONE)
                .and_then(|blackboard| blackboard.get(name))
                .cloned()
                .unwrap_or_default());
        }
        let host_scope = compiled
            .node(token.root)
            .ok_or(RuntimeError::UnknownNode(token.root))?
            .root;
        self.read_value(NodeToken::new(host_scope, token.root), index)
    }

    /// Number of links arriving at an input
    pub fn link_count(&self, token: NodeToken, port: usize) -> Result<usize, RuntimeError> {
        self.ensure_initialized()?;
        let node = self
            .compiled
            .node(token.node)
            .ok_or(RuntimeError::UnknownNode(token.node))?;
        match Self::port_kind(node, token, port)? {
            PortKind::Input => Ok(self.compiled.links_to(PortAddress::new(token.node, port)).len()),
            kind => Err(RuntimeError::WrongPortKind {
                node: token.node,
                port,
                kind,
            }),
        }
    }

    /// Pull the value of the `index`th link of a multi-link input
    pub fn read_link_value(&mut self, token: NodeToken, port: usize, index: usize) -> Result<Value, RuntimeError> {
        let source = self
            .compiled
            .links_to(PortAddress::new(token.node, port))
            .get(index)
            .copied()
            .ok_or(RuntimeError::UnknownPort {
                node: token.node,
                port,
            })?;
        self.read_value(token.with_node(source.node), source.port)
    }

    /// Pull the `index`th link of a multi-link input, coerced to `T`
    pub fn read_link<T: FromValue + Default>(
        &mut self,
        token: NodeToken,
        port: usize,
        index: usize,
    ) -> Result<T, RuntimeError> {
        Ok(T::from_value(self.read_link_value(token, port, index)?).unwrap_or_default())
    }

    /// Call a top-level signature enter port
    pub fn call_signature(&mut self, index: usize) -> NodeResult {
        let address = self.signature_address(index, PortKind::Enter)?;
        self.call(NodeToken::top_level(address.node), address.port)
    }

    /// Read a top-level signature output
    pub fn read_signature<T: FromValue + Default>(&mut self, index: usize) -> Result<T, RuntimeError> {
        let address = self.signature_address(index, PortKind::Output)?;
        self.read(NodeToken::top_level(address.node), address.port)
    }

    fn signature_address(&self, index: usize, kind: PortKind) -> Result<PortAddress, RuntimeError> {
        match self.compiled.signature().ports.get(index) {
            Some(port) if port.kind == kind => self
                .compiled
                .signature_address(index)
                .ok_or(RuntimeError::UnknownSignaturePort(index)),
            _ => Err(RuntimeError::UnknownSignaturePort(index)),
        }
    }

    /// Signature exits reached at top level since the last call, in order
    pub fn take_signature_exits(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.signature_exits)
    }

    /// Get a node's state
    pub fn node<T: BlueprintNode>(&self, id: NodeId) -> Result<&T, RuntimeError> {
        Ok(self.storage.get::<T>(id)?)
    }

    /// Get a node's state mutably
    pub fn node_mut<T: BlueprintNode>(&mut self, id: NodeId) -> Result<&mut T, RuntimeError> {
        Ok(self.storage.get_mut::<T>(id)?)
    }

    /// Blackboard of a scope; `NodeId::NONE` is the top level
    pub fn blackboard(&self, root: NodeId) -> Option<&Blackboard> {
        self.blackboards.get(&root)
    }

    /// Mutable blackboard of a scope
    pub fn blackboard_mut(&mut self, root: NodeId) -> Option<&mut Blackboard> {
        self.blackboards.get_mut(&root)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::id::GraphAssetId;
    use crate::library::GraphLibrary;
    use crate::meta::{GraphMeta, MetaError};
    use crate::node::Capabilities;
    use crate::nodes::{
        BlackboardValue, Constant, Goto, GotoExit, Iterate, Pipe, Root, Subgraph,
    };
    use crate::port::{Capacity, Port};
    use crate::subgraph::SubgraphTree;
    use crate::value::DataType;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<Value>>>;

    /// Logs every value linked into "Values" each time it is entered
    #[derive(Debug, Clone, Default)]
    struct Probe {
        log: Log,
    }

    impl Probe {
        const IN: usize = 0;
        const OUT: usize = 1;
        const VALUES: usize = 2;

        fn new(log: &Log) -> Self {
            Self { log: Rc::clone(log) }
        }
    }

    impl BlueprintNode for Probe {
        const KIND: NodeKindId = NodeKindId::new("Test.Probe");
        const CAPABILITIES: Capabilities = Capabilities::NONE.with_enter_port();

        fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
            meta.add_port(id, Port::enter("In"))?;
            meta.add_port(id, Port::exit("Out"))?;
            meta.add_port(
                id,
                Port::input("Values", DataType::Any).with_capacity(Capacity::Multiple),
            )?;
            Ok(())
        }

        fn on_enter_port(blueprint: &mut Blueprint, token: NodeToken, _port: usize) -> NodeResult {
            let mut values = Vec::new();
            for link in 0..blueprint.link_count(token, Self::VALUES)? {
                values.push(blueprint.read_link_value(token, Self::VALUES, link)?);
            }
            blueprint.node::<Self>(token.node)?.log.borrow_mut().push(Value::Array(values));
            blueprint.call(token, Self::OUT)
        }
    }

    /// Fires "Hit" when its input equals `at`
    #[derive(Debug, Clone, Default)]
    struct BreakAt {
        at: i32,
    }

    impl BlueprintNode for BreakAt {
        const KIND: NodeKindId = NodeKindId::new("Test.BreakAt");
        const CAPABILITIES: Capabilities = Capabilities::NONE.with_enter_port();

        fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
            meta.add_port(id, Port::enter("In"))?;
            meta.add_port(id, Port::input("Value", DataType::Int))?;
            meta.add_port(id, Port::exit("Hit"))?;
            Ok(())
        }

        fn on_enter_port(blueprint: &mut Blueprint, token: NodeToken, _port: usize) -> NodeResult {
            let value: i32 = blueprint.read(token, 1)?;
            if value == blueprint.node::<Self>(token.node)?.at {
                blueprint.call(token, 2)?;
            }
            Ok(())
        }
    }

    /// Fires "Hit" the first time it is entered
    #[derive(Debug, Clone, Default)]
    struct Once {
        fired: bool,
    }

    impl BlueprintNode for Once {
        const KIND: NodeKindId = NodeKindId::new("Test.Once");
        const CAPABILITIES: Capabilities = Capabilities::NONE.with_enter_port();

        fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
            meta.add_port(id, Port::enter("In"))?;
            meta.add_port(id, Port::exit("Hit"))?;
            Ok(())
        }

        fn on_enter_port(blueprint: &mut Blueprint, token: NodeToken, _port: usize) -> NodeResult {
            let node = blueprint.node_mut::<Self>(token.node)?;
            if node.fired {
                return Ok(());
            }
            node.fired = true;
            blueprint.call(token, 1)
        }
    }

    /// Logs its name on initialize and deinitialize
    #[derive(Debug, Clone, Default)]
    struct Lifecycle {
        name: &'static str,
        log: Log,
        fail: bool,
    }

    impl BlueprintNode for Lifecycle {
        const KIND: NodeKindId = NodeKindId::new("Test.Lifecycle");

        fn create_ports(_meta: &mut GraphMeta, _id: NodeId) -> Result<(), MetaError> {
            Ok(())
        }

        fn on_initialize(blueprint: &mut Blueprint, token: NodeToken) -> NodeResult {
            let node = blueprint.node::<Self>(token.node)?;
            if node.fail {
                return Err(RuntimeError::Node(format!("{} refused to start", node.name)));
            }
            node.log.borrow_mut().push(format!("init {}", node.name).into());
            Ok(())
        }

        fn on_deinitialize(blueprint: &mut Blueprint, token: NodeToken) -> NodeResult {
            let node = blueprint.node::<Self>(token.node)?;
            node.log.borrow_mut().push(format!("deinit {}", node.name).into());
            Ok(())
        }
    }

    fn start(library: &GraphLibrary, tree: &SubgraphTree, root: GraphAssetId) -> Blueprint {
        let compiled = Compiler::default().compile(library, tree, root).unwrap();
        let mut blueprint = Blueprint::new(compiled, RuntimeSettings::default());
        blueprint.initialize().unwrap();
        blueprint
    }

    fn ints(rows: &[&[i32]]) -> Vec<Value> {
        rows.iter()
            .map(|row| Value::Array(row.iter().map(|&v| Value::Int(v)).collect()))
            .collect()
    }

    #[test]
    fn test_pipe_calls_exits_in_order() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let pipe = meta.add_node(Pipe::new(3)).unwrap();
        meta.connect(root, 0, pipe, Pipe::IN).unwrap();
        for n in 0..3 {
            let probe = meta.add_node(Probe::new(&log)).unwrap();
            let value = meta.add_node(Constant::new(n as i32)).unwrap();
            meta.connect(pipe, Pipe::exit(n), probe, Probe::IN).unwrap();
            meta.connect(value, Constant::OUT, probe, Probe::VALUES).unwrap();
        }

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        blueprint.call_signature(0).unwrap();
        assert_eq!(*log.borrow(), ints(&[&[0], &[1], &[2]]));
    }

    #[test]
    fn test_iterate_visits_scalars_and_arrays() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let iterate = meta.add_node(Iterate::default()).unwrap();
        let scalar = meta.add_node(Constant::new(5)).unwrap();
        let array = meta.add_node(Constant::new(vec![1, 2, 3])).unwrap();
        let each = meta.add_node(Probe::new(&log)).unwrap();
        let done = meta.add_node(Probe::new(&log)).unwrap();
        meta.connect(root, 0, iterate, Iterate::START).unwrap();
        meta.connect(scalar, Constant::OUT, iterate, Iterate::ELEMENTS).unwrap();
        meta.connect(array, Constant::OUT, iterate, Iterate::ELEMENTS).unwrap();
        meta.connect(iterate, Iterate::ON_ITERATION, each, Probe::IN).unwrap();
        meta.connect(iterate, Iterate::INDEX, each, Probe::VALUES).unwrap();
        meta.connect(iterate, Iterate::ELEMENT, each, Probe::VALUES).unwrap();
        meta.connect(iterate, Iterate::ON_FINISH, done, Probe::IN).unwrap();
        meta.connect(iterate, Iterate::INDEX, done, Probe::VALUES).unwrap();

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        blueprint.call_signature(0).unwrap();
        assert_eq!(
            *log.borrow(),
            ints(&[&[0, 5], &[1, 1], &[2, 2], &[3, 3], &[4]])
        );

        // A second run starts from zero again
        log.borrow_mut().clear();
        blueprint.call_signature(0).unwrap();
        assert_eq!(log.borrow().len(), 5);
        assert_eq!(log.borrow()[0], ints(&[&[0, 5]])[0]);
    }

    #[test]
    fn test_iterate_break_stops_after_current_element() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let iterate = meta.add_node(Iterate::default()).unwrap();
        let items = meta.add_node(Constant::new(vec![1, 2, 3, 4])).unwrap();
        let pipe = meta.add_node(Pipe::new(2)).unwrap();
        let probe = meta.add_node(Probe::new(&log)).unwrap();
        let stop = meta.add_node(BreakAt { at: 2 }).unwrap();
        let done = meta.add_node(Probe::new(&log)).unwrap();
        meta.connect(root, 0, iterate, Iterate::START).unwrap();
        meta.connect(items, Constant::OUT, iterate, Iterate::ELEMENTS).unwrap();
        meta.connect(iterate, Iterate::ON_ITERATION, pipe, Pipe::IN).unwrap();
        meta.connect(pipe, Pipe::exit(0), probe, Probe::IN).unwrap();
        meta.connect(iterate, Iterate::ELEMENT, probe, Probe::VALUES).unwrap();
        meta.connect(pipe, Pipe::exit(1), stop, 0).unwrap();
        meta.connect(iterate, Iterate::ELEMENT, stop, 1).unwrap();
        meta.connect(stop, 2, iterate, Iterate::BREAK).unwrap();
        meta.connect(iterate, Iterate::ON_FINISH, done, Probe::IN).unwrap();

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        blueprint.call_signature(0).unwrap();
        assert_eq!(*log.borrow(), ints(&[&[1], &[2], &[]]));
    }

    #[test]
    fn test_iterate_nested_start_restores_outer_loop() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let iterate = meta.add_node(Iterate::default()).unwrap();
        let items = meta.add_node(Constant::new(vec![7, 8])).unwrap();
        let label = meta.add_node(Constant::new("after")).unwrap();
        let pipe = meta.add_node(Pipe::new(3)).unwrap();
        let each = meta.add_node(Probe::new(&log)).unwrap();
        let again = meta.add_node(Once::default()).unwrap();
        let after = meta.add_node(Probe::new(&log)).unwrap();
        let done = meta.add_node(Probe::new(&log)).unwrap();
        meta.connect(root, 0, iterate, Iterate::START).unwrap();
        meta.connect(items, Constant::OUT, iterate, Iterate::ELEMENTS).unwrap();
        meta.connect(iterate, Iterate::ON_ITERATION, pipe, Pipe::IN).unwrap();
        meta.connect(pipe, Pipe::exit(0), each, Probe::IN).unwrap();
        meta.connect(iterate, Iterate::INDEX, each, Probe::VALUES).unwrap();
        meta.connect(iterate, Iterate::ELEMENT, each, Probe::VALUES).unwrap();
        // The first element restarts the same node
        meta.connect(pipe, Pipe::exit(1), again, 0).unwrap();
        meta.connect(again, 1, iterate, Iterate::START).unwrap();
        meta.connect(pipe, Pipe::exit(2), after, Probe::IN).unwrap();
        meta.connect(label, Constant::OUT, after, Probe::VALUES).unwrap();
        meta.connect(iterate, Iterate::INDEX, after, Probe::VALUES).unwrap();
        meta.connect(iterate, Iterate::ELEMENT, after, Probe::VALUES).unwrap();
        meta.connect(iterate, Iterate::ON_FINISH, done, Probe::IN).unwrap();
        meta.connect(iterate, Iterate::INDEX, done, Probe::VALUES).unwrap();

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        blueprint.call_signature(0).unwrap();

        let labelled = |index: i32, element: i32| {
            Value::Array(vec!["after".into(), Value::Int(index), Value::Int(element)])
        };
        let row = |values: &[i32]| Value::Array(values.iter().copied().map(Value::Int).collect());
        let expected = vec![
            row(&[0, 7]),
            // Inner loop
            row(&[0, 7]),
            labelled(0, 7),
            row(&[1, 8]),
            labelled(1, 8),
            row(&[2]),
            // Outer loop resumes where it was
            labelled(0, 7),
            row(&[1, 8]),
            labelled(1, 8),
            row(&[2]),
        ];
        assert_eq!(*log.borrow(), expected);
    }

    /// "For Each" sub-graph: Run, Each, Items, Item
    fn for_each(library: &mut GraphLibrary) -> GraphAssetId {
        let child = library.create_graph("For Each");
        let meta = library.graph_mut(child).unwrap();
        let root = meta
            .add_node(
                Root::new()
                    .with_enter("Run")
                    .with_exit("Each")
                    .with_input("Items", DataType::array_of(DataType::Int))
                    .with_output("Item", DataType::Int),
            )
            .unwrap();
        let iterate = meta.add_node(Iterate::default()).unwrap();
        meta.connect(root, 0, iterate, Iterate::START).unwrap();
        meta.connect(root, 2, iterate, Iterate::ELEMENTS).unwrap();
        meta.connect(iterate, Iterate::ON_ITERATION, root, 1).unwrap();
        meta.connect(iterate, Iterate::ELEMENT, root, 3).unwrap();
        child
    }

    #[test]
    fn test_nested_subgraph_instances_keep_separate_state() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let child = for_each(&mut library);
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let outer = meta.add_node(Subgraph::default()).unwrap();
        let inner = meta.add_node(Subgraph::default()).unwrap();
        let first = meta.add_node(Constant::new(vec![1, 2])).unwrap();
        let second = meta.add_node(Constant::new(vec![10, 20, 30])).unwrap();
        let probe = meta.add_node(Probe::new(&log)).unwrap();
        library.assign_subgraph(main, outer, Some(child)).unwrap();
        library.assign_subgraph(main, inner, Some(child)).unwrap();

        let meta = library.graph_mut(main).unwrap();
        meta.connect(root, 0, outer, 0).unwrap();
        meta.connect(first, Constant::OUT, outer, 2).unwrap();
        meta.connect(outer, 1, inner, 0).unwrap();
        meta.connect(second, Constant::OUT, inner, 2).unwrap();
        meta.connect(inner, 1, probe, Probe::IN).unwrap();
        meta.connect(outer, 3, probe, Probe::VALUES).unwrap();
        meta.connect(inner, 3, probe, Probe::VALUES).unwrap();

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        blueprint.call_signature(0).unwrap();
        assert_eq!(
            *log.borrow(),
            ints(&[&[1, 10], &[1, 20], &[1, 30], &[2, 10], &[2, 20], &[2, 30]])
        );
    }

    #[test]
    fn test_goto_continues_at_label() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let jump = meta.add_node(GotoExit::new("Skip")).unwrap();
        let label = meta.add_node(Goto::new("Skip")).unwrap();
        let probe = meta.add_node(Probe::new(&log)).unwrap();
        let value = meta.add_node(Constant::new(7)).unwrap();
        meta.connect(root, 0, jump, GotoExit::IN).unwrap();
        meta.connect(label, Goto::OUT, probe, Probe::IN).unwrap();
        meta.connect(value, Constant::OUT, probe, Probe::VALUES).unwrap();

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        blueprint.call_signature(0).unwrap();
        assert_eq!(*log.borrow(), ints(&[&[7]]));
    }

    #[test]
    fn test_blackboard_overrides_per_host() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let child = library.create_graph("Mover");
        let meta = library.graph_mut(child).unwrap();
        meta.blackboard_mut().set("Speed", 1.0f32);
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let speed = meta
            .add_node(BlackboardValue::new("Speed", DataType::Float))
            .unwrap();
        let probe = meta.add_node(Probe::new(&log)).unwrap();
        meta.connect(root, 0, probe, Probe::IN).unwrap();
        meta.connect(speed, BlackboardValue::OUT, probe, Probe::VALUES).unwrap();

        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let root = meta.add_node(Root::new().with_enter("Run")).unwrap();
        let pipe = meta.add_node(Pipe::new(2)).unwrap();
        let slow = meta.add_node(Subgraph::default()).unwrap();
        let fast = meta.add_node(Subgraph::default()).unwrap();
        library.assign_subgraph(main, slow, Some(child)).unwrap();
        library.assign_subgraph(main, fast, Some(child)).unwrap();
        let meta = library.graph_mut(main).unwrap();
        meta.connect(root, 0, pipe, Pipe::IN).unwrap();
        meta.connect(pipe, Pipe::exit(0), slow, 0).unwrap();
        meta.connect(pipe, Pipe::exit(1), fast, 0).unwrap();

        let mut tree = SubgraphTree::new();
        tree.sync(&library, main);
        let entry = tree.find(fast, None).unwrap();
        tree.set_overrides(entry, Some(Blackboard::new().with("Speed", 3.0f32)));

        let mut blueprint = start(&library, &tree, main);
        blueprint.call_signature(0).unwrap();
        let floats = |v: f32| Value::Array(vec![Value::Float(v)]);
        assert_eq!(*log.borrow(), vec![floats(1.0), floats(3.0)]);

        // Scope blackboards belong to the instance
        let slow = blueprint.compiled().runtime_id(slow).unwrap();
        blueprint.blackboard_mut(slow).unwrap().set("Speed", 2.0f32);
        log.borrow_mut().clear();
        blueprint.call_signature(0).unwrap();
        assert_eq!(*log.borrow(), vec![floats(2.0), floats(3.0)]);
    }

    #[test]
    fn test_top_level_signature() {
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        meta.blackboard_mut().set("Count", 4);
        let root = meta
            .add_node(
                Root::new()
                    .with_enter("Run")
                    .with_exit("Done")
                    .with_input("Count", DataType::Int)
                    .with_output("Result", DataType::Int),
            )
            .unwrap();
        meta.connect(root, 0, root, 1).unwrap();
        meta.connect(root, 2, root, 3).unwrap();

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        blueprint.call_signature(0).unwrap();
        blueprint.call_signature(0).unwrap();
        assert_eq!(blueprint.take_signature_exits(), vec![1, 1]);
        assert!(blueprint.take_signature_exits().is_empty());
        assert_eq!(blueprint.read_signature::<i32>(3).unwrap(), 4);

        assert_eq!(
            blueprint.call_signature(1),
            Err(RuntimeError::UnknownSignaturePort(1))
        );
        assert_eq!(
            blueprint.read_signature::<i32>(2),
            Err(RuntimeError::UnknownSignaturePort(2))
        );
        assert_eq!(
            blueprint.call_signature(9),
            Err(RuntimeError::UnknownSignaturePort(9))
        );
    }

    #[test]
    fn test_lifecycle() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        meta.add_node(Root::new().with_enter("Run")).unwrap();
        meta.add_node(Lifecycle { name: "a", log: Rc::clone(&log), fail: false }).unwrap();
        meta.add_node(Lifecycle { name: "b", log: Rc::clone(&log), fail: false }).unwrap();

        let compiled = Compiler::default()
            .compile(&library, &SubgraphTree::new(), main)
            .unwrap();
        let mut blueprint = Blueprint::new(compiled, RuntimeSettings::default());
        assert_eq!(blueprint.state(), LifecycleState::Uninitialized);
        assert_eq!(blueprint.call_signature(0), Err(RuntimeError::NotInitialized));
        assert_eq!(blueprint.deinitialize(), Err(RuntimeError::NotInitialized));

        blueprint.initialize().unwrap();
        assert_eq!(blueprint.initialize(), Err(RuntimeError::AlreadyInitialized));
        blueprint.call_signature(0).unwrap();
        blueprint.deinitialize().unwrap();
        assert_eq!(blueprint.state(), LifecycleState::DeInitialized);
        assert_eq!(blueprint.call_signature(0), Err(RuntimeError::NotInitialized));

        blueprint.initialize().unwrap();
        let expected: Vec<Value> = ["init a", "init b", "deinit b", "deinit a", "init a", "init b"]
            .into_iter()
            .map(Value::from)
            .collect();
        assert_eq!(*log.borrow(), expected);
    }

    #[test]
    fn test_failed_initialize_rolls_back() {
        let log = Log::default();
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        meta.add_node(Root::new().with_enter("Run")).unwrap();
        meta.add_node(Lifecycle { name: "a", log: Rc::clone(&log), fail: false }).unwrap();
        meta.add_node(Lifecycle { name: "b", log: Rc::clone(&log), fail: false }).unwrap();
        let broken = meta
            .add_node(Lifecycle { name: "c", log: Rc::clone(&log), fail: true })
            .unwrap();

        let compiled = Compiler::default()
            .compile(&library, &SubgraphTree::new(), main)
            .unwrap();
        let mut blueprint = Blueprint::new(compiled, RuntimeSettings::default());
        assert_eq!(
            blueprint.initialize(),
            Err(RuntimeError::Node("c refused to start".into()))
        );
        assert_eq!(blueprint.state(), LifecycleState::Uninitialized);
        assert_eq!(blueprint.call_signature(0), Err(RuntimeError::NotInitialized));
        let expected: Vec<Value> = ["init a", "init b", "deinit b", "deinit a"]
            .into_iter()
            .map(Value::from)
            .collect();
        assert_eq!(*log.borrow(), expected);

        // Fixed up, the same instance starts normally
        let broken = blueprint.compiled().runtime_id(broken).unwrap();
        blueprint.node_mut::<Lifecycle>(broken).unwrap().fail = false;
        blueprint.initialize().unwrap();
        assert_eq!(blueprint.state(), LifecycleState::Initialized);
        assert_eq!(log.borrow().len(), 7);
    }

    #[test]
    fn test_dispatch_errors() {
        let mut library = GraphLibrary::new();
        let main = library.create_graph("Main");
        let meta = library.graph_mut(main).unwrap();
        let value = meta.add_node(Constant::new(1)).unwrap();
        let pipe = meta.add_node(Pipe::new(1)).unwrap();

        let mut blueprint = start(&library, &SubgraphTree::new(), main);
        let value = NodeToken::top_level(blueprint.compiled().runtime_id(value).unwrap());
        let pipe = NodeToken::top_level(blueprint.compiled().runtime_id(pipe).unwrap());

        assert_eq!(blueprint.read::<i32>(value, Constant::OUT).unwrap(), 1);
        assert_eq!(
            blueprint.call(value, Constant::OUT),
            Err(RuntimeError::WrongPortKind {
                node: value.node,
                port: Constant::OUT,
                kind: PortKind::Output,
            })
        );
        assert_eq!(
            blueprint.call(value, 5),
            Err(RuntimeError::UnknownPort { node: value.node, port: 5 })
        );
        // Unlinked exits are a no-op
        blueprint.call(pipe, Pipe::IN).unwrap();
        assert_eq!(
            blueprint.read_value(NodeToken::top_level(NodeId::new(0, 999)), 0),
            Err(RuntimeError::UnknownNode(NodeId::new(0, 999)))
        );
        assert!(matches!(
            blueprint.node::<Pipe>(value.node),
            Err(RuntimeError::Storage(StorageError::TypeMismatch { .. }))
        ));
    }
}
