// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blueprint visual scripting engine for `OrdoPlay`.
//!
//! Blueprints are node graphs authored in the editor and executed by gameplay
//! objects. This crate holds the engine core:
//! - Typed per-kind node storage with id-based addressing
//! - Graph authoring (ports, links, dynamic port types)
//! - Compilation into flat, address-resolved runtime tables
//! - A push/pull interpreter (`call` for control flow, `read` for data)
//!
//! ## Architecture
//!
//! Authoring happens on a [`GraphMeta`]. Node kinds declare their ports through
//! [`BlueprintNode::create_ports`] and react to link edits, which is how dynamic
//! port types propagate. The [`Compiler`] flattens a graph and every nested
//! sub-graph into a [`CompiledGraph`], and a [`Blueprint`] executes that compiled
//! graph against its own copy of the node storage.
//!
//! Node libraries plug in by implementing [`BlueprintNode`]; the kinds in
//! [`nodes`] are the ones the engine itself relies on.

pub mod blackboard;
pub mod compiler;
pub mod id;
pub mod library;
pub mod link;
pub mod meta;
pub mod node;
pub mod nodes;
pub mod port;
pub mod resolver;
pub mod runtime;
pub mod settings;
pub mod storage;
pub mod subgraph;
pub mod value;

pub use blackboard::Blackboard;
pub use compiler::{CompileError, CompileErrors, CompiledGraph, Compiler, Signature};
pub use id::{GraphAssetId, NodeId, NodeToken, PortAddress};
pub use library::GraphLibrary;
pub use link::Link;
pub use meta::{GraphMeta, LinkError, MetaError};
pub use node::{BlueprintNode, Capabilities, NodeKindId, NodeRegistry, NodeResult};
pub use port::{Capacity, Port, PortKind};
pub use runtime::{Blueprint, LifecycleState, RuntimeError};
pub use settings::EngineSettings;
pub use storage::{NodeStorage, StorageError};
pub use subgraph::SubgraphTree;
pub use value::{DataType, FromValue, Value};
