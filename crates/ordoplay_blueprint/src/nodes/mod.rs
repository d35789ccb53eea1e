// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node kinds the engine itself relies on.
//!
//! Domain libraries (math, gameplay) live outside the engine and register
//! their own kinds next to these.

mod blackboard_value;
mod constant;
mod goto;
mod iterate;
mod pipe;
mod reroute;
mod root;
mod subgraph;

pub use blackboard_value::BlackboardValue;
pub use constant::Constant;
pub use goto::{Goto, GotoExit};
pub use iterate::Iterate;
pub use pipe::Pipe;
pub use reroute::Reroute;
pub use root::{Root, RootPort};
pub use subgraph::Subgraph;

use crate::node::NodeRegistry;

/// Registry holding every built-in kind
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register::<Root>();
    registry.register::<Subgraph>();
    registry.register::<Pipe>();
    registry.register::<Reroute>();
    registry.register::<Iterate>();
    registry.register::<Goto>();
    registry.register::<GotoExit>();
    registry.register::<Constant>();
    registry.register::<BlackboardValue>();
    registry
}
