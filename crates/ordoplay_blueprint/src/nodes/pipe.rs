// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fan-out of one flow into several, in port order.

use crate::id::NodeId;
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, Capabilities, NodeKindId};
use crate::port::Port;

/// Calls each of its exits once, in declaration order
#[derive(Debug, Clone)]
pub struct Pipe {
    /// Number of exit ports, at least one
    pub exits: usize,
}

impl Pipe {
    /// Enter port
    pub const IN: usize = 0;

    /// Create a pipe with the given number of exits
    pub fn new(exits: usize) -> Self {
        Self { exits }
    }

    /// Index of the `n`th exit port
    pub const fn exit(n: usize) -> usize {
        n + 1
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new(2)
    }
}

impl BlueprintNode for Pipe {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.Pipe");
    const CAPABILITIES: Capabilities = Capabilities::NONE
        .with_internal_links()
        .with_validate();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let exits = meta.node::<Self>(id)?.exits;
        meta.add_port(id, Port::enter("In"))?;
        for n in 0..exits {
            meta.add_port(id, Port::exit(format!("Out {n}")))?;
        }
        Ok(())
    }

    fn on_validate(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let node = meta.node_mut::<Self>(id)?;
        node.exits = node.exits.max(1);
        Ok(())
    }

    fn linked_ports(meta: &GraphMeta, id: NodeId, port: usize) -> Vec<usize> {
        match (port, meta.node::<Self>(id)) {
            (Self::IN, Ok(pipe)) => (0..pipe.exits).map(Self::exit).collect(),
            _ => Vec::new(),
        }
    }
}
