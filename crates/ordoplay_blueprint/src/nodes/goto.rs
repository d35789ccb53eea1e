// SPDX-License-Identifier: MIT OR Apache-2.0
//! Label jumps: flow that leaves through a `GotoExit` resumes at every
//! `Goto` carrying the same label.
//!
//! Neither side draws a link. The compiler matches them by label hash.

use crate::id::{label_hash, NodeId};
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, Capabilities, HashLink, NodeKindId};
use crate::port::Port;

/// Resumes flow that left through a `GotoExit` with the same label
#[derive(Debug, Clone, Default)]
pub struct Goto {
    /// Label to listen on
    pub label: String,
}

impl Goto {
    /// Entered through the label
    pub const IN: usize = 0;
    /// Continues the flow
    pub const OUT: usize = 1;

    /// Create a label target
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl BlueprintNode for Goto {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.Goto");
    const CAPABILITIES: Capabilities = Capabilities::NONE
        .with_internal_links()
        .with_hash_link()
        .with_compile();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        meta.add_port(id, Port::enter("In"))?;
        meta.add_port(id, Port::exit("Out"))?;
        Ok(())
    }

    fn linked_ports(_meta: &GraphMeta, _id: NodeId, port: usize) -> Vec<usize> {
        if port == Self::IN {
            vec![Self::OUT]
        } else {
            Vec::new()
        }
    }

    fn hash_link(meta: &GraphMeta, id: NodeId) -> Option<HashLink> {
        let label = &meta.node::<Self>(id).ok()?.label;
        (!label.is_empty()).then(|| HashLink {
            hash: label_hash(label),
            port: Self::IN,
        })
    }

    fn on_compile(meta: &GraphMeta, id: NodeId) -> Result<(), String> {
        match meta.node::<Self>(id) {
            Ok(node) if node.label.is_empty() => Err("goto has no label".to_string()),
            _ => Ok(()),
        }
    }
}

/// Leaves the current flow and jumps to the `Goto` nodes sharing its label
#[derive(Debug, Clone, Default)]
pub struct GotoExit {
    /// Label to jump to
    pub label: String,
}

impl GotoExit {
    /// Starts the jump
    pub const IN: usize = 0;
    /// Linked to the matching `Goto` nodes
    pub const OUT: usize = 1;

    /// Create a jump
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl BlueprintNode for GotoExit {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.GotoExit");
    const CAPABILITIES: Capabilities = Capabilities::NONE
        .with_internal_links()
        .with_hash_link()
        .with_compile();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        meta.add_port(id, Port::enter("In"))?;
        meta.add_port(id, Port::exit("Jump"))?;
        Ok(())
    }

    fn linked_ports(_meta: &GraphMeta, _id: NodeId, port: usize) -> Vec<usize> {
        if port == Self::IN {
            vec![Self::OUT]
        } else {
            Vec::new()
        }
    }

    fn hash_link(meta: &GraphMeta, id: NodeId) -> Option<HashLink> {
        let label = &meta.node::<Self>(id).ok()?.label;
        (!label.is_empty()).then(|| HashLink {
            hash: label_hash(label),
            port: Self::OUT,
        })
    }

    fn on_compile(meta: &GraphMeta, id: NodeId) -> Result<(), String> {
        match meta.node::<Self>(id) {
            Ok(node) if node.label.is_empty() => Err("goto exit has no label".to_string()),
            _ => Ok(()),
        }
    }
}
