// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link (edge) definitions for the graph.

use crate::id::{NodeId, PortAddress};
use serde::{Deserialize, Serialize};

/// A link from a producing port (exit/output) to a consuming port (enter/input)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Producing port
    pub from: PortAddress,
    /// Consuming port
    pub to: PortAddress,
}

impl Link {
    /// Create a new link
    pub fn new(from_node: NodeId, from_port: usize, to_node: NodeId, to_port: usize) -> Self {
        Self {
            from: PortAddress::new(from_node, from_port),
            to: PortAddress::new(to_node, to_port),
        }
    }

    /// Check if this link involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.from.node == node_id || self.to.node == node_id
    }

    /// Check if this link involves a specific port
    pub fn involves_port(&self, port: PortAddress) -> bool {
        self.from == port || self.to == port
    }

    /// The end of this link that is not `port`
    pub fn other_end(&self, port: PortAddress) -> Option<PortAddress> {
        if self.from == port {
            Some(self.to)
        } else if self.to == port {
            Some(self.from)
        } else {
            None
        }
    }
}
