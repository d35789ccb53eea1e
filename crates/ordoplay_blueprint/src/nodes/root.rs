// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph root: the external surface of a graph used as a sub-graph.

use crate::id::NodeId;
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, NodeKindId};
use crate::port::{Port, PortKind};
use crate::value::DataType;
use serde::{Deserialize, Serialize};

/// One port of the external surface, described from the outside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootPort {
    /// Port name
    pub name: String,
    /// Kind seen by the host
    pub kind: PortKind,
    /// Data type, for data ports
    pub data_type: Option<DataType>,
}

/// Declares a graph's signature.
///
/// Inside the graph each port appears with the counterpart kind: an external
/// enter port is an exit the graph's flow starts from, an external input is an
/// output the graph reads from.
#[derive(Debug, Clone, Default)]
pub struct Root {
    /// Signature, in declaration order
    pub ports: Vec<RootPort>,
}

impl Root {
    /// Create a root with no ports
    pub fn new() -> Self {
        Self::default()
    }

    fn with_port(
        mut self,
        name: impl Into<String>,
        kind: PortKind,
        data_type: Option<DataType>,
    ) -> Self {
        self.ports.push(RootPort {
            name: name.into(),
            kind,
            data_type,
        });
        self
    }

    /// Add an external enter port
    pub fn with_enter(self, name: impl Into<String>) -> Self {
        self.with_port(name, PortKind::Enter, None)
    }

    /// Add an external exit port
    pub fn with_exit(self, name: impl Into<String>) -> Self {
        self.with_port(name, PortKind::Exit, None)
    }

    /// Add an external input
    pub fn with_input(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.with_port(name, PortKind::Input, Some(data_type))
    }

    /// Add an external output
    pub fn with_output(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.with_port(name, PortKind::Output, Some(data_type))
    }
}

impl BlueprintNode for Root {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.Root");

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let ports = meta.node::<Self>(id)?.ports.clone();
        for port in ports {
            meta.add_port(
                id,
                Port::new(port.name, port.kind.counterpart(), port.data_type).signature_only(),
            )?;
        }
        Ok(())
    }
}
