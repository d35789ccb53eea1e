// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reads a parameter from the blackboard of the scope it runs in.

use crate::id::{NodeId, NodeToken};
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, Capabilities, NodeKindId, NodeResult};
use crate::port::Port;
use crate::runtime::Blueprint;
use crate::value::{DataType, Value};

/// Outputs a blackboard entry, or nothing if the key is missing.
///
/// Inside a sub-graph the scope's blackboard is the sub-graph's defaults with
/// the host instance's overrides applied.
#[derive(Debug, Clone)]
pub struct BlackboardValue {
    /// Entry name
    pub key: String,
    /// Declared output type
    pub data_type: DataType,
}

impl BlackboardValue {
    /// Output port
    pub const OUT: usize = 0;

    /// Create a reader for one entry
    pub fn new(key: impl Into<String>, data_type: DataType) -> Self {
        Self {
            key: key.into(),
            data_type,
        }
    }
}

impl Default for BlackboardValue {
    fn default() -> Self {
        Self::new("", DataType::Any)
    }
}

impl BlueprintNode for BlackboardValue {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.BlackboardValue");
    const CAPABILITIES: Capabilities = Capabilities::NONE.with_port_value().with_compile();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let node = meta.node::<Self>(id)?;
        let port = Port::output(node.key.clone(), node.data_type.clone());
        meta.add_port(id, port)?;
        Ok(())
    }

    fn on_compile(meta: &GraphMeta, id: NodeId) -> Result<(), String> {
        match meta.node::<Self>(id) {
            Ok(node) if node.key.is_empty() => Err("blackboard key is empty".to_string()),
            _ => Ok(()),
        }
    }

    fn port_value(blueprint: &mut Blueprint, token: NodeToken, _port: usize) -> NodeResult<Value> {
        let key = &blueprint.node::<Self>(token.node)?.key;
        Ok(blueprint
            .blackboard(token.root)
            .and_then(|blackboard| blackboard.get(key))
            .cloned()
            .unwrap_or_default())
    }
}
