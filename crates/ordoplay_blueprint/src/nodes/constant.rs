// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixed value source.

use crate::id::{NodeId, NodeToken};
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, Capabilities, NodeKindId, NodeResult};
use crate::port::Port;
use crate::runtime::Blueprint;
use crate::value::{DataType, Value};

/// Outputs a fixed value. The port type follows the value.
#[derive(Debug, Clone, Default)]
pub struct Constant {
    /// Value produced
    pub value: Value,
}

impl Constant {
    /// Output port
    pub const OUT: usize = 0;

    /// Create a constant
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl BlueprintNode for Constant {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.Constant");
    const CAPABILITIES: Capabilities = Capabilities::NONE.with_port_value();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let data_type = meta
            .node::<Self>(id)?
            .value
            .data_type()
            .unwrap_or(DataType::Any);
        meta.add_port(id, Port::output("Value", data_type))?;
        Ok(())
    }

    fn port_value(blueprint: &mut Blueprint, token: NodeToken, _port: usize) -> NodeResult<Value> {
        Ok(blueprint.node::<Self>(token.node)?.value.clone())
    }
}
