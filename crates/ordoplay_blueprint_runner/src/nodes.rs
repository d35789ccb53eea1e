// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node kinds provided by the runner.

use ordoplay_blueprint::meta::MetaError;
use ordoplay_blueprint::{
    Blueprint, BlueprintNode, Capabilities, DataType, GraphMeta, NodeId, NodeKindId, NodeResult,
    NodeToken, Port,
};

/// Writes its message to the log and continues
#[derive(Debug, Clone, Default)]
pub struct Print;

impl Print {
    /// Enter port
    pub const IN: usize = 0;
    /// Exit port
    pub const OUT: usize = 1;
    /// Value to print
    pub const MESSAGE: usize = 2;
}

impl BlueprintNode for Print {
    const KIND: NodeKindId = NodeKindId::new("Runner.Print");
    const CAPABILITIES: Capabilities = Capabilities::NONE.with_enter_port();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        meta.add_port(id, Port::enter("In"))?;
        meta.add_port(id, Port::exit("Out"))?;
        meta.add_port(id, Port::input("Message", DataType::Any))?;
        Ok(())
    }

    fn on_enter_port(blueprint: &mut Blueprint, token: NodeToken, _port: usize) -> NodeResult {
        let message = blueprint.read_value(token, Self::MESSAGE)?;
        tracing::info!(scope = %token.root, "{message:?}");
        blueprint.call(token, Self::OUT)
    }
}
