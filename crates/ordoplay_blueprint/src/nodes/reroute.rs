// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass-through data node whose type follows its input link.

use crate::id::NodeId;
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, Capabilities, NodeKindId};
use crate::port::Port;
use crate::resolver;

/// Forwards its input to its output unchanged
#[derive(Debug, Clone, Default)]
pub struct Reroute;

impl Reroute {
    /// Input port
    pub const IN: usize = 0;
    /// Output port
    pub const OUT: usize = 1;
}

impl BlueprintNode for Reroute {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.Reroute");
    const CAPABILITIES: Capabilities = Capabilities::NONE
        .with_links_changed()
        .with_internal_links();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let data_type = resolver::linked_type(meta, id, Self::IN);
        meta.add_port(id, Port::dynamic_input("In").with_data_type(data_type.clone()))?;
        meta.add_port(id, Port::dynamic_output("Out").with_data_type(data_type))?;
        Ok(())
    }

    fn on_links_changed(meta: &mut GraphMeta, id: NodeId, port: usize) -> Result<(), MetaError> {
        if port == Self::IN {
            resolver::revalidate(meta, id)?;
        }
        Ok(())
    }

    fn linked_ports(_meta: &GraphMeta, _id: NodeId, port: usize) -> Vec<usize> {
        if port == Self::OUT {
            vec![Self::IN]
        } else {
            Vec::new()
        }
    }
}
