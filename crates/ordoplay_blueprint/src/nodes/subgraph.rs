// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node that embeds another graph.

use crate::id::{GraphAssetId, NodeId};
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, NodeKindId};
use crate::port::Port;

/// Hosts a sub-graph. Its ports mirror the sub-graph's signature.
///
/// Bind it through [`crate::GraphLibrary::assign_subgraph`], which also keeps
/// the graph's host map in sync.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    asset: Option<GraphAssetId>,
    ports: Vec<Port>,
}

impl Subgraph {
    /// Hosted asset
    pub fn asset(&self) -> Option<GraphAssetId> {
        self.asset
    }

    /// Point at an asset and take over its signature ports
    pub fn bind(&mut self, asset: Option<GraphAssetId>, ports: Vec<Port>) {
        self.asset = asset;
        self.ports = ports;
    }
}

impl BlueprintNode for Subgraph {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.Subgraph");

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let ports = meta.node::<Self>(id)?.ports.clone();
        for port in ports {
            meta.add_port(id, port)?;
        }
        Ok(())
    }
}
