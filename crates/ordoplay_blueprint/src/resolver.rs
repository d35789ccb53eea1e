// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resolution of dynamic port types.
//!
//! Resolution is pull-based. A dynamic node opts into link notifications and,
//! when notified, rebuilds its own ports with [`revalidate`]. Its
//! `create_ports` asks this module what type its links currently carry. If
//! the rebuilt ports differ, the meta notifies the nodes downstream, which
//! repeat the process. Nothing recomputes unless it is told to.

use crate::id::{NodeId, PortAddress};
use crate::meta::{GraphMeta, Result};
use crate::value::DataType;
use tracing::debug;

/// Upper bound on whole-graph passes in [`resolve_all`]
const MAX_PASSES: usize = 64;

/// Type carried by the first link arriving at a port
pub fn linked_type(meta: &GraphMeta, node: NodeId, port: usize) -> Option<DataType> {
    let link = meta.links_to(node, port).next()?;
    meta.port(link.from)?.data_type.clone()
}

/// Element type fed into a port that accepts both scalars and arrays.
///
/// The first link (insertion order) carrying a non-array type wins. If every
/// typed link carries an array, the first one's element type is used. Later
/// links with a different type are ignored.
pub fn element_type(meta: &GraphMeta, node: NodeId, port: usize) -> Option<DataType> {
    let mut first_array = None;
    for link in meta.links_to(node, port) {
        let Some(data_type) = meta.port(link.from).and_then(|port| port.data_type.as_ref()) else {
            continue;
        };
        match data_type.element_type() {
            None => return Some(data_type.clone()),
            Some(element) => {
                if first_array.is_none() {
                    first_array = Some(element.clone());
                }
            }
        }
    }
    first_array
}

/// Rebuild a dynamic node's ports from its current links.
///
/// Links are kept even if they no longer type-check; the compiler and the
/// editor decide what to do with them.
pub fn revalidate(meta: &mut GraphMeta, node: NodeId) -> Result<bool> {
    meta.invalidate_node(node, false)
}

/// Dynamic ports that have links but no type yet
pub fn unresolved_ports(meta: &GraphMeta) -> Vec<PortAddress> {
    meta.nodes()
        .flat_map(|(id, node)| {
            node.ports
                .iter()
                .enumerate()
                .filter(|(_, port)| port.is_unresolved())
                .map(move |(index, _)| PortAddress::new(id, index))
        })
        .filter(|address| meta.has_links(*address))
        .collect()
}

/// Revalidate every node until no ports change.
///
/// Used after bulk construction, where nodes may have been linked before
/// their sources had types. Returns the number of passes that changed
/// something.
pub fn resolve_all(meta: &mut GraphMeta) -> Result<usize> {
    let ids: Vec<NodeId> = meta.nodes().map(|(id, _)| id).collect();
    let mut passes = 0;
    while passes < MAX_PASSES {
        let mut changed = false;
        for &id in &ids {
            changed |= revalidate(meta, id)?;
        }
        if !changed {
            break;
        }
        passes += 1;
    }
    debug!(graph = %meta.name, passes, "Resolved dynamic ports");
    Ok(passes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Constant, Iterate, Reroute};
    use crate::value::Value;

    fn out_type(meta: &GraphMeta, id: NodeId) -> Option<DataType> {
        meta.port(PortAddress::new(id, Reroute::OUT))
            .and_then(|port| port.data_type.clone())
    }

    #[test]
    fn test_chain_resolves_in_any_link_order() {
        // Link orders for source -> a, a -> b, b -> c
        let orders: [[usize; 3]; 4] = [[0, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]];

        for order in orders {
            let mut meta = GraphMeta::new("Chain");
            let source = meta.add_node(Constant::new(1.5f32)).unwrap();
            let a = meta.add_node(Reroute::default()).unwrap();
            let b = meta.add_node(Reroute::default()).unwrap();
            let c = meta.add_node(Reroute::default()).unwrap();
            let links = [(source, 0, a), (a, Reroute::OUT, b), (b, Reroute::OUT, c)];

            for step in order {
                let (from, port, to) = links[step];
                meta.connect(from, port, to, Reroute::IN).unwrap();
            }

            for id in [a, b, c] {
                assert_eq!(out_type(&meta, id), Some(DataType::Float), "order {order:?}");
            }
            assert!(unresolved_ports(&meta).is_empty());
        }
    }

    #[test]
    fn test_unlinking_clears_downstream_types() {
        let mut meta = GraphMeta::new("Chain");
        let source = meta.add_node(Constant::new(3)).unwrap();
        let a = meta.add_node(Reroute::default()).unwrap();
        let b = meta.add_node(Reroute::default()).unwrap();
        meta.connect(a, Reroute::OUT, b, Reroute::IN).unwrap();
        meta.connect(source, 0, a, Reroute::IN).unwrap();
        assert_eq!(out_type(&meta, b), Some(DataType::Int));

        meta.remove_node(source).unwrap();
        assert_eq!(out_type(&meta, a), None);
        assert_eq!(out_type(&meta, b), None);
        assert_eq!(
            unresolved_ports(&meta),
            vec![
                PortAddress::new(a, Reroute::OUT),
                PortAddress::new(b, Reroute::IN)
            ]
        );
    }

    #[test]
    fn test_element_type_tie_break() {
        let mut meta = GraphMeta::new("Iterate");
        let floats = meta
            .add_node(Constant::new(Value::from(vec![1.0f32, 2.0])))
            .unwrap();
        let ints = meta.add_node(Constant::new(Value::from(vec![1, 2]))).unwrap();
        let scalar = meta.add_node(Constant::new("x")).unwrap();
        let iterate = meta.add_node(Iterate::default()).unwrap();

        meta.connect(floats, 0, iterate, Iterate::ELEMENTS).unwrap();
        meta.connect(ints, 0, iterate, Iterate::ELEMENTS).unwrap();
        assert_eq!(
            element_type(&meta, iterate, Iterate::ELEMENTS),
            Some(DataType::Float)
        );

        // A later scalar beats every array
        meta.connect(scalar, 0, iterate, Iterate::ELEMENTS).unwrap();
        let element = meta
            .port(PortAddress::new(iterate, Iterate::ELEMENT))
            .and_then(|port| port.data_type.clone());
        assert_eq!(element, Some(DataType::String));
    }

    #[test]
    fn test_resolve_all_reaches_fixed_point() {
        let mut meta = GraphMeta::new("Bulk");
        let source = meta.add_node(Constant::new(true)).unwrap();
        let a = meta.add_node(Reroute::default()).unwrap();
        meta.connect(source, 0, a, Reroute::IN).unwrap();

        assert_eq!(resolve_all(&mut meta).unwrap(), 0);
        assert_eq!(out_type(&meta, a), Some(DataType::Bool));
    }
}
