// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loop over every element fed into a multi-link input.

use crate::id::{NodeId, NodeToken};
use crate::meta::{GraphMeta, MetaError};
use crate::node::{BlueprintNode, Capabilities, NodeKindId, NodeResult};
use crate::port::{Capacity, Port};
use crate::resolver;
use crate::runtime::{Blueprint, RuntimeError};
use crate::value::{DataType, Value};

/// State of the loop currently running on a node
#[derive(Debug, Clone, Default)]
struct Iteration {
    index: i32,
    element: Value,
    stop: bool,
}

/// Calls "On Iteration" once per element.
///
/// Every link into "Elements" is read once, in link order. Arrays contribute
/// each of their items and scalars contribute themselves. "Index" counts
/// across all links. During "On Finish" it holds the number of elements
/// visited. A nested "Start" on the same node runs its own loop and leaves the
/// outer one untouched.
#[derive(Debug, Clone, Default)]
pub struct Iterate {
    iteration: Iteration,
}

impl Iterate {
    /// Starts the loop
    pub const START: usize = 0;
    /// Stops the running loop after the current element
    pub const BREAK: usize = 1;
    /// Values to iterate
    pub const ELEMENTS: usize = 2;
    /// Called per element
    pub const ON_ITERATION: usize = 3;
    /// Called once the loop ends
    pub const ON_FINISH: usize = 4;
    /// Current element
    pub const ELEMENT: usize = 5;
    /// Position of the current element
    pub const INDEX: usize = 6;

    fn run(blueprint: &mut Blueprint, token: NodeToken) -> NodeResult {
        let links = blueprint.link_count(token, Self::ELEMENTS)?;
        for link in 0..links {
            let items = match blueprint.read_link_value(token, Self::ELEMENTS, link)? {
                Value::None => continue,
                Value::Array(items) => items,
                value => vec![value],
            };

            for item in items {
                let iteration = &mut blueprint.node_mut::<Self>(token.node)?.iteration;
                if iteration.stop {
                    return Ok(());
                }
                iteration.element = item;

                blueprint.call(token, Self::ON_ITERATION)?;
                blueprint.node_mut::<Self>(token.node)?.iteration.index += 1;
            }
        }
        Ok(())
    }
}

impl BlueprintNode for Iterate {
    const KIND: NodeKindId = NodeKindId::new("Blueprint.Iterate");
    const CAPABILITIES: Capabilities = Capabilities::NONE
        .with_enter_port()
        .with_port_value()
        .with_links_changed();

    fn create_ports(meta: &mut GraphMeta, id: NodeId) -> Result<(), MetaError> {
        let element = resolver::element_type(meta, id, Self::ELEMENTS);
        meta.add_port(id, Port::enter("Start"))?;
        meta.add_port(id, Port::enter("Break"))?;
        meta.add_port(
            id,
            Port::input("Elements", DataType::Any).with_capacity(Capacity::Multiple),
        )?;
        meta.add_port(id, Port::exit("On Iteration"))?;
        meta.add_port(id, Port::exit("On Finish"))?;
        meta.add_port(id, Port::dynamic_output("Element").with_data_type(element))?;
        meta.add_port(id, Port::output("Index", DataType::Int))?;
        Ok(())
    }

    fn on_links_changed(meta: &mut GraphMeta, id: NodeId, port: usize) -> Result<(), MetaError> {
        if port == Self::ELEMENTS {
            resolver::revalidate(meta, id)?;
        }
        Ok(())
    }

    fn on_enter_port(blueprint: &mut Blueprint, token: NodeToken, port: usize) -> NodeResult {
        match port {
            Self::START => {
                let outer = std::mem::take(&mut blueprint.node_mut::<Self>(token.node)?.iteration);
                let result = Self::run(blueprint, token)
                    .and_then(|()| blueprint.call(token, Self::ON_FINISH));
                blueprint.node_mut::<Self>(token.node)?.iteration = outer;
                result
            }
            Self::BREAK => {
                blueprint.node_mut::<Self>(token.node)?.iteration.stop = true;
                Ok(())
            }
            _ => Err(RuntimeError::UnknownPort {
                node: token.node,
                port,
            }),
        }
    }

    fn port_value(blueprint: &mut Blueprint, token: NodeToken, port: usize) -> NodeResult<Value> {
        let iteration = &blueprint.node::<Self>(token.node)?.iteration;
        match port {
            Self::ELEMENT => Ok(iteration.element.clone()),
            Self::INDEX => Ok(Value::Int(iteration.index)),
            _ => Err(RuntimeError::UnknownPort {
                node: token.node,
                port,
            }),
        }
    }
}
