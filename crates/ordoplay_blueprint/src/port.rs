// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node control-flow and data connections.

use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};

/// What a port does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Control-flow entry
    Enter,
    /// Control-flow continuation
    Exit,
    /// Data consumer
    Input,
    /// Data producer
    Output,
}

impl PortKind {
    /// Whether this is a control-flow port
    pub fn is_flow(self) -> bool {
        matches!(self, Self::Enter | Self::Exit)
    }

    /// Whether this is a data port
    pub fn is_data(self) -> bool {
        !self.is_flow()
    }

    /// Whether links start at this port
    pub fn is_producer(self) -> bool {
        matches!(self, Self::Exit | Self::Output)
    }

    /// Whether links end at this port
    pub fn is_consumer(self) -> bool {
        !self.is_producer()
    }

    /// The kind seen from the other side of a graph boundary
    pub fn counterpart(self) -> Self {
        match self {
            Self::Enter => Self::Exit,
            Self::Exit => Self::Enter,
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }

    /// Whether a link may run from this kind to `target`
    pub fn can_link_to(self, target: PortKind) -> bool {
        matches!(
            (self, target),
            (Self::Exit, Self::Enter) | (Self::Output, Self::Input)
        )
    }

    /// Capacity used when a port does not set one
    pub fn default_capacity(self) -> Capacity {
        match self {
            Self::Input => Capacity::Single,
            Self::Enter | Self::Exit | Self::Output => Capacity::Multiple,
        }
    }
}

/// How many links may attach to a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capacity {
    /// At most one link
    Single,
    /// Any number of links, kept in insertion order
    Multiple,
}

/// Where the editor draws a port. Ignored by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PortLayout {
    /// Side implied by the port kind
    #[default]
    Default,
    /// Left edge
    Left,
    /// Right edge
    Right,
    /// Top edge
    Top,
    /// Bottom edge
    Bottom,
}

/// A port on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Port name
    pub name: String,
    /// Port kind
    pub kind: PortKind,
    /// Whether the data type follows the links attached to the port
    pub dynamic: bool,
    /// Data type; `None` for flow ports and unresolved dynamic ports
    pub data_type: Option<DataType>,
    /// Link capacity
    pub capacity: Capacity,
    /// Part of the graph's external signature
    pub signature: bool,
    /// Layout hint
    pub layout: PortLayout,
    /// Value read from an unlinked input
    pub default_value: Option<Value>,
}

impl Port {
    /// Create a new port
    pub fn new(name: impl Into<String>, kind: PortKind, data_type: Option<DataType>) -> Self {
        Self {
            name: name.into(),
            kind,
            dynamic: false,
            data_type: if kind.is_flow() { None } else { data_type },
            capacity: kind.default_capacity(),
            signature: false,
            layout: PortLayout::Default,
            default_value: None,
        }
    }

    /// Create a control-flow entry port
    pub fn enter(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Enter, None)
    }

    /// Create a control-flow exit port
    pub fn exit(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Exit, None)
    }

    /// Create a new input port
    pub fn input(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, PortKind::Input, Some(data_type))
    }

    /// Create a new output port
    pub fn output(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, PortKind::Output, Some(data_type))
    }

    /// Create an input whose type is resolved from its links
    pub fn dynamic_input(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Input, None).dynamic()
    }

    /// Create an output whose type is resolved from its node's links
    pub fn dynamic_output(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Output, None).dynamic()
    }

    /// Mark as dynamic
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Set the (resolved) data type
    pub fn with_data_type(mut self, data_type: Option<DataType>) -> Self {
        if self.kind.is_data() {
            self.data_type = data_type;
        }
        self
    }

    /// Set the link capacity
    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set the layout hint
    pub fn with_layout(mut self, layout: PortLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Mark as part of the graph signature
    pub fn signature_only(mut self) -> Self {
        self.signature = true;
        self
    }

    /// Whether more than one link may attach
    pub fn accepts_multiple(&self) -> bool {
        self.capacity == Capacity::Multiple
    }

    /// Whether this is a dynamic port still waiting for a type
    pub fn is_unresolved(&self) -> bool {
        self.dynamic && self.kind.is_data() && self.data_type.is_none()
    }

    /// Check if a link from this port to `target` is valid
    pub fn can_link(&self, target: &Port) -> bool {
        if !self.kind.can_link_to(target.kind) {
            return false;
        }

        match (&self.data_type, &target.data_type) {
            (Some(from), Some(to)) => from.can_connect_to(to),
            // Untyped ports accept anything until they resolve
            _ => true,
        }
    }
}
