// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identifiers used to address nodes, ports and graph assets.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a node instance within a store.
///
/// The store id lives in the high 32 bits and the local id in the low 32 bits,
/// so the whole id works as a single hash key. A local id of zero means
/// "no node".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct NodeId(u64);

impl NodeId {
    /// The "no node" id.
    pub const NONE: Self = Self(0);

    /// Pack a store id and a local id
    pub const fn new(store_id: u32, local_id: u32) -> Self {
        Self(((store_id as u64) << 32) | local_id as u64)
    }

    /// Rebuild an id from its packed form
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Packed form
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Id of the store that owns the node
    pub const fn store_id(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Id of the node within its store
    pub const fn local_id(self) -> u32 {
        self.0 as u32
    }

    /// Whether this is the "no node" id
    pub const fn is_none(self) -> bool {
        self.local_id() == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.store_id(), self.local_id())
    }
}

/// A port on a node, addressed by its declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortAddress {
    /// Owning node
    pub node: NodeId,
    /// Index of the port in the node's port array
    pub port: usize,
}

impl PortAddress {
    /// Create a port address
    pub const fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

/// Execution-time address of a node.
///
/// `root` is the sub-graph host whose scope the node runs in, or
/// [`NodeId::NONE`] for the top-level graph. The same compiled sub-graph can be
/// entered from several hosts without their calls sharing scope state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeToken {
    /// Host of the current scope
    pub root: NodeId,
    /// Node being addressed
    pub node: NodeId,
}

impl NodeToken {
    /// Create a token
    pub const fn new(root: NodeId, node: NodeId) -> Self {
        Self { root, node }
    }

    /// Token for a node of the top-level graph
    pub const fn top_level(node: NodeId) -> Self {
        Self::new(NodeId::NONE, node)
    }

    /// Same scope, different node
    pub const fn with_node(self, node: NodeId) -> Self {
        Self::new(self.root, node)
    }
}

/// Unique identifier for a graph asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphAssetId(pub Uuid);

impl GraphAssetId {
    /// Create a new random graph asset ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphAssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphAssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable 64-bit FNV-1a hash of a label, used for hash links.
pub const fn label_hash(label: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let bytes = label.as_bytes();
    let mut hash = OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(PRIME);
        i += 1;
    }
    hash
}
