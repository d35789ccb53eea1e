// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-kind node storage.
//!
//! Every node kind gets one typed array, so nodes are stored by value and
//! never boxed individually. A node's local id is its permanent key: backing
//! slots may be compacted, ids never change.

use crate::id::NodeId;
use crate::node::{BlueprintNode, NodeKindId};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Fraction of free slots in an array above which it is compacted
const DEFRAGMENT_THRESHOLD: f32 = 0.5;

/// Node storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// No node with this id in the store
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Node accessed as the wrong kind
    #[error("Node {id} is a `{found}`, not a `{expected}`")]
    TypeMismatch {
        /// Node being accessed
        id: NodeId,
        /// Kind requested by the caller
        expected: NodeKindId,
        /// Kind actually stored
        found: NodeKindId,
    },

    /// Node id belongs to a different store
    #[error("Node {id} does not belong to store {store}")]
    ForeignStore {
        /// Node being accessed
        id: NodeId,
        /// Store that was asked
        store: u32,
    },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Type-erased view of one kind's array
trait NodeArray: Any {
    fn kind(&self) -> NodeKindId;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    fn slot_count(&self) -> usize;
    fn remove(&mut self, local_id: u32) -> bool;
    fn duplicate(&mut self, local_id: u32, new_local_id: u32) -> bool;
    fn copy_into(&self, local_id: u32, target: &mut dyn NodeArray, target_local_id: u32) -> bool;
    fn empty_clone(&self) -> Box<dyn NodeArray>;
    fn clone_box(&self) -> Box<dyn NodeArray>;
    fn defragment(&mut self);
    fn clear(&mut self);
}

#[derive(Clone)]
struct Slot<T> {
    local_id: u32,
    node: T,
}

/// Typed array of one node kind
#[derive(Clone)]
struct KindArray<T> {
    slots: Vec<Option<Slot<T>>>,
    index: HashMap<u32, usize>,
    free: Vec<usize>,
}

impl<T: BlueprintNode> KindArray<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, local_id: u32, node: T) {
        let slot = Some(Slot { local_id, node });
        let position = match self.free.pop() {
            Some(position) => {
                self.slots[position] = slot;
                position
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.index.insert(local_id, position);
    }

    fn get(&self, local_id: u32) -> Option<&T> {
        let position = *self.index.get(&local_id)?;
        self.slots[position].as_ref().map(|slot| &slot.node)
    }

    fn get_mut(&mut self, local_id: u32) -> Option<&mut T> {
        let position = *self.index.get(&local_id)?;
        self.slots[position].as_mut().map(|slot| &mut slot.node)
    }
}

impl<T: BlueprintNode> NodeArray for KindArray<T> {
    fn kind(&self) -> NodeKindId {
        T::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn remove(&mut self, local_id: u32) -> bool {
        let Some(position) = self.index.remove(&local_id) else {
            return false;
        };
        self.slots[position] = None;
        self.free.push(position);
        true
    }

    fn duplicate(&mut self, local_id: u32, new_local_id: u32) -> bool {
        let Some(node) = self.get(local_id).cloned() else {
            return false;
        };
        self.insert(new_local_id, node);
        true
    }

    fn copy_into(&self, local_id: u32, target: &mut dyn NodeArray, target_local_id: u32) -> bool {
        let (Some(node), Some(target)) = (
            self.get(local_id),
            target.as_any_mut().downcast_mut::<KindArray<T>>(),
        ) else {
            return false;
        };
        target.insert(target_local_id, node.clone());
        true
    }

    fn empty_clone(&self) -> Box<dyn NodeArray> {
        Box::new(KindArray::<T>::new())
    }

    fn clone_box(&self) -> Box<dyn NodeArray> {
        Box::new(self.clone())
    }

    fn defragment(&mut self) {
        if self.free.is_empty() {
            return;
        }
        self.slots.retain(Option::is_some);
        self.free.clear();
        self.index = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(position, slot)| slot.as_ref().map(|slot| (slot.local_id, position)))
            .collect();
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
    }
}

/// Storage for the nodes of one graph or one runtime instance
pub struct NodeStorage {
    store_id: u32,
    last_local_id: u32,
    kinds: IndexMap<u32, NodeKindId>,
    arrays: IndexMap<NodeKindId, Box<dyn NodeArray>>,
    allow_defragmentation: bool,
    pending_defragmentation: bool,
}

impl NodeStorage {
    /// Create an empty store
    pub fn new(store_id: u32) -> Self {
        Self {
            store_id,
            last_local_id: 0,
            kinds: IndexMap::new(),
            arrays: IndexMap::new(),
            allow_defragmentation: true,
            pending_defragmentation: false,
        }
    }

    /// Id of this store
    pub fn store_id(&self) -> u32 {
        self.store_id
    }

    /// Number of stored nodes
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the store holds no nodes
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Ids of all stored nodes, in creation order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.kinds
            .keys()
            .map(move |&local_id| NodeId::new(self.store_id, local_id))
    }

    /// Whether a node is stored here
    pub fn contains(&self, id: NodeId) -> bool {
        id.store_id() == self.store_id && self.kinds.contains_key(&id.local_id())
    }

    /// Kind of a stored node
    pub fn kind_of(&self, id: NodeId) -> Option<NodeKindId> {
        if id.store_id() != self.store_id {
            return None;
        }
        self.kinds.get(&id.local_id()).copied()
    }

    /// Add a node and return its id
    pub fn add_node<T: BlueprintNode>(&mut self, node: T) -> NodeId {
        let local_id = self.next_local_id();
        self.typed_array_mut::<T>().insert(local_id, node);
        self.kinds.insert(local_id, T::KIND);
        NodeId::new(self.store_id, local_id)
    }

    /// Copy a node from another store into this one
    pub fn add_node_copy(&mut self, source: &NodeStorage, id: NodeId) -> Result<NodeId> {
        let kind = source.checked_kind(id)?;
        let source_array = source
            .arrays
            .get(&kind)
            .ok_or(StorageError::NodeNotFound(id))?;

        let local_id = self.next_local_id();
        let target_array = self
            .arrays
            .entry(kind)
            .or_insert_with(|| source_array.empty_clone());
        if !source_array.copy_into(id.local_id(), target_array.as_mut(), local_id) {
            return Err(StorageError::TypeMismatch {
                id,
                expected: kind,
                found: target_array.kind(),
            });
        }

        self.kinds.insert(local_id, kind);
        Ok(NodeId::new(self.store_id, local_id))
    }

    /// Copy a node within this store
    pub fn duplicate_node(&mut self, id: NodeId) -> Result<NodeId> {
        let kind = self.checked_kind(id)?;
        let local_id = self.next_local_id();
        let copied = self
            .arrays
            .get_mut(&kind)
            .is_some_and(|array| array.duplicate(id.local_id(), local_id));
        if !copied {
            return Err(StorageError::NodeNotFound(id));
        }
        self.kinds.insert(local_id, kind);
        Ok(NodeId::new(self.store_id, local_id))
    }

    /// Remove a node. Other ids stay valid.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(kind) = self.kind_of(id) else {
            return false;
        };
        self.kinds.shift_remove(&id.local_id());

        let Some(array) = self.arrays.get_mut(&kind) else {
            return false;
        };
        let removed = array.remove(id.local_id());
        let free = array.slot_count() - array.len();
        if free as f32 > array.slot_count() as f32 * DEFRAGMENT_THRESHOLD {
            if self.allow_defragmentation {
                array.defragment();
            } else {
                self.pending_defragmentation = true;
            }
        }
        removed
    }

    /// Remove every node
    pub fn clear(&mut self) {
        for array in self.arrays.values_mut() {
            array.clear();
        }
        self.kinds.clear();
        self.pending_defragmentation = false;
    }

    /// Get a node as its concrete kind
    pub fn get<T: BlueprintNode>(&self, id: NodeId) -> Result<&T> {
        self.check_kind::<T>(id)?;
        self.arrays
            .get(&T::KIND)
            .and_then(|array| array.as_any().downcast_ref::<KindArray<T>>())
            .and_then(|array| array.get(id.local_id()))
            .ok_or(StorageError::NodeNotFound(id))
    }

    /// Get a node mutably as its concrete kind
    pub fn get_mut<T: BlueprintNode>(&mut self, id: NodeId) -> Result<&mut T> {
        self.check_kind::<T>(id)?;
        self.arrays
            .get_mut(&T::KIND)
            .and_then(|array| array.as_any_mut().downcast_mut::<KindArray<T>>())
            .and_then(|array| array.get_mut(id.local_id()))
            .ok_or(StorageError::NodeNotFound(id))
    }

    /// Enable or suspend compaction of backing arrays.
    ///
    /// While suspended, removals leave holes. Re-enabling compacts once if any
    /// removal asked for it.
    pub fn allow_defragmentation(&mut self, allow: bool) {
        self.allow_defragmentation = allow;
        if allow && self.pending_defragmentation {
            self.defragment();
        }
    }

    /// Compact every backing array
    pub fn defragment(&mut self) {
        for array in self.arrays.values_mut() {
            array.defragment();
        }
        self.pending_defragmentation = false;
    }

    /// Number of backing slots, including holes
    pub fn slot_count(&self) -> usize {
        self.arrays.values().map(|array| array.slot_count()).sum()
    }

    fn next_local_id(&mut self) -> u32 {
        loop {
            self.last_local_id = self.last_local_id.wrapping_add(1);
            if self.last_local_id != 0 && !self.kinds.contains_key(&self.last_local_id) {
                return self.last_local_id;
            }
        }
    }

    fn checked_kind(&self, id: NodeId) -> Result<NodeKindId> {
        if id.store_id() != self.store_id {
            return Err(StorageError::ForeignStore {
                id,
                store: self.store_id,
            });
        }
        self.kinds
            .get(&id.local_id())
            .copied()
            .ok_or(StorageError::NodeNotFound(id))
    }

    fn check_kind<T: BlueprintNode>(&self, id: NodeId) -> Result<()> {
        let found = self.checked_kind(id)?;
        if found != T::KIND {
            return Err(StorageError::TypeMismatch {
                id,
                expected: T::KIND,
                found,
            });
        }
        Ok(())
    }

    fn typed_array_mut<T: BlueprintNode>(&mut self) -> &mut KindArray<T> {
        let array = self
            .arrays
            .entry(T::KIND)
            .or_insert_with(|| Box::new(KindArray::<T>::new()));
        if array.as_any().downcast_ref::<KindArray<T>>().is_none() {
            // Two kinds registered under one name; the later one wins the slot.
            *array = Box::new(KindArray::<T>::new());
        }
        match array.as_any_mut().downcast_mut::<KindArray<T>>() {
            Some(array) => array,
            None => unreachable!("array was just replaced with the requested kind"),
        }
    }
}

impl Clone for NodeStorage {
    fn clone(&self) -> Self {
        Self {
            store_id: self.store_id,
            last_local_id: self.last_local_id,
            kinds: self.kinds.clone(),
            arrays: self
                .arrays
                .iter()
                .map(|(kind, array)| (*kind, array.clone_box()))
                .collect(),
            allow_defragmentation: self.allow_defragmentation,
            pending_defragmentation: self.pending_defragmentation,
        }
    }
}

impl fmt::Debug for NodeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStorage")
            .field("store_id", &self.store_id)
            .field("nodes", &self.kinds.len())
            .field("kinds", &self.arrays.keys().collect::<Vec<_>>())
            .finish()
    }
}
