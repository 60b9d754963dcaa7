//! `Partition`: a strongly-connected component of the data-flow graph,
//! represented as a contiguous run in the weak topological order.

use crate::utils::indexing::newtype_id;
use crate::value_set::ValueSetId;

newtype_id!(PartitionId);

/// A chain of [`crate::value_set::ValueSet`]s linked by their `next` field,
/// from `start_node` to `stop_node` — an SCC (possibly a singleton) in
/// iteration order.
#[derive(Debug, Clone, Copy)]
pub struct Partition {
    start_node: ValueSetId,
    stop_node: ValueSetId,
    dirty: bool,
}

impl Partition {
    pub(crate) fn new(start_node: ValueSetId, stop_node: ValueSetId) -> Self {
        Partition { start_node, stop_node, dirty: true }
    }

    pub fn start_node(&self) -> ValueSetId {
        self.start_node
    }

    pub fn stop_node(&self) -> ValueSetId {
        self.stop_node
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
