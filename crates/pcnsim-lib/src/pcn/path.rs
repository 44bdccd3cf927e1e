use super::types::{ChannelId, NodeId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Clone, Debug)]
pub(crate) struct NodeHeapElement {
    // node_id is the vertex itself.
    pub node_id: NodeId,

    // The fees accumulated from this node to the target.
    pub distance: u128,

    // The number of hops from this node to the target.
    pub hops: usize,

    // The amount this node must receive to pay the rest of the path,
    // for the source node the amount it sends.
    pub amount_received: u128,

    // The griefing penalty the next hop locks on the outgoing edge.
    pub penalty: u128,

    // The penalties of every hop from this node to the target.
    pub penalty_exposure: u128,

    // next_hop is the edge this route continues with
    pub next_hop: Option<(NodeId, ChannelId)>,
}

impl Ord for NodeHeapElement {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on distance, then on hops
        other
            .distance
            .cmp(&self.distance)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.node_id.cmp(&self.node_id))
    }
}

impl PartialOrd for NodeHeapElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NodeHeapElement {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
            && self.distance == other.distance
            && self.hops == other.hops
            && self.amount_received == other.amount_received
            && self.penalty == other.penalty
            && self.penalty_exposure == other.penalty_exposure
            && self.next_hop == other.next_hop
    }
}

impl Eq for NodeHeapElement {}

pub(crate) struct NodeHeap {
    inner: BinaryHeap<NodeHeapElement>,
}

impl NodeHeap {
    pub fn new(num: usize) -> Self {
        Self {
            inner: BinaryHeap::with_capacity(num),
        }
    }

    pub fn pop(&mut self) -> Option<NodeHeapElement> {
        self.inner.pop()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn push_or_fix(&mut self, element: NodeHeapElement) {
        // Remove the element with the same node_id if it exists
        self.inner.retain(|e| e.node_id != element.node_id);
        self.inner.push(element);
    }
}
