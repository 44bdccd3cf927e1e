use super::fee::{calculate_griefing_penalty, FeePolicy};
use super::path::{NodeHeap, NodeHeapElement};
use super::types::{ChannelId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathFindError {
    #[error("Graph error: {0}")]
    Amount(String),
    #[error("PathFind error: {0}")]
    PathFind(String),
    #[error("Overflow error: {0}")]
    Overflow(String),
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
}

/// An open channel as the router sees it: what each side can currently pledge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelEdge {
    pub channel_id: ChannelId,
    pub node1: NodeId,
    pub node2: NodeId,
    pub node1_transferable: u128,
    pub node2_transferable: u128,
}

impl ChannelEdge {
    /// The edge seen from `to`: `(from, capacity from -> to, capacity to -> from)`.
    fn inbound_to(&self, to: NodeId) -> Option<(NodeId, u128, u128)> {
        if to == self.node2 {
            Some((self.node1, self.node1_transferable, self.node2_transferable))
        } else if to == self.node1 {
            Some((self.node2, self.node2_transferable, self.node1_transferable))
        } else {
            None
        }
    }
}

/// A router hop of a payment, a route is an array of RouterHop. The hop's `target`
/// receives `amount_received` over `channel_id` and locks `penalty` against it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RouterHop {
    pub target: NodeId,
    pub channel_id: ChannelId,
    pub amount_received: u128,
    pub penalty: u128,
}

/// A snapshot of nodes, their fee policies and the open channels between them.
#[derive(Clone, Debug, Default)]
pub struct NetworkGraph {
    nodes: BTreeMap<NodeId, FeePolicy>,
    channels: BTreeMap<ChannelId, ChannelEdge>,
    blocks_per_hop: u64,
}

impl NetworkGraph {
    pub fn new(blocks_per_hop: u64) -> Self {
        Self {
            nodes: BTreeMap::new(),
            channels: BTreeMap::new(),
            blocks_per_hop,
        }
    }

    pub fn add_node(&mut self, node: NodeId, fee_policy: FeePolicy) {
        self.nodes.insert(node, fee_policy);
    }

    pub fn add_channel(&mut self, edge: ChannelEdge) {
        self.channels.insert(edge.channel_id, edge);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelEdge> {
        self.channels.values()
    }

    fn get_node_inbounds(
        &self,
        node: NodeId,
    ) -> impl Iterator<Item = (NodeId, ChannelId, u128, u128)> + '_ {
        self.channels.values().filter_map(move |edge| {
            edge.inbound_to(node)
                .map(|(from, capacity, reverse)| (from, edge.channel_id, capacity, reverse))
        })
    }

    /// Finds the cheapest route from `source` to `target` able to carry `amount`.
    ///
    /// The search runs from the target back to the source, as the amount crossing an
    /// edge depends on the fees charged after it. An edge is usable when its sender can
    /// pledge the amount crossing it once per contract built on it (`passes`), and, with
    /// a penalty rate, when its receiver can cover the penalties of every hop from it
    /// to the target.
    pub fn find_path(
        &self,
        source: NodeId,
        target: NodeId,
        amount: u128,
        penalty_rate_millionths: u128,
        passes: usize,
    ) -> Result<Vec<RouterHop>, PathFindError> {
        if amount == 0 {
            return Err(PathFindError::Amount(
                "amount must be greater than 0".to_string(),
            ));
        }
        if source == target {
            return Err(PathFindError::PathFind(
                "source and target are the same node".to_string(),
            ));
        }
        if passes == 0 {
            return Err(PathFindError::PathFind(
                "a route must carry at least one contract per hop".to_string(),
            ));
        }
        for node in [source, target] {
            if !self.nodes.contains_key(&node) {
                return Err(PathFindError::UnknownNode(node));
            }
        }

        let mut nodes_heap = NodeHeap::new(self.nodes.len());
        let mut distances = HashMap::<NodeId, NodeHeapElement>::new();
        let mut visited = HashSet::<NodeId>::new();
        let mut edges_expanded = 0;

        let target_element = NodeHeapElement {
            node_id: target,
            distance: 0,
            hops: 0,
            amount_received: amount,
            penalty: 0,
            penalty_exposure: 0,
            next_hop: None,
        };
        distances.insert(target, target_element.clone());
        nodes_heap.push_or_fix(target_element);

        while let Some(cur_hop) = nodes_heap.pop() {
            if !visited.insert(cur_hop.node_id) {
                continue;
            }
            if cur_hop.node_id == source {
                break;
            }

            for (from, channel_id, capacity, reverse_capacity) in
                self.get_node_inbounds(cur_hop.node_id)
            {
                if visited.contains(&from) || from == target {
                    continue;
                }
                edges_expanded += 1;

                let amount_crossing = cur_hop.amount_received;
                let amount_locked = amount_crossing
                    .checked_mul(passes as u128)
                    .ok_or_else(|| {
                        PathFindError::Overflow(format!(
                            "amount {} locked {} times",
                            amount_crossing, passes
                        ))
                    })?;
                if capacity < amount_locked {
                    trace!(
                        "Skipping {} from {}: capacity {} < locked amount {}",
                        channel_id,
                        from,
                        capacity,
                        amount_locked
                    );
                    continue;
                }

                let hops = cur_hop.hops + 1;
                let penalty = calculate_griefing_penalty(
                    amount_crossing,
                    penalty_rate_millionths,
                    self.blocks_per_hop,
                    hops,
                )
                .ok_or_else(|| {
                    PathFindError::Overflow(format!(
                        "griefing penalty of amount {} over {} hops",
                        amount_crossing, hops
                    ))
                })?;
                // stalling everything downstream costs the penalties of all those hops
                let penalty_exposure = cur_hop
                    .penalty_exposure
                    .checked_add(penalty)
                    .ok_or_else(|| {
                        PathFindError::Overflow(format!(
                            "penalty exposure {} + {}",
                            cur_hop.penalty_exposure, penalty
                        ))
                    })?;
                if penalty_exposure > reverse_capacity {
                    trace!(
                        "Skipping {} from {}: {} cannot cover penalty exposure {}",
                        channel_id,
                        from,
                        cur_hop.node_id,
                        penalty_exposure
                    );
                    continue;
                }

                let fee = if from == source {
                    0
                } else {
                    self.nodes
                        .get(&from)
                        .copied()
                        .unwrap_or_default()
                        .forward_fee(amount_crossing)
                        .map_err(PathFindError::Overflow)?
                };
                let amount_received = amount_crossing.checked_add(fee).ok_or_else(|| {
                    PathFindError::Overflow(format!("amount {} + fee {}", amount_crossing, fee))
                })?;
                let distance = cur_hop.distance + fee;

                let improves = match distances.get(&from) {
                    Some(existing) => (distance, hops) < (existing.distance, existing.hops),
                    None => true,
                };
                if improves {
                    let element = NodeHeapElement {
                        node_id: from,
                        distance,
                        hops,
                        amount_received,
                        penalty,
                        penalty_exposure,
                        next_hop: Some((cur_hop.node_id, channel_id)),
                    };
                    distances.insert(from, element.clone());
                    nodes_heap.push_or_fix(element);
                }
            }
        }

        let mut result = vec![];
        let mut current = source;
        while current != target {
            let Some(elem) = distances.get(&current) else {
                break;
            };
            let Some((next, channel_id)) = elem.next_hop else {
                break;
            };
            let amount_received = match distances.get(&next) {
                Some(next_elem) => next_elem.amount_received,
                None => break,
            };
            result.push(RouterHop {
                target: next,
                channel_id,
                amount_received,
                penalty: elem.penalty,
            });
            current = next;
        }

        if result.is_empty() || current != target {
            debug!(
                "No path from {} to {} for amount {}, edges expanded: {}",
                source, target, amount, edges_expanded
            );
            return Err(PathFindError::PathFind("no path found".to_string()));
        }

        info!(
            "find_path from {} to {}: nodes visited: {}, edges expanded: {}, fee: {}",
            source,
            target,
            visited.len(),
            edges_expanded,
            distances.get(&source).map(|e| e.distance).unwrap_or(0)
        );
        Ok(result)
    }
}
