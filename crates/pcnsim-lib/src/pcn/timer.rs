use super::contract::SecretKind;
use super::types::{ChannelId, ContractId, NodeId, TransactionId};
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;

/// Work deferred to a block height. Events are plain data, the network decides
/// what firing one means.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// Resolve the contract to its default outcome if it is still pending.
    ContractExpiry {
        channel_id: ChannelId,
        contract_id: ContractId,
    },
    /// A receiver that chose to wait reveals one of its secrets.
    RevealSecret {
        node: NodeId,
        transaction_id: TransactionId,
        kind: SecretKind,
    },
    /// The dispute window of a unilateral close has elapsed.
    FinalizeClose { channel_id: ChannelId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerEntry {
    pub trigger_height: u64,
    pub event: TimerEvent,
}

#[derive(Debug, Default, Clone)]
pub struct Timer {
    queue: BTreeMap<u64, VecDeque<TimerEvent>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, trigger_height: u64, event: TimerEvent) {
        trace!("Scheduling {:?} at block {}", event, trigger_height);
        self.queue.entry(trigger_height).or_default().push_back(event);
    }

    /// Removes every entry due at or before `height`, lowest height first and in
    /// registration order within a height.
    pub fn take_due(&mut self, height: u64) -> Vec<TimerEntry> {
        let later = self.queue.split_off(&(height + 1));
        let due = std::mem::replace(&mut self.queue, later);
        due.into_iter()
            .flat_map(|(trigger_height, events)| {
                events.into_iter().map(move |event| TimerEntry {
                    trigger_height,
                    event,
                })
            })
            .collect()
    }

    pub fn next_trigger_height(&self) -> Option<u64> {
        self.queue.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.queue.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn reset(&mut self) {
        self.queue.clear();
    }
}
