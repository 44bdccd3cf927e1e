use super::channel::Channel;
use super::contract::{Contract, ContractOutcome};
use super::fee::FeePolicy;
use super::graph::{ChannelEdge, NetworkGraph};
use super::ledger::Ledger;
use super::node::{ContractRef, Node, PaymentStatus, ReceiverPolicy};
use super::payment::SecretMessage;
use super::settlement::{CloseStatus, LedgerSettlement, SettlementBackend, SettlementError};
use super::timer::{Timer, TimerEvent};
use super::types::{
    ChannelId, ContractId, HashAuthenticator, NodeId, StateAuthenticator, TransactionId,
};
use crate::config::SimulationConfig;
use crate::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, error, info, trace, warn};

/// One simulation run: the ledger and its clock, the timer, the settlement backend,
/// every node and every channel. Nodes and contracts refer to channels by id.
pub struct Network {
    pub(crate) config: SimulationConfig,
    pub(crate) ledger: Ledger,
    pub(crate) timer: Timer,
    pub(crate) settlement: Box<dyn SettlementBackend>,
    pub(crate) authenticator: Box<dyn StateAuthenticator>,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) channels: BTreeMap<ChannelId, Channel>,
    pub(crate) mailbox: VecDeque<SecretMessage>,
    next_node_id: u32,
    next_contract_id: u64,
    next_transaction_id: u64,
    halted: Option<String>,
}

impl Network {
    pub fn new(config: SimulationConfig) -> Self {
        let settlement = LedgerSettlement::new(config.dispute_window);
        let authenticator = HashAuthenticator::new(config.hash_algorithm);
        Self::with_backends(config, Box::new(settlement), Box::new(authenticator))
    }

    pub fn with_backends(
        config: SimulationConfig,
        settlement: Box<dyn SettlementBackend>,
        authenticator: Box<dyn StateAuthenticator>,
    ) -> Self {
        Self {
            ledger: Ledger::new(config.close_fee_rate()),
            timer: Timer::new(),
            settlement,
            authenticator,
            nodes: BTreeMap::new(),
            channels: BTreeMap::new(),
            mailbox: VecDeque::new(),
            next_node_id: 0,
            next_contract_id: 1,
            next_transaction_id: 1,
            halted: None,
            config,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn block_height(&self) -> u64 {
        self.ledger.block_height()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// The channel `a` uses to reach `b`.
    pub fn channel_between(&self, a: NodeId, b: NodeId) -> Option<&Channel> {
        self.nodes
            .get(&a)
            .and_then(|node| node.channel_with(b))
            .and_then(|id| self.channels.get(&id))
    }

    /// The reason route construction is refused, once a fatal error was observed.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub(crate) fn halt(&mut self, reason: String) {
        error!("Halting the network after a fatal error: {}", reason);
        if self.halted.is_none() {
            self.halted = Some(reason);
        }
    }

    fn check_fatal(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            self.halt(err.to_string());
        }
        err
    }

    pub fn add_node(&mut self) -> NodeId {
        self.add_node_with_balance(self.config.initial_balance())
    }

    pub fn add_node_with_balance(&mut self, balance: u128) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.ledger.register_balance(id, balance);
        self.nodes
            .insert(id, Node::new(id, self.config.default_fee_policy()));
        debug!("Added {} with ledger balance {}", id, balance);
        id
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))
    }

    pub fn set_fee_policy(&mut self, id: NodeId, fee_policy: FeePolicy) -> Result<()> {
        self.node_mut(id)?.set_fee_policy(fee_policy);
        Ok(())
    }

    pub fn set_receiver_policy(&mut self, id: NodeId, policy: ReceiverPolicy) -> Result<()> {
        self.node_mut(id)?.set_receiver_policy(policy);
        Ok(())
    }

    /// Opens a channel funded entirely by `owner1`.
    pub fn open_channel(
        &mut self,
        owner1: NodeId,
        owner2: NodeId,
        deposit: u128,
    ) -> Result<ChannelId> {
        self.open_channel_with_split(owner1, owner2, deposit, deposit)
    }

    /// Opens a channel funded by `owner1` that starts with `owner1_balance` on its side.
    pub fn open_channel_with_split(
        &mut self,
        owner1: NodeId,
        owner2: NodeId,
        deposit: u128,
        owner1_balance: u128,
    ) -> Result<ChannelId> {
        for node in [owner1, owner2] {
            if !self.nodes.contains_key(&node) {
                return Err(Error::NodeNotFound(node));
            }
        }
        let channel = Channel::open(
            &mut self.ledger,
            self.settlement.as_mut(),
            owner1,
            owner2,
            deposit,
            owner1_balance,
        )?;
        let channel_id = channel.id();
        self.channels.insert(channel_id, channel);
        self.node_mut(owner1)?.add_channel(owner2, channel_id);
        self.node_mut(owner2)?.add_channel(owner1, channel_id);
        Ok(channel_id)
    }

    pub fn deposit(&mut self, channel_id: ChannelId, address: NodeId, amount: u128) -> Result<()> {
        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or(Error::ChannelNotFound(channel_id))?;
        channel.deposit(&mut self.ledger, self.settlement.as_mut(), address, amount)?;
        Ok(())
    }

    /// Cooperative close. Pending contracts are resolved to their default outcome.
    pub fn close_channel(&mut self, channel_id: ChannelId) -> Result<()> {
        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or(Error::ChannelNotFound(channel_id))?;
        let resolved = channel.close(
            &mut self.ledger,
            self.settlement.as_mut(),
            self.authenticator.as_ref(),
        );
        let resolved = resolved.map_err(|e| self.check_fatal(e.into()))?;
        for contract in &resolved {
            self.on_contract_resolved(contract);
        }
        Ok(())
    }

    /// Unilateral close by `initiator` with the state of the given serial. A stale
    /// state is appealed by the counterparty with the latest one. The close settles
    /// once the dispute window has elapsed.
    pub fn force_close(
        &mut self,
        channel_id: ChannelId,
        initiator: NodeId,
        serial: u64,
    ) -> Result<CloseStatus> {
        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or(Error::ChannelNotFound(channel_id))?;
        let counterparty = channel
            .data()
            .peer_of(initiator)
            .ok_or_else(|| {
                Error::InvalidParameter(format!("{} is not an owner of {}", initiator, channel_id))
            })?;
        let closed = channel.force_close(
            &mut self.ledger,
            self.settlement.as_mut(),
            self.authenticator.as_ref(),
            initiator,
            serial,
        );
        let (status, resolved) = closed.map_err(|e| self.check_fatal(e.into()))?;
        for contract in &resolved {
            self.on_contract_resolved(contract);
        }

        if let CloseStatus::Disputed { deadline } = status {
            let latest = self
                .channels
                .get(&channel_id)
                .map(|c| c.message().serial)
                .unwrap_or(serial);
            if latest > serial {
                warn!(
                    "{} submitted stale serial {} of {}, {} appeals with {}",
                    initiator, serial, channel_id, counterparty, latest
                );
                self.appeal(channel_id, counterparty)?;
            }
            self.timer
                .schedule(deadline, TimerEvent::FinalizeClose { channel_id });
        }
        Ok(status)
    }

    /// Submits the latest state of a channel against its pending unilateral close.
    pub fn appeal(&mut self, channel_id: ChannelId, appellant: NodeId) -> Result<()> {
        let channel = self
            .channels
            .get(&channel_id)
            .ok_or(Error::ChannelNotFound(channel_id))?;
        channel.appeal(
            &mut self.ledger,
            self.settlement.as_mut(),
            self.authenticator.as_ref(),
            appellant,
        )?;
        Ok(())
    }

    /// Everything settled to `address` since its last withdrawal.
    pub fn withdraw(&mut self, address: NodeId) -> u128 {
        self.settlement.withdraw(address)
    }

    /// Advances the clock block by block, firing due timer events in order.
    pub fn advance(&mut self, blocks: u64) -> Result<()> {
        for _ in 0..blocks {
            let height = self.ledger.advance(1);
            for entry in self.timer.take_due(height) {
                trace!("Firing {:?} scheduled at {}", entry.event, entry.trigger_height);
                if let Err(err) = self.dispatch(entry.event) {
                    let err = self.check_fatal(err);
                    if err.is_fatal() {
                        return Err(err);
                    }
                    warn!("Timer event at block {} failed: {}", height, err);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: TimerEvent) -> Result<()> {
        match event {
            TimerEvent::ContractExpiry {
                channel_id,
                contract_id,
            } => self.expire_contract(channel_id, contract_id),
            TimerEvent::RevealSecret {
                node,
                transaction_id,
                kind,
            } => {
                let armed = self
                    .nodes
                    .get(&node)
                    .and_then(|n| n.transaction(transaction_id))
                    .is_some_and(|c| c.status == PaymentStatus::Armed);
                if !armed {
                    debug!("{} no longer waits on {}", node, transaction_id);
                    return Ok(());
                }
                self.reveal_secret(node, transaction_id, kind)?;
                Ok(())
            }
            TimerEvent::FinalizeClose { channel_id } => {
                match self.settlement.finalize(&mut self.ledger, channel_id) {
                    Ok((credit1, credit2)) => {
                        info!("Finalized close of {}: {} and {}", channel_id, credit1, credit2);
                        Ok(())
                    }
                    Err(SettlementError::AlreadySettled(_)) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    fn expire_contract(&mut self, channel_id: ChannelId, contract_id: ContractId) -> Result<()> {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Ok(());
        };
        if !channel.is_open() || channel.pending_contract(contract_id).is_none() {
            trace!("{} on {} is already gone", contract_id, channel_id);
            return Ok(());
        }
        if let Some(contract) = channel.expire_contract(&mut self.ledger, contract_id)? {
            self.on_contract_resolved(&contract);
        }
        Ok(())
    }

    pub(crate) fn next_contract_id(&mut self) -> ContractId {
        let id = ContractId(self.next_contract_id);
        self.next_contract_id += 1;
        id
    }

    pub(crate) fn next_transaction_id(&mut self) -> TransactionId {
        let id = TransactionId(self.next_transaction_id);
        self.next_transaction_id += 1;
        id
    }

    /// Books an admitted contract: locked funds of both parties, their transaction
    /// contexts, and its expiry.
    pub(crate) fn on_contract_admitted(&mut self, contract: &Contract) {
        for (party, is_payer, locked) in [
            (contract.sender, true, contract.payer_lock()),
            (contract.receiver, false, contract.payee_lock()),
        ] {
            if let Some(node) = self.nodes.get_mut(&party) {
                node.lock_funds(locked);
                if let Some(context) = contract
                    .transaction_id
                    .and_then(|tx| node.transaction_mut(tx))
                {
                    context.contracts.push(ContractRef {
                        channel_id: contract.channel_id,
                        contract_id: contract.id,
                        kind: contract.kind,
                        is_payer,
                    });
                }
            }
        }
        self.timer.schedule(
            contract.expiry,
            TimerEvent::ContractExpiry {
                channel_id: contract.channel_id,
                contract_id: contract.id,
            },
        );
    }

    pub(crate) fn on_contract_resolved(&mut self, contract: &Contract) {
        for (party, locked) in [
            (contract.sender, contract.payer_lock()),
            (contract.receiver, contract.payee_lock()),
        ] {
            let Some(node) = self.nodes.get_mut(&party) else {
                continue;
            };
            if !node.unlock_funds(locked) {
                self.halt(format!(
                    "{} releasing {} of {} exceeds its locked funds",
                    party, locked, contract.id
                ));
            }
        }
        let Some(transaction_id) = contract.transaction_id else {
            return;
        };
        for party in [contract.sender, contract.receiver] {
            let status = match contract.outcome() {
                ContractOutcome::ResolvedSuccess => PaymentStatus::Succeeded,
                ContractOutcome::ResolvedCancel => PaymentStatus::Cancelled,
                ContractOutcome::ResolvedExpired
                    if !self.has_pending_contracts(party, transaction_id) =>
                {
                    PaymentStatus::Expired
                }
                _ => continue,
            };
            if let Some(node) = self.nodes.get_mut(&party) {
                node.update_status(transaction_id, status);
            }
        }
    }

    pub(crate) fn has_pending_contracts(
        &self,
        node: NodeId,
        transaction_id: TransactionId,
    ) -> bool {
        self.nodes
            .get(&node)
            .and_then(|n| n.transaction(transaction_id))
            .is_some_and(|context| {
                context.contracts.iter().any(|c| {
                    self.channels
                        .get(&c.channel_id)
                        .is_some_and(|ch| ch.pending_contract(c.contract_id).is_some())
                })
            })
    }

    pub fn payment_status(
        &self,
        node: NodeId,
        transaction_id: TransactionId,
    ) -> Option<PaymentStatus> {
        self.nodes
            .get(&node)
            .and_then(|n| n.transaction(transaction_id))
            .map(|c| c.status)
    }

    /// The router's view of the network: every open channel a node would use to reach
    /// its peer, with the capacity each side can pledge.
    pub fn graph(&self) -> NetworkGraph {
        let mut graph = NetworkGraph::new(self.config.blocks_per_hop);
        for node in self.nodes.values() {
            graph.add_node(node.id(), node.fee_policy());
            for (_, channel_id) in node.channels() {
                let Some(channel) = self.channels.get(channel_id).filter(|c| c.is_open()) else {
                    continue;
                };
                let data = channel.data();
                graph.add_channel(ChannelEdge {
                    channel_id: *channel_id,
                    node1: data.owner1,
                    node2: data.owner2,
                    node1_transferable: channel.transferable_from(data.owner1).unwrap_or(0),
                    node2_transferable: channel.transferable_from(data.owner2).unwrap_or(0),
                });
            }
        }
        graph
    }

    /// Forgets everything for a fresh run with the same configuration and backends.
    pub fn reset(&mut self) {
        self.ledger.reset();
        self.timer.reset();
        self.settlement.reset();
        self.nodes.clear();
        self.channels.clear();
        self.mailbox.clear();
        self.next_node_id = 0;
        self.next_contract_id = 1;
        self.next_transaction_id = 1;
        self.halted = None;
        info!("Network reset");
    }
}
