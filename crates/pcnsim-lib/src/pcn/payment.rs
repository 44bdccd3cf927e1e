//! The multi-hop payment protocol.
//!
//! A payment is built as a chain of per-hop contracts that share the receiver's two
//! commitments. In the default two-pass mode the cancellation contracts are built
//! from the receiver back to the sender first, then the forward contracts from the
//! sender to the receiver. A hop that cannot admit its contract declines, and every
//! node upstream of it invalidates the contract it built for this attempt. Once every
//! pass is complete the receiver acts according to its policy, and a revealed secret
//! travels hop by hop, each node resolving its own contracts before telling its peers.

use super::channel::ChannelError;
use super::contract::{Contract, ContractError, ContractKind, ContractParams, SecretKind};
use super::fee::calculate_griefing_penalty;
use super::graph::PathFindError;
use super::hash_algorithm::HashAlgorithm;
use super::network::Network;
use super::node::{PaymentRole, PaymentStatus, ReceiverPolicy, TransactionContext};
use super::timer::TimerEvent;
use super::types::{ChannelId, ContractId, Hash256, NodeId, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),
    #[error("Invalid route: {0}")]
    InvalidRoute(String),
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("No open channel between {0} and {1}")]
    NoChannel(NodeId, NodeId),
    #[error("{node} declined the contract of hop {hop}: {source}")]
    Declined {
        node: NodeId,
        hop: usize,
        source: ChannelError,
    },
    #[error("{node} would forward {outgoing} against {incoming} committed upstream")]
    Uncollateralized {
        node: NodeId,
        incoming: u128,
        outgoing: u128,
    },
    #[error("{0} has no context for {1}")]
    UnknownTransaction(NodeId, TransactionId),
    #[error("{node} does not hold the secret of {commitment:?}")]
    MissingSecret { node: NodeId, commitment: Hash256 },
    #[error("Fee error: {0}")]
    Fee(String),
    #[error("Network halted after a fatal error: {0}")]
    Halted(String),
    #[error(transparent)]
    PathFind(#[from] PathFindError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl PaymentError {
    pub fn is_fatal(&self) -> bool {
        match self {
            PaymentError::Halted(_) => true,
            PaymentError::Channel(e) | PaymentError::Declined { source: e, .. } => e.is_fatal(),
            _ => false,
        }
    }
}

/// Which contracts a payment is built from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Cancellation contracts receiver to sender, then forward contracts sender to receiver.
    #[default]
    TwoPass,
    ForwardOnly,
    CancellationOnly,
}

impl PaymentMode {
    fn passes(&self) -> &'static [ContractKind] {
        match self {
            PaymentMode::TwoPass => &[ContractKind::Cancellation, ContractKind::Forward],
            PaymentMode::ForwardOnly => &[ContractKind::Forward],
            PaymentMode::CancellationOnly => &[ContractKind::Cancellation],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    pub sender: NodeId,
    pub receiver: NodeId,
    /// What the receiver gets, fees come on top.
    pub amount: u128,
    /// The full node sequence from sender to receiver, found by the router if absent.
    pub route: Option<Vec<NodeId>>,
    pub mode: PaymentMode,
    /// Overrides the configured griefing penalty rate.
    pub penalty_rate_millionths: Option<u128>,
    /// Overrides the configured final expiry delta.
    pub final_expiry_delta: Option<u64>,
}

impl PaymentRequest {
    pub fn new(sender: NodeId, receiver: NodeId, amount: u128) -> Self {
        Self {
            sender,
            receiver,
            amount,
            route: None,
            mode: PaymentMode::default(),
            penalty_rate_millionths: None,
            final_expiry_delta: None,
        }
    }

    pub fn with_route(mut self, route: Vec<NodeId>) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_mode(mut self, mode: PaymentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_penalty_rate(mut self, penalty_rate_millionths: u128) -> Self {
        self.penalty_rate_millionths = Some(penalty_rate_millionths);
        self
    }

    pub fn with_final_expiry_delta(mut self, final_expiry_delta: u64) -> Self {
        self.final_expiry_delta = Some(final_expiry_delta);
        self
    }
}

/// A secret on its way from one node to a channel peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SecretMessage {
    pub from: NodeId,
    pub to: NodeId,
    pub transaction_id: TransactionId,
    pub secret: Hash256,
}

/// Everything fixed before the first contract is offered. Hop `i` connects
/// `route[i]` to `route[i + 1]` over `channels[i]`.
#[derive(Clone, Debug)]
struct HopPlan {
    transaction_id: TransactionId,
    route: Vec<NodeId>,
    channels: Vec<ChannelId>,
    amounts: Vec<u128>,
    expiries: Vec<u64>,
    penalties: Vec<u128>,
    hash_x: Hash256,
    hash_r: Hash256,
    hash_algorithm: HashAlgorithm,
}

impl HopPlan {
    fn hops(&self) -> usize {
        self.route.len() - 1
    }

    /// The hop that follows `hop` in the direction a pass of `kind` travels.
    fn next_hop(&self, kind: ContractKind, hop: usize) -> Option<usize> {
        match kind {
            ContractKind::Forward => (hop + 1 < self.hops()).then_some(hop + 1),
            ContractKind::Cancellation => hop.checked_sub(1),
        }
    }

    fn first_hop(&self, kind: ContractKind) -> usize {
        match kind {
            ContractKind::Forward => 0,
            ContractKind::Cancellation => self.hops() - 1,
        }
    }
}

impl Network {
    /// Builds every contract of a payment and arms the receiver. A payment that cannot
    /// be built leaves no contract pending and no balance changed.
    pub fn send_payment(
        &mut self,
        request: PaymentRequest,
    ) -> Result<TransactionId, PaymentError> {
        if let Some(reason) = self.halted() {
            return Err(PaymentError::Halted(reason.to_string()));
        }
        let result = self.execute_payment(request);
        if let Err(err) = &result {
            if err.is_fatal() {
                self.halt(err.to_string());
            }
        }
        result
    }

    fn execute_payment(&mut self, request: PaymentRequest) -> Result<TransactionId, PaymentError> {
        if request.amount == 0 {
            return Err(PaymentError::InvalidRequest(
                "amount must be greater than 0".to_string(),
            ));
        }
        if request.sender == request.receiver {
            return Err(PaymentError::InvalidRequest(
                "sender and receiver are the same node".to_string(),
            ));
        }
        for node in [request.sender, request.receiver] {
            if !self.nodes.contains_key(&node) {
                return Err(PaymentError::UnknownNode(node));
            }
        }
        let final_expiry_delta = request
            .final_expiry_delta
            .unwrap_or(self.config.final_expiry_delta);
        if final_expiry_delta == 0 {
            return Err(PaymentError::InvalidRequest(
                "final expiry delta must be greater than 0".to_string(),
            ));
        }
        let penalty_rate = if request.mode.passes().contains(&ContractKind::Forward) {
            request
                .penalty_rate_millionths
                .unwrap_or(self.config.penalty_rate())
        } else {
            0
        };

        let route = match request.route.clone() {
            Some(route) => route,
            None => {
                let hops = self.graph().find_path(
                    request.sender,
                    request.receiver,
                    request.amount,
                    penalty_rate,
                    request.mode.passes().len(),
                )?;
                std::iter::once(request.sender)
                    .chain(hops.iter().map(|hop| hop.target))
                    .collect()
            }
        };
        self.check_route(&request, &route)?;

        let transaction_id = self.next_transaction_id();
        let hash_algorithm = self.config.hash_algorithm;
        let (hash_x, hash_r) = self
            .nodes
            .get_mut(&request.receiver)
            .ok_or(PaymentError::UnknownNode(request.receiver))?
            .generate_secrets(hash_algorithm);
        let plan = self.plan_hops(
            transaction_id,
            route,
            request.amount,
            penalty_rate,
            final_expiry_delta,
            (hash_x, hash_r, hash_algorithm),
        )?;
        info!(
            "{} from {} to {} for {}: route {:?}, amounts {:?}, mode {:?}",
            transaction_id,
            request.sender,
            request.receiver,
            request.amount,
            plan.route,
            plan.amounts,
            request.mode
        );
        self.register_contexts(&plan, request.amount);

        for (index, kind) in request.mode.passes().iter().enumerate() {
            if let Err(err) = self.offer_contract(&plan, *kind, plan.first_hop(*kind)) {
                warn!("{} {} pass failed: {}", transaction_id, kind, err);
                if index > 0 {
                    self.receive_abort(request.sender, transaction_id)?;
                }
                self.set_route_status(&plan, PaymentStatus::Failed);
                return Err(err);
            }
        }

        self.set_route_status(&plan, PaymentStatus::Armed);
        self.arm_receiver(request.receiver, transaction_id)?;
        Ok(transaction_id)
    }

    fn check_route(&self, request: &PaymentRequest, route: &[NodeId]) -> Result<(), PaymentError> {
        if route.len() < 2 {
            return Err(PaymentError::InvalidRoute(format!(
                "route {:?} has no hop",
                route
            )));
        }
        if route.first() != Some(&request.sender) || route.last() != Some(&request.receiver) {
            return Err(PaymentError::InvalidRoute(format!(
                "route {:?} does not lead from {} to {}",
                route, request.sender, request.receiver
            )));
        }
        let mut seen = HashSet::new();
        if !route.iter().all(|node| seen.insert(*node)) {
            return Err(PaymentError::InvalidRoute(format!(
                "route {:?} visits a node twice",
                route
            )));
        }
        for pair in route.windows(2) {
            if !self.nodes.contains_key(&pair[0]) {
                return Err(PaymentError::UnknownNode(pair[0]));
            }
            if !self
                .channel_between(pair[0], pair[1])
                .is_some_and(|channel| channel.is_open())
            {
                return Err(PaymentError::NoChannel(pair[0], pair[1]));
            }
        }
        Ok(())
    }

    fn plan_hops(
        &self,
        transaction_id: TransactionId,
        route: Vec<NodeId>,
        amount: u128,
        penalty_rate: u128,
        final_expiry_delta: u64,
        (hash_x, hash_r, hash_algorithm): (Hash256, Hash256, HashAlgorithm),
    ) -> Result<HopPlan, PaymentError> {
        let hops = route.len() - 1;
        let blocks_per_hop = self.config.blocks_per_hop;
        let height = self.block_height();

        let mut channels = Vec::with_capacity(hops);
        for pair in route.windows(2) {
            let channel_id = self
                .nodes
                .get(&pair[0])
                .and_then(|node| node.channel_with(pair[1]))
                .ok_or(PaymentError::NoChannel(pair[0], pair[1]))?;
            channels.push(channel_id);
        }

        // the node receiving hop i + 1 is paid by the amount of hop i
        let mut amounts = vec![0u128; hops];
        amounts[hops - 1] = amount;
        for i in (0..hops - 1).rev() {
            let forwarder = route[i + 1];
            let fee = self
                .nodes
                .get(&forwarder)
                .ok_or(PaymentError::UnknownNode(forwarder))?
                .fee_policy()
                .forward_fee(amounts[i + 1])
                .map_err(PaymentError::Fee)?;
            amounts[i] = amounts[i + 1]
                .checked_add(fee)
                .ok_or_else(|| {
                    PaymentError::Fee(format!("amount {} + fee {}", amounts[i + 1], fee))
                })?;
        }

        let expiries = (0..hops)
            .map(|i| height + final_expiry_delta + (hops - 1 - i) as u64 * blocks_per_hop)
            .collect();
        let penalties = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                calculate_griefing_penalty(*amount, penalty_rate, blocks_per_hop, hops - i)
                    .ok_or_else(|| PaymentError::Fee(format!("griefing penalty of {}", amount)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HopPlan {
            transaction_id,
            route,
            channels,
            amounts,
            expiries,
            penalties,
            hash_x,
            hash_r,
            hash_algorithm,
        })
    }

    fn register_contexts(&mut self, plan: &HopPlan, amount: u128) {
        let last = plan.hops();
        for (position, node_id) in plan.route.iter().enumerate() {
            let role = match position {
                0 => PaymentRole::Sender,
                p if p == last => PaymentRole::Receiver,
                _ => PaymentRole::Intermediary,
            };
            let context = TransactionContext {
                transaction_id: plan.transaction_id,
                role,
                status: PaymentStatus::Constructing,
                hash_x: plan.hash_x,
                hash_r: plan.hash_r,
                hash_algorithm: plan.hash_algorithm,
                upstream: position.checked_sub(1).map(|p| plan.route[p]),
                downstream: plan.route.get(position + 1).copied(),
                amount_in: if position == 0 {
                    amount
                } else {
                    plan.amounts[position - 1]
                },
                amount_out: plan.amounts.get(position).copied().unwrap_or(0),
                contracts: Vec::new(),
            };
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.insert_transaction(context);
            }
        }
    }

    fn set_route_status(&mut self, plan: &HopPlan, status: PaymentStatus) {
        for node_id in &plan.route {
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.update_status(plan.transaction_id, status);
            }
        }
    }

    fn build_contract(
        &mut self,
        plan: &HopPlan,
        kind: ContractKind,
        hop: usize,
    ) -> Result<Contract, PaymentError> {
        let id = self.next_contract_id();
        let contract = Contract::new(
            id,
            ContractParams {
                kind,
                amount: plan.amounts[hop],
                hash_x: plan.hash_x,
                hash_r: plan.hash_r,
                hash_algorithm: plan.hash_algorithm,
                expiry: plan.expiries[hop],
                channel_id: plan.channels[hop],
                sender: plan.route[hop],
                receiver: plan.route[hop + 1],
                transaction_id: Some(plan.transaction_id),
            },
        )?;
        Ok(match kind {
            ContractKind::Forward => contract.with_penalty(plan.penalties[hop]),
            ContractKind::Cancellation => contract,
        })
    }

    /// The amount of the contract `node` holds in `transaction_id` of `kind`, as
    /// payer or as payee.
    fn committed_amount(
        &self,
        node: NodeId,
        transaction_id: TransactionId,
        kind: ContractKind,
        is_payer: bool,
    ) -> Option<u128> {
        let context = self.nodes.get(&node)?.transaction(transaction_id)?;
        let contract_ref = context.contract(kind, is_payer)?;
        self.channels
            .get(&contract_ref.channel_id)?
            .pending_contract(contract_ref.contract_id)
            .map(|c| c.amount)
    }

    /// Offers the contract of `hop` and, once admitted, lets the pass continue with the
    /// next hop. A decline further along unwinds the contract built here.
    fn offer_contract(
        &mut self,
        plan: &HopPlan,
        kind: ContractKind,
        hop: usize,
    ) -> Result<(), PaymentError> {
        let payer = plan.route[hop];
        let payee = plan.route[hop + 1];

        if kind == ContractKind::Forward && hop > 0 {
            let incoming = self
                .committed_amount(payer, plan.transaction_id, kind, false)
                .unwrap_or(0);
            if plan.amounts[hop] > incoming {
                return Err(PaymentError::Uncollateralized {
                    node: payer,
                    incoming,
                    outgoing: plan.amounts[hop],
                });
            }
        }

        let contract = self.build_contract(plan, kind, hop)?;
        let (channel_id, contract_id) = (contract.channel_id, contract.id);
        debug!(
            "{} offers {} {} of {} to {} for {}",
            payer, kind, contract_id, contract.amount, payee, plan.transaction_id
        );
        self.receive_contract(payee, hop, contract)?;

        if let Some(next) = plan.next_hop(kind, hop) {
            if let Err(err) = self.offer_contract(plan, kind, next) {
                warn!(
                    "{} unwinds {} on {} after a decline: {}",
                    payer, contract_id, channel_id, err
                );
                self.unwind_contract(channel_id, contract_id)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// A node accepting an inbound contract. Admission control always runs first.
    fn receive_contract(
        &mut self,
        node: NodeId,
        hop: usize,
        contract: Contract,
    ) -> Result<(), PaymentError> {
        if contract.receiver != node {
            return Err(PaymentError::InvalidRoute(format!(
                "{} is offered {} addressed to {}",
                node, contract.id, contract.receiver
            )));
        }
        let transaction_id = contract
            .transaction_id
            .ok_or_else(|| {
                PaymentError::InvalidRequest(format!("{} belongs to no transaction", contract.id))
            })?;

        if contract.kind == ContractKind::Cancellation {
            if let Some(outgoing) =
                self.committed_amount(node, transaction_id, ContractKind::Cancellation, true)
            {
                if outgoing > contract.amount {
                    return Err(PaymentError::Uncollateralized {
                        node,
                        incoming: contract.amount,
                        outgoing,
                    });
                }
            }
        }

        let channel = self
            .channels
            .get_mut(&contract.channel_id)
            .ok_or(PaymentError::NoChannel(contract.sender, node))?;
        channel
            .add_contract(contract.clone())
            .map_err(|source| PaymentError::Declined { node, hop, source })?;
        self.on_contract_admitted(&contract);
        Ok(())
    }

    fn unwind_contract(
        &mut self,
        channel_id: ChannelId,
        contract_id: ContractId,
    ) -> Result<(), PaymentError> {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Ok(());
        };
        if channel.pending_contract(contract_id).is_none() {
            return Ok(());
        }
        let contract = channel.invalidate_contract(&mut self.ledger, contract_id)?;
        self.on_contract_resolved(&contract);
        Ok(())
    }

    /// Withdraws every contract `node` pays for in `transaction_id`, then passes the
    /// abort on downstream.
    fn receive_abort(
        &mut self,
        node: NodeId,
        transaction_id: TransactionId,
    ) -> Result<(), PaymentError> {
        let Some(context) = self
            .nodes
            .get(&node)
            .and_then(|n| n.transaction(transaction_id))
            .cloned()
        else {
            return Ok(());
        };
        info!("{} aborts {}", node, transaction_id);
        for contract_ref in context.contracts.iter().filter(|c| c.is_payer) {
            self.unwind_contract(contract_ref.channel_id, contract_ref.contract_id)?;
        }
        match context.downstream {
            Some(downstream) => self.receive_abort(downstream, transaction_id),
            None => Ok(()),
        }
    }

    fn arm_receiver(
        &mut self,
        receiver: NodeId,
        transaction_id: TransactionId,
    ) -> Result<(), PaymentError> {
        let policy = self
            .nodes
            .get(&receiver)
            .ok_or(PaymentError::UnknownNode(receiver))?
            .receiver_policy();
        let height = self.block_height();
        debug!("{} armed for {} with {:?}", receiver, transaction_id, policy);
        match policy {
            ReceiverPolicy::Claim => {
                self.reveal_secret(receiver, transaction_id, SecretKind::Success)
            }
            ReceiverPolicy::Cancel => {
                self.reveal_secret(receiver, transaction_id, SecretKind::Cancellation)
            }
            ReceiverPolicy::ClaimAfter(blocks) | ReceiverPolicy::CancelAfter(blocks) => {
                let kind = if matches!(policy, ReceiverPolicy::ClaimAfter(_)) {
                    SecretKind::Success
                } else {
                    SecretKind::Cancellation
                };
                self.timer.schedule(
                    height + blocks,
                    TimerEvent::RevealSecret {
                        node: receiver,
                        transaction_id,
                        kind,
                    },
                );
                Ok(())
            }
            ReceiverPolicy::Hold => Ok(()),
        }
    }

    /// `node` reveals one of the secrets it generated for `transaction_id`.
    pub fn reveal_secret(
        &mut self,
        node: NodeId,
        transaction_id: TransactionId,
        kind: SecretKind,
    ) -> Result<(), PaymentError> {
        let owner = self.nodes.get(&node).ok_or(PaymentError::UnknownNode(node))?;
        let commitment = owner
            .transaction(transaction_id)
            .ok_or(PaymentError::UnknownTransaction(node, transaction_id))?
            .commitment(kind);
        let secret = owner
            .secret_for(&commitment)
            .ok_or(PaymentError::MissingSecret { node, commitment })?;
        info!("{} reveals the {} secret of {}", node, kind, transaction_id);
        self.report_and_propagate(node, transaction_id, secret, None)?;
        self.drain_mailbox()
    }

    /// Reports `secret` on every pending contract `node` has in the transaction, then
    /// tells the peers it did not hear it from.
    fn report_and_propagate(
        &mut self,
        node: NodeId,
        transaction_id: TransactionId,
        secret: Hash256,
        from: Option<NodeId>,
    ) -> Result<(), PaymentError> {
        let context = self
            .nodes
            .get(&node)
            .and_then(|n| n.transaction(transaction_id))
            .cloned()
            .ok_or(PaymentError::UnknownTransaction(node, transaction_id))?;
        let Some(kind) = context.secret_kind_of(&secret) else {
            warn!("{} got a secret that opens nothing in {}", node, transaction_id);
            return Ok(());
        };

        for contract_ref in &context.contracts {
            let Some(channel) = self.channels.get_mut(&contract_ref.channel_id) else {
                continue;
            };
            if !channel.is_open() || channel.pending_contract(contract_ref.contract_id).is_none() {
                continue;
            }
            match channel.report_secret(&mut self.ledger, contract_ref.contract_id, kind, secret) {
                Ok(contract) => self.on_contract_resolved(&contract),
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => debug!(
                    "{} could not report on {}: {}",
                    node, contract_ref.contract_id, err
                ),
            }
        }

        for peer in context.peers().filter(|peer| Some(*peer) != from) {
            self.mailbox.push_back(SecretMessage {
                from: node,
                to: peer,
                transaction_id,
                secret,
            });
        }
        Ok(())
    }

    /// Delivers queued secrets until every node that cares has acted on them.
    fn drain_mailbox(&mut self) -> Result<(), PaymentError> {
        while let Some(message) = self.mailbox.pop_front() {
            self.receive_secret(message)?;
        }
        Ok(())
    }

    fn receive_secret(&mut self, message: SecretMessage) -> Result<(), PaymentError> {
        let SecretMessage {
            from,
            to,
            transaction_id,
            secret,
        } = message;
        let Some(node) = self.nodes.get_mut(&to) else {
            return Ok(());
        };
        let Some(context) = node.transaction(transaction_id) else {
            return Ok(());
        };
        let commitment = context.hash_algorithm.commit(&secret);
        if context.secret_kind_of(&secret).is_none() {
            warn!("{} drops a secret from {} that opens nothing", to, from);
            return Ok(());
        }
        if !node.learn_secret(commitment, secret) {
            return Ok(());
        }
        self.report_and_propagate(to, transaction_id, secret, Some(from))
    }
}
