use super::contract::{Contract, ContractError, ContractOutcome, SecretKind};
use super::ledger::{Ledger, LedgerError};
use super::settlement::{CloseStatus, SettlementBackend, SettlementError};
use super::types::{
    ChannelData, ChannelId, ContractId, Hash256, MessageState, NodeId, SignedMessageState,
    StateAuthenticator,
};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Stale update for {channel_id}: serial {received} is not above {current}")]
    StaleUpdate {
        channel_id: ChannelId,
        current: u64,
        received: u64,
    },
    #[error("Balance {balance} of {channel_id} is outside [0, {total}]")]
    OutOfRange {
        channel_id: ChannelId,
        balance: u128,
        total: u128,
    },
    #[error("Insufficient capacity on the {side} side of {channel_id}: required {required}, available {available}")]
    InsufficientCapacity {
        channel_id: ChannelId,
        side: ChannelSide,
        required: u128,
        available: u128,
    },
    #[error("{0} is closed")]
    ChannelClosed(ChannelId),
    #[error("Unknown contract {1} on {0}")]
    UnknownContract(ChannelId, ContractId),
    #[error("Contract {1} on {0} has not been resolved yet")]
    UnresolvedContract(ChannelId, ContractId),
    #[error("Unknown state with serial {1} of {0}")]
    UnknownState(ChannelId, u64),
    #[error("{1} is not an owner of {0}")]
    NotAnOwner(ChannelId, NodeId),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ChannelError {
    pub fn is_fatal(&self) -> bool {
        match self {
            ChannelError::InvariantViolation(_) => true,
            ChannelError::Ledger(e) | ChannelError::Settlement(SettlementError::Ledger(e)) => {
                e.is_fatal()
            }
            _ => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ChannelSide {
    #[strum(serialize = "owner1")]
    Owner1,
    #[strum(serialize = "owner2")]
    Owner2,
}

#[derive(Clone, Debug)]
pub struct ChannelState {
    message: MessageState,
    pending: Vec<Contract>,
    locked_by_owner1: u128,
    locked_by_owner2: u128,
}

impl ChannelState {
    fn new(message: MessageState) -> Self {
        Self {
            message,
            pending: Vec::new(),
            locked_by_owner1: 0,
            locked_by_owner2: 0,
        }
    }

    /// The locks implied by the pending set. The payer side of a contract locks its
    /// amount, the payee side locks its penalty.
    fn locks_of(pending: &[Contract], owner1: NodeId) -> (u128, u128) {
        pending.iter().fold((0, 0), |(l1, l2), contract| {
            if contract.sender == owner1 {
                (l1 + contract.payer_lock(), l2 + contract.payee_lock())
            } else {
                (l1 + contract.payee_lock(), l2 + contract.payer_lock())
            }
        })
    }
}

/// A bilateral account between two nodes. All mutation of the balance split and of
/// the pending contract set goes through the methods below, which keep the locked
/// counters consistent with the pending contracts.
#[derive(Clone, Debug)]
pub struct Channel {
    data: ChannelData,
    state: ChannelState,
    is_open: bool,
    history: Vec<Contract>,
    superseded: Vec<MessageState>,
}

impl Channel {
    /// Funds a channel with `deposit` from `owner1`, of which `owner1_balance` stays
    /// on owner1's side and the rest is pushed to owner2.
    pub fn open(
        ledger: &mut Ledger,
        settlement: &mut dyn SettlementBackend,
        owner1: NodeId,
        owner2: NodeId,
        deposit: u128,
        owner1_balance: u128,
    ) -> Result<Self, ChannelError> {
        if owner1 == owner2 {
            return Err(ChannelError::InvalidParameter(format!(
                "{} cannot open a channel with itself",
                owner1
            )));
        }
        if deposit == 0 {
            return Err(ChannelError::InvalidParameter(
                "Channel deposit must be greater than 0".to_string(),
            ));
        }
        if owner1_balance > deposit {
            return Err(ChannelError::InvalidParameter(format!(
                "Initial owner1 balance {} exceeds deposit {}",
                owner1_balance, deposit
            )));
        }
        let data = settlement.open(ledger, (owner1, owner2), deposit)?;
        info!(
            "Opened {} between {} and {} with deposit {}",
            data.channel_id, owner1, owner2, deposit
        );
        Ok(Self {
            data,
            state: ChannelState::new(MessageState::new(data.channel_id, owner1_balance, 0)),
            is_open: true,
            history: Vec::new(),
            superseded: Vec::new(),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.data.channel_id
    }

    pub fn data(&self) -> &ChannelData {
        &self.data
    }

    pub fn message(&self) -> &MessageState {
        &self.state.message
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn pending_contracts(&self) -> &[Contract] {
        &self.state.pending
    }

    pub fn pending_contract(&self, contract_id: ContractId) -> Option<&Contract> {
        self.state.pending.iter().find(|c| c.id == contract_id)
    }

    /// Resolved, invalidated and rejected contracts, in the order they left the channel.
    pub fn history(&self) -> &[Contract] {
        &self.history
    }

    pub fn side_of(&self, node: NodeId) -> Option<ChannelSide> {
        if node == self.data.owner1 {
            Some(ChannelSide::Owner1)
        } else if node == self.data.owner2 {
            Some(ChannelSide::Owner2)
        } else {
            None
        }
    }

    pub fn balance(&self, side: ChannelSide) -> u128 {
        match side {
            ChannelSide::Owner1 => self.state.message.owner1_balance,
            ChannelSide::Owner2 => self.data.total_value - self.state.message.owner1_balance,
        }
    }

    pub fn locked(&self, side: ChannelSide) -> u128 {
        match side {
            ChannelSide::Owner1 => self.state.locked_by_owner1,
            ChannelSide::Owner2 => self.state.locked_by_owner2,
        }
    }

    /// What `side` can still pledge to its peer.
    pub fn transferable(&self, side: ChannelSide) -> u128 {
        self.balance(side) - self.locked(side)
    }

    pub fn transferable_from(&self, node: NodeId) -> Option<u128> {
        self.side_of(node).map(|side| self.transferable(side))
    }

    /// The latest state, authorized by both owners.
    pub fn signed_state(&self, authenticator: &dyn StateAuthenticator) -> SignedMessageState {
        SignedMessageState::sign(authenticator, &self.data, self.state.message)
    }

    /// Any state this channel has issued, current or superseded.
    pub fn state_with_serial(&self, serial: u64) -> Option<MessageState> {
        if self.state.message.serial == serial {
            return Some(self.state.message);
        }
        self.superseded.iter().find(|s| s.serial == serial).copied()
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if !self.is_open {
            return Err(ChannelError::ChannelClosed(self.data.channel_id));
        }
        Ok(())
    }

    /// Checks that the locks fit into both sides of `message`.
    fn check_locks(
        &self,
        message: &MessageState,
        locks: (u128, u128),
    ) -> Result<(), ChannelError> {
        let owner2_balance = self.data.total_value - message.owner1_balance;
        if locks.0 > message.owner1_balance || locks.1 > owner2_balance {
            error!(
                "{} would lock ({}, {}) against balances ({}, {})",
                self.data.channel_id, locks.0, locks.1, message.owner1_balance, owner2_balance
            );
            return Err(ChannelError::InvariantViolation(format!(
                "locked funds ({}, {}) exceed balances ({}, {}) of {}",
                locks.0, locks.1, message.owner1_balance, owner2_balance, self.data.channel_id
            )));
        }
        Ok(())
    }

    fn install(&mut self, message: MessageState, locks: (u128, u128)) {
        let previous = std::mem::replace(&mut self.state.message, message);
        self.superseded.push(previous);
        self.state.locked_by_owner1 = locks.0;
        self.state.locked_by_owner2 = locks.1;
    }

    /// Accepts a newer agreed state. A rejected update leaves the channel untouched.
    pub fn update_message(&mut self, message: MessageState) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if message.channel_id != self.data.channel_id {
            return Err(ChannelError::InvalidParameter(format!(
                "state of {} submitted to {}",
                message.channel_id, self.data.channel_id
            )));
        }
        if message.serial <= self.state.message.serial {
            warn!(
                "Rejecting stale update of {}: serial {} <= {}",
                self.data.channel_id, message.serial, self.state.message.serial
            );
            return Err(ChannelError::StaleUpdate {
                channel_id: self.data.channel_id,
                current: self.state.message.serial,
                received: message.serial,
            });
        }
        if message.owner1_balance > self.data.total_value {
            return Err(ChannelError::OutOfRange {
                channel_id: self.data.channel_id,
                balance: message.owner1_balance,
                total: self.data.total_value,
            });
        }
        let locks = ChannelState::locks_of(&self.state.pending, self.data.owner1);
        self.check_locks(&message, locks)?;
        self.install(message, locks);
        debug!(
            "{} updated to serial {} with owner1 balance {}",
            self.data.channel_id, message.serial, message.owner1_balance
        );
        Ok(())
    }

    /// Owner2 tops up the channel. Owner1's balance is unchanged.
    pub fn deposit(
        &mut self,
        ledger: &mut Ledger,
        settlement: &mut dyn SettlementBackend,
        address: NodeId,
        amount: u128,
    ) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if address != self.data.owner2 {
            return Err(ChannelError::NotAnOwner(self.data.channel_id, address));
        }
        let data = settlement.deposit(ledger, self.data.channel_id, address, amount)?;
        self.data = data;
        let next = self.state.message.next(self.state.message.owner1_balance);
        let locks = (self.state.locked_by_owner1, self.state.locked_by_owner2);
        self.install(next, locks);
        info!(
            "{} deposited {} into {}, total value {}",
            address, amount, self.data.channel_id, self.data.total_value
        );
        Ok(())
    }

    /// The single admission gate for contracts. A rejected contract is invalidated and
    /// kept in the history.
    pub fn add_contract(&mut self, mut contract: Contract) -> Result<(), ChannelError> {
        let checked = self.check_add_contract(&contract);
        if let Err(err) = checked {
            warn!(
                "{} rejected {} from {}: {}",
                self.data.channel_id, contract.id, contract.sender, err
            );
            contract.invalidate();
            self.history.push(contract);
            return Err(err);
        }
        match self.side_of(contract.sender) {
            Some(ChannelSide::Owner1) => {
                self.state.locked_by_owner1 += contract.payer_lock();
                self.state.locked_by_owner2 += contract.payee_lock();
            }
            _ => {
                self.state.locked_by_owner2 += contract.payer_lock();
                self.state.locked_by_owner1 += contract.payee_lock();
            }
        }
        debug!(
            "{} admitted {} {} of {} (penalty {}) from {} to {}, expiry {}",
            self.data.channel_id,
            contract.kind,
            contract.id,
            contract.amount,
            contract.penalty,
            contract.sender,
            contract.receiver,
            contract.expiry
        );
        self.state.pending.push(contract);
        Ok(())
    }

    fn check_add_contract(&self, contract: &Contract) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if contract.channel_id != self.data.channel_id {
            return Err(ChannelError::InvalidParameter(format!(
                "{} is attached to {}",
                contract.id, contract.channel_id
            )));
        }
        if !contract.is_pending() {
            return Err(ContractError::AlreadyResolved(contract.id, contract.outcome()).into());
        }
        let payer = self
            .side_of(contract.sender)
            .ok_or(ChannelError::NotAnOwner(self.data.channel_id, contract.sender))?;
        let payee = self
            .side_of(contract.receiver)
            .ok_or(ChannelError::NotAnOwner(self.data.channel_id, contract.receiver))?;
        if payer == payee {
            return Err(ChannelError::InvalidParameter(format!(
                "{} pays its own side",
                contract.id
            )));
        }
        if self.state.pending.iter().any(|c| c.id == contract.id) {
            return Err(ChannelError::InvalidParameter(format!(
                "{} is already pending",
                contract.id
            )));
        }
        for (side, required) in [
            (payer, contract.payer_lock()),
            (payee, contract.payee_lock()),
        ] {
            let available = self.transferable(side);
            if required > available {
                return Err(ChannelError::InsufficientCapacity {
                    channel_id: self.data.channel_id,
                    side,
                    required,
                    available,
                });
            }
        }
        Ok(())
    }

    fn pending_mut(&mut self, contract_id: ContractId) -> Result<&mut Contract, ChannelError> {
        let channel_id = self.data.channel_id;
        self.state
            .pending
            .iter_mut()
            .find(|c| c.id == contract_id)
            .ok_or(ChannelError::UnknownContract(channel_id, contract_id))
    }

    /// Reports a secret to a pending contract and settles it. A failed report changes nothing.
    pub fn report_secret(
        &mut self,
        ledger: &mut Ledger,
        contract_id: ContractId,
        kind: SecretKind,
        secret: Hash256,
    ) -> Result<Contract, ChannelError> {
        self.ensure_open()?;
        let height = ledger.block_height();
        self.pending_mut(contract_id)?.report(kind, secret, height)?;
        self.resolve_contract(ledger, contract_id)
    }

    /// Expires the contract if its deadline has come, `None` if it is not due yet.
    pub fn expire_contract(
        &mut self,
        ledger: &mut Ledger,
        contract_id: ContractId,
    ) -> Result<Option<Contract>, ChannelError> {
        self.ensure_open()?;
        let height = ledger.block_height();
        if !self.pending_mut(contract_id)?.check_expiry(height) {
            return Ok(None);
        }
        self.resolve_contract(ledger, contract_id).map(Some)
    }

    /// Withdraws a contract of a failed route. The locks are released and no value moves.
    pub fn invalidate_contract(
        &mut self,
        ledger: &mut Ledger,
        contract_id: ContractId,
    ) -> Result<Contract, ChannelError> {
        self.ensure_open()?;
        self.pending_mut(contract_id)?.invalidate();
        self.resolve_contract(ledger, contract_id)
    }

    /// Removes a contract that has reached its outcome, releases its locks and issues
    /// the state carrying its payout.
    pub fn resolve_contract(
        &mut self,
        ledger: &mut Ledger,
        contract_id: ContractId,
    ) -> Result<Contract, ChannelError> {
        let channel_id = self.data.channel_id;
        let index = self
            .state
            .pending
            .iter()
            .position(|c| c.id == contract_id)
            .ok_or(ChannelError::UnknownContract(channel_id, contract_id))?;
        let contract = &self.state.pending[index];
        if contract.is_pending() {
            return Err(ChannelError::UnresolvedContract(channel_id, contract_id));
        }

        let owner1_balance = self.balance_after(contract)?;
        let mut remaining = self.state.pending.clone();
        let contract = remaining.remove(index);
        let locks = ChannelState::locks_of(&remaining, self.data.owner1);
        let next = self.state.message.next(owner1_balance);
        self.check_locks(&next, locks)?;

        if let Some((kind, secret)) = contract.revealed_secret() {
            ledger.reveal(contract.commitment(kind), secret)?;
        }
        self.state.pending = remaining;
        self.install(next, locks);
        debug!(
            "{} resolved {} as {}, owner1 balance {} at serial {}",
            channel_id,
            contract.id,
            contract.outcome(),
            next.owner1_balance,
            next.serial
        );
        self.history.push(contract.clone());
        Ok(contract)
    }

    fn balance_after(&self, contract: &Contract) -> Result<u128, ChannelError> {
        let payout = contract.payout();
        let owner1_balance = self.state.message.owner1_balance;
        let balance = if contract.sender == self.data.owner1 {
            owner1_balance
                .checked_sub(payout.to_payee)
                .and_then(|b| b.checked_add(payout.to_payer))
        } else {
            owner1_balance
                .checked_add(payout.to_payee)
                .and_then(|b| b.checked_sub(payout.to_payer))
        };
        balance
            .filter(|b| *b <= self.data.total_value)
            .ok_or_else(|| {
                ChannelError::InvariantViolation(format!(
                    "payout {:?} of {} does not fit into {}",
                    payout, contract.id, self.data.channel_id
                ))
            })
    }

    /// Resolves every pending contract to its default outcome, leaving no locks.
    fn settle_pending(&mut self, ledger: &mut Ledger) -> Result<Vec<Contract>, ChannelError> {
        let height = ledger.block_height();
        let ids: Vec<ContractId> = self.state.pending.iter().map(|c| c.id).collect();
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            self.pending_mut(id)?.expire_on_close(height);
            resolved.push(self.resolve_contract(ledger, id)?);
        }
        Ok(resolved)
    }

    /// Cooperative close. Closing a closed channel does nothing. Returns the contracts
    /// that were still pending.
    pub fn close(
        &mut self,
        ledger: &mut Ledger,
        settlement: &mut dyn SettlementBackend,
        authenticator: &dyn StateAuthenticator,
    ) -> Result<Vec<Contract>, ChannelError> {
        if !self.is_open {
            return Ok(Vec::new());
        }
        let resolved = self.settle_pending(ledger)?;
        let signed = self.signed_state(authenticator);
        settlement.close(ledger, authenticator, &signed)?;
        self.is_open = false;
        info!(
            "Closed {} at serial {}, {} pending contracts defaulted",
            self.data.channel_id,
            signed.state.serial,
            resolved.len()
        );
        Ok(resolved)
    }

    /// Unilateral close by `initiator`, submitting the state with `serial`, which may
    /// be stale.
    pub fn force_close(
        &mut self,
        ledger: &mut Ledger,
        settlement: &mut dyn SettlementBackend,
        authenticator: &dyn StateAuthenticator,
        initiator: NodeId,
        serial: u64,
    ) -> Result<(CloseStatus, Vec<Contract>), ChannelError> {
        self.ensure_open()?;
        if !self.data.is_owner(initiator) {
            return Err(ChannelError::NotAnOwner(self.data.channel_id, initiator));
        }
        let submitted = self
            .state_with_serial(serial)
            .ok_or(ChannelError::UnknownState(self.data.channel_id, serial))?;
        let resolved = self.settle_pending(ledger)?;
        let signed = SignedMessageState::sign(authenticator, &self.data, submitted);
        let status = settlement.force_close(ledger, authenticator, &signed, initiator)?;
        self.is_open = false;
        info!(
            "{} force closed {} with serial {} (latest {})",
            initiator, self.data.channel_id, serial, self.state.message.serial
        );
        Ok((status, resolved))
    }

    /// Submits the latest state against a pending unilateral close.
    pub fn appeal(
        &self,
        ledger: &mut Ledger,
        settlement: &mut dyn SettlementBackend,
        authenticator: &dyn StateAuthenticator,
        appellant: NodeId,
    ) -> Result<(), ChannelError> {
        let signed = self.signed_state(authenticator);
        settlement.appeal(ledger, authenticator, &signed, appellant)?;
        Ok(())
    }

    /// Contracts in the history with the given outcome.
    pub fn contracts_with_outcome(
        &self,
        outcome: ContractOutcome,
    ) -> impl Iterator<Item = &Contract> {
        self.history.iter().filter(move |c| c.outcome() == outcome)
    }
}
