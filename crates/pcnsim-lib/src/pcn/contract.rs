use super::hash_algorithm::HashAlgorithm;
use super::types::{ChannelId, ContractId, Hash256, NodeId, TransactionId};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tracing::debug;

/// Which payout table a contract follows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ContractKind {
    /// Refunds the payer by default, pays the payee only on the success secret.
    Forward,
    /// Pays the payee by default, either secret refunds the payer early.
    Cancellation,
}

/// The two secrets a receiver commits to for one payment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum SecretKind {
    /// `x`, proves the payment was claimed.
    Success,
    /// `r`, aborts the payment.
    Cancellation,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ContractOutcome {
    Pending,
    ResolvedSuccess,
    ResolvedCancel,
    ResolvedExpired,
    /// Withdrawn before it could be used, either rejected at admission or unwound
    /// with a failed route. Never moves funds.
    Invalidated,
}

impl ContractOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, ContractOutcome::Pending)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Contract amount must be greater than 0")]
    ZeroAmount,
    #[error("Success and cancellation commitments must differ")]
    IdenticalCommitments,
    #[error("Contract {0} is already resolved as {1}")]
    AlreadyResolved(ContractId, ContractOutcome),
    #[error("Contract {id} expired at block {expiry}, current block {height}")]
    Expired { id: ContractId, expiry: u64, height: u64 },
    #[error("Secret does not match the {1} commitment of contract {0}")]
    SecretMismatch(ContractId, SecretKind),
}

/// The net value a resolution moves across the channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Payout {
    pub to_payee: u128,
    pub to_payer: u128,
}

#[derive(Clone, Debug)]
pub struct ContractParams {
    pub kind: ContractKind,
    pub amount: u128,
    pub hash_x: Hash256,
    pub hash_r: Hash256,
    pub hash_algorithm: HashAlgorithm,
    pub expiry: u64,
    pub channel_id: ChannelId,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub transaction_id: Option<TransactionId>,
}

/// A hash and time locked transfer of `amount` from `sender` to `receiver` over
/// one channel, optionally decorated with a griefing penalty that the receiver
/// forfeits to the sender when it lets the contract expire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub kind: ContractKind,
    pub amount: u128,
    pub penalty: u128,
    pub hash_x: Hash256,
    pub hash_r: Hash256,
    pub hash_algorithm: HashAlgorithm,
    pub expiry: u64,
    pub channel_id: ChannelId,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub transaction_id: Option<TransactionId>,
    outcome: ContractOutcome,
    revealed: Option<(SecretKind, Hash256)>,
    penalty_applies: bool,
}

impl Contract {
    pub fn new(id: ContractId, params: ContractParams) -> Result<Self, ContractError> {
        if params.amount == 0 {
            return Err(ContractError::ZeroAmount);
        }
        if params.hash_x == params.hash_r {
            return Err(ContractError::IdenticalCommitments);
        }
        Ok(Self {
            id,
            kind: params.kind,
            amount: params.amount,
            penalty: 0,
            hash_x: params.hash_x,
            hash_r: params.hash_r,
            hash_algorithm: params.hash_algorithm,
            expiry: params.expiry,
            channel_id: params.channel_id,
            sender: params.sender,
            receiver: params.receiver,
            transaction_id: params.transaction_id,
            outcome: ContractOutcome::Pending,
            revealed: None,
            penalty_applies: false,
        })
    }

    /// Griefing-penalty decoration, composable with either kind.
    pub fn with_penalty(mut self, penalty: u128) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn outcome(&self) -> ContractOutcome {
        self.outcome
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_pending()
    }

    pub fn revealed_secret(&self) -> Option<(SecretKind, Hash256)> {
        self.revealed
    }

    pub fn commitment(&self, kind: SecretKind) -> Hash256 {
        match kind {
            SecretKind::Success => self.hash_x,
            SecretKind::Cancellation => self.hash_r,
        }
    }

    /// Which of the two secrets `commitment` refers to, if any.
    pub fn secret_kind_of(&self, commitment: &Hash256) -> Option<SecretKind> {
        if *commitment == self.hash_x {
            Some(SecretKind::Success)
        } else if *commitment == self.hash_r {
            Some(SecretKind::Cancellation)
        } else {
            None
        }
    }

    pub fn report_x(
        &mut self,
        secret: Hash256,
        height: u64,
    ) -> Result<ContractOutcome, ContractError> {
        self.report(SecretKind::Success, secret, height)
    }

    pub fn report_r(
        &mut self,
        secret: Hash256,
        height: u64,
    ) -> Result<ContractOutcome, ContractError> {
        self.report(SecretKind::Cancellation, secret, height)
    }

    /// The first valid reveal is final, later reports fail without touching the contract.
    pub fn report(
        &mut self,
        kind: SecretKind,
        secret: Hash256,
        height: u64,
    ) -> Result<ContractOutcome, ContractError> {
        if !self.is_pending() {
            return Err(ContractError::AlreadyResolved(self.id, self.outcome));
        }
        if height >= self.expiry {
            return Err(ContractError::Expired {
                id: self.id,
                expiry: self.expiry,
                height,
            });
        }
        if self.hash_algorithm.commit(&secret) != self.commitment(kind) {
            return Err(ContractError::SecretMismatch(self.id, kind));
        }
        self.outcome = match kind {
            SecretKind::Success => ContractOutcome::ResolvedSuccess,
            SecretKind::Cancellation => ContractOutcome::ResolvedCancel,
        };
        self.revealed = Some((kind, secret));
        debug!(
            "{} {} resolved as {} with {} secret",
            self.kind, self.id, self.outcome, kind
        );
        Ok(self.outcome)
    }

    /// Expires the contract if its deadline is reached. Returns whether it transitioned.
    pub fn check_expiry(&mut self, height: u64) -> bool {
        if !self.is_pending() || height < self.expiry {
            return false;
        }
        self.outcome = ContractOutcome::ResolvedExpired;
        self.penalty_applies = true;
        debug!("{} {} expired at block {}", self.kind, self.id, height);
        true
    }

    /// Forces a pending contract to its default outcome because its channel is closing.
    /// The penalty is only forfeited if the deadline had really passed.
    pub(crate) fn expire_on_close(&mut self, height: u64) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.outcome = ContractOutcome::ResolvedExpired;
        self.penalty_applies = height >= self.expiry;
        true
    }

    pub(crate) fn invalidate(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.outcome = ContractOutcome::Invalidated;
        true
    }

    /// What the payer has to lock for this contract.
    pub fn payer_lock(&self) -> u128 {
        self.amount
    }

    /// What the payee has to lock, the griefing penalty.
    pub fn payee_lock(&self) -> u128 {
        self.penalty
    }

    /// The transfer dictated by the outcome, see the payout table of each kind.
    pub fn payout(&self) -> Payout {
        let pays_payee = match (self.kind, self.outcome) {
            (_, ContractOutcome::Pending) | (_, ContractOutcome::Invalidated) => false,
            (ContractKind::Forward, ContractOutcome::ResolvedSuccess) => true,
            (ContractKind::Forward, _) => false,
            (ContractKind::Cancellation, ContractOutcome::ResolvedExpired) => true,
            (ContractKind::Cancellation, _) => false,
        };
        let forfeits_penalty =
            self.outcome == ContractOutcome::ResolvedExpired && self.penalty_applies;
        Payout {
            to_payee: if pays_payee { self.amount } else { 0 },
            to_payer: if forfeits_penalty { self.penalty } else { 0 },
        }
    }
}
