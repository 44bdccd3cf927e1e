use super::fee::{amount_after_fee, amount_with_fee};
use super::types::{ChannelData, Hash256, MessageState, NodeId};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, error, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient funds for {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: NodeId,
        required: u128,
        available: u128,
    },
    #[error("Unknown address: {0}")]
    UnknownAddress(NodeId),
    #[error("Balance overflow for {0}")]
    Overflow(NodeId),
    #[error("Invalid settlement: {0}")]
    InvalidSettlement(String),
    #[error("Commitment {0} was already revealed with a different secret")]
    CommitmentConflict(Hash256),
}

impl LedgerError {
    /// A conflicting reveal means the commitment scheme is broken, nothing local can repair it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::CommitmentConflict(_))
    }
}

/// The global block clock and the on-chain view of the simulation: address
/// balances, the secrets revealed so far, and the fee charged on settlement.
#[derive(Debug, Clone)]
pub struct Ledger {
    block_height: u64,
    balances: BTreeMap<NodeId, u128>,
    secrets: HashMap<Hash256, Hash256>,
    close_fee_rate_millionths: u128,
}

impl Ledger {
    pub fn new(close_fee_rate_millionths: u128) -> Self {
        Self {
            block_height: 0,
            balances: BTreeMap::new(),
            secrets: HashMap::new(),
            close_fee_rate_millionths,
        }
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn close_fee_rate_millionths(&self) -> u128 {
        self.close_fee_rate_millionths
    }

    /// Moves the clock forward by `k` blocks. Firing timers is up to the caller,
    /// see `Network::advance`.
    pub fn advance(&mut self, k: u64) -> u64 {
        self.block_height += k;
        trace!("Ledger advanced to block {}", self.block_height);
        self.block_height
    }

    /// Creating an address twice keeps the first balance.
    pub fn register_balance(&mut self, address: NodeId, amount: u128) {
        self.balances.entry(address).or_insert_with(|| {
            debug!("Registered {} with ledger balance {}", address, amount);
            amount
        });
    }

    pub fn balance_of(&self, address: NodeId) -> Option<u128> {
        self.balances.get(&address).copied()
    }

    /// Takes `amount` plus the fee from `address`, returning what was charged.
    pub fn apply_debit(&mut self, address: NodeId, amount: u128) -> Result<u128, LedgerError> {
        let required = amount_with_fee(amount, self.close_fee_rate_millionths)
            .ok_or(LedgerError::Overflow(address))?;
        let balance = self
            .balances
            .get_mut(&address)
            .ok_or(LedgerError::UnknownAddress(address))?;
        if *balance < required {
            return Err(LedgerError::InsufficientFunds {
                address,
                required,
                available: *balance,
            });
        }
        *balance -= required;
        debug!(
            "Debited {} ({} with fee) from {}, remaining {}",
            amount, required, address, *balance
        );
        Ok(required)
    }

    pub fn credit(&mut self, address: NodeId, amount: u128) -> Result<(), LedgerError> {
        let balance = self.balances.entry(address).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(address))?;
        Ok(())
    }

    /// Pays out a final channel state to both owners minus the close fee. Either
    /// both owners are credited or neither is.
    pub fn settle_close(
        &mut self,
        state: &MessageState,
        data: &ChannelData,
    ) -> Result<(u128, u128), LedgerError> {
        if state.channel_id != data.channel_id {
            return Err(LedgerError::InvalidSettlement(format!(
                "state of {} submitted for {}",
                state.channel_id, data.channel_id
            )));
        }
        if state.owner1_balance > data.total_value {
            return Err(LedgerError::InvalidSettlement(format!(
                "owner1 balance {} exceeds total value {} of {}",
                state.owner1_balance, data.total_value, data.channel_id
            )));
        }
        let credit1 = amount_after_fee(state.owner1_balance, self.close_fee_rate_millionths);
        let credit2 = amount_after_fee(
            data.total_value - state.owner1_balance,
            self.close_fee_rate_millionths,
        );

        let balance1 = self.balance_of(data.owner1).unwrap_or(0);
        let balance2 = self.balance_of(data.owner2).unwrap_or(0);
        let new_balance1 = balance1
            .checked_add(credit1)
            .ok_or(LedgerError::Overflow(data.owner1))?;
        let new_balance2 = balance2
            .checked_add(credit2)
            .ok_or(LedgerError::Overflow(data.owner2))?;
        self.balances.insert(data.owner1, new_balance1);
        self.balances.insert(data.owner2, new_balance2);

        debug!(
            "Settled {} at serial {}: {} +{}, {} +{}",
            data.channel_id, state.serial, data.owner1, credit1, data.owner2, credit2
        );
        Ok((credit1, credit2))
    }

    /// Records a secret under its commitment. Revealing the same secret again is
    /// accepted, a different one is a commitment conflict.
    pub fn reveal(&mut self, commitment: Hash256, secret: Hash256) -> Result<(), LedgerError> {
        match self.secrets.get(&commitment) {
            Some(existing) if *existing != secret => {
                error!(
                    "Commitment {:?} revealed with conflicting secrets {:?} and {:?}",
                    commitment, existing, secret
                );
                Err(LedgerError::CommitmentConflict(commitment))
            }
            Some(_) => Ok(()),
            None => {
                debug!("Secret for commitment {:?} revealed on ledger", commitment);
                self.secrets.insert(commitment, secret);
                Ok(())
            }
        }
    }

    pub fn revealed_secret(&self, commitment: &Hash256) -> Option<Hash256> {
        self.secrets.get(commitment).copied()
    }

    pub fn reset(&mut self) {
        self.block_height = 0;
        self.balances.clear();
        self.secrets.clear();
    }
}
