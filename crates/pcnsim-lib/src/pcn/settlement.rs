use super::ledger::{Ledger, LedgerError};
use super::types::{
    ChannelData, ChannelId, MessageState, NodeId, SignedMessageState, StateAuthenticator,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),
    #[error("{address} is not an owner of {channel_id}")]
    NotAnOwner {
        channel_id: ChannelId,
        address: NodeId,
    },
    #[error("Invalid authorization for state {serial} of {channel_id}")]
    InvalidAuthorization { channel_id: ChannelId, serial: u64 },
    #[error("{0} is already settled")]
    AlreadySettled(ChannelId),
    #[error("{0} is already being closed")]
    AlreadyClosing(ChannelId),
    #[error("No dispute is open for {0}")]
    NoDispute(ChannelId),
    #[error("Stale appeal for {channel_id}: serial {submitted} is not above {current}")]
    StaleAppeal {
        channel_id: ChannelId,
        submitted: u64,
        current: u64,
    },
    #[error("Dispute window of {channel_id} is open until block {deadline}")]
    DisputeWindowOpen { channel_id: ChannelId, deadline: u64 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CloseStatus {
    Settled { owner1_credit: u128, owner2_credit: u128 },
    /// The state can still be replaced by an appeal until `deadline`.
    Disputed { deadline: u64 },
}

/// The on-chain binding of the channel layer. It is only touched when a channel
/// is funded, closed or disputed.
pub trait SettlementBackend {
    /// Funds a new channel with owner1's deposit and returns its data.
    fn open(
        &mut self,
        ledger: &mut Ledger,
        parties: (NodeId, NodeId),
        deposit: u128,
    ) -> Result<ChannelData, SettlementError>;

    /// Adds owner2's deposit to an open channel.
    fn deposit(
        &mut self,
        ledger: &mut Ledger,
        channel_id: ChannelId,
        address: NodeId,
        amount: u128,
    ) -> Result<ChannelData, SettlementError>;

    /// Cooperative close, settles at once.
    fn close(
        &mut self,
        ledger: &mut Ledger,
        authenticator: &dyn StateAuthenticator,
        signed: &SignedMessageState,
    ) -> Result<CloseStatus, SettlementError>;

    /// Unilateral close by `initiator`, subject to appeal by either owner.
    fn force_close(
        &mut self,
        ledger: &mut Ledger,
        authenticator: &dyn StateAuthenticator,
        signed: &SignedMessageState,
        initiator: NodeId,
    ) -> Result<CloseStatus, SettlementError>;

    fn appeal(
        &mut self,
        ledger: &mut Ledger,
        authenticator: &dyn StateAuthenticator,
        signed: &SignedMessageState,
        appellant: NodeId,
    ) -> Result<(), SettlementError>;

    /// Settles a disputed close once its window has elapsed.
    fn finalize(
        &mut self,
        ledger: &mut Ledger,
        channel_id: ChannelId,
    ) -> Result<(u128, u128), SettlementError>;

    /// Hands over, and forgets, everything settled to `address` so far.
    fn withdraw(&mut self, address: NodeId) -> u128;

    /// The state the backend would settle right now, if a close is pending.
    fn disputed_state(&self, channel_id: ChannelId) -> Option<MessageState>;

    fn reset(&mut self);
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum OnChainStatus {
    Open,
    Disputed {
        state: MessageState,
        deadline: u64,
        initiator: NodeId,
    },
    Settled,
}

#[derive(Clone, Debug)]
struct OnChainChannel {
    data: ChannelData,
    status: OnChainStatus,
}

/// Settles directly against the in-process [`Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerSettlement {
    dispute_window: u64,
    next_channel_id: u64,
    channels: BTreeMap<ChannelId, OnChainChannel>,
    proceeds: BTreeMap<NodeId, u128>,
}

impl LedgerSettlement {
    pub fn new(dispute_window: u64) -> Self {
        Self {
            dispute_window,
            next_channel_id: 1,
            channels: BTreeMap::new(),
            proceeds: BTreeMap::new(),
        }
    }

    fn channel_mut(
        &mut self,
        channel_id: ChannelId,
    ) -> Result<&mut OnChainChannel, SettlementError> {
        self.channels
            .get_mut(&channel_id)
            .ok_or(SettlementError::UnknownChannel(channel_id))
    }

    fn check_signed(
        authenticator: &dyn StateAuthenticator,
        channel: &OnChainChannel,
        signed: &SignedMessageState,
    ) -> Result<(), SettlementError> {
        if !signed.verify(authenticator, &channel.data) {
            warn!(
                "Rejecting state {} of {}: invalid authorization",
                signed.state.serial, channel.data.channel_id
            );
            return Err(SettlementError::InvalidAuthorization {
                channel_id: channel.data.channel_id,
                serial: signed.state.serial,
            });
        }
        Ok(())
    }

    fn settle(
        &mut self,
        ledger: &mut Ledger,
        channel_id: ChannelId,
        state: MessageState,
    ) -> Result<(u128, u128), SettlementError> {
        let channel = self.channel_mut(channel_id)?;
        let data = channel.data;
        let (credit1, credit2) = ledger.settle_close(&state, &data)?;
        channel.status = OnChainStatus::Settled;
        *self.proceeds.entry(data.owner1).or_insert(0) += credit1;
        *self.proceeds.entry(data.owner2).or_insert(0) += credit2;
        info!("{} settled at serial {}", channel_id, state.serial);
        Ok((credit1, credit2))
    }
}

impl SettlementBackend for LedgerSettlement {
    fn open(
        &mut self,
        ledger: &mut Ledger,
        parties: (NodeId, NodeId),
        deposit: u128,
    ) -> Result<ChannelData, SettlementError> {
        let (owner1, owner2) = parties;
        ledger.apply_debit(owner1, deposit)?;
        let channel_id = ChannelId(self.next_channel_id);
        self.next_channel_id += 1;
        let data = ChannelData {
            channel_id,
            owner1,
            owner2,
            total_value: deposit,
        };
        self.channels.insert(
            channel_id,
            OnChainChannel {
                data,
                status: OnChainStatus::Open,
            },
        );
        debug!("Funded {} between {} and {} with {}", channel_id, owner1, owner2, deposit);
        Ok(data)
    }

    fn deposit(
        &mut self,
        ledger: &mut Ledger,
        channel_id: ChannelId,
        address: NodeId,
        amount: u128,
    ) -> Result<ChannelData, SettlementError> {
        let channel = self
            .channels
            .get(&channel_id)
            .ok_or(SettlementError::UnknownChannel(channel_id))?;
        if channel.data.owner2 != address {
            return Err(SettlementError::NotAnOwner {
                channel_id,
                address,
            });
        }
        if channel.status != OnChainStatus::Open {
            return Err(SettlementError::AlreadyClosing(channel_id));
        }
        ledger.apply_debit(address, amount)?;
        let channel = self.channel_mut(channel_id)?;
        channel.data.total_value += amount;
        Ok(channel.data)
    }

    fn close(
        &mut self,
        ledger: &mut Ledger,
        authenticator: &dyn StateAuthenticator,
        signed: &SignedMessageState,
    ) -> Result<CloseStatus, SettlementError> {
        let channel_id = signed.state.channel_id;
        let channel = self
            .channels
            .get(&channel_id)
            .ok_or(SettlementError::UnknownChannel(channel_id))?;
        if channel.status == OnChainStatus::Settled {
            return Err(SettlementError::AlreadySettled(channel_id));
        }
        Self::check_signed(authenticator, channel, signed)?;
        let (owner1_credit, owner2_credit) = self.settle(ledger, channel_id, signed.state)?;
        Ok(CloseStatus::Settled {
            owner1_credit,
            owner2_credit,
        })
    }

    fn force_close(
        &mut self,
        ledger: &mut Ledger,
        authenticator: &dyn StateAuthenticator,
        signed: &SignedMessageState,
        initiator: NodeId,
    ) -> Result<CloseStatus, SettlementError> {
        let channel_id = signed.state.channel_id;
        let channel = self
            .channels
            .get(&channel_id)
            .ok_or(SettlementError::UnknownChannel(channel_id))?;
        if !channel.data.is_owner(initiator) {
            return Err(SettlementError::NotAnOwner {
                channel_id,
                address: initiator,
            });
        }
        match channel.status {
            OnChainStatus::Open => {}
            OnChainStatus::Disputed { .. } => {
                return Err(SettlementError::AlreadyClosing(channel_id))
            }
            OnChainStatus::Settled => return Err(SettlementError::AlreadySettled(channel_id)),
        }
        Self::check_signed(authenticator, channel, signed)?;

        if self.dispute_window == 0 {
            let (owner1_credit, owner2_credit) = self.settle(ledger, channel_id, signed.state)?;
            return Ok(CloseStatus::Settled {
                owner1_credit,
                owner2_credit,
            });
        }
        let deadline = ledger.block_height() + self.dispute_window;
        self.channel_mut(channel_id)?.status = OnChainStatus::Disputed {
            state: signed.state,
            deadline,
            initiator,
        };
        info!(
            "{} force closed by {} at serial {}, disputable until block {}",
            channel_id, initiator, signed.state.serial, deadline
        );
        Ok(CloseStatus::Disputed { deadline })
    }

    fn appeal(
        &mut self,
        ledger: &mut Ledger,
        authenticator: &dyn StateAuthenticator,
        signed: &SignedMessageState,
        appellant: NodeId,
    ) -> Result<(), SettlementError> {
        let channel_id = signed.state.channel_id;
        let height = ledger.block_height();
        let channel = self.channel_mut(channel_id)?;
        if !channel.data.is_owner(appellant) {
            return Err(SettlementError::NotAnOwner {
                channel_id,
                address: appellant,
            });
        }
        let (current, deadline, initiator) = match &channel.status {
            OnChainStatus::Disputed {
                state,
                deadline,
                initiator,
            } => (*state, *deadline, *initiator),
            OnChainStatus::Open => return Err(SettlementError::NoDispute(channel_id)),
            OnChainStatus::Settled => return Err(SettlementError::AlreadySettled(channel_id)),
        };
        if height >= deadline {
            return Err(SettlementError::NoDispute(channel_id));
        }
        if signed.state.serial <= current.serial {
            return Err(SettlementError::StaleAppeal {
                channel_id,
                submitted: signed.state.serial,
                current: current.serial,
            });
        }
        Self::check_signed(authenticator, channel, signed)?;
        channel.status = OnChainStatus::Disputed {
            state: signed.state,
            deadline,
            initiator,
        };
        info!(
            "{} appealed by {}: serial {} replaces {}",
            channel_id, appellant, signed.state.serial, current.serial
        );
        Ok(())
    }

    fn finalize(
        &mut self,
        ledger: &mut Ledger,
        channel_id: ChannelId,
    ) -> Result<(u128, u128), SettlementError> {
        let channel = self.channel_mut(channel_id)?;
        let (state, deadline) = match &channel.status {
            OnChainStatus::Disputed {
                state, deadline, ..
            } => (*state, *deadline),
            OnChainStatus::Open => return Err(SettlementError::NoDispute(channel_id)),
            OnChainStatus::Settled => return Err(SettlementError::AlreadySettled(channel_id)),
        };
        if ledger.block_height() < deadline {
            return Err(SettlementError::DisputeWindowOpen {
                channel_id,
                deadline,
            });
        }
        self.settle(ledger, channel_id, state)
    }

    fn withdraw(&mut self, address: NodeId) -> u128 {
        self.proceeds.remove(&address).unwrap_or(0)
    }

    fn disputed_state(&self, channel_id: ChannelId) -> Option<MessageState> {
        match self.channels.get(&channel_id)?.status {
            OnChainStatus::Disputed { state, .. } => Some(state),
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.next_channel_id = 1;
        self.channels.clear();
        self.proceeds.clear();
    }
}
