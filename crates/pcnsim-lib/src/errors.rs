use thiserror::Error;

use crate::pcn::{
    ChannelError, ChannelId, ContractError, LedgerError, NodeId, PathFindError, PaymentError,
    SettlementError,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("Node not found error: {0}")]
    NodeNotFound(NodeId),
    #[error("Channel not found error: {0}")]
    ChannelNotFound(ChannelId),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),
    #[error("Failed to process channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("Network Graph error: {0}")]
    NetworkGraph(#[from] PathFindError),
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
    #[error("InvalidParameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Errors that reveal a broken invariant rather than a rejected request.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Ledger(e) => e.is_fatal(),
            Error::Settlement(SettlementError::Ledger(e)) => e.is_fatal(),
            Error::Channel(e) => e.is_fatal(),
            Error::Payment(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
