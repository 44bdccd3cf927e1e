pub mod channel;
pub mod contract;
pub mod graph;
pub mod hash_algorithm;
pub mod ledger;
pub mod network;
pub mod node;
pub mod payment;
pub mod settlement;
pub mod timer;
pub mod types;

mod fee;
mod path;

pub use channel::{Channel, ChannelError, ChannelSide};
pub use contract::{
    Contract, ContractError, ContractKind, ContractOutcome, ContractParams, Payout, SecretKind,
};
pub use fee::{FeePolicy, MILLIONTHS};
pub use graph::{ChannelEdge, NetworkGraph, PathFindError, RouterHop};
pub use hash_algorithm::HashAlgorithm;
pub use ledger::{Ledger, LedgerError};
pub use network::Network;
pub use node::{
    generate_secret_pair, ContractRef, Node, PaymentRole, PaymentStatus, ReceiverPolicy,
    TransactionContext,
};
pub use payment::{PaymentError, PaymentMode, PaymentRequest};
pub use settlement::{CloseStatus, LedgerSettlement, SettlementBackend, SettlementError};
pub use timer::{Timer, TimerEntry, TimerEvent};
pub use types::{
    AuthToken, ChannelData, ChannelId, ContractId, Hash256, HashAuthenticator, MessageState,
    NodeId, SignedMessageState, StateAuthenticator, TransactionId,
};

#[cfg(test)]
mod tests;
