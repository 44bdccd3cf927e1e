use super::contract::{ContractKind, SecretKind};
use super::fee::FeePolicy;
use super::hash_algorithm::HashAlgorithm;
use super::types::{ChannelId, ContractId, Hash256, NodeId, TransactionId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::Display;
use tracing::{debug, error, trace};

/// How a node behaves when it is the receiver of a payment whose contracts are in place.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverPolicy {
    /// Reveal the success secret at once.
    #[default]
    Claim,
    /// Reveal the success secret after the given number of blocks.
    ClaimAfter(u64),
    /// Reveal the cancellation secret at once.
    Cancel,
    CancelAfter(u64),
    /// Never reveal anything and let every contract run into its deadline.
    Hold,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum PaymentRole {
    Sender,
    Intermediary,
    Receiver,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum PaymentStatus {
    /// Contracts are being built along the route.
    Constructing,
    /// Every pass completed, the payment waits for a secret or for expiry.
    Armed,
    Succeeded,
    Cancelled,
    /// The contracts of this node ran into their deadlines.
    Expired,
    /// Construction was declined and unwound.
    Failed,
}

impl PaymentStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded
                | PaymentStatus::Cancelled
                | PaymentStatus::Expired
                | PaymentStatus::Failed
        )
    }
}

/// A contract of a transaction as one of its two parties sees it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    pub channel_id: ChannelId,
    pub contract_id: ContractId,
    pub kind: ContractKind,
    /// Whether the node owning this reference is the payer of the contract.
    pub is_payer: bool,
}

/// What a node remembers about one multi-hop payment it takes part in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub transaction_id: TransactionId,
    pub role: PaymentRole,
    pub status: PaymentStatus,
    pub hash_x: Hash256,
    pub hash_r: Hash256,
    pub hash_algorithm: HashAlgorithm,
    pub upstream: Option<NodeId>,
    pub downstream: Option<NodeId>,
    /// What this node receives from upstream, the payment amount for the sender.
    pub amount_in: u128,
    /// What this node forwards downstream, zero for the receiver.
    pub amount_out: u128,
    pub contracts: Vec<ContractRef>,
}

impl TransactionContext {
    pub fn commitment(&self, kind: SecretKind) -> Hash256 {
        match kind {
            SecretKind::Success => self.hash_x,
            SecretKind::Cancellation => self.hash_r,
        }
    }

    /// Which secret `secret` opens, if any.
    pub fn secret_kind_of(&self, secret: &Hash256) -> Option<SecretKind> {
        let commitment = self.hash_algorithm.commit(secret);
        if commitment == self.hash_x {
            Some(SecretKind::Success)
        } else if commitment == self.hash_r {
            Some(SecretKind::Cancellation)
        } else {
            None
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = NodeId> {
        self.upstream.into_iter().chain(self.downstream)
    }

    pub fn contract(&self, kind: ContractKind, is_payer: bool) -> Option<&ContractRef> {
        self.contracts
            .iter()
            .find(|c| c.kind == kind && c.is_payer == is_payer)
    }
}

/// A fresh secret pair and its commitments: `(x, r, hash_x, hash_r)`.
pub fn generate_secret_pair(
    hash_algorithm: HashAlgorithm,
) -> (Hash256, Hash256, Hash256, Hash256) {
    let mut rng = rand::thread_rng();
    loop {
        let mut x = [0u8; 32];
        let mut r = [0u8; 32];
        rng.fill_bytes(&mut x);
        rng.fill_bytes(&mut r);
        let (x, r) = (Hash256::from(x), Hash256::from(r));
        let (hash_x, hash_r) = (hash_algorithm.commit(&x), hash_algorithm.commit(&r));
        if hash_x != hash_r {
            return (x, r, hash_x, hash_r);
        }
    }
}

/// A protocol participant. Channels are referenced by id, the network owns them.
#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    channels: BTreeMap<NodeId, ChannelId>,
    secrets: HashMap<Hash256, Hash256>,
    locked_funds: u128,
    transactions: BTreeMap<TransactionId, TransactionContext>,
    fee_policy: FeePolicy,
    receiver_policy: ReceiverPolicy,
}

impl Node {
    pub fn new(id: NodeId, fee_policy: FeePolicy) -> Self {
        Self {
            id,
            channels: BTreeMap::new(),
            secrets: HashMap::new(),
            locked_funds: 0,
            transactions: BTreeMap::new(),
            fee_policy,
            receiver_policy: ReceiverPolicy::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn fee_policy(&self) -> FeePolicy {
        self.fee_policy
    }

    pub fn set_fee_policy(&mut self, fee_policy: FeePolicy) {
        self.fee_policy = fee_policy;
    }

    pub fn receiver_policy(&self) -> ReceiverPolicy {
        self.receiver_policy
    }

    pub fn set_receiver_policy(&mut self, policy: ReceiverPolicy) {
        self.receiver_policy = policy;
    }

    /// The channel shared with `peer`, the latest one if there were several.
    pub fn channel_with(&self, peer: NodeId) -> Option<ChannelId> {
        self.channels.get(&peer).copied()
    }

    pub fn channels(&self) -> impl Iterator<Item = (&NodeId, &ChannelId)> {
        self.channels.iter()
    }

    pub(crate) fn add_channel(&mut self, peer: NodeId, channel_id: ChannelId) {
        self.channels.insert(peer, channel_id);
    }

    /// Creates the two secrets of a payment this node receives and keeps them.
    pub(crate) fn generate_secrets(&mut self, hash_algorithm: HashAlgorithm) -> (Hash256, Hash256) {
        let (x, r, hash_x, hash_r) = generate_secret_pair(hash_algorithm);
        self.secrets.insert(hash_x, x);
        self.secrets.insert(hash_r, r);
        trace!("{} generated commitments {:?} and {:?}", self.id, hash_x, hash_r);
        (hash_x, hash_r)
    }

    /// Returns whether the secret was new to this node.
    pub(crate) fn learn_secret(&mut self, commitment: Hash256, secret: Hash256) -> bool {
        if self.secrets.contains_key(&commitment) {
            return false;
        }
        debug!("{} learned the secret of {:?}", self.id, commitment);
        self.secrets.insert(commitment, secret);
        true
    }

    pub fn knows(&self, commitment: &Hash256) -> bool {
        self.secrets.contains_key(commitment)
    }

    pub fn secret_for(&self, commitment: &Hash256) -> Option<Hash256> {
        self.secrets.get(commitment).copied()
    }

    pub fn locked_funds(&self) -> u128 {
        self.locked_funds
    }

    pub(crate) fn lock_funds(&mut self, amount: u128) {
        self.locked_funds += amount;
    }

    /// Releases `amount` of the locked funds. Returns false, releasing nothing, when
    /// less than `amount` is locked.
    pub(crate) fn unlock_funds(&mut self, amount: u128) -> bool {
        match self.locked_funds.checked_sub(amount) {
            Some(locked) => {
                self.locked_funds = locked;
                true
            }
            None => {
                error!(
                    "{} would unlock {} with only {} locked",
                    self.id, amount, self.locked_funds
                );
                false
            }
        }
    }

    pub fn transaction(&self, transaction_id: TransactionId) -> Option<&TransactionContext> {
        self.transactions.get(&transaction_id)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &TransactionContext> {
        self.transactions.values()
    }

    pub(crate) fn transaction_mut(
        &mut self,
        transaction_id: TransactionId,
    ) -> Option<&mut TransactionContext> {
        self.transactions.get_mut(&transaction_id)
    }

    pub(crate) fn insert_transaction(&mut self, context: TransactionContext) {
        self.transactions.insert(context.transaction_id, context);
    }

    /// Moves a transaction to `status` unless it already reached a final one.
    pub(crate) fn update_status(&mut self, transaction_id: TransactionId, status: PaymentStatus) {
        if let Some(context) = self.transactions.get_mut(&transaction_id) {
            if !context.status.is_final() && context.status != status {
                debug!(
                    "{} {} {} -> {}",
                    self.id, transaction_id, context.status, status
                );
                context.status = status;
            }
        }
    }
}
