use super::hash_algorithm::HashAlgorithm;
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::fmt;

/// A 256-bit digest, used for secrets, their commitments and authorization tokens.
#[serde_as]
#[derive(Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Hash256(#[serde_as(as = "Hex")] [u8; 32]);

impl From<[u8; 32]> for Hash256 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl From<Hash256> for [u8; 32] {
    fn from(val: Hash256) -> Self {
        val.0
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Hash256 {
    type Error = anyhow::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 32 {
            return Err(anyhow::anyhow!("Invalid hash length"));
        }
        let mut data = [0u8; 32];
        data.copy_from_slice(value);
        Ok(Hash256(data))
    }
}

impl fmt::LowerHex for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash256({:#x})", self)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash256(0x{})", hex::encode(self.0))
    }
}

impl std::str::FromStr for Hash256 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s)?;
        Hash256::try_from(bytes.as_slice())
    }
}

/// The address of a simulated participant.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// The address of a channel, allocated by the settlement backend when it is opened.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ContractId(pub u64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contract-{}", self.0)
    }
}

/// Identifies one multi-hop payment attempt across all the nodes it touches.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// One version of the balance split of a channel. A state is never mutated once
/// issued, a newer state with a higher serial supersedes it.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct MessageState {
    pub owner1_balance: u128,
    pub serial: u64,
    pub channel_id: ChannelId,
}

impl MessageState {
    pub fn new(channel_id: ChannelId, owner1_balance: u128, serial: u64) -> Self {
        Self {
            owner1_balance,
            serial,
            channel_id,
        }
    }

    /// The state that follows this one with a new owner1 balance.
    pub fn next(&self, owner1_balance: u128) -> Self {
        Self {
            owner1_balance,
            serial: self.serial + 1,
            channel_id: self.channel_id,
        }
    }

    fn content_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + 8 + 8);
        bytes.extend_from_slice(&self.owner1_balance.to_le_bytes());
        bytes.extend_from_slice(&self.serial.to_le_bytes());
        bytes.extend_from_slice(&self.channel_id.0.to_le_bytes());
        bytes
    }
}

/// The immutable part of a channel: its address, its two owners and the value
/// deposited into it. `total_value` only grows, through a deposit by owner2.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChannelData {
    pub channel_id: ChannelId,
    pub owner1: NodeId,
    pub owner2: NodeId,
    pub total_value: u128,
}

impl ChannelData {
    pub fn is_owner(&self, node: NodeId) -> bool {
        node == self.owner1 || node == self.owner2
    }

    pub fn peer_of(&self, node: NodeId) -> Option<NodeId> {
        if node == self.owner1 {
            Some(self.owner2)
        } else if node == self.owner2 {
            Some(self.owner1)
        } else {
            None
        }
    }
}

/// An opaque authorization over a [`MessageState`], standing in for a signature.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct AuthToken(pub Hash256);

/// A channel state together with the authorization of both owners.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct SignedMessageState {
    pub state: MessageState,
    pub owner1_token: AuthToken,
    pub owner2_token: AuthToken,
}

impl SignedMessageState {
    /// Both owners of `data` authorize `state`.
    pub fn sign(
        authenticator: &dyn StateAuthenticator,
        data: &ChannelData,
        state: MessageState,
    ) -> Self {
        Self {
            state,
            owner1_token: authenticator.sign(data.owner1, &state),
            owner2_token: authenticator.sign(data.owner2, &state),
        }
    }

    pub fn verify(&self, authenticator: &dyn StateAuthenticator, data: &ChannelData) -> bool {
        self.state.channel_id == data.channel_id
            && authenticator.verify(&self.owner1_token, &self.state, data.owner1)
            && authenticator.verify(&self.owner2_token, &self.state, data.owner2)
    }
}

/// Produces and checks authorization tokens bound to the content of a state.
pub trait StateAuthenticator {
    fn sign(&self, signer: NodeId, state: &MessageState) -> AuthToken;

    fn verify(&self, token: &AuthToken, state: &MessageState, claimed_signer: NodeId) -> bool {
        self.sign(claimed_signer, state) == *token
    }
}

/// Tokens are the hash of the signer address and the state content.
#[derive(Copy, Clone, Debug, Default)]
pub struct HashAuthenticator {
    pub hash_algorithm: HashAlgorithm,
}

impl HashAuthenticator {
    pub fn new(hash_algorithm: HashAlgorithm) -> Self {
        Self { hash_algorithm }
    }
}

impl StateAuthenticator for HashAuthenticator {
    fn sign(&self, signer: NodeId, state: &MessageState) -> AuthToken {
        let mut preimage = b"pcnsim-state".to_vec();
        preimage.extend_from_slice(&signer.0.to_le_bytes());
        preimage.extend_from_slice(&state.content_bytes());
        AuthToken(self.hash_algorithm.hash(preimage).into())
    }
}
