use crate::pcn::{
    ChannelData, ChannelId, Hash256, HashAlgorithm, HashAuthenticator, MessageState, NodeId,
    SignedMessageState, StateAuthenticator,
};
use std::str::FromStr;

fn channel_data() -> ChannelData {
    ChannelData {
        channel_id: ChannelId(1),
        owner1: NodeId(1),
        owner2: NodeId(2),
        total_value: 100,
    }
}

#[test]
fn test_hash256_from_str() {
    let hex = "0x0101010101010101010101010101010101010101010101010101010101010101";
    let hash = Hash256::from_str(hex).expect("valid hash");
    assert_eq!(hash, Hash256::from([1u8; 32]));
    assert_eq!(format!("{:#x}", hash), hex);
    assert!(Hash256::from_str("0x0102").is_err());
    assert!(Hash256::from_str("not hex").is_err());
}

#[test]
fn test_hash256_serde_as_hex() {
    let hash = Hash256::from([0xab; 32]);
    let json = serde_json::to_string(&hash).expect("hash to json");
    assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
    let back: Hash256 = serde_json::from_str(&json).expect("hash from json");
    assert_eq!(back, hash);
}

#[test]
fn test_message_state_next() {
    let state = MessageState::new(ChannelId(3), 40, 2);
    let next = state.next(25);
    assert_eq!(next.serial, 3);
    assert_eq!(next.owner1_balance, 25);
    assert_eq!(next.channel_id, ChannelId(3));
}

#[test]
fn test_channel_data_peer_of() {
    let data = channel_data();
    assert_eq!(data.peer_of(NodeId(1)), Some(NodeId(2)));
    assert_eq!(data.peer_of(NodeId(2)), Some(NodeId(1)));
    assert_eq!(data.peer_of(NodeId(3)), None);
    assert!(!data.is_owner(NodeId(3)));
}

#[test]
fn test_signed_state_verifies() {
    let authenticator = HashAuthenticator::default();
    let data = channel_data();
    let signed =
        SignedMessageState::sign(&authenticator, &data, MessageState::new(ChannelId(1), 60, 0));
    assert!(signed.verify(&authenticator, &data));
    assert_ne!(signed.owner1_token, signed.owner2_token);
}

#[test]
fn test_tampered_state_is_rejected() {
    let authenticator = HashAuthenticator::default();
    let data = channel_data();
    let mut signed =
        SignedMessageState::sign(&authenticator, &data, MessageState::new(ChannelId(1), 60, 0));
    signed.state.owner1_balance = 90;
    assert!(!signed.verify(&authenticator, &data));

    let other = ChannelData {
        channel_id: ChannelId(2),
        ..data
    };
    let signed =
        SignedMessageState::sign(&authenticator, &data, MessageState::new(ChannelId(1), 60, 0));
    assert!(!signed.verify(&authenticator, &other));
}

#[test]
fn test_token_bound_to_signer() {
    let authenticator = HashAuthenticator::new(HashAlgorithm::Sha256);
    let state = MessageState::new(ChannelId(1), 60, 0);
    let token = authenticator.sign(NodeId(1), &state);
    assert!(authenticator.verify(&token, &state, NodeId(1)));
    assert!(!authenticator.verify(&token, &state, NodeId(2)));
    assert!(!HashAuthenticator::default().verify(&token, &state, NodeId(1)));
}
