use crate::pcn::{ChannelData, ChannelId, Ledger, LedgerError, MessageState, NodeId};
use crate::tests::gen_rand_hash;

const A: NodeId = NodeId(1);
const B: NodeId = NodeId(2);

fn channel_data(total_value: u128) -> ChannelData {
    ChannelData {
        channel_id: ChannelId(7),
        owner1: A,
        owner2: B,
        total_value,
    }
}

#[test]
fn test_register_balance_is_idempotent() {
    let mut ledger = Ledger::new(100_000);
    ledger.register_balance(A, 100);
    ledger.register_balance(A, 5);
    assert_eq!(ledger.balance_of(A), Some(100));
    assert_eq!(ledger.balance_of(B), None);
}

#[test]
fn test_apply_debit_charges_fee() {
    let mut ledger = Ledger::new(100_000);
    ledger.register_balance(A, 110);
    assert_eq!(ledger.apply_debit(A, 100), Ok(110));
    assert_eq!(ledger.balance_of(A), Some(0));

    assert_eq!(
        ledger.apply_debit(A, 1),
        Err(LedgerError::InsufficientFunds {
            address: A,
            required: 2,
            available: 0
        })
    );
    assert_eq!(ledger.apply_debit(B, 1), Err(LedgerError::UnknownAddress(B)));
}

#[test]
fn test_apply_debit_insufficient_leaves_balance() {
    let mut ledger = Ledger::new(100_000);
    ledger.register_balance(A, 100);
    assert!(matches!(
        ledger.apply_debit(A, 100),
        Err(LedgerError::InsufficientFunds { required: 110, .. })
    ));
    assert_eq!(ledger.balance_of(A), Some(100));
}

#[test]
fn test_settle_close_credits_both_owners() {
    let mut ledger = Ledger::new(100_000);
    let data = channel_data(100);
    let state = MessageState::new(data.channel_id, 70, 3);
    assert_eq!(ledger.settle_close(&state, &data), Ok((63, 27)));
    assert_eq!(ledger.balance_of(A), Some(63));
    assert_eq!(ledger.balance_of(B), Some(27));
}

#[test]
fn test_settle_close_rejects_invalid_state() {
    let mut ledger = Ledger::new(100_000);
    let data = channel_data(100);

    let foreign = MessageState::new(ChannelId(8), 50, 1);
    assert!(matches!(
        ledger.settle_close(&foreign, &data),
        Err(LedgerError::InvalidSettlement(_))
    ));
    let too_large = MessageState::new(data.channel_id, 101, 1);
    assert!(matches!(
        ledger.settle_close(&too_large, &data),
        Err(LedgerError::InvalidSettlement(_))
    ));
    assert_eq!(ledger.balance_of(A), None);
    assert_eq!(ledger.balance_of(B), None);
}

#[test]
fn test_reveal_conflict_is_fatal() {
    let mut ledger = Ledger::new(0);
    let commitment = gen_rand_hash();
    let secret = gen_rand_hash();
    assert_eq!(ledger.reveal(commitment, secret), Ok(()));
    assert_eq!(ledger.reveal(commitment, secret), Ok(()));

    let err = ledger
        .reveal(commitment, gen_rand_hash())
        .expect_err("conflicting secret");
    assert_eq!(err, LedgerError::CommitmentConflict(commitment));
    assert!(err.is_fatal());
    assert_eq!(ledger.revealed_secret(&commitment), Some(secret));
}

#[test]
fn test_advance_and_reset() {
    let mut ledger = Ledger::new(0);
    ledger.register_balance(A, 10);
    assert_eq!(ledger.advance(3), 3);
    assert_eq!(ledger.advance(2), 5);
    ledger.reset();
    assert_eq!(ledger.block_height(), 0);
    assert_eq!(ledger.balance_of(A), None);
}
