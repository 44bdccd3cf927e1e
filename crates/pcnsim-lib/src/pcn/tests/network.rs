use crate::pcn::{
    ChannelId, ChannelSide, CloseStatus, FeePolicy, NodeId, PaymentError, PaymentMode,
    PaymentRequest, PaymentStatus, ReceiverPolicy,
};
use crate::tests::{init_tracing, test_config, LineNetwork};
use crate::{Error, Network, SimulationConfig};

#[test]
fn test_add_node_registers_ledger_balance() {
    init_tracing();
    let mut network = Network::new(test_config());
    let a = network.add_node();
    let b = network.add_node_with_balance(5);
    assert_eq!((a, b), (NodeId(0), NodeId(1)));
    assert_eq!(network.ledger().balance_of(a), Some(1_000));
    assert_eq!(network.ledger().balance_of(b), Some(5));
    assert_eq!(network.nodes().count(), 2);
    assert_eq!(
        network.node(a).map(|n| n.fee_policy()),
        Some(FeePolicy::new(1, 0))
    );
}

#[test]
fn test_open_channel_errors() {
    init_tracing();
    let mut network = Network::new(test_config());
    let a = network.add_node();
    let poor = network.add_node_with_balance(10);
    assert!(matches!(
        network.open_channel(a, NodeId(7), 10),
        Err(Error::NodeNotFound(NodeId(7)))
    ));
    assert!(matches!(
        network.open_channel(poor, a, 10),
        Err(Error::Channel(_))
    ));
    assert!(network.channels().next().is_none());
    assert_eq!(network.ledger().balance_of(poor), Some(10));
}

#[test]
fn test_open_and_close_round_trip() {
    let mut line = LineNetwork::new(2, 100);
    let (a, b) = (line.nodes[0], line.nodes[1]);
    assert_eq!(line.network.ledger().balance_of(a), Some(890));
    assert_eq!(line.channels[0], ChannelId(1));
    assert_eq!(
        line.network.channel_between(b, a).map(|c| c.id()),
        Some(ChannelId(1))
    );

    line.network.close_channel(line.channels[0]).expect("close");
    assert_eq!(line.network.ledger().balance_of(a), Some(980));
    assert_eq!(line.network.ledger().balance_of(b), Some(1_000));
    assert!(!line.network.channel(line.channels[0]).expect("channel").is_open());

    line.network.close_channel(line.channels[0]).expect("close again");
    assert_eq!(line.network.ledger().balance_of(a), Some(980));
    assert!(line.network.graph().channels().next().is_none());
}

#[test]
fn test_close_after_payment() {
    let mut line = LineNetwork::new(2, 100);
    let (a, b) = (line.nodes[0], line.nodes[1]);
    line.network
        .send_payment(PaymentRequest::new(a, b, 30))
        .expect("payment");
    line.network.close_channel(line.channels[0]).expect("close");
    assert_eq!(line.network.ledger().balance_of(a), Some(890 + 63));
    assert_eq!(line.network.ledger().balance_of(b), Some(1_000 + 27));
    assert_eq!(line.network.withdraw(b), 27);
}

#[test]
fn test_close_with_pending_contracts() {
    let mut line = LineNetwork::new(3, 100);
    let (a, b, c) = (line.nodes[0], line.nodes[1], line.nodes[2]);
    line.network
        .set_receiver_policy(c, ReceiverPolicy::Hold)
        .expect("set policy");
    let tx = line
        .network
        .send_payment(PaymentRequest::new(a, c, 10).with_mode(PaymentMode::ForwardOnly))
        .expect("payment");

    line.network.close_channel(line.channels[1]).expect("close");
    assert_eq!(line.network.ledger().balance_of(b), Some(890 + 90));
    assert_eq!(line.network.ledger().balance_of(c), Some(1_000));
    assert_eq!(line.network.payment_status(c, tx), Some(PaymentStatus::Expired));
    assert_eq!(line.network.payment_status(b, tx), Some(PaymentStatus::Armed));
    assert_eq!(line.network.node(b).map(|n| n.locked_funds()), Some(0));

    line.network.advance(11).expect("advance");
    assert_eq!(line.balance(0, a), 100);
    assert_eq!(line.network.payment_status(a, tx), Some(PaymentStatus::Expired));
    assert_eq!(line.network.payment_status(b, tx), Some(PaymentStatus::Expired));
}

#[test]
fn test_force_close_with_stale_state_is_appealed() {
    let mut line = LineNetwork::new(2, 100);
    let (a, b) = (line.nodes[0], line.nodes[1]);
    let channel_id = line.channels[0];
    line.network
        .send_payment(PaymentRequest::new(a, b, 30).with_mode(PaymentMode::ForwardOnly))
        .expect("payment");
    let channel = line.network.channel(channel_id).expect("channel");
    assert_eq!(channel.message().serial, 1);
    assert_eq!(channel.balance(ChannelSide::Owner1), 70);

    let status = line
        .network
        .force_close(channel_id, a, 0)
        .expect("force close");
    assert_eq!(status, CloseStatus::Disputed { deadline: 6 });
    assert!(!line.network.channel(channel_id).expect("channel").is_open());
    assert_eq!(line.network.ledger().balance_of(a), Some(890));

    line.network.advance(5).expect("advance");
    assert_eq!(line.network.ledger().balance_of(a), Some(890));
    line.network.advance(1).expect("advance");
    assert_eq!(line.network.ledger().balance_of(a), Some(890 + 63));
    assert_eq!(line.network.ledger().balance_of(b), Some(1_000 + 27));
    assert_eq!(line.network.withdraw(b), 27);
    assert_eq!(line.network.withdraw(b), 0);
}

#[test]
fn test_force_close_latest_state() {
    let config = SimulationConfig {
        dispute_window: 0,
        ..test_config()
    };
    let mut line = LineNetwork::with_config(2, 100, config);
    let (a, b) = (line.nodes[0], line.nodes[1]);
    let channel_id = line.channels[0];
    let status = line
        .network
        .force_close(channel_id, b, 0)
        .expect("force close");
    assert_eq!(
        status,
        CloseStatus::Settled {
            owner1_credit: 90,
            owner2_credit: 0
        }
    );
    assert_eq!(line.network.ledger().balance_of(a), Some(980));
    assert!(line.network.timer().is_empty());
}

#[test]
fn test_force_close_by_stranger() {
    let mut line = LineNetwork::new(3, 100);
    let c = line.nodes[2];
    assert!(matches!(
        line.network.force_close(line.channels[0], c, 0),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        line.network.force_close(ChannelId(99), c, 0),
        Err(Error::ChannelNotFound(ChannelId(99)))
    ));
}

#[test]
fn test_deposit_by_owner2() {
    let mut line = LineNetwork::new(2, 100);
    let (a, b) = (line.nodes[0], line.nodes[1]);
    line.network
        .deposit(line.channels[0], b, 50)
        .expect("deposit");
    assert_eq!(line.network.ledger().balance_of(b), Some(945));
    assert_eq!(line.balance(0, b), 50);
    assert_eq!(line.balance(0, a), 100);
    assert!(line.network.deposit(line.channels[0], a, 50).is_err());

    line.network
        .send_payment(PaymentRequest::new(b, a, 20))
        .expect("payment back");
    assert_eq!(line.balance(0, a), 120);
}

#[test]
fn test_graph_reflects_locked_funds() {
    let mut line = LineNetwork::new(3, 100);
    let (a, c) = (line.nodes[0], line.nodes[2]);
    line.network
        .set_receiver_policy(c, ReceiverPolicy::Hold)
        .expect("set policy");
    line.network
        .send_payment(PaymentRequest::new(a, c, 10).with_mode(PaymentMode::ForwardOnly))
        .expect("payment");
    let graph = line.network.graph();
    let edge = graph
        .channels()
        .find(|e| e.channel_id == line.channels[0])
        .expect("edge");
    assert_eq!(edge.node1_transferable, 89);
    assert_eq!(edge.node2_transferable, 0);
    assert_eq!(graph.nodes().count(), 3);
}

#[test]
fn test_reset() {
    let mut line = LineNetwork::new(3, 100);
    let (a, c) = (line.nodes[0], line.nodes[2]);
    line.network
        .send_payment(PaymentRequest::new(a, c, 10))
        .expect("payment");
    line.network.advance(3).expect("advance");
    line.network.reset();

    assert_eq!(line.network.block_height(), 0);
    assert!(line.network.nodes().next().is_none());
    assert!(line.network.channels().next().is_none());
    assert!(line.network.timer().is_empty());
    assert_eq!(line.network.add_node(), NodeId(0));
    let b = line.network.add_node();
    assert_eq!(
        line.network.open_channel(NodeId(0), b, 10).ok(),
        Some(ChannelId(1))
    );
}

#[test]
fn test_lock_drift_halts_network() {
    let mut line = LineNetwork::new(3, 100);
    let (a, c) = (line.nodes[0], line.nodes[2]);
    line.network
        .send_payment(PaymentRequest::new(a, c, 10).with_mode(PaymentMode::ForwardOnly))
        .expect("payment");
    assert!(line.network.halted().is_none());

    // booking the release of a settled contract a second time
    let settled = line
        .network
        .channel(line.channels[0])
        .expect("channel")
        .history()[0]
        .clone();
    line.network.on_contract_resolved(&settled);
    assert!(line.network.halted().is_some());
    assert_eq!(line.network.node(a).map(|n| n.locked_funds()), Some(0));
    assert!(matches!(
        line.network.send_payment(PaymentRequest::new(a, c, 10)),
        Err(PaymentError::Halted(_))
    ));
}
