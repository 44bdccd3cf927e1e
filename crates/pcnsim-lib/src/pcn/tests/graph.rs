use crate::pcn::{
    ChannelEdge, ChannelId, FeePolicy, NetworkGraph, NodeId, PathFindError, RouterHop,
};

fn edge(channel_id: u64, node1: u32, node2: u32, forward: u128, backward: u128) -> ChannelEdge {
    ChannelEdge {
        channel_id: ChannelId(channel_id),
        node1: NodeId(node1),
        node2: NodeId(node2),
        node1_transferable: forward,
        node2_transferable: backward,
    }
}

fn graph_with_nodes(fees: &[(u32, u128)]) -> NetworkGraph {
    let mut graph = NetworkGraph::new(1);
    for (node, base_fee) in fees {
        graph.add_node(NodeId(*node), FeePolicy::new(*base_fee, 0));
    }
    graph
}

fn hop(target: u32, channel_id: u64, amount_received: u128, penalty: u128) -> RouterHop {
    RouterHop {
        target: NodeId(target),
        channel_id: ChannelId(channel_id),
        amount_received,
        penalty,
    }
}

#[test]
fn test_find_path_line_with_fees() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1), (3, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 0));
    graph.add_channel(edge(2, 2, 3, 100, 0));
    let route = graph
        .find_path(NodeId(1), NodeId(3), 10, 0, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(2, 1, 11, 0), hop(3, 2, 10, 0)]);
}

#[test]
fn test_find_path_respects_direction() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1), (3, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 0));
    graph.add_channel(edge(2, 2, 3, 100, 0));
    assert_eq!(
        graph.find_path(NodeId(3), NodeId(1), 10, 0, 1),
        Err(PathFindError::PathFind("no path found".to_string()))
    );
}

#[test]
fn test_find_path_counts_fees_against_capacity() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1), (3, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 0));
    graph.add_channel(edge(2, 2, 3, 100, 0));
    assert!(graph.find_path(NodeId(1), NodeId(3), 99, 0, 1).is_ok());
    assert!(graph.find_path(NodeId(1), NodeId(3), 100, 0, 1).is_err());
}

#[test]
fn test_find_path_unreachable_target() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1), (3, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 100));
    assert!(matches!(
        graph.find_path(NodeId(1), NodeId(3), 10, 0, 1),
        Err(PathFindError::PathFind(_))
    ));
}

#[test]
fn test_find_path_picks_cheapest_route() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 5), (3, 1), (4, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 100));
    graph.add_channel(edge(2, 2, 4, 100, 100));
    graph.add_channel(edge(3, 1, 3, 100, 100));
    graph.add_channel(edge(4, 3, 4, 100, 100));
    let route = graph
        .find_path(NodeId(1), NodeId(4), 10, 0, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(3, 3, 11, 0), hop(4, 4, 10, 0)]);
}

#[test]
fn test_find_path_prefers_fewer_hops_on_tie() {
    let mut graph = graph_with_nodes(&[(1, 0), (2, 0), (3, 0)]);
    graph.add_channel(edge(1, 1, 2, 100, 100));
    graph.add_channel(edge(2, 2, 3, 100, 100));
    graph.add_channel(edge(3, 1, 3, 100, 100));
    let route = graph
        .find_path(NodeId(1), NodeId(3), 10, 0, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(3, 3, 10, 0)]);
}

#[test]
fn test_find_path_skips_depleted_channel() {
    let mut graph = graph_with_nodes(&[(1, 0), (2, 0), (3, 0)]);
    graph.add_channel(edge(1, 1, 2, 100, 100));
    graph.add_channel(edge(2, 2, 3, 100, 100));
    graph.add_channel(edge(3, 1, 3, 5, 100));
    let route = graph
        .find_path(NodeId(1), NodeId(3), 10, 0, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(2, 1, 10, 0), hop(3, 2, 10, 0)]);
}

#[test]
fn test_find_path_with_griefing_penalty() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1), (3, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 5));
    graph.add_channel(edge(2, 2, 3, 100, 5));
    let route = graph
        .find_path(NodeId(1), NodeId(3), 10, 100_000, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(2, 1, 11, 2), hop(3, 2, 10, 1)]);
}

#[test]
fn test_find_path_penalty_infeasible() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1), (3, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 5));
    graph.add_channel(edge(2, 2, 3, 100, 0));
    assert!(graph.find_path(NodeId(1), NodeId(3), 10, 0, 1).is_ok());
    assert_eq!(
        graph.find_path(NodeId(1), NodeId(3), 10, 100_000, 1),
        Err(PathFindError::PathFind("no path found".to_string()))
    );
}

#[test]
fn test_find_path_rejects_bad_requests() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 0));
    assert!(matches!(
        graph.find_path(NodeId(1), NodeId(2), 0, 0, 1),
        Err(PathFindError::Amount(_))
    ));
    assert!(matches!(
        graph.find_path(NodeId(1), NodeId(1), 10, 0, 1),
        Err(PathFindError::PathFind(_))
    ));
    assert_eq!(
        graph.find_path(NodeId(1), NodeId(9), 10, 0, 1),
        Err(PathFindError::UnknownNode(NodeId(9)))
    );
    assert_eq!(graph.nodes().count(), 2);
    assert_eq!(graph.channels().count(), 1);
}

#[test]
fn test_find_path_locks_amount_once_per_pass() {
    let mut graph = graph_with_nodes(&[(1, 1), (2, 1), (3, 1)]);
    graph.add_channel(edge(1, 1, 2, 21, 0));
    graph.add_channel(edge(2, 2, 3, 100, 0));
    assert!(graph.find_path(NodeId(1), NodeId(3), 10, 0, 1).is_ok());
    assert_eq!(
        graph.find_path(NodeId(1), NodeId(3), 10, 0, 2),
        Err(PathFindError::PathFind("no path found".to_string()))
    );
    assert!(matches!(
        graph.find_path(NodeId(1), NodeId(3), 10, 0, 0),
        Err(PathFindError::PathFind(_))
    ));
}

#[test]
fn test_find_path_picks_wider_route_for_two_passes() {
    // 1 -> 2 -> 4 is cheaper but only carries a single lock of 11
    let mut graph = graph_with_nodes(&[(1, 0), (2, 1), (3, 5), (4, 0)]);
    graph.add_channel(edge(1, 1, 2, 15, 0));
    graph.add_channel(edge(2, 2, 4, 15, 0));
    graph.add_channel(edge(3, 1, 3, 100, 0));
    graph.add_channel(edge(4, 3, 4, 100, 0));
    let route = graph
        .find_path(NodeId(1), NodeId(4), 10, 0, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(2, 1, 11, 0), hop(4, 2, 10, 0)]);
    let route = graph
        .find_path(NodeId(1), NodeId(4), 10, 0, 2)
        .expect("path found");
    assert_eq!(route, vec![hop(3, 3, 15, 0), hop(4, 4, 10, 0)]);
}

#[test]
fn test_find_path_checks_cumulative_penalty_exposure() {
    // Via 2 each hop's own penalty fits, but 2 cannot cover the 3 + 2 + 1 of all
    // hops it could stall, so the costlier route via 5 is taken.
    let mut graph = graph_with_nodes(&[(1, 0), (2, 0), (3, 0), (4, 0), (5, 1)]);
    graph.add_channel(edge(1, 1, 2, 100, 4));
    graph.add_channel(edge(2, 2, 3, 100, 100));
    graph.add_channel(edge(3, 3, 4, 100, 100));
    graph.add_channel(edge(4, 1, 5, 100, 100));
    graph.add_channel(edge(5, 5, 3, 100, 100));
    let route = graph
        .find_path(NodeId(1), NodeId(4), 10, 100_000, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(5, 4, 11, 3), hop(3, 5, 10, 2), hop(4, 3, 10, 1)]);

    // with room for the whole exposure the free route via 2 wins
    graph.add_channel(edge(1, 1, 2, 100, 6));
    let route = graph
        .find_path(NodeId(1), NodeId(4), 10, 100_000, 1)
        .expect("path found");
    assert_eq!(route, vec![hop(2, 1, 10, 3), hop(3, 2, 10, 2), hop(4, 3, 10, 1)]);
}
