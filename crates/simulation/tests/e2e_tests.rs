//! End-to-end integration tests for deterministic simulation.
//!
//! These tests verify the complete flow from client request to execution
//! across a simulated swarm. Everything runs synchronously against
//! simulated time: `run_until()` advances the clock, and the same seed
//! always produces the same run.

use quorumkv_messages::MembershipMessage;
use quorumkv_pbft::PbftConfig;
use quorumkv_simulation::{NetworkConfig, NodeIndex, SimulationRunner};
use quorumkv_types::{DatabaseHeader, DatabaseMsg, DatabaseOperation, ErrorToken, ResponsePayload};
use std::time::Duration;
use tracing_test::traced_test;

fn quiet_network() -> NetworkConfig {
    NetworkConfig {
        latency: Duration::from_millis(10),
        jitter_fraction: 0.1,
        packet_loss_rate: 0.0,
    }
}

fn runner(num_nodes: u32, seed: u64) -> SimulationRunner {
    let mut runner =
        SimulationRunner::new(num_nodes, quiet_network(), PbftConfig::default(), seed);
    runner.start();
    runner
}

fn create_db(nonce: u64) -> DatabaseMsg {
    DatabaseMsg {
        header: DatabaseHeader { db_uuid: "db".into(), nonce },
        operation: DatabaseOperation::CreateDb,
    }
}

fn create(nonce: u64, key: &str, value: &[u8]) -> DatabaseMsg {
    DatabaseMsg {
        header: DatabaseHeader { db_uuid: "db".into(), nonce },
        operation: DatabaseOperation::Create { key: key.into(), value: value.to_vec() },
    }
}

fn read(nonce: u64, key: &str) -> DatabaseMsg {
    DatabaseMsg {
        header: DatabaseHeader { db_uuid: "db".into(), nonce },
        operation: DatabaseOperation::Read { key: key.into() },
    }
}

/// Submit a batch of requests to the primary and run until delivered.
fn order_batch(runner: &mut SimulationRunner, start_nonce: u64, count: u64) {
    let primary = runner.primary_index(0);
    for i in 0..count {
        let nonce = start_nonce + i;
        runner.submit_request(primary, "client", &create(nonce, &format!("key{nonce}"), b"v"));
    }
    let end = runner.now() + Duration::from_secs(30);
    runner.run_until(end);
}

#[traced_test]
#[test]
fn single_request_executes_on_every_replica() {
    let mut runner = runner(4, 42);

    let primary = runner.primary_index(0);
    let session = runner.submit_request(primary, "client", &create_db(1));
    runner.run_until(Duration::from_secs(10));

    for node in 0..4u32 {
        assert_eq!(runner.service(node).executed_up_to(), 1, "node {node} executed the request");
        assert!(runner.service(node).storage().has_db("db"));
    }

    // The client got its admission ack.
    let acked = runner
        .responses()
        .iter()
        .any(|(s, response)| *s == session && response.result == Ok(ResponsePayload::Ack));
    assert!(acked);
}

#[test]
fn forwarded_requests_reach_the_primary() {
    let mut runner = runner(4, 43);

    // Submit to a non-primary replica.
    let primary = runner.primary_index(0);
    let backup = (0..4u32).find(|&i| i != primary).unwrap();
    runner.submit_request(backup, "client", &create_db(1));
    runner.run_until(Duration::from_secs(10));

    for node in 0..4u32 {
        assert_eq!(runner.service(node).executed_up_to(), 1);
    }
}

#[test]
fn replicas_converge_on_identical_state() {
    let mut runner = runner(4, 44);

    let primary = runner.primary_index(0);
    runner.submit_request(primary, "client", &create_db(0));
    runner.run_until(Duration::from_secs(5));
    order_batch(&mut runner, 1, 30);

    let reference = runner.service(0).storage().serialize();
    for node in 1..4u32 {
        assert_eq!(
            runner.service(node).storage().serialize(),
            reference,
            "node {node} diverged"
        );
    }
    assert_eq!(runner.service(0).executed_up_to(), 31);
}

#[test]
fn execution_results_are_returned_to_the_submitting_client() {
    let mut runner = runner(4, 45);
    let primary = runner.primary_index(0);

    runner.submit_request(primary, "client", &create_db(1));
    runner.submit_request(primary, "client", &create(2, "greeting", b"hello"));
    runner.run_until(Duration::from_secs(5));
    let session = runner.submit_request(primary, "client", &read(3, "greeting"));
    runner.run_until(Duration::from_secs(10));

    let value = runner.responses().iter().find_map(|(s, response)| {
        match (&response.result, *s == session) {
            (Ok(ResponsePayload::Value(value)), true) => Some(value.clone()),
            _ => None,
        }
    });
    assert_eq!(value, Some(b"hello".to_vec()));
}

#[test]
fn client_errors_surface_tokens() {
    let mut runner = runner(4, 46);
    let primary = runner.primary_index(0);

    // Read from a database that does not exist.
    let session = runner.submit_request(primary, "client", &read(1, "nothing"));
    runner.run_until(Duration::from_secs(10));

    let error = runner
        .responses()
        .iter()
        .find_map(|(s, response)| (*s == session).then(|| response.result.clone()).and_then(Result::err));
    assert_eq!(error, Some(ErrorToken::DatabaseNotFound));
}

#[test]
fn checkpoint_stabilizes_across_the_swarm() {
    let mut runner = runner(4, 47);

    let primary = runner.primary_index(0);
    runner.submit_request(primary, "client", &create_db(0));
    runner.run_until(Duration::from_secs(5));
    // 99 more committed operations reach the interval of 100.
    order_batch(&mut runner, 1, 99);

    for node in 0..4u32 {
        let replica = runner.node(node).replica();
        assert_eq!(runner.service(node).executed_up_to(), 100);
        assert_eq!(
            replica.latest_stable_checkpoint().sequence,
            100,
            "node {node} stabilized the checkpoint"
        );
        assert_eq!(replica.low_water_mark(), 100);
        assert_eq!(replica.high_water_mark(), 300);
        assert_eq!(replica.outstanding_operations_count(), 0);
    }
}

#[test]
fn lagging_replica_catches_up_via_state_transfer() {
    let mut runner = runner(4, 48);
    let primary = runner.primary_index(0);
    let laggard: NodeIndex = (0..4u32).find(|&i| i != primary).unwrap();

    // Cut the laggard off and order a full checkpoint interval without it.
    runner.network_mut().isolate_node(laggard, 0..4u32);
    runner.submit_request(primary, "client", &create_db(0));
    runner.run_until(Duration::from_secs(5));
    order_batch(&mut runner, 1, 99);
    assert_eq!(runner.service(laggard).executed_up_to(), 0);

    // Heal and order into the next interval; the laggard sees the quorum
    // of CHECKPOINT(200) proofs it never reached and fetches the state.
    runner.network_mut().heal_all();
    order_batch(&mut runner, 100, 100);
    let end = runner.now() + Duration::from_secs(60);
    runner.run_until(end);

    let replica = runner.node(laggard).replica();
    assert_eq!(replica.latest_stable_checkpoint().sequence, 200);
    assert!(runner.service(laggard).executed_up_to() >= 200);
    assert_eq!(
        runner.service(laggard).storage().serialize(),
        runner.service(primary).storage().serialize(),
        "laggard state matches after transfer"
    );
}

#[test]
fn primary_failure_triggers_a_view_change() {
    let mut runner = runner(4, 49);

    let old_primary = runner.primary_index(0);
    runner.network_mut().isolate_node(old_primary, 0..4u32);

    // The external failure detector fires on the live replicas.
    for node in 0..4u32 {
        if node != old_primary {
            runner.suspect_primary(node);
        }
    }
    runner.run_until(Duration::from_secs(10));

    for node in 0..4u32 {
        if node != old_primary {
            let replica = runner.node(node).replica();
            assert_eq!(replica.view(), 2, "node {node} moved to view 2");
            assert!(replica.is_view_valid());
        }
    }

    // The swarm still orders requests in the new view, without the old
    // primary (3 of 4 replicas meet the quorum of 3).
    let new_primary = runner.primary_index((0..4u32).find(|&i| i != old_primary).unwrap());
    assert_ne!(new_primary, old_primary);
    runner.submit_request(new_primary, "client", &create_db(1));
    let end = runner.now() + Duration::from_secs(30);
    runner.run_until(end);

    for node in 0..4u32 {
        if node != old_primary {
            assert_eq!(runner.service(node).executed_up_to(), 1);
        }
    }
}

#[test]
fn join_reconfigures_the_swarm() {
    let mut runner = runner(4, 50);

    // A fifth node exists but is not yet part of the configuration.
    let new_peer = SimulationRunner::peer_address(4);
    let bootstrap = {
        let peers: Vec<_> = (0..5).map(SimulationRunner::peer_address).collect();
        quorumkv_types::Configuration::from_peers(peers).unwrap()
    };
    runner.add_node_with_bootstrap(new_peer.clone(), bootstrap, 99);

    let primary = runner.primary_index(0);
    runner.submit_membership(primary, new_peer.uuid.clone(), MembershipMessage::Join(new_peer));
    runner.run_until(Duration::from_secs(10));

    for node in 0..4u32 {
        assert_eq!(
            runner.node(node).replica().current_peers().len(),
            5,
            "node {node} adopted the five-peer configuration"
        );
    }

    // Ordering continues under the new configuration.
    let primary = runner.primary_index(0);
    runner.submit_request(primary, "client", &create_db(1));
    let end = runner.now() + Duration::from_secs(30);
    runner.run_until(end);
    for node in 0..4u32 {
        assert_eq!(runner.service(node).executed_up_to(), 2);
    }
}

#[test]
fn same_seed_same_run() {
    let run = |seed: u64| {
        let mut runner = runner(4, seed);
        let primary = runner.primary_index(0);
        runner.submit_request(primary, "client", &create_db(0));
        runner.run_until(Duration::from_secs(5));
        order_batch(&mut runner, 1, 20);
        (runner.stats().clone(), runner.service(0).storage().serialize())
    };

    let (stats_a, state_a) = run(7);
    let (stats_b, state_b) = run(7);
    assert_eq!(stats_a, stats_b);
    assert_eq!(state_a, state_b);

    // A different seed reorders the schedule but not the outcome.
    assert_eq!(state_a, run(8).1);
}

#[test]
fn audit_notices_flow_while_ordering() {
    let mut runner = runner(4, 51);
    let primary = runner.primary_index(0);
    runner.submit_request(primary, "client", &create_db(1));
    // Long enough for a few heartbeat ticks on top of the commit notices.
    runner.run_until(Duration::from_secs(12));

    assert!(runner.stats().audit_notices > 0);
    assert!(runner.stats().executed_notifications >= 4, "every replica notified its detector");
}
