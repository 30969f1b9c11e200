//! Integration test: circuits over a live topology.
//!
//! Builds a small fabric with fabric-routing links and fabric-model services
//! and terminators, then drives circuit creation, rerouting around faults and
//! router loss, and periodic maintenance.

use std::sync::Arc;
use std::time::Duration;

use fabric_command::RateLimiter;
use fabric_core::{ChangeContext, Listener, NetworkOptions};
use fabric_integration_tests::{connect, report_link, Cluster};
use fabric_model::{CircuitQuery, CircuitRequest, ModelError, Network, Service, Terminator};
use fabric_routing::{LinkMode, Router};
use tokio::sync::watch;

const MS: Duration = Duration::from_millis(1);

/// ```text
///   a --5-- b --5-- d
///   |               |
///   +--20-- c --20--+
/// ```
fn diamond(network: &Network) {
    for id in ["a", "b", "c", "d"] {
        connect(network, id);
    }
    report_link(network, "ab", "a", "b", 5 * MS);
    report_link(network, "bd", "b", "d", 5 * MS);
    report_link(network, "ac", "a", "c", 20 * MS);
    report_link(network, "cd", "c", "d", 20 * MS);

    network
        .services()
        .create(Service::new("svc", "web"), ChangeContext::new())
        .unwrap();
    network
        .terminators()
        .create(Terminator::new("t-d", "svc", "d", "tcp:web:80"), ChangeContext::new())
        .unwrap();
}

fn request(client: &str) -> CircuitRequest {
    CircuitRequest {
        client_id: client.into(),
        service: "web".into(),
        ingress_router_id: "a".into(),
        ..CircuitRequest::default()
    }
}

#[test]
fn test_circuit_follows_cheapest_path_and_reroutes() {
    let cluster = Cluster::new(1);
    let network = cluster.leader();
    diamond(network);

    let circuit = network.create_circuit(request("alice")).unwrap();
    assert_eq!(circuit.path().to_string(), "[r/a]->[l/ab]->[r/b]->[l/bd]->[r/d]");
    assert_eq!(circuit.terminator.id, "t-d");

    assert!(network.link_faulted("bd", 1));
    assert_eq!(circuit.path().to_string(), "[r/a]->[l/ac]->[r/c]->[l/cd]->[r/d]");
    assert!(network.circuits().has(&circuit.id));
    assert!(network
        .circuits()
        .using_link(&network.links().get("cd").unwrap())
        .iter()
        .any(|c| c.id == circuit.id));
}

#[test]
fn test_losing_transit_router_reroutes_and_losing_egress_removes() {
    let cluster = Cluster::new(1);
    let network = cluster.leader();
    diamond(network);

    let first = network.create_circuit(request("alice")).unwrap();
    let second = network.create_circuit(request("bob")).unwrap();
    assert_eq!(network.circuits().len(), 2);

    let b = network.routers().get_connected("b").unwrap();
    network.disconnect_router(&b);
    for circuit in [&first, &second] {
        assert!(!circuit.path().uses_router(&b));
        assert!(network.circuits().has(&circuit.id));
    }

    let d = network.routers().get_connected("d").unwrap();
    network.disconnect_router(&d);
    assert!(network.circuits().is_empty());

    let err = network.create_circuit(request("carol")).unwrap_err();
    assert!(matches!(err, ModelError::NoTerminators(_)), "{err}");
}

#[test]
fn test_circuit_queries() {
    let cluster = Cluster::new(1);
    let network = cluster.leader();
    diamond(network);

    let circuits: Vec<_> = ["alice", "bob", "alice"]
        .into_iter()
        .map(|client| network.create_circuit(request(client)).unwrap())
        .collect();

    let alice = network.circuits().query(&CircuitQuery {
        client_id: Some("alice".into()),
        ..CircuitQuery::default()
    });
    assert_eq!(alice.len(), 2);
    assert_eq!(network.circuits().for_terminator("t-d").len(), 3);

    network.remove_circuit(&circuits[0].id).unwrap();
    let alice = network.circuits().query(&CircuitQuery {
        client_id: Some("alice".into()),
        ..CircuitQuery::default()
    });
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].id, circuits[2].id);
}

#[test]
fn test_reported_link_reconnect_replaces_older_iteration() {
    let cluster = Cluster::new(1);
    let network = cluster.leader();
    connect(network, "a");
    connect(network, "b");

    let (first, created) = network
        .link_reported("ab", 3, "tls", "tls:b:6262", "a", "b")
        .unwrap();
    assert!(created);
    let (stale, created) = network
        .link_reported("ab", 2, "tls", "tls:b:6262", "a", "b")
        .unwrap();
    assert!(!created);
    assert_eq!(stale.iteration, 3);

    let (newer, created) = network
        .link_reported("ab", 4, "tls", "tls:b:6262", "a", "b")
        .unwrap();
    assert!(created);
    assert_eq!(network.links().get("ab").unwrap().iteration, 4);
    assert_eq!(first.iteration, 3);
    assert_eq!(newer.current_state().mode, LinkMode::Connected);

    // Faults for the replaced iteration are ignored.
    assert!(!network.link_faulted("ab", 3));
    assert!(network.links().has("ab"));
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_loop_cleans_up_and_dials() {
    let options = NetworkOptions {
        cycle_interval: Duration::from_secs(1),
        ..NetworkOptions::default()
    };
    let network = Arc::new(Network::local(options, RateLimiter::disabled()).unwrap());
    for id in ["a", "b"] {
        let router = Router::new(id, format!("router-{id}"))
            .with_listeners(vec![Listener::new(format!("tls:{id}:6262"), "tls")]);
        network.connect_router(Arc::new(router), None);
    }
    let stale = Arc::new(Router::new("gone", "router-gone"));
    network.connect_router(Arc::clone(&stale), None);
    report_link(&network, "gone-a", "gone", "a", 5 * MS);
    // Mark the router gone without the disconnect cleanup.
    network.routers().mark_disconnected(&stale);

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(Arc::clone(&network).run_maintenance(stop_rx));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!network.links().has("gone-a"));
    let pending = network.links().links_in_mode(LinkMode::Pending);
    assert_eq!(pending.len(), 2);
    let mut dials: Vec<_> = pending.iter().map(|l| l.dial_address.as_str()).collect();
    dials.sort_unstable();
    assert_eq!(dials, vec!["tls:a:6262", "tls:b:6262"]);

    stop_tx.send(true).unwrap();
    task.await.unwrap();
}
