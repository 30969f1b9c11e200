//! Integration test: terminator validation against router control channels.
//!
//! Runs fabric-model's validation over fabric-routing control channels, with
//! fixes replicated through the command log.

use std::sync::Arc;

use fabric_core::proto::TerminatorInvalidReason;
use fabric_core::ChangeContext;
use fabric_integration_tests::{Cluster, ScriptedRouter};
use fabric_model::{
    Network, Service, Terminator, TerminatorDetail, TerminatorFilter, TerminatorState,
};
use fabric_routing::{ControlChannel, Router};
use parking_lot::Mutex;

fn attach(network: &Network, id: &str, channel: &Arc<ScriptedRouter>) {
    let control: Arc<dyn ControlChannel> = Arc::clone(channel) as _;
    network.connect_router(Arc::new(Router::new(id, format!("edge-{id}"))), Some(control));
}

fn seed(network: &Network) {
    network
        .services()
        .create(Service::new("s1", "echo"), ChangeContext::new())
        .unwrap();
    for (id, router) in [("t1", "r1"), ("t2", "r1"), ("t3", "r2"), ("t4", "r3")] {
        network
            .terminators()
            .create(Terminator::new(id, "s1", router, "tcp:echo:7"), ChangeContext::new())
            .unwrap();
    }
}

async fn validate(
    network: &Network,
    filter: &TerminatorFilter,
    fix: bool,
) -> Vec<TerminatorDetail> {
    let details = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&details);
    let (count, handle) = network
        .terminators()
        .validate_terminators(filter, fix, Arc::new(move |d| sink.lock().push(d)))
        .expect("validation should start");
    handle.await.expect("validation task should not panic");

    let mut details = details.lock().clone();
    assert_eq!(details.len(), count);
    details.sort_by(|a, b| a.terminator_id.cmp(&b.terminator_id));
    details
}

#[tokio::test]
async fn test_validation_across_routers_with_fix() {
    let cluster = Cluster::new(2);
    let leader = cluster.leader();
    seed(leader);

    let r1 = ScriptedRouter::new("r1");
    r1.set_valid("t1");
    r1.set_invalid("t2", TerminatorInvalidReason::UnknownBinding, "no binding xgress_edge");
    let r2 = ScriptedRouter::new("r2");
    r2.set_invalid("t3", TerminatorInvalidReason::BadState, "listener closed");
    attach(leader, "r1", &r1);
    attach(leader, "r2", &r2);
    // r3 never connects.

    let details = validate(leader, &TerminatorFilter::all(), true).await;
    let summary: Vec<_> = details
        .iter()
        .map(|d| (d.terminator_id.as_str(), d.state, d.fixed))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("t1", TerminatorState::Valid, false),
            ("t2", TerminatorState::InvalidUnknownBinding, true),
            ("t3", TerminatorState::InvalidBadState, true),
            ("t4", TerminatorState::Unknown, false),
        ]
    );
    assert_eq!(details[3].detail, "router off-line");
    assert_eq!(details[3].router_name, "unable to retrieve");
    assert_eq!(details[0].service_name, "echo");
    assert_eq!(details[0].router_name, "edge-r1");

    assert_eq!(r1.requests().len(), 1);
    assert!(r1.requests()[0].fix_invalid);
    assert_eq!(r2.requests()[0].terminators.len(), 1);

    // The fix went through the log, so every member dropped the same rows.
    for member in &cluster.members {
        let ids: Vec<_> = member
            .terminators()
            .all()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["t1", "t4"]);
    }
}

#[tokio::test]
async fn test_validation_report_only_leaves_terminators() {
    let cluster = Cluster::new(1);
    let leader = cluster.leader();
    seed(leader);

    let r1 = ScriptedRouter::new("r1");
    r1.set_invalid("t1", TerminatorInvalidReason::UnknownTerminator, "");
    attach(leader, "r1", &r1);

    let details = validate(leader, &TerminatorFilter::for_router("r1"), false).await;
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].state, TerminatorState::InvalidUnknownTerminator);
    assert!(!details[0].fixed);
    // Missing from the router's reply.
    assert_eq!(details[1].state, TerminatorState::Unknown);
    assert!(!r1.requests()[0].fix_invalid);
    assert_eq!(leader.terminators().count(), 4);
}
