//! Integration test: commands dispatched on one controller reach every replica.
//!
//! Exercises fabric-command's replicated dispatcher and state machine with
//! fabric-model's service and terminator managers on both ends of the log.

use fabric_command::UpdatedFields;
use fabric_core::{AuthorType, ChangeContext, Precedence};
use fabric_integration_tests::Cluster;
use fabric_model::{ModelError, Service, Terminator};

fn ctx() -> ChangeContext {
    ChangeContext::new()
        .with_author_id("admin-1")
        .with_author_type(AuthorType::Identity)
}

// =========================================================================
// Entity commands
// =========================================================================

#[test]
fn test_service_and_terminators_replicate() {
    let cluster = Cluster::new(3);
    let leader = cluster.leader();

    let service = leader
        .services()
        .create(Service::new("", "echo"), ctx())
        .expect("service create should succeed");
    for id in ["t1", "t2"] {
        leader
            .terminators()
            .create(Terminator::new(id, &service.id, "r1", "tcp:echo:7"), ctx())
            .expect("terminator create should succeed");
    }

    assert_eq!(cluster.log.len(), 3);
    for member in &cluster.members {
        let replicated = member.services().read(&service.id).unwrap();
        assert_eq!(replicated, service);
        assert_eq!(member.terminators().for_service(&service.id).unwrap().len(), 2);
        // Ids and timestamps are fixed before dispatch.
        assert_eq!(
            member.terminators().read("t1").unwrap(),
            leader.terminators().read("t1").unwrap()
        );
    }
}

#[test]
fn test_update_and_delete_replicate() {
    let cluster = Cluster::new(2);
    let leader = cluster.leader();
    let follower = &cluster.members[1];

    leader
        .services()
        .create(Service::new("s1", "echo"), ctx())
        .unwrap();
    let mut terminator = leader
        .terminators()
        .create(Terminator::new("t1", "s1", "r1", "tcp:echo:7").with_cost(5), ctx())
        .unwrap();

    terminator.cost = 99;
    terminator.address = "tcp:elsewhere:7".into();
    leader
        .terminators()
        .update(terminator, UpdatedFields::only(["cost"]), ctx())
        .unwrap();

    let replicated = follower.terminators().read("t1").unwrap();
    assert_eq!(replicated.cost, 99);
    assert_eq!(replicated.address, "tcp:echo:7");

    leader.terminators().delete("t1", ctx()).unwrap();
    assert!(follower.terminators().read("t1").unwrap_err().is_not_found());
}

#[test]
fn test_failed_apply_is_reported_to_dispatcher() {
    let cluster = Cluster::new(2);
    let leader = cluster.leader();

    let err = leader
        .terminators()
        .create(Terminator::new("t1", "missing", "r1", "tcp:echo:7"), ctx())
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation { .. }), "{err}");
    for member in &cluster.members {
        assert_eq!(member.terminators().count(), 0);
    }
}

#[test]
fn test_delete_batch_replicates_and_skips_missing() {
    let cluster = Cluster::new(2);
    let leader = cluster.leader();
    leader
        .services()
        .create(Service::new("s1", "echo"), ctx())
        .unwrap();
    for id in ["t1", "t2", "t3"] {
        leader
            .terminators()
            .create(Terminator::new(id, "s1", "r1", "tcp:echo:7"), ctx())
            .unwrap();
    }

    leader
        .terminators()
        .delete_batch(vec!["t1".into(), "t3".into(), "gone".into()], ctx())
        .unwrap();

    for member in &cluster.members {
        let remaining: Vec<_> = member
            .terminators()
            .all()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(remaining, vec!["t2"]);
    }
}

#[test]
fn test_service_delete_cascades_everywhere() {
    let cluster = Cluster::new(2);
    let leader = cluster.leader();
    leader
        .services()
        .create(Service::new("s1", "echo"), ctx())
        .unwrap();
    leader
        .terminators()
        .create(Terminator::new("t1", "s1", "r1", "tcp:echo:7"), ctx())
        .unwrap();

    leader.services().delete("s1", ctx()).unwrap();
    for member in &cluster.members {
        assert!(member.services().all().unwrap().is_empty());
        assert_eq!(member.terminators().count(), 0);
    }
}

// =========================================================================
// Catch-up and strategy driven updates
// =========================================================================

#[test]
fn test_late_member_catches_up() {
    let mut cluster = Cluster::new(1);
    cluster
        .leader()
        .services()
        .create(Service::new("s1", "echo"), ctx())
        .unwrap();
    cluster
        .leader()
        .terminators()
        .create(Terminator::new("t1", "s1", "r1", "tcp:echo:7"), ctx())
        .unwrap();

    let late = cluster.join();
    assert_eq!(late.services().read("s1").unwrap().name, "echo");
    assert!(late.terminators().read("t1").is_ok());
}

#[test]
fn test_strategy_precedence_change_replicates() {
    let cluster = Cluster::new(2);
    let leader = cluster.leader();
    leader
        .services()
        .create(Service::new("s1", "echo"), ctx())
        .unwrap();
    leader
        .terminators()
        .create(
            Terminator::new("t1", "s1", "r1", "tcp:echo:7").with_precedence(Precedence::Required),
            ctx(),
        )
        .unwrap();

    for _ in 0..3 {
        leader.report_dial_outcome("t1", false).unwrap();
    }
    let follower = &cluster.members[1];
    let failed = follower.terminators().read("t1").unwrap();
    assert_eq!(failed.precedence, Precedence::Failed);
    assert_eq!(failed.saved_precedence, Some(Precedence::Required));

    leader.report_dial_outcome("t1", true).unwrap();
    let restored = follower.terminators().read("t1").unwrap();
    assert_eq!(restored.precedence, Precedence::Required);
    assert_eq!(restored.saved_precedence, None);
}

#[test]
fn test_duplicate_service_name_rejected_on_every_member() {
    let cluster = Cluster::new(2);
    let leader = cluster.leader();
    leader
        .services()
        .create(Service::new("s1", "echo"), ctx())
        .unwrap();

    let err = cluster.members[1]
        .services()
        .create(Service::new("s2", "echo"), ctx())
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation { .. }), "{err}");
    for member in &cluster.members {
        assert_eq!(member.services().all().unwrap().len(), 1);
    }
}
