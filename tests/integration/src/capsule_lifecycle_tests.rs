//! Capsule Lifecycle - End-to-End Registry Scenarios
//!
//! This test suite drives the registry against real SQLite storage with
//! the audit journal attached, the way the node binary wires it.
//!
//! # Test Scenarios
//!
//! 1. **Full Lifecycle Walk**: A capsule traverses every legal edge from
//!    creation through recovery to archival
//! 2. **Illegal Transition Rejection**: Disallowed jumps leave the stored
//!    record untouched
//! 3. **Version History and Audit Trail**: Version bumps accumulate and
//!    every mutation lands in the journal
//! 4. **Lineage Derivation**: Children inherit ancestor chains and show up
//!    as descendants
//! 5. **Tombstones Across Restart**: Deleted ids stay reserved after the
//!    store is reopened, and the journal chain still verifies
//!
//! # Expected Outcomes
//!
//! - Revisions grow by exactly one per accepted mutation
//! - Rejected mutations produce no store write, no journal record
//! - Anchor receipts reference journal records in append order
//! - Analytics receives one event per registry mutation

use crate::test_utils::TestSystem;
use capsulecore_core::event::event_types;
use capsulecore_registry::{
    AnchorAction, CapsuleDraft, CapsulePatch, CapsuleRegistry, CapsuleState, CapsuleType,
    JournalAnchor, RegistryError, SqliteCapsuleStore,
};
use std::sync::Arc;

#[test]
fn test_full_lifecycle_walk() {
    let system = TestSystem::create();
    system.register_capsule("svc-a");

    let walk = [
        CapsuleState::Registered,
        CapsuleState::Deployed,
        CapsuleState::Running,
        CapsuleState::Paused,
        CapsuleState::Running,
        CapsuleState::Stopped,
        CapsuleState::Deployed,
        CapsuleState::Running,
        CapsuleState::Failed,
        CapsuleState::Deployed,
        CapsuleState::Archived,
    ];

    let mut expected_revision = 1;
    for state in walk {
        let receipt = system
            .registry
            .update("svc-a", &CapsulePatch::new().with_state(state))
            .unwrap();
        expected_revision += 1;
        assert_eq!(receipt.capsule.state, state);
        assert_eq!(receipt.capsule.revision, expected_revision);
        assert!(receipt.anchor.is_recorded());
    }

    // Archived is terminal.
    let error = system
        .registry
        .update("svc-a", &CapsulePatch::new().with_state(CapsuleState::Running))
        .unwrap_err();
    assert!(matches!(error, RegistryError::InvalidStateTransition { .. }));
    assert_eq!(
        system.registry.get("svc-a").unwrap().state,
        CapsuleState::Archived
    );
}

#[test]
fn test_illegal_transition_leaves_record_untouched() {
    let system = TestSystem::create();
    let created = system.register_capsule("svc-b");

    let error = system
        .registry
        .update("svc-b", &CapsulePatch::new().with_state(CapsuleState::Running))
        .unwrap_err();
    assert!(matches!(
        error,
        RegistryError::InvalidStateTransition {
            from: CapsuleState::Created,
            to: CapsuleState::Running,
        }
    ));

    let stored = system.registry.get("svc-b").unwrap();
    assert_eq!(stored.state, CapsuleState::Created);
    assert_eq!(stored.revision, 1);
    assert_eq!(stored.last_updated_ms, created.last_updated_ms);
    // The rejected mutation never reached the journal.
    assert_eq!(system.anchor.len().unwrap(), 1);
}

#[test]
fn test_version_history_and_audit_trail() {
    let system = TestSystem::create();
    system.register_capsule("svc-c");

    system
        .registry
        .update("svc-c", &CapsulePatch::new().with_version("1.1.0"))
        .unwrap();
    system
        .registry
        .update(
            "svc-c",
            &CapsulePatch::new()
                .with_version("2.0.0")
                .with_state(CapsuleState::Registered),
        )
        .unwrap();

    let history = system.registry.history("svc-c").unwrap();
    assert_eq!(history.version, "2.0.0");
    let versions: Vec<&str> = history
        .version_history
        .iter()
        .map(|entry| entry.version.as_str())
        .collect();
    assert_eq!(versions, ["1.0.0", "1.1.0"]);

    let actions: Vec<AnchorAction> = history
        .anchor_history
        .iter()
        .map(|receipt| receipt.action)
        .collect();
    assert_eq!(
        actions,
        [
            AnchorAction::Registered,
            AnchorAction::Updated,
            AnchorAction::Updated
        ]
    );
    assert!(history.anchor_error.is_none());
}

#[test]
fn test_lineage_links_parents_and_children() {
    let system = TestSystem::create();
    system.register_capsule("root");
    system
        .registry
        .register(
            CapsuleDraft::new("child-service", CapsuleType::Application)
                .with_id("child")
                .with_parent("root"),
        )
        .unwrap();
    system
        .registry
        .register(
            CapsuleDraft::new("grandchild-service", CapsuleType::Application)
                .with_id("grandchild")
                .with_parent("child"),
        )
        .unwrap();

    let root_lineage = system.registry.lineage("root").unwrap();
    assert_eq!(root_lineage.parent_id, None);
    assert_eq!(root_lineage.descendants, ["child", "grandchild"]);

    let leaf_lineage = system.registry.lineage("grandchild").unwrap();
    assert_eq!(leaf_lineage.ancestors, ["root", "child"]);
    assert_eq!(leaf_lineage.parent_id.as_deref(), Some("child"));
}

#[test]
fn test_tombstones_survive_restart_and_journal_verifies() {
    let system = TestSystem::create();
    let data_dir = system.data_dir.clone();

    system.register_capsule("svc-d");
    system
        .registry
        .update("svc-d", &CapsulePatch::new().with_state(CapsuleState::Registered))
        .unwrap();
    let receipt = system.registry.delete("svc-d").unwrap();
    assert!(receipt.deleted_at_ms > 0);
    assert_eq!(receipt.capsule.state, CapsuleState::Registered);

    let error = system
        .registry
        .register(CapsuleDraft::new("svc-d-service", CapsuleType::Application).with_id("svc-d"))
        .unwrap_err();
    assert!(matches!(error, RegistryError::Conflict { .. }));
    drop(system);

    // A second process opens the same files.
    let store = Arc::new(SqliteCapsuleStore::open(data_dir.join("capsules.db")).unwrap());
    let registry = CapsuleRegistry::new(store);
    let error = registry
        .register(CapsuleDraft::new("svc-d-service", CapsuleType::Application).with_id("svc-d"))
        .unwrap_err();
    assert!(matches!(error, RegistryError::Conflict { .. }));
    assert!(matches!(
        registry.get("svc-d").unwrap_err(),
        RegistryError::NotFound { .. }
    ));

    // Opening the journal re-verifies the digest chain.
    let anchor = JournalAnchor::open(data_dir.join("anchor.db")).unwrap();
    assert_eq!(anchor.len().unwrap(), 3);
    anchor.verify_chain().unwrap();
    let receipts = anchor.receipts_for("svc-d").unwrap();
    assert_eq!(receipts.last().unwrap().action, AnchorAction::Deleted);
}

#[test]
fn test_registry_mutations_reach_analytics() {
    let system = TestSystem::create();
    system.register_capsule("svc-e");
    system
        .registry
        .update("svc-e", &CapsulePatch::new().with_state(CapsuleState::Registered))
        .unwrap();
    system
        .registry
        .update("svc-e", &CapsulePatch::new().with_version("1.0.1"))
        .unwrap();
    system.registry.delete("svc-e").unwrap();

    assert_eq!(
        system.event_types(),
        [
            event_types::CAPSULE_REGISTERED,
            event_types::CAPSULE_STATE_CHANGED,
            event_types::CAPSULE_UPDATED,
            event_types::CAPSULE_DELETED
        ]
    );
}
