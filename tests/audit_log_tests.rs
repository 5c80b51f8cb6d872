mod common;

use common::*;
use modflow::audit::chain::GENESIS_HASH;
use modflow::{
    AuditAction, AuditOutcome, CommandOptions, ModuleId, Role, WorkflowError, WorkflowState,
};

#[tokio::test]
async fn test_history_is_a_restartable_snapshot() {
    let engine = engine();
    let module_id = create_draft(&engine, "F1-101").await.module_id;
    advance_to(&engine, module_id, WorkflowState::InReview).await;

    let history = engine.history(module_id).await.unwrap();
    assert_eq!(history.module_id(), Some(module_id));
    let first_pass: Vec<u64> = history.iter().map(|e| e.sequence).collect();
    let second_pass: Vec<u64> = (&history).into_iter().map(|e| e.sequence).collect();
    assert_eq!(first_pass, vec![1, 2]);
    assert_eq!(first_pass, second_pass);

    // Later writes do not leak into a history already handed out.
    engine
        .request_transition(
            module_id,
            &coordinator(),
            Role::ProgramCoordinator,
            WorkflowState::Validation,
        )
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(engine.history(module_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_entries_form_a_linked_chain() {
    let engine = engine();
    let module_id = create_draft(&engine, "F1-101").await.module_id;
    engine
        .propose_edit(module_id, &owner(), Role::ModuleOwner, payload("Databases II"))
        .await
        .unwrap();
    engine
        .request_transition(
            module_id,
            &coordinator(),
            Role::ProgramCoordinator,
            WorkflowState::Validation,
        )
        .await
        .unwrap_err();
    advance_to(&engine, module_id, WorkflowState::Released).await;

    let history = engine.history(module_id).await.unwrap();
    let entries: Vec<_> = history.iter().collect();
    assert_eq!(entries.len(), 7);
    assert_eq!(entries[0].prev_hash, GENESIS_HASH);
    for (index, entry) in entries.iter().enumerate() {
        assert_eq!(entry.module_id, module_id);
        assert_eq!(entry.sequence, index as u64 + 1);
        assert_eq!(entry.hash.len(), 64);
        if index > 0 {
            let previous = entries[index - 1];
            assert_eq!(entry.prev_hash, previous.hash);
            assert!(entry.timestamp >= previous.timestamp);
        }
    }
    assert_eq!(engine.verify_audit(module_id).await.unwrap(), 7);
}

#[tokio::test]
async fn test_accepted_entries_reference_their_versions() {
    let engine = engine();
    let module_id = create_draft(&engine, "F1-101").await.module_id;
    engine
        .request_transition_with(
            module_id,
            &owner(),
            Role::ModuleOwner,
            WorkflowState::InReview,
            CommandOptions::expecting(1).comment("ready for review"),
        )
        .await
        .unwrap();

    let history = engine.history(module_id).await.unwrap();
    let create = &history.iter().next().unwrap();
    assert_eq!(create.action, AuditAction::Create);
    assert_eq!(create.version, Some(1));
    assert_eq!(create.from_state, None);
    assert_eq!(create.to_state, WorkflowState::Draft);
    assert!(create.is_accepted());

    let submit = history.last().unwrap();
    assert_eq!(submit.action, AuditAction::Transition);
    assert_eq!(submit.version, Some(2));
    assert_eq!(submit.observed_version, Some(1));
    assert_eq!(submit.from_state, Some(WorkflowState::Draft));
    assert_eq!(submit.to_state, WorkflowState::InReview);
    assert_eq!(submit.actor.as_str(), "owner-1");
    assert_eq!(submit.role, Role::ModuleOwner);
    assert_eq!(submit.comment.as_deref(), Some("ready for review"));
    assert_eq!(submit.reason, None);
}

#[tokio::test]
async fn test_denied_entry_records_the_attempt() {
    let engine = engine();
    let module_id = create_draft(&engine, "F1-101").await.module_id;
    advance_to(&engine, module_id, WorkflowState::InReview).await;

    let err = engine
        .request_transition(
            module_id,
            &examination_office(),
            Role::ExaminationOffice,
            WorkflowState::Validation,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));

    let history = engine.history(module_id).await.unwrap();
    let denied: Vec<_> = history.denials().collect();
    assert_eq!(denied.len(), 1);
    let entry = denied[0];
    assert_eq!(entry.outcome, AuditOutcome::Denied);
    assert_eq!(entry.action, AuditAction::Transition);
    assert_eq!(entry.version, None);
    assert_eq!(entry.observed_version, Some(2));
    assert_eq!(entry.actor.as_str(), "eo-1");
    assert_eq!(entry.role, Role::ExaminationOffice);
    assert_eq!(entry.from_state, Some(WorkflowState::InReview));
    assert_eq!(entry.to_state, WorkflowState::Validation);
    assert!(entry.reason.as_deref().is_some_and(|r| !r.is_empty()));

    // A denial never produces a version.
    assert_eq!(engine.versions(module_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_denied_edit_is_recorded_as_edit() {
    let engine = engine();
    let module_id = create_draft(&engine, "F1-101").await.module_id;
    advance_to(&engine, module_id, WorkflowState::Approval).await;

    let err = engine
        .propose_edit(module_id, &owner(), Role::ModuleOwner, payload("Too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState(_)));

    let entry = engine.history(module_id).await.unwrap().last().cloned().unwrap();
    assert_eq!(entry.action, AuditAction::Edit);
    assert_eq!(entry.outcome, AuditOutcome::Denied);
    assert_eq!(entry.from_state, Some(WorkflowState::Approval));
}

#[tokio::test]
async fn test_unaudited_failures_leave_no_entry() {
    let engine = engine();
    let module_id = create_draft(&engine, "F1-101").await.module_id;

    // Stale expectation.
    engine
        .request_transition_with(
            module_id,
            &owner(),
            Role::ModuleOwner,
            WorkflowState::InReview,
            CommandOptions::expecting(7),
        )
        .await
        .unwrap_err();

    // Authorized but invalid content.
    let mut invalid = payload("Databases");
    invalid.credits = 0;
    let err = engine
        .propose_edit(module_id, &owner(), Role::ModuleOwner, invalid)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidPayload(_)));

    assert_eq!(engine.history(module_id).await.unwrap().len(), 1);
    assert_eq!(engine.versions(module_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_audit_log_for_unknown_module() {
    let engine = engine();
    let unknown = ModuleId::new();

    let history = engine.audit_log().history_for(unknown).await.unwrap();
    assert!(history.is_empty());
    assert_eq!(history.module_id(), None);
    assert!(matches!(
        engine.verify_audit(unknown).await,
        Err(WorkflowError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_histories_are_kept_per_module() {
    let engine = engine();
    let first = create_draft(&engine, "F1-101").await.module_id;
    let second = create_draft(&engine, "F1-102").await.module_id;
    advance_to(&engine, first, WorkflowState::Released).await;

    assert_eq!(engine.history(first).await.unwrap().len(), 5);
    let second_history = engine.history(second).await.unwrap();
    assert_eq!(second_history.len(), 1);
    assert_eq!(second_history.iter().next().unwrap().prev_hash, GENESIS_HASH);
}
