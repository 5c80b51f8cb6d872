#![allow(dead_code)]

use modflow::ModuleVersion;
use modflow::prelude::*;
use std::sync::Arc;

pub type Engine = WorkflowEngine<InMemoryRepository>;

pub fn engine() -> Engine {
    WorkflowEngine::new(Arc::new(InMemoryRepository::new()))
}

pub fn owner() -> Actor {
    Actor::new("owner-1", "Olivia Owner", vec![Role::ModuleOwner]).unwrap()
}

pub fn other_owner() -> Actor {
    Actor::new("owner-2", "Otto Other", vec![Role::ModuleOwner]).unwrap()
}

pub fn coordinator() -> Actor {
    Actor::new("pc-1", "Paula Coordinator", vec![Role::ProgramCoordinator]).unwrap()
}

pub fn examination_office() -> Actor {
    Actor::new("eo-1", "Erik Exams", vec![Role::ExaminationOffice]).unwrap()
}

pub fn deanery() -> Actor {
    Actor::new("dean-1", "Dora Dean", vec![Role::Deanery]).unwrap()
}

pub fn admin() -> Actor {
    Actor::new("admin-1", "Ada Admin", vec![Role::Admin, Role::ModuleOwner]).unwrap()
}

pub fn payload(title: &str) -> ModulePayload {
    ModulePayload::new(title, 6, "WiSe 2025/26")
        .with_description("Relational model, SQL, transactions")
        .with_program("B.Sc. Informatik")
}

pub async fn create_draft(engine: &Engine, module_number: &str) -> ModuleVersion {
    engine
        .create_module(
            &owner(),
            Role::ModuleOwner,
            NewModule::new(module_number, payload("Databases")),
        )
        .await
        .unwrap()
}

/// Drives a module along the happy path until it reaches `target`.
pub async fn advance_to(
    engine: &Engine,
    module_id: ModuleId,
    target: WorkflowState,
) -> ModuleVersion {
    let steps = [
        (owner(), Role::ModuleOwner, WorkflowState::InReview),
        (coordinator(), Role::ProgramCoordinator, WorkflowState::Validation),
        (examination_office(), Role::ExaminationOffice, WorkflowState::Approval),
        (deanery(), Role::Deanery, WorkflowState::Released),
    ];

    let mut latest = engine.latest_version(module_id).await.unwrap();
    for (actor, role, state) in steps {
        if latest.state == target {
            break;
        }
        latest = engine
            .request_transition(module_id, &actor, role, state)
            .await
            .unwrap();
    }
    assert_eq!(latest.state, target);
    latest
}

/// Edits until one attempt wins, reloading after every conflict.
pub async fn edit_with_retry(engine: &Engine, module_id: ModuleId, title: &str) -> ModuleVersion {
    loop {
        let latest = engine.latest_version(module_id).await.unwrap();
        match engine
            .propose_edit_with(
                module_id,
                &owner(),
                Role::ModuleOwner,
                payload(title),
                CommandOptions::expecting(latest.number),
            )
            .await
        {
            Ok(version) => return version,
            Err(err) if err.is_retryable() => continue,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}

pub fn assert_gap_free(versions: &[ModuleVersion]) {
    for (index, version) in versions.iter().enumerate() {
        let expected = index as u32 + 1;
        assert_eq!(version.number, expected);
        assert_eq!(version.supersedes, expected.checked_sub(1).filter(|n| *n > 0));
    }
}
