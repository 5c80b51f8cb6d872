//! Authorization checks shared by every mutating workflow command.
//!
//! Checks run in a fixed order: role held, graph or editable state,
//! ownership, policy. The first failing check decides the error, and every
//! error returned from here is recorded as a denied audit entry.

use crate::core::{Actor, ModuleRecord, Result, Role, WorkflowError, WorkflowState};
use crate::policy::{AccessPolicy, graph};

/// The edge a command would move the module along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

pub fn current_state(record: &ModuleRecord) -> Result<WorkflowState> {
    record.current_state().ok_or_else(|| {
        WorkflowError::Storage(format!("module '{}' has no versions", record.module_id))
    })
}

pub fn authorize_transition(
    policy: &AccessPolicy,
    record: &ModuleRecord,
    actor: &Actor,
    role: Role,
    target: WorkflowState,
) -> Result<Edge> {
    let from = current_state(record)?;
    ensure_role_held(actor, role)?;
    if !graph::is_edge(from, target) {
        return Err(WorkflowError::IllegalTransition { from, to: target });
    }
    let edge = Edge { from, to: target };
    ensure_owner(record, actor, role)?;
    ensure_allowed(policy, role, edge)?;
    Ok(edge)
}

pub fn authorize_edit(
    policy: &AccessPolicy,
    record: &ModuleRecord,
    actor: &Actor,
    role: Role,
) -> Result<Edge> {
    let from = current_state(record)?;
    ensure_role_held(actor, role)?;
    let to = graph::edit_target(from).ok_or_else(|| {
        WorkflowError::InvalidState(format!("module in {} cannot be edited", from))
    })?;
    if from == WorkflowState::Released && role != Role::Admin {
        return Err(WorkflowError::InvalidState(format!(
            "a released module can only be revised by {}",
            Role::Admin
        )));
    }
    let edge = Edge { from, to };
    ensure_owner(record, actor, role)?;
    ensure_allowed(policy, role, edge)?;
    Ok(edge)
}

fn ensure_role_held(actor: &Actor, role: Role) -> Result<()> {
    if actor.holds(role) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(format!(
            "actor '{}' does not hold role {}",
            actor.id(),
            role
        )))
    }
}

fn ensure_owner(record: &ModuleRecord, actor: &Actor, role: Role) -> Result<()> {
    if role == Role::ModuleOwner && actor.id() != &record.owner {
        return Err(WorkflowError::Forbidden(format!(
            "actor '{}' does not own module '{}'",
            actor.id(),
            record.module_number
        )));
    }
    Ok(())
}

fn ensure_allowed(policy: &AccessPolicy, role: Role, edge: Edge) -> Result<()> {
    if policy.is_allowed(role, edge.from, edge.to) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(format!(
            "role {} may not move a module from {} to {}",
            role, edge.from, edge.to
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActorId, ModuleId, ModulePayload, ModuleVersion};
    use chrono::Utc;

    fn record_in(state: WorkflowState) -> ModuleRecord {
        let id = ModuleId::new();
        let mut record = ModuleRecord::new(id, "CS-101", ActorId::new("owner-1"), Utc::now());
        record
            .push_version(ModuleVersion {
                module_id: id,
                number: 1,
                state,
                payload: ModulePayload::new("Compilers", 5, "WS2026"),
                created_by: ActorId::new("owner-1"),
                created_at: Utc::now(),
                supersedes: None,
            })
            .unwrap();
        record
    }

    fn owner() -> Actor {
        Actor::new("owner-1", "Olivia Owner", vec![Role::ModuleOwner]).unwrap()
    }

    #[test]
    fn test_owner_submits_own_draft() {
        let policy = AccessPolicy::default();
        let record = record_in(WorkflowState::Draft);
        let edge = authorize_transition(
            &policy,
            &record,
            &owner(),
            Role::ModuleOwner,
            WorkflowState::InReview,
        )
        .unwrap();
        assert_eq!(
            edge,
            Edge {
                from: WorkflowState::Draft,
                to: WorkflowState::InReview
            }
        );
    }

    #[test]
    fn test_graph_is_checked_before_policy() {
        let policy = AccessPolicy::default();
        let eo = Actor::new("eo-1", "Erik Exams", vec![Role::ExaminationOffice]).unwrap();
        let record = record_in(WorkflowState::InReview);
        let err = authorize_transition(
            &policy,
            &record,
            &eo,
            Role::ExaminationOffice,
            WorkflowState::Approval,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::IllegalTransition {
                from: WorkflowState::InReview,
                to: WorkflowState::Approval
            }
        ));
    }

    #[test]
    fn test_role_must_be_held() {
        let policy = AccessPolicy::default();
        let record = record_in(WorkflowState::InReview);
        let err = authorize_transition(
            &policy,
            &record,
            &owner(),
            Role::ProgramCoordinator,
            WorkflowState::Validation,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn test_other_owners_are_forbidden() {
        let policy = AccessPolicy::default();
        let stranger = Actor::new("owner-2", "Sam Stranger", vec![Role::ModuleOwner]).unwrap();
        let record = record_in(WorkflowState::Draft);
        let err = authorize_edit(&policy, &record, &stranger, Role::ModuleOwner).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn test_edit_targets_by_state() {
        let policy = AccessPolicy::default();
        let admin = Actor::new("admin-1", "Ada Admin", vec![Role::Admin]).unwrap();
        let released = record_in(WorkflowState::Released);

        let edge = authorize_edit(&policy, &released, &admin, Role::Admin).unwrap();
        assert_eq!(edge.to, WorkflowState::Draft);

        let err = authorize_edit(&policy, &released, &owner(), Role::ModuleOwner).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));

        let validation = record_in(WorkflowState::Validation);
        let err = authorize_edit(&policy, &validation, &admin, Role::Admin).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));

        let rejected = record_in(WorkflowState::Rejected);
        let edge = authorize_edit(&policy, &rejected, &owner(), Role::ModuleOwner).unwrap();
        assert_eq!(
            edge,
            Edge {
                from: WorkflowState::Rejected,
                to: WorkflowState::Rejected
            }
        );
    }
}
