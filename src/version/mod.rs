//! Immutable version snapshots on top of the repository.
//!
//! The store owns no state of its own. Numbering is derived from the
//! predecessor the caller built on and enforced by the repository's
//! compare-and-set, so two writers can never both be given the same number.

use crate::core::{
    AuditDraft, ModuleId, ModulePayload, ModuleVersion, Result, VersionNumber, WorkflowError,
    WorkflowState,
};
use crate::storage::{Committed, ModuleRegistration, ModuleRepository, VersionCommit};
use chrono::Utc;
use std::sync::Arc;

pub struct VersionStore<R: ModuleRepository> {
    repository: Arc<R>,
}

impl<R: ModuleRepository> Clone for VersionStore<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: ModuleRepository> VersionStore<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Version 1 of a new module.
    pub async fn register(
        &self,
        module_id: ModuleId,
        registration: ModuleRegistration,
        payload: ModulePayload,
        audit: AuditDraft,
    ) -> Result<Committed> {
        let version = snapshot(module_id, 1, WorkflowState::Draft, payload, &audit, None);
        self.repository
            .commit(VersionCommit {
                module_id,
                expected_latest: None,
                registration: Some(registration),
                version,
                audit,
            })
            .await
    }

    /// Commits `predecessor + 1` together with its audit entry. Fails with
    /// `VersionConflict` if `predecessor` is no longer the latest version.
    pub async fn create_version(
        &self,
        module_id: ModuleId,
        payload: ModulePayload,
        state: WorkflowState,
        predecessor: Option<VersionNumber>,
        audit: AuditDraft,
    ) -> Result<Committed> {
        let number = predecessor.map_or(1, |n| n + 1);
        let version = snapshot(module_id, number, state, payload, &audit, predecessor);
        self.repository
            .commit(VersionCommit {
                module_id,
                expected_latest: predecessor,
                registration: None,
                version,
                audit,
            })
            .await
    }

    pub async fn get_version(
        &self,
        module_id: ModuleId,
        number: VersionNumber,
    ) -> Result<ModuleVersion> {
        self.repository
            .get_version(module_id, number)
            .await?
            .ok_or_else(|| WorkflowError::version_not_found(module_id, number))
    }

    pub async fn latest(&self, module_id: ModuleId) -> Result<ModuleVersion> {
        self.repository
            .load(module_id)
            .await?
            .and_then(|record| record.latest().cloned())
            .ok_or_else(|| WorkflowError::module_not_found(module_id))
    }

    /// Every version, oldest first.
    pub async fn versions(&self, module_id: ModuleId) -> Result<Vec<ModuleVersion>> {
        let record = self
            .repository
            .load(module_id)
            .await?
            .ok_or_else(|| WorkflowError::module_not_found(module_id))?;
        Ok(record.versions.into_iter().collect())
    }

    pub async fn latest_released(&self, module_id: ModuleId) -> Result<Option<ModuleVersion>> {
        let record = self
            .repository
            .load(module_id)
            .await?
            .ok_or_else(|| WorkflowError::module_not_found(module_id))?;
        Ok(record
            .versions
            .iter()
            .rev()
            .find(|v| v.state == WorkflowState::Released)
            .cloned())
    }
}

fn snapshot(
    module_id: ModuleId,
    number: VersionNumber,
    state: WorkflowState,
    payload: ModulePayload,
    audit: &AuditDraft,
    supersedes: Option<VersionNumber>,
) -> ModuleVersion {
    ModuleVersion {
        module_id,
        number,
        state,
        payload,
        created_by: audit.actor.clone(),
        created_at: Utc::now(),
        supersedes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActorId, AuditAction, Role};
    use crate::storage::InMemoryRepository;

    fn audit(action: AuditAction, from: Option<WorkflowState>, to: WorkflowState) -> AuditDraft {
        AuditDraft::accepted(action, ActorId::new("admin-1"), Role::Admin, from, to)
    }

    async fn registered() -> (VersionStore<InMemoryRepository>, ModuleId) {
        let store = VersionStore::new(Arc::new(InMemoryRepository::new()));
        let id = ModuleId::new();
        store
            .register(
                id,
                ModuleRegistration {
                    module_number: "CS-101".to_string(),
                    owner: ActorId::new("owner-1"),
                },
                ModulePayload::new("Compilers", 5, "WS2026"),
                audit(AuditAction::Create, None, WorkflowState::Draft),
            )
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_numbers_are_gap_free() {
        let (store, id) = registered().await;
        let mut predecessor = 1;
        for state in [WorkflowState::InReview, WorkflowState::Validation, WorkflowState::Approval] {
            let committed = store
                .create_version(
                    id,
                    ModulePayload::new("Compilers", 5, "WS2026"),
                    state,
                    Some(predecessor),
                    audit(AuditAction::Transition, None, state),
                )
                .await
                .unwrap();
            assert_eq!(committed.version.number, predecessor + 1);
            assert_eq!(committed.version.supersedes, Some(predecessor));
            predecessor = committed.version.number;
        }

        let numbers: Vec<_> = store.versions(id).await.unwrap().iter().map(|v| v.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(store.latest(id).await.unwrap().state, WorkflowState::Approval);
    }

    #[tokio::test]
    async fn test_stale_predecessor_conflicts() {
        let (store, id) = registered().await;
        let payload = ModulePayload::new("Compilers II", 5, "WS2026");
        let edit = || audit(AuditAction::Edit, None, WorkflowState::Draft);
        store
            .create_version(id, payload.clone(), WorkflowState::Draft, Some(1), edit())
            .await
            .unwrap();
        let err = store
            .create_version(id, payload, WorkflowState::Draft, Some(1), edit())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_lookups_of_missing_things() {
        let (store, id) = registered().await;
        assert!(matches!(store.get_version(id, 9).await, Err(WorkflowError::NotFound(_))));
        assert!(matches!(store.latest(ModuleId::new()).await, Err(WorkflowError::NotFound(_))));
        assert!(store.latest_released(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_released_skips_newer_drafts() {
        let (store, id) = registered().await;
        let payload = ModulePayload::new("Compilers", 5, "WS2026");
        let release = audit(AuditAction::Transition, None, WorkflowState::Released);
        store
            .create_version(id, payload.clone(), WorkflowState::Released, Some(1), release)
            .await
            .unwrap();
        let revise = audit(AuditAction::Revise, None, WorkflowState::Draft);
        store
            .create_version(id, payload, WorkflowState::Draft, Some(2), revise)
            .await
            .unwrap();

        let released = store.latest_released(id).await.unwrap().unwrap();
        assert_eq!(released.number, 2);
        assert_eq!(store.latest(id).await.unwrap().number, 3);
    }
}
