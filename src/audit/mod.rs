//! Append-only, per-module audit trail.
//!
//! Entries are sealed into a hash chain by the repository at the moment they
//! are appended; this module exposes recording, reading and verification.

pub mod chain;

use crate::core::{AuditDraft, AuditEntry, ModuleId, Result, WorkflowError};
use crate::storage::ModuleRepository;
use std::sync::Arc;

/// Point-in-time view of one module's audit entries, oldest first.
///
/// Cloning the underlying persistent vector is O(1), so the view is cheap to
/// hold and can be iterated any number of times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditHistory {
    module_id: Option<ModuleId>,
    entries: im::Vector<AuditEntry>,
}

impl AuditHistory {
    pub fn new(module_id: ModuleId, entries: im::Vector<AuditEntry>) -> Self {
        Self {
            module_id: Some(module_id),
            entries,
        }
    }

    pub fn module_id(&self) -> Option<ModuleId> {
        self.module_id
    }

    pub fn iter(&self) -> im::vector::Iter<'_, AuditEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }

    pub fn denials(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| !e.is_accepted())
    }
}

impl<'a> IntoIterator for &'a AuditHistory {
    type Item = &'a AuditEntry;
    type IntoIter = im::vector::Iter<'a, AuditEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for AuditHistory {
    type Item = AuditEntry;
    type IntoIter = im::vector::ConsumingIter<AuditEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

pub struct AuditLog<R: ModuleRepository> {
    repository: Arc<R>,
}

impl<R: ModuleRepository> Clone for AuditLog<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: ModuleRepository> AuditLog<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Appends an entry that produced no version, e.g. a denied attempt.
    pub async fn record(&self, module_id: ModuleId, draft: AuditDraft) -> Result<AuditEntry> {
        self.repository.append_audit(module_id, draft).await
    }

    /// All entries for the module, in append order. Unknown modules have an
    /// empty history.
    pub async fn history_for(&self, module_id: ModuleId) -> Result<AuditHistory> {
        Ok(match self.repository.load(module_id).await? {
            Some(record) => AuditHistory::new(module_id, record.audit),
            None => AuditHistory::default(),
        })
    }

    /// Recomputes the hash chain; returns the number of verified entries.
    pub async fn verify(&self, module_id: ModuleId) -> Result<u64> {
        let record = self
            .repository
            .load(module_id)
            .await?
            .ok_or_else(|| WorkflowError::module_not_found(module_id))?;
        chain::verify(module_id, record.audit.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActorId, AuditAction, Role, WorkflowState};
    use crate::storage::InMemoryRepository;

    #[tokio::test]
    async fn test_unknown_module_has_empty_history() {
        let log = AuditLog::new(Arc::new(InMemoryRepository::new()));
        let id = ModuleId::new();
        let history = log.history_for(id).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(history.iter().count(), 0);
        assert!(matches!(log.verify(id).await, Err(WorkflowError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_record_requires_existing_module() {
        let log = AuditLog::new(Arc::new(InMemoryRepository::new()));
        let draft = AuditDraft::denied(
            AuditAction::Transition,
            ActorId::new("pc-1"),
            Role::ProgramCoordinator,
            Some(WorkflowState::Draft),
            WorkflowState::Validation,
            "not an edge",
        );
        assert!(matches!(
            log.record(ModuleId::new(), draft).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[test]
    fn test_history_is_restartable() {
        let id = ModuleId::new();
        let draft = AuditDraft::accepted(
            AuditAction::Create,
            ActorId::new("owner-1"),
            Role::ModuleOwner,
            None,
            WorkflowState::Draft,
        );
        let entry = chain::seal(id, draft, Some(1), None, chrono::Utc::now()).unwrap();
        let history = AuditHistory::new(id, im::vector![entry]);

        assert_eq!(history.iter().count(), 1);
        assert_eq!((&history).into_iter().count(), 1);
        assert_eq!(history.denials().count(), 0);
        assert_eq!(history.module_id(), Some(id));
    }
}
