use crate::core::{
    ActorId, AuditDraft, AuditEntry, ModuleId, ModuleRecord, ModuleSummary, ModuleVersion, Result,
    VersionNumber, WorkflowState,
};
use async_trait::async_trait;

/// Identity fields recorded once, when a module's first version is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRegistration {
    pub module_number: String,
    pub owner: ActorId,
}

/// A new version plus the audit entry that explains it, committed as one unit.
#[derive(Debug, Clone)]
pub struct VersionCommit {
    pub module_id: ModuleId,
    /// Version the caller built on. `None` registers a new module.
    pub expected_latest: Option<VersionNumber>,
    /// Required when `expected_latest` is `None`.
    pub registration: Option<ModuleRegistration>,
    pub version: ModuleVersion,
    pub audit: AuditDraft,
}

#[derive(Debug, Clone)]
pub struct Committed {
    pub version: ModuleVersion,
    pub audit: AuditEntry,
}

/// Storage seam for module histories.
///
/// Implementations must make `commit` a compare-and-set on the module's
/// latest version number: exactly one of several commits built on the same
/// predecessor wins, the rest fail with `VersionConflict`. Nothing is ever
/// updated or removed in place.
#[async_trait]
pub trait ModuleRepository: Send + Sync {
    async fn commit(&self, commit: VersionCommit) -> Result<Committed>;

    /// Appends an audit entry that produced no version. Not subject to the
    /// compare-and-set.
    async fn append_audit(&self, module_id: ModuleId, draft: AuditDraft) -> Result<AuditEntry>;

    /// Point-in-time copy of everything stored for the module.
    async fn load(&self, module_id: ModuleId) -> Result<Option<ModuleRecord>>;

    async fn get_version(
        &self,
        module_id: ModuleId,
        number: VersionNumber,
    ) -> Result<Option<ModuleVersion>> {
        Ok(self
            .load(module_id)
            .await?
            .and_then(|record| record.version(number).cloned()))
    }

    /// Modules whose latest version is in `state`, ordered by module number.
    async fn scan_state(&self, state: WorkflowState) -> Result<Vec<ModuleSummary>>;

    async fn find_by_number(&self, module_number: &str) -> Result<Option<ModuleId>>;

    async fn module_count(&self) -> usize;
}
