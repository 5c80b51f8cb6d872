use crate::core::{
    ActorId, ModuleId, ModulePayload, Result, Role, VersionNumber, WorkflowError, WorkflowState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a module at one point of its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub module_id: ModuleId,
    pub number: VersionNumber,
    pub state: WorkflowState,
    pub payload: ModulePayload,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    /// Version this one supersedes; `None` only for version 1.
    pub supersedes: Option<VersionNumber>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Edit,
    /// Admin edit of a `Released` module that opens a new revision in `Draft`.
    Revise,
    Transition,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Edit => "EDIT",
            Self::Revise => "REVISE",
            Self::Transition => "TRANSITION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Accepted,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Denied => "DENIED",
        }
    }
}

/// Audit record before the repository assigns its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDraft {
    pub action: AuditAction,
    pub actor: ActorId,
    pub role: Role,
    pub from_state: Option<WorkflowState>,
    pub to_state: WorkflowState,
    /// Latest version the actor saw when the attempt was made.
    pub observed_version: Option<VersionNumber>,
    pub outcome: AuditOutcome,
    pub reason: Option<String>,
    pub comment: Option<String>,
}

impl AuditDraft {
    pub fn accepted(
        action: AuditAction,
        actor: ActorId,
        role: Role,
        from_state: Option<WorkflowState>,
        to_state: WorkflowState,
    ) -> Self {
        Self {
            action,
            actor,
            role,
            from_state,
            to_state,
            observed_version: None,
            outcome: AuditOutcome::Accepted,
            reason: None,
            comment: None,
        }
    }

    pub fn denied(
        action: AuditAction,
        actor: ActorId,
        role: Role,
        from_state: Option<WorkflowState>,
        to_state: WorkflowState,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            actor,
            role,
            from_state,
            to_state,
            observed_version: None,
            outcome: AuditOutcome::Denied,
            reason: Some(reason.into()),
            comment: None,
        }
    }

    pub fn observed(mut self, version: Option<VersionNumber>) -> Self {
        self.observed_version = version;
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }
}

/// Sealed, hash-chained audit record. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub module_id: ModuleId,
    /// 1-based position within the module's audit chain.
    pub sequence: u64,
    pub action: AuditAction,
    /// Version produced by this action; `None` for denials.
    pub version: Option<VersionNumber>,
    pub observed_version: Option<VersionNumber>,
    pub actor: ActorId,
    pub role: Role,
    pub from_state: Option<WorkflowState>,
    pub to_state: WorkflowState,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub reason: Option<String>,
    pub comment: Option<String>,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        self.outcome == AuditOutcome::Accepted
    }
}

/// Everything the repository stores for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub module_id: ModuleId,
    pub module_number: String,
    pub owner: ActorId,
    pub created_at: DateTime<Utc>,
    pub versions: im::Vector<ModuleVersion>,
    pub audit: im::Vector<AuditEntry>,
}

impl ModuleRecord {
    pub fn new(
        module_id: ModuleId,
        module_number: impl Into<String>,
        owner: ActorId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            module_id,
            module_number: module_number.into(),
            owner,
            created_at,
            versions: im::Vector::new(),
            audit: im::Vector::new(),
        }
    }

    /// Appends the next version, enforcing the gap-free numbering and the
    /// predecessor link.
    pub fn push_version(&mut self, version: ModuleVersion) -> Result<()> {
        let expected = self.latest_number().map_or(1, |n| n + 1);
        if version.module_id != self.module_id
            || version.number != expected
            || version.supersedes != self.latest_number()
        {
            return Err(WorkflowError::Storage(format!(
                "version {} (supersedes {:?}) does not extend module '{}' at {:?}",
                version.number,
                version.supersedes,
                self.module_id,
                self.latest_number()
            )));
        }
        self.versions.push_back(version);
        Ok(())
    }

    pub fn push_audit(&mut self, entry: AuditEntry) -> Result<()> {
        let expected = self.last_audit().map_or(1, |e| e.sequence + 1);
        if entry.module_id != self.module_id || entry.sequence != expected {
            return Err(WorkflowError::Storage(format!(
                "audit entry {} does not extend the chain of module '{}' (expected {})",
                entry.sequence, self.module_id, expected
            )));
        }
        self.audit.push_back(entry);
        Ok(())
    }

    pub fn latest(&self) -> Option<&ModuleVersion> {
        self.versions.last()
    }

    pub fn latest_number(&self) -> Option<VersionNumber> {
        self.latest().map(|v| v.number)
    }

    pub fn current_state(&self) -> Option<WorkflowState> {
        self.latest().map(|v| v.state)
    }

    /// Versions are stored densely from 1, so lookup is by offset.
    pub fn version(&self, number: VersionNumber) -> Option<&ModuleVersion> {
        if number == 0 {
            return None;
        }
        self.versions.get(number as usize - 1)
    }

    pub fn last_audit(&self) -> Option<&AuditEntry> {
        self.audit.last()
    }

    pub fn summary(&self) -> Option<ModuleSummary> {
        let latest = self.latest()?;
        Some(ModuleSummary {
            module_id: self.module_id,
            module_number: self.module_number.clone(),
            owner: self.owner.clone(),
            title: latest.payload.title.clone(),
            state: latest.state,
            latest_version: latest.number,
            updated_at: latest.created_at,
        })
    }
}

/// Lightweight listing row for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub module_id: ModuleId,
    pub module_number: String,
    pub owner: ActorId,
    pub title: String,
    pub state: WorkflowState,
    pub latest_version: VersionNumber,
    pub updated_at: DateTime<Utc>,
}
