use crate::core::types::{ModuleId, VersionNumber, WorkflowState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(
        "Version conflict for module '{module_id}': expected latest {expected:?}, actual {actual:?}"
    )]
    VersionConflict {
        module_id: ModuleId,
        expected: Option<VersionNumber>,
        actual: Option<VersionNumber>,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Audit chain broken for module '{module_id}' at sequence {sequence}")]
    AuditChainBroken { module_id: ModuleId, sequence: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl WorkflowError {
    pub fn module_not_found(module_id: ModuleId) -> Self {
        Self::NotFound(format!("module '{}'", module_id))
    }

    pub fn version_not_found(module_id: ModuleId, number: VersionNumber) -> Self {
        Self::NotFound(format!("version {} of module '{}'", number, module_id))
    }

    /// Only optimistic-concurrency collisions are worth retrying against
    /// fresh state; everything else is permanent for the given input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Errors that represent a decision about the attempt and therefore
    /// leave a denied entry in the audit log.
    pub fn is_audited_denial(&self) -> bool {
        matches!(
            self,
            Self::IllegalTransition { .. } | Self::Forbidden(_) | Self::InvalidState(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

impl<T> From<std::sync::PoisonError<T>> for WorkflowError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
