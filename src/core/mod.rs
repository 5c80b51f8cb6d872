pub mod error;
pub mod payload;
pub mod records;
pub mod types;

pub use error::{Result, WorkflowError};
pub use payload::{LocalizedText, ModulePayload, NewModule};
pub use records::{
    AuditAction, AuditDraft, AuditEntry, AuditOutcome, ModuleRecord, ModuleSummary, ModuleVersion,
};
pub use types::{Actor, ActorId, ModuleId, Role, VersionNumber, WorkflowState};
