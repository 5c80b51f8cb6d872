// ============================================================================
// modflow: module workflow and versioning engine
// ============================================================================
//
// Moves university module definitions through a fixed approval pipeline
// (Draft -> InReview -> Validation -> Approval -> Released), keeping every
// prior version and a hash-chained audit trail of every attempt.
//
// Layers, leaves first: storage -> version / audit -> policy -> workflow.

pub mod audit;
pub mod config;
pub mod core;
pub mod policy;
pub mod prelude;
pub mod storage;
pub mod version;
pub mod workflow;

pub use audit::{AuditHistory, AuditLog};
pub use config::EngineConfig;
pub use crate::core::{
    Actor, ActorId, AuditAction, AuditDraft, AuditEntry, AuditOutcome, LocalizedText, ModuleId,
    ModulePayload, ModuleRecord, ModuleSummary, ModuleVersion, NewModule, Result, Role,
    VersionNumber, WorkflowError, WorkflowState,
};
pub use policy::{AccessPolicy, Decision, PolicyDocument, PolicyRule};
pub use storage::{DurabilityMode, FailPoint, InMemoryRepository, ModuleRepository};
pub use version::VersionStore;
pub use workflow::{CommandOptions, WorkflowEngine};

use std::sync::Arc;

/// Opens the repository described by `config` and wraps it in an engine
/// using the configured policy.
///
/// # Examples
///
/// ```
/// use modflow::{Actor, EngineConfig, ModulePayload, NewModule, Role, WorkflowState};
///
/// # #[tokio::main]
/// # async fn main() -> modflow::Result<()> {
/// let engine = modflow::open(&EngineConfig::new())?;
/// let owner = Actor::new("u-17", "Olivia Owner", vec![Role::ModuleOwner])?;
///
/// let v1 = engine
///     .create_module(
///         &owner,
///         Role::ModuleOwner,
///         NewModule::new("F1-101", ModulePayload::new("Databases", 6, "WiSe 2025/26")),
///     )
///     .await?;
/// let v2 = engine
///     .request_transition(v1.module_id, &owner, Role::ModuleOwner, WorkflowState::InReview)
///     .await?;
/// assert_eq!(v2.number, 2);
/// # Ok(())
/// # }
/// ```
pub fn open(config: &EngineConfig) -> Result<WorkflowEngine<InMemoryRepository>> {
    let repository = InMemoryRepository::open(config)?;
    let policy = config.load_policy()?;
    Ok(WorkflowEngine::with_policy(Arc::new(repository), policy))
}
