//! Orchestration of module edits and state transitions.
//!
//! Every mutating command follows the same sequence: load the latest
//! version, check the caller's expected version, authorize (see [`guard`]),
//! then commit the new version and its audit entry as one unit. Denials are
//! written to the audit log before the error is returned. Version conflicts
//! are returned untouched so the caller can reload and retry.

pub mod guard;

use crate::audit::{AuditHistory, AuditLog};
use crate::core::{
    Actor, AuditAction, AuditDraft, LocalizedText, ModuleId, ModulePayload, ModuleRecord,
    ModuleSummary, ModuleVersion, NewModule, Result, Role, VersionNumber, WorkflowError,
    WorkflowState,
};
use crate::policy::{AccessPolicy, graph};
use crate::storage::{ModuleRegistration, ModuleRepository};
use crate::version::VersionStore;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Optional knobs for mutating commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Latest version the caller based its decision on. A mismatch fails with
    /// `VersionConflict` before anything is written.
    pub expected_version: Option<VersionNumber>,
    /// Free-form note stored on the audit entry.
    pub comment: Option<String>,
}

impl CommandOptions {
    pub fn expecting(version: VersionNumber) -> Self {
        Self {
            expected_version: Some(version),
            comment: None,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

pub struct WorkflowEngine<R: ModuleRepository> {
    repository: Arc<R>,
    versions: VersionStore<R>,
    audit: AuditLog<R>,
    policy: Arc<AccessPolicy>,
}

impl<R: ModuleRepository> Clone for WorkflowEngine<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            versions: self.versions.clone(),
            audit: self.audit.clone(),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<R: ModuleRepository> WorkflowEngine<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self::with_policy(repository, AccessPolicy::default())
    }

    pub fn with_policy(repository: Arc<R>, policy: AccessPolicy) -> Self {
        Self {
            versions: VersionStore::new(Arc::clone(&repository)),
            audit: AuditLog::new(Arc::clone(&repository)),
            repository,
            policy: Arc::new(policy),
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn version_store(&self) -> &VersionStore<R> {
        &self.versions
    }

    pub fn audit_log(&self) -> &AuditLog<R> {
        &self.audit
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Registers a module with version 1 in `Draft`.
    ///
    /// Only creator roles may call this. The creator owns the module unless an
    /// `Admin` names another owner.
    pub async fn create_module(
        &self,
        actor: &Actor,
        role: Role,
        request: NewModule,
    ) -> Result<ModuleVersion> {
        let span = info_span!(
            "workflow.create_module",
            actor = %actor.id(),
            role = %role,
            module_number = %request.module_number
        );

        async move {
            if !actor.holds(role) {
                return Err(WorkflowError::Forbidden(format!(
                    "actor '{}' does not hold role {}",
                    actor.id(),
                    role
                )));
            }
            if !self.policy.may_create(role) {
                event!(Level::WARN, "Module creation denied");
                return Err(WorkflowError::Forbidden(format!(
                    "role {} may not create modules",
                    role
                )));
            }
            request.validate()?;

            let NewModule {
                module_number,
                owner,
                payload,
            } = request;
            let module_number = module_number.trim().to_string();
            let owner = match owner {
                Some(owner) if owner != *actor.id() && role != Role::Admin => {
                    return Err(WorkflowError::Forbidden(format!(
                        "only {} may assign module '{}' to another owner",
                        Role::Admin,
                        module_number
                    )));
                }
                Some(owner) => owner,
                None => actor.id().clone(),
            };
            if self.repository.find_by_number(&module_number).await?.is_some() {
                return Err(WorkflowError::AlreadyExists(format!(
                    "Module number '{}' is already registered",
                    module_number
                )));
            }

            let module_id = ModuleId::new();
            let draft = AuditDraft::accepted(
                AuditAction::Create,
                actor.id().clone(),
                role,
                None,
                WorkflowState::Draft,
            );
            let committed = self
                .versions
                .register(
                    module_id,
                    ModuleRegistration {
                        module_number,
                        owner,
                    },
                    payload,
                    draft,
                )
                .await
                .inspect_err(log_commit_failure)?;

            event!(Level::INFO, module_id = %module_id, "Module created");
            Ok(committed.version)
        }
        .instrument(span)
        .await
    }

    pub async fn propose_edit(
        &self,
        module_id: ModuleId,
        actor: &Actor,
        role: Role,
        payload: ModulePayload,
    ) -> Result<ModuleVersion> {
        self.propose_edit_with(module_id, actor, role, payload, CommandOptions::default())
            .await
    }

    /// Replaces the payload. From `Draft` or `Rejected` the state is kept;
    /// an `Admin` edit of a `Released` module starts a new revision in `Draft`.
    pub async fn propose_edit_with(
        &self,
        module_id: ModuleId,
        actor: &Actor,
        role: Role,
        payload: ModulePayload,
        options: CommandOptions,
    ) -> Result<ModuleVersion> {
        let span = info_span!(
            "workflow.propose_edit",
            module_id = %module_id,
            actor = %actor.id(),
            role = %role
        );

        async move {
            let record = self.load_record(module_id).await?;
            let latest = self.check_expected(&record, options.expected_version)?;

            let action = edit_action(latest.state);
            let edge = match guard::authorize_edit(&self.policy, &record, actor, role) {
                Ok(edge) => edge,
                Err(err) => {
                    let from = latest.state;
                    let to = graph::edit_target(from).unwrap_or(from);
                    return Err(self
                        .deny(&record, action, actor, role, from, to, err, options.comment)
                        .await);
                }
            };
            payload.validate()?;

            let mut payload = payload;
            payload.mark_stale_translations(&latest.payload);
            let draft = AuditDraft::accepted(
                action,
                actor.id().clone(),
                role,
                Some(edge.from),
                edge.to,
            )
            .observed(Some(latest.number))
            .with_comment(options.comment);

            let committed = self
                .versions
                .create_version(module_id, payload, edge.to, Some(latest.number), draft)
                .await
                .inspect_err(log_commit_failure)?;

            event!(
                Level::INFO,
                version = committed.version.number,
                from = %edge.from,
                to = %edge.to,
                "Edit accepted"
            );
            Ok(committed.version)
        }
        .instrument(span)
        .await
    }

    pub async fn request_transition(
        &self,
        module_id: ModuleId,
        actor: &Actor,
        role: Role,
        target: WorkflowState,
    ) -> Result<ModuleVersion> {
        self.request_transition_with(module_id, actor, role, target, CommandOptions::default())
            .await
    }

    /// Moves the module one edge along the workflow graph, carrying the
    /// current payload into the new version.
    pub async fn request_transition_with(
        &self,
        module_id: ModuleId,
        actor: &Actor,
        role: Role,
        target: WorkflowState,
        options: CommandOptions,
    ) -> Result<ModuleVersion> {
        let span = info_span!(
            "workflow.request_transition",
            module_id = %module_id,
            actor = %actor.id(),
            role = %role,
            target = %target
        );

        async move {
            let record = self.load_record(module_id).await?;
            let latest = self.check_expected(&record, options.expected_version)?;

            let authorized =
                guard::authorize_transition(&self.policy, &record, actor, role, target);
            let edge = match authorized {
                Ok(edge) => edge,
                Err(err) => {
                    return Err(self
                        .deny(
                            &record,
                            AuditAction::Transition,
                            actor,
                            role,
                            latest.state,
                            target,
                            err,
                            options.comment,
                        )
                        .await);
                }
            };

            let draft = AuditDraft::accepted(
                AuditAction::Transition,
                actor.id().clone(),
                role,
                Some(edge.from),
                edge.to,
            )
            .observed(Some(latest.number))
            .with_comment(options.comment);

            let committed = self
                .versions
                .create_version(
                    module_id,
                    latest.payload.clone(),
                    edge.to,
                    Some(latest.number),
                    draft,
                )
                .await
                .inspect_err(log_commit_failure)?;

            event!(
                Level::INFO,
                version = committed.version.number,
                from = %edge.from,
                to = %edge.to,
                "Transition accepted"
            );
            Ok(committed.version)
        }
        .instrument(span)
        .await
    }

    pub async fn add_translation(
        &self,
        module_id: ModuleId,
        actor: &Actor,
        role: Role,
        text: LocalizedText,
    ) -> Result<ModuleVersion> {
        self.add_translation_with(module_id, actor, role, text, CommandOptions::default())
            .await
    }

    /// An edit whose payload is the current one with `text` inserted or
    /// replaced. The edit is pinned to the version the payload was read from.
    pub async fn add_translation_with(
        &self,
        module_id: ModuleId,
        actor: &Actor,
        role: Role,
        mut text: LocalizedText,
        mut options: CommandOptions,
    ) -> Result<ModuleVersion> {
        text.is_outdated = false;
        text.validate()?;

        let latest = self.versions.latest(module_id).await?;
        let expected = options.expected_version.unwrap_or(latest.number);
        options.expected_version = Some(expected);
        if expected != latest.number {
            return Err(WorkflowError::VersionConflict {
                module_id,
                expected: Some(expected),
                actual: Some(latest.number),
            });
        }

        let payload = latest.payload.with_translation(text);
        self.propose_edit_with(module_id, actor, role, payload, options)
            .await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn current_state(&self, module_id: ModuleId) -> Result<WorkflowState> {
        Ok(self.versions.latest(module_id).await?.state)
    }

    /// Every audit entry of the module, accepted and denied, oldest first.
    ///
    /// # Examples
    ///
    /// ```
    /// use modflow::{
    ///     Actor, InMemoryRepository, ModulePayload, NewModule, Role, WorkflowEngine,
    ///     WorkflowState,
    /// };
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let engine = WorkflowEngine::new(Arc::new(InMemoryRepository::new()));
    /// let owner = Actor::new("u-17", "Olivia Owner", vec![Role::ModuleOwner]).unwrap();
    /// let v1 = engine
    ///     .create_module(
    ///         &owner,
    ///         Role::ModuleOwner,
    ///         NewModule::new("F1-101", ModulePayload::new("Databases", 6, "WiSe 2025/26")),
    ///     )
    ///     .await
    ///     .unwrap();
    ///
    /// // Draft cannot skip review; the refused attempt is still recorded.
    /// let denied = engine
    ///     .request_transition(v1.module_id, &owner, Role::ModuleOwner, WorkflowState::Validation)
    ///     .await;
    /// assert!(denied.is_err());
    ///
    /// let history = engine.history(v1.module_id).await.unwrap();
    /// assert_eq!(history.len(), 2);
    /// assert_eq!(history.denials().count(), 1);
    /// # });
    /// ```
    pub async fn history(&self, module_id: ModuleId) -> Result<AuditHistory> {
        let record = self.load_record(module_id).await?;
        Ok(AuditHistory::new(module_id, record.audit))
    }

    pub async fn get_version(
        &self,
        module_id: ModuleId,
        number: VersionNumber,
    ) -> Result<ModuleVersion> {
        self.versions.get_version(module_id, number).await
    }

    pub async fn latest_version(&self, module_id: ModuleId) -> Result<ModuleVersion> {
        self.versions.latest(module_id).await
    }

    pub async fn versions(&self, module_id: ModuleId) -> Result<Vec<ModuleVersion>> {
        self.versions.versions(module_id).await
    }

    pub async fn latest_released(&self, module_id: ModuleId) -> Result<Option<ModuleVersion>> {
        self.versions.latest_released(module_id).await
    }

    pub async fn modules_in_state(&self, state: WorkflowState) -> Result<Vec<ModuleSummary>> {
        self.repository.scan_state(state).await
    }

    pub async fn find_module(&self, module_number: &str) -> Result<ModuleId> {
        self.repository
            .find_by_number(module_number)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("module number '{}'", module_number)))
    }

    pub async fn verify_audit(&self, module_id: ModuleId) -> Result<u64> {
        self.audit.verify(module_id).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn load_record(&self, module_id: ModuleId) -> Result<ModuleRecord> {
        self.repository
            .load(module_id)
            .await?
            .ok_or_else(|| WorkflowError::module_not_found(module_id))
    }

    fn check_expected(
        &self,
        record: &ModuleRecord,
        expected: Option<VersionNumber>,
    ) -> Result<ModuleVersion> {
        let latest = record.latest().cloned().ok_or_else(|| {
            WorkflowError::Storage(format!("module '{}' has no versions", record.module_id))
        })?;
        if let Some(expected) = expected {
            if expected != latest.number {
                event!(
                    Level::WARN,
                    expected,
                    actual = latest.number,
                    "Expected version mismatch"
                );
                return Err(WorkflowError::VersionConflict {
                    module_id: record.module_id,
                    expected: Some(expected),
                    actual: Some(latest.number),
                });
            }
        }
        Ok(latest)
    }

    /// Writes the denied entry and hands back the error to return. A failure
    /// to write the entry replaces the denial.
    #[allow(clippy::too_many_arguments)]
    async fn deny(
        &self,
        record: &ModuleRecord,
        action: AuditAction,
        actor: &Actor,
        role: Role,
        from: WorkflowState,
        to: WorkflowState,
        err: WorkflowError,
        comment: Option<String>,
    ) -> WorkflowError {
        if !err.is_audited_denial() {
            return err;
        }

        let reason = err.to_string();
        let draft = AuditDraft::denied(action, actor.id().clone(), role, Some(from), to, reason)
            .observed(record.latest_number())
            .with_comment(comment);
        match self.audit.record(record.module_id, draft).await {
            Ok(entry) => {
                event!(
                    Level::WARN,
                    action = action.as_str(),
                    sequence = entry.sequence,
                    reason = %err,
                    "Attempt denied"
                );
                err
            }
            Err(audit_err) => {
                event!(
                    Level::ERROR,
                    error = %audit_err,
                    denial = %err,
                    "Failed to record denial"
                );
                audit_err
            }
        }
    }
}

/// Edits out of `Released` are recorded as revisions.
fn edit_action(from: WorkflowState) -> AuditAction {
    if from == WorkflowState::Released {
        AuditAction::Revise
    } else {
        AuditAction::Edit
    }
}

fn log_commit_failure(err: &WorkflowError) {
    if err.is_retryable() {
        event!(Level::WARN, error = %err, "Commit lost a concurrent update");
    } else {
        event!(Level::ERROR, error = %err, "Commit failed");
    }
}
