use super::engine::{Committed, ModuleRegistration, ModuleRepository, VersionCommit};
use super::persistence::{PersistenceManager, WalEntry};
use crate::audit::chain;
use crate::config::EngineConfig;
use crate::core::{
    AuditDraft, AuditEntry, ModuleId, ModuleRecord, ModuleSummary, ModuleVersion, Result,
    VersionNumber, WorkflowError, WorkflowState,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{Level, event};

/// One-shot fault injected into the next write, for exercising the
/// all-or-nothing guarantee of `commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// The version is staged but its audit entry has not been sealed.
    AfterVersionStaged,
    /// Everything is staged; the log frame has not been written.
    BeforeLog,
    /// Half of the log frame reaches the file, then the write fails.
    TornLog,
}

impl FailPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            FailPoint::AfterVersionStaged => "after_version_staged",
            FailPoint::BeforeLog => "before_log",
            FailPoint::TornLog => "torn_log",
        }
    }
}

#[derive(Default)]
struct Catalog {
    modules: HashMap<ModuleId, Arc<RwLock<ModuleRecord>>>,
    numbers: HashMap<String, ModuleId>,
}

/// Module histories kept in memory, optionally backed by a WAL and snapshots.
///
/// Each module has its own lock, so work on different modules never waits on
/// each other. With persistence enabled, writers are additionally ordered by
/// the single log file.
pub struct InMemoryRepository {
    catalog: RwLock<Catalog>,
    persistence: Option<Mutex<PersistenceManager>>,
    fail_point: std::sync::Mutex<Option<FailPoint>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            persistence: None,
            fail_point: std::sync::Mutex::new(None),
        }
    }

    /// Recovers whatever the manager's directory holds and keeps logging to it.
    pub fn with_persistence(mut manager: PersistenceManager) -> Result<Self> {
        let mut catalog = Catalog::default();
        if let Some(modules) = manager.recover()? {
            for (module_id, record) in modules {
                chain::verify(module_id, record.audit.iter())?;
                catalog.numbers.insert(record.module_number.clone(), module_id);
                catalog.modules.insert(module_id, Arc::new(RwLock::new(record)));
            }
        }

        event!(
            Level::INFO,
            durability = manager.durability_mode().as_str(),
            wal = %manager.wal().path().display(),
            modules = catalog.modules.len(),
            "Opened persistent module repository"
        );
        Ok(Self {
            catalog: RwLock::new(catalog),
            persistence: Some(Mutex::new(manager)),
            fail_point: std::sync::Mutex::new(None),
        })
    }

    pub fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        match config.data_dir.as_deref() {
            Some(dir) if config.durability.is_persistent() => {
                let manager = PersistenceManager::new(dir, config.durability)?
                    .with_checkpoint_threshold(config.checkpoint_every);
                Self::with_persistence(manager)
            }
            _ => Ok(Self::new()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    pub fn inject_failure(&self, point: FailPoint) -> Result<()> {
        *self.fail_point.lock()? = Some(point);
        Ok(())
    }

    /// Writes a snapshot of every module and truncates the log. Returns the
    /// number of modules written.
    pub async fn checkpoint(&self) -> Result<usize> {
        let Some(mut persistence) = self.lock_persistence().await else {
            return Ok(0);
        };
        let modules = self.collect_records().await;
        let count = persistence.checkpoint(modules)?;
        event!(Level::INFO, modules = count, "Checkpoint written");
        Ok(count)
    }

    async fn lock_persistence(&self) -> Option<MutexGuard<'_, PersistenceManager>> {
        match &self.persistence {
            Some(persistence) => Some(persistence.lock().await),
            None => None,
        }
    }

    async fn handle(&self, module_id: ModuleId) -> Result<Arc<RwLock<ModuleRecord>>> {
        self.catalog
            .read()
            .await
            .modules
            .get(&module_id)
            .cloned()
            .ok_or_else(|| WorkflowError::module_not_found(module_id))
    }

    async fn collect_records(&self) -> Vec<ModuleRecord> {
        let handles: Vec<_> = self.catalog.read().await.modules.values().cloned().collect();
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            records.push(handle.read().await.clone());
        }
        records
    }

    fn fires(&self, point: FailPoint) -> Result<bool> {
        let mut pending = self.fail_point.lock()?;
        if *pending == Some(point) {
            *pending = None;
            event!(Level::WARN, fail_point = point.as_str(), "Injected fault triggered");
            return Ok(true);
        }
        Ok(false)
    }

    fn trip(&self, point: FailPoint) -> Result<()> {
        if self.fires(point)? {
            return Err(injected(point));
        }
        Ok(())
    }

    fn write_ahead(
        &self,
        persistence: Option<&mut PersistenceManager>,
        entry: &WalEntry,
    ) -> Result<()> {
        self.trip(FailPoint::BeforeLog)?;
        let torn = self.fires(FailPoint::TornLog)?;
        match persistence {
            Some(persistence) if torn => {
                persistence.log_torn(entry)?;
                Err(injected(FailPoint::TornLog))
            }
            Some(persistence) => persistence.log(entry),
            None if torn => Err(injected(FailPoint::TornLog)),
            None => Ok(()),
        }
    }

    async fn register(
        &self,
        persistence: Option<&mut PersistenceManager>,
        module_id: ModuleId,
        registration: Option<ModuleRegistration>,
        version: ModuleVersion,
        draft: AuditDraft,
    ) -> Result<Committed> {
        let mut catalog = self.catalog.write().await;
        if let Some(existing) = catalog.modules.get(&module_id) {
            let actual = existing.read().await.latest_number();
            return Err(WorkflowError::VersionConflict {
                module_id,
                expected: None,
                actual,
            });
        }
        let registration = registration.ok_or_else(|| {
            WorkflowError::Storage(format!("Module '{}' committed without registration", module_id))
        })?;
        if catalog.numbers.contains_key(&registration.module_number) {
            return Err(WorkflowError::AlreadyExists(format!(
                "Module number '{}' is already registered",
                registration.module_number
            )));
        }

        let mut record = ModuleRecord::new(
            module_id,
            registration.module_number.clone(),
            registration.owner.clone(),
            version.created_at,
        );
        record.push_version(version.clone())?;
        self.trip(FailPoint::AfterVersionStaged)?;
        let audit = chain::seal(module_id, draft, Some(version.number), None, Utc::now())?;
        record.push_audit(audit.clone())?;

        self.write_ahead(
            persistence,
            &WalEntry::Create {
                module_id,
                module_number: registration.module_number.clone(),
                owner: registration.owner,
                created_at: record.created_at,
                version: version.clone(),
                audit: audit.clone(),
            },
        )?;

        catalog.numbers.insert(registration.module_number, module_id);
        catalog.modules.insert(module_id, Arc::new(RwLock::new(record)));
        Ok(Committed { version, audit })
    }

    async fn extend(
        &self,
        persistence: Option<&mut PersistenceManager>,
        module_id: ModuleId,
        expected: VersionNumber,
        version: ModuleVersion,
        draft: AuditDraft,
    ) -> Result<Committed> {
        let handle = self.handle(module_id).await?;
        let mut record = handle.write().await;

        let actual = record.latest_number();
        if actual != Some(expected) {
            return Err(WorkflowError::VersionConflict {
                module_id,
                expected: Some(expected),
                actual,
            });
        }

        // Staged on a copy; the shared record only changes once the frame is logged.
        let mut next = record.clone();
        next.push_version(version.clone())?;
        self.trip(FailPoint::AfterVersionStaged)?;
        let audit = chain::seal(
            module_id,
            draft,
            Some(version.number),
            next.last_audit(),
            Utc::now(),
        )?;
        next.push_audit(audit.clone())?;

        self.write_ahead(
            persistence,
            &WalEntry::Commit {
                version: version.clone(),
                audit: audit.clone(),
            },
        )?;
        *record = next;
        Ok(Committed { version, audit })
    }

    async fn maybe_checkpoint(&self, persistence: Option<MutexGuard<'_, PersistenceManager>>) {
        let Some(mut persistence) = persistence else {
            return;
        };
        if !persistence.needs_checkpoint() {
            return;
        }
        let modules = self.collect_records().await;
        match persistence.checkpoint(modules) {
            Ok(count) => event!(Level::INFO, modules = count, "Automatic checkpoint written"),
            // The commit itself is already durable in the log.
            Err(e) => event!(Level::WARN, error = %e, "Automatic checkpoint failed"),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn injected(point: FailPoint) -> WorkflowError {
    WorkflowError::Storage(format!("injected fault: {}", point.as_str()))
}

#[async_trait]
impl ModuleRepository for InMemoryRepository {
    async fn commit(&self, commit: VersionCommit) -> Result<Committed> {
        let VersionCommit {
            module_id,
            expected_latest,
            registration,
            version,
            audit,
        } = commit;
        if version.module_id != module_id {
            return Err(WorkflowError::Storage(format!(
                "Version of module '{}' committed under '{}'",
                version.module_id, module_id
            )));
        }

        let mut persistence = self.lock_persistence().await;
        let committed = match expected_latest {
            None => {
                self.register(persistence.as_deref_mut(), module_id, registration, version, audit)
                    .await?
            }
            Some(expected) => {
                self.extend(persistence.as_deref_mut(), module_id, expected, version, audit)
                    .await?
            }
        };
        event!(
            Level::DEBUG,
            module_id = %module_id,
            version = committed.version.number,
            state = committed.version.state.as_str(),
            "Committed module version"
        );

        self.maybe_checkpoint(persistence).await;
        Ok(committed)
    }

    async fn append_audit(&self, module_id: ModuleId, draft: AuditDraft) -> Result<AuditEntry> {
        let mut persistence = self.lock_persistence().await;
        let handle = self.handle(module_id).await?;
        let audit = {
            let mut record = handle.write().await;
            let mut next = record.clone();
            let audit = chain::seal(module_id, draft, None, next.last_audit(), Utc::now())?;
            next.push_audit(audit.clone())?;
            self.write_ahead(persistence.as_deref_mut(), &WalEntry::Audit(audit.clone()))?;
            *record = next;
            audit
        };

        self.maybe_checkpoint(persistence).await;
        Ok(audit)
    }

    async fn load(&self, module_id: ModuleId) -> Result<Option<ModuleRecord>> {
        let handle = self.catalog.read().await.modules.get(&module_id).cloned();
        match handle {
            Some(handle) => Ok(Some(handle.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn scan_state(&self, state: WorkflowState) -> Result<Vec<ModuleSummary>> {
        let handles: Vec<_> = self.catalog.read().await.modules.values().cloned().collect();
        let mut matching = Vec::new();
        for handle in handles {
            let record = handle.read().await;
            if let Some(summary) = record.summary().filter(|s| s.state == state) {
                matching.push(summary);
            }
        }
        matching.sort_by(|a, b| a.module_number.cmp(&b.module_number));
        Ok(matching)
    }

    async fn find_by_number(&self, module_number: &str) -> Result<Option<ModuleId>> {
        Ok(self.catalog.read().await.numbers.get(module_number).copied())
    }

    async fn module_count(&self) -> usize {
        self.catalog.read().await.modules.len()
    }
}
