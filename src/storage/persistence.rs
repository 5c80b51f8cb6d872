//! Write-ahead log and snapshot persistence for the module repository.
//!
//! Every committed change is one WAL frame: a little-endian `u32` length
//! followed by the MessagePack-encoded [`WalEntry`]. A frame is the unit of
//! atomicity. A version and the audit entry describing it always share one
//! frame, so recovery can never see one without the other.

use crate::core::{
    ActorId, AuditEntry, ModuleId, ModuleRecord, ModuleVersion, Result, WorkflowError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{Level, event};

pub const WAL_FILE_NAME: &str = "modflow.wal";
pub const SNAPSHOT_FILE_NAME: &str = "modflow.snapshot";
pub const DEFAULT_CHECKPOINT_THRESHOLD: usize = 1000;

const SNAPSHOT_FORMAT: u32 = 1;
const FRAME_HEADER_LEN: usize = 4;

// ============================================================================
// WAL Entry Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    /// Registration of a new module together with its first version.
    Create {
        module_id: ModuleId,
        module_number: String,
        owner: ActorId,
        created_at: DateTime<Utc>,
        version: ModuleVersion,
        audit: AuditEntry,
    },
    /// A new version and the audit entry that produced it.
    Commit {
        version: ModuleVersion,
        audit: AuditEntry,
    },
    /// An audit entry without a version (a denied attempt).
    Audit(AuditEntry),
}

impl WalEntry {
    pub fn module_id(&self) -> ModuleId {
        match self {
            WalEntry::Create { module_id, .. } => *module_id,
            WalEntry::Commit { audit, .. } | WalEntry::Audit(audit) => audit.module_id,
        }
    }

    fn audit(&self) -> &AuditEntry {
        match self {
            WalEntry::Create { audit, .. }
            | WalEntry::Commit { audit, .. }
            | WalEntry::Audit(audit) => audit,
        }
    }
}

// ============================================================================
// Repository Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub format: u32,
    pub created_at: DateTime<Utc>,
    pub modules: Vec<ModuleRecord>,
}

impl RepositorySnapshot {
    pub fn new(mut modules: Vec<ModuleRecord>) -> Self {
        modules.sort_by_key(|m| m.module_id);
        Self {
            format: SNAPSHOT_FORMAT,
            created_at: Utc::now(),
            modules,
        }
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync after every frame.
    Sync,
    /// Flush to the OS after every frame.
    #[default]
    Async,
    /// Nothing is written to disk.
    None,
}

impl DurabilityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DurabilityMode::Sync => "sync",
            DurabilityMode::Async => "async",
            DurabilityMode::None => "none",
        }
    }

    pub fn is_persistent(self) -> bool {
        self != DurabilityMode::None
    }
}

impl FromStr for DurabilityMode {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(DurabilityMode::Sync),
            "async" => Ok(DurabilityMode::Async),
            "none" | "memory" => Ok(DurabilityMode::None),
            other => Err(WorkflowError::Config(format!(
                "Unknown durability mode '{}' (expected sync, async or none)",
                other
            ))),
        }
    }
}

// ============================================================================
// WAL Manager
// ============================================================================

/// Result of scanning the log on startup.
#[derive(Debug, Default)]
pub struct WalReplay {
    pub entries: Vec<WalEntry>,
    /// Length of the well-formed prefix of the file.
    pub valid_len: u64,
    /// Bytes after `valid_len` that belong to an incomplete final frame.
    pub discarded_bytes: u64,
}

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<File>,
    durability_mode: DurabilityMode,
    /// End of the last complete frame. Anything past it is garbage from a
    /// failed write and is cut off before the next append.
    committed_len: u64,
    dirty: bool,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WorkflowError::Storage(format!("Failed to create WAL directory: {}", e))
            })?;
        }

        let (wal_file, committed_len) = if durability_mode.is_persistent() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&wal_path)
                .map_err(|e| WorkflowError::Storage(format!("Failed to open WAL file: {}", e)))?;
            let len = file
                .metadata()
                .map_err(|e| WorkflowError::Storage(format!("Failed to stat WAL file: {}", e)))?
                .len();
            (Some(file), len)
        } else {
            (None, 0)
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            committed_len,
            dirty: false,
            entries_since_checkpoint: 0,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if !self.durability_mode.is_persistent() {
            return Ok(());
        }
        let frame = encode_frame(entry)?;
        self.discard_uncommitted()?;

        let sync = self.durability_mode == DurabilityMode::Sync;
        let fail_sync = self.take_sync_failure();
        let file = self.file()?;
        if let Err(e) = write_frame(file, &frame, sync, fail_sync) {
            // A frame that was not both written and synced is not committed.
            self.dirty = true;
            let _ = self.discard_uncommitted();
            return Err(e);
        }

        self.committed_len += frame.len() as u64;
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Writes only the first half of the frame, the way a crash in the
    /// middle of a write would leave it.
    pub(crate) fn append_torn(&mut self, entry: &WalEntry) -> Result<()> {
        if !self.durability_mode.is_persistent() {
            return Ok(());
        }
        let frame = encode_frame(entry)?;
        self.discard_uncommitted()?;

        let cut = (frame.len() / 2).max(1);
        let file = self.file()?;
        file.write_all(&frame[..cut])
            .and_then(|_| file.flush())
            .map_err(|e| WorkflowError::Storage(format!("Failed to write WAL: {}", e)))?;
        self.dirty = true;
        Ok(())
    }

    pub fn read_all(&self) -> Result<WalReplay> {
        if !self.wal_path.exists() {
            return Ok(WalReplay::default());
        }
        let mut file = File::open(&self.wal_path).map_err(|e| {
            WorkflowError::Storage(format!("Failed to open WAL for reading: {}", e))
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| WorkflowError::Storage(format!("Failed to read WAL: {}", e)))?;

        decode_frames(&data)
    }

    /// Cuts the file back to `len`, dropping an incomplete tail.
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        if let Some(file) = self.wal_file.as_mut() {
            file.set_len(len)
                .map_err(|e| WorkflowError::Storage(format!("Failed to truncate WAL: {}", e)))?;
        }
        self.committed_len = len;
        self.dirty = false;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        if !self.durability_mode.is_persistent() {
            return Ok(());
        }
        self.truncate_to(0)?;
        if self.durability_mode == DurabilityMode::Sync {
            self.file()?
                .sync_all()
                .map_err(|e| WorkflowError::Storage(format!("Failed to sync WAL: {}", e)))?;
        }
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.checkpoint_threshold > 0 && self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold;
    }

    pub fn path(&self) -> &Path {
        &self.wal_path
    }

    fn file(&mut self) -> Result<&mut File> {
        self.wal_file
            .as_mut()
            .ok_or_else(|| WorkflowError::Storage("WAL file not initialized".to_string()))
    }

    /// Makes the next synced append fail after its frame reached the file.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    #[cfg(test)]
    fn take_sync_failure(&mut self) -> bool {
        std::mem::take(&mut self.fail_next_sync)
    }

    #[cfg(not(test))]
    fn take_sync_failure(&mut self) -> bool {
        false
    }

    fn discard_uncommitted(&mut self) -> Result<()> {
        if self.dirty {
            self.truncate_to(self.committed_len)?;
        }
        Ok(())
    }
}

fn write_frame(file: &mut File, frame: &[u8], sync: bool, fail_sync: bool) -> Result<()> {
    file.write_all(frame)
        .and_then(|_| file.flush())
        .map_err(|e| WorkflowError::Storage(format!("Failed to write WAL: {}", e)))?;
    if sync {
        let synced = if fail_sync {
            Err(io::Error::other("injected sync failure"))
        } else {
            file.sync_all()
        };
        synced.map_err(|e| WorkflowError::Storage(format!("Failed to sync WAL: {}", e)))?;
    }
    Ok(())
}

fn encode_frame(entry: &WalEntry) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(entry)
        .map_err(|e| {
            WorkflowError::Serialization(format!("Failed to serialize WAL entry: {}", e))
        })?;
    let len = u32::try_from(payload.len())
        .map_err(|_| WorkflowError::Storage("WAL entry exceeds frame size limit".to_string()))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// A frame that runs past the end of the data, or fails to decode while being
/// the last one, is a torn write and is dropped. A bad frame followed by more
/// data is corruption.
fn decode_frames(data: &[u8]) -> Result<WalReplay> {
    let mut replay = WalReplay::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let Some(header) = data.get(offset..offset + FRAME_HEADER_LEN) else {
            break;
        };
        let mut len_bytes = [0u8; FRAME_HEADER_LEN];
        len_bytes.copy_from_slice(header);
        let end = offset + FRAME_HEADER_LEN + u32::from_le_bytes(len_bytes) as usize;
        if end > data.len() {
            break;
        }

        match rmp_serde::from_slice::<WalEntry>(&data[offset + FRAME_HEADER_LEN..end]) {
            Ok(entry) => replay.entries.push(entry),
            Err(_) if end == data.len() => break,
            Err(e) => {
                return Err(WorkflowError::Storage(format!(
                    "Corrupt WAL frame at offset {}: {}",
                    offset, e
                )));
            }
        }
        offset = end;
    }

    replay.valid_len = offset as u64;
    replay.discarded_bytes = (data.len() - offset) as u64;
    Ok(replay)
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Writes to a temp file in the same directory, then renames it over the
    /// previous snapshot.
    pub fn save(&self, snapshot: &RepositorySnapshot) -> Result<()> {
        let parent = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).map_err(|e| {
            WorkflowError::Storage(format!("Failed to create snapshot directory: {}", e))
        })?;

        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| {
                WorkflowError::Serialization(format!("Failed to serialize snapshot: {}", e))
            })?;
        let mut temp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| WorkflowError::Storage(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&serialized)
            .map_err(|e| WorkflowError::Storage(format!("Failed to write snapshot: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| WorkflowError::Storage(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| WorkflowError::Storage(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<RepositorySnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.snapshot_path)
            .map_err(|e| WorkflowError::Storage(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: RepositorySnapshot = rmp_serde::from_slice(&data).map_err(|e| {
            WorkflowError::Serialization(format!("Failed to deserialize snapshot: {}", e))
        })?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(WorkflowError::Storage(format!(
                "Unsupported snapshot format {}",
                snapshot.format
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE_NAME), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE_NAME));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn with_checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.wal.set_checkpoint_threshold(threshold);
        self
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub(crate) fn log_torn(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append_torn(entry)
    }

    pub fn checkpoint(&mut self, modules: Vec<ModuleRecord>) -> Result<usize> {
        if !self.durability_mode.is_persistent() {
            return Ok(0);
        }
        let snapshot = RepositorySnapshot::new(modules);
        let count = snapshot.module_count();
        self.snapshot.save(&snapshot)?;
        self.wal.clear()?;
        Ok(count)
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Loads the snapshot and replays the log on top of it.
    ///
    /// A torn final frame is cut from the file so later appends start on a
    /// frame boundary.
    pub fn recover(&mut self) -> Result<Option<HashMap<ModuleId, ModuleRecord>>> {
        let snapshot = self.snapshot.load()?;
        let had_snapshot = snapshot.is_some();
        let mut modules: HashMap<ModuleId, ModuleRecord> = snapshot
            .map(|s| s.modules.into_iter().map(|m| (m.module_id, m)).collect())
            .unwrap_or_default();

        let replay = self.wal.read_all()?;
        if replay.discarded_bytes > 0 {
            event!(
                Level::WARN,
                path = %self.wal.path().display(),
                discarded_bytes = replay.discarded_bytes,
                "Discarding incomplete WAL tail"
            );
            self.wal.truncate_to(replay.valid_len)?;
        }
        if !had_snapshot && replay.entries.is_empty() {
            return Ok(None);
        }

        let replayed = replay.entries.len();
        for entry in replay.entries {
            apply_entry(&mut modules, entry)?;
        }
        event!(
            Level::INFO,
            modules = modules.len(),
            replayed,
            "Recovered module repository"
        );
        Ok(Some(modules))
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

/// Entries already covered by the snapshot (a crash between snapshot rename
/// and log truncation) are skipped.
fn apply_entry(modules: &mut HashMap<ModuleId, ModuleRecord>, entry: WalEntry) -> Result<()> {
    let module_id = entry.module_id();
    let sequence = entry.audit().sequence;
    if let Some(record) = modules.get(&module_id) {
        if record.last_audit().is_some_and(|a| a.sequence >= sequence) {
            return Ok(());
        }
    }

    match entry {
        WalEntry::Create {
            module_id,
            module_number,
            owner,
            created_at,
            version,
            audit,
        } => {
            let mut record = ModuleRecord::new(module_id, module_number, owner, created_at);
            record.push_version(version)?;
            record.push_audit(audit)?;
            modules.insert(module_id, record);
        }
        WalEntry::Commit { version, audit } => {
            let record = modules.get_mut(&module_id).ok_or_else(|| {
                WorkflowError::Storage(format!("WAL references unknown module '{}'", module_id))
            })?;
            record.push_version(version)?;
            record.push_audit(audit)?;
        }
        WalEntry::Audit(audit) => {
            let record = modules.get_mut(&module_id).ok_or_else(|| {
                WorkflowError::Storage(format!("WAL references unknown module '{}'", module_id))
            })?;
            record.push_audit(audit)?;
        }
    }
    Ok(())
}
