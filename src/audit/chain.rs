//! SHA-256 hash chain over a module's audit entries.
//!
//! Each entry commits to its own fields and to the hash of its predecessor,
//! so rewriting or dropping any historical entry changes every later hash.

use crate::core::{
    ActorId, AuditAction, AuditDraft, AuditEntry, AuditOutcome, ModuleId, Result, Role,
    VersionNumber, WorkflowError, WorkflowState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// `prev_hash` of the first entry in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Serialize)]
struct HashInput<'a> {
    module_id: &'a ModuleId,
    sequence: u64,
    action: AuditAction,
    version: Option<VersionNumber>,
    observed_version: Option<VersionNumber>,
    actor: &'a ActorId,
    role: Role,
    from_state: Option<WorkflowState>,
    to_state: WorkflowState,
    timestamp: &'a DateTime<Utc>,
    outcome: AuditOutcome,
    reason: Option<&'a str>,
    comment: Option<&'a str>,
    prev_hash: &'a str,
}

pub fn compute_hash(entry: &AuditEntry) -> Result<String> {
    let input = HashInput {
        module_id: &entry.module_id,
        sequence: entry.sequence,
        action: entry.action,
        version: entry.version,
        observed_version: entry.observed_version,
        actor: &entry.actor,
        role: entry.role,
        from_state: entry.from_state,
        to_state: entry.to_state,
        timestamp: &entry.timestamp,
        outcome: entry.outcome,
        reason: entry.reason.as_deref(),
        comment: entry.comment.as_deref(),
        prev_hash: &entry.prev_hash,
    };
    let bytes = serde_json::to_vec(&input)
        .map_err(|e| WorkflowError::Serialization(format!("Failed to encode audit entry: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Turns a draft into the next link of the chain after `previous`.
///
/// The timestamp never goes backwards relative to `previous`, keeping the
/// chain time-ordered even if the wall clock steps back.
pub fn seal(
    module_id: ModuleId,
    draft: AuditDraft,
    version: Option<VersionNumber>,
    previous: Option<&AuditEntry>,
    now: DateTime<Utc>,
) -> Result<AuditEntry> {
    let (sequence, prev_hash, timestamp) = match previous {
        Some(prev) => (prev.sequence + 1, prev.hash.clone(), now.max(prev.timestamp)),
        None => (1, GENESIS_HASH.to_string(), now),
    };

    let mut entry = AuditEntry {
        module_id,
        sequence,
        action: draft.action,
        version,
        observed_version: draft.observed_version,
        actor: draft.actor,
        role: draft.role,
        from_state: draft.from_state,
        to_state: draft.to_state,
        timestamp,
        outcome: draft.outcome,
        reason: draft.reason,
        comment: draft.comment,
        prev_hash,
        hash: String::new(),
    };
    entry.hash = compute_hash(&entry)?;
    Ok(entry)
}

/// Recomputes the chain and reports the first entry that does not verify.
pub fn verify<'a, I>(module_id: ModuleId, entries: I) -> Result<u64>
where
    I: IntoIterator<Item = &'a AuditEntry>,
{
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut expected_sequence = 1u64;

    for entry in entries {
        let broken = entry.module_id != module_id
            || entry.sequence != expected_sequence
            || entry.prev_hash != expected_prev
            || compute_hash(entry)? != entry.hash;
        if broken {
            return Err(WorkflowError::AuditChainBroken {
                module_id,
                sequence: expected_sequence,
            });
        }
        expected_prev = entry.hash.clone();
        expected_sequence += 1;
    }

    Ok(expected_sequence - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn chain(module_id: ModuleId, len: usize) -> Vec<AuditEntry> {
        let now = Utc::now();
        let mut entries: Vec<AuditEntry> = Vec::new();
        for i in 0..len {
            let draft = AuditDraft::accepted(
                AuditAction::Edit,
                ActorId::new("owner"),
                Role::ModuleOwner,
                Some(WorkflowState::Draft),
                WorkflowState::Draft,
            );
            let entry = seal(module_id, draft, Some(i as u32 + 1), entries.last(), now).unwrap();
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_first_entry_links_to_genesis() {
        let id = ModuleId::new();
        let entries = chain(id, 1);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert_eq!(entries[0].hash.len(), 64);
    }

    #[test]
    fn test_intact_chain_verifies() {
        let id = ModuleId::new();
        let entries = chain(id, 4);
        assert_eq!(verify(id, &entries).unwrap(), 4);
        assert_eq!(verify(id, Vec::<AuditEntry>::new().iter()).unwrap(), 0);
    }

    #[test]
    fn test_tampered_field_breaks_chain() {
        let id = ModuleId::new();
        let mut entries = chain(id, 3);
        entries[1].outcome = AuditOutcome::Denied;
        let err = verify(id, &entries).unwrap_err();
        assert!(matches!(err, WorkflowError::AuditChainBroken { sequence: 2, .. }));
    }

    #[test]
    fn test_dropped_entry_breaks_chain() {
        let id = ModuleId::new();
        let mut entries = chain(id, 3);
        entries.remove(1);
        let err = verify(id, &entries).unwrap_err();
        assert!(matches!(err, WorkflowError::AuditChainBroken { sequence: 2, .. }));
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let id = ModuleId::new();
        let first = chain(id, 1).remove(0);
        let earlier = first.timestamp - Duration::seconds(30);
        let draft = AuditDraft::denied(
            AuditAction::Transition,
            ActorId::new("eo"),
            Role::ExaminationOffice,
            Some(WorkflowState::Draft),
            WorkflowState::Approval,
            "illegal",
        );
        let second = seal(id, draft, None, Some(&first), earlier).unwrap();
        assert_eq!(second.timestamp, first.timestamp);
        assert_eq!(second.prev_hash, first.hash);
    }
}
