//! Role-based access control over workflow edges.
//!
//! The policy is a pure lookup table keyed by `(role, from, to)`. Anything
//! that is not explicitly allowed is denied, so every possible input has a
//! defined answer and the lookup never fails.

pub mod graph;

use crate::core::{Result, Role, WorkflowError, WorkflowState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    #[inline]
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// One allow rule as written in a policy document.
///
/// An omitted `from` or `to` matches every state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<WorkflowState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<WorkflowState>,
}

impl PolicyRule {
    pub fn edge(role: Role, from: WorkflowState, to: WorkflowState) -> Self {
        Self {
            role,
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn any(role: Role) -> Self {
        Self {
            role,
            from: None,
            to: None,
        }
    }
}

/// Serializable form of the permission table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub creators: Vec<Role>,
    pub rules: Vec<PolicyRule>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        use Role::{Admin, Deanery, ExaminationOffice, ModuleOwner, ProgramCoordinator};
        use WorkflowState::{Approval, Draft, InReview, Rejected, Released, Validation, Withdrawn};

        Self {
            creators: vec![ModuleOwner, Admin],
            rules: vec![
                // Edits keep the state; submitting, reworking and withdrawing move it.
                PolicyRule::edge(ModuleOwner, Draft, Draft),
                PolicyRule::edge(ModuleOwner, Rejected, Rejected),
                PolicyRule::edge(ModuleOwner, Draft, InReview),
                PolicyRule::edge(ModuleOwner, Rejected, Draft),
                PolicyRule::edge(ModuleOwner, Draft, Withdrawn),
                PolicyRule::edge(ModuleOwner, Rejected, Withdrawn),
                PolicyRule::edge(ProgramCoordinator, InReview, Validation),
                PolicyRule::edge(ProgramCoordinator, InReview, Rejected),
                PolicyRule::edge(ExaminationOffice, Validation, Approval),
                PolicyRule::edge(ExaminationOffice, Validation, Rejected),
                PolicyRule::edge(Deanery, Approval, Released),
                PolicyRule::edge(Deanery, Approval, Rejected),
                // Includes forced rejection and the Released -> Draft new revision.
                PolicyRule::any(Admin),
            ],
        }
    }
}

/// Compiled, immutable permission table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    allowed: HashSet<(Role, WorkflowState, WorkflowState)>,
    creators: HashSet<Role>,
}

impl AccessPolicy {
    pub fn from_document(document: &PolicyDocument) -> Self {
        let mut allowed = HashSet::new();
        for rule in &document.rules {
            for from in matching_states(rule.from) {
                for to in matching_states(rule.to) {
                    allowed.insert((rule.role, from, to));
                }
            }
        }

        Self {
            allowed,
            creators: document.creators.iter().copied().collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: PolicyDocument = serde_json::from_str(json)
            .map_err(|e| WorkflowError::Config(format!("Failed to parse policy document: {}", e)))?;
        Ok(Self::from_document(&document))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::Config(format!("Failed to read policy '{}': {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Total: every `(role, from, to)` maps to a decision.
    pub fn decide(&self, role: Role, from: WorkflowState, to: WorkflowState) -> Decision {
        if self.allowed.contains(&(role, from, to)) {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    #[inline]
    pub fn is_allowed(&self, role: Role, from: WorkflowState, to: WorkflowState) -> bool {
        self.decide(role, from, to).is_allowed()
    }

    pub fn may_create(&self, role: Role) -> bool {
        self.creators.contains(&role)
    }

    /// Allowed edges for `role`, sorted for review.
    pub fn allowed_edges(&self, role: Role) -> Vec<(WorkflowState, WorkflowState)> {
        let edges: BTreeSet<_> = self
            .allowed
            .iter()
            .filter(|(r, _, _)| *r == role)
            .map(|(_, from, to)| (*from, *to))
            .collect();
        edges.into_iter().collect()
    }

    /// Expanded, explicit form of the table (one rule per allowed edge).
    pub fn to_document(&self) -> PolicyDocument {
        let mut creators: Vec<Role> = self.creators.iter().copied().collect();
        creators.sort();
        let rules = Role::ALL
            .into_iter()
            .flat_map(|role| {
                self.allowed_edges(role)
                    .into_iter()
                    .map(move |(from, to)| PolicyRule::edge(role, from, to))
            })
            .collect();
        PolicyDocument { creators, rules }
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::from_document(&PolicyDocument::default())
    }
}

fn matching_states(state: Option<WorkflowState>) -> Vec<WorkflowState> {
    match state {
        Some(state) => vec![state],
        None => WorkflowState::ALL.to_vec(),
    }
}
