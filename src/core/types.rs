use crate::core::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Per-module version number. The first version of every module is 1.
pub type VersionNumber = u32;

/// Stable identifier of a module across all of its versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub Uuid);

impl ModuleId {
    pub fn new() -> Self {
        ModuleId(Uuid::new_v4())
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModuleId {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(ModuleId)
            .map_err(|e| WorkflowError::InvalidPayload(format!("invalid module id '{}': {}", s, e)))
    }
}

/// Identity of an authenticated actor, as issued by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Workflow state of a single module version.
///
/// ```text
/// Draft ──> InReview ──> Validation ──> Approval ──> Released
///   ▲           │             │             │
///   │           └─────────────┴─────────────┴──> Rejected
///   └──────────────────────────────────────────────┘
///
/// every non-terminal state ──> Withdrawn
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Draft,
    InReview,
    Validation,
    Approval,
    Released,
    Rejected,
    Withdrawn,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 7] = [
        WorkflowState::Draft,
        WorkflowState::InReview,
        WorkflowState::Validation,
        WorkflowState::Approval,
        WorkflowState::Released,
        WorkflowState::Rejected,
        WorkflowState::Withdrawn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::InReview => "IN_REVIEW",
            Self::Validation => "VALIDATION",
            Self::Approval => "APPROVAL",
            Self::Released => "RELEASED",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Withdrawn)
    }

    /// States in which the payload may be edited in place of a new revision.
    #[inline]
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Rejected)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| WorkflowError::InvalidPayload(format!("unknown workflow state '{}'", s)))
    }
}

/// Role an actor acts in when performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Modulverantwortliche(r)
    ModuleOwner,
    /// Studiengangskoordination
    ProgramCoordinator,
    /// Prüfungsamt
    ExaminationOffice,
    /// Dekanat
    Deanery,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::ModuleOwner,
        Role::ProgramCoordinator,
        Role::ExaminationOffice,
        Role::Deanery,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModuleOwner => "MODULE_OWNER",
            Self::ProgramCoordinator => "PROGRAM_COORDINATOR",
            Self::ExaminationOffice => "EXAMINATION_OFFICE",
            Self::Deanery => "DEANERY",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| WorkflowError::InvalidPayload(format!("unknown role '{}'", s)))
    }
}

/// Authenticated actor as handed over by the auth layer. Always holds at
/// least one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    id: ActorId,
    name: String,
    roles: Vec<Role>,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, roles: Vec<Role>) -> Result<Self> {
        let id = ActorId::new(id);
        if roles.is_empty() {
            return Err(WorkflowError::InvalidPayload(format!(
                "actor '{}' must hold at least one role",
                id
            )));
        }
        let mut roles = roles;
        roles.sort();
        roles.dedup();
        Ok(Self {
            id,
            name: name.into(),
            roles,
        })
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    #[inline]
    pub fn holds(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_accepts_loose_spelling() {
        assert_eq!("in-review".parse::<WorkflowState>().unwrap(), WorkflowState::InReview);
        assert_eq!(" released ".parse::<WorkflowState>().unwrap(), WorkflowState::Released);
        assert!("published".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn test_state_serde_uses_screaming_case() {
        let json = serde_json::to_string(&WorkflowState::InReview).unwrap();
        assert_eq!(json, "\"IN_REVIEW\"");
        let role: Role = serde_json::from_str("\"EXAMINATION_OFFICE\"").unwrap();
        assert_eq!(role, Role::ExaminationOffice);
    }

    #[test]
    fn test_display_matches_as_str() {
        for state in WorkflowState::ALL {
            assert_eq!(state.to_string(), state.as_str());
        }
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_terminal_and_editable_states() {
        assert!(WorkflowState::Released.is_terminal());
        assert!(WorkflowState::Withdrawn.is_terminal());
        assert!(!WorkflowState::Rejected.is_terminal());
        assert!(WorkflowState::Rejected.is_editable());
        assert!(!WorkflowState::InReview.is_editable());
    }

    #[test]
    fn test_actor_roles_are_deduplicated() {
        let actor =
            Actor::new("u1", "Alice", vec![Role::Admin, Role::ModuleOwner, Role::Admin]).unwrap();
        assert_eq!(actor.roles(), &[Role::ModuleOwner, Role::Admin]);
        assert_eq!(actor.name(), "Alice");
        assert!(actor.holds(Role::Admin));
        assert!(!actor.holds(Role::Deanery));
    }

    #[test]
    fn test_actor_without_roles_is_rejected() {
        assert!(matches!(
            Actor::new("u1", "Alice", Vec::new()),
            Err(WorkflowError::InvalidPayload(_))
        ));
    }
}
