// ============================================================================
// Fixed Workflow Graph
// ============================================================================
//
// Draft      -> InReview   | Withdrawn
// InReview   -> Validation | Rejected | Withdrawn
// Validation -> Approval   | Rejected | Withdrawn
// Approval   -> Released   | Rejected | Withdrawn
// Rejected   -> Draft      | Withdrawn
// Released, Withdrawn: terminal
//
// The Admin "new revision" edit out of Released is not an edge of this
// graph; it is a `propose_edit`, never a `request_transition`.
// ============================================================================

use crate::core::WorkflowState;

/// Direct successors of `state` reachable through `request_transition`.
pub fn successors(state: WorkflowState) -> &'static [WorkflowState] {
    use WorkflowState::{Approval, Draft, InReview, Rejected, Released, Validation, Withdrawn};

    match state {
        Draft => &[InReview, Withdrawn],
        InReview => &[Validation, Rejected, Withdrawn],
        Validation => &[Approval, Rejected, Withdrawn],
        Approval => &[Released, Rejected, Withdrawn],
        Rejected => &[Draft, Withdrawn],
        Released | Withdrawn => &[],
    }
}

#[inline]
pub fn is_edge(from: WorkflowState, to: WorkflowState) -> bool {
    successors(from).contains(&to)
}

/// Every edge of the graph, in declaration order.
pub fn edges() -> impl Iterator<Item = (WorkflowState, WorkflowState)> {
    WorkflowState::ALL
        .into_iter()
        .flat_map(|from| successors(from).iter().map(move |to| (from, *to)))
}

/// State produced by a payload edit issued while the module is in `state`,
/// or `None` when the state admits no edit at all.
pub fn edit_target(state: WorkflowState) -> Option<WorkflowState> {
    match state {
        WorkflowState::Draft | WorkflowState::Rejected => Some(state),
        WorkflowState::Released => Some(WorkflowState::Draft),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowState::*;

    #[test]
    fn test_happy_path_is_a_chain() {
        assert!(is_edge(Draft, InReview));
        assert!(is_edge(InReview, Validation));
        assert!(is_edge(Validation, Approval));
        assert!(is_edge(Approval, Released));
    }

    #[test]
    fn test_skipping_a_stage_is_not_an_edge() {
        assert!(!is_edge(InReview, Approval));
        assert!(!is_edge(Draft, Released));
        assert!(!is_edge(Draft, Rejected));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        for state in WorkflowState::ALL {
            assert_eq!(successors(state).is_empty(), state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn test_withdrawn_reachable_from_every_non_terminal_state() {
        for state in WorkflowState::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(is_edge(state, Withdrawn), "{state}");
        }
    }

    #[test]
    fn test_rejected_only_returns_to_draft() {
        assert_eq!(successors(Rejected), &[Draft, Withdrawn]);
        assert_eq!(edges().count(), 13);
    }

    #[test]
    fn test_edit_targets() {
        assert_eq!(edit_target(Draft), Some(Draft));
        assert_eq!(edit_target(Rejected), Some(Rejected));
        assert_eq!(edit_target(Released), Some(Draft));
        assert_eq!(edit_target(Validation), None);
        assert_eq!(edit_target(Withdrawn), None);
    }
}
