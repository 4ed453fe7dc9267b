use serde::{Deserialize, Serialize};

use super::domain::{CaseId, TaskId};
use super::repository::RepositoryError;
use super::task::TaskStatus;
use super::workload::WorkloadError;

/// Malformed input rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("rule name must not be empty")]
    EmptyRuleName,
    #[error("unknown condition operator '{operator}'")]
    UnknownOperator { operator: String },
    #[error("unknown condition logic '{logic}' (expected AND or OR)")]
    UnknownLogic { logic: String },
    #[error("unknown action type '{kind}'")]
    UnknownActionType { kind: String },
    #[error("action #{index} has an empty target")]
    EmptyActionTarget { index: usize },
    #[error("action target '{target}' is not a comma-separated id list or 'same_region'")]
    InvalidActionTarget { target: String },
    #[error("'same_region' is only valid for assign_mediation_center actions")]
    RegionTargetOnMediator,
    #[error("a rule needs at least one action")]
    NoActions,
    #[error("unknown status '{status}'")]
    UnknownStatus { status: String },
    #[error("unknown assignment strategy '{name}'")]
    UnknownStrategy { name: String },
    #[error("batch size must be positive (got {value})")]
    BatchSize { value: i64 },
    #[error("max cases per mediator must be positive (got {value})")]
    MaxCasesPerMediator { value: i64 },
    #[error("no cases supplied")]
    EmptyCaseList,
    #[error("case {case} appears more than once in the batch")]
    DuplicateCase { case: CaseId },
    #[error("manual assignment needs a mediator or a mediation center")]
    MissingAssignmentTarget,
    #[error("pending assignment has no target mediator to approve")]
    PendingWithoutTarget,
    #[error("the manual strategy does not run as a task")]
    ManualStrategyTask,
}

/// Lifecycle operation names, used to report rejected transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Start,
    Pause,
    Resume,
    Cancel,
    Process,
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskAction::Start => "start",
            TaskAction::Pause => "pause",
            TaskAction::Resume => "resume",
            TaskAction::Cancel => "cancel",
            TaskAction::Process => "process",
        };
        f.write_str(label)
    }
}

/// Operation-level failures. Anything here means the call itself failed,
/// as opposed to a single case that could not be placed.
#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("batch of {requested} cases exceeds the configured batch size of {batch_size}")]
    BatchSizeExceeded { batch_size: u32, requested: usize },
    #[error("cannot {action} task {task} while it is {from}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        action: TaskAction,
    },
    #[error("pending assignment {request} was already {status}")]
    AlreadyReviewed { request: u64, status: &'static str },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("rule {rule} is active and referenced by a running rule_based task")]
    RuleInUse { rule: u64 },
    /// A direct placement (manual assignment or approval) found no room.
    #[error(transparent)]
    Capacity(#[from] WorkloadError),
    #[error("data access failed: {0}")]
    DataAccess(#[from] RepositoryError),
}

impl AssignmentError {
    pub(crate) fn not_found(entity: &'static str, id: u64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// Reason a single case was not assigned. Recorded on the result, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum CaseFailure {
    #[error("no matching rule/strategy")]
    NoMatch,
    #[error("capacity exceeded")]
    CapacityExceeded,
    #[error("case not found")]
    CaseNotFound,
    #[error("case already assigned")]
    AlreadyAssigned,
    #[error("requires manual review")]
    ReviewRequired,
}
