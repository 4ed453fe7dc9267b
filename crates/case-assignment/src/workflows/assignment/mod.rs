//! Intelligent case assignment.
//!
//! Pending debt-collection cases are routed to mediators either by
//! prioritized rules or by a load-aware policy, in batches that run as
//! pausable, cancellable tasks. Every processed case leaves an auditable
//! result. Case and mediator records are owned elsewhere and reached
//! through the collaborator traits in [`repository`].

pub mod domain;
pub mod engine;
pub mod error;
pub mod memory;
pub mod pending;
pub mod repository;
pub mod router;
pub mod rules;
pub mod service;
pub mod stats;
pub mod strategy;
pub mod task;
pub mod workload;

#[cfg(test)]
mod tests;

pub use domain::{
    Case, CaseAssignmentStatus, CaseId, CenterId, DirectoryStatus, MediationCenter, Mediator,
    MediatorId, Page, PageRequest, PendingAssignmentId, RuleId, TaskId,
};
pub use engine::{AssignmentEngine, StepOutcome};
pub use error::{AssignmentError, CaseFailure, TaskAction, ValidationError};
pub use memory::{InMemoryDirectory, InMemoryPendingStore, InMemoryRuleStore, InMemoryTaskStore};
pub use pending::{PendingAssignmentRequest, PendingStatus};
pub use repository::{
    AssignmentStores, CaseDirectory, MediatorDirectory, PendingAssignmentStore, RepositoryError,
    RuleStore, TaskStore,
};
pub use router::assignment_router;
pub use rules::{
    evaluate, ActionDraft, ActionKind, ActionTarget, AssignmentRule, Condition, ConditionDraft,
    ConditionOperator, Logic, RuleAction, RuleDraft, RuleFilter, RuleMatch, RulePatch, RuleStatus,
};
pub use service::{
    AssignmentService, ManualAssignReport, ManualAssignment, ManualOutcome, ManualStatus,
    MediatorWorkload, RuleTestCase, RuleTestReport, StartAssignment, StartedAssignment,
};
pub use stats::{AssignmentStatistics, DailyTrend, StatsRange};
pub use strategy::{AssignmentPool, AssignmentStrategy, Decision, StrategyOutcome};
pub use task::{
    AssignmentResult, AssignmentTask, ResultOutcome, StrategyKind, TaskConfig, TaskConfigDraft,
    TaskFilter, TaskRecord, TaskStatus,
};
pub use workload::{Load, WorkloadError, WorkloadTracker};
