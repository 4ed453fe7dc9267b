use std::sync::Arc;

use super::domain::{
    Case, CaseId, CenterId, MediationCenter, Mediator, MediatorId, PendingAssignmentId, RuleId,
    TaskId,
};
use super::pending::{PendingAssignmentRequest, PendingStatus};
use super::rules::{AssignmentRule, RuleFilter};
use super::task::{TaskFilter, TaskRecord};

/// Error enumeration for collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Case records owned by the case-management module.
pub trait CaseDirectory: Send + Sync {
    fn get_case(&self, id: CaseId) -> Result<Option<Case>, RepositoryError>;
    /// Record the placement. Also used for approved re-assignments.
    fn mark_assigned(
        &self,
        id: CaseId,
        mediator: MediatorId,
        center: CenterId,
    ) -> Result<(), RepositoryError>;
}

/// Mediator and mediation center listings.
pub trait MediatorDirectory: Send + Sync {
    /// All mediators, or only those in `centers` when given.
    fn list_mediators(&self, centers: Option<&[CenterId]>) -> Result<Vec<Mediator>, RepositoryError>;
    fn list_centers(&self) -> Result<Vec<MediationCenter>, RepositoryError>;
}

pub trait RuleStore: Send + Sync {
    fn insert(&self, rule: AssignmentRule) -> Result<AssignmentRule, RepositoryError>;
    fn update(&self, rule: AssignmentRule) -> Result<(), RepositoryError>;
    fn delete(&self, id: RuleId) -> Result<AssignmentRule, RepositoryError>;
    fn fetch(&self, id: RuleId) -> Result<Option<AssignmentRule>, RepositoryError>;
    /// Matching rules by ascending priority, then id.
    fn query(&self, filter: &RuleFilter) -> Result<Vec<AssignmentRule>, RepositoryError>;
}

pub trait TaskStore: Send + Sync {
    fn insert(&self, record: TaskRecord) -> Result<(), RepositoryError>;
    fn update(&self, record: &TaskRecord) -> Result<(), RepositoryError>;
    fn fetch(&self, id: TaskId) -> Result<Option<TaskRecord>, RepositoryError>;
    /// Matching tasks, newest first.
    fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, RepositoryError>;
}

pub trait PendingAssignmentStore: Send + Sync {
    fn insert(&self, request: PendingAssignmentRequest) -> Result<(), RepositoryError>;
    /// Store `request` only if the stored copy still has status `expected`.
    /// Returns `Conflict` when another decision got there first.
    fn settle(
        &self,
        request: &PendingAssignmentRequest,
        expected: PendingStatus,
    ) -> Result<(), RepositoryError>;
    fn fetch(
        &self,
        id: PendingAssignmentId,
    ) -> Result<Option<PendingAssignmentRequest>, RepositoryError>;
    /// Matching requests, newest first.
    fn query(
        &self,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingAssignmentRequest>, RepositoryError>;
}

/// Every collaborator the assignment subsystem talks to.
#[derive(Clone)]
pub struct AssignmentStores {
    pub cases: Arc<dyn CaseDirectory>,
    pub mediators: Arc<dyn MediatorDirectory>,
    pub rules: Arc<dyn RuleStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub pending: Arc<dyn PendingAssignmentStore>,
}
