use std::sync::Arc;

use axum::response::Response;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::config::{AssignmentSettings, ExecutionMode};
use crate::workflows::assignment::domain::{
    Case, CaseAssignmentStatus, CaseId, CenterId, DirectoryStatus, MediationCenter, Mediator,
    MediatorId, RuleId, TaskId,
};
use crate::workflows::assignment::memory::{
    InMemoryDirectory, InMemoryPendingStore, InMemoryRuleStore, InMemoryTaskStore,
};
use crate::workflows::assignment::repository::{
    AssignmentStores, CaseDirectory, MediatorDirectory, RepositoryError, TaskStore,
};
use crate::workflows::assignment::rules::{
    ActionKind, ActionTarget, AssignmentRule, Condition, ConditionOperator, Logic, RuleAction,
    RuleStatus,
};
use crate::workflows::assignment::service::AssignmentService;
use crate::workflows::assignment::task::{TaskFilter, TaskRecord, TaskStatus};

pub(super) fn case(id: u64, debt_amount: f64) -> Case {
    Case {
        id: CaseId(id),
        case_no: format!("TJ{id:06}"),
        debt_amount,
        overdue_days: 45,
        debtor_age: Some(38),
        debtor_gender: Some("female".to_string()),
        debtor_region: "north".to_string(),
        case_type: "credit_card".to_string(),
        client_id: 7,
        created_on: NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date"),
        assignment_status: CaseAssignmentStatus::Unassigned,
        mediator_id: None,
        center_id: None,
    }
}

pub(super) fn assigned_case(id: u64, mediator: u64, center: u64) -> Case {
    Case {
        assignment_status: CaseAssignmentStatus::Assigned,
        mediator_id: Some(MediatorId(mediator)),
        center_id: Some(CenterId(center)),
        ..case(id, 20_000.0)
    }
}

pub(super) fn mediator(id: u64, center: u64, current: u32, max: u32) -> Mediator {
    Mediator {
        id: MediatorId(id),
        name: format!("mediator-{id}"),
        center_id: CenterId(center),
        specialties: vec!["credit_card".to_string()],
        current_load: current,
        max_load: max,
        success_rate: 0.8,
        status: DirectoryStatus::Active,
    }
}

pub(super) fn center(id: u64, region: &str) -> MediationCenter {
    MediationCenter {
        id: CenterId(id),
        name: format!("center-{id}"),
        region: region.to_string(),
        status: DirectoryStatus::Active,
    }
}

pub(super) fn condition(field: &str, operator: ConditionOperator, value: &str, logic: Logic) -> Condition {
    Condition {
        field: field.to_string(),
        operator,
        value: value.to_string(),
        logic,
    }
}

pub(super) fn to_mediators(ids: &[u64], weight: i32) -> RuleAction {
    RuleAction {
        kind: ActionKind::AssignMediator,
        target: ActionTarget::Ids(ids.to_vec()),
        weight,
    }
}

pub(super) fn to_centers(target: ActionTarget, weight: i32) -> RuleAction {
    RuleAction {
        kind: ActionKind::AssignMediationCenter,
        target,
        weight,
    }
}

pub(super) fn rule(
    id: u64,
    priority: i32,
    conditions: Vec<Condition>,
    actions: Vec<RuleAction>,
) -> AssignmentRule {
    let now = Utc::now();
    AssignmentRule {
        id: RuleId(id),
        name: format!("rule-{id}"),
        description: None,
        priority,
        status: RuleStatus::Active,
        conditions,
        actions,
        created_at: now,
        updated_at: now,
    }
}

/// `debtAmount >= 100000` routed to mediator 101.
pub(super) fn large_debt_rule() -> AssignmentRule {
    rule(
        1,
        1,
        vec![condition("debtAmount", ConditionOperator::Gte, "100000", Logic::And)],
        vec![to_mediators(&[101], 10)],
    )
}

pub(super) fn inline_settings() -> AssignmentSettings {
    AssignmentSettings {
        execution: ExecutionMode::Inline,
        ..AssignmentSettings::default()
    }
}

/// In-memory collaborators seeded with two centers and three mediators.
#[derive(Clone, Default)]
pub(super) struct Fixture {
    pub(super) directory: InMemoryDirectory,
    pub(super) rules: InMemoryRuleStore,
    pub(super) tasks: InMemoryTaskStore,
    pub(super) pending: InMemoryPendingStore,
}

impl Fixture {
    pub(super) fn new(cases: Vec<Case>, rules: Vec<AssignmentRule>) -> Self {
        let directory = InMemoryDirectory::new(
            cases,
            vec![
                mediator(101, 1, 0, 10),
                mediator(102, 1, 5, 10),
                mediator(201, 2, 0, 10),
            ],
            vec![center(1, "north"), center(2, "south")],
        );
        Self {
            directory,
            rules: InMemoryRuleStore::with_rules(rules),
            ..Self::default()
        }
    }

    pub(super) fn stores(&self) -> AssignmentStores {
        AssignmentStores {
            cases: Arc::new(self.directory.clone()),
            mediators: Arc::new(self.directory.clone()),
            rules: Arc::new(self.rules.clone()),
            tasks: Arc::new(self.tasks.clone()),
            pending: Arc::new(self.pending.clone()),
        }
    }

    pub(super) fn service(&self) -> AssignmentService {
        AssignmentService::new(self.stores(), inline_settings())
    }

    pub(super) fn status_of(&self, id: u64) -> CaseAssignmentStatus {
        self.directory
            .case(CaseId(id))
            .expect("case exists")
            .assignment_status
    }

    pub(super) fn load_of(&self, id: u64) -> u32 {
        self.directory
            .mediator(MediatorId(id))
            .expect("mediator exists")
            .current_load
    }
}

/// Directory whose every call fails as if the backing service were down.
pub(super) struct UnavailableDirectory;

impl CaseDirectory for UnavailableDirectory {
    fn get_case(&self, _id: CaseId) -> Result<Option<Case>, RepositoryError> {
        Err(RepositoryError::Unavailable("case directory offline".to_string()))
    }

    fn mark_assigned(
        &self,
        _id: CaseId,
        _mediator: MediatorId,
        _center: CenterId,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("case directory offline".to_string()))
    }
}

impl MediatorDirectory for UnavailableDirectory {
    fn list_mediators(&self, _centers: Option<&[CenterId]>) -> Result<Vec<Mediator>, RepositoryError> {
        Err(RepositoryError::Unavailable("mediator directory offline".to_string()))
    }

    fn list_centers(&self) -> Result<Vec<MediationCenter>, RepositoryError> {
        Err(RepositoryError::Unavailable("mediator directory offline".to_string()))
    }
}

/// Reads from the wrapped directory but refuses to record placements.
pub(super) struct ReadOnlyCases(pub(super) InMemoryDirectory);

impl CaseDirectory for ReadOnlyCases {
    fn get_case(&self, id: CaseId) -> Result<Option<Case>, RepositoryError> {
        self.0.get_case(id)
    }

    fn mark_assigned(
        &self,
        _id: CaseId,
        _mediator: MediatorId,
        _center: CenterId,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("case directory is read-only".to_string()))
    }
}

/// Task store that loses every write carrying the given status.
pub(super) struct LosesStatusWrite(pub(super) InMemoryTaskStore, pub(super) TaskStatus);

impl TaskStore for LosesStatusWrite {
    fn insert(&self, record: TaskRecord) -> Result<(), RepositoryError> {
        self.0.insert(record)
    }

    fn update(&self, record: &TaskRecord) -> Result<(), RepositoryError> {
        if record.task.status == self.1 {
            return Err(RepositoryError::Unavailable(format!("{} write lost", self.1)));
        }
        self.0.update(record)
    }

    fn fetch(&self, id: TaskId) -> Result<Option<TaskRecord>, RepositoryError> {
        self.0.fetch(id)
    }

    fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, RepositoryError> {
        self.0.query(filter)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
