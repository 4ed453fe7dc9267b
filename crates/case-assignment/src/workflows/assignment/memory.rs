//! In-process collaborators used by the API binary, the demo, and tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::domain::{
    Case, CaseAssignmentStatus, CaseId, CenterId, MediationCenter, Mediator, MediatorId,
    PendingAssignmentId, RuleId, TaskId,
};
use super::pending::{PendingAssignmentRequest, PendingStatus};
use super::repository::{
    CaseDirectory, MediatorDirectory, PendingAssignmentStore, RepositoryError, RuleStore,
    TaskStore,
};
use super::rules::{AssignmentRule, RuleFilter};
use super::task::{TaskFilter, TaskRecord};

#[derive(Debug, Default)]
struct DirectoryState {
    cases: BTreeMap<CaseId, Case>,
    mediators: BTreeMap<MediatorId, Mediator>,
    centers: BTreeMap<CenterId, MediationCenter>,
}

/// Cases, mediators and centers behind one lock, so a placement updates the
/// case and the mediator load together.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl InMemoryDirectory {
    pub fn new(
        cases: impl IntoIterator<Item = Case>,
        mediators: impl IntoIterator<Item = Mediator>,
        centers: impl IntoIterator<Item = MediationCenter>,
    ) -> Self {
        let state = DirectoryState {
            cases: cases.into_iter().map(|case| (case.id, case)).collect(),
            mediators: mediators
                .into_iter()
                .map(|mediator| (mediator.id, mediator))
                .collect(),
            centers: centers.into_iter().map(|center| (center.id, center)).collect(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn upsert_case(&self, case: Case) {
        let mut guard = self.state.lock().expect("directory mutex poisoned");
        guard.cases.insert(case.id, case);
    }

    pub fn upsert_mediator(&self, mediator: Mediator) {
        let mut guard = self.state.lock().expect("directory mutex poisoned");
        guard.mediators.insert(mediator.id, mediator);
    }

    pub fn upsert_center(&self, center: MediationCenter) {
        let mut guard = self.state.lock().expect("directory mutex poisoned");
        guard.centers.insert(center.id, center);
    }

    pub fn case(&self, id: CaseId) -> Option<Case> {
        let guard = self.state.lock().expect("directory mutex poisoned");
        guard.cases.get(&id).cloned()
    }

    pub fn mediator(&self, id: MediatorId) -> Option<Mediator> {
        let guard = self.state.lock().expect("directory mutex poisoned");
        guard.mediators.get(&id).cloned()
    }

    pub fn cases(&self) -> Vec<Case> {
        let guard = self.state.lock().expect("directory mutex poisoned");
        guard.cases.values().cloned().collect()
    }
}

impl CaseDirectory for InMemoryDirectory {
    fn get_case(&self, id: CaseId) -> Result<Option<Case>, RepositoryError> {
        Ok(self.case(id))
    }

    fn mark_assigned(
        &self,
        id: CaseId,
        mediator: MediatorId,
        center: CenterId,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.state.lock().expect("directory mutex poisoned");
        if !guard.mediators.contains_key(&mediator) {
            return Err(RepositoryError::NotFound);
        }
        let case = guard.cases.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let previous = case.mediator_id.replace(mediator);
        case.center_id = Some(center);
        case.assignment_status = CaseAssignmentStatus::Assigned;

        if previous == Some(mediator) {
            return Ok(());
        }
        if let Some(previous) = previous.and_then(|id| guard.mediators.get_mut(&id)) {
            previous.current_load = previous.current_load.saturating_sub(1);
        }
        if let Some(current) = guard.mediators.get_mut(&mediator) {
            current.current_load += 1;
        }
        Ok(())
    }
}

impl MediatorDirectory for InMemoryDirectory {
    fn list_mediators(&self, centers: Option<&[CenterId]>) -> Result<Vec<Mediator>, RepositoryError> {
        let guard = self.state.lock().expect("directory mutex poisoned");
        Ok(guard
            .mediators
            .values()
            .filter(|mediator| centers.map_or(true, |centers| centers.contains(&mediator.center_id)))
            .cloned()
            .collect())
    }

    fn list_centers(&self) -> Result<Vec<MediationCenter>, RepositoryError> {
        let guard = self.state.lock().expect("directory mutex poisoned");
        Ok(guard.centers.values().cloned().collect())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRuleStore {
    rules: Arc<Mutex<BTreeMap<RuleId, AssignmentRule>>>,
}

impl InMemoryRuleStore {
    pub fn with_rules(rules: impl IntoIterator<Item = AssignmentRule>) -> Self {
        let rules = rules.into_iter().map(|rule| (rule.id, rule)).collect();
        Self {
            rules: Arc::new(Mutex::new(rules)),
        }
    }
}

impl RuleStore for InMemoryRuleStore {
    fn insert(&self, rule: AssignmentRule) -> Result<AssignmentRule, RepositoryError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        if guard.contains_key(&rule.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(rule.id, rule.clone());
        Ok(rule)
    }

    fn update(&self, rule: AssignmentRule) -> Result<(), RepositoryError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        match guard.get_mut(&rule.id) {
            Some(slot) => {
                *slot = rule;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn delete(&self, id: RuleId) -> Result<AssignmentRule, RepositoryError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        guard.remove(&id).ok_or(RepositoryError::NotFound)
    }

    fn fetch(&self, id: RuleId) -> Result<Option<AssignmentRule>, RepositoryError> {
        let guard = self.rules.lock().expect("rule store mutex poisoned");
        Ok(guard.get(&id).cloned())
    }

    fn query(&self, filter: &RuleFilter) -> Result<Vec<AssignmentRule>, RepositoryError> {
        let guard = self.rules.lock().expect("rule store mutex poisoned");
        let mut rules: Vec<AssignmentRule> = guard
            .values()
            .filter(|rule| filter.matches(rule))
            .cloned()
            .collect();
        rules.sort_by_key(|rule| (rule.priority, rule.id));
        Ok(rules)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTaskStore {
    records: Arc<Mutex<BTreeMap<TaskId, TaskRecord>>>,
}

impl TaskStore for InMemoryTaskStore {
    fn insert(&self, record: TaskRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("task store mutex poisoned");
        if guard.contains_key(&record.task.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.task.id, record);
        Ok(())
    }

    fn update(&self, record: &TaskRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("task store mutex poisoned");
        match guard.get_mut(&record.task.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: TaskId) -> Result<Option<TaskRecord>, RepositoryError> {
        let guard = self.records.lock().expect("task store mutex poisoned");
        Ok(guard.get(&id).cloned())
    }

    fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, RepositoryError> {
        let guard = self.records.lock().expect("task store mutex poisoned");
        Ok(guard
            .values()
            .rev()
            .filter(|record| filter.matches(&record.task))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryPendingStore {
    requests: Arc<Mutex<BTreeMap<PendingAssignmentId, PendingAssignmentRequest>>>,
}

impl PendingAssignmentStore for InMemoryPendingStore {
    fn insert(&self, request: PendingAssignmentRequest) -> Result<(), RepositoryError> {
        let mut guard = self.requests.lock().expect("pending store mutex poisoned");
        if guard.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(request.id, request);
        Ok(())
    }

    fn settle(
        &self,
        request: &PendingAssignmentRequest,
        expected: PendingStatus,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.requests.lock().expect("pending store mutex poisoned");
        match guard.get_mut(&request.id) {
            Some(slot) if slot.status == expected => {
                *slot = request.clone();
                Ok(())
            }
            Some(_) => Err(RepositoryError::Conflict),
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(
        &self,
        id: PendingAssignmentId,
    ) -> Result<Option<PendingAssignmentRequest>, RepositoryError> {
        let guard = self.requests.lock().expect("pending store mutex poisoned");
        Ok(guard.get(&id).cloned())
    }

    fn query(
        &self,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingAssignmentRequest>, RepositoryError> {
        let guard = self.requests.lock().expect("pending store mutex poisoned");
        Ok(guard
            .values()
            .rev()
            .filter(|request| status.map_or(true, |status| request.status == status))
            .cloned()
            .collect())
    }
}
