use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{
    now, Case, CaseAssignmentStatus, CaseId, CenterId, MediationCenter, Mediator, MediatorId,
    Page, PageRequest, PendingAssignmentId, RuleId, TaskId,
};
use super::engine::AssignmentEngine;
use super::error::{AssignmentError, CaseFailure, ValidationError};
use super::pending::{PendingAssignmentRequest, PendingStatus};
use super::repository::{AssignmentStores, RepositoryError};
use super::rules::{evaluate, AssignmentRule, RuleAction, RuleDraft, RuleFilter, RulePatch, RuleStatus};
use super::stats::{self, AssignmentStatistics, DailyTrend, StatsRange};
use super::strategy::{AssignmentPool, AssignmentStrategy, ManualStrategy, StrategyOutcome};
use super::task::{
    validate_case_ids, AssignmentTask, StrategyKind, TaskConfig, TaskConfigDraft, TaskFilter,
    TaskRecord, TaskStatus,
};
use super::workload::{WorkloadError, WorkloadTracker};
use crate::config::{AssignmentSettings, ExecutionMode};

static RULE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static PENDING_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_rule_id() -> RuleId {
    RuleId(RULE_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

fn next_pending_id() -> PendingAssignmentId {
    PendingAssignmentId(PENDING_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// Start request for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAssignment {
    #[serde(default)]
    pub name: Option<String>,
    pub config: TaskConfigDraft,
    pub case_ids: Vec<CaseId>,
}

/// What a start request produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartedAssignment {
    Task { task: AssignmentTask },
    /// `manual` strategy: every case was queued for review instead.
    Queued { requests: Vec<PendingAssignmentId> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTestCase {
    pub case_id: CaseId,
    pub matched: bool,
    /// Highest-weight action that would fire.
    pub action: Option<RuleAction>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTestReport {
    pub rule_id: RuleId,
    pub matched_count: usize,
    pub cases: Vec<RuleTestCase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAssignment {
    pub case_ids: Vec<CaseId>,
    #[serde(default)]
    pub center_id: Option<CenterId>,
    #[serde(default)]
    pub mediator_id: Option<MediatorId>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualStatus {
    Assigned,
    PendingApproval,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualOutcome {
    pub case_id: CaseId,
    pub status: ManualStatus,
    pub mediator_id: Option<MediatorId>,
    pub center_id: Option<CenterId>,
    pub pending_request_id: Option<PendingAssignmentId>,
    pub failure: Option<CaseFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualAssignReport {
    pub assigned: usize,
    pub pending: usize,
    pub failed: usize,
    pub outcomes: Vec<ManualOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediatorWorkload {
    pub mediator_id: MediatorId,
    pub name: String,
    pub center_id: CenterId,
    pub current_load: u32,
    pub max_load: u32,
    pub workload_rate: f64,
    pub success_rate: f32,
    /// Successful placements on this mediator recorded by tasks.
    pub assigned_by_tasks: usize,
}

/// Façade over rules, tasks, manual placement and the read-only projections.
pub struct AssignmentService {
    engine: Arc<AssignmentEngine>,
    stores: AssignmentStores,
    settings: AssignmentSettings,
}

impl AssignmentService {
    pub fn new(stores: AssignmentStores, settings: AssignmentSettings) -> Self {
        let engine = Arc::new(AssignmentEngine::new(stores.clone()));
        Self {
            engine,
            stores,
            settings,
        }
    }

    pub fn settings(&self) -> &AssignmentSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<AssignmentEngine> {
        &self.engine
    }

    // Rules

    pub fn create_rule(&self, draft: RuleDraft) -> Result<AssignmentRule, AssignmentError> {
        let mut rule = draft.into_rule(next_rule_id(), now())?;
        // Seeded stores may already hold low ids.
        let stored = loop {
            match self.stores.rules.insert(rule.clone()) {
                Ok(stored) => break stored,
                Err(RepositoryError::Conflict) => rule.id = next_rule_id(),
                Err(err) => return Err(err.into()),
            }
        };
        info!(rule = %stored.id, name = %stored.name, "assignment rule created");
        Ok(stored)
    }

    pub fn update_rule(&self, id: RuleId, patch: RulePatch) -> Result<AssignmentRule, AssignmentError> {
        let mut rule = self.fetch_rule(id)?;
        if rule.is_active() && patch.touches_definition() {
            self.ensure_rules_idle(id)?;
        }
        patch.apply(&mut rule, now())?;
        self.stores.rules.update(rule.clone())?;
        info!(rule = %id, "assignment rule updated");
        Ok(rule)
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<AssignmentRule, AssignmentError> {
        let rule = self.fetch_rule(id)?;
        if rule.is_active() {
            self.ensure_rules_idle(id)?;
        }
        let removed = self.stores.rules.delete(id)?;
        info!(rule = %id, "assignment rule deleted");
        Ok(removed)
    }

    /// Always allowed; running tasks pick the change up from their next case.
    pub fn set_rule_status(&self, id: RuleId, status: &str) -> Result<AssignmentRule, AssignmentError> {
        let status = RuleStatus::parse(status)?;
        let mut rule = self.fetch_rule(id)?;
        rule.status = status;
        rule.updated_at = now();
        self.stores.rules.update(rule.clone())?;
        info!(rule = %id, status = status.label(), "assignment rule status changed");
        Ok(rule)
    }

    pub fn get_rule(&self, id: RuleId) -> Result<AssignmentRule, AssignmentError> {
        self.fetch_rule(id)
    }

    pub fn list_rules(
        &self,
        filter: &RuleFilter,
        page: PageRequest,
    ) -> Result<Page<AssignmentRule>, AssignmentError> {
        let rules = self.stores.rules.query(filter)?;
        Ok(Page::paginate(rules, page.clamped(self.settings.max_page_size)))
    }

    /// Evaluate a stored rule against cases without reserving or writing anything.
    pub fn test_rule(&self, id: RuleId, case_ids: &[CaseId]) -> Result<RuleTestReport, AssignmentError> {
        if case_ids.is_empty() {
            return Err(ValidationError::EmptyCaseList.into());
        }
        let rule = self.fetch_rule(id)?;

        let mut cases = Vec::with_capacity(case_ids.len());
        for case_id in case_ids {
            let entry = match self.stores.cases.get_case(*case_id)? {
                None => RuleTestCase {
                    case_id: *case_id,
                    matched: false,
                    action: None,
                    reason: Some(CaseFailure::CaseNotFound.to_string()),
                },
                Some(case) => {
                    let outcome = evaluate(&rule, &case);
                    RuleTestCase {
                        case_id: *case_id,
                        matched: outcome.matched,
                        action: outcome.actions.into_iter().next(),
                        reason: (!outcome.matched).then(|| CaseFailure::NoMatch.to_string()),
                    }
                }
            };
            cases.push(entry);
        }

        Ok(RuleTestReport {
            rule_id: id,
            matched_count: cases.iter().filter(|case| case.matched).count(),
            cases,
        })
    }

    // Tasks

    pub fn start_assignment(&self, request: StartAssignment) -> Result<StartedAssignment, AssignmentError> {
        let config = request.config.validate(&self.settings)?;
        if config.strategy == StrategyKind::Manual {
            let requests = self.queue_for_review(&config, &request.case_ids)?;
            return Ok(StartedAssignment::Queued { requests });
        }

        let task = self.engine.launch(request.name, config, request.case_ids)?;
        let task = self.execute(task)?;
        Ok(StartedAssignment::Task { task })
    }

    pub fn pause_task(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        self.engine.pause(id)
    }

    pub fn resume_task(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        let task = self.engine.resume(id)?;
        self.execute(task)
    }

    pub fn cancel_task(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        self.engine.cancel(id)
    }

    pub fn stop_all(&self) -> Result<usize, AssignmentError> {
        self.engine.stop_all()
    }

    /// The stored task with its input cases and results.
    pub fn get_task(&self, id: TaskId) -> Result<TaskRecord, AssignmentError> {
        self.stores
            .tasks
            .fetch(id)?
            .ok_or_else(|| AssignmentError::not_found("task", id.0))
    }

    pub fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> Result<Page<AssignmentTask>, AssignmentError> {
        let records = self.stores.tasks.query(filter)?;
        let page = Page::paginate(records, page.clamped(self.settings.max_page_size));
        Ok(page.map(|record| record.task))
    }

    pub fn reconcile(&self) -> Result<usize, AssignmentError> {
        let refreshed = self.engine.reconcile()?;
        info!(trackers = refreshed, "workload trackers reconciled");
        Ok(refreshed)
    }

    fn execute(&self, task: AssignmentTask) -> Result<AssignmentTask, AssignmentError> {
        let id = task.id;
        let handle = match self.settings.execution {
            ExecutionMode::Inline => None,
            ExecutionMode::Background => match tokio::runtime::Handle::try_current() {
                Ok(handle) => Some(handle),
                Err(_) => {
                    warn!(task = %id, "no async runtime available, running task inline");
                    None
                }
            },
        };

        match handle {
            Some(handle) => {
                let engine = Arc::clone(&self.engine);
                handle.spawn_blocking(move || {
                    if let Err(err) = engine.run(id) {
                        warn!(task = %id, error = %err, "background assignment run stopped");
                    }
                });
                Ok(task)
            }
            None => self.engine.run(id),
        }
    }

    fn queue_for_review(
        &self,
        config: &TaskConfig,
        case_ids: &[CaseId],
    ) -> Result<Vec<PendingAssignmentId>, AssignmentError> {
        validate_case_ids(case_ids)?;
        if case_ids.len() > config.batch_size as usize {
            return Err(AssignmentError::BatchSizeExceeded {
                batch_size: config.batch_size,
                requested: case_ids.len(),
            });
        }

        let cases = case_ids
            .iter()
            .map(|id| {
                self.stores
                    .cases
                    .get_case(*id)?
                    .ok_or_else(|| AssignmentError::not_found("case", id.0))
            })
            .collect::<Result<Vec<Case>, AssignmentError>>()?;

        let pool = AssignmentPool::load(self.stores.mediators.as_ref(), config)?;
        let tracker = WorkloadTracker::new(&pool.mediators, Some(config.max_cases_per_mediator));
        let mut strategy = ManualStrategy;

        let mut requests = Vec::with_capacity(cases.len());
        for case in cases {
            let (to_mediator, to_center) = match strategy.decide(&case, &[], &tracker, &pool) {
                StrategyOutcome::Review(proposal) => (proposal.mediator_id, proposal.center_id),
                _ => (None, None),
            };
            let request = self.open_request(
                &case,
                to_mediator,
                to_center,
                "queued by the manual assignment strategy".to_string(),
            )?;
            requests.push(request.id);
        }

        info!(queued = requests.len(), "cases queued for manual review");
        Ok(requests)
    }

    // Manual placement and approvals

    /// Place cases directly on a mediator or a center, bypassing strategies.
    /// Cases that are already assigned are turned into pending requests.
    pub fn manual_assign(&self, request: ManualAssignment) -> Result<ManualAssignReport, AssignmentError> {
        if request.mediator_id.is_none() && request.center_id.is_none() {
            return Err(ValidationError::MissingAssignmentTarget.into());
        }
        validate_case_ids(&request.case_ids)?;

        let mediators = self.stores.mediators.list_mediators(None)?;
        if let Some(mediator) = request.mediator_id {
            if !mediators.iter().any(|known| known.id == mediator && known.is_active()) {
                return Err(AssignmentError::not_found("mediator", mediator.0));
            }
        }
        if let Some(center) = request.center_id {
            let centers = self.stores.mediators.list_centers()?;
            if !centers.iter().any(|known| known.id == center && known.is_active()) {
                return Err(AssignmentError::not_found("mediation center", center.0));
            }
        }
        let tracker = WorkloadTracker::new(&mediators, None);
        let reason = request
            .reason
            .clone()
            .unwrap_or_else(|| "manual assignment".to_string());

        let mut outcomes = Vec::with_capacity(request.case_ids.len());
        for case_id in &request.case_ids {
            let outcome = self.place_manually(*case_id, &request, &tracker, &reason)?;
            outcomes.push(outcome);
        }

        let count = |status: ManualStatus| outcomes.iter().filter(|o| o.status == status).count();
        let report = ManualAssignReport {
            assigned: count(ManualStatus::Assigned),
            pending: count(ManualStatus::PendingApproval),
            failed: count(ManualStatus::Failed),
            outcomes,
        };
        info!(
            assigned = report.assigned,
            pending = report.pending,
            failed = report.failed,
            "manual assignment processed"
        );
        Ok(report)
    }

    fn place_manually(
        &self,
        case_id: CaseId,
        request: &ManualAssignment,
        tracker: &WorkloadTracker,
        reason: &str,
    ) -> Result<ManualOutcome, AssignmentError> {
        let failed = |failure: CaseFailure| ManualOutcome {
            case_id,
            status: ManualStatus::Failed,
            mediator_id: None,
            center_id: None,
            pending_request_id: None,
            failure: Some(failure),
        };

        let Some(case) = self.stores.cases.get_case(case_id)? else {
            return Ok(failed(CaseFailure::CaseNotFound));
        };

        if case.assignment_status == CaseAssignmentStatus::Assigned {
            let (mediator, center) = match request.mediator_id {
                Some(mediator) => (Some(mediator), tracker.transaction(|book| book.center_of(mediator))),
                None => {
                    let center = request.center_id;
                    let mediator = center.and_then(|center| {
                        tracker.transaction(|book| book.least_loaded(book.mediators_in(center).collect::<Vec<_>>()))
                    });
                    (mediator, center)
                }
            };
            let pending = self.open_request(&case, mediator, center, reason.to_string())?;
            return Ok(ManualOutcome {
                case_id,
                status: ManualStatus::PendingApproval,
                mediator_id: mediator,
                center_id: center,
                pending_request_id: Some(pending.id),
                failure: None,
            });
        }

        let reserved = match (request.mediator_id, request.center_id) {
            (Some(mediator), _) => tracker.reserve(mediator).map(|_| mediator),
            (None, Some(center)) => tracker.reserve_in_center(center),
            (None, None) => return Err(ValidationError::MissingAssignmentTarget.into()),
        };
        let mediator = match reserved {
            Ok(mediator) => mediator,
            Err(WorkloadError::UnknownMediator { mediator }) => {
                return Err(AssignmentError::not_found("mediator", mediator.0))
            }
            Err(WorkloadError::CapacityExceeded { .. } | WorkloadError::CenterSaturated { .. }) => {
                return Ok(failed(CaseFailure::CapacityExceeded))
            }
        };
        let Some(center) = tracker.transaction(|book| book.center_of(mediator)) else {
            tracker.release(mediator);
            return Err(AssignmentError::not_found("mediator", mediator.0));
        };

        if let Err(err) = self.stores.cases.mark_assigned(case_id, mediator, center) {
            tracker.release(mediator);
            return Err(err.into());
        }
        Ok(ManualOutcome {
            case_id,
            status: ManualStatus::Assigned,
            mediator_id: Some(mediator),
            center_id: Some(center),
            pending_request_id: None,
            failure: None,
        })
    }

    /// Open a pending request moving `case_id` to `mediator_id`.
    pub fn request_reassignment(
        &self,
        case_id: CaseId,
        mediator_id: MediatorId,
        reason: Option<String>,
    ) -> Result<PendingAssignmentRequest, AssignmentError> {
        let case = self
            .stores
            .cases
            .get_case(case_id)?
            .ok_or_else(|| AssignmentError::not_found("case", case_id.0))?;
        let mediator = self
            .stores
            .mediators
            .list_mediators(None)?
            .into_iter()
            .find(|mediator| mediator.id == mediator_id)
            .ok_or_else(|| AssignmentError::not_found("mediator", mediator_id.0))?;

        self.open_request(
            &case,
            Some(mediator.id),
            Some(mediator.center_id),
            reason.unwrap_or_else(|| "re-assignment requested".to_string()),
        )
    }

    /// Approve or reject a pending request. Approval checks capacity on the
    /// target against the current directory loads, claims the request, and
    /// only then marks the case. Two racing decisions settle on one winner;
    /// the other sees `AlreadyReviewed`.
    pub fn approve_pending_assignment(
        &self,
        id: PendingAssignmentId,
        approved: bool,
        note: Option<String>,
    ) -> Result<PendingAssignmentRequest, AssignmentError> {
        let stored = self
            .stores
            .pending
            .fetch(id)?
            .ok_or_else(|| AssignmentError::not_found("pending assignment", id.0))?;
        let mut request = stored.clone();
        request.decide(approved, note, now())?;

        let placement = if approved {
            let mediator = request
                .to_mediator_id
                .ok_or(ValidationError::PendingWithoutTarget)?;
            let mediators = self.stores.mediators.list_mediators(None)?;
            let tracker = WorkloadTracker::new(&mediators, None);
            tracker.reserve(mediator)?;
            let center = tracker
                .transaction(|book| book.center_of(mediator))
                .ok_or_else(|| AssignmentError::not_found("mediator", mediator.0))?;
            request.to_center_id = Some(center);
            Some((mediator, center))
        } else {
            None
        };

        self.claim(&request)?;

        if let Some((mediator, center)) = placement {
            if let Err(err) = self
                .stores
                .cases
                .mark_assigned(request.case_id, mediator, center)
            {
                if let Err(reopen) = self.stores.pending.settle(&stored, PendingStatus::Approved) {
                    warn!(request = %id, error = %reopen, "could not reopen pending assignment");
                }
                return Err(err.into());
            }
        }

        info!(
            request = %id,
            case = %request.case_id,
            status = request.status.label(),
            "pending assignment decided"
        );
        Ok(request)
    }

    pub fn list_pending(
        &self,
        status: Option<PendingStatus>,
        page: PageRequest,
    ) -> Result<Page<PendingAssignmentRequest>, AssignmentError> {
        let requests = self.stores.pending.query(status)?;
        Ok(Page::paginate(requests, page.clamped(self.settings.max_page_size)))
    }

    /// Move a still-pending request to its decided state.
    fn claim(&self, request: &PendingAssignmentRequest) -> Result<(), AssignmentError> {
        match self.stores.pending.settle(request, PendingStatus::Pending) {
            Ok(()) => Ok(()),
            Err(RepositoryError::Conflict) => {
                let status = self
                    .stores
                    .pending
                    .fetch(request.id)?
                    .map_or(PendingStatus::Pending, |current| current.status);
                Err(AssignmentError::AlreadyReviewed {
                    request: request.id.0,
                    status: status.label(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn open_request(
        &self,
        case: &Case,
        to_mediator: Option<MediatorId>,
        to_center: Option<CenterId>,
        reason: String,
    ) -> Result<PendingAssignmentRequest, AssignmentError> {
        let mut request = PendingAssignmentRequest {
            id: next_pending_id(),
            case_id: case.id,
            from_mediator_id: case.mediator_id,
            to_mediator_id: to_mediator,
            to_center_id: to_center,
            reason,
            status: PendingStatus::Pending,
            review_note: None,
            created_at: now(),
            decided_at: None,
        };
        loop {
            match self.stores.pending.insert(request.clone()) {
                Ok(()) => break,
                Err(RepositoryError::Conflict) => request.id = next_pending_id(),
                Err(err) => return Err(err.into()),
            }
        }
        info!(request = %request.id, case = %case.id, "pending assignment opened");
        Ok(request)
    }

    // Directory and statistics

    pub fn list_centers(&self, page: PageRequest) -> Result<Page<MediationCenter>, AssignmentError> {
        let centers = self.stores.mediators.list_centers()?;
        Ok(Page::paginate(centers, page.clamped(self.settings.max_page_size)))
    }

    /// Mediators of every status, optionally limited to one center.
    pub fn list_mediators(
        &self,
        center: Option<CenterId>,
        page: PageRequest,
    ) -> Result<Page<Mediator>, AssignmentError> {
        let centers = center.map(|center| vec![center]);
        let mediators = self.stores.mediators.list_mediators(centers.as_deref())?;
        Ok(Page::paginate(mediators, page.clamped(self.settings.max_page_size)))
    }

    pub fn mediator_workload(&self, id: MediatorId) -> Result<MediatorWorkload, AssignmentError> {
        let mediator = self
            .stores
            .mediators
            .list_mediators(None)?
            .into_iter()
            .find(|mediator| mediator.id == id)
            .ok_or_else(|| AssignmentError::not_found("mediator", id.0))?;

        let assigned_by_tasks = self
            .stores
            .tasks
            .query(&TaskFilter::default())?
            .iter()
            .flat_map(|record| record.results.iter())
            .filter(|result| result.is_success() && result.mediator_id == Some(id))
            .count();

        let workload_rate = if mediator.max_load == 0 {
            1.0
        } else {
            f64::from(mediator.current_load) / f64::from(mediator.max_load)
        };

        Ok(MediatorWorkload {
            mediator_id: mediator.id,
            name: mediator.name,
            center_id: mediator.center_id,
            current_load: mediator.current_load,
            max_load: mediator.max_load,
            workload_rate,
            success_rate: mediator.success_rate,
            assigned_by_tasks,
        })
    }

    pub fn statistics(&self, range: StatsRange) -> Result<AssignmentStatistics, AssignmentError> {
        let records = self.stores.tasks.query(&TaskFilter::default())?;
        let rules = self.stores.rules.query(&RuleFilter::default())?;
        Ok(stats::summarize(&records, &rules, range))
    }

    pub fn trend(&self, days: u32) -> Result<Vec<DailyTrend>, AssignmentError> {
        let records = self.stores.tasks.query(&TaskFilter::default())?;
        Ok(stats::trend(&records, now().date_naive(), days.clamp(1, 90)))
    }

    fn fetch_rule(&self, id: RuleId) -> Result<AssignmentRule, AssignmentError> {
        self.stores
            .rules
            .fetch(id)?
            .ok_or_else(|| AssignmentError::not_found("rule", id.0))
    }

    /// An active rule may not be redefined or removed under a live rule_based task.
    fn ensure_rules_idle(&self, id: RuleId) -> Result<(), AssignmentError> {
        for status in [TaskStatus::Running, TaskStatus::Paused] {
            let filter = TaskFilter {
                status: Some(status),
                strategy: Some(StrategyKind::RuleBased),
                ..TaskFilter::default()
            };
            if !self.stores.tasks.query(&filter)?.is_empty() {
                return Err(AssignmentError::RuleInUse { rule: id.0 });
            }
        }
        Ok(())
    }
}
