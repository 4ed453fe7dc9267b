//! Task execution: drives a batch through its strategy one case at a time.
//!
//! Each live (running or paused) task owns a lock. A case is decided,
//! reserved, written to the case directory, and recorded while that lock is
//! held, so pause and cancel take effect between cases, never inside one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::domain::{now, CaseAssignmentStatus, CaseId, RuleId, TaskId};
use super::error::{AssignmentError, CaseFailure, TaskAction, ValidationError};
use super::repository::{AssignmentStores, RepositoryError};
use super::rules::RuleFilter;
use super::strategy::{strategy_for, AssignmentPool, AssignmentStrategy, StrategyOutcome};
use super::task::{
    validate_case_ids, AssignmentResult, AssignmentTask, ResultOutcome, StrategyKind, TaskConfig,
    TaskFilter, TaskRecord, TaskStatus,
};
use super::workload::WorkloadTracker;

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

fn default_task_name(id: TaskId, at: DateTime<Utc>) -> String {
    format!("smart-assignment-{}-{:04}", at.format("%Y%m%d"), id.0 % 10_000)
}

/// What a single [`AssignmentEngine::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Processed(AssignmentResult),
    /// Nothing was processed; the task is not running.
    Halted(TaskStatus),
}

struct LiveState {
    record: TaskRecord,
    pool: AssignmentPool,
    strategy: Box<dyn AssignmentStrategy>,
}

struct LiveTask {
    config: TaskConfig,
    tracker: WorkloadTracker,
    state: Mutex<LiveState>,
}

impl LiveTask {
    fn new(record: TaskRecord, pool: AssignmentPool) -> Self {
        let config = record.task.config.clone();
        let tracker = WorkloadTracker::new(&pool.mediators, Some(config.max_cases_per_mediator));
        let strategy = strategy_for(&config);
        Self {
            config,
            tracker,
            state: Mutex::new(LiveState {
                record,
                pool,
                strategy,
            }),
        }
    }
}

pub struct AssignmentEngine {
    stores: AssignmentStores,
    live: Mutex<HashMap<TaskId, Arc<LiveTask>>>,
}

impl AssignmentEngine {
    pub fn new(stores: AssignmentStores) -> Self {
        Self {
            stores,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Create a task for `case_ids` and move it to `running`. Nothing is
    /// persisted when validation or the directory lookup fails.
    pub fn launch(
        &self,
        name: Option<String>,
        config: TaskConfig,
        case_ids: Vec<CaseId>,
    ) -> Result<AssignmentTask, AssignmentError> {
        if config.strategy == StrategyKind::Manual {
            return Err(ValidationError::ManualStrategyTask.into());
        }
        validate_case_ids(&case_ids)?;
        if case_ids.len() > config.batch_size as usize {
            return Err(AssignmentError::BatchSizeExceeded {
                batch_size: config.batch_size,
                requested: case_ids.len(),
            });
        }

        let pool = AssignmentPool::load(self.stores.mediators.as_ref(), &config)?;

        let id = next_task_id();
        let created = now();
        let name = name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_task_name(id, created));
        let mut record = TaskRecord::new(id, name, config, case_ids, created);
        self.stores.tasks.insert(record.clone())?;

        record.transition(TaskStatus::Running, TaskAction::Start, now())?;
        self.stores.tasks.update(&record)?;

        info!(
            task = %id,
            strategy = record.task.strategy.label(),
            cases = record.task.total_count,
            mediators = pool.mediators.len(),
            "assignment task started"
        );

        let task = record.task.clone();
        self.register(id, LiveTask::new(record, pool));
        Ok(task)
    }

    /// Process the next unprocessed case of a running task.
    pub fn step(&self, id: TaskId) -> Result<StepOutcome, AssignmentError> {
        let Some(live) = self.live_task(id) else {
            let record = self
                .stores
                .tasks
                .fetch(id)?
                .ok_or_else(|| AssignmentError::not_found("task", id.0))?;
            return Ok(StepOutcome::Halted(record.task.status));
        };

        let mut state = live.state.lock().expect("task mutex poisoned");
        let status = state.record.task.status;
        if status != TaskStatus::Running {
            return Ok(StepOutcome::Halted(status));
        }

        let Some(case_id) = state.record.next_unprocessed() else {
            let outcome = self.finish(&mut state);
            if let Err(err) = &outcome {
                self.fail(&mut state, err);
            }
            drop(state);
            self.retire(id);
            return outcome.map(|_| StepOutcome::Halted(TaskStatus::Completed));
        };

        let outcome = self
            .process_case(&live.tracker, &mut state, case_id)
            .and_then(|result| {
                state.record.record(result.clone());
                if state.record.next_unprocessed().is_none() {
                    self.finish(&mut state)?;
                } else {
                    self.stores.tasks.update(&state.record)?;
                }
                Ok(result)
            });

        match outcome {
            Ok(result) => {
                let terminal = state.record.task.status.is_terminal();
                drop(state);
                if terminal {
                    self.retire(id);
                }
                Ok(StepOutcome::Processed(result))
            }
            Err(err) => {
                self.fail(&mut state, &err);
                drop(state);
                self.retire(id);
                Err(err)
            }
        }
    }

    /// Step until the task stops running and return its final snapshot.
    pub fn run(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        while let StepOutcome::Processed(_) = self.step(id)? {}
        self.snapshot(id)
    }

    pub fn pause(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        let task = self.control(id, TaskStatus::Paused, TaskAction::Pause)?;
        info!(task = %id, processed = task.processed_count(), "assignment task paused");
        Ok(task)
    }

    /// Resume a paused task. A paused task that is no longer live (for
    /// example after a restart) is rebuilt from the store with fresh loads.
    pub fn resume(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        if self.live_task(id).is_some() {
            let task = self.control(id, TaskStatus::Running, TaskAction::Resume)?;
            info!(task = %id, "assignment task resumed");
            return Ok(task);
        }

        let mut record = self
            .stores
            .tasks
            .fetch(id)?
            .ok_or_else(|| AssignmentError::not_found("task", id.0))?;
        record.transition(TaskStatus::Running, TaskAction::Resume, now())?;
        let pool = AssignmentPool::load(self.stores.mediators.as_ref(), &record.task.config)?;
        self.stores.tasks.update(&record)?;

        info!(task = %id, processed = record.task.processed_count(), "assignment task restored and resumed");
        let task = record.task.clone();
        self.register(id, LiveTask::new(record, pool));
        Ok(task)
    }

    pub fn cancel(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        let task = self.control(id, TaskStatus::Cancelled, TaskAction::Cancel)?;
        info!(task = %id, processed = task.processed_count(), "assignment task cancelled");
        Ok(task)
    }

    /// Cancel every running or paused task. Returns how many were cancelled.
    pub fn stop_all(&self) -> Result<usize, AssignmentError> {
        let mut ids: Vec<TaskId> = Vec::new();
        for status in [TaskStatus::Running, TaskStatus::Paused] {
            let records = self.stores.tasks.query(&TaskFilter::with_status(status))?;
            ids.extend(records.into_iter().map(|record| record.task.id));
        }

        let mut cancelled = 0;
        for id in ids {
            match self.cancel(id) {
                Ok(_) => cancelled += 1,
                // Finished between the query and the cancel.
                Err(AssignmentError::InvalidTransition { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        info!(cancelled, "stopped all assignment tasks");
        Ok(cancelled)
    }

    /// Refresh every live tracker from the mediator directory. Returns the
    /// number of trackers refreshed.
    pub fn reconcile(&self) -> Result<usize, AssignmentError> {
        let live: Vec<(TaskId, Arc<LiveTask>)> = {
            let guard = self.live.lock().expect("live task mutex poisoned");
            guard.iter().map(|(id, task)| (*id, Arc::clone(task))).collect()
        };

        let mut refreshed = 0;
        for (id, task) in live {
            let pool = AssignmentPool::load(self.stores.mediators.as_ref(), &task.config)?;
            let slots = task.tracker.reconcile(&pool.mediators);
            debug!(task = %id, slots, "workload tracker reconciled");
            refreshed += 1;
        }
        Ok(refreshed)
    }

    /// Ids of tasks that currently hold a tracker.
    pub fn live_tasks(&self) -> Vec<TaskId> {
        let guard = self.live.lock().expect("live task mutex poisoned");
        let mut ids: Vec<TaskId> = guard.keys().copied().collect();
        ids.sort();
        ids
    }

    fn snapshot(&self, id: TaskId) -> Result<AssignmentTask, AssignmentError> {
        if let Some(live) = self.live_task(id) {
            let state = live.state.lock().expect("task mutex poisoned");
            return Ok(state.record.task.clone());
        }
        self.stores
            .tasks
            .fetch(id)?
            .map(|record| record.task)
            .ok_or_else(|| AssignmentError::not_found("task", id.0))
    }

    fn control(
        &self,
        id: TaskId,
        next: TaskStatus,
        action: TaskAction,
    ) -> Result<AssignmentTask, AssignmentError> {
        if let Some(live) = self.live_task(id) {
            let mut state = live.state.lock().expect("task mutex poisoned");
            let mut record = state.record.clone();
            record.transition(next, action, now())?;
            self.stores.tasks.update(&record)?;
            let task = record.task.clone();
            state.record = record;
            drop(state);
            if next.is_terminal() {
                self.retire(id);
            }
            return Ok(task);
        }

        let mut record = self
            .stores
            .tasks
            .fetch(id)?
            .ok_or_else(|| AssignmentError::not_found("task", id.0))?;
        record.transition(next, action, now())?;
        self.stores.tasks.update(&record)?;
        Ok(record.task)
    }

    fn process_case(
        &self,
        tracker: &WorkloadTracker,
        state: &mut LiveState,
        case_id: CaseId,
    ) -> Result<AssignmentResult, AssignmentError> {
        let started = Instant::now();
        let task = state.record.task.id;

        let case = match self.stores.cases.get_case(case_id) {
            Ok(Some(case)) => case,
            Ok(None) | Err(RepositoryError::NotFound) => {
                return Ok(failed(case_id, CaseFailure::CaseNotFound, None, started));
            }
            Err(err) => return Err(err.into()),
        };
        if case.assignment_status == CaseAssignmentStatus::Assigned {
            return Ok(failed(case_id, CaseFailure::AlreadyAssigned, None, started));
        }

        let rules = if state.strategy.uses_rules() {
            self.stores.rules.query(&RuleFilter::active())?
        } else {
            Vec::new()
        };

        let decision = match state.strategy.decide(&case, &rules, tracker, &state.pool) {
            StrategyOutcome::Assigned(decision) => decision,
            StrategyOutcome::NoMatch => {
                warn!(task = %task, case = %case_id, "no rule or strategy matched case");
                return Ok(failed(case_id, CaseFailure::NoMatch, None, started));
            }
            StrategyOutcome::Saturated { rule_id } => {
                warn!(task = %task, case = %case_id, "every eligible mediator is at capacity");
                return Ok(failed(case_id, CaseFailure::CapacityExceeded, rule_id, started));
            }
            StrategyOutcome::Review(_) => {
                return Ok(failed(case_id, CaseFailure::ReviewRequired, None, started));
            }
        };

        if let Err(err) =
            self.stores
                .cases
                .mark_assigned(case_id, decision.mediator_id, decision.center_id)
        {
            tracker.release(decision.mediator_id);
            return Err(err.into());
        }

        debug!(
            task = %task,
            case = %case_id,
            mediator = %decision.mediator_id,
            center = %decision.center_id,
            "case assigned"
        );
        Ok(AssignmentResult {
            case_id,
            outcome: ResultOutcome::Success,
            mediator_id: Some(decision.mediator_id),
            center_id: Some(decision.center_id),
            rule_id: decision.rule_id,
            reason: decision.rule_name,
            failure: None,
            latency_ms: elapsed_ms(started),
            recorded_at: now(),
        })
    }

    /// The in-memory record only turns `completed` once the store has it.
    fn finish(&self, state: &mut LiveState) -> Result<(), AssignmentError> {
        let mut record = state.record.clone();
        record.transition(TaskStatus::Completed, TaskAction::Process, now())?;
        self.stores.tasks.update(&record)?;
        state.record = record;
        let task = &state.record.task;
        info!(
            task = %task.id,
            success = task.success_count,
            failed = task.fail_count,
            "assignment task completed"
        );
        Ok(())
    }

    /// Move the task to `failed` and try to persist that; the original error
    /// is what the caller sees either way.
    fn fail(&self, state: &mut LiveState, err: &AssignmentError) {
        let record = &mut state.record;
        error!(task = %record.task.id, error = %err, "assignment task failed");
        if let Err(refused) = record.transition(TaskStatus::Failed, TaskAction::Process, now()) {
            warn!(task = %record.task.id, error = %refused, "task left in its current state");
            return;
        }
        record.task.error_message = Some(err.to_string());
        if let Err(persist) = self.stores.tasks.update(record) {
            error!(task = %record.task.id, error = %persist, "could not persist failed task");
        }
    }

    fn live_task(&self, id: TaskId) -> Option<Arc<LiveTask>> {
        let guard = self.live.lock().expect("live task mutex poisoned");
        guard.get(&id).cloned()
    }

    fn register(&self, id: TaskId, task: LiveTask) {
        let mut guard = self.live.lock().expect("live task mutex poisoned");
        guard.insert(id, Arc::new(task));
    }

    fn retire(&self, id: TaskId) {
        let mut guard = self.live.lock().expect("live task mutex poisoned");
        guard.remove(&id);
    }
}

fn failed(
    case_id: CaseId,
    failure: CaseFailure,
    rule_id: Option<RuleId>,
    started: Instant,
) -> AssignmentResult {
    AssignmentResult {
        case_id,
        outcome: ResultOutcome::Failure,
        mediator_id: None,
        center_id: None,
        rule_id,
        reason: Some(failure.to_string()),
        failure: Some(failure),
        latency_ms: elapsed_ms(started),
        recorded_at: now(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
