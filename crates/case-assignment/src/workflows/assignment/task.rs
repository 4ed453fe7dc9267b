use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{CaseId, CenterId, MediatorId, RuleId, TaskId};
use super::error::{AssignmentError, CaseFailure, TaskAction, ValidationError};
use crate::config::AssignmentSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RuleBased,
    LoadBalance,
    Random,
    Manual,
}

impl StrategyKind {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim() {
            "rule_based" => Ok(Self::RuleBased),
            "load_balance" => Ok(Self::LoadBalance),
            "random" => Ok(Self::Random),
            "manual" => Ok(Self::Manual),
            _ => Err(ValidationError::UnknownStrategy {
                name: raw.to_string(),
            }),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::RuleBased => "rule_based",
            Self::LoadBalance => "load_balance",
            Self::Random => "random",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// `running` or `paused`: the task still owns a live tracker.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// The single source of truth for lifecycle edges.
    pub const fn can_transition(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Cancelled)
                | (Self::Running, Self::Failed)
                | (Self::Paused, Self::Running)
                | (Self::Paused, Self::Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Validated configuration frozen on the task at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub strategy: StrategyKind,
    pub batch_size: u32,
    pub max_cases_per_mediator: u32,
    #[serde(default)]
    pub mediation_center_ids: Vec<CenterId>,
    #[serde(default)]
    pub mediator_ids: Vec<MediatorId>,
    /// Seed for the random strategy; unseeded runs draw from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Start-request configuration as submitted by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfigDraft {
    pub strategy: String,
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub max_cases_per_mediator: Option<i64>,
    #[serde(default)]
    pub mediation_center_ids: Vec<CenterId>,
    #[serde(default)]
    pub mediator_ids: Vec<MediatorId>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TaskConfigDraft {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy: strategy.label().to_string(),
            batch_size: None,
            max_cases_per_mediator: None,
            mediation_center_ids: Vec::new(),
            mediator_ids: Vec::new(),
            seed: None,
        }
    }

    pub fn validate(self, settings: &AssignmentSettings) -> Result<TaskConfig, ValidationError> {
        let strategy = StrategyKind::parse(&self.strategy)?;

        let batch_size = match self.batch_size {
            None => settings.default_batch_size,
            Some(value) => u32::try_from(value)
                .ok()
                .filter(|size| *size > 0)
                .ok_or(ValidationError::BatchSize { value })?,
        };
        let max_cases_per_mediator = match self.max_cases_per_mediator {
            None => settings.default_max_cases_per_mediator,
            Some(value) => u32::try_from(value)
                .ok()
                .filter(|cap| *cap > 0)
                .ok_or(ValidationError::MaxCasesPerMediator { value })?,
        };

        Ok(TaskConfig {
            strategy,
            batch_size,
            max_cases_per_mediator,
            mediation_center_ids: self.mediation_center_ids,
            mediator_ids: self.mediator_ids,
            seed: self.seed,
        })
    }
}

/// Case list checks shared by task start and the manual-strategy queue.
pub(crate) fn validate_case_ids(case_ids: &[CaseId]) -> Result<(), ValidationError> {
    if case_ids.is_empty() {
        return Err(ValidationError::EmptyCaseList);
    }
    let mut seen = HashSet::with_capacity(case_ids.len());
    for case in case_ids {
        if !seen.insert(*case) {
            return Err(ValidationError::DuplicateCase { case: *case });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOutcome {
    Success,
    Failure,
}

/// Audit entry for one processed case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub case_id: CaseId,
    pub outcome: ResultOutcome,
    pub mediator_id: Option<MediatorId>,
    pub center_id: Option<CenterId>,
    pub rule_id: Option<RuleId>,
    /// Matched rule name on success, failure reason otherwise.
    pub reason: Option<String>,
    pub failure: Option<CaseFailure>,
    pub latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl AssignmentResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ResultOutcome::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentTask {
    pub id: TaskId,
    pub name: String,
    pub strategy: StrategyKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub total_count: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub config: TaskConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl AssignmentTask {
    pub fn processed_count(&self) -> usize {
        self.success_count + self.fail_count
    }
}

/// `round(100 * processed / total)`, half away from zero.
pub fn progress_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let processed = processed.min(total);
    ((200 * processed + total) / (2 * total)) as u8
}

/// A task together with its immutable input and append-only results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: AssignmentTask,
    pub case_ids: Vec<CaseId>,
    pub results: Vec<AssignmentResult>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        name: String,
        config: TaskConfig,
        case_ids: Vec<CaseId>,
        now: DateTime<Utc>,
    ) -> Self {
        let task = AssignmentTask {
            id,
            name,
            strategy: config.strategy,
            status: TaskStatus::Pending,
            progress: 0,
            total_count: case_ids.len(),
            success_count: 0,
            fail_count: 0,
            config,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            error_message: None,
        };
        Self {
            task,
            case_ids,
            results: Vec::new(),
        }
    }

    /// Move to `next`, or report why the edge is not allowed.
    pub fn transition(
        &mut self,
        next: TaskStatus,
        action: TaskAction,
        now: DateTime<Utc>,
    ) -> Result<(), AssignmentError> {
        let current = self.task.status;
        if !current.can_transition(next) {
            return Err(AssignmentError::InvalidTransition {
                task: self.task.id,
                from: current,
                action,
            });
        }

        self.task.status = next;
        self.task.updated_at = now;
        if next == TaskStatus::Running && self.task.started_at.is_none() {
            self.task.started_at = Some(now);
        }
        if next.is_terminal() {
            self.task.finished_at = Some(now);
        }
        Ok(())
    }

    /// First input case without a recorded result, in input order.
    pub fn next_unprocessed(&self) -> Option<CaseId> {
        let done: HashSet<CaseId> = self.results.iter().map(|result| result.case_id).collect();
        self.case_ids
            .iter()
            .copied()
            .find(|case| !done.contains(case))
    }

    /// Append a result and keep the counters and progress consistent with it.
    pub fn record(&mut self, result: AssignmentResult) {
        match result.outcome {
            ResultOutcome::Success => self.task.success_count += 1,
            ResultOutcome::Failure => self.task.fail_count += 1,
        }
        self.task.updated_at = result.recorded_at;
        self.results.push(result);
        self.task.progress = progress_percent(self.task.processed_count(), self.task.total_count);
    }
}

/// Task listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub strategy: Option<StrategyKind>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &AssignmentTask) -> bool {
        self.name
            .as_deref()
            .map_or(true, |name| task.name.contains(name))
            && self.status.map_or(true, |status| task.status == status)
            && self.strategy.map_or(true, |strategy| task.strategy == strategy)
    }
}
