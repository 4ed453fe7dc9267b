use crate::infra::{parse_strategy, sample_case_ids, seeded_assignment};
use case_assignment::config::{AssignmentSettings, ExecutionMode};
use case_assignment::error::AppError;
use case_assignment::workflows::assignment::{
    AssignmentError, AssignmentService, CaseAssignmentStatus, CaseId, CenterId, InMemoryDirectory,
    ManualAssignment, ManualStatus, MediatorId, PageRequest, PendingAssignmentId, PendingStatus,
    RuleFilter, StartAssignment, StartedAssignment, StatsRange, StepOutcome, StrategyKind,
    TaskConfigDraft, TaskId,
};
use clap::Args;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Assignment strategy: rule_based, load_balance, random or manual
    #[arg(long, value_parser = parse_strategy, default_value = "rule_based")]
    pub(crate) strategy: StrategyKind,
    /// Seed for the random strategy so runs can be replayed
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Number of seeded cases to put in the batch (1-24)
    #[arg(long, default_value_t = 20)]
    pub(crate) cases: usize,
    /// Override the batch size limit for this run
    #[arg(long)]
    pub(crate) batch_size: Option<i64>,
    /// Pause the task after this many cases, then resume it
    #[arg(long)]
    pub(crate) pause_after: Option<usize>,
    /// Skip the manual placement and re-assignment walkthrough
    #[arg(long)]
    pub(crate) skip_manual: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        strategy,
        seed,
        cases,
        batch_size,
        pause_after,
        skip_manual,
    } = args;

    let settings = AssignmentSettings {
        execution: ExecutionMode::Inline,
        ..AssignmentSettings::default()
    };
    let seeded = seeded_assignment(settings)?;
    let service = seeded.service.as_ref();

    println!("Case assignment demo ({} strategy)", strategy.label());
    render_rules(service)?;
    render_loads("Mediator loads before the batch", service)?;

    let all_cases = sample_case_ids();
    let (batch, held_back) = all_cases.split_at(cases.clamp(1, all_cases.len()));

    let mut config = TaskConfigDraft::new(strategy);
    config.seed = seed;
    config.batch_size = batch_size;
    let request = StartAssignment {
        name: Some(format!("demo {}", strategy.label())),
        config,
        case_ids: batch.to_vec(),
    };

    let outcome = match pause_after {
        Some(limit) if strategy != StrategyKind::Manual => run_with_pause(service, request, limit),
        _ => service.start_assignment(request),
    };
    match outcome {
        Ok(StartedAssignment::Task { task }) => render_task(service, task.id)?,
        Ok(StartedAssignment::Queued { requests }) => review_queue(service, &requests)?,
        Err(err) => {
            println!("\nBatch rejected: {err}");
            return Ok(());
        }
    }

    render_loads("\nMediator loads after the batch", service)?;
    render_statistics(service)?;

    if !skip_manual {
        manual_walkthrough(service, &seeded.directory, held_back)?;
    }

    Ok(())
}

/// Launch the batch, process `limit` cases, pause, then resume to completion.
fn run_with_pause(
    service: &AssignmentService,
    request: StartAssignment,
    limit: usize,
) -> Result<StartedAssignment, AssignmentError> {
    let config = request.config.validate(service.settings())?;
    let engine = service.engine();
    let task = engine.launch(request.name, config, request.case_ids)?;

    for _ in 0..limit {
        if let StepOutcome::Halted(_) = engine.step(task.id)? {
            break;
        }
    }

    match service.pause_task(task.id) {
        Ok(paused) => {
            println!(
                "\nPaused {} after {} of {} cases ({}%)",
                paused.name,
                paused.processed_count(),
                paused.total_count,
                paused.progress
            );
            let resumed = service.resume_task(task.id)?;
            println!("Resumed; task is now {}", resumed.status);
            Ok(StartedAssignment::Task { task: resumed })
        }
        Err(AssignmentError::InvalidTransition { from, .. }) => {
            println!("\nTask was already {from} before it could be paused");
            Ok(StartedAssignment::Task { task })
        }
        Err(err) => Err(err),
    }
}

fn render_rules(service: &AssignmentService) -> Result<(), AppError> {
    let rules = service.list_rules(&RuleFilter::default(), PageRequest::default())?;
    println!("Rules ({} configured):", rules.total);
    for rule in &rules.records {
        println!(
            "  - #{} p{} [{}] {} ({} conditions, {} actions)",
            rule.id,
            rule.priority,
            rule.status.label(),
            rule.name,
            rule.conditions.len(),
            rule.actions.len()
        );
    }
    Ok(())
}

fn render_loads(title: &str, service: &AssignmentService) -> Result<(), AppError> {
    println!("{title}:");
    let roster = service.list_mediators(
        None,
        PageRequest {
            page: 1,
            size: service.settings().max_page_size,
        },
    )?;
    for mediator in roster.records {
        let workload = service.mediator_workload(mediator.id)?;
        println!(
            "  - {} {} (center {}): {}/{} ({:.0}%){}",
            workload.mediator_id,
            workload.name,
            workload.center_id,
            workload.current_load,
            workload.max_load,
            workload.workload_rate * 100.0,
            if mediator.is_active() { "" } else { " inactive" }
        );
    }
    Ok(())
}

fn render_task(service: &AssignmentService, id: TaskId) -> Result<(), AppError> {
    let record = service.get_task(id)?;
    let task = &record.task;
    println!(
        "\nTask {} '{}' -> {} | {} processed, {} assigned, {} failed",
        task.id,
        task.name,
        task.status,
        task.processed_count(),
        task.success_count,
        task.fail_count
    );
    if let Some(message) = &task.error_message {
        println!("  Task error: {message}");
    }

    for result in &record.results {
        match (result.mediator_id, &result.failure) {
            (Some(mediator), None) => println!(
                "  - case {} -> mediator {} (center {}){}",
                result.case_id,
                mediator,
                result
                    .center_id
                    .map(|center| center.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                result
                    .reason
                    .as_deref()
                    .map(|rule| format!(" via '{rule}'"))
                    .unwrap_or_default()
            ),
            (_, failure) => println!(
                "  - case {} not assigned: {}",
                result.case_id,
                failure
                    .as_ref()
                    .map(|failure| failure.to_string())
                    .or_else(|| result.reason.clone())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        }
    }
    Ok(())
}

/// Print the queued requests and approve those that carry a proposal.
fn review_queue(
    service: &AssignmentService,
    requests: &[PendingAssignmentId],
) -> Result<(), AppError> {
    println!("\n{} cases queued for manual review", requests.len());
    let queued = service.list_pending(
        Some(PendingStatus::Pending),
        PageRequest {
            page: 1,
            size: service.settings().max_page_size,
        },
    )?;

    for request in queued
        .records
        .into_iter()
        .filter(|request| requests.contains(&request.id))
    {
        match request.to_mediator_id {
            Some(mediator) => match service.approve_pending_assignment(
                request.id,
                true,
                Some("approved from the demo".to_string()),
            ) {
                Ok(_) => println!("  - case {} approved onto mediator {}", request.case_id, mediator),
                Err(err) => println!("  - case {} left open: {}", request.case_id, err),
            },
            None => println!("  - case {} has no proposal; left open", request.case_id),
        }
    }
    Ok(())
}

fn render_statistics(service: &AssignmentService) -> Result<(), AppError> {
    let stats = service.statistics(StatsRange::default())?;
    println!(
        "\nStatistics: {} tasks | {} processed | {} assigned | {:.0}% success | {:.2} ms avg",
        stats.total_tasks,
        stats.total_processed,
        stats.total_assigned,
        stats.success_rate * 100.0,
        stats.average_latency_ms
    );
    for rule in &stats.rules {
        println!(
            "  - rule {} {}: {}/{} ({:.0}%)",
            rule.rule_id,
            rule.rule_name.as_deref().unwrap_or("(deleted)"),
            rule.successes,
            rule.attempts,
            rule.success_rate * 100.0
        );
    }
    for share in &stats.mediators {
        println!(
            "  - mediator {}: {} cases ({:.0}% of placements)",
            share.mediator_id,
            share.assigned,
            share.share * 100.0
        );
    }
    Ok(())
}

fn manual_walkthrough(
    service: &AssignmentService,
    directory: &InMemoryDirectory,
    held_back: &[CaseId],
) -> Result<(), AppError> {
    println!("\nManual placement");
    if held_back.is_empty() {
        println!("  No cases were held back from the batch");
    } else {
        let report = service.manual_assign(ManualAssignment {
            case_ids: held_back.to_vec(),
            center_id: Some(CenterId(3)),
            mediator_id: None,
            reason: Some("routed by hand from the demo".to_string()),
        })?;
        for outcome in &report.outcomes {
            match outcome.status {
                ManualStatus::Assigned => println!(
                    "  - case {} placed on mediator {}",
                    outcome.case_id,
                    outcome
                        .mediator_id
                        .map(|id| id.to_string())
                        .unwrap_or_default()
                ),
                ManualStatus::PendingApproval => {
                    println!("  - case {} sent for approval", outcome.case_id)
                }
                ManualStatus::Failed => println!(
                    "  - case {} failed: {}",
                    outcome.case_id,
                    outcome
                        .failure
                        .as_ref()
                        .map(|failure| failure.to_string())
                        .unwrap_or_default()
                ),
            }
        }
    }

    let target = MediatorId(202);
    let Some(case) = directory.cases().into_iter().find(|case| {
        case.assignment_status == CaseAssignmentStatus::Assigned && case.mediator_id != Some(target)
    }) else {
        println!("  No assigned case available for a re-assignment");
        return Ok(());
    };

    let request = service.request_reassignment(
        case.id,
        target,
        Some("debtor asked for a different mediator".to_string()),
    )?;
    println!(
        "Re-assignment request {} opened for case {} ({} -> {})",
        request.id,
        case.id,
        request
            .from_mediator_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        target
    );
    match service.approve_pending_assignment(request.id, true, Some("supervisor sign-off".to_string())) {
        Ok(decided) => println!("  Request {} {}", decided.id, decided.status.label()),
        Err(err) => println!("  Approval refused: {err}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_assignment::workflows::assignment::TaskStatus;

    #[test]
    fn paused_demo_batch_still_processes_every_case() {
        let settings = AssignmentSettings {
            execution: ExecutionMode::Inline,
            ..AssignmentSettings::default()
        };
        let seeded = seeded_assignment(settings).expect("seed");
        let request = StartAssignment {
            name: None,
            config: TaskConfigDraft::new(StrategyKind::LoadBalance),
            case_ids: sample_case_ids(),
        };

        let started = run_with_pause(&seeded.service, request, 5).expect("batch runs");
        let task = match started {
            StartedAssignment::Task { task } => task,
            other => panic!("expected a task, got {other:?}"),
        };
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.processed_count(), sample_case_ids().len());

        let record = seeded.service.get_task(task.id).expect("stored task");
        let mut seen: Vec<_> = record.results.iter().map(|result| result.case_id).collect();
        seen.dedup();
        assert_eq!(seen, sample_case_ids());
    }
}
