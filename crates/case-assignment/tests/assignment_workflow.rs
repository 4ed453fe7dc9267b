//! End-to-end tests for the case assignment workflow.
//!
//! Scenarios drive the public service facade and HTTP router against the
//! in-memory collaborators, covering rule routing, task control, manual
//! placement and background execution without reaching into private modules.

mod common {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};

    use case_assignment::config::{AssignmentSettings, ExecutionMode};
    use case_assignment::workflows::assignment::{
        ActionDraft, AssignmentService, AssignmentStores, Case, CaseAssignmentStatus, CaseId,
        CenterId, ConditionDraft, DirectoryStatus, InMemoryDirectory, InMemoryPendingStore,
        InMemoryRuleStore, InMemoryTaskStore, MediationCenter, Mediator, MediatorId, RuleDraft,
    };

    pub(super) fn case(id: u64, debt_amount: f64, region: &str) -> Case {
        Case {
            id: CaseId(id),
            case_no: format!("TJ2024{id:04}"),
            debt_amount,
            overdue_days: 90,
            debtor_age: Some(41),
            debtor_gender: Some("male".to_string()),
            debtor_region: region.to_string(),
            case_type: "consumer_loan".to_string(),
            client_id: 3,
            created_on: NaiveDate::from_ymd_opt(2024, 5, 2).expect("valid date"),
            assignment_status: CaseAssignmentStatus::Unassigned,
            mediator_id: None,
            center_id: None,
        }
    }

    fn mediator(id: u64, center: u64, current: u32, max: u32) -> Mediator {
        Mediator {
            id: MediatorId(id),
            name: format!("Mediator {id}"),
            center_id: CenterId(center),
            specialties: vec!["consumer_loan".to_string()],
            current_load: current,
            max_load: max,
            success_rate: 0.75,
            status: DirectoryStatus::Active,
        }
    }

    fn center(id: u64, name: &str, region: &str) -> MediationCenter {
        MediationCenter {
            id: CenterId(id),
            name: name.to_string(),
            region: region.to_string(),
            status: DirectoryStatus::Active,
        }
    }

    pub(super) struct Harness {
        pub(super) directory: InMemoryDirectory,
        pub(super) stores: AssignmentStores,
    }

    impl Harness {
        pub(super) fn new(cases: Vec<Case>) -> Self {
            let directory = InMemoryDirectory::new(
                cases,
                vec![
                    mediator(101, 1, 0, 2),
                    mediator(102, 1, 0, 20),
                    mediator(301, 3, 0, 20),
                ],
                vec![
                    center(1, "Harbor Mediation Center", "east"),
                    center(3, "Valley Mediation Center", "west"),
                ],
            );
            let stores = AssignmentStores {
                cases: Arc::new(directory.clone()),
                mediators: Arc::new(directory.clone()),
                rules: Arc::new(InMemoryRuleStore::default()),
                tasks: Arc::new(InMemoryTaskStore::default()),
                pending: Arc::new(InMemoryPendingStore::default()),
            };
            Self { directory, stores }
        }

        pub(super) fn service(&self, execution: ExecutionMode) -> AssignmentService {
            let settings = AssignmentSettings {
                execution,
                ..AssignmentSettings::default()
            };
            AssignmentService::new(self.stores.clone(), settings)
        }

        pub(super) fn mediator_of(&self, id: u64) -> Option<MediatorId> {
            self.directory.case(CaseId(id)).and_then(|case| case.mediator_id)
        }

        pub(super) fn load_of(&self, id: u64) -> u32 {
            self.directory
                .mediator(MediatorId(id))
                .map_or(0, |mediator| mediator.current_load)
        }
    }

    pub(super) fn large_debt_rule() -> RuleDraft {
        RuleDraft {
            name: "Large debts to senior mediator".to_string(),
            description: Some(format!("created {}", Utc::now().date_naive())),
            priority: 1,
            status: "active".to_string(),
            conditions: vec![ConditionDraft {
                field: "debtAmount".to_string(),
                operator: "gte".to_string(),
                value: "100000".to_string(),
                logic: "AND".to_string(),
            }],
            actions: vec![ActionDraft {
                kind: "assign_mediator".to_string(),
                target: "101".to_string(),
                weight: 10,
            }],
        }
    }

    pub(super) fn regional_rule() -> RuleDraft {
        RuleDraft {
            name: "Route by debtor region".to_string(),
            description: None,
            priority: 5,
            status: "active".to_string(),
            conditions: Vec::new(),
            actions: vec![ActionDraft {
                kind: "assign_mediation_center".to_string(),
                target: "same_region".to_string(),
                weight: 1,
            }],
        }
    }
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use case_assignment::config::ExecutionMode;
use case_assignment::workflows::assignment::{
    assignment_router, CaseFailure, CaseId, ManualAssignment, ManualStatus, MediatorId,
    PageRequest, StartAssignment, StartedAssignment, StrategyKind, TaskConfigDraft, TaskFilter,
    TaskId, TaskStatus,
};

use common::*;

fn start(strategy: StrategyKind, case_ids: &[u64]) -> StartAssignment {
    StartAssignment {
        name: Some("nightly batch".to_string()),
        config: TaskConfigDraft::new(strategy),
        case_ids: case_ids.iter().copied().map(CaseId).collect(),
    }
}

fn started_task_id(started: StartedAssignment) -> TaskId {
    match started {
        StartedAssignment::Task { task } => task.id,
        other => panic!("expected a task, got {other:?}"),
    }
}

#[test]
fn rules_route_large_debts_and_fall_back_to_region() {
    let harness = Harness::new(vec![
        case(1, 250_000.0, "east"),
        case(2, 180_000.0, "west"),
        case(3, 120_000.0, "east"),
        case(4, 5_000.0, "west"),
    ]);
    let service = harness.service(ExecutionMode::Inline);
    service.create_rule(large_debt_rule()).expect("rule");
    service.create_rule(regional_rule()).expect("rule");

    let task_id = started_task_id(
        service
            .start_assignment(start(StrategyKind::RuleBased, &[1, 2, 3, 4]))
            .expect("start"),
    );
    let record = service.get_task(task_id).expect("task");

    assert_eq!(record.task.status, TaskStatus::Completed);
    assert_eq!(record.task.name, "nightly batch");
    assert_eq!(record.task.success_count, 4);
    assert_eq!(harness.mediator_of(1), Some(MediatorId(101)));
    assert_eq!(harness.mediator_of(2), Some(MediatorId(101)));
    // 101 is full after two cases; case 3 drops to the regional rule.
    assert_eq!(harness.mediator_of(3), Some(MediatorId(102)));
    assert_eq!(harness.mediator_of(4), Some(MediatorId(301)));
    assert_eq!(harness.load_of(101), 2);

    let stats = service.statistics(Default::default()).expect("stats");
    assert_eq!(stats.total_assigned, 4);
    assert_eq!(stats.rules.len(), 2);
}

#[test]
fn pausing_and_resuming_never_reprocesses_a_case() {
    let harness = Harness::new((1..=4).map(|id| case(id, 1_000.0, "east")).collect());
    let service = harness.service(ExecutionMode::Inline);
    let engine = Arc::clone(service.engine());

    let config = TaskConfigDraft::new(StrategyKind::LoadBalance)
        .validate(service.settings())
        .expect("config");
    let task = engine
        .launch(None, config, (1..=4).map(CaseId).collect())
        .expect("launch");
    engine.step(task.id).expect("case 1");
    engine.step(task.id).expect("case 2");
    service.pause_task(task.id).expect("pause");

    let resumed = service.resume_task(task.id).expect("resume");
    assert_eq!(resumed.status, TaskStatus::Completed);
    let record = service.get_task(task.id).expect("task");
    let processed: Vec<_> = record.results.iter().map(|result| result.case_id.0).collect();
    assert_eq!(processed, vec![1, 2, 3, 4]);
}

#[test]
fn manual_placement_and_approval_round_trip() {
    let harness = Harness::new(vec![case(1, 1_000.0, "east"), case(2, 2_000.0, "west")]);
    let service = harness.service(ExecutionMode::Inline);

    let report = service
        .manual_assign(ManualAssignment {
            case_ids: vec![CaseId(1)],
            center_id: None,
            mediator_id: Some(MediatorId(102)),
            reason: Some("client request".to_string()),
        })
        .expect("manual");
    assert_eq!(report.outcomes[0].status, ManualStatus::Assigned);

    let report = service
        .manual_assign(ManualAssignment {
            case_ids: vec![CaseId(1), CaseId(9)],
            center_id: None,
            mediator_id: Some(MediatorId(301)),
            reason: None,
        })
        .expect("manual");
    assert_eq!(report.outcomes[0].status, ManualStatus::PendingApproval);
    assert_eq!(report.outcomes[1].failure, Some(CaseFailure::CaseNotFound));

    let request = report.outcomes[0].pending_request_id.expect("request id");
    service
        .approve_pending_assignment(request, true, None)
        .expect("approve");
    assert_eq!(harness.mediator_of(1), Some(MediatorId(301)));
    assert_eq!(harness.load_of(102), 0);
    assert_eq!(harness.load_of(301), 1);
}

#[test]
fn concurrent_tasks_each_run_to_completion() {
    let harness = Harness::new((1..=20).map(|id| case(id, 1_000.0, "east")).collect());
    let service = Arc::new(harness.service(ExecutionMode::Inline));

    let handles: Vec<_> = [1..=10, 11..=20]
        .into_iter()
        .map(|ids| {
            let service = Arc::clone(&service);
            let ids: Vec<u64> = ids.collect();
            thread::spawn(move || {
                started_task_id(
                    service
                        .start_assignment(start(StrategyKind::LoadBalance, &ids))
                        .expect("start"),
                )
            })
        })
        .collect();

    for handle in handles {
        let id = handle.join().expect("worker finished");
        let record = service.get_task(id).expect("task");
        assert_eq!(record.task.status, TaskStatus::Completed);
        assert_eq!(record.results.len(), 10);
    }
    let placed: u32 = [101, 102, 301].into_iter().map(|id| harness.load_of(id)).sum();
    assert_eq!(placed, 20);
    assert_eq!(service.reconcile().expect("reconcile"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_execution_returns_before_the_batch_finishes() {
    let harness = Harness::new((1..=6).map(|id| case(id, 1_000.0, "west")).collect());
    let service = harness.service(ExecutionMode::Background);

    let started = service
        .start_assignment(start(StrategyKind::Random, &[1, 2, 3, 4, 5, 6]))
        .expect("start");
    let task_id = match started {
        StartedAssignment::Task { task } => {
            assert_eq!(task.status, TaskStatus::Running);
            task.id
        }
        other => panic!("expected a task, got {other:?}"),
    };

    let mut status = TaskStatus::Running;
    for _ in 0..200 {
        status = service.get_task(task_id).expect("task").task.status;
        if status.is_terminal() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(status, TaskStatus::Completed);

    let page = service
        .list_tasks(&TaskFilter::with_status(TaskStatus::Completed), PageRequest::default())
        .expect("list");
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn http_flow_creates_rule_and_runs_a_batch() {
    let harness = Harness::new(vec![case(1, 300_000.0, "east"), case(2, 10.0, "east")]);
    let router = assignment_router(Arc::new(harness.service(ExecutionMode::Inline)));

    let rule = serde_json::to_vec(&large_debt_rule()).expect("serialize rule");
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/assignment/rules")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(rule))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let start = json!({ "config": { "strategy": "rule_based" }, "case_ids": [1, 2] });
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/assignment/smart-assignment/start")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(start.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = router
        .oneshot(
            Request::get("/api/v1/assignment/tasks?status=completed")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    let page: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(page["total"], 1);
    assert_eq!(page["records"][0]["success_count"], 1);
    assert_eq!(page["records"][0]["fail_count"], 1);
    assert_eq!(harness.mediator_of(1), Some(MediatorId(101)));
}
