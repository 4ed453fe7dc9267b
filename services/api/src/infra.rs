use case_assignment::config::AssignmentSettings;
use case_assignment::error::AppError;
use case_assignment::workflows::assignment::{
    ActionDraft, AssignmentService, AssignmentStores, Case, CaseAssignmentStatus, CaseId,
    CenterId, ConditionDraft, DirectoryStatus, InMemoryDirectory, InMemoryPendingStore,
    InMemoryRuleStore, InMemoryTaskStore, MediationCenter, Mediator, MediatorId, RuleDraft,
    StrategyKind,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Service over in-memory collaborators, plus the shared directory so
/// callers can inspect case placements and loads.
pub(crate) struct SeededAssignment {
    pub(crate) service: Arc<AssignmentService>,
    pub(crate) directory: InMemoryDirectory,
}

pub(crate) fn seeded_assignment(settings: AssignmentSettings) -> Result<SeededAssignment, AppError> {
    let directory = InMemoryDirectory::new(sample_cases(), sample_mediators(), sample_centers());
    let stores = AssignmentStores {
        cases: Arc::new(directory.clone()),
        mediators: Arc::new(directory.clone()),
        rules: Arc::new(InMemoryRuleStore::default()),
        tasks: Arc::new(InMemoryTaskStore::default()),
        pending: Arc::new(InMemoryPendingStore::default()),
    };
    let service = AssignmentService::new(stores, settings);
    for draft in sample_rules() {
        service.create_rule(draft)?;
    }

    Ok(SeededAssignment {
        service: Arc::new(service),
        directory,
    })
}

fn sample_centers() -> Vec<MediationCenter> {
    [
        (1, "Harbour Mediation Center", "east"),
        (2, "Riverside Mediation Center", "west"),
        (3, "Upland Mediation Center", "north"),
    ]
    .into_iter()
    .map(|(id, name, region)| MediationCenter {
        id: CenterId(id),
        name: name.to_string(),
        region: region.to_string(),
        status: DirectoryStatus::Active,
    })
    .collect()
}

fn sample_mediators() -> Vec<Mediator> {
    let roster = [
        (101, "Lin Qiao", 1, 12, 20, 0.86, "credit_card"),
        (102, "Ana Duarte", 1, 4, 20, 0.78, "consumer_loan"),
        (103, "Sam Okafor", 1, 19, 20, 0.91, "credit_card"),
        (201, "Priya Nair", 2, 2, 15, 0.74, "auto_loan"),
        (202, "Tomas Berg", 2, 9, 15, 0.81, "consumer_loan"),
        (301, "Ivy Chen", 3, 0, 10, 0.69, "credit_card"),
    ];

    let mut mediators: Vec<Mediator> = roster
        .into_iter()
        .map(|(id, name, center, current, max, success_rate, specialty)| Mediator {
            id: MediatorId(id),
            name: name.to_string(),
            center_id: CenterId(center),
            specialties: vec![specialty.to_string()],
            current_load: current,
            max_load: max,
            success_rate,
            status: DirectoryStatus::Active,
        })
        .collect();

    mediators.push(Mediator {
        id: MediatorId(302),
        name: "Jon Halvorsen".to_string(),
        center_id: CenterId(3),
        specialties: Vec::new(),
        current_load: 0,
        max_load: 10,
        success_rate: 0.0,
        status: DirectoryStatus::Inactive,
    });
    mediators
}

const REGIONS: [&str; 3] = ["east", "west", "north"];
const CASE_TYPES: [&str; 3] = ["credit_card", "consumer_loan", "auto_loan"];

/// Twenty-four unassigned cases with a spread of amounts, regions and types.
/// Ids run from 1 upward.
fn sample_cases() -> Vec<Case> {
    let opened = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap_or_default();
    (1..=24u64)
        .map(|id| {
            let index = id as usize;
            Case {
                id: CaseId(id),
                case_no: format!("TJ2024{id:05}"),
                debt_amount: ((id * 37_919) % 240_000) as f64 + 1_500.0,
                overdue_days: ((id * 17) % 180) as u32,
                debtor_age: Some(22 + ((id * 7) % 45) as u32),
                debtor_gender: Some(if id % 2 == 0 { "female" } else { "male" }.to_string()),
                debtor_region: REGIONS[index % REGIONS.len()].to_string(),
                case_type: CASE_TYPES[index % CASE_TYPES.len()].to_string(),
                client_id: 1 + id % 4,
                created_on: opened + chrono::Duration::days((id % 10) as i64),
                assignment_status: CaseAssignmentStatus::Unassigned,
                mediator_id: None,
                center_id: None,
            }
        })
        .collect()
}

pub(crate) fn sample_case_ids() -> Vec<CaseId> {
    (1..=24).map(CaseId).collect()
}

fn condition(field: &str, operator: &str, value: &str) -> ConditionDraft {
    ConditionDraft {
        field: field.to_string(),
        operator: operator.to_string(),
        value: value.to_string(),
        logic: "AND".to_string(),
    }
}

fn action(kind: &str, target: &str, weight: i32) -> ActionDraft {
    ActionDraft {
        kind: kind.to_string(),
        target: target.to_string(),
        weight,
    }
}

fn sample_rules() -> Vec<RuleDraft> {
    vec![
        RuleDraft {
            name: "Large overdue debts to senior mediators".to_string(),
            description: Some("Debts of 100k or more, overdue at least 30 days".to_string()),
            priority: 1,
            status: "active".to_string(),
            conditions: vec![
                condition("debtAmount", "gte", "100000"),
                condition("overdueDays", "gte", "30"),
            ],
            actions: vec![
                action("assign_mediator", "101,103", 10),
                action("assign_mediation_center", "2", 5),
            ],
        },
        RuleDraft {
            name: "Card debt stays in region".to_string(),
            description: None,
            priority: 5,
            status: "active".to_string(),
            conditions: vec![condition("caseType", "eq", "credit_card")],
            actions: vec![action("assign_mediation_center", "same_region", 1)],
        },
        RuleDraft {
            name: "Young debtors".to_string(),
            description: Some("Kept for comparison; disabled".to_string()),
            priority: 3,
            status: "inactive".to_string(),
            conditions: vec![condition("debtorAge", "lt", "25")],
            actions: vec![action("assign_mediator", "301", 1)],
        },
    ]
}

pub(crate) fn parse_strategy(raw: &str) -> Result<StrategyKind, String> {
    StrategyKind::parse(raw).map_err(|err| err.to_string())
}
