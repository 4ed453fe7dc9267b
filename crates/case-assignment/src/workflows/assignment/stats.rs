//! Read-only projections over recorded tasks.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::domain::{MediatorId, RuleId};
use super::rules::AssignmentRule;
use super::task::TaskRecord;

/// Inclusive creation-date window; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl StatsRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEffectiveness {
    pub rule_id: RuleId,
    /// `None` once the rule has been deleted.
    pub rule_name: Option<String>,
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediatorShare {
    pub mediator_id: MediatorId,
    pub assigned: usize,
    /// Fraction of all successful placements in the window.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentStatistics {
    pub total_tasks: usize,
    pub total_processed: usize,
    pub total_assigned: usize,
    pub total_failed: usize,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub rules: Vec<RuleEffectiveness>,
    pub mediators: Vec<MediatorShare>,
}

/// Per-day counts; `assigned` counts every attempted case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub assigned: usize,
    pub success: usize,
    pub failed: usize,
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

pub fn summarize(
    records: &[TaskRecord],
    rules: &[AssignmentRule],
    range: StatsRange,
) -> AssignmentStatistics {
    let selected: Vec<&TaskRecord> = records
        .iter()
        .filter(|record| range.contains(record.task.created_at.date_naive()))
        .collect();

    let mut processed = 0;
    let mut assigned = 0;
    let mut latency_total: u64 = 0;
    let mut per_rule: BTreeMap<RuleId, (usize, usize)> = BTreeMap::new();
    let mut per_mediator: BTreeMap<MediatorId, usize> = BTreeMap::new();

    for result in selected.iter().flat_map(|record| record.results.iter()) {
        processed += 1;
        latency_total = latency_total.saturating_add(result.latency_ms);
        if let Some(rule) = result.rule_id {
            let entry = per_rule.entry(rule).or_default();
            entry.0 += 1;
            if result.is_success() {
                entry.1 += 1;
            }
        }
        if result.is_success() {
            assigned += 1;
            if let Some(mediator) = result.mediator_id {
                *per_mediator.entry(mediator).or_default() += 1;
            }
        }
    }

    let rules = per_rule
        .into_iter()
        .map(|(rule_id, (attempts, successes))| RuleEffectiveness {
            rule_id,
            rule_name: rules
                .iter()
                .find(|rule| rule.id == rule_id)
                .map(|rule| rule.name.clone()),
            attempts,
            successes,
            success_rate: ratio(successes, attempts),
        })
        .collect();

    let mut mediators: Vec<MediatorShare> = per_mediator
        .into_iter()
        .map(|(mediator_id, count)| MediatorShare {
            mediator_id,
            assigned: count,
            share: ratio(count, assigned),
        })
        .collect();
    mediators.sort_by(|a, b| b.assigned.cmp(&a.assigned).then(a.mediator_id.cmp(&b.mediator_id)));

    AssignmentStatistics {
        total_tasks: selected.len(),
        total_processed: processed,
        total_assigned: assigned,
        total_failed: processed - assigned,
        success_rate: ratio(assigned, processed),
        average_latency_ms: if processed == 0 {
            0.0
        } else {
            latency_total as f64 / processed as f64
        },
        rules,
        mediators,
    }
}

/// One entry per day for the `days` days ending at `today`, oldest first.
/// Results are bucketed by the day they were recorded.
pub fn trend(records: &[TaskRecord], today: NaiveDate, days: u32) -> Vec<DailyTrend> {
    let days = i64::from(days.max(1));
    let first = today - Duration::days(days - 1);
    let mut buckets: BTreeMap<NaiveDate, DailyTrend> = (0..days)
        .map(|offset| {
            let date = first + Duration::days(offset);
            let empty = DailyTrend {
                date,
                assigned: 0,
                success: 0,
                failed: 0,
            };
            (date, empty)
        })
        .collect();

    for result in records.iter().flat_map(|record| record.results.iter()) {
        let Some(bucket) = buckets.get_mut(&result.recorded_at.date_naive()) else {
            continue;
        };
        bucket.assigned += 1;
        if result.is_success() {
            bucket.success += 1;
        } else {
            bucket.failed += 1;
        }
    }

    buckets.into_values().collect()
}
