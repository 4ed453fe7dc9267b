use chrono::NaiveDate;
use serde::Serialize;

use super::{AssignmentRule, Condition, ConditionOperator, Logic, RuleAction};
use crate::workflows::assignment::domain::Case;

/// Case fields a condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CaseField {
    DebtAmount,
    OverdueDays,
    DebtorAge,
    DebtorGender,
    DebtorRegion,
    CaseType,
    ClientId,
    CreateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Number,
    Text,
    Date,
}

enum FieldValue<'a> {
    Number(f64),
    Text(&'a str),
    Date(NaiveDate),
}

impl CaseField {
    pub fn parse(name: &str) -> Option<Self> {
        let field = match name {
            "debtAmount" => Self::DebtAmount,
            "overdueDays" => Self::OverdueDays,
            "debtorAge" => Self::DebtorAge,
            "debtorGender" => Self::DebtorGender,
            "debtorRegion" => Self::DebtorRegion,
            "caseType" => Self::CaseType,
            "clientId" => Self::ClientId,
            "createTime" => Self::CreateTime,
            _ => return None,
        };
        Some(field)
    }

    pub const fn kind(self) -> FieldKind {
        match self {
            Self::DebtAmount | Self::OverdueDays | Self::DebtorAge | Self::ClientId => {
                FieldKind::Number
            }
            Self::DebtorGender | Self::DebtorRegion | Self::CaseType => FieldKind::Text,
            Self::CreateTime => FieldKind::Date,
        }
    }

    fn extract(self, case: &Case) -> Option<FieldValue<'_>> {
        let value = match self {
            Self::DebtAmount => FieldValue::Number(case.debt_amount),
            Self::OverdueDays => FieldValue::Number(f64::from(case.overdue_days)),
            Self::DebtorAge => FieldValue::Number(f64::from(case.debtor_age?)),
            Self::ClientId => FieldValue::Number(case.client_id as f64),
            Self::DebtorGender => FieldValue::Text(case.debtor_gender.as_deref()?),
            Self::DebtorRegion => FieldValue::Text(&case.debtor_region),
            Self::CaseType => FieldValue::Text(&case.case_type),
            Self::CreateTime => FieldValue::Date(case.created_on),
        };
        Some(value)
    }
}

/// Outcome of evaluating one rule against one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub matched: bool,
    /// The rule's actions by descending weight; empty when `matched` is false.
    pub actions: Vec<RuleAction>,
}

/// Evaluate `rule` against `case` without side effects.
///
/// Conditions are folded strictly left to right: the connector stored on
/// condition `i - 1` joins the running result with condition `i`. There is no
/// AND-before-OR precedence, so `a OR b AND c` reads as `(a OR b) AND c`.
/// Every condition is evaluated even when the outcome is already decided.
/// A rule without conditions matches every case.
pub fn evaluate(rule: &AssignmentRule, case: &Case) -> RuleMatch {
    let mut conditions = rule.conditions.iter();
    let matched = match conditions.next() {
        None => true,
        Some(first) => {
            let mut result = evaluate_condition(first, case);
            let mut logic = first.logic;
            for condition in conditions {
                let value = evaluate_condition(condition, case);
                result = match logic {
                    Logic::And => result & value,
                    Logic::Or => result | value,
                };
                logic = condition.logic;
            }
            result
        }
    };

    if !matched {
        return RuleMatch {
            matched,
            actions: Vec::new(),
        };
    }

    let mut actions = rule.actions.clone();
    actions.sort_by(|a, b| b.weight.cmp(&a.weight));
    RuleMatch { matched, actions }
}

/// Evaluate a single condition. Unknown fields, missing optional values, and
/// operands that cannot be normalized to the field's type all yield `false`.
pub fn evaluate_condition(condition: &Condition, case: &Case) -> bool {
    let Some(field) = CaseField::parse(&condition.field) else {
        tracing::warn!(
            field = %condition.field,
            case = %case.id,
            "unknown condition field evaluated as false"
        );
        return false;
    };

    let outcome = match field.extract(case) {
        Some(FieldValue::Number(actual)) => {
            compare_ordered(condition.operator, actual, &condition.value, parse_number)
        }
        Some(FieldValue::Date(actual)) => {
            compare_ordered(condition.operator, actual, &condition.value, parse_date)
        }
        Some(FieldValue::Text(actual)) => compare_text(condition.operator, actual, &condition.value),
        None => None,
    };
    outcome.unwrap_or(false)
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn list_members(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim)
}

fn compare_ordered<T: PartialOrd>(
    operator: ConditionOperator,
    actual: T,
    raw: &str,
    parse: fn(&str) -> Option<T>,
) -> Option<bool> {
    match operator {
        ConditionOperator::Eq => parse(raw).map(|expected| actual == expected),
        ConditionOperator::Neq => parse(raw).map(|expected| actual != expected),
        ConditionOperator::Gt => parse(raw).map(|expected| actual > expected),
        ConditionOperator::Gte => parse(raw).map(|expected| actual >= expected),
        ConditionOperator::Lt => parse(raw).map(|expected| actual < expected),
        ConditionOperator::Lte => parse(raw).map(|expected| actual <= expected),
        ConditionOperator::In | ConditionOperator::NotIn => {
            let members = list_members(raw).map(parse).collect::<Option<Vec<T>>>()?;
            let found = members.iter().any(|member| *member == actual);
            Some(found == (operator == ConditionOperator::In))
        }
        ConditionOperator::Contains | ConditionOperator::NotContains => None,
    }
}

fn compare_text(operator: ConditionOperator, actual: &str, raw: &str) -> Option<bool> {
    match operator {
        ConditionOperator::Eq => Some(actual == raw),
        ConditionOperator::Neq => Some(actual != raw),
        ConditionOperator::In => Some(list_members(raw).any(|member| member == actual)),
        ConditionOperator::NotIn => Some(!list_members(raw).any(|member| member == actual)),
        ConditionOperator::Contains => Some(actual.contains(raw)),
        ConditionOperator::NotContains => Some(!actual.contains(raw)),
        ConditionOperator::Gt
        | ConditionOperator::Gte
        | ConditionOperator::Lt
        | ConditionOperator::Lte => None,
    }
}
