//! Assignment rules: prioritized condition lists mapped to assignment actions.

mod evaluator;

pub use evaluator::{evaluate, evaluate_condition, CaseField, FieldKind, RuleMatch};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::RuleId;
use super::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Inactive,
}

impl RuleStatus {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(ValidationError::UnknownStatus {
                status: raw.to_string(),
            }),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
}

impl ConditionOperator {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let operator = match raw.trim().to_ascii_lowercase().as_str() {
            "eq" => Self::Eq,
            "neq" | "ne" => Self::Neq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            _ => {
                return Err(ValidationError::UnknownOperator {
                    operator: raw.to_string(),
                })
            }
        };
        Ok(operator)
    }
}

/// Connector applied between a condition and the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" | "" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            _ => Err(ValidationError::UnknownLogic {
                logic: raw.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: String,
    pub logic: Logic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    AssignMediator,
    AssignMediationCenter,
}

impl ActionKind {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim() {
            "assign_mediator" => Ok(Self::AssignMediator),
            "assign_mediation_center" => Ok(Self::AssignMediationCenter),
            _ => Err(ValidationError::UnknownActionType {
                kind: raw.to_string(),
            }),
        }
    }
}

/// What an action points at: explicit mediator/center ids, or every center
/// in the debtor's region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionTarget {
    Ids(Vec<u64>),
    SameRegion,
}

impl ActionTarget {
    pub const SAME_REGION: &'static str = "same_region";

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed == Self::SAME_REGION {
            return Ok(Self::SameRegion);
        }

        let ids = trimmed
            .split(',')
            .map(|part| part.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ValidationError::InvalidActionTarget {
                target: raw.to_string(),
            })?;
        Ok(Self::Ids(ids))
    }
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionTarget::SameRegion => f.write_str(Self::SAME_REGION),
            ActionTarget::Ids(ids) => {
                let joined = ids
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                f.write_str(&joined)
            }
        }
    }
}

impl TryFrom<String> for ActionTarget {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActionTarget> for String {
    fn from(value: ActionTarget) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub target: ActionTarget,
    pub weight: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRule {
    pub id: RuleId,
    pub name: String,
    pub description: Option<String>,
    /// Lower values are evaluated first.
    pub priority: i32,
    pub status: RuleStatus,
    pub conditions: Vec<Condition>,
    pub actions: Vec<RuleAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssignmentRule {
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }
}

/// Condition exactly as submitted by the rule editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDraft {
    pub field: String,
    pub operator: String,
    pub value: String,
    #[serde(default)]
    pub logic: String,
}

impl ConditionDraft {
    fn validate(self) -> Result<Condition, ValidationError> {
        let operator = ConditionOperator::parse(&self.operator)?;
        let logic = Logic::parse(&self.logic)?;
        if CaseField::parse(&self.field).is_none() {
            tracing::warn!(field = %self.field, "rule condition references an unknown case field");
        }
        Ok(Condition {
            field: self.field,
            operator,
            value: self.value,
            logic,
        })
    }
}

/// Action exactly as submitted by the rule editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDraft {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    #[serde(default)]
    pub weight: i32,
}

impl ActionDraft {
    fn validate(self, index: usize) -> Result<RuleAction, ValidationError> {
        let kind = ActionKind::parse(&self.kind)?;
        if self.target.trim().is_empty() {
            return Err(ValidationError::EmptyActionTarget { index });
        }
        let target = ActionTarget::parse(&self.target)?;
        if kind == ActionKind::AssignMediator && target == ActionTarget::SameRegion {
            return Err(ValidationError::RegionTargetOnMediator);
        }
        Ok(RuleAction {
            kind,
            target,
            weight: self.weight,
        })
    }
}

fn validate_conditions(drafts: Vec<ConditionDraft>) -> Result<Vec<Condition>, ValidationError> {
    drafts.into_iter().map(ConditionDraft::validate).collect()
}

fn validate_actions(drafts: Vec<ActionDraft>) -> Result<Vec<RuleAction>, ValidationError> {
    if drafts.is_empty() {
        return Err(ValidationError::NoActions);
    }
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| draft.validate(index))
        .collect()
}

/// Create-rule payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: i32,
    pub status: String,
    #[serde(default)]
    pub conditions: Vec<ConditionDraft>,
    pub actions: Vec<ActionDraft>,
}

impl RuleDraft {
    pub fn into_rule(self, id: RuleId, now: DateTime<Utc>) -> Result<AssignmentRule, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyRuleName);
        }
        let status = RuleStatus::parse(&self.status)?;
        let conditions = validate_conditions(self.conditions)?;
        let actions = validate_actions(self.actions)?;

        Ok(AssignmentRule {
            id,
            name,
            description: self.description,
            priority: self.priority,
            status,
            conditions,
            actions,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update payload; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conditions: Option<Vec<ConditionDraft>>,
    #[serde(default)]
    pub actions: Option<Vec<ActionDraft>>,
}

impl RulePatch {
    /// Everything is validated before the rule is touched.
    pub fn apply(self, rule: &mut AssignmentRule, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let name = match self.name {
            Some(name) if name.trim().is_empty() => return Err(ValidationError::EmptyRuleName),
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };
        let status = self.status.as_deref().map(RuleStatus::parse).transpose()?;
        let conditions = self.conditions.map(validate_conditions).transpose()?;
        let actions = self.actions.map(validate_actions).transpose()?;

        if let Some(name) = name {
            rule.name = name;
        }
        if let Some(description) = self.description {
            rule.description = Some(description);
        }
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
        if let Some(status) = status {
            rule.status = status;
        }
        if let Some(conditions) = conditions {
            rule.conditions = conditions;
        }
        if let Some(actions) = actions {
            rule.actions = actions;
        }
        rule.updated_at = now;
        Ok(())
    }

    /// True when the patch changes anything besides the status flag.
    pub fn touches_definition(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.priority.is_some()
            || self.conditions.is_some()
            || self.actions.is_some()
    }
}

/// Filter accepted by rule listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<RuleStatus>,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl RuleFilter {
    pub fn active() -> Self {
        Self {
            status: Some(RuleStatus::Active),
            ..Self::default()
        }
    }

    pub fn matches(&self, rule: &AssignmentRule) -> bool {
        self.name
            .as_deref()
            .map_or(true, |name| rule.name.contains(name))
            && self.status.map_or(true, |status| rule.status == status)
            && self.priority.map_or(true, |priority| rule.priority == priority)
    }
}
