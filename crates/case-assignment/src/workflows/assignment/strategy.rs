use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use super::domain::{Case, CenterId, DirectoryStatus, MediationCenter, Mediator, MediatorId, RuleId};
use super::repository::{MediatorDirectory, RepositoryError};
use super::rules::{evaluate, ActionKind, ActionTarget, AssignmentRule, RuleAction};
use super::task::{StrategyKind, TaskConfig};
use super::workload::WorkloadTracker;

/// Mediators and centers a task may assign to, captured when the task starts.
#[derive(Debug, Clone, Default)]
pub struct AssignmentPool {
    pub mediators: Vec<Mediator>,
    pub centers: Vec<MediationCenter>,
}

impl AssignmentPool {
    /// Active mediators in active centers, narrowed to the configured center
    /// and mediator ids when those lists are non-empty.
    pub fn load(
        directory: &dyn MediatorDirectory,
        config: &TaskConfig,
    ) -> Result<Self, RepositoryError> {
        let center_filter =
            (!config.mediation_center_ids.is_empty()).then_some(config.mediation_center_ids.as_slice());
        let centers = directory.list_centers()?;
        let inactive: HashSet<CenterId> = centers
            .iter()
            .filter(|center| center.status == DirectoryStatus::Inactive)
            .map(|center| center.id)
            .collect();

        let mediators = directory
            .list_mediators(center_filter)?
            .into_iter()
            .filter(|mediator| mediator.is_active() && !inactive.contains(&mediator.center_id))
            .filter(|mediator| {
                config.mediator_ids.is_empty() || config.mediator_ids.contains(&mediator.id)
            })
            .collect();

        Ok(Self { mediators, centers })
    }

    pub fn mediator_ids(&self) -> Vec<MediatorId> {
        self.mediators.iter().map(|mediator| mediator.id).collect()
    }

    /// Mediators in this pool that `action` may place `case` on.
    pub fn candidates(&self, action: &RuleAction, case: &Case) -> Vec<MediatorId> {
        let centers: Vec<CenterId> = match (&action.target, action.kind) {
            (ActionTarget::Ids(ids), ActionKind::AssignMediator) => {
                return self
                    .mediators
                    .iter()
                    .filter(|mediator| ids.contains(&mediator.id.0))
                    .map(|mediator| mediator.id)
                    .collect();
            }
            (ActionTarget::Ids(ids), ActionKind::AssignMediationCenter) => {
                ids.iter().copied().map(CenterId).collect()
            }
            (ActionTarget::SameRegion, _) => self
                .centers
                .iter()
                .filter(|center| center.region == case.debtor_region)
                .map(|center| center.id)
                .collect(),
        };

        self.mediators
            .iter()
            .filter(|mediator| centers.contains(&mediator.center_id))
            .map(|mediator| mediator.id)
            .collect()
    }
}

/// A reserved placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub mediator_id: MediatorId,
    pub center_id: CenterId,
    pub rule_id: Option<RuleId>,
    pub rule_name: Option<String>,
}

/// Suggested placement for a human reviewer; nothing is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewProposal {
    pub mediator_id: Option<MediatorId>,
    pub center_id: Option<CenterId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Assigned(Decision),
    Review(ReviewProposal),
    /// Nothing applied to the case.
    NoMatch,
    /// Something applied, but every target was full. Carries the first
    /// matching rule, if rules were involved.
    Saturated { rule_id: Option<RuleId> },
}

/// Policy that maps one case to at most one mediator.
///
/// Implementations reserve through [`WorkloadTracker::transaction`] so the
/// capacity check and the reservation happen in the same critical section.
pub trait AssignmentStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Whether the engine must load the active rule set before `decide`.
    fn uses_rules(&self) -> bool {
        false
    }

    fn decide(
        &mut self,
        case: &Case,
        rules: &[AssignmentRule],
        tracker: &WorkloadTracker,
        pool: &AssignmentPool,
    ) -> StrategyOutcome;
}

pub fn strategy_for(config: &TaskConfig) -> Box<dyn AssignmentStrategy> {
    match config.strategy {
        StrategyKind::RuleBased => Box::new(RuleBasedStrategy),
        StrategyKind::LoadBalance => Box::new(LoadBalanceStrategy),
        StrategyKind::Random => Box::new(RandomStrategy::new(config.seed)),
        StrategyKind::Manual => Box::new(ManualStrategy),
    }
}

/// First active rule (lowest priority value) that matches and still has room.
#[derive(Debug, Default)]
pub struct RuleBasedStrategy;

impl AssignmentStrategy for RuleBasedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RuleBased
    }

    fn uses_rules(&self) -> bool {
        true
    }

    fn decide(
        &mut self,
        case: &Case,
        rules: &[AssignmentRule],
        tracker: &WorkloadTracker,
        pool: &AssignmentPool,
    ) -> StrategyOutcome {
        let mut ordered: Vec<&AssignmentRule> = rules.iter().filter(|rule| rule.is_active()).collect();
        ordered.sort_by_key(|rule| (rule.priority, rule.id));

        let mut saturated = None;
        for rule in ordered {
            let matched = evaluate(rule, case);
            if !matched.matched {
                continue;
            }

            let mut reachable = false;
            let placed = tracker.transaction(|book| {
                for action in &matched.actions {
                    let candidates = pool.candidates(action, case);
                    reachable |= !candidates.is_empty();
                    let Some(mediator) = book.least_loaded(candidates) else {
                        continue;
                    };
                    let center = book.center_of(mediator)?;
                    if book.reserve(mediator).is_ok() {
                        return Some((mediator, center));
                    }
                }
                None
            });

            match placed {
                Some((mediator_id, center_id)) => {
                    return StrategyOutcome::Assigned(Decision {
                        mediator_id,
                        center_id,
                        rule_id: Some(rule.id),
                        rule_name: Some(rule.name.clone()),
                    })
                }
                // Targets outside the pool leave the rule unmatched.
                None if reachable => {
                    saturated.get_or_insert(rule.id);
                }
                None => {}
            }
        }

        match saturated {
            Some(rule_id) => StrategyOutcome::Saturated {
                rule_id: Some(rule_id),
            },
            None => StrategyOutcome::NoMatch,
        }
    }
}

/// Lowest `current / max` in the pool; ties by cases placed in this task, then id.
#[derive(Debug, Default)]
pub struct LoadBalanceStrategy;

impl AssignmentStrategy for LoadBalanceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LoadBalance
    }

    fn decide(
        &mut self,
        _case: &Case,
        _rules: &[AssignmentRule],
        tracker: &WorkloadTracker,
        pool: &AssignmentPool,
    ) -> StrategyOutcome {
        if pool.mediators.is_empty() {
            return StrategyOutcome::NoMatch;
        }

        let placed = tracker.transaction(|book| {
            let mediator = book.least_loaded_by_task_share(pool.mediator_ids())?;
            let center = book.center_of(mediator)?;
            book.reserve(mediator).ok().map(|_| (mediator, center))
        });

        placed.map_or(
            StrategyOutcome::Saturated { rule_id: None },
            |(mediator_id, center_id)| {
                StrategyOutcome::Assigned(Decision {
                    mediator_id,
                    center_id,
                    rule_id: None,
                    rule_name: None,
                })
            },
        )
    }
}

/// Uniform pick among pool mediators with free capacity.
#[derive(Debug)]
pub struct RandomStrategy {
    rng: StdRng,
}

impl RandomStrategy {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl AssignmentStrategy for RandomStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn decide(
        &mut self,
        _case: &Case,
        _rules: &[AssignmentRule],
        tracker: &WorkloadTracker,
        pool: &AssignmentPool,
    ) -> StrategyOutcome {
        if pool.mediators.is_empty() {
            return StrategyOutcome::NoMatch;
        }

        let rng = &mut self.rng;
        let placed = tracker.transaction(|book| {
            let open: Vec<MediatorId> = pool
                .mediator_ids()
                .into_iter()
                .filter(|mediator| book.has_capacity(*mediator))
                .collect();
            let mediator = *open.choose(rng)?;
            let center = book.center_of(mediator)?;
            book.reserve(mediator).ok().map(|_| (mediator, center))
        });

        placed.map_or(
            StrategyOutcome::Saturated { rule_id: None },
            |(mediator_id, center_id)| {
                StrategyOutcome::Assigned(Decision {
                    mediator_id,
                    center_id,
                    rule_id: None,
                    rule_name: None,
                })
            },
        )
    }
}

/// Never assigns. Proposes the least-loaded pool mediator for review.
#[derive(Debug, Default)]
pub struct ManualStrategy;

impl AssignmentStrategy for ManualStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Manual
    }

    fn decide(
        &mut self,
        _case: &Case,
        _rules: &[AssignmentRule],
        tracker: &WorkloadTracker,
        pool: &AssignmentPool,
    ) -> StrategyOutcome {
        let proposal = tracker.transaction(|book| {
            let mediator_id = book.least_loaded(pool.mediator_ids());
            ReviewProposal {
                mediator_id,
                center_id: mediator_id.and_then(|mediator| book.center_of(mediator)),
            }
        });
        StrategyOutcome::Review(proposal)
    }
}
