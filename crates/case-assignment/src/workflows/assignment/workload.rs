//! Per-task capacity accounting for mediators.
//!
//! A tracker is built from a mediator directory snapshot when a task starts and
//! lives only as long as that task's execution. It is not durable; after a
//! restart the loads are re-read from the directory.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use super::domain::{CenterId, Mediator, MediatorId};

/// Current versus maximum case count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Load {
    pub current: u32,
    pub max: u32,
}

impl Load {
    pub fn has_capacity(self) -> bool {
        self.current < self.max
    }

    /// Utilisation in `[0, 1]`; a zero-capacity slot reports as full.
    pub fn rate(self) -> f64 {
        if self.max == 0 {
            1.0
        } else {
            f64::from(self.current) / f64::from(self.max)
        }
    }

    /// Orders by `current / max` using integer cross-multiplication.
    fn cmp_ratio(self, other: Load) -> Ordering {
        let lhs = u64::from(self.current) * u64::from(other.max);
        let rhs = u64::from(other.current) * u64::from(self.max);
        lhs.cmp(&rhs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkloadError {
    #[error("mediator {mediator} is at capacity ({current}/{max})")]
    CapacityExceeded {
        mediator: MediatorId,
        current: u32,
        max: u32,
    },
    #[error("mediator {mediator} is not tracked by this task")]
    UnknownMediator { mediator: MediatorId },
    #[error("mediation center {center} has no mediator with free capacity")]
    CenterSaturated { center: CenterId },
}

#[derive(Debug, Clone)]
struct Slot {
    center: CenterId,
    load: Load,
    assigned_in_task: u32,
}

/// Loads guarded by the tracker's mutex. Handed to [`WorkloadTracker::transaction`]
/// so a caller can decide and reserve inside one critical section.
#[derive(Debug, Default)]
pub struct WorkloadBook {
    slots: BTreeMap<MediatorId, Slot>,
}

impl WorkloadBook {
    pub fn load(&self, mediator: MediatorId) -> Option<Load> {
        self.slots.get(&mediator).map(|slot| slot.load)
    }

    pub fn has_capacity(&self, mediator: MediatorId) -> bool {
        self.load(mediator).is_some_and(Load::has_capacity)
    }

    /// Cases placed on `mediator` by this task so far.
    pub fn assigned_in_task(&self, mediator: MediatorId) -> u32 {
        self.slots
            .get(&mediator)
            .map_or(0, |slot| slot.assigned_in_task)
    }

    pub fn center_of(&self, mediator: MediatorId) -> Option<CenterId> {
        self.slots.get(&mediator).map(|slot| slot.center)
    }

    pub fn mediators(&self) -> impl Iterator<Item = MediatorId> + '_ {
        self.slots.keys().copied()
    }

    pub fn mediators_in(&self, center: CenterId) -> impl Iterator<Item = MediatorId> + '_ {
        self.slots
            .iter()
            .filter(move |(_, slot)| slot.center == center)
            .map(|(id, _)| *id)
    }

    /// Summed load of every tracked mediator in `center`.
    pub fn center_load(&self, center: CenterId) -> Load {
        self.slots
            .values()
            .filter(|slot| slot.center == center)
            .fold(Load { current: 0, max: 0 }, |acc, slot| Load {
                current: acc.current + slot.load.current,
                max: acc.max + slot.load.max,
            })
    }

    /// Candidate with free capacity and the lowest `current / max`; ties go to the lowest id.
    pub fn least_loaded(
        &self,
        candidates: impl IntoIterator<Item = MediatorId>,
    ) -> Option<MediatorId> {
        self.pick(candidates, |_, _| Ordering::Equal)
    }

    /// Like [`least_loaded`](Self::least_loaded), but ratio ties are broken by
    /// how many cases this task already placed on each mediator before the id.
    pub fn least_loaded_by_task_share(
        &self,
        candidates: impl IntoIterator<Item = MediatorId>,
    ) -> Option<MediatorId> {
        self.pick(candidates, |a, b| a.assigned_in_task.cmp(&b.assigned_in_task))
    }

    fn pick(
        &self,
        candidates: impl IntoIterator<Item = MediatorId>,
        tie_break: impl Fn(&Slot, &Slot) -> Ordering,
    ) -> Option<MediatorId> {
        candidates
            .into_iter()
            .filter_map(|id| self.slots.get(&id).map(|slot| (id, slot)))
            .filter(|(_, slot)| slot.load.has_capacity())
            .min_by(|(a_id, a), (b_id, b)| {
                a.load
                    .cmp_ratio(b.load)
                    .then_with(|| tie_break(*a, *b))
                    .then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, _)| id)
    }

    /// Increment `mediator`'s load, refusing to go past its maximum.
    pub fn reserve(&mut self, mediator: MediatorId) -> Result<Load, WorkloadError> {
        let slot = self
            .slots
            .get_mut(&mediator)
            .ok_or(WorkloadError::UnknownMediator { mediator })?;
        if !slot.load.has_capacity() {
            return Err(WorkloadError::CapacityExceeded {
                mediator,
                current: slot.load.current,
                max: slot.load.max,
            });
        }
        slot.load.current += 1;
        slot.assigned_in_task += 1;
        Ok(slot.load)
    }

    pub fn release(&mut self, mediator: MediatorId) {
        if let Some(slot) = self.slots.get_mut(&mediator) {
            slot.load.current = slot.load.current.saturating_sub(1);
            slot.assigned_in_task = slot.assigned_in_task.saturating_sub(1);
        }
    }
}

/// Mutex-guarded [`WorkloadBook`] scoped to one task execution.
#[derive(Debug, Default)]
pub struct WorkloadTracker {
    cap: Option<u32>,
    book: Mutex<WorkloadBook>,
}

impl WorkloadTracker {
    /// Track every active mediator in `mediators`. When `cap` is set, each
    /// mediator's effective maximum is `min(max_load, cap)`.
    pub fn new(mediators: &[Mediator], cap: Option<u32>) -> Self {
        let slots = mediators
            .iter()
            .filter(|mediator| mediator.is_active())
            .map(|mediator| {
                let slot = Slot {
                    center: mediator.center_id,
                    load: effective_load(mediator, cap),
                    assigned_in_task: 0,
                };
                (mediator.id, slot)
            })
            .collect();

        Self {
            cap,
            book: Mutex::new(WorkloadBook { slots }),
        }
    }

    /// Run `f` with the book locked; decisions and reservations made inside
    /// cannot interleave with another caller.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut WorkloadBook) -> R) -> R {
        let mut book = self.book.lock().expect("workload mutex poisoned");
        f(&mut book)
    }

    pub fn has_capacity(&self, mediator: MediatorId) -> bool {
        self.transaction(|book| book.has_capacity(mediator))
    }

    pub fn reserve(&self, mediator: MediatorId) -> Result<(), WorkloadError> {
        self.transaction(|book| book.reserve(mediator)).map(|_| ())
    }

    pub fn release(&self, mediator: MediatorId) {
        self.transaction(|book| book.release(mediator));
    }

    pub fn current_load(&self, mediator: MediatorId) -> Option<Load> {
        self.transaction(|book| book.load(mediator))
    }

    pub fn center_load(&self, center: CenterId) -> Load {
        self.transaction(|book| book.center_load(center))
    }

    /// Reserve the least-loaded mediator in `center` (ties: lowest id).
    pub fn reserve_in_center(&self, center: CenterId) -> Result<MediatorId, WorkloadError> {
        self.transaction(|book| {
            let mediator = book
                .least_loaded(book.mediators_in(center).collect::<Vec<_>>())
                .ok_or(WorkloadError::CenterSaturated { center })?;
            book.reserve(mediator)?;
            Ok(mediator)
        })
    }

    /// Overwrite tracked loads with directory ground truth. Mediators that
    /// are no longer listed keep their last known load. Returns the number of
    /// slots refreshed.
    pub fn reconcile(&self, mediators: &[Mediator]) -> usize {
        let cap = self.cap;
        self.transaction(|book| {
            let mut refreshed = 0;
            for mediator in mediators {
                if let Some(slot) = book.slots.get_mut(&mediator.id) {
                    slot.load = effective_load(mediator, cap);
                    refreshed += 1;
                }
            }
            refreshed
        })
    }
}

fn effective_load(mediator: &Mediator, cap: Option<u32>) -> Load {
    let max = match cap {
        Some(cap) => mediator.max_load.min(cap),
        None => mediator.max_load,
    };
    Load {
        current: mediator.current_load,
        max,
    }
}
