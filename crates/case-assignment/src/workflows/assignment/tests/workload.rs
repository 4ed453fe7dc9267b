use std::sync::Arc;
use std::thread;

use super::common::*;

use crate::workflows::assignment::domain::{CenterId, DirectoryStatus, MediatorId};
use crate::workflows::assignment::workload::{Load, WorkloadError, WorkloadTracker};

#[test]
fn reserve_refuses_to_pass_the_maximum() {
    let tracker = WorkloadTracker::new(&[mediator(1, 1, 1, 2)], None);

    assert!(tracker.reserve(MediatorId(1)).is_ok());
    assert_eq!(
        tracker.reserve(MediatorId(1)),
        Err(WorkloadError::CapacityExceeded {
            mediator: MediatorId(1),
            current: 2,
            max: 2,
        })
    );
    assert_eq!(
        tracker.current_load(MediatorId(1)),
        Some(Load { current: 2, max: 2 })
    );
}

#[test]
fn release_frees_a_slot() {
    let tracker = WorkloadTracker::new(&[mediator(1, 1, 2, 2)], None);
    assert!(!tracker.has_capacity(MediatorId(1)));
    tracker.release(MediatorId(1));
    assert!(tracker.has_capacity(MediatorId(1)));
}

#[test]
fn task_cap_lowers_the_effective_maximum() {
    let tracker = WorkloadTracker::new(&[mediator(1, 1, 3, 50)], Some(4));
    assert_eq!(
        tracker.current_load(MediatorId(1)),
        Some(Load { current: 3, max: 4 })
    );
}

#[test]
fn inactive_mediators_are_not_tracked() {
    let mut away = mediator(2, 1, 0, 10);
    away.status = DirectoryStatus::Inactive;
    let tracker = WorkloadTracker::new(&[mediator(1, 1, 0, 10), away], None);
    assert_eq!(
        tracker.reserve(MediatorId(2)),
        Err(WorkloadError::UnknownMediator {
            mediator: MediatorId(2)
        })
    );
}

#[test]
fn center_capacity_is_the_sum_of_its_mediators() {
    let tracker = WorkloadTracker::new(
        &[mediator(1, 7, 2, 10), mediator(2, 7, 3, 5), mediator(3, 8, 0, 10)],
        None,
    );
    assert_eq!(tracker.center_load(CenterId(7)), Load { current: 5, max: 15 });
}

#[test]
fn center_reservation_picks_lowest_ratio_then_lowest_id() {
    let tracker = WorkloadTracker::new(
        &[mediator(4, 7, 5, 10), mediator(2, 7, 1, 2), mediator(3, 7, 2, 4)],
        None,
    );
    // All three start at half load.
    assert_eq!(tracker.reserve_in_center(CenterId(7)), Ok(MediatorId(2)));
    // 2 is now full; 3 (2/4) and 4 (5/10) tie again.
    assert_eq!(tracker.reserve_in_center(CenterId(7)), Ok(MediatorId(3)));
    assert_eq!(tracker.reserve_in_center(CenterId(7)), Ok(MediatorId(4)));
}

#[test]
fn saturated_center_reports_no_capacity() {
    let tracker = WorkloadTracker::new(&[mediator(1, 7, 1, 1)], None);
    assert_eq!(
        tracker.reserve_in_center(CenterId(7)),
        Err(WorkloadError::CenterSaturated {
            center: CenterId(7)
        })
    );
}

#[test]
fn concurrent_reservations_never_overshoot() {
    let tracker = Arc::new(WorkloadTracker::new(&[mediator(1, 1, 0, 25)], None));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                (0..10)
                    .filter(|_| tracker.reserve(MediatorId(1)).is_ok())
                    .count()
            })
        })
        .collect();

    let granted: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker finished"))
        .sum();
    assert_eq!(granted, 25);
    assert_eq!(
        tracker.current_load(MediatorId(1)),
        Some(Load { current: 25, max: 25 })
    );
}

#[test]
fn reconcile_overwrites_loads_with_directory_values() {
    let tracker = WorkloadTracker::new(&[mediator(1, 1, 0, 10), mediator(2, 1, 0, 10)], None);
    tracker.reserve(MediatorId(1)).expect("room");

    let refreshed = tracker.reconcile(&[mediator(1, 1, 6, 10), mediator(9, 1, 0, 10)]);
    assert_eq!(refreshed, 1);
    assert_eq!(
        tracker.current_load(MediatorId(1)),
        Some(Load { current: 6, max: 10 })
    );
    assert_eq!(tracker.current_load(MediatorId(9)), None);
}
