// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use lwm2m_client_rs::{
    sched::{RetryBackoff, Scheduler, TaskHandle},
    time::Timestamp,
};

fn at(secs: u64) -> Timestamp {
    Timestamp::from_duration(Duration::from_secs(secs))
}

#[test]
fn test_tasks_run_in_deadline_order() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    let now = at(0);
    sched.schedule(now, Duration::from_secs(3), &TaskHandle::new(), 3);
    sched.schedule(now, Duration::from_secs(1), &TaskHandle::new(), 1);
    sched.schedule(now, Duration::from_secs(2), &TaskHandle::new(), 2);

    let mut order = Vec::new();
    while let Some(task) = sched.pop_due(at(10)) {
        order.push(task.payload);
    }
    assert_eq!(order, vec![1, 2, 3]);
    assert!(sched.is_empty());
}

#[test]
fn test_due_time_gates_execution() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    sched.schedule(at(0), Duration::from_secs(5), &TaskHandle::new(), 7);

    assert!(sched.pop_due(at(4)).is_none());
    assert_eq!(sched.pop_due(at(5)).map(|t| t.payload), Some(7));
}

#[test]
fn test_handle_cleared_before_execution() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    let handle = TaskHandle::new();
    sched.schedule(at(0), Duration::ZERO, &handle, 1);
    assert!(handle.is_scheduled());

    let task = sched.pop_due(at(0)).expect("due task");
    // The owner sees the handle as already fired.
    assert!(!handle.is_scheduled());
    assert_eq!(task.payload, 1);
}

#[test]
fn test_del_cancels_and_empty_del_is_noop() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    let handle = TaskHandle::new();
    sched.schedule(at(0), Duration::ZERO, &handle, 1);
    sched.del(&handle);
    assert!(!handle.is_scheduled());
    assert!(sched.pop_due(at(1)).is_none());

    // Deleting an empty handle must not do anything.
    sched.del(&handle);
    assert!(sched.is_empty());
}

#[test]
fn test_rescheduling_same_slot_replaces_task() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    let handle = TaskHandle::new();
    sched.schedule(at(0), Duration::from_secs(10), &handle, 1);
    sched.schedule(at(0), Duration::from_secs(1), &handle, 2);

    assert_eq!(sched.len(), 1);
    assert_eq!(sched.pop_due(at(1)).map(|t| t.payload), Some(2));
}

#[test]
fn test_time_to_next() {
    let mut sched: Scheduler<u32> = Scheduler::new();
    assert!(sched.time_to_next(at(0)).is_err());

    sched.schedule(at(0), Duration::from_secs(7), &TaskHandle::new(), 1);
    assert_eq!(sched.time_to_next(at(2)).expect("delay"), Duration::from_secs(5));
    // A deadline in the past reads as "due now".
    assert_eq!(sched.time_to_next(at(9)).expect("delay"), Duration::ZERO);
}

#[test]
fn test_retryable_backoff_doubles_and_caps() {
    let backoff = RetryBackoff {
        delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(3),
    };
    let mut sched: Scheduler<u32> = Scheduler::new();
    let handle = TaskHandle::new();
    sched.schedule_retryable(at(0), Duration::ZERO, backoff, &handle, 9);

    // First failure: retry after the initial delay.
    let task = sched.pop_due(at(0)).expect("first run");
    assert!(task.is_retryable());
    sched.reschedule_retry(at(0), task);
    assert!(handle.is_scheduled());
    assert_eq!(sched.time_to_next(at(0)).expect("delay"), Duration::from_secs(1));

    // Second failure: doubled.
    let task = sched.pop_due(at(1)).expect("second run");
    sched.reschedule_retry(at(1), task);
    assert_eq!(sched.time_to_next(at(1)).expect("delay"), Duration::from_secs(2));

    // Third failure: capped at max_delay.
    let task = sched.pop_due(at(3)).expect("third run");
    sched.reschedule_retry(at(3), task);
    assert_eq!(sched.time_to_next(at(3)).expect("delay"), Duration::from_secs(3));

    // Cancellation stops further retries.
    sched.del(&handle);
    assert!(sched.is_empty());
}
