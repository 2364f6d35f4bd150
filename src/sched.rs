// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Single-threaded cooperative scheduler.
//!
//! A priority queue of one-shot tasks keyed by monotonic deadline. Each
//! call site owns a [`TaskHandle`]; scheduling stores the task's key in the
//! handle, and popping a due task clears the handle *before* the caller
//! runs it, so the callback observes its own handle as already fired.
//! Retryable tasks restore the handle before every retry so `del` keeps
//! cancelling further attempts.
//!
//! The scheduler is generic over the task payload: the owning client
//! dispatches payloads itself, which keeps callbacks data-driven and avoids
//! re-entrant borrows of the client state.

use std::{
    cell::Cell,
    collections::BTreeMap,
    rc::Rc,
    time::Duration,
};

use crate::{
    errors::{CoreError, CoreResult},
    time::Timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SchedKey {
    deadline: Timestamp,
    id: u64,
}

/// Owner-side handle slot. `Some` while a task for this slot is queued.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle(Rc<Cell<Option<SchedKey>>>);

impl TaskHandle {
    pub fn new() -> TaskHandle {
        TaskHandle::default()
    }

    pub fn is_scheduled(&self) -> bool {
        self.0.get().is_some()
    }
}

/// Backoff configuration for retryable tasks: first retry after `delay`,
/// growing by factor 2 up to `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    pub delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    next_delay: Duration,
    max_delay: Duration,
}

struct Task<T> {
    slot: TaskHandle,
    retry: Option<RetryState>,
    payload: T,
}

/// A task popped for execution. Hand it back via
/// [`Scheduler::reschedule_retry`] if the execution failed and the task is
/// retryable.
pub struct DueTask<T> {
    slot: TaskHandle,
    retry: Option<RetryState>,
    pub payload: T,
}

impl<T> DueTask<T> {
    pub fn is_retryable(&self) -> bool {
        self.retry.is_some()
    }
}

pub struct Scheduler<T> {
    queue: BTreeMap<SchedKey, Task<T>>,
    next_id: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Scheduler {
            queue: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Scheduler::default()
    }

    fn insert(
        &mut self,
        now: Timestamp,
        delay: Duration,
        slot: &TaskHandle,
        retry: Option<RetryState>,
        payload: T,
    ) {
        // One slot owns at most one queued task.
        self.del(slot);
        let key = SchedKey {
            deadline: now.saturating_add(delay),
            id: self.next_id,
        };
        self.next_id += 1;
        slot.0.set(Some(key));
        self.queue.insert(
            key,
            Task {
                slot: slot.clone(),
                retry,
                payload,
            },
        );
    }

    /// Schedules a one-shot task for `now + delay`.
    pub fn schedule(
        &mut self,
        now: Timestamp,
        delay: Duration,
        slot: &TaskHandle,
        payload: T,
    ) {
        self.insert(now, delay, slot, None, payload);
    }

    /// Schedules a task for immediate execution on the next `run`.
    pub fn schedule_now(&mut self, now: Timestamp, slot: &TaskHandle, payload: T) {
        self.schedule(now, Duration::ZERO, slot, payload);
    }

    /// Schedules a task without a caller-visible handle.
    pub fn schedule_detached(&mut self, now: Timestamp, delay: Duration, payload: T) {
        self.insert(now, delay, &TaskHandle::new(), None, payload);
    }

    /// Schedules a task that is retried with exponential backoff until the
    /// execution succeeds or the handle is cancelled.
    pub fn schedule_retryable(
        &mut self,
        now: Timestamp,
        delay: Duration,
        backoff: RetryBackoff,
        slot: &TaskHandle,
        payload: T,
    ) {
        self.insert(
            now,
            delay,
            slot,
            Some(RetryState {
                next_delay: backoff.delay,
                max_delay: backoff.max_delay,
            }),
            payload,
        );
    }

    /// Cancels the task owned by `slot`; a no-op for an empty handle.
    pub fn del(&mut self, slot: &TaskHandle) {
        if let Some(key) = slot.0.take() {
            self.queue.remove(&key);
        }
    }

    /// Pops the earliest task whose deadline is not after `now`, clearing
    /// its handle first.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<DueTask<T>> {
        let key = *self.queue.keys().next()?;
        if key.deadline > now {
            return None;
        }
        let task = self.queue.remove(&key)?;
        task.slot.0.set(None);
        Some(DueTask {
            slot: task.slot,
            retry: task.retry,
            payload: task.payload,
        })
    }

    /// Re-queues a failed retryable task with doubled delay (capped at the
    /// configured maximum), restoring its handle.
    pub fn reschedule_retry(&mut self, now: Timestamp, task: DueTask<T>) {
        let Some(retry) = task.retry else {
            return;
        };
        let delay = retry.next_delay;
        let next = RetryState {
            next_delay: (retry.next_delay * 2).min(retry.max_delay),
            max_delay: retry.max_delay,
        };
        self.insert(now, delay, &task.slot, Some(next), task.payload);
    }

    /// Delay until the earliest deadline; zero if it already passed.
    pub fn time_to_next(&self, now: Timestamp) -> CoreResult<Duration> {
        let key = self.queue.keys().next().ok_or(CoreError::SchedulerEmpty)?;
        Ok(key.deadline.saturating_since(now))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
