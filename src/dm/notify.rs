// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Queue of pending data-model change notifications.
//!
//! `notify_changed` and write side effects land here; a scheduled flush
//! task later replays the queue into the observation store. Entries are
//! kept ordered by OID so unregistering an object can purge its tail.

use std::collections::{BTreeMap, BTreeSet};

use crate::dm::{Iid, Oid, Rid};

#[derive(Debug, Default, Clone)]
pub struct NotifyEntry {
    /// The set of instances changed in a way not expressible per-resource
    /// (create, remove, unknown).
    pub instances_changed: bool,
    pub resources: BTreeSet<(Iid, Rid)>,
}

#[derive(Debug, Default)]
pub struct NotifyQueue {
    entries: BTreeMap<Oid, NotifyEntry>,
}

impl NotifyQueue {
    pub fn new() -> Self {
        NotifyQueue::default()
    }

    pub fn queue_instance_change(&mut self, oid: Oid) {
        self.entries.entry(oid).or_default().instances_changed = true;
    }

    pub fn queue_resource_change(&mut self, oid: Oid, iid: Iid, rid: Rid) {
        self.entries
            .entry(oid)
            .or_default()
            .resources
            .insert((iid, rid));
    }

    pub fn remove_oid(&mut self, oid: Oid) {
        self.entries.remove(&oid);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains the queue for a flush pass.
    pub fn take(&mut self) -> BTreeMap<Oid, NotifyEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Merges another queue in (used when a write's local queue is
    /// promoted into the scheduled one).
    pub fn merge(&mut self, other: NotifyQueue) {
        for (oid, entry) in other.entries {
            let slot = self.entries.entry(oid).or_default();
            slot.instances_changed |= entry.instances_changed;
            slot.resources.extend(entry.resources);
        }
    }
}
