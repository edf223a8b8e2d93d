/*
 *  Copyright 2025-2026 Sigillum Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Slot scheduling primitives.
//!
//! Both controller policies are built from the same pieces: a runnable
//! queue, one or more slots each holding at most one active task, and a
//! burial list for completed tasks.
//!
//! - [`SchedulingPolicy::SingleSlot`]: one slot for any protocol; the
//!   runnable queue is popped LIFO.
//! - [`SchedulingPolicy::PerProtocolSlots`]: an independent slot per
//!   concrete protocol; each empty slot takes the first runnable task of
//!   its protocol (find-and-remove, not necessarily the queue head), so
//!   at most one CMS and one OpenPGP task are in flight while
//!   same-protocol tasks serialize through their shared slot.
//!
//! Completed tasks are buried, not dropped: a task's identity must stay
//! valid for the full duration of its own completion callback. The burial
//! list holds them until the controller run ends.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::protocol::Protocol;
use crate::task::{Task, TaskId};

/// Which slot layout a controller runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// One task at a time, LIFO order.
    SingleSlot,
    /// One task per concrete protocol at a time.
    PerProtocolSlots,
}

struct Slot {
    /// `None` accepts any protocol.
    protocol: Option<Protocol>,
    occupant: Option<Arc<Task>>,
}

/// Runnable queue + slots + burial list.
pub struct ProtocolScheduler {
    policy: SchedulingPolicy,
    runnable: VecDeque<Arc<Task>>,
    slots: Vec<Slot>,
    buried: Vec<Arc<Task>>,
    canceled: bool,
}

impl ProtocolScheduler {
    pub fn new(policy: SchedulingPolicy) -> Self {
        let slots = match policy {
            SchedulingPolicy::SingleSlot => vec![Slot {
                protocol: None,
                occupant: None,
            }],
            SchedulingPolicy::PerProtocolSlots => Protocol::KNOWN
                .iter()
                .map(|proto| Slot {
                    protocol: Some(*proto),
                    occupant: None,
                })
                .collect(),
        };
        Self {
            policy,
            runnable: VecDeque::new(),
            slots,
            buried: Vec::new(),
            canceled: false,
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Appends a task to the runnable queue.
    pub fn enqueue(&mut self, task: Arc<Task>) {
        self.runnable.push_back(task);
    }

    /// Enqueues tasks so that LIFO popping replays them in the given
    /// order. Used by the single-slot controller to run a pipeline in its
    /// build order.
    pub fn enqueue_in_execution_order(&mut self, tasks: impl IntoIterator<Item = Arc<Task>>) {
        let mut tasks: Vec<_> = tasks.into_iter().collect();
        tasks.reverse();
        self.runnable.extend(tasks);
    }

    fn take_runnable(&mut self, protocol: Option<Protocol>) -> Option<Arc<Task>> {
        match protocol {
            // Single slot: LIFO.
            None => self.runnable.pop_back(),
            // Protocol slot: first match from the front.
            Some(proto) => {
                let index = self
                    .runnable
                    .iter()
                    .position(|task| task.protocol() == proto)?;
                self.runnable.remove(index)
            }
        }
    }

    /// Fills empty slots from the runnable queue and returns the tasks to
    /// start. Returns nothing once canceled.
    pub fn schedule(&mut self) -> Vec<Arc<Task>> {
        if self.canceled {
            return Vec::new();
        }
        let mut to_start = Vec::new();
        for i in 0..self.slots.len() {
            if self.slots[i].occupant.is_some() {
                continue;
            }
            if let Some(task) = self.take_runnable(self.slots[i].protocol) {
                debug!(
                    task_id = task.id(),
                    protocol = %task.protocol(),
                    "scheduling task into free slot"
                );
                self.slots[i].occupant = Some(task.clone());
                to_start.push(task);
            }
        }
        to_start
    }

    /// Buries the completed task and frees its slot. Returns `false` if
    /// the task was not occupying any slot.
    pub fn task_done(&mut self, id: TaskId) -> bool {
        for slot in &mut self.slots {
            if slot
                .occupant
                .as_ref()
                .is_some_and(|task| task.id() == id)
            {
                let task = slot.occupant.take();
                self.buried.extend(task);
                return true;
            }
        }
        false
    }

    /// All tasks currently occupying slots.
    pub fn active_tasks(&self) -> Vec<Arc<Task>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.occupant.clone())
            .collect()
    }

    /// Overall completion: every slot empty and nothing runnable left.
    pub fn is_idle(&self) -> bool {
        self.runnable.is_empty() && self.slots.iter().all(|slot| slot.occupant.is_none())
    }

    pub fn runnable_len(&self) -> usize {
        self.runnable.len()
    }

    pub fn buried_len(&self) -> usize {
        self.buried.len()
    }

    /// Discards queued tasks without producing results for them and
    /// returns the active tasks so the caller can forward cancellation.
    /// Completion must still wait for the active tasks' real results.
    pub fn cancel(&mut self) -> Vec<Arc<Task>> {
        self.canceled = true;
        let discarded = self.runnable.len();
        if discarded > 0 {
            debug!(discarded, "discarding queued tasks on cancel");
        }
        self.runnable.clear();
        self.active_tasks()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_util::*;
    use crate::task::TaskIdAllocator;

    fn scripted(allocator: &TaskIdAllocator, proto: Protocol) -> Arc<Task> {
        task_with(allocator, proto, ScriptedJob::succeeding())
    }

    #[test]
    fn test_single_slot_runs_one_at_a_time_lifo() {
        let allocator = TaskIdAllocator::new();
        let mut scheduler = ProtocolScheduler::new(SchedulingPolicy::SingleSlot);

        let a = scripted(&allocator, Protocol::OpenPgp);
        let b = scripted(&allocator, Protocol::OpenPgp);
        scheduler.enqueue(a.clone());
        scheduler.enqueue(b.clone());

        // LIFO: the most recently enqueued task runs first.
        let started = scheduler.schedule();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].id(), b.id());

        // The slot is taken; nothing else starts.
        assert!(scheduler.schedule().is_empty());
        assert!(!scheduler.is_idle());

        assert!(scheduler.task_done(b.id()));
        let started = scheduler.schedule();
        assert_eq!(started[0].id(), a.id());

        scheduler.task_done(a.id());
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.buried_len(), 2);
    }

    #[test]
    fn test_execution_order_enqueue_replays_build_order() {
        let allocator = TaskIdAllocator::new();
        let mut scheduler = ProtocolScheduler::new(SchedulingPolicy::SingleSlot);

        let first = scripted(&allocator, Protocol::Cms);
        let second = scripted(&allocator, Protocol::Cms);
        scheduler.enqueue_in_execution_order([first.clone(), second.clone()]);

        let started = scheduler.schedule();
        assert_eq!(started[0].id(), first.id());
        scheduler.task_done(first.id());
        let started = scheduler.schedule();
        assert_eq!(started[0].id(), second.id());
    }

    #[test]
    fn test_per_protocol_slots_bound_concurrency() {
        let allocator = TaskIdAllocator::new();
        let mut scheduler = ProtocolScheduler::new(SchedulingPolicy::PerProtocolSlots);

        let pgp1 = scripted(&allocator, Protocol::OpenPgp);
        let pgp2 = scripted(&allocator, Protocol::OpenPgp);
        let cms1 = scripted(&allocator, Protocol::Cms);
        for task in [&pgp1, &pgp2, &cms1] {
            scheduler.enqueue(task.clone());
        }

        // One per protocol starts; the second OpenPGP task waits.
        let started = scheduler.schedule();
        assert_eq!(started.len(), 2);
        let protocols: Vec<_> = started.iter().map(|t| t.protocol()).collect();
        assert!(protocols.contains(&Protocol::OpenPgp));
        assert!(protocols.contains(&Protocol::Cms));
        assert_eq!(scheduler.runnable_len(), 1);

        // Completing the CMS task frees only the CMS slot.
        scheduler.task_done(cms1.id());
        assert!(scheduler.schedule().is_empty());

        // Completing the first OpenPGP task lets the second one in.
        scheduler.task_done(pgp1.id());
        let started = scheduler.schedule();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].id(), pgp2.id());
    }

    #[test]
    fn test_per_protocol_selection_is_first_match_not_queue_head() {
        let allocator = TaskIdAllocator::new();
        let mut scheduler = ProtocolScheduler::new(SchedulingPolicy::PerProtocolSlots);

        // Queue head is OpenPGP, but the CMS slot still finds its task
        // further down the queue.
        let pgp = scripted(&allocator, Protocol::OpenPgp);
        let cms_a = scripted(&allocator, Protocol::Cms);
        let cms_b = scripted(&allocator, Protocol::Cms);
        for task in [&pgp, &cms_a, &cms_b] {
            scheduler.enqueue(task.clone());
        }

        let started = scheduler.schedule();
        let cms_started: Vec<_> = started
            .iter()
            .filter(|t| t.protocol() == Protocol::Cms)
            .collect();
        assert_eq!(cms_started.len(), 1);
        // FIFO within the protocol partition.
        assert_eq!(cms_started[0].id(), cms_a.id());
    }

    #[test]
    fn test_cancel_discards_queue_and_reports_active() {
        let allocator = TaskIdAllocator::new();
        let mut scheduler = ProtocolScheduler::new(SchedulingPolicy::SingleSlot);

        let active = scripted(&allocator, Protocol::OpenPgp);
        let queued1 = scripted(&allocator, Protocol::OpenPgp);
        let queued2 = scripted(&allocator, Protocol::Cms);
        scheduler.enqueue(active.clone());
        scheduler.enqueue(queued1);
        scheduler.enqueue(queued2);

        // `active` was enqueued first, but LIFO starts the last one; use
        // explicit scheduling to pin down which task is active.
        let started = scheduler.schedule();
        let active_id = started[0].id();

        let to_cancel = scheduler.cancel();
        assert_eq!(to_cancel.len(), 1);
        assert_eq!(to_cancel[0].id(), active_id);
        assert_eq!(scheduler.runnable_len(), 0);

        // Not idle until the active task really completes.
        assert!(!scheduler.is_idle());
        assert!(scheduler.schedule().is_empty());
        scheduler.task_done(active_id);
        assert!(scheduler.is_idle());
    }
}
