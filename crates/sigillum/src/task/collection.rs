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

//! Task collections: fixed-set aggregation of progress and completion.
//!
//! A [`TaskCollection`] subscribes to the tasks handed to
//! [`add_tasks`](TaskCollection::add_tasks) and folds their events into
//! collection-level notifications: aggregate progress, per-task results
//! relayed in arrival order, and `Done` exactly once after the last
//! result. A task that restarts after `Done` un-signals completion — the
//! counters are rolled back and `Done` will fire again once everything
//! has finished.
//!
//! Aggregate progress scales into a fixed denominator of 1000. If any
//! task reports an unknown extent (`total == 0`) the whole collection is
//! indeterminate and reports `(0, 0)`.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Task, TaskEvent, TaskId, TaskResult};

/// Fixed denominator the aggregate progress is scaled into.
const PROGRESS_SCALE: u64 = 1000;

/// Collection-level notification.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// Aggregate progress; `(0, 0)` means indeterminate.
    Progress {
        label: String,
        current: u64,
        total: u64,
    },
    /// A member task has started (or restarted).
    Started { task: Arc<Task> },
    /// A member task's result, relayed as it arrives.
    Result { result: Arc<TaskResult> },
    /// All member tasks have completed. At most once, unless a restart
    /// un-signals completion first.
    Done,
}

struct Inner {
    tasks: BTreeMap<TaskId, Arc<Task>>,
    completed: usize,
    errors: usize,
    done_emitted: bool,
    error_occurred: bool,
    last_progress_label: String,
    listeners: Vec<mpsc::UnboundedSender<CollectionEvent>>,
}

impl Inner {
    fn emit(&mut self, event: CollectionEvent) {
        self.listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    /// Recomputes aggregate progress and emits it.
    fn calculate_and_emit_progress(&mut self) {
        let mut processed: u64 = 0;
        let mut total: u64 = 0;
        let mut unknowable = false;
        for task in self.tasks.values() {
            let task_total = task.total_progress();
            if task_total == 0 {
                // A job that never announced its extent makes the whole
                // batch indeterminate.
                debug!(task_id = task.id(), label = task.label(), "task has no total progress");
                unknowable = true;
                break;
            }
            processed += task.current_progress();
            total += task_total;
        }

        let label = self.last_progress_label.clone();
        if !unknowable && processed > 0 && total >= processed {
            let scaled = PROGRESS_SCALE * processed / total;
            self.emit(CollectionEvent::Progress {
                label,
                current: scaled,
                total: PROGRESS_SCALE,
            });
        } else {
            if total < processed {
                warn!(processed, total, "total progress is smaller than current progress");
            }
            self.emit(CollectionEvent::Progress {
                label,
                current: 0,
                total: 0,
            });
        }
    }

    fn handle(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Progress { label, .. } => {
                self.last_progress_label = label;
                self.calculate_and_emit_progress();
            }
            TaskEvent::Started { id } => {
                let Some(task) = self.tasks.get(&id).cloned() else {
                    warn!(task_id = id, "started event from unknown task");
                    return;
                };
                self.emit(CollectionEvent::Started { task });
                self.calculate_and_emit_progress();
                if self.done_emitted {
                    // A task restarted after we reported done; roll the
                    // bookkeeping back until it completes again.
                    self.completed = self.completed.saturating_sub(1);
                    self.errors = self.errors.saturating_sub(1);
                    self.done_emitted = false;
                    debug!(task_id = id, "collection un-done by restarted task");
                }
            }
            TaskEvent::Result { result, .. } => {
                self.completed += 1;
                if result.has_error() {
                    self.error_occurred = true;
                    self.errors += 1;
                }
                self.last_progress_label.clear();
                self.calculate_and_emit_progress();
                self.emit(CollectionEvent::Result { result });
                if !self.done_emitted && self.completed == self.tasks.len() {
                    self.emit(CollectionEvent::Done);
                    self.done_emitted = true;
                }
            }
        }
    }
}

/// Aggregates a fixed set of tasks.
#[derive(Clone)]
pub struct TaskCollection {
    inner: Arc<Mutex<Inner>>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
}

impl TaskCollection {
    pub fn new() -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(Inner {
            tasks: BTreeMap::new(),
            completed: 0,
            errors: 0,
            done_emitted: false,
            error_occurred: false,
            last_progress_label: String::new(),
            listeners: Vec::new(),
        }));

        // Single consumer: task events are folded sequentially, on the
        // engine's logical thread of control.
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.lock().handle(event);
            }
        });

        Self { inner, events_tx }
    }

    /// Registers tasks and subscribes to their events. May be called more
    /// than once before the tasks start.
    pub fn add_tasks(&self, tasks: &[Arc<Task>]) {
        let mut inner = self.inner.lock();
        for task in tasks {
            inner.tasks.insert(task.id(), task.clone());
            task.connect(self.events_tx.clone());
        }
    }

    /// Registers a channel for collection-level events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CollectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().listeners.push(tx);
        rx
    }

    pub fn size(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.inner.lock().completed
    }

    pub fn task_by_id(&self, id: TaskId) -> Option<Arc<Task>> {
        self.inner.lock().tasks.get(&id).cloned()
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.inner.lock().tasks.values().cloned().collect()
    }

    /// Whether any completed task reported an error so far.
    pub fn error_occurred(&self) -> bool {
        self.inner.lock().error_occurred
    }

    pub fn all_tasks_completed(&self) -> bool {
        let inner = self.inner.lock();
        debug_assert!(inner.completed <= inner.tasks.len());
        inner.completed == inner.tasks.len()
    }

    /// Distinguishes "fully failed" from "partially failed".
    pub fn all_tasks_have_errors(&self) -> bool {
        let inner = self.inner.lock();
        inner.errors == inner.completed
    }
}

impl Default for TaskCollection {
    fn default() -> Self {
        Self::new()
    }
}
