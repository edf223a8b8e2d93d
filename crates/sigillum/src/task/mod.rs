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

//! Tasks: the unit of asynchronous crypto work.
//!
//! A [`Task`] wraps one backend job together with its identity, protocol
//! tag and progress state. Interested parties (a controller, a
//! [`TaskCollection`](crate::task::TaskCollection)) register an event
//! channel with [`Task::connect`] before the task starts; the task fans
//! every event out to all registered channels.
//!
//! Lifecycle guarantees:
//!
//! - `start()` returns immediately; the result always arrives later
//!   through the event channel, never synchronously and never from inside
//!   another task's callback.
//! - Exactly one result is delivered per run, and none before `start()`.
//! - Panics and synchronous backend failures are caught at the `start()`
//!   boundary and converted into error results.
//! - A canceled task still delivers its (canceled-error) result, so
//!   completion bookkeeping is never skipped.

mod collection;
mod result;

pub use collection::{CollectionEvent, TaskCollection};
pub use result::{ResultKind, TaskResult, VisualCode};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::backend::{BackendJob, CancelToken, JobContext, JobOutcome, ProgressReporter};
use crate::error::{ErrorKind, ResultError};
use crate::protocol::Protocol;

/// Unique task identifier, monotonically assigned by a
/// [`TaskIdAllocator`].
pub type TaskId = u64;

/// Allocates task ids. Owned by whichever factory constructs the tasks;
/// ids are unique per allocator, not process-wide.
#[derive(Debug, Default)]
pub struct TaskIdAllocator {
    next: AtomicU64,
}

impl TaskIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> TaskId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// The operation a task performs, for display and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Decrypt,
    DecryptVerify,
    VerifyOpaque,
    VerifyDetached,
    Sign,
    Encrypt,
    SignEncrypt,
    /// A task that only carries a pre-resolved error result.
    Error,
}

impl TaskKind {
    pub fn display_name(self) -> &'static str {
        match self {
            TaskKind::Decrypt => "Decrypt",
            TaskKind::DecryptVerify => "Decrypt/Verify",
            TaskKind::VerifyOpaque => "Verify",
            TaskKind::VerifyDetached => "Verify (detached)",
            TaskKind::Sign => "Sign",
            TaskKind::Encrypt => "Encrypt",
            TaskKind::SignEncrypt => "Sign/Encrypt",
            TaskKind::Error => "Error",
        }
    }
}

/// Notification emitted by a task to its registered channels.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started {
        id: TaskId,
    },
    Progress {
        id: TaskId,
        label: String,
        current: u64,
        total: u64,
    },
    Result {
        id: TaskId,
        result: Arc<TaskResult>,
    },
}

#[derive(Debug, Default)]
struct TaskState {
    progress_label: String,
    current: u64,
    total: u64,
    running: bool,
    finished: bool,
}

/// One asynchronous crypto operation.
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    protocol: Protocol,
    label: String,
    ascii_armor: bool,
    state: Mutex<TaskState>,
    job: Mutex<Option<Box<dyn BackendJob>>>,
    cancel: CancelToken,
    listeners: Mutex<Vec<mpsc::UnboundedSender<TaskEvent>>>,
}

impl Task {
    pub fn new(
        id: TaskId,
        kind: TaskKind,
        protocol: Protocol,
        label: impl Into<String>,
        job: Box<dyn BackendJob>,
    ) -> Self {
        Self {
            id,
            kind,
            protocol,
            label: label.into(),
            ascii_armor: false,
            state: Mutex::new(TaskState::default()),
            job: Mutex::new(Some(job)),
            cancel: CancelToken::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ascii_armor(mut self, armor: bool) -> Self {
        self.ascii_armor = armor;
        self
    }

    /// A task whose only purpose is to report a pre-resolved error, for
    /// per-file failures that should show up alongside real results.
    pub fn error_task(
        allocator: &TaskIdAllocator,
        kind: ErrorKind,
        message: impl Into<String>,
        label: impl Into<String>,
    ) -> Arc<Task> {
        let error = ResultError::new(kind, message);
        Arc::new(Task::new(
            allocator.allocate(),
            TaskKind::Error,
            Protocol::Unknown,
            label,
            Box::new(ErrorJob { error }),
        ))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The protocol display tag shown next to the label.
    pub fn tag(&self) -> &'static str {
        self.protocol.display_name()
    }

    pub fn ascii_armor(&self) -> bool {
        self.ascii_armor
    }

    pub fn progress_label(&self) -> String {
        self.state.lock().progress_label.clone()
    }

    pub fn current_progress(&self) -> u64 {
        self.state.lock().current
    }

    /// Zero means the extent of the operation is unknown.
    pub fn total_progress(&self) -> u64 {
        self.state.lock().total
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn has_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Registers an event channel. All registered channels receive every
    /// subsequent event of this task.
    pub fn connect(&self, listener: mpsc::UnboundedSender<TaskEvent>) {
        self.listeners.lock().push(listener);
    }

    /// Convenience: registers and returns a fresh event channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TaskEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connect(tx);
        rx
    }

    /// Starts the task's backend job.
    ///
    /// Returns immediately. Emits `Started`, then — strictly later — a
    /// final `Progress` and exactly one `Result`. Calling `start()` on a
    /// running or finished task is a no-op (logged); a finished task must
    /// be re-armed first.
    pub fn start(self: &Arc<Self>) {
        let job = {
            let mut state = self.state.lock();
            if state.running {
                warn!(task_id = self.id, "start() called on a running task");
                return;
            }
            let Some(job) = self.job.lock().take() else {
                warn!(
                    task_id = self.id,
                    "start() called on a finished task that was not re-armed"
                );
                return;
            };
            state.running = true;
            state.finished = false;
            job
        };

        debug!(task_id = self.id, label = %self.label, protocol = %self.protocol, "starting task");
        self.emit(TaskEvent::Started { id: self.id });

        let task = Arc::clone(self);
        tokio::spawn(async move {
            let progress_target = Arc::downgrade(&task);
            let ctx = JobContext {
                progress: ProgressReporter::new(move |label, current, total| {
                    if let Some(task) = progress_target.upgrade() {
                        task.set_progress(label, current, total);
                    }
                }),
                cancel: task.cancel.clone(),
            };

            // The error boundary: neither a backend error nor a panic may
            // escape into the orchestration layer.
            let outcome = match std::panic::AssertUnwindSafe(job.run(ctx))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(task_id = task.id, %message, "backend job panicked");
                    Err(ResultError::new(ErrorKind::Unexpected, message))
                }
            };

            let result = TaskResult::from_outcome(task.id, &task.label, outcome);
            task.deliver_result(result);
        });
    }

    /// Best-effort cancellation: signals the cancel token the running job
    /// observes. Does not guarantee an immediate stop; the job's eventual
    /// (canceled-error) result flows through normal completion.
    pub fn cancel(&self) {
        debug!(task_id = self.id, "cancel requested");
        self.cancel.cancel();
    }

    /// Installs a fresh job on a finished task so it can be started
    /// again. Fails (returns `false`) while the task is running.
    pub fn rearm(&self, job: Box<dyn BackendJob>) -> bool {
        let state = self.state.lock();
        if state.running {
            warn!(task_id = self.id, "cannot re-arm a running task");
            return false;
        }
        *self.job.lock() = Some(job);
        true
    }

    fn set_progress(&self, label: String, current: u64, total: u64) {
        {
            let mut state = self.state.lock();
            state.progress_label = label.clone();
            state.current = current;
            state.total = total;
        }
        self.emit(TaskEvent::Progress {
            id: self.id,
            label,
            current,
            total,
        });
    }

    fn deliver_result(&self, result: TaskResult) {
        let (label, current, total) = {
            let mut state = self.state.lock();
            // Snap progress to complete before the result goes out.
            state.current = state.total;
            state.running = false;
            state.finished = true;
            (state.progress_label.clone(), state.current, state.total)
        };
        self.emit(TaskEvent::Progress {
            id: self.id,
            label,
            current,
            total,
        });
        self.emit(TaskEvent::Result {
            id: self.id,
            result: Arc::new(result),
        });
    }

    fn emit(&self, event: TaskEvent) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("protocol", &self.protocol)
            .field("label", &self.label)
            .finish()
    }
}

struct ErrorJob {
    error: ResultError,
}

#[async_trait::async_trait]
impl BackendJob for ErrorJob {
    async fn run(self: Box<Self>, _ctx: JobContext) -> Result<JobOutcome, ResultError> {
        Err(self.error)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic in backend job".to_owned()
    }
}
