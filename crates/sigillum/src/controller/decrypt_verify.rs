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

//! Controller for decrypt/verify file batches.
//!
//! Builds the pipeline from the classified input files, runs it through a
//! single-slot scheduler (one task at a time), collects the results and
//! finally merges the shared working directory into the output location.
//!
//! Per-file classification errors are sticky but non-fatal: the batch
//! runs on without the affected files and the controller reports `error`
//! once at the end. Only a failure to create the working directory aborts
//! the run before any task starts.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use super::scheduler::{ProtocolScheduler, SchedulingPolicy};
use super::ControllerCore;
use crate::error::ErrorKind;
use crate::io::Output;
use crate::pipeline::{
    build_decrypt_verify_tasks, heuristic_base_directory, merge_into_destination, FileError,
    OverwritePolicy, PipelineRequest, SignedDataSource,
};
use crate::services::Services;
use crate::task::{TaskCollection, TaskEvent, TaskIdAllocator, TaskResult};

struct State {
    files: Vec<PathBuf>,
    output_location: Option<PathBuf>,
    signed_data: Option<Arc<dyn SignedDataSource>>,
    overwrite_policy: OverwritePolicy,
    apply_embedded_names: bool,
    scheduler: ProtocolScheduler,
    results: Vec<Arc<TaskResult>>,
    file_errors: Vec<FileError>,
    undetected: Vec<PathBuf>,
    outputs: Vec<Arc<Output>>,
    work_dir: Option<TempDir>,
    started: bool,
    finalized: bool,
}

/// Decrypt/verify controller: single-slot scheduling over a
/// classifier-built pipeline.
pub struct DecryptVerifyController {
    core: Arc<ControllerCore>,
    services: Services,
    allocator: Arc<TaskIdAllocator>,
    collection: TaskCollection,
    inner: Arc<Mutex<State>>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    finished: Arc<Notify>,
}

impl DecryptVerifyController {
    pub fn new(services: Services) -> Self {
        let core = Arc::new(ControllerCore::new());
        let inner = Arc::new(Mutex::new(State {
            files: Vec::new(),
            output_location: None,
            signed_data: None,
            overwrite_policy: OverwritePolicy::default(),
            apply_embedded_names: true,
            scheduler: ProtocolScheduler::new(SchedulingPolicy::SingleSlot),
            results: Vec::new(),
            file_errors: Vec::new(),
            undetected: Vec::new(),
            outputs: Vec::new(),
            work_dir: None,
            started: false,
            finalized: false,
        }));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let finished = Arc::new(Notify::new());

        let controller = Self {
            core,
            services,
            allocator: Arc::new(TaskIdAllocator::new()),
            collection: TaskCollection::new(),
            inner,
            events_tx,
            finished,
        };
        controller.spawn_consumer(events_rx);
        controller
    }

    pub fn set_files(&self, files: Vec<PathBuf>) {
        self.inner.lock().files = files;
    }

    /// Where produced outputs end up; defaults to the inputs' common base
    /// directory.
    pub fn set_output_location(&self, location: impl Into<PathBuf>) {
        self.inner.lock().output_location = Some(location.into());
    }

    pub fn set_signed_data_source(&self, source: Arc<dyn SignedDataSource>) {
        self.inner.lock().signed_data = Some(source);
    }

    pub fn set_overwrite_policy(&self, policy: OverwritePolicy) {
        self.inner.lock().overwrite_policy = policy;
    }

    /// Whether outputs are renamed to file names embedded in the
    /// decrypted messages. On by default.
    pub fn set_apply_embedded_names(&self, apply: bool) {
        self.inner.lock().apply_embedded_names = apply;
    }

    /// The collection aggregating this run's tasks, for progress display.
    pub fn collection(&self) -> TaskCollection {
        self.collection.clone()
    }

    /// Results delivered so far, in completion order.
    pub fn results(&self) -> Vec<Arc<TaskResult>> {
        self.inner.lock().results.clone()
    }

    /// Files the pipeline could not make sense of.
    pub fn undetected(&self) -> Vec<PathBuf> {
        self.inner.lock().undetected.clone()
    }

    /// Per-file errors noted during pipeline construction.
    pub fn file_errors(&self) -> Vec<FileError> {
        self.inner.lock().file_errors.clone()
    }

    /// Builds the pipeline and starts scheduling. Returns immediately;
    /// completion is signaled through [`wait`](Self::wait) or the
    /// controller events.
    pub fn start(&self) {
        let to_start = {
            let mut state = self.inner.lock();
            if state.started {
                warn!(instance_id = %self.core.instance_id(), "controller already started");
                return;
            }
            state.started = true;

            let files = state.files.clone();
            let signed_data = state.signed_data.clone();
            let request = PipelineRequest {
                files: &files,
                signed_data: signed_data.as_deref(),
            };
            let built = match build_decrypt_verify_tasks(
                &self.services,
                &self.allocator,
                request,
                &mut state.work_dir,
            ) {
                Ok(built) => built,
                Err(fatal) => {
                    warn!(%fatal, "pipeline construction failed");
                    self.core.set_last_error(fatal.kind(), fatal.to_string());
                    state.finalized = true;
                    drop(state);
                    self.finished.notify_waiters();
                    self.core.emit_done_or_error();
                    return;
                }
            };

            for error in &built.errors {
                warn!(path = %error.path.display(), %error.kind, "{}", error.message);
                self.core.set_last_error(error.kind, error.message.clone());
            }
            state.file_errors = built.errors;
            state.undetected = built.undetected;
            state.outputs = built.outputs;

            if built.tasks.is_empty() {
                debug!("no tasks to run");
                state.finalized = true;
                drop(state);
                self.finished.notify_waiters();
                self.core.emit_done_or_error();
                return;
            }

            for task in &built.tasks {
                task.connect(self.events_tx.clone());
            }
            self.collection.add_tasks(&built.tasks);
            state.scheduler.enqueue_in_execution_order(built.tasks);
            state.scheduler.schedule()
        };
        for task in &to_start {
            task.start();
        }
    }

    /// Discards queued tasks and forwards cancellation to the running
    /// one; its canceled result still flows through completion.
    pub fn cancel(&self) {
        let (to_cancel, finalize_now) = {
            let mut state = self.inner.lock();
            let to_cancel = state.scheduler.cancel();
            let finalize_now = state.started && state.scheduler.is_idle();
            (to_cancel, finalize_now)
        };
        for task in &to_cancel {
            task.cancel();
        }
        if finalize_now {
            self.finalize();
        }
    }

    /// Waits for the terminal done/error signal.
    pub async fn wait(&self) -> Result<(), (ErrorKind, String)> {
        self.core.wait().await
    }

    pub fn has_finished(&self) -> bool {
        self.core.has_finished()
    }

    fn spawn_consumer(&self, mut events_rx: mpsc::UnboundedReceiver<TaskEvent>) {
        let inner = self.inner.clone();
        let finished = self.finished.clone();
        let handle = self.finalize_handle();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events_rx.recv() => {
                        let Some(event) = event else { break };
                        let TaskEvent::Result { id, result } = event else { continue };
                        let (to_start, idle) = {
                            let mut state = inner.lock();
                            state.results.push(result);
                            if !state.scheduler.task_done(id) {
                                warn!(task_id = id, "result from task outside any slot");
                            }
                            let to_start = state.scheduler.schedule();
                            let idle = to_start.is_empty() && state.scheduler.is_idle();
                            (to_start, idle)
                        };
                        for task in &to_start {
                            task.start();
                        }
                        if idle {
                            handle.finalize();
                            break;
                        }
                    }
                    _ = finished.notified() => break,
                }
            }
        });
    }

    /// The pieces `finalize` needs, shareable with the consumer task.
    fn finalize_handle(&self) -> FinalizeHandle {
        FinalizeHandle {
            core: self.core.clone(),
            inner: self.inner.clone(),
            finished: self.finished.clone(),
        }
    }

    fn finalize(&self) {
        self.finalize_handle().finalize();
    }
}

struct FinalizeHandle {
    core: Arc<ControllerCore>,
    inner: Arc<Mutex<State>>,
    finished: Arc<Notify>,
}

impl FinalizeHandle {
    /// Merges the working directory into the output location (unless the
    /// run was canceled), cleans the working directory up exactly once
    /// and emits the terminal signal.
    fn finalize(&self) {
        let (work_dir, destination, outputs, policy, apply, canceled) = {
            let mut state = self.inner.lock();
            if state.finalized {
                return;
            }
            state.finalized = true;
            let destination = state
                .output_location
                .clone()
                .or_else(|| heuristic_base_directory(&state.files));
            (
                state.work_dir.take(),
                destination,
                std::mem::take(&mut state.outputs),
                state.overwrite_policy.clone(),
                state.apply_embedded_names,
                state.scheduler.is_canceled(),
            )
        };

        if let Some(work_dir) = work_dir {
            if !canceled {
                match destination {
                    Some(destination) => {
                        if let Err(error) = std::fs::create_dir_all(&destination) {
                            self.core.set_last_error(
                                ErrorKind::Io,
                                format!(
                                    "cannot create output directory {}: {}",
                                    destination.display(),
                                    error
                                ),
                            );
                        } else {
                            let report = merge_into_destination(
                                work_dir.path(),
                                &destination,
                                &outputs,
                                &policy,
                                apply,
                            );
                            for (path, message) in &report.errors {
                                self.core.set_last_error(
                                    ErrorKind::Io,
                                    format!("failed to move {}: {}", path.display(), message),
                                );
                            }
                        }
                    }
                    None => {
                        self.core.set_last_error(
                            ErrorKind::Io,
                            "cannot determine an output location".to_owned(),
                        );
                    }
                }
            }
            // TempDir drops here; the working directory is cleaned up by
            // the controller, never by individual tasks.
            drop(work_dir);
        }

        self.finished.notify_waiters();
        self.core.emit_done_or_error();
    }
}
