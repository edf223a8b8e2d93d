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

//! Controller for sign/encrypt batches.
//!
//! Sign/encrypt work may target both protocols at once (certificates of
//! mixed families), so this controller schedules with one slot per
//! protocol: at most one CMS and one OpenPGP task in flight, same-family
//! tasks serialized through their slot.
//!
//! Task synthesis follows the certificate split: OpenPGP gets one
//! combined sign+encrypt task per input; CMS has no combined operation,
//! so signing and encrypting become separate tasks. Multi-file batches
//! and directories are packed into an archive first (one task per
//! protocol over the whole batch).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use super::scheduler::{ProtocolScheduler, SchedulingPolicy};
use super::ControllerCore;
use crate::classify::output_file_extension;
use crate::error::{ControllerError, ErrorKind};
use crate::io::{Input, Output};
use crate::keystore::Certificate;
use crate::pipeline::heuristic_base_directory;
use crate::protocol::Protocol;
use crate::services::Services;
use crate::task::{Task, TaskCollection, TaskEvent, TaskId, TaskIdAllocator, TaskKind, TaskResult};

struct State {
    files: Vec<PathBuf>,
    sign: bool,
    encrypt: bool,
    ascii_armor: bool,
    detached_signature: bool,
    archive: bool,
    signers: Vec<Certificate>,
    recipients: Vec<Certificate>,
    scheduler: ProtocolScheduler,
    results: Vec<Arc<TaskResult>>,
    started: bool,
    finalized: bool,
}

/// Sign/encrypt controller with one scheduling slot per protocol.
pub struct SignEncryptController {
    core: Arc<ControllerCore>,
    services: Services,
    allocator: Arc<TaskIdAllocator>,
    collection: TaskCollection,
    inner: Arc<Mutex<State>>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    finished: Arc<Notify>,
}

impl SignEncryptController {
    pub fn new(services: Services) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            core: Arc::new(ControllerCore::new()),
            services,
            allocator: Arc::new(TaskIdAllocator::new()),
            collection: TaskCollection::new(),
            inner: Arc::new(Mutex::new(State {
                files: Vec::new(),
                sign: false,
                encrypt: false,
                ascii_armor: false,
                detached_signature: false,
                archive: false,
                signers: Vec::new(),
                recipients: Vec::new(),
                scheduler: ProtocolScheduler::new(SchedulingPolicy::PerProtocolSlots),
                results: Vec::new(),
                started: false,
                finalized: false,
            })),
            events_tx,
            finished: Arc::new(Notify::new()),
        };
        controller.spawn_consumer(events_rx);
        controller
    }

    /// Sets the input files. Batches with more than one file or with a
    /// directory are always archived first.
    pub fn set_files(&self, files: Vec<PathBuf>) {
        let mut state = self.inner.lock();
        state.archive = files.len() > 1 || files.iter().any(|file| file.is_dir());
        state.files = files;
    }

    pub fn set_signing(&self, sign: bool) {
        self.inner.lock().sign = sign;
    }

    pub fn set_encrypting(&self, encrypt: bool) {
        self.inner.lock().encrypt = encrypt;
    }

    pub fn set_ascii_armor(&self, armor: bool) {
        self.inner.lock().ascii_armor = armor;
    }

    /// Whether email-part signing produces detached signatures.
    pub fn set_detached_signature(&self, detached: bool) {
        self.inner.lock().detached_signature = detached;
    }

    /// Installs the resolved certificates the conflict check settled on.
    pub fn set_certificates(&self, signers: Vec<Certificate>, recipients: Vec<Certificate>) {
        let mut state = self.inner.lock();
        state.signers = signers;
        state.recipients = recipients;
    }

    pub fn collection(&self) -> TaskCollection {
        self.collection.clone()
    }

    pub fn results(&self) -> Vec<Arc<TaskResult>> {
        self.inner.lock().results.clone()
    }

    /// Builds tasks for the configured files and starts scheduling.
    pub fn start(&self) {
        let to_start = {
            let mut state = self.inner.lock();
            if state.started {
                warn!(instance_id = %self.core.instance_id(), "controller already started");
                return;
            }
            state.started = true;

            let tasks = match self.build_file_tasks(&state) {
                Ok(tasks) => tasks,
                Err(error) => {
                    warn!(%error, "cannot build sign/encrypt tasks");
                    self.core.set_last_error(error.kind(), error.to_string());
                    state.finalized = true;
                    drop(state);
                    self.finished.notify_waiters();
                    self.core.emit_done_or_error();
                    return;
                }
            };

            self.enqueue_locked(&mut state, tasks)
        };
        for task in &to_start {
            task.start();
        }
    }

    /// Email-part entry point: queues one signing task per (input,
    /// output) pair. May be combined with
    /// [`start_encryption`](Self::start_encryption) on the same run.
    pub fn start_signing(&self, parts: Vec<(Input, Arc<Output>)>) {
        let to_start = {
            let mut state = self.inner.lock();
            if state.signers.is_empty() {
                self.core
                    .set_last_error(ErrorKind::Unexpected, "no signing certificates resolved");
                state.finalized = true;
                drop(state);
                self.finished.notify_waiters();
                self.core.emit_done_or_error();
                return;
            }
            state.started = true;
            let mut tasks = Vec::new();
            for (input, output) in parts {
                for protocol in Protocol::KNOWN {
                    let signers = certificates_for(&state.signers, protocol);
                    if signers.is_empty() {
                        continue;
                    }
                    let label = input.label();
                    tasks.push(self.job_task(
                        TaskKind::Sign,
                        protocol,
                        label,
                        state.ascii_armor,
                        self.services.jobs.sign(
                            protocol,
                            input.clone(),
                            output.clone(),
                            &signers,
                            state.detached_signature,
                            state.ascii_armor,
                        ),
                    ));
                }
            }
            self.enqueue_locked(&mut state, tasks)
        };
        for task in &to_start {
            task.start();
        }
    }

    /// Email-part entry point: queues one encryption task per (input,
    /// output) pair.
    pub fn start_encryption(&self, parts: Vec<(Input, Arc<Output>)>) {
        let to_start = {
            let mut state = self.inner.lock();
            if state.recipients.is_empty() {
                self.core
                    .set_last_error(ErrorKind::Unexpected, "no encryption certificates resolved");
                state.finalized = true;
                drop(state);
                self.finished.notify_waiters();
                self.core.emit_done_or_error();
                return;
            }
            state.started = true;
            let mut tasks = Vec::new();
            for (input, output) in parts {
                for protocol in Protocol::KNOWN {
                    let recipients = certificates_for(&state.recipients, protocol);
                    if recipients.is_empty() {
                        continue;
                    }
                    let label = input.label();
                    tasks.push(self.job_task(
                        TaskKind::Encrypt,
                        protocol,
                        label,
                        state.ascii_armor,
                        self.services.jobs.encrypt(
                            protocol,
                            input.clone(),
                            output.clone(),
                            &recipients,
                            state.ascii_armor,
                        ),
                    ));
                }
            }
            self.enqueue_locked(&mut state, tasks)
        };
        for task in &to_start {
            task.start();
        }
    }

    /// Discards queued tasks and forwards cancellation to the tasks in
    /// the slots.
    pub fn cancel(&self) {
        let (to_cancel, finalize_now) = {
            let mut state = self.inner.lock();
            let to_cancel = state.scheduler.cancel();
            (to_cancel, state.started && state.scheduler.is_idle())
        };
        for task in &to_cancel {
            task.cancel();
        }
        if finalize_now {
            self.finalize();
        }
    }

    pub async fn wait(&self) -> Result<(), (ErrorKind, String)> {
        self.core.wait().await
    }

    pub fn has_finished(&self) -> bool {
        self.core.has_finished()
    }

    fn enqueue_locked(&self, state: &mut State, tasks: Vec<Arc<Task>>) -> Vec<Arc<Task>> {
        if tasks.is_empty() {
            state.finalized = true;
            self.finished.notify_waiters();
            self.core.emit_done_or_error();
            return Vec::new();
        }
        for task in &tasks {
            task.connect(self.events_tx.clone());
        }
        self.collection.add_tasks(&tasks);
        for task in tasks {
            state.scheduler.enqueue(task);
        }
        state.scheduler.schedule()
    }

    fn job_task(
        &self,
        kind: TaskKind,
        protocol: Protocol,
        label: String,
        armor: bool,
        job: Result<Box<dyn crate::backend::BackendJob>, crate::error::ResultError>,
    ) -> Arc<Task> {
        match job {
            Ok(job) => Arc::new(
                Task::new(self.allocator.allocate(), kind, protocol, label, job)
                    .with_ascii_armor(armor),
            ),
            Err(error) => {
                warn!(%error, %label, "backend refused to create job");
                Task::error_task(&self.allocator, error.kind, error.message, label)
            }
        }
    }

    /// Synthesizes the tasks for a file batch from the resolved
    /// certificates.
    fn build_file_tasks(&self, state: &State) -> Result<Vec<Arc<Task>>, ControllerError> {
        if !state.sign && !state.encrypt {
            return Err(ControllerError::UndeterminedProtocol);
        }
        if state.files.is_empty() {
            return Ok(Vec::new());
        }
        let signers = if state.sign { state.signers.clone() } else { Vec::new() };
        let recipients = if state.encrypt {
            state.recipients.clone()
        } else {
            Vec::new()
        };
        if signers.is_empty() && recipients.is_empty() {
            return Err(ControllerError::NoCertificates);
        }

        let mut tasks = Vec::new();
        if state.archive {
            let definition = self
                .services
                .archives
                .default_definition(&self.services.preferences)
                .ok_or_else(|| {
                    ControllerError::UnknownArchiveDefinition(
                        self.services.preferences.archive_command(),
                    )
                })?;
            let base = heuristic_base_directory(&state.files)
                .ok_or(ControllerError::NoCommonBaseDirectory(state.files.len()))?
                .join("archive");

            for protocol in Protocol::KNOWN {
                let proto_signers = certificates_for(&signers, protocol);
                let proto_recipients = certificates_for(&recipients, protocol);
                if proto_signers.is_empty() && proto_recipients.is_empty() {
                    continue;
                }
                let Some(input) = definition.create_pack_input(protocol, &state.files) else {
                    continue;
                };
                let archive_ext = definition
                    .extensions(protocol)
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "tar".to_owned());
                let name = format!(
                    "{}.{}.{}",
                    base.display(),
                    archive_ext,
                    output_file_extension(
                        protocol,
                        !proto_recipients.is_empty(),
                        false,
                        state.ascii_armor,
                    )
                );
                // Archive signing is always opaque.
                tasks.extend(self.tasks_for_protocol(
                    protocol,
                    input,
                    Path::new(&name),
                    &proto_signers,
                    &proto_recipients,
                    false,
                    state.ascii_armor,
                ));
            }
        } else {
            for file in &state.files {
                for protocol in Protocol::KNOWN {
                    let proto_signers = certificates_for(&signers, protocol);
                    let proto_recipients = certificates_for(&recipients, protocol);
                    if proto_signers.is_empty() && proto_recipients.is_empty() {
                        continue;
                    }
                    let input = Input::from_file(file);
                    let encrypting = !proto_recipients.is_empty();
                    let detached = !encrypting;
                    let name = format!(
                        "{}.{}",
                        file.display(),
                        output_file_extension(protocol, encrypting, detached, state.ascii_armor)
                    );
                    tasks.extend(self.tasks_for_protocol(
                        protocol,
                        input,
                        Path::new(&name),
                        &proto_signers,
                        &proto_recipients,
                        // Plain file signatures are detached.
                        true,
                        state.ascii_armor,
                    ));
                }
            }
        }
        Ok(tasks)
    }

    /// One combined task for OpenPGP; separate sign and encrypt tasks for
    /// CMS, which has no combined operation.
    #[allow(clippy::too_many_arguments)]
    fn tasks_for_protocol(
        &self,
        protocol: Protocol,
        input: Input,
        output_name: &Path,
        signers: &[Certificate],
        recipients: &[Certificate],
        detached: bool,
        armor: bool,
    ) -> Vec<Arc<Task>> {
        let mut tasks = Vec::new();
        let label = input.label();
        match protocol {
            Protocol::OpenPgp => {
                let output = Output::file(output_name);
                let job = match (signers.is_empty(), recipients.is_empty()) {
                    (false, false) => self.services.jobs.sign_encrypt(
                        protocol, input, output, signers, recipients, armor,
                    ),
                    (false, true) => self
                        .services
                        .jobs
                        .sign(protocol, input, output, signers, detached, armor),
                    (true, false) => self
                        .services
                        .jobs
                        .encrypt(protocol, input, output, recipients, armor),
                    (true, true) => return tasks,
                };
                let kind = match (signers.is_empty(), recipients.is_empty()) {
                    (false, false) => TaskKind::SignEncrypt,
                    (false, true) => TaskKind::Sign,
                    _ => TaskKind::Encrypt,
                };
                tasks.push(self.job_task(kind, protocol, label, armor, job));
            }
            Protocol::Cms => {
                if !signers.is_empty() {
                    let name = with_extension_for(
                        output_name,
                        output_file_extension(protocol, false, detached, armor),
                    );
                    let output = Output::file(name);
                    tasks.push(self.job_task(
                        TaskKind::Sign,
                        protocol,
                        label.clone(),
                        armor,
                        self.services
                            .jobs
                            .sign(protocol, input.clone(), output, signers, detached, armor),
                    ));
                }
                if !recipients.is_empty() {
                    let name = with_extension_for(
                        output_name,
                        output_file_extension(protocol, true, false, armor),
                    );
                    let output = Output::file(name);
                    tasks.push(self.job_task(
                        TaskKind::Encrypt,
                        protocol,
                        label,
                        armor,
                        self.services
                            .jobs
                            .encrypt(protocol, input, output, recipients, armor),
                    ));
                }
            }
            Protocol::Unknown => {
                debug!("skipping certificates with unknown protocol");
            }
        }
        tasks
    }

    fn spawn_consumer(&self, mut events_rx: mpsc::UnboundedReceiver<TaskEvent>) {
        let inner = self.inner.clone();
        let finished = self.finished.clone();
        let handle = FinalizeHandle {
            core: self.core.clone(),
            inner: self.inner.clone(),
            finished: self.finished.clone(),
        };
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

    fn finalize(&self) {
        FinalizeHandle {
            core: self.core.clone(),
            inner: self.inner.clone(),
            finished: self.finished.clone(),
        }
        .finalize();
    }

    /// The task ids currently occupying slots, for tests and diagnostics.
    pub fn active_task_ids(&self) -> Vec<TaskId> {
        self.inner
            .lock()
            .scheduler
            .active_tasks()
            .iter()
            .map(|task| task.id())
            .collect()
    }
}

fn certificates_for(certificates: &[Certificate], protocol: Protocol) -> Vec<Certificate> {
    certificates
        .iter()
        .filter(|cert| cert.protocol == protocol)
        .cloned()
        .collect()
}

/// Replaces the final extension of `name` (an already fully composed
/// output name) so CMS sign and encrypt siblings do not collide.
fn with_extension_for(name: &Path, extension: &str) -> PathBuf {
    name.with_extension(extension)
}

struct FinalizeHandle {
    core: Arc<ControllerCore>,
    inner: Arc<Mutex<State>>,
    finished: Arc<Notify>,
}

impl FinalizeHandle {
    fn finalize(&self) {
        {
            let mut state = self.inner.lock();
            if state.finalized {
                return;
            }
            state.finalized = true;
        }
        self.finished.notify_waiters();
        self.core.emit_done_or_error();
    }
}
