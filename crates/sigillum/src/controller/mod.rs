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

//! Controllers: owners and schedulers of tasks for one logical operation.
//!
//! A controller builds its tasks, runs them under a scheduling policy
//! ([`ProtocolScheduler`]) and relays a single terminal signal to its caller:
//! `done` or `error`, each at most once per run. Errors noted during the
//! run stick ([`ControllerCore::set_last_error`]) and decide which of the
//! two fires.
//!
//! Two concrete controllers cover the spec'd operations:
//! [`DecryptVerifyController`] (single-slot, classifier-driven pipeline)
//! and [`SignEncryptController`] (one slot per protocol).

mod decrypt_verify;
mod scheduler;
mod sign_encrypt;

pub use decrypt_verify::DecryptVerifyController;
pub use scheduler::{ProtocolScheduler, SchedulingPolicy};
pub use sign_encrypt::SignEncryptController;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Terminal notification of a controller run.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Done,
    Error { kind: ErrorKind, message: String },
}

struct CoreState {
    last_error: Option<(ErrorKind, String)>,
    terminal: Option<ControllerEvent>,
    listeners: Vec<mpsc::UnboundedSender<ControllerEvent>>,
}

/// Shared plumbing of all controllers: sticky error state and the
/// done/error-at-most-once contract.
pub struct ControllerCore {
    instance_id: Uuid,
    state: Mutex<CoreState>,
}

impl ControllerCore {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            state: Mutex::new(CoreState {
                last_error: None,
                terminal: None,
                listeners: Vec::new(),
            }),
        }
    }

    /// Unique id of this controller instance, for tracing.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Registers a channel for the terminal event. If the run already
    /// finished, the terminal event is replayed immediately.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if let Some(terminal) = &state.terminal {
            let _ = tx.send(terminal.clone());
        } else {
            state.listeners.push(tx);
        }
        rx
    }

    /// Notes an error; the next [`emit_done_or_error`](Self::emit_done_or_error)
    /// reports it. Later errors replace earlier ones.
    pub fn set_last_error(&self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        debug!(instance_id = %self.instance_id, %kind, %message, "sticky error set");
        self.state.lock().last_error = Some((kind, message));
    }

    /// Signals `error` if a sticky error is set (clearing it), `done`
    /// otherwise. Only the first call per run has any effect.
    pub fn emit_done_or_error(&self) {
        let (event, listeners) = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                warn!(instance_id = %self.instance_id, "terminal signal already emitted");
                return;
            }
            let event = match state.last_error.take() {
                Some((kind, message)) => ControllerEvent::Error { kind, message },
                None => ControllerEvent::Done,
            };
            state.terminal = Some(event.clone());
            (event, std::mem::take(&mut state.listeners))
        };
        for listener in listeners {
            let _ = listener.send(event.clone());
        }
    }

    pub fn has_finished(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    /// Waits for the terminal event of this run.
    pub async fn wait(&self) -> Result<(), (ErrorKind, String)> {
        let mut rx = self.subscribe();
        match rx.recv().await {
            Some(ControllerEvent::Done) => Ok(()),
            Some(ControllerEvent::Error { kind, message }) => Err((kind, message)),
            None => Err((
                ErrorKind::Unexpected,
                "controller dropped before finishing".to_owned(),
            )),
        }
    }
}

impl Default for ControllerCore {
    fn default() -> Self {
        Self::new()
    }
}
