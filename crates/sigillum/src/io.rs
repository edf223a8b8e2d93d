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

//! Input and output handles for backend jobs.
//!
//! These are descriptors, not open streams: the backend decides how to
//! realize them. The important property is that an [`Output`] can be
//! handed to a later task as its [`Input`] — that is how a decrypt task's
//! plaintext becomes the signed data of the detached-verify task that
//! follows it in the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archive::CommandDescriptor;

/// Where a backend job reads from.
#[derive(Clone)]
pub enum Input {
    /// A file on disk.
    File(PathBuf),
    /// An in-memory buffer (email parts).
    Bytes(Arc<Vec<u8>>),
    /// The output of a previously scheduled task.
    OutputOf(Arc<Output>),
    /// The stdout of an archive pack command run over `files`.
    PackCommand {
        command: CommandDescriptor,
        files: Vec<PathBuf>,
    },
}

impl Input {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Input::File(path.into())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Input::Bytes(Arc::new(bytes))
    }

    pub fn from_output(output: Arc<Output>) -> Self {
        Input::OutputOf(output)
    }

    /// Short description for progress labels and log lines.
    pub fn label(&self) -> String {
        match self {
            Input::File(path) => path.display().to_string(),
            Input::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            Input::OutputOf(output) => format!("<output of {}>", output.label()),
            Input::PackCommand { command, files } => {
                format!("<{} over {} files>", command.program, files.len())
            }
        }
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Input({})", self.label())
    }
}

/// Where a backend job writes to.
#[derive(Debug)]
pub enum OutputDestination {
    /// A file on disk.
    File(PathBuf),
    /// An in-memory buffer (email parts).
    Memory(Mutex<Vec<u8>>),
    /// Piped through an archive unpack command into `work_dir`.
    UnpackCommand {
        command: CommandDescriptor,
        work_dir: PathBuf,
    },
}

/// A backend job's output descriptor.
///
/// Shared: the pipeline keeps a reference for chaining and
/// post-processing while the owning task's job writes into it. A decrypt
/// backend that learns the embedded original file name records it here so
/// post-processing can offer a rename.
#[derive(Debug)]
pub struct Output {
    destination: OutputDestination,
    embedded_name: Mutex<Option<String>>,
}

impl Output {
    pub fn file(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            destination: OutputDestination::File(path.into()),
            embedded_name: Mutex::new(None),
        })
    }

    pub fn memory() -> Arc<Self> {
        Arc::new(Self {
            destination: OutputDestination::Memory(Mutex::new(Vec::new())),
            embedded_name: Mutex::new(None),
        })
    }

    pub fn unpack_command(command: CommandDescriptor, work_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            destination: OutputDestination::UnpackCommand {
                command,
                work_dir: work_dir.into(),
            },
            embedded_name: Mutex::new(None),
        })
    }

    pub fn destination(&self) -> &OutputDestination {
        &self.destination
    }

    /// The on-disk path of a file output.
    pub fn path(&self) -> Option<&Path> {
        match &self.destination {
            OutputDestination::File(path) => Some(path),
            _ => None,
        }
    }

    /// True for outputs realized by an unpack command (archives).
    pub fn is_unpack(&self) -> bool {
        matches!(&self.destination, OutputDestination::UnpackCommand { .. })
    }

    /// Records the original file name embedded in the decrypted message.
    pub fn set_embedded_name(&self, name: impl Into<String>) {
        *self.embedded_name.lock() = Some(name.into());
    }

    pub fn embedded_name(&self) -> Option<String> {
        self.embedded_name.lock().clone()
    }

    /// Appends to an in-memory output. No-op for other destinations.
    pub fn write_memory(&self, bytes: &[u8]) {
        if let OutputDestination::Memory(buffer) = &self.destination {
            buffer.lock().extend_from_slice(bytes);
        }
    }

    /// Contents of an in-memory output.
    pub fn memory_contents(&self) -> Option<Vec<u8>> {
        match &self.destination {
            OutputDestination::Memory(buffer) => Some(buffer.lock().clone()),
            _ => None,
        }
    }

    /// Short description for progress labels and log lines.
    pub fn label(&self) -> String {
        match &self.destination {
            OutputDestination::File(path) => path.display().to_string(),
            OutputDestination::Memory(_) => "<memory>".to_owned(),
            OutputDestination::UnpackCommand { command, work_dir } => {
                format!("<{} into {}>", command.program, work_dir.display())
            }
        }
    }
}
