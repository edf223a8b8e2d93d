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

//! Error types for the orchestration engine.
//!
//! Three layers of failure are kept apart:
//!
//! - [`ResultError`] — the error payload of a single task's result.
//!   Per-task failures never abort sibling tasks.
//! - [`ControllerError`] — setup-phase failures that prevent a run from
//!   building any tasks at all. Fatal to that run, surfaced once through
//!   the controller's error signal.
//! - [`PreferenceError`] — persistence failures of the preference store.
//!
//! `Canceled` is a distinguished [`ErrorKind`]: it arrives through the same
//! result channel as real failures but is a separate, non-error-styled
//! terminal state for presentation purposes.

use thiserror::Error;

/// Broad classification of a task or per-file error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation was canceled before it finished.
    Canceled,
    /// An input file could not be opened for reading.
    Unreadable,
    /// The file contains certificates only and cannot be decrypted or
    /// verified.
    CertificatesOnly,
    /// No usable input (e.g. no signed data for a detached signature).
    NoInput,
    /// The protocol of the content could not be determined.
    UnknownProtocol,
    /// The backend reported an operation failure.
    BackendFailure,
    /// Filesystem error while preparing or finalizing outputs.
    Io,
    /// An unexpected failure escaped the backend call.
    Unexpected,
}

impl ErrorKind {
    /// Returns `true` for the distinguished cancellation kind.
    pub fn is_canceled(self) -> bool {
        matches!(self, ErrorKind::Canceled)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Canceled => "canceled",
            ErrorKind::Unreadable => "unreadable input",
            ErrorKind::CertificatesOnly => "certificates only",
            ErrorKind::NoInput => "no input",
            ErrorKind::UnknownProtocol => "unknown protocol",
            ErrorKind::BackendFailure => "backend failure",
            ErrorKind::Io => "i/o error",
            ErrorKind::Unexpected => "unexpected failure",
        };
        f.write_str(s)
    }
}

/// The error half of a task result: a kind plus a human-readable message.
///
/// A result has an error exactly when it carries one of these.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ResultError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ResultError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The canonical cancellation error.
    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "operation canceled")
    }

    pub fn is_canceled(&self) -> bool {
        self.kind.is_canceled()
    }
}

/// Setup-phase failures, fatal to a controller run.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("cannot create working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),

    #[error("cannot determine a common base directory for {0} input files")]
    NoCommonBaseDirectory(usize),

    #[error("cannot determine protocol for the operation")]
    UndeterminedProtocol,

    #[error("no certificates resolved for the requested operation")]
    NoCertificates,

    #[error("no archive definition with id {0:?}")]
    UnknownArchiveDefinition(String),

    #[error("failed to move {from} to {to}")]
    OutputMove {
        from: std::path::PathBuf,
        to: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation canceled")]
    Canceled,
}

impl ControllerError {
    /// Maps a setup error onto the sticky-error kind reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::WorkingDirectory(_) | ControllerError::OutputMove { .. } => {
                ErrorKind::Io
            }
            ControllerError::UndeterminedProtocol => ErrorKind::UnknownProtocol,
            ControllerError::Canceled => ErrorKind::Canceled,
            _ => ErrorKind::Unexpected,
        }
    }
}

/// Failures loading or persisting preferences.
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("failed to read preferences from {path}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write preferences to {path}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed preferences file {path}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize preferences")]
    Serialize(#[source] toml::ser::Error),

    #[error("preference store has no backing file")]
    NoBackingFile,
}
