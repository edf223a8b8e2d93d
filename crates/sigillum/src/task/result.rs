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

//! Task results.
//!
//! A [`TaskResult`] is the immutable, one-shot outcome of a task. The
//! kind-specific payload is a closed variant dispatched by pattern match;
//! consumers that care whether a result came from a decrypt/verify or a
//! sign/encrypt operation match on [`ResultKind`] instead of downcasting.

use chrono::{DateTime, Utc};

use crate::backend::{DecryptionSummary, JobOutcome, SignatureVerdict, VerificationSummary};
use crate::error::ResultError;
use crate::task::TaskId;

/// Visual severity of a result, for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualCode {
    AllGood,
    Warning,
    Danger,
    NeutralSuccess,
    NeutralError,
}

/// Kind-specific payload of a result.
#[derive(Debug, Clone)]
pub enum ResultKind {
    /// Outcome of a decrypt, verify or combined decrypt-and-verify task.
    DecryptVerify {
        decryption: Option<DecryptionSummary>,
        verification: Option<VerificationSummary>,
    },
    /// Outcome of a sign, encrypt or combined sign-and-encrypt task.
    SignEncrypt { signed: bool, encrypted: bool },
    /// A task that failed before reaching the backend.
    Error,
}

/// The immutable outcome of a task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    task_id: TaskId,
    error: Option<ResultError>,
    overview: String,
    details: String,
    kind: ResultKind,
    finished_at: DateTime<Utc>,
}

impl TaskResult {
    /// Builds a result from a backend outcome.
    pub fn from_outcome(
        task_id: TaskId,
        label: &str,
        outcome: Result<JobOutcome, ResultError>,
    ) -> Self {
        match outcome {
            Ok(outcome) => {
                let (overview, details) = describe_outcome(label, &outcome);
                let kind = match outcome {
                    JobOutcome::DecryptVerify {
                        decryption,
                        verification,
                    } => ResultKind::DecryptVerify {
                        decryption,
                        verification,
                    },
                    JobOutcome::SignEncrypt { signed, encrypted } => {
                        ResultKind::SignEncrypt { signed, encrypted }
                    }
                };
                Self {
                    task_id,
                    error: None,
                    overview,
                    details,
                    kind,
                    finished_at: Utc::now(),
                }
            }
            Err(error) => Self::from_error(task_id, label, error),
        }
    }

    /// Builds an error result.
    pub fn from_error(task_id: TaskId, label: &str, error: ResultError) -> Self {
        let overview = if error.is_canceled() {
            format!("{}: canceled", label)
        } else {
            format!("{}: failed", label)
        };
        Self {
            task_id,
            details: error.message.clone(),
            error: Some(error),
            overview,
            kind: ResultKind::Error,
            finished_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// A result has an error exactly when it carries an error payload.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Canceled is a distinguished terminal state, styled neutrally even
    /// though it arrives through the error channel.
    pub fn is_canceled(&self) -> bool {
        self.error.as_ref().is_some_and(ResultError::is_canceled)
    }

    pub fn error(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }

    pub fn overview(&self) -> &str {
        &self.overview
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn kind(&self) -> &ResultKind {
        &self.kind
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Derives the visual severity.
    ///
    /// Verify-type results grade by signature verdicts; everything else is
    /// neutral success or failure.
    pub fn visual_code(&self) -> VisualCode {
        match &self.kind {
            ResultKind::DecryptVerify {
                verification: Some(verification),
                ..
            } => code_for_verification(verification),
            _ => {
                if self.has_error() {
                    VisualCode::NeutralError
                } else {
                    VisualCode::NeutralSuccess
                }
            }
        }
    }
}

fn code_for_verification(verification: &VerificationSummary) -> VisualCode {
    let signatures = &verification.signatures;
    if signatures.is_empty() {
        return VisualCode::Warning;
    }
    if signatures
        .iter()
        .any(|sig| sig.verdict == SignatureVerdict::Bad)
    {
        return VisualCode::Danger;
    }
    if signatures
        .iter()
        .all(|sig| sig.verdict == SignatureVerdict::Good)
    {
        return VisualCode::AllGood;
    }
    VisualCode::Warning
}

fn describe_outcome(label: &str, outcome: &JobOutcome) -> (String, String) {
    match outcome {
        JobOutcome::DecryptVerify {
            decryption,
            verification,
        } => {
            let mut parts = Vec::new();
            if decryption.is_some() {
                parts.push("decryption succeeded".to_owned());
            }
            if let Some(verification) = verification {
                let total = verification.signatures.len();
                let good = verification
                    .signatures
                    .iter()
                    .filter(|sig| sig.verdict == SignatureVerdict::Good)
                    .count();
                if total == 0 {
                    parts.push("no signatures found".to_owned());
                } else {
                    parts.push(format!("{}/{} signatures valid", good, total));
                }
            }
            let overview = format!("{}: {}", label, parts.join(", "));
            let details = verification
                .as_ref()
                .map(|verification| {
                    verification
                        .signatures
                        .iter()
                        .map(|sig| {
                            format!(
                                "{} ({}): {:?}",
                                sig.signer.as_deref().unwrap_or("unknown signer"),
                                sig.fingerprint,
                                sig.verdict
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            (overview, details)
        }
        JobOutcome::SignEncrypt { signed, encrypted } => {
            let what = match (signed, encrypted) {
                (true, true) => "signing and encryption succeeded",
                (true, false) => "signing succeeded",
                (false, true) => "encryption succeeded",
                (false, false) => "nothing to do",
            };
            (format!("{}: {}", label, what), String::new())
        }
    }
}
