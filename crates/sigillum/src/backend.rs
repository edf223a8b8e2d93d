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

//! Backend job boundary.
//!
//! The cryptographic engine sits behind [`JobFactory`]: the orchestration
//! layer asks it for a [`BackendJob`] per operation and protocol, then
//! drives the job inside a task. A job gets a [`JobContext`] with a
//! progress reporter and a cancellation token; cancellation is
//! best-effort — a canceled job is still expected to finish with a
//! `Canceled` error so completion bookkeeping stays intact.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::ResultError;
use crate::io::{Input, Output};
use crate::keystore::Certificate;
use crate::protocol::Protocol;

/// Cooperative cancellation handle shared between a task and its job.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes any waiter.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested.
    pub async fn canceled(&self) {
        if self.is_canceled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
            if self.is_canceled() {
                return;
            }
        }
    }
}

/// Callback a job uses to report progress into its task.
///
/// `total == 0` means the extent of the operation is unknown.
pub struct ProgressReporter {
    callback: Box<dyn Fn(String, u64, u64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(String, u64, u64) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A reporter that discards updates.
    pub fn sink() -> Self {
        Self::new(|_, _, _| {})
    }

    pub fn report(&self, label: impl Into<String>, current: u64, total: u64) {
        (self.callback)(label.into(), current, total);
    }
}

/// Everything a running job may interact with.
pub struct JobContext {
    pub progress: ProgressReporter,
    pub cancel: CancelToken,
}

/// Verdict on a single signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVerdict {
    /// Valid signature from a trusted key.
    Good,
    /// The signature is bad.
    Bad,
    /// Missing key, undefined trust or otherwise undecidable.
    Indeterminate,
}

/// One verified signature.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub fingerprint: String,
    pub signer: Option<String>,
    pub verdict: SignatureVerdict,
}

impl SignatureInfo {
    pub fn new(fingerprint: impl Into<String>, verdict: SignatureVerdict) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            signer: None,
            verdict,
        }
    }

    pub fn with_signer(mut self, signer: impl Into<String>) -> Self {
        self.signer = Some(signer.into());
        self
    }
}

/// Result of a verification pass over a message.
#[derive(Debug, Clone, Default)]
pub struct VerificationSummary {
    pub signatures: Vec<SignatureInfo>,
}

/// Result of a decryption pass.
#[derive(Debug, Clone, Default)]
pub struct DecryptionSummary {
    /// Original file name embedded in the message, if any.
    pub embedded_file_name: Option<String>,
    /// Display names of the recipients the message was encrypted to.
    pub recipients: Vec<String>,
}

/// Kind-specific payload a completed job delivers.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Decrypt and/or verify: either half may be absent depending on the
    /// operation (verify-only has no decryption, decrypt-only may find no
    /// signatures).
    DecryptVerify {
        decryption: Option<DecryptionSummary>,
        verification: Option<VerificationSummary>,
    },
    /// Sign and/or encrypt.
    SignEncrypt { signed: bool, encrypted: bool },
}

/// One asynchronous backend operation.
#[async_trait]
pub trait BackendJob: Send {
    /// Runs the operation to completion.
    ///
    /// A job that observes `ctx.cancel` should finish with a
    /// [`ResultError::canceled`] error rather than disappearing silently.
    async fn run(self: Box<Self>, ctx: JobContext) -> Result<JobOutcome, ResultError>;
}

/// Factory for backend jobs, one per protocol and operation.
///
/// Archive variants are expressed through the IO handles: a pack-command
/// [`Input`] or an unpack-command [`Output`] turns the plain operation
/// into its archive flavor.
pub trait JobFactory: Send + Sync {
    fn decrypt(
        &self,
        protocol: Protocol,
        input: Input,
        output: Arc<Output>,
    ) -> Result<Box<dyn BackendJob>, ResultError>;

    fn decrypt_verify(
        &self,
        protocol: Protocol,
        input: Input,
        output: Arc<Output>,
    ) -> Result<Box<dyn BackendJob>, ResultError>;

    fn verify_opaque(
        &self,
        protocol: Protocol,
        input: Input,
        output: Arc<Output>,
    ) -> Result<Box<dyn BackendJob>, ResultError>;

    fn verify_detached(
        &self,
        protocol: Protocol,
        signature: Input,
        signed_data: Input,
    ) -> Result<Box<dyn BackendJob>, ResultError>;

    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        protocol: Protocol,
        input: Input,
        output: Arc<Output>,
        signers: &[Certificate],
        detached: bool,
        armor: bool,
    ) -> Result<Box<dyn BackendJob>, ResultError>;

    fn encrypt(
        &self,
        protocol: Protocol,
        input: Input,
        output: Arc<Output>,
        recipients: &[Certificate],
        armor: bool,
    ) -> Result<Box<dyn BackendJob>, ResultError>;

    #[allow(clippy::too_many_arguments)]
    fn sign_encrypt(
        &self,
        protocol: Protocol,
        input: Input,
        output: Arc<Output>,
        signers: &[Certificate],
        recipients: &[Certificate],
        armor: bool,
    ) -> Result<Box<dyn BackendJob>, ResultError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_token_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.canceled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let woke = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(woke);
        assert!(token.is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_token_already_canceled_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.canceled().await;
    }

    #[test]
    fn test_progress_reporter_forwards() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(move |label, current, total| {
            sink.lock().push((label, current, total));
        });

        reporter.report("hashing", 1, 10);
        reporter.report("hashing", 10, 10);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], ("hashing".to_owned(), 10, 10));
    }
}
