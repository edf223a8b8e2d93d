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

//! # Sigillum
//!
//! A library for orchestrating batched cryptographic operations: turn a
//! set of inputs (files or email parts) into decrypt, verify, sign and
//! encrypt tasks, schedule them under a protocol-partitioned concurrency
//! policy, resolve which certificate to use for each mailbox, and
//! aggregate per-operation progress and results into one consistent
//! outcome.
//!
//! The cryptographic primitives themselves live behind the
//! [`backend::JobFactory`] boundary — this crate is a pure orchestration
//! layer.
//!
//! ## Core Components
//!
//! - [`task::Task`] / [`task::TaskResult`]: one asynchronous crypto
//!   operation and its one-shot outcome
//! - [`task::TaskCollection`]: aggregated progress and done-exactly-once
//!   completion over a fixed task set
//! - [`controller::DecryptVerifyController`]: classifier-driven pipeline
//!   over a file batch, one task at a time
//! - [`controller::SignEncryptController`]: sign/encrypt batches with one
//!   scheduling slot per protocol
//! - [`resolver::CertificateResolver`]: per-mailbox candidate lookup,
//!   ambiguity and conflict detection
//!
//! ## Concurrency Model
//!
//! One logical control thread with asynchronous, callback-delivered
//! completion: tasks hand their backend job to the runtime and deliver
//! events over channels consumed sequentially. "Concurrency" means
//! multiple backend operations may be outstanding at once (one per
//! protocol slot), never that orchestration state is mutated in
//! parallel.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sigillum::controller::DecryptVerifyController;
//! use sigillum::services::Services;
//!
//! let services = Services::new(Arc::new(my_backend));
//! let controller = DecryptVerifyController::new(services);
//! controller.set_files(vec!["report.pdf.gpg".into(), "report.pdf.sig".into()]);
//! controller.start();
//! controller.wait().await?;
//! for result in controller.results() {
//!     println!("{}", result.overview());
//! }
//! ```

pub mod archive;
pub mod backend;
pub mod classify;
pub mod controller;
pub mod error;
pub mod io;
pub mod keystore;
pub mod pipeline;
pub mod prefs;
pub mod protocol;
pub mod resolver;
pub mod services;
pub mod task;

pub use archive::{ArchiveDefinition, ArchiveDefinitionRegistry};
pub use backend::{BackendJob, JobFactory, JobOutcome};
pub use classify::{Classification, Classifier, ExtensionClassifier};
pub use controller::{ControllerEvent, DecryptVerifyController, SignEncryptController};
pub use error::{ControllerError, ErrorKind, ResultError};
pub use io::{Input, Output};
pub use keystore::{Capability, Certificate, CertificateStore, Mailbox, MemoryCertificateStore};
pub use pipeline::{OverwriteChoice, OverwritePolicy, SignedDataSource};
pub use prefs::{PreferenceHandle, Preferences, SharedPreferences};
pub use protocol::Protocol;
pub use resolver::{CertificateResolver, Recipient, Sender};
pub use services::Services;
pub use task::{Task, TaskCollection, TaskId, TaskResult, VisualCode};
