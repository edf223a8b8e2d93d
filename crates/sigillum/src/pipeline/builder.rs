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

//! Classifier-driven task synthesis.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, warn};

use super::paths::heuristic_base_directory;
use super::SignedDataSource;
use crate::backend::BackendJob;
use crate::classify::{output_file_name, strip_crypto_extension, Classification, Classifier};
use crate::error::{ControllerError, ErrorKind, ResultError};
use crate::io::{Input, Output};
use crate::protocol::Protocol;
use crate::services::Services;
use crate::task::{Task, TaskIdAllocator, TaskKind};

/// A per-file error noted during pipeline construction. Non-fatal to the
/// batch.
#[derive(Debug, Clone)]
pub struct FileError {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

/// What the builder produced.
pub struct BuiltPipeline {
    /// Tasks in intended execution order.
    pub tasks: Vec<Arc<Task>>,
    /// Files no rule could make sense of; the caller decides fallback
    /// handling.
    pub undetected: Vec<PathBuf>,
    /// Per-file errors (unreadable, certificate-only); the batch goes on
    /// without these files.
    pub errors: Vec<FileError>,
    /// All outputs placed in the working directory, for post-processing.
    pub outputs: Vec<Arc<Output>>,
}

/// Builder input.
pub struct PipelineRequest<'a> {
    pub files: &'a [PathBuf],
    pub signed_data: Option<&'a dyn SignedDataSource>,
}

/// Transient per-file record during pipeline construction.
struct CryptoFile {
    file_name: PathBuf,
    base_name: PathBuf,
    classification: Classification,
    protocol: Protocol,
    /// The output of the decrypt task created for this file, for chaining
    /// into a following detached verify.
    output: Option<Arc<Output>>,
}

fn is_signature(classification: Classification) -> bool {
    classification.may_be_detached_signature()
        || classification.may_be_opaque_signature()
        || classification.is_clearsigned_message()
}

/// Classifies the files and orders them so that, within one
/// (protocol, base name) group, cipher text precedes signatures —
/// decryption must happen before a detached signature over the plaintext
/// can be verified. Entries of the same kind keep their input order.
fn classify_and_sort_files(classifier: &dyn Classifier, files: &[PathBuf]) -> Vec<CryptoFile> {
    let mut out: Vec<CryptoFile> = Vec::with_capacity(files.len());

    for file in files {
        let classification = classifier.classify(file);
        let entry = CryptoFile {
            base_name: strip_crypto_extension(file).unwrap_or_else(|| file.clone()),
            file_name: file.clone(),
            classification,
            protocol: classification.protocol(),
            output: None,
        };

        let group: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, other)| {
                other.protocol == entry.protocol && other.base_name == entry.base_name
            })
            .map(|(i, _)| i)
            .collect();

        let Some(&last) = group.last() else {
            out.push(entry);
            continue;
        };

        let position = if entry.classification.is_cipher_text() {
            // Cipher text goes in front of any signature of the group,
            // but after other cipher entries.
            group
                .iter()
                .copied()
                .find(|&i| is_signature(out[i].classification))
                .unwrap_or(last + 1)
        } else {
            // Signatures and everything else append behind the group.
            last + 1
        };
        out.insert(position, entry);
    }

    out
}

/// Wraps a factory result into a task; synchronous factory failures
/// become error tasks so they surface through the normal result channel.
fn job_task(
    allocator: &TaskIdAllocator,
    kind: TaskKind,
    protocol: Protocol,
    label: String,
    job: Result<Box<dyn BackendJob>, ResultError>,
) -> Arc<Task> {
    match job {
        Ok(job) => Arc::new(Task::new(allocator.allocate(), kind, protocol, label, job)),
        Err(error) => {
            warn!(%error, %label, "backend refused to create job");
            Task::error_task(allocator, error.kind, error.message, label)
        }
    }
}

fn ensure_work_dir(
    slot: &mut Option<TempDir>,
    adjacent_to_inputs: bool,
    files: &[PathBuf],
) -> Result<PathBuf, ControllerError> {
    if let Some(dir) = slot.as_ref() {
        return Ok(dir.path().to_path_buf());
    }
    let adjacent = if adjacent_to_inputs {
        heuristic_base_directory(files).and_then(|base| {
            tempfile::Builder::new()
                .prefix("sigillum-")
                .tempdir_in(base)
                .map_err(|error| {
                    debug!(%error, "cannot create working directory next to inputs");
                    error
                })
                .ok()
        })
    } else {
        None
    };
    let dir = match adjacent {
        Some(dir) => dir,
        None => tempfile::Builder::new()
            .prefix("sigillum-")
            .tempdir()
            .map_err(ControllerError::WorkingDirectory)?,
    };
    let path = dir.path().to_path_buf();
    debug!(path = %path.display(), "created shared working directory");
    *slot = Some(dir);
    Ok(path)
}

/// Signed data for the entry at `index` chained from the immediately
/// preceding group member's decrypt output, if there is one.
fn chained_signed_data(files: &[CryptoFile], index: usize) -> Option<Input> {
    if index == 0 {
        return None;
    }
    let prev = &files[index - 1];
    let current = &files[index];
    if prev.protocol == current.protocol && prev.base_name == current.base_name {
        prev.output.as_ref().map(|out| Input::from_output(out.clone()))
    } else {
        None
    }
}

/// Builds the ordered decrypt/verify task list for `request.files`.
///
/// The shared working directory is created lazily into `work_dir` on
/// first need and reused for the whole batch; the caller owns it and
/// cleans it up exactly once. Only a failure to create that directory is
/// fatal — everything else is a per-file error or lands in `undetected`.
pub fn build_decrypt_verify_tasks(
    services: &Services,
    allocator: &TaskIdAllocator,
    request: PipelineRequest<'_>,
    work_dir: &mut Option<TempDir>,
) -> Result<BuiltPipeline, ControllerError> {
    let mut crypto_files = classify_and_sort_files(&*services.classifier, request.files);

    let mut tasks: Vec<Arc<Task>> = Vec::new();
    let mut outputs: Vec<Arc<Output>> = Vec::new();
    let mut undetected: Vec<PathBuf> = Vec::new();
    let mut errors: Vec<FileError> = Vec::new();

    let adjacent = services.preferences.work_dir_adjacent_to_inputs();
    let auto_extract = services.preferences.auto_extract_archives();

    for index in 0..crypto_files.len() {
        let file_name = crypto_files[index].file_name.clone();
        let base_name = crypto_files[index].base_name.clone();
        let classification = crypto_files[index].classification;
        let protocol = crypto_files[index].protocol;
        let label = file_name.display().to_string();

        debug!(file = %label, ?classification, %protocol, "classified input file");

        if !file_name.is_file() || std::fs::File::open(&file_name).is_err() {
            errors.push(FileError {
                message: format!("cannot open {} for reading", label),
                path: file_name,
                kind: ErrorKind::Unreadable,
            });
            continue;
        }

        if classification.may_be_certificate_store() {
            errors.push(FileError {
                message: format!(
                    "{} contains certificates and cannot be decrypted or verified",
                    label
                ),
                path: file_name,
                kind: ErrorKind::CertificatesOnly,
            });
            continue;
        }

        // CMS detached signatures cannot be told apart reliably; try the
        // detached interpretation when signed data is at hand and fall
        // back to the opaque path otherwise.
        if protocol == Protocol::Cms && classification.may_be_detached_signature() {
            let signed_data = chained_signed_data(&crypto_files, index)
                .or_else(|| base_name.is_file().then(|| Input::from_file(&base_name)));
            if let Some(signed_data) = signed_data {
                debug!(file = %label, "detached CMS verify");
                tasks.push(job_task(
                    allocator,
                    TaskKind::VerifyDetached,
                    protocol,
                    label,
                    services
                        .jobs
                        .verify_detached(protocol, Input::from_file(&file_name), signed_data),
                ));
                continue;
            }
            // No signed data; maybe not a detached signature after all.
        }

        if classification.is_detached_signature() {
            let signed_data = chained_signed_data(&crypto_files, index)
                .or_else(|| base_name.is_file().then(|| Input::from_file(&base_name)))
                .or_else(|| {
                    request
                        .signed_data
                        .and_then(|source| source.signed_data_for(&file_name))
                        .map(Input::from_file)
                });
            match signed_data {
                Some(signed_data) => {
                    debug!(file = %label, "detached verify");
                    tasks.push(job_task(
                        allocator,
                        TaskKind::VerifyDetached,
                        protocol,
                        label,
                        services.jobs.verify_detached(
                            protocol,
                            Input::from_file(&file_name),
                            signed_data,
                        ),
                    ));
                }
                None => {
                    debug!(file = %label, "no signed data supplied, skipping detached signature");
                }
            }
            continue;
        }

        if !classification.may_be_any_message_type() {
            // Not a crypto message — maybe a signature on disk references
            // this file as its data.
            let mut found = false;
            for signature in services.classifier.find_signatures(&file_name) {
                let sig_classification = services.classifier.classify(&signature);
                let sig_protocol = sig_classification.protocol();
                if !sig_protocol.is_known() {
                    debug!(signature = %signature.display(), "cannot determine protocol, skipping guess");
                    continue;
                }
                debug!(
                    signature = %signature.display(),
                    data = %label,
                    "guessed detached signature for unclassified file"
                );
                found = true;
                tasks.push(job_task(
                    allocator,
                    TaskKind::VerifyDetached,
                    sig_protocol,
                    signature.display().to_string(),
                    services.jobs.verify_detached(
                        sig_protocol,
                        Input::from_file(&signature),
                        Input::from_file(&file_name),
                    ),
                ));
            }
            if !found {
                debug!(file = %label, "no crypto content detected");
                undetected.push(file_name);
            }
            continue;
        }

        // Some message type: we have an input and need an output in the
        // shared working directory.
        let work = ensure_work_dir(work_dir, adjacent, request.files)?;
        let input = Input::from_file(&file_name);

        let archive = if auto_extract {
            services.archives.pick_for_file(protocol, &file_name)
        } else {
            None
        };

        let output = archive
            .as_ref()
            .and_then(|definition| definition.create_unpack_output(protocol, &work))
            .unwrap_or_else(|| {
                let name = file_name
                    .file_name()
                    .map(|name| output_file_name(Path::new(name)))
                    .unwrap_or_else(|| PathBuf::from("output"));
                Output::file(work.join(name))
            });

        let cms_opaque = protocol == Protocol::Cms && classification.may_be_opaque_signature();
        if classification.is_opaque_signature() || cms_opaque {
            debug!(file = %label, "creating opaque verify task");
            tasks.push(job_task(
                allocator,
                TaskKind::VerifyOpaque,
                protocol,
                label,
                services
                    .jobs
                    .verify_opaque(protocol, input, output.clone()),
            ));
        } else {
            // Anything that could be encrypted is decrypted, and verified
            // along the way — whether an encrypted message is also signed
            // cannot be known up front.
            debug!(file = %label, "creating decrypt/verify task");
            tasks.push(job_task(
                allocator,
                TaskKind::DecryptVerify,
                protocol,
                label,
                services
                    .jobs
                    .decrypt_verify(protocol, input, output.clone()),
            ));
            crypto_files[index].output = Some(output.clone());
        }
        outputs.push(output);
    }

    Ok(BuiltPipeline {
        tasks,
        undetected,
        errors,
        outputs,
    })
}
