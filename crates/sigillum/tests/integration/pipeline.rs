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

//! Integration tests for classifier-driven pipeline construction.

use std::path::PathBuf;

use sigillum::error::ErrorKind;
use sigillum::pipeline::{build_decrypt_verify_tasks, PipelineRequest};
use sigillum::protocol::Protocol;
use sigillum::services::Services;
use sigillum::task::{TaskIdAllocator, TaskKind};

use crate::fixtures::{write_file, MockBackend};

fn build(
    services: &Services,
    files: &[PathBuf],
) -> (
    sigillum::pipeline::BuiltPipeline,
    Option<tempfile::TempDir>,
) {
    let allocator = TaskIdAllocator::new();
    let mut work_dir = None;
    let built = build_decrypt_verify_tasks(
        services,
        &allocator,
        PipelineRequest {
            files,
            signed_data: None,
        },
        &mut work_dir,
    )
    .expect("pipeline construction should succeed");
    (built, work_dir)
}

#[tokio::test]
async fn test_single_cipher_file_builds_one_combined_task() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "x.txt.gpg");

    let services = Services::new(MockBackend::new());
    let (built, work_dir) = build(&services, &[file]);

    assert_eq!(built.tasks.len(), 1);
    assert_eq!(built.tasks[0].kind(), TaskKind::DecryptVerify);
    assert_eq!(built.tasks[0].protocol(), Protocol::OpenPgp);
    assert!(built.undetected.is_empty());
    assert!(built.errors.is_empty());
    assert!(work_dir.is_some(), "a message task needs the working directory");
}

#[tokio::test]
async fn test_decrypt_precedes_chained_detached_verify() {
    let dir = tempfile::tempdir().unwrap();
    // Note the order: the signature file is passed first.
    let sig = write_file(dir.path(), "a.p7s");
    let cipher = write_file(dir.path(), "a.p7m");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[sig, cipher]);

    assert_eq!(built.tasks.len(), 2);
    // The decrypt task comes first, the detached verify chains off it.
    assert_eq!(built.tasks[0].kind(), TaskKind::DecryptVerify);
    assert_eq!(built.tasks[1].kind(), TaskKind::VerifyDetached);
    assert!(built.tasks.iter().all(|t| t.protocol() == Protocol::Cms));
}

#[tokio::test]
async fn test_unreadable_file_is_a_per_file_error_not_a_batch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_file(dir.path(), "ok.gpg");
    let missing = dir.path().join("missing.gpg");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[missing.clone(), good]);

    assert_eq!(built.errors.len(), 1);
    assert_eq!(built.errors[0].kind, ErrorKind::Unreadable);
    assert_eq!(built.errors[0].path, missing);
    // The readable file still gets its task.
    assert_eq!(built.tasks.len(), 1);
}

#[tokio::test]
async fn test_certificate_container_is_rejected_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let cert = write_file(dir.path(), "chain.crt");

    let services = Services::new(MockBackend::new());
    let (built, work_dir) = build(&services, &[cert]);

    assert_eq!(built.errors.len(), 1);
    assert_eq!(built.errors[0].kind, ErrorKind::CertificatesOnly);
    assert!(built.tasks.is_empty());
    assert!(work_dir.is_none(), "no task, no working directory");
}

#[tokio::test]
async fn test_unclassified_file_without_signatures_lands_in_undetected() {
    let dir = tempfile::tempdir().unwrap();
    let plain = write_file(dir.path(), "notes.txt");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[plain.clone()]);

    assert!(built.tasks.is_empty());
    assert_eq!(built.undetected, vec![plain]);
    assert!(built.errors.is_empty());
}

#[tokio::test]
async fn test_unclassified_file_with_adjacent_signature_gets_verified() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_file(dir.path(), "notes.txt");
    write_file(dir.path(), "notes.txt.sig");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[data]);

    assert_eq!(built.tasks.len(), 1);
    assert_eq!(built.tasks[0].kind(), TaskKind::VerifyDetached);
    assert_eq!(built.tasks[0].protocol(), Protocol::OpenPgp);
    assert!(built.undetected.is_empty());
}

#[tokio::test]
async fn test_detached_signature_with_signed_data_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "report.pdf");
    let sig = write_file(dir.path(), "report.pdf.sig");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[sig]);

    assert_eq!(built.tasks.len(), 1);
    assert_eq!(built.tasks[0].kind(), TaskKind::VerifyDetached);
}

#[tokio::test]
async fn test_detached_signature_without_signed_data_is_skipped_silently() {
    let dir = tempfile::tempdir().unwrap();
    let sig = write_file(dir.path(), "orphan.sig");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[sig]);

    // Not an error and not undetected: skipped with a log note.
    assert!(built.tasks.is_empty());
    assert!(built.errors.is_empty());
    assert!(built.undetected.is_empty());
}

#[tokio::test]
async fn test_detached_signature_uses_caller_supplied_signed_data() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_file(dir.path(), "payload.bin");
    let sig = write_file(dir.path(), "orphan.sig");

    let services = Services::new(MockBackend::new());
    let allocator = TaskIdAllocator::new();
    let mut work_dir = None;
    let data_for_source = data.clone();
    let source = move |_sig: &std::path::Path| Some(data_for_source.clone());
    let built = build_decrypt_verify_tasks(
        &services,
        &allocator,
        PipelineRequest {
            files: &[sig],
            signed_data: Some(&source),
        },
        &mut work_dir,
    )
    .unwrap();

    assert_eq!(built.tasks.len(), 1);
    assert_eq!(built.tasks[0].kind(), TaskKind::VerifyDetached);
}

#[tokio::test]
async fn test_archive_cipher_text_selects_unpack_output() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_file(dir.path(), "backup.tar.gpg");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[archive.clone()]);

    assert_eq!(built.tasks.len(), 1);
    assert_eq!(built.outputs.len(), 1);
    assert!(built.outputs[0].is_unpack(), "auto-extraction picks the unpack command");

    // With auto-extraction disabled the output is a plain file.
    let services = Services::new(MockBackend::new());
    services.preferences.set_auto_extract_archives(false);
    let (built, _work_dir) = build(&services, &[archive]);
    assert!(!built.outputs[0].is_unpack());
}

#[tokio::test]
async fn test_mixed_batch_keeps_unrelated_files_independent() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a.p7m");
    let b = write_file(dir.path(), "b.gpg");
    let cert = write_file(dir.path(), "c.crt");

    let services = Services::new(MockBackend::new());
    let (built, _work_dir) = build(&services, &[a, b, cert]);

    assert_eq!(built.tasks.len(), 2);
    assert_eq!(built.errors.len(), 1);
    let protocols: Vec<_> = built.tasks.iter().map(|t| t.protocol()).collect();
    assert!(protocols.contains(&Protocol::Cms));
    assert!(protocols.contains(&Protocol::OpenPgp));
}
