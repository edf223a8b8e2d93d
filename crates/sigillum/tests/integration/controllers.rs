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

//! End-to-end controller runs against the mock backend.

use std::time::Duration;

use sigillum::backend::SignatureVerdict;
use sigillum::controller::{DecryptVerifyController, SignEncryptController};
use sigillum::error::ErrorKind;
use sigillum::io::{Input, Output};
use sigillum::protocol::Protocol;
use sigillum::services::Services;
use sigillum::task::{CollectionEvent, VisualCode};

use crate::fixtures::{
    cms_recipient, cms_signer, pgp_recipient, pgp_signer, write_file, MockBackend,
};

async fn wait_done(controller: &DecryptVerifyController) -> Result<(), (ErrorKind, String)> {
    tokio::time::timeout(Duration::from_secs(5), controller.wait())
        .await
        .expect("controller should finish in time")
}

#[tokio::test]
async fn test_decrypt_batch_end_to_end_moves_output() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let file = write_file(input_dir.path(), "x.txt.gpg");

    let backend = MockBackend::new();
    let controller = DecryptVerifyController::new(Services::new(backend.clone()));
    controller.set_files(vec![file]);
    controller.set_output_location(output_dir.path());
    controller.start();

    wait_done(&controller).await.expect("run should succeed");

    // A decryption-only result is neutral success.
    let results = controller.results();
    assert_eq!(results.len(), 1);
    assert!(!results[0].has_error());
    assert_eq!(results[0].visual_code(), VisualCode::NeutralSuccess);

    // The decrypted output was moved out of the working directory.
    assert!(output_dir.path().join("x.txt").is_file());
    assert_eq!(backend.state.ops(), vec!["decrypt-verify"]);
}

#[tokio::test]
async fn test_chained_verify_sees_decrypted_output() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let sig = write_file(input_dir.path(), "a.p7s");
    let cipher = write_file(input_dir.path(), "a.p7m");

    let backend = MockBackend::new();
    let controller = DecryptVerifyController::new(Services::new(backend.clone()));
    controller.set_files(vec![sig, cipher]);
    controller.set_output_location(output_dir.path());
    controller.start();

    wait_done(&controller).await.expect("run should succeed");

    let calls = backend.state.calls.lock().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].op, "decrypt-verify");
    assert_eq!(calls[1].op, "verify-detached");
    // The chained signed-data input existed when the verify ran: the
    // decrypt really came first.
    assert_eq!(calls[1].chained_data_found, Some(true));
}

#[tokio::test]
async fn test_single_slot_never_overlaps_tasks() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_file(input_dir.path(), "a.gpg"),
        write_file(input_dir.path(), "b.gpg"),
        write_file(input_dir.path(), "c.p7m"),
    ];

    let backend = MockBackend::new();
    backend.set_delay(Duration::from_millis(30));
    let controller = DecryptVerifyController::new(Services::new(backend.clone()));
    controller.set_files(files);
    controller.set_output_location(output_dir.path());
    controller.start();

    wait_done(&controller).await.expect("run should succeed");

    assert_eq!(backend.state.calls.lock().len(), 3);
    assert_eq!(
        backend
            .state
            .max_active_total
            .load(std::sync::atomic::Ordering::SeqCst),
        1,
        "single-slot policy runs one task at a time"
    );
}

#[tokio::test]
async fn test_cancel_counts_only_the_active_task() {
    let input_dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_file(input_dir.path(), "a.gpg"),
        write_file(input_dir.path(), "b.gpg"),
        write_file(input_dir.path(), "c.gpg"),
        write_file(input_dir.path(), "d.gpg"),
    ];

    let backend = MockBackend::new();
    backend.set_delay(Duration::from_secs(30));
    let controller = DecryptVerifyController::new(Services::new(backend.clone()));
    controller.set_files(files);
    controller.start();

    // Let the first task start, then cancel the whole run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.cancel();

    wait_done(&controller).await.expect("canceled run still completes");

    // Only the active task produced a result; the three queued tasks
    // were discarded silently.
    let results = controller.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_canceled());
    assert_eq!(controller.collection().completed_count(), 1);
    assert_eq!(backend.state.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_sticky_error_reported_once_after_batch() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let good = write_file(input_dir.path(), "ok.gpg");
    let missing = input_dir.path().join("gone.gpg");

    let backend = MockBackend::new();
    let controller = DecryptVerifyController::new(Services::new(backend.clone()));
    controller.set_files(vec![missing, good]);
    controller.set_output_location(output_dir.path());
    controller.start();

    let outcome = wait_done(&controller).await;
    match outcome {
        Err((kind, message)) => {
            assert_eq!(kind, ErrorKind::Unreadable);
            assert!(message.contains("gone.gpg"));
        }
        Ok(()) => panic!("per-file error must surface through the error signal"),
    }

    // The readable file was still processed.
    assert_eq!(backend.state.ops(), vec!["decrypt-verify"]);
    assert_eq!(controller.file_errors().len(), 1);
}

#[tokio::test]
async fn test_collection_done_fires_once_for_controller_run() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_file(input_dir.path(), "a.gpg"),
        write_file(input_dir.path(), "b.p7m"),
    ];

    let backend = MockBackend::new();
    let controller = DecryptVerifyController::new(Services::new(backend));
    controller.set_files(files);
    controller.set_output_location(output_dir.path());
    let mut events = controller.collection().subscribe();
    controller.start();

    wait_done(&controller).await.expect("run should succeed");

    let mut done_count = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), events.recv()).await
    {
        if matches!(event, CollectionEvent::Done) {
            done_count += 1;
        }
    }
    assert_eq!(done_count, 1);
}

#[tokio::test]
async fn test_bad_signature_surfaces_as_danger() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let file = write_file(input_dir.path(), "signed.gpg");

    let backend = MockBackend::new();
    backend.set_verification(vec![SignatureVerdict::Good, SignatureVerdict::Bad]);
    let controller = DecryptVerifyController::new(Services::new(backend));
    controller.set_files(vec![file]);
    controller.set_output_location(output_dir.path());
    controller.start();

    wait_done(&controller).await.expect("run should succeed");
    let results = controller.results();
    assert_eq!(results[0].visual_code(), VisualCode::Danger);
}

#[tokio::test]
async fn test_embedded_file_name_applied_on_merge() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let file = write_file(input_dir.path(), "message.gpg");

    let backend = MockBackend::new();
    backend.set_embedded_name("quarterly-report.pdf");
    let controller = DecryptVerifyController::new(Services::new(backend));
    controller.set_files(vec![file]);
    controller.set_output_location(output_dir.path());
    controller.start();

    wait_done(&controller).await.expect("run should succeed");
    assert!(output_dir.path().join("quarterly-report.pdf").is_file());
    assert!(!output_dir.path().join("message").exists());
}

#[tokio::test]
async fn test_unpacked_archive_directory_gets_collision_free_name() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let archive = write_file(input_dir.path(), "backup.tar.gpg");
    // The destination already has a directory with the unpacked name.
    std::fs::create_dir(output_dir.path().join("unpacked")).unwrap();

    let backend = MockBackend::new();
    let controller = DecryptVerifyController::new(Services::new(backend));
    controller.set_files(vec![archive]);
    controller.set_output_location(output_dir.path());
    controller.start();

    wait_done(&controller).await.expect("run should succeed");
    assert!(output_dir.path().join("unpacked_1/inner.txt").is_file());
}

// ---------------------------------------------------------------------------
// Dual-protocol-slot controller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dual_slot_concurrency_bound() {
    let backend = MockBackend::new();
    backend.set_delay(Duration::from_millis(25));
    let controller = SignEncryptController::new(Services::new(backend.clone()));
    controller.set_signing(true);
    controller.set_detached_signature(true);
    controller.set_certificates(
        vec![
            pgp_signer("alice@example.org", "PGP-S"),
            cms_signer("alice@example.org", "CMS-S"),
        ],
        Vec::new(),
    );

    // Three email parts, each signed under both protocols: six tasks
    // competing for two protocol slots.
    let parts: Vec<_> = (0..3)
        .map(|i| {
            (
                Input::from_bytes(format!("part {}", i).into_bytes()),
                Output::memory(),
            )
        })
        .collect();
    controller.start_signing(parts);

    tokio::time::timeout(Duration::from_secs(5), controller.wait())
        .await
        .expect("controller should finish in time")
        .expect("run should succeed");

    assert_eq!(backend.state.calls.lock().len(), 6);
    let maxes = backend.state.max_active_per_protocol.lock().clone();
    for (protocol, max) in &maxes {
        assert!(
            *max <= 1,
            "at most one task of {} may hold a slot, saw {}",
            protocol,
            max
        );
    }
    assert!(
        backend
            .state
            .max_active_total
            .load(std::sync::atomic::Ordering::SeqCst)
            <= 2,
        "at most two tasks total may be active"
    );
}

#[tokio::test]
async fn test_per_file_tasks_split_cms_sign_and_encrypt() {
    let input_dir = tempfile::tempdir().unwrap();
    let file = write_file(input_dir.path(), "doc.txt");

    let backend = MockBackend::new();
    let controller = SignEncryptController::new(Services::new(backend.clone()));
    controller.set_files(vec![file]);
    controller.set_signing(true);
    controller.set_encrypting(true);
    controller.set_certificates(
        vec![
            pgp_signer("alice@example.org", "PGP-S"),
            cms_signer("alice@example.org", "CMS-S"),
        ],
        vec![
            pgp_recipient("bob@example.org", "PGP-R"),
            cms_recipient("bob@example.org", "CMS-R"),
        ],
    );
    controller.start();

    tokio::time::timeout(Duration::from_secs(5), controller.wait())
        .await
        .expect("controller should finish in time")
        .expect("run should succeed");

    let mut ops = backend.state.ops();
    ops.sort_unstable();
    // OpenPGP: one combined task. CMS: separate sign and encrypt tasks.
    assert_eq!(ops, vec!["encrypt", "sign", "sign-encrypt"]);

    let calls = backend.state.calls.lock().clone();
    let cms_ops: Vec<_> = calls
        .iter()
        .filter(|call| call.protocol == Protocol::Cms)
        .map(|call| call.op)
        .collect();
    assert!(cms_ops.contains(&"sign"));
    assert!(cms_ops.contains(&"encrypt"));
    assert!(!cms_ops.contains(&"sign-encrypt"));
}

#[tokio::test]
async fn test_email_parts_signing_into_memory_outputs() {
    let backend = MockBackend::new();
    let controller = SignEncryptController::new(Services::new(backend.clone()));
    controller.set_signing(true);
    controller.set_detached_signature(true);
    controller.set_certificates(vec![pgp_signer("alice@example.org", "PGP-S")], Vec::new());

    let part_out = Output::memory();
    controller.start_signing(vec![(
        Input::from_bytes(b"Subject: hello\r\n\r\nbody".to_vec()),
        part_out.clone(),
    )]);

    tokio::time::timeout(Duration::from_secs(5), controller.wait())
        .await
        .expect("controller should finish in time")
        .expect("run should succeed");

    assert_eq!(backend.state.ops(), vec!["sign"]);
    assert_eq!(
        part_out.memory_contents().as_deref(),
        Some(b"processed part".as_ref())
    );
}

#[tokio::test]
async fn test_sign_without_certificates_fails_the_run() {
    let input_dir = tempfile::tempdir().unwrap();
    let file = write_file(input_dir.path(), "doc.txt");

    let backend = MockBackend::new();
    let controller = SignEncryptController::new(Services::new(backend));
    controller.set_files(vec![file]);
    controller.set_signing(true);
    controller.start();

    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.wait())
        .await
        .expect("controller should finish in time");
    assert!(outcome.is_err(), "missing certificates are a setup error");
}

#[tokio::test]
async fn test_backend_failure_is_per_task_not_per_run() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let a = write_file(input_dir.path(), "a.gpg");
    let b = write_file(input_dir.path(), "b.p7m");

    let backend = MockBackend::new();
    backend.fail_on("decrypt-verify");
    let controller = DecryptVerifyController::new(Services::new(backend.clone()));
    controller.set_files(vec![a, b]);
    controller.set_output_location(output_dir.path());
    let collection = controller.collection();
    controller.start();

    // Both tasks fail, but both ran and the controller completes.
    wait_done(&controller).await.expect("task failures are not run failures");
    assert_eq!(controller.results().len(), 2);
    assert!(controller.results().iter().all(|result| result.has_error()));
    assert!(collection.all_tasks_completed());
    assert!(collection.all_tasks_have_errors());
}
