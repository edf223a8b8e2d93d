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

//! Resolver flows: conflict detection feeding a sign/encrypt run, and
//! preference persistence across resolver instances.

use std::sync::Arc;
use std::time::Duration;

use sigillum::controller::SignEncryptController;
use sigillum::io::{Input, Output};
use sigillum::keystore::{CertificateStore, Mailbox, MemoryCertificateStore};
use sigillum::prefs::PreferenceHandle;
use sigillum::protocol::Protocol;
use sigillum::resolver::{has_conflict, select_protocol, Operation};
use sigillum::services::Services;

use crate::fixtures::{cms_recipient, cms_signer, pgp_signer, MockBackend};

fn mailbox(addr: &str) -> Mailbox {
    Mailbox::parse(addr).unwrap()
}

#[tokio::test]
async fn test_auto_selected_protocol_drives_the_run() {
    // Alice: 2 OpenPGP signing candidates, 1 CMS. Bob is reachable only
    // under CMS. CMS is perfect, OpenPGP not even partial.
    let store = Arc::new(MemoryCertificateStore::new());
    store.add(pgp_signer("alice@example.org", "PGP-1"));
    store.add(pgp_signer("alice@example.org", "PGP-2"));
    store.add(cms_signer("alice@example.org", "CMS-S"));
    store.add(cms_recipient("alice@example.org", "CMS-SELF"));
    store.add(cms_recipient("bob@example.org", "CMS-BOB"));

    let backend = MockBackend::new();
    let services =
        Services::new(backend.clone()).with_certificates(store.clone());
    let resolver = services.resolver();

    let senders = resolver.resolve_senders(&[mailbox("alice@example.org")]);
    let recipients = resolver.resolve_recipients(&[mailbox("bob@example.org")]);

    let operation = Operation::sign_and_encrypt();
    assert!(!has_conflict(
        Protocol::Unknown,
        operation,
        &senders,
        &recipients
    ));
    let selected = select_protocol(Protocol::Unknown, operation, &senders, &recipients)
        .expect("no conflict means a protocol is selected");
    assert_eq!(selected, Protocol::Cms);

    // Drive a sign+encrypt email run with the selected protocol's
    // certificates.
    let signers = vec![senders[0]
        .effective_signing_certificate(selected)
        .expect("perfect match yields a signer")
        .clone()];
    let recipients_certs = vec![recipients[0]
        .effective_encryption_certificate(selected)
        .expect("perfect match yields a recipient certificate")
        .clone()];

    let controller = SignEncryptController::new(services);
    controller.set_signing(true);
    controller.set_encrypting(true);
    controller.set_certificates(signers, recipients_certs);
    controller.start_signing(vec![(
        Input::from_bytes(b"mail body".to_vec()),
        Output::memory(),
    )]);
    controller.start_encryption(vec![(
        Input::from_bytes(b"mail body".to_vec()),
        Output::memory(),
    )]);

    tokio::time::timeout(Duration::from_secs(5), controller.wait())
        .await
        .expect("controller should finish in time")
        .expect("run should succeed");

    let calls = backend.state.calls.lock().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|call| call.protocol == Protocol::Cms));
}

#[tokio::test]
async fn test_resolution_persists_across_resolver_instances() {
    let prefs_dir = tempfile::tempdir().unwrap();
    let prefs_path = prefs_dir.path().join("preferences.toml");

    let store = Arc::new(MemoryCertificateStore::new());
    store.add(pgp_signer("alice@example.org", "PGP-1"));
    store.add(pgp_signer("alice@example.org", "PGP-2"));

    let mb = mailbox("alice@example.org");
    {
        let prefs = PreferenceHandle::load_from(&prefs_path).unwrap();
        let services = Services::new(MockBackend::new())
            .with_certificates(store.clone())
            .with_preferences(prefs);
        let resolver = services.resolver();

        let senders = resolver.resolve_senders(std::slice::from_ref(&mb));
        assert!(senders[0].is_signing_ambiguous(Protocol::OpenPgp));

        // The user picks the second candidate; the choice is persisted.
        let pick = senders[0].signing_certificate_candidates(Protocol::OpenPgp)[1].clone();
        resolver.remember_signing_certificate(&mb, &pick);
    }

    // A fresh resolver over a reloaded preference store sees the choice.
    let prefs = PreferenceHandle::load_from(&prefs_path).unwrap();
    let services = Services::new(MockBackend::new())
        .with_certificates(store)
        .with_preferences(prefs);
    let resolver = services.resolver();

    let senders = resolver.resolve_senders(std::slice::from_ref(&mb));
    assert!(!senders[0].is_signing_ambiguous(Protocol::OpenPgp));
    assert_eq!(
        senders[0]
            .resolved_signing_certificate(Protocol::OpenPgp)
            .map(|cert| cert.fingerprint.as_str()),
        Some("PGP-2")
    );
}

#[tokio::test]
async fn test_overwrite_on_resolve_wins_across_instances() {
    let prefs_dir = tempfile::tempdir().unwrap();
    let prefs_path = prefs_dir.path().join("preferences.toml");

    let store = Arc::new(MemoryCertificateStore::new());
    store.add(cms_recipient("bob@example.org", "CMS-OLD"));
    store.add(cms_recipient("bob@example.org", "CMS-NEW"));

    let mb = mailbox("bob@example.org");
    let old = store.find_by_id_or_fingerprint("CMS-OLD").unwrap();
    let new = store.find_by_id_or_fingerprint("CMS-NEW").unwrap();

    {
        let prefs = PreferenceHandle::load_from(&prefs_path).unwrap();
        let services = Services::new(MockBackend::new())
            .with_certificates(store.clone())
            .with_preferences(prefs);
        let resolver = services.resolver();
        resolver.remember_encryption_certificate(&mb, &old);
        resolver.remember_encryption_certificate(&mb, &new);
    }

    let prefs = PreferenceHandle::load_from(&prefs_path).unwrap();
    let services = Services::new(MockBackend::new())
        .with_certificates(store)
        .with_preferences(prefs);
    let resolver = services.resolver();
    assert_eq!(
        resolver
            .preferred_encryption_certificate(&mb, Protocol::Cms)
            .map(|cert| cert.fingerprint),
        Some("CMS-NEW".to_owned())
    );
}
