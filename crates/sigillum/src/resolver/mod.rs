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

//! Certificate resolution.
//!
//! Builds [`Sender`]/[`Recipient`] roles from the certificate store,
//! pre-resolves them from remembered preferences, and persists explicit
//! resolutions back (overwrite-on-resolve). Conflict detection over the
//! resolved roles lives in [`conflict`].

mod conflict;
mod roles;

pub use conflict::{has_conflict, partial_match, perfect_match, select_protocol, Operation};
pub use roles::{Recipient, Sender};

use std::sync::Arc;

use tracing::debug;

use crate::keystore::{Capability, Certificate, CertificateStore, Mailbox};
use crate::prefs::SharedPreferences;
use crate::protocol::Protocol;

/// Store-backed role construction with preference-store persistence.
pub struct CertificateResolver {
    store: Arc<dyn CertificateStore>,
    preferences: SharedPreferences,
}

impl CertificateResolver {
    pub fn new(store: Arc<dyn CertificateStore>, preferences: SharedPreferences) -> Self {
        Self { store, preferences }
    }

    /// Builds senders for the given mailboxes, applying remembered
    /// signing and encrypt-to-self certificates.
    pub fn resolve_senders(&self, mailboxes: &[Mailbox]) -> Vec<Sender> {
        mailboxes
            .iter()
            .map(|mailbox| {
                let mut sender = Sender::new(mailbox.clone(), &*self.store);
                for protocol in Protocol::KNOWN {
                    if let Some(certificate) = self.preferred_signing_certificate(mailbox, protocol)
                    {
                        sender.set_resolved_signing_certificate(certificate);
                    }
                    if let Some(certificate) =
                        self.preferred_encryption_certificate(mailbox, protocol)
                    {
                        sender.set_resolved_encryption_certificate(certificate);
                    }
                }
                sender
            })
            .collect()
    }

    /// Builds recipients for the given mailboxes, applying remembered
    /// encryption certificates.
    pub fn resolve_recipients(&self, mailboxes: &[Mailbox]) -> Vec<Recipient> {
        mailboxes
            .iter()
            .map(|mailbox| {
                let mut recipient = Recipient::new(mailbox.clone(), &*self.store);
                for protocol in Protocol::KNOWN {
                    if let Some(certificate) =
                        self.preferred_encryption_certificate(mailbox, protocol)
                    {
                        recipient.set_resolved_encryption_certificate(certificate);
                    }
                }
                recipient
            })
            .collect()
    }

    /// Remembers a resolved signing certificate for (mailbox, protocol).
    pub fn remember_signing_certificate(&self, mailbox: &Mailbox, certificate: &Certificate) {
        debug!(mailbox = %mailbox, fingerprint = %certificate.fingerprint, "remembering signing certificate");
        self.preferences.set_preferred_certificate(
            mailbox,
            Capability::Signing,
            certificate.protocol,
            &certificate.fingerprint,
        );
    }

    /// Remembers a resolved encryption certificate for (mailbox,
    /// protocol).
    pub fn remember_encryption_certificate(&self, mailbox: &Mailbox, certificate: &Certificate) {
        debug!(mailbox = %mailbox, fingerprint = %certificate.fingerprint, "remembering encryption certificate");
        self.preferences.set_preferred_certificate(
            mailbox,
            Capability::Encryption,
            certificate.protocol,
            &certificate.fingerprint,
        );
    }

    /// The remembered signing certificate, re-validated against the
    /// store: a certificate that lost its secret key is ignored.
    pub fn preferred_signing_certificate(
        &self,
        mailbox: &Mailbox,
        protocol: Protocol,
    ) -> Option<Certificate> {
        let id = self
            .preferences
            .preferred_certificate(mailbox, Capability::Signing, protocol)?;
        self.store
            .find_by_id_or_fingerprint(&id)
            .filter(Certificate::usable_for_signing)
    }

    /// The remembered encryption certificate, looked up in the store.
    pub fn preferred_encryption_certificate(
        &self,
        mailbox: &Mailbox,
        protocol: Protocol,
    ) -> Option<Certificate> {
        let id = self
            .preferences
            .preferred_certificate(mailbox, Capability::Encryption, protocol)?;
        self.store
            .find_by_id_or_fingerprint(&id)
            .filter(Certificate::usable_for_encryption)
    }
}
