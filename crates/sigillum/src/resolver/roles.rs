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

//! Sender and recipient roles.
//!
//! A role bundles a mailbox with its per-protocol certificate candidates:
//! signing (and encrypt-to-self) candidates for a [`Sender`], encryption
//! candidates for a [`Recipient`]. A role is ambiguous under a protocol
//! while its candidate set does not have exactly one entry and no
//! certificate has been explicitly resolved.

use crate::keystore::{Capability, Certificate, CertificateStore, Mailbox};
use crate::protocol::Protocol;

/// Per-protocol pair without an `Unknown` slot.
#[derive(Debug, Clone, Default)]
struct PerProtocol<T> {
    openpgp: T,
    cms: T,
}

impl<T> PerProtocol<T> {
    fn get(&self, protocol: Protocol) -> Option<&T> {
        match protocol {
            Protocol::OpenPgp => Some(&self.openpgp),
            Protocol::Cms => Some(&self.cms),
            Protocol::Unknown => None,
        }
    }

    fn get_mut(&mut self, protocol: Protocol) -> Option<&mut T> {
        match protocol {
            Protocol::OpenPgp => Some(&mut self.openpgp),
            Protocol::Cms => Some(&mut self.cms),
            Protocol::Unknown => None,
        }
    }
}

fn partition(certificates: Vec<Certificate>) -> PerProtocol<Vec<Certificate>> {
    let mut out: PerProtocol<Vec<Certificate>> = PerProtocol::default();
    for certificate in certificates {
        match certificate.protocol {
            Protocol::OpenPgp => out.openpgp.push(certificate),
            Protocol::Cms => out.cms.push(certificate),
            Protocol::Unknown => {}
        }
    }
    out
}

const NO_CANDIDATES: &[Certificate] = &[];

/// A sending mailbox with signing and encrypt-to-self candidates.
#[derive(Debug, Clone)]
pub struct Sender {
    mailbox: Mailbox,
    signing: PerProtocol<Vec<Certificate>>,
    encrypt_to_self: PerProtocol<Vec<Certificate>>,
    resolved_signing: PerProtocol<Option<Certificate>>,
    resolved_encryption: PerProtocol<Option<Certificate>>,
}

impl Sender {
    /// Looks the candidates for `mailbox` up in `store`.
    pub fn new(mailbox: Mailbox, store: &dyn CertificateStore) -> Self {
        let signing =
            partition(store.find_by_mailbox_and_capability(&mailbox, Capability::Signing, None));
        let encrypt_to_self =
            partition(store.find_by_mailbox_and_capability(&mailbox, Capability::Encryption, None));
        Self {
            mailbox,
            signing,
            encrypt_to_self,
            resolved_signing: PerProtocol::default(),
            resolved_encryption: PerProtocol::default(),
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn signing_certificate_candidates(&self, protocol: Protocol) -> &[Certificate] {
        self.signing
            .get(protocol)
            .map(Vec::as_slice)
            .unwrap_or(NO_CANDIDATES)
    }

    pub fn encrypt_to_self_certificate_candidates(&self, protocol: Protocol) -> &[Certificate] {
        self.encrypt_to_self
            .get(protocol)
            .map(Vec::as_slice)
            .unwrap_or(NO_CANDIDATES)
    }

    /// Ambiguous while the candidate set size differs from one and no
    /// explicit resolution happened.
    pub fn is_signing_ambiguous(&self, protocol: Protocol) -> bool {
        if self
            .resolved_signing
            .get(protocol)
            .is_some_and(Option::is_some)
        {
            return false;
        }
        self.signing_certificate_candidates(protocol).len() != 1
    }

    pub fn is_encryption_ambiguous(&self, protocol: Protocol) -> bool {
        if self
            .resolved_encryption
            .get(protocol)
            .is_some_and(Option::is_some)
        {
            return false;
        }
        self.encrypt_to_self_certificate_candidates(protocol).len() != 1
    }

    /// Fixes the signing certificate; clears the ambiguity for its
    /// protocol. Certificates of unknown protocol are ignored.
    pub fn set_resolved_signing_certificate(&mut self, certificate: Certificate) {
        if let Some(slot) = self.resolved_signing.get_mut(certificate.protocol) {
            *slot = Some(certificate);
        }
    }

    pub fn set_resolved_encryption_certificate(&mut self, certificate: Certificate) {
        if let Some(slot) = self.resolved_encryption.get_mut(certificate.protocol) {
            *slot = Some(certificate);
        }
    }

    pub fn resolved_signing_certificate(&self, protocol: Protocol) -> Option<&Certificate> {
        self.resolved_signing.get(protocol).and_then(Option::as_ref)
    }

    pub fn resolved_encryption_certificate(&self, protocol: Protocol) -> Option<&Certificate> {
        self.resolved_encryption
            .get(protocol)
            .and_then(Option::as_ref)
    }

    /// The explicitly resolved certificate, or the sole candidate.
    pub fn effective_signing_certificate(&self, protocol: Protocol) -> Option<&Certificate> {
        self.resolved_signing_certificate(protocol).or_else(|| {
            let candidates = self.signing_certificate_candidates(protocol);
            match candidates {
                [only] => Some(only),
                _ => None,
            }
        })
    }

    pub fn effective_encryption_certificate(&self, protocol: Protocol) -> Option<&Certificate> {
        self.resolved_encryption_certificate(protocol).or_else(|| {
            match self.encrypt_to_self_certificate_candidates(protocol) {
                [only] => Some(only),
                _ => None,
            }
        })
    }
}

/// A receiving mailbox with encryption candidates.
#[derive(Debug, Clone)]
pub struct Recipient {
    mailbox: Mailbox,
    encryption: PerProtocol<Vec<Certificate>>,
    resolved: PerProtocol<Option<Certificate>>,
}

impl Recipient {
    pub fn new(mailbox: Mailbox, store: &dyn CertificateStore) -> Self {
        let encryption =
            partition(store.find_by_mailbox_and_capability(&mailbox, Capability::Encryption, None));
        Self {
            mailbox,
            encryption,
            resolved: PerProtocol::default(),
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn encryption_certificate_candidates(&self, protocol: Protocol) -> &[Certificate] {
        self.encryption
            .get(protocol)
            .map(Vec::as_slice)
            .unwrap_or(NO_CANDIDATES)
    }

    pub fn is_encryption_ambiguous(&self, protocol: Protocol) -> bool {
        if self.resolved.get(protocol).is_some_and(Option::is_some) {
            return false;
        }
        self.encryption_certificate_candidates(protocol).len() != 1
    }

    pub fn set_resolved_encryption_certificate(&mut self, certificate: Certificate) {
        if let Some(slot) = self.resolved.get_mut(certificate.protocol) {
            *slot = Some(certificate);
        }
    }

    pub fn resolved_encryption_certificate(&self, protocol: Protocol) -> Option<&Certificate> {
        self.resolved.get(protocol).and_then(Option::as_ref)
    }

    pub fn effective_encryption_certificate(&self, protocol: Protocol) -> Option<&Certificate> {
        self.resolved_encryption_certificate(protocol)
            .or_else(|| match self.encryption_certificate_candidates(protocol) {
                [only] => Some(only),
                _ => None,
            })
    }
}
