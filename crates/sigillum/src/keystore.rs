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

//! Certificate store contract and mailbox matching.
//!
//! The resolver looks certificates up per mailbox and capability. Matching
//! is by email address: the local part compares exactly, the domain
//! ASCII-case-insensitively.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::protocol::Protocol;

/// An email address used as the unit of certificate matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mailbox {
    local: String,
    domain: String,
}

impl Mailbox {
    /// Parses `local@domain`. Returns `None` without exactly one `@` or
    /// with an empty part.
    pub fn parse(address: &str) -> Option<Self> {
        let (local, domain) = address.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self {
            local: local.to_owned(),
            domain: domain.to_owned(),
        })
    }

    pub fn local_part(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The full address, as parsed.
    pub fn address(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    /// Whether `email` designates this mailbox. Local part exact, domain
    /// case-insensitive.
    pub fn matches(&self, email: &str) -> bool {
        match email.split_once('@') {
            Some((local, domain)) => {
                local == self.local && domain.eq_ignore_ascii_case(&self.domain)
            }
            None => false,
        }
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

/// What a certificate is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Signing,
    Encryption,
}

/// A certificate as the orchestration layer sees it: identity, matching
/// addresses and capability flags. The key material itself stays with the
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub fingerprint: String,
    pub key_id: String,
    pub protocol: Protocol,
    pub subject: String,
    pub emails: Vec<String>,
    pub can_sign: bool,
    pub can_encrypt: bool,
    pub has_secret_key: bool,
    pub revoked: bool,
    pub expired: bool,
}

impl Certificate {
    /// A minimal certificate with the given identity; capabilities are
    /// added with the `with_*` builders.
    pub fn new(fingerprint: impl Into<String>, protocol: Protocol) -> Self {
        let fingerprint = fingerprint.into();
        let key_id = fingerprint
            .chars()
            .rev()
            .take(16)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Self {
            fingerprint,
            key_id,
            protocol,
            subject: String::new(),
            emails: Vec::new(),
            can_sign: false,
            can_encrypt: false,
            has_secret_key: false,
            revoked: false,
            expired: false,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.emails.push(email.into());
        self
    }

    pub fn with_signing(mut self) -> Self {
        self.can_sign = true;
        self.has_secret_key = true;
        self
    }

    pub fn with_encryption(mut self) -> Self {
        self.can_encrypt = true;
        self
    }

    pub fn revoked(mut self) -> Self {
        self.revoked = true;
        self
    }

    pub fn expired(mut self) -> Self {
        self.expired = true;
        self
    }

    fn is_valid(&self) -> bool {
        !self.revoked && !self.expired
    }

    /// Signing requires a usable secret key on a valid certificate.
    pub fn usable_for_signing(&self) -> bool {
        self.can_sign && self.has_secret_key && self.is_valid()
    }

    pub fn usable_for_encryption(&self) -> bool {
        self.can_encrypt && self.is_valid()
    }

    pub fn usable_for(&self, capability: Capability) -> bool {
        match capability {
            Capability::Signing => self.usable_for_signing(),
            Capability::Encryption => self.usable_for_encryption(),
        }
    }

    /// Whether any registered address designates `mailbox`.
    pub fn matches_mailbox(&self, mailbox: &Mailbox) -> bool {
        self.emails.iter().any(|email| mailbox.matches(email))
    }
}

/// Lookup interface of the key/certificate store.
pub trait CertificateStore: Send + Sync {
    /// All usable certificates for `mailbox` in the given role, optionally
    /// restricted to one protocol.
    fn find_by_mailbox_and_capability(
        &self,
        mailbox: &Mailbox,
        capability: Capability,
        protocol: Option<Protocol>,
    ) -> Vec<Certificate>;

    /// Looks a certificate up by key id or fingerprint.
    fn find_by_id_or_fingerprint(&self, id: &str) -> Option<Certificate>;
}

/// In-memory certificate store.
#[derive(Default)]
pub struct MemoryCertificateStore {
    certificates: RwLock<Vec<Certificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, certificate: Certificate) {
        self.certificates.write().push(certificate);
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn find_by_mailbox_and_capability(
        &self,
        mailbox: &Mailbox,
        capability: Capability,
        protocol: Option<Protocol>,
    ) -> Vec<Certificate> {
        self.certificates
            .read()
            .iter()
            .filter(|cert| cert.matches_mailbox(mailbox))
            .filter(|cert| cert.usable_for(capability))
            .filter(|cert| protocol.map_or(true, |proto| cert.protocol == proto))
            .cloned()
            .collect()
    }

    fn find_by_id_or_fingerprint(&self, id: &str) -> Option<Certificate> {
        self.certificates
            .read()
            .iter()
            .find(|cert| cert.fingerprint == id || cert.key_id == id)
            .cloned()
    }
}
