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

//! Preference store.
//!
//! Persists resolved (mailbox, protocol) → certificate associations and a
//! small set of global defaults. Persistence is overwrite-on-resolve:
//! storing a new association replaces the previous one, there is no
//! explicit invalidation.
//!
//! The store is a TOML file under the user's configuration directory (or
//! any explicit path); [`PreferenceHandle::in_memory`] gives a
//! non-persistent store for tests and embedded use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PreferenceError;
use crate::keystore::{Capability, Mailbox};
use crate::protocol::Protocol;

/// Certificate ids remembered for one mailbox, one per protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateIds {
    pub openpgp: Option<String>,
    pub cms: Option<String>,
}

impl CertificateIds {
    fn get(&self, protocol: Protocol) -> Option<&str> {
        match protocol {
            Protocol::OpenPgp => self.openpgp.as_deref(),
            Protocol::Cms => self.cms.as_deref(),
            Protocol::Unknown => None,
        }
    }

    fn set(&mut self, protocol: Protocol, id: String) {
        match protocol {
            Protocol::OpenPgp => self.openpgp = Some(id),
            Protocol::Cms => self.cms = Some(id),
            Protocol::Unknown => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.openpgp.is_none() && self.cms.is_none()
    }
}

/// Global defaults for file operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOperationPreferences {
    /// Create the shared working directory next to the inputs instead of
    /// under the system temp directory.
    pub work_dir_adjacent_to_inputs: bool,
    /// Select an unpack command for outputs that look like archives.
    pub auto_extract_archives: bool,
    /// Id of the default archive definition.
    pub archive_command: String,
}

impl Default for FileOperationPreferences {
    fn default() -> Self {
        Self {
            work_dir_adjacent_to_inputs: false,
            auto_extract_archives: true,
            archive_command: "tar".to_owned(),
        }
    }
}

/// The serialized preference model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub file_operations: FileOperationPreferences,
    /// Remembered signing certificates, keyed by mailbox address.
    pub signing_certificates: BTreeMap<String, CertificateIds>,
    /// Remembered encryption certificates, keyed by mailbox address.
    pub encryption_certificates: BTreeMap<String, CertificateIds>,
}

/// Shared handle to the preference store.
pub type SharedPreferences = Arc<PreferenceHandle>;

/// Preference store with optional TOML file backing.
///
/// Setters write through to the backing file immediately; write failures
/// are logged and do not fail the resolution that triggered them.
pub struct PreferenceHandle {
    inner: RwLock<Preferences>,
    path: Option<PathBuf>,
}

impl PreferenceHandle {
    /// A store that never touches the filesystem.
    pub fn in_memory() -> SharedPreferences {
        Arc::new(Self {
            inner: RwLock::new(Preferences::default()),
            path: None,
        })
    }

    /// Loads preferences from `path`; a missing file yields defaults.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<SharedPreferences, PreferenceError> {
        let path = path.into();
        let preferences = if path.is_file() {
            let raw = std::fs::read_to_string(&path).map_err(|source| PreferenceError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| PreferenceError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            debug!(path = %path.display(), "no preference file, starting from defaults");
            Preferences::default()
        };
        Ok(Arc::new(Self {
            inner: RwLock::new(preferences),
            path: Some(path),
        }))
    }

    /// The conventional preference file location under the user's config
    /// directory.
    pub fn default_location() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sigillum").join("preferences.toml"))
    }

    /// A copy of the current preference state.
    pub fn snapshot(&self) -> Preferences {
        self.inner.read().clone()
    }

    /// Serializes the current state to the backing file.
    pub fn save(&self) -> Result<(), PreferenceError> {
        let path = self.path.as_ref().ok_or(PreferenceError::NoBackingFile)?;
        let serialized =
            toml::to_string_pretty(&*self.inner.read()).map_err(PreferenceError::Serialize)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PreferenceError::Write {
                path: path.clone(),
                source,
            })?;
        }
        std::fs::write(path, serialized).map_err(|source| PreferenceError::Write {
            path: path.clone(),
            source,
        })
    }

    fn write_through(&self) {
        if self.path.is_none() {
            return;
        }
        if let Err(error) = self.save() {
            warn!(%error, "failed to persist preferences");
        }
    }

    pub fn work_dir_adjacent_to_inputs(&self) -> bool {
        self.inner.read().file_operations.work_dir_adjacent_to_inputs
    }

    pub fn set_work_dir_adjacent_to_inputs(&self, value: bool) {
        self.inner.write().file_operations.work_dir_adjacent_to_inputs = value;
        self.write_through();
    }

    pub fn auto_extract_archives(&self) -> bool {
        self.inner.read().file_operations.auto_extract_archives
    }

    pub fn set_auto_extract_archives(&self, value: bool) {
        self.inner.write().file_operations.auto_extract_archives = value;
        self.write_through();
    }

    pub fn archive_command(&self) -> String {
        self.inner.read().file_operations.archive_command.clone()
    }

    pub fn set_archive_command(&self, id: impl Into<String>) {
        self.inner.write().file_operations.archive_command = id.into();
        self.write_through();
    }

    /// The certificate id remembered for (mailbox, protocol) in the given
    /// role, if any.
    pub fn preferred_certificate(
        &self,
        mailbox: &Mailbox,
        capability: Capability,
        protocol: Protocol,
    ) -> Option<String> {
        let inner = self.inner.read();
        let map = match capability {
            Capability::Signing => &inner.signing_certificates,
            Capability::Encryption => &inner.encryption_certificates,
        };
        map.get(&mailbox.address())
            .and_then(|ids| ids.get(protocol))
            .map(str::to_owned)
    }

    /// Remembers `certificate_id` for (mailbox, protocol), replacing any
    /// previous association.
    pub fn set_preferred_certificate(
        &self,
        mailbox: &Mailbox,
        capability: Capability,
        protocol: Protocol,
        certificate_id: impl Into<String>,
    ) {
        if !protocol.is_known() {
            return;
        }
        {
            let mut inner = self.inner.write();
            let map = match capability {
                Capability::Signing => &mut inner.signing_certificates,
                Capability::Encryption => &mut inner.encryption_certificates,
            };
            let entry = map.entry(mailbox.address()).or_default();
            entry.set(protocol, certificate_id.into());
            debug_assert!(!entry.is_empty());
        }
        self.write_through();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox(addr: &str) -> Mailbox {
        Mailbox::parse(addr).unwrap()
    }

    #[test]
    fn test_defaults() {
        let prefs = PreferenceHandle::in_memory();
        assert!(!prefs.work_dir_adjacent_to_inputs());
        assert!(prefs.auto_extract_archives());
        assert_eq!(prefs.archive_command(), "tar");
    }

    #[test]
    fn test_overwrite_on_resolve() {
        let prefs = PreferenceHandle::in_memory();
        let mb = mailbox("alice@example.org");

        prefs.set_preferred_certificate(&mb, Capability::Encryption, Protocol::OpenPgp, "OLD");
        prefs.set_preferred_certificate(&mb, Capability::Encryption, Protocol::OpenPgp, "NEW");

        assert_eq!(
            prefs.preferred_certificate(&mb, Capability::Encryption, Protocol::OpenPgp),
            Some("NEW".to_owned())
        );
        // The other protocol and role remain untouched.
        assert_eq!(
            prefs.preferred_certificate(&mb, Capability::Encryption, Protocol::Cms),
            None
        );
        assert_eq!(
            prefs.preferred_certificate(&mb, Capability::Signing, Protocol::OpenPgp),
            None
        );
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.toml");

        let prefs = PreferenceHandle::load_from(&path).unwrap();
        let mb = mailbox("bob@example.org");
        prefs.set_preferred_certificate(&mb, Capability::Signing, Protocol::Cms, "CMS-1");
        prefs.set_archive_command("zip");

        let reloaded = PreferenceHandle::load_from(&path).unwrap();
        assert_eq!(
            reloaded.preferred_certificate(&mb, Capability::Signing, Protocol::Cms),
            Some("CMS-1".to_owned())
        );
        assert_eq!(reloaded.archive_command(), "zip");
    }

    #[test]
    fn test_unknown_protocol_is_never_persisted() {
        let prefs = PreferenceHandle::in_memory();
        let mb = mailbox("alice@example.org");
        prefs.set_preferred_certificate(&mb, Capability::Signing, Protocol::Unknown, "X");
        assert!(prefs.snapshot().signing_certificates.is_empty());
    }
}
