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

//! The bundle of external collaborators controllers work against.

use std::sync::Arc;

use crate::archive::ArchiveDefinitionRegistry;
use crate::backend::JobFactory;
use crate::classify::{Classifier, ExtensionClassifier};
use crate::keystore::{CertificateStore, MemoryCertificateStore};
use crate::prefs::{PreferenceHandle, SharedPreferences};
use crate::resolver::CertificateResolver;

/// External collaborators: classifier, certificate store, backend job
/// factory, archive definitions and preferences.
///
/// Only the job factory is mandatory; the rest defaults to the built-in
/// implementations.
#[derive(Clone)]
pub struct Services {
    pub classifier: Arc<dyn Classifier>,
    pub certificates: Arc<dyn CertificateStore>,
    pub jobs: Arc<dyn JobFactory>,
    pub archives: ArchiveDefinitionRegistry,
    pub preferences: SharedPreferences,
}

impl Services {
    pub fn new(jobs: Arc<dyn JobFactory>) -> Self {
        Self {
            classifier: Arc::new(ExtensionClassifier),
            certificates: Arc::new(MemoryCertificateStore::new()),
            jobs,
            archives: ArchiveDefinitionRegistry::builtin(),
            preferences: PreferenceHandle::in_memory(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_certificates(mut self, certificates: Arc<dyn CertificateStore>) -> Self {
        self.certificates = certificates;
        self
    }

    pub fn with_archives(mut self, archives: ArchiveDefinitionRegistry) -> Self {
        self.archives = archives;
        self
    }

    pub fn with_preferences(mut self, preferences: SharedPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// A resolver over this service bundle's certificate store and
    /// preferences.
    pub fn resolver(&self) -> CertificateResolver {
        CertificateResolver::new(self.certificates.clone(), self.preferences.clone())
    }
}
