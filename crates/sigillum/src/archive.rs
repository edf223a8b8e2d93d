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

//! Archive definition registry.
//!
//! An [`ArchiveDefinition`] maps a protocol to pack/unpack command
//! descriptors and the file extensions the packed artifact carries. The
//! engine only routes these descriptors into task inputs/outputs; running
//! the commands is the backend's business.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::classify::strip_crypto_extension;
use crate::io::{Input, Output};
use crate::prefs::SharedPreferences;
use crate::protocol::Protocol;

/// How input file names reach a pack command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentPassing {
    /// Appended to the command line.
    CommandLine,
    /// Written to stdin, one per line.
    NewlineSeparatedInputFile,
    /// Written to stdin, NUL-separated.
    NullSeparatedInputFile,
}

/// An external command the backend runs to pack or unpack an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub program: String,
    pub arguments: Vec<String>,
    pub passing: ArgumentPassing,
}

impl CommandDescriptor {
    pub fn new(program: impl Into<String>, arguments: &[&str], passing: ArgumentPassing) -> Self {
        Self {
            program: program.into(),
            arguments: arguments.iter().map(|s| (*s).to_owned()).collect(),
            passing,
        }
    }
}

/// Pack/unpack commands and artifact extensions for one protocol.
#[derive(Debug, Clone)]
struct ProtocolCommands {
    pack: CommandDescriptor,
    unpack: CommandDescriptor,
    extensions: Vec<String>,
}

/// One archive flavor (tar, zip, …) the engine can pack into or unpack
/// from, per protocol.
#[derive(Debug, Clone)]
pub struct ArchiveDefinition {
    id: String,
    label: String,
    openpgp: ProtocolCommands,
    cms: ProtocolCommands,
}

impl ArchiveDefinition {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        pack: CommandDescriptor,
        unpack: CommandDescriptor,
        extensions: &[&str],
    ) -> Self {
        // Unpack output is piped on the command line; the other passing
        // modes only make sense for pack input lists.
        debug_assert_eq!(unpack.passing, ArgumentPassing::CommandLine);
        let commands = ProtocolCommands {
            pack,
            unpack,
            extensions: extensions.iter().map(|s| (*s).to_owned()).collect(),
        };
        Self {
            id: id.into(),
            label: label.into(),
            openpgp: commands.clone(),
            cms: commands,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn commands(&self, protocol: Protocol) -> Option<&ProtocolCommands> {
        match protocol {
            Protocol::OpenPgp => Some(&self.openpgp),
            Protocol::Cms => Some(&self.cms),
            Protocol::Unknown => None,
        }
    }

    /// Artifact extensions for `protocol`, e.g. `["tar"]`.
    pub fn extensions(&self, protocol: Protocol) -> &[String] {
        self.commands(protocol)
            .map(|c| c.extensions.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `path` (with its crypto suffix already stripped) looks like
    /// an artifact of this definition.
    pub fn matches_extension(&self, protocol: Protocol, stripped: &Path) -> bool {
        let Some(ext) = stripped.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions(protocol).iter().any(|known| *known == ext)
    }

    /// Input that streams the pack command's output over `files`.
    pub fn create_pack_input(&self, protocol: Protocol, files: &[PathBuf]) -> Option<Input> {
        let commands = self.commands(protocol)?;
        Some(Input::PackCommand {
            command: commands.pack.clone(),
            files: files.to_vec(),
        })
    }

    /// Output that pipes decrypted data through the unpack command into
    /// `work_dir`.
    pub fn create_unpack_output(
        &self,
        protocol: Protocol,
        work_dir: &Path,
    ) -> Option<Arc<Output>> {
        let commands = self.commands(protocol)?;
        Some(Output::unpack_command(commands.unpack.clone(), work_dir))
    }
}

static BUILTIN_DEFINITIONS: Lazy<Vec<Arc<ArchiveDefinition>>> = Lazy::new(|| {
    vec![
        Arc::new(ArchiveDefinition::new(
            "tar",
            "TAR (PGP®-compatible)",
            CommandDescriptor::new(
                "tar",
                &["-cf", "-", "--null", "-T", "-"],
                ArgumentPassing::NullSeparatedInputFile,
            ),
            CommandDescriptor::new("tar", &["-xf", "-", "-C"], ArgumentPassing::CommandLine),
            &["tar"],
        )),
        Arc::new(ArchiveDefinition::new(
            "zip",
            "ZIP",
            CommandDescriptor::new("zip", &["-@", "-"], ArgumentPassing::NewlineSeparatedInputFile),
            CommandDescriptor::new("unzip", &["-d"], ArgumentPassing::CommandLine),
            &["zip"],
        )),
    ]
});

/// The set of archive definitions available to controllers.
#[derive(Clone)]
pub struct ArchiveDefinitionRegistry {
    definitions: Vec<Arc<ArchiveDefinition>>,
}

impl ArchiveDefinitionRegistry {
    /// Registry with the built-in tar and zip definitions.
    pub fn builtin() -> Self {
        Self {
            definitions: BUILTIN_DEFINITIONS.clone(),
        }
    }

    pub fn with_definitions(definitions: Vec<Arc<ArchiveDefinition>>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &[Arc<ArchiveDefinition>] {
        &self.definitions
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<ArchiveDefinition>> {
        self.definitions.iter().find(|def| def.id() == id).cloned()
    }

    /// The preference-selected default, falling back to the first
    /// definition.
    pub fn default_definition(&self, preferences: &SharedPreferences) -> Option<Arc<ArchiveDefinition>> {
        let preferred = preferences.archive_command();
        self.by_id(&preferred)
            .or_else(|| self.definitions.first().cloned())
    }

    /// Picks the definition whose artifact extension shows under the
    /// crypto suffix of `file`, e.g. `backup.tar.gpg` → tar.
    pub fn pick_for_file(&self, protocol: Protocol, file: &Path) -> Option<Arc<ArchiveDefinition>> {
        let stripped = strip_crypto_extension(file)?;
        self.definitions
            .iter()
            .find(|def| def.matches_extension(protocol, &stripped))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::PreferenceHandle;

    #[test]
    fn test_builtin_registry_has_tar_and_zip() {
        let registry = ArchiveDefinitionRegistry::builtin();
        assert!(registry.by_id("tar").is_some());
        assert!(registry.by_id("zip").is_some());
        assert!(registry.by_id("7z").is_none());
    }

    #[test]
    fn test_default_definition_follows_preferences() {
        let registry = ArchiveDefinitionRegistry::builtin();
        let prefs = PreferenceHandle::in_memory();

        let default = registry.default_definition(&prefs).unwrap();
        assert_eq!(default.id(), "tar");

        prefs.set_archive_command("zip");
        let default = registry.default_definition(&prefs).unwrap();
        assert_eq!(default.id(), "zip");

        // Unknown preferred id falls back to the first definition.
        prefs.set_archive_command("rar");
        let default = registry.default_definition(&prefs).unwrap();
        assert_eq!(default.id(), "tar");
    }

    #[test]
    fn test_pick_for_file_sees_through_crypto_suffix() {
        let registry = ArchiveDefinitionRegistry::builtin();
        let picked = registry
            .pick_for_file(Protocol::OpenPgp, Path::new("backup.tar.gpg"))
            .unwrap();
        assert_eq!(picked.id(), "tar");

        assert!(registry
            .pick_for_file(Protocol::OpenPgp, Path::new("report.pdf.gpg"))
            .is_none());
        assert!(registry
            .pick_for_file(Protocol::OpenPgp, Path::new("backup.tar"))
            .is_none());
    }
}
