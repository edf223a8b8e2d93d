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

//! Post-processing: moving produced outputs from the shared working
//! directory into their destination.
//!
//! Three concerns compose here:
//!
//! - outputs whose backend recorded an embedded original file name are
//!   renamed to it first (when the caller's policy accepts renames);
//! - destination-exists conflicts resolve through an
//!   [`OverwritePolicy`] with overwrite / overwrite-all / skip / cancel
//!   choices;
//! - directories are treated as unpacked archives and merged under a
//!   collision-avoided name (`_1`, `_2`, …) instead of being merged into
//!   an existing directory silently.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::paths::collision_free_name;
use crate::io::Output;

/// Decision for one destination-exists conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteChoice {
    /// Replace this file.
    Overwrite,
    /// Replace this file and every following conflict.
    OverwriteAll,
    /// Keep the existing file, skip this output.
    Skip,
    /// Stop post-processing; remaining outputs stay in place.
    Cancel,
}

/// Asks the caller (usually a UI) what to do about an existing file.
pub trait OverwriteDecider: Send + Sync {
    fn decide(&self, path: &Path) -> OverwriteChoice;
}

impl<F> OverwriteDecider for F
where
    F: Fn(&Path) -> OverwriteChoice + Send + Sync,
{
    fn decide(&self, path: &Path) -> OverwriteChoice {
        self(path)
    }
}

/// Conflict policy with sticky overwrite-all state.
#[derive(Clone)]
pub struct OverwritePolicy {
    decider: Option<Arc<dyn OverwriteDecider>>,
    overwrite_all: Arc<AtomicBool>,
}

impl OverwritePolicy {
    /// Delegates every conflict to `decider`.
    pub fn asking(decider: Arc<dyn OverwriteDecider>) -> Self {
        Self {
            decider: Some(decider),
            overwrite_all: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Never overwrites; conflicting outputs are skipped. The default.
    pub fn skip_existing() -> Self {
        Self {
            decider: None,
            overwrite_all: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overwrites every conflict without asking.
    pub fn overwrite_all() -> Self {
        Self {
            decider: None,
            overwrite_all: Arc::new(AtomicBool::new(true)),
        }
    }

    fn decide(&self, path: &Path) -> OverwriteChoice {
        if self.overwrite_all.load(Ordering::SeqCst) {
            return OverwriteChoice::Overwrite;
        }
        match &self.decider {
            Some(decider) => match decider.decide(path) {
                OverwriteChoice::OverwriteAll => {
                    self.overwrite_all.store(true, Ordering::SeqCst);
                    OverwriteChoice::Overwrite
                }
                choice => choice,
            },
            None => OverwriteChoice::Skip,
        }
    }
}

impl Default for OverwritePolicy {
    fn default() -> Self {
        Self::skip_existing()
    }
}

/// What post-processing did, entry by entry.
#[derive(Debug, Default)]
pub struct PostProcessReport {
    pub moved: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
    /// True when a `Cancel` choice stopped the merge early.
    pub canceled: bool,
}

impl PostProcessReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.canceled
    }
}

/// Applies embedded-name renames inside the working directory, then moves
/// everything in `work_dir` to `destination`.
pub fn merge_into_destination(
    work_dir: &Path,
    destination: &Path,
    outputs: &[Arc<Output>],
    policy: &OverwritePolicy,
    apply_embedded_names: bool,
) -> PostProcessReport {
    let mut report = PostProcessReport::default();

    if apply_embedded_names {
        rename_to_embedded_names(work_dir, outputs, &mut report);
    }

    let entries = match std::fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(error) => {
            report
                .errors
                .push((work_dir.to_path_buf(), error.to_string()));
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                report
                    .errors
                    .push((work_dir.to_path_buf(), error.to_string()));
                continue;
            }
        };
        let in_path = entry.path();

        if in_path.is_dir() {
            // An unpacked archive: never merge into an existing
            // directory, find a free sibling name instead.
            let target = destination.join(entry.file_name());
            match collision_free_name(&target) {
                Some(target) => {
                    debug!(from = %in_path.display(), to = %target.display(), "moving unpacked directory");
                    match std::fs::rename(&in_path, &target) {
                        Ok(()) => report.moved.push(target),
                        Err(error) => {
                            report.errors.push((in_path, error.to_string()));
                        }
                    }
                }
                None => {
                    report.errors.push((
                        in_path,
                        format!("no free name for {} in {}", target.display(), destination.display()),
                    ));
                }
            }
            continue;
        }

        let out_path = destination.join(entry.file_name());
        if out_path.exists() {
            match policy.decide(&out_path) {
                OverwriteChoice::Overwrite | OverwriteChoice::OverwriteAll => {
                    if let Err(error) = std::fs::remove_file(&out_path) {
                        report.errors.push((out_path.clone(), error.to_string()));
                        continue;
                    }
                }
                OverwriteChoice::Skip => {
                    debug!(path = %out_path.display(), "skipping existing file");
                    report.skipped.push(out_path);
                    continue;
                }
                OverwriteChoice::Cancel => {
                    debug!(path = %out_path.display(), "post-processing canceled");
                    report.canceled = true;
                    return report;
                }
            }
        }
        match move_file(&in_path, &out_path) {
            Ok(()) => report.moved.push(out_path),
            Err(error) => report.errors.push((in_path, error.to_string())),
        }
    }

    report
}

/// Renames produced files to the original names embedded in the decrypted
/// messages, where they differ and the name is free.
fn rename_to_embedded_names(
    work_dir: &Path,
    outputs: &[Arc<Output>],
    report: &mut PostProcessReport,
) {
    for output in outputs {
        let Some(embedded) = output.embedded_name() else {
            continue;
        };
        let Some(path) = output.path() else { continue };
        if !path.starts_with(work_dir) || !path.exists() {
            continue;
        }
        // Embedded names come from untrusted message metadata; use the
        // file-name component only.
        let Some(safe_name) = Path::new(&embedded).file_name() else {
            continue;
        };
        if path.file_name() == Some(safe_name) {
            continue;
        }
        let target = work_dir.join(safe_name);
        if target.exists() {
            warn!(
                from = %path.display(),
                to = %target.display(),
                "embedded file name already taken, keeping output name"
            );
            continue;
        }
        debug!(from = %path.display(), to = %target.display(), "renaming to embedded file name");
        if let Err(error) = std::fs::rename(path, &target) {
            report.errors.push((path.to_path_buf(), error.to_string()));
        }
    }
}

/// Rename with a copy fallback for cross-device moves.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}
