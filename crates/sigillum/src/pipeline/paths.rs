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

//! Path helpers for pipeline construction and output placement.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Upper bound for collision-avoidance suffixes.
const MAX_COLLISION_SUFFIX: u32 = 1000;

/// The deepest directory containing all given files — where outputs and
/// adjacent working directories default to.
pub fn heuristic_base_directory(files: &[PathBuf]) -> Option<PathBuf> {
    let first = files.first()?;
    let mut base = first.parent()?.to_path_buf();
    for file in &files[1..] {
        let dir = file.parent()?;
        while !dir.starts_with(&base) {
            base = base.parent()?.to_path_buf();
        }
    }
    Some(base)
}

/// Returns `target` if nothing exists there, otherwise the first
/// `target_1`, `target_2`, … that is free. `None` once the bound is
/// exhausted.
pub fn collision_free_name(target: &Path) -> Option<PathBuf> {
    if !target.exists() {
        return Some(target.to_path_buf());
    }
    let file_name = target.file_name()?;
    let parent = target.parent()?;
    for i in 1..MAX_COLLISION_SUFFIX {
        let mut candidate: OsString = file_name.to_owned();
        candidate.push(format!("_{}", i));
        let candidate = parent.join(candidate);
        if !candidate.exists() {
            return Some(candidate);
        }
    }
    None
}
