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

//! Pipeline construction for decrypt/verify batches.
//!
//! Turns a flat list of file paths of unknown, possibly mixed content
//! into an ordered task list: classification decides what each file is,
//! grouping by (protocol, stripped base name) decides what belongs
//! together, and within a group cipher text is ordered before detached
//! signatures so a decrypted output can feed the verification that
//! follows it.

mod builder;
mod paths;
mod postprocess;

pub use builder::{build_decrypt_verify_tasks, BuiltPipeline, FileError, PipelineRequest};
pub use paths::{collision_free_name, heuristic_base_directory};
pub use postprocess::{
    merge_into_destination, OverwriteChoice, OverwriteDecider, OverwritePolicy, PostProcessReport,
};

use std::path::{Path, PathBuf};

/// Supplies signed data for a detached signature when neither the
/// pipeline chain nor the filesystem offers one — typically a file
/// picker in the presentation layer.
pub trait SignedDataSource: Send + Sync {
    fn signed_data_for(&self, signature: &Path) -> Option<PathBuf>;
}

impl<F> SignedDataSource for F
where
    F: Fn(&Path) -> Option<PathBuf> + Send + Sync,
{
    fn signed_data_for(&self, signature: &Path) -> Option<PathBuf> {
        self(signature)
    }
}
