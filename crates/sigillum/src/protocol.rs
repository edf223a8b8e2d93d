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

//! Cryptographic protocol families.
//!
//! Every task, certificate and scheduling slot is tagged with a
//! [`Protocol`]. `Unknown` marks content whose family could not be
//! determined yet; it never occupies a scheduling slot.

use serde::{Deserialize, Serialize};

/// The cryptographic family an operation or certificate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// OpenPGP (RFC 4880) operations and keys.
    OpenPgp,
    /// CMS / S/MIME operations and X.509 certificates.
    Cms,
    /// Not yet determined.
    Unknown,
}

impl Protocol {
    /// Human-readable display tag, used as a task's protocol label.
    pub fn display_name(self) -> &'static str {
        match self {
            Protocol::OpenPgp => "OpenPGP",
            Protocol::Cms => "S/MIME",
            Protocol::Unknown => "Unknown",
        }
    }

    /// Returns `true` for the two concrete families.
    pub fn is_known(self) -> bool {
        !matches!(self, Protocol::Unknown)
    }

    /// The other concrete protocol. `Unknown` maps to itself.
    pub fn other(self) -> Protocol {
        match self {
            Protocol::OpenPgp => Protocol::Cms,
            Protocol::Cms => Protocol::OpenPgp,
            Protocol::Unknown => Protocol::Unknown,
        }
    }

    /// Both concrete protocols, in scheduling order (CMS first, matching
    /// the dual-slot scheduler's fill order).
    pub const KNOWN: [Protocol; 2] = [Protocol::Cms, Protocol::OpenPgp];
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
