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

//! Protocol conflict detection.
//!
//! Whether an operation can proceed without asking the user to pick a
//! protocol is decided by match strength per protocol:
//!
//! - *perfect*: every required role resolves to exactly one candidate;
//! - *partial*: every required role has at least one candidate.
//!
//! There is no conflict iff
//!
//! ```text
//! (preset known && perfect(preset))
//!   || (perfect(OpenPGP) && !partial(CMS))
//!   || (perfect(CMS) && !partial(OpenPGP))
//! ```
//!
//! In words: a preset protocol that resolves perfectly wins; otherwise a
//! protocol only auto-selects when it is perfect *and* the other protocol
//! is not even a viable fallback. Notably, a perfect match on both
//! protocols is still a conflict — the protocol choice itself remains
//! with the user.

use super::roles::{Recipient, Sender};
use crate::protocol::Protocol;

/// What the certificate resolution is asked to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub sign: bool,
    pub encrypt: bool,
}

impl Operation {
    pub fn sign() -> Self {
        Self {
            sign: true,
            encrypt: false,
        }
    }

    pub fn encrypt() -> Self {
        Self {
            sign: false,
            encrypt: true,
        }
    }

    pub fn sign_and_encrypt() -> Self {
        Self {
            sign: true,
            encrypt: true,
        }
    }
}

/// Every required role resolves to exactly one candidate under
/// `protocol`: senders for signing; senders (encrypt-to-self) and
/// recipients for encrypting.
pub fn perfect_match(
    protocol: Protocol,
    operation: Operation,
    senders: &[Sender],
    recipients: &[Recipient],
) -> bool {
    let sign_ok = !operation.sign
        || senders
            .iter()
            .all(|sender| !sender.is_signing_ambiguous(protocol));
    let encrypt_ok = !operation.encrypt
        || (senders
            .iter()
            .all(|sender| !sender.is_encryption_ambiguous(protocol))
            && recipients
                .iter()
                .all(|recipient| !recipient.is_encryption_ambiguous(protocol)));
    sign_ok && encrypt_ok
}

/// The weaker form: every required role has at least one candidate under
/// `protocol`.
pub fn partial_match(
    protocol: Protocol,
    operation: Operation,
    senders: &[Sender],
    recipients: &[Recipient],
) -> bool {
    let sign_ok = !operation.sign
        || senders.iter().all(|sender| {
            !sender.signing_certificate_candidates(protocol).is_empty()
                || sender.resolved_signing_certificate(protocol).is_some()
        });
    let encrypt_ok = !operation.encrypt
        || (senders.iter().all(|sender| {
            !sender
                .encrypt_to_self_certificate_candidates(protocol)
                .is_empty()
                || sender.resolved_encryption_certificate(protocol).is_some()
        }) && recipients.iter().all(|recipient| {
            !recipient
                .encryption_certificate_candidates(protocol)
                .is_empty()
                || recipient.resolved_encryption_certificate(protocol).is_some()
        }));
    sign_ok && encrypt_ok
}

/// The exact conflict decision. A conflict means the operation must ask
/// the user to disambiguate rather than silently picking a protocol.
pub fn has_conflict(
    preset: Protocol,
    operation: Operation,
    senders: &[Sender],
    recipients: &[Recipient],
) -> bool {
    let no_conflict = (preset.is_known()
        && perfect_match(preset, operation, senders, recipients))
        || (perfect_match(Protocol::OpenPgp, operation, senders, recipients)
            && !partial_match(Protocol::Cms, operation, senders, recipients))
        || (perfect_match(Protocol::Cms, operation, senders, recipients)
            && !partial_match(Protocol::OpenPgp, operation, senders, recipients));
    !no_conflict
}

/// Picks the protocol when there is no conflict; `None` means the user
/// must choose.
pub fn select_protocol(
    preset: Protocol,
    operation: Operation,
    senders: &[Sender],
    recipients: &[Recipient],
) -> Option<Protocol> {
    if has_conflict(preset, operation, senders, recipients) {
        return None;
    }
    if preset.is_known() && perfect_match(preset, operation, senders, recipients) {
        return Some(preset);
    }
    if perfect_match(Protocol::OpenPgp, operation, senders, recipients)
        && !partial_match(Protocol::Cms, operation, senders, recipients)
    {
        return Some(Protocol::OpenPgp);
    }
    Some(Protocol::Cms)
}
