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

//! Content classification contract.
//!
//! The pipeline builder decides how to handle a file purely through the
//! [`Classification`] bitmask a [`Classifier`] returns for it. A
//! classification combines a protocol, an encoding and one or more content
//! type bits; several type bits at once mean "could be any of these" —
//! extensions alone often cannot distinguish an opaque signature from
//! cipher text, and the builder is written to cope with that ambiguity.
//!
//! Classification is total: unreadable or unrecognized content yields
//! [`Classification::UNKNOWN`], never an error.
//!
//! [`ExtensionClassifier`] is the built-in, extension-driven
//! implementation. Deployments with a content-inspecting classifier plug
//! it in through the same trait.

use std::path::{Path, PathBuf};

use crate::protocol::Protocol;

/// Bitmask describing protocol, encoding and possible content types of a
/// file or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification(pub u32);

impl Classification {
    pub const CMS: u32 = 1 << 0;
    pub const OPENPGP: u32 = 1 << 1;

    pub const BINARY: u32 = 1 << 2;
    pub const ASCII: u32 = 1 << 3;

    pub const CIPHER_TEXT: u32 = 1 << 4;
    pub const DETACHED_SIGNATURE: u32 = 1 << 5;
    pub const OPAQUE_SIGNATURE: u32 = 1 << 6;
    pub const CLEARSIGNED_MESSAGE: u32 = 1 << 7;
    pub const CERTIFICATE_STORE: u32 = 1 << 8;
    pub const MIME_FILE: u32 = 1 << 9;

    pub const TYPE_MASK: u32 = Self::CIPHER_TEXT
        | Self::DETACHED_SIGNATURE
        | Self::OPAQUE_SIGNATURE
        | Self::CLEARSIGNED_MESSAGE
        | Self::CERTIFICATE_STORE
        | Self::MIME_FILE;

    pub const ANY_MESSAGE_TYPE: u32 = Self::CIPHER_TEXT
        | Self::DETACHED_SIGNATURE
        | Self::OPAQUE_SIGNATURE
        | Self::CLEARSIGNED_MESSAGE
        | Self::MIME_FILE;

    /// Content that could not be classified at all.
    pub const UNKNOWN: Classification = Classification(0);

    pub fn new(bits: u32) -> Self {
        Classification(bits)
    }

    /// The protocol encoded in the mask, `Unknown` when absent or
    /// contradictory.
    pub fn protocol(self) -> Protocol {
        match (self.0 & Self::OPENPGP != 0, self.0 & Self::CMS != 0) {
            (true, false) => Protocol::OpenPgp,
            (false, true) => Protocol::Cms,
            _ => Protocol::Unknown,
        }
    }

    pub fn is_ascii(self) -> bool {
        self.0 & Self::ASCII != 0
    }

    /// Exactly cipher text, nothing else.
    pub fn is_cipher_text(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::CIPHER_TEXT
    }

    pub fn may_be_cipher_text(self) -> bool {
        self.0 & Self::CIPHER_TEXT != 0
    }

    /// Exactly a detached signature, nothing else.
    pub fn is_detached_signature(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::DETACHED_SIGNATURE
    }

    pub fn may_be_detached_signature(self) -> bool {
        self.0 & Self::DETACHED_SIGNATURE != 0
    }

    /// Exactly an opaque signature, nothing else.
    pub fn is_opaque_signature(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::OPAQUE_SIGNATURE
    }

    pub fn may_be_opaque_signature(self) -> bool {
        self.0 & Self::OPAQUE_SIGNATURE != 0
    }

    pub fn is_clearsigned_message(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::CLEARSIGNED_MESSAGE
    }

    /// Any of the signature shapes: detached, opaque or clearsigned.
    pub fn may_be_any_signature(self) -> bool {
        self.may_be_detached_signature()
            || self.may_be_opaque_signature()
            || self.is_clearsigned_message()
    }

    /// Certificate containers (certificates, CRLs, PKCS#12 bundles) cannot
    /// be decrypted or verified.
    pub fn may_be_certificate_store(self) -> bool {
        self.0 & Self::CERTIFICATE_STORE != 0
    }

    /// Anything the backend could treat as a crypto message.
    pub fn may_be_any_message_type(self) -> bool {
        self.0 & Self::ANY_MESSAGE_TYPE != 0
    }
}

/// Classifies file content and locates detached signatures for files.
///
/// Implementations must be pure, fast and total — classification of
/// unreadable or unknown content returns [`Classification::UNKNOWN`]
/// instead of failing.
pub trait Classifier: Send + Sync {
    /// Classify the file at `path`.
    fn classify(&self, path: &Path) -> Classification;

    /// Candidate detached-signature files referencing `path`.
    ///
    /// The default probes the well-known signature suffixes next to the
    /// file on disk.
    fn find_signatures(&self, path: &Path) -> Vec<PathBuf> {
        signature_candidates(path)
    }
}

/// Extensions that mark content as a crypto message; stripped to obtain a
/// file's base name.
const CRYPTO_EXTENSIONS: &[&str] = &["gpg", "pgp", "asc", "sig", "p7m", "p7s", "pem"];

/// Extensions probed by the default `find_signatures`.
const SIGNATURE_EXTENSIONS: &[&str] = &["sig", "asc", "p7s"];

/// The built-in, extension-driven classifier.
///
/// Deliberately keeps ambiguity: `.gpg` could hold cipher text or an
/// opaque signature, `.asc` could additionally be clearsigned or a
/// detached signature. The pipeline builder resolves what it can and
/// falls back to combined decrypt-and-verify for the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionClassifier;

impl Classifier for ExtensionClassifier {
    fn classify(&self, path: &Path) -> Classification {
        let Some(ext) = extension_of(path) else {
            return Classification::UNKNOWN;
        };
        let bits = match ext.as_str() {
            "gpg" | "pgp" => {
                Classification::OPENPGP
                    | Classification::BINARY
                    | Classification::CIPHER_TEXT
                    | Classification::OPAQUE_SIGNATURE
            }
            "asc" => {
                Classification::OPENPGP
                    | Classification::ASCII
                    | Classification::CIPHER_TEXT
                    | Classification::OPAQUE_SIGNATURE
                    | Classification::DETACHED_SIGNATURE
                    | Classification::CLEARSIGNED_MESSAGE
            }
            "sig" => Classification::OPENPGP | Classification::DETACHED_SIGNATURE,
            "p7m" => Classification::CMS | Classification::BINARY | Classification::CIPHER_TEXT,
            "p7s" => {
                Classification::CMS | Classification::BINARY | Classification::DETACHED_SIGNATURE
            }
            "pem" => {
                Classification::CMS
                    | Classification::ASCII
                    | Classification::CIPHER_TEXT
                    | Classification::OPAQUE_SIGNATURE
            }
            "crt" | "cer" | "der" | "p7c" | "crl" | "p12" | "pfx" => {
                Classification::CMS | Classification::BINARY | Classification::CERTIFICATE_STORE
            }
            "eml" | "mbox" => Classification::ASCII | Classification::MIME_FILE,
            _ => return Classification::UNKNOWN,
        };
        Classification(bits)
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Strips a crypto suffix from `path`, returning the base name the file
/// groups under, or `None` if the extension is not a crypto suffix.
pub fn strip_crypto_extension(path: &Path) -> Option<PathBuf> {
    let ext = extension_of(path)?;
    if CRYPTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(path.with_extension(""))
    } else {
        None
    }
}

/// Default output file name for decrypting/unwrapping `path`: the crypto
/// suffix stripped, or `<name>.out` when there is nothing to strip.
pub fn output_file_name(path: &Path) -> PathBuf {
    match strip_crypto_extension(path) {
        Some(stripped) => stripped,
        None => {
            let mut name = path.as_os_str().to_owned();
            name.push(".out");
            PathBuf::from(name)
        }
    }
}

/// Output extension for a produced sign/encrypt artifact.
///
/// Encryption wins over signing when both apply (the combined artifact is
/// cipher text); `out` is the fallback for combinations without a
/// conventional suffix.
pub fn output_file_extension(
    protocol: Protocol,
    encrypt: bool,
    detached_signature: bool,
    ascii: bool,
) -> &'static str {
    match protocol {
        Protocol::OpenPgp => {
            if ascii {
                "asc"
            } else if encrypt {
                "gpg"
            } else if detached_signature {
                "sig"
            } else {
                "gpg"
            }
        }
        Protocol::Cms => {
            if encrypt {
                "p7m"
            } else if detached_signature {
                "p7s"
            } else {
                "p7m"
            }
        }
        Protocol::Unknown => "out",
    }
}

/// Probes the well-known signature suffixes next to `path` on disk.
pub fn signature_candidates(path: &Path) -> Vec<PathBuf> {
    SIGNATURE_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut name = path.as_os_str().to_owned();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        })
        .filter(|candidate| candidate.is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_classification_protocols() {
        let c = ExtensionClassifier;
        assert_eq!(c.classify(Path::new("x.txt.gpg")).protocol(), Protocol::OpenPgp);
        assert_eq!(c.classify(Path::new("a.p7m")).protocol(), Protocol::Cms);
        assert_eq!(c.classify(Path::new("a.p7s")).protocol(), Protocol::Cms);
        assert_eq!(c.classify(Path::new("plain.txt")).protocol(), Protocol::Unknown);
    }

    #[test]
    fn test_p7s_is_exactly_a_detached_signature() {
        let cls = ExtensionClassifier.classify(Path::new("a.p7s"));
        assert!(cls.is_detached_signature());
        assert!(cls.may_be_detached_signature());
        assert!(!cls.may_be_cipher_text());
    }

    #[test]
    fn test_gpg_is_ambiguous_between_cipher_and_opaque() {
        let cls = ExtensionClassifier.classify(Path::new("x.gpg"));
        assert!(cls.may_be_cipher_text());
        assert!(cls.may_be_opaque_signature());
        assert!(!cls.is_cipher_text());
        assert!(!cls.is_opaque_signature());
    }

    #[test]
    fn test_certificate_containers_are_not_messages() {
        let cls = ExtensionClassifier.classify(Path::new("chain.crt"));
        assert!(cls.may_be_certificate_store());
        assert!(!cls.may_be_any_message_type());
    }

    #[test]
    fn test_unknown_classification_for_unrecognized_content() {
        let cls = ExtensionClassifier.classify(Path::new("README"));
        assert_eq!(cls, Classification::UNKNOWN);
        assert_eq!(cls.protocol(), Protocol::Unknown);
        assert!(!cls.may_be_any_message_type());
    }

    #[test]
    fn test_strip_crypto_extension() {
        assert_eq!(
            strip_crypto_extension(Path::new("report.pdf.gpg")),
            Some(PathBuf::from("report.pdf"))
        );
        assert_eq!(strip_crypto_extension(Path::new("report.pdf")), None);
    }

    #[test]
    fn test_output_file_name_appends_out_without_crypto_suffix() {
        assert_eq!(output_file_name(Path::new("data.bin")), PathBuf::from("data.bin.out"));
        assert_eq!(output_file_name(Path::new("a.p7m")), PathBuf::from("a"));
    }

    #[test]
    fn test_output_extensions() {
        assert_eq!(output_file_extension(Protocol::OpenPgp, true, false, false), "gpg");
        assert_eq!(output_file_extension(Protocol::OpenPgp, false, true, false), "sig");
        assert_eq!(output_file_extension(Protocol::OpenPgp, true, false, true), "asc");
        assert_eq!(output_file_extension(Protocol::Cms, true, false, false), "p7m");
        assert_eq!(output_file_extension(Protocol::Cms, false, true, false), "p7s");
    }
}
