//! On-disk layouts of the vault file.
//!
//! Two layouts exist:
//!
//! - Version 2 (current): a JSON document mapping slot names to base64-encoded
//!   blobs.
//!
//!   ```text
//!   {
//!     "version": 2,
//!     "slots": {
//!       "passphrase": "Base64(NONCE ‖ TAG ‖ CIPHERTEXT)",
//!       "pin": "Base64(NONCE ‖ TAG ‖ CIPHERTEXT)"
//!     }
//!   }
//!   ```
//!
//! - Version 1 (legacy): raw bytes `0x01 ‖ NONCE ‖ TAG ‖ CIPHERTEXT`, holding the
//!   passphrase slot only.
//!
//! Parsing tries the current layout, then the legacy layout exactly once. Anything
//! else is rejected as an unknown version. A damaged current document is reported
//! as such rather than as a legacy file with an odd version byte.
//!
//! The encoded document ends at its closing brace, so losing the final byte of
//! the file always breaks the parse.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::PASSPHRASE_SLOT;
use crate::{
    error::{Error, Result},
    primitives::EncryptedBlob,
};

pub(super) const CURRENT_VERSION: u64 = 2;
pub(super) const LEGACY_VERSION: u8 = 1;

#[derive(Deserialize)]
struct Header {
    version: u64,
}

#[derive(Serialize, Deserialize)]
struct CurrentDocument {
    version: u64,
    slots: BTreeMap<String, String>,
}

/// A parsed vault file.
#[derive(Debug)]
pub(super) enum Document {
    /// Slot name to base64-encoded blob. Blobs are decoded on access, so that one
    /// damaged slot does not make the others unreadable.
    Current(BTreeMap<String, String>),
    /// The single passphrase blob of a version 1 vault.
    Legacy(EncryptedBlob),
}

impl Document {
    pub(super) fn parse(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<Header>(bytes) {
            Ok(Header {
                version: CURRENT_VERSION,
            }) => {
                let doc: CurrentDocument = serde_json::from_slice(bytes)?;
                Ok(Document::Current(doc.slots))
            }
            Ok(Header { version }) => Err(Error::VersionError(version)),
            Err(e) if bytes.first() == Some(&b'{') => {
                debug!("Vault looks like a current document but does not parse: {}", e);
                Err(e.into())
            }
            Err(e) => {
                debug!("Vault is not a current document ({}), trying the legacy layout", e);
                Self::parse_legacy(bytes)
            }
        }
    }

    fn parse_legacy(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            Some((&LEGACY_VERSION, blob)) => {
                Ok(Document::Legacy(EncryptedBlob::from_bytes(blob.to_vec())))
            }
            Some((&version, _)) => Err(Error::VersionError(version.into())),
            None => Err(Error::VersionError(0)),
        }
    }

    /// Returns the blob stored for `slot`, if any.
    ///
    /// A blob whose encoding is damaged cannot be authenticated, and is reported as
    /// such.
    pub(super) fn get(&self, slot: &str) -> Result<Option<EncryptedBlob>> {
        match self {
            Document::Current(slots) => slots
                .get(slot)
                .map(|encoded| {
                    STANDARD
                        .decode(encoded)
                        .map(EncryptedBlob::from_bytes)
                        .map_err(|_| Error::AuthenticationError)
                })
                .transpose(),
            Document::Legacy(blob) if slot == PASSPHRASE_SLOT => Ok(Some(blob.clone())),
            Document::Legacy(_) => Ok(None),
        }
    }

    pub(super) fn slot_names(&self) -> Vec<String> {
        match self {
            Document::Current(slots) => slots.keys().cloned().collect(),
            Document::Legacy(_) => vec![PASSPHRASE_SLOT.to_owned()],
        }
    }

    /// Encodes a version 2 document holding `blobs`.
    pub(super) fn encode(blobs: &BTreeMap<String, EncryptedBlob>) -> Result<Vec<u8>> {
        let doc = CurrentDocument {
            version: CURRENT_VERSION,
            slots: blobs
                .iter()
                .map(|(slot, blob)| (slot.clone(), STANDARD.encode(blob.as_bytes())))
                .collect(),
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }
}
