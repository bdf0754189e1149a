//! Authenticated encryption of individual secrets.
//!
//! A sealed secret is laid out as `nonce ‖ tag ‖ ciphertext`, using
//! ChaCha20-Poly1305 with empty associated data.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::{Error, Result},
    keys::SessionKey,
};

/// Length in bytes of the nonce prefix of a sealed secret.
pub const NONCE_LEN: usize = 12;
/// Length in bytes of the authentication tag following the nonce.
pub const TAG_LEN: usize = 16;
/// The shortest blob that can possibly decrypt: nonce, tag and one byte.
pub const MIN_BLOB_LEN: usize = NONCE_LEN + TAG_LEN + 1;

/// A sealed secret: `nonce ‖ tag ‖ ciphertext`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        EncryptedBlob(bytes)
    }

    /// Returns the encoded blob.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn cipher(key: &SessionKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Seals `secret` under `key` with a fresh random nonce.
pub fn encrypt(secret: &[u8], key: &SessionKey) -> Result<EncryptedBlob> {
    if secret.is_empty() {
        return Err(Error::InvalidInput("cannot seal an empty secret"));
    }

    let mut nonce = [0; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = Zeroizing::new(secret.to_vec());
    let tag = cipher(key).encrypt_in_place_detached(Nonce::from_slice(&nonce), &[], &mut buffer)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&buffer);
    Ok(EncryptedBlob(blob))
}

/// Unseals a blob produced by [`encrypt`].
///
/// Returns [`Error::AuthenticationError`] if the blob is truncated or was not sealed
/// under `key`, and [`Error::FormatError`] if it authenticates but does not hold
/// UTF-8 text. Nothing is returned from a failed decryption.
pub fn decrypt(blob: &[u8], key: &SessionKey) -> Result<SecretString> {
    if blob.len() < MIN_BLOB_LEN {
        return Err(Error::AuthenticationError);
    }

    let (nonce, rest) = blob.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher(key).decrypt_in_place_detached(
        Nonce::from_slice(nonce),
        &[],
        &mut buffer,
        Tag::from_slice(tag),
    )?;

    match String::from_utf8(std::mem::take(&mut *buffer)) {
        Ok(plaintext) => Ok(SecretString::new(plaintext)),
        Err(e) => {
            e.into_bytes().zeroize();
            Err(Error::FormatError)
        }
    }
}
