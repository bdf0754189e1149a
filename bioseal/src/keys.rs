//! Key material derived from biometric authenticator signatures.

use sha2::{digest::generic_array::GenericArray, Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// The fixed challenge signed by the authenticator.
///
/// Signing the same challenge with the same biometric key always yields the same
/// signature, so the vault key can be re-derived without ever being stored.
pub const CHALLENGE: &[u8] = b"bioseal/v1 gpg pinentry unlock challenge";

/// Length in bytes of a [`SessionKey`].
pub const KEY_LEN: usize = 32;

/// A signature over [`CHALLENGE`] produced by an authenticator.
///
/// The bytes are wiped when the signature is dropped.
#[derive(Zeroize)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Wraps raw signature bytes returned by an authenticator.
    pub fn new(bytes: Vec<u8>) -> Self {
        #[cfg(any(test, feature = "test-util"))]
        wipes::created(wipes::Material::Signature);
        Signature(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Signature {
    fn drop(&mut self) {
        self.0.as_mut_slice().zeroize();
        #[cfg(any(test, feature = "test-util"))]
        wipes::dropped(wipes::Material::Signature, &self.0);
        self.0.zeroize();
    }
}

impl ZeroizeOnDrop for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&"[REDACTED]").finish()
    }
}

/// A transient symmetric key used to seal and unseal vault slots.
#[derive(Zeroize)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    fn from_array(key: [u8; KEY_LEN]) -> Self {
        #[cfg(any(test, feature = "test-util"))]
        wipes::created(wipes::Material::SessionKey);
        SessionKey(key)
    }

    /// Builds a key from raw bytes, rejecting anything that is not exactly
    /// [`KEY_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(Error::InvalidInput("session key must be 32 bytes"));
        }
        let mut key = [0; KEY_LEN];
        key.copy_from_slice(bytes);
        let session_key = SessionKey::from_array(key);
        key.zeroize();
        Ok(session_key)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
        #[cfg(any(test, feature = "test-util"))]
        wipes::dropped(wipes::Material::SessionKey, &self.0);
    }
}

impl ZeroizeOnDrop for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionKey").field(&"[REDACTED]").finish()
    }
}

/// Derives the session key for a signature over [`CHALLENGE`].
///
/// The signature is consumed and wiped once it has been hashed.
pub fn derive(signature: Signature) -> Result<SessionKey> {
    if signature.is_empty() {
        return Err(Error::InvalidInput("authenticator returned an empty signature"));
    }

    let mut key = SessionKey::from_array([0; KEY_LEN]);
    Sha256::new()
        .chain_update(signature.as_bytes())
        .finalize_into(GenericArray::from_mut_slice(&mut key.0));
    Ok(key)
}

/// A per-thread tally of key material created and dropped, so that tests can
/// check that every signature and session key was wiped on its way out.
#[cfg(any(test, feature = "test-util"))]
pub mod wipes {
    use std::cell::Cell;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Material {
        Signature,
        SessionKey,
    }

    /// Counts for one kind of material since the last [`reset`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Tally {
        pub created: usize,
        /// Dropped with every byte zeroed.
        pub wiped: usize,
        /// Dropped with any byte left non-zero.
        pub dirty: usize,
    }

    thread_local! {
        static TALLIES: Cell<[Tally; 2]> = Cell::new([Tally::default(); 2]);
    }

    fn update(material: Material, f: impl FnOnce(&mut Tally)) {
        TALLIES.with(|tallies| {
            let mut all = tallies.get();
            f(&mut all[material as usize]);
            tallies.set(all);
        })
    }

    pub(super) fn created(material: Material) {
        update(material, |t| t.created += 1);
    }

    pub(super) fn dropped(material: Material, bytes: &[u8]) {
        let clean = bytes.iter().all(|&b| b == 0);
        update(material, |t| {
            if clean {
                t.wiped += 1
            } else {
                t.dirty += 1
            }
        });
    }

    pub fn reset() {
        TALLIES.with(|tallies| tallies.set([Tally::default(); 2]));
    }

    pub fn tally(material: Material) -> Tally {
        TALLIES.with(|tallies| tallies.get()[material as usize])
    }
}
