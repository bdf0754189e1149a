//! *Seal GnuPG passphrases and smartcard PINs behind a biometric check.*
//!
//! `bioseal` stores secrets in a small vault file. Each secret is sealed with
//! ChaCha20-Poly1305 under a key that is never stored: it is re-derived on demand
//! by hashing a biometric authenticator's signature over a fixed [`CHALLENGE`].
//! A pinentry built on this crate can therefore answer gpg-agent's request for a
//! passphrase with a fingerprint or face check instead of typed input.
//!
//! # Layout
//!
//! - [`primitives`]: sealing and unsealing of individual secrets.
//! - [`keys`]: session keys derived from authenticator signatures.
//! - [`vault`]: the versioned vault file of named slots.
//! - [`classify`]: mapping gpg-agent prompt descriptions to slots.
//! - [`authenticator`]: the capabilities this crate consumes from the platform.
//! - [`journal`]: an optional record of which slot each request resolved to.
//!
//! # Example
//!
//! ```no_run
//! use bioseal::{keys, primitives, Authenticator, HelperAuthenticator, Vault, CHALLENGE};
//! use secrecy::ExposeSecret;
//!
//! # fn main() -> Result<(), bioseal::Error> {
//! let vault = Vault::at("/home/alice/.local/share/bioseal/vault.json");
//! let mut authenticator = HelperAuthenticator::new(bioseal::DEFAULT_HELPER);
//!
//! if let Some(blob) = vault.load(bioseal::PASSPHRASE_SLOT)? {
//!     let key = keys::derive(authenticator.sign(CHALLENGE)?)?;
//!     let passphrase = primitives::decrypt(blob.as_bytes(), &key)?;
//!     # let _ = passphrase.expose_secret();
//! }
//! # Ok(())
//! # }
//! ```

pub mod authenticator;
pub mod classify;
mod error;
pub mod journal;
pub mod keys;
pub mod primitives;
pub mod vault;

pub use authenticator::{
    Authenticator, Confirmation, HelperAuthenticator, NoConfirmation, Verdict, DEFAULT_HELPER,
};
pub use classify::{classify, Classification};
pub use error::{Error, Result};
pub use journal::Journal;
pub use keys::{SessionKey, Signature, CHALLENGE};
pub use primitives::EncryptedBlob;
pub use vault::{Credentials, Vault, PASSPHRASE_SLOT, PIN_SLOT};
