//! The credential vault: named slots of sealed secrets in a single file.

use log::debug;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    keys::SessionKey,
    primitives::{encrypt, EncryptedBlob},
};

mod file;
mod format;

use format::Document;

/// The slot holding an OpenPGP key passphrase.
pub const PASSPHRASE_SLOT: &str = "passphrase";
/// The slot holding a smartcard PIN.
pub const PIN_SLOT: &str = "pin";

const VAULT_DIR: &str = "bioseal";
const VAULT_FILE: &str = "vault.json";

/// Plaintext secrets to be sealed, keyed by slot name.
pub type Credentials = BTreeMap<String, SecretString>;

/// Returns `true` if `slot` is a valid slot name (`[a-z0-9_-]+`).
pub fn is_valid_slot(slot: &str) -> bool {
    !slot.is_empty()
        && slot
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// A vault file at a fixed location.
#[derive(Clone, Debug)]
pub struct Vault {
    path: PathBuf,
}

impl Vault {
    /// Refers to the vault stored at `path`. The file need not exist yet.
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Vault { path: path.into() }
    }

    /// The default vault location inside the user's data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(VAULT_DIR).join(VAULT_FILE))
    }

    /// The location of this vault.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if a vault file exists. Nothing is read or decrypted.
    pub fn is_configured(&self) -> bool {
        self.path.is_file()
    }

    /// Seals every credential and replaces the vault with the result.
    ///
    /// `key_provider` is called exactly once, after the credentials have been
    /// validated; it typically asks the authenticator to sign [`CHALLENGE`].
    ///
    /// [`CHALLENGE`]: crate::keys::CHALLENGE
    pub fn save<F>(&self, credentials: &Credentials, key_provider: F) -> Result<()>
    where
        F: FnOnce() -> Result<SessionKey>,
    {
        if credentials.is_empty() {
            return Err(Error::InvalidInput("no credentials to save"));
        }
        if !credentials.keys().all(|slot| is_valid_slot(slot)) {
            return Err(Error::InvalidInput("invalid slot name"));
        }

        let key = key_provider()?;
        let blobs = credentials
            .iter()
            .map(|(slot, secret)| {
                encrypt(secret.expose_secret().as_bytes(), &key).map(|blob| (slot.clone(), blob))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        drop(key);

        file::replace(&self.path, &Document::encode(&blobs)?)?;
        debug!("Saved {} slot(s) to {}", blobs.len(), self.path.display());
        Ok(())
    }

    /// Loads the sealed blob for `slot`.
    ///
    /// Returns `Ok(None)` if the vault is readable but holds nothing for `slot`, so
    /// that callers can fall back to another slot.
    pub fn load(&self, slot: &str) -> Result<Option<EncryptedBlob>> {
        self.read_document()?.get(slot)
    }

    /// Lists the slots present in the vault.
    pub fn slots(&self) -> Result<Vec<String>> {
        Ok(self.read_document()?.slot_names())
    }

    fn read_document(&self) -> Result<Document> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotConfigured),
            Err(e) => return Err(e.into()),
        };
        Document::parse(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::{ExposeSecret, SecretString};
    use std::cell::Cell;
    use std::fs;

    use super::{is_valid_slot, Credentials, Vault, PASSPHRASE_SLOT, PIN_SLOT};
    use crate::{
        error::Error,
        keys::{derive, SessionKey, Signature},
        primitives::decrypt,
    };

    fn key() -> SessionKey {
        derive(Signature::new(b"test signature".to_vec())).unwrap()
    }

    fn credentials(entries: &[(&str, &str)]) -> Credentials {
        entries
            .iter()
            .map(|(slot, secret)| (slot.to_string(), SecretString::new(secret.to_string())))
            .collect()
    }

    #[test]
    fn slot_names() {
        assert!(is_valid_slot("passphrase"));
        assert!(is_valid_slot("admin-pin_2"));
        assert!(!is_valid_slot(""));
        assert!(!is_valid_slot("PIN"));
        assert!(!is_valid_slot("a b"));
    }

    #[test]
    fn missing_vault_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::at(dir.path().join("vault.json"));

        assert!(!vault.is_configured());
        assert!(matches!(vault.load(PASSPHRASE_SLOT), Err(Error::NotConfigured)));
    }

    #[test]
    fn enroll_then_unseal() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::at(dir.path().join("bioseal").join("vault.json"));

        vault
            .save(&credentials(&[(PASSPHRASE_SLOT, "correct horse")]), || Ok(key()))
            .unwrap();
        assert!(vault.is_configured());

        let blob = vault.load(PASSPHRASE_SLOT).unwrap().unwrap();
        let secret = decrypt(blob.as_bytes(), &key()).unwrap();
        assert_eq!(secret.expose_secret(), "correct horse");
    }

    #[test]
    fn empty_credentials_are_rejected_before_asking_for_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::at(dir.path().join("vault.json"));
        let asked = Cell::new(false);

        let res = vault.save(&Credentials::new(), || {
            asked.set(true);
            Ok(key())
        });
        assert!(matches!(res, Err(Error::InvalidInput(_))));
        assert!(!asked.get());
        assert!(!vault.is_configured());
    }

    #[test]
    fn key_provider_failure_leaves_vault_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::at(dir.path().join("vault.json"));
        vault
            .save(&credentials(&[(PASSPHRASE_SLOT, "old")]), || Ok(key()))
            .unwrap();
        let before = fs::read(vault.path()).unwrap();

        let res = vault.save(&credentials(&[(PIN_SLOT, "1234")]), || Err(Error::Cancelled));
        assert!(matches!(res, Err(Error::Cancelled)));
        assert_eq!(fs::read(vault.path()).unwrap(), before);
    }

    #[test]
    fn missing_slot_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::at(dir.path().join("vault.json"));
        vault
            .save(&credentials(&[(PASSPHRASE_SLOT, "correct horse")]), || Ok(key()))
            .unwrap();

        assert!(vault.load(PIN_SLOT).unwrap().is_none());
        assert!(vault.load(PASSPHRASE_SLOT).unwrap().is_some());
        assert_eq!(vault.slots().unwrap(), vec![PASSPHRASE_SLOT]);
    }

    #[test]
    fn slots_are_sealed_independently() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::at(dir.path().join("vault.json"));
        vault
            .save(
                &credentials(&[(PASSPHRASE_SLOT, "correct horse"), (PIN_SLOT, "123456")]),
                || Ok(key()),
            )
            .unwrap();

        let pin = vault.load(PIN_SLOT).unwrap().unwrap();
        let passphrase = vault.load(PASSPHRASE_SLOT).unwrap().unwrap();
        assert_ne!(pin, passphrase);
        assert_eq!(decrypt(pin.as_bytes(), &key()).unwrap().expose_secret(), "123456");
    }

    #[test]
    fn future_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        fs::write(&path, r#"{"version": 7, "slots": {"passphrase": "AAAA"}}"#).unwrap();

        let vault = Vault::at(path);
        assert!(vault.is_configured());
        assert!(matches!(vault.load(PASSPHRASE_SLOT), Err(Error::VersionError(7))));
    }

    #[test]
    fn legacy_vault_is_migrated_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.bin");
        let blob = crate::primitives::encrypt(b"legacy secret", &key()).unwrap();
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(blob.as_bytes());
        fs::write(&path, bytes).unwrap();

        let vault = Vault::at(path);
        assert!(vault.load(PIN_SLOT).unwrap().is_none());
        let blob = vault.load(PASSPHRASE_SLOT).unwrap().unwrap();
        assert_eq!(
            decrypt(blob.as_bytes(), &key()).unwrap().expose_secret(),
            "legacy secret"
        );
    }

    #[test]
    fn truncated_legacy_vault_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.bin");
        let blob = crate::primitives::encrypt(b"legacy secret", &key()).unwrap();
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(blob.as_bytes());
        bytes.pop();
        fs::write(&path, bytes).unwrap();

        let blob = Vault::at(path).load(PASSPHRASE_SLOT).unwrap().unwrap();
        assert!(matches!(
            decrypt(blob.as_bytes(), &key()),
            Err(Error::AuthenticationError)
        ));
    }
}
