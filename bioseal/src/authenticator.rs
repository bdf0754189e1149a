//! Capabilities provided by the platform: the biometric authenticator and the
//! confirmation surface.

use crate::{error::Result, keys::Signature};

mod helper;

pub use helper::{HelperAuthenticator, DEFAULT_HELPER};

/// A biometric-backed signing capability.
///
/// Signing is the only operation that may block on the user; implementations
/// report cancellation as [`Error::Cancelled`] and every other failure as
/// [`Error::Authenticator`].
///
/// [`Error::Cancelled`]: crate::Error::Cancelled
/// [`Error::Authenticator`]: crate::Error::Authenticator
pub trait Authenticator {
    /// Returns `true` if biometric signing can work on this host.
    fn is_supported(&mut self) -> bool;

    /// Returns `true` if the signing key has already been created.
    fn key_exists(&mut self) -> bool;

    /// Creates the signing key. This may prompt the user.
    fn create_key(&mut self) -> Result<()>;

    /// Signs `challenge` after verifying the user.
    fn sign(&mut self, challenge: &[u8]) -> Result<Signature>;
}

impl<A: Authenticator + ?Sized> Authenticator for &mut A {
    fn is_supported(&mut self) -> bool {
        (**self).is_supported()
    }

    fn key_exists(&mut self) -> bool {
        (**self).key_exists()
    }

    fn create_key(&mut self) -> Result<()> {
        (**self).create_key()
    }

    fn sign(&mut self, challenge: &[u8]) -> Result<Signature> {
        (**self).sign(challenge)
    }
}

/// The user's answer to a confirmation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Cancelled,
}

/// An out-of-band surface that can ask the user to confirm an action.
pub trait Confirmation {
    fn show(&mut self, message: &str) -> Verdict;
}

impl<C: Confirmation + ?Sized> Confirmation for &mut C {
    fn show(&mut self, message: &str) -> Verdict {
        (**self).show(message)
    }
}

/// A confirmation surface that accepts everything without asking.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoConfirmation;

impl Confirmation for NoConfirmation {
    fn show(&mut self, _message: &str) -> Verdict {
        Verdict::Accepted
    }
}
