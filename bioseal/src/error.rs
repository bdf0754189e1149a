//! Error type.

use std::fmt;
use std::io;

/// The various errors that can be returned while sealing or unsealing secrets.
#[derive(Debug)]
pub enum Error {
    /// No vault exists at the configured location.
    NotConfigured,
    /// The vault was written with a format version this build does not understand.
    VersionError(u64),
    /// An encrypted blob failed authentication, or was too short to contain one.
    AuthenticationError,
    /// A blob authenticated, but its plaintext was not valid UTF-8.
    FormatError,
    /// The user declined at the confirmation or biometric step.
    Cancelled,
    /// No biometric authenticator is available on this host.
    AuthenticatorUnavailable,
    /// The prompt description did not match any known credential slot.
    ClassificationUnknown,
    /// A caller passed an argument that violates an API contract.
    InvalidInput(&'static str),
    /// The authenticator reported a failure other than cancellation.
    Authenticator(String),
    /// An I/O error occurred while accessing the vault or the authenticator.
    Io(io::Error),
    /// The vault document could not be encoded or decoded.
    Json(serde_json::Error),
}

impl Error {
    /// Returns `true` for failures that occur while decrypting a blob.
    ///
    /// Anything reporting to a protocol partner should treat all of these as one
    /// category, so that the partner cannot tell which check failed.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Error::AuthenticationError | Error::FormatError)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotConfigured => write!(f, "No vault has been set up yet"),
            Error::VersionError(v) => write!(f, "Unsupported vault format version {}", v),
            Error::AuthenticationError => write!(f, "Sealed secret failed authentication"),
            Error::FormatError => write!(f, "Sealed secret is not valid text"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::AuthenticatorUnavailable => {
                write!(f, "No biometric authenticator is available")
            }
            Error::ClassificationUnknown => write!(f, "Unrecognized secret request"),
            Error::InvalidInput(reason) => write!(f, "Invalid input: {}", reason),
            Error::Authenticator(e) => write!(f, "Authenticator failed: {}", e),
            Error::Io(e) => e.fmt(f),
            Error::Json(e) => write!(f, "Invalid vault document: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(inner) => Some(inner),
            Error::Json(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<chacha20poly1305::aead::Error> for Error {
    fn from(_: chacha20poly1305::aead::Error) -> Self {
        Error::AuthenticationError
    }
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn decryption_failures_form_one_category() {
        assert!(Error::AuthenticationError.is_decryption_failure());
        assert!(Error::FormatError.is_decryption_failure());
        assert!(!Error::Cancelled.is_decryption_failure());
        assert!(!Error::NotConfigured.is_decryption_failure());
    }
}
