//! An authenticator backed by an external helper program.
//!
//! The platform's biometric API is reached through a small helper binary, run
//! once per operation:
//!
//! ```text
//! helper supported    exit 0 if biometric signing is available
//! helper key-exists   exit 0 if the signing key exists
//! helper create-key   exit 0 once the key exists
//! helper sign         stdin: Base64(CHALLENGE), stdout: Base64(SIGNATURE)
//! helper confirm      stdin: message, exit 0 if the user accepted
//! ```
//!
//! Exit status 2 means the user cancelled. Any other non-zero status is a failure.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use zeroize::Zeroizing;

use super::{Authenticator, Confirmation, Verdict};
use crate::{
    error::{Error, Result},
    keys::Signature,
};

/// The helper program looked up on `PATH` when none is configured.
pub const DEFAULT_HELPER: &str = "bioseal-authenticator";

const EXIT_CANCELLED: i32 = 2;

struct Reply {
    status: ExitStatus,
    stdout: Zeroizing<Vec<u8>>,
}

/// Runs a helper program for each authenticator operation.
#[derive(Debug)]
pub struct HelperAuthenticator {
    binary: Option<PathBuf>,
}

impl HelperAuthenticator {
    /// Locates `program`, either a path or a name to search for on `PATH`.
    ///
    /// A helper that cannot be found is not an error here; the authenticator
    /// then reports itself as unsupported.
    pub fn new(program: &str) -> Self {
        let binary = which::which(program).ok();
        if binary.is_none() {
            debug!("Authenticator helper {} not found", program);
        }
        HelperAuthenticator { binary }
    }

    /// The resolved helper binary, if one was found.
    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    fn run(&self, operation: &str, input: Option<&[u8]>) -> Result<Reply> {
        let binary = self.binary.as_ref().ok_or(Error::AuthenticatorUnavailable)?;
        let mut child = Command::new(binary)
            .arg(operation)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            // The helper may exit without reading its input.
            match stdin.write_all(input) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => (),
            }
        }

        let output = child.wait_with_output()?;
        Ok(Reply {
            status: output.status,
            stdout: Zeroizing::new(output.stdout),
        })
    }

    fn check(operation: &str, status: ExitStatus) -> Result<()> {
        match status.code() {
            Some(0) => Ok(()),
            Some(EXIT_CANCELLED) => Err(Error::Cancelled),
            _ => Err(Error::Authenticator(format!(
                "helper {} exited with {}",
                operation, status
            ))),
        }
    }

    fn query(&mut self, operation: &str) -> bool {
        match self.run(operation, None) {
            Ok(reply) => reply.status.success(),
            Err(Error::AuthenticatorUnavailable) => false,
            Err(e) => {
                warn!("Authenticator helper {} failed: {}", operation, e);
                false
            }
        }
    }
}

impl Authenticator for HelperAuthenticator {
    fn is_supported(&mut self) -> bool {
        self.query("supported")
    }

    fn key_exists(&mut self) -> bool {
        self.query("key-exists")
    }

    fn create_key(&mut self) -> Result<()> {
        let reply = self.run("create-key", None)?;
        Self::check("create-key", reply.status)
    }

    fn sign(&mut self, challenge: &[u8]) -> Result<Signature> {
        let mut request = STANDARD.encode(challenge);
        request.push('\n');

        let reply = self.run("sign", Some(request.as_bytes()))?;
        Self::check("sign", reply.status)?;

        let encoded = std::str::from_utf8(&reply.stdout)
            .map_err(|_| Error::Authenticator("helper returned a non-text signature".into()))?;
        STANDARD
            .decode(encoded.trim())
            .map(Signature::new)
            .map_err(|_| Error::Authenticator("helper returned a malformed signature".into()))
    }
}

impl Confirmation for HelperAuthenticator {
    fn show(&mut self, message: &str) -> Verdict {
        match self.run("confirm", Some(message.as_bytes())) {
            Ok(reply) if reply.status.success() => Verdict::Accepted,
            Ok(_) => Verdict::Cancelled,
            Err(e) => {
                warn!("Confirmation helper failed: {}", e);
                Verdict::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HelperAuthenticator;
    use crate::{
        authenticator::{Authenticator, Confirmation, Verdict},
        error::Error,
        keys::CHALLENGE,
    };

    #[test]
    fn missing_helper_is_unsupported() {
        let mut helper = HelperAuthenticator::new("/nonexistent/bioseal-authenticator");
        assert!(helper.binary().is_none());
        assert!(!helper.is_supported());
        assert!(!helper.key_exists());
        assert!(matches!(
            helper.sign(CHALLENGE),
            Err(Error::AuthenticatorUnavailable)
        ));
        assert_eq!(helper.show("Unlock?"), Verdict::Cancelled);
    }

    // Every script is written before any of them runs.
    #[cfg(unix)]
    #[test]
    fn helper_protocol() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let write_script = |name: &str, body: &str| {
            let path = dir.path().join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        // base64("signature") == "c2lnbmF0dXJl"
        let working = write_script(
            "working",
            r#"case "$1" in
  supported|key-exists) exit 0 ;;
  create-key) exit 2 ;;
  sign) read challenge; [ -n "$challenge" ] || exit 1; echo c2lnbmF0dXJl ;;
  confirm) exit 1 ;;
  *) exit 1 ;;
esac"#,
        );
        let cancelling = write_script("cancelling", "exit 2");
        let broken = write_script("broken", "echo '!!not base64!!'");

        let mut helper = HelperAuthenticator::new(working.to_str().unwrap());
        assert!(helper.is_supported());
        assert!(helper.key_exists());
        assert!(matches!(helper.create_key(), Err(Error::Cancelled)));
        let signature = helper.sign(CHALLENGE).unwrap();
        assert_eq!(signature.as_bytes(), b"signature");
        assert_eq!(helper.show("Unlock?"), Verdict::Cancelled);

        let mut helper = HelperAuthenticator::new(cancelling.to_str().unwrap());
        assert!(!helper.is_supported());
        assert!(matches!(helper.sign(CHALLENGE), Err(Error::Cancelled)));

        let mut helper = HelperAuthenticator::new(broken.to_str().unwrap());
        assert!(matches!(
            helper.sign(CHALLENGE),
            Err(Error::Authenticator(_))
        ));
    }
}
