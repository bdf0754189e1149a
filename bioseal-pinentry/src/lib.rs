//! A pinentry for gpg-agent that answers `GETPIN` from a bioseal vault.
//!
//! # Protocol
//!
//! gpg-agent starts the pinentry and speaks the Assuan pinentry dialog over its
//! standard input and output. Every line from the agent is a command: a verb,
//! optionally followed by a space and arguments. Every command receives exactly
//! one final response:
//!
//! - `OK [TEXT]` - the command succeeded.
//! - `ERR CODE TEXT` - the command failed. `CODE` is a libgpg-error value with the
//!   pinentry error source.
//!
//! and may be preceded by data lines `D PAYLOAD`, where `%`, CR and LF in the
//! payload are percent-escaped.
//!
//! ## Commands
//!
//! - `SETDESC TEXT` - records the description of the secret about to be requested.
//!   The last description is the only state carried between commands.
//! - `GETPIN` - unseals and returns the secret matching the last description.
//! - `CONFIRM` / `MESSAGE` - shows the last description on the confirmation surface.
//! - `GETINFO version|pid|flavor` - answers with a data line.
//! - `RESET` - forgets the last description.
//! - `BYE` - closes the connection.
//!
//! Every other command, including ones this pinentry has never heard of, is
//! acknowledged with `OK`. gpg-agent sends options and labels this pinentry has
//! no use for, and expects a pinentry to accept them.
//!
//! ## Error codes
//!
//! - 83886107 - No vault, or no secret enrolled for the request.
//! - 83886140 - The request was not recognised, or no authenticator is available.
//! - 83886179 - The user cancelled.
//! - 83886081 - Authentication or unsealing failed. Which step failed is never
//!   reported to the agent.
//!
//! ## State machine
//!
//! ```text
//!         ,-<--------------------------------------------------------.
//! greeting --> SETDESC / settings / unknown ----------------> OK ----|
//!          |-> GETPIN --> [confirm] --> [sign] --> D SECRET --> OK --|
//!          |           '-> ERR ------------------------------------|
//!          '-> BYE ---> OK closing connection
//! ```
//!
//! # Example interactions
//!
//! - `A`: gpg-agent
//! - `P`: pinentry
//!
//! ## Passphrase
//!
//! ```text
//! A <-- P | OK Pleased to meet you
//! A --> P | OPTION ttyname=/dev/pts/1
//! A <-- P | OK
//! A --> P | SETDESC Please enter the passphrase to unlock the OpenPGP secret key:%0A...
//! A <-- P | OK
//! A --> P | GETPIN
//! A <-- P | D correct horse
//! A <-- P | OK
//! A --> P | BYE
//! A <-- P | OK closing connection
//! ```
//!
//! ## Unrecognised request
//!
//! ```text
//! A --> P | SETDESC frobnicate the widget
//! A <-- P | OK
//! A --> P | GETPIN
//! A <-- P | ERR 83886140 Unrecognized request
//! ```

use bioseal::{
    classify, keys, primitives, Authenticator, Classification, Confirmation, EncryptedBlob,
    Error, Journal, Vault, Verdict, CHALLENGE, PASSPHRASE_SLOT,
};
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use std::io::{self, BufRead, Write};

mod connection;
mod format;

pub use connection::Connection;

/// libgpg-error's error source for pinentry, pre-shifted.
const GPG_ERR_SOURCE_PINENTRY: u32 = 5 << 24;
const GPG_ERR_GENERAL: u32 = 1;
const GPG_ERR_NOT_FOUND: u32 = 27;
const GPG_ERR_NOT_SUPPORTED: u32 = 60;
const GPG_ERR_CANCELED: u32 = 99;

/// Errors reported to gpg-agent.
///
/// Each variant is deliberately coarse: details go to the diagnostic log only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    NotConfigured,
    NotEnrolled,
    UnrecognizedRequest,
    AuthenticatorUnavailable,
    Cancelled,
    AuthenticationFailed,
    UnlockFailed,
}

impl ErrorCode {
    /// The libgpg-error code sent on the `ERR` line.
    pub fn code(self) -> u32 {
        GPG_ERR_SOURCE_PINENTRY
            | match self {
                ErrorCode::NotConfigured | ErrorCode::NotEnrolled => GPG_ERR_NOT_FOUND,
                ErrorCode::UnrecognizedRequest | ErrorCode::AuthenticatorUnavailable => {
                    GPG_ERR_NOT_SUPPORTED
                }
                ErrorCode::Cancelled => GPG_ERR_CANCELED,
                ErrorCode::AuthenticationFailed | ErrorCode::UnlockFailed => GPG_ERR_GENERAL,
            }
    }

    /// The text sent after the code on the `ERR` line.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NotConfigured => "Not configured",
            ErrorCode::NotEnrolled => "No secret enrolled",
            ErrorCode::UnrecognizedRequest => "Unrecognized request",
            ErrorCode::AuthenticatorUnavailable => "Authenticator unavailable",
            ErrorCode::Cancelled => "Operation cancelled",
            ErrorCode::AuthenticationFailed => "Authentication failed",
            ErrorCode::UnlockFailed => "Unlock failed",
        }
    }
}

/// State carried across the commands of one session.
#[derive(Debug, Default)]
pub struct Request {
    description: Option<String>,
}

impl Request {
    /// The most recent `SETDESC` argument, still escaped.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The most recent `SETDESC` text, unescaped for display.
    fn text(&self) -> String {
        format::unescape(self.description().unwrap_or_default())
    }
}

enum State {
    AwaitingCommand,
    Closed,
}

/// The pinentry protocol engine.
pub struct Pinentry<A, C> {
    vault: Vault,
    authenticator: A,
    confirmation: C,
    journal: Option<Journal>,
}

impl<A: Authenticator, C: Confirmation> Pinentry<A, C> {
    pub fn new(vault: Vault, authenticator: A, confirmation: C) -> Self {
        Pinentry {
            vault,
            authenticator,
            confirmation,
            journal: None,
        }
    }

    /// Records each request's classification in `journal`.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Serves one session: greets the agent, then answers commands until `BYE` or
    /// the end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, conn: &mut Connection<R, W>) -> io::Result<()> {
        conn.greeting()?;

        let mut request = Request::default();
        while let Some(command) = conn.read_command()? {
            match self.handle(&mut request, command, conn)? {
                State::AwaitingCommand => (),
                State::Closed => break,
            }
        }
        Ok(())
    }

    fn handle<R: BufRead, W: Write>(
        &mut self,
        request: &mut Request,
        command: format::Command,
        conn: &mut Connection<R, W>,
    ) -> io::Result<State> {
        use format::Command;

        match command {
            Command::SetDescription(description) => {
                request.description = Some(description);
                conn.ok()?;
            }
            Command::GetPin => self.get_pin(request, conn)?,
            Command::Confirm => {
                match self.confirmation.show(&request.text()) {
                    Verdict::Accepted => conn.ok()?,
                    Verdict::Cancelled => conn.error(ErrorCode::Cancelled)?,
                }
            }
            Command::Message => {
                let _ = self.confirmation.show(&request.text());
                conn.ok()?;
            }
            Command::GetInfo(key) => {
                let value = match key.as_str() {
                    "version" => Some(env!("CARGO_PKG_VERSION").to_owned()),
                    "pid" => Some(std::process::id().to_string()),
                    "flavor" => Some("bioseal".to_owned()),
                    _ => None,
                };
                if let Some(value) = value {
                    conn.data(&format::escape(&value))?;
                }
                conn.ok()?;
            }
            Command::Reset => {
                request.description = None;
                conn.ok()?;
            }
            Command::Bye => {
                conn.closing()?;
                return Ok(State::Closed);
            }
            Command::Setting(_) => conn.ok()?,
            // gpg-agent may send commands we do not interpret; acknowledge them so
            // that the dialog continues.
            Command::Unknown(verb) => {
                debug!("Acknowledging uninterpreted command {}", verb);
                conn.ok()?;
            }
        }
        Ok(State::AwaitingCommand)
    }

    fn get_pin<R: BufRead, W: Write>(
        &mut self,
        request: &Request,
        conn: &mut Connection<R, W>,
    ) -> io::Result<()> {
        match self.unseal(request) {
            Ok(secret) => {
                let escaped = format::escape(secret.expose_secret());
                conn.data(&escaped)?;
                conn.ok()
            }
            Err(code) => conn.error(code),
        }
    }

    /// Finds, authorizes and unseals the secret for the current request.
    ///
    /// The session key is dropped, and wiped, before this returns.
    fn unseal(&mut self, request: &Request) -> Result<SecretString, ErrorCode> {
        if !self.vault.is_configured() {
            info!("No vault at {}", self.vault.path().display());
            return Err(ErrorCode::NotConfigured);
        }

        // The classifier decodes the escaped argument itself.
        let classification = classify(request.description().unwrap_or_default());
        let description = request.text();
        self.record(classification, &description);

        let slot = match classification {
            Classification::Slot(slot) => slot,
            Classification::Unknown => {
                warn!("{}: {:?}", Error::ClassificationUnknown, description);
                return Err(ErrorCode::UnrecognizedRequest);
            }
        };
        debug!("Request classified as {}", slot);

        let (slot, blob) = self.load(slot)?;

        let summary = format!("gpg-agent requests the sealed {}. Unlock it?", slot);
        if self.confirmation.show(&summary) == Verdict::Cancelled {
            info!("Unlock of {} cancelled at confirmation", slot);
            return Err(ErrorCode::Cancelled);
        }

        if !self.authenticator.is_supported() {
            warn!("{}", Error::AuthenticatorUnavailable);
            return Err(ErrorCode::AuthenticatorUnavailable);
        }

        let signature = self.authenticator.sign(CHALLENGE).map_err(|e| match e {
            Error::Cancelled => {
                info!("Unlock of {} cancelled at authenticator", slot);
                ErrorCode::Cancelled
            }
            e => {
                warn!("{}", e);
                ErrorCode::AuthenticationFailed
            }
        })?;
        let key = keys::derive(signature).map_err(|e| {
            warn!("{}", e);
            ErrorCode::AuthenticationFailed
        })?;

        primitives::decrypt(blob.as_bytes(), &key).map_err(|e| {
            warn!("Failed to unseal {}: {}", slot, e);
            ErrorCode::UnlockFailed
        })
    }

    /// Loads `slot`, falling back once to the passphrase slot.
    fn load(&self, slot: &'static str) -> Result<(&'static str, EncryptedBlob), ErrorCode> {
        let load = |slot: &'static str| {
            self.vault.load(slot).map_err(|e| {
                warn!("Cannot read vault {}: {}", self.vault.path().display(), e);
                ErrorCode::UnlockFailed
            })
        };

        if let Some(blob) = load(slot)? {
            return Ok((slot, blob));
        }
        if slot != PASSPHRASE_SLOT {
            if let Some(blob) = load(PASSPHRASE_SLOT)? {
                info!("No {} enrolled, falling back to {}", slot, PASSPHRASE_SLOT);
                return Ok((PASSPHRASE_SLOT, blob));
            }
        }
        warn!("No secret enrolled for {}", slot);
        Err(ErrorCode::NotEnrolled)
    }

    fn record(&self, classification: Classification, description: &str) {
        if let Some(journal) = &self.journal {
            let slot = match classification {
                Classification::Slot(slot) => slot,
                Classification::Unknown => "unknown",
            };
            if let Err(e) = journal.record(slot, description) {
                warn!("Failed to write journal {}: {}", journal.path().display(), e);
            }
        }
    }
}

/// Runs a pinentry session over standard input and output.
pub fn run_pinentry<A: Authenticator, C: Confirmation>(
    mut pinentry: Pinentry<A, C>,
) -> io::Result<()> {
    pinentry.run(&mut Connection::stdio())
}
