use bioseal::{
    keys, vault::is_valid_slot, Authenticator, Credentials, HelperAuthenticator, Vault, CHALLENGE,
    DEFAULT_HELPER, PASSPHRASE_SLOT,
};
use console::style;
use gumdrop::Options;
use log::info;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Debug, Options)]
struct EnrollOptions {
    #[options(help = "print help message")]
    help: bool,

    #[options(
        help = "enroll a secret into SLOT (default: passphrase); may be repeated",
        no_short,
        meta = "SLOT"
    )]
    slot: Vec<String>,

    #[options(help = "write the vault to VAULT", no_short, meta = "VAULT")]
    vault: Option<String>,

    #[options(help = "run PROGRAM for biometric checks", no_short, meta = "PROGRAM")]
    authenticator: Option<String>,

    #[options(help = "show the enrolled slots and exit", no_short)]
    status: bool,
}

enum Error {
    NoVaultPath,
    InvalidSlot(String),
    EmptySecret(String),
    Mismatch(String),
    Io(io::Error),
    Bioseal(bioseal::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<bioseal::Error> for Error {
    fn from(e: bioseal::Error) -> Self {
        Error::Bioseal(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoVaultPath => write!(
                f,
                "Cannot determine the vault location; pass --vault or set BIOSEAL_VAULT"
            ),
            Error::InvalidSlot(slot) => write!(
                f,
                "Invalid slot name '{}' (use lowercase letters, digits, '-' and '_')",
                slot
            ),
            Error::EmptySecret(slot) => write!(f, "The {} cannot be empty", slot),
            Error::Mismatch(slot) => write!(f, "The {} entries did not match", slot),
            Error::Io(e) => write!(f, "Failed to read from the terminal: {}", e),
            Error::Bioseal(e) => write!(f, "{}", e),
        }
    }
}

/// A flag, else a non-empty environment variable.
fn setting(flag: Option<String>, var: &str) -> Option<String> {
    flag.or_else(|| env::var(var).ok().filter(|value| !value.is_empty()))
}

fn read_secret(slot: &str) -> Result<SecretString, Error> {
    let secret = SecretString::new(rpassword::prompt_password(format!("Enter {}: ", slot))?);
    if secret.expose_secret().is_empty() {
        return Err(Error::EmptySecret(slot.to_owned()));
    }

    let repeated =
        SecretString::new(rpassword::prompt_password(format!("Repeat {}: ", slot))?);
    if secret.expose_secret() != repeated.expose_secret() {
        return Err(Error::Mismatch(slot.to_owned()));
    }

    Ok(secret)
}

fn status(vault: &Vault, authenticator: &mut HelperAuthenticator) -> Result<(), Error> {
    println!("Vault:         {}", vault.path().display());
    match vault.slots() {
        Ok(slots) => println!("Slots:         {}", slots.join(", ")),
        Err(bioseal::Error::NotConfigured) => println!("Slots:         (not enrolled)"),
        Err(e) => return Err(e.into()),
    }
    match authenticator.binary().map(|b| b.to_path_buf()) {
        Some(binary) => println!(
            "Authenticator: {} ({})",
            binary.display(),
            if authenticator.is_supported() {
                "available"
            } else {
                "unavailable"
            }
        ),
        None => println!("Authenticator: not found"),
    }
    Ok(())
}

fn enroll(
    vault: &Vault,
    authenticator: &mut HelperAuthenticator,
    slots: Vec<String>,
) -> Result<(), Error> {
    if let Some(slot) = slots.iter().find(|slot| !is_valid_slot(slot)) {
        return Err(Error::InvalidSlot(slot.clone()));
    }

    if !authenticator.is_supported() {
        return Err(bioseal::Error::AuthenticatorUnavailable.into());
    }
    if !authenticator.key_exists() {
        info!("Creating the authenticator key");
        authenticator.create_key()?;
    }

    let mut credentials = Credentials::new();
    for slot in slots {
        let secret = read_secret(&slot)?;
        credentials.insert(slot, secret);
    }

    eprintln!("Confirm with your biometric authenticator to seal the vault.");
    vault.save(&credentials, || keys::derive(authenticator.sign(CHALLENGE)?))?;

    let names: Vec<_> = credentials.keys().map(String::as_str).collect();
    eprintln!(
        "{} {} into {}",
        style("Sealed").green().bold(),
        names.join(", "),
        vault.path().display()
    );
    Ok(())
}

fn main() {
    env_logger::builder().format_timestamp(None).init();

    let opts = EnrollOptions::parse_args_default_or_exit();

    let res = (|| {
        let path = setting(opts.vault, "BIOSEAL_VAULT")
            .map(PathBuf::from)
            .or_else(Vault::default_path)
            .ok_or(Error::NoVaultPath)?;
        let vault = Vault::at(path);
        let program = setting(opts.authenticator, "BIOSEAL_AUTHENTICATOR")
            .unwrap_or_else(|| DEFAULT_HELPER.to_owned());
        let mut authenticator = HelperAuthenticator::new(&program);

        if opts.status {
            status(&vault, &mut authenticator)
        } else if opts.slot.is_empty() {
            enroll(&vault, &mut authenticator, vec![PASSPHRASE_SLOT.to_owned()])
        } else {
            enroll(&vault, &mut authenticator, opts.slot)
        }
    })();

    if let Err(e) = res {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        process::exit(1);
    }
}
