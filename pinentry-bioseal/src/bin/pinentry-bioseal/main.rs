use bioseal::{Confirmation, HelperAuthenticator, Journal, NoConfirmation, Vault, DEFAULT_HELPER};
use bioseal_pinentry::{run_pinentry, Pinentry};
use gumdrop::Options;
use log::{debug, error};
use std::env;
use std::path::PathBuf;
use std::process;

// gpg-agent's options are parsed so that they are accepted, then never read.
#[allow(dead_code)]
#[derive(Debug, Options)]
struct PinentryOptions {
    #[options(help = "print help message")]
    help: bool,

    #[options(help = "print version info and exit", short = "V")]
    version: bool,

    #[options(help = "unseal secrets from VAULT", no_short, meta = "VAULT")]
    vault: Option<String>,

    #[options(help = "append each request's classification to JOURNAL", no_short)]
    journal: Option<String>,

    #[options(help = "run PROGRAM for biometric checks", no_short, meta = "PROGRAM")]
    authenticator: Option<String>,

    #[options(help = "confirm each unlock before the biometric check", no_short)]
    confirm: bool,

    // Passed by gpg-agent to every pinentry.
    #[options(help = "ignored", no_short)]
    display: Option<String>,
    #[options(help = "ignored", no_short)]
    ttyname: Option<String>,
    #[options(help = "ignored", no_short)]
    ttytype: Option<String>,
    #[options(help = "ignored", no_short)]
    lc_ctype: Option<String>,
    #[options(help = "ignored", no_short)]
    lc_messages: Option<String>,
    #[options(help = "ignored", no_short)]
    timeout: Option<String>,
    #[options(help = "ignored", no_short)]
    no_global_grab: bool,
    #[options(help = "ignored", no_short)]
    parent_wid: Option<String>,
    #[options(help = "ignored", no_short)]
    colors: Option<String>,
    #[options(help = "ignored", no_short)]
    debug: bool,
}

/// A flag, else a non-empty environment variable.
fn setting(flag: Option<String>, var: &str) -> Option<String> {
    flag.or_else(|| env::var(var).ok().filter(|value| !value.is_empty()))
}

fn serve<C: Confirmation>(
    pinentry: Pinentry<HelperAuthenticator, C>,
    journal: Option<Journal>,
) -> std::io::Result<()> {
    match journal {
        Some(journal) => run_pinentry(pinentry.with_journal(journal)),
        None => run_pinentry(pinentry),
    }
}

fn main() {
    env_logger::builder().format_timestamp(None).init();

    let opts = PinentryOptions::parse_args_default_or_exit();

    if opts.version {
        println!("pinentry-bioseal {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let vault = match setting(opts.vault, "BIOSEAL_VAULT")
        .map(PathBuf::from)
        .or_else(Vault::default_path)
    {
        Some(path) => Vault::at(path),
        None => {
            error!("Cannot determine the vault location; pass --vault or set BIOSEAL_VAULT");
            process::exit(1);
        }
    };
    let journal = setting(opts.journal, "BIOSEAL_JOURNAL").map(Journal::at);
    let program = setting(opts.authenticator, "BIOSEAL_AUTHENTICATOR")
        .unwrap_or_else(|| DEFAULT_HELPER.to_owned());
    debug!("Serving from {} with authenticator {}", vault.path().display(), program);

    let authenticator = HelperAuthenticator::new(&program);
    let res = if opts.confirm {
        let confirmation = HelperAuthenticator::new(&program);
        serve(Pinentry::new(vault, authenticator, confirmation), journal)
    } else {
        serve(Pinentry::new(vault, authenticator, NoConfirmation), journal)
    };

    if let Err(e) = res {
        error!("Pinentry session failed: {}", e);
        process::exit(1);
    }
}
