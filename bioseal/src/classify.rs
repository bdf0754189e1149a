//! Mapping gpg-agent prompt descriptions to vault slots.

use crate::vault::{PASSPHRASE_SLOT, PIN_SLOT};

/// Phrases gpg-agent and scdaemon use when asking for a smartcard PIN.
const PIN_PHRASES: &[&str] = &[
    "unlock the card",
    "enter the pin",
    "admin pin",
    "reset code",
    "smartcard",
    "smart card",
    "card number",
];

/// Phrases gpg-agent uses when asking for a secret key passphrase.
const PASSPHRASE_PHRASES: &[&str] = &["passphrase", "secret key", "openpgp key"];

/// The outcome of classifying a prompt description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// The description asks for the secret stored in this slot.
    Slot(&'static str),
    /// The description matched no known phrasing.
    Unknown,
}

/// Decides which slot a prompt description is asking for.
///
/// `description` is the `SETDESC` argument as sent, still escaped. It is decoded
/// here exactly once (`%XX`, and `+` as space), then matched case-insensitively.
pub fn classify(description: &str) -> Classification {
    let text = percent_decode(description).to_lowercase();

    if PIN_PHRASES.iter().any(|p| text.contains(p)) {
        Classification::Slot(PIN_SLOT)
    } else if PASSPHRASE_PHRASES.iter().any(|p| text.contains(p)) {
        Classification::Slot(PASSPHRASE_SLOT)
    } else {
        Classification::Unknown
    }
}

/// Decodes `%XX` escapes and `+` as space. Malformed escapes are kept as-is.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}
