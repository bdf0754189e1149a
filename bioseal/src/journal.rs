//! An append-only record of secret requests.
//!
//! Each line reads `timestamp | slot | description`. Secrets are never written.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Appends classification decisions to a file.
#[derive(Clone, Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Journal { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that `description` was classified as `slot`.
    pub fn record(&self, slot: &str, description: &str) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let line = format!(
            "{} | {} | {}\n",
            chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            slot,
            flatten(description),
        );
        options.open(&self.path)?.write_all(line.as_bytes())
    }
}

fn flatten(description: &str) -> String {
    description
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
