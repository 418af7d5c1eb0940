//! Works out where a batch lands: `<root>/<event>/<YYYY-MM-DD>/<photographer>`,
//! or an `Upload N` folder below it when incoming names would collide with
//! files that are already there.

use crate::sanitize::sanitize;
use crate::types::{AppError, TransferItem};
use camino::{Utf8Path, Utf8PathBuf};
use error_stack::{Result, ResultExt};
use jiff::civil::Date;
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info};

pub const UPLOAD_FOLDER_PREFIX: &str = "Upload ";

/// The organizing keys supplied by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestKeys {
    pub event_name: String,
    pub date: Date,
    pub photographer_name: String,
}

impl IngestKeys {
    pub fn new(
        event_name: impl Into<String>,
        date: Date,
        photographer_name: impl Into<String>,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            date,
            photographer_name: photographer_name.into(),
        }
    }

    pub fn trimmed(&self) -> Self {
        Self {
            event_name: self.event_name.trim().to_string(),
            date: self.date,
            photographer_name: self.photographer_name.trim().to_string(),
        }
    }
}

pub fn format_date(date: Date) -> String {
    date.strftime("%Y-%m-%d").to_string()
}

/// Directory the batch would use if nothing collides.
pub fn candidate_dir(base: &Utf8Path, keys: &IngestKeys) -> Utf8PathBuf {
    base.join(sanitize(&keys.event_name))
        .join(format_date(keys.date))
        .join(sanitize(&keys.photographer_name))
}

/// Names the batch would create directly inside the destination directory.
pub fn incoming_top_level_names(items: &[TransferItem]) -> BTreeSet<String> {
    items
        .iter()
        .map(|item| item.top_level_name().to_string())
        .collect()
}

/// Parses `"Upload <N>"` with N ≥ 1 written in plain decimal digits.
pub fn upload_folder_number(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(UPLOAD_FOLDER_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().filter(|n| *n >= 1)
}

/// Resolves the final destination directory without creating anything.
///
/// When the candidate exists and at least one incoming top-level name is
/// already present in it, the next free `Upload N` folder below the candidate
/// is returned. Only the top level is checked.
pub fn resolve_destination(
    base: &Utf8Path,
    keys: &IngestKeys,
    incoming: &BTreeSet<String>,
) -> Result<Utf8PathBuf, AppError> {
    let candidate = candidate_dir(base, keys);
    if !candidate.exists() {
        debug!(destination = %candidate, "Destination does not exist yet");
        return Ok(candidate);
    }

    let existing = list_entry_names(&candidate)?;
    let collision = existing.iter().find(|name| incoming.contains(*name));
    let Some(collision) = collision else {
        debug!(destination = %candidate, "No name collisions, merging into existing directory");
        return Ok(candidate);
    };

    let highest = existing
        .iter()
        .filter_map(|name| upload_folder_number(name))
        .max()
        .unwrap_or(0);
    let versioned = candidate.join(format!("{UPLOAD_FOLDER_PREFIX}{}", highest + 1));
    info!(
        collision = %collision,
        destination = %versioned,
        "Incoming files collide with existing ones, using versioned folder"
    );
    Ok(versioned)
}

fn list_entry_names(dir: &Utf8Path) -> Result<Vec<String>, AppError> {
    let entries = fs::read_dir(dir)
        .change_context(AppError::Resolve)
        .attach_printable_lazy(|| format!("Failed to list destination directory: {}", dir))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry
            .change_context(AppError::Resolve)
            .attach_printable_lazy(|| format!("Failed to read entry of: {}", dir))?;
        // A non-UTF8 name can never equal an incoming name.
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}
