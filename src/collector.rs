use crate::sanitize::sanitize;
use crate::types::TransferItem;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Ordered, deduplicated set of files waiting to be transferred.
///
/// Items are identified by their resolved absolute source path, so the same
/// file reached twice (dropped directly and as part of a dropped folder) is
/// only queued once.
#[derive(Debug, Default)]
pub struct SourceCollector {
    items: Vec<TransferItem>,
    seen: HashSet<Utf8PathBuf>,
}

struct Discovered {
    path: Utf8PathBuf,
    relative_path: String,
}

impl SourceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<TransferItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.items.iter().map(|item| item.size_bytes).sum()
    }

    /// Adds every file reachable from `inputs` and returns how many new items
    /// were queued. Missing inputs are skipped.
    pub fn add_paths<I, P>(&mut self, inputs: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        let before = self.items.len();
        for input in inputs {
            let input = input.as_ref();
            let Ok(metadata) = fs::metadata(input) else {
                debug!(path = %input, "Skipping missing source");
                continue;
            };
            let Ok(resolved) = input.canonicalize_utf8() else {
                debug!(path = %input, "Skipping source that could not be resolved");
                continue;
            };

            if metadata.is_dir() {
                self.add_directory(&resolved);
            } else {
                self.push(resolved, String::new(), metadata.len());
            }
        }
        self.items.len() - before
    }

    pub fn remove_at(&mut self, index: usize) {
        if index < self.items.len() {
            let removed = self.items.remove(index);
            self.seen.remove(&removed.source_path);
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }

    fn add_directory(&mut self, dir: &Utf8Path) {
        let base_name = dir.file_name().map(str::to_string).unwrap_or_else(|| sanitize(""));
        let discovered = walk_directory(dir, &base_name);

        // Size lookups are independent stat calls; run them in parallel and
        // keep the walk order.
        let sizes: Vec<u64> = discovered
            .par_iter()
            .map(|file| match fs::metadata(&file.path) {
                Ok(metadata) => metadata.len(),
                Err(err) => {
                    warn!(path = %file.path, error = %err, "Could not read file size, using 0");
                    0
                }
            })
            .collect();

        for (file, size) in discovered.into_iter().zip(sizes) {
            self.push(file.path, file.relative_path, size);
        }
    }

    fn push(&mut self, source_path: Utf8PathBuf, relative_path: String, size_bytes: u64) {
        if !self.seen.insert(source_path.clone()) {
            debug!(path = %source_path, "Skipping duplicate source");
            return;
        }
        self.items.push(TransferItem {
            source_path,
            relative_path,
            size_bytes,
        });
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Depth-first walk with entries sorted by name inside each directory.
fn walk_directory(dir: &Utf8Path, base_name: &str) -> Vec<Discovered> {
    let mut files = Vec::new();
    let mut traversal_errors = 0;

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry in walker {
        match entry {
            Ok(dir_entry) => {
                if !dir_entry.file_type().is_file() {
                    continue;
                }
                match Utf8PathBuf::from_path_buf(dir_entry.into_path()) {
                    Ok(path) => {
                        let Ok(inner) = path.strip_prefix(dir) else {
                            continue;
                        };
                        let relative_path = join_forward_slashes(base_name, inner);
                        files.push(Discovered {
                            path,
                            relative_path,
                        });
                    }
                    Err(path_buf) => {
                        warn!(path = ?path_buf, "Skipping non-UTF8 path");
                        traversal_errors += 1;
                    }
                }
            }
            Err(err) => {
                match err.io_error() {
                    Some(io_err) => {
                        warn!(path = ?err.path(), error = %io_err, "Directory traversal failed")
                    }
                    None => warn!(path = ?err.path(), error = %err, "Directory traversal failed"),
                }
                traversal_errors += 1;
            }
        }
    }

    if traversal_errors > 0 {
        warn!(
            directory = %dir,
            traversal_errors, "Encountered errors while enumerating dropped directory"
        );
    }

    files
}

fn join_forward_slashes(base_name: &str, inner: &Utf8Path) -> String {
    let mut relative = base_name.to_string();
    for component in inner.components() {
        if let Utf8Component::Normal(segment) = component {
            relative.push('/');
            relative.push_str(segment);
        }
    }
    relative
}
