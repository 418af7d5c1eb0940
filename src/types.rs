use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error")]
    Validation,

    #[error("Destination resolution error")]
    Resolve,

    #[error("Destination directory could not be created")]
    CreateDestination,

    #[error("Settings store error")]
    Store,

    #[error("Transfer worker failed")]
    Worker,
}

/// One file queued for copying.
///
/// `relative_path` is empty for a file dropped on its own. For files found
/// inside a dropped directory it is `"<directory name>/<path inside it>"`,
/// always `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source_path: Utf8PathBuf,
    pub relative_path: String,
    pub size_bytes: u64,
}

impl TransferItem {
    pub fn file_name(&self) -> &str {
        self.source_path.file_name().unwrap_or(self.source_path.as_str())
    }

    /// The name this item will occupy directly inside the destination directory.
    pub fn top_level_name(&self) -> &str {
        if self.relative_path.is_empty() {
            return self.file_name();
        }
        self.relative_path
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| self.file_name())
    }

    pub fn destination_in(&self, destination_dir: &Utf8Path) -> Utf8PathBuf {
        if self.relative_path.is_empty() {
            destination_dir.join(self.file_name())
        } else {
            destination_dir.join(&self.relative_path)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub total_files: usize,
    pub copied_files: usize,
    pub total_bytes: u64,
    pub copied_bytes: u64,
    pub current_file_name: String,
}

impl TransferProgress {
    pub fn fraction_complete(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.copied_files as f64 / self.total_files as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferError {
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub total_files: usize,
    pub processed_files: usize,
    pub total_bytes_copied: u64,
    pub destination_path: Utf8PathBuf,
    pub duration_seconds: f64,
    pub errors: Vec<FileTransferError>,
    /// Set only when the batch landed in an `Upload N` folder.
    pub versioned_folder_name: Option<String>,
    pub cancelled: bool,
}

impl TransferResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn succeeded_files(&self) -> usize {
        self.processed_files - self.errors.len()
    }
}
