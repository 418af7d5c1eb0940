use crate::resolver::upload_folder_number;
use crate::types::{AppError, FileTransferError, TransferItem, TransferProgress, TransferResult};
use camino::Utf8Path;
use error_stack::{Result, ResultExt};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct TransferEngine {
    cancel: Option<CancelToken>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    /// Copies `items` into `destination_dir` in order.
    ///
    /// `on_progress` receives a snapshot before each copy starts and another
    /// once the item is done. Per-file failures are collected in the result;
    /// only failing to create `destination_dir` aborts the run.
    pub fn transfer<F>(
        &self,
        items: &[TransferItem],
        destination_dir: &Utf8Path,
        mut on_progress: F,
    ) -> Result<TransferResult, AppError>
    where
        F: FnMut(&TransferProgress),
    {
        let started = Instant::now();

        fs::create_dir_all(destination_dir)
            .change_context(AppError::CreateDestination)
            .attach_printable_lazy(|| {
                format!("Failed to create destination directory: {}", destination_dir)
            })?;

        info!(
            destination = %destination_dir,
            files = items.len(),
            "Starting transfer"
        );

        let mut progress = TransferProgress {
            total_files: items.len(),
            total_bytes: items.iter().map(|item| item.size_bytes).sum(),
            ..Default::default()
        };
        let mut errors = Vec::new();
        let mut cancelled = false;

        for item in items {
            if self.is_cancelled() {
                info!(
                    processed = progress.copied_files,
                    total = progress.total_files,
                    "Transfer cancelled"
                );
                cancelled = true;
                break;
            }

            let target_path = item.destination_in(destination_dir);
            let parent_ready = ensure_parent(&target_path);

            progress.current_file_name = item.file_name().to_string();
            on_progress(&progress);

            match parent_ready.and_then(|()| copy_item(item, &target_path)) {
                Ok(()) => {
                    progress.copied_bytes += item.size_bytes;
                    debug!(source = %item.source_path, target = %target_path, "Copied");
                }
                Err(err) => {
                    warn!(
                        source = %item.source_path,
                        target = %target_path,
                        error = %err,
                        "Failed to copy file"
                    );
                    errors.push(FileTransferError {
                        file_name: item.file_name().to_string(),
                        message: err.to_string(),
                    });
                }
            }

            progress.copied_files += 1;
            on_progress(&progress);
        }

        let versioned_folder_name = destination_dir
            .file_name()
            .filter(|name| upload_folder_number(name).is_some())
            .map(str::to_string);

        let result = TransferResult {
            total_files: items.len(),
            processed_files: progress.copied_files,
            total_bytes_copied: progress.copied_bytes,
            destination_path: destination_dir.to_path_buf(),
            duration_seconds: started.elapsed().as_secs_f64(),
            errors,
            versioned_folder_name,
            cancelled,
        };

        info!(
            copied = result.succeeded_files(),
            errors = result.errors.len(),
            bytes = result.total_bytes_copied,
            seconds = result.duration_seconds,
            "Transfer finished"
        );

        Ok(result)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[derive(Debug, thiserror::Error)]
enum CopyError {
    #[error("Could not create folder {path}: {source}")]
    CreateParent { path: String, source: io::Error },

    #[error("Could not open source file: {0}")]
    OpenSource(io::Error),

    #[error("Destination already exists: {0}")]
    DestinationExists(String),

    #[error("Could not create destination file: {0}")]
    CreateDestination(io::Error),

    #[error("Copy failed: {0}")]
    Write(io::Error),
}

/// Nested relative paths need folders below the destination directory.
fn ensure_parent(target_path: &Utf8Path) -> std::result::Result<(), CopyError> {
    match target_path.parent() {
        Some(parent) if !parent.is_dir() => {
            fs::create_dir_all(parent).map_err(|source| CopyError::CreateParent {
                path: parent.to_string(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Byte-for-byte copy that never overwrites an existing destination.
fn copy_item(item: &TransferItem, target_path: &Utf8Path) -> std::result::Result<(), CopyError> {
    let mut source = File::open(&item.source_path).map_err(CopyError::OpenSource)?;
    let mut target = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target_path)
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => CopyError::DestinationExists(target_path.to_string()),
            _ => CopyError::CreateDestination(err),
        })?;

    let copied = io::copy(&mut source, &mut target).and_then(|_| target.sync_all());
    if let Err(err) = copied {
        drop(target);
        // The partial file was created by us, so it is ours to remove.
        if let Err(remove_err) = fs::remove_file(target_path) {
            warn!(target = %target_path, error = %remove_err, "Failed to remove partial file");
        }
        return Err(CopyError::Write(err));
    }

    let modified = fs::metadata(&item.source_path).and_then(|metadata| metadata.modified());
    if let Err(err) = modified.and_then(|modified| target.set_modified(modified)) {
        debug!(target = %target_path, error = %err, "Could not carry over modification time");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _guard: TempDir,
        root: Utf8PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
            Self { _guard: dir, root }
        }

        fn source(&self, relative: &str, contents: &[u8]) -> Utf8PathBuf {
            let path = self.root.join("src").join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            path
        }

        fn item(&self, name: &str, relative_path: &str, contents: &[u8]) -> TransferItem {
            TransferItem {
                source_path: self.source(name, contents),
                relative_path: relative_path.to_string(),
                size_bytes: contents.len() as u64,
            }
        }
    }

    #[test]
    fn copies_flat_and_nested_items() {
        let fx = Fixture::new();
        let items = vec![
            fx.item("a.jpg", "", b"aaaa"),
            fx.item("card/DCIM/b.jpg", "card/DCIM/b.jpg", b"bb"),
        ];
        let dest = fx.root.join("out/Ev/2024-01-01/Phot");

        let result = TransferEngine::new().transfer(&items, &dest, |_| {}).unwrap();

        assert_eq!(fs::read(dest.join("a.jpg")).unwrap(), b"aaaa");
        assert_eq!(fs::read(dest.join("card/DCIM/b.jpg")).unwrap(), b"bb");
        assert_eq!(result.total_files, 2);
        assert_eq!(result.processed_files, 2);
        assert_eq!(result.total_bytes_copied, 6);
        assert_eq!(result.destination_path, dest);
        assert!(result.errors.is_empty());
        assert_eq!(result.versioned_folder_name, None);
        assert!(!result.cancelled);
    }

    #[test]
    fn progress_is_reported_before_and_after_each_item() {
        let fx = Fixture::new();
        let items = vec![
            fx.item("a.jpg", "", b"aaa"),
            fx.item("b.jpg", "", b"b"),
            fx.item("c.jpg", "", b"cc"),
        ];
        let dest = fx.root.join("out");
        // Make the middle item fail.
        fs::remove_file(&items[1].source_path).unwrap();

        let mut snapshots = Vec::new();
        let result = TransferEngine::new()
            .transfer(&items, &dest, |p| snapshots.push(p.clone()))
            .unwrap();

        assert_eq!(snapshots.len(), 6);
        assert_eq!(snapshots[0].current_file_name, "a.jpg");
        assert_eq!(snapshots[0].copied_files, 0);
        assert_eq!(snapshots[2].current_file_name, "b.jpg");
        assert!(snapshots.iter().all(|p| p.total_files == 3 && p.total_bytes == 6));
        for pair in snapshots.windows(2) {
            assert!(pair[0].copied_files <= pair[1].copied_files);
            assert!(pair[0].copied_bytes <= pair[1].copied_bytes);
        }

        let last = snapshots.last().unwrap();
        assert_eq!(last.copied_files, 3);
        assert_eq!(last.copied_bytes, 5);
        assert!(last.copied_bytes < last.total_bytes);
        assert_eq!(last.fraction_complete(), 1.0);

        assert_eq!(result.total_bytes_copied, 5);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].file_name, "b.jpg");
    }

    #[test]
    fn one_vanished_source_out_of_five_does_not_abort() {
        let fx = Fixture::new();
        let items: Vec<_> = (1..=5)
            .map(|n| fx.item(&format!("IMG_{n}.jpg"), "", b"data"))
            .collect();
        fs::remove_file(&items[3].source_path).unwrap();

        let dest = fx.root.join("out");
        let result = TransferEngine::new().transfer(&items, &dest, |_| {}).unwrap();

        assert_eq!(result.total_files, 5);
        assert_eq!(result.processed_files, 5);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.succeeded_files(), 4);
        assert_eq!(result.total_bytes_copied, 16);
        assert!(dest.join("IMG_5.jpg").exists());
    }

    #[test]
    fn existing_destination_files_are_not_overwritten() {
        let fx = Fixture::new();
        let items = vec![fx.item("a.jpg", "", b"new")];
        let dest = fx.root.join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.jpg"), b"old").unwrap();

        let result = TransferEngine::new().transfer(&items, &dest, |_| {}).unwrap();

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("already exists"));
        assert_eq!(fs::read(dest.join("a.jpg")).unwrap(), b"old");
    }

    #[test]
    fn blocked_subfolder_fails_only_that_item() {
        let fx = Fixture::new();
        let items = vec![
            fx.item("card/a.jpg", "card/a.jpg", b"a"),
            fx.item("b.jpg", "", b"bb"),
        ];
        let dest = fx.root.join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("card"), b"file where a folder should be").unwrap();

        let result = TransferEngine::new().transfer(&items, &dest, |_| {}).unwrap();

        assert_eq!(result.processed_files, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].file_name, "a.jpg");
        assert!(result.errors[0].message.starts_with("Could not create folder"));
        assert_eq!(result.total_bytes_copied, 2);
        assert_eq!(fs::read(dest.join("b.jpg")).unwrap(), b"bb");
    }

    #[test]
    fn subfolders_exist_before_the_item_is_reported() {
        let fx = Fixture::new();
        let items = vec![fx.item("card/DCIM/b.jpg", "card/DCIM/b.jpg", b"bb")];
        let dest = fx.root.join("out");

        let mut ready_when_reported = Vec::new();
        TransferEngine::new()
            .transfer(&items, &dest, |p| {
                if p.copied_files == 0 {
                    ready_when_reported.push(dest.join("card/DCIM").is_dir());
                }
            })
            .unwrap();

        assert_eq!(ready_when_reported, vec![true]);
    }

    #[test]
    fn modification_time_is_carried_over() {
        let fx = Fixture::new();
        let items = vec![fx.item("a.jpg", "", b"a")];
        let stamp =
            std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        File::options()
            .write(true)
            .open(&items[0].source_path)
            .unwrap()
            .set_modified(stamp)
            .unwrap();

        let dest = fx.root.join("out");
        TransferEngine::new().transfer(&items, &dest, |_| {}).unwrap();

        let copied = fs::metadata(dest.join("a.jpg")).unwrap().modified().unwrap();
        assert_eq!(copied, stamp);
    }

    #[test]
    fn failing_to_create_destination_is_fatal() {
        let fx = Fixture::new();
        let items = vec![fx.item("a.jpg", "", b"a")];
        let blocker = fx.root.join("blocker");
        fs::write(&blocker, b"file in the way").unwrap();

        let mut calls = 0;
        let err = TransferEngine::new()
            .transfer(&items, &blocker.join("dest"), |_| calls += 1)
            .unwrap_err();

        assert!(matches!(err.current_context(), AppError::CreateDestination));
        assert_eq!(calls, 0);
    }

    #[test]
    fn upload_folder_name_is_reported() {
        let fx = Fixture::new();
        let items = vec![fx.item("a.jpg", "", b"a")];
        let dest = fx.root.join("out/Upload 3");

        let result = TransferEngine::new().transfer(&items, &dest, |_| {}).unwrap();
        assert_eq!(result.versioned_folder_name.as_deref(), Some("Upload 3"));
    }

    #[test]
    fn cancellation_stops_between_items() {
        let fx = Fixture::new();
        let items = vec![
            fx.item("a.jpg", "", b"a"),
            fx.item("b.jpg", "", b"b"),
            fx.item("c.jpg", "", b"c"),
        ];
        let dest = fx.root.join("out");
        let cancel = CancelToken::new();
        let engine = TransferEngine::with_cancel(cancel.clone());

        let result = engine
            .transfer(&items, &dest, |p| {
                if p.copied_files == 1 {
                    cancel.cancel();
                }
            })
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.total_files, 3);
        assert_eq!(result.processed_files, 1);
        assert!(dest.join("a.jpg").exists());
        assert!(!dest.join("b.jpg").exists());
    }

    #[test]
    fn empty_batch_still_creates_destination() {
        let fx = Fixture::new();
        let dest = fx.root.join("out/empty");
        let result = TransferEngine::new().transfer(&[], &dest, |_| {}).unwrap();
        assert!(dest.is_dir());
        assert_eq!(result.total_files, 0);
    }
}
