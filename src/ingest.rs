//! Runs one ingest end to end: validate, resolve the destination, copy on a
//! blocking worker while streaming progress, then remember the names used.

use crate::history::SuggestionHistory;
use crate::resolver::{IngestKeys, candidate_dir, incoming_top_level_names, resolve_destination};
use crate::store::{DESTINATION_PATH_KEY, SettingsStore};
use crate::transfer::{CancelToken, TransferEngine};
use crate::types::{AppError, TransferItem, TransferProgress, TransferResult};
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use error_stack::{Report, Result, ResultExt};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// One mutex per candidate destination directory.
///
/// Resolving an `Upload N` folder and creating it must happen atomically per
/// destination, otherwise two batches could pick the same number.
#[derive(Debug, Clone, Default)]
pub struct DestinationLocks {
    locks: Arc<DashMap<Utf8PathBuf, Arc<Mutex<()>>>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, destination: &Utf8Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(destination.to_path_buf())
            .or_default()
            .clone()
    }

    /// Drops the entry for `destination` once nobody else holds its lock, so
    /// the registry only keeps destinations with a batch in flight.
    pub fn release(&self, destination: &Utf8Path) {
        self.locks
            .remove_if(destination, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct Ingestor<S> {
    store: S,
    locks: DestinationLocks,
}

impl<S: SettingsStore> Ingestor<S> {
    pub fn new(store: S) -> Self {
        Self::with_locks(store, DestinationLocks::new())
    }

    pub fn with_locks(store: S, locks: DestinationLocks) -> Self {
        Self { store, locks }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn destination_root(&self) -> Result<Option<Utf8PathBuf>, AppError> {
        let root = self
            .store
            .get_string(DESTINATION_PATH_KEY)
            .await
            .change_context(AppError::Store)?;
        Ok(root
            .filter(|path| !path.trim().is_empty())
            .map(Utf8PathBuf::from))
    }

    pub async fn set_destination_root(&self, root: &Utf8Path) -> Result<(), AppError> {
        self.store
            .set_string(DESTINATION_PATH_KEY, root.as_str())
            .await
            .change_context(AppError::Store)
            .attach_printable_lazy(|| format!("destination={root}"))
    }

    pub async fn history(&self) -> Result<SuggestionHistory, AppError> {
        SuggestionHistory::load(&self.store)
            .await
            .change_context(AppError::Store)
    }

    /// Checks that a transfer can start and returns the destination root.
    pub async fn validate(
        &self,
        items: &[TransferItem],
        keys: &IngestKeys,
    ) -> Result<Utf8PathBuf, AppError> {
        if keys.event_name.trim().is_empty() {
            return Err(Report::new(AppError::Validation).attach_printable("Event name is required"));
        }
        if keys.photographer_name.trim().is_empty() {
            return Err(
                Report::new(AppError::Validation).attach_printable("Photographer name is required")
            );
        }
        if items.is_empty() {
            return Err(Report::new(AppError::Validation).attach_printable("No files to transfer"));
        }
        match self.destination_root().await? {
            Some(root) => Ok(root),
            None => Err(Report::new(AppError::Validation)
                .attach_printable("Destination folder has not been configured")),
        }
    }

    /// Copies `items` into the hierarchy for `keys`.
    ///
    /// Progress snapshots are sent on `progress` as the copy advances; a
    /// closed receiver does not stop the transfer. On success the event and
    /// photographer names are added to the suggestion history.
    pub async fn ingest(
        &self,
        items: Vec<TransferItem>,
        keys: &IngestKeys,
        progress: UnboundedSender<TransferProgress>,
        cancel: CancelToken,
    ) -> Result<TransferResult, AppError> {
        let keys = keys.trimmed();
        let root = self.validate(&items, &keys).await?;

        let candidate = candidate_dir(&root, &keys);
        let lock = self.locks.lock_for(&candidate);
        let worker_keys = keys.clone();

        info!(
            event = %keys.event_name,
            photographer = %keys.photographer_name,
            files = items.len(),
            "Starting ingest"
        );

        let outcome = tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let incoming = incoming_top_level_names(&items);
            let destination = resolve_destination(&root, &worker_keys, &incoming)?;
            TransferEngine::with_cancel(cancel).transfer(&items, &destination, |snapshot| {
                let _ = progress.send(snapshot.clone());
            })
        })
        .await
        .change_context(AppError::Worker)
        .and_then(|outcome| outcome);
        self.locks.release(&candidate);
        let result = outcome?;

        // Files are already copied, so history failures are only logged.
        match self.history().await {
            Ok(mut history) => {
                history.record_event(&keys.event_name);
                history.record_photographer(&keys.photographer_name);
                if let Err(err) = history.save(&self.store).await {
                    warn!(error = ?err, "Failed to save name history");
                }
            }
            Err(err) => warn!(error = ?err, "Failed to load name history, not recording names"),
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use jiff::civil::date;
    use tokio::sync::mpsc;

    fn keys(event: &str, photographer: &str) -> IngestKeys {
        IngestKeys::new(event, date(2024, 5, 4), photographer)
    }

    fn item(path: &str) -> TransferItem {
        TransferItem {
            source_path: Utf8PathBuf::from(path),
            relative_path: String::new(),
            size_bytes: 1,
        }
    }

    #[tokio::test]
    async fn validation_requires_names_items_and_destination() {
        let ingestor = Ingestor::new(MemoryStore::new());
        let items = vec![item("/in/a.jpg")];

        let err = ingestor.validate(&items, &keys("  ", "Bob")).await.unwrap_err();
        assert!(matches!(err.current_context(), AppError::Validation));

        let err = ingestor.validate(&items, &keys("Gala", "")).await.unwrap_err();
        assert!(matches!(err.current_context(), AppError::Validation));

        let err = ingestor.validate(&[], &keys("Gala", "Bob")).await.unwrap_err();
        assert!(matches!(err.current_context(), AppError::Validation));

        let err = ingestor.validate(&items, &keys("Gala", "Bob")).await.unwrap_err();
        assert!(matches!(err.current_context(), AppError::Validation));

        ingestor
            .set_destination_root(Utf8Path::new("/photos"))
            .await
            .unwrap();
        let root = ingestor.validate(&items, &keys("Gala", "Bob")).await.unwrap();
        assert_eq!(root, "/photos");
    }

    #[tokio::test]
    async fn fatal_errors_do_not_touch_history() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let blocker = root.join("blocker");
        std::fs::write(&blocker, b"file in the way").unwrap();

        let ingestor = Ingestor::new(MemoryStore::new());
        ingestor.set_destination_root(&blocker).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = ingestor
            .ingest(vec![item("/in/a.jpg")], &keys("Gala", "Bob"), tx, CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), AppError::CreateDestination));

        let history = ingestor.history().await.unwrap();
        assert!(history.event_suggestions("").is_empty());
    }

    #[tokio::test]
    async fn unreadable_history_does_not_lose_a_finished_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("a.jpg");
        std::fs::write(&source, b"photo").unwrap();
        let library = root.join("library");

        let store = MemoryStore::new();
        store
            .set_string(crate::store::EVENT_HISTORY_KEY, "oops")
            .await
            .unwrap();
        let ingestor = Ingestor::new(store);
        ingestor.set_destination_root(&library).await.unwrap();

        let items = vec![TransferItem {
            source_path: source,
            relative_path: String::new(),
            size_bytes: 5,
        }];
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = ingestor
            .ingest(items, &keys("Gala", "Bob"), tx, CancelToken::new())
            .await
            .unwrap();

        assert!(result.errors.is_empty());
        assert_eq!(result.total_bytes_copied, 5);
        assert!(library.join("Gala/2024-05-04/Bob/a.jpg").exists());
        assert!(ingestor.locks.is_empty());
    }

    #[test]
    fn released_locks_leave_the_registry() {
        let locks = DestinationLocks::new();
        let held = locks.lock_for(Utf8Path::new("/photos/Gala"));
        locks.release(Utf8Path::new("/photos/Gala"));
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.release(Utf8Path::new("/photos/Gala"));
        assert!(locks.is_empty());
    }

    #[test]
    fn locks_are_shared_per_destination() {
        let locks = DestinationLocks::new();
        let a = locks.lock_for(Utf8Path::new("/photos/Gala"));
        let b = locks.lock_for(Utf8Path::new("/photos/Gala"));
        let c = locks.lock_for(Utf8Path::new("/photos/Expo"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
