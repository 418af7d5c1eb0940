//! Copies dropped photo files and folders into a destination hierarchy
//! organized as `<root>/<event>/<YYYY-MM-DD>/<photographer>`, reporting
//! progress per file and collecting failures instead of aborting.

pub mod collector;
pub mod history;
pub mod ingest;
pub mod progress;
pub mod resolver;
pub mod sanitize;
pub mod store;
pub mod transfer;
pub mod types;

pub use collector::SourceCollector;
pub use history::{MruList, SuggestionHistory};
pub use ingest::{DestinationLocks, Ingestor};
pub use resolver::{IngestKeys, resolve_destination};
pub use sanitize::sanitize;
pub use store::{MemoryStore, SettingsStore, SqliteStore};
pub use transfer::{CancelToken, TransferEngine};
pub use types::{AppError, FileTransferError, TransferItem, TransferProgress, TransferResult};
