use crate::store::{EVENT_HISTORY_KEY, PHOTOGRAPHER_HISTORY_KEY, SettingsStore, StoreError};
use error_stack::Result;

pub const MAX_HISTORY_ENTRIES: usize = 100;

/// Most-recently-used list of names, newest first.
///
/// Entries are unique ignoring case; recording a name that is already present
/// moves the new spelling to the front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MruList {
    entries: Vec<String>,
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl MruList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from stored entries (newest first), restoring the
    /// uniqueness and size invariants if the stored data violates them.
    pub fn from_entries(stored: Vec<String>) -> Self {
        let mut list = Self::new();
        for entry in stored.iter().rev() {
            list.record(entry);
        }
        list
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn record(&mut self, name: &str) {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return;
        }
        self.entries.retain(|entry| !same_name(entry, trimmed));
        self.entries.insert(0, trimmed.to_string());
        self.entries.truncate(MAX_HISTORY_ENTRIES);
    }

    /// Entries containing `query` anywhere, ignoring case, newest first.
    /// An empty query returns everything.
    pub fn suggestions(&self, query: &str) -> Vec<&str> {
        if query.is_empty() {
            return self.entries.iter().map(String::as_str).collect();
        }
        let needle = query.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.to_lowercase().contains(&needle))
            .map(String::as_str)
            .collect()
    }
}

/// Event and photographer name history used to pre-fill the next ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuggestionHistory {
    pub events: MruList,
    pub photographers: MruList,
}

impl SuggestionHistory {
    pub async fn load<S: SettingsStore>(store: &S) -> Result<Self, StoreError> {
        let events = store.get_list(EVENT_HISTORY_KEY).await?;
        let photographers = store.get_list(PHOTOGRAPHER_HISTORY_KEY).await?;
        Ok(Self {
            events: MruList::from_entries(events),
            photographers: MruList::from_entries(photographers),
        })
    }

    pub async fn save<S: SettingsStore>(&self, store: &S) -> Result<(), StoreError> {
        store
            .set_list(EVENT_HISTORY_KEY, self.events.entries())
            .await?;
        store
            .set_list(PHOTOGRAPHER_HISTORY_KEY, self.photographers.entries())
            .await
    }

    pub fn record_event(&mut self, name: &str) {
        self.events.record(name);
    }

    pub fn record_photographer(&mut self, name: &str) {
        self.photographers.record(name);
    }

    pub fn event_suggestions(&self, query: &str) -> Vec<&str> {
        self.events.suggestions(query)
    }

    pub fn photographer_suggestions(&self, query: &str) -> Vec<&str> {
        self.photographers.suggestions(query)
    }
}
