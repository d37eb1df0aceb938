//! The memory store seam.
//!
//! The core only ever calls [`MemoryStore::add`], to persist chunk summaries
//! produced while summarizing long documents. [`InMemoryStore`] is the
//! process-local implementation used by the binary and in tests.

use std::sync::Mutex;

use tracing::debug;

/// Texts carrying this marker are failed command output and are not worth
/// remembering.
const COMMAND_ERROR_MARKER: &str = "Command Error:";

/// An append/query text store.
pub trait MemoryStore: Send + Sync {
    /// Persist a text.
    fn add(&self, text: &str);

    /// Up to `k` stored texts, most recent first.
    fn get_relevant(&self, k: usize) -> Vec<String>;

    /// Forget everything.
    fn clear(&self);
}

/// A [`MemoryStore`] that keeps texts in a vector.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    texts: Mutex<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.texts.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryStore for InMemoryStore {
    fn add(&self, text: &str) {
        if text.contains(COMMAND_ERROR_MARKER) {
            debug!("Not storing failed command output in memory");
            return;
        }
        if let Ok(mut texts) = self.texts.lock() {
            texts.push(text.to_string());
        }
    }

    fn get_relevant(&self, k: usize) -> Vec<String> {
        match self.texts.lock() {
            Ok(texts) => texts.iter().rev().take(k).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn clear(&self) {
        if let Ok(mut texts) = self.texts.lock() {
            texts.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_recall_most_recent() {
        let store = InMemoryStore::new();
        store.add("first");
        store.add("second");
        store.add("third");
        assert_eq!(store.get_relevant(2), vec!["third", "second"]);
        assert_eq!(store.get_relevant(10).len(), 3);
    }

    #[test]
    fn command_errors_are_skipped() {
        let store = InMemoryStore::new();
        store.add("Command Error: git clone failed");
        assert!(store.is_empty());
    }

    #[test]
    fn clear_empties_the_store() {
        let store = InMemoryStore::new();
        store.add("something");
        store.clear();
        assert!(store.get_relevant(1).is_empty());
    }
}
