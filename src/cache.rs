//! Session-lifetime image cache and the local image listing.
//!
//! Both are cheap-to-clone handles over shared state so the background
//! session task and the caller see the same data. The cache is unbounded and
//! never persisted; entries leave only through `remove`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// An image known to the appliance, with its raw (decoded) bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub bytes: Vec<u8>,
}

impl ImageRecord {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
        }
    }
}

#[derive(Clone, Default)]
pub struct ImageCache {
    records: Arc<Mutex<HashMap<String, Arc<ImageRecord>>>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ImageRecord>> {
        self.records.lock().get(id).cloned()
    }

    /// Insert a record under its own ID, replacing any previous entry.
    pub fn put(&self, record: ImageRecord) -> Arc<ImageRecord> {
        let record = Arc::new(record);
        self.records
            .lock()
            .insert(record.id.clone(), Arc::clone(&record));
        record
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().contains_key(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.records.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// IDs from `ids` that still need fetching.
    pub fn missing<'a>(&self, ids: &'a [String]) -> Vec<&'a str> {
        let records = self.records.lock();
        ids.iter()
            .filter(|id| !records.contains_key(id.as_str()))
            .map(String::as_str)
            .collect()
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache").field("len", &self.len()).finish()
    }
}

/// Client-side view of which images the appliance holds.
#[derive(Clone, Default, Debug)]
pub struct ImageListing {
    ids: Arc<Mutex<Vec<String>>>,
}

impl ImageListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, ids: Vec<String>) {
        *self.ids.lock() = ids;
    }

    pub fn push(&self, id: &str) {
        let mut ids = self.ids.lock();
        if !ids.iter().any(|i| i == id) {
            ids.push(id.to_string());
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut ids = self.ids.lock();
        let before = ids.len();
        ids.retain(|i| i != id);
        ids.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().iter().any(|i| i == id)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.ids.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}
