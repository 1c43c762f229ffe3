// storage/src/database/cache.rs

use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded LRU of loaded tables keyed by table definition page.
///
/// Entries still referenced outside the cache are never evicted, so at
/// most one instance of a table is live at a time. The cache can grow past
/// its capacity while that many tables are in use.
#[derive(Debug)]
pub(crate) struct TableCache<T> {
    capacity: usize,
    /// Least recently used first.
    entries: VecDeque<(u32, Arc<T>)>,
}

impl<T> TableCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&mut self, page: u32) -> Option<Arc<T>> {
        let position = self.entries.iter().position(|(p, _)| *p == page)?;
        let entry = self.entries.remove(position)?;
        let table = Arc::clone(&entry.1);
        self.entries.push_back(entry);
        Some(table)
    }

    pub fn insert(&mut self, page: u32, table: Arc<T>) {
        if let Some(position) = self.entries.iter().position(|(p, _)| *p == page) {
            self.entries.remove(position);
        }
        self.entries.push_back((page, table));
        self.evict();
    }

    fn evict(&mut self) {
        let mut position = 0;
        while self.entries.len() > self.capacity && position < self.entries.len() {
            if Arc::strong_count(&self.entries[position].1) == 1 {
                if let Some((page, _)) = self.entries.remove(position) {
                    log::debug!("Evicted table at page {} from the table cache", page);
                }
            } else {
                position += 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
