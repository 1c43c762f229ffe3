// storage/src/index/cursor.rs

use super::data::IndexData;
use super::entry::Entry;
use super::page::IndexPage;
use super::PartialValue;
use crate::row::RowId;
use crate::Result;
use std::mem;
use std::sync::Arc;

/// Walks the entries of an index between two bounds.
///
/// The position is an entry, not a page slot, so it stays meaningful when
/// the tree changes underneath: the next step simply looks for the first
/// entry past it. The leaf the last step landed on is kept and reused as
/// long as the index mod count has not moved.
#[derive(Debug)]
pub struct EntryCursor {
    data: Arc<IndexData>,
    first: Entry,
    last: Entry,
    cur: Entry,
    prev: Entry,
    mod_count: u64,
    leaf: Option<IndexPage>,
}

impl EntryCursor {
    pub(crate) fn new(data: Arc<IndexData>, first: Entry, last: Entry) -> Self {
        let mod_count = data.mod_count();
        Self {
            data,
            cur: first.clone(),
            prev: first.clone(),
            first,
            last,
            mod_count,
            leaf: None,
        }
    }

    pub fn index_data(&self) -> &Arc<IndexData> {
        &self.data
    }

    /// Entries must sort after this one.
    pub fn first_bound(&self) -> &Entry {
        &self.first
    }

    /// Entries must sort before this one.
    pub fn last_bound(&self) -> &Entry {
        &self.last
    }

    pub fn current(&self) -> &Entry {
        &self.cur
    }

    pub fn previous(&self) -> &Entry {
        &self.prev
    }

    pub fn is_up_to_date(&self) -> bool {
        self.mod_count == self.data.mod_count()
    }

    pub fn is_before_first(&self) -> bool {
        self.cur <= self.first
    }

    pub fn is_after_last(&self) -> bool {
        self.cur >= self.last
    }

    pub fn before_first(&mut self) {
        self.set_position(self.first.clone());
    }

    pub fn after_last(&mut self) {
        self.set_position(self.last.clone());
    }

    /// Puts the cursor just before the entries matching `row`.
    pub fn before_entry(&mut self, row: &[PartialValue]) -> Result<()> {
        let key = self.data.create_partial_key(row)?;
        self.set_position(Entry::new(key, RowId::FIRST));
        Ok(())
    }

    /// Puts the cursor just after the entries matching `row`.
    pub fn after_entry(&mut self, row: &[PartialValue]) -> Result<()> {
        let key = self.data.create_partial_key(row)?;
        self.set_position(Entry::new(key, RowId::LAST));
        Ok(())
    }

    pub fn restore_position(&mut self, cur: Entry, prev: Entry) {
        self.cur = self.clamp(cur);
        self.prev = self.clamp(prev);
    }

    fn clamp(&self, entry: Entry) -> Entry {
        if entry < self.first {
            self.first.clone()
        } else if entry > self.last {
            self.last.clone()
        } else {
            entry
        }
    }

    fn set_position(&mut self, entry: Entry) {
        let entry = self.clamp(entry);
        self.prev = mem::replace(&mut self.cur, entry);
    }

    /// Moves to the next entry and returns it, or the last bound once the
    /// range is exhausted.
    pub fn next_entry(&mut self) -> Result<Entry> {
        let next = if self.is_after_last() {
            self.last.clone()
        } else {
            match self.find_next()? {
                Some(entry) if entry < self.last => entry,
                _ => self.last.clone(),
            }
        };
        self.set_position(next.clone());
        Ok(next)
    }

    /// Moves to the previous entry and returns it, or the first bound once
    /// the range is exhausted.
    pub fn previous_entry(&mut self) -> Result<Entry> {
        let prev = if self.is_before_first() {
            self.first.clone()
        } else {
            match self.find_previous()? {
                Some(entry) if entry > self.first => entry,
                _ => self.first.clone(),
            }
        };
        self.set_position(prev.clone());
        Ok(prev)
    }

    fn find_next(&mut self) -> Result<Option<Entry>> {
        if self.is_up_to_date() {
            if let Some(leaf) = &self.leaf {
                if leaf.entries.first().is_some_and(|e| *e <= self.cur) {
                    let pos = leaf.entries.partition_point(|e| *e <= self.cur);
                    if let Some(entry) = leaf.entries.get(pos) {
                        return Ok(Some(entry.clone()));
                    }
                }
            }
        }

        self.mod_count = self.data.mod_count();
        Ok(self
            .data
            .next_entry_after(&self.cur)?
            .map(|(entry, leaf)| {
                self.leaf = Some(leaf);
                entry
            }))
    }

    fn find_previous(&mut self) -> Result<Option<Entry>> {
        if self.is_up_to_date() {
            if let Some(leaf) = &self.leaf {
                if leaf.entries.last().is_some_and(|e| *e >= self.cur) {
                    let pos = leaf.entries.partition_point(|e| *e < self.cur);
                    if pos > 0 {
                        return Ok(Some(leaf.entries[pos - 1].clone()));
                    }
                }
            }
        }

        self.mod_count = self.data.mod_count();
        Ok(self
            .data
            .previous_entry_before(&self.cur)?
            .map(|(entry, leaf)| {
                self.leaf = Some(leaf);
                entry
            }))
    }
}
