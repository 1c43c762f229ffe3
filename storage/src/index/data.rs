// storage/src/index/data.rs

//! The B-tree of one physical index.
//!
//! Leaf pages hold the entries; node pages hold, for each child but the
//! last, the child's greatest entry. The last child hangs off the node's
//! child-tail pointer. Pages on one level are linked both ways, which is
//! what cursors walk. Bounds in node pages may be stale after deletes; a
//! descent only needs every entry of a child to sort at or below its
//! bound and above the previous one.

use super::cursor::EntryCursor;
use super::entry::{Entry, SIZE_CHILD_POINTER};
use super::page::IndexPage;
use super::sort_key::{self, MAX_VALUE_FLAG, MIN_VALUE_FLAG};
use super::{
    IndexColumn, PartialValue, IGNORE_NULLS_INDEX_FLAG, REQUIRED_INDEX_FLAG, UNIQUE_INDEX_FLAG,
};
use crate::file::PageChannel;
use crate::row::RowId;
use crate::usage::SharedUsageMap;
use crate::{Result, StorageError};
use bytes::{BufMut, Bytes, BytesMut};
use jetdb_core::Value;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Deepest tree accepted before the page links are taken to be cyclic.
const MAX_DEPTH: usize = 32;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildSlot {
    Entry(usize),
    Tail,
}

struct PathStep {
    page: IndexPage,
    slot: ChildSlot,
}

enum KeyValue<'a> {
    Min,
    Max,
    Value(&'a Value),
}

#[derive(Debug)]
pub struct IndexData {
    channel: Arc<PageChannel>,
    number: u32,
    table_def_page: u32,
    root_page: u32,
    columns: Vec<IndexColumn>,
    flags: u8,
    owned_pages: SharedUsageMap,
    unsupported_reason: Option<String>,
    mod_count: AtomicU64,
    write_lock: Mutex<()>,
}

impl IndexData {
    pub(crate) fn new(
        channel: Arc<PageChannel>,
        number: u32,
        table_def_page: u32,
        root_page: u32,
        columns: Vec<IndexColumn>,
        flags: u8,
        owned_pages: SharedUsageMap,
    ) -> Self {
        let unsupported_reason = columns
            .iter()
            .find_map(|c| sort_key::unsupported_reason(c.column()));
        if let Some(reason) = &unsupported_reason {
            log::debug!(
                "Index data {} of table {} is read-only: {}",
                number,
                table_def_page,
                reason
            );
        }

        Self {
            channel,
            number,
            table_def_page,
            root_page,
            columns,
            flags,
            owned_pages,
            unsupported_reason,
            mod_count: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Writes an empty root leaf for a new index and returns its page.
    pub(crate) fn create_root_page(channel: &PageChannel, table_def_page: u32) -> Result<u32> {
        let buf = IndexPage::new_leaf(0).encode(channel.format(), table_def_page)?;
        channel.write_new_page(&buf)
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn root_page_number(&self) -> u32 {
        self.root_page
    }

    pub fn table_def_page(&self) -> u32 {
        self.table_def_page
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_unique(&self) -> bool {
        self.flags & UNIQUE_INDEX_FLAG != 0
    }

    pub fn should_ignore_nulls(&self) -> bool {
        self.flags & IGNORE_NULLS_INDEX_FLAG != 0
    }

    pub fn is_required(&self) -> bool {
        self.flags & REQUIRED_INDEX_FLAG != 0
    }

    /// Why entries of this index cannot be built, if some column type or
    /// collation is not supported.
    pub fn unsupported_reason(&self) -> Option<&str> {
        self.unsupported_reason.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.channel.is_read_only() || self.unsupported_reason.is_some()
    }

    pub fn owned_pages(&self) -> &SharedUsageMap {
        &self.owned_pages
    }

    /// Bumped on every insert and delete.
    pub fn mod_count(&self) -> u64 {
        self.mod_count.load(Ordering::Acquire)
    }

    pub fn first_entry(&self) -> Entry {
        Entry::FIRST
    }

    pub fn last_entry(&self) -> Entry {
        Entry::LAST
    }

    /// Largest entry accepted, so that any split leaves both halves
    /// fitting on a page.
    fn max_entry_size(&self) -> usize {
        let format = self.channel.format();
        (format.page_size - format.offset_index_entries()) / 4
    }

    fn build_key<'a>(&self, value_of: impl Fn(&IndexColumn) -> KeyValue<'a>) -> Result<Bytes> {
        let legacy_numeric = self.channel.format().legacy_numeric_indexes;
        let mut out = BytesMut::new();
        for column in &self.columns {
            match value_of(column) {
                KeyValue::Min => out.put_u8(MIN_VALUE_FLAG),
                KeyValue::Max => out.put_u8(MAX_VALUE_FLAG),
                KeyValue::Value(value) => sort_key::write_value(
                    &mut out,
                    value,
                    column.column(),
                    column.is_ascending(),
                    legacy_numeric,
                )?,
            }
        }

        let size = out.len() + SIZE_CHILD_POINTER * 2;
        if size > self.max_entry_size() {
            return Err(StorageError::InvalidArgument(format!(
                "Index entry of {} bytes exceeds the limit of {}",
                size,
                self.max_entry_size()
            )));
        }
        Ok(out.freeze())
    }

    /// Sort key of a full row.
    pub fn create_entry_key(&self, row: &[Value]) -> Result<Bytes> {
        self.build_key(|column| KeyValue::Value(column.column().row_value(row)))
    }

    /// Sort key of a row built by [`IndexData::construct_partial_row`].
    pub fn create_partial_key(&self, row: &[PartialValue]) -> Result<Bytes> {
        self.build_key(|column| match row.get(column.column().index()) {
            Some(PartialValue::Min) => KeyValue::Min,
            Some(PartialValue::Max) => KeyValue::Max,
            Some(PartialValue::Value(value)) => KeyValue::Value(value),
            None => KeyValue::Value(&NULL),
        })
    }

    fn row_width(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.column().index() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Lays `values` out in the row slots of the leading index columns.
    /// Index columns without a value get `filler`, usually
    /// [`PartialValue::Min`] or [`PartialValue::Max`].
    pub fn construct_partial_row(
        &self,
        filler: PartialValue,
        values: &[Value],
    ) -> Result<Vec<PartialValue>> {
        if values.len() > self.columns.len() {
            return Err(StorageError::InvalidArgument(format!(
                "Too many values ({}) for index with {} columns",
                values.len(),
                self.columns.len()
            )));
        }

        let mut row = vec![PartialValue::Value(Value::Null); self.row_width()];
        for (i, column) in self.columns.iter().enumerate() {
            row[column.column().index()] = match values.get(i) {
                Some(value) => PartialValue::Value(value.clone()),
                None => filler.clone(),
            };
        }
        Ok(row)
    }

    /// Like [`IndexData::construct_partial_row`], taking the values of the
    /// leading index columns from a name to value pattern. `None` when the
    /// pattern does not name the first index column.
    pub fn construct_partial_row_from_pattern(
        &self,
        filler: PartialValue,
        pattern: &[(&str, Value)],
    ) -> Option<Vec<PartialValue>> {
        let values: Vec<Value> = self
            .columns
            .iter()
            .map_while(|column| {
                pattern
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column.name()))
                    .map(|(_, value)| value.clone())
            })
            .collect();
        if values.is_empty() {
            return None;
        }
        self.construct_partial_row(filler, &values).ok()
    }

    /// Cursor over the whole index.
    pub fn cursor(self: &Arc<Self>) -> EntryCursor {
        EntryCursor::new(Arc::clone(self), Entry::FIRST, Entry::LAST)
    }

    /// Cursor over the entries between two partial rows. A missing start or
    /// end leaves that side open.
    pub fn entry_cursor(
        self: &Arc<Self>,
        start: Option<&[PartialValue]>,
        start_inclusive: bool,
        end: Option<&[PartialValue]>,
        end_inclusive: bool,
    ) -> Result<EntryCursor> {
        let first = match start {
            Some(row) => Entry::new(
                self.create_partial_key(row)?,
                if start_inclusive { RowId::FIRST } else { RowId::LAST },
            ),
            None => Entry::FIRST,
        };
        let last = match end {
            Some(row) => Entry::new(
                self.create_partial_key(row)?,
                if end_inclusive { RowId::LAST } else { RowId::FIRST },
            ),
            None => Entry::LAST,
        };
        Ok(EntryCursor::new(Arc::clone(self), first, last))
    }

    fn check_writable(&self) -> Result<()> {
        if self.channel.is_read_only() {
            return Err(StorageError::ReadOnly(
                "Database was opened read-only".to_string(),
            ));
        }
        if let Some(reason) = &self.unsupported_reason {
            return Err(StorageError::ReadOnly(reason.clone()));
        }
        Ok(())
    }

    /// Validates adding `row` and returns the key to insert under the new
    /// row's id, or `None` when this index skips the row.
    pub(crate) fn prepare_add_row(&self, row: &[Value]) -> Result<Option<Bytes>> {
        self.check_writable()?;

        let is_null = |c: &IndexColumn| c.column().row_value(row).is_null();
        let all_null = self.columns.iter().all(is_null);
        if all_null && self.should_ignore_nulls() {
            return Ok(None);
        }
        if self.is_required() {
            if let Some(column) = self.columns.iter().find(|c| is_null(*c)) {
                return Err(StorageError::ConstraintViolation(format!(
                    "Null value in column {} of required index",
                    column.name()
                )));
            }
        }

        let key = self.create_entry_key(row)?;
        if self.is_unique() && !all_null {
            self.check_unique(&key)?;
        }
        Ok(Some(key))
    }

    fn check_unique(&self, key: &Bytes) -> Result<()> {
        let target = Entry::new(key.clone(), RowId::FIRST);
        if let Some((found, _)) = self.next_entry_after(&target)? {
            if found.key_equals(&target) {
                return Err(StorageError::ConstraintViolation(format!(
                    "New row duplicates the key of {} in unique index {}",
                    found.row_id(),
                    self.number
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn add_row_entry(&self, row: &[Value], row_id: RowId) -> Result<()> {
        match self.prepare_add_row(row)? {
            Some(key) => self.insert_entry(Entry::new(key, row_id)),
            None => Ok(()),
        }
    }

    /// Removes the entry of `row`, returning whether it was present.
    pub(crate) fn remove_row_entry(&self, row: &[Value], row_id: RowId) -> Result<bool> {
        self.check_writable()?;
        let all_null = self
            .columns
            .iter()
            .all(|c| c.column().row_value(row).is_null());
        if all_null && self.should_ignore_nulls() {
            return Ok(false);
        }
        let entry = Entry::new(self.create_entry_key(row)?, row_id);
        self.remove_entry(&entry)
    }

    /// Validates moving the entry of a row whose values changed. Returns
    /// `None` when the key stays the same.
    pub(crate) fn prepare_update_row(
        &self,
        old_row: &[Value],
        new_row: &[Value],
    ) -> Result<Option<Option<Bytes>>> {
        self.check_writable()?;
        if self.create_entry_key(old_row)? == self.create_entry_key(new_row)? {
            return Ok(None);
        }
        self.prepare_add_row(new_row).map(Some)
    }

    /// Replaces the entry of `old_row` with the prepared `new_key`.
    pub(crate) fn commit_update_row(
        &self,
        old_row: &[Value],
        new_key: Option<Bytes>,
        row_id: RowId,
    ) -> Result<()> {
        self.remove_row_entry(old_row, row_id)?;
        match new_key {
            Some(key) => self.insert_entry(Entry::new(key, row_id)),
            None => Ok(()),
        }
    }

    pub(crate) fn insert_entry(&self, entry: Entry) -> Result<()> {
        self.check_writable()?;
        let _lock = self.write_lock.lock();
        let guard = self.channel.write_guard();

        let (path, mut leaf) = self.find_path(&entry)?;
        let pos = leaf.entries.partition_point(|e| *e < entry);
        if leaf.entries.get(pos) == Some(&entry) {
            return guard.finish();
        }
        leaf.entries.insert(pos, entry);
        self.store(leaf, path)?;

        self.mod_count.fetch_add(1, Ordering::AcqRel);
        guard.finish()
    }

    pub(crate) fn remove_entry(&self, entry: &Entry) -> Result<bool> {
        self.check_writable()?;
        let _lock = self.write_lock.lock();
        let guard = self.channel.write_guard();

        let (mut path, mut page) = self.find_path(entry)?;
        let Ok(pos) = page.entries.binary_search(entry) else {
            log::warn!("{} missing from index data {}", entry, self.number);
            guard.finish()?;
            return Ok(false);
        };
        page.entries.remove(pos);

        loop {
            if page.page_number == self.root_page {
                if !page.leaf && page.is_empty() {
                    page = IndexPage::new_leaf(self.root_page);
                }
                self.write_index_page(&page)?;
                break;
            }
            if !page.is_empty() {
                self.write_index_page(&page)?;
                break;
            }

            self.unlink(&page)?;
            self.free_page(page.page_number)?;
            let step = path.pop().ok_or_else(|| {
                StorageError::corrupt(page.page_number, "index page has no parent")
            })?;
            let mut parent = step.page;
            match step.slot {
                ChildSlot::Entry(i) => {
                    parent.entries.remove(i);
                    parent.children.remove(i);
                }
                ChildSlot::Tail => match parent.children.pop() {
                    Some(child) => {
                        parent.entries.pop();
                        parent.child_tail = child;
                    }
                    None => parent.child_tail = 0,
                },
            }
            page = parent;
        }

        self.mod_count.fetch_add(1, Ordering::AcqRel);
        guard.finish()?;
        Ok(true)
    }

    /// Every entry in order, by walking the leaf level.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let (_, mut leaf) = self.find_path(&Entry::FIRST)?;
        let mut visited = HashSet::new();
        let mut entries = Vec::new();
        loop {
            entries.append(&mut leaf.entries);
            if leaf.next == 0 {
                return Ok(entries);
            }
            if !visited.insert(leaf.page_number) {
                return Err(StorageError::corrupt(leaf.page_number, "cyclic index page links"));
            }
            leaf = self.read_leaf(leaf.next)?;
        }
    }

    /// First entry greater than `after`, with the leaf it sits on.
    pub(crate) fn next_entry_after(&self, after: &Entry) -> Result<Option<(Entry, IndexPage)>> {
        let (_, mut leaf) = self.find_path(after)?;
        let mut visited = HashSet::new();
        loop {
            let pos = leaf.entries.partition_point(|e| e <= after);
            if let Some(entry) = leaf.entries.get(pos) {
                return Ok(Some((entry.clone(), leaf)));
            }
            if leaf.next == 0 {
                return Ok(None);
            }
            if !visited.insert(leaf.page_number) {
                return Err(StorageError::corrupt(leaf.page_number, "cyclic index page links"));
            }
            leaf = self.read_leaf(leaf.next)?;
        }
    }

    /// Last entry less than `before`, with the leaf it sits on.
    pub(crate) fn previous_entry_before(
        &self,
        before: &Entry,
    ) -> Result<Option<(Entry, IndexPage)>> {
        let (_, mut leaf) = self.find_path(before)?;
        let mut visited = HashSet::new();
        loop {
            let pos = leaf.entries.partition_point(|e| e < before);
            if pos > 0 {
                let entry = leaf.entries[pos - 1].clone();
                return Ok(Some((entry, leaf)));
            }
            if leaf.prev == 0 {
                return Ok(None);
            }
            if !visited.insert(leaf.page_number) {
                return Err(StorageError::corrupt(leaf.page_number, "cyclic index page links"));
            }
            leaf = self.read_leaf(leaf.prev)?;
        }
    }

    fn read_index_page(&self, page_number: u32) -> Result<IndexPage> {
        IndexPage::read(&self.channel, page_number)
    }

    fn read_leaf(&self, page_number: u32) -> Result<IndexPage> {
        let page = self.read_index_page(page_number)?;
        if !page.leaf {
            return Err(StorageError::corrupt(page_number, "expected index leaf page"));
        }
        Ok(page)
    }

    fn write_index_page(&self, page: &IndexPage) -> Result<()> {
        let buf = page.encode(self.channel.format(), self.table_def_page)?;
        self.channel.write_page(&buf, page.page_number)
    }

    fn find_path(&self, target: &Entry) -> Result<(Vec<PathStep>, IndexPage)> {
        let mut path = Vec::new();
        let mut page = self.read_index_page(self.root_page)?;
        while !page.leaf {
            if path.len() >= MAX_DEPTH {
                return Err(StorageError::corrupt(self.root_page, "index tree too deep"));
            }
            let (slot, child) = child_for(&page, target)?;
            let next = self.read_index_page(child)?;
            path.push(PathStep { page, slot });
            page = next;
        }
        Ok((path, page))
    }

    fn new_page_number(&self) -> Result<u32> {
        let page_number = self.channel.allocate_page()?;
        self.owned_pages.lock().add_page(&self.channel, page_number)?;
        Ok(page_number)
    }

    fn free_page(&self, page_number: u32) -> Result<()> {
        self.channel.deallocate_page(page_number)?;
        self.owned_pages.lock().remove_page(&self.channel, page_number)
    }

    fn set_prev_link(&self, page_number: u32, prev: u32) -> Result<()> {
        let mut page = self.read_index_page(page_number)?;
        page.prev = prev;
        self.write_index_page(&page)
    }

    fn set_next_link(&self, page_number: u32, next: u32) -> Result<()> {
        let mut page = self.read_index_page(page_number)?;
        page.next = next;
        self.write_index_page(&page)
    }

    fn unlink(&self, page: &IndexPage) -> Result<()> {
        if page.prev != 0 {
            self.set_next_link(page.prev, page.next)?;
        }
        if page.next != 0 {
            self.set_prev_link(page.next, page.prev)?;
        }
        Ok(())
    }

    /// Writes `page`, splitting it and then its ancestors while they
    /// overflow.
    fn store(&self, mut page: IndexPage, mut path: Vec<PathStep>) -> Result<()> {
        let format = self.channel.format();
        loop {
            if page.fits(format) {
                return self.write_index_page(&page);
            }
            if page.page_number == self.root_page {
                return self.split_root(page);
            }

            let step = path
                .pop()
                .ok_or_else(|| StorageError::corrupt(page.page_number, "index page has no parent"))?;
            let upper_number = self.new_page_number()?;
            let old_next = page.next;
            let (upper, bound) = split_page(&mut page, upper_number)?;
            log::debug!(
                "Split index page {} of index data {} into {}",
                page.page_number,
                self.number,
                upper_number
            );
            if old_next != 0 {
                self.set_prev_link(old_next, upper_number)?;
            }
            self.write_index_page(&page)?;
            self.write_index_page(&upper)?;

            let mut parent = step.page;
            match step.slot {
                ChildSlot::Entry(i) => {
                    parent.children[i] = upper_number;
                    parent.entries.insert(i, bound);
                    parent.children.insert(i, page.page_number);
                }
                ChildSlot::Tail => {
                    parent.entries.push(bound);
                    parent.children.push(page.page_number);
                    parent.child_tail = upper_number;
                }
            }
            page = parent;
        }
    }

    /// Moves the root's content into two new children so the root page
    /// number stays put.
    fn split_root(&self, root: IndexPage) -> Result<()> {
        let lower_number = self.new_page_number()?;
        let upper_number = self.new_page_number()?;

        let mut lower = IndexPage {
            page_number: lower_number,
            prev: 0,
            next: 0,
            ..root
        };
        let (upper, bound) = split_page(&mut lower, upper_number)?;
        self.write_index_page(&lower)?;
        self.write_index_page(&upper)?;

        let mut new_root = IndexPage::new_node(self.root_page);
        new_root.entries.push(bound);
        new_root.children.push(lower_number);
        new_root.child_tail = upper_number;
        log::debug!(
            "Split root page {} of index data {} into {} and {}",
            self.root_page,
            self.number,
            lower_number,
            upper_number
        );
        self.write_index_page(&new_root)
    }
}

/// Child to descend into when looking for `target`.
fn child_for(page: &IndexPage, target: &Entry) -> Result<(ChildSlot, u32)> {
    let i = page.entries.partition_point(|e| e < target);
    if let Some(child) = page.children.get(i) {
        return Ok((ChildSlot::Entry(i), *child));
    }
    if page.child_tail != 0 {
        return Ok((ChildSlot::Tail, page.child_tail));
    }
    // nodes written without a tail keep their last child in an entry
    match page.children.last() {
        Some(child) => Ok((ChildSlot::Entry(page.children.len() - 1), *child)),
        None => Err(StorageError::corrupt(page.page_number, "index node page has no children")),
    }
}

/// Splits `page` by size. `page` keeps the lower part; the upper part goes
/// to a new page numbered `upper_number`, linked after it. Returns the new
/// page and the bound of the lower part for the parent.
fn split_page(page: &mut IndexPage, upper_number: u32) -> Result<(IndexPage, Entry)> {
    let len = page.entries.len();
    if len < 2 {
        return Err(StorageError::InvalidState(format!(
            "Index page {} cannot be split",
            page.page_number
        )));
    }

    let total: usize = page.entries.iter().map(Entry::encoded_len).sum();
    let mut running = 0;
    let mut mid = 0;
    for entry in &page.entries {
        running += entry.encoded_len();
        if running > total / 2 {
            break;
        }
        mid += 1;
    }
    let mid = mid.clamp(1, len - 1);

    let mut upper = IndexPage {
        page_number: upper_number,
        leaf: page.leaf,
        prev: page.page_number,
        next: page.next,
        child_tail: 0,
        entries: page.entries.split_off(mid),
        children: Vec::new(),
    };
    page.next = upper_number;

    let bound = if page.leaf {
        page.entries.last().cloned()
    } else {
        upper.children = page.children.split_off(mid);
        upper.child_tail = page.child_tail;
        page.child_tail = page.children.pop().unwrap_or_default();
        page.entries.pop()
    };
    let bound = bound
        .ok_or_else(|| StorageError::InvalidState("Index page split left no bound".to_string()))?;
    Ok((upper, bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowId;

    fn entry(n: u32) -> Entry {
        Entry::new(n.to_be_bytes().to_vec(), RowId::new(n + 1, 0))
    }

    #[test]
    fn test_split_leaf() {
        let mut page = IndexPage::new_leaf(5);
        page.next = 9;
        page.entries = (0..10).map(entry).collect();

        let (upper, bound) = split_page(&mut page, 7).unwrap();
        assert_eq!(page.entries.len(), 5);
        assert_eq!(upper.entries.len(), 5);
        assert_eq!(bound, entry(4));
        assert_eq!((page.next, upper.prev, upper.next), (7, 5, 9));
        assert!(upper.leaf);
    }

    #[test]
    fn test_split_node_moves_bound_to_parent() {
        let mut page = IndexPage::new_node(5);
        page.entries = (0..6).map(entry).collect();
        page.children = (100..106).collect();
        page.child_tail = 200;

        let (upper, bound) = split_page(&mut page, 8).unwrap();
        assert_eq!(bound, entry(2));
        assert_eq!(page.entries, vec![entry(0), entry(1)]);
        assert_eq!(page.children, vec![100, 101]);
        assert_eq!(page.child_tail, 102);
        assert_eq!(upper.entries, vec![entry(3), entry(4), entry(5)]);
        assert_eq!(upper.children, vec![103, 104, 105]);
        assert_eq!(upper.child_tail, 200);
    }

    #[test]
    fn test_child_for() {
        let mut page = IndexPage::new_node(1);
        page.entries = vec![entry(10), entry(20)];
        page.children = vec![2, 3];
        page.child_tail = 4;

        assert_eq!(child_for(&page, &Entry::FIRST).unwrap(), (ChildSlot::Entry(0), 2));
        assert_eq!(child_for(&page, &entry(10)).unwrap(), (ChildSlot::Entry(0), 2));
        assert_eq!(child_for(&page, &entry(15)).unwrap(), (ChildSlot::Entry(1), 3));
        assert_eq!(child_for(&page, &entry(21)).unwrap(), (ChildSlot::Tail, 4));
        assert_eq!(child_for(&page, &Entry::LAST).unwrap(), (ChildSlot::Tail, 4));

        page.child_tail = 0;
        assert_eq!(child_for(&page, &Entry::LAST).unwrap(), (ChildSlot::Entry(1), 3));
        page.children.clear();
        page.entries.clear();
        assert!(child_for(&page, &entry(1)).is_err());
    }
}
