// storage/src/cursor/mod.rs

//! Cursors walk the rows of a table, either in storage order or in the
//! order of one of its indexes.
//!
//! A cursor has a current and a previous position. Positions are row ids
//! for table scans and index entries for index cursors; two boundary
//! positions sit before the first and after the last row. Moves are driven
//! by a [`Direction`] record, so each traversal is written once for both
//! ways.
//!
//! Cursors do not lock anything. When a move hits the end, the cursor
//! checks whether the table changed since it last looked and, if so,
//! steps back to its previous position and tries again. This is how a
//! cursor sees rows other cursors added or removed.

mod iter;
mod matcher;

pub use iter::{IterOptions, RowIter};
pub use matcher::{CaseInsensitiveColumnMatcher, ColumnMatcher, SimpleColumnMatcher};

use crate::index::{Entry, EntryCursor, Index, PartialValue};
use crate::row::{Row, RowId};
use crate::table::Table;
use crate::{Result, StorageError};
use jetdb_core::Value;
use std::fmt;
use std::sync::Arc;

/// Identifies what a cursor walks: a table, optionally through an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId {
    table_def_page: u32,
    index_number: Option<u32>,
}

impl CursorId {
    pub fn table_def_page(&self) -> u32 {
        self.table_def_page
    }

    pub fn index_number(&self) -> Option<u32> {
        self.index_number
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Position {
    Row(RowId),
    Entry(Entry),
}

impl Position {
    pub fn row_id(&self) -> RowId {
        match self {
            Position::Row(row_id) => *row_id,
            Position::Entry(entry) => entry.row_id(),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Row(row_id) => write!(f, "{}", row_id),
            Position::Entry(entry) => write!(f, "{}", entry),
        }
    }
}

/// A saved cursor position, restorable on the cursor it came from or on
/// another cursor with the same [`CursorId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Savepoint {
    cursor_id: CursorId,
    current: Position,
    previous: Position,
}

impl Savepoint {
    pub fn cursor_id(&self) -> CursorId {
        self.cursor_id
    }

    pub fn current_position(&self) -> &Position {
        &self.current
    }

    pub fn previous_position(&self) -> &Position {
        &self.previous
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    BeforeFirst,
    AfterLast,
}

/// Where a traversal starts and stops for one direction.
#[derive(Debug)]
struct Direction {
    forward: bool,
    beginning: Boundary,
    end: Boundary,
}

static FORWARD: Direction = Direction {
    forward: true,
    beginning: Boundary::BeforeFirst,
    end: Boundary::AfterLast,
};

static REVERSE: Direction = Direction {
    forward: false,
    beginning: Boundary::AfterLast,
    end: Boundary::BeforeFirst,
};

fn direction(forward: bool) -> &'static Direction {
    if forward {
        &FORWARD
    } else {
        &REVERSE
    }
}

// text uniqueness is case-insensitive, so lookups through unique indexes
// are too
fn default_matcher(index: Option<&Index>) -> Arc<dyn ColumnMatcher> {
    match index {
        Some(index) if index.is_unique() => Arc::new(CaseInsensitiveColumnMatcher),
        _ => Arc::new(SimpleColumnMatcher),
    }
}

#[derive(Debug)]
enum Scan {
    /// Storage order; `mod_count` is the table's at the last step.
    Table { mod_count: u64 },
    Index { index: Index, entries: EntryCursor },
}

/// What a search compares rows against.
pub(crate) enum Pattern<'a> {
    Column(&'a str, &'a Value),
    Row(&'a [(&'a str, Value)]),
}

#[derive(Debug)]
struct CachedRow {
    row_id: RowId,
    mod_count: u64,
    values: Option<Vec<Value>>,
}

#[derive(Debug)]
pub struct Cursor {
    table: Arc<Table>,
    id: CursorId,
    scan: Scan,
    cur: Position,
    prev: Position,
    row: Option<CachedRow>,
    matcher: Arc<dyn ColumnMatcher>,
}

impl Cursor {
    /// Cursor over the table in storage order.
    pub fn table_scan(table: Arc<Table>) -> Self {
        let id = CursorId {
            table_def_page: table.table_def_page(),
            index_number: None,
        };
        Self {
            id,
            scan: Scan::Table {
                mod_count: table.mod_count(),
            },
            cur: Position::Row(RowId::FIRST),
            prev: Position::Row(RowId::FIRST),
            row: None,
            matcher: default_matcher(None),
            table,
        }
    }

    /// Cursor over the whole of `index`.
    pub fn index_scan(table: Arc<Table>, index: Index) -> Self {
        let entries = index.data().cursor();
        Self::with_entries(table, index, entries)
    }

    /// Cursor over the rows of `index` between two partial keys, given as
    /// values of the leading index columns. A missing bound leaves that
    /// side open.
    pub fn index_range(
        table: Arc<Table>,
        index: Index,
        start: Option<&[Value]>,
        start_inclusive: bool,
        end: Option<&[Value]>,
        end_inclusive: bool,
    ) -> Result<Self> {
        let data = Arc::clone(index.data());
        // Min sorts before every entry sharing the given prefix, Max after
        let filler = |before_prefix: bool| {
            if before_prefix {
                PartialValue::Min
            } else {
                PartialValue::Max
            }
        };
        let start_row = start
            .map(|values| data.construct_partial_row(filler(start_inclusive), values))
            .transpose()?;
        let end_row = end
            .map(|values| data.construct_partial_row(filler(!end_inclusive), values))
            .transpose()?;
        let entries = data.entry_cursor(
            start_row.as_deref(),
            start_inclusive,
            end_row.as_deref(),
            end_inclusive,
        )?;
        Ok(Self::with_entries(table, index, entries))
    }

    fn with_entries(table: Arc<Table>, index: Index, entries: EntryCursor) -> Self {
        let id = CursorId {
            table_def_page: table.table_def_page(),
            index_number: Some(index.index_number()),
        };
        let matcher = default_matcher(Some(&index));
        let first = Position::Entry(entries.first_bound().clone());
        Self {
            id,
            scan: Scan::Index { index, entries },
            cur: first.clone(),
            prev: first,
            row: None,
            matcher,
            table,
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn index(&self) -> Option<&Index> {
        match &self.scan {
            Scan::Index { index, .. } => Some(index),
            Scan::Table { .. } => None,
        }
    }

    pub fn current_position(&self) -> &Position {
        &self.cur
    }

    pub fn previous_position(&self) -> &Position {
        &self.prev
    }

    pub fn column_matcher(&self) -> &Arc<dyn ColumnMatcher> {
        &self.matcher
    }

    /// Replaces the matcher used by searches. `None` restores the default.
    pub fn set_column_matcher(&mut self, matcher: Option<Arc<dyn ColumnMatcher>>) {
        self.matcher = matcher.unwrap_or_else(|| default_matcher(self.index()));
    }

    fn boundary(&self, boundary: Boundary) -> Position {
        match (&self.scan, boundary) {
            (Scan::Table { .. }, Boundary::BeforeFirst) => Position::Row(RowId::FIRST),
            (Scan::Table { .. }, Boundary::AfterLast) => Position::Row(RowId::LAST),
            (Scan::Index { entries, .. }, Boundary::BeforeFirst) => {
                Position::Entry(entries.first_bound().clone())
            }
            (Scan::Index { entries, .. }, Boundary::AfterLast) => {
                Position::Entry(entries.last_bound().clone())
            }
        }
    }

    /// False when rows were added, changed or removed since the last step.
    pub fn is_up_to_date(&self) -> bool {
        match &self.scan {
            Scan::Table { mod_count } => *mod_count == self.table.mod_count(),
            Scan::Index { entries, .. } => entries.is_up_to_date(),
        }
    }

    /// Moves to the beginning of `forward`'s direction.
    pub fn reset(&mut self, forward: bool) -> Result<()> {
        let beginning = self.boundary(direction(forward).beginning);
        self.restore_position(beginning.clone(), beginning)
    }

    pub fn before_first(&mut self) -> Result<()> {
        self.reset(true)
    }

    pub fn after_last(&mut self) -> Result<()> {
        self.reset(false)
    }

    pub fn is_before_first(&mut self) -> Result<bool> {
        self.is_at_beginning(true)
    }

    pub fn is_after_last(&mut self) -> Result<bool> {
        self.is_at_beginning(false)
    }

    fn is_at_beginning(&mut self, forward: bool) -> Result<bool> {
        if self.cur == self.boundary(direction(forward).beginning) {
            return Ok(!self.recheck_position(!forward)?);
        }
        Ok(false)
    }

    /// After a change to the table, steps back to the previous position
    /// and reports whether a row now lies in `forward`'s direction.
    fn recheck_position(&mut self, forward: bool) -> Result<bool> {
        if self.is_up_to_date() {
            return Ok(false);
        }
        let prev = self.prev.clone();
        let cur = self.cur.clone();
        self.restore_position(prev, cur)?;
        self.has_another_row(forward)
    }

    fn has_another_row(&mut self, forward: bool) -> Result<bool> {
        let (cur, prev) = (self.cur.clone(), self.prev.clone());
        let moved = self.move_to_another_row(forward);
        self.restore_position(cur, prev)?;
        moved
    }

    pub fn move_to_next_row(&mut self) -> Result<bool> {
        self.move_to_another_row(true)
    }

    pub fn move_to_previous_row(&mut self) -> Result<bool> {
        self.move_to_another_row(false)
    }

    /// Moves one row in the given direction. Returns false when the end
    /// of that direction was reached instead.
    pub fn move_to_another_row(&mut self, forward: bool) -> Result<bool> {
        let end = self.boundary(direction(forward).end);
        if self.cur == end {
            if self.is_up_to_date() {
                return Ok(false);
            }
            // rows may have appeared past the old end
            let prev = self.prev.clone();
            let cur = self.cur.clone();
            self.restore_position(prev, cur)?;
        }

        self.row = None;
        let next = self.find_another_position(forward)?;
        self.prev = std::mem::replace(&mut self.cur, next);
        Ok(self.cur != end)
    }

    /// Moves up to `count` rows forward, returning how many moves
    /// succeeded.
    pub fn move_next_rows(&mut self, count: usize) -> Result<usize> {
        self.move_rows(count, true)
    }

    pub fn move_previous_rows(&mut self, count: usize) -> Result<usize> {
        self.move_rows(count, false)
    }

    fn move_rows(&mut self, count: usize, forward: bool) -> Result<usize> {
        let mut moved = 0;
        while moved < count && self.move_to_another_row(forward)? {
            moved += 1;
        }
        Ok(moved)
    }

    fn find_another_position(&mut self, forward: bool) -> Result<Position> {
        match &mut self.scan {
            Scan::Table { mod_count } => {
                *mod_count = self.table.mod_count();
                let from = self.cur.row_id();
                let row_id = if forward {
                    self.table.next_row_id(from)?
                } else {
                    self.table.previous_row_id(from)?
                };
                Ok(Position::Row(row_id))
            }
            Scan::Index { entries, .. } => {
                let entry = if forward {
                    entries.next_entry()?
                } else {
                    entries.previous_entry()?
                };
                Ok(Position::Entry(entry))
            }
        }
    }

    /// Puts the cursor at `cur`, with `prev` as the previous position.
    pub fn restore_position(&mut self, cur: Position, prev: Position) -> Result<()> {
        self.row = None;
        match (&mut self.scan, cur, prev) {
            (Scan::Table { .. }, cur @ Position::Row(_), prev @ Position::Row(_)) => {
                self.cur = cur;
                self.prev = prev;
                Ok(())
            }
            (Scan::Index { entries, .. }, Position::Entry(cur), Position::Entry(prev)) => {
                entries.restore_position(cur, prev);
                self.cur = Position::Entry(entries.current().clone());
                self.prev = Position::Entry(entries.previous().clone());
                Ok(())
            }
            (_, cur, _) => Err(StorageError::InvalidArgument(format!(
                "Position {} does not belong to cursor {:?}",
                cur, self.id
            ))),
        }
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            cursor_id: self.id,
            current: self.cur.clone(),
            previous: self.prev.clone(),
        }
    }

    pub fn restore_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        if savepoint.cursor_id != self.id {
            return Err(StorageError::InvalidArgument(format!(
                "Savepoint of cursor {:?} cannot be restored on cursor {:?}",
                savepoint.cursor_id, self.id
            )));
        }
        self.restore_position(savepoint.current.clone(), savepoint.previous.clone())
    }

    fn current_row_id(&self) -> Result<RowId> {
        let row_id = self.cur.row_id();
        if !row_id.is_valid() {
            return Err(StorageError::InvalidState(
                "Cursor is not positioned on a row".to_string(),
            ));
        }
        Ok(row_id)
    }

    /// Values of the current row, `None` when it was deleted. Cached until
    /// the cursor moves or the table changes.
    fn current_values(&mut self) -> Result<Option<Vec<Value>>> {
        let row_id = self.current_row_id()?;
        let mod_count = self.table.mod_count();
        if let Some(cached) = &self.row {
            if cached.row_id == row_id && cached.mod_count == mod_count {
                return Ok(cached.values.clone());
            }
        }
        let values = self.table.read_row_values(row_id)?;
        self.row = Some(CachedRow {
            row_id,
            mod_count,
            values: values.clone(),
        });
        Ok(values)
    }

    fn require_current_values(&mut self) -> Result<Vec<Value>> {
        self.current_values()?.ok_or_else(|| {
            StorageError::InvalidState(format!("Current row {} was deleted", self.cur.row_id()))
        })
    }

    pub fn is_current_row_deleted(&self) -> Result<bool> {
        self.table.is_row_deleted(self.current_row_id()?)
    }

    pub fn current_row(&mut self) -> Result<Row> {
        let values = self.require_current_values()?;
        Ok(self.table.to_row(self.cur.row_id(), values))
    }

    pub fn current_row_value(&mut self, column_name: &str) -> Result<Value> {
        let index = self.table.column(column_name)?.index();
        let values = self.require_current_values()?;
        Ok(values.get(index).cloned().unwrap_or(Value::Null))
    }

    pub fn update_current_row(&mut self, values: Vec<Value>) -> Result<()> {
        let row_id = self.current_row_id()?;
        self.row = None;
        self.table.update_row(row_id, values)
    }

    pub fn set_current_row_value(&mut self, column_name: &str, value: Value) -> Result<()> {
        let column = self.table.column(column_name)?.clone();
        let mut values = self.require_current_values()?;
        column.set_row_value(&mut values, value);
        self.update_current_row(values)
    }

    pub fn delete_current_row(&mut self) -> Result<()> {
        let row_id = self.current_row_id()?;
        self.row = None;
        self.table.delete_row(row_id)
    }

    /// Moves forward and returns the row reached, if any.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.move_to_next_row()? {
            self.current_row().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn previous_row(&mut self) -> Result<Option<Row>> {
        if self.move_to_previous_row()? {
            self.current_row().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Moves to the first row whose `column_name` matches `value`. The
    /// position is unchanged when there is none.
    pub fn find_first_row(&mut self, column_name: &str, value: &Value) -> Result<bool> {
        self.find_another_row(&Pattern::Column(column_name, value), true, true)
    }

    /// Like [`Cursor::find_first_row`], starting after the current row.
    pub fn find_next_row(&mut self, column_name: &str, value: &Value) -> Result<bool> {
        self.find_another_row(&Pattern::Column(column_name, value), false, true)
    }

    /// Moves to the first row matching every column of `pattern`.
    pub fn find_first_row_by_pattern(&mut self, pattern: &[(&str, Value)]) -> Result<bool> {
        self.find_another_row(&Pattern::Row(pattern), true, true)
    }

    pub fn find_next_row_by_pattern(&mut self, pattern: &[(&str, Value)]) -> Result<bool> {
        self.find_another_row(&Pattern::Row(pattern), false, true)
    }

    pub(crate) fn find_another_row(
        &mut self,
        pattern: &Pattern<'_>,
        reset: bool,
        forward: bool,
    ) -> Result<bool> {
        let (cur, prev) = (self.cur.clone(), self.prev.clone());
        let found = if reset {
            self.reset(forward)
                .and_then(|_| self.find_another_row_from_here(pattern, forward))
        } else {
            self.find_another_row_from_here(pattern, forward)
        };
        if !matches!(found, Ok(true)) {
            self.restore_after_failed_search(cur, prev);
        }
        found
    }

    fn restore_after_failed_search(&mut self, cur: Position, prev: Position) {
        if let Err(e) = self.restore_position(cur, prev) {
            log::error!("Failed restoring cursor position: {}", e);
        }
    }

    fn find_another_row_from_here(&mut self, pattern: &Pattern<'_>, forward: bool) -> Result<bool> {
        if forward {
            if let Some(search_row) = self.index_search_row(pattern) {
                if self.is_at_beginning(forward)? {
                    return self.find_with_index(pattern, &search_row, forward);
                }
            }
        }

        while self.move_to_another_row(forward)? {
            if self.current_row_matches(pattern)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Partial index row for the part of `pattern` covering the leading
    /// index columns, when this cursor's index can narrow the search.
    fn index_search_row(&self, pattern: &Pattern<'_>) -> Option<Vec<PartialValue>> {
        let Scan::Index { index, .. } = &self.scan else {
            return None;
        };
        let data = index.data();
        if data.unsupported_reason().is_some() {
            return None;
        }
        match pattern {
            Pattern::Column(name, value) => {
                data.construct_partial_row_from_pattern(PartialValue::Min, &[(*name, (*value).clone())])
            }
            Pattern::Row(row) => data.construct_partial_row_from_pattern(PartialValue::Min, row),
        }
    }

    fn find_with_index(
        &mut self,
        pattern: &Pattern<'_>,
        search_row: &[PartialValue],
        forward: bool,
    ) -> Result<bool> {
        match pattern {
            Pattern::Column(..) => {
                if !self.find_potential_row(search_row, true)? {
                    return Ok(false);
                }
                self.current_row_matches(pattern)
            }
            Pattern::Row(_) => {
                if !self.find_potential_row(search_row, false)? {
                    return Ok(false);
                }
                loop {
                    if !self.keep_searching(search_row)? {
                        return Ok(false);
                    }
                    if self.current_row_matches(pattern)? {
                        return Ok(true);
                    }
                    if !self.move_to_another_row(forward)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Moves to the first entry at or after `search_row`. With
    /// `require_match`, fails when no entry follows.
    fn find_potential_row(&mut self, search_row: &[PartialValue], require_match: bool) -> Result<bool> {
        let Scan::Index { entries, .. } = &mut self.scan else {
            return Ok(false);
        };
        entries.before_entry(search_row)?;
        let start = entries.next_entry()?;
        if require_match && !start.row_id().is_valid() {
            return Ok(false);
        }
        let cur = self.cur.clone();
        self.restore_position(Position::Entry(start), cur)?;
        Ok(true)
    }

    /// True while the current row still matches the leading index columns
    /// given in `search_row`.
    fn keep_searching(&mut self, search_row: &[PartialValue]) -> Result<bool> {
        self.current_row_matches_entry(search_row)
    }

    fn current_row_matches_entry(&mut self, search_row: &[PartialValue]) -> Result<bool> {
        if !self.cur.row_id().is_valid() {
            return Ok(false);
        }
        let Some(values) = self.current_values()? else {
            return Ok(false);
        };
        let Scan::Index { index, .. } = &self.scan else {
            return Ok(false);
        };
        for column in index.columns() {
            let pattern = match search_row.get(column.column().index()) {
                Some(PartialValue::Value(value)) => value,
                // the remaining columns are open
                Some(PartialValue::Min | PartialValue::Max) | None => return Ok(true),
            };
            let value = column.column().row_value(&values);
            if !self.matcher.matches(&self.table, column.name(), pattern, value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn current_row_matches(&mut self, pattern: &Pattern<'_>) -> Result<bool> {
        if !self.cur.row_id().is_valid() {
            return Ok(false);
        }
        let Some(values) = self.current_values()? else {
            return Ok(false);
        };
        let matches = |name: &str, expected: &Value| -> Result<bool> {
            let column = self.table.column(name)?;
            let value = column.row_value(&values);
            Ok(self.matcher.matches(&self.table, column.name(), expected, value))
        };
        match pattern {
            Pattern::Column(name, value) => matches(*name, *value),
            Pattern::Row(row) => {
                for (name, value) in row.iter() {
                    if !matches(*name, value)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn entry_search_row(&self, values: &[Value]) -> Result<Vec<PartialValue>> {
        match &self.scan {
            Scan::Index { index, .. } => index.data().construct_partial_row(PartialValue::Min, values),
            Scan::Table { .. } => Err(StorageError::InvalidArgument(
                "Entry lookups need an index cursor".to_string(),
            )),
        }
    }

    /// Moves to the first row whose leading index columns equal `values`.
    /// The position is unchanged when there is none.
    pub fn find_first_row_by_entry(&mut self, values: &[Value]) -> Result<bool> {
        let (cur, prev) = (self.cur.clone(), self.prev.clone());
        let found = self.entry_search_row(values).and_then(|row| {
            if !self.find_potential_row(&row, true)? {
                return Ok(false);
            }
            self.current_row_matches_entry(&row)
        });
        if !matches!(found, Ok(true)) {
            self.restore_after_failed_search(cur, prev);
        }
        found
    }

    /// Moves to the first row at or after `values` in index order, or
    /// after the last row when every row sorts before it.
    pub fn find_closest_row_by_entry(&mut self, values: &[Value]) -> Result<()> {
        let (cur, prev) = (self.cur.clone(), self.prev.clone());
        let result = self
            .entry_search_row(values)
            .and_then(|row| self.find_potential_row(&row, false))
            .map(|_| ());
        if result.is_err() {
            self.restore_after_failed_search(cur, prev);
        }
        result
    }

    /// Iterates all rows forward from the start.
    pub fn iter(&mut self) -> RowIter<'_> {
        RowIter::new(self, IterOptions::default())
    }

    pub fn iter_with(&mut self, options: IterOptions) -> RowIter<'_> {
        RowIter::new(self, options)
    }
}
