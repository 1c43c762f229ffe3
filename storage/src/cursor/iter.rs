// storage/src/cursor/iter.rs

use super::{Cursor, Pattern};
use crate::row::Row;
use crate::{Result, StorageError};
use jetdb_core::Value;

/// How a [`RowIter`] walks its cursor.
#[derive(Debug, Clone)]
pub struct IterOptions {
    columns: Option<Vec<String>>,
    reset: bool,
    forward: bool,
    pattern: Vec<(String, Value)>,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            columns: None,
            reset: true,
            forward: true,
            pattern: Vec::new(),
        }
    }
}

impl IterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only return these columns.
    pub fn columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Whether to start from the beginning rather than the current
    /// position. Defaults to true.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.forward = false;
        self
    }

    /// Only return rows whose `column` matches `value`.
    pub fn matching(mut self, column: impl Into<String>, value: Value) -> Self {
        self.pattern.push((column.into(), value));
        self
    }
}

/// Iterator over the rows of a cursor. The cursor follows the iterator,
/// so it is left on the last row returned.
pub struct RowIter<'c> {
    cursor: &'c mut Cursor,
    options: IterOptions,
    started: bool,
    done: bool,
    has_valid_row: bool,
}

impl<'c> RowIter<'c> {
    pub(super) fn new(cursor: &'c mut Cursor, options: IterOptions) -> Self {
        Self {
            cursor,
            options,
            started: false,
            done: false,
            has_valid_row: false,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        self.cursor
    }

    /// Deletes the row last returned by `next`.
    pub fn delete_current(&mut self) -> Result<()> {
        if !self.has_valid_row {
            return Err(StorageError::InvalidState(
                "No current row to delete".to_string(),
            ));
        }
        self.has_valid_row = false;
        self.cursor.delete_current_row()
    }

    fn advance(&mut self) -> Result<bool> {
        let forward = self.options.forward;
        if !self.started {
            self.started = true;
            if self.options.reset {
                self.cursor.reset(forward)?;
            }
        }
        if self.options.pattern.is_empty() {
            return self.cursor.move_to_another_row(forward);
        }
        let pattern: Vec<(&str, Value)> = self
            .options
            .pattern
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect();
        self.cursor
            .find_another_row(&Pattern::Row(&pattern), false, forward)
    }

    fn current_row(&mut self) -> Result<Row> {
        let row = self.cursor.current_row()?;
        match &self.options.columns {
            None => Ok(row),
            Some(names) => {
                let id = row.id();
                let columns = row
                    .iter()
                    .filter(|(name, _)| names.iter().any(|n| n.eq_ignore_ascii_case(name)))
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect();
                Ok(Row::new(id, columns))
            }
        }
    }
}

impl Iterator for RowIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.has_valid_row = false;
        match self.advance() {
            Ok(true) => {}
            Ok(false) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        }
        match self.current_row() {
            Ok(row) => {
                self.has_valid_row = true;
                Some(Ok(row))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
