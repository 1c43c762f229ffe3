//! Indexes: sort keys, the on-disk B-tree and cursors over its entries.
//!
//! A table has one [`IndexData`] per physical B-tree and one [`Index`] per
//! logical index; several logical indexes (a primary key and a foreign
//! key over the same columns, say) may share one B-tree.

mod cursor;
mod data;
mod entry;
mod page;
pub mod sort_key;
mod text_codes;

pub use cursor::EntryCursor;
pub use data::IndexData;
pub use entry::{Entry, EntryKind};
pub use text_codes::TextSortOrder;

use crate::column::Column;
use jetdb_core::Value;
use std::fmt;
use std::sync::Arc;

/// Column flag: ascending sort.
pub const ASCENDING_COLUMN_FLAG: u8 = 0x01;

pub const UNIQUE_INDEX_FLAG: u8 = 0x01;
pub const IGNORE_NULLS_INDEX_FLAG: u8 = 0x02;
pub const REQUIRED_INDEX_FLAG: u8 = 0x08;
/// Set on every index written by Access.
pub const UNKNOWN_INDEX_FLAG: u8 = 0x80;

pub const PRIMARY_KEY_INDEX_TYPE: u8 = 0x01;
pub const FOREIGN_KEY_INDEX_TYPE: u8 = 0x02;

/// Most columns an index may cover.
pub const MAX_INDEX_COLUMNS: usize = 10;
/// Marks an unused column slot in an index definition.
pub const COLUMN_UNUSED: u16 = 0xFFFF;

/// A value of a search row. `Min` and `Max` stand for "any value" in
/// trailing index columns and sort before / after every real value.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialValue {
    Min,
    Max,
    Value(Value),
}

impl From<Value> for PartialValue {
    fn from(value: Value) -> Self {
        PartialValue::Value(value)
    }
}

impl PartialValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PartialValue::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// One column of an index.
#[derive(Debug, Clone)]
pub struct IndexColumn {
    column: Column,
    flags: u8,
}

impl IndexColumn {
    pub fn new(column: Column, flags: u8) -> Self {
        Self { column, flags }
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn name(&self) -> &str {
        self.column.name()
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_ascending(&self) -> bool {
        self.flags & ASCENDING_COLUMN_FLAG != 0
    }
}

/// Relationship data stored with foreign key indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReference {
    pub other_index_number: u32,
    pub other_table_page: u32,
    pub is_primary_table: bool,
    pub cascade_updates: bool,
    pub cascade_deletes: bool,
}

/// A named index of a table, backed by an [`IndexData`].
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    index_number: u32,
    index_type: u8,
    reference: Option<IndexReference>,
    data: Arc<IndexData>,
}

impl Index {
    pub(crate) fn new(
        name: String,
        index_number: u32,
        index_type: u8,
        reference: Option<IndexReference>,
        data: Arc<IndexData>,
    ) -> Self {
        Self {
            name,
            index_number,
            index_type,
            reference,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_number(&self) -> u32 {
        self.index_number
    }

    pub fn index_type(&self) -> u8 {
        self.index_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.index_type == PRIMARY_KEY_INDEX_TYPE
    }

    pub fn is_foreign_key(&self) -> bool {
        self.index_type == FOREIGN_KEY_INDEX_TYPE
    }

    pub fn reference(&self) -> Option<&IndexReference> {
        self.reference.as_ref()
    }

    pub fn data(&self) -> &Arc<IndexData> {
        &self.data
    }

    pub fn columns(&self) -> &[IndexColumn] {
        self.data.columns()
    }

    pub fn is_unique(&self) -> bool {
        self.data.is_unique()
    }

    pub fn should_ignore_nulls(&self) -> bool {
        self.data.should_ignore_nulls()
    }

    pub fn is_required(&self) -> bool {
        self.data.is_required()
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.name)?;
        for (i, column) in self.columns().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", column.name())?;
            if !column.is_ascending() {
                write!(f, " DESC")?;
            }
        }
        write!(f, ")")
    }
}
