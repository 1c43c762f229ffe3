//! Storage engine for Jet/ACE database files
//!
//! This crate provides the page store, the index sort-key encoder, the
//! index B-tree and the cursor engine, plus the table and catalog layers
//! built on top of them.

pub mod codec;
pub mod column;
pub mod config;
pub mod cursor;
pub mod database;
pub mod file;
pub mod format;
pub mod index;
pub mod page;
pub mod row;
pub mod table;
pub mod usage;

pub use codec::{CodecHandler, CodecProvider, DefaultCodecProvider};
pub use column::Column;
pub use config::DatabaseOptions;
pub use cursor::{
    CaseInsensitiveColumnMatcher, ColumnMatcher, Cursor, CursorId, IterOptions, Position,
    RowIter, Savepoint, SimpleColumnMatcher,
};
pub use database::{Database, DatabaseHeader};
pub use file::PageChannel;
pub use format::{CodecType, FileVersion, JetFormat};
pub use index::{Entry, EntryCursor, Index, IndexData, PartialValue};
pub use page::PageType;
pub use row::{FailingRowErrorHandler, RawValueRowErrorHandler, Row, RowErrorHandler, RowId};
pub use table::Table;
pub use usage::{PageCursor, PagePosition};

pub use jetdb_core::{
    ColumnDefinition, DataType, IndexDefinition, SortOrder, TableSchema, Value,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Corrupt structure on page {page}: {reason}")]
    CorruptStructure { page: u32, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Database is read-only: {0}")]
    ReadOnly(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub(crate) fn corrupt(page: u32, reason: impl Into<String>) -> Self {
        StorageError::CorruptStructure {
            page,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
