// storage/src/config/mod.rs

//! Options for opening and creating databases.

use crate::codec::{CodecProvider, DefaultCodecProvider};
use crate::format::FileVersion;
use crate::row::{FailingRowErrorHandler, RowErrorHandler};
use crate::{Result, StorageError};
use jetdb_core::SortOrder;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_TABLE_CACHE_CAPACITY: usize = 64;

/// Settings shared by [`crate::Database::open`] and
/// [`crate::Database::create`]. Built with chained setters:
///
/// ```ignore
/// let options = DatabaseOptions::new().read_only(true).table_cache_capacity(16);
/// ```
#[derive(Clone)]
pub struct DatabaseOptions {
    pub(crate) read_only: bool,
    pub(crate) auto_sync: bool,
    pub(crate) table_cache_capacity: usize,
    pub(crate) codec_provider: Arc<dyn CodecProvider>,
    pub(crate) row_error_handler: Arc<dyn RowErrorHandler>,
    pub(crate) sort_order: Option<SortOrder>,
    pub(crate) file_version: FileVersion,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            auto_sync: true,
            table_cache_capacity: DEFAULT_TABLE_CACHE_CAPACITY,
            codec_provider: Arc::new(DefaultCodecProvider),
            row_error_handler: Arc::new(FailingRowErrorHandler),
            sort_order: None,
            file_version: FileVersion::Version4,
        }
    }
}

impl DatabaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Flush the file after every completed write. On by default.
    pub fn auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Number of unreferenced tables kept loaded.
    pub fn table_cache_capacity(mut self, capacity: usize) -> Self {
        self.table_cache_capacity = capacity;
        self
    }

    pub fn codec_provider(mut self, provider: Arc<dyn CodecProvider>) -> Self {
        self.codec_provider = provider;
        self
    }

    pub fn row_error_handler(mut self, handler: Arc<dyn RowErrorHandler>) -> Self {
        self.row_error_handler = handler;
        self
    }

    /// Sort order stored in new databases and used for their text columns.
    /// Defaults to the format's.
    pub fn sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    /// Format of new databases.
    pub fn file_version(mut self, version: FileVersion) -> Self {
        self.file_version = version;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_auto_sync(&self) -> bool {
        self.auto_sync
    }

    pub fn get_table_cache_capacity(&self) -> usize {
        self.table_cache_capacity
    }

    pub fn get_file_version(&self) -> FileVersion {
        self.file_version
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table_cache_capacity == 0 {
            return Err(StorageError::Configuration(
                "Table cache capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("read_only", &self.read_only)
            .field("auto_sync", &self.auto_sync)
            .field("table_cache_capacity", &self.table_cache_capacity)
            .field("sort_order", &self.sort_order)
            .field("file_version", &self.file_version)
            .finish()
    }
}
