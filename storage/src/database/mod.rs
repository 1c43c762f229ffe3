// storage/src/database/mod.rs

//! Opening and creating database files, and finding their tables.

mod cache;
mod catalog;
mod header;

pub use catalog::{CatalogEntry, CATALOG_TABLE_NAME};
pub use header::DatabaseHeader;

use crate::config::DatabaseOptions;
use crate::file::PageChannel;
use crate::format::JetFormat;
use crate::index::TextSortOrder;
use crate::page::DataPage;
use crate::table::{create_table, Table, TYPE_SYSTEM_TABLE, TYPE_USER_TABLE};
use crate::usage::new_inline_row;
use crate::{Result, StorageError};
use cache::TableCache;
use catalog::{catalog_schema, Catalog, CATALOG_PAGE};
use jetdb_core::{SortOrder, TableSchema};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Database {
    path: PathBuf,
    channel: Arc<PageChannel>,
    header: DatabaseHeader,
    options: DatabaseOptions,
    catalog: Catalog,
    tables: Mutex<TableCache<Table>>,
}

impl Database {
    /// Opens an existing database file.
    pub fn open(path: impl AsRef<Path>, options: DatabaseOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let channel = Arc::new(PageChannel::open(path, options.read_only, options.auto_sync)?);
        let format = channel.format();

        let codec = options
            .codec_provider
            .create_handler(&channel, format.charset)?;
        channel.set_codec(codec);

        let mut page = vec![0u8; format.page_size];
        channel.read_page(&mut page, 0)?;
        let header = DatabaseHeader::parse(format, &page)?;

        let catalog_table = Arc::new(Table::read(
            Arc::clone(&channel),
            CATALOG_TABLE_NAME.to_string(),
            CATALOG_PAGE,
            Arc::clone(&options.row_error_handler),
        )?);
        let catalog = Catalog::load(Arc::clone(&catalog_table))?;
        if catalog.uses_fallback() {
            log::debug!("{:?} has no usable catalog index", path);
        }

        log::info!(
            "Opened database {:?} ({}, read_only={})",
            path,
            format,
            channel.is_read_only()
        );
        Ok(Self::assemble(path, channel, header, options, catalog, catalog_table))
    }

    /// Creates a new, empty database file. Fails if the file exists.
    pub fn create(path: impl AsRef<Path>, options: DatabaseOptions) -> Result<Self> {
        Self::create_with_catalog(path.as_ref(), options, catalog_schema())
    }

    fn create_with_catalog(
        path: &Path,
        options: DatabaseOptions,
        catalog_schema: TableSchema,
    ) -> Result<Self> {
        options.validate()?;
        if options.read_only {
            return Err(StorageError::Configuration(
                "Cannot create a database read-only".to_string(),
            ));
        }
        let format = JetFormat::for_version(options.file_version);
        let sort_order = options.sort_order.unwrap_or(format.default_sort_order);
        if TextSortOrder::for_column(sort_order, format).is_none() {
            return Err(StorageError::Configuration(format!(
                "New databases need a general sort order, not {}",
                sort_order
            )));
        }
        let channel = Arc::new(PageChannel::create_new(path, format, options.auto_sync)?);

        let created = chrono::Local::now().naive_local();
        let header_page = DatabaseHeader::new_page(format, sort_order, None, &created)?;
        let header = DatabaseHeader::parse(format, &header_page)?;

        let guard = channel.write_guard();
        channel.append_page(&header_page)?;

        // page 1 holds the global usage map
        let mut map_page = DataPage::new(vec![0u8; format.page_size], format);
        map_page.init(0);
        map_page
            .add_record(&new_inline_row(format), 0)
            .ok_or_else(|| StorageError::InvalidState("Global usage map does not fit".to_string()))?;
        channel.append_page(&map_page.into_inner())?;

        let schema = with_sort_order(&catalog_schema, sort_order);
        let catalog_table = Arc::new(create_table(
            &channel,
            &schema,
            TYPE_SYSTEM_TABLE,
            Arc::clone(&options.row_error_handler),
        )?);
        let catalog = Catalog::initialize(Arc::clone(&catalog_table))?;
        guard.finish()?;

        log::info!("Created database {:?} ({})", path, format);
        Ok(Self::assemble(path, channel, header, options, catalog, catalog_table))
    }

    fn assemble(
        path: &Path,
        channel: Arc<PageChannel>,
        header: DatabaseHeader,
        options: DatabaseOptions,
        catalog: Catalog,
        catalog_table: Arc<Table>,
    ) -> Self {
        let mut tables = TableCache::new(options.table_cache_capacity);
        tables.insert(CATALOG_PAGE, catalog_table);
        Self {
            path: path.to_path_buf(),
            channel,
            header,
            options,
            catalog,
            tables: Mutex::new(tables),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &'static JetFormat {
        self.channel.format()
    }

    pub fn channel(&self) -> &Arc<PageChannel> {
        &self.channel
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn is_read_only(&self) -> bool {
        self.channel.is_read_only()
    }

    pub fn password(&self) -> Option<&str> {
        self.header.password.as_deref()
    }

    pub fn sort_order(&self) -> SortOrder {
        self.header.sort_order
    }

    pub fn code_page(&self) -> u16 {
        self.header.code_page
    }

    /// True when table lookups scan the catalog instead of using its
    /// name index.
    pub fn uses_catalog_fallback(&self) -> bool {
        self.catalog.uses_fallback()
    }

    /// Names of the user tables in catalog order.
    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .catalog
            .table_entries()?
            .into_iter()
            .filter(|e| !e.is_system())
            .map(|e| e.name)
            .collect())
    }

    pub fn system_table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .catalog
            .table_entries()?
            .into_iter()
            .filter(CatalogEntry::is_system)
            .map(|e| e.name)
            .collect())
    }

    /// Looks a table up by name, ignoring case.
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        let entry = self
            .catalog
            .find_table(name)?
            .ok_or_else(|| StorageError::NotFound(format!("Table {}", name)))?;
        self.load_table(&entry)
    }

    fn load_table(&self, entry: &CatalogEntry) -> Result<Arc<Table>> {
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(entry.table_def_page) {
            return Ok(table);
        }
        let table = Arc::new(Table::read(
            Arc::clone(&self.channel),
            entry.name.clone(),
            entry.table_def_page,
            Arc::clone(&self.options.row_error_handler),
        )?);
        tables.insert(entry.table_def_page, Arc::clone(&table));
        Ok(table)
    }

    /// Creates an empty user table and lists it in the catalog.
    pub fn create_table(&self, schema: &TableSchema) -> Result<Arc<Table>> {
        if self.is_read_only() {
            return Err(StorageError::ReadOnly(
                "Database was opened read-only".to_string(),
            ));
        }
        self.validate_names(schema)?;
        if self.catalog.find_table(&schema.name)?.is_some() {
            return Err(StorageError::InvalidArgument(format!(
                "Table {} already exists",
                schema.name
            )));
        }

        let schema = with_sort_order(schema, self.sort_order());
        let guard = self.channel.write_guard();
        let table = Arc::new(create_table(
            &self.channel,
            &schema,
            TYPE_USER_TABLE,
            Arc::clone(&self.options.row_error_handler),
        )?);
        self.catalog
            .add_table(&schema.name, table.table_def_page(), false)?;
        guard.finish()?;

        self.tables
            .lock()
            .insert(table.table_def_page(), Arc::clone(&table));
        log::info!("Created table {} at page {}", schema.name, table.table_def_page());
        Ok(table)
    }

    fn validate_names(&self, schema: &TableSchema) -> Result<()> {
        let max = self.format().max_name_length;
        let names = std::iter::once(&schema.name)
            .chain(schema.columns.iter().map(|c| &c.name))
            .chain(schema.indexes.iter().map(|i| &i.name));
        for name in names {
            if name.chars().count() > max {
                return Err(StorageError::InvalidArgument(format!(
                    "Name {} is longer than {} characters",
                    name, max
                )));
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.channel.flush()
    }

    pub fn close(self) -> Result<()> {
        self.tables.lock().clear();
        if !self.is_read_only() {
            self.channel.flush()?;
        }
        log::debug!("Closed database {:?}", self.path);
        Ok(())
    }
}

/// Text columns without their own sort order take the database's.
fn with_sort_order(schema: &TableSchema, sort_order: SortOrder) -> TableSchema {
    let mut schema = schema.clone();
    for column in &mut schema.columns {
        if column.data_type.is_textual() && column.sort_order.is_none() {
            column.sort_order = Some(sort_order);
        }
    }
    schema
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("format", &self.format().version)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FileVersion;
    use jetdb_core::{ColumnDefinition, DataType, IndexDefinition};
    use tempfile::tempdir;

    fn people() -> TableSchema {
        TableSchema::new("People")
            .add_column(ColumnDefinition::new("Id", DataType::Long))
            .add_column(ColumnDefinition::new("Name", DataType::Text))
            .add_index(IndexDefinition::new("PrimaryKey").column("Id").primary_key())
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.accdb");

        let db = Database::create(&path, DatabaseOptions::new()).unwrap();
        assert_eq!(db.format().version, FileVersion::Version4);
        assert_eq!(db.password(), None);
        assert_eq!(db.system_table_names().unwrap(), vec![CATALOG_TABLE_NAME.to_string()]);
        assert!(db.table_names().unwrap().is_empty());
        assert!(!db.uses_catalog_fallback());

        db.create_table(&people()).unwrap();
        db.close().unwrap();

        let db = Database::open(&path, DatabaseOptions::new().read_only(true)).unwrap();
        assert_eq!(db.table_names().unwrap(), vec!["People".to_string()]);
        assert_eq!(db.table("people").unwrap().name(), "People");
        assert!(matches!(db.table("Nobody"), Err(StorageError::NotFound(_))));
        assert!(matches!(
            db.create_table(&people()),
            Err(StorageError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_duplicate_table_names() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("dup.accdb"), DatabaseOptions::new()).unwrap();
        db.create_table(&people()).unwrap();
        let again = TableSchema::new("PEOPLE").add_column(ColumnDefinition::new("Id", DataType::Long));
        assert!(matches!(
            db.create_table(&again),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_same_table_instance_while_referenced() {
        let dir = tempdir().unwrap();
        let options = DatabaseOptions::new().table_cache_capacity(1);
        let db = Database::create(dir.path().join("cache.accdb"), options).unwrap();
        let created = db.create_table(&people()).unwrap();
        db.create_table(&TableSchema::new("Other").add_column(ColumnDefinition::new("X", DataType::Long)))
            .unwrap();

        let looked_up = db.table("People").unwrap();
        assert!(Arc::ptr_eq(&created, &looked_up));
    }

    #[test]
    fn test_catalog_without_name_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.accdb");
        let mut schema = catalog_schema();
        schema.indexes.clear();

        let db = Database::create_with_catalog(&path, DatabaseOptions::new(), schema).unwrap();
        assert!(db.uses_catalog_fallback());
        db.create_table(&people()).unwrap();
        assert_eq!(db.table("PEOPLE").unwrap().name(), "People");
        assert!(matches!(db.table("Missing"), Err(StorageError::NotFound(_))));
        db.close().unwrap();

        let db = Database::open(&path, DatabaseOptions::new()).unwrap();
        assert!(db.uses_catalog_fallback());
        assert_eq!(db.table_names().unwrap(), vec!["People".to_string()]);
    }

    #[test]
    fn test_unsupported_sort_order_for_new_database() {
        let dir = tempdir().unwrap();
        let options = DatabaseOptions::new().sort_order(SortOrder::new(1036, 0));
        assert!(matches!(
            Database::create(dir.path().join("fr.mdb"), options),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_new_database_sort_order() {
        let dir = tempdir().unwrap();
        let options = DatabaseOptions::new()
            .file_version(FileVersion::Version14)
            .sort_order(SortOrder::GENERAL);
        let db = Database::create(dir.path().join("sorted.accdb"), options).unwrap();
        assert_eq!(db.sort_order(), SortOrder::GENERAL);

        let table = db.create_table(&people()).unwrap();
        assert_eq!(table.column("Name").unwrap().sort_order(), Some(SortOrder::GENERAL));
    }
}
