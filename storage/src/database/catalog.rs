// storage/src/database/catalog.rs

//! The system catalog, `MSysObjects`, lists every object of a database.
//! Tables are rows of type 1 below the "Tables" container; the low 24 bits
//! of their id are the table definition page.

use crate::cursor::{CaseInsensitiveColumnMatcher, Cursor, IterOptions};
use crate::index::Index;
use crate::row::Row;
use crate::table::Table;
use crate::{Result, StorageError};
use jetdb_core::{ColumnDefinition, DataType, IndexDefinition, TableSchema, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const CATALOG_TABLE_NAME: &str = "MSysObjects";
pub const CATALOG_PAGE: u32 = 2;
const PARENT_ID_NAME_INDEX: &str = "ParentIdName";
const TABLES_CONTAINER_NAME: &str = "Tables";

const COL_ID: &str = "Id";
const COL_PARENT_ID: &str = "ParentId";
const COL_NAME: &str = "Name";
const COL_TYPE: &str = "Type";
const COL_DATE_CREATE: &str = "DateCreate";
const COL_DATE_UPDATE: &str = "DateUpdate";
const COL_FLAGS: &str = "Flags";

const DB_PARENT_ID: i32 = 0x0F00_0000;
const DEFAULT_TABLES_PARENT_ID: i32 = 0x0F00_0001;
const OBJECT_ID_MASK: i64 = 0x00FF_FFFF;

const TYPE_TABLE: i16 = 1;
const TYPE_CONTAINER: i16 = 3;

const SYSTEM_OBJECT_FLAG: i32 = 0x8000_0000_u32 as i32;
const ALT_SYSTEM_OBJECT_FLAG: i32 = 0x02;
const SYSTEM_OBJECT_FLAGS: i32 = SYSTEM_OBJECT_FLAG | ALT_SYSTEM_OBJECT_FLAG;

pub fn catalog_schema() -> TableSchema {
    TableSchema::new(CATALOG_TABLE_NAME)
        .add_column(ColumnDefinition::new(COL_ID, DataType::Long))
        .add_column(ColumnDefinition::new(COL_PARENT_ID, DataType::Long))
        .add_column(ColumnDefinition::new(COL_NAME, DataType::Text))
        .add_column(ColumnDefinition::new(COL_TYPE, DataType::Int))
        .add_column(ColumnDefinition::new(COL_DATE_CREATE, DataType::ShortDateTime))
        .add_column(ColumnDefinition::new(COL_DATE_UPDATE, DataType::ShortDateTime))
        .add_column(ColumnDefinition::new(COL_FLAGS, DataType::Long))
        .add_index(
            IndexDefinition::new(PARENT_ID_NAME_INDEX)
                .column(COL_PARENT_ID)
                .column(COL_NAME),
        )
}

/// A table listed in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub table_def_page: u32,
    pub flags: i32,
}

impl CatalogEntry {
    pub fn is_system(&self) -> bool {
        self.flags & SYSTEM_OBJECT_FLAGS != 0
    }
}

fn int_value(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

fn table_entry(row: &Row) -> Option<CatalogEntry> {
    if int_value(row, COL_TYPE)? != TYPE_TABLE as i64 {
        return None;
    }
    Some(CatalogEntry {
        name: row.get(COL_NAME)?.as_str()?.to_string(),
        table_def_page: (int_value(row, COL_ID)? & OBJECT_ID_MASK) as u32,
        flags: int_value(row, COL_FLAGS).unwrap_or(0) as i32,
    })
}

#[derive(Debug)]
pub struct Catalog {
    table: Arc<Table>,
    tables_parent_id: i32,
    fallback_logged: AtomicBool,
}

impl Catalog {
    /// Writes the rows a new catalog starts with: the "Tables" container
    /// and the catalog's own entry.
    pub fn initialize(table: Arc<Table>) -> Result<Self> {
        if table.table_def_page() != CATALOG_PAGE {
            return Err(StorageError::InvalidState(format!(
                "Catalog was created at page {} instead of {}",
                table.table_def_page(),
                CATALOG_PAGE
            )));
        }
        let catalog = Self {
            table,
            tables_parent_id: DEFAULT_TABLES_PARENT_ID,
            fallback_logged: AtomicBool::new(false),
        };
        catalog.add_object(
            DEFAULT_TABLES_PARENT_ID,
            DB_PARENT_ID,
            TABLES_CONTAINER_NAME,
            TYPE_CONTAINER,
            0,
        )?;
        catalog.add_table(CATALOG_TABLE_NAME, CATALOG_PAGE, true)?;
        Ok(catalog)
    }

    pub fn load(table: Arc<Table>) -> Result<Self> {
        let mut catalog = Self {
            table,
            tables_parent_id: DEFAULT_TABLES_PARENT_ID,
            fallback_logged: AtomicBool::new(false),
        };
        match catalog.find_object(DB_PARENT_ID, TABLES_CONTAINER_NAME)? {
            Some(row) => {
                if let Some(id) = int_value(&row, COL_ID) {
                    catalog.tables_parent_id = id as i32;
                }
            }
            None => log::warn!(
                "Catalog has no {} container, assuming id 0x{:08X}",
                TABLES_CONTAINER_NAME,
                DEFAULT_TABLES_PARENT_ID
            ),
        }
        Ok(catalog)
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn lookup_index(&self) -> Option<&Index> {
        self.table
            .index(PARENT_ID_NAME_INDEX)
            .ok()
            .filter(|index| index.data().unsupported_reason().is_none())
    }

    /// True when lookups scan the catalog because its name index is
    /// missing or unusable.
    pub fn uses_fallback(&self) -> bool {
        self.lookup_index().is_none()
    }

    fn find_object(&self, parent_id: i32, name: &str) -> Result<Option<Row>> {
        let key = [Value::Long(parent_id), Value::Text(name.to_string())];
        let mut cursor = match self.lookup_index() {
            Some(index) => {
                let mut cursor = Cursor::index_scan(Arc::clone(&self.table), index.clone());
                cursor.set_column_matcher(Some(Arc::new(CaseInsensitiveColumnMatcher)));
                if !cursor.find_first_row_by_entry(&key)? {
                    return Ok(None);
                }
                cursor
            }
            None => {
                if !self.fallback_logged.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "Catalog index {} is unusable, falling back to scanning {}",
                        PARENT_ID_NAME_INDEX,
                        CATALOG_TABLE_NAME
                    );
                }
                let mut cursor = Cursor::table_scan(Arc::clone(&self.table));
                cursor.set_column_matcher(Some(Arc::new(CaseInsensitiveColumnMatcher)));
                let [parent, name] = key;
                if !cursor.find_first_row_by_pattern(&[(COL_PARENT_ID, parent), (COL_NAME, name)])? {
                    return Ok(None);
                }
                cursor
            }
        };
        cursor.current_row().map(Some)
    }

    /// Finds a table by name, ignoring case.
    pub fn find_table(&self, name: &str) -> Result<Option<CatalogEntry>> {
        Ok(self
            .find_object(self.tables_parent_id, name)?
            .as_ref()
            .and_then(table_entry))
    }

    /// All tables in catalog order.
    pub fn table_entries(&self) -> Result<Vec<CatalogEntry>> {
        let mut cursor = Cursor::table_scan(Arc::clone(&self.table));
        let options = IterOptions::new().matching(COL_PARENT_ID, Value::Long(self.tables_parent_id));
        let mut entries = Vec::new();
        for row in cursor.iter_with(options) {
            if let Some(entry) = table_entry(&row?) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn add_table(&self, name: &str, table_def_page: u32, system: bool) -> Result<()> {
        let flags = if system { SYSTEM_OBJECT_FLAG } else { 0 };
        self.add_object(
            table_def_page as i32,
            self.tables_parent_id,
            name,
            TYPE_TABLE,
            flags,
        )
    }

    fn add_object(&self, id: i32, parent_id: i32, name: &str, object_type: i16, flags: i32) -> Result<()> {
        let now = chrono::Local::now().naive_local();
        self.table.add_row(vec![
            Value::Long(id),
            Value::Long(parent_id),
            Value::Text(name.to_string()),
            Value::Int(object_type),
            Value::DateTime(now),
            Value::DateTime(now),
            Value::Long(flags),
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i32, name: &str, object_type: i16, flags: i32) -> Row {
        Row::new(
            crate::row::RowId::new(3, 0),
            vec![
                (COL_ID.to_string(), Value::Long(id)),
                (COL_PARENT_ID.to_string(), Value::Long(DEFAULT_TABLES_PARENT_ID)),
                (COL_NAME.to_string(), Value::Text(name.to_string())),
                (COL_TYPE.to_string(), Value::Int(object_type)),
                (COL_FLAGS.to_string(), Value::Long(flags)),
            ],
        )
    }

    #[test]
    fn test_table_entry_from_row() {
        let entry = table_entry(&row(0x0200_0011, "Orders", TYPE_TABLE, 0)).unwrap();
        assert_eq!(entry.name, "Orders");
        assert_eq!(entry.table_def_page, 0x11);
        assert!(!entry.is_system());

        let system = table_entry(&row(2, CATALOG_TABLE_NAME, TYPE_TABLE, SYSTEM_OBJECT_FLAG)).unwrap();
        assert!(system.is_system());
        assert!(table_entry(&row(5, "Tables", TYPE_CONTAINER, 0)).is_none());
    }

    #[test]
    fn test_catalog_schema_is_valid() {
        let schema = catalog_schema();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.columns.len(), 7);
        assert_eq!(schema.indexes[0].columns.len(), 2);
    }
}
