// storage/src/table/builder.rs

//! Lays out and writes new tables.

use super::definition::{
    write_definition_bytes, IndexDataDefinition, LogicalIndexDefinition, TableDefinition,
};
use super::Table;
use crate::column::Column;
use crate::file::PageChannel;
use crate::index::{
    IndexData, ASCENDING_COLUMN_FLAG, IGNORE_NULLS_INDEX_FLAG, PRIMARY_KEY_INDEX_TYPE,
    REQUIRED_INDEX_FLAG, UNIQUE_INDEX_FLAG, UNKNOWN_INDEX_FLAG,
};
use crate::page::DataPage;
use crate::row::RowErrorHandler;
use crate::usage::{new_inline_row, UsageMap};
use crate::{Result, StorageError};
use jetdb_core::{IndexDefinition, TableSchema};
use std::sync::Arc;

const NORMAL_INDEX_TYPE: u8 = 0x00;

/// Usage map rows on the map page of a new table.
const OWNED_PAGES_ROW: usize = 0;
const FREE_SPACE_PAGES_ROW: usize = 1;
const FIRST_INDEX_ROW: usize = 2;

fn index_flags(index: &IndexDefinition) -> u8 {
    let mut flags = UNKNOWN_INDEX_FLAG;
    if index.unique {
        flags |= UNIQUE_INDEX_FLAG;
    }
    if index.ignore_nulls {
        flags |= IGNORE_NULLS_INDEX_FLAG;
    }
    if index.required {
        flags |= REQUIRED_INDEX_FLAG;
    }
    flags
}

/// Assigns column numbers, variable column slots and fixed data offsets.
fn layout_columns(channel: &PageChannel, schema: &TableSchema) -> Result<Vec<Column>> {
    let format = channel.format();
    if schema.columns.len() > format.max_columns_per_table {
        return Err(StorageError::InvalidArgument(format!(
            "Table {} has more than {} columns",
            schema.name, format.max_columns_per_table
        )));
    }

    let mut var_index = 0u16;
    let mut fixed_offset = 0u16;
    let mut columns = Vec::with_capacity(schema.columns.len());
    for (number, definition) in schema.columns.iter().enumerate() {
        let column = Column::from_definition(format, definition, number as u16, var_index, fixed_offset)?;
        if column.is_variable_length() {
            var_index += 1;
        } else {
            fixed_offset += column.data_type().fixed_size().unwrap_or(0) as u16;
        }
        columns.push(column);
    }
    Ok(columns)
}

/// Maps logical indexes onto index datas; indexes with the same columns
/// and flags share one.
fn layout_indexes(
    schema: &TableSchema,
    columns: &[Column],
) -> Result<(Vec<IndexDataDefinition>, Vec<LogicalIndexDefinition>)> {
    let mut datas: Vec<IndexDataDefinition> = Vec::new();
    let mut indexes = Vec::with_capacity(schema.indexes.len());

    for (number, index) in schema.indexes.iter().enumerate() {
        let index_columns = index
            .columns
            .iter()
            .map(|ic| {
                let column = columns
                    .iter()
                    .find(|c| c.name().eq_ignore_ascii_case(&ic.name))
                    .ok_or_else(|| {
                        StorageError::InvalidArgument(format!(
                            "Index {} refers to unknown column {}",
                            index.name, ic.name
                        ))
                    })?;
                let flags = if ic.ascending { ASCENDING_COLUMN_FLAG } else { 0 };
                Ok((column.column_number(), flags))
            })
            .collect::<Result<Vec<_>>>()?;
        let flags = index_flags(index);

        let data_number = match datas
            .iter()
            .position(|d| d.columns == index_columns && d.flags == flags)
        {
            Some(position) => position,
            None => {
                datas.push(IndexDataDefinition {
                    columns: index_columns,
                    usage_map: (0, 0),
                    root_page: 0,
                    flags,
                });
                datas.len() - 1
            }
        };

        indexes.push(LogicalIndexDefinition {
            name: index.name.clone(),
            index_number: number as u32,
            data_number: data_number as u32,
            index_type: if index.primary_key {
                PRIMARY_KEY_INDEX_TYPE
            } else {
                NORMAL_INDEX_TYPE
            },
            reference: None,
        });
    }
    Ok((datas, indexes))
}

/// Writes a new empty table and returns it loaded.
pub(crate) fn create_table(
    channel: &Arc<PageChannel>,
    schema: &TableSchema,
    table_type: u8,
    error_handler: Arc<dyn RowErrorHandler>,
) -> Result<Table> {
    if channel.is_read_only() {
        return Err(StorageError::ReadOnly(
            "Database was opened read-only".to_string(),
        ));
    }
    schema.validate().map_err(StorageError::InvalidArgument)?;
    let format = channel.format();
    if schema.indexes.len() > format.max_indexes_per_table {
        return Err(StorageError::InvalidArgument(format!(
            "Table {} has more than {} indexes",
            schema.name, format.max_indexes_per_table
        )));
    }

    let columns = layout_columns(channel, schema)?;
    let (mut index_datas, indexes) = layout_indexes(schema, &columns)?;

    let guard = channel.write_guard();
    let table_def_page = channel.allocate_page()?;

    let mut map_page = DataPage::new(vec![0u8; format.page_size], format);
    map_page.init(0);
    for _ in 0..FIRST_INDEX_ROW + index_datas.len() {
        map_page.add_record(&new_inline_row(format), 0).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "Usage maps of table {} do not fit on one page",
                schema.name
            ))
        })?;
    }
    let map_page_number = channel.write_new_page(&map_page.into_inner())?;

    UsageMap::read(channel, map_page_number, OWNED_PAGES_ROW)?
        .add_page(channel, table_def_page)?;
    for (i, data) in index_datas.iter_mut().enumerate() {
        let row = FIRST_INDEX_ROW + i;
        data.usage_map = (map_page_number, row);
        data.root_page = IndexData::create_root_page(channel, table_def_page)?;
        UsageMap::read(channel, map_page_number, row)?.add_page(channel, data.root_page)?;
    }

    let definition = TableDefinition {
        row_count: 0,
        last_auto_number: 0,
        table_type,
        columns,
        owned_pages: (map_page_number, OWNED_PAGES_ROW),
        free_space_pages: (map_page_number, FREE_SPACE_PAGES_ROW),
        index_datas,
        indexes,
    };
    write_definition_bytes(channel, table_def_page, &definition.encode(format))?;
    guard.finish()?;

    log::debug!(
        "Created table {} at page {} with {} columns and {} indexes",
        schema.name,
        table_def_page,
        definition.columns.len(),
        definition.indexes.len()
    );
    Table::read(
        Arc::clone(channel),
        schema.name.clone(),
        table_def_page,
        error_handler,
    )
}
