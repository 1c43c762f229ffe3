// storage/src/table/mod.rs

//! Tables: the column and index layout from the table definition plus row
//! level reads and writes.
//!
//! Rows live on data pages listed in the table's owned-pages map. Deleted
//! rows only get a flag on their row pointer. An updated row that outgrows
//! its slot is moved: the new record is written elsewhere, flagged deleted
//! so scans skip it, and the original slot becomes a pointer to it.

mod builder;
mod definition;

pub(crate) use builder::create_table;
pub(crate) use definition::{TYPE_SYSTEM_TABLE, TYPE_USER_TABLE};

use crate::column::{Column, LongValueStore};
use crate::cursor::Cursor;
use crate::file::PageChannel;
use crate::format::JetFormat;
use crate::index::{Entry, Index, IndexColumn, IndexData};
use crate::page::{get_u24, put_u24, put_u32, DataPage, DELETED_ROW_MASK, OVERFLOW_ROW_MASK};
use crate::row::{
    encode_row, ColumnData, EncodedColumn, Row, RowErrorHandler, RowHeader, RowId, RowIdKind,
    MIN_ROW_SIZE, SIZE_OVERFLOW_POINTER,
};
use crate::usage::{PageCursor, SharedUsageMap, UsageMap};
use crate::{Result, StorageError};
use definition::TableDefinition;
use jetdb_core::{DataType, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters persisted in the table definition, plus the long value page
/// currently being filled.
#[derive(Debug)]
struct TableState {
    row_count: u32,
    last_auto_number: u32,
    long_value_page: Option<u32>,
}

/// A record as stored: its actual slot, which differs from the row id for
/// moved rows.
struct StoredRecord {
    page: u32,
    row: usize,
    record: Vec<u8>,
}

pub struct Table {
    channel: Arc<PageChannel>,
    name: String,
    table_def_page: u32,
    table_type: u8,
    columns: Vec<Column>,
    indexes: Vec<Index>,
    index_datas: Vec<Arc<IndexData>>,
    owned_pages: SharedUsageMap,
    free_space_pages: SharedUsageMap,
    has_var_columns: bool,
    state: Mutex<TableState>,
    mod_count: AtomicU64,
    error_handler: Arc<dyn RowErrorHandler>,
}

impl Table {
    /// Loads the table whose definition starts at `table_def_page`.
    pub(crate) fn read(
        channel: Arc<PageChannel>,
        name: String,
        table_def_page: u32,
        error_handler: Arc<dyn RowErrorHandler>,
    ) -> Result<Self> {
        let definition = TableDefinition::read(&channel, table_def_page)?;
        let (page, row) = definition.owned_pages;
        let owned_pages = UsageMap::read(&channel, page, row)?.into_shared();
        let (page, row) = definition.free_space_pages;
        let free_space_pages = UsageMap::read(&channel, page, row)?.into_shared();

        let mut index_datas = Vec::with_capacity(definition.index_datas.len());
        for (number, data) in definition.index_datas.iter().enumerate() {
            let mut columns = Vec::with_capacity(data.columns.len());
            for (column_number, flags) in &data.columns {
                let column = definition
                    .columns
                    .iter()
                    .find(|c| c.column_number() == *column_number)
                    .ok_or_else(|| {
                        StorageError::corrupt(
                            table_def_page,
                            format!("index {} refers to missing column {}", number, column_number),
                        )
                    })?;
                columns.push(IndexColumn::new(column.clone(), *flags));
            }
            let (page, row) = data.usage_map;
            let pages = UsageMap::read(&channel, page, row)?.into_shared();
            index_datas.push(Arc::new(IndexData::new(
                Arc::clone(&channel),
                number as u32,
                table_def_page,
                data.root_page,
                columns,
                data.flags,
                pages,
            )));
        }

        let indexes = definition
            .indexes
            .into_iter()
            .map(|index| {
                Index::new(
                    index.name,
                    index.index_number,
                    index.index_type,
                    index.reference,
                    Arc::clone(&index_datas[index.data_number as usize]),
                )
            })
            .collect();

        log::debug!(
            "Loaded table {} from page {} ({} columns, {} rows)",
            name,
            table_def_page,
            definition.columns.len(),
            definition.row_count
        );

        Ok(Self {
            channel,
            name,
            table_def_page,
            table_type: definition.table_type,
            has_var_columns: definition.columns.iter().any(|c| c.is_variable_length()),
            columns: definition.columns,
            indexes,
            index_datas,
            owned_pages,
            free_space_pages,
            state: Mutex::new(TableState {
                row_count: definition.row_count,
                last_auto_number: definition.last_auto_number,
                long_value_page: None,
            }),
            mod_count: AtomicU64::new(0),
            error_handler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_def_page(&self) -> u32 {
        self.table_def_page
    }

    pub fn is_system(&self) -> bool {
        self.table_type == TYPE_SYSTEM_TABLE
    }

    pub fn format(&self) -> &'static JetFormat {
        self.channel.format()
    }

    pub(crate) fn channel(&self) -> &Arc<PageChannel> {
        &self.channel
    }

    /// Columns in display order. A column's [`Column::index`] is its slot in
    /// row value arrays.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| StorageError::NotFound(format!("Column {} of table {}", name, self.name)))
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Result<&Index> {
        self.indexes
            .iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| StorageError::NotFound(format!("Index {} of table {}", name, self.name)))
    }

    pub fn primary_key_index(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.is_primary_key())
    }

    pub fn index_datas(&self) -> &[Arc<IndexData>] {
        &self.index_datas
    }

    /// Data pages holding the rows of this table.
    pub fn owned_pages(&self) -> &SharedUsageMap {
        &self.owned_pages
    }

    /// Walks the data pages of this table in page order.
    pub fn page_cursor(&self) -> PageCursor {
        PageCursor::new(Arc::clone(&self.owned_pages))
    }

    pub fn row_count(&self) -> u32 {
        self.state.lock().row_count
    }

    /// Bumped by every row insert, update and delete.
    pub fn mod_count(&self) -> u64 {
        self.mod_count.load(Ordering::Acquire)
    }

    /// Opens a cursor walking the table in storage order.
    pub fn cursor(self: &Arc<Self>) -> Cursor {
        Cursor::table_scan(Arc::clone(self))
    }

    /// Opens a cursor walking the table in the order of the named index.
    pub fn index_cursor(self: &Arc<Self>, index_name: &str) -> Result<Cursor> {
        let index = self.index(index_name)?.clone();
        Ok(Cursor::index_scan(Arc::clone(self), index))
    }

    /// Pairs `values` with the column names.
    pub fn to_row(&self, row_id: RowId, values: Vec<Value>) -> Row {
        Row::new(
            row_id,
            self.columns
                .iter()
                .map(|c| c.name().to_string())
                .zip(values)
                .collect(),
        )
    }

    pub fn get_row(&self, row_id: RowId) -> Result<Row> {
        let values = self
            .read_row_values(row_id)?
            .ok_or_else(|| StorageError::InvalidState(format!("{} is deleted", row_id)))?;
        Ok(self.to_row(row_id, values))
    }

    pub fn is_row_deleted(&self, row_id: RowId) -> Result<bool> {
        Ok(self.locate(row_id)?.is_none())
    }

    /// Values of a row in column order, or `None` when it is deleted.
    pub fn read_row_values(&self, row_id: RowId) -> Result<Option<Vec<Value>>> {
        match self.locate(row_id)? {
            Some(stored) => self.decode_values(row_id, &stored).map(Some),
            None => Ok(None),
        }
    }

    pub fn add_row(&self, values: Vec<Value>) -> Result<RowId> {
        self.add_rows(vec![values])?
            .pop()
            .ok_or_else(|| StorageError::InvalidState("No row was added".to_string()))
    }

    /// Adds rows one after the other. Rows added before a failing one stay.
    pub fn add_rows(&self, rows: Vec<Vec<Value>>) -> Result<Vec<RowId>> {
        self.check_writable()?;
        let guard = self.channel.write_guard();
        let mut state = self.state.lock();

        let result = rows
            .into_iter()
            .map(|values| self.insert_row(&mut state, values))
            .collect::<Result<Vec<_>>>();
        self.write_counters(&state)?;
        drop(state);

        let ids = result?;
        guard.finish()?;
        Ok(ids)
    }

    fn insert_row(&self, state: &mut TableState, values: Vec<Value>) -> Result<RowId> {
        let mut row = self.coerce_row(values)?;
        for column in self.columns.iter().filter(|c| c.is_auto_number()) {
            let value = column.row_value(&row);
            match column.data_type() {
                DataType::Guid if value.is_null() => {
                    column.set_row_value(&mut row, Value::Guid(Uuid::new_v4()));
                }
                DataType::Long if value.is_null() => {
                    let next = state
                        .last_auto_number
                        .checked_add(1)
                        .filter(|n| *n <= i32::MAX as u32)
                        .ok_or_else(|| {
                            StorageError::ConstraintViolation(format!(
                                "Auto number column {} of table {} has no values left",
                                column.name(),
                                self.name
                            ))
                        })?;
                    state.last_auto_number = next;
                    column.set_row_value(&mut row, Value::Long(next as i32));
                }
                DataType::Long => {
                    if let Some(n) = value.as_i64().filter(|n| *n > 0) {
                        state.last_auto_number = state.last_auto_number.max(n as u32);
                    }
                }
                _ => {}
            }
        }

        let keys = self
            .index_datas
            .iter()
            .map(|data| data.prepare_add_row(&row))
            .collect::<Result<Vec<_>>>()?;

        let encoded = self.encode_columns(state, &row)?;
        let record = encode_row(self.format(), &self.columns, &encoded, MIN_ROW_SIZE)?;
        self.check_row_size(&record)?;
        let row_id = self.place_record(&record, 0)?;

        for (data, key) in self.index_datas.iter().zip(keys) {
            if let Some(key) = key {
                data.insert_entry(Entry::new(key, row_id))?;
            }
        }

        state.row_count += 1;
        self.mod_count.fetch_add(1, Ordering::AcqRel);
        log::trace!("Added {} to table {}", row_id, self.name);
        Ok(row_id)
    }

    /// Replaces the values of a row. Auto number columns keep their value.
    pub fn update_row(&self, row_id: RowId, values: Vec<Value>) -> Result<()> {
        self.check_writable()?;
        let guard = self.channel.write_guard();
        let mut state = self.state.lock();

        let stored = self
            .locate(row_id)?
            .ok_or_else(|| StorageError::InvalidState(format!("Cannot update deleted {}", row_id)))?;
        let old_row = self.decode_values(row_id, &stored)?;
        let mut new_row = self.coerce_row(values)?;
        for column in self.columns.iter().filter(|c| c.is_auto_number()) {
            column.set_row_value(&mut new_row, column.row_value(&old_row).clone());
        }

        let prepared = self
            .index_datas
            .iter()
            .map(|data| data.prepare_update_row(&old_row, &new_row))
            .collect::<Result<Vec<_>>>()?;

        let format = self.format();
        let encoded = self.encode_columns(&mut state, &new_row)?;
        let record = encode_row(format, &self.columns, &encoded, MIN_ROW_SIZE)?;
        self.check_row_size(&record)?;

        let slot_len = stored.record.len();
        if record.len() <= slot_len {
            let record = encode_row(format, &self.columns, &encoded, slot_len)?;
            let row = stored.row;
            self.modify_page(stored.page, |page| page.overwrite_record(stored.page, row, &record))?;
        } else {
            let target = self.place_record(&record, DELETED_ROW_MASK)?;
            let row = row_id.row_number() as usize;
            self.modify_page(row_id.page_number(), |page| {
                let slot_len = page.row_location(row_id.page_number(), row)?.len();
                let mut pointer = vec![0u8; slot_len.max(SIZE_OVERFLOW_POINTER)];
                pointer[0] = target.row_number() as u8;
                put_u24(&mut pointer, 1, target.page_number());
                pointer.truncate(slot_len);
                page.overwrite_record(row_id.page_number(), row, &pointer)?;
                page.set_row_flags(row_id.page_number(), row, OVERFLOW_ROW_MASK)
            })?;
            self.delete_overflow_target(row_id, &stored)?;
            log::debug!("Moved {} of table {} to {}", row_id, self.name, target);
        }

        for (data, update) in self.index_datas.iter().zip(prepared) {
            if let Some(new_key) = update {
                data.commit_update_row(&old_row, new_key, row_id)?;
            }
        }

        self.mod_count.fetch_add(1, Ordering::AcqRel);
        drop(state);
        guard.finish()
    }

    pub fn delete_row(&self, row_id: RowId) -> Result<()> {
        self.check_writable()?;
        let guard = self.channel.write_guard();
        let mut state = self.state.lock();

        let stored = self
            .locate(row_id)?
            .ok_or_else(|| StorageError::InvalidState(format!("{} is already deleted", row_id)))?;
        let values = self.decode_values(row_id, &stored)?;

        let row = row_id.row_number() as usize;
        self.modify_page(row_id.page_number(), |page| page.delete_record(row_id.page_number(), row))?;
        self.delete_overflow_target(row_id, &stored)?;
        for data in &self.index_datas {
            data.remove_row_entry(&values, row_id)?;
        }

        state.row_count = state.row_count.saturating_sub(1);
        self.write_counters(&state)?;
        self.mod_count.fetch_add(1, Ordering::AcqRel);
        drop(state);
        guard.finish()
    }

    /// First live row after `after` in storage order, or [`RowId::LAST`].
    pub(crate) fn next_row_id(&self, after: RowId) -> Result<RowId> {
        let (mut page, mut first_row) = match after.kind() {
            RowIdKind::AlwaysFirst => (self.owned_pages.lock().first_page(), 0),
            RowIdKind::AlwaysLast => return Ok(RowId::LAST),
            RowIdKind::Normal => (Some(after.page_number()), after.row_number() as usize + 1),
        };

        let format = self.format();
        let mut buf = self.channel.take_shared_buffer();
        let result = (|| -> Result<RowId> {
            while let Some(page_number) = page {
                self.channel.read_page(&mut buf, page_number)?;
                let data = DataPage::new(&buf[..], format);
                if data.is_owned_by(self.table_def_page) {
                    for row in first_row..data.row_count() {
                        if !data.row_location(page_number, row)?.deleted {
                            return Ok(RowId::new(page_number, row as u16));
                        }
                    }
                }
                page = self.owned_pages.lock().next_page_after(page_number);
                first_row = 0;
            }
            Ok(RowId::LAST)
        })();
        self.channel.release_shared_buffer(buf);
        result
    }

    /// Last live row before `before` in storage order, or [`RowId::FIRST`].
    pub(crate) fn previous_row_id(&self, before: RowId) -> Result<RowId> {
        let (mut page, mut end_row) = match before.kind() {
            RowIdKind::AlwaysFirst => return Ok(RowId::FIRST),
            RowIdKind::AlwaysLast => (self.owned_pages.lock().last_page(), None),
            RowIdKind::Normal => (Some(before.page_number()), Some(before.row_number() as usize)),
        };

        let format = self.format();
        let mut buf = self.channel.take_shared_buffer();
        let result = (|| -> Result<RowId> {
            while let Some(page_number) = page {
                self.channel.read_page(&mut buf, page_number)?;
                let data = DataPage::new(&buf[..], format);
                if data.is_owned_by(self.table_def_page) {
                    let end = end_row.map_or(data.row_count(), |r| r.min(data.row_count()));
                    for row in (0..end).rev() {
                        if !data.row_location(page_number, row)?.deleted {
                            return Ok(RowId::new(page_number, row as u16));
                        }
                    }
                }
                page = self.owned_pages.lock().previous_page_before(page_number);
                end_row = None;
            }
            Ok(RowId::FIRST)
        })();
        self.channel.release_shared_buffer(buf);
        result
    }

    fn check_writable(&self) -> Result<()> {
        if self.channel.is_read_only() {
            return Err(StorageError::ReadOnly(
                "Database was opened read-only".to_string(),
            ));
        }
        Ok(())
    }

    fn check_row_size(&self, record: &[u8]) -> Result<()> {
        let max = self.format().max_row_size;
        if record.len() > max {
            return Err(StorageError::InvalidArgument(format!(
                "Row of {} bytes exceeds the maximum of {} bytes",
                record.len(),
                max
            )));
        }
        Ok(())
    }

    /// Pads or rejects `values` to one value per column and coerces them.
    fn coerce_row(&self, mut values: Vec<Value>) -> Result<Vec<Value>> {
        if values.len() > self.columns.len() {
            return Err(StorageError::InvalidArgument(format!(
                "{} values given for the {} columns of table {}",
                values.len(),
                self.columns.len(),
                self.name
            )));
        }
        values.resize(self.columns.len(), Value::Null);
        self.columns
            .iter()
            .map(|c| c.coerce(c.row_value(&values)))
            .collect()
    }

    fn encode_columns(&self, state: &mut TableState, row: &[Value]) -> Result<Vec<EncodedColumn>> {
        let mut long_values = LongValueStore::new(
            &self.channel,
            Arc::clone(&self.owned_pages),
            state.long_value_page,
        );
        let encoded = self
            .columns
            .iter()
            .map(|column| match column.row_value(row) {
                Value::Null => Ok(EncodedColumn::Null),
                Value::Boolean(b) if column.data_type() == DataType::Boolean => {
                    Ok(EncodedColumn::Boolean(*b))
                }
                value => column
                    .write_value(value, &mut long_values)
                    .map(EncodedColumn::Bytes),
            })
            .collect::<Result<Vec<_>>>();
        state.long_value_page = long_values.current_page();
        encoded
    }

    fn decode_values(&self, row_id: RowId, stored: &StoredRecord) -> Result<Vec<Value>> {
        let format = self.format();
        let header = RowHeader::parse(format, &stored.record, self.has_var_columns, stored.page)?;
        self.columns
            .iter()
            .map(|column| match header.column_data(format, column, stored.page)? {
                ColumnData::Null => Ok(Value::Null),
                ColumnData::Boolean(b) => Ok(Value::Boolean(b)),
                ColumnData::Bytes(data) => match column.read_value(data, &self.channel) {
                    Ok(value) => Ok(value),
                    Err(e) => self.error_handler.handle_row_error(column, row_id, data, e),
                },
            })
            .collect()
    }

    /// Finds the record of a row, following an overflow pointer. `None`
    /// when the row is deleted.
    fn locate(&self, row_id: RowId) -> Result<Option<StoredRecord>> {
        if !row_id.is_valid() {
            return Err(StorageError::InvalidArgument(format!(
                "{} does not identify a row",
                row_id
            )));
        }

        let format = self.format();
        let mut buf = self.channel.take_shared_buffer();
        let result = (|| -> Result<Option<StoredRecord>> {
            let mut page_number = row_id.page_number();
            let mut row = row_id.row_number() as usize;
            for hop in 0..2 {
                self.channel.read_page(&mut buf, page_number)?;
                let page = DataPage::new(&buf[..], format);
                if !page.is_owned_by(self.table_def_page) {
                    return Err(StorageError::corrupt(
                        page_number,
                        format!("not a data page of table {}", self.name),
                    ));
                }
                let loc = page.row_location(page_number, row)?;
                if hop == 0 && loc.deleted {
                    return Ok(None);
                }
                let record = &buf[loc.start..loc.end];
                if hop == 0 && loc.overflow {
                    if record.len() < SIZE_OVERFLOW_POINTER {
                        return Err(StorageError::corrupt(page_number, "short overflow pointer"));
                    }
                    row = record[0] as usize;
                    page_number = get_u24(record, 1);
                    continue;
                }
                return Ok(Some(StoredRecord {
                    page: page_number,
                    row,
                    record: record.to_vec(),
                }));
            }
            Err(StorageError::corrupt(
                page_number,
                format!("overflow row {} points to another overflow row", row_id),
            ))
        })();
        self.channel.release_shared_buffer(buf);
        result
    }

    /// Stores a record on the last page with free space, or on a new page.
    fn place_record(&self, record: &[u8], flags: u16) -> Result<RowId> {
        let format = self.format();
        let candidate = self.free_space_pages.lock().last_page();
        if let Some(page_number) = candidate {
            let mut buf = vec![0u8; format.page_size];
            self.channel.read_page(&mut buf, page_number)?;
            let mut page = DataPage::new(&mut buf[..], format);
            let row = if page.is_owned_by(self.table_def_page) {
                page.add_record(record, flags)
            } else {
                None
            };
            if let Some(row) = row {
                self.channel.write_page(&buf, page_number)?;
                return Ok(RowId::new(page_number, row as u16));
            }
            self.free_space_pages
                .lock()
                .remove_page(&self.channel, page_number)?;
        }

        let mut page = DataPage::new(vec![0u8; format.page_size], format);
        page.init(self.table_def_page);
        let row = page.add_record(record, flags).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "Record of {} bytes does not fit on a data page",
                record.len()
            ))
        })?;
        let page_number = self.channel.write_new_page(&page.into_inner())?;
        self.owned_pages.lock().add_page(&self.channel, page_number)?;
        self.free_space_pages
            .lock()
            .add_page(&self.channel, page_number)?;
        log::debug!("Allocated data page {} for table {}", page_number, self.name);
        Ok(RowId::new(page_number, row as u16))
    }

    /// Frees the record an overflowed row pointed at.
    fn delete_overflow_target(&self, row_id: RowId, stored: &StoredRecord) -> Result<()> {
        if stored.page == row_id.page_number() && stored.row == row_id.row_number() as usize {
            return Ok(());
        }
        self.modify_page(stored.page, |page| page.delete_record(stored.page, stored.row))
    }

    fn modify_page<T>(
        &self,
        page_number: u32,
        f: impl FnOnce(&mut DataPage<&mut [u8]>) -> Result<T>,
    ) -> Result<T> {
        let format = self.format();
        let mut buf = vec![0u8; format.page_size];
        self.channel.read_page(&mut buf, page_number)?;
        let result = {
            let mut page = DataPage::new(&mut buf[..], format);
            if !page.is_owned_by(self.table_def_page) {
                return Err(StorageError::corrupt(
                    page_number,
                    format!("not a data page of table {}", self.name),
                ));
            }
            f(&mut page)?
        };
        self.channel.write_page(&buf, page_number)?;
        Ok(result)
    }

    fn write_counters(&self, state: &TableState) -> Result<()> {
        let format = self.format();
        let mut buf = vec![0u8; format.page_size];
        self.channel.read_page(&mut buf, self.table_def_page)?;
        put_u32(&mut buf, format.offset_num_rows, state.row_count);
        put_u32(&mut buf, format.offset_next_auto_number, state.last_auto_number);
        self.channel.write_page(&buf, self.table_def_page)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("table_def_page", &self.table_def_page)
            .field("columns", &self.columns.len())
            .field("indexes", &self.indexes.len())
            .finish()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.name)?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", column.name(), column.data_type())?;
        }
        write!(f, ")")
    }
}
