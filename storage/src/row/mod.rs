//! Row identity and the on-page row layout.
//!
//! A Jet4 row is laid out as
//!
//! ```text
//! [column count][fixed data][var data][eod][var offsets, last first][var count][null mask]
//! ```
//!
//! with 2 byte counts and offsets; Jet3 uses single bytes plus a jump
//! table for rows longer than 255 bytes. The null mask has one bit per
//! column number, set for non-null values; boolean values live there too.

use crate::column::Column;
use crate::format::JetFormat;
use crate::page::{get_uint, put_uint};
use crate::{Result, StorageError};
use jetdb_core::{DataType, Value};
use std::fmt;

/// Smallest row written, leaving room for an overflow pointer.
pub const MIN_ROW_SIZE: usize = 4;
/// Size of an overflow pointer: row number plus 3 byte page number.
pub const SIZE_OVERFLOW_POINTER: usize = 4;

const JUMP_TABLE_SPAN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowIdKind {
    AlwaysFirst,
    Normal,
    AlwaysLast,
}

/// Location of a row: data page number and row slot. The two sentinels
/// sort before and after every real row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    kind: RowIdKind,
    page: u32,
    row: u16,
}

impl RowId {
    pub const FIRST: RowId = RowId {
        kind: RowIdKind::AlwaysFirst,
        page: 0,
        row: 0,
    };

    pub const LAST: RowId = RowId {
        kind: RowIdKind::AlwaysLast,
        page: 0,
        row: 0,
    };

    pub fn new(page: u32, row: u16) -> Self {
        Self {
            kind: RowIdKind::Normal,
            page,
            row,
        }
    }

    pub fn kind(&self) -> RowIdKind {
        self.kind
    }

    pub fn page_number(&self) -> u32 {
        self.page
    }

    pub fn row_number(&self) -> u16 {
        self.row
    }

    pub fn is_valid(&self) -> bool {
        self.kind == RowIdKind::Normal
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RowIdKind::AlwaysFirst => write!(f, "RowId(FIRST)"),
            RowIdKind::AlwaysLast => write!(f, "RowId(LAST)"),
            RowIdKind::Normal => write!(f, "RowId({}:{})", self.page, self.row),
        }
    }
}

/// A row read from a table: column names and values in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: RowId,
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(id: RowId, columns: Vec<(String, Value)>) -> Self {
        Self { id, columns }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    /// Value of a column, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, v)| v)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.columns.into_iter().map(|(_, v)| v).collect()
    }
}

/// Decides what happens when a single column of a row cannot be decoded.
pub trait RowErrorHandler: Send + Sync {
    /// Returns the value to use in place of the column, or the error to
    /// abort the read with.
    fn handle_row_error(
        &self,
        column: &Column,
        row_id: RowId,
        raw: &[u8],
        error: StorageError,
    ) -> Result<Value>;
}

/// Propagates every error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingRowErrorHandler;

impl RowErrorHandler for FailingRowErrorHandler {
    fn handle_row_error(
        &self,
        _column: &Column,
        _row_id: RowId,
        _raw: &[u8],
        error: StorageError,
    ) -> Result<Value> {
        Err(error)
    }
}

/// Substitutes the undecoded column bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawValueRowErrorHandler;

impl RowErrorHandler for RawValueRowErrorHandler {
    fn handle_row_error(
        &self,
        column: &Column,
        row_id: RowId,
        raw: &[u8],
        error: StorageError,
    ) -> Result<Value> {
        log::warn!(
            "Substituting raw value for column {} of {}: {}",
            column.name(),
            row_id,
            error
        );
        Ok(Value::Raw(raw.to_vec()))
    }
}

/// Data of one column located in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnData<'r> {
    Null,
    Boolean(bool),
    Bytes(&'r [u8]),
}

/// Parsed trailer of a row.
#[derive(Debug)]
pub struct RowHeader<'r> {
    row: &'r [u8],
    column_count: usize,
    null_mask: &'r [u8],
    /// Start offsets of the variable columns plus the end of var data.
    var_offsets: Vec<usize>,
    fixed_end: usize,
}

impl<'r> RowHeader<'r> {
    pub fn parse(
        format: &JetFormat,
        row: &'r [u8],
        has_var_columns: bool,
        page_number: u32,
    ) -> Result<Self> {
        let count_size = format.size_row_column_count;
        if row.len() < count_size {
            return Err(StorageError::corrupt(page_number, "row shorter than its header"));
        }
        let column_count = get_uint(row, 0, count_size);
        let mask_len = column_count.div_ceil(8);
        if row.len() < count_size + mask_len {
            return Err(StorageError::corrupt(
                page_number,
                format!("row of {} bytes cannot hold {} columns", row.len(), column_count),
            ));
        }
        let null_mask = &row[row.len() - mask_len..];

        let var_offsets = if has_var_columns {
            if format.size_row_var_col_offset == 2 {
                read_var_offsets(row, mask_len, page_number)?
            } else {
                read_jump_table_var_offsets(row, mask_len, page_number)?
            }
        } else {
            Vec::new()
        };

        let fixed_end = var_offsets
            .first()
            .copied()
            .unwrap_or(row.len() - mask_len);

        Ok(Self {
            row,
            column_count,
            null_mask,
            var_offsets,
            fixed_end,
        })
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn var_column_count(&self) -> usize {
        self.var_offsets.len().saturating_sub(1)
    }

    fn is_null(&self, column_number: usize) -> bool {
        if column_number >= self.column_count {
            return true;
        }
        self.null_mask[column_number / 8] & (1 << (column_number % 8)) == 0
    }

    /// Locates the bytes of `column`, or its null / boolean state.
    pub fn column_data(
        &self,
        format: &JetFormat,
        column: &Column,
        page_number: u32,
    ) -> Result<ColumnData<'r>> {
        let number = column.column_number() as usize;
        if column.data_type() == DataType::Boolean {
            return Ok(ColumnData::Boolean(!self.is_null(number)));
        }
        if self.is_null(number) {
            return Ok(ColumnData::Null);
        }

        if !column.is_variable_length() {
            let size = column.data_type().fixed_size().unwrap_or(column.length() as usize);
            let start = format.size_row_column_count + column.fixed_offset() as usize;
            let end = start + size;
            // rows written before the column was added
            if end > self.fixed_end {
                return Ok(ColumnData::Null);
            }
            return Ok(ColumnData::Bytes(&self.row[start..end]));
        }

        let var_index = column.var_index() as usize;
        if var_index >= self.var_column_count() {
            return Ok(ColumnData::Null);
        }
        let start = self.var_offsets[var_index];
        let end = self.var_offsets[var_index + 1];
        if start > end || end > self.row.len() {
            return Err(StorageError::corrupt(
                page_number,
                format!(
                    "variable column {} spans {}..{} in a row of {} bytes",
                    column.name(),
                    start,
                    end,
                    self.row.len()
                ),
            ));
        }
        Ok(ColumnData::Bytes(&self.row[start..end]))
    }
}

fn read_var_offsets(row: &[u8], mask_len: usize, page_number: u32) -> Result<Vec<usize>> {
    let trailer = row.len() - mask_len;
    if trailer < 4 {
        return Err(StorageError::corrupt(page_number, "row too short for var offsets"));
    }
    let var_count = get_uint(row, trailer - 2, 2);
    if trailer < 4 + var_count * 2 {
        return Err(StorageError::corrupt(
            page_number,
            format!("row too short for {} var offsets", var_count),
        ));
    }
    Ok((0..=var_count)
        .map(|i| get_uint(row, trailer - 4 - i * 2, 2))
        .collect())
}

fn read_jump_table_var_offsets(row: &[u8], mask_len: usize, page_number: u32) -> Result<Vec<usize>> {
    let row_end = row.len() - 1;
    if row_end < mask_len + 1 {
        return Err(StorageError::corrupt(page_number, "row too short for var offsets"));
    }
    let var_count = row[row_end - mask_len] as usize;
    let mut num_jumps = (row.len() - 1) / JUMP_TABLE_SPAN;
    let col_offset = row_end
        .checked_sub(mask_len + num_jumps + 1)
        .filter(|at| *at >= var_count)
        .ok_or_else(|| StorageError::corrupt(page_number, "row too short for var offsets"))?;

    // the last jump may be a dummy
    if (col_offset - var_count) / JUMP_TABLE_SPAN < num_jumps {
        num_jumps -= 1;
    }

    let mut jumps_used = 0;
    let mut offsets = Vec::with_capacity(var_count + 1);
    for i in 0..=var_count {
        while jumps_used < num_jumps
            && i == row[row_end - mask_len - jumps_used - 1] as usize
        {
            jumps_used += 1;
        }
        offsets.push(row[col_offset - i] as usize + jumps_used * JUMP_TABLE_SPAN);
    }
    Ok(offsets)
}

/// Encoded column content handed to [`encode_row`].
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedColumn {
    Null,
    Boolean(bool),
    Bytes(Vec<u8>),
}

/// Lays out a row. `values` is parallel to `columns`. The row is padded
/// to at least `min_size` bytes, with the padding placed before the
/// variable offsets.
pub fn encode_row(
    format: &JetFormat,
    columns: &[Column],
    values: &[EncodedColumn],
    min_size: usize,
) -> Result<Vec<u8>> {
    if format.size_row_var_col_offset != 2 {
        return Err(StorageError::ReadOnly(format!(
            "Rows cannot be written in format {}",
            format
        )));
    }

    let column_count = columns
        .iter()
        .map(|c| c.column_number() as usize + 1)
        .max()
        .unwrap_or(0);
    let mut null_mask = vec![0u8; column_count.div_ceil(8)];
    let mut set_not_null = |number: u16| {
        let number = number as usize;
        null_mask[number / 8] |= 1 << (number % 8);
    };

    let count_size = format.size_row_column_count;
    let fixed_len = columns
        .iter()
        .filter(|c| !c.is_variable_length())
        .filter_map(|c| {
            c.data_type()
                .fixed_size()
                .map(|size| c.fixed_offset() as usize + size)
        })
        .max()
        .unwrap_or(0);

    let mut row = vec![0u8; count_size + fixed_len];
    put_uint(&mut row, 0, count_size, column_count);

    let mut var_columns: Vec<(&Column, &EncodedColumn)> = Vec::new();
    for (column, value) in columns.iter().zip(values) {
        if column.is_variable_length() {
            var_columns.push((column, value));
            continue;
        }
        match value {
            EncodedColumn::Null | EncodedColumn::Boolean(false) => {}
            EncodedColumn::Boolean(true) => set_not_null(column.column_number()),
            EncodedColumn::Bytes(bytes) => {
                let start = count_size + column.fixed_offset() as usize;
                let size = column
                    .data_type()
                    .fixed_size()
                    .unwrap_or(bytes.len())
                    .min(bytes.len());
                row[start..start + size].copy_from_slice(&bytes[..size]);
                set_not_null(column.column_number());
            }
        }
    }

    var_columns.sort_by_key(|(c, _)| c.var_index());
    let mut var_offsets = Vec::with_capacity(var_columns.len());
    for (column, value) in &var_columns {
        var_offsets.push(row.len());
        if let EncodedColumn::Bytes(bytes) = value {
            row.extend_from_slice(bytes);
            set_not_null(column.column_number());
        }
    }

    let trailer = if var_columns.is_empty() {
        0
    } else {
        4 + var_offsets.len() * 2
    };
    let eod = row.len();
    let min_size = min_size.max(MIN_ROW_SIZE);
    let unpadded = row.len() + trailer + null_mask.len();
    if unpadded < min_size {
        row.resize(row.len() + min_size - unpadded, 0);
    }

    if !var_columns.is_empty() {
        row.extend_from_slice(&(eod as u16).to_le_bytes());
        for offset in var_offsets.iter().rev() {
            row.extend_from_slice(&(*offset as u16).to_le_bytes());
        }
        row.extend_from_slice(&(var_offsets.len() as u16).to_le_bytes());
    }
    row.extend_from_slice(&null_mask);

    if row.len() > format.max_row_size {
        return Err(StorageError::InvalidArgument(format!(
            "Row size {} is too large (max {})",
            row.len(),
            format.max_row_size
        )));
    }
    Ok(row)
}
