// storage/src/table/definition.rs

//! Table definition ("tdef") pages.
//!
//! A definition starts on one page and continues on further pages linked
//! through the next-page pointer; continuation pages repeat only the 8
//! byte page header. The byte stream holds, in order: the fixed header,
//! one row count block per index data, the column headers, the column
//! names, the index data blocks, the logical index blocks and the index
//! names.

use crate::column::{decode_text, encode_text, Column};
use crate::file::PageChannel;
use crate::format::JetFormat;
use crate::index::{IndexReference, COLUMN_UNUSED, FOREIGN_KEY_INDEX_TYPE, MAX_INDEX_COLUMNS};
use crate::page::{expect_page_type, get_u32, put_u16, put_u24, put_u32, PageType};
use crate::{Result, StorageError};
use std::collections::HashSet;

pub const TYPE_USER_TABLE: u8 = 0x4E;
pub const TYPE_SYSTEM_TABLE: u8 = 0x53;

const PAGE_MARKER: u8 = 0x01;
const TDEF_MARKER: [u8; 2] = *b"VC";
const INDEX_MAGIC: u32 = 1923;
const COLUMN_MAGIC: u32 = 1625;
const END_OF_DEFINITION: u16 = 0xFFFF;
const NO_RELATED_INDEX: i32 = -1;
const PRIMARY_TABLE_TYPE: u8 = 0x00;
const CASCADE_FLAG: u8 = 0x01;

/// Location of a usage map row: page and row number.
pub(crate) type MapLocation = (u32, usize);

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexDataDefinition {
    /// Column numbers and column flags.
    pub columns: Vec<(u16, u8)>,
    pub usage_map: MapLocation,
    pub root_page: u32,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogicalIndexDefinition {
    pub name: String,
    pub index_number: u32,
    pub data_number: u32,
    pub index_type: u8,
    pub reference: Option<IndexReference>,
}

#[derive(Debug, Clone)]
pub(crate) struct TableDefinition {
    pub row_count: u32,
    pub last_auto_number: u32,
    pub table_type: u8,
    /// Sorted by display index; `Column::index` is the position here.
    pub columns: Vec<Column>,
    pub owned_pages: MapLocation,
    pub free_space_pages: MapLocation,
    pub index_datas: Vec<IndexDataDefinition>,
    pub indexes: Vec<LogicalIndexDefinition>,
}

/// Bounds checked reads over a definition byte stream.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    page: u32,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(StorageError::corrupt(
                self.page,
                format!("table definition truncated at byte {}", self.pos),
            ));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name(&mut self, format: &JetFormat) -> Result<String> {
        let len = if format.size_name_length == 1 {
            self.u8()? as usize
        } else {
            self.u16()? as usize
        };
        Ok(decode_text(self.take(len)?, format))
    }
}

fn write_name(out: &mut Vec<u8>, name: &str, format: &JetFormat) {
    let bytes = encode_text(name, false, format);
    if format.size_name_length == 1 {
        out.push(bytes.len() as u8);
    } else {
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(&bytes);
}

fn read_map_location(buf: &[u8], offset: usize) -> MapLocation {
    let row = buf[offset] as usize;
    let page = u32::from_le_bytes([buf[offset + 1], buf[offset + 2], buf[offset + 3], 0]);
    (page, row)
}

/// Reads the definition bytes starting at `page_number`, joining
/// continuation pages.
pub(crate) fn read_definition_bytes(channel: &PageChannel, page_number: u32) -> Result<Vec<u8>> {
    let format = channel.format();
    let mut buf = vec![0u8; format.page_size];
    channel.read_page(&mut buf, page_number)?;
    expect_page_type(&buf, page_number, PageType::TableDefinition)?;

    let mut bytes = buf.clone();
    let mut visited = HashSet::from([page_number]);
    let mut next = get_u32(&buf, format.offset_next_table_def_page);
    while next != 0 {
        if !visited.insert(next) {
            return Err(StorageError::corrupt(next, "cyclic table definition pages"));
        }
        channel.read_page(&mut buf, next)?;
        expect_page_type(&buf, next, PageType::TableDefinition)?;
        bytes.extend_from_slice(&buf[format.size_table_def_page_header..]);
        next = get_u32(&buf, format.offset_next_table_def_page);
    }
    Ok(bytes)
}

/// Writes definition bytes to `first_page`, spilling onto new
/// continuation pages.
pub(crate) fn write_definition_bytes(
    channel: &PageChannel,
    first_page: u32,
    bytes: &[u8],
) -> Result<()> {
    let format = channel.format();
    let page_size = format.page_size;
    let header = format.size_table_def_page_header;

    let first_len = bytes.len().min(page_size);
    let rest: Vec<&[u8]> = bytes[first_len..].chunks(page_size - header).collect();
    let mut page_numbers = vec![first_page];
    for _ in &rest {
        page_numbers.push(channel.allocate_page()?);
    }

    let mut page = vec![0u8; page_size];
    page[..first_len].copy_from_slice(&bytes[..first_len]);
    put_u32(
        &mut page,
        format.offset_next_table_def_page,
        page_numbers.get(1).copied().unwrap_or(0),
    );
    channel.write_page(&page, first_page)?;

    for (i, chunk) in rest.iter().enumerate() {
        page.fill(0);
        page[0] = PageType::TableDefinition as u8;
        page[1] = PAGE_MARKER;
        page[2..4].copy_from_slice(&TDEF_MARKER);
        put_u32(
            &mut page,
            format.offset_next_table_def_page,
            page_numbers.get(i + 2).copied().unwrap_or(0),
        );
        page[header..header + chunk.len()].copy_from_slice(chunk);
        channel.write_page(&page, page_numbers[i + 1])?;
    }

    if !rest.is_empty() {
        log::debug!(
            "Table definition at page {} continues on {} pages",
            first_page,
            rest.len()
        );
    }
    Ok(())
}

impl TableDefinition {
    pub fn read(channel: &PageChannel, page_number: u32) -> Result<Self> {
        let bytes = read_definition_bytes(channel, page_number)?;
        Self::parse(channel.format(), &bytes, page_number)
    }

    pub fn parse(format: &'static JetFormat, buf: &[u8], page_number: u32) -> Result<Self> {
        if buf.len() < format.offset_index_def_block {
            return Err(StorageError::corrupt(page_number, "table definition too short"));
        }
        let column_count = u16::from_le_bytes([
            buf[format.offset_num_cols],
            buf[format.offset_num_cols + 1],
        ]) as usize;
        let logical_count = get_u32(buf, format.offset_num_index_slots) as usize;
        let data_count = get_u32(buf, format.offset_num_indexes) as usize;
        if logical_count > format.max_indexes_per_table * 2 || data_count > logical_count.max(1) * 2
        {
            return Err(StorageError::corrupt(
                page_number,
                format!("implausible index counts {}/{}", logical_count, data_count),
            ));
        }

        let mut reader = Reader {
            buf,
            pos: format.offset_index_def_block + data_count * format.size_index_definition,
            page: page_number,
        };

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let start = reader.pos;
            reader.skip(format.size_column_header)?;
            columns.push(Column::read(format, buf, start));
        }
        for column in &mut columns {
            column.set_name(reader.name(format)?);
        }
        columns.sort_by_key(|c| c.display_index());
        for (i, column) in columns.iter_mut().enumerate() {
            column.set_index(i);
        }

        let mut index_datas = Vec::with_capacity(data_count);
        for _ in 0..data_count {
            reader.skip(format.skip_before_index)?;
            let mut index_columns = Vec::new();
            for _ in 0..MAX_INDEX_COLUMNS {
                let number = reader.u16()?;
                let flags = reader.u8()?;
                if number != COLUMN_UNUSED {
                    index_columns.push((number, flags));
                }
            }
            let map_row = reader.u8()? as usize;
            let map_page = reader.u24()?;
            let root_page = reader.u32()?;
            reader.skip(format.skip_before_index_flags)?;
            let flags = reader.u8()?;
            reader.skip(format.skip_after_index_flags)?;
            index_datas.push(IndexDataDefinition {
                columns: index_columns,
                usage_map: (map_page, map_row),
                root_page,
                flags,
            });
        }

        let mut indexes = Vec::with_capacity(logical_count);
        for _ in 0..logical_count {
            reader.skip(format.skip_before_index_slot)?;
            let index_number = reader.u32()?;
            let data_number = reader.u32()?;
            let rel_type = reader.u8()?;
            let rel_index = reader.u32()? as i32;
            let rel_table = reader.u32()?;
            let cascade_updates = reader.u8()?;
            let cascade_deletes = reader.u8()?;
            let index_type = reader.u8()?;
            reader.skip(format.skip_after_index_slot)?;

            if data_number as usize >= data_count {
                return Err(StorageError::corrupt(
                    page_number,
                    format!("index {} refers to missing index data {}", index_number, data_number),
                ));
            }
            let reference = (index_type == FOREIGN_KEY_INDEX_TYPE && rel_index != NO_RELATED_INDEX)
                .then(|| IndexReference {
                    other_index_number: rel_index as u32,
                    other_table_page: rel_table,
                    is_primary_table: rel_type == PRIMARY_TABLE_TYPE,
                    cascade_updates: cascade_updates == CASCADE_FLAG,
                    cascade_deletes: cascade_deletes == CASCADE_FLAG,
                });
            indexes.push(LogicalIndexDefinition {
                name: String::new(),
                index_number,
                data_number,
                index_type,
                reference,
            });
        }
        for index in &mut indexes {
            index.name = reader.name(format)?;
        }

        Ok(Self {
            row_count: get_u32(buf, format.offset_num_rows),
            last_auto_number: get_u32(buf, format.offset_next_auto_number),
            table_type: buf[format.offset_table_type],
            columns,
            owned_pages: read_map_location(buf, format.offset_owned_pages),
            free_space_pages: read_map_location(buf, format.offset_free_space_pages),
            index_datas,
            indexes,
        })
    }

    pub fn encode(&self, format: &JetFormat) -> Vec<u8> {
        let mut out = vec![0u8; format.offset_index_def_block];
        out[0] = PageType::TableDefinition as u8;
        out[1] = PAGE_MARKER;
        out[2..4].copy_from_slice(&TDEF_MARKER);
        put_u32(&mut out, format.offset_num_rows, self.row_count);
        put_u32(&mut out, format.offset_next_auto_number, self.last_auto_number);
        out[format.offset_table_type] = self.table_type;

        let var_count = self.columns.iter().filter(|c| c.is_variable_length()).count();
        put_u16(&mut out, format.offset_max_cols, self.columns.len() as u16);
        put_u16(&mut out, format.offset_num_var_cols, var_count as u16);
        put_u16(&mut out, format.offset_num_cols, self.columns.len() as u16);
        put_u32(&mut out, format.offset_num_index_slots, self.indexes.len() as u32);
        put_u32(&mut out, format.offset_num_indexes, self.index_datas.len() as u32);
        for (offset, (page, row)) in [
            (format.offset_owned_pages, self.owned_pages),
            (format.offset_free_space_pages, self.free_space_pages),
        ] {
            out[offset] = row as u8;
            put_u24(&mut out, offset + 1, page);
        }

        // unique entry counts, maintained by Access only
        out.resize(
            out.len() + self.index_datas.len() * format.size_index_definition,
            0,
        );

        for column in &self.columns {
            let start = out.len();
            out.resize(start + format.size_column_header, 0);
            write_column_header(&mut out[start..], column, format);
        }
        for column in &self.columns {
            write_name(&mut out, column.name(), format);
        }

        for data in &self.index_datas {
            let start = out.len();
            if format.skip_before_index >= 4 {
                out.extend_from_slice(&INDEX_MAGIC.to_le_bytes());
                out.resize(start + format.skip_before_index, 0);
            }
            for slot in 0..MAX_INDEX_COLUMNS {
                let (number, flags) = data.columns.get(slot).copied().unwrap_or((COLUMN_UNUSED, 0));
                out.extend_from_slice(&number.to_le_bytes());
                out.push(flags);
            }
            let (map_page, map_row) = data.usage_map;
            out.push(map_row as u8);
            out.extend_from_slice(&map_page.to_le_bytes()[..3]);
            out.extend_from_slice(&data.root_page.to_le_bytes());
            out.resize(out.len() + format.skip_before_index_flags, 0);
            out.push(data.flags);
            out.resize(out.len() + format.skip_after_index_flags, 0);
        }

        for index in &self.indexes {
            let start = out.len();
            if format.skip_before_index_slot >= 4 {
                out.extend_from_slice(&INDEX_MAGIC.to_le_bytes());
                out.resize(start + format.skip_before_index_slot, 0);
            }
            out.extend_from_slice(&index.index_number.to_le_bytes());
            out.extend_from_slice(&index.data_number.to_le_bytes());
            match &index.reference {
                Some(reference) => {
                    out.push(if reference.is_primary_table { PRIMARY_TABLE_TYPE } else { 1 });
                    out.extend_from_slice(&reference.other_index_number.to_le_bytes());
                    out.extend_from_slice(&reference.other_table_page.to_le_bytes());
                    out.push(reference.cascade_updates as u8);
                    out.push(reference.cascade_deletes as u8);
                }
                None => {
                    out.push(0);
                    out.extend_from_slice(&NO_RELATED_INDEX.to_le_bytes());
                    out.extend_from_slice(&0u32.to_le_bytes());
                    out.push(0);
                    out.push(0);
                }
            }
            out.push(index.index_type);
            out.resize(out.len() + format.skip_after_index_slot, 0);
        }
        for index in &self.indexes {
            write_name(&mut out, &index.name, format);
        }
        out.extend_from_slice(&END_OF_DEFINITION.to_le_bytes());

        let data_len = (out.len() - format.size_table_def_page_header) as u32;
        put_u32(&mut out, format.offset_table_def_length, data_len);
        out
    }
}

fn write_column_header(out: &mut [u8], column: &Column, format: &JetFormat) {
    out[format.offset_column_type] = column.data_type().code();
    if format.offset_column_number >= 5 {
        put_u32(out, 1, COLUMN_MAGIC);
    }
    put_u16(out, format.offset_column_number, column.column_number());
    put_u16(out, format.offset_column_variable_table_index, column.var_index());
    put_u16(out, format.offset_column_index, column.display_index());

    if let Some(sort_order) = column.sort_order() {
        put_u16(out, format.offset_column_sort_order, sort_order.code);
        if format.size_sort_order == 4 {
            out[format.offset_column_sort_order + 3] = sort_order.version;
        }
    } else if let (Some(complex_id), Some(at)) = (column.complex_id(), format.offset_column_complex_id) {
        put_u32(out, at, complex_id);
    } else {
        out[format.offset_column_precision] = column.precision();
        out[format.offset_column_scale] = column.scale();
    }

    out[format.offset_column_flags] = column.flags();
    if let Some(at) = format.offset_column_ext_flags {
        out[at] = column.ext_flags();
    }
    put_u16(out, format.offset_column_fixed_data_offset, column.fixed_offset());
    put_u16(out, format.offset_column_length, column.length());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::VERSION_4;
    use crate::index::{ASCENDING_COLUMN_FLAG, PRIMARY_KEY_INDEX_TYPE, UNIQUE_INDEX_FLAG};
    use jetdb_core::{ColumnDefinition, DataType};

    fn sample() -> TableDefinition {
        let id = Column::from_definition(&VERSION_4, &ColumnDefinition::new("Id", DataType::Long), 0, 0, 0)
            .unwrap();
        let name = Column::from_definition(
            &VERSION_4,
            &ColumnDefinition::new("Name", DataType::Text).length(100),
            1,
            0,
            4,
        )
        .unwrap();
        TableDefinition {
            row_count: 12,
            last_auto_number: 40,
            table_type: TYPE_USER_TABLE,
            columns: vec![id, name],
            owned_pages: (7, 0),
            free_space_pages: (7, 1),
            index_datas: vec![IndexDataDefinition {
                columns: vec![(0, ASCENDING_COLUMN_FLAG)],
                usage_map: (7, 2),
                root_page: 9,
                flags: UNIQUE_INDEX_FLAG,
            }],
            indexes: vec![LogicalIndexDefinition {
                name: "PrimaryKey".to_string(),
                index_number: 0,
                data_number: 0,
                index_type: PRIMARY_KEY_INDEX_TYPE,
                reference: None,
            }],
        }
    }

    #[test]
    fn test_encode_then_parse() {
        let definition = sample();
        let bytes = definition.encode(&VERSION_4);
        assert_eq!(bytes[0], PageType::TableDefinition as u8);

        let parsed = TableDefinition::parse(&VERSION_4, &bytes, 3).unwrap();
        assert_eq!(parsed.row_count, 12);
        assert_eq!(parsed.last_auto_number, 40);
        assert_eq!(parsed.table_type, TYPE_USER_TABLE);
        assert_eq!(parsed.owned_pages, (7, 0));
        assert_eq!(parsed.free_space_pages, (7, 1));
        assert_eq!(parsed.index_datas, definition.index_datas);
        assert_eq!(parsed.indexes, definition.indexes);

        let names: Vec<&str> = parsed.columns.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Id", "Name"]);
        assert_eq!(parsed.columns[1].data_type(), DataType::Text);
        assert_eq!(parsed.columns[1].length(), 100);
        assert_eq!(parsed.columns[1].fixed_offset(), 4);
        assert_eq!(parsed.columns[1].index(), 1);
        assert_eq!(parsed.columns[1].sort_order(), definition.columns[1].sort_order());
    }

    #[test]
    fn test_foreign_key_reference() {
        let mut definition = sample();
        definition.indexes.push(LogicalIndexDefinition {
            name: "FK".to_string(),
            index_number: 1,
            data_number: 0,
            index_type: FOREIGN_KEY_INDEX_TYPE,
            reference: Some(IndexReference {
                other_index_number: 2,
                other_table_page: 30,
                is_primary_table: false,
                cascade_updates: true,
                cascade_deletes: false,
            }),
        });
        let parsed = TableDefinition::parse(&VERSION_4, &definition.encode(&VERSION_4), 3).unwrap();
        assert_eq!(parsed.indexes[1], definition.indexes[1]);
    }

    #[test]
    fn test_truncated_definition() {
        let bytes = sample().encode(&VERSION_4);
        let cut = &bytes[..bytes.len() - 20];
        assert!(matches!(
            TableDefinition::parse(&VERSION_4, cut, 3),
            Err(StorageError::CorruptStructure { page: 3, .. })
        ));
    }
}
