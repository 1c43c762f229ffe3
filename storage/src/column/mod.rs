//! Column definitions and the conversion of single column values to and
//! from their row representation.

mod long_value;
mod value;

pub use long_value::{read_long_value, LongValueStore, MAX_INLINE_LONG_VALUE_SIZE};
pub use value::{
    decode_text, encode_text, from_date_double, numeric_parts, to_date_double, NUMERIC_SIZE,
};

use crate::file::PageChannel;
use crate::format::JetFormat;
use crate::page::{get_u16, get_u32};
use crate::{Result, StorageError};
use jetdb_core::{ColumnDefinition, DataType, SortOrder, Value};

pub const FIXED_LEN_FLAG_MASK: u8 = 0x01;
pub const UPDATABLE_FLAG_MASK: u8 = 0x02;
pub const AUTO_NUMBER_FLAG_MASK: u8 = 0x04;
pub const AUTO_NUMBER_GUID_FLAG_MASK: u8 = 0x40;

pub const COMPRESSED_UNICODE_EXT_FLAG_MASK: u8 = 0x01;
pub const CALCULATED_EXT_FLAG_MASK: u8 = 0xC0;

/// Reads a sort order stored as a code plus, in 4 byte fields, a version
/// byte at +3. A zero code means "not set" and maps to the format default.
pub fn read_sort_order(buf: &[u8], offset: usize, format: &JetFormat) -> SortOrder {
    let code = get_u16(buf, offset);
    if code == 0 {
        return format.default_sort_order;
    }
    let version = if format.size_sort_order == 4 {
        buf[offset + 3]
    } else {
        format.default_sort_order.version
    };
    SortOrder::new(code, version)
}

#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    data_type: DataType,
    /// Position in the table's column list, which is also the slot of the
    /// column in row arrays.
    index: usize,
    column_number: u16,
    display_index: u16,
    var_index: u16,
    fixed_offset: u16,
    length: u16,
    precision: u8,
    scale: u8,
    flags: u8,
    ext_flags: u8,
    sort_order: Option<SortOrder>,
    complex_id: Option<u32>,
    format: &'static JetFormat,
}

impl Column {
    /// Parses one column header of a table definition. The name is read
    /// separately and set with [`Column::set_name`].
    pub fn read(format: &'static JetFormat, buf: &[u8], offset: usize) -> Self {
        let data_type = DataType::from_code(buf[offset + format.offset_column_type]);
        let flags = buf[offset + format.offset_column_flags];
        let ext_flags = format
            .offset_column_ext_flags
            .map(|at| buf[offset + at])
            .unwrap_or(0);

        let (precision, scale) = if data_type == DataType::Numeric {
            (
                buf[offset + format.offset_column_precision],
                buf[offset + format.offset_column_scale],
            )
        } else {
            (0, 0)
        };

        let sort_order = if data_type.is_textual() {
            Some(read_sort_order(
                buf,
                offset + format.offset_column_sort_order,
                format,
            ))
        } else {
            None
        };

        let complex_id = match (data_type, format.offset_column_complex_id) {
            (DataType::Complex, Some(at)) => Some(get_u32(buf, offset + at)),
            _ => None,
        };

        Self {
            name: String::new(),
            data_type,
            index: 0,
            column_number: get_u16(buf, offset + format.offset_column_number),
            display_index: get_u16(buf, offset + format.offset_column_index),
            var_index: get_u16(buf, offset + format.offset_column_variable_table_index),
            fixed_offset: get_u16(buf, offset + format.offset_column_fixed_data_offset),
            length: get_u16(buf, offset + format.offset_column_length),
            precision,
            scale,
            flags,
            ext_flags,
            sort_order,
            complex_id,
            format,
        }
    }

    /// Lays out a new column. `var_index` and `fixed_offset` are assigned
    /// by the caller which knows the other columns.
    pub fn from_definition(
        format: &'static JetFormat,
        definition: &ColumnDefinition,
        column_number: u16,
        var_index: u16,
        fixed_offset: u16,
    ) -> Result<Self> {
        let data_type = definition.data_type;
        if !format.is_supported_data_type(data_type) {
            return Err(StorageError::InvalidArgument(format!(
                "Data type {} is not supported by {}",
                data_type, format
            )));
        }

        let length = match data_type.fixed_size() {
            Some(size) => size as u16,
            None => match data_type {
                DataType::Text => definition
                    .length
                    .unwrap_or(format.max_text_length as u16 * 2),
                DataType::Binary => definition.length.unwrap_or(255),
                // long value columns store a 12 byte header in the row
                _ => 0,
            },
        };

        let mut flags = UPDATABLE_FLAG_MASK;
        if !data_type.is_variable_length() {
            flags |= FIXED_LEN_FLAG_MASK;
        }
        if definition.auto_number {
            flags |= match data_type {
                DataType::Guid => AUTO_NUMBER_GUID_FLAG_MASK,
                _ => AUTO_NUMBER_FLAG_MASK,
            };
        }

        let ext_flags = if definition.compressed_unicode && data_type.is_textual() {
            COMPRESSED_UNICODE_EXT_FLAG_MASK
        } else {
            0
        };

        let (precision, scale) = if data_type == DataType::Numeric {
            (definition.precision, definition.scale)
        } else {
            (0, 0)
        };

        Ok(Self {
            name: definition.name.clone(),
            data_type,
            index: column_number as usize,
            column_number,
            display_index: column_number,
            var_index,
            fixed_offset,
            length,
            precision,
            scale,
            flags,
            ext_flags,
            sort_order: data_type
                .is_textual()
                .then(|| definition.sort_order.unwrap_or(format.default_sort_order)),
            complex_id: None,
            format,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn column_number(&self) -> u16 {
        self.column_number
    }

    pub fn display_index(&self) -> u16 {
        self.display_index
    }

    pub fn var_index(&self) -> u16 {
        self.var_index
    }

    pub fn fixed_offset(&self) -> u16 {
        self.fixed_offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn ext_flags(&self) -> u8 {
        self.ext_flags
    }

    pub fn sort_order(&self) -> Option<SortOrder> {
        self.sort_order
    }

    pub fn complex_id(&self) -> Option<u32> {
        self.complex_id
    }

    pub fn format(&self) -> &'static JetFormat {
        self.format
    }

    pub fn is_variable_length(&self) -> bool {
        self.flags & FIXED_LEN_FLAG_MASK == 0
    }

    pub fn is_auto_number(&self) -> bool {
        self.flags & (AUTO_NUMBER_FLAG_MASK | AUTO_NUMBER_GUID_FLAG_MASK) != 0
    }

    pub fn is_compressed_unicode(&self) -> bool {
        self.ext_flags & COMPRESSED_UNICODE_EXT_FLAG_MASK != 0
    }

    pub fn is_calculated(&self) -> bool {
        self.ext_flags & CALCULATED_EXT_FLAG_MASK != 0
    }

    /// Value of this column in a row array.
    pub fn row_value<'a>(&self, row: &'a [Value]) -> &'a Value {
        row.get(self.index).unwrap_or(&Value::Null)
    }

    pub fn set_row_value(&self, row: &mut Vec<Value>, value: Value) {
        if row.len() <= self.index {
            row.resize(self.index + 1, Value::Null);
        }
        row[self.index] = value;
    }

    /// Converts `value` into the canonical value of this column type.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        value::coerce(self, value)
    }

    /// Decodes the bytes of this column taken from a row.
    pub fn read_value(&self, data: &[u8], channel: &PageChannel) -> Result<Value> {
        if self.data_type.is_long_value() {
            let bytes = read_long_value(channel, data)?;
            return Ok(match self.data_type {
                DataType::Memo => Value::Text(decode_text(&bytes, self.format)),
                _ => Value::Binary(bytes),
            });
        }
        Ok(value::decode(self, data))
    }

    /// Encodes a coerced non-null value into its row bytes. Long values go
    /// through `long_values`.
    pub fn write_value(&self, value: &Value, long_values: &mut LongValueStore) -> Result<Vec<u8>> {
        if let Value::Raw(bytes) = value {
            return Ok(bytes.clone());
        }
        match (self.data_type, value) {
            (DataType::Memo, Value::Text(text)) => {
                long_values.write(&encode_text(text, self.is_compressed_unicode(), self.format))
            }
            (DataType::Ole, Value::Binary(bytes)) => long_values.write(bytes),
            _ => value::encode(self, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{VERSION_3, VERSION_4};

    fn jet4_column_header(data_type: u8, number: u16, flags: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 25];
        buf[0] = data_type;
        buf[5..7].copy_from_slice(&number.to_le_bytes());
        buf[9..11].copy_from_slice(&number.to_le_bytes());
        buf[15] = flags;
        buf[23..25].copy_from_slice(&4u16.to_le_bytes());
        buf
    }

    #[test]
    fn test_read_jet4_column() {
        let buf = jet4_column_header(0x04, 3, FIXED_LEN_FLAG_MASK | AUTO_NUMBER_FLAG_MASK);
        let column = Column::read(&VERSION_4, &buf, 0);

        assert_eq!(column.data_type(), DataType::Long);
        assert_eq!(column.column_number(), 3);
        assert_eq!(column.length(), 4);
        assert!(!column.is_variable_length());
        assert!(column.is_auto_number());
        assert_eq!(column.sort_order(), None);
    }

    #[test]
    fn test_text_sort_order() {
        let mut buf = jet4_column_header(0x0A, 1, 0);
        buf[11..13].copy_from_slice(&1033u16.to_le_bytes());
        buf[14] = 1;
        let column = Column::read(&VERSION_4, &buf, 0);
        assert_eq!(column.sort_order(), Some(SortOrder::GENERAL));

        buf[11..15].fill(0);
        let column = Column::read(&VERSION_4, &buf, 0);
        assert_eq!(column.sort_order(), Some(SortOrder::GENERAL_LEGACY));
    }

    #[test]
    fn test_jet3_sort_order_has_no_version() {
        let mut buf = vec![0u8; 18];
        buf[0] = 0x0A;
        buf[9..11].copy_from_slice(&1033u16.to_le_bytes());
        let column = Column::read(&VERSION_3, &buf, 0);
        assert_eq!(column.sort_order(), Some(SortOrder::GENERAL_97));
    }

    #[test]
    fn test_from_definition() {
        let def = ColumnDefinition::new("Name", DataType::Text).length(100);
        let column = Column::from_definition(&VERSION_4, &def, 2, 0, 0).unwrap();
        assert!(column.is_variable_length());
        assert!(column.is_compressed_unicode());
        assert_eq!(column.length(), 100);
        assert_eq!(column.sort_order(), Some(SortOrder::GENERAL_LEGACY));

        let def = ColumnDefinition::new("Big", DataType::BigInt);
        assert!(matches!(
            Column::from_definition(&VERSION_4, &def, 0, 0, 0),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_row_value_slots() {
        let def = ColumnDefinition::new("A", DataType::Long);
        let column = Column::from_definition(&VERSION_4, &def, 2, 0, 0).unwrap();

        let mut row = Vec::new();
        assert_eq!(column.row_value(&row), &Value::Null);
        column.set_row_value(&mut row, Value::Long(5));
        assert_eq!(row.len(), 3);
        assert_eq!(column.row_value(&row), &Value::Long(5));
    }
}
