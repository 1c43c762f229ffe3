// storage/src/page/mod.rs

use crate::format::JetFormat;
use crate::{Result, StorageError};

/// Low 13 bits of a row location hold the row start offset.
pub const OFFSET_MASK: u16 = 0x1FFF;
/// Row was deleted.
pub const DELETED_ROW_MASK: u16 = 0x8000;
/// Row holds a pointer to the row's real location.
pub const OVERFLOW_ROW_MASK: u16 = 0x4000;

/// Marker stored in place of the owning table on long value pages.
pub const LONG_VALUE_PAGE_MARKER: [u8; 4] = *b"LVAL";

const PAGE_MARKER: u8 = 0x01;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid = 0,
    Data = 1,
    TableDefinition = 2,
    IndexNode = 3,
    IndexLeaf = 4,
    UsageMap = 5,
}

impl PageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PageType::Invalid),
            1 => Some(PageType::Data),
            2 => Some(PageType::TableDefinition),
            3 => Some(PageType::IndexNode),
            4 => Some(PageType::IndexLeaf),
            5 => Some(PageType::UsageMap),
            _ => None,
        }
    }

    pub fn of(page: &[u8]) -> Option<Self> {
        page.first().copied().and_then(Self::from_byte)
    }
}

/// Fails with `CorruptStructure` unless `page` carries the expected tag.
pub fn expect_page_type(page: &[u8], page_number: u32, expected: PageType) -> Result<()> {
    match PageType::of(page) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(StorageError::corrupt(
            page_number,
            format!("expected {:?} page, found {:?}", expected, actual),
        )),
    }
}

// Fixed offset accessors. Jet stores everything little-endian except the
// row pointers inside index entries.

pub fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn get_u24(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], 0])
}

pub fn put_u24(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 3].copy_from_slice(&value.to_le_bytes()[..3]);
}

pub fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn get_u24_be(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([0, buf[offset], buf[offset + 1], buf[offset + 2]])
}

pub fn put_u24_be(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 3].copy_from_slice(&value.to_be_bytes()[1..]);
}

/// Size-prefixed value reads for fields whose width depends on the format.
pub fn get_uint(buf: &[u8], offset: usize, size: usize) -> usize {
    match size {
        1 => buf[offset] as usize,
        2 => get_u16(buf, offset) as usize,
        _ => get_u32(buf, offset) as usize,
    }
}

pub fn put_uint(buf: &mut [u8], offset: usize, size: usize, value: usize) {
    match size {
        1 => buf[offset] = value as u8,
        2 => put_u16(buf, offset, value as u16),
        _ => put_u32(buf, offset, value as u32),
    }
}

/// Decoded row pointer of a data page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub start: usize,
    pub end: usize,
    pub deleted: bool,
    pub overflow: bool,
}

impl RowLocation {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// View of a data page: a header, a row location table growing up from
/// `offset_row_start` and row data growing down from the end of the page.
pub struct DataPage<B> {
    data: B,
    format: &'static JetFormat,
}

impl<B: AsRef<[u8]>> DataPage<B> {
    pub fn new(data: B, format: &'static JetFormat) -> Self {
        Self { data, format }
    }

    pub fn into_inner(self) -> B {
        self.data
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn is_data_page(&self) -> bool {
        PageType::of(self.bytes()) == Some(PageType::Data)
    }

    /// Page of the table definition owning this page.
    pub fn table_def_page(&self) -> u32 {
        get_u32(self.bytes(), self.format.offset_table_def_location)
    }

    pub fn is_long_value_page(&self) -> bool {
        let at = self.format.offset_table_def_location;
        self.bytes()[at..at + 4] == LONG_VALUE_PAGE_MARKER
    }

    /// True when this is a data page belonging to the given table.
    pub fn is_owned_by(&self, table_def_page: u32) -> bool {
        self.is_data_page() && self.table_def_page() == table_def_page
    }

    pub fn row_count(&self) -> usize {
        get_u16(self.bytes(), self.format.offset_num_rows_on_data_page) as usize
    }

    pub fn free_space(&self) -> usize {
        get_u16(self.bytes(), self.format.offset_free_space) as usize
    }

    pub fn has_space_for(&self, record_size: usize) -> bool {
        self.row_count() < self.format.max_num_rows_on_data_page
            && self.free_space() >= record_size + 2
    }

    fn raw_location(&self, row: usize) -> u16 {
        get_u16(self.bytes(), self.format.offset_row_start + row * 2)
    }

    pub fn row_location(&self, page_number: u32, row: usize) -> Result<RowLocation> {
        if row >= self.row_count() {
            return Err(StorageError::corrupt(
                page_number,
                format!("row {} out of range ({} rows)", row, self.row_count()),
            ));
        }

        let raw = self.raw_location(row);
        let start = (raw & OFFSET_MASK) as usize;
        let end = if row == 0 {
            self.format.page_size
        } else {
            (self.raw_location(row - 1) & OFFSET_MASK) as usize
        };

        let table_end = self.format.offset_row_start + self.row_count() * 2;
        if start < table_end || end > self.format.page_size || start > end {
            return Err(StorageError::corrupt(
                page_number,
                format!("bad bounds {}..{} for row {}", start, end, row),
            ));
        }

        Ok(RowLocation {
            start,
            end,
            deleted: raw & DELETED_ROW_MASK != 0,
            overflow: raw & OVERFLOW_ROW_MASK != 0,
        })
    }

    pub fn get_record(&self, page_number: u32, row: usize) -> Result<&[u8]> {
        let loc = self.row_location(page_number, row)?;
        Ok(&self.bytes()[loc.start..loc.end])
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Formats an empty data page owned by `table_def_page`.
    pub fn init(&mut self, table_def_page: u32) {
        let format = self.format;
        let buf = self.bytes_mut();
        buf.fill(0);
        buf[0] = PageType::Data as u8;
        buf[1] = PAGE_MARKER;
        put_u16(buf, format.offset_free_space, format.data_page_initial_free_space as u16);
        put_u32(buf, format.offset_table_def_location, table_def_page);
    }

    /// Formats an empty page for long value rows.
    pub fn init_long_value(&mut self) {
        self.init(0);
        let at = self.format.offset_table_def_location;
        self.bytes_mut()[at..at + 4].copy_from_slice(&LONG_VALUE_PAGE_MARKER);
    }

    /// Add a record to the page, returning the row number if it fits.
    pub fn add_record(&mut self, record: &[u8], flags: u16) -> Option<usize> {
        if !self.has_space_for(record.len()) {
            return None;
        }

        let format = self.format;
        let row = self.row_count();
        let end = if row == 0 {
            format.page_size
        } else {
            (self.raw_location(row - 1) & OFFSET_MASK) as usize
        };
        let start = end - record.len();
        let free = self.free_space() - record.len() - 2;

        let buf = self.bytes_mut();
        buf[start..end].copy_from_slice(record);
        put_u16(buf, format.offset_row_start + row * 2, start as u16 | flags);
        put_u16(buf, format.offset_num_rows_on_data_page, (row + 1) as u16);
        put_u16(buf, format.offset_free_space, free as u16);

        Some(row)
    }

    /// Rewrites a row in its existing slot. The record must be exactly as
    /// long as the slot.
    pub fn overwrite_record(&mut self, page_number: u32, row: usize, record: &[u8]) -> Result<()> {
        let loc = self.row_location(page_number, row)?;
        if loc.len() != record.len() {
            return Err(StorageError::InvalidArgument(format!(
                "record of {} bytes does not fill row slot of {} bytes",
                record.len(),
                loc.len()
            )));
        }
        self.bytes_mut()[loc.start..loc.end].copy_from_slice(record);
        Ok(())
    }

    /// Replaces the flag bits of a row location, keeping its offset.
    pub fn set_row_flags(&mut self, page_number: u32, row: usize, flags: u16) -> Result<()> {
        self.row_location(page_number, row)?;
        let at = self.format.offset_row_start + row * 2;
        let raw = self.raw_location(row);
        put_u16(self.bytes_mut(), at, (raw & OFFSET_MASK) | flags);
        Ok(())
    }

    /// Marks a row deleted. Space is not reclaimed.
    pub fn delete_record(&mut self, page_number: u32, row: usize) -> Result<()> {
        self.set_row_flags(page_number, row, DELETED_ROW_MASK | OVERFLOW_ROW_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{VERSION_3, VERSION_4};

    fn new_page(format: &'static JetFormat) -> DataPage<Vec<u8>> {
        let mut page = DataPage::new(vec![0u8; format.page_size], format);
        page.init(42);
        page
    }

    #[test]
    fn test_page_creation() {
        let page = new_page(&VERSION_4);

        assert!(page.is_data_page());
        assert!(page.is_owned_by(42));
        assert!(!page.is_owned_by(41));
        assert_eq!(page.row_count(), 0);
        assert_eq!(page.free_space(), 4096 - 14);
    }

    #[test]
    fn test_jet3_header_layout() {
        let page = new_page(&VERSION_3);
        assert_eq!(page.free_space(), 2048 - 10);
        assert_eq!(get_u32(&page.into_inner(), 4), 42);
    }

    #[test]
    fn test_add_record() {
        let mut page = new_page(&VERSION_4);

        // Add first record
        let record1 = b"Hello, World!";
        let row1 = page.add_record(record1, 0).unwrap();

        assert_eq!(row1, 0);
        assert_eq!(page.row_count(), 1);
        assert_eq!(page.get_record(1, row1).unwrap(), record1);

        // Add second record
        let record2 = b"Second record with more data";
        let row2 = page.add_record(record2, 0).unwrap();

        assert_eq!(row2, 1);
        assert_eq!(page.get_record(1, row2).unwrap(), record2);

        // Records grow down from the end of the page
        let loc1 = page.row_location(1, 0).unwrap();
        let loc2 = page.row_location(1, 1).unwrap();
        assert_eq!(loc1.end, 4096);
        assert_eq!(loc2.end, loc1.start);

        let used = record1.len() + record2.len() + 4;
        assert_eq!(page.free_space(), 4096 - 14 - used);
    }

    #[test]
    fn test_delete_record() {
        let mut page = new_page(&VERSION_4);

        let row = page.add_record(b"Delete me", 0).unwrap();
        page.delete_record(1, row).unwrap();

        // Slot still exists, bytes are untouched
        let loc = page.row_location(1, row).unwrap();
        assert!(loc.deleted);
        assert!(loc.overflow);
        assert_eq!(page.get_record(1, row).unwrap(), b"Delete me");
    }

    #[test]
    fn test_has_space_for() {
        let mut page = new_page(&VERSION_4);

        assert!(page.has_space_for(100));
        assert!(!page.has_space_for(4096));

        let big = vec![7u8; 4000];
        page.add_record(&big, 0).unwrap();
        assert!(!page.has_space_for(100));
        assert!(page.add_record(&[0u8; 100], 0).is_none());
    }

    #[test]
    fn test_row_limit() {
        let mut page = new_page(&VERSION_4);
        for _ in 0..255 {
            assert!(page.add_record(&[1, 2, 3], 0).is_some());
        }
        assert!(page.add_record(&[1, 2, 3], 0).is_none());
    }

    #[test]
    fn test_overwrite_requires_same_length() {
        let mut page = new_page(&VERSION_4);
        page.add_record(b"abcd", 0).unwrap();
        page.overwrite_record(1, 0, b"wxyz").unwrap();
        assert_eq!(page.get_record(1, 0).unwrap(), b"wxyz");
        assert!(page.overwrite_record(1, 0, b"xyz").is_err());
    }

    #[test]
    fn test_out_of_range_row() {
        let page = new_page(&VERSION_4);
        assert!(matches!(
            page.row_location(9, 0),
            Err(StorageError::CorruptStructure { page: 9, .. })
        ));
    }

    #[test]
    fn test_byte_helpers() {
        let mut buf = [0u8; 8];
        put_u24(&mut buf, 0, 0x123456);
        assert_eq!(&buf[..3], &[0x56, 0x34, 0x12]);
        assert_eq!(get_u24(&buf, 0), 0x123456);

        put_u24_be(&mut buf, 4, 0x123456);
        assert_eq!(&buf[4..7], &[0x12, 0x34, 0x56]);
        assert_eq!(get_u24_be(&buf, 4), 0x123456);

        assert_eq!(PageType::from_byte(4), Some(PageType::IndexLeaf));
        assert_eq!(PageType::from_byte(9), None);
    }
}
