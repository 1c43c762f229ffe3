//! Version specific layout constants.
//!
//! Every file version is described by one [`JetFormat`] table. Later
//! versions start from their predecessor's table and override a handful of
//! fields, so hot-path offset lookups are plain field reads.

use crate::{Result, StorageError};
use jetdb_core::{DataType, SortOrder};
use std::fmt;

/// Offset of the version byte in the header page.
pub const OFFSET_VERSION: usize = 0x14;
/// Offset and length of the engine name in the header page.
pub const OFFSET_ENGINE_NAME: usize = 0x04;
pub const LENGTH_ENGINE_NAME: usize = 0x0F;

const CODE_VERSION_3: u8 = 0x00;
const CODE_VERSION_4: u8 = 0x01;
const CODE_VERSION_12: u8 = 0x02;
const CODE_VERSION_14: u8 = 0x03;
const CODE_VERSION_16: u8 = 0x05;
const CODE_VERSION_17: u8 = 0x06;

pub const ENGINE_NAME_JET: &[u8; 15] = b"Standard Jet DB";
pub const ENGINE_NAME_ACE: &[u8; 15] = b"Standard ACE DB";
pub const ENGINE_NAME_MSISAM: &[u8; 15] = b"MSISAM Database";

/// XOR mask applied to the header page from `offset_masked_header` on.
static BASE_HEADER_MASK: [u8; 128] = [
    0xB5, 0x6F, 0x03, 0x62, 0x61, 0x08, 0xC2, 0x55, 0xEB, 0xA9, 0x67, 0x72, 0x43, 0x3F, 0x00, 0x9C,
    0x7A, 0x9F, 0x90, 0xFF, 0x80, 0x9A, 0x31, 0xC5, 0x79, 0xBA, 0xED, 0x30, 0xBC, 0xDF, 0xCC, 0x9D,
    0x63, 0xD9, 0xE4, 0xC3, 0x7B, 0x42, 0xFB, 0x8A, 0xBC, 0x4E, 0x86, 0xFB, 0xEC, 0x37, 0x5D, 0x44,
    0x9C, 0xFA, 0xC6, 0x5E, 0x28, 0xE6, 0x13, 0xB6, 0x8A, 0x60, 0x54, 0x94, 0x7B, 0x36, 0xF5, 0x72,
    0xDF, 0xB1, 0x77, 0xF4, 0x13, 0x43, 0xCF, 0xAF, 0xB1, 0x33, 0x34, 0x61, 0x79, 0x5B, 0x92, 0xB5,
    0x7C, 0x2A, 0x05, 0xF1, 0x7C, 0x99, 0x01, 0x1B, 0x98, 0xFD, 0x12, 0x4F, 0x4A, 0x94, 0x6C, 0x3E,
    0x60, 0x26, 0x5F, 0x95, 0xF8, 0xD0, 0x89, 0x24, 0x85, 0x67, 0xC6, 0x1F, 0x27, 0x44, 0xD2, 0xEE,
    0xCF, 0x65, 0xED, 0xFF, 0x07, 0xC7, 0x46, 0xA1, 0x78, 0x16, 0x0C, 0xED, 0xE9, 0x2D, 0x62, 0xD4,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileVersion {
    /// Jet 3, Access 97.
    Version3,
    /// Jet 4, Access 2000 to 2003.
    Version4,
    /// Microsoft Works databases, Jet 4 layout.
    Msisam,
    /// ACE 12, Access 2007.
    Version12,
    /// ACE 14, Access 2010.
    Version14,
    /// ACE 16, Access 2016.
    Version16,
    /// ACE 17, Access 2019.
    Version17,
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileVersion::Version3 => "VERSION_3",
            FileVersion::Version4 => "VERSION_4",
            FileVersion::Msisam => "MSISAM",
            FileVersion::Version12 => "VERSION_12",
            FileVersion::Version14 => "VERSION_14",
            FileVersion::Version16 => "VERSION_16",
            FileVersion::Version17 => "VERSION_17",
        };
        f.write_str(name)
    }
}

/// How pages other than the header are encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    None,
    /// RC4 based page encoding of Jet 3 and Jet 4.
    LegacyEncrypted,
    /// Office crypto of ACE files.
    OfficeEncrypted,
    /// MSISAM encoding.
    ProprietaryEncrypted,
}

/// Character encoding of text stored in rows and definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// One byte per character in the database code page.
    SingleByte,
    Utf16Le,
}

/// Layout table for one file version.
#[derive(Debug)]
pub struct JetFormat {
    pub version: FileVersion,
    pub version_code: u8,
    pub engine_name: &'static [u8; 15],

    pub read_only: bool,
    pub indexes_supported: bool,
    pub codec_type: CodecType,
    pub legacy_numeric_indexes: bool,
    pub default_sort_order: SortOrder,
    pub charset: Charset,

    pub complex_supported: bool,
    pub big_int_supported: bool,
    pub ext_date_supported: bool,
    pub calculated_supported: bool,

    pub page_size: usize,
    pub max_database_size: u64,
    pub max_row_size: usize,

    // header page
    pub offset_masked_header: usize,
    pub header_mask_length: usize,
    pub offset_header_date: Option<usize>,
    pub offset_password: usize,
    pub size_password: usize,
    pub offset_sort_order: usize,
    pub size_sort_order: usize,
    pub offset_code_page: usize,
    pub offset_encoding_key: usize,

    // table definition
    pub offset_next_table_def_page: usize,
    pub offset_table_def_length: usize,
    pub offset_num_rows: usize,
    pub offset_next_auto_number: usize,
    pub offset_table_type: usize,
    pub offset_max_cols: usize,
    pub offset_num_var_cols: usize,
    pub offset_num_cols: usize,
    pub offset_num_index_slots: usize,
    pub offset_num_indexes: usize,
    pub offset_owned_pages: usize,
    pub offset_free_space_pages: usize,
    pub offset_index_def_block: usize,
    pub size_table_def_page_header: usize,

    pub size_index_definition: usize,
    pub size_column_header: usize,
    pub size_index_column_block: usize,
    pub size_index_info_block: usize,

    // column definition
    pub offset_column_type: usize,
    pub offset_column_number: usize,
    pub offset_column_variable_table_index: usize,
    pub offset_column_index: usize,
    pub offset_column_precision: usize,
    pub offset_column_scale: usize,
    pub offset_column_sort_order: usize,
    pub offset_column_complex_id: Option<usize>,
    pub offset_column_flags: usize,
    pub offset_column_ext_flags: Option<usize>,
    pub offset_column_fixed_data_offset: usize,
    pub offset_column_length: usize,

    // index definitions
    pub skip_before_index: usize,
    pub skip_before_index_flags: usize,
    pub skip_after_index_flags: usize,
    pub skip_before_index_slot: usize,
    pub skip_after_index_slot: usize,
    pub size_name_length: usize,

    // rows and data pages
    pub size_row_column_count: usize,
    pub size_row_var_col_offset: usize,
    pub offset_free_space: usize,
    pub offset_table_def_location: usize,
    pub offset_num_rows_on_data_page: usize,
    pub offset_row_start: usize,
    pub data_page_initial_free_space: usize,
    pub max_num_rows_on_data_page: usize,

    // usage maps
    pub offset_usage_map_start: usize,
    pub usage_map_table_byte_length: usize,
    pub offset_usage_map_page_data: usize,
    pub offset_reference_map_page_numbers: usize,

    // index pages
    pub offset_prev_index_page: usize,
    pub offset_next_index_page: usize,
    pub offset_child_tail_index_page: usize,
    pub offset_index_compressed_byte_count: usize,
    pub offset_index_entry_mask: usize,
    pub size_index_entry_mask: usize,

    pub max_columns_per_table: usize,
    pub max_indexes_per_table: usize,
    pub max_name_length: usize,
    pub max_text_length: usize,
}

pub static VERSION_3: JetFormat = JetFormat::version_3();
pub static VERSION_4: JetFormat = JetFormat::version_4();
pub static MSISAM: JetFormat = JetFormat::msisam();
pub static VERSION_12: JetFormat = JetFormat::version_12();
pub static VERSION_14: JetFormat = JetFormat::version_14();
pub static VERSION_16: JetFormat = JetFormat::version_16();
pub static VERSION_17: JetFormat = JetFormat::version_17();

impl JetFormat {
    const fn version_4() -> Self {
        const PAGE_SIZE: usize = 4096;
        JetFormat {
            version: FileVersion::Version4,
            version_code: CODE_VERSION_4,
            engine_name: ENGINE_NAME_JET,

            read_only: false,
            indexes_supported: true,
            codec_type: CodecType::LegacyEncrypted,
            legacy_numeric_indexes: true,
            default_sort_order: SortOrder::GENERAL_LEGACY,
            charset: Charset::Utf16Le,

            complex_supported: false,
            big_int_supported: false,
            ext_date_supported: false,
            calculated_supported: false,

            page_size: PAGE_SIZE,
            max_database_size: 2 * 1024 * 1024 * 1024,
            max_row_size: 4060,

            offset_masked_header: 24,
            header_mask_length: 128,
            offset_header_date: Some(114),
            offset_password: 66,
            size_password: 40,
            offset_sort_order: 110,
            size_sort_order: 4,
            offset_code_page: 60,
            offset_encoding_key: 62,

            offset_next_table_def_page: 4,
            offset_table_def_length: 8,
            offset_num_rows: 16,
            offset_next_auto_number: 20,
            offset_table_type: 40,
            offset_max_cols: 41,
            offset_num_var_cols: 43,
            offset_num_cols: 45,
            offset_num_index_slots: 47,
            offset_num_indexes: 51,
            offset_owned_pages: 55,
            offset_free_space_pages: 59,
            offset_index_def_block: 63,
            size_table_def_page_header: 8,

            size_index_definition: 12,
            size_column_header: 25,
            size_index_column_block: 52,
            size_index_info_block: 28,

            offset_column_type: 0,
            offset_column_number: 5,
            offset_column_variable_table_index: 7,
            offset_column_index: 9,
            offset_column_precision: 11,
            offset_column_scale: 12,
            offset_column_sort_order: 11,
            offset_column_complex_id: Some(11),
            offset_column_flags: 15,
            offset_column_ext_flags: Some(16),
            offset_column_fixed_data_offset: 21,
            offset_column_length: 23,

            skip_before_index: 4,
            skip_before_index_flags: 4,
            skip_after_index_flags: 5,
            skip_before_index_slot: 4,
            skip_after_index_slot: 4,
            size_name_length: 2,

            size_row_column_count: 2,
            size_row_var_col_offset: 2,
            offset_free_space: 2,
            offset_table_def_location: 4,
            offset_num_rows_on_data_page: 12,
            offset_row_start: 14,
            data_page_initial_free_space: PAGE_SIZE - 14,
            max_num_rows_on_data_page: 255,

            offset_usage_map_start: 5,
            usage_map_table_byte_length: 64,
            offset_usage_map_page_data: 4,
            offset_reference_map_page_numbers: 1,

            offset_prev_index_page: 12,
            offset_next_index_page: 16,
            offset_child_tail_index_page: 20,
            offset_index_compressed_byte_count: 24,
            offset_index_entry_mask: 27,
            size_index_entry_mask: 453,

            max_columns_per_table: 255,
            max_indexes_per_table: 32,
            max_name_length: 64,
            max_text_length: 255,
        }
    }

    const fn version_3() -> Self {
        const PAGE_SIZE: usize = 2048;
        JetFormat {
            version: FileVersion::Version3,
            version_code: CODE_VERSION_3,
            read_only: true,
            default_sort_order: SortOrder::GENERAL_97,
            charset: Charset::SingleByte,

            page_size: PAGE_SIZE,
            max_database_size: 1024 * 1024 * 1024,
            max_row_size: 2012,

            header_mask_length: 126,
            offset_header_date: None,
            size_password: 20,
            offset_sort_order: 58,
            size_sort_order: 2,

            offset_num_rows: 12,
            offset_next_auto_number: 16,
            offset_table_type: 20,
            offset_max_cols: 21,
            offset_num_var_cols: 23,
            offset_num_cols: 25,
            offset_num_index_slots: 27,
            offset_num_indexes: 31,
            offset_owned_pages: 35,
            offset_free_space_pages: 39,
            offset_index_def_block: 43,

            size_index_definition: 8,
            size_column_header: 18,
            size_index_column_block: 39,
            size_index_info_block: 20,

            offset_column_number: 1,
            offset_column_variable_table_index: 3,
            offset_column_index: 5,
            offset_column_precision: 11,
            offset_column_scale: 12,
            offset_column_sort_order: 9,
            offset_column_complex_id: None,
            offset_column_flags: 13,
            offset_column_ext_flags: None,
            offset_column_fixed_data_offset: 14,
            offset_column_length: 16,

            skip_before_index: 0,
            skip_before_index_flags: 0,
            skip_after_index_flags: 0,
            skip_before_index_slot: 0,
            skip_after_index_slot: 0,
            size_name_length: 1,

            size_row_column_count: 1,
            size_row_var_col_offset: 1,
            offset_num_rows_on_data_page: 8,
            offset_row_start: 10,
            data_page_initial_free_space: PAGE_SIZE - 10,

            usage_map_table_byte_length: 128,

            offset_prev_index_page: 8,
            offset_next_index_page: 12,
            offset_child_tail_index_page: 16,
            offset_index_compressed_byte_count: 20,
            offset_index_entry_mask: 22,
            size_index_entry_mask: 226,
            ..Self::version_4()
        }
    }

    const fn msisam() -> Self {
        JetFormat {
            version: FileVersion::Msisam,
            engine_name: ENGINE_NAME_MSISAM,
            read_only: true,
            codec_type: CodecType::ProprietaryEncrypted,
            ..Self::version_4()
        }
    }

    const fn version_12() -> Self {
        JetFormat {
            version: FileVersion::Version12,
            version_code: CODE_VERSION_12,
            engine_name: ENGINE_NAME_ACE,
            codec_type: CodecType::OfficeEncrypted,
            legacy_numeric_indexes: false,
            complex_supported: true,
            ..Self::version_4()
        }
    }

    const fn version_14() -> Self {
        JetFormat {
            version: FileVersion::Version14,
            version_code: CODE_VERSION_14,
            default_sort_order: SortOrder::GENERAL,
            calculated_supported: true,
            ..Self::version_12()
        }
    }

    const fn version_16() -> Self {
        JetFormat {
            version: FileVersion::Version16,
            version_code: CODE_VERSION_16,
            big_int_supported: true,
            ..Self::version_14()
        }
    }

    const fn version_17() -> Self {
        JetFormat {
            version: FileVersion::Version17,
            version_code: CODE_VERSION_17,
            ext_date_supported: true,
            ..Self::version_16()
        }
    }

    pub fn for_version(version: FileVersion) -> &'static JetFormat {
        match version {
            FileVersion::Version3 => &VERSION_3,
            FileVersion::Version4 => &VERSION_4,
            FileVersion::Msisam => &MSISAM,
            FileVersion::Version12 => &VERSION_12,
            FileVersion::Version14 => &VERSION_14,
            FileVersion::Version16 => &VERSION_16,
            FileVersion::Version17 => &VERSION_17,
        }
    }

    /// Picks the format from the first bytes of a database file.
    ///
    /// Only the version byte and the engine name are inspected, so any
    /// prefix covering the engine name is enough.
    pub fn detect(header: &[u8]) -> Result<&'static JetFormat> {
        if header.is_empty() {
            return Err(StorageError::UnsupportedFormat(
                "Empty database file".to_string(),
            ));
        }
        if header.len() < OFFSET_ENGINE_NAME + LENGTH_ENGINE_NAME + 2 {
            return Err(StorageError::UnsupportedFormat(format!(
                "Database file too short ({} bytes)",
                header.len()
            )));
        }

        let format = match header[OFFSET_VERSION] {
            CODE_VERSION_3 => &VERSION_3,
            CODE_VERSION_4 => {
                let engine = &header[OFFSET_ENGINE_NAME..OFFSET_ENGINE_NAME + LENGTH_ENGINE_NAME];
                if engine == ENGINE_NAME_MSISAM {
                    &MSISAM
                } else {
                    &VERSION_4
                }
            }
            CODE_VERSION_12 => &VERSION_12,
            CODE_VERSION_14 => &VERSION_14,
            CODE_VERSION_16 => &VERSION_16,
            CODE_VERSION_17 => &VERSION_17,
            other => {
                return Err(StorageError::UnsupportedFormat(format!(
                    "Unsupported version code 0x{:02X}",
                    other
                )))
            }
        };

        log::debug!("Detected database format {}", format.version);
        Ok(format)
    }

    pub fn is_supported_data_type(&self, data_type: DataType) -> bool {
        match data_type {
            DataType::Complex => self.complex_supported,
            DataType::BigInt => self.big_int_supported,
            DataType::ExtDateTime => self.ext_date_supported,
            DataType::Unknown(_) => false,
            _ => true,
        }
    }

    pub fn is_supported_calculated_data_type(&self, data_type: DataType) -> bool {
        if !self.calculated_supported {
            return false;
        }
        match data_type {
            DataType::Boolean
            | DataType::Byte
            | DataType::Int
            | DataType::Long
            | DataType::Float
            | DataType::Double
            | DataType::Guid
            | DataType::ShortDateTime
            | DataType::Money
            | DataType::Numeric
            | DataType::Text
            | DataType::Memo => true,
            DataType::BigInt => self.big_int_supported,
            DataType::ExtDateTime => self.ext_date_supported,
            _ => false,
        }
    }

    /// XOR mask applied to the header page starting at
    /// `offset_masked_header`.
    pub fn header_mask(&self) -> &'static [u8] {
        &BASE_HEADER_MASK[..self.header_mask_length]
    }

    /// Offset of the first index entry on an index page.
    pub fn offset_index_entries(&self) -> usize {
        self.offset_index_entry_mask + self.size_index_entry_mask
    }

    /// Number of pages tracked by one usage map page of a reference map.
    pub fn pages_per_usage_map_page(&self) -> u32 {
        ((self.page_size - self.offset_usage_map_page_data) * 8) as u32
    }

    /// Byte length of a usage map row.
    pub fn usage_map_row_length(&self) -> usize {
        self.offset_usage_map_start + self.usage_map_table_byte_length
    }

    pub fn size_text_char(&self) -> usize {
        match self.charset {
            Charset::SingleByte => 1,
            Charset::Utf16Le => 2,
        }
    }
}

impl fmt::Display for JetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(version: u8, engine: &[u8; 15]) -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        bytes[OFFSET_ENGINE_NAME..OFFSET_ENGINE_NAME + 15].copy_from_slice(engine);
        bytes[OFFSET_VERSION] = version;
        bytes
    }

    #[test]
    fn test_detect_versions() {
        let cases = [
            (0x00, ENGINE_NAME_JET, FileVersion::Version3),
            (0x01, ENGINE_NAME_JET, FileVersion::Version4),
            (0x01, ENGINE_NAME_MSISAM, FileVersion::Msisam),
            (0x02, ENGINE_NAME_ACE, FileVersion::Version12),
            (0x03, ENGINE_NAME_ACE, FileVersion::Version14),
            (0x05, ENGINE_NAME_ACE, FileVersion::Version16),
            (0x06, ENGINE_NAME_ACE, FileVersion::Version17),
        ];
        for (code, engine, expected) in cases {
            let format = JetFormat::detect(&header_with(code, engine)).unwrap();
            assert_eq!(format.version, expected);
        }
    }

    #[test]
    fn test_detect_rejects_unknown_and_short_input() {
        assert!(matches!(
            JetFormat::detect(&header_with(0x04, ENGINE_NAME_ACE)),
            Err(StorageError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            JetFormat::detect(&[]),
            Err(StorageError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            JetFormat::detect(&[0u8; 10]),
            Err(StorageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_inherited_fields() {
        assert_eq!(VERSION_3.page_size, 2048);
        assert_eq!(VERSION_3.header_mask().len(), 126);
        assert_eq!(VERSION_4.header_mask().len(), 128);
        assert_eq!(VERSION_17.page_size, 4096);
        assert_eq!(VERSION_17.offset_index_entries(), 480);
        assert_eq!(VERSION_3.offset_index_entries(), 248);
        assert_eq!(VERSION_16.default_sort_order, SortOrder::GENERAL);
        assert_eq!(VERSION_12.default_sort_order, SortOrder::GENERAL_LEGACY);
        assert!(VERSION_3.legacy_numeric_indexes);
        assert!(MSISAM.legacy_numeric_indexes);
        assert!(!VERSION_12.legacy_numeric_indexes);
        assert_eq!(VERSION_12.codec_type, CodecType::OfficeEncrypted);
        assert_eq!(VERSION_4.usage_map_row_length(), 69);
        assert_eq!(VERSION_3.usage_map_row_length(), 133);
    }

    #[test]
    fn test_supported_types() {
        assert!(!VERSION_4.is_supported_data_type(DataType::Complex));
        assert!(VERSION_12.is_supported_data_type(DataType::Complex));
        assert!(!VERSION_14.is_supported_data_type(DataType::BigInt));
        assert!(VERSION_16.is_supported_data_type(DataType::BigInt));
        assert!(VERSION_17.is_supported_data_type(DataType::ExtDateTime));
        assert!(!MSISAM.is_supported_data_type(DataType::Complex));

        assert!(!VERSION_12.is_supported_calculated_data_type(DataType::Text));
        assert!(VERSION_14.is_supported_calculated_data_type(DataType::Text));
        assert!(!VERSION_14.is_supported_calculated_data_type(DataType::BigInt));
        assert!(VERSION_16.is_supported_calculated_data_type(DataType::BigInt));
        assert!(!VERSION_17.is_supported_calculated_data_type(DataType::Ole));
    }
}
