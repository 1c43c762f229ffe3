// storage/src/database/header.rs

//! Fields of the header page (page 0).

use crate::column::{decode_text, encode_text, read_sort_order, to_date_double};
use crate::format::{JetFormat, OFFSET_ENGINE_NAME, OFFSET_VERSION};
use crate::page::{get_u16, get_u32, put_u16};
use crate::{Result, StorageError};
use chrono::NaiveDateTime;
use jetdb_core::SortOrder;

const HEADER_MAGIC: [u8; 4] = [0x00, 0x01, 0x00, 0x00];
const DEFAULT_CODE_PAGE: u16 = 1252;

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseHeader {
    pub password: Option<String>,
    pub sort_order: SortOrder,
    pub code_page: u16,
    pub encoding_key: u32,
    pub creation_date: Option<f64>,
}

/// Bytes the stored password is XORed with. Formats with a creation date
/// mix in its integer part.
fn password_mask(format: &JetFormat, page: &[u8]) -> Option<[u8; 4]> {
    let offset = format.offset_header_date?;
    let bits = page.get(offset..offset + 8)?;
    let date = f64::from_le_bytes(bits.try_into().ok()?);
    Some((date as i32).to_le_bytes())
}

fn apply_password_mask(bytes: &mut [u8], mask: Option<[u8; 4]>) {
    if let Some(mask) = mask {
        for (i, b) in bytes.iter_mut().enumerate() {
            *b ^= mask[i % mask.len()];
        }
    }
}

impl DatabaseHeader {
    /// Reads the header fields from the unmasked header page.
    pub fn parse(format: &JetFormat, page: &[u8]) -> Result<Self> {
        let password_end = format.offset_password + format.size_password;
        let required = password_end
            .max(format.offset_sort_order + format.size_sort_order)
            .max(format.offset_encoding_key + 4)
            .max(format.offset_header_date.map_or(0, |o| o + 8));
        if page.len() < required {
            return Err(StorageError::corrupt(0, "header page truncated"));
        }

        let mask = password_mask(format, page);
        let mut stored = page[format.offset_password..password_end].to_vec();
        apply_password_mask(&mut stored, mask);
        let password = if stored.iter().all(|b| *b == 0) {
            None
        } else {
            let text = decode_text(&stored, format);
            let text = match text.find('\0') {
                Some(end) => text[..end].to_string(),
                None => text,
            };
            (!text.is_empty()).then_some(text)
        };

        Ok(Self {
            password,
            sort_order: read_sort_order(page, format.offset_sort_order, format),
            code_page: get_u16(page, format.offset_code_page),
            encoding_key: get_u32(page, format.offset_encoding_key),
            creation_date: format
                .offset_header_date
                .map(|o| f64::from_le_bytes(page[o..o + 8].try_into().unwrap_or([0; 8]))),
        })
    }

    /// Builds the unmasked header page of a new database.
    pub fn new_page(
        format: &JetFormat,
        sort_order: SortOrder,
        password: Option<&str>,
        created: &NaiveDateTime,
    ) -> Result<Vec<u8>> {
        let mut page = vec![0u8; format.page_size];
        page[..4].copy_from_slice(&HEADER_MAGIC);
        page[OFFSET_ENGINE_NAME..OFFSET_ENGINE_NAME + format.engine_name.len()]
            .copy_from_slice(format.engine_name);
        page[OFFSET_VERSION] = format.version_code;

        if let Some(offset) = format.offset_header_date {
            page[offset..offset + 8].copy_from_slice(&to_date_double(created).to_le_bytes());
        }
        put_u16(&mut page, format.offset_code_page, DEFAULT_CODE_PAGE);
        put_u16(&mut page, format.offset_sort_order, sort_order.code);
        if format.size_sort_order == 4 {
            page[format.offset_sort_order + 3] = sort_order.version;
        }

        let mut stored = vec![0u8; format.size_password];
        if let Some(password) = password {
            let encoded = encode_text(password, false, format);
            if encoded.len() > stored.len() {
                return Err(StorageError::InvalidArgument(format!(
                    "Password is longer than {} bytes",
                    format.size_password
                )));
            }
            stored[..encoded.len()].copy_from_slice(&encoded);
        }
        apply_password_mask(&mut stored, password_mask(format, &page));
        page[format.offset_password..format.offset_password + stored.len()]
            .copy_from_slice(&stored);
        Ok(page)
    }
}
