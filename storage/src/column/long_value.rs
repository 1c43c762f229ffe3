//! Memo and OLE values. The row holds a 12 byte header: the length with
//! two type bits on top, then either the value itself (inline) or the
//! location of the first row holding it on a long value page.

use crate::file::PageChannel;
use crate::page::{expect_page_type, get_u24, get_u32, put_u24, DataPage, PageType};
use crate::usage::SharedUsageMap;
use crate::{Result, StorageError};
use bytes::BufMut;
use std::collections::HashSet;

/// Values up to this size stay in the row.
pub const MAX_INLINE_LONG_VALUE_SIZE: usize = 64;

const SIZE_LONG_VALUE_DEF: usize = 12;
const LONG_VALUE_LENGTH_MASK: u32 = 0x3FFF_FFFF;

const LONG_VALUE_TYPE_THIS_PAGE: u8 = 0x80;
const LONG_VALUE_TYPE_OTHER_PAGE: u8 = 0x40;
const LONG_VALUE_TYPE_OTHER_PAGES: u8 = 0x00;

/// Each chained row starts with the location of the next one.
const SIZE_CHAIN_LINK: usize = 4;

pub fn read_long_value(channel: &PageChannel, def: &[u8]) -> Result<Vec<u8>> {
    if def.len() < SIZE_LONG_VALUE_DEF {
        return Err(StorageError::corrupt(
            0,
            format!("long value header of {} bytes", def.len()),
        ));
    }

    let length_with_flags = get_u32(def, 0);
    let length = (length_with_flags & LONG_VALUE_LENGTH_MASK) as usize;
    let kind = (length_with_flags >> 24) as u8 & 0xC0;

    match kind {
        LONG_VALUE_TYPE_THIS_PAGE => {
            let data = &def[SIZE_LONG_VALUE_DEF..];
            if data.len() < length {
                return Err(StorageError::corrupt(
                    0,
                    format!("inline long value of {} bytes claims {}", data.len(), length),
                ));
            }
            Ok(data[..length].to_vec())
        }
        LONG_VALUE_TYPE_OTHER_PAGE => {
            let row = def[4] as usize;
            let page = get_u24(def, 5);
            let mut buf = channel.take_shared_buffer();
            let result = read_row(channel, &mut buf, page, row).and_then(|record| {
                if record.len() < length {
                    return Err(StorageError::corrupt(
                        page,
                        format!("long value row {} shorter than {} bytes", row, length),
                    ));
                }
                Ok(record[..length].to_vec())
            });
            channel.release_shared_buffer(buf);
            result
        }
        LONG_VALUE_TYPE_OTHER_PAGES => {
            let mut value = Vec::with_capacity(length);
            let mut row = def[4] as usize;
            let mut page = get_u24(def, 5);
            let mut visited = HashSet::new();
            let mut buf = channel.take_shared_buffer();

            let result = loop {
                if value.len() >= length {
                    break Ok(value);
                }
                if page == 0 || !visited.insert((page, row)) {
                    break Err(StorageError::corrupt(
                        page,
                        "long value chain ends early or loops",
                    ));
                }
                let record = match read_row(channel, &mut buf, page, row) {
                    Ok(record) if record.len() >= SIZE_CHAIN_LINK => record,
                    Ok(_) => break Err(StorageError::corrupt(page, "short long value row")),
                    Err(e) => break Err(e),
                };
                let next_row = record[0] as usize;
                let next_page = get_u24(record, 1);
                let chunk = &record[SIZE_CHAIN_LINK..];
                let take = chunk.len().min(length - value.len());
                value.extend_from_slice(&chunk[..take]);
                row = next_row;
                page = next_page;
            };
            channel.release_shared_buffer(buf);
            result
        }
        other => Err(StorageError::corrupt(
            0,
            format!("unknown long value type 0x{:02X}", other),
        )),
    }
}

fn read_row<'a>(
    channel: &PageChannel,
    buf: &'a mut [u8],
    page: u32,
    row: usize,
) -> Result<&'a [u8]> {
    channel.read_page(buf, page)?;
    let buf: &'a [u8] = buf;
    expect_page_type(buf, page, PageType::Data)?;
    let loc = DataPage::new(buf, channel.format()).row_location(page, row)?;
    Ok(&buf[loc.start..loc.end])
}

/// Writes long values for one table. Values go to the table's current long
/// value page until it is full; new pages join the table's owned pages.
pub struct LongValueStore<'a> {
    channel: &'a PageChannel,
    owned_pages: SharedUsageMap,
    current_page: Option<u32>,
}

impl<'a> LongValueStore<'a> {
    pub fn new(channel: &'a PageChannel, owned_pages: SharedUsageMap, current_page: Option<u32>) -> Self {
        Self {
            channel,
            owned_pages,
            current_page,
        }
    }

    pub fn current_page(&self) -> Option<u32> {
        self.current_page
    }

    /// Stores `data` and returns the column bytes for the row.
    pub fn write(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let length = data.len();
        if length as u64 > LONG_VALUE_LENGTH_MASK as u64 {
            return Err(StorageError::InvalidArgument(format!(
                "Long value of {} bytes is too large",
                length
            )));
        }

        let mut def = Vec::with_capacity(SIZE_LONG_VALUE_DEF + length.min(MAX_INLINE_LONG_VALUE_SIZE));
        if length <= MAX_INLINE_LONG_VALUE_SIZE {
            def.put_u32_le(length as u32 | (LONG_VALUE_TYPE_THIS_PAGE as u32) << 24);
            def.put_u32_le(0);
            def.put_u32_le(0);
            def.put_slice(data);
            return Ok(def);
        }

        let max_row = self.channel.format().data_page_initial_free_space - 2;
        let (kind, (page, row)) = if length <= max_row {
            (LONG_VALUE_TYPE_OTHER_PAGE, self.add_row(data)?)
        } else {
            // written back to front so every row knows its successor
            let chunks: Vec<&[u8]> = data.chunks(max_row - SIZE_CHAIN_LINK).collect();
            let mut next = (0u32, 0usize);
            for chunk in chunks.iter().rev() {
                let mut record = Vec::with_capacity(SIZE_CHAIN_LINK + chunk.len());
                record.put_u8(next.1 as u8);
                record.put_slice(&[0, 0, 0]);
                put_u24(&mut record, 1, next.0);
                record.put_slice(chunk);
                next = self.add_row(&record)?;
            }
            (LONG_VALUE_TYPE_OTHER_PAGES, next)
        };

        def.put_u32_le(length as u32 | (kind as u32) << 24);
        def.put_u8(row as u8);
        def.put_slice(&[0, 0, 0]);
        put_u24(&mut def, 5, page);
        def.put_u32_le(0);
        Ok(def)
    }

    fn add_row(&mut self, record: &[u8]) -> Result<(u32, usize)> {
        let channel = self.channel;
        let format = channel.format();

        if let Some(page_number) = self.current_page {
            let mut buf = channel.take_shared_buffer();
            let result = (|| -> Result<Option<usize>> {
                channel.read_page(&mut buf, page_number)?;
                let mut page = DataPage::new(&mut buf[..], format);
                if !page.is_data_page() || !page.is_long_value_page() {
                    return Ok(None);
                }
                match page.add_record(record, 0) {
                    Some(row) => {
                        channel.write_page(&buf, page_number)?;
                        Ok(Some(row))
                    }
                    None => Ok(None),
                }
            })();
            channel.release_shared_buffer(buf);
            if let Some(row) = result? {
                return Ok((page_number, row));
            }
        }

        let mut page = DataPage::new(vec![0u8; format.page_size], format);
        page.init_long_value();
        let row = page.add_record(record, 0).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "Long value row of {} bytes does not fit on a page",
                record.len()
            ))
        })?;
        let page_number = channel.write_new_page(&page.into_inner())?;
        self.owned_pages.lock().add_page(channel, page_number)?;
        log::debug!("Allocated long value page {}", page_number);

        self.current_page = Some(page_number);
        Ok((page_number, row))
    }
}
