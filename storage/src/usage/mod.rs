//! Usage maps record sets of page numbers: the pages owned by a table, the
//! pages with free space, or the free pages of the whole file.
//!
//! A map lives in a row of some data page. Inline maps hold a start page
//! and a bitmap directly in the row; reference maps hold pointers to
//! dedicated usage map pages, each carrying a bitmap for a fixed span of
//! page numbers. The full set is kept in memory and every change is
//! written through.

use crate::file::PageChannel;
use crate::format::JetFormat;
use crate::page::{expect_page_type, get_u32, put_u32, DataPage, PageType};
use crate::{Result, StorageError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

const MAP_TYPE_INLINE: u8 = 0x00;
const MAP_TYPE_REFERENCE: u8 = 0x01;

pub type SharedUsageMap = Arc<Mutex<UsageMap>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum MapKind {
    Inline { start_page: u32 },
    /// One slot per span of `pages_per_usage_map_page` pages, 0 when the
    /// span has no map page yet.
    Reference { map_pages: Vec<u32> },
}

#[derive(Debug)]
pub struct UsageMap {
    format: &'static JetFormat,
    /// Location of the map row.
    page_number: u32,
    row_number: usize,
    row_length: usize,
    kind: MapKind,
    pages: BTreeSet<u32>,
    mod_count: u64,
}

/// Bytes of an empty inline map row.
pub fn new_inline_row(format: &JetFormat) -> Vec<u8> {
    let mut row = vec![0u8; format.usage_map_row_length()];
    row[0] = MAP_TYPE_INLINE;
    row
}

impl UsageMap {
    pub fn read(channel: &PageChannel, page_number: u32, row_number: usize) -> Result<Self> {
        let format = channel.format();
        let mut buf = vec![0u8; format.page_size];
        channel.read_page(&mut buf, page_number)?;

        let page = DataPage::new(&buf[..], format);
        expect_page_type(&buf, page_number, PageType::Data)?;
        let row = page.get_record(page_number, row_number)?;
        if row.len() < format.offset_usage_map_start {
            return Err(StorageError::corrupt(
                page_number,
                format!("usage map row {} too short ({} bytes)", row_number, row.len()),
            ));
        }

        let mut pages = BTreeSet::new();
        let kind = match row[0] {
            MAP_TYPE_INLINE => {
                let start_page = get_u32(row, 1);
                collect_bits(&row[format.offset_usage_map_start..], start_page, &mut pages);
                MapKind::Inline { start_page }
            }
            MAP_TYPE_REFERENCE => {
                let span = format.pages_per_usage_map_page();
                let slots = (row.len() - format.offset_reference_map_page_numbers) / 4;
                let mut map_pages = Vec::with_capacity(slots);
                let mut map_buf = vec![0u8; format.page_size];
                for slot in 0..slots {
                    let map_page =
                        get_u32(row, format.offset_reference_map_page_numbers + slot * 4);
                    if map_page != 0 {
                        channel.read_page(&mut map_buf, map_page)?;
                        expect_page_type(&map_buf, map_page, PageType::UsageMap)?;
                        collect_bits(
                            &map_buf[format.offset_usage_map_page_data..],
                            slot as u32 * span,
                            &mut pages,
                        );
                    }
                    map_pages.push(map_page);
                }
                MapKind::Reference { map_pages }
            }
            other => {
                return Err(StorageError::corrupt(
                    page_number,
                    format!("unknown usage map type 0x{:02X}", other),
                ))
            }
        };

        Ok(Self {
            format,
            page_number,
            row_number,
            row_length: row.len(),
            kind,
            pages,
            mod_count: 0,
        })
    }

    pub fn into_shared(self) -> SharedUsageMap {
        Arc::new(Mutex::new(self))
    }

    pub fn location(&self) -> (u32, usize) {
        (self.page_number, self.row_number)
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.kind, MapKind::Inline { .. })
    }

    pub fn contains(&self, page_number: u32) -> bool {
        self.pages.contains(&page_number)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.iter().copied()
    }

    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub fn first_page(&self) -> Option<u32> {
        self.pages.iter().next().copied()
    }

    pub fn last_page(&self) -> Option<u32> {
        self.pages.iter().next_back().copied()
    }

    pub fn next_page_after(&self, page_number: u32) -> Option<u32> {
        self.pages
            .range((Bound::Excluded(page_number), Bound::Unbounded))
            .next()
            .copied()
    }

    pub fn previous_page_before(&self, page_number: u32) -> Option<u32> {
        self.pages.range(..page_number).next_back().copied()
    }

    pub fn add_page(&mut self, channel: &PageChannel, page_number: u32) -> Result<()> {
        if !self.pages.insert(page_number) {
            return Ok(());
        }
        self.mod_count += 1;

        match &self.kind {
            MapKind::Inline { start_page } => {
                let span = self.inline_span();
                if page_number >= *start_page && page_number - *start_page < span {
                    self.write_inline(channel, *start_page)
                } else {
                    self.rebase_or_promote(channel)
                }
            }
            MapKind::Reference { .. } => self.write_reference_bit(channel, page_number, true),
        }
    }

    pub fn remove_page(&mut self, channel: &PageChannel, page_number: u32) -> Result<()> {
        if !self.pages.remove(&page_number) {
            return Ok(());
        }
        self.mod_count += 1;

        match &self.kind {
            MapKind::Inline { start_page } => self.write_inline(channel, *start_page),
            MapKind::Reference { .. } => self.write_reference_bit(channel, page_number, false),
        }
    }

    fn inline_span(&self) -> u32 {
        ((self.row_length - self.format.offset_usage_map_start) * 8) as u32
    }

    /// Moves the inline window when all pages still fit, otherwise turns
    /// the map into a reference map.
    fn rebase_or_promote(&mut self, channel: &PageChannel) -> Result<()> {
        let span = self.inline_span();
        let (first, last) = match (self.first_page(), self.last_page()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(()),
        };

        if last - first < span {
            let start_page = first - first % 8;
            let start_page = if last - start_page < span { start_page } else { first };
            log::debug!(
                "Moving inline usage map at {}:{} to start page {}",
                self.page_number,
                self.row_number,
                start_page
            );
            self.kind = MapKind::Inline { start_page };
            return self.write_inline(channel, start_page);
        }

        log::debug!(
            "Promoting usage map at {}:{} to a reference map",
            self.page_number,
            self.row_number
        );
        let slots = (self.row_length - self.format.offset_reference_map_page_numbers) / 4;
        self.kind = MapKind::Reference {
            map_pages: vec![0; slots],
        };
        let pages: Vec<u32> = self.pages.iter().copied().collect();
        let span = self.format.pages_per_usage_map_page();

        let mut slot_start = 0;
        while slot_start < pages.len() {
            let slot = pages[slot_start] / span;
            let slot_end = pages[slot_start..]
                .iter()
                .position(|p| p / span != slot)
                .map(|n| slot_start + n)
                .unwrap_or(pages.len());
            self.write_reference_span(channel, slot, &pages[slot_start..slot_end])?;
            slot_start = slot_end;
        }
        self.write_row(channel)
    }

    fn write_inline(&self, channel: &PageChannel, start_page: u32) -> Result<()> {
        let start = self.format.offset_usage_map_start;
        let mut row = vec![0u8; self.row_length];
        row[0] = MAP_TYPE_INLINE;
        put_u32(&mut row, 1, start_page);
        for page in self.pages.range(start_page..start_page + self.inline_span()) {
            let bit = (page - start_page) as usize;
            row[start + bit / 8] |= 1 << (bit % 8);
        }
        self.store_row(channel, &row)
    }

    fn write_row(&self, channel: &PageChannel) -> Result<()> {
        match &self.kind {
            MapKind::Inline { start_page } => self.write_inline(channel, *start_page),
            MapKind::Reference { map_pages } => {
                let mut row = vec![0u8; self.row_length];
                row[0] = MAP_TYPE_REFERENCE;
                for (slot, map_page) in map_pages.iter().enumerate() {
                    put_u32(
                        &mut row,
                        self.format.offset_reference_map_page_numbers + slot * 4,
                        *map_page,
                    );
                }
                self.store_row(channel, &row)
            }
        }
    }

    fn store_row(&self, channel: &PageChannel, row: &[u8]) -> Result<()> {
        let mut buf = channel.take_shared_buffer();
        let result = (|| -> Result<()> {
            channel.read_page(&mut buf, self.page_number)?;
            let mut page = DataPage::new(&mut buf[..], self.format);
            page.overwrite_record(self.page_number, self.row_number, row)?;
            channel.write_page(&buf, self.page_number)
        })();
        channel.release_shared_buffer(buf);
        result
    }

    /// Creates the map page for `slot` and writes the bits of `pages`.
    fn write_reference_span(&mut self, channel: &PageChannel, slot: u32, pages: &[u32]) -> Result<()> {
        let format = self.format;
        let span = format.pages_per_usage_map_page();
        let mut map_buf = vec![0u8; format.page_size];
        map_buf[0] = PageType::UsageMap as u8;
        map_buf[1] = 0x01;
        for page in pages {
            let bit = (page - slot * span) as usize;
            map_buf[format.offset_usage_map_page_data + bit / 8] |= 1 << (bit % 8);
        }
        let map_page = channel.append_page(&map_buf)?;

        match &mut self.kind {
            MapKind::Reference { map_pages } => match map_pages.get_mut(slot as usize) {
                Some(entry) => {
                    *entry = map_page;
                    Ok(())
                }
                None => Err(StorageError::corrupt(
                    self.page_number,
                    format!("page span {} beyond reference usage map", slot),
                )),
            },
            MapKind::Inline { .. } => Err(StorageError::InvalidState(
                "inline usage map has no map pages".to_string(),
            )),
        }
    }

    fn write_reference_bit(&mut self, channel: &PageChannel, page_number: u32, set: bool) -> Result<()> {
        let format = self.format;
        let span = format.pages_per_usage_map_page();
        let slot = page_number / span;

        let map_page = match &self.kind {
            MapKind::Reference { map_pages } => map_pages.get(slot as usize).copied(),
            MapKind::Inline { .. } => None,
        };

        match map_page {
            Some(0) if set => {
                self.write_reference_span(channel, slot, &[page_number])?;
                self.write_row(channel)
            }
            Some(0) => Ok(()),
            Some(map_page) => {
                let mut buf = channel.take_shared_buffer();
                let result = (|| -> Result<()> {
                    channel.read_page(&mut buf, map_page)?;
                    expect_page_type(&buf, map_page, PageType::UsageMap)?;
                    let bit = (page_number - slot * span) as usize;
                    let at = format.offset_usage_map_page_data + bit / 8;
                    if set {
                        buf[at] |= 1 << (bit % 8);
                    } else {
                        buf[at] &= !(1 << (bit % 8));
                    }
                    channel.write_page(&buf, map_page)
                })();
                channel.release_shared_buffer(buf);
                result
            }
            None => Err(StorageError::corrupt(
                self.page_number,
                format!("page {} beyond reference usage map", page_number),
            )),
        }
    }
}

fn collect_bits(bitmap: &[u8], first_page: u32, pages: &mut BTreeSet<u32>) {
    for (byte_idx, byte) in bitmap.iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                pages.insert(first_page + (byte_idx * 8 + bit) as u32);
            }
        }
    }
}

/// Position of a [`PageCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePosition {
    BeforeFirst,
    At(u32),
    AfterLast,
}

/// Walks the pages of a usage map in either direction. The map may change
/// underneath; steps are always computed against its current content.
#[derive(Debug, Clone)]
pub struct PageCursor {
    map: SharedUsageMap,
    cur: PagePosition,
    prev: PagePosition,
    last_mod_count: u64,
}

impl PageCursor {
    pub fn new(map: SharedUsageMap) -> Self {
        let last_mod_count = map.lock().mod_count();
        Self {
            map,
            cur: PagePosition::BeforeFirst,
            prev: PagePosition::BeforeFirst,
            last_mod_count,
        }
    }

    pub fn current(&self) -> PagePosition {
        self.cur
    }

    pub fn is_up_to_date(&self) -> bool {
        self.map.lock().mod_count() == self.last_mod_count
    }

    pub fn before_first(&mut self) {
        self.reset(PagePosition::BeforeFirst);
    }

    pub fn after_last(&mut self) {
        self.reset(PagePosition::AfterLast);
    }

    fn reset(&mut self, position: PagePosition) {
        self.cur = position;
        self.prev = position;
        self.last_mod_count = self.map.lock().mod_count();
    }

    pub fn restore_position(&mut self, cur: PagePosition, prev: PagePosition) {
        self.cur = cur;
        self.prev = prev;
        self.last_mod_count = self.map.lock().mod_count();
    }

    /// Moves to the next page, `None` once past the last page.
    pub fn next_page(&mut self) -> Option<u32> {
        let map = self.map.lock();
        let next = match self.cur {
            PagePosition::BeforeFirst => map.first_page(),
            PagePosition::At(page) => map.next_page_after(page),
            PagePosition::AfterLast => None,
        };
        self.last_mod_count = map.mod_count();
        drop(map);

        self.prev = self.cur;
        self.cur = next.map(PagePosition::At).unwrap_or(PagePosition::AfterLast);
        next
    }

    /// Moves to the previous page, `None` once before the first page.
    pub fn previous_page(&mut self) -> Option<u32> {
        let map = self.map.lock();
        let prev = match self.cur {
            PagePosition::BeforeFirst => None,
            PagePosition::At(page) => map.previous_page_before(page),
            PagePosition::AfterLast => map.last_page(),
        };
        self.last_mod_count = map.mod_count();
        drop(map);

        self.prev = self.cur;
        self.cur = prev.map(PagePosition::At).unwrap_or(PagePosition::BeforeFirst);
        prev
    }
}
