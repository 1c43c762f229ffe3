// storage/src/index/page.rs

use super::entry::{Entry, SIZE_CHILD_POINTER};
use crate::file::PageChannel;
use crate::format::JetFormat;
use crate::page::{get_u16, get_u32, put_u16, put_u32, PageType};
use crate::{Result, StorageError};

const PAGE_MARKER: u8 = 0x01;
/// The prefix length is stored as a byte by older writers.
const MAX_PREFIX_LEN: usize = 0xFF;

/// A decoded index page. Node pages pair each entry with the child page
/// holding entries up to and including it; `child_tail` holds everything
/// greater than the last entry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexPage {
    pub page_number: u32,
    pub leaf: bool,
    pub prev: u32,
    pub next: u32,
    pub child_tail: u32,
    pub entries: Vec<Entry>,
    pub children: Vec<u32>,
}

impl IndexPage {
    pub fn new_leaf(page_number: u32) -> Self {
        Self {
            page_number,
            leaf: true,
            prev: 0,
            next: 0,
            child_tail: 0,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_node(page_number: u32) -> Self {
        Self {
            leaf: false,
            ..Self::new_leaf(page_number)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.child_tail == 0
    }

    pub fn read(channel: &PageChannel, page_number: u32) -> Result<Self> {
        let mut buf = channel.take_shared_buffer();
        let result = channel
            .read_page(&mut buf, page_number)
            .and_then(|_| Self::decode(channel.format(), &buf, page_number));
        channel.release_shared_buffer(buf);
        result
    }

    pub fn decode(format: &JetFormat, buf: &[u8], page_number: u32) -> Result<Self> {
        let leaf = match PageType::of(buf) {
            Some(PageType::IndexLeaf) => true,
            Some(PageType::IndexNode) => false,
            other => {
                return Err(StorageError::corrupt(
                    page_number,
                    format!("expected index page, found {:?}", other),
                ))
            }
        };

        let prefix_len = get_u16(buf, format.offset_index_compressed_byte_count) as usize & 0xFF;
        let mut page = Self {
            page_number,
            leaf,
            prev: get_u32(buf, format.offset_prev_index_page),
            next: get_u32(buf, format.offset_next_index_page),
            child_tail: get_u32(buf, format.offset_child_tail_index_page),
            entries: Vec::new(),
            children: Vec::new(),
        };

        let pointer_len = if leaf { 0 } else { SIZE_CHILD_POINTER };
        let start = format.offset_index_entries();
        let mask = &buf[format.offset_index_entry_mask..start];
        let mut prefix: &[u8] = &[];
        let mut entry_start = start;
        let mut scratch = Vec::new();

        for bit in 0..mask.len() * 8 {
            if mask[bit / 8] & (1 << (bit % 8)) == 0 {
                continue;
            }
            let entry_end = start + bit;
            if entry_end <= entry_start || entry_end > buf.len() {
                return Err(StorageError::corrupt(page_number, "index entry mask out of range"));
            }

            let raw = &buf[entry_start..entry_end];
            let bytes: &[u8] = if page.entries.is_empty() {
                if prefix_len > raw.len() {
                    return Err(StorageError::corrupt(page_number, "index entry prefix too long"));
                }
                prefix = &buf[entry_start..entry_start + prefix_len];
                raw
            } else {
                scratch.clear();
                scratch.extend_from_slice(prefix);
                scratch.extend_from_slice(raw);
                &scratch
            };

            let entry_len = bytes
                .len()
                .checked_sub(pointer_len)
                .ok_or_else(|| StorageError::corrupt(page_number, "index entry too short"))?;
            let entry = Entry::read(&bytes[..entry_len])
                .ok_or_else(|| StorageError::corrupt(page_number, "index entry too short"))?;
            if page.entries.last().is_some_and(|last| *last >= entry) {
                return Err(StorageError::corrupt(page_number, "index entries out of order"));
            }
            if !leaf {
                let child = &bytes[entry_len..];
                page.children
                    .push(u32::from_be_bytes([child[0], child[1], child[2], child[3]]));
            }
            page.entries.push(entry);
            entry_start = entry_end;
        }

        Ok(page)
    }

    fn prefix_len(&self) -> usize {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) if self.entries.len() > 1 => {
                let a = first.key().unwrap_or_default();
                let b = last.key().unwrap_or_default();
                a.iter()
                    .zip(b)
                    .take_while(|(x, y)| x == y)
                    .count()
                    .min(MAX_PREFIX_LEN)
            }
            _ => 0,
        }
    }

    fn pointer_len(&self) -> usize {
        if self.leaf {
            0
        } else {
            SIZE_CHILD_POINTER
        }
    }

    /// Bytes the entries take on disk, after prefix compression.
    pub fn entries_len(&self) -> usize {
        let prefix = self.prefix_len();
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let len = e.encoded_len() + self.pointer_len();
                if i == 0 {
                    len
                } else {
                    len - prefix
                }
            })
            .sum()
    }

    pub fn fits(&self, format: &JetFormat) -> bool {
        format.offset_index_entries() + self.entries_len() <= format.page_size
    }

    pub fn encode(&self, format: &JetFormat, table_def_page: u32) -> Result<Vec<u8>> {
        if !self.fits(format) {
            return Err(StorageError::InvalidState(format!(
                "Index page {} overflows",
                self.page_number
            )));
        }

        let mut buf = vec![0u8; format.page_size];
        buf[0] = if self.leaf {
            PageType::IndexLeaf as u8
        } else {
            PageType::IndexNode as u8
        };
        buf[1] = PAGE_MARKER;
        put_u32(&mut buf, format.offset_table_def_location, table_def_page);
        put_u32(&mut buf, format.offset_prev_index_page, self.prev);
        put_u32(&mut buf, format.offset_next_index_page, self.next);
        put_u32(&mut buf, format.offset_child_tail_index_page, self.child_tail);

        let prefix = self.prefix_len();
        put_u16(&mut buf, format.offset_index_compressed_byte_count, prefix as u16);

        let start = format.offset_index_entries();
        let mut data = Vec::with_capacity(self.entries_len());
        for (i, entry) in self.entries.iter().enumerate() {
            entry.write(&mut data, if i == 0 { 0 } else { prefix });
            if !self.leaf {
                let child = self.children.get(i).copied().unwrap_or_default();
                data.extend_from_slice(&child.to_be_bytes());
            }
            let end = data.len();
            buf[format.offset_index_entry_mask + end / 8] |= 1 << (end % 8);
        }
        buf[start..start + data.len()].copy_from_slice(&data);
        put_u16(
            &mut buf,
            format.offset_free_space,
            (format.page_size - start - data.len()) as u16,
        );
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FileVersion;
    use crate::row::RowId;

    fn entry(key: &[u8], page: u32, row: u16) -> Entry {
        Entry::new(key.to_vec(), RowId::new(page, row))
    }

    #[test]
    fn test_leaf_round_trip_with_prefix() {
        let format = JetFormat::for_version(FileVersion::Version4);
        let mut page = IndexPage::new_leaf(9);
        page.next = 12;
        page.entries = vec![
            entry(&[0x7F, 0x80, 0x00, 0x01], 5, 0),
            entry(&[0x7F, 0x80, 0x00, 0x02], 5, 1),
            entry(&[0x7F, 0x80, 0x01, 0x00], 6, 0),
        ];
        let buf = page.encode(format, 3).unwrap();
        assert_eq!(buf[0], PageType::IndexLeaf as u8);
        assert_eq!(get_u32(&buf, format.offset_table_def_location), 3);
        assert_eq!(get_u16(&buf, format.offset_index_compressed_byte_count), 2);
        // 8 bytes for the first entry, 6 for each compressed one
        assert_eq!(page.entries_len(), 8 + 6 + 6);
        assert_eq!(
            get_u16(&buf, format.offset_free_space) as usize,
            format.page_size - format.offset_index_entries() - 20
        );

        let decoded = IndexPage::decode(format, &buf, 9).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn test_node_round_trip() {
        let format = JetFormat::for_version(FileVersion::Version3);
        let mut page = IndexPage::new_node(4);
        page.child_tail = 30;
        page.entries = vec![entry(&[0x7F, 0x10], 1, 1), entry(&[0x7F, 0x20], 2, 2)];
        page.children = vec![10, 20];
        let buf = page.encode(format, 2).unwrap();
        assert_eq!(buf[0], PageType::IndexNode as u8);

        let decoded = IndexPage::decode(format, &buf, 4).unwrap();
        assert_eq!(decoded.children, vec![10, 20]);
        assert_eq!(decoded.child_tail, 30);
        assert_eq!(decoded, page);
    }

    #[test]
    fn test_empty_and_overflowing_pages() {
        let format = JetFormat::for_version(FileVersion::Version4);
        let empty = IndexPage::new_leaf(1);
        let decoded = IndexPage::decode(format, &empty.encode(format, 2).unwrap(), 1).unwrap();
        assert!(decoded.is_empty());
        assert!(decoded.leaf);

        let mut full = IndexPage::new_leaf(1);
        for i in 0..1000u32 {
            full.entries.push(entry(&i.to_be_bytes(), i + 1, 0));
        }
        assert!(!full.fits(format));
        assert!(full.encode(format, 2).is_err());
    }

    #[test]
    fn test_rejects_non_index_page() {
        let format = JetFormat::for_version(FileVersion::Version4);
        let buf = vec![0u8; format.page_size];
        assert!(matches!(
            IndexPage::decode(format, &buf, 7),
            Err(StorageError::CorruptStructure { page: 7, .. })
        ));
    }
}
