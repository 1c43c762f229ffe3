use crate::row::{RowId, RowIdKind};
use bytes::{BufMut, Bytes};
use std::cmp::Ordering;
use std::fmt;

/// Row pointer bytes at the end of every entry: 3 byte page, 1 byte row.
pub(crate) const SIZE_ROW_POINTER: usize = 4;
/// Child page number at the end of node entries.
pub(crate) const SIZE_CHILD_POINTER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    AlwaysFirst,
    /// Has key bytes but sorts before every real entry with the same key.
    FirstValid,
    Normal,
    /// Has key bytes but sorts after every real entry with the same key.
    LastValid,
    AlwaysLast,
}

/// One index entry: the sort key of a row and the row's id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    key: Option<Bytes>,
    row_id: RowId,
    kind: EntryKind,
}

impl Entry {
    pub const FIRST: Entry = Entry {
        key: None,
        row_id: RowId::FIRST,
        kind: EntryKind::AlwaysFirst,
    };

    pub const LAST: Entry = Entry {
        key: None,
        row_id: RowId::LAST,
        kind: EntryKind::AlwaysLast,
    };

    pub fn new(key: impl Into<Bytes>, row_id: RowId) -> Self {
        let kind = match row_id.kind() {
            RowIdKind::AlwaysFirst => EntryKind::FirstValid,
            RowIdKind::Normal => EntryKind::Normal,
            RowIdKind::AlwaysLast => EntryKind::LastValid,
        };
        Self {
            key: Some(key.into()),
            row_id,
            kind,
        }
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Whether this entry refers to an actual row.
    pub fn is_valid(&self) -> bool {
        self.kind == EntryKind::Normal
    }

    pub(crate) fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub(crate) fn key_equals(&self, other: &Entry) -> bool {
        self.key.is_some() && self.key == other.key
    }

    /// Bytes of this entry on a page, without a child pointer.
    pub(crate) fn encoded_len(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.len()) + SIZE_ROW_POINTER
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, skip_prefix: usize) {
        if let Some(key) = &self.key {
            out.put_slice(&key[skip_prefix.min(key.len())..]);
        }
        let page = self.row_id.page_number().to_be_bytes();
        out.put_slice(&page[1..]);
        out.put_u8(self.row_id.row_number() as u8);
    }

    /// Parses an entry of `len` bytes, minus any trailing child pointer.
    pub(crate) fn read(bytes: &[u8]) -> Option<Self> {
        let key_len = bytes.len().checked_sub(SIZE_ROW_POINTER)?;
        let pointer = &bytes[key_len..];
        let page = u32::from_be_bytes([0, pointer[0], pointer[1], pointer[2]]);
        Some(Self::new(
            Bytes::copy_from_slice(&bytes[..key_len]),
            RowId::new(page, pointer[3] as u16),
        ))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.key, &other.key) {
            (Some(a), Some(b)) => a
                .as_ref()
                .cmp(b.as_ref())
                .then_with(|| self.row_id.cmp(&other.row_id)),
            _ => self
                .kind
                .cmp(&other.kind)
                .then_with(|| self.row_id.cmp(&other.row_id)),
        }
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => {
                write!(f, "Entry(")?;
                for b in key.iter() {
                    write!(f, "{:02X}", b)?;
                }
                write!(f, ", {})", self.row_id)
            }
            None => write!(f, "Entry({:?})", self.kind),
        }
    }
}
