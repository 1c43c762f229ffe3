// storage/src/file/mod.rs

use crate::codec::{CodecHandler, NoopCodecHandler};
use crate::format::JetFormat;
use crate::usage::UsageMap;
use crate::{Result, StorageError};
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// Page holding the global usage map, which records free pages.
const GLOBAL_USAGE_MAP_PAGE: u32 = 1;
const GLOBAL_USAGE_MAP_ROW: usize = 0;

/// Number of header bytes read before the format is known.
const FORMAT_HEADER_LENGTH: usize = 0x20;

/// Page level access to a database file.
///
/// All methods take `&self`; the file, the codec and the write state sit
/// behind their own locks. Page writes are only allowed inside a write
/// bracket (see [`PageChannel::write_guard`]), and the file is flushed when
/// the outermost bracket closes if auto sync is on.
pub struct PageChannel {
    file: Mutex<File>,
    format: &'static JetFormat,
    read_only: bool,
    auto_sync: bool,
    codec: RwLock<Arc<dyn CodecHandler>>,
    write_depth: Mutex<usize>,
    shared_buffer: Mutex<Option<Vec<u8>>>,
    global_usage_map: Mutex<Option<UsageMap>>,
}

impl PageChannel {
    pub fn open(path: &Path, read_only: bool, auto_sync: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(StorageError::Io)?;

        let mut header = Vec::with_capacity(FORMAT_HEADER_LENGTH);
        (&mut file)
            .take(FORMAT_HEADER_LENGTH as u64)
            .read_to_end(&mut header)
            .map_err(StorageError::Io)?;
        let format = JetFormat::detect(&header)?;

        let read_only = if format.read_only && !read_only {
            log::info!("Format {} is read-only, opening {:?} read-only", format, path);
            true
        } else {
            read_only
        };

        log::debug!("Opened {:?} as {} (read_only={})", path, format, read_only);
        Ok(Self::with_file(file, format, read_only, auto_sync))
    }

    /// Creates an empty file. The caller writes the header page.
    pub fn create_new(path: &Path, format: &'static JetFormat, auto_sync: bool) -> Result<Self> {
        if format.read_only {
            return Err(StorageError::UnsupportedFormat(format!(
                "Cannot create databases in format {}",
                format
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(StorageError::Io)?;

        Ok(Self::with_file(file, format, false, auto_sync))
    }

    fn with_file(file: File, format: &'static JetFormat, read_only: bool, auto_sync: bool) -> Self {
        Self {
            file: Mutex::new(file),
            format,
            read_only,
            auto_sync,
            codec: RwLock::new(Arc::new(NoopCodecHandler)),
            write_depth: Mutex::new(0),
            shared_buffer: Mutex::new(None),
            global_usage_map: Mutex::new(None),
        }
    }

    pub fn format(&self) -> &'static JetFormat {
        self.format
    }

    pub fn page_size(&self) -> usize {
        self.format.page_size
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_auto_sync(&self) -> bool {
        self.auto_sync
    }

    pub fn set_codec(&self, handler: Box<dyn CodecHandler>) {
        *self.codec.write() = Arc::from(handler);
    }

    fn codec(&self) -> Arc<dyn CodecHandler> {
        Arc::clone(&self.codec.read())
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn page_count(&self) -> Result<u32> {
        Ok((self.file_size()? / self.page_size() as u64) as u32)
    }

    fn page_offset(&self, page_number: u32) -> u64 {
        page_number as u64 * self.page_size() as u64
    }

    fn validate_page_number(&self, file: &File, page_number: u32) -> Result<()> {
        let end = self.page_offset(page_number) + self.page_size() as u64;
        let len = file.metadata()?.len();
        if end > len {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Page {} is outside the file ({} pages)",
                    page_number,
                    len / self.page_size() as u64
                ),
            )));
        }
        Ok(())
    }

    fn apply_header_mask(&self, buf: &mut [u8]) {
        let start = self.format.offset_masked_header;
        for (byte, mask) in buf[start..].iter_mut().zip(self.format.header_mask()) {
            *byte ^= mask;
        }
    }

    /// Reads and decodes a page into the first `page_size` bytes of `buf`.
    pub fn read_page(&self, buf: &mut [u8], page_number: u32) -> Result<()> {
        let page_size = self.page_size();
        if buf.len() < page_size {
            return Err(StorageError::InvalidArgument(format!(
                "Buffer of {} bytes cannot hold a page of {} bytes",
                buf.len(),
                page_size
            )));
        }
        let page = &mut buf[..page_size];

        {
            let mut file = self.file.lock();
            self.validate_page_number(&file, page_number)?;
            file.seek(SeekFrom::Start(self.page_offset(page_number)))?;
            file.read_exact(page)?;
        }

        if page_number == 0 {
            self.apply_header_mask(page);
            return Ok(());
        }

        let codec = self.codec();
        if codec.can_decode_inline() {
            codec.decode_page_inline(page, page_number)
        } else {
            let encoded = page.to_vec();
            codec.decode_page(&encoded, page, page_number)
        }
    }

    pub fn write_page(&self, page: &[u8], page_number: u32) -> Result<()> {
        self.write_page_at(page, page_number, 0)
    }

    /// Writes `page[page_offset..page_size]` to the matching bytes of the
    /// page on disk.
    pub fn write_page_at(&self, page: &[u8], page_number: u32, page_offset: usize) -> Result<()> {
        self.assert_writable()?;
        let page_size = self.page_size();
        if page.len() < page_size || page_offset >= page_size {
            return Err(StorageError::InvalidArgument(format!(
                "Cannot write {} bytes at offset {} of a {} byte page",
                page.len(),
                page_offset,
                page_size
            )));
        }

        let codec = self.codec();
        let widened;
        let (source, offset) = if page_number != 0
            && page_offset != 0
            && !codec.can_encode_partial_page()
        {
            let mut full = vec![0u8; page_size];
            self.read_page(&mut full, page_number)?;
            full[page_offset..].copy_from_slice(&page[page_offset..page_size]);
            widened = full;
            (&widened[..], 0)
        } else {
            (&page[..page_size], page_offset)
        };

        let encoded = self.encode_for_disk(&*codec, source, page_number, offset)?;

        let mut file = self.file.lock();
        self.validate_page_number(&file, page_number)?;
        file.seek(SeekFrom::Start(self.page_offset(page_number) + offset as u64))?;
        file.write_all(&encoded[offset..page_size])?;
        Ok(())
    }

    fn encode_for_disk<'a>(
        &self,
        codec: &dyn CodecHandler,
        page: &'a [u8],
        page_number: u32,
        page_offset: usize,
    ) -> Result<Cow<'a, [u8]>> {
        if page_number == 0 {
            let mut masked = page.to_vec();
            self.apply_header_mask(&mut masked);
            Ok(Cow::Owned(masked))
        } else {
            codec.encode_page(page, page_number, page_offset)
        }
    }

    fn assert_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly(
                "Database was opened read-only".to_string(),
            ));
        }
        if *self.write_depth.lock() == 0 {
            return Err(StorageError::InvalidState(
                "Page write outside of a write operation".to_string(),
            ));
        }
        Ok(())
    }

    /// Appends a zero filled page and returns its number.
    pub fn allocate_page(&self) -> Result<u32> {
        self.assert_writable()?;
        let page_number = self.append_raw(None)?;
        self.remove_from_global_usage_map(page_number)?;
        Ok(page_number)
    }

    /// Appends `page` as a new page and returns its number.
    pub fn write_new_page(&self, page: &[u8]) -> Result<u32> {
        let page_number = self.append_page(page)?;
        self.remove_from_global_usage_map(page_number)?;
        Ok(page_number)
    }

    /// Appends `page` without touching the global usage map. Usage maps
    /// use this for their own pages, and new files for the pages laid out
    /// before the global map exists.
    pub fn append_page(&self, page: &[u8]) -> Result<u32> {
        self.assert_writable()?;
        if page.len() < self.page_size() {
            return Err(StorageError::InvalidArgument(format!(
                "New page of {} bytes is shorter than the page size",
                page.len()
            )));
        }
        self.append_raw(Some(&page[..self.page_size()]))
    }

    fn append_raw(&self, page: Option<&[u8]>) -> Result<u32> {
        let page_size = self.page_size() as u64;
        let codec = self.codec();

        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        if len + page_size > self.format.max_database_size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "Database is at maximum size",
            )));
        }
        if len % page_size != 0 {
            return Err(StorageError::corrupt(
                (len / page_size) as u32,
                format!("File length {} is not a multiple of the page size", len),
            ));
        }

        let page_number = (len / page_size) as u32;
        file.seek(SeekFrom::Start(len))?;
        match page {
            Some(page) => {
                let encoded = self.encode_for_disk(&*codec, page, page_number, 0)?;
                file.write_all(&encoded)?;
            }
            None => file.write_all(&vec![0u8; page_size as usize])?,
        }

        log::trace!("Appended page {}", page_number);
        Ok(page_number)
    }

    /// Marks a page free: its header is cleared and the global usage map
    /// takes it back.
    pub fn deallocate_page(&self, page_number: u32) -> Result<()> {
        self.assert_writable()?;
        if page_number == 0 {
            return Err(StorageError::InvalidArgument(
                "Cannot deallocate the header page".to_string(),
            ));
        }

        let mut buf = self.take_shared_buffer();
        let result = self
            .read_page(&mut buf, page_number)
            .and_then(|_| {
                buf[..4].fill(0);
                self.write_page(&buf, page_number)
            });
        self.release_shared_buffer(buf);
        result?;

        log::trace!("Deallocated page {}", page_number);
        self.with_global_usage_map(|map| map.add_page(self, page_number))
    }

    fn remove_from_global_usage_map(&self, page_number: u32) -> Result<()> {
        self.with_global_usage_map(|map| map.remove_page(self, page_number))
    }

    /// Runs `f` against the global usage map, loading it on first use.
    pub fn with_global_usage_map<T>(
        &self,
        f: impl FnOnce(&mut UsageMap) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.global_usage_map.lock();
        if slot.is_none() {
            *slot = Some(UsageMap::read(
                self,
                GLOBAL_USAGE_MAP_PAGE,
                GLOBAL_USAGE_MAP_ROW,
            )?);
        }
        match slot.as_mut() {
            Some(map) => f(map),
            None => Err(StorageError::InvalidState(
                "Global usage map unavailable".to_string(),
            )),
        }
    }

    /// True when the global usage map lists the page as free. Pages the map
    /// does not cover count as in use.
    pub fn is_free_page(&self, page_number: u32) -> Result<bool> {
        self.with_global_usage_map(|map| Ok(map.contains(page_number)))
    }

    pub fn start_write(&self) {
        *self.write_depth.lock() += 1;
    }

    pub fn start_exclusive_write(&self) -> Result<()> {
        let mut depth = self.write_depth.lock();
        if *depth != 0 {
            return Err(StorageError::InvalidState(
                "Another write operation is currently in progress".to_string(),
            ));
        }
        *depth += 1;
        Ok(())
    }

    pub fn finish_write(&self) -> Result<()> {
        let mut depth = self.write_depth.lock();
        if *depth == 0 {
            return Err(StorageError::InvalidState(
                "No write operation in progress".to_string(),
            ));
        }
        *depth -= 1;
        let done = *depth == 0;
        drop(depth);

        if done && self.auto_sync {
            self.flush()?;
        }
        Ok(())
    }

    pub fn write_guard(&self) -> WriteGuard<'_> {
        self.start_write();
        WriteGuard {
            channel: self,
            finished: false,
        }
    }

    pub fn exclusive_write_guard(&self) -> Result<WriteGuard<'_>> {
        self.start_exclusive_write()?;
        Ok(WriteGuard {
            channel: self,
            finished: false,
        })
    }

    /// Borrows the page sized scratch buffer. A second taker gets a fresh
    /// buffer.
    pub fn take_shared_buffer(&self) -> Vec<u8> {
        self.shared_buffer
            .lock()
            .take()
            .unwrap_or_else(|| vec![0u8; self.page_size()])
    }

    pub fn release_shared_buffer(&self, buf: Vec<u8>) {
        if buf.len() == self.page_size() {
            *self.shared_buffer.lock() = Some(buf);
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.file.lock().sync_all().map_err(StorageError::Io)
    }
}

impl std::fmt::Debug for PageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageChannel")
            .field("format", &self.format.version)
            .field("read_only", &self.read_only)
            .field("auto_sync", &self.auto_sync)
            .finish()
    }
}

/// Open write bracket. Closing it (explicitly with [`WriteGuard::finish`]
/// or on drop) ends the bracket.
pub struct WriteGuard<'a> {
    channel: &'a PageChannel,
    finished: bool,
}

impl WriteGuard<'_> {
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.channel.finish_write()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.channel.finish_write() {
                log::error!("Failed to finish write operation: {}", e);
            }
        }
    }
}
