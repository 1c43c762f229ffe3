//! Page encoding hooks.
//!
//! Every page except the header passes through a [`CodecHandler`] on its way
//! to and from disk. Real encryption lives outside this crate; a caller
//! plugs it in by supplying a [`CodecProvider`].

use crate::file::PageChannel;
use crate::format::{Charset, CodecType};
use crate::page::get_u32;
use crate::{Result, StorageError};
use std::borrow::Cow;

pub trait CodecHandler: Send + Sync {
    /// Whether `encode_page` accepts a non-zero page offset. When false,
    /// partial writes are widened to the whole page.
    fn can_encode_partial_page(&self) -> bool;

    /// Whether a page may be decoded in the buffer it was read into.
    fn can_decode_inline(&self) -> bool;

    /// Decodes `input` into `output`. Both are one page long.
    fn decode_page(&self, input: &[u8], output: &mut [u8], page_number: u32) -> Result<()>;

    /// Decodes a page in place. Only called when `can_decode_inline` is true.
    fn decode_page_inline(&self, page: &mut [u8], page_number: u32) -> Result<()> {
        let input = page.to_vec();
        self.decode_page(&input, page, page_number)
    }

    /// Returns the bytes to write for `page`, starting at `page_offset`.
    /// The returned buffer is page sized; bytes before `page_offset` are
    /// ignored.
    fn encode_page<'a>(
        &self,
        page: &'a [u8],
        page_number: u32,
        page_offset: usize,
    ) -> Result<Cow<'a, [u8]>>;
}

pub trait CodecProvider: Send + Sync {
    /// Picks the handler for a freshly opened channel. The channel can read
    /// the header page but no other page yet.
    fn create_handler(
        &self,
        channel: &PageChannel,
        charset: Charset,
    ) -> Result<Box<dyn CodecHandler>>;
}

/// Handler for unencoded files.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCodecHandler;

impl CodecHandler for NoopCodecHandler {
    fn can_encode_partial_page(&self) -> bool {
        true
    }

    fn can_decode_inline(&self) -> bool {
        true
    }

    fn decode_page(&self, input: &[u8], output: &mut [u8], _page_number: u32) -> Result<()> {
        output.copy_from_slice(input);
        Ok(())
    }

    fn decode_page_inline(&self, _page: &mut [u8], _page_number: u32) -> Result<()> {
        Ok(())
    }

    fn encode_page<'a>(
        &self,
        page: &'a [u8],
        _page_number: u32,
        _page_offset: usize,
    ) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(page))
    }
}

/// Handler for encoded files nobody supplied a codec for. Fails on first
/// use so that opening still works for header-only operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCodecHandler;

impl UnsupportedCodecHandler {
    fn error(action: &str) -> StorageError {
        StorageError::UnsupportedCodec(format!(
            "{} not supported. Please choose a CodecProvider which supports the current database encoding",
            action
        ))
    }
}

impl CodecHandler for UnsupportedCodecHandler {
    fn can_encode_partial_page(&self) -> bool {
        true
    }

    fn can_decode_inline(&self) -> bool {
        true
    }

    fn decode_page(&self, _input: &[u8], _output: &mut [u8], _page_number: u32) -> Result<()> {
        Err(Self::error("Decoding"))
    }

    fn decode_page_inline(&self, _page: &mut [u8], _page_number: u32) -> Result<()> {
        Err(Self::error("Decoding"))
    }

    fn encode_page<'a>(
        &self,
        _page: &'a [u8],
        _page_number: u32,
        _page_offset: usize,
    ) -> Result<Cow<'a, [u8]>> {
        Err(Self::error("Encoding"))
    }
}

/// Provider used when the caller does not bring one. It recognizes files
/// which claim an encoding but carry a zero key, and gives up on the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCodecProvider;

impl CodecProvider for DefaultCodecProvider {
    fn create_handler(
        &self,
        channel: &PageChannel,
        _charset: Charset,
    ) -> Result<Box<dyn CodecHandler>> {
        let format = channel.format();
        match format.codec_type {
            CodecType::None => Ok(Box::new(NoopCodecHandler)),
            CodecType::LegacyEncrypted | CodecType::OfficeEncrypted => {
                let key = read_encoding_key(channel)?;
                if key == 0 {
                    Ok(Box::new(NoopCodecHandler))
                } else {
                    log::warn!(
                        "Database {} uses page encoding (key 0x{:08X}) without a codec provider",
                        format.version,
                        key
                    );
                    Ok(Box::new(UnsupportedCodecHandler))
                }
            }
            CodecType::ProprietaryEncrypted => {
                log::warn!("Database {} is always encoded", format.version);
                Ok(Box::new(UnsupportedCodecHandler))
            }
        }
    }
}

/// Reads the encoding key from the (unmasked) header page.
pub fn read_encoding_key(channel: &PageChannel) -> Result<u32> {
    let format = channel.format();
    let mut header = vec![0u8; format.page_size];
    channel.read_page(&mut header, 0)?;
    Ok(get_u32(&header, format.offset_encoding_key))
}
