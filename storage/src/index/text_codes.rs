//! Character tables of the text sort orders.
//!
//! Each table maps a UTF-16 code unit to a [`CharHandler`]. The base table
//! covers `0x00..=0xFF` and the extension table of the general orders covers
//! `0x100..=0xFFFF`, both with one line per character. Tables are parsed on
//! first use and kept for the life of the process.

use crate::format::{FileVersion, JetFormat};
use crate::{Result, StorageError};
use jetdb_core::SortOrder;
use std::sync::OnceLock;

const GEN_97_CODES: &str = include_str!("../../resources/index_codes_gen_97.txt");
const GENLEG_CODES: &str = include_str!("../../resources/index_codes_genleg.txt");
const GENLEG_EXT_CODES: &str = include_str!("../../resources/index_codes_ext_genleg.txt");
const GEN_CODES: &str = include_str!("../../resources/index_codes_gen.txt");
const GEN_EXT_CODES: &str = include_str!("../../resources/index_codes_ext_gen.txt");

const BASE_TABLE_SIZE: usize = 256;
const EXT_TABLE_SIZE: usize = 0x10000 - BASE_TABLE_SIZE;
const MAX_CODE_BYTES: usize = 4;

/// Up to four code bytes stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Codes {
    bytes: [u8; MAX_CODE_BYTES],
    len: u8,
}

impl Codes {
    fn parse(hex: &str) -> std::result::Result<Self, String> {
        if hex.is_empty() || hex.len() % 2 != 0 || hex.len() > MAX_CODE_BYTES * 2 {
            return Err(format!("bad code bytes '{}'", hex));
        }
        let mut bytes = [0u8; MAX_CODE_BYTES];
        for (i, slot) in bytes.iter_mut().take(hex.len() / 2).enumerate() {
            *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| format!("bad code bytes '{}'", hex))?;
        }
        Ok(Self {
            bytes,
            len: (hex.len() / 2) as u8,
        })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CharHandler {
    Simple(Codes),
    International { inline: Codes, extra: u8 },
    Unprintable(Codes),
    /// Adds `modifier` to the previous extra code.
    UnprintableExt(u8),
    InternationalExt { inline: Codes, extra: Codes, crazy: u8 },
    Ignored,
    Surrogate,
}

impl CharHandler {
    fn parse(kind: &str, args: &[&str]) -> std::result::Result<Self, String> {
        let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| format!("bad byte '{}'", s));
        let handler = match (kind, args) {
            ("S", [inline]) => CharHandler::Simple(Codes::parse(inline)?),
            ("I", [inline, extra]) => CharHandler::International {
                inline: Codes::parse(inline)?,
                extra: byte(*extra)?,
            },
            ("U", [codes]) => CharHandler::Unprintable(Codes::parse(codes)?),
            ("P", [modifier]) => CharHandler::UnprintableExt(byte(*modifier)?),
            ("Z", [inline, extra, crazy]) => CharHandler::InternationalExt {
                inline: Codes::parse(inline)?,
                extra: Codes::parse(extra)?,
                crazy: match *crazy {
                    "2" => 0x02,
                    "3" => 0x03,
                    other => return Err(format!("bad crazy flag '{}'", other)),
                },
            },
            ("X", []) => CharHandler::Ignored,
            ("Q", []) => CharHandler::Surrogate,
            _ => return Err(format!("bad handler '{}' with {} arguments", kind, args.len())),
        };
        Ok(handler)
    }

    pub(crate) fn inline_codes(&self) -> Option<&[u8]> {
        match self {
            CharHandler::Simple(inline)
            | CharHandler::International { inline, .. }
            | CharHandler::InternationalExt { inline, .. } => Some(inline.as_slice()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CodeTable {
    base: Vec<CharHandler>,
    /// Empty for the orders without an extension table.
    ext: Vec<CharHandler>,
}

impl CodeTable {
    pub(crate) fn handler(&self, c: u16) -> CharHandler {
        let c = c as usize;
        if c < BASE_TABLE_SIZE {
            return self.base[c];
        }
        self.ext
            .get(c - BASE_TABLE_SIZE)
            .copied()
            .unwrap_or(CharHandler::Ignored)
    }

    fn parse(name: &str, base: &str, ext: Option<&str>) -> std::result::Result<Self, String> {
        let base = content_lines(base)
            .map(|(number, line)| {
                let mut parts = line.split(',');
                let kind = parts.next().unwrap_or_default();
                let args: Vec<&str> = parts.collect();
                CharHandler::parse(kind, &args).map_err(|e| format!("{} line {}: {}", name, number, e))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if base.len() != BASE_TABLE_SIZE {
            return Err(format!(
                "{} has {} characters, expected {}",
                name,
                base.len(),
                BASE_TABLE_SIZE
            ));
        }

        let mut handlers = Vec::new();
        if let Some(ext) = ext {
            handlers.reserve(EXT_TABLE_SIZE);
            for (number, line) in content_lines(ext) {
                let expected = (BASE_TABLE_SIZE + handlers.len()) as u32;
                let handler = parse_ext_line(line, expected)
                    .map_err(|e| format!("{} ext line {}: {}", name, number, e))?;
                handlers.push(handler);
            }
            if handlers.len() != EXT_TABLE_SIZE {
                return Err(format!(
                    "{} ext has {} characters, expected {}",
                    name,
                    handlers.len(),
                    EXT_TABLE_SIZE
                ));
            }
        }

        Ok(Self {
            base,
            ext: handlers,
        })
    }
}

fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Parses `CODE,TYPE[,args]`, where `CODE` must be the next character.
fn parse_ext_line(line: &str, expected: u32) -> std::result::Result<CharHandler, String> {
    let mut parts = line.split(',');
    let code = parts.next().unwrap_or_default();
    let code = u32::from_str_radix(code, 16).map_err(|_| format!("bad character '{}'", code))?;
    if code != expected {
        return Err(format!("expected character {:04X}, found {:04X}", expected, code));
    }
    let kind = parts.next().ok_or("missing handler")?;
    let args: Vec<&str> = parts.collect();
    CharHandler::parse(kind, &args)
}

/// The four text collations the engine can produce keys for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSortOrder {
    /// Access 97.
    General97,
    /// Access 2000 to 2003, and MSISAM.
    ///
    /// Only `0x00..=0xFF` have codes, so text made only of wider characters
    /// encodes like the empty string and unique indexes treat such values as
    /// duplicates of each other.
    GeneralJet4,
    /// ACE files with sort order version 0.
    GeneralLegacy,
    /// ACE files with sort order version 1.
    General,
}

static GENERAL_97: OnceLock<std::result::Result<CodeTable, String>> = OnceLock::new();
static GENERAL_JET4: OnceLock<std::result::Result<CodeTable, String>> = OnceLock::new();
static GENERAL_LEGACY: OnceLock<std::result::Result<CodeTable, String>> = OnceLock::new();
static GENERAL: OnceLock<std::result::Result<CodeTable, String>> = OnceLock::new();

impl TextSortOrder {
    /// Collation used for a text column, `None` for sort orders other than
    /// the general ones.
    pub fn for_column(sort_order: SortOrder, format: &JetFormat) -> Option<Self> {
        if !sort_order.is_general() {
            return None;
        }
        Some(match format.version {
            FileVersion::Version3 => TextSortOrder::General97,
            FileVersion::Version4 | FileVersion::Msisam => TextSortOrder::GeneralJet4,
            _ if sort_order.version == SortOrder::GENERAL.version => TextSortOrder::General,
            _ => TextSortOrder::GeneralLegacy,
        })
    }

    pub(crate) fn table(self) -> Result<&'static CodeTable> {
        let (cell, name, base, ext) = match self {
            TextSortOrder::General97 => (&GENERAL_97, "index_codes_gen_97", GEN_97_CODES, None),
            TextSortOrder::GeneralJet4 => (&GENERAL_JET4, "index_codes_genleg", GENLEG_CODES, None),
            TextSortOrder::GeneralLegacy => (
                &GENERAL_LEGACY,
                "index_codes_genleg",
                GENLEG_CODES,
                Some(GENLEG_EXT_CODES),
            ),
            TextSortOrder::General => (&GENERAL, "index_codes_gen", GEN_CODES, Some(GEN_EXT_CODES)),
        };
        cell.get_or_init(|| {
            let table = CodeTable::parse(name, base, ext);
            match &table {
                Ok(_) => log::debug!("Loaded sort order table {}", name),
                Err(e) => log::error!("Failed loading sort order table {}: {}", name, e),
            }
            table
        })
        .as_ref()
        .map_err(|e| StorageError::Configuration(e.clone()))
    }
}
