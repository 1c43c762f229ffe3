//! Order preserving byte encoding of column values.
//!
//! Every indexed column contributes a flag byte followed by its encoded
//! value. Unsigned lexicographic comparison of the concatenated bytes gives
//! the index order; descending columns invert their bytes.

use super::text_codes::{CharHandler, CodeTable, TextSortOrder};
use crate::column::{numeric_parts, to_date_double, Column};
use crate::{Result, StorageError};
use bytes::{BufMut, BytesMut};
use jetdb_core::{DataType, Value};

const ASC_START_FLAG: u8 = 0x7F;
const ASC_NULL_FLAG: u8 = 0x00;
const DESC_START_FLAG: u8 = 0x80;
const DESC_NULL_FLAG: u8 = 0xFF;

/// Partial key bytes that sort before and after every value of a column.
pub(crate) const MIN_VALUE_FLAG: u8 = ASC_NULL_FLAG;
pub(crate) const MAX_VALUE_FLAG: u8 = DESC_NULL_FLAG;

const ASC_BOOLEAN_TRUE: u8 = 0x00;
const ASC_BOOLEAN_FALSE: u8 = 0xFF;

const NUMERIC_POSITIVE: u8 = 0xFF;
const NUMERIC_NEGATIVE: u8 = 0x00;

const MID_GUID: u8 = 0x09;
const END_GUID: u8 = 0x08;

const BINARY_SEGMENT: usize = 8;
const BINARY_MORE_FOLLOWS: u8 = 0x09;

const MONEY_SCALE: u32 = 4;

const END_TEXT: u8 = 0x01;
const END_EXTRA_TEXT: u8 = 0x00;
const INTERNATIONAL_EXTRA_PLACEHOLDER: u8 = 0x02;
const UNPRINTABLE_COUNT_START: usize = 7;
const UNPRINTABLE_COUNT_MULTIPLIER: usize = 4;
const UNPRINTABLE_OFFSET_FLAGS: usize = 0x8000;
const UNPRINTABLE_MIDFIX: u8 = 0x06;
const CRAZY_CODE_START: u8 = 0x80;
const CRAZY_CODE_2: u8 = 0x03;
const CRAZY_CODES_SUFFIX: [u8; 5] = [0xFF, 0x02, 0x80, 0xFF, 0x80];
const CRAZY_CODES_UNPRINT_SUFFIX: u8 = 0xFF;

/// Text is indexed up to the length of the longest text column.
const MAX_TEXT_INDEX_CHARS: usize = 255;

fn start_flag(ascending: bool) -> u8 {
    if ascending {
        ASC_START_FLAG
    } else {
        DESC_START_FLAG
    }
}

fn null_flag(ascending: bool) -> u8 {
    if ascending {
        ASC_NULL_FLAG
    } else {
        DESC_NULL_FLAG
    }
}

fn flip(bytes: &mut [u8]) {
    for b in bytes {
        *b = !*b;
    }
}

/// Why values of `column` cannot be encoded, if they cannot.
pub fn unsupported_reason(column: &Column) -> Option<String> {
    match column.data_type() {
        DataType::Ole | DataType::ExtDateTime | DataType::Unknown(_) => Some(format!(
            "{} column {} cannot be indexed",
            column.data_type(),
            column.name()
        )),
        DataType::Text | DataType::Memo => {
            let sort_order = column.sort_order().unwrap_or(column.format().default_sort_order);
            match TextSortOrder::for_column(sort_order, column.format()) {
                Some(_) => None,
                None => Some(format!(
                    "Sort order {} of column {} is not supported",
                    sort_order,
                    column.name()
                )),
            }
        }
        _ => None,
    }
}

/// Encodes one column value as it appears inside an index entry.
pub fn encode_value(
    value: &Value,
    column: &Column,
    ascending: bool,
    legacy_numeric: bool,
) -> Result<Vec<u8>> {
    let mut out = BytesMut::new();
    write_value(&mut out, value, column, ascending, legacy_numeric)?;
    Ok(out.to_vec())
}

pub(crate) fn write_value(
    out: &mut BytesMut,
    value: &Value,
    column: &Column,
    ascending: bool,
    legacy_numeric: bool,
) -> Result<()> {
    if let Some(reason) = unsupported_reason(column) {
        return Err(StorageError::InvalidArgument(reason));
    }
    if let Value::Raw(_) = value {
        return Err(StorageError::InvalidArgument(format!(
            "Undecoded value of column {} cannot be indexed",
            column.name()
        )));
    }

    // booleans never produce a null flag
    let value = column.coerce(value)?;
    if value.is_null() {
        out.put_u8(null_flag(ascending));
        return Ok(());
    }
    out.put_u8(start_flag(ascending));

    let start = out.len();
    match &value {
        Value::Boolean(b) => out.put_u8(if *b { ASC_BOOLEAN_TRUE } else { ASC_BOOLEAN_FALSE }),
        Value::Byte(v) => out.put_u8(*v),
        Value::Int(v) => write_integer(out, &v.to_be_bytes()),
        Value::Long(v) | Value::ComplexId(v) => write_integer(out, &v.to_be_bytes()),
        Value::BigInt(v) => write_integer(out, &v.to_be_bytes()),
        Value::Money(d) => {
            let (negative, magnitude) = numeric_parts(d, MONEY_SCALE)?;
            let cents = i64::try_from(u128::from_be_bytes(magnitude)).map_err(|_| {
                StorageError::InvalidArgument(format!("Money value {} out of range", d))
            })?;
            let cents = if negative { -cents } else { cents };
            write_integer(out, &cents.to_be_bytes());
        }
        Value::Float(f) => write_floating(out, &f.to_be_bytes()),
        Value::Double(f) => write_floating(out, &f.to_be_bytes()),
        Value::DateTime(dt) => write_floating(out, &to_date_double(dt).to_be_bytes()),
        Value::Numeric(d) => {
            let (negative, mut magnitude) = numeric_parts(d, column.scale() as u32)?;
            if negative {
                out.put_u8(NUMERIC_NEGATIVE);
                flip(&mut magnitude);
            } else {
                out.put_u8(NUMERIC_POSITIVE);
            }
            out.put_slice(&magnitude);
            if !ascending && legacy_numeric {
                // legacy indexes keep the sign byte, so negatives stay first
                flip(&mut out[start + 1..]);
                return Ok(());
            }
        }
        Value::Guid(g) => {
            let mut bytes = g.to_bytes_le();
            if !ascending {
                flip(&mut bytes);
            }
            out.put_slice(&bytes[..8]);
            out.put_u8(MID_GUID);
            out.put_slice(&bytes[8..]);
            out.put_u8(END_GUID);
            return Ok(());
        }
        Value::Binary(bytes) => write_binary(out, bytes),
        Value::Text(text) => {
            let sort_order = column.sort_order().unwrap_or(column.format().default_sort_order);
            let table = TextSortOrder::for_column(sort_order, column.format())
                .ok_or_else(|| {
                    StorageError::InvalidArgument(format!("Sort order {} is not supported", sort_order))
                })?
                .table()?;
            write_text(out, table, text, ascending);
            return Ok(());
        }
        Value::Null | Value::Raw(_) => {}
    }

    if !ascending {
        flip(&mut out[start..]);
    }
    Ok(())
}

/// Big endian two's complement with the sign bit flipped.
fn write_integer(out: &mut BytesMut, bytes: &[u8]) {
    let start = out.len();
    out.put_slice(bytes);
    out[start] ^= 0x80;
}

/// IEEE big endian: non-negative values flip the sign bit, negative ones
/// flip every bit.
fn write_floating(out: &mut BytesMut, bytes: &[u8]) {
    let start = out.len();
    out.put_slice(bytes);
    if out[start] & 0x80 == 0 {
        out[start] ^= 0x80;
    } else {
        flip(&mut out[start..]);
    }
}

/// Eight byte segments followed by 0x09, except for the zero padded last
/// one which is followed by its used length.
fn write_binary(out: &mut BytesMut, bytes: &[u8]) {
    let mut rest = bytes;
    while rest.len() > BINARY_SEGMENT {
        out.put_slice(&rest[..BINARY_SEGMENT]);
        out.put_u8(BINARY_MORE_FOLLOWS);
        rest = &rest[BINARY_SEGMENT..];
    }
    out.put_slice(rest);
    out.put_bytes(0, BINARY_SEGMENT - rest.len());
    out.put_u8(rest.len() as u8);
}

#[derive(Default)]
struct ExtraCodes {
    bytes: Vec<u8>,
    num_chars: usize,
    unprintable_prefix_len: usize,
}

impl ExtraCodes {
    fn write(&mut self, char_offset: usize, codes: Option<&[u8]>, modifier: u8) {
        if self.num_chars < char_offset {
            let fill = char_offset - self.num_chars;
            self.bytes
                .extend(std::iter::repeat(INTERNATIONAL_EXTRA_PLACEHOLDER).take(fill));
            self.num_chars += fill;
        }

        if let Some(codes) = codes {
            self.bytes.extend_from_slice(codes);
            self.num_chars += 1;
            return;
        }

        // a modifier changes the last extra code and is not a char of its own
        match self.bytes.last_mut() {
            Some(last) => *last = last.wrapping_add(modifier),
            None => {
                self.bytes.push(modifier);
                self.unprintable_prefix_len = 1;
            }
        }
    }
}

fn trim_trailing(bytes: &mut Vec<u8>, min: u8, max: u8) {
    while matches!(bytes.last(), Some(b) if (min..=max).contains(b)) {
        bytes.pop();
    }
}

fn write_unprintable(
    unprintable: &mut Vec<u8>,
    char_offset: usize,
    codes: &[u8],
    extra: Option<&ExtraCodes>,
) {
    // offsets count extra code bytes, including the ones not written yet
    let offset = match extra {
        Some(extra) => (extra.bytes.len() + char_offset)
            .saturating_sub(extra.num_chars + extra.unprintable_prefix_len),
        None => char_offset,
    };
    let offset = (UNPRINTABLE_COUNT_START + UNPRINTABLE_COUNT_MULTIPLIER * offset)
        | UNPRINTABLE_OFFSET_FLAGS;
    unprintable.put_u16(offset as u16);
    unprintable.put_u8(UNPRINTABLE_MIDFIX);
    unprintable.extend_from_slice(codes);
}

fn write_crazy(out: &mut BytesMut, crazy: &mut Vec<u8>) {
    trim_trailing(crazy, CRAZY_CODE_2, CRAZY_CODE_2);

    // two bits per char, three chars per byte, high bits first
    let mut code = CRAZY_CODE_START;
    for (i, flag) in crazy.iter().enumerate() {
        code |= flag << ((2 - (i % 3)) * 2);
        if i % 3 == 2 {
            out.put_u8(code);
            code = CRAZY_CODE_START;
        }
    }
    if crazy.len() % 3 != 0 {
        out.put_u8(code);
    }
    out.put_slice(&CRAZY_CODES_SUFFIX);
}

pub(crate) fn write_text(out: &mut BytesMut, table: &CodeTable, text: &str, ascending: bool) {
    let mut chars: Vec<u16> = text.encode_utf16().take(MAX_TEXT_INDEX_CHARS).collect();
    while chars.last() == Some(&(' ' as u16)) {
        chars.pop();
    }

    let start = out.len();
    let mut extra: Option<ExtraCodes> = None;
    let mut unprintable: Option<Vec<u8>> = None;
    let mut crazy: Option<Vec<u8>> = None;
    let mut char_offset = 0;

    for c in chars {
        let handler = table.handler(c);
        let current = char_offset;
        if let Some(inline) = handler.inline_codes() {
            out.put_slice(inline);
            char_offset += 1;
        }

        match handler {
            CharHandler::International { extra: code, .. } => {
                extra.get_or_insert_with(ExtraCodes::default).write(current, Some(&[code]), 0);
            }
            CharHandler::InternationalExt {
                extra: codes,
                crazy: flag,
                ..
            } => {
                extra
                    .get_or_insert_with(ExtraCodes::default)
                    .write(current, Some(codes.as_slice()), 0);
                crazy.get_or_insert_with(Vec::new).push(flag);
            }
            CharHandler::UnprintableExt(modifier) => {
                extra.get_or_insert_with(ExtraCodes::default).write(current, None, modifier);
            }
            CharHandler::Unprintable(codes) => {
                write_unprintable(
                    unprintable.get_or_insert_with(Vec::new),
                    current,
                    codes.as_slice(),
                    extra.as_ref(),
                );
            }
            // surrogate pairs have no codes of their own
            CharHandler::Simple(_) | CharHandler::Ignored | CharHandler::Surrogate => {}
        }
    }

    out.put_u8(END_TEXT);

    let extra_bytes = extra.map(|mut extra| {
        trim_trailing(&mut extra.bytes, 0x00, INTERNATIONAL_EXTRA_PLACEHOLDER);
        extra.bytes
    });
    let has_extra = extra_bytes.as_ref().is_some_and(|b| !b.is_empty());

    if has_extra || unprintable.is_some() || crazy.is_some() {
        if let Some(bytes) = extra_bytes.filter(|b| !b.is_empty()) {
            out.put_slice(&bytes);
        }
        if unprintable.is_some() || crazy.is_some() {
            out.put_u8(END_TEXT);
            out.put_u8(END_TEXT);
            if let Some(mut crazy) = crazy {
                write_crazy(out, &mut crazy);
                if unprintable.is_some() {
                    out.put_u8(CRAZY_CODES_UNPRINT_SUFFIX);
                }
            }
            if let Some(unprintable) = unprintable {
                out.put_u8(END_TEXT);
                out.put_slice(&unprintable);
            }
        }
    }

    if !ascending {
        out.put_u8(END_EXTRA_TEXT);
        flip(&mut out[start..]);
    }
    out.put_u8(END_EXTRA_TEXT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{VERSION_14, VERSION_4};
    use chrono::{Duration, NaiveDate};
    use jetdb_core::ColumnDefinition;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn column(data_type: DataType) -> Column {
        let def = ColumnDefinition::new("c", data_type).precision(10, 2);
        Column::from_definition(&VERSION_14, &def, 0, 0, 0).unwrap()
    }

    fn key(data_type: DataType, value: Value) -> Vec<u8> {
        encode_value(&value, &column(data_type), true, false).unwrap()
    }

    fn desc_key(data_type: DataType, value: Value) -> Vec<u8> {
        encode_value(&value, &column(data_type), false, false).unwrap()
    }

    fn assert_ordered(data_type: DataType, values: Vec<Value>) {
        let keys: Vec<Vec<u8>> = values.iter().map(|v| key(data_type, v.clone())).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{:02X?} !< {:02X?}", pair[0], pair[1]);
        }
        let keys: Vec<Vec<u8>> = values.iter().map(|v| desc_key(data_type, v.clone())).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] > pair[1], "{:02X?} !> {:02X?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_integer_keys() {
        assert_eq!(key(DataType::Long, Value::Long(1)), vec![0x7F, 0x80, 0, 0, 1]);
        assert_eq!(key(DataType::Int, Value::Int(-1)), vec![0x7F, 0x7F, 0xFF]);
        assert_eq!(desc_key(DataType::Long, Value::Long(1)), vec![0x80, 0x7F, 0xFF, 0xFF, 0xFE]);
        assert_eq!(key(DataType::Long, Value::Null), vec![0x00]);
        assert_eq!(desc_key(DataType::Long, Value::Null), vec![0xFF]);

        assert_ordered(
            DataType::Long,
            vec![Value::Long(i32::MIN), Value::Long(-5), Value::Long(0), Value::Long(7), Value::Long(i32::MAX)],
        );
        assert_ordered(DataType::Byte, vec![Value::Byte(0), Value::Byte(1), Value::Byte(255)]);
    }

    #[test]
    fn test_floating_keys() {
        assert_ordered(
            DataType::Double,
            vec![
                Value::Double(f64::NEG_INFINITY),
                Value::Double(-2.5),
                Value::Double(-0.5),
                Value::Double(0.0),
                Value::Double(0.25),
                Value::Double(1e10),
            ],
        );
        let date = |y, m, d| {
            Value::DateTime(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
        };
        assert_ordered(
            DataType::ShortDateTime,
            vec![date(1850, 1, 1), date(1899, 12, 30), date(2024, 2, 29)],
        );
    }

    #[test]
    fn test_numeric_keys() {
        let num = |s: &str| Value::Numeric(Decimal::from_str(s).unwrap());
        assert_ordered(
            DataType::Numeric,
            vec![num("-100.5"), num("-0.01"), num("0"), num("0.01"), num("99.99")],
        );

        let positive = key(DataType::Numeric, num("1"));
        assert_eq!(positive[1], 0xFF);
        assert_eq!(positive.len(), 18);

        // legacy descending keeps negatives before positives
        let col = column(DataType::Numeric);
        let neg = encode_value(&num("-1"), &col, false, true).unwrap();
        let pos = encode_value(&num("1"), &col, false, true).unwrap();
        let big = encode_value(&num("2"), &col, false, true).unwrap();
        assert!(neg < pos);
        assert!(big < pos);
    }

    #[test]
    fn test_money_and_boolean_keys() {
        let money = |s: &str| Value::Money(Decimal::from_str(s).unwrap());
        assert_ordered(DataType::Money, vec![money("-1.5"), money("0"), money("0.0001")]);

        assert_eq!(key(DataType::Boolean, Value::Boolean(true)), vec![0x7F, 0x00]);
        assert_eq!(key(DataType::Boolean, Value::Boolean(false)), vec![0x7F, 0xFF]);
        // null booleans are false
        assert_eq!(key(DataType::Boolean, Value::Null), vec![0x7F, 0xFF]);
        assert_eq!(desc_key(DataType::Boolean, Value::Boolean(true)), vec![0x80, 0xFF]);
    }

    #[test]
    fn test_guid_key_layout() {
        let guid = uuid::Uuid::from_bytes_le([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        let key = key(DataType::Guid, Value::Guid(guid));
        assert_eq!(
            key,
            vec![0x7F, 1, 2, 3, 4, 5, 6, 7, 8, 0x09, 9, 10, 11, 12, 13, 14, 15, 16, 0x08]
        );
        let desc = desc_key(DataType::Guid, Value::Guid(guid));
        assert_eq!(desc[9], 0x09);
        assert_eq!(desc[1], 0xFE);
    }

    #[test]
    fn test_binary_segments() {
        assert_eq!(
            key(DataType::Binary, Value::Binary(vec![0xAA])),
            vec![0x7F, 0xAA, 0, 0, 0, 0, 0, 0, 0, 1]
        );
        let nine = key(DataType::Binary, Value::Binary(vec![1; 9]));
        assert_eq!(nine.len(), 1 + 18);
        assert_eq!(nine[9], 0x09);
        assert_eq!(nine[18], 1);

        assert_ordered(
            DataType::Binary,
            vec![
                Value::Binary(vec![]),
                Value::Binary(vec![0]),
                Value::Binary(vec![1; 8]),
                Value::Binary(vec![1; 9]),
                Value::Binary(vec![2]),
            ],
        );
    }

    #[test]
    fn test_text_keys() {
        let text = |s: &str| Value::Text(s.to_string());
        assert_ordered(
            DataType::Text,
            vec![text(""), text("1"), text("a"), text("ab"), text("abc"), text("b"), text("zz")],
        );

        // case and trailing spaces do not matter
        assert_eq!(key(DataType::Text, text("Hello")), key(DataType::Text, text("hello  ")));

        // diacritics only break ties
        let plain = key(DataType::Text, text("e"));
        let accented = key(DataType::Text, text("é"));
        let next = key(DataType::Text, text("f"));
        assert!(plain < accented && accented < next);
        assert_eq!(accented, key(DataType::Text, text("e\u{0301}")));

        assert_eq!(*key(DataType::Text, text("ab")).last().unwrap(), END_EXTRA_TEXT);
        let desc = desc_key(DataType::Text, text("ab"));
        assert_eq!(&desc[desc.len() - 2..], &[0xFF, 0x00]);
    }

    #[test]
    fn test_text_long_values_truncated() {
        let long = "x".repeat(300);
        let truncated = "x".repeat(MAX_TEXT_INDEX_CHARS);
        assert_eq!(
            key(DataType::Memo, Value::Text(long)),
            key(DataType::Memo, Value::Text(truncated))
        );
    }

    #[test]
    fn test_unprintable_and_crazy_sections() {
        let with_hyphen = key(DataType::Text, Value::Text("a-b".into()));
        let without = key(DataType::Text, Value::Text("ab".into()));
        assert_ne!(with_hyphen, without);
        // same primary weights
        assert_eq!(with_hyphen[..3], without[..3]);

        let superscript = key(DataType::Text, Value::Text("x²".into()));
        assert!(superscript
            .windows(CRAZY_CODES_SUFFIX.len())
            .any(|w| w == CRAZY_CODES_SUFFIX));
    }

    #[test]
    fn test_fixed_width_key_bytes() {
        assert_eq!(key(DataType::Byte, Value::Byte(0xAB)), vec![0x7F, 0xAB]);
        assert_eq!(key(DataType::Float, Value::Float(1.0)), vec![0x7F, 0xBF, 0x80, 0x00, 0x00]);
        assert_eq!(
            key(DataType::Double, Value::Double(-1.0)),
            vec![0x7F, 0x40, 0x0F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            desc_key(DataType::Double, Value::Double(2.0)),
            vec![0x80, 0x3F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );

        let noon = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(
            key(DataType::ShortDateTime, Value::DateTime(noon)),
            vec![0x7F, 0xC0, 0xE6, 0x24, 0xF0, 0x00, 0x00, 0x00, 0x00]
        );

        let money = |s: &str| Value::Money(Decimal::from_str(s).unwrap());
        assert_eq!(
            key(DataType::Money, money("1.5")),
            vec![0x7F, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3A, 0x98]
        );
        assert_eq!(
            key(DataType::Money, money("-0.0001")),
            vec![0x7F, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_numeric_key_bytes() {
        let num = |s: &str| Value::Numeric(Decimal::from_str(s).unwrap());
        let col = column(DataType::Numeric);
        let with = |sign: u8, fill: u8, last: u8, flag: u8| {
            let mut bytes = vec![flag, sign];
            bytes.extend(std::iter::repeat(fill).take(15));
            bytes.push(last);
            bytes
        };

        // precision 10, scale 2: 1 is stored as 100
        assert_eq!(key(DataType::Numeric, num("1")), with(0xFF, 0x00, 0x64, 0x7F));
        assert_eq!(key(DataType::Numeric, num("-1")), with(0x00, 0xFF, 0x9B, 0x7F));
        assert_eq!(desc_key(DataType::Numeric, num("1")), with(0x00, 0xFF, 0x9B, 0x80));
        assert_eq!(
            encode_value(&num("1"), &col, false, true).unwrap(),
            with(0xFF, 0xFF, 0x9B, 0x80)
        );
        assert_eq!(
            encode_value(&num("-1"), &col, false, true).unwrap(),
            with(0x00, 0x00, 0x64, 0x80)
        );
    }

    #[test]
    fn test_guid_and_binary_key_bytes() {
        let guid = uuid::Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(
            key(DataType::Guid, Value::Guid(guid)),
            vec![
                0x7F, 0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x09, 0x88, 0x99, 0xAA,
                0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x08
            ]
        );
        assert_eq!(
            key(DataType::Binary, Value::Binary(b"hello world!".to_vec())),
            vec![
                0x7F, 0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x20, 0x77, 0x6F, 0x09, 0x72, 0x6C, 0x64,
                0x21, 0x00, 0x00, 0x00, 0x00, 0x04
            ]
        );
    }

    #[test]
    fn test_text_key_bytes() {
        let text = |s: &str| key(DataType::Text, Value::Text(s.to_string()));
        assert_eq!(text("A"), vec![0x7F, 0x60, 0x01, 0x00]);
        assert_eq!(text("0"), vec![0x7F, 0x56, 0x01, 0x00]);
        assert_eq!(text("aB"), text("Ab"));
        assert_eq!(text("é"), vec![0x7F, 0x66, 0x01, 0x08, 0x00]);
        assert_eq!(
            text("a-b"),
            vec![0x7F, 0x60, 0x61, 0x01, 0x01, 0x01, 0x01, 0x80, 0x0B, 0x06, 0x20, 0x00]
        );
        assert_eq!(
            text("x²"),
            vec![
                0x7F, 0x7C, 0x58, 0x01, 0x02, 0x05, 0x01, 0x01, 0xFF, 0x02, 0x80, 0xFF, 0x80,
                0x00
            ]
        );
        assert_eq!(
            desc_key(DataType::Text, Value::Text("ab".to_string())),
            vec![0x80, 0x9F, 0x9E, 0xFE, 0xFF, 0x00]
        );

        let long = text(&"a".repeat(300));
        assert_eq!(long.len(), 1 + MAX_TEXT_INDEX_CHARS + 2);
        assert!(long[1..=MAX_TEXT_INDEX_CHARS].iter().all(|b| *b == 0x60));
    }

    #[test]
    fn test_non_latin_text_keys() {
        let text = |s: &str| key(DataType::Text, Value::Text(s.to_string()));
        let primary = |key: &[u8]| {
            let end = key.iter().position(|b| *b == END_TEXT).unwrap();
            key[1..end].to_vec()
        };

        // Е with grave shares the weight of Е, so it sorts between Б and Ж
        let grave = text("\u{0400}");
        assert_eq!(primary(&grave), primary(&text("Е")));
        assert!(text("Б") < text("Е") && text("Е") < grave);
        assert!(grave < text("Ж"));
        assert_eq!(text("ЁЛКА"), text("ёлка"));
        assert!(text("елка") < text("ёлка") && text("ёлка") < text("ель"));

        assert!(text("zebra") < text("αλφα"));
        assert!(text("αλφα") < text("абв"));
        assert_eq!(primary(&text("ά")), primary(&text("α")));
        assert!(text("абв") < text("一"));
    }

    #[test]
    fn test_legacy_order_ignores_wide_chars() {
        let def = ColumnDefinition::new("t", DataType::Text);
        let col = Column::from_definition(&VERSION_4, &def, 0, 0, 0).unwrap();
        let encode = |s: &str| encode_value(&Value::Text(s.into()), &col, true, true).unwrap();
        assert_eq!(encode("a\u{4E00}"), encode("a"));
        // text made only of wide chars encodes like the empty string
        assert_eq!(encode("\u{0400}"), vec![0x7F, 0x01, 0x00]);
        assert_eq!(encode("\u{4E00}"), encode(""));
    }

    #[test]
    fn test_unsupported_columns() {
        assert!(unsupported_reason(&column(DataType::Ole)).is_some());
        assert!(unsupported_reason(&column(DataType::Text)).is_none());

        let def = ColumnDefinition::new("t", DataType::Text).sort_order(jetdb_core::SortOrder::new(1036, 1));
        let col = Column::from_definition(&VERSION_14, &def, 0, 0, 0).unwrap();
        assert!(unsupported_reason(&col).is_some());
        assert!(matches!(
            encode_value(&Value::Text("x".into()), &col, true, false),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    const ACCENTED: [(char, char); 26] = [
        ('à', 'a'), ('á', 'a'), ('â', 'a'), ('ä', 'a'), ('ç', 'c'), ('è', 'e'), ('é', 'e'),
        ('ê', 'e'), ('ë', 'e'), ('ì', 'i'), ('í', 'i'), ('î', 'i'), ('ï', 'i'), ('ñ', 'n'),
        ('ò', 'o'), ('ó', 'o'), ('ô', 'o'), ('ö', 'o'), ('ù', 'u'), ('ú', 'u'), ('û', 'u'),
        ('ü', 'u'), ('À', 'a'), ('É', 'e'), ('Ö', 'o'), ('Ü', 'u'),
    ];

    /// Lower case without diacritics.
    fn plain(s: &str) -> String {
        s.chars()
            .map(|c| {
                ACCENTED
                    .iter()
                    .find(|(accented, _)| *accented == c)
                    .map(|(_, base)| *base)
                    .unwrap_or_else(|| c.to_ascii_lowercase())
            })
            .collect()
    }

    fn text_key(s: &str) -> Vec<u8> {
        key(DataType::Text, Value::Text(s.to_string()))
    }

    fn primary(key: &[u8]) -> &[u8] {
        let end = key.iter().position(|b| *b == END_TEXT).unwrap_or(key.len());
        &key[1..end]
    }

    const WORD: &str = "[a-zA-ZàáâäçèéêëìíîïñòóôöùúûüÀÉÖÜ]{1,8}";

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_double_keys_follow_numeric_order(a in any::<f64>(), b in any::<f64>()) {
            prop_assume!(!a.is_nan() && !b.is_nan() && a != b);
            let (ka, kb) = (key(DataType::Double, Value::Double(a)), key(DataType::Double, Value::Double(b)));
            prop_assert_eq!(ka.cmp(&kb), a.partial_cmp(&b).unwrap());
        }

        #[test]
        fn prop_date_keys_follow_date_doubles(a in -50_000i64..100_000, b in -50_000i64..100_000) {
            let base = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
            let (da, db) = (base + Duration::minutes(a * 37), base + Duration::minutes(b * 37));
            let (fa, fb) = (to_date_double(&da), to_date_double(&db));
            prop_assume!(fa != fb);
            let ka = key(DataType::ShortDateTime, Value::DateTime(da));
            let kb = key(DataType::ShortDateTime, Value::DateTime(db));
            prop_assert_eq!(ka.cmp(&kb), fa.partial_cmp(&fb).unwrap());
        }

        #[test]
        fn prop_decimal_keys_follow_value_order(
            a in -9_999_999_999i64..=9_999_999_999,
            b in -9_999_999_999i64..=9_999_999_999,
        ) {
            let (na, nb) = (Decimal::new(a, 2), Decimal::new(b, 2));
            let ka = key(DataType::Numeric, Value::Numeric(na));
            let kb = key(DataType::Numeric, Value::Numeric(nb));
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));

            let ma = key(DataType::Money, Value::Money(na));
            let mb = key(DataType::Money, Value::Money(nb));
            prop_assert_eq!(ma.cmp(&mb), a.cmp(&b));
        }

        #[test]
        fn prop_text_keys_ignore_case(word in WORD) {
            prop_assert_eq!(text_key(&word), text_key(&word.to_uppercase()));
        }

        #[test]
        fn prop_diacritics_only_break_ties(a in WORD, b in WORD) {
            let (ka, kb) = (text_key(&a), text_key(&b));
            let kp = text_key(&plain(&a));
            prop_assert_eq!(primary(&ka), primary(&kp));
            if plain(&a) < plain(&b) {
                prop_assert!(ka < kb);
            }
        }
    }
}
