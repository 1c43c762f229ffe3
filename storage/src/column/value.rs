use super::Column;
use crate::format::{Charset, JetFormat};
use crate::{Result, StorageError};
use bytes::BufMut;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use jetdb_core::{DataType, Value};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

/// Sign byte plus a 16 byte magnitude.
pub const NUMERIC_SIZE: usize = 17;
const NUMERIC_NEGATIVE: u8 = 0x80;
const MONEY_SCALE: u32 = 4;

const COMPRESSED_TEXT_HEADER: [u8; 2] = [0xFF, 0xFE];
const MIN_COMPRESS_CHARS: usize = 3;
const MAX_COMPRESS_CHARS: usize = 1024;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Day count since 1899-12-30 with the time of day as fraction. Before
/// the epoch the fraction is subtracted, so -1.25 is 1899-12-29 06:00.
pub fn to_date_double(value: &NaiveDateTime) -> f64 {
    let base = epoch();
    let days = (value.date() - base.date()).num_days();
    let time = value.time();
    let millis = time.num_seconds_from_midnight() as f64 * 1000.0
        + (time.nanosecond() / 1_000_000) as f64;
    let fraction = millis / MILLIS_PER_DAY;
    if days >= 0 {
        days as f64 + fraction
    } else {
        days as f64 - fraction
    }
}

pub fn from_date_double(value: f64) -> Option<NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }
    let days = value.trunc();
    let millis = ((value - days).abs() * MILLIS_PER_DAY).round() as i64;
    epoch()
        .checked_add_signed(Duration::try_days(days as i64)?)?
        .checked_add_signed(Duration::try_milliseconds(millis)?)
}

/// Splits a decimal, rescaled to `scale`, into its sign and 16 byte big
/// endian magnitude.
pub fn numeric_parts(value: &Decimal, scale: u32) -> Result<(bool, [u8; 16])> {
    let mut scaled = *value;
    scaled.rescale(scale);
    if scaled.scale() != scale {
        return Err(StorageError::InvalidArgument(format!(
            "Value {} cannot be stored with scale {}",
            value, scale
        )));
    }
    let mantissa = scaled.mantissa();
    Ok((mantissa < 0, mantissa.unsigned_abs().to_be_bytes()))
}

/// The row form stores the magnitude as four little endian words in big
/// endian order; swapping each word converts in both directions.
fn swap_numeric_words(bytes: &mut [u8]) {
    for word in bytes.chunks_mut(4) {
        word.reverse();
    }
}

fn decimal_digits(value: &Decimal) -> u32 {
    let mut mantissa = value.mantissa().unsigned_abs();
    let mut digits = 0;
    while mantissa > 0 {
        mantissa /= 10;
        digits += 1;
    }
    digits
}

pub fn decode_text(data: &[u8], format: &JetFormat) -> String {
    match format.charset {
        Charset::SingleByte => data.iter().map(|b| *b as char).collect(),
        Charset::Utf16Le => {
            if data.len() >= 2 && data[..2] == COMPRESSED_TEXT_HEADER {
                decode_compressed_text(&data[2..])
            } else {
                let units: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

/// A zero byte toggles between one byte and two byte characters.
fn decode_compressed_text(data: &[u8]) -> String {
    let mut units = Vec::with_capacity(data.len());
    let mut compressed = true;
    let mut pos = 0;
    while pos < data.len() {
        if data[pos] == 0 {
            compressed = !compressed;
            pos += 1;
        } else if compressed {
            units.push(data[pos] as u16);
            pos += 1;
        } else if pos + 1 < data.len() {
            units.push(u16::from_le_bytes([data[pos], data[pos + 1]]));
            pos += 2;
        } else {
            break;
        }
    }
    String::from_utf16_lossy(&units)
}

pub fn encode_text(text: &str, compress: bool, format: &JetFormat) -> Vec<u8> {
    match format.charset {
        Charset::SingleByte => text
            .chars()
            .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
            .collect(),
        Charset::Utf16Le => {
            let char_count = text.chars().count();
            let compressible = compress
                && (MIN_COMPRESS_CHARS..=MAX_COMPRESS_CHARS).contains(&char_count)
                && text.chars().all(|c| (1..=0xFF).contains(&(c as u32)));
            if compressible {
                let mut out = Vec::with_capacity(char_count + 2);
                out.extend_from_slice(&COMPRESSED_TEXT_HEADER);
                out.extend(text.chars().map(|c| c as u8));
                out
            } else {
                let mut out = Vec::with_capacity(text.len() * 2);
                for unit in text.encode_utf16() {
                    out.put_u16_le(unit);
                }
                out
            }
        }
    }
}

/// Decodes a non long-value column. Malformed or unknown content comes
/// back as [`Value::Raw`].
pub(super) fn decode(column: &Column, data: &[u8]) -> Value {
    let raw = || Value::Raw(data.to_vec());
    let fixed = |size: usize| data.get(..size);

    match column.data_type() {
        DataType::Boolean => Value::Boolean(!data.is_empty() && data[0] != 0),
        DataType::Byte => fixed(1).map(|b| Value::Byte(b[0])).unwrap_or_else(raw),
        DataType::Int => fixed(2)
            .map(|b| Value::Int(i16::from_le_bytes([b[0], b[1]])))
            .unwrap_or_else(raw),
        DataType::Long => fixed(4)
            .map(|b| Value::Long(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .unwrap_or_else(raw),
        DataType::Complex => fixed(4)
            .map(|b| Value::ComplexId(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .unwrap_or_else(raw),
        DataType::BigInt => fixed(8)
            .map(|b| Value::BigInt(i64::from_le_bytes(to_array(b))))
            .unwrap_or_else(raw),
        DataType::Money => fixed(8)
            .map(|b| {
                Value::Money(Decimal::new(i64::from_le_bytes(to_array(b)), MONEY_SCALE))
            })
            .unwrap_or_else(raw),
        DataType::Float => fixed(4)
            .map(|b| Value::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .unwrap_or_else(raw),
        DataType::Double => fixed(8)
            .map(|b| Value::Double(f64::from_le_bytes(to_array(b))))
            .unwrap_or_else(raw),
        DataType::ShortDateTime => fixed(8)
            .and_then(|b| from_date_double(f64::from_le_bytes(to_array(b))))
            .map(Value::DateTime)
            .unwrap_or_else(raw),
        DataType::Guid => fixed(16)
            .map(|b| {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(b);
                Value::Guid(Uuid::from_bytes_le(bytes))
            })
            .unwrap_or_else(raw),
        DataType::Numeric => fixed(NUMERIC_SIZE)
            .and_then(|b| decode_numeric(b, column.scale()))
            .map(Value::Numeric)
            .unwrap_or_else(raw),
        DataType::Text => Value::Text(decode_text(data, column.format())),
        DataType::Binary => Value::Binary(data.to_vec()),
        DataType::Memo | DataType::Ole | DataType::ExtDateTime | DataType::Unknown(_) => raw(),
    }
}

fn to_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

fn decode_numeric(data: &[u8], scale: u8) -> Option<Decimal> {
    let mut magnitude = [0u8; 16];
    magnitude.copy_from_slice(&data[1..NUMERIC_SIZE]);
    swap_numeric_words(&mut magnitude);
    let magnitude = i128::try_from(u128::from_be_bytes(magnitude)).ok()?;
    let mantissa = if data[0] & NUMERIC_NEGATIVE != 0 {
        -magnitude
    } else {
        magnitude
    };
    Decimal::try_from_i128_with_scale(mantissa, scale as u32).ok()
}

/// Encodes a coerced, non-null, non long-value value.
pub(super) fn encode(column: &Column, value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(column.data_type().fixed_size().unwrap_or(16));
    match value {
        Value::Boolean(_) => {}
        Value::Byte(v) => out.put_u8(*v),
        Value::Int(v) => out.put_i16_le(*v),
        Value::Long(v) | Value::ComplexId(v) => out.put_i32_le(*v),
        Value::BigInt(v) => out.put_i64_le(*v),
        Value::Money(d) => {
            let (negative, magnitude) = numeric_parts(d, MONEY_SCALE)?;
            let magnitude = u128::from_be_bytes(magnitude);
            let cents = i64::try_from(magnitude).map_err(|_| {
                StorageError::InvalidArgument(format!("Money value {} out of range", d))
            })?;
            out.put_i64_le(if negative { -cents } else { cents });
        }
        Value::Float(v) => out.put_f32_le(*v),
        Value::Double(v) => out.put_f64_le(*v),
        Value::DateTime(dt) => out.put_f64_le(to_date_double(dt)),
        Value::Guid(g) => out.put_slice(&g.to_bytes_le()),
        Value::Numeric(d) => {
            let (negative, mut magnitude) = numeric_parts(d, column.scale() as u32)?;
            swap_numeric_words(&mut magnitude);
            out.put_u8(if negative { NUMERIC_NEGATIVE } else { 0 });
            out.put_slice(&magnitude);
        }
        Value::Text(text) => {
            out = encode_text(text, column.is_compressed_unicode(), column.format());
            let max = column.length() as usize;
            let chars = text.chars().count() * column.format().size_text_char();
            if max > 0 && chars > max {
                return Err(StorageError::InvalidArgument(format!(
                    "Value of {} bytes too long for column {} (max {})",
                    chars,
                    column.name(),
                    max
                )));
            }
        }
        Value::Binary(bytes) | Value::Raw(bytes) => {
            let max = column.length() as usize;
            if column.data_type() == DataType::Binary && max > 0 && bytes.len() > max {
                return Err(StorageError::InvalidArgument(format!(
                    "Value of {} bytes too long for column {} (max {})",
                    bytes.len(),
                    column.name(),
                    max
                )));
            }
            out.put_slice(bytes);
        }
        Value::Null => {}
    }
    Ok(out)
}

fn mismatch(column: &Column, value: &Value) -> StorageError {
    StorageError::InvalidArgument(format!(
        "Cannot store {:?} in {} column {}",
        value,
        column.data_type(),
        column.name()
    ))
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Text(s) => s.trim().parse().ok(),
        Value::Float(_) | Value::Double(_) | Value::Money(_) | Value::Numeric(_) => {
            value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
        }
        Value::Boolean(b) => Some(if *b { -1 } else { 0 }),
        other => other.as_i64(),
    }
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Money(d) | Value::Numeric(d) => Some(*d),
        Value::Float(f) => Decimal::try_from(*f as f64).ok(),
        Value::Double(f) => Decimal::try_from(*f).ok(),
        Value::Text(s) => Decimal::from_str(s.trim()).ok(),
        other => other.as_i64().map(Decimal::from),
    }
}

pub(super) fn coerce(column: &Column, value: &Value) -> Result<Value> {
    let data_type = column.data_type();
    if let Value::Raw(_) = value {
        return Ok(value.clone());
    }
    if value.is_null() {
        return Ok(match data_type {
            DataType::Boolean => Value::Boolean(false),
            _ => Value::Null,
        });
    }

    let in_range = |v: i64, lo: i64, hi: i64| (lo..=hi).contains(&v);
    let coerced = match data_type {
        DataType::Boolean => Some(Value::Boolean(value.as_bool())),
        DataType::Byte => integral(value)
            .filter(|v| in_range(*v, 0, u8::MAX as i64))
            .map(|v| Value::Byte(v as u8)),
        DataType::Int => integral(value)
            .filter(|v| in_range(*v, i16::MIN as i64, i16::MAX as i64))
            .map(|v| Value::Int(v as i16)),
        DataType::Long => integral(value)
            .filter(|v| in_range(*v, i32::MIN as i64, i32::MAX as i64))
            .map(|v| Value::Long(v as i32)),
        DataType::Complex => integral(value)
            .filter(|v| in_range(*v, i32::MIN as i64, i32::MAX as i64))
            .map(|v| Value::ComplexId(v as i32)),
        DataType::BigInt => integral(value).map(Value::BigInt),
        DataType::Money => decimal(value).map(|d| Value::Money(d.round_dp(MONEY_SCALE))),
        DataType::Numeric => match decimal(value) {
            Some(d) => {
                let mut d = d.round_dp(column.scale() as u32);
                d.rescale(column.scale() as u32);
                if column.precision() > 0 && decimal_digits(&d) > column.precision() as u32 {
                    return Err(StorageError::InvalidArgument(format!(
                        "Numeric value {} exceeds precision {} of column {}",
                        d,
                        column.precision(),
                        column.name()
                    )));
                }
                Some(Value::Numeric(d))
            }
            None => None,
        },
        DataType::Float => value.as_f64().map(|f| Value::Float(f as f32)),
        DataType::Double => value.as_f64().map(Value::Double),
        DataType::ShortDateTime => match value {
            Value::DateTime(dt) => Some(Value::DateTime(*dt)),
            Value::Double(f) => from_date_double(*f).map(Value::DateTime),
            Value::Text(s) => NaiveDateTime::from_str(s.trim()).ok().map(Value::DateTime),
            _ => None,
        },
        DataType::Guid => match value {
            Value::Guid(g) => Some(Value::Guid(*g)),
            Value::Text(s) => Uuid::parse_str(s.trim().trim_start_matches('{').trim_end_matches('}'))
                .ok()
                .map(Value::Guid),
            _ => None,
        },
        DataType::Text | DataType::Memo => match value {
            Value::Text(s) => Some(Value::Text(s.clone())),
            Value::Binary(_) => None,
            other => Some(Value::Text(other.to_string())),
        },
        DataType::Binary | DataType::Ole => match value {
            Value::Binary(b) => Some(Value::Binary(b.clone())),
            _ => None,
        },
        DataType::ExtDateTime | DataType::Unknown(_) => None,
    };

    coerced.ok_or_else(|| mismatch(column, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{VERSION_3, VERSION_4};
    use jetdb_core::ColumnDefinition;

    fn column(data_type: DataType) -> Column {
        let def = ColumnDefinition::new("c", data_type).precision(10, 2);
        Column::from_definition(&VERSION_4, &def, 0, 0, 0).unwrap()
    }

    fn round_trip(data_type: DataType, value: Value) -> Value {
        let column = column(data_type);
        let value = coerce(&column, &value).unwrap();
        decode(&column, &encode(&column, &value).unwrap())
    }

    #[test]
    fn test_fixed_round_trips() {
        assert_eq!(round_trip(DataType::Byte, Value::Long(200)), Value::Byte(200));
        assert_eq!(round_trip(DataType::Int, Value::Long(-300)), Value::Int(-300));
        assert_eq!(round_trip(DataType::Long, Value::Long(i32::MIN)), Value::Long(i32::MIN));
        assert_eq!(round_trip(DataType::Double, Value::Double(-1.5)), Value::Double(-1.5));

        let money = Decimal::from_str("-1234.5678").unwrap();
        assert_eq!(round_trip(DataType::Money, Value::Money(money)), Value::Money(money));

        let numeric = Decimal::from_str("-98765432.10").unwrap();
        assert_eq!(
            round_trip(DataType::Numeric, Value::Numeric(numeric)),
            Value::Numeric(numeric)
        );

        let guid = Uuid::from_u128(0x0011_2233_4455_6677_8899_AABB_CCDD_EEFF);
        assert_eq!(round_trip(DataType::Guid, Value::Guid(guid)), Value::Guid(guid));
    }

    #[test]
    fn test_numeric_row_layout() {
        let column = column(DataType::Numeric);
        let bytes = encode(&column, &Value::Numeric(Decimal::new(-1, 2))).unwrap();
        assert_eq!(bytes.len(), NUMERIC_SIZE);
        assert_eq!(bytes[0], NUMERIC_NEGATIVE);
        // mantissa 1 lands in the last big endian word, stored little endian
        assert_eq!(&bytes[13..17], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_dates() {
        let noon = NaiveDate::from_ymd_opt(1900, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(to_date_double(&noon), 2.5);
        assert_eq!(from_date_double(2.5), Some(noon));

        let before = NaiveDate::from_ymd_opt(1899, 12, 29)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(to_date_double(&before), -1.25);
        assert_eq!(from_date_double(-1.25), Some(before));
        assert_eq!(from_date_double(f64::NAN), None);
    }

    #[test]
    fn test_compressed_text() {
        let encoded = encode_text("hello", true, &VERSION_4);
        assert_eq!(&encoded, &[0xFF, 0xFE, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(decode_text(&encoded, &VERSION_4), "hello");

        // too short to compress
        assert_eq!(encode_text("hi", true, &VERSION_4), vec![b'h', 0, b'i', 0]);
        // not compressible
        let wide = encode_text("h\u{4e16}llo", true, &VERSION_4);
        assert_eq!(wide.len(), 10);
        assert_eq!(decode_text(&wide, &VERSION_4), "h\u{4e16}llo");
    }

    #[test]
    fn test_mixed_compressed_text() {
        // "ab", switch to wide for U+4E16, back to narrow for "c"
        let data = [0xFF, 0xFE, b'a', b'b', 0x00, 0x16, 0x4E, 0x00, b'c'];
        assert_eq!(decode_text(&data, &VERSION_4), "ab\u{4e16}c");
    }

    #[test]
    fn test_single_byte_text() {
        assert_eq!(decode_text(b"caf\xe9", &VERSION_3), "caf\u{e9}");
        assert_eq!(encode_text("caf\u{e9}", false, &VERSION_3), b"caf\xe9".to_vec());
    }

    #[test]
    fn test_coerce_rejects_out_of_range() {
        assert!(coerce(&column(DataType::Byte), &Value::Long(256)).is_err());
        assert!(coerce(&column(DataType::Guid), &Value::Long(1)).is_err());
        assert_eq!(
            coerce(&column(DataType::Long), &Value::Text(" 42 ".into())).unwrap(),
            Value::Long(42)
        );
        assert_eq!(
            coerce(&column(DataType::Boolean), &Value::Null).unwrap(),
            Value::Boolean(false)
        );
        assert!(matches!(
            coerce(&column(DataType::Numeric), &Value::Double(123456789.0)),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_text_length_limit() {
        let def = ColumnDefinition::new("c", DataType::Text).length(6);
        let column = Column::from_definition(&VERSION_4, &def, 0, 0, 0).unwrap();
        assert!(encode(&column, &Value::Text("abc".into())).is_ok());
        assert!(encode(&column, &Value::Text("abcd".into())).is_err());
    }
}
