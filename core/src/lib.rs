use serde::{Deserialize, Serialize};
use std::fmt;

/// Column types understood by the Jet/ACE row format.
///
/// The discriminants are the type codes stored in table definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Byte,
    Int,
    Long,
    Money,
    Float,
    Double,
    ShortDateTime,
    Binary,
    Text,
    Ole,
    Memo,
    Guid,
    Numeric,
    Complex,
    BigInt,
    ExtDateTime,
    /// A type code this engine does not interpret. Values are surfaced raw.
    Unknown(u8),
}

impl DataType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => DataType::Boolean,
            0x02 => DataType::Byte,
            0x03 => DataType::Int,
            0x04 => DataType::Long,
            0x05 => DataType::Money,
            0x06 => DataType::Float,
            0x07 => DataType::Double,
            0x08 => DataType::ShortDateTime,
            0x09 => DataType::Binary,
            0x0A => DataType::Text,
            0x0B => DataType::Ole,
            0x0C => DataType::Memo,
            0x0F => DataType::Guid,
            0x10 => DataType::Numeric,
            0x12 => DataType::Complex,
            0x13 => DataType::BigInt,
            0x14 => DataType::ExtDateTime,
            other => DataType::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DataType::Boolean => 0x01,
            DataType::Byte => 0x02,
            DataType::Int => 0x03,
            DataType::Long => 0x04,
            DataType::Money => 0x05,
            DataType::Float => 0x06,
            DataType::Double => 0x07,
            DataType::ShortDateTime => 0x08,
            DataType::Binary => 0x09,
            DataType::Text => 0x0A,
            DataType::Ole => 0x0B,
            DataType::Memo => 0x0C,
            DataType::Guid => 0x0F,
            DataType::Numeric => 0x10,
            DataType::Complex => 0x12,
            DataType::BigInt => 0x13,
            DataType::ExtDateTime => 0x14,
            DataType::Unknown(code) => *code,
        }
    }

    /// Size of the value inside the fixed area of a row, `None` for
    /// variable length types. Booleans live in the null mask and take no
    /// room.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Boolean => Some(0),
            DataType::Byte => Some(1),
            DataType::Int => Some(2),
            DataType::Long => Some(4),
            DataType::Money => Some(8),
            DataType::Float => Some(4),
            DataType::Double => Some(8),
            DataType::ShortDateTime => Some(8),
            DataType::Guid => Some(16),
            DataType::Numeric => Some(17),
            DataType::Complex => Some(4),
            DataType::BigInt => Some(8),
            DataType::ExtDateTime => Some(42),
            DataType::Binary
            | DataType::Text
            | DataType::Ole
            | DataType::Memo
            | DataType::Unknown(_) => None,
        }
    }

    pub fn is_variable_length(&self) -> bool {
        self.fixed_size().is_none()
    }

    /// Memo and OLE values are stored out of row behind a 12 byte header.
    pub fn is_long_value(&self) -> bool {
        matches!(self, DataType::Memo | DataType::Ole)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, DataType::Text | DataType::Memo)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Int
                | DataType::Long
                | DataType::Money
                | DataType::Float
                | DataType::Double
                | DataType::Numeric
                | DataType::BigInt
        )
    }

    /// Upper bound for the declared length of variable columns, in bytes.
    pub fn max_length(&self) -> Option<u16> {
        match self {
            DataType::Text => Some(510),
            DataType::Binary => Some(255),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Byte => write!(f, "BYTE"),
            DataType::Int => write!(f, "INT"),
            DataType::Long => write!(f, "LONG"),
            DataType::Money => write!(f, "MONEY"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Double => write!(f, "DOUBLE"),
            DataType::ShortDateTime => write!(f, "SHORT_DATE_TIME"),
            DataType::Binary => write!(f, "BINARY"),
            DataType::Text => write!(f, "TEXT"),
            DataType::Ole => write!(f, "OLE"),
            DataType::Memo => write!(f, "MEMO"),
            DataType::Guid => write!(f, "GUID"),
            DataType::Numeric => write!(f, "NUMERIC"),
            DataType::Complex => write!(f, "COMPLEX_TYPE"),
            DataType::BigInt => write!(f, "BIG_INT"),
            DataType::ExtDateTime => write!(f, "EXT_DATE_TIME"),
            DataType::Unknown(code) => write!(f, "UNKNOWN(0x{:02X})", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(u8),
    Int(i16),
    Long(i32),
    Money(rust_decimal::Decimal),
    Float(f32),
    Double(f64),
    DateTime(chrono::NaiveDateTime),
    Binary(Vec<u8>),
    Text(String),
    Guid(uuid::Uuid),
    Numeric(rust_decimal::Decimal),
    BigInt(i64),
    ComplexId(i32),
    /// Undecoded column bytes, produced for unknown types or substituted by
    /// a row error handler.
    Raw(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Widens any integral value to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) | Value::ComplexId(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;

        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Money(d) | Value::Numeric(d) => d.to_f64(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Null => false,
            other => other.as_i64().map(|v| v != 0).unwrap_or(false),
        }
    }

    pub fn type_compatible(&self, data_type: &DataType) -> bool {
        if self.is_null() {
            return true;
        }

        match (self, data_type) {
            (Value::Boolean(_), DataType::Boolean) => true,
            (Value::Byte(_), DataType::Byte) => true,
            (Value::Int(_), DataType::Int) => true,
            (Value::Long(_), DataType::Long) => true,
            (Value::Money(_), DataType::Money) => true,
            (Value::Float(_), DataType::Float) => true,
            (Value::Double(_), DataType::Double) => true,
            (Value::DateTime(_), DataType::ShortDateTime) => true,
            (Value::Binary(_), DataType::Binary | DataType::Ole) => true,
            (Value::Text(_), DataType::Text | DataType::Memo) => true,
            (Value::Guid(_), DataType::Guid) => true,
            (Value::Numeric(_), DataType::Numeric) => true,
            (Value::BigInt(_), DataType::BigInt) => true,
            (Value::ComplexId(_), DataType::Complex) => true,
            (Value::Raw(_), _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Byte(i) => write!(f, "{}", i),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(i) | Value::ComplexId(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Money(d) | Value::Numeric(d) => write!(f, "{}", d),
            Value::Float(r) => write!(f, "{}", r),
            Value::Double(d) => write!(f, "{}", d),
            Value::DateTime(ts) => write!(f, "#{}#", ts.format("%Y-%m-%d %H:%M:%S")),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Binary(b) | Value::Raw(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Guid(u) => write!(f, "{{{}}}", u),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<chrono::NaiveDateTime> for Value {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Text collation stored with databases and text columns: a locale code
/// plus a collation version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOrder {
    pub code: u16,
    pub version: u8,
}

impl SortOrder {
    pub const GENERAL_CODE: u16 = 1033;

    /// General sort order of Access 97 files.
    pub const GENERAL_97: SortOrder = SortOrder {
        code: Self::GENERAL_CODE,
        version: 0xFF,
    };

    /// General sort order of Access 2000 through 2007 files.
    pub const GENERAL_LEGACY: SortOrder = SortOrder {
        code: Self::GENERAL_CODE,
        version: 0,
    };

    /// General sort order of Access 2010 and later files.
    pub const GENERAL: SortOrder = SortOrder {
        code: Self::GENERAL_CODE,
        version: 1,
    };

    pub fn new(code: u16, version: u8) -> Self {
        Self { code, version }
    }

    pub fn is_general(&self) -> bool {
        self.code == Self::GENERAL_CODE
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(v{})", self.code, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    /// Declared length in bytes for text and binary columns.
    pub length: Option<u16>,
    pub precision: u8,
    pub scale: u8,
    pub auto_number: bool,
    pub compressed_unicode: bool,
    pub sort_order: Option<SortOrder>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: None,
            precision: 18,
            scale: 0,
            auto_number: false,
            compressed_unicode: data_type.is_textual(),
            sort_order: None,
        }
    }

    pub fn length(mut self, length: u16) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn auto_number(mut self) -> Self {
        self.auto_number = true;
        self
    }

    pub fn compressed_unicode(mut self, compressed: bool) -> Self {
        self.compressed_unicode = compressed;
        self
    }

    pub fn sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = Some(sort_order);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumnDefinition {
    pub name: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<IndexColumnDefinition>,
    pub primary_key: bool,
    pub unique: bool,
    pub ignore_nulls: bool,
    pub required: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: false,
            unique: false,
            ignore_nulls: false,
            required: false,
        }
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(IndexColumnDefinition {
            name: name.into(),
            ascending: true,
        });
        self
    }

    pub fn descending_column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(IndexColumnDefinition {
            name: name.into(),
            ascending: false,
        });
        self
    }

    /// Primary keys are unique and reject nulls.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn ignore_nulls(mut self) -> Self {
        self.ignore_nulls = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableSchema {
    pub const MAX_NAME_LENGTH: usize = 64;
    pub const MAX_COLUMNS: usize = 255;
    pub const MAX_INDEXES: usize = 32;
    pub const MAX_INDEX_COLUMNS: usize = 10;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn add_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn add_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|col| col.name.eq_ignore_ascii_case(name))
    }

    /// Checks names, limits and index column references. Format specific
    /// checks (supported types) are done by the storage layer.
    pub fn validate(&self) -> Result<(), String> {
        validate_name("table", &self.name)?;

        if self.columns.is_empty() {
            return Err(format!("Table '{}' has no columns", self.name));
        }
        if self.columns.len() > Self::MAX_COLUMNS {
            return Err(format!(
                "Table '{}' has {} columns, at most {} are allowed",
                self.name,
                self.columns.len(),
                Self::MAX_COLUMNS
            ));
        }
        if self.indexes.len() > Self::MAX_INDEXES {
            return Err(format!(
                "Table '{}' has {} indexes, at most {} are allowed",
                self.name,
                self.indexes.len(),
                Self::MAX_INDEXES
            ));
        }

        for (i, column) in self.columns.iter().enumerate() {
            validate_name("column", &column.name)?;
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(format!("Duplicate column name '{}'", column.name));
            }
            if let (Some(length), Some(max)) = (column.length, column.data_type.max_length()) {
                if length == 0 || length > max {
                    return Err(format!(
                        "Invalid length {} for column '{}', must be 1..={}",
                        length, column.name, max
                    ));
                }
            }
            if column.auto_number && column.data_type != DataType::Long {
                return Err(format!(
                    "Auto number column '{}' must be of type LONG",
                    column.name
                ));
            }
            if column.data_type == DataType::Numeric
                && (column.precision == 0 || column.precision > 28 || column.scale > column.precision)
            {
                return Err(format!(
                    "Invalid precision {} / scale {} for column '{}'",
                    column.precision, column.scale, column.name
                ));
            }
        }

        let mut primary_keys = 0;
        for (i, index) in self.indexes.iter().enumerate() {
            validate_name("index", &index.name)?;
            if self.indexes[..i]
                .iter()
                .any(|idx| idx.name.eq_ignore_ascii_case(&index.name))
            {
                return Err(format!("Duplicate index name '{}'", index.name));
            }
            if index.columns.is_empty() || index.columns.len() > Self::MAX_INDEX_COLUMNS {
                return Err(format!(
                    "Index '{}' must have between 1 and {} columns",
                    index.name,
                    Self::MAX_INDEX_COLUMNS
                ));
            }
            for col in &index.columns {
                if self.get_column(&col.name).is_none() {
                    return Err(format!(
                        "Index '{}' refers to unknown column '{}'",
                        index.name, col.name
                    ));
                }
            }
            if index.primary_key {
                primary_keys += 1;
            }
        }
        if primary_keys > 1 {
            return Err(format!("Table '{}' has more than one primary key", self.name));
        }

        Ok(())
    }
}

fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("Empty {} name", kind));
    }
    if name.chars().count() > TableSchema::MAX_NAME_LENGTH {
        return Err(format!(
            "{} name '{}' is longer than {} characters",
            kind,
            name,
            TableSchema::MAX_NAME_LENGTH
        ));
    }
    if name.chars().any(|c| matches!(c, '.' | '!' | '`' | '[' | ']') || c.is_control()) {
        return Err(format!("{} name '{}' contains invalid characters", kind, name));
    }
    Ok(())
}
