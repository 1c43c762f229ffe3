// storage/src/cursor/matcher.rs

use crate::table::Table;
use jetdb_core::Value;
use std::fmt;

/// Decides whether a stored column value matches a search value.
pub trait ColumnMatcher: Send + Sync + fmt::Debug {
    fn matches(&self, table: &Table, column_name: &str, pattern: &Value, value: &Value) -> bool;
}

/// Equality, after converting the pattern to the column's type.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleColumnMatcher;

impl ColumnMatcher for SimpleColumnMatcher {
    fn matches(&self, table: &Table, column_name: &str, pattern: &Value, value: &Value) -> bool {
        if pattern == value {
            return true;
        }
        if pattern.is_null() || value.is_null() {
            return false;
        }
        table
            .column(column_name)
            .and_then(|column| column.coerce(pattern))
            .map(|coerced| coerced == *value)
            .unwrap_or(false)
    }
}

/// Like [`SimpleColumnMatcher`], ignoring case for text.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseInsensitiveColumnMatcher;

impl ColumnMatcher for CaseInsensitiveColumnMatcher {
    fn matches(&self, table: &Table, column_name: &str, pattern: &Value, value: &Value) -> bool {
        match (pattern, value) {
            (Value::Text(a), Value::Text(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => SimpleColumnMatcher.matches(table, column_name, pattern, value),
        }
    }
}
