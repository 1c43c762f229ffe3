// storage/tests/common/mod.rs

#![allow(dead_code)]

use jetdb_storage::{
    ColumnDefinition, DataType, Database, DatabaseOptions, IndexDefinition, Table, TableSchema,
    Value,
};
use std::sync::Arc;
use tempfile::TempDir;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A fresh database in its own temporary directory.
pub fn scratch_db() -> anyhow::Result<(TempDir, Database)> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let db = Database::create(dir.path().join("scratch.accdb"), DatabaseOptions::new().auto_sync(false))?;
    Ok((dir, db))
}

/// `T(id, value)` with a unique index on `id`.
pub fn numbered_schema() -> TableSchema {
    TableSchema::new("T")
        .add_column(ColumnDefinition::new("id", DataType::Long))
        .add_column(ColumnDefinition::new("value", DataType::Text))
        .add_index(IndexDefinition::new("IdIndex").column("id").unique())
        .add_index(IndexDefinition::new("ValueIndex").column("value"))
}

/// Table `T` holding `(i, "data{i}")` for every `i` in `ids`, inserted in
/// that order.
pub fn numbered_table(db: &Database, ids: impl IntoIterator<Item = i32>) -> anyhow::Result<Arc<Table>> {
    let table = db.create_table(&numbered_schema())?;
    let rows = ids
        .into_iter()
        .map(|i| vec![Value::Long(i), Value::Text(format!("data{}", i))])
        .collect();
    table.add_rows(rows)?;
    Ok(table)
}

pub fn id_of(row: &jetdb_storage::Row) -> i32 {
    match row.get("id") {
        Some(Value::Long(id)) => *id,
        other => panic!("unexpected id {:?}", other),
    }
}
