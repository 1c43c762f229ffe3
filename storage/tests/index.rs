// storage/tests/index.rs

mod common;

use common::{id_of, numbered_table, scratch_db};
use jetdb_storage::{
    ColumnDefinition, Cursor, DataType, Database, DatabaseOptions, FileVersion, IndexDefinition,
    StorageError, TableSchema, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn values_in_order(cursor: &mut Cursor, column: &str, forward: bool) -> anyhow::Result<Vec<Value>> {
    let mut values = Vec::new();
    while cursor.move_to_another_row(forward)? {
        values.push(cursor.current_row_value(column)?);
    }
    Ok(values)
}

fn pair_schema() -> TableSchema {
    TableSchema::new("Pairs")
        .add_column(ColumnDefinition::new("n", DataType::Long))
        .add_column(ColumnDefinition::new("s", DataType::Text))
        .add_index(IndexDefinition::new("NIndex").column("n"))
        .add_index(IndexDefinition::new("SIndex").column("s"))
        .add_index(IndexDefinition::new("NDescIndex").descending_column("n"))
}

#[test]
fn test_shuffled_inserts_split_and_stay_ordered() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let mut ids: Vec<i32> = (0..2000).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(0x1D5));
    let table = numbered_table(&db, ids.iter().copied())?;

    let data = table.index("IdIndex")?.data().clone();
    assert!(data.owned_pages().lock().len() > 1, "index never split");
    assert_eq!(data.entries()?.len(), 2000);

    let mut cursor = table.index_cursor("IdIndex")?;
    let forward = values_in_order(&mut cursor, "id", true)?;
    assert_eq!(forward, (0..2000).map(Value::Long).collect::<Vec<_>>());

    cursor.after_last()?;
    let backward = values_in_order(&mut cursor, "id", false)?;
    assert_eq!(backward, (0..2000).rev().map(Value::Long).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_deletes_across_pages_keep_order() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let mut ids: Vec<i32> = (0..1500).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(42));
    let table = numbered_table(&db, ids)?;

    let mut cursor = table.cursor();
    let mut iter = cursor.iter();
    while let Some(row) = iter.next() {
        if id_of(&row?) % 2 == 1 {
            iter.delete_current()?;
        }
    }
    drop(iter);
    assert_eq!(table.row_count(), 750);

    for name in ["IdIndex", "ValueIndex"] {
        assert_eq!(table.index(name)?.data().entries()?.len(), 750);
    }

    let mut by_id = table.index_cursor("IdIndex")?;
    let mut remaining = Vec::new();
    while by_id.move_to_next_row()? {
        remaining.push(id_of(&by_id.current_row()?));
    }
    assert_eq!(remaining, (0..1500).step_by(2).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_emptied_index_pages_are_released() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let mut ids: Vec<i32> = (0..1500).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(7));
    let table = numbered_table(&db, ids)?;
    let data = table.index("IdIndex")?.data().clone();
    let pages_before = data.owned_pages().lock().len();

    let mut cursor = table.cursor();
    let mut iter = cursor.iter();
    while let Some(row) = iter.next() {
        row?;
        iter.delete_current()?;
    }
    drop(iter);

    assert_eq!(table.row_count(), 0);
    assert!(data.entries()?.is_empty());
    assert!(data.owned_pages().lock().len() < pages_before);

    let mut by_id = table.index_cursor("IdIndex")?;
    assert!(!by_id.move_to_next_row()?);
    assert!(by_id.is_after_last()?);

    table.add_row(vec![Value::Long(5), Value::Text("again".to_string())])?;
    assert!(by_id.move_to_previous_row()?);
    assert_eq!(by_id.current_row_value("id")?, Value::Long(5));
    Ok(())
}

#[test]
fn test_text_index_orders_like_strings() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, [10, 2, 1, 21, 3])?;

    let mut cursor = table.index_cursor("ValueIndex")?;
    let values = values_in_order(&mut cursor, "value", true)?;
    let expected: Vec<Value> = ["data1", "data10", "data2", "data21", "data3"]
        .iter()
        .map(|s| Value::Text(s.to_string()))
        .collect();
    assert_eq!(values, expected);
    Ok(())
}

#[test]
fn test_descending_index() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = db.create_table(&pair_schema())?;
    for n in [5, -3, 12, 0] {
        table.add_row(vec![Value::Long(n), Value::Text(format!("s{}", n))])?;
    }

    let mut cursor = table.index_cursor("NDescIndex")?;
    let values = values_in_order(&mut cursor, "n", true)?;
    assert_eq!(values, vec![Value::Long(12), Value::Long(5), Value::Long(0), Value::Long(-3)]);
    Ok(())
}

#[test]
fn test_unique_index_rejects_duplicates() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..5)?;

    let err = table
        .add_row(vec![Value::Long(3), Value::Text("again".to_string())])
        .unwrap_err();
    assert!(matches!(err, StorageError::ConstraintViolation(_)), "{}", err);
    assert_eq!(table.row_count(), 5);
    assert_eq!(table.index("IdIndex")?.data().entries()?.len(), 5);
    assert_eq!(table.index("ValueIndex")?.data().entries()?.len(), 5);

    let mut cursor = table.index_cursor("IdIndex")?;
    assert!(cursor.find_first_row_by_entry(&[Value::Long(1)])?);
    let err = cursor
        .set_current_row_value("id", Value::Long(4))
        .unwrap_err();
    assert!(matches!(err, StorageError::ConstraintViolation(_)), "{}", err);
    assert_eq!(cursor.current_row_value("id")?, Value::Long(1));
    Ok(())
}

#[test]
fn test_unique_index_allows_repeated_nulls() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..2)?;
    table.add_row(vec![Value::Null, Value::Text("a".to_string())])?;
    table.add_row(vec![Value::Null, Value::Text("b".to_string())])?;

    let mut cursor = table.index_cursor("IdIndex")?;
    let values = values_in_order(&mut cursor, "id", true)?;
    assert_eq!(values, vec![Value::Null, Value::Null, Value::Long(0), Value::Long(1)]);
    Ok(())
}

#[test]
fn test_required_index_rejects_nulls() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let schema = TableSchema::new("Required")
        .add_column(ColumnDefinition::new("code", DataType::Text))
        .add_index(IndexDefinition::new("CodeIndex").column("code").required());
    let table = db.create_table(&schema)?;

    table.add_row(vec![Value::Text("x".to_string())])?;
    let err = table.add_row(vec![Value::Null]).unwrap_err();
    assert!(matches!(err, StorageError::ConstraintViolation(_)), "{}", err);
    assert_eq!(table.row_count(), 1);
    Ok(())
}

#[test]
fn test_ignore_nulls_index_skips_null_rows() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let schema = TableSchema::new("Sparse")
        .add_column(ColumnDefinition::new("tag", DataType::Long))
        .add_index(IndexDefinition::new("TagIndex").column("tag").ignore_nulls());
    let table = db.create_table(&schema)?;

    table.add_rows(vec![
        vec![Value::Long(7)],
        vec![Value::Null],
        vec![Value::Long(1)],
    ])?;
    assert_eq!(table.row_count(), 3);

    let mut cursor = table.index_cursor("TagIndex")?;
    let values = values_in_order(&mut cursor, "tag", true)?;
    assert_eq!(values, vec![Value::Long(1), Value::Long(7)]);
    Ok(())
}

#[test]
fn test_sentinels_bound_every_stored_entry() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = db.create_table(&pair_schema())?;
    let mut rows = vec![
        vec![Value::Long(i32::MIN), Value::Text(String::new())],
        vec![Value::Long(i32::MAX), Value::Text("ÿÿÿ".to_string())],
        vec![Value::Null, Value::Null],
    ];
    rows.extend((0..1500).map(|i| vec![Value::Long(i * 7 - 5000), Value::Text(format!("s{:05}", i))]));
    table.add_rows(rows)?;

    for name in ["NIndex", "SIndex", "NDescIndex"] {
        let data = table.index(name)?.data().clone();
        assert!(data.owned_pages().lock().len() > 1, "{} never split", name);
        let (first, last) = (data.first_entry(), data.last_entry());
        let entries = data.entries()?;
        assert_eq!(entries.len(), 1503);
        for entry in &entries {
            assert!(first < *entry && *entry < last, "{}: {:?}", name, entry);
        }
    }
    Ok(())
}

fn names_table(db: &Database) -> anyhow::Result<std::sync::Arc<jetdb_storage::Table>> {
    let schema = TableSchema::new("Names")
        .add_column(ColumnDefinition::new("name", DataType::Text))
        .add_index(IndexDefinition::new("NameIndex").column("name").unique());
    Ok(db.create_table(&schema)?)
}

#[test]
fn test_jet4_unique_index_treats_wide_text_as_equal() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    assert_eq!(db.format().version, FileVersion::Version4);
    let table = names_table(&db)?;

    // characters above 0xFF have no codes in the Jet4 order
    table.add_row(vec![Value::Text("Иван".to_string())])?;
    for duplicate in ["北京", "Ёлка"] {
        let err = table
            .add_row(vec![Value::Text(duplicate.to_string())])
            .unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation(_)), "{}", err);
    }
    table.add_row(vec![Value::Text("Ivan".to_string())])?;
    assert_eq!(table.row_count(), 2);
    Ok(())
}

#[test]
fn test_general_order_sorts_wide_text() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let options = DatabaseOptions::new()
        .file_version(FileVersion::Version14)
        .auto_sync(false);
    let db = Database::create(dir.path().join("wide.accdb"), options)?;
    let table = names_table(&db)?;
    for name in ["北京", "Иван", "ёлка", "Елка", "zebra"] {
        table.add_row(vec![Value::Text(name.to_string())])?;
    }
    let err = table
        .add_row(vec![Value::Text("ИВАН".to_string())])
        .unwrap_err();
    assert!(matches!(err, StorageError::ConstraintViolation(_)), "{}", err);

    let mut cursor = table.index_cursor("NameIndex")?;
    let names = values_in_order(&mut cursor, "name", true)?;
    let expected: Vec<Value> = ["zebra", "Елка", "ёлка", "Иван", "北京"]
        .iter()
        .map(|s| Value::Text(s.to_string()))
        .collect();
    assert_eq!(names, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_long_index_order_matches_numeric_order(
        numbers in prop::collection::vec(any::<i32>(), 1..80)
    ) {
        let (_dir, db) = scratch_db().unwrap();
        let table = db.create_table(&pair_schema()).unwrap();
        let rows = numbers
            .iter()
            .map(|n| vec![Value::Long(*n), Value::Text(String::new())])
            .collect();
        table.add_rows(rows).unwrap();

        let mut cursor = table.index_cursor("NIndex").unwrap();
        let values = values_in_order(&mut cursor, "n", true).unwrap();
        let mut expected = numbers.clone();
        expected.sort_unstable();
        prop_assert_eq!(values, expected.into_iter().map(Value::Long).collect::<Vec<_>>());
    }

    #[test]
    fn prop_text_index_order_matches_string_order(
        words in prop::collection::vec("[a-z]{1,8}", 1..60)
    ) {
        let (_dir, db) = scratch_db().unwrap();
        let table = db.create_table(&pair_schema()).unwrap();
        let rows = words
            .iter()
            .enumerate()
            .map(|(i, w)| vec![Value::Long(i as i32), Value::Text(w.clone())])
            .collect();
        table.add_rows(rows).unwrap();

        let mut cursor = table.index_cursor("SIndex").unwrap();
        let values = values_in_order(&mut cursor, "s", true).unwrap();
        let mut expected = words.clone();
        expected.sort();
        prop_assert_eq!(values, expected.into_iter().map(Value::Text).collect::<Vec<_>>());
    }
}
