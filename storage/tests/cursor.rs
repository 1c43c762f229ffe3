// storage/tests/cursor.rs

mod common;

use common::{id_of, numbered_table, scratch_db};
use jetdb_storage::{Cursor, IterOptions, StorageError, Value};
use pretty_assertions::assert_eq;

fn collect_ids(cursor: &mut Cursor, forward: bool) -> anyhow::Result<Vec<i32>> {
    let mut ids = Vec::new();
    while cursor.move_to_another_row(forward)? {
        ids.push(id_of(&cursor.current_row()?));
    }
    Ok(ids)
}

#[test]
fn test_savepoint_restores_row() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..10)?;

    let mut cursor = table.cursor();
    assert_eq!(cursor.move_next_rows(4)?, 4);
    assert_eq!(cursor.current_row_value("id")?, Value::Long(3));
    let savepoint = cursor.savepoint();

    assert_eq!(cursor.move_next_rows(3)?, 3);
    assert_eq!(cursor.current_row_value("id")?, Value::Long(6));

    cursor.restore_savepoint(&savepoint)?;
    let row = cursor.current_row()?;
    assert_eq!(row.get("id"), Some(&Value::Long(3)));
    assert_eq!(row.get("value"), Some(&Value::Text("data3".to_string())));
    Ok(())
}

#[test]
fn test_savepoint_round_trip_keeps_positions() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..5)?;

    let mut cursor = table.index_cursor("IdIndex")?;
    cursor.move_next_rows(2)?;
    let (cur, prev) = (cursor.current_position().clone(), cursor.previous_position().clone());
    let savepoint = cursor.savepoint();
    cursor.restore_savepoint(&savepoint)?;
    assert_eq!(cursor.current_position(), &cur);
    assert_eq!(cursor.previous_position(), &prev);
    Ok(())
}

#[test]
fn test_savepoint_from_other_index_is_rejected() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..5)?;

    let mut by_id = table.index_cursor("IdIndex")?;
    let mut by_value = table.index_cursor("ValueIndex")?;
    by_id.move_to_next_row()?;
    let savepoint = by_id.savepoint();

    assert!(matches!(
        by_value.restore_savepoint(&savepoint),
        Err(StorageError::InvalidArgument(_))
    ));
    assert!(matches!(
        table.cursor().restore_savepoint(&savepoint),
        Err(StorageError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn test_find_missing_entry_keeps_position() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..10)?;

    let mut cursor = table.index_cursor("IdIndex")?;
    cursor.move_next_rows(5)?;
    let before = cursor.savepoint();

    assert!(!cursor.find_first_row_by_entry(&[Value::Long(42)])?);
    assert_eq!(cursor.savepoint(), before);
    assert_eq!(cursor.current_row_value("id")?, Value::Long(4));

    assert!(cursor.find_first_row_by_entry(&[Value::Long(7)])?);
    assert_eq!(cursor.current_row_value("value")?, Value::Text("data7".to_string()));
    Ok(())
}

#[test]
fn test_find_closest_entry() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, [10, 20, 30])?;

    let mut cursor = table.index_cursor("IdIndex")?;
    cursor.find_closest_row_by_entry(&[Value::Long(15)])?;
    assert_eq!(cursor.current_row_value("id")?, Value::Long(20));

    cursor.find_closest_row_by_entry(&[Value::Long(99)])?;
    assert!(cursor.is_after_last()?);

    assert!(matches!(
        cursor.find_closest_row_by_entry(&[Value::Long(1), Value::Long(2)]),
        Err(StorageError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn test_entry_lookup_needs_index_cursor() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..3)?;
    let mut cursor = table.cursor();
    assert!(matches!(
        cursor.find_first_row_by_entry(&[Value::Long(1)]),
        Err(StorageError::InvalidArgument(_))
    ));
    assert!(cursor.is_before_first()?);
    Ok(())
}

#[test]
fn test_cursor_symmetry() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, [5, 3, 9, 1, 7, 0, 8, 2, 6, 4])?;

    for mut cursor in [
        table.cursor(),
        table.index_cursor("IdIndex")?,
        table.index_cursor("ValueIndex")?,
    ] {
        let forward = collect_ids(&mut cursor, true)?;
        assert!(cursor.is_after_last()?);
        let mut backward = collect_ids(&mut cursor, false)?;
        assert!(cursor.is_before_first()?);

        backward.reverse();
        assert_eq!(forward.len(), 10);
        assert_eq!(forward, backward);
    }

    let mut by_id = table.index_cursor("IdIndex")?;
    assert_eq!(collect_ids(&mut by_id, true)?, (0..10).collect::<Vec<_>>());
    let mut scan = table.cursor();
    assert_eq!(collect_ids(&mut scan, true)?, vec![5, 3, 9, 1, 7, 0, 8, 2, 6, 4]);
    Ok(())
}

#[test]
fn test_moves_past_the_ends() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..3)?;
    let mut cursor = table.cursor();

    assert!(cursor.is_before_first()?);
    assert!(!cursor.move_to_previous_row()?);
    assert!(matches!(cursor.current_row(), Err(StorageError::InvalidState(_))));

    assert_eq!(cursor.move_next_rows(10)?, 3);
    assert!(cursor.is_after_last()?);
    assert!(!cursor.move_to_next_row()?);

    cursor.before_first()?;
    assert_eq!(cursor.next_row()?.map(|r| id_of(&r)), Some(0));
    cursor.after_last()?;
    assert_eq!(cursor.previous_row()?.map(|r| id_of(&r)), Some(2));
    Ok(())
}

#[test]
fn test_concurrent_delete_in_table_scan() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..5)?;

    let mut a = table.cursor();
    a.move_next_rows(3)?;
    assert_eq!(a.current_row_value("id")?, Value::Long(2));

    let mut b = table.cursor();
    assert!(b.find_first_row("id", &Value::Long(2))?);
    b.delete_current_row()?;

    assert!(a.is_current_row_deleted()?);
    assert!(a.move_to_next_row()?);
    assert_eq!(a.current_row_value("id")?, Value::Long(3));
    assert!(a.move_to_previous_row()?);
    assert_eq!(a.current_row_value("id")?, Value::Long(1));
    Ok(())
}

#[test]
fn test_concurrent_delete_in_index_cursor() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, [4, 0, 3, 1, 2])?;

    let mut a = table.index_cursor("IdIndex")?;
    assert!(a.find_first_row_by_entry(&[Value::Long(2)])?);

    let mut b = table.index_cursor("IdIndex")?;
    assert!(b.find_first_row_by_entry(&[Value::Long(2)])?);
    b.delete_current_row()?;
    assert!(a.is_current_row_deleted()?);

    let mut lookup = table.index_cursor("IdIndex")?;
    assert!(lookup.find_first_row_by_entry(&[Value::Long(2)]).map(|found| !found)?);

    assert!(a.move_to_next_row()?);
    assert_eq!(a.current_row_value("id")?, Value::Long(3));
    assert!(a.move_to_previous_row()?);
    assert_eq!(a.current_row_value("id")?, Value::Long(1));
    Ok(())
}

#[test]
fn test_cursor_sees_rows_added_after_reaching_the_end() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..2)?;

    let mut scan = table.cursor();
    let mut by_id = table.index_cursor("IdIndex")?;
    assert_eq!(collect_ids(&mut scan, true)?, vec![0, 1]);
    assert_eq!(collect_ids(&mut by_id, true)?, vec![0, 1]);

    table.add_row(vec![Value::Long(5), Value::Text("data5".to_string())])?;
    assert!(scan.move_to_next_row()?);
    assert_eq!(scan.current_row_value("id")?, Value::Long(5));
    assert!(by_id.move_to_next_row()?);
    assert_eq!(by_id.current_row_value("id")?, Value::Long(5));

    assert!(!scan.move_to_next_row()?);
    assert!(!by_id.move_to_next_row()?);
    Ok(())
}

#[test]
fn test_find_rows_by_column_and_pattern() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..6)?;

    let mut scan = table.cursor();
    assert!(scan.find_first_row("value", &Value::Text("data4".to_string()))?);
    assert_eq!(scan.current_row_value("id")?, Value::Long(4));
    assert!(!scan.find_next_row("value", &Value::Text("data4".to_string()))?);
    assert_eq!(scan.current_row_value("id")?, Value::Long(4));

    // patterns are coerced to the column type
    assert!(scan.find_first_row("id", &Value::Int(2))?);
    assert_eq!(scan.current_row_value("value")?, Value::Text("data2".to_string()));

    let mut by_value = table.index_cursor("ValueIndex")?;
    let pattern = [("value", Value::Text("data5".to_string())), ("id", Value::Long(5))];
    assert!(by_value.find_first_row_by_pattern(&pattern)?);
    assert_eq!(by_value.current_row_value("id")?, Value::Long(5));

    let wrong = [("value", Value::Text("data5".to_string())), ("id", Value::Long(1))];
    assert!(!by_value.find_first_row_by_pattern(&wrong)?);
    assert_eq!(by_value.current_row_value("id")?, Value::Long(5));
    Ok(())
}

#[test]
fn test_unique_index_lookups_ignore_case() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let schema = jetdb_storage::TableSchema::new("Codes")
        .add_column(jetdb_storage::ColumnDefinition::new("code", jetdb_storage::DataType::Text))
        .add_index(jetdb_storage::IndexDefinition::new("CodeIndex").column("code").unique());
    let table = db.create_table(&schema)?;
    table.add_row(vec![Value::Text("Alpha".to_string())])?;
    table.add_row(vec![Value::Text("Beta".to_string())])?;

    let mut cursor = table.index_cursor("CodeIndex")?;
    assert!(cursor.find_first_row("code", &Value::Text("BETA".to_string()))?);
    assert_eq!(cursor.current_row_value("code")?, Value::Text("Beta".to_string()));

    let mut scan = table.cursor();
    assert!(!scan.find_first_row("code", &Value::Text("BETA".to_string()))?);
    Ok(())
}

#[test]
fn test_update_through_cursor() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..3)?;

    let mut cursor = table.index_cursor("IdIndex")?;
    assert!(cursor.find_first_row_by_entry(&[Value::Long(1)])?);
    cursor.set_current_row_value("value", Value::Text("x".repeat(200)))?;
    assert_eq!(cursor.current_row_value("value")?, Value::Text("x".repeat(200)));

    let mut by_value = table.index_cursor("ValueIndex")?;
    assert!(by_value.find_first_row("value", &Value::Text("x".repeat(200)))?);
    assert_eq!(by_value.current_row_value("id")?, Value::Long(1));
    assert!(!by_value.find_first_row("value", &Value::Text("data1".to_string()))?);
    Ok(())
}

#[test]
fn test_iterator_delete_current() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..6)?;

    let mut cursor = table.cursor();
    let mut rows = cursor.iter();
    assert!(matches!(rows.delete_current(), Err(StorageError::InvalidState(_))));
    while let Some(row) = rows.next() {
        if id_of(&row?) % 2 == 0 {
            rows.delete_current()?;
            assert!(matches!(rows.delete_current(), Err(StorageError::InvalidState(_))));
        }
    }

    let remaining: Vec<i32> = table
        .cursor()
        .iter()
        .map(|row| row.map(|r| id_of(&r)))
        .collect::<Result<_, _>>()?;
    assert_eq!(remaining, vec![1, 3, 5]);
    assert_eq!(table.row_count(), 3);
    Ok(())
}

#[test]
fn test_iterator_options() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..5)?;

    let mut cursor = table.index_cursor("IdIndex")?;
    let rows: Vec<_> = cursor
        .iter_with(IterOptions::new().reverse().columns(["value"]))
        .collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].len(), 1);
    assert_eq!(rows[0].get("value"), Some(&Value::Text("data4".to_string())));
    assert_eq!(rows[0].get("id"), None);

    let mut scan = table.cursor();
    let matching: Vec<_> = scan
        .iter_with(IterOptions::new().matching("id", Value::Long(3)))
        .collect::<Result<_, _>>()?;
    assert_eq!(matching.len(), 1);
    assert_eq!(id_of(&matching[0]), 3);
    Ok(())
}

#[test]
fn test_index_range_cursor() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..10)?;
    let index = table.index("IdIndex")?.clone();

    let mut inclusive = Cursor::index_range(
        table.clone(),
        index.clone(),
        Some(&[Value::Long(3)][..]),
        true,
        Some(&[Value::Long(6)][..]),
        true,
    )?;
    assert_eq!(collect_ids(&mut inclusive, true)?, vec![3, 4, 5, 6]);

    let mut exclusive = Cursor::index_range(
        table.clone(),
        index,
        Some(&[Value::Long(3)][..]),
        false,
        Some(&[Value::Long(6)][..]),
        false,
    )?;
    assert_eq!(collect_ids(&mut exclusive, true)?, vec![4, 5]);
    assert_eq!(collect_ids(&mut exclusive, false)?, vec![5, 4]);
    Ok(())
}

#[test]
fn test_double_delete_is_invalid_state() -> anyhow::Result<()> {
    let (_dir, db) = scratch_db()?;
    let table = numbered_table(&db, 0..2)?;
    let mut cursor = table.cursor();
    cursor.move_to_next_row()?;
    cursor.delete_current_row()?;
    assert!(matches!(cursor.delete_current_row(), Err(StorageError::InvalidState(_))));
    assert!(matches!(cursor.current_row(), Err(StorageError::InvalidState(_))));
    Ok(())
}
