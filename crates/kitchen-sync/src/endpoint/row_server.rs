//! Stock row-serving delegate for the "from" endpoint.
//!
//! Serves the synchronization commands from live table content: `rows`
//! streams a key range back as packed rows, `range` hashes the next block of
//! rows and reports where it ended, and `hash` recomputes a block the peer
//! has already hashed. The subdivision decisions stay entirely on the "to"
//! side.

use async_trait::async_trait;
use bytes::BytesMut;

use crate::adapter::{DatabaseAdapter, PackedRow, SqlDialect};
use crate::codec::{pack, pack_array_length, PackedValue};
use crate::error::{Result, SyncError};
use crate::protocol::Command;
use crate::schema::{Database, Table};

use super::hasher::{HashAlgorithm, RowHasher};
use super::SyncDelegate;

/// Row server state: the block-size targets the peer has negotiated.
#[derive(Debug, Clone)]
pub struct RowServer {
    target_block_size: u64,
    target_minimum_block_size: u64,
}

impl Default for RowServer {
    fn default() -> Self {
        Self {
            target_block_size: 1,
            target_minimum_block_size: 1,
        }
    }
}

impl RowServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The block size the peer asked for, in rows.
    pub fn target_block_size(&self) -> u64 {
        self.target_block_size
    }

    /// The smallest block the peer wants subdivision to produce.
    pub fn target_minimum_block_size(&self) -> u64 {
        self.target_minimum_block_size
    }

    fn find_table<'a>(schema: &'a Database, name: &str) -> Result<&'a Table> {
        schema
            .tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| SyncError::wire(format!("unknown table {name}")))
    }

    /// Append one key cell as a SQL literal.
    fn append_key_literal<S: SqlDialect + ?Sized>(
        dialect: &S,
        out: &mut String,
        table: &Table,
        column_index: usize,
        value: &PackedValue,
    ) -> Result<()> {
        let column = table.columns.get(column_index).ok_or_else(|| {
            SyncError::wire(format!(
                "key column index {column_index} out of range on table {}",
                table.name
            ))
        })?;
        match value {
            PackedValue::Nil => out.push_str("NULL"),
            PackedValue::Bool(true) => out.push_str("TRUE"),
            PackedValue::Bool(false) => out.push_str("FALSE"),
            PackedValue::Int(v) => out.push_str(&v.to_string()),
            PackedValue::Uint(v) => out.push_str(&v.to_string()),
            PackedValue::Float32(v) => out.push_str(&v.to_string()),
            PackedValue::Float64(v) => out.push_str(&v.to_string()),
            PackedValue::Bytes(bytes) => {
                dialect.append_quoted_column_value(out, column, bytes)?
            }
            PackedValue::Array(_) | PackedValue::Map(_) => {
                return Err(SyncError::wire("key cell is not a scalar"))
            }
        }
        Ok(())
    }

    /// Append a row-value comparison like `("a", "b") > ('x', 1)`.
    fn append_key_comparison<S: SqlDialect + ?Sized>(
        dialect: &S,
        out: &mut String,
        table: &Table,
        operator: &str,
        key: &[PackedValue],
    ) -> Result<()> {
        if key.len() != table.primary_key_columns.len() {
            return Err(SyncError::wire(format!(
                "key tuple has {} values but table {} has {} key columns",
                key.len(),
                table.name,
                table.primary_key_columns.len()
            )));
        }
        out.push('(');
        for (i, column_index) in table.primary_key_columns.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&dialect.quote_identifier(&table.columns[*column_index].name));
        }
        out.push_str(") ");
        out.push_str(operator);
        out.push_str(" (");
        for (i, (column_index, value)) in table
            .primary_key_columns
            .iter()
            .zip(key.iter())
            .enumerate()
        {
            if i > 0 {
                out.push_str(", ");
            }
            Self::append_key_literal(dialect, out, table, *column_index, value)?;
        }
        out.push(')');
        Ok(())
    }

    /// Build the SELECT for rows in `(prev_key, last_key]`, key-ordered.
    fn range_query<S: SqlDialect + ?Sized>(
        dialect: &S,
        table: &Table,
        prev_key: &[PackedValue],
        last_key: &[PackedValue],
        limit: Option<u64>,
    ) -> Result<String> {
        if table.primary_key_columns.is_empty() {
            return Err(SyncError::wire(format!(
                "table {} has no usable key to order by",
                table.name
            )));
        }

        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| dialect.quote_identifier(&c.name))
            .collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            dialect.quote_identifier(&table.name)
        );

        let mut in_where = false;
        if !prev_key.is_empty() {
            sql.push_str(" WHERE ");
            in_where = true;
            Self::append_key_comparison(dialect, &mut sql, table, ">", prev_key)?;
        }
        if !last_key.is_empty() {
            sql.push_str(if in_where { " AND " } else { " WHERE " });
            Self::append_key_comparison(dialect, &mut sql, table, "<=", last_key)?;
        }

        sql.push_str(" ORDER BY ");
        for (i, column_index) in table.primary_key_columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.quote_identifier(&table.columns[*column_index].name));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Ok(sql)
    }

    /// Key cells of a row, in key order.
    fn key_of_row(table: &Table, row: &PackedRow) -> PackedValue {
        PackedValue::Array(
            table
                .primary_key_columns
                .iter()
                .filter_map(|i| row.get(*i).cloned())
                .collect(),
        )
    }

    /// Digest a block of rows over their packed encoding.
    fn hash_rows(algorithm: HashAlgorithm, rows: &[PackedRow]) -> Vec<u8> {
        let mut hasher = RowHasher::new(algorithm);
        let mut buffer = BytesMut::new();
        for row in rows {
            buffer.clear();
            pack_array_length(&mut buffer, row.len());
            for cell in row {
                pack(&mut buffer, cell);
            }
            hasher.update(&buffer);
        }
        hasher.finish()
    }

    /// Query the `(prev_key, last_key]` range named by a command's common
    /// argument prefix: table, prev_key, last_key.
    async fn fetch_rows<A: DatabaseAdapter>(
        adapter: &mut A,
        schema: &Database,
        command: &Command,
        limit: Option<u64>,
    ) -> Result<Vec<PackedRow>> {
        let table = Self::find_table(schema, command.str_arg(0)?)?;
        let prev_key = command.array_arg(1)?;
        let last_key = command.array_arg(2)?;
        let sql = Self::range_query(&*adapter, table, prev_key, last_key, limit)?;
        adapter.query(&sql).await
    }
}

#[async_trait]
impl<A: DatabaseAdapter> SyncDelegate<A> for RowServer {
    fn set_target_block_size(&mut self, size: u64) {
        self.target_block_size = size.max(1);
    }

    fn set_target_minimum_block_size(&mut self, size: u64) {
        self.target_minimum_block_size = size.max(1);
    }

    async fn range(
        &mut self,
        adapter: &mut A,
        schema: &Database,
        command: &Command,
        version: u32,
    ) -> Result<Vec<PackedValue>> {
        let rows_to_hash = command.uint_arg(3)?.max(1);
        let rows = Self::fetch_rows(adapter, schema, command, Some(rows_to_hash)).await?;
        let table = Self::find_table(schema, command.str_arg(0)?)?;

        let last_key = rows
            .last()
            .map(|row| Self::key_of_row(table, row))
            .unwrap_or(PackedValue::Array(Vec::new()));
        let hash = Self::hash_rows(HashAlgorithm::for_version(version), &rows);
        Ok(vec![
            last_key,
            PackedValue::Uint(rows.len() as u64),
            PackedValue::Bytes(hash),
        ])
    }

    async fn hash(
        &mut self,
        adapter: &mut A,
        schema: &Database,
        command: &Command,
        version: u32,
    ) -> Result<Vec<PackedValue>> {
        let row_limit = command.uint_arg(3)?.max(1);
        let algorithm = HashAlgorithm::from_wire(command.arg(4)?, version)?;
        let rows = Self::fetch_rows(adapter, schema, command, Some(row_limit)).await?;
        let hash = Self::hash_rows(algorithm, &rows);
        Ok(vec![
            PackedValue::Uint(rows.len() as u64),
            PackedValue::Bytes(hash),
        ])
    }

    async fn rows(
        &mut self,
        adapter: &mut A,
        schema: &Database,
        command: &Command,
        _version: u32,
    ) -> Result<Vec<PackedValue>> {
        let rows = Self::fetch_rows(adapter, schema, command, None).await?;
        Ok(rows.into_iter().map(PackedValue::Array).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::postgres::PostgresDialect;
    use crate::schema::{Column, ColumnKind, PrimaryKeyKind};

    fn sample_table() -> Table {
        let mut table = Table::new("widgets");
        table.columns.push(Column {
            name: "id".into(),
            nullable: false,
            kind: ColumnKind::SignedInt,
            size: 8,
            ..Default::default()
        });
        table.columns.push(Column {
            name: "name".into(),
            kind: ColumnKind::Text,
            ..Default::default()
        });
        table.primary_key_columns = vec![0];
        table.primary_key_kind = PrimaryKeyKind::ExplicitPrimaryKey;
        table
    }

    #[test]
    fn test_range_query_shape() {
        let table = sample_table();
        let sql = RowServer::range_query(
            &PostgresDialect,
            &table,
            &[PackedValue::Int(10)],
            &[PackedValue::Int(20)],
            Some(100),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"widgets\" WHERE (\"id\") > (10) AND (\"id\") <= (20) ORDER BY \"id\" LIMIT 100"
        );
    }

    #[test]
    fn test_range_query_open_start() {
        let table = sample_table();
        let sql = RowServer::range_query(
            &PostgresDialect,
            &table,
            &[],
            &[PackedValue::Int(5)],
            None,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"widgets\" WHERE (\"id\") <= (5) ORDER BY \"id\""
        );
    }

    #[test]
    fn test_range_query_whole_table() {
        let table = sample_table();
        let sql = RowServer::range_query(&PostgresDialect, &table, &[], &[], None).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"widgets\" ORDER BY \"id\""
        );
    }

    #[test]
    fn test_range_query_string_key() {
        let mut table = sample_table();
        table.primary_key_columns = vec![1, 0];
        let sql = RowServer::range_query(
            &PostgresDialect,
            &table,
            &[PackedValue::from_str("o'k"), PackedValue::Int(3)],
            &[],
            None,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"widgets\" WHERE (\"name\", \"id\") > ('o''k', 3) ORDER BY \"name\", \"id\""
        );
    }

    #[test]
    fn test_range_query_rejects_key_arity_mismatch() {
        let table = sample_table();
        let result = RowServer::range_query(
            &PostgresDialect,
            &table,
            &[PackedValue::Int(1), PackedValue::Int(2)],
            &[],
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_range_query_requires_key() {
        let mut table = sample_table();
        table.primary_key_columns.clear();
        assert!(RowServer::range_query(&PostgresDialect, &table, &[], &[], None).is_err());
    }

    #[test]
    fn test_key_of_row() {
        let table = sample_table();
        let row: PackedRow = vec![PackedValue::Int(7), PackedValue::from_str("x")];
        assert_eq!(
            RowServer::key_of_row(&table, &row),
            PackedValue::Array(vec![PackedValue::Int(7)])
        );
    }

    #[test]
    fn test_hash_rows_is_deterministic_and_order_sensitive() {
        let row_a: PackedRow = vec![PackedValue::Int(1), PackedValue::from_str("a")];
        let row_b: PackedRow = vec![PackedValue::Int(2), PackedValue::from_str("b")];

        let forward =
            RowServer::hash_rows(HashAlgorithm::Blake3, &[row_a.clone(), row_b.clone()]);
        let again =
            RowServer::hash_rows(HashAlgorithm::Blake3, &[row_a.clone(), row_b.clone()]);
        let reversed = RowServer::hash_rows(HashAlgorithm::Blake3, &[row_b, row_a]);

        assert_eq!(forward, again);
        assert_ne!(forward, reversed);
    }

    #[test]
    fn test_empty_block_hash() {
        let empty = RowServer::hash_rows(HashAlgorithm::XxHash64, &[]);
        assert_eq!(empty.len(), 8);
    }
}
