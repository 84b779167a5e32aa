//! Backend adapter contract.
//!
//! Each database engine implements one small trait per behavioral axis;
//! [`DatabaseAdapter`] is the umbrella the endpoint driver works against.
//! An adapter owns a single live connection: the protocol is strictly
//! request/response, so there is never more than one outstanding statement.

pub mod ewkb;
pub mod mysql;
pub mod postgres;
pub mod tls;

pub use mysql::MysqlAdapter;
pub use postgres::PostgresAdapter;
pub use tls::{SslMode, TlsBuilder};

use async_trait::async_trait;

use crate::codec::PackedValue;
use crate::error::Result;
use crate::schema::{Column, ColumnFlags, ColumnKind, Database, Table};

/// One result row: cells correspond 1:1 with the query's columns.
pub type PackedRow = Vec<PackedValue>;

/// Connection parameters shared by the endpoint binaries.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Engine session variables to SET after connecting, verbatim.
    pub set_variables: Option<String>,
    /// Transport security; encrypted (`Require`) unless overridden.
    pub ssl_mode: SslMode,
}

/// How a native result column is converted into a packed cell.
///
/// The per-result conversion table maps each column of a result descriptor to
/// one of these; it is built lazily on first use of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConversion {
    /// Pass the engine's text representation through as bytes.
    Raw,
    /// Engine boolean output becomes a packed boolean.
    Bool,
    /// Decimal text becomes a packed signed integer.
    SignedInt,
    /// Decimal text becomes a packed unsigned integer.
    UnsignedInt,
    /// Engine-escaped binary output is decoded to raw bytes.
    Bytea,
    /// EWKB output becomes the canonical SRID-prefixed WKB form.
    Geometry,
}

/// SQL text generation: quoting, escaping, and DDL fragments.
pub trait SqlDialect {
    /// Quote an identifier with the engine's quote character.
    fn quote_identifier(&self, name: &str) -> String;

    /// Escape a string for embedding between single quotes.
    fn escape_string(&self, value: &str) -> String;

    /// Append a quoted string literal.
    fn append_quoted_string(&self, out: &mut String, value: &[u8]);

    /// Append a quoted binary literal.
    fn append_quoted_bytes(&self, out: &mut String, value: &[u8]);

    /// Append a spatial constructor for a canonical SRID-prefixed WKB value.
    fn append_quoted_spatial(&self, out: &mut String, value: &[u8]) -> Result<()>;

    /// Append a literal for a row cell, dispatching on the column kind.
    fn append_quoted_column_value(
        &self,
        out: &mut String,
        column: &Column,
        value: &[u8],
    ) -> Result<()> {
        match column.kind {
            ColumnKind::Blob => {
                self.append_quoted_bytes(out, value);
                Ok(())
            }
            ColumnKind::Spatial => self.append_quoted_spatial(out, value),
            _ => {
                self.append_quoted_string(out, value);
                Ok(())
            }
        }
    }

    /// Engine-specific DDL fragment for one column.
    fn column_definition(&self, table: &Table, column: &Column) -> Result<String>;
}

/// Transaction lifecycle with the adapter's chosen isolation levels.
#[async_trait]
pub trait TransactionControl {
    async fn start_read_transaction(&mut self) -> Result<()>;
    async fn start_write_transaction(&mut self) -> Result<()>;
    async fn commit_transaction(&mut self) -> Result<()>;
    async fn rollback_transaction(&mut self) -> Result<()>;
}

/// Consistent-view coordination between the two endpoint processes.
#[async_trait]
pub trait SnapshotControl {
    /// Return an opaque token another connection to the same engine can
    /// import for a consistent view. May begin the read transaction.
    async fn export_snapshot(&mut self) -> Result<String>;

    /// Begin a read transaction observing the given snapshot.
    async fn import_snapshot(&mut self, token: &str) -> Result<()>;

    /// Release any lock held solely to preserve a snapshot.
    async fn unhold_snapshot(&mut self) -> Result<()>;
}

/// Permitting out-of-order inserts while rows are applied.
#[async_trait]
pub trait ReferentialIntegrityControl {
    async fn disable_referential_integrity(&mut self) -> Result<()>;
    async fn enable_referential_integrity(&mut self) -> Result<()>;
}

/// Schema discovery and normalization.
#[async_trait]
pub trait SchemaIntrospection {
    /// Introspect the connected database into the canonical model.
    async fn database_schema(&mut self) -> Result<Database>;

    /// Apply engine-specific lossy normalizations to a *peer's* schema so it
    /// is expressed in terms this engine can represent.
    fn convert_unsupported_schema(&self, database: &mut Database);

    /// Which flags this engine can faithfully persist.
    fn supported_flags(&self) -> ColumnFlags;
}

/// Statement execution and row iteration.
#[async_trait]
pub trait QueryExecution {
    /// Run a side-effecting statement; returns rows affected.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Run a query and pack every row per the conversion table.
    async fn query(&mut self, sql: &str) -> Result<Vec<PackedRow>>;

    /// Run a query expected to return exactly one row with one column.
    async fn select_one(&mut self, sql: &str) -> Result<String>;
}

/// The full capability set the endpoint driver requires.
pub trait DatabaseAdapter:
    SchemaIntrospection
    + TransactionControl
    + SnapshotControl
    + ReferentialIntegrityControl
    + QueryExecution
    + SqlDialect
    + Send
{
}

impl<T> DatabaseAdapter for T where
    T: SchemaIntrospection
        + TransactionControl
        + SnapshotControl
        + ReferentialIntegrityControl
        + QueryExecution
        + SqlDialect
        + Send
{
}

/// Adopt a unique key over non-nullable columns as the effective key when a
/// table has no explicit primary key; nullable columns would make the index
/// non-unique in practice.
pub(crate) fn choose_surrogate_key(table: &mut crate::schema::Table) {
    use crate::schema::PrimaryKeyKind;

    if table.primary_key_kind != PrimaryKeyKind::NoAvailableKey {
        return;
    }
    let suitable = table
        .keys
        .iter()
        .find(|key| key.unique() && key.columns.iter().all(|i| !table.columns[*i].nullable));
    if let Some(key) = suitable {
        table.primary_key_columns = key.columns.clone();
        table.primary_key_kind = PrimaryKeyKind::SuitableUniqueKey;
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((byte & 0x0f) as u32, 16).unwrap_or('0'));
    }
    out
}

pub(crate) fn hex_decode(text: &[u8]) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    let digit = |b: u8| (b as char).to_digit(16).map(|d| d as u8);
    let mut out = Vec::with_capacity(text.len() / 2);
    for pair in text.chunks_exact(2) {
        out.push((digit(pair[0])? << 4) | digit(pair[1])?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let bytes = [0x00, 0x01, 0xab, 0xff];
        let hex = hex_encode(&bytes);
        assert_eq!(hex, "0001abff");
        assert_eq!(hex_decode(hex.as_bytes()).unwrap(), bytes);
    }

    #[test]
    fn test_hex_decode_rejects_junk() {
        assert!(hex_decode(b"abc").is_none());
        assert!(hex_decode(b"zz").is_none());
        assert_eq!(hex_decode(b"").unwrap(), Vec::<u8>::new());
    }
}
