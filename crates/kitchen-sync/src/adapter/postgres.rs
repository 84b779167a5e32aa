//! PostgreSQL adapter.
//!
//! Introspects through the system catalogs, classifies types by parsing
//! `format_type` output, and fetches result rows in text format so values
//! keep the server's canonical rendering. PostGIS geometry columns are
//! recognized by collecting the extension's type OIDs (the OID is not a
//! constant).

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};

use crate::codec::PackedValue;
use crate::error::{Result, SyncError};
use crate::schema::{
    Column, ColumnFlags, ColumnKind, Database, DefaultKind, Key, KeyKind, PrimaryKeyKind, Table,
};

use super::ewkb::{ewkb_hex_to_canonical, split_canonical};
use super::tls::TlsBuilder;
use super::{
    hex_decode, hex_encode, ColumnConversion, ConnectParams, PackedRow, QueryExecution,
    ReferentialIntegrityControl, SchemaIntrospection, SnapshotControl, SqlDialect,
    TransactionControl,
};

// Fixed type OIDs from pg_type; the PostGIS geometry OID is collected at
// runtime instead.
const BOOL_OID: u32 = 16;
const BYTEA_OID: u32 = 17;
const CHAR_OID: u32 = 18;
const INT8_OID: u32 = 20;
const INT2_OID: u32 = 21;
const INT4_OID: u32 = 23;
const TEXT_OID: u32 = 25;

/// PostgreSQL index names are truncated to this many bytes.
const MAX_INDEX_NAME: usize = 63;

/// SQL text generation rules for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn column_type(&self, column: &Column) -> Result<String> {
        Ok(match column.kind {
            ColumnKind::Blob => "bytea".to_string(),
            ColumnKind::Text => "text".to_string(),
            ColumnKind::VarChar => {
                if column.size > 0 {
                    format!("character varying({})", column.size)
                } else {
                    "character varying".to_string()
                }
            }
            ColumnKind::FixedChar => format!("character({})", column.size),
            ColumnKind::Uuid => "uuid".to_string(),
            ColumnKind::Bool => "boolean".to_string(),
            ColumnKind::SignedInt => match column.size {
                2 => "smallint".to_string(),
                4 => "integer".to_string(),
                8 => "bigint".to_string(),
                other => {
                    return Err(SyncError::ColumnDefinition(format!(
                        "Don't know how to create integer column {} of size {}",
                        column.name, other
                    )))
                }
            },
            ColumnKind::Real => {
                if column.size == 4 {
                    "real".to_string()
                } else {
                    "double precision".to_string()
                }
            }
            ColumnKind::Decimal => {
                if column.size > 0 {
                    format!("numeric({},{})", column.size, column.scale)
                } else {
                    "numeric".to_string()
                }
            }
            ColumnKind::Date => "date".to_string(),
            ColumnKind::Time => {
                if column.flags.contains(ColumnFlags::TIME_ZONE) {
                    "time with time zone".to_string()
                } else {
                    "time without time zone".to_string()
                }
            }
            ColumnKind::DateTime => {
                if column.flags.contains(ColumnFlags::TIME_ZONE) {
                    "timestamp with time zone".to_string()
                } else {
                    "timestamp without time zone".to_string()
                }
            }
            ColumnKind::Spatial => {
                // all spatial columns map to PostGIS geometry: the built-in
                // geometric types have no SRID support and no multi* family
                let mut result = String::from("geometry");
                if !column.reference_system.is_empty() {
                    result.push('(');
                    if column.type_restriction.is_empty() {
                        result.push_str("geometry");
                    } else {
                        result.push_str(&column.type_restriction);
                    }
                    result.push(',');
                    result.push_str(&column.reference_system);
                    result.push(')');
                } else if !column.type_restriction.is_empty() {
                    result.push('(');
                    result.push_str(&column.type_restriction);
                    result.push(')');
                }
                result
            }
            ColumnKind::Json | ColumnKind::UnsignedInt | ColumnKind::Enum | ColumnKind::Unknown => {
                return Err(SyncError::ColumnDefinition(format!(
                    "Don't know how to express column type of {} ({})",
                    column.name,
                    column.kind.as_str()
                )))
            }
        })
    }

    /// Sequence name matching what PostgreSQL creates for serial columns.
    fn column_sequence_name(&self, table: &Table, column: &Column) -> String {
        format!("{}_{}_seq", table.name, column.name)
    }

    fn column_default(&self, table: &Table, column: &Column) -> Result<String> {
        let mut result = String::from(" DEFAULT ");
        match column.default_kind {
            DefaultKind::NoDefault => result.push_str("NULL"),
            DefaultKind::Sequence => {
                result.push_str("nextval('");
                result.push_str(&self.escape_string(&self.column_sequence_name(table, column)));
                result.push_str("'::regclass)");
            }
            DefaultKind::Literal => match column.kind {
                ColumnKind::Bool
                | ColumnKind::SignedInt
                | ColumnKind::UnsignedInt
                | ColumnKind::Real
                | ColumnKind::Decimal => result.push_str(&column.default_value),
                _ => self.append_quoted_column_value(
                    &mut result,
                    column,
                    column.default_value.as_bytes(),
                )?,
            },
            DefaultKind::Expression => result.push_str(&column.default_value),
        }
        Ok(result)
    }
}

impl SqlDialect for PostgresDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn escape_string(&self, value: &str) -> String {
        value.replace('\\', "\\\\").replace('\'', "''")
    }

    fn append_quoted_string(&self, out: &mut String, value: &[u8]) {
        let text = String::from_utf8_lossy(value);
        out.push('\'');
        out.push_str(&self.escape_string(&text));
        out.push('\'');
    }

    fn append_quoted_bytes(&self, out: &mut String, value: &[u8]) {
        out.push_str("'\\x");
        out.push_str(&hex_encode(value));
        out.push('\'');
    }

    fn append_quoted_spatial(&self, out: &mut String, value: &[u8]) -> Result<()> {
        let (srid, wkb) = split_canonical(value)?;
        out.push_str("ST_GeomFromWKB(");
        self.append_quoted_bytes(out, wkb);
        out.push_str(", ");
        out.push_str(&srid.to_string());
        out.push(')');
        Ok(())
    }

    fn column_definition(&self, table: &Table, column: &Column) -> Result<String> {
        let mut result = self.quote_identifier(&column.name);
        result.push(' ');
        result.push_str(&self.column_type(column)?);
        if !column.nullable {
            result.push_str(" NOT NULL");
        }
        if column.default_kind != DefaultKind::NoDefault {
            result.push_str(&self.column_default(table, column)?);
        }
        Ok(result)
    }
}

/// Extract the parenthesized length from a type string like `numeric(10,2)`.
fn extract_column_length(db_type: &str) -> u32 {
    db_type
        .find('(')
        .map(|open| {
            db_type[open + 1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
        })
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Extract the scale from a type string like `numeric(10,2)`.
fn extract_column_scale(db_type: &str) -> u32 {
    db_type
        .find(',')
        .map(|comma| {
            db_type[comma + 1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
        })
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Split `geometry(Point,4326)`'s inner part into restriction and SRID.
fn extract_spatial_type_restriction_and_reference_system(inner: &str) -> (String, String) {
    let inner = inner.to_lowercase();
    match inner.split_once(',') {
        None => (inner, String::new()),
        Some((restriction, srid)) => {
            let restriction = if restriction == "geometry" {
                String::new()
            } else {
                restriction.to_string()
            };
            (restriction, srid.to_string())
        }
    }
}

/// Undo the escaping seen in `pg_get_expr` string literals.
///
/// Only backslash and quote escapes appear there; regular character escapes
/// such as `\n` are not interpreted by the server when printing defaults.
fn unescape_default_value(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' || c == '\'' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Canonicalize a `pg_get_expr` default into a portable kind and value.
fn parse_column_default(value: &str, db_type: &str) -> (DefaultKind, String) {
    if value.len() > 20 && value.starts_with("nextval('") && value.ends_with("'::regclass)") {
        return (DefaultKind::Sequence, String::new());
    }

    if let Some(cast) = value.strip_prefix("NULL::") {
        // a NULL default is distinct from no default; keep it as an
        // expression but drop the cast for portability
        if db_type.starts_with(cast) {
            return (DefaultKind::Expression, "NULL".to_string());
        }
    }

    if value.len() > 2 && value.starts_with('\'') {
        let end = value.rfind('\'').unwrap_or(0);
        if end > 0 {
            return (DefaultKind::Literal, unescape_default_value(&value[1..end]));
        }
    }

    if !value.is_empty()
        && value != "false"
        && value != "true"
        && value.chars().any(|c| !c.is_ascii_digit() && c != '.')
    {
        let canonical = match value {
            // the server prints CURRENT_TIMESTAMP as now(); convert it back
            "now()" => "CURRENT_TIMESTAMP".to_string(),
            "('now'::text)::date" => "CURRENT_DATE".to_string(),
            // SQL-reserved zero-argument functions come back quoted and
            // parenthesized
            "\"current_schema\"()" | "\"current_user\"()" | "\"session_user\"()" => {
                value[1..value.len() - 3].to_string()
            }
            other => other.to_string(),
        };
        return (DefaultKind::Expression, canonical);
    }

    (DefaultKind::Literal, value.to_string())
}

/// Classify one introspected column from its `format_type` rendering.
fn column_from_introspection(
    name: String,
    db_type: &str,
    nullable: bool,
    default: Option<(DefaultKind, String)>,
) -> Column {
    let (default_kind, default_value) = default.unwrap_or((DefaultKind::NoDefault, String::new()));
    let mut column = Column {
        name,
        nullable,
        default_kind,
        default_value,
        ..Default::default()
    };

    if db_type == "boolean" {
        column.kind = ColumnKind::Bool;
    } else if db_type == "smallint" {
        column.kind = ColumnKind::SignedInt;
        column.size = 2;
    } else if db_type == "integer" {
        column.kind = ColumnKind::SignedInt;
        column.size = 4;
    } else if db_type == "bigint" {
        column.kind = ColumnKind::SignedInt;
        column.size = 8;
    } else if db_type == "real" {
        column.kind = ColumnKind::Real;
        column.size = 4;
    } else if db_type == "double precision" {
        column.kind = ColumnKind::Real;
        column.size = 8;
    } else if db_type.starts_with("numeric(") {
        column.kind = ColumnKind::Decimal;
        column.size = extract_column_length(db_type);
        column.scale = extract_column_scale(db_type);
    } else if db_type.starts_with("numeric") {
        column.kind = ColumnKind::Decimal;
    } else if db_type.starts_with("character varying(") {
        column.kind = ColumnKind::VarChar;
        column.size = extract_column_length(db_type);
    } else if db_type.starts_with("character varying") {
        column.kind = ColumnKind::VarChar; // no length limit
    } else if db_type.starts_with("character(") {
        column.kind = ColumnKind::FixedChar;
        column.size = extract_column_length(db_type);
    } else if db_type == "text" {
        column.kind = ColumnKind::Text;
    } else if db_type == "bytea" {
        column.kind = ColumnKind::Blob;
    } else if db_type == "uuid" {
        column.kind = ColumnKind::Uuid;
    } else if db_type == "date" {
        column.kind = ColumnKind::Date;
    } else if db_type == "time without time zone" {
        column.kind = ColumnKind::Time;
    } else if db_type == "time with time zone" {
        column.kind = ColumnKind::Time;
        column.flags |= ColumnFlags::TIME_ZONE;
    } else if db_type == "timestamp without time zone" {
        column.kind = ColumnKind::DateTime;
    } else if db_type == "timestamp with time zone" {
        column.kind = ColumnKind::DateTime;
        column.flags |= ColumnFlags::TIME_ZONE;
    } else if db_type == "geometry" {
        column.kind = ColumnKind::Spatial;
    } else if db_type.starts_with("geometry(") && db_type.ends_with(')') {
        let (type_restriction, reference_system) =
            extract_spatial_type_restriction_and_reference_system(
                &db_type["geometry(".len()..db_type.len() - 1],
            );
        column.kind = ColumnKind::Spatial;
        column.type_restriction = type_restriction;
        column.reference_system = reference_system;
    } else {
        // not supported; keep the raw type so later stages can produce an
        // intelligible error, and so the table can be ignored instead
        column.kind = ColumnKind::Unknown;
        column.db_type_def = db_type.to_string();
    }

    column
}

/// Assemble one column from its `pg_attribute`/`pg_attrdef` catalog row.
///
/// Identity columns have no `pg_attrdef` entry; `attidentity` is what marks
/// them, and `GENERATED ALWAYS` is distinguished from `GENERATED BY DEFAULT`
/// (and from serial columns) by the flag.
fn catalog_column(
    name: String,
    db_type: &str,
    nullable: bool,
    has_default: bool,
    default_expression: &str,
    identity: &str,
) -> Column {
    let default = match identity {
        "a" | "d" => Some((DefaultKind::Sequence, String::new())),
        _ if has_default => Some(parse_column_default(default_expression, db_type)),
        _ => None,
    };
    let mut column = column_from_introspection(name, db_type, nullable, default);
    if identity == "a" {
        column.flags |= ColumnFlags::IDENTITY_GENERATED_ALWAYS;
    }
    column
}

/// Decode bytea text output, either `\x` hex or the legacy escape format.
fn unescape_bytea(text: &str) -> Result<Vec<u8>> {
    if let Some(hex) = text.strip_prefix("\\x") {
        return hex_decode(hex.as_bytes())
            .ok_or_else(|| SyncError::wire("bytea value is not valid hex"));
    }
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes.get(i + 1) == Some(&b'\\') {
                out.push(b'\\');
                i += 2;
            } else if i + 3 < bytes.len()
                && bytes[i + 1].is_ascii_digit()
                && bytes[i + 2].is_ascii_digit()
                && bytes[i + 3].is_ascii_digit()
            {
                let value = (bytes[i + 1] - b'0') as u16 * 64
                    + (bytes[i + 2] - b'0') as u16 * 8
                    + (bytes[i + 3] - b'0') as u16;
                out.push(value as u8);
                i += 4;
            } else {
                return Err(SyncError::wire("bytea value has a malformed escape"));
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Normalize a non-PostgreSQL peer schema to what this engine can represent.
fn normalize_peer_schema(database: &mut Database) {
    for table in &mut database.tables {
        for column in &mut table.columns {
            if column.kind == ColumnKind::UnsignedInt {
                // no unsigned columns here; use the signed equivalent and
                // rely on the engine raising on out-of-range inserts
                column.kind = ColumnKind::SignedInt;
            }
            if column.kind == ColumnKind::SignedInt && column.size == 1 {
                // smallint is the nearest equivalent
                column.size = 2;
            }
            if column.kind == ColumnKind::SignedInt && column.size == 3 {
                // integer is the nearest equivalent
                column.size = 4;
            }
            if column.kind == ColumnKind::Text || column.kind == ColumnKind::Blob {
                // there is only one text and one bytea type, equivalent to
                // the peer's biggest bucket
                column.size = 0;
            }
        }
        for key in &mut table.keys {
            if key.name.len() >= MAX_INDEX_NAME {
                key.name.truncate(MAX_INDEX_NAME);
            }
        }
    }
}

/// Adapter for a PostgreSQL endpoint.
pub struct PostgresAdapter {
    client: Client,
    dialect: PostgresDialect,
    geometry_oids: BTreeSet<u32>,
}

impl PostgresAdapter {
    /// Connect and prepare the session.
    pub async fn connect(params: &ConnectParams) -> Result<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .dbname(&params.database)
            .user(&params.username);
        if !params.password.is_empty() {
            config.password(&params.password);
        }

        let client = match TlsBuilder::new(params.ssl_mode).build()? {
            Some(tls) => {
                let (client, connection) = config.connect(tls).await?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        tracing::error!(error = %err, "PostgreSQL connection task failed");
                    }
                });
                client
            }
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let (client, connection) = config.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        tracing::error!(error = %err, "PostgreSQL connection task failed");
                    }
                });
                client
            }
        };

        let mut adapter = Self {
            client,
            dialect: PostgresDialect,
            geometry_oids: BTreeSet::new(),
        };
        adapter.execute("SET client_min_messages TO WARNING").await?;
        if let Some(variables) = &params.set_variables {
            adapter.execute(&format!("SET {variables}")).await?;
        }
        info!(
            host = %params.host,
            database = %params.database,
            "connected to PostgreSQL"
        );
        Ok(adapter)
    }

    /// Run a query and collect the text form of every cell.
    async fn text_query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::database(e, sql))?;
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                rows.push(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                );
            }
        }
        Ok(rows)
    }

    fn conversion_for_oid(&self, oid: u32) -> ColumnConversion {
        match oid {
            BOOL_OID => ColumnConversion::Bool,
            INT2_OID | INT4_OID | INT8_OID => ColumnConversion::SignedInt,
            BYTEA_OID => ColumnConversion::Bytea,
            // a shortcut for the common case; the default arm is equivalent
            CHAR_OID | TEXT_OID => ColumnConversion::Raw,
            other if self.geometry_oids.contains(&other) => ColumnConversion::Geometry,
            _ => ColumnConversion::Raw,
        }
    }

    fn pack_text_cell(conversion: ColumnConversion, text: &str) -> Result<PackedValue> {
        Ok(match conversion {
            ColumnConversion::Bool => PackedValue::Bool(text == "t"),
            ColumnConversion::SignedInt => PackedValue::Int(
                text.parse()
                    .map_err(|_| SyncError::wire("integer column held a non-numeric value"))?,
            ),
            ColumnConversion::UnsignedInt => PackedValue::Uint(
                text.parse()
                    .map_err(|_| SyncError::wire("integer column held a non-numeric value"))?,
            ),
            ColumnConversion::Bytea => PackedValue::Bytes(unescape_bytea(text)?),
            ColumnConversion::Geometry => {
                PackedValue::Bytes(ewkb_hex_to_canonical(text.as_bytes())?)
            }
            ColumnConversion::Raw => PackedValue::Bytes(text.as_bytes().to_vec()),
        })
    }

    async fn collect_geometry_oids(&mut self) -> Result<()> {
        // the geometry type comes from the PostGIS extension, so its OID is
        // not a constant; a set covers multiple installs of the extension
        let rows = self
            .text_query(
                "SELECT pg_type.oid, pg_type.typname \
                   FROM pg_type, pg_namespace \
                  WHERE pg_type.typnamespace = pg_namespace.oid AND \
                        pg_namespace.nspname = ANY (current_schemas(false)) AND \
                        pg_type.typname IN ('geometry')",
            )
            .await?;
        for row in rows {
            if let Some(oid) = row.first().and_then(|v| v.as_deref()) {
                if let Ok(oid) = oid.parse() {
                    self.geometry_oids.insert(oid);
                }
            }
        }
        Ok(())
    }

    async fn populate_table_columns(&mut self, table: &mut Table) -> Result<()> {
        let rows = self
            .text_query(&format!(
                "SELECT attname, format_type(atttypid, atttypmod), attnotnull, atthasdef, pg_get_expr(adbin, adrelid), attidentity \
                   FROM pg_attribute \
                   JOIN pg_class ON attrelid = pg_class.oid \
                   JOIN pg_type ON atttypid = pg_type.oid \
                   LEFT JOIN pg_attrdef ON adrelid = attrelid AND adnum = attnum \
                  WHERE attnum > 0 AND \
                        NOT attisdropped AND \
                        relname = '{}' \
                  ORDER BY attnum",
                self.dialect.escape_string(&table.name)
            ))
            .await?;

        for row in rows {
            let name = row[0].clone().unwrap_or_default();
            let db_type = row[1].clone().unwrap_or_default();
            let nullable = row[2].as_deref() == Some("f");
            let has_default = row[3].as_deref() == Some("t");
            let expression = row[4].clone().unwrap_or_default();
            let identity = row[5].clone().unwrap_or_default();
            table.columns.push(catalog_column(
                name,
                &db_type,
                nullable,
                has_default,
                &expression,
                &identity,
            ));
        }
        Ok(())
    }

    async fn populate_table_primary_key(&mut self, table: &mut Table) -> Result<()> {
        let rows = self
            .text_query(&format!(
                "SELECT column_name \
                   FROM information_schema.table_constraints, \
                        information_schema.key_column_usage \
                  WHERE information_schema.table_constraints.table_name = '{escaped}' AND \
                        information_schema.key_column_usage.table_name = information_schema.table_constraints.table_name AND \
                        information_schema.key_column_usage.constraint_name = information_schema.table_constraints.constraint_name AND \
                        constraint_type = 'PRIMARY KEY' \
                  ORDER BY ordinal_position",
                escaped = self.dialect.escape_string(&table.name)
            ))
            .await?;

        for row in rows {
            let column_name = row[0].clone().unwrap_or_default();
            let index = table.index_of_column(&column_name).ok_or_else(|| {
                SyncError::wire(format!(
                    "primary key column {column_name} not found on table {}",
                    table.name
                ))
            })?;
            table.primary_key_columns.push(index);
            table.primary_key_kind = PrimaryKeyKind::ExplicitPrimaryKey;
        }
        Ok(())
    }

    async fn populate_table_keys(&mut self, table: &mut Table) -> Result<()> {
        let rows = self
            .text_query(&format!(
                "SELECT indexname, indisunique, attname \
                   FROM (SELECT table_class.oid AS table_oid, index_class.relname AS indexname, pg_index.indisunique, generate_series(1, array_length(indkey, 1)) AS position, unnest(indkey) AS attnum \
                           FROM pg_class table_class, pg_class index_class, pg_index \
                          WHERE table_class.relname = '{escaped}' AND \
                                table_class.relkind = 'r' AND \
                                index_class.relkind = 'i' AND \
                                pg_index.indrelid = table_class.oid AND \
                                pg_index.indexrelid = index_class.oid AND \
                                NOT pg_index.indisprimary) index_attrs, \
                        pg_attribute \
                  WHERE pg_attribute.attrelid = table_oid AND \
                        pg_attribute.attnum = index_attrs.attnum \
                  ORDER BY indexname, index_attrs.position",
                escaped = self.dialect.escape_string(&table.name)
            ))
            .await?;

        for row in rows {
            let key_name = row[0].clone().unwrap_or_default();
            let unique = row[1].as_deref() == Some("t");
            let column_name = row[2].clone().unwrap_or_default();
            let index = table.index_of_column(&column_name).ok_or_else(|| {
                SyncError::wire(format!(
                    "key column {column_name} not found on table {}",
                    table.name
                ))
            })?;
            if table.keys.last().map(|k| k.name.as_str()) != Some(key_name.as_str()) {
                table.keys.push(Key {
                    name: key_name,
                    kind: if unique {
                        KeyKind::Unique
                    } else {
                        KeyKind::Standard
                    },
                    columns: Vec::new(),
                });
            }
            if let Some(key) = table.keys.last_mut() {
                key.columns.push(index);
            }
        }

        // key order is arbitrary, but both ends must agree on it
        table.keys.sort_by(Key::by_kind_then_name);
        Ok(())
    }

}

#[async_trait]
impl SchemaIntrospection for PostgresAdapter {
    async fn database_schema(&mut self) -> Result<Database> {
        self.collect_geometry_oids().await?;

        // largest tables first: the synchronization algorithm benefits from
        // starting heavy tables early
        let table_rows = self
            .text_query(
                "SELECT pg_class.relname \
                   FROM pg_class, pg_namespace \
                  WHERE pg_class.relnamespace = pg_namespace.oid AND \
                        pg_namespace.nspname = ANY (current_schemas(false)) AND \
                        relkind = 'r' \
                  ORDER BY pg_relation_size(pg_class.oid) DESC, relname ASC",
            )
            .await?;

        let mut database = Database::default();
        for row in table_rows {
            let mut table = Table::new(row[0].clone().unwrap_or_default());
            self.populate_table_columns(&mut table).await?;
            self.populate_table_primary_key(&mut table).await?;
            self.populate_table_keys(&mut table).await?;
            super::choose_surrogate_key(&mut table);
            table.validate().map_err(SyncError::Wire)?;
            debug!(table = %table.name, columns = table.columns.len(), "introspected table");
            database.tables.push(table);
        }
        Ok(database)
    }

    fn convert_unsupported_schema(&self, database: &mut Database) {
        normalize_peer_schema(database);
    }

    fn supported_flags(&self) -> ColumnFlags {
        ColumnFlags::TIME_ZONE | ColumnFlags::IDENTITY_GENERATED_ALWAYS
    }
}

#[async_trait]
impl TransactionControl for PostgresAdapter {
    async fn start_read_transaction(&mut self) -> Result<()> {
        self.execute("START TRANSACTION READ ONLY ISOLATION LEVEL REPEATABLE READ")
            .await?;
        Ok(())
    }

    async fn start_write_transaction(&mut self) -> Result<()> {
        self.execute("START TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .await?;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.execute("ROLLBACK").await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotControl for PostgresAdapter {
    async fn export_snapshot(&mut self) -> Result<String> {
        // DDL is transactional here, so starting the transaction before even
        // looking at the tables gives a fully consistent view
        self.start_read_transaction().await?;
        self.select_one("SELECT pg_export_snapshot()").await
    }

    async fn import_snapshot(&mut self, token: &str) -> Result<()> {
        self.start_read_transaction().await?;
        let sql = format!(
            "SET TRANSACTION SNAPSHOT '{}'",
            self.dialect.escape_string(token)
        );
        self.execute(&sql).await?;
        Ok(())
    }

    async fn unhold_snapshot(&mut self) -> Result<()> {
        // nothing to release; only lock-based engines hold anything
        Ok(())
    }
}

#[async_trait]
impl ReferentialIntegrityControl for PostgresAdapter {
    async fn disable_referential_integrity(&mut self) -> Result<()> {
        self.execute("SET CONSTRAINTS ALL DEFERRED").await?;
        Ok(())
    }

    async fn enable_referential_integrity(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl QueryExecution for PostgresAdapter {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::database(e, sql))?;
        Ok(messages
            .iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::CommandComplete(count) => Some(*count),
                _ => None,
            })
            .sum())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<PackedRow>> {
        // the prepared statement supplies the result descriptor; values are
        // fetched in text format so the server renders them canonically
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| SyncError::database(e, sql))?;
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::database(e, sql))?;

        let mut conversions: Option<Vec<ColumnConversion>> = None;
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let conversions = conversions.get_or_insert_with(|| {
                    statement
                        .columns()
                        .iter()
                        .map(|c| self.conversion_for_oid(c.type_().oid()))
                        .collect()
                });
                let mut cells = Vec::with_capacity(row.len());
                for i in 0..row.len() {
                    let cell = match row.get(i) {
                        None => PackedValue::Nil,
                        Some(text) => Self::pack_text_cell(
                            conversions.get(i).copied().unwrap_or(ColumnConversion::Raw),
                            text,
                        )?,
                    };
                    cells.push(cell);
                }
                rows.push(cells);
            }
        }
        Ok(rows)
    }

    async fn select_one(&mut self, sql: &str) -> Result<String> {
        let rows = self.text_query(sql).await?;
        if rows.len() != 1 || rows[0].len() != 1 {
            return Err(SyncError::database(
                "Expected query to return only one row with only one column",
                sql,
            ));
        }
        Ok(rows[0][0].clone().unwrap_or_default())
    }
}

impl SqlDialect for PostgresAdapter {
    fn quote_identifier(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn escape_string(&self, value: &str) -> String {
        self.dialect.escape_string(value)
    }

    fn append_quoted_string(&self, out: &mut String, value: &[u8]) {
        self.dialect.append_quoted_string(out, value)
    }

    fn append_quoted_bytes(&self, out: &mut String, value: &[u8]) {
        self.dialect.append_quoted_bytes(out, value)
    }

    fn append_quoted_spatial(&self, out: &mut String, value: &[u8]) -> Result<()> {
        self.dialect.append_quoted_spatial(out, value)
    }

    fn column_definition(&self, table: &Table, column: &Column) -> Result<String> {
        self.dialect.column_definition(table, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(kind: ColumnKind) -> Column {
        Column {
            name: "c".into(),
            kind,
            ..Default::default()
        }
    }

    #[test]
    fn test_quote_identifier() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.quote_identifier("users"), "\"users\"");
        assert_eq!(dialect.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_escape_string() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.escape_string("O'Brien"), "O''Brien");
        assert_eq!(dialect.escape_string("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_quoted_bytes() {
        let dialect = PostgresDialect;
        let mut out = String::new();
        dialect.append_quoted_bytes(&mut out, &[0xde, 0xad]);
        assert_eq!(out, "'\\xdead'");
    }

    #[test]
    fn test_quoted_spatial() {
        let dialect = PostgresDialect;
        // canonical form: SRID 4326 little-endian, then WKB
        let mut value = 4326u32.to_le_bytes().to_vec();
        value.extend_from_slice(&[0x01, 0x02]);
        let mut out = String::new();
        dialect.append_quoted_spatial(&mut out, &value).unwrap();
        assert_eq!(out, "ST_GeomFromWKB('\\x0102', 4326)");
    }

    #[test]
    fn test_column_types() {
        let dialect = PostgresDialect;
        let mut c = column(ColumnKind::SignedInt);
        c.size = 8;
        assert_eq!(dialect.column_type(&c).unwrap(), "bigint");

        let mut c = column(ColumnKind::VarChar);
        c.size = 80;
        assert_eq!(dialect.column_type(&c).unwrap(), "character varying(80)");

        let mut c = column(ColumnKind::Decimal);
        c.size = 10;
        c.scale = 2;
        assert_eq!(dialect.column_type(&c).unwrap(), "numeric(10,2)");
        c.size = 0;
        assert_eq!(dialect.column_type(&c).unwrap(), "numeric");

        let mut c = column(ColumnKind::DateTime);
        c.flags |= ColumnFlags::TIME_ZONE;
        assert_eq!(dialect.column_type(&c).unwrap(), "timestamp with time zone");

        let mut c = column(ColumnKind::Spatial);
        c.type_restriction = "point".into();
        c.reference_system = "4326".into();
        assert_eq!(dialect.column_type(&c).unwrap(), "geometry(point,4326)");
        c.reference_system.clear();
        assert_eq!(dialect.column_type(&c).unwrap(), "geometry(point)");
        c.type_restriction.clear();
        assert_eq!(dialect.column_type(&c).unwrap(), "geometry");

        assert!(dialect.column_type(&column(ColumnKind::Unknown)).is_err());
    }

    #[test]
    fn test_column_definition_with_expression_default() {
        let dialect = PostgresDialect;
        let table = Table::new("events");
        let mut c = column(ColumnKind::DateTime);
        c.name = "created_at".into();
        c.nullable = false;
        c.default_kind = DefaultKind::Expression;
        c.default_value = "CURRENT_TIMESTAMP".into();
        assert_eq!(
            dialect.column_definition(&table, &c).unwrap(),
            "\"created_at\" timestamp without time zone NOT NULL DEFAULT CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_column_definition_with_sequence_default() {
        let dialect = PostgresDialect;
        let table = Table::new("widgets");
        let mut c = column(ColumnKind::SignedInt);
        c.name = "id".into();
        c.size = 8;
        c.nullable = false;
        c.default_kind = DefaultKind::Sequence;
        assert_eq!(
            dialect.column_definition(&table, &c).unwrap(),
            "\"id\" bigint NOT NULL DEFAULT nextval('widgets_id_seq'::regclass)"
        );
    }

    #[test]
    fn test_column_definition_with_literal_default() {
        let dialect = PostgresDialect;
        let table = Table::new("t");
        let mut c = column(ColumnKind::VarChar);
        c.name = "status".into();
        c.size = 20;
        c.default_kind = DefaultKind::Literal;
        c.default_value = "new".into();
        assert_eq!(
            dialect.column_definition(&table, &c).unwrap(),
            "\"status\" character varying(20) DEFAULT 'new'"
        );

        let mut c = column(ColumnKind::SignedInt);
        c.name = "n".into();
        c.size = 4;
        c.default_kind = DefaultKind::Literal;
        c.default_value = "0".into();
        assert_eq!(
            dialect.column_definition(&table, &c).unwrap(),
            "\"n\" integer DEFAULT 0"
        );
    }

    #[test]
    fn test_parse_column_default() {
        assert_eq!(
            parse_column_default("nextval('widgets_id_seq'::regclass)", "bigint"),
            (DefaultKind::Sequence, String::new())
        );
        assert_eq!(
            parse_column_default("now()", "timestamp without time zone"),
            (DefaultKind::Expression, "CURRENT_TIMESTAMP".to_string())
        );
        assert_eq!(
            parse_column_default("('now'::text)::date", "date"),
            (DefaultKind::Expression, "CURRENT_DATE".to_string())
        );
        assert_eq!(
            parse_column_default("\"current_user\"()", "name"),
            (DefaultKind::Expression, "current_user".to_string())
        );
        assert_eq!(
            parse_column_default("NULL::character varying", "character varying(20)"),
            (DefaultKind::Expression, "NULL".to_string())
        );
        assert_eq!(
            parse_column_default("'it''s'::text", "text"),
            (DefaultKind::Literal, "it's".to_string())
        );
        assert_eq!(
            parse_column_default("'a\\\\b'::text", "text"),
            (DefaultKind::Literal, "a\\b".to_string())
        );
        assert_eq!(
            parse_column_default("42", "integer"),
            (DefaultKind::Literal, "42".to_string())
        );
        assert_eq!(
            parse_column_default("true", "boolean"),
            (DefaultKind::Literal, "true".to_string())
        );
        assert_eq!(
            parse_column_default("CURRENT_DATE + 1", "date"),
            (DefaultKind::Expression, "CURRENT_DATE + 1".to_string())
        );
    }

    #[test]
    fn test_column_classification() {
        let c = column_from_introspection("flag".into(), "boolean", true, None);
        assert_eq!(c.kind, ColumnKind::Bool);

        let c = column_from_introspection("n".into(), "numeric(12,3)", true, None);
        assert_eq!((c.kind, c.size, c.scale), (ColumnKind::Decimal, 12, 3));

        let c = column_from_introspection("s".into(), "character varying(128)", true, None);
        assert_eq!((c.kind, c.size), (ColumnKind::VarChar, 128));

        let c = column_from_introspection("t".into(), "timestamp with time zone", true, None);
        assert_eq!(c.kind, ColumnKind::DateTime);
        assert!(c.flags.contains(ColumnFlags::TIME_ZONE));

        let c = column_from_introspection("g".into(), "geometry(Point,4326)", true, None);
        assert_eq!(c.kind, ColumnKind::Spatial);
        assert_eq!(c.type_restriction, "point");
        assert_eq!(c.reference_system, "4326");

        let c = column_from_introspection("g".into(), "geometry(MultiPolygon)", true, None);
        assert_eq!(c.type_restriction, "multipolygon");
        assert_eq!(c.reference_system, "");

        let c = column_from_introspection("v".into(), "tsvector", true, None);
        assert_eq!(c.kind, ColumnKind::Unknown);
        assert_eq!(c.db_type_def, "tsvector");
    }

    #[test]
    fn test_identity_columns() {
        // GENERATED ALWAYS AS IDENTITY: sequence default plus the flag
        let c = catalog_column("id".into(), "bigint", false, false, "", "a");
        assert_eq!(c.default_kind, DefaultKind::Sequence);
        assert_eq!(c.default_value, "");
        assert!(c.flags.contains(ColumnFlags::IDENTITY_GENERATED_ALWAYS));

        // GENERATED BY DEFAULT AS IDENTITY: sequence default, no flag
        let c = catalog_column("id".into(), "bigint", false, false, "", "d");
        assert_eq!(c.default_kind, DefaultKind::Sequence);
        assert!(!c.flags.contains(ColumnFlags::IDENTITY_GENERATED_ALWAYS));

        // serial columns arrive as a nextval default, not as identity
        let c = catalog_column(
            "id".into(),
            "bigint",
            false,
            true,
            "nextval('widgets_id_seq'::regclass)",
            "",
        );
        assert_eq!(c.default_kind, DefaultKind::Sequence);
        assert!(!c.flags.contains(ColumnFlags::IDENTITY_GENERATED_ALWAYS));

        // a plain default is untouched by the identity path
        let c = catalog_column("n".into(), "integer", true, true, "42", "");
        assert_eq!(c.default_kind, DefaultKind::Literal);
        assert_eq!(c.default_value, "42");
    }

    #[test]
    fn test_normalize_peer_schema() {
        let mut table = Table::new("t");
        table.columns.push(Column {
            name: "tiny".into(),
            kind: ColumnKind::UnsignedInt,
            size: 1,
            ..Default::default()
        });
        table.columns.push(Column {
            name: "medium".into(),
            kind: ColumnKind::SignedInt,
            size: 3,
            ..Default::default()
        });
        table.columns.push(Column {
            name: "body".into(),
            kind: ColumnKind::Text,
            size: 255,
            ..Default::default()
        });
        table.keys.push(Key {
            name: "k".repeat(70),
            kind: KeyKind::Standard,
            columns: vec![0],
        });
        let mut database = Database {
            tables: vec![table],
        };

        normalize_peer_schema(&mut database);

        let table = &database.tables[0];
        assert_eq!(table.columns[0].kind, ColumnKind::SignedInt);
        assert_eq!(table.columns[0].size, 2);
        assert_eq!(table.columns[1].size, 4);
        assert_eq!(table.columns[2].size, 0);
        assert_eq!(table.keys[0].name.len(), 63);
    }

    #[test]
    fn test_unescape_bytea() {
        assert_eq!(unescape_bytea("\\x6162ff").unwrap(), b"ab\xff");
        assert_eq!(unescape_bytea("abc").unwrap(), b"abc");
        assert_eq!(unescape_bytea("a\\\\b").unwrap(), b"a\\b");
        assert_eq!(unescape_bytea("\\001\\377").unwrap(), vec![1, 255]);
        assert!(unescape_bytea("\\q").is_err());
    }

    #[test]
    fn test_pack_text_cell() {
        assert_eq!(
            PostgresAdapter::pack_text_cell(ColumnConversion::Bool, "t").unwrap(),
            PackedValue::Bool(true)
        );
        assert_eq!(
            PostgresAdapter::pack_text_cell(ColumnConversion::SignedInt, "-17").unwrap(),
            PackedValue::Int(-17)
        );
        assert_eq!(
            PostgresAdapter::pack_text_cell(ColumnConversion::Raw, "plain").unwrap(),
            PackedValue::Bytes(b"plain".to_vec())
        );
        assert!(PostgresAdapter::pack_text_cell(ColumnConversion::SignedInt, "NaN").is_err());
    }

    #[test]
    fn test_surrogate_key_selection() {
        let mut table = Table::new("t");
        table.columns.push(Column {
            name: "a".into(),
            nullable: true,
            ..Default::default()
        });
        table.columns.push(Column {
            name: "b".into(),
            nullable: false,
            ..Default::default()
        });
        table.keys.push(Key {
            name: "t_a".into(),
            kind: KeyKind::Unique,
            columns: vec![0], // nullable, not suitable
        });
        table.keys.push(Key {
            name: "t_b".into(),
            kind: KeyKind::Unique,
            columns: vec![1],
        });

        crate::adapter::choose_surrogate_key(&mut table);
        assert_eq!(table.primary_key_kind, PrimaryKeyKind::SuitableUniqueKey);
        assert_eq!(table.primary_key_columns, vec![1]);
    }

    #[test]
    fn test_no_surrogate_key_available() {
        let mut table = Table::new("t");
        table.columns.push(Column {
            name: "a".into(),
            nullable: true,
            ..Default::default()
        });
        table.keys.push(Key {
            name: "t_a".into(),
            kind: KeyKind::Standard,
            columns: vec![0],
        });
        crate::adapter::choose_surrogate_key(&mut table);
        assert_eq!(table.primary_key_kind, PrimaryKeyKind::NoAvailableKey);
        assert!(table.primary_key_columns.is_empty());
    }
}
