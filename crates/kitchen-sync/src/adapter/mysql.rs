//! MySQL adapter.
//!
//! Introspects through `information_schema`, preserves the engine's TEXT and
//! BLOB size buckets and ENUM value lists, and coordinates consistent views
//! with a global read lock rather than a snapshot token. Geometry values are
//! stored natively as SRID-prefixed WKB, which is already the canonical row
//! representation, so they pass through unconverted.

use async_trait::async_trait;
use mysql_async::consts::{ColumnFlags as NativeColumnFlags, ColumnType};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Row, SslOpts, Value};
use tracing::{debug, info, warn};

use crate::codec::PackedValue;
use crate::error::{Result, SyncError};
use crate::schema::{
    Column, ColumnFlags, ColumnKind, Database, DefaultKind, Key, KeyKind, PrimaryKeyKind, Table,
};

use super::ewkb::split_canonical;
use super::tls::SslMode;
use super::{
    hex_encode, ColumnConversion, ConnectParams, PackedRow, QueryExecution,
    ReferentialIntegrityControl, SchemaIntrospection, SnapshotControl, SqlDialect,
    TransactionControl,
};

/// MySQL index names are truncated to this many characters.
const MAX_INDEX_NAME: usize = 64;

// TEXT/BLOB capacity buckets, kept distinct because the engine distinguishes
// the four sizes.
const TINY_CAPACITY: u32 = 255;
const REGULAR_CAPACITY: u32 = 65_535;
const MEDIUM_CAPACITY: u32 = 16_777_215;
const LONG_CAPACITY: u32 = 4_294_967_295;

/// Pick the smallest TEXT/BLOB bucket that holds `size` (0 means the
/// regular bucket).
fn size_bucket(
    size: u32,
    tiny: &'static str,
    regular: &'static str,
    medium: &'static str,
    long: &'static str,
) -> String {
    if size == 0 || (TINY_CAPACITY < size && size <= REGULAR_CAPACITY) {
        regular.to_string()
    } else if size <= TINY_CAPACITY {
        tiny.to_string()
    } else if size <= MEDIUM_CAPACITY {
        medium.to_string()
    } else {
        long.to_string()
    }
}

/// SQL text generation rules for MySQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    fn column_type(&self, column: &Column) -> Result<String> {
        Ok(match column.kind {
            ColumnKind::Blob => size_bucket(column.size, "tinyblob", "blob", "mediumblob", "longblob"),
            ColumnKind::Text => size_bucket(column.size, "tinytext", "text", "mediumtext", "longtext"),
            ColumnKind::VarChar => format!("varchar({})", column.size),
            ColumnKind::FixedChar => format!("char({})", column.size),
            ColumnKind::Json => "json".to_string(),
            ColumnKind::Bool => "tinyint(1)".to_string(),
            ColumnKind::SignedInt | ColumnKind::UnsignedInt => {
                let base = match column.size {
                    1 => "tinyint",
                    2 => "smallint",
                    3 => "mediumint",
                    4 => "int",
                    8 => "bigint",
                    other => {
                        return Err(SyncError::ColumnDefinition(format!(
                            "Don't know how to create integer column {} of size {}",
                            column.name, other
                        )))
                    }
                };
                if column.kind == ColumnKind::UnsignedInt {
                    format!("{base} unsigned")
                } else {
                    base.to_string()
                }
            }
            ColumnKind::Real => {
                if column.size == 4 {
                    "float".to_string()
                } else {
                    "double".to_string()
                }
            }
            ColumnKind::Decimal => {
                if column.size > 0 {
                    format!("decimal({},{})", column.size, column.scale)
                } else {
                    "decimal".to_string()
                }
            }
            ColumnKind::Date => "date".to_string(),
            ColumnKind::Time => "time".to_string(),
            ColumnKind::DateTime => {
                if column.flags.contains(ColumnFlags::MYSQL_TIMESTAMP) {
                    "timestamp".to_string()
                } else {
                    "datetime".to_string()
                }
            }
            ColumnKind::Spatial => {
                if column.type_restriction.is_empty() {
                    "geometry".to_string()
                } else {
                    column.type_restriction.clone()
                }
            }
            ColumnKind::Enum => {
                let values: Vec<String> = column
                    .enumeration_values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect();
                format!("enum({})", values.join(","))
            }
            ColumnKind::Uuid | ColumnKind::Unknown => {
                return Err(SyncError::ColumnDefinition(format!(
                    "Don't know how to express column type of {} ({})",
                    column.name,
                    column.kind.as_str()
                )))
            }
        })
    }

    fn column_default(&self, column: &Column) -> Result<String> {
        let mut result = String::new();
        match column.default_kind {
            DefaultKind::NoDefault => {}
            DefaultKind::Sequence => result.push_str(" AUTO_INCREMENT"),
            DefaultKind::Literal => {
                result.push_str(" DEFAULT ");
                match column.kind {
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
                }
            }
            DefaultKind::Expression => {
                result.push_str(" DEFAULT ");
                result.push_str(&column.default_value);
            }
        }
        if column
            .flags
            .contains(ColumnFlags::MYSQL_ON_UPDATE_TIMESTAMP)
        {
            result.push_str(" ON UPDATE CURRENT_TIMESTAMP");
        }
        Ok(result)
    }
}

impl SqlDialect for MysqlDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn escape_string(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '\'' => out.push_str("''"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\u{1a}' => out.push_str("\\Z"),
                other => out.push(other),
            }
        }
        out
    }

    fn append_quoted_string(&self, out: &mut String, value: &[u8]) {
        let text = String::from_utf8_lossy(value);
        out.push('\'');
        out.push_str(&self.escape_string(&text));
        out.push('\'');
    }

    fn append_quoted_bytes(&self, out: &mut String, value: &[u8]) {
        out.push_str("x'");
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

    fn column_definition(&self, _table: &Table, column: &Column) -> Result<String> {
        let mut result = self.quote_identifier(&column.name);
        result.push(' ');
        result.push_str(&self.column_type(column)?);
        if !column.nullable {
            result.push_str(" NOT NULL");
        }
        result.push_str(&self.column_default(column)?);
        Ok(result)
    }
}

/// Parse the value list out of a `enum('a','b')` column type.
fn parse_enumeration_values(column_type: &str) -> Vec<String> {
    let Some(inner) = column_type
        .strip_prefix("enum(")
        .and_then(|rest| rest.strip_suffix(')'))
    else {
        return Vec::new();
    };
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_quotes => in_quotes = true,
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                current.push('\'');
            }
            '\'' => {
                in_quotes = false;
                values.push(std::mem::take(&mut current));
            }
            _ if in_quotes => current.push(c),
            _ => {} // separators between quoted values
        }
    }
    values
}

/// Canonicalize an `information_schema` column default.
fn parse_column_default(default: Option<&str>, extra: &str) -> (DefaultKind, String) {
    let extra = extra.to_lowercase();
    if extra.contains("auto_increment") {
        return (DefaultKind::Sequence, String::new());
    }
    let Some(raw) = default else {
        return (DefaultKind::NoDefault, String::new());
    };
    if raw.eq_ignore_ascii_case("null") {
        // MariaDB renders the absence of a default as the string NULL
        return (DefaultKind::NoDefault, String::new());
    }
    let lower = raw.to_lowercase();
    if lower == "current_timestamp" || lower.starts_with("current_timestamp(") {
        return (DefaultKind::Expression, "CURRENT_TIMESTAMP".to_string());
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        // MariaDB quotes string defaults; MySQL 8 does not
        return (
            DefaultKind::Literal,
            raw[1..raw.len() - 1].replace("''", "'"),
        );
    }
    (DefaultKind::Literal, raw.to_string())
}

/// Classify one introspected column from its `information_schema` row.
#[allow(clippy::too_many_arguments)]
fn column_from_introspection(
    name: String,
    column_type: &str,
    data_type: &str,
    nullable: bool,
    default: Option<&str>,
    extra: &str,
    character_maximum_length: u32,
    numeric_precision: u32,
    numeric_scale: u32,
) -> Column {
    let (default_kind, default_value) = parse_column_default(default, extra);
    let unsigned = column_type.contains(" unsigned");
    let mut column = Column {
        name,
        nullable,
        default_kind,
        default_value,
        ..Default::default()
    };

    let int_kind = if unsigned {
        ColumnKind::UnsignedInt
    } else {
        ColumnKind::SignedInt
    };

    match data_type {
        "tinyint" => {
            column.kind = int_kind;
            column.size = 1;
        }
        "smallint" => {
            column.kind = int_kind;
            column.size = 2;
        }
        "mediumint" => {
            column.kind = int_kind;
            column.size = 3;
        }
        "int" | "integer" => {
            column.kind = int_kind;
            column.size = 4;
        }
        "bigint" => {
            column.kind = int_kind;
            column.size = 8;
        }
        "float" => {
            column.kind = ColumnKind::Real;
            column.size = 4;
        }
        "double" | "real" => {
            column.kind = ColumnKind::Real;
            column.size = 8;
        }
        "decimal" | "numeric" => {
            column.kind = ColumnKind::Decimal;
            column.size = numeric_precision;
            column.scale = numeric_scale;
        }
        "char" => {
            column.kind = ColumnKind::FixedChar;
            column.size = character_maximum_length;
        }
        "varchar" => {
            column.kind = ColumnKind::VarChar;
            column.size = character_maximum_length;
        }
        "tinytext" | "text" | "mediumtext" | "longtext" => {
            column.kind = ColumnKind::Text;
            column.size = character_maximum_length;
        }
        "tinyblob" | "blob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
            column.kind = ColumnKind::Blob;
            column.size = character_maximum_length;
        }
        "json" => column.kind = ColumnKind::Json,
        "date" => column.kind = ColumnKind::Date,
        "time" => column.kind = ColumnKind::Time,
        "datetime" => column.kind = ColumnKind::DateTime,
        "timestamp" => {
            column.kind = ColumnKind::DateTime;
            column.flags |= ColumnFlags::MYSQL_TIMESTAMP;
            if extra.to_lowercase().contains("on update current_timestamp") {
                column.flags |= ColumnFlags::MYSQL_ON_UPDATE_TIMESTAMP;
            }
        }
        "enum" => {
            column.kind = ColumnKind::Enum;
            column.enumeration_values = parse_enumeration_values(column_type);
        }
        "geometry" | "point" | "linestring" | "polygon" | "multipoint" | "multilinestring"
        | "multipolygon" | "geometrycollection" => {
            column.kind = ColumnKind::Spatial;
            column.flags |= ColumnFlags::SIMPLE_GEOMETRY;
            if data_type != "geometry" {
                column.type_restriction = data_type.to_string();
            }
        }
        _ => {
            column.kind = ColumnKind::Unknown;
            column.db_type_def = column_type.to_string();
        }
    }
    column
}

/// Normalize a non-MySQL peer schema to what this engine can represent.
fn normalize_peer_schema(database: &mut Database) {
    let supported =
        ColumnFlags::MYSQL_TIMESTAMP | ColumnFlags::MYSQL_ON_UPDATE_TIMESTAMP | ColumnFlags::SIMPLE_GEOMETRY;
    for table in &mut database.tables {
        for column in &mut table.columns {
            if column.kind == ColumnKind::Bool {
                // booleans are tinyint(1) here
                column.kind = ColumnKind::SignedInt;
                column.size = 1;
            }
            if column.kind == ColumnKind::Uuid {
                // no native uuid type; char(36) is the conventional shape
                column.kind = ColumnKind::FixedChar;
                column.size = 36;
            }
            column.flags &= supported;
        }
        for key in &mut table.keys {
            if key.name.len() > MAX_INDEX_NAME {
                key.name.truncate(MAX_INDEX_NAME);
            }
        }
    }
}

/// Render a binary-protocol temporal value the way the text protocol would.
fn render_temporal(value: &Value) -> String {
    match value {
        Value::Date(year, month, day, 0, 0, 0, 0) => {
            format!("{year:04}-{month:02}-{day:02}")
        }
        Value::Date(year, month, day, hour, minute, second, 0) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
        ),
        Value::Date(year, month, day, hour, minute, second, micros) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        ),
        Value::Time(negative, days, hours, minutes, seconds, 0) => {
            let sign = if *negative { "-" } else { "" };
            format!(
                "{sign}{:02}:{minutes:02}:{seconds:02}",
                *hours as u32 + *days * 24
            )
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            format!(
                "{sign}{:02}:{minutes:02}:{seconds:02}.{micros:06}",
                *hours as u32 + *days * 24
            )
        }
        _ => String::new(),
    }
}

/// Translate the shared SSL mode taxonomy to mysql_async's options.
///
/// Returns None when TLS is disabled.
fn ssl_opts_for(ssl_mode: SslMode) -> Option<SslOpts> {
    match ssl_mode {
        SslMode::Disable => None,
        SslMode::Require => {
            warn!(
                "ssl_mode=require: TLS enabled but server certificate is not verified. \
                 Consider using 'verify-full' for production."
            );
            Some(
                SslOpts::default()
                    .with_danger_accept_invalid_certs(true)
                    .with_danger_skip_domain_validation(true),
            )
        }
        SslMode::VerifyCa => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
        SslMode::VerifyFull => Some(SslOpts::default()),
    }
}

/// Adapter for a MySQL endpoint.
pub struct MysqlAdapter {
    conn: Conn,
    dialect: MysqlDialect,
}

impl MysqlAdapter {
    /// Connect and prepare the session.
    pub async fn connect(params: &ConnectParams) -> Result<Self> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(params.host.clone())
            .tcp_port(params.port)
            .db_name(Some(params.database.clone()))
            .user(Some(params.username.clone()));
        if !params.password.is_empty() {
            builder = builder.pass(Some(params.password.clone()));
        }
        if let Some(ssl_opts) = ssl_opts_for(params.ssl_mode) {
            builder = builder.ssl_opts(ssl_opts);
        } else {
            warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
        }
        let conn = Conn::new(Opts::from(builder)).await?;

        let mut adapter = Self {
            conn,
            dialect: MysqlDialect,
        };
        if let Some(variables) = &params.set_variables {
            adapter.execute(&format!("SET {variables}")).await?;
        }
        info!(
            host = %params.host,
            database = %params.database,
            "connected to MySQL"
        );
        Ok(adapter)
    }

    /// Run a query and collect the text form of every cell.
    async fn text_query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let rows: Vec<Row> = self
            .conn
            .query(sql)
            .await
            .map_err(|e| SyncError::database(e, sql))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                let cell = match row.as_ref(i) {
                    None | Some(Value::NULL) => None,
                    Some(Value::Bytes(bytes)) => {
                        Some(String::from_utf8_lossy(bytes).into_owned())
                    }
                    Some(Value::Int(v)) => Some(v.to_string()),
                    Some(Value::UInt(v)) => Some(v.to_string()),
                    Some(Value::Float(v)) => Some(v.to_string()),
                    Some(Value::Double(v)) => Some(v.to_string()),
                    Some(other) => Some(render_temporal(other)),
                };
                cells.push(cell);
            }
            out.push(cells);
        }
        Ok(out)
    }

    fn conversion_for_column(column: &mysql_async::Column) -> ColumnConversion {
        match column.column_type() {
            ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG => {
                if column.flags().contains(NativeColumnFlags::UNSIGNED_FLAG) {
                    ColumnConversion::UnsignedInt
                } else {
                    ColumnConversion::SignedInt
                }
            }
            // native geometry storage is already SRID-prefixed WKB
            _ => ColumnConversion::Raw,
        }
    }

    fn pack_cell(conversion: ColumnConversion, value: &Value) -> Result<PackedValue> {
        Ok(match value {
            Value::NULL => PackedValue::Nil,
            Value::Int(v) => PackedValue::Int(*v),
            Value::UInt(v) => PackedValue::Uint(*v),
            Value::Float(v) => PackedValue::Float32(*v),
            Value::Double(v) => PackedValue::Float64(*v),
            Value::Bytes(bytes) => match conversion {
                ColumnConversion::SignedInt => PackedValue::Int(
                    std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| {
                            SyncError::wire("integer column held a non-numeric value")
                        })?,
                ),
                ColumnConversion::UnsignedInt => PackedValue::Uint(
                    std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| {
                            SyncError::wire("integer column held a non-numeric value")
                        })?,
                ),
                _ => PackedValue::Bytes(bytes.clone()),
            },
            other => PackedValue::Bytes(render_temporal(other).into_bytes()),
        })
    }

    async fn populate_table_columns(&mut self, table: &mut Table) -> Result<()> {
        let rows = self
            .text_query(&format!(
                "SELECT column_name, column_type, data_type, is_nullable, column_default, extra, \
                        COALESCE(character_maximum_length, 0), \
                        COALESCE(numeric_precision, 0), \
                        COALESCE(numeric_scale, 0) \
                   FROM information_schema.columns \
                  WHERE table_schema = DATABASE() AND table_name = '{}' \
                  ORDER BY ordinal_position",
                self.dialect.escape_string(&table.name)
            ))
            .await?;

        for row in rows {
            let uint_at = |i: usize| -> u32 {
                row[i]
                    .as_deref()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0)
            };
            table.columns.push(column_from_introspection(
                row[0].clone().unwrap_or_default(),
                row[1].as_deref().unwrap_or_default(),
                row[2].as_deref().unwrap_or_default(),
                row[3].as_deref() == Some("YES"),
                row[4].as_deref(),
                row[5].as_deref().unwrap_or_default(),
                uint_at(6),
                uint_at(7),
                uint_at(8),
            ));
        }
        Ok(())
    }

    async fn populate_table_primary_key(&mut self, table: &mut Table) -> Result<()> {
        let rows = self
            .text_query(&format!(
                "SELECT column_name \
                   FROM information_schema.key_column_usage \
                  WHERE table_schema = DATABASE() AND \
                        table_name = '{}' AND \
                        constraint_name = 'PRIMARY' \
                  ORDER BY ordinal_position",
                self.dialect.escape_string(&table.name)
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
                "SELECT index_name, non_unique, index_type, column_name \
                   FROM information_schema.statistics \
                  WHERE table_schema = DATABASE() AND \
                        table_name = '{}' AND \
                        index_name <> 'PRIMARY' \
                  ORDER BY index_name, seq_in_index",
                self.dialect.escape_string(&table.name)
            ))
            .await?;

        for row in rows {
            let key_name = row[0].clone().unwrap_or_default();
            let non_unique = row[1].as_deref() != Some("0");
            let index_type = row[2].clone().unwrap_or_default();
            let column_name = row[3].clone().unwrap_or_default();
            let index = table.index_of_column(&column_name).ok_or_else(|| {
                SyncError::wire(format!(
                    "key column {column_name} not found on table {}",
                    table.name
                ))
            })?;
            if table.keys.last().map(|k| k.name.as_str()) != Some(key_name.as_str()) {
                let kind = if index_type == "SPATIAL" {
                    KeyKind::Spatial
                } else if non_unique {
                    KeyKind::Standard
                } else {
                    KeyKind::Unique
                };
                table.keys.push(Key {
                    name: key_name,
                    kind,
                    columns: Vec::new(),
                });
            }
            if let Some(key) = table.keys.last_mut() {
                key.columns.push(index);
            }
        }

        table.keys.sort_by(Key::by_kind_then_name);
        Ok(())
    }
}

#[async_trait]
impl SchemaIntrospection for MysqlAdapter {
    async fn database_schema(&mut self) -> Result<Database> {
        // largest tables first, mirroring the source endpoint's ordering
        let table_rows = self
            .text_query(
                "SELECT table_name \
                   FROM information_schema.tables \
                  WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                  ORDER BY data_length DESC, table_name ASC",
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
        ColumnFlags::MYSQL_TIMESTAMP
            | ColumnFlags::MYSQL_ON_UPDATE_TIMESTAMP
            | ColumnFlags::SIMPLE_GEOMETRY
    }
}

#[async_trait]
impl TransactionControl for MysqlAdapter {
    async fn start_read_transaction(&mut self) -> Result<()> {
        self.execute("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .await?;
        self.execute("START TRANSACTION WITH CONSISTENT SNAPSHOT")
            .await?;
        Ok(())
    }

    async fn start_write_transaction(&mut self) -> Result<()> {
        self.execute("SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .await?;
        self.execute("BEGIN").await?;
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
impl SnapshotControl for MysqlAdapter {
    async fn export_snapshot(&mut self) -> Result<String> {
        // consistency comes from holding the global read lock until the peer
        // has imported; there is no token to transfer
        self.execute("FLUSH TABLES WITH READ LOCK").await?;
        self.execute("START TRANSACTION WITH CONSISTENT SNAPSHOT")
            .await?;
        Ok(String::new())
    }

    async fn import_snapshot(&mut self, _token: &str) -> Result<()> {
        self.start_read_transaction().await
    }

    async fn unhold_snapshot(&mut self) -> Result<()> {
        self.execute("UNLOCK TABLES").await?;
        Ok(())
    }
}

#[async_trait]
impl ReferentialIntegrityControl for MysqlAdapter {
    async fn disable_referential_integrity(&mut self) -> Result<()> {
        self.execute("SET SESSION foreign_key_checks = 0").await?;
        self.execute("SET SESSION unique_checks = 0").await?;
        self.execute("SET SESSION sql_mode = 'NO_AUTO_VALUE_ON_ZERO'")
            .await?;
        Ok(())
    }

    async fn enable_referential_integrity(&mut self) -> Result<()> {
        self.execute("SET SESSION sql_mode = DEFAULT").await?;
        self.execute("SET SESSION unique_checks = 1").await?;
        self.execute("SET SESSION foreign_key_checks = 1").await?;
        Ok(())
    }
}

#[async_trait]
impl QueryExecution for MysqlAdapter {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| SyncError::database(e, sql))?;
        Ok(self.conn.affected_rows())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<PackedRow>> {
        let rows: Vec<Row> = self
            .conn
            .query(sql)
            .await
            .map_err(|e| SyncError::database(e, sql))?;

        let mut conversions: Option<Vec<ColumnConversion>> = None;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let conversions = conversions.get_or_insert_with(|| {
                row.columns_ref()
                    .iter()
                    .map(Self::conversion_for_column)
                    .collect()
            });
            let mut cells = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                let conversion = conversions.get(i).copied().unwrap_or(ColumnConversion::Raw);
                let cell = match row.as_ref(i) {
                    None => PackedValue::Nil,
                    Some(value) => Self::pack_cell(conversion, value)?,
                };
                cells.push(cell);
            }
            out.push(cells);
        }
        Ok(out)
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

impl SqlDialect for MysqlAdapter {
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
        let dialect = MysqlDialect;
        assert_eq!(dialect.quote_identifier("users"), "`users`");
        assert_eq!(dialect.quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_escape_string() {
        let dialect = MysqlDialect;
        assert_eq!(dialect.escape_string("O'Brien"), "O''Brien");
        assert_eq!(dialect.escape_string("a\\b"), "a\\\\b");
        assert_eq!(dialect.escape_string("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_quoted_bytes() {
        let dialect = MysqlDialect;
        let mut out = String::new();
        dialect.append_quoted_bytes(&mut out, &[0xde, 0xad]);
        assert_eq!(out, "x'dead'");
    }

    #[test]
    fn test_quoted_spatial() {
        let dialect = MysqlDialect;
        let mut value = 4326u32.to_le_bytes().to_vec();
        value.extend_from_slice(&[0x01, 0x02]);
        let mut out = String::new();
        dialect.append_quoted_spatial(&mut out, &value).unwrap();
        assert_eq!(out, "ST_GeomFromWKB(x'0102', 4326)");
    }

    #[test]
    fn test_column_types() {
        let dialect = MysqlDialect;

        let mut c = column(ColumnKind::UnsignedInt);
        c.size = 3;
        assert_eq!(dialect.column_type(&c).unwrap(), "mediumint unsigned");

        let mut c = column(ColumnKind::Text);
        c.size = MEDIUM_CAPACITY;
        assert_eq!(dialect.column_type(&c).unwrap(), "mediumtext");
        c.size = 0;
        assert_eq!(dialect.column_type(&c).unwrap(), "text");

        let mut c = column(ColumnKind::Blob);
        c.size = LONG_CAPACITY;
        assert_eq!(dialect.column_type(&c).unwrap(), "longblob");

        let mut c = column(ColumnKind::Enum);
        c.enumeration_values = vec!["new".into(), "o'k".into()];
        assert_eq!(dialect.column_type(&c).unwrap(), "enum('new','o''k')");

        let mut c = column(ColumnKind::DateTime);
        c.flags |= ColumnFlags::MYSQL_TIMESTAMP;
        assert_eq!(dialect.column_type(&c).unwrap(), "timestamp");

        let mut c = column(ColumnKind::Spatial);
        c.type_restriction = "point".into();
        assert_eq!(dialect.column_type(&c).unwrap(), "point");

        assert!(dialect.column_type(&column(ColumnKind::Uuid)).is_err());
    }

    #[test]
    fn test_column_definition_auto_increment() {
        let dialect = MysqlDialect;
        let table = Table::new("widgets");
        let mut c = column(ColumnKind::SignedInt);
        c.name = "id".into();
        c.size = 8;
        c.nullable = false;
        c.default_kind = DefaultKind::Sequence;
        assert_eq!(
            dialect.column_definition(&table, &c).unwrap(),
            "`id` bigint NOT NULL AUTO_INCREMENT"
        );
    }

    #[test]
    fn test_column_definition_on_update_timestamp() {
        let dialect = MysqlDialect;
        let table = Table::new("t");
        let mut c = column(ColumnKind::DateTime);
        c.name = "updated_at".into();
        c.flags |= ColumnFlags::MYSQL_TIMESTAMP | ColumnFlags::MYSQL_ON_UPDATE_TIMESTAMP;
        c.default_kind = DefaultKind::Expression;
        c.default_value = "CURRENT_TIMESTAMP".into();
        assert_eq!(
            dialect.column_definition(&table, &c).unwrap(),
            "`updated_at` timestamp DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_parse_enumeration_values() {
        assert_eq!(
            parse_enumeration_values("enum('a','b','c')"),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            parse_enumeration_values("enum('it''s','plain')"),
            vec!["it's", "plain"]
        );
        assert!(parse_enumeration_values("int").is_empty());
    }

    #[test]
    fn test_parse_column_default() {
        assert_eq!(
            parse_column_default(None, "auto_increment"),
            (DefaultKind::Sequence, String::new())
        );
        assert_eq!(
            parse_column_default(None, ""),
            (DefaultKind::NoDefault, String::new())
        );
        assert_eq!(
            parse_column_default(Some("NULL"), ""),
            (DefaultKind::NoDefault, String::new())
        );
        assert_eq!(
            parse_column_default(Some("CURRENT_TIMESTAMP"), ""),
            (DefaultKind::Expression, "CURRENT_TIMESTAMP".to_string())
        );
        assert_eq!(
            parse_column_default(Some("current_timestamp(6)"), ""),
            (DefaultKind::Expression, "CURRENT_TIMESTAMP".to_string())
        );
        assert_eq!(
            parse_column_default(Some("'quoted'"), ""),
            (DefaultKind::Literal, "quoted".to_string())
        );
        assert_eq!(
            parse_column_default(Some("0"), ""),
            (DefaultKind::Literal, "0".to_string())
        );
    }

    #[test]
    fn test_column_classification() {
        let c = column_from_introspection(
            "n".into(),
            "tinyint(3) unsigned",
            "tinyint",
            true,
            None,
            "",
            0,
            3,
            0,
        );
        assert_eq!((c.kind, c.size), (ColumnKind::UnsignedInt, 1));

        let c = column_from_introspection(
            "body".into(),
            "mediumtext",
            "mediumtext",
            true,
            None,
            "",
            MEDIUM_CAPACITY,
            0,
            0,
        );
        assert_eq!((c.kind, c.size), (ColumnKind::Text, MEDIUM_CAPACITY));

        let c = column_from_introspection(
            "status".into(),
            "enum('new','done')",
            "enum",
            false,
            Some("new"),
            "",
            4,
            0,
            0,
        );
        assert_eq!(c.kind, ColumnKind::Enum);
        assert_eq!(c.enumeration_values, vec!["new", "done"]);
        assert_eq!(c.default_kind, DefaultKind::Literal);
        assert_eq!(c.default_value, "new");

        let c = column_from_introspection(
            "stamp".into(),
            "timestamp",
            "timestamp",
            false,
            Some("CURRENT_TIMESTAMP"),
            "DEFAULT_GENERATED on update CURRENT_TIMESTAMP",
            0,
            0,
            0,
        );
        assert_eq!(c.kind, ColumnKind::DateTime);
        assert!(c.flags.contains(ColumnFlags::MYSQL_TIMESTAMP));
        assert!(c.flags.contains(ColumnFlags::MYSQL_ON_UPDATE_TIMESTAMP));
        assert_eq!(c.default_kind, DefaultKind::Expression);

        let c = column_from_introspection(
            "loc".into(),
            "point",
            "point",
            true,
            None,
            "",
            0,
            0,
            0,
        );
        assert_eq!(c.kind, ColumnKind::Spatial);
        assert_eq!(c.type_restriction, "point");
        assert!(c.flags.contains(ColumnFlags::SIMPLE_GEOMETRY));

        let c = column_from_introspection(
            "b".into(),
            "bit(8)",
            "bit",
            true,
            None,
            "",
            0,
            8,
            0,
        );
        assert_eq!(c.kind, ColumnKind::Unknown);
        assert_eq!(c.db_type_def, "bit(8)");
    }

    #[test]
    fn test_normalize_peer_schema() {
        let mut table = Table::new("t");
        table.columns.push(Column {
            name: "flag".into(),
            kind: ColumnKind::Bool,
            ..Default::default()
        });
        table.columns.push(Column {
            name: "uuid".into(),
            kind: ColumnKind::Uuid,
            ..Default::default()
        });
        table.columns.push(Column {
            name: "at".into(),
            kind: ColumnKind::DateTime,
            flags: ColumnFlags::TIME_ZONE,
            ..Default::default()
        });
        let mut database = Database {
            tables: vec![table],
        };
        normalize_peer_schema(&mut database);

        let table = &database.tables[0];
        assert_eq!(
            (table.columns[0].kind, table.columns[0].size),
            (ColumnKind::SignedInt, 1)
        );
        assert_eq!(
            (table.columns[1].kind, table.columns[1].size),
            (ColumnKind::FixedChar, 36)
        );
        assert_eq!(table.columns[2].flags, ColumnFlags::empty());
    }

    #[test]
    fn test_pack_cell() {
        assert_eq!(
            MysqlAdapter::pack_cell(ColumnConversion::SignedInt, &Value::Bytes(b"-5".to_vec()))
                .unwrap(),
            PackedValue::Int(-5)
        );
        assert_eq!(
            MysqlAdapter::pack_cell(
                ColumnConversion::UnsignedInt,
                &Value::Bytes(b"18446744073709551615".to_vec())
            )
            .unwrap(),
            PackedValue::Uint(u64::MAX)
        );
        assert_eq!(
            MysqlAdapter::pack_cell(ColumnConversion::Raw, &Value::Bytes(b"text".to_vec()))
                .unwrap(),
            PackedValue::Bytes(b"text".to_vec())
        );
        assert_eq!(
            MysqlAdapter::pack_cell(ColumnConversion::Raw, &Value::NULL).unwrap(),
            PackedValue::Nil
        );
        assert!(MysqlAdapter::pack_cell(
            ColumnConversion::SignedInt,
            &Value::Bytes(b"abc".to_vec())
        )
        .is_err());
    }

    #[test]
    fn test_ssl_opts_for_modes() {
        assert!(ssl_opts_for(SslMode::Disable).is_none());
        assert!(ssl_opts_for(SslMode::Require).is_some());
        assert!(ssl_opts_for(SslMode::VerifyCa).is_some());
        assert!(ssl_opts_for(SslMode::VerifyFull).is_some());
    }

    #[test]
    fn test_render_temporal() {
        assert_eq!(render_temporal(&Value::Date(2024, 3, 9, 0, 0, 0, 0)), "2024-03-09");
        assert_eq!(
            render_temporal(&Value::Date(2024, 3, 9, 12, 30, 1, 0)),
            "2024-03-09 12:30:01"
        );
        assert_eq!(
            render_temporal(&Value::Time(false, 0, 26, 3, 4, 0)),
            "26:03:04"
        );
        assert_eq!(
            render_temporal(&Value::Time(true, 1, 2, 3, 4, 500000)),
            "-26:03:04.500000"
        );
    }
}
