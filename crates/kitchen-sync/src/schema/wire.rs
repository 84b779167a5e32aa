//! Packed serialization of the schema model.
//!
//! From protocol version 8 the payload is a map with stable string keys;
//! unknown keys are ignored on read so newer peers can add fields. Version 7
//! peers get the older positional-array layout. Enumerations and flags are
//! encoded by name in both layouts.

use tracing::warn;

use crate::codec::PackedValue;
use crate::error::{Result, SyncError};
use crate::protocol::LAST_LEGACY_SCHEMA_FORMAT_VERSION;

use super::{
    Column, ColumnFlags, ColumnKind, Database, DefaultKind, Key, KeyKind, PrimaryKeyKind, Table,
};

fn entry(key: &str, value: PackedValue) -> (PackedValue, PackedValue) {
    (PackedValue::from_str(key), value)
}

fn string_array(values: &[String]) -> PackedValue {
    PackedValue::Array(values.iter().map(|v| PackedValue::from_str(v)).collect())
}

fn index_array(values: &[usize]) -> PackedValue {
    PackedValue::Array(values.iter().map(|v| PackedValue::Uint(*v as u64)).collect())
}

fn flags_array(flags: ColumnFlags) -> PackedValue {
    PackedValue::Array(
        flags
            .names()
            .into_iter()
            .map(PackedValue::from_str)
            .collect(),
    )
}

fn column_fields(column: &Column) -> Vec<(&'static str, PackedValue)> {
    vec![
        ("name", PackedValue::from_str(&column.name)),
        ("nullable", PackedValue::Bool(column.nullable)),
        ("column_type", PackedValue::from_str(column.kind.as_str())),
        ("size", PackedValue::Uint(column.size as u64)),
        ("scale", PackedValue::Uint(column.scale as u64)),
        (
            "default_type",
            PackedValue::from_str(column.default_kind.as_str()),
        ),
        (
            "default_value",
            PackedValue::from_str(&column.default_value),
        ),
        ("flags", flags_array(column.flags)),
        (
            "type_restriction",
            PackedValue::from_str(&column.type_restriction),
        ),
        (
            "reference_system",
            PackedValue::from_str(&column.reference_system),
        ),
        (
            "enumeration_values",
            string_array(&column.enumeration_values),
        ),
        ("db_type_def", PackedValue::from_str(&column.db_type_def)),
    ]
}

fn key_fields(key: &Key) -> Vec<(&'static str, PackedValue)> {
    vec![
        ("name", PackedValue::from_str(&key.name)),
        ("key_type", PackedValue::from_str(key.kind.as_str())),
        ("columns", index_array(&key.columns)),
    ]
}

fn table_fields(table: &Table, legacy: bool) -> Vec<(&'static str, PackedValue)> {
    let columns = PackedValue::Array(
        table
            .columns
            .iter()
            .map(|c| fields_to_packed(column_fields(c), legacy))
            .collect(),
    );
    let keys = PackedValue::Array(
        table
            .keys
            .iter()
            .map(|k| fields_to_packed(key_fields(k), legacy))
            .collect(),
    );
    vec![
        ("name", PackedValue::from_str(&table.name)),
        ("columns", columns),
        (
            "primary_key_columns",
            index_array(&table.primary_key_columns),
        ),
        (
            "primary_key_type",
            PackedValue::from_str(table.primary_key_kind.as_str()),
        ),
        ("keys", keys),
    ]
}

fn fields_to_packed(fields: Vec<(&'static str, PackedValue)>, legacy: bool) -> PackedValue {
    if legacy {
        PackedValue::Array(fields.into_iter().map(|(_, v)| v).collect())
    } else {
        PackedValue::Map(fields.into_iter().map(|(k, v)| entry(k, v)).collect())
    }
}

/// Serialize a schema for the negotiated protocol version.
pub fn database_to_packed(database: &Database, version: u32) -> PackedValue {
    let legacy = version <= LAST_LEGACY_SCHEMA_FORMAT_VERSION;
    let tables = PackedValue::Array(
        database
            .tables
            .iter()
            .map(|t| fields_to_packed(table_fields(t, legacy), legacy))
            .collect(),
    );
    if legacy {
        tables
    } else {
        PackedValue::Map(vec![entry("tables", tables)])
    }
}

/// Reader over either layout: map fields by key, legacy fields by position.
enum Fields<'a> {
    Map(&'a [(PackedValue, PackedValue)]),
    Positional(&'a [PackedValue]),
}

impl<'a> Fields<'a> {
    fn of(value: &'a PackedValue, what: &str) -> Result<Self> {
        match value {
            PackedValue::Map(entries) => Ok(Fields::Map(entries)),
            PackedValue::Array(items) => Ok(Fields::Positional(items)),
            _ => Err(SyncError::wire(format!("{what} is not a map or array"))),
        }
    }

    fn get(&self, name: &str, position: usize) -> Option<&'a PackedValue> {
        match self {
            Fields::Map(entries) => entries
                .iter()
                .find(|(key, _)| key.as_str() == Some(name))
                .map(|(_, value)| value),
            Fields::Positional(items) => items.get(position),
        }
    }

    fn string(&self, name: &str, position: usize) -> String {
        self.get(name, position)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn boolean(&self, name: &str, position: usize, default: bool) -> bool {
        self.get(name, position)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    fn uint(&self, name: &str, position: usize) -> u64 {
        self.get(name, position).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    fn array(&self, name: &str, position: usize) -> &'a [PackedValue] {
        self.get(name, position)
            .and_then(|v| v.as_array())
            .unwrap_or(&[])
    }
}

fn flags_from_packed(values: &[PackedValue]) -> ColumnFlags {
    let mut flags = ColumnFlags::empty();
    for value in values {
        match value.as_str().and_then(ColumnFlags::from_wire_name) {
            Some(flag) => flags |= flag,
            None => warn!(flag = ?value, "ignoring unknown column flag"),
        }
    }
    flags
}

fn column_from_packed(value: &PackedValue) -> Result<Column> {
    let fields = Fields::of(value, "column")?;
    let kind_name = fields.string("column_type", 2);
    let kind = ColumnKind::from_name(&kind_name).unwrap_or_else(|| {
        warn!(kind = %kind_name, "unknown column type name");
        ColumnKind::Unknown
    });
    let default_name = fields.string("default_type", 5);
    let default_kind = DefaultKind::from_name(&default_name).unwrap_or_else(|| {
        warn!(default = %default_name, "unknown default type name");
        DefaultKind::NoDefault
    });
    Ok(Column {
        name: fields.string("name", 0),
        nullable: fields.boolean("nullable", 1, true),
        kind,
        size: fields.uint("size", 3) as u32,
        scale: fields.uint("scale", 4) as u32,
        default_kind,
        default_value: fields.string("default_value", 6),
        flags: flags_from_packed(fields.array("flags", 7)),
        type_restriction: fields.string("type_restriction", 8),
        reference_system: fields.string("reference_system", 9),
        enumeration_values: fields
            .array("enumeration_values", 10)
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        db_type_def: fields.string("db_type_def", 11),
    })
}

fn key_from_packed(value: &PackedValue) -> Result<Key> {
    let fields = Fields::of(value, "key")?;
    let kind_name = fields.string("key_type", 1);
    let kind = KeyKind::from_name(&kind_name).unwrap_or_else(|| {
        warn!(kind = %kind_name, "unknown key type name");
        KeyKind::Standard
    });
    Ok(Key {
        name: fields.string("name", 0),
        kind,
        columns: fields
            .array("columns", 2)
            .iter()
            .filter_map(|v| v.as_u64().map(|n| n as usize))
            .collect(),
    })
}

fn table_from_packed(value: &PackedValue) -> Result<Table> {
    let fields = Fields::of(value, "table")?;
    let kind_name = fields.string("primary_key_type", 3);
    let primary_key_kind = PrimaryKeyKind::from_name(&kind_name).unwrap_or_else(|| {
        warn!(kind = %kind_name, "unknown primary key type name");
        PrimaryKeyKind::NoAvailableKey
    });
    Ok(Table {
        name: fields.string("name", 0),
        columns: fields
            .array("columns", 1)
            .iter()
            .map(column_from_packed)
            .collect::<Result<_>>()?,
        primary_key_columns: fields
            .array("primary_key_columns", 2)
            .iter()
            .filter_map(|v| v.as_u64().map(|n| n as usize))
            .collect(),
        primary_key_kind,
        keys: fields
            .array("keys", 4)
            .iter()
            .map(key_from_packed)
            .collect::<Result<_>>()?,
    })
}

/// Deserialize a schema sent at the given protocol version.
pub fn database_from_packed(value: &PackedValue, version: u32) -> Result<Database> {
    let tables = if version <= LAST_LEGACY_SCHEMA_FORMAT_VERSION {
        value
            .as_array()
            .ok_or_else(|| SyncError::wire("legacy schema payload is not an array"))?
    } else {
        let entries = value
            .as_map()
            .ok_or_else(|| SyncError::wire("schema payload is not a map"))?;
        entries
            .iter()
            .find(|(key, _)| key.as_str() == Some("tables"))
            .and_then(|(_, value)| value.as_array())
            .ok_or_else(|| SyncError::wire("schema payload has no tables"))?
    };
    Ok(Database {
        tables: tables
            .iter()
            .map(table_from_packed)
            .collect::<Result<_>>()?,
    })
}
