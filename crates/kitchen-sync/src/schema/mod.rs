//! Engine-agnostic schema model.
//!
//! These types describe tables, columns, and keys in a form every adapter can
//! produce and consume. A [`Database`] is built once by introspection at
//! session start and is immutable afterwards (apart from the destination's
//! normalization pass over the *peer's* schema).

mod matcher;
pub mod wire;

pub use matcher::check_schema_match;

use std::cmp::Ordering;

use bitflags::bitflags;

/// Position of a column within its owning table's `columns` vector.
pub type ColumnIndex = usize;

/// Closed taxonomy of canonical value shapes.
///
/// Serialized by name, never by ordinal, so variants can be added or
/// reordered without breaking old peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnKind {
    Blob,
    Text,
    VarChar,
    FixedChar,
    Json,
    Uuid,
    Bool,
    SignedInt,
    UnsignedInt,
    Real,
    Decimal,
    Date,
    Time,
    DateTime,
    Spatial,
    Enum,
    #[default]
    Unknown,
}

impl ColumnKind {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Blob => "BLOB",
            ColumnKind::Text => "TEXT",
            ColumnKind::VarChar => "VARCHAR",
            ColumnKind::FixedChar => "CHAR",
            ColumnKind::Json => "JSON",
            ColumnKind::Uuid => "UUID",
            ColumnKind::Bool => "BOOL",
            ColumnKind::SignedInt => "INT",
            ColumnKind::UnsignedInt => "INT UNSIGNED",
            ColumnKind::Real => "REAL",
            ColumnKind::Decimal => "DECIMAL",
            ColumnKind::Date => "DATE",
            ColumnKind::Time => "TIME",
            ColumnKind::DateTime => "DATETIME",
            ColumnKind::Spatial => "SPATIAL",
            ColumnKind::Enum => "ENUM",
            ColumnKind::Unknown => "UNKNOWN",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "BLOB" => ColumnKind::Blob,
            "TEXT" => ColumnKind::Text,
            "VARCHAR" => ColumnKind::VarChar,
            "CHAR" => ColumnKind::FixedChar,
            "JSON" => ColumnKind::Json,
            "UUID" => ColumnKind::Uuid,
            "BOOL" => ColumnKind::Bool,
            "INT" => ColumnKind::SignedInt,
            "INT UNSIGNED" => ColumnKind::UnsignedInt,
            "REAL" => ColumnKind::Real,
            "DECIMAL" => ColumnKind::Decimal,
            "DATE" => ColumnKind::Date,
            "TIME" => ColumnKind::Time,
            "DATETIME" => ColumnKind::DateTime,
            "SPATIAL" => ColumnKind::Spatial,
            "ENUM" => ColumnKind::Enum,
            "UNKNOWN" => ColumnKind::Unknown,
            _ => return None,
        })
    }
}

/// What a column's default means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DefaultKind {
    /// No default at all.
    #[default]
    NoDefault,
    /// Next value from a per-column identity/serial sequence.
    Sequence,
    /// An already-unescaped literal value.
    Literal,
    /// A portable SQL expression such as `CURRENT_TIMESTAMP` or `NULL`.
    Expression,
}

impl DefaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefaultKind::NoDefault => "no_default",
            DefaultKind::Sequence => "sequence",
            DefaultKind::Literal => "default_value",
            DefaultKind::Expression => "default_expression",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "no_default" => DefaultKind::NoDefault,
            "sequence" => DefaultKind::Sequence,
            "default_value" => DefaultKind::Literal,
            "default_expression" => DefaultKind::Expression,
            _ => return None,
        })
    }
}

bitflags! {
    /// Engine-specific column behaviors the canonical model must carry.
    ///
    /// Serialized by name, not by bit value, so bits can be renumbered
    /// without changing the wire format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u32 {
        const MYSQL_TIMESTAMP = 1;
        const MYSQL_ON_UPDATE_TIMESTAMP = 2;
        const TIME_ZONE = 4;
        const SIMPLE_GEOMETRY = 8;
        const IDENTITY_GENERATED_ALWAYS = 16;
    }
}

impl ColumnFlags {
    /// The (bit, name) pairs in a stable order.
    pub const NAMES: [(ColumnFlags, &'static str); 5] = [
        (ColumnFlags::MYSQL_TIMESTAMP, "mysql_timestamp"),
        (
            ColumnFlags::MYSQL_ON_UPDATE_TIMESTAMP,
            "mysql_on_update_timestamp",
        ),
        (ColumnFlags::TIME_ZONE, "time_zone"),
        (ColumnFlags::SIMPLE_GEOMETRY, "simple_geometry"),
        (
            ColumnFlags::IDENTITY_GENERATED_ALWAYS,
            "identity_generated_always",
        ),
    ];

    /// Names of the bits set in this value.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Look up one bit by its wire name.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(flag, _)| *flag)
    }
}

/// One column of a table.
#[derive(Debug, Clone, Eq)]
pub struct Column {
    pub name: String,
    pub nullable: bool,
    pub kind: ColumnKind,
    /// Length for char/varchar, byte width for integers, precision for
    /// decimals, bucket capacity for engine-specific TEXT/BLOB sizes.
    pub size: u32,
    /// Scale for decimals.
    pub scale: u32,
    pub default_kind: DefaultKind,
    /// Meaning depends on `default_kind`.
    pub default_value: String,
    pub flags: ColumnFlags,
    /// Spatial subtype restriction such as `point`, lowercase.
    pub type_restriction: String,
    /// Spatial reference system identifier (SRID) as a string.
    pub reference_system: String,
    pub enumeration_values: Vec<String>,
    /// Raw engine type string for `Unknown` columns. Diagnostic only:
    /// serialized but never compared.
    pub db_type_def: String,
}

impl Default for Column {
    fn default() -> Self {
        Self {
            name: String::new(),
            nullable: true,
            kind: ColumnKind::Unknown,
            size: 0,
            scale: 0,
            default_kind: DefaultKind::NoDefault,
            default_value: String::new(),
            flags: ColumnFlags::empty(),
            type_restriction: String::new(),
            reference_system: String::new(),
            enumeration_values: Vec::new(),
            db_type_def: String::new(),
        }
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.nullable == other.nullable
            && self.kind == other.kind
            && self.size == other.size
            && self.scale == other.scale
            && self.default_kind == other.default_kind
            && self.default_value == other.default_value
            && self.flags == other.flags
            && self.type_restriction == other.type_restriction
            && self.reference_system == other.reference_system
            && self.enumeration_values == other.enumeration_values
        // db_type_def intentionally excluded
    }
}

/// Key categories, in their sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum KeyKind {
    Unique,
    #[default]
    Standard,
    Spatial,
}

impl KeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::Unique => "unique_key",
            KeyKind::Standard => "standard_key",
            KeyKind::Spatial => "spatial_key",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "unique_key" => KeyKind::Unique,
            "standard_key" => KeyKind::Standard,
            "spatial_key" => KeyKind::Spatial,
            _ => return None,
        })
    }
}

/// A secondary key (index) over a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Key {
    pub name: String,
    pub kind: KeyKind,
    /// Positions into the owning table's `columns`, order-significant.
    pub columns: Vec<ColumnIndex>,
}

impl Key {
    pub fn unique(&self) -> bool {
        self.kind == KeyKind::Unique
    }

    pub fn spatial(&self) -> bool {
        self.kind == KeyKind::Spatial
    }

    /// Sort order used on both ends so key walks stay in lockstep.
    pub fn by_kind_then_name(a: &Key, b: &Key) -> Ordering {
        a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name))
    }
}

/// How a table's effective key was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimaryKeyKind {
    #[default]
    NoAvailableKey,
    ExplicitPrimaryKey,
    SuitableUniqueKey,
}

impl PrimaryKeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimaryKeyKind::NoAvailableKey => "no_available_key",
            PrimaryKeyKind::ExplicitPrimaryKey => "explicit_primary_key",
            PrimaryKeyKind::SuitableUniqueKey => "suitable_unique_key",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "no_available_key" => PrimaryKeyKind::NoAvailableKey,
            "explicit_primary_key" => PrimaryKeyKind::ExplicitPrimaryKey,
            "suitable_unique_key" => PrimaryKeyKind::SuitableUniqueKey,
            _ => return None,
        })
    }
}

/// One table: ordered columns, the effective key, and secondary keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key_columns: Vec<ColumnIndex>,
    pub primary_key_kind: PrimaryKeyKind,
    pub keys: Vec<Key>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Position of the named column, if present.
    pub fn index_of_column(&self, name: &str) -> Option<ColumnIndex> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Check the structural invariants every introspected table must hold.
    pub fn validate(&self) -> Result<(), String> {
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(format!(
                    "table {} has duplicate column {}",
                    self.name, column.name
                ));
            }
        }
        let out_of_range = |index: ColumnIndex| index >= self.columns.len();
        if let Some(index) = self.primary_key_columns.iter().find(|i| out_of_range(**i)) {
            return Err(format!(
                "table {} primary key references column index {} out of range",
                self.name, index
            ));
        }
        for key in &self.keys {
            if let Some(index) = key.columns.iter().find(|i| out_of_range(**i)) {
                return Err(format!(
                    "table {} key {} references column index {} out of range",
                    self.name, key.name, index
                ));
            }
        }
        if self.primary_key_kind == PrimaryKeyKind::NoAvailableKey
            && !self.primary_key_columns.is_empty()
        {
            return Err(format!(
                "table {} has key columns but no available key kind",
                self.name
            ));
        }
        if self.primary_key_kind == PrimaryKeyKind::ExplicitPrimaryKey {
            if let Some(index) = self
                .primary_key_columns
                .iter()
                .find(|i| self.columns[**i].nullable)
            {
                return Err(format!(
                    "table {} primary key covers nullable column {}",
                    self.name, self.columns[*index].name
                ));
            }
        }
        Ok(())
    }
}

/// A whole schema: just tables, exclusively owned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Database {
    pub tables: Vec<Table>,
}
