//! Table definition types.
//!
//! A [`TableDefinition`] is an ordered list of named [`FieldSpec`]s. Field
//! order is insertion order and becomes the column order when the table is
//! created. Definitions are built once at startup, registered with a store
//! and treated as immutable afterwards.

use serde::{Deserialize, Serialize};

/// Name of the bookkeeping table recording the schema revision.
pub const REVISION_TABLE: &str = "revision";

/// Unique-identifier field. Never updatable.
pub const UUID_FIELD: &str = "uuid";

/// Autoincrement row id field. Never updatable.
pub const AUTOID_FIELD: &str = "autoid";

/// Creation timestamp field, filled with the current instant on insert when absent.
pub const CREATED_ON_FIELD: &str = "created_on";

/// Revision number field of the bookkeeping table.
pub const NUMBER_FIELD: &str = "number";

/// Returns `true` for fields that identify a row and must never be updated.
pub fn is_identity_field(name: &str) -> bool {
    name == UUID_FIELD || name == AUTOID_FIELD
}

/// Storage type of a column.
///
/// # Examples
///
/// ```
/// use normsql_core::FieldType;
///
/// assert_eq!(FieldType::Text.as_sql(), "TEXT");
/// assert_eq!(FieldType::AutoIncrement.as_sql(), "INTEGER PRIMARY KEY AUTOINCREMENT");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Text column (the default).
    #[default]
    Text,
    /// Integer column.
    Integer,
    /// Floating point column.
    Real,
    /// Raw bytes.
    Blob,
    /// Numeric affinity column.
    Numeric,
    /// Integer primary key assigned by the engine.
    AutoIncrement,
}

impl FieldType {
    /// SQL type declaration used in `CREATE TABLE`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::Blob => "BLOB",
            FieldType::Numeric => "NUMERIC",
            FieldType::AutoIncrement => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }
}

/// Column declaration: storage type, index flag and optional SQL default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FieldSpec {
    /// Storage type of the column.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether a single-column index is created for this field.
    #[serde(default)]
    pub index: bool,
    /// SQL literal used as the column default (e.g. `'pending'` or `0`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl FieldSpec {
    /// Creates an unindexed field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            index: false,
            default: None,
        }
    }

    /// Text field.
    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    /// Integer field.
    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    /// Real field.
    pub fn real() -> Self {
        Self::new(FieldType::Real)
    }

    /// Blob field.
    pub fn blob() -> Self {
        Self::new(FieldType::Blob)
    }

    /// Engine-assigned integer primary key.
    pub fn auto_increment() -> Self {
        Self::new(FieldType::AutoIncrement)
    }

    /// Marks the field as indexed.
    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    /// Sets the SQL literal used as the column default.
    pub fn with_default(mut self, sql_literal: impl Into<String>) -> Self {
        self.default = Some(sql_literal.into());
        self
    }
}

/// A named field within a [`TableDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Column declaration.
    pub spec: FieldSpec,
}

/// Definition of one table: its name and ordered fields.
///
/// # Examples
///
/// ```
/// use normsql_core::{FieldSpec, TableDefinition};
///
/// let table = TableDefinition::new("samples")
///     .with_field("uuid", FieldSpec::text().indexed())
///     .with_field("created_on", FieldSpec::text())
///     .with_field("name", FieldSpec::text());
///
/// let names: Vec<&str> = table.field_names().collect();
/// assert_eq!(names, ["uuid", "created_on", "name"]);
/// assert!(table.field("uuid").unwrap().index);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Unique table name.
    pub name: String,
    /// Fields in column order.
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl TableDefinition {
    /// Creates a table definition without fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder form of [`add_field`](Self::add_field).
    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.add_field(name, spec);
        self
    }

    /// Appends a field, or replaces the spec in place if the name already exists.
    pub fn add_field(&mut self, name: impl Into<String>, spec: FieldSpec) {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.spec = spec,
            None => self.fields.push(Field { name, spec }),
        }
    }

    /// Looks up a field spec by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.spec)
    }

    /// Returns `true` if the table declares `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Field names in column order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the table has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Definition of the bookkeeping table that records the schema revision.
pub fn revision_table() -> TableDefinition {
    TableDefinition::new(REVISION_TABLE)
        .with_field(CREATED_ON_FIELD, FieldSpec::text().indexed())
        .with_field(NUMBER_FIELD, FieldSpec::integer())
}

/// A table given either by registered name or by definition.
///
/// Every store operation that touches a table accepts `impl Into<TableRef>`
/// and resolves it through the store's registry.
#[derive(Debug, Clone, Copy)]
pub enum TableRef<'a> {
    /// Name of a registered table.
    Name(&'a str),
    /// A definition used as-is.
    Definition(&'a TableDefinition),
}

impl<'a> From<&'a str> for TableRef<'a> {
    fn from(name: &'a str) -> Self {
        TableRef::Name(name)
    }
}

impl<'a> From<&'a String> for TableRef<'a> {
    fn from(name: &'a String) -> Self {
        TableRef::Name(name.as_str())
    }
}

impl<'a> From<&'a TableDefinition> for TableRef<'a> {
    fn from(definition: &'a TableDefinition) -> Self {
        TableRef::Definition(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_is_insertion_order() {
        let table = TableDefinition::new("t")
            .with_field("b", FieldSpec::text())
            .with_field("a", FieldSpec::integer())
            .with_field("c", FieldSpec::blob());
        let names: Vec<&str> = table.field_names().collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn test_add_field_replaces_in_place() {
        let mut table = TableDefinition::new("t")
            .with_field("a", FieldSpec::text())
            .with_field("b", FieldSpec::text());
        table.add_field("a", FieldSpec::integer().indexed());

        assert_eq!(table.len(), 2);
        assert_eq!(table.fields[0].name, "a");
        assert_eq!(table.fields[0].spec.field_type, FieldType::Integer);
        assert!(table.fields[0].spec.index);
    }

    #[test]
    fn test_revision_table_shape() {
        let table = revision_table();
        assert_eq!(table.name, "revision");
        let names: Vec<&str> = table.field_names().collect();
        assert_eq!(names, ["created_on", "number"]);
        assert!(table.field("created_on").unwrap().index);
        assert!(!table.field("number").unwrap().index);
    }

    #[test]
    fn test_identity_fields() {
        assert!(is_identity_field("uuid"));
        assert!(is_identity_field("autoid"));
        assert!(!is_identity_field("created_on"));
    }

    #[test]
    fn test_table_ref_from() {
        let table = revision_table();
        assert!(matches!(TableRef::from("revision"), TableRef::Name("revision")));
        assert!(matches!(TableRef::from(&table), TableRef::Definition(_)));
    }

    #[test]
    fn test_field_spec_serde_shape() {
        let spec = FieldSpec::integer().indexed().with_default("0");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "integer");
        assert_eq!(json["index"], true);
        assert_eq!(json["default"], "0");

        let parsed: FieldSpec = serde_json::from_str(r#"{"type": "text"}"#).unwrap();
        assert_eq!(parsed, FieldSpec::text());
    }
}
