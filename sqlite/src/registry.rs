//! Schema registry and table DDL generation.
//!
//! The registry maps table names to [`TableDefinition`]s. Every CRUD call
//! resolves its table through it before any SQL is built, so only validated
//! identifiers ever reach generated statements.
//!
//! # Generated statements
//!
//! For a table `samples(uuid TEXT indexed, name TEXT)`:
//!
//! ```text
//! DROP TABLE IF EXISTS samples
//! CREATE TABLE samples(uuid TEXT, name TEXT)
//! CREATE INDEX samples_uuid ON samples(uuid)
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;

use normsql_core::{TableDefinition, TableRef, validate_table};

use crate::error::{Result, StoreError};

/// In-memory mapping from table name to definition.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableDefinition>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `definition` under its name, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Core`] if the table or a field name is not a
    /// plain identifier.
    pub fn register(&mut self, definition: TableDefinition) -> Result<()> {
        validate_table(&definition)?;
        self.tables.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Resolves a table reference.
    ///
    /// Definitions pass through untouched; names are looked up.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] for an unregistered name.
    pub fn resolve<'a>(&self, table: TableRef<'a>) -> Result<Cow<'a, TableDefinition>> {
        match table {
            TableRef::Definition(definition) => Ok(Cow::Borrowed(definition)),
            TableRef::Name(name) => self
                .tables
                .get(name)
                .cloned()
                .map(Cow::Owned)
                .ok_or_else(|| StoreError::TableNotFound(name.to_string())),
        }
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Registered definitions in name order.
    pub fn definitions(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }

    /// Registered table names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// Column list of a `CREATE TABLE` statement.
fn column_sql(table: &TableDefinition) -> String {
    table
        .fields
        .iter()
        .map(|field| match &field.spec.default {
            Some(default) => format!(
                "{} {} DEFAULT {}",
                field.name,
                field.spec.field_type.as_sql(),
                default
            ),
            None => format!("{} {}", field.name, field.spec.field_type.as_sql()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE INDEX` statements for the indexed fields of a table.
fn index_sql(table: &TableDefinition, if_not_exists: bool) -> Vec<String> {
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    table
        .fields
        .iter()
        .filter(|field| field.spec.index)
        .map(|field| {
            format!(
                "CREATE INDEX {guard}{table}_{field} ON {table}({field})",
                table = table.name,
                field = field.name
            )
        })
        .collect()
}

/// Statements that wipe and re-create a table with its indices.
pub fn create_table_sql(table: &TableDefinition) -> Vec<String> {
    let mut statements = vec![
        format!("DROP TABLE IF EXISTS {}", table.name),
        format!("CREATE TABLE {}({})", table.name, column_sql(table)),
    ];
    statements.extend(index_sql(table, false));
    statements
}

/// Statements that create a table and its indices only where missing.
///
/// Used by revision steps, which must be safe to re-run after a partial
/// application.
pub fn create_table_if_missing_sql(table: &TableDefinition) -> Vec<String> {
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {}({})",
        table.name,
        column_sql(table)
    )];
    statements.extend(index_sql(table, true));
    statements
}
