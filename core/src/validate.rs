//! Identifier validation.
//!
//! Table and field names are spliced into generated SQL, so they are held to
//! a conservative identifier alphabet before they ever reach the engine.
//!
//! # Examples
//!
//! ```
//! use normsql_core::{TableDefinition, FieldSpec, validate_identifier, validate_table};
//!
//! assert!(validate_identifier("created_on").is_ok());
//! assert!(validate_identifier("drop;--").is_err());
//!
//! let table = TableDefinition::new("samples").with_field("1st", FieldSpec::text());
//! assert!(validate_table(&table).is_err());
//! ```

use crate::error::{CoreError, Result};
use crate::types::TableDefinition;

/// Validates that `name` is a plain SQL identifier.
///
/// Accepts ASCII alphanumerics and underscores, rejects empty names and
/// names starting with a digit.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Validates the table name and every field name of a definition.
///
/// A table must declare at least one field.
pub fn validate_table(table: &TableDefinition) -> Result<()> {
    validate_identifier(&table.name)?;
    if table.is_empty() {
        return Err(CoreError::EmptyTable(table.name.clone()));
    }
    for name in table.field_names() {
        validate_identifier(name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldSpec;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("revision").is_ok());
        assert!(validate_identifier("created_on").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("table2").is_ok());
    }

    #[test]
    fn test_invalid_identifier_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_invalid_identifier_special_chars() {
        assert!(validate_identifier("drop;--").is_err());
        assert!(validate_identifier("hello world").is_err());
        assert!(validate_identifier("dash-name").is_err());
        assert!(validate_identifier("9lives").is_err());
    }

    #[test]
    fn test_validate_table_checks_fields() {
        let good = TableDefinition::new("samples")
            .with_field("uuid", FieldSpec::text())
            .with_field("name", FieldSpec::text().indexed());
        assert!(validate_table(&good).is_ok());

        let bad = TableDefinition::new("samples").with_field("na me", FieldSpec::text());
        match validate_table(&bad) {
            Err(CoreError::InvalidIdentifier(name)) => assert_eq!(name, "na me"),
            other => panic!("expected invalid identifier, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_table_rejects_no_fields() {
        match validate_table(&TableDefinition::new("empty")) {
            Err(CoreError::EmptyTable(name)) => assert_eq!(name, "empty"),
            other => panic!("expected empty table error, got {other:?}"),
        }
    }
}
