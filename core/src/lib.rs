//! Engine-independent building blocks for normalized stores.
//!
//! This crate defines the types shared by storage backends:
//!
//! - [`TableDefinition`] / [`FieldSpec`]: ordered table declarations.
//! - [`TableRef`]: a table given by registered name or by definition.
//! - [`Row`] / [`Value`]: ordered records passed to and returned from stores.
//! - [`StoreConfig`]: where the store lives and where snapshots go.
//!
//! Identifier validation ([`validate_identifier`], [`validate_table`]) keeps
//! names safe to splice into generated SQL.
//!
//! # Example
//!
//! ```
//! use normsql_core::*;
//!
//! let samples = TableDefinition::new("samples")
//!     .with_field(UUID_FIELD, FieldSpec::text().indexed())
//!     .with_field(CREATED_ON_FIELD, FieldSpec::text())
//!     .with_field("name", FieldSpec::text());
//! assert!(validate_table(&samples).is_ok());
//!
//! let row = Row::new().with("uuid", "a1").with("name", "first");
//! assert_eq!(row.get("name"), Some(&Value::from("first")));
//! ```

mod config;
mod error;
mod types;
mod validate;
mod value;

pub use config::StoreConfig;
pub use error::{CoreError, Result};
pub use types::*;
pub use validate::{validate_identifier, validate_table};
pub use value::{Row, Value};
