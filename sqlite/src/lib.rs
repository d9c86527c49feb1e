//! SQLite storage backend for normalized stores.
//!
//! A store is a single SQLite file wrapped by a [`Database`]. The crate
//! handles the connection lifecycle, revision-tracked schema migration,
//! row-level CRUD against registered table definitions and snapshot
//! backup/restore of the file.
//!
//! # Architecture
//!
//! - **`registry`**: table definitions and the DDL generated from them
//! - **`database`**: connect/disconnect, fresh-store creation, `regexp`
//! - **`migration`**: revision steps and the bookkeeping table
//! - **`query`**: insert/update/execute/query with commit control
//! - **`backup`**: timestamped snapshots, restore and orphan pruning
//!
//! # Quick start
//!
//! ```no_run
//! use normsql_core::{FieldSpec, Row, StoreConfig, TableDefinition};
//! use normsql_sqlite::{Database, Options};
//!
//! let db = Database::new(StoreConfig::new("store.sqlite")).unwrap();
//! db.add_table_definition(
//!     TableDefinition::new("samples")
//!         .with_field("created_on", FieldSpec::text())
//!         .with_field("name", FieldSpec::text()),
//! )
//! .unwrap();
//! db.connect().unwrap();
//!
//! db.insert("samples", &[Row::new().with("name", "first")], &Options::default())
//!     .unwrap();
//! let snapshot = db.backup().unwrap();
//! println!("backed up to {}", snapshot.display());
//! ```
//!
//! # Transactions
//!
//! Every write takes [`Options`]. With `should_commit` set (the default) the
//! statement is committed before the call returns. Writes made with
//! [`Options::without_commit`] stay in an open transaction until
//! [`Database::commit`] or [`Database::rollback`].

mod backup;
mod convert;
mod database;
mod error;
mod migration;
mod query;
mod registry;

pub use backup::{
    SNAPSHOT_TIMESTAMP_FORMAT, is_snapshot, list_snapshots, snapshot_filename, split_filename,
};
pub use database::{Database, REGEXP_FUNCTION};
pub use error::{Result, StoreError};
pub use migration::{Migrator, RevisionStep};
pub use query::{CREATED_ON_FORMAT, Options, StoreQuery, Subs, timestamp_now};
pub use registry::{SchemaRegistry, create_table_if_missing_sql, create_table_sql};
