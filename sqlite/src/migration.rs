//! Revision-tracked schema migration.
//!
//! A store records its schema revision in the `revision` bookkeeping table.
//! Revision `0` means a legacy store without that table. A [`Migrator`] holds
//! the ordered [`RevisionStep`]s of this build; step `r` brings a store from
//! revision `r - 1` to `r`, and the number of steps is the target revision.
//!
//! Steps run strictly in order. The target revision is written only after
//! every step has succeeded, so a failed upgrade resumes from the last
//! recorded revision on the next connect. Steps must therefore tolerate
//! being re-run after a partial application.
//!
//! # Example
//!
//! ```no_run
//! use normsql_core::StoreConfig;
//! use normsql_sqlite::{Database, Options, Subs};
//!
//! let mut db = Database::new(StoreConfig::new("store.sqlite")).unwrap();
//! // Revision 2: add an index that older stores lack.
//! db.add_revision(|query: &normsql_sqlite::StoreQuery<'_>| -> normsql_sqlite::Result<()> {
//!     query.execute(
//!         "CREATE INDEX IF NOT EXISTS revision_number ON revision(number)",
//!         &Subs::None,
//!         &Options::because("index revision numbers"),
//!     )?;
//!     Ok(())
//! });
//! assert_eq!(db.target_revision(), 2);
//! db.connect().unwrap();
//! ```

use normsql_core::{NUMBER_FIELD, REVISION_TABLE, Row, revision_table};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::query::{Options, StoreQuery, Subs};
use crate::registry::create_table_if_missing_sql;

/// One upgrade step of the schema.
pub trait RevisionStep: Send + Sync {
    /// Applies the step's side effects.
    fn apply(&self, query: &StoreQuery<'_>) -> Result<()>;

    /// Short label for logs.
    fn describe(&self) -> String {
        "custom revision step".to_string()
    }
}

impl<F> RevisionStep for F
where
    F: Fn(&StoreQuery<'_>) -> Result<()> + Send + Sync,
{
    fn apply(&self, query: &StoreQuery<'_>) -> Result<()> {
        self(query)
    }
}

/// Revision 1: a legacy store gains the bookkeeping table.
struct CreateRevisionTable;

impl RevisionStep for CreateRevisionTable {
    fn apply(&self, query: &StoreQuery<'_>) -> Result<()> {
        let table = revision_table();
        info!("creating {REVISION_TABLE} table");
        for sql in create_table_if_missing_sql(&table) {
            query.execute(&sql, &Subs::None, &Options::because("create revision table"))?;
        }
        query.insert(
            &table,
            &[Row::new().with(NUMBER_FIELD, 1)],
            &Options::because("record revision 1"),
        )
    }

    fn describe(&self) -> String {
        format!("create {REVISION_TABLE} table")
    }
}

/// Ordered revision steps and the logic to apply them.
pub struct Migrator {
    steps: Vec<Box<dyn RevisionStep>>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    /// Creates a migrator holding the built-in revision 1.
    pub fn new() -> Self {
        Self {
            steps: vec![Box::new(CreateRevisionTable)],
        }
    }

    /// Appends a step; it becomes revision `target() + 1`.
    pub fn push(&mut self, step: impl RevisionStep + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Revision a fully upgraded store is at.
    pub fn target(&self) -> u32 {
        u32::try_from(self.steps.len()).unwrap_or(u32::MAX)
    }

    /// Reads the recorded revision; an empty bookkeeping table reads as `0`.
    ///
    /// # Errors
    ///
    /// Fails if the bookkeeping table is missing; callers treat that as a
    /// legacy store.
    pub fn current_revision(&self, query: &StoreQuery<'_>) -> Result<u32> {
        let records = query.query(
            &format!("SELECT MAX({NUMBER_FIELD}) AS {NUMBER_FIELD} FROM {REVISION_TABLE}"),
            &[],
            Some("get database revision"),
        )?;
        let number = records
            .first()
            .and_then(|record| record.get(NUMBER_FIELD))
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        Ok(u32::try_from(number).unwrap_or(0))
    }

    /// Runs the step that brings the store from `revision - 1` to `revision`.
    pub fn apply_revision(&self, query: &StoreQuery<'_>, revision: u32) -> Result<()> {
        let step = revision
            .checked_sub(1)
            .and_then(|index| self.steps.get(index as usize))
            .ok_or_else(|| StoreError::Migration {
                revision,
                reason: format!("no such revision (target is {})", self.target()),
            })?;

        debug!("updating to revision {revision}: {}", step.describe());
        step.apply(query).map_err(|err| StoreError::Migration {
            revision,
            reason: err.to_string(),
        })
    }

    /// Applies every step after `current` and records the target revision.
    ///
    /// Returns the revision the store is at afterwards.
    pub fn upgrade(&self, query: &StoreQuery<'_>, current: u32) -> Result<u32> {
        let target = self.target();
        if current > target {
            warn!("store revision {current} is newer than this build's revision {target}");
            return Ok(current);
        }
        if current == target {
            return Ok(current);
        }

        info!("need to update old revision {current} to latest revision {target}");
        for revision in current + 1..=target {
            self.apply_revision(query, revision)?;
        }
        self.record_revision(query, target)?;
        Ok(target)
    }

    /// Writes `revision` into every bookkeeping row, inserting one if the table is empty.
    fn record_revision(&self, query: &StoreQuery<'_>, revision: u32) -> Result<()> {
        let table = revision_table();
        let row = Row::new().with(NUMBER_FIELD, revision);
        let updated = query.update(
            &table,
            &row,
            "1 = 1",
            &[],
            &Options::because("update database revision"),
        )?;
        if updated == 0 {
            query.insert(&table, &[row], &Options::because("record database revision"))?;
        }
        Ok(())
    }
}
