//! Row-level CRUD primitives.
//!
//! [`StoreQuery`] wraps a connection and the schema registry. It is what
//! [`Database`](crate::Database) delegates to while holding its connection
//! lock, and what revision steps receive while a store is being upgraded.
//!
//! # Transactions
//!
//! Every write takes [`Options`]. With `should_commit` left on, the statement
//! runs and any open transaction is committed. With it off, a transaction is
//! opened if none is, so a series of writes can be committed or rolled back
//! together through [`StoreQuery::commit`] / [`StoreQuery::rollback`].
//! Batch writes always run inside a transaction.
//!
//! # Example
//!
//! ```no_run
//! use normsql_core::{FieldSpec, Row, TableDefinition};
//! use normsql_sqlite::{Options, SchemaRegistry, StoreQuery};
//! use rusqlite::{Connection, Statement};
//!
//! let conn = Connection::open_in_memory().unwrap();
//! let mut registry = SchemaRegistry::new();
//! registry
//!     .register(TableDefinition::new("notes").with_field("body", FieldSpec::text()))
//!     .unwrap();
//!
//! let query = StoreQuery::new(&conn, &registry);
//! query.create_table("notes", true).unwrap();
//! query
//!     .insert("notes", &[Row::new().with("body", "hello")], &Options::default())
//!     .unwrap();
//! let rows = query.query("SELECT body FROM notes", &[], None).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

use normsql_core::{CREATED_ON_FIELD, Row, TableRef, Value, is_identity_field};
use rusqlite::{Connection, Statement};
use tracing::{Level, debug, warn};

use crate::convert::{params, row_from_sql};
use crate::error::{Result, StoreError, describe};
use crate::registry::{SchemaRegistry, create_table_sql};

/// Format of auto-filled `created_on` values.
pub const CREATED_ON_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Current local time formatted for `created_on`.
pub fn timestamp_now() -> String {
    chrono::Local::now().format(CREATED_ON_FORMAT).to_string()
}

/// Per-call write options.
#[derive(Debug, Clone, Copy)]
pub struct Options<'a> {
    /// Human-readable reason, included in logs and error messages.
    pub why: Option<&'a str>,
    /// Commit after the statement (default `true`).
    pub should_commit: bool,
}

impl Default for Options<'_> {
    fn default() -> Self {
        Self {
            why: None,
            should_commit: true,
        }
    }
}

impl<'a> Options<'a> {
    /// Autocommit options carrying a reason.
    pub fn because(why: &'a str) -> Self {
        Self {
            why: Some(why),
            should_commit: true,
        }
    }

    /// Leaves the statement in an open transaction.
    pub fn without_commit(mut self) -> Self {
        self.should_commit = false;
        self
    }
}

/// Bound parameters of [`StoreQuery::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Subs {
    /// No parameters.
    #[default]
    None,
    /// One execution with these parameters.
    Single(Vec<Value>),
    /// One execution per inner list, inside a single transaction.
    Batch(Vec<Vec<Value>>),
}

impl From<Vec<Value>> for Subs {
    fn from(values: Vec<Value>) -> Self {
        Subs::Single(values)
    }
}

impl From<Vec<Vec<Value>>> for Subs {
    fn from(batch: Vec<Vec<Value>>) -> Self {
        Subs::Batch(batch)
    }
}

/// CRUD interface over one connection.
pub struct StoreQuery<'a> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    engine_level: Level,
}

impl<'a> StoreQuery<'a> {
    /// Creates a query interface with engine diagnostics at `INFO`.
    pub fn new(conn: &'a Connection, registry: &'a SchemaRegistry) -> Self {
        Self {
            conn,
            registry,
            engine_level: Level::INFO,
        }
    }

    /// Sets the verbosity of per-statement diagnostics.
    pub fn with_engine_level(mut self, level: Level) -> Self {
        self.engine_level = level;
        self
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// The registry tables are resolved against.
    pub fn registry(&self) -> &SchemaRegistry {
        self.registry
    }

    fn trace_statement(&self, why: Option<&str>, sql: &str, affected: usize) {
        if self.engine_level >= Level::DEBUG {
            match why {
                Some(why) => debug!(affected, "{why}: {sql}"),
                None => debug!(affected, "{sql}"),
            }
        }
    }

    /// Runs `op` under the transaction rules described in the module docs.
    fn write<T>(
        &self,
        sql: &str,
        options: &Options<'_>,
        batch: bool,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let failed = |source: rusqlite::Error| StoreError::Execution {
            context: describe(sql, options.why),
            source,
        };

        let began = self.conn.is_autocommit() && (batch || !options.should_commit);
        if began {
            self.conn.execute_batch("BEGIN").map_err(failed)?;
        }

        match op(self.conn) {
            Ok(value) => {
                if options.should_commit && !self.conn.is_autocommit() {
                    self.conn.execute_batch("COMMIT").map_err(failed)?;
                }
                Ok(value)
            }
            Err(source) => {
                if began && options.should_commit && !self.conn.is_autocommit() {
                    if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                        warn!("rollback after failed statement also failed: {err}");
                    }
                }
                Err(failed(source))
            }
        }
    }

    /// Drops and re-creates a table with its indices.
    pub fn create_table<'t>(&self, table: impl Into<TableRef<'t>>, should_commit: bool) -> Result<()> {
        let table = self.registry.resolve(table.into())?;
        let statements = create_table_sql(&table);
        let options = Options {
            why: Some("create table"),
            should_commit,
        };
        self.write(&statements[1], &options, true, |conn| {
            for sql in &statements {
                conn.execute_batch(sql)?;
            }
            Ok(())
        })?;
        debug!("created table {}", table.name);
        Ok(())
    }

    /// Re-creates every registered table.
    pub fn create_schemas(&self, should_commit: bool) -> Result<()> {
        for table in self.registry.definitions() {
            self.create_table(table, false)?;
        }
        if should_commit {
            self.commit()?;
        }
        Ok(())
    }

    /// Inserts rows in one batch.
    ///
    /// The first row decides the inserted fields: every table field it
    /// contains, plus `created_on`, which is filled with the current time
    /// where a row leaves it out. Fields the table does not declare are
    /// ignored; declared fields the first row leaves out get the column
    /// default.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InconsistentRow`] if a later row lacks a field
    /// of the first row, or [`StoreError::Execution`] if the engine rejects
    /// the statement. A failed batch inserts nothing unless it joined a
    /// caller's open transaction.
    pub fn insert<'t>(
        &self,
        table: impl Into<TableRef<'t>>,
        rows: &[Row],
        options: &Options<'_>,
    ) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let table = self.registry.resolve(table.into())?;

        let fields: Vec<&str> = table
            .field_names()
            .filter(|field| first.contains(field) || *field == CREATED_ON_FIELD)
            .collect();

        for (index, row) in rows.iter().enumerate().skip(1) {
            if let Some(missing) = fields
                .iter()
                .find(|field| **field != CREATED_ON_FIELD && !row.contains(field))
            {
                return Err(StoreError::InconsistentRow {
                    table: table.name.clone(),
                    index,
                    field: missing.to_string(),
                });
            }
        }

        let sql = if fields.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table.name)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name,
                fields.join(", "),
                vec!["?"; fields.len()].join(", ")
            )
        };

        let now = Value::Text(timestamp_now());
        let inserted = self.write(&sql, options, true, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            for row in rows {
                let values = fields.iter().map(|field| row.get(field).unwrap_or(&now));
                stmt.execute(params(values))?;
            }
            Ok(rows.len())
        })?;

        self.trace_statement(options.why, &sql, inserted);
        Ok(())
    }

    /// Updates the row fields known to the table on every row matching
    /// `where_clause`. Returns the number of affected rows.
    ///
    /// `subs` binds the placeholders of `where_clause`; they follow the SET
    /// values. Identity fields (`uuid`, `autoid`) are never updated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoUpdatableFields`] if `row` shares no
    /// updatable field with the table.
    pub fn update<'t>(
        &self,
        table: impl Into<TableRef<'t>>,
        row: &Row,
        where_clause: &str,
        subs: &[Value],
        options: &Options<'_>,
    ) -> Result<usize> {
        let table = self.registry.resolve(table.into())?;

        let mut assignments = Vec::new();
        let mut values: Vec<&Value> = Vec::new();
        for field in table.field_names() {
            if is_identity_field(field) {
                continue;
            }
            if let Some(value) = row.get(field) {
                assignments.push(format!("{field} = ?"));
                values.push(value);
            }
        }

        if values.is_empty() {
            return Err(StoreError::NoUpdatableFields {
                table: table.name.clone(),
            });
        }
        values.extend(subs);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table.name,
            assignments.join(", "),
            where_clause
        );

        let affected = self.write(&sql, options, false, |conn| {
            conn.execute(&sql, params(values.iter().copied()))
        })?;

        self.trace_statement(options.why, &sql, affected);
        Ok(affected)
    }

    /// Executes a statement once, or once per parameter list for
    /// [`Subs::Batch`]. Returns the total number of affected rows.
    ///
    /// Statements that return rows (`PRAGMA journal_mode=WAL`,
    /// `INSERT ... RETURNING`, a plain `SELECT`) are stepped to completion
    /// and their rows discarded. Read-only statements affect no rows.
    pub fn execute(&self, sql: &str, subs: &Subs, options: &Options<'_>) -> Result<usize> {
        let batch = matches!(subs, Subs::Batch(_));
        let affected = self.write(sql, options, batch, |conn| {
            let mut stmt = conn.prepare(sql)?;
            match subs {
                Subs::None => run_statement(conn, &mut stmt, &[]),
                Subs::Single(values) => run_statement(conn, &mut stmt, values),
                Subs::Batch(batch) => {
                    let mut total = 0;
                    for values in batch {
                        total += run_statement(conn, &mut stmt, values)?;
                    }
                    Ok(total)
                }
            }
        })?;

        self.trace_statement(options.why, sql, affected);
        Ok(affected)
    }

    /// Runs a read statement and returns every row, columns in statement order.
    ///
    /// The prepared statement is released when this returns, on success or
    /// failure.
    pub fn query(&self, sql: &str, subs: &[Value], why: Option<&str>) -> Result<Vec<Row>> {
        let explain = |source: rusqlite::Error| StoreError::Query {
            context: describe(sql, why),
            source,
        };

        let mut stmt = self.conn.prepare(sql).map_err(explain)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let records = stmt
            .query_map(params(subs), |row| row_from_sql(row, &columns))
            .map_err(explain)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(explain)?;

        self.trace_statement(why, sql, records.len());
        Ok(records)
    }

    /// Returns `true` while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Commits the open transaction, if any.
    pub fn commit(&self) -> Result<()> {
        if self.in_transaction() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Rolls back the open transaction, if any.
    pub fn rollback(&self) -> Result<()> {
        if self.in_transaction() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

/// Runs a prepared statement once, draining any rows it returns.
fn run_statement(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    values: &[Value],
) -> rusqlite::Result<usize> {
    if stmt.column_count() == 0 {
        return stmt.execute(params(values));
    }

    let mut rows = stmt.query(params(values))?;
    while rows.next()?.is_some() {}
    drop(rows);

    if stmt.readonly() {
        Ok(0)
    } else {
        Ok(usize::try_from(conn.changes()).unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normsql_core::{FieldSpec, TableDefinition, revision_table};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(revision_table()).unwrap();
        registry
            .register(
                TableDefinition::new("samples")
                    .with_field("autoid", FieldSpec::auto_increment())
                    .with_field("uuid", FieldSpec::text().indexed())
                    .with_field("name", FieldSpec::text())
                    .with_field("status", FieldSpec::text().with_default("'new'")),
            )
            .unwrap();
        registry
    }

    fn setup(conn: &Connection, registry: &SchemaRegistry) {
        StoreQuery::new(conn, registry).create_schemas(true).unwrap();
    }

    #[test]
    fn test_insert_autofills_created_on() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        setup(&conn, &registry);
        let query = StoreQuery::new(&conn, &registry);

        query
            .insert("revision", &[Row::new().with("number", 1)], &Options::default())
            .unwrap();

        let rows = query
            .query("SELECT created_on, number FROM revision", &[], None)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("number"), Some(&Value::Integer(1)));
        let created_on = rows[0].get("created_on").and_then(Value::as_str).unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(created_on, CREATED_ON_FORMAT).is_ok());
    }

    #[test]
    fn test_insert_empty_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        // No table exists; an empty insert must not touch the engine.
        query.insert("samples", &[], &Options::default()).unwrap();
    }

    #[test]
    fn test_insert_ignores_unknown_fields_and_uses_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        setup(&conn, &registry);
        let query = StoreQuery::new(&conn, &registry);

        let rows = [
            Row::new().with("uuid", "u1").with("name", "a").with("bogus", 1),
            Row::new().with("uuid", "u2").with("name", "b"),
        ];
        query.insert("samples", &rows, &Options::default()).unwrap();

        let read = query
            .query("SELECT autoid, uuid, status FROM samples ORDER BY autoid", &[], None)
            .unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].get("autoid"), Some(&Value::Integer(1)));
        assert_eq!(read[1].get("status").and_then(Value::as_str), Some("new"));
    }

    #[test]
    fn test_insert_rejects_inconsistent_batch() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        setup(&conn, &registry);
        let query = StoreQuery::new(&conn, &registry);

        let rows = [
            Row::new().with("uuid", "u1").with("name", "a"),
            Row::new().with("uuid", "u2"),
        ];
        match query.insert("samples", &rows, &Options::default()) {
            Err(StoreError::InconsistentRow { index, field, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(field, "name");
            }
            other => panic!("expected InconsistentRow, got {other:?}"),
        }
    }

    #[test]
    fn test_insert_failure_names_statement_and_reason() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        // Tables were never created.
        let query = StoreQuery::new(&conn, &registry);
        let err = query
            .insert(
                "samples",
                &[Row::new().with("uuid", "u1")],
                &Options::because("add sample"),
            )
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("add sample"), "{message}");
        assert!(message.contains("INSERT INTO samples"), "{message}");
        assert!(!query.in_transaction());
    }

    #[test]
    fn test_update_counts_and_skips_identity_fields() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        setup(&conn, &registry);
        let query = StoreQuery::new(&conn, &registry);

        let rows: Vec<Row> = ["a", "b", "c"]
            .iter()
            .map(|name| Row::new().with("uuid", format!("u-{name}")).with("name", *name))
            .collect();
        query.insert("samples", &rows, &Options::default()).unwrap();

        let affected = query
            .update(
                "samples",
                &Row::new().with("uuid", "hijack").with("status", "done"),
                "name != ?",
                &[Value::from("b")],
                &Options::default(),
            )
            .unwrap();
        assert_eq!(affected, 2);

        let read = query
            .query("SELECT uuid FROM samples WHERE status = 'done' ORDER BY uuid", &[], None)
            .unwrap();
        let uuids: Vec<&str> = read.iter().filter_map(|r| r.get("uuid")?.as_str()).collect();
        assert_eq!(uuids, ["u-a", "u-c"]);
    }

    #[test]
    fn test_update_without_matching_fields_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        setup(&conn, &registry);
        let query = StoreQuery::new(&conn, &registry);

        let result = query.update(
            "samples",
            &Row::new().with("autoid", 5).with("unknown", 1),
            "1 = 1",
            &[],
            &Options::default(),
        );
        assert!(matches!(result, Err(StoreError::NoUpdatableFields { .. })));
    }

    #[test]
    fn test_execute_single_and_batch() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);

        query
            .execute("CREATE TABLE kv (k TEXT, v INTEGER)", &Subs::None, &Options::default())
            .unwrap();
        let batch = Subs::from(vec![
            vec![Value::from("a"), Value::from(1)],
            vec![Value::from("b"), Value::from(2)],
            vec![Value::from("c"), Value::from(3)],
        ]);
        let inserted = query
            .execute("INSERT INTO kv VALUES (?, ?)", &batch, &Options::default())
            .unwrap();
        assert_eq!(inserted, 3);

        let deleted = query
            .execute(
                "DELETE FROM kv WHERE v > ?",
                &Subs::from(vec![Value::from(1)]),
                &Options::default(),
            )
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(!query.in_transaction());
    }

    #[test]
    fn test_execute_runs_row_returning_statements() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        query
            .execute("CREATE TABLE kv (k TEXT, v INTEGER)", &Subs::None, &Options::default())
            .unwrap();

        assert_eq!(query.execute("SELECT 1", &Subs::None, &Options::default()).unwrap(), 0);

        let returned = query
            .execute(
                "INSERT INTO kv VALUES (?, ?) RETURNING k",
                &Subs::from(vec![Value::from("a"), Value::from(1)]),
                &Options::default(),
            )
            .unwrap();
        assert_eq!(returned, 1);

        let batch = Subs::from(vec![vec![Value::from(1)], vec![Value::from(2)]]);
        let selected = query
            .execute("SELECT k FROM kv WHERE v = ?", &batch, &Options::default())
            .unwrap();
        assert_eq!(selected, 0);
        assert!(!query.in_transaction());
    }

    #[test]
    fn test_failed_batch_inserts_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        query
            .execute("CREATE TABLE u (k TEXT UNIQUE)", &Subs::None, &Options::default())
            .unwrap();

        let batch = Subs::from(vec![
            vec![Value::from("a")],
            vec![Value::from("b")],
            vec![Value::from("a")],
        ]);
        assert!(query
            .execute("INSERT INTO u VALUES (?)", &batch, &Options::default())
            .is_err());

        let rows = query.query("SELECT COUNT(*) AS n FROM u", &[], None).unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_deferred_commit_and_rollback() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        setup(&conn, &registry);
        let query = StoreQuery::new(&conn, &registry);

        let deferred = Options::default().without_commit();
        query
            .insert("samples", &[Row::new().with("uuid", "x")], &deferred)
            .unwrap();
        query
            .insert("samples", &[Row::new().with("uuid", "y")], &deferred)
            .unwrap();
        assert!(query.in_transaction());
        query.rollback().unwrap();
        assert!(!query.in_transaction());

        let rows = query.query("SELECT * FROM samples", &[], None).unwrap();
        assert!(rows.is_empty());

        query
            .insert("samples", &[Row::new().with("uuid", "z")], &deferred)
            .unwrap();
        query.commit().unwrap();
        let rows = query.query("SELECT * FROM samples", &[], None).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_commit_and_rollback_are_noops_without_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        query.commit().unwrap();
        query.rollback().unwrap();
    }

    #[test]
    fn test_query_select_one() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        let rows = query.query("SELECT 1", &[], None).unwrap();
        assert_eq!(rows, vec![Row::new().with("1", 1)]);
    }

    #[test]
    fn test_query_preserves_column_order() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        let rows = query
            .query("SELECT 3 AS c, 1 AS a, 2 AS b", &[], None)
            .unwrap();
        let keys: Vec<&str> = rows[0].keys().collect();
        assert_eq!(keys, ["c", "a", "b"]);
    }

    #[test]
    fn test_query_error_is_explained() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        let err = query
            .query("SELECT * FROM nowhere", &[], Some("look nowhere"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Query { .. }));
        let message = err.to_string();
        assert!(message.contains("look nowhere: SELECT * FROM nowhere"), "{message}");
        assert!(message.contains("no such table"), "{message}");
    }

    #[test]
    fn test_create_table_matches_field_order() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = registry();
        let query = StoreQuery::new(&conn, &registry);
        query.create_table("samples", true).unwrap();

        let columns = query
            .query("SELECT name FROM pragma_table_info('samples') ORDER BY cid", &[], None)
            .unwrap();
        let names: Vec<&str> = columns.iter().filter_map(|r| r.get("name")?.as_str()).collect();
        assert_eq!(names, ["autoid", "uuid", "name", "status"]);
    }
}
