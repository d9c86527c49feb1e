//! Connection lifecycle of a store.
//!
//! [`Database`] owns the single live connection to the backing file. On
//! connect it creates the file (and its directory) when missing, registers
//! the `regexp` SQL function and either builds every registered schema from
//! scratch or upgrades an existing store to this build's revision.
//!
//! All methods take `&self`: the connection sits behind a mutex, so a
//! `Database` can be shared between threads through an `Arc`. Statements
//! are serialized through that mutex.
//!
//! # Example
//!
//! ```no_run
//! use normsql_core::{FieldSpec, Row, StoreConfig, TableDefinition};
//! use normsql_sqlite::{Database, Options};
//!
//! let db = Database::new(StoreConfig::new("/var/lib/app/store.sqlite")).unwrap();
//! db.add_table_definition(
//!     TableDefinition::new("samples")
//!         .with_field("uuid", FieldSpec::text().indexed())
//!         .with_field("created_on", FieldSpec::text())
//!         .with_field("name", FieldSpec::text()),
//! )
//! .unwrap();
//! db.connect().unwrap();
//!
//! db.insert("samples", &[Row::new().with("uuid", "s1").with("name", "first")], &Options::default())
//!     .unwrap();
//! let rows = db.query("SELECT name FROM samples WHERE name REGEXP ?", &["^fi".into()], None).unwrap();
//! assert_eq!(rows.len(), 1);
//! db.disconnect().unwrap();
//! ```

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use normsql_core::{
    CoreError, NUMBER_FIELD, REVISION_TABLE, Row, StoreConfig, TableDefinition, TableRef, Value,
    revision_table,
};
use regex::Regex;
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use tracing::{Level, debug, info, warn};

use crate::error::{Result, StoreError};
use crate::migration::{Migrator, RevisionStep};
use crate::query::{Options, StoreQuery, Subs};
use crate::registry::SchemaRegistry;

/// Name under which the pattern-match function is registered.
///
/// SQLite rewrites `subject REGEXP pattern` to `regexp(pattern, subject)`.
pub const REGEXP_FUNCTION: &str = "regexp";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A store backed by one SQLite file.
pub struct Database {
    pub(crate) config: StoreConfig,
    engine_level: Level,
    connection: Mutex<Option<Connection>>,
    registry: RwLock<SchemaRegistry>,
    migrator: Migrator,
    pub(crate) maintenance: Mutex<()>,
    pub(crate) last_restore: AtomicUsize,
}

impl Database {
    /// Creates a store for `config`. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Core`] if `filename` is missing or `log_level`
    /// is not a recognized level.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let engine_level = parse_level(&config.log_level)?;
        Ok(Self {
            config,
            engine_level,
            connection: Mutex::new(None),
            registry: RwLock::new(SchemaRegistry::new()),
            migrator: Migrator::new(),
            maintenance: Mutex::new(()),
            last_restore: AtomicUsize::new(0),
        })
    }

    /// Path of the backing file.
    pub fn filename(&self) -> &Path {
        &self.config.filename
    }

    /// Directory snapshots are written to.
    pub fn backup_directory(&self) -> PathBuf {
        self.config.backup_directory()
    }

    /// Revision this build upgrades stores to.
    pub fn target_revision(&self) -> u32 {
        self.migrator.target()
    }

    /// Appends a revision step. Call before the first [`connect`](Self::connect).
    pub fn add_revision(&mut self, step: impl RevisionStep + 'static) {
        self.migrator.push(step);
    }

    /// Registers a table definition, replacing one of the same name.
    pub fn add_table_definition(&self, definition: TableDefinition) -> Result<()> {
        self.registry
            .write()
            .map_err(|_| StoreError::LockPoisoned("registry"))?
            .register(definition)
    }

    /// Resolves a table reference against the registry.
    pub fn resolve<'t>(&self, table: impl Into<TableRef<'t>>) -> Result<TableDefinition> {
        let registry = self.read_registry()?;
        registry.resolve(table.into()).map(Cow::into_owned)
    }

    /// Names of the registered tables.
    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.read_registry()?.names().map(String::from).collect())
    }

    fn lock_connection(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.connection
            .lock()
            .map_err(|_| StoreError::LockPoisoned("connection"))
    }

    fn read_registry(&self) -> Result<RwLockReadGuard<'_, SchemaRegistry>> {
        self.registry
            .read()
            .map_err(|_| StoreError::LockPoisoned("registry"))
    }

    /// Runs `op` against the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotConnected`] when disconnected.
    pub fn with_query<T>(&self, op: impl FnOnce(&StoreQuery<'_>) -> Result<T>) -> Result<T> {
        let guard = self.lock_connection()?;
        let conn = guard.as_ref().ok_or(StoreError::NotConnected)?;
        let registry = self.read_registry()?;
        let query = StoreQuery::new(conn, &registry).with_engine_level(self.engine_level);
        op(&query)
    }

    /// Returns `true` while a live connection is held.
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Opens the backing file, creating and initializing it when missing.
    ///
    /// A no-op while already connected. A fresh store gets every registered
    /// table and the target revision, and its file is made world
    /// read-writable. An existing store is upgraded when it is below the
    /// target revision; a store without the bookkeeping table counts as
    /// revision 0.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created, the file cannot be opened,
    /// the `regexp` function cannot be registered, or a revision step fails.
    /// The store is left disconnected in every case, and a file this call
    /// created is removed again so the next attempt starts fresh.
    pub fn connect(&self) -> Result<()> {
        let mut guard = self.lock_connection()?;
        if guard.is_some() {
            return Ok(());
        }

        let filename = &self.config.filename;
        let fresh = !filename.is_file();
        if fresh {
            create_parent_directory(filename)?;
        }

        debug!("connecting to {}", filename.display());
        let conn = Connection::open(filename)?;

        if let Err(err) = self.initialize(&conn, fresh) {
            drop(conn);
            if fresh {
                discard_fresh_store(filename);
            }
            return Err(err);
        }

        info!(
            "database file is {} revision {}",
            filename.display(),
            self.migrator.target()
        );
        *guard = Some(conn);
        Ok(())
    }

    /// Registers `regexp`, then builds a fresh store or upgrades an existing one.
    fn initialize(&self, conn: &Connection, fresh: bool) -> Result<()> {
        register_regexp(conn)?;
        debug!("created {REGEXP_FUNCTION} function");

        self.add_table_definition(revision_table())?;

        let registry = self.read_registry()?;
        let query = StoreQuery::new(conn, &registry).with_engine_level(self.engine_level);

        if fresh {
            query.create_schemas(true)?;
            query.insert(
                REVISION_TABLE,
                &[Row::new().with(NUMBER_FIELD, self.migrator.target())],
                &Options::because("record initial revision"),
            )?;
            set_world_read_write(&self.config.filename)?;
        } else {
            let current = match self.migrator.current_revision(&query) {
                Ok(revision) => revision,
                Err(err) => {
                    warn!("could not get revision, presuming legacy database with no table: {err}");
                    0
                }
            };
            self.migrator.upgrade(&query, current)?;
        }
        Ok(())
    }

    /// Closes the live connection, if any.
    pub fn disconnect(&self) -> Result<()> {
        let mut guard = self.lock_connection()?;
        if let Some(conn) = guard.take() {
            debug!("disconnecting from {}", self.config.filename.display());
            conn.close().map_err(|(_, err)| StoreError::Database(err))?;
        }
        Ok(())
    }

    /// Revision recorded in the live store.
    pub fn current_revision(&self) -> Result<u32> {
        self.with_query(|query| self.migrator.current_revision(query))
    }

    /// Drops and re-creates one table.
    pub fn create_table<'t>(&self, table: impl Into<TableRef<'t>>, should_commit: bool) -> Result<()> {
        self.with_query(|query| query.create_table(table, should_commit))
    }

    /// Drops and re-creates every registered table.
    pub fn create_schemas(&self, should_commit: bool) -> Result<()> {
        self.with_query(|query| query.create_schemas(should_commit))
    }

    /// See [`StoreQuery::insert`].
    pub fn insert<'t>(
        &self,
        table: impl Into<TableRef<'t>>,
        rows: &[Row],
        options: &Options<'_>,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.with_query(|query| query.insert(table, rows, options))
    }

    /// See [`StoreQuery::update`].
    pub fn update<'t>(
        &self,
        table: impl Into<TableRef<'t>>,
        row: &Row,
        where_clause: &str,
        subs: &[Value],
        options: &Options<'_>,
    ) -> Result<usize> {
        self.with_query(|query| query.update(table, row, where_clause, subs, options))
    }

    /// See [`StoreQuery::execute`].
    pub fn execute(&self, sql: &str, subs: &Subs, options: &Options<'_>) -> Result<usize> {
        self.with_query(|query| query.execute(sql, subs, options))
    }

    /// See [`StoreQuery::query`].
    pub fn query(&self, sql: &str, subs: &[Value], why: Option<&str>) -> Result<Vec<Row>> {
        self.with_query(|query| query.query(sql, subs, why))
    }

    /// Commits the open transaction, if any.
    pub fn commit(&self) -> Result<()> {
        self.with_query(|query| query.commit())
    }

    /// Rolls back the open transaction, if any.
    pub fn rollback(&self) -> Result<()> {
        self.with_query(|query| query.rollback())
    }

    /// Returns `true` while a transaction is open on the live connection.
    pub fn in_transaction(&self) -> Result<bool> {
        self.with_query(|query| Ok(query.in_transaction()))
    }
}

/// Parses a diagnostic level, accepting the common `WARNING`/`CRITICAL` spellings.
fn parse_level(level: &str) -> Result<Level> {
    let normalized = match level.to_ascii_uppercase().as_str() {
        "WARNING" => "WARN".to_string(),
        "CRITICAL" | "FATAL" => "ERROR".to_string(),
        other => other.to_string(),
    };
    normalized
        .parse::<Level>()
        .map_err(|_| CoreError::Config(format!("invalid log_level '{level}'")).into())
}

/// Registers `regexp(pattern, subject)`.
///
/// The compiled pattern is cached per statement. A `NULL` or blob subject
/// never matches; numbers are matched on their text form.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        REGEXP_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern = ctx.get_or_create_aux(0, |vr| -> std::result::Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let matched = match ctx.get_raw(1) {
                ValueRef::Text(text) => pattern.is_match(&String::from_utf8_lossy(text)),
                ValueRef::Integer(i) => pattern.is_match(&i.to_string()),
                ValueRef::Real(f) => pattern.is_match(&f.to_string()),
                ValueRef::Null | ValueRef::Blob(_) => false,
            };
            Ok(matched)
        },
    )?;
    Ok(())
}

/// Creates the missing directories above `path`, widening each new one to `0o777`.
pub(crate) fn create_parent_directory(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }

    let missing: Vec<&Path> = parent.ancestors().take_while(|p| !p.exists()).collect();
    std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
        context: format!("creating directory {}", parent.display()),
        source,
    })?;

    #[cfg(unix)]
    for directory in missing.iter().rev() {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(directory, std::fs::Permissions::from_mode(0o777)).map_err(
            |source| StoreError::Io {
                context: format!("setting permissions on {}", directory.display()),
                source,
            },
        )?;
    }
    #[cfg(not(unix))]
    let _ = missing;

    Ok(())
}

/// Makes a freshly created store file world read-writable.
fn set_world_read_write(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).map_err(
            |source| StoreError::Io {
                context: format!("setting permissions on {}", path.display()),
                source,
            },
        )?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Removes a store file whose initialization failed, so the next connect starts fresh.
fn discard_fresh_store(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed partially initialized {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("could not remove partially initialized {}: {err}", path.display()),
    }
}
