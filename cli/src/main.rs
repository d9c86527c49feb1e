use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use normsql_core::StoreConfig;
use normsql_sqlite::{Database, Options, Subs};
use tracing_subscriber::EnvFilter;

const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "normsql")]
#[command(version = PACKAGE_VERSION)]
#[command(about = "Inspect, query, back up and restore normsql SQLite stores")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// YAML store configuration file.
    #[arg(long, global = true, conflicts_with = "db")]
    config: Option<PathBuf>,
    /// Store file path (used instead of --config).
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Snapshot directory (default: the store file's directory).
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,
    /// Engine diagnostic level (ERROR, WARNING, INFO, DEBUG, TRACE).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect (creating or upgrading the store) and print its revision.
    Status,
    /// Copy the store file to a new timestamped snapshot.
    Backup,
    /// Overwrite the store file with a snapshot (0 = newest).
    Restore(RestoreArgs),
    /// List snapshots, newest first.
    Snapshots,
    /// Run a read statement and print the rows as JSON.
    Query(SqlArgs),
    /// Run a write statement and print the affected row count.
    Execute(SqlArgs),
}

#[derive(Debug, Args)]
struct RestoreArgs {
    /// Snapshot index, newest first.
    nth: usize,
}

#[derive(Debug, Args)]
struct SqlArgs {
    /// SQL statement.
    sql: String,
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(&cli.store).and_then(|config| {
        init_logging(&config.log_level);
        tracing::debug!(store = %config.filename.display(), "store configuration loaded");
        let db = Database::new(config).map_err(|e| format!("invalid store configuration: {e}"))?;
        let outcome = match cli.command {
            Command::Status => run_status(&db),
            Command::Backup => run_backup(&db),
            Command::Restore(args) => run_restore(&db, args),
            Command::Snapshots => run_snapshots(&db),
            Command::Query(args) => run_query(&db, args),
            Command::Execute(args) => run_execute(&db, args),
        };
        if db.is_connected() {
            db.disconnect()
                .map_err(|e| format!("failed to close store: {e}"))?;
        }
        outcome
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Builds the store configuration from `--config` or `--db`, then applies overrides.
fn load_config(args: &StoreArgs) -> Result<StoreConfig, String> {
    let mut config = match (&args.config, &args.db) {
        (Some(path), _) => StoreConfig::load(path)
            .map_err(|e| format!("failed to load config '{}': {e}", path.display()))?,
        (None, Some(db)) => StoreConfig::new(db),
        (None, None) => return Err("either --config or --db is required".to_string()),
    };

    if let Some(directory) = &args.backup_dir {
        config.backup_directory = Some(directory.clone());
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

/// Sends diagnostics to stderr. `RUST_LOG` overrides the configured level.
fn init_logging(level: &str) {
    let directive = match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn connect(db: &Database) -> Result<(), String> {
    db.connect().map_err(|e| {
        format!(
            "failed to open store '{}': {e}",
            db.filename().display()
        )
    })
}

fn run_status(db: &Database) -> Result<(), String> {
    connect(db)?;
    let current = db
        .current_revision()
        .map_err(|e| format!("failed to read revision: {e}"))?;
    let tables = db.table_names().map_err(|e| e.to_string())?;
    let snapshots = db.snapshots().map_err(|e| e.to_string())?;

    println!("Store: {}", db.filename().display());
    println!("  Revision: {current} (latest {})", db.target_revision());
    println!("  Registered tables: {}", tables.join(", "));
    println!("  Backup directory: {}", db.backup_directory().display());
    println!("  Snapshots: {}", snapshots.len());
    Ok(())
}

fn run_backup(db: &Database) -> Result<(), String> {
    connect(db)?;
    let snapshot = db.backup().map_err(|e| format!("backup failed: {e}"))?;
    println!("Backed up to {}", snapshot.display());
    Ok(())
}

fn run_restore(db: &Database, args: RestoreArgs) -> Result<(), String> {
    connect(db)?;
    let snapshot = db
        .restore(args.nth)
        .map_err(|e| format!("restore failed: {e}"))?;
    println!("Restored from {}", snapshot.display());
    Ok(())
}

fn run_snapshots(db: &Database) -> Result<(), String> {
    let snapshots = db
        .snapshots()
        .map_err(|e| format!("failed to list snapshots: {e}"))?;
    if snapshots.is_empty() {
        println!("No snapshots in {}", db.backup_directory().display());
    }
    for (index, snapshot) in snapshots.iter().enumerate() {
        println!("{index:>4}  {}", snapshot.display());
    }
    Ok(())
}

fn run_query(db: &Database, args: SqlArgs) -> Result<(), String> {
    connect(db)?;
    let rows = db
        .query(&args.sql, &[], Some("command line query"))
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&rows)
        .map_err(|e| format!("failed to serialize rows: {e}"))?;
    println!("{json}");
    Ok(())
}

fn run_execute(db: &Database, args: SqlArgs) -> Result<(), String> {
    connect(db)?;
    let affected = db
        .execute(&args.sql, &Subs::None, &Options::because("command line statement"))
        .map_err(|e| e.to_string())?;
    println!("{affected} row(s) affected");
    Ok(())
}
