//! Snapshot backup and restore.
//!
//! A snapshot is a plain copy of the store file named
//! `{basename}.{timestamp}{suffix}` in the backup directory, where
//! `basename` and `suffix` come from splitting the store's file name at its
//! last `.`. Timestamps are fixed-width, so sorting names sorts snapshots
//! chronologically.
//!
//! Backup and restore both close the live connection around the file copy
//! and always reconnect afterwards, even when the copy fails. They share
//! one lock and never overlap each other. Ordinary CRUD calls are not held
//! off; they fail with [`StoreError::NotConnected`] while a copy is running.
//!
//! Restoring snapshot `n` (newest first) leaves the `n` snapshots taken after
//! it orphaned. The next backup deletes them before writing its own.

use std::path::{Path, PathBuf};
use std::sync::MutexGuard;
use std::sync::atomic::Ordering;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::database::{Database, create_parent_directory};
use crate::error::{Result, StoreError};

/// `chrono` format of the timestamp embedded in snapshot names.
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6f";

/// Splits a path's file name into `(basename, suffix)`, keeping the dot on the suffix.
///
/// A leading dot does not start a suffix: `.store` splits into `(".store", "")`.
pub fn split_filename(path: &Path) -> (String, String) {
    let basename = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    (basename, suffix)
}

/// File name of a snapshot of `store` taken at `timestamp`.
pub fn snapshot_filename(store: &Path, timestamp: &str) -> String {
    let (basename, suffix) = split_filename(store);
    format!("{basename}.{timestamp}{suffix}")
}

/// Returns `true` if `name` is a snapshot file name of `store`.
pub fn is_snapshot(store: &Path, name: &str) -> bool {
    let (basename, suffix) = split_filename(store);
    name.strip_prefix(&basename)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(suffix.as_str()))
        .is_some_and(|timestamp| {
            NaiveDateTime::parse_from_str(timestamp, SNAPSHOT_TIMESTAMP_FORMAT).is_ok()
        })
}

/// Snapshots of `store` found in `directory`, newest first.
///
/// A missing directory holds no snapshots.
pub fn list_snapshots(directory: &Path, store: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                context: format!("listing {}", directory.display()),
                source,
            });
        }
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            context: format!("listing {}", directory.display()),
            source,
        })?;
        let name = entry.file_name();
        if is_snapshot(store, &name.to_string_lossy()) {
            snapshots.push(entry.path());
        }
    }
    snapshots.sort();
    snapshots.reverse();
    Ok(snapshots)
}

impl Database {
    fn lock_maintenance(&self) -> Result<MutexGuard<'_, ()>> {
        self.maintenance
            .lock()
            .map_err(|_| StoreError::LockPoisoned("backup/restore"))
    }

    /// Snapshots of this store, newest first.
    pub fn snapshots(&self) -> Result<Vec<PathBuf>> {
        list_snapshots(&self.backup_directory(), self.filename())
    }

    /// Copies the store file to a new timestamped snapshot.
    ///
    /// Snapshots orphaned by the previous restore are deleted first.
    /// Returns the snapshot path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Copy`] if the copy fails. The store is
    /// reconnected either way.
    pub fn backup(&self) -> Result<PathBuf> {
        let _maintenance = self.lock_maintenance()?;
        debug!(operation = "backup", "maintenance begin");

        let result = self.backup_locked();
        debug!(operation = "backup", "maintenance end");
        result
    }

    fn backup_locked(&self) -> Result<PathBuf> {
        self.prune_orphans()?;

        let timestamp = Local::now().format(SNAPSHOT_TIMESTAMP_FORMAT).to_string();
        let to = self
            .backup_directory()
            .join(snapshot_filename(self.filename(), &timestamp));
        let from = self.filename().to_path_buf();

        self.copy_disconnected(&from, &to, true)?;
        info!("backed up to {}", to.display());
        Ok(to)
    }

    /// Overwrites the store file with snapshot `nth`, `0` being the newest.
    ///
    /// Returns the snapshot path restored from.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RestoreIndex`] if there are not more than `nth`
    /// snapshots, and [`StoreError::Copy`] if the copy fails. The store is
    /// reconnected after any copy attempt.
    pub fn restore(&self, nth: usize) -> Result<PathBuf> {
        let _maintenance = self.lock_maintenance()?;
        debug!(operation = "restore", "maintenance begin");

        let result = self.restore_locked(nth);
        debug!(operation = "restore", "maintenance end");
        result
    }

    fn restore_locked(&self, nth: usize) -> Result<PathBuf> {
        let snapshots = self.snapshots()?;
        let from = snapshots
            .get(nth)
            .cloned()
            .ok_or(StoreError::RestoreIndex {
                nth,
                available: snapshots.len(),
            })?;
        let to = self.filename().to_path_buf();

        self.copy_disconnected(&from, &to, false)?;
        self.last_restore.store(nth, Ordering::SeqCst);

        info!(
            "restored nth {nth} out of {} from {}",
            snapshots.len(),
            from.display()
        );
        Ok(from)
    }

    /// Deletes the snapshots newer than the last restored one.
    fn prune_orphans(&self) -> Result<()> {
        let orphans = self.last_restore.load(Ordering::SeqCst);
        if orphans > 0 {
            debug!("{orphans} is last restore");
            for snapshot in self.snapshots()?.iter().take(orphans) {
                debug!("removing orphaned snapshot {}", snapshot.display());
                std::fs::remove_file(snapshot).map_err(|source| StoreError::Io {
                    context: format!("removing {}", snapshot.display()),
                    source,
                })?;
            }
        }
        self.last_restore.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Disconnects, copies `from` over `to` and reconnects.
    ///
    /// An open transaction is rolled back first; its writes never reach the
    /// copy. The copy error wins over a reconnect error.
    fn copy_disconnected(&self, from: &Path, to: &Path, create_directory: bool) -> Result<()> {
        if self.in_transaction().unwrap_or(false) {
            warn!("rolling back uncommitted writes before suspending the connection");
            self.rollback()?;
        }
        self.disconnect()?;

        let copied = copy_file(from, to, create_directory);
        let reconnected = self.connect();
        copied.and(reconnected)
    }
}

fn copy_file(from: &Path, to: &Path, create_directory: bool) -> Result<()> {
    if create_directory {
        create_parent_directory(to)?;
    }
    std::fs::copy(from, to).map_err(|source| StoreError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    Ok(())
}
