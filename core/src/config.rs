//! Store configuration.
//!
//! Loaded from YAML or built in code.
//!
//! # Example YAML
//!
//! ```yaml
//! filename: /var/lib/app/store.sqlite
//! backup_directory: /var/lib/app/backups
//! log_level: DEBUG
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Configuration of one store.
///
/// # Examples
///
/// ```
/// use normsql_core::StoreConfig;
/// use std::path::Path;
///
/// let config = StoreConfig::new("/data/store.sqlite");
/// assert_eq!(config.backup_directory(), Path::new("/data"));
/// assert_eq!(config.log_level, "INFO");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the backing store file.
    pub filename: PathBuf,
    /// Where snapshots are written. Defaults to the directory of `filename`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_directory: Option<PathBuf>,
    /// Verbosity of per-statement engine diagnostics.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl StoreConfig {
    /// Creates a configuration for `filename` with default options.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            backup_directory: None,
            log_level: default_log_level(),
        }
    }

    /// Sets the snapshot directory.
    pub fn with_backup_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.backup_directory = Some(directory.into());
        self
    }

    /// Sets the engine diagnostic level (e.g. `"DEBUG"`).
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Loads configuration from a YAML file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] if the file cannot be read,
    /// [`CoreError::Yaml`] if parsing fails (including a missing `filename`),
    /// or [`CoreError::Config`] if `filename` is empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: StoreConfig = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Checks required options.
    pub fn validate(&self) -> Result<()> {
        if self.filename.as_os_str().is_empty() {
            return Err(CoreError::Config("filename is required".to_string()));
        }
        if self.filename.file_name().is_none() {
            return Err(CoreError::Config(format!(
                "filename '{}' does not name a file",
                self.filename.display()
            )));
        }
        Ok(())
    }

    /// Effective snapshot directory.
    pub fn backup_directory(&self) -> PathBuf {
        if let Some(directory) = &self.backup_directory {
            return directory.clone();
        }
        match self.filename.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_complete() {
        let yaml = r#"
filename: /tmp/a/store.sqlite
backup_directory: /tmp/b
log_level: DEBUG
"#;
        let config: StoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.filename, PathBuf::from("/tmp/a/store.sqlite"));
        assert_eq!(config.backup_directory(), PathBuf::from("/tmp/b"));
        assert_eq!(config.log_level, "DEBUG");
    }

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: StoreConfig = serde_yaml::from_str("filename: data/store.sqlite").unwrap();
        assert_eq!(config.backup_directory(), PathBuf::from("data"));
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_missing_filename_is_rejected() {
        let parsed: std::result::Result<StoreConfig, _> = serde_yaml::from_str("log_level: INFO");
        assert!(parsed.is_err());

        let empty = StoreConfig::new("");
        assert!(matches!(empty.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_bare_filename_backs_up_to_current_directory() {
        let config = StoreConfig::new("store.sqlite");
        assert_eq!(config.backup_directory(), PathBuf::from("."));
    }

    #[test]
    fn test_load_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yml");

        let original = StoreConfig::new("/srv/store.sqlite")
            .with_backup_directory("/srv/backups")
            .with_log_level("WARN");
        original.save(&path).unwrap();

        let loaded = StoreConfig::load(&path).unwrap();
        assert_eq!(loaded.filename, original.filename);
        assert_eq!(loaded.backup_directory, original.backup_directory);
        assert_eq!(loaded.log_level, "WARN");
    }
}
