//! Failures of the checkpoint database underneath the job store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening, migrating or querying the checkpoint database.
///
/// The store maps all of these to `StoreError::Database`, which the runner
/// treats as fatal for the job being driven.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A statement against the `jobs` or `items` tables failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The parent directory of `database_path` could not be created.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A job/item schema step could not be applied. Version 0 means the
    /// schema check itself was refused before any step ran.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A worker panicked while holding the shared connection.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_checkpoint_path() {
        let err = DatabaseError::Io {
            path: PathBuf::from("/var/lib/listforge/listforge.db"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let message = err.to_string();
        assert!(message.contains("/var/lib/listforge/listforge.db"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_migration_error_reports_version() {
        let err = DatabaseError::Migration {
            version: 2,
            reason: "duplicate column".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration failed at version 2: duplicate column"
        );
    }
}
