//! Store error types.

use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/registrar.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A uniqueness constraint rejected the write.
    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// A stored row could not be decoded into a domain record.
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        entity: &'static str,
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Maps a write error, turning unique violations into [`StoreError::Duplicate`].
    pub(crate) fn from_write(e: sqlx::Error, entity: &'static str, key: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Duplicate {
                    entity,
                    key: key.to_string(),
                };
            }
        }
        StoreError::Query(e)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}
