//! Local copies of cached archives.

use crate::error::DatabaseError;
use crate::{Error, Result};
use std::path::Path;

use super::{Database, LocalCopyRow};

impl Database {
    /// Register `path` as a copy of the archive with the given fingerprint digest
    ///
    /// Returns false if the path was already registered.
    pub async fn insert_local_copy(&self, fingerprint: &str, path: &Path) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO local_copies (fingerprint, path, added_at)
            VALUES (?, ?, ?)
            ON CONFLICT(path) DO NOTHING
            "#,
        )
        .bind(fingerprint)
        .bind(path.to_string_lossy().as_ref())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert local copy: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Forget one registered path
    pub async fn remove_local_copy(&self, path: &Path) -> Result<()> {
        sqlx::query("DELETE FROM local_copies WHERE path = ?")
            .bind(path.to_string_lossy().as_ref())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to remove local copy: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// All registered copies, in registration order
    pub async fn list_local_copies(&self) -> Result<Vec<LocalCopyRow>> {
        let rows = sqlx::query_as::<_, LocalCopyRow>(
            "SELECT id, fingerprint, path, added_at FROM local_copies ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list local copies: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Copies of one archive, in registration order
    pub async fn local_copies_for(&self, fingerprint: &str) -> Result<Vec<LocalCopyRow>> {
        let rows = sqlx::query_as::<_, LocalCopyRow>(
            "SELECT id, fingerprint, path, added_at FROM local_copies WHERE fingerprint = ? ORDER BY id",
        )
        .bind(fingerprint)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get local copies: {}",
                e
            )))
        })?;

        Ok(rows)
    }
}
