//! Authoritative artifact metadata.

use crate::error::{CacheError, DatabaseError};
use crate::{Error, Result};

use super::{ArtifactRecord, Database};

/// Outcome of [`Database::merge_artifacts`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Records that were not known before
    pub inserted: usize,
    /// Known records that gained at least one field
    pub updated: usize,
    /// Known records the remote had nothing new for
    pub unchanged: usize,
}

/// Combine one field: whichever side knows it wins, and both sides knowing different
/// values is a conflict
fn merge_field<T>(
    fingerprint: &str,
    field: &'static str,
    local: &Option<T>,
    remote: &Option<T>,
) -> std::result::Result<Option<T>, CacheError>
where
    T: PartialEq + Clone + std::fmt::Debug,
{
    match (local, remote) {
        (Some(l), Some(r)) if l != r => Err(CacheError::MetadataConflict {
            fingerprint: fingerprint.to_string(),
            field,
            local: format!("{l:?}"),
            remote: format!("{r:?}"),
        }),
        (Some(l), _) => Ok(Some(l.clone())),
        (None, r) => Ok(r.clone()),
    }
}

impl ArtifactRecord {
    /// Fill unknown fields of `self` from `remote`
    ///
    /// Fails on the first field both records populate with different values.
    pub fn merged_with(&self, remote: &ArtifactRecord) -> std::result::Result<Self, CacheError> {
        let fp = self.fingerprint.as_str();
        Ok(Self {
            fingerprint: self.fingerprint.clone(),
            canonical_filename: merge_field(
                fp,
                "canonical_filename",
                &self.canonical_filename,
                &remote.canonical_filename,
            )?,
            description: merge_field(fp, "description", &self.description, &remote.description)?,
            modid: merge_field(fp, "modid", &self.modid, &remote.modid)?,
            version: merge_field(fp, "version", &self.version, &remote.version)?,
            mc_versions: merge_field(fp, "mc_versions", &self.mc_versions, &remote.mc_versions)?,
            loader: merge_field(fp, "loader", &self.loader, &remote.loader)?,
            dependencies: merge_field(
                fp,
                "dependencies",
                &self.dependencies,
                &remote.dependencies,
            )?,
            recommendations: merge_field(
                fp,
                "recommendations",
                &self.recommendations,
                &remote.recommendations,
            )?,
            canonical_sha256: merge_field(
                fp,
                "canonical_sha256",
                &self.canonical_sha256,
                &remote.canonical_sha256,
            )?,
            canonical_filesize: merge_field(
                fp,
                "canonical_filesize",
                &self.canonical_filesize,
                &remote.canonical_filesize,
            )?,
        })
    }
}

const SELECT_ARTIFACT: &str = r#"
    SELECT fingerprint, canonical_filename, description, modid, version, mc_versions, loader,
           dependencies, recommendations, canonical_sha256, canonical_filesize
    FROM artifacts WHERE fingerprint = ?
"#;

impl Database {
    /// Get the metadata stored for a fingerprint digest
    pub async fn get_artifact(&self, fingerprint: &str) -> Result<Option<ArtifactRecord>> {
        let record = sqlx::query_as::<_, ArtifactRecord>(SELECT_ARTIFACT)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get artifact: {}",
                    e
                )))
            })?;

        Ok(record)
    }

    /// Number of artifacts with metadata
    pub async fn count_artifacts(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count artifacts: {}",
                    e
                )))
            })?;

        Ok(count)
    }

    /// Merge remote records into the artifacts table
    ///
    /// Runs in one transaction: a [`CacheError::MetadataConflict`] on any record leaves the
    /// table exactly as it was.
    pub async fn merge_artifacts(&self, records: &[ArtifactRecord]) -> Result<MergeSummary> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut summary = MergeSummary::default();
        let now = chrono::Utc::now().timestamp();

        for remote in records {
            let local = sqlx::query_as::<_, ArtifactRecord>(SELECT_ARTIFACT)
                .bind(&remote.fingerprint)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read artifact: {}",
                        e
                    )))
                })?;

            let merged = match &local {
                // Dropping `tx` on this early return rolls the transaction back
                Some(local) => local.merged_with(remote)?,
                None => remote.clone(),
            };

            match &local {
                None => summary.inserted += 1,
                Some(local) if *local == merged => {
                    summary.unchanged += 1;
                    continue;
                }
                Some(_) => summary.updated += 1,
            }

            sqlx::query(
                r#"
                INSERT INTO artifacts (
                    fingerprint, canonical_filename, description, modid, version, mc_versions,
                    loader, dependencies, recommendations, canonical_sha256, canonical_filesize,
                    updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(fingerprint) DO UPDATE SET
                    canonical_filename = excluded.canonical_filename,
                    description = excluded.description,
                    modid = excluded.modid,
                    version = excluded.version,
                    mc_versions = excluded.mc_versions,
                    loader = excluded.loader,
                    dependencies = excluded.dependencies,
                    recommendations = excluded.recommendations,
                    canonical_sha256 = excluded.canonical_sha256,
                    canonical_filesize = excluded.canonical_filesize,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&merged.fingerprint)
            .bind(&merged.canonical_filename)
            .bind(&merged.description)
            .bind(&merged.modid)
            .bind(&merged.version)
            .bind(&merged.mc_versions)
            .bind(&merged.loader)
            .bind(&merged.dependencies)
            .bind(&merged.recommendations)
            .bind(&merged.canonical_sha256)
            .bind(merged.canonical_filesize)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to upsert artifact: {}",
                    e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit artifact merge: {}",
                e
            )))
        })?;

        Ok(summary)
    }
}
