//! Content-addressed cache of mod archives already on disk
//!
//! Archives are identified by their [`Fingerprint`], so a jar that was re-signed or
//! recompressed still matches. The cache remembers every local copy of each archive it has been
//! told about (directory scans, finished download jobs) and [`procure`](ArtifactCache::procure)s
//! one of them into an output directory instead of downloading it again: hard link first,
//! plain copy if no candidate can be linked.
//!
//! Authoritative per-artifact metadata lives next to the local copies. It only ever comes from
//! an [`AuthorityClient`], and merging it is conflict-checked: one field with two different
//! values is treated as corruption.

mod authority;
mod fingerprint;
mod links;


pub use authority::{AuthorityClient, HttpAuthorityClient};
pub use fingerprint::{Fingerprint, FingerprintEntry, compute_fingerprint};

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::config::{CacheConfig, RetryConfig};
use crate::db::{ArtifactRecord, Database, MergeSummary};
use crate::error::{CacheError, Error, Result};
use crate::job::Job;
use crate::retry::with_retry;

/// What a directory scan found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files with a scanned extension that were inspected
    pub scanned: usize,
    /// Newly registered local copies
    pub registered: usize,
    /// Files that were already registered, possibly under another path
    pub already_known: usize,
    /// Files that are not valid archives
    pub invalid: usize,
    /// Files or directories that could not be read
    pub errors: usize,
}

/// Result of offering one file to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    Registered,
    AlreadyKnown,
    Invalid,
}

/// Persistent artifact cache
pub struct ArtifactCache {
    db: Database,
    config: CacheConfig,
    retry: RetryConfig,
    /// Fingerprint digest to candidate paths, in registration order
    local: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl ArtifactCache {
    /// Open (or create) the cache database and load the known local copies
    pub async fn open(config: CacheConfig, retry: RetryConfig) -> Result<Self> {
        let db = Database::new(&config.database_path).await?;

        let mut local: HashMap<String, Vec<PathBuf>> = HashMap::new();
        let rows = db.list_local_copies().await?;
        let copies = rows.len();
        for row in rows {
            let path = row.path_buf();
            local.entry(row.fingerprint).or_default().push(path);
        }

        tracing::info!(
            database = %config.database_path.display(),
            artifacts = local.len(),
            copies,
            "artifact cache opened"
        );

        Ok(Self {
            db,
            config,
            retry,
            local: Mutex::new(local),
        })
    }

    /// The underlying database
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Close the database
    pub async fn close(self) {
        self.db.close().await;
    }

    /// Fingerprint the archive at `path` using the configured entry filter
    pub async fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint> {
        let owned = path.to_path_buf();
        let extension = self.config.fingerprint_extension.clone();
        let computed = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&owned)?;
            compute_fingerprint(io::BufReader::new(file), extension.as_deref())
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e.to_string())))?;

        computed.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Error::Cache(CacheError::InvalidArchive {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
            _ => Error::Io(e),
        })
    }

    /// Remember `path` as a copy of the archive it contains
    ///
    /// The fingerprint is computed when not supplied. A file that is not a valid archive is
    /// logged and ignored. Returns true if the copy was new, false if it was invalid or the
    /// same file (by identity, not by path) was already registered for this fingerprint.
    pub async fn add_local_copy(&self, path: &Path, fingerprint: Option<&Fingerprint>) -> Result<bool> {
        Ok(self.offer(path, fingerprint).await? == Offer::Registered)
    }

    async fn offer(&self, path: &Path, fingerprint: Option<&Fingerprint>) -> Result<Offer> {
        let path = std::path::absolute(path)?;

        let computed;
        let fingerprint = match fingerprint {
            Some(fingerprint) => fingerprint,
            None => match self.fingerprint_file(&path).await {
                Ok(fingerprint) => {
                    computed = fingerprint;
                    &computed
                }
                Err(Error::Cache(CacheError::InvalidArchive { path, reason })) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "not a valid archive, skipping");
                    return Ok(Offer::Invalid);
                }
                Err(e) => return Err(e),
            },
        };

        let mut local = self.local.lock().await;
        let candidates = local.entry(fingerprint.digest().to_string()).or_default();
        if candidates
            .iter()
            .any(|known| *known == path || links::same_file(known, &path))
        {
            return Ok(Offer::AlreadyKnown);
        }

        self.db.insert_local_copy(fingerprint.digest(), &path).await?;
        candidates.push(path.clone());
        tracing::debug!(
            path = %path.display(),
            fingerprint = %fingerprint,
            copies = candidates.len(),
            "local copy registered"
        );
        Ok(Offer::Registered)
    }

    /// Known local copies of an archive, in registration order
    pub async fn candidates(&self, fingerprint: &Fingerprint) -> Vec<PathBuf> {
        self.local
            .lock()
            .await
            .get(fingerprint.digest())
            .cloned()
            .unwrap_or_default()
    }

    /// Place a copy of the archive into `output_dir`
    ///
    /// Returns `None`, without creating `output_dir`, when no copy is known. Otherwise each
    /// candidate is hard-linked in turn as `output_dir/<its file name>`; if none can be linked
    /// the first one that can be read is copied. Candidates found missing along the way are
    /// forgotten even when another one was placed, and so is the whole entry once no candidate
    /// is left.
    pub async fn procure(&self, fingerprint: &Fingerprint, output_dir: &Path) -> Result<Option<PathBuf>> {
        let digest = fingerprint.digest();
        let mut local = self.local.lock().await;
        let candidates = match local.get(digest) {
            Some(candidates) if !candidates.is_empty() => candidates.clone(),
            _ => return Ok(None),
        };

        std::fs::create_dir_all(output_dir)?;

        let mut vanished = Vec::new();
        let mut placed = None;
        for candidate in &candidates {
            let Some(dest) = links::destination_for(candidate, output_dir) else {
                continue;
            };
            match links::link(candidate, &dest) {
                Ok(()) => {
                    tracing::info!(
                        source = %candidate.display(),
                        path = %dest.display(),
                        "linked cached archive"
                    );
                    placed = Some(dest);
                    break;
                }
                Err(_) if !candidate.exists() => vanished.push(candidate.clone()),
                Err(e) => tracing::debug!(
                    source = %candidate.display(),
                    error = %e,
                    "cannot link cached archive"
                ),
            }
        }

        if placed.is_none() {
            let survivors: Vec<PathBuf> = candidates
                .iter()
                .filter(|candidate| !vanished.contains(*candidate))
                .cloned()
                .collect();
            for candidate in &survivors {
                let Some(dest) = links::destination_for(candidate, output_dir) else {
                    continue;
                };
                match links::copy(candidate, &dest) {
                    Ok(_) => {
                        tracing::info!(
                            source = %candidate.display(),
                            path = %dest.display(),
                            "copied cached archive"
                        );
                        placed = Some(dest);
                        break;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        vanished.push(candidate.clone())
                    }
                    Err(e) => tracing::warn!(
                        source = %candidate.display(),
                        error = %e,
                        "cannot copy cached archive"
                    ),
                }
            }
        }

        for path in &vanished {
            tracing::warn!(path = %path.display(), fingerprint = %digest, "pruning vanished copy");
            self.db.remove_local_copy(path).await?;
        }
        if let Some(remaining) = local.get_mut(digest) {
            remaining.retain(|path| !vanished.contains(path));
            if remaining.is_empty() {
                local.remove(digest);
                tracing::warn!(
                    fingerprint = %digest,
                    "every known copy of this archive has disappeared"
                );
            }
        }

        Ok(placed)
    }

    /// Register every archive below `dir`
    ///
    /// Walks the directory tree and offers each file whose extension is one of
    /// [`CacheConfig::scan_extensions`]. Unreadable entries and invalid archives are counted and
    /// skipped.
    pub async fn scan_directory(&self, dir: &Path) -> Result<ScanReport> {
        let root = dir.to_path_buf();
        let extensions = self.config.scan_extensions.clone();
        let (files, walk_errors) = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let mut errors = 0;
            for entry in walkdir::WalkDir::new(&root) {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        if has_extension(entry.path(), &extensions) {
                            files.push(entry.into_path());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot read directory entry");
                        errors += 1;
                    }
                }
            }
            (files, errors)
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e.to_string())))?;

        let mut report = ScanReport {
            errors: walk_errors,
            ..Default::default()
        };
        for file in files {
            report.scanned += 1;
            match self.offer(&file, None).await {
                Ok(Offer::Registered) => report.registered += 1,
                Ok(Offer::AlreadyKnown) => report.already_known += 1,
                Ok(Offer::Invalid) => report.invalid += 1,
                Err(e @ (Error::Io(_) | Error::Cache(_))) => {
                    tracing::warn!(path = %file.display(), error = %e, "cannot register file");
                    report.errors += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            dir = %dir.display(),
            scanned = report.scanned,
            registered = report.registered,
            already_known = report.already_known,
            invalid = report.invalid,
            errors = report.errors,
            "directory scanned"
        );
        Ok(report)
    }

    /// Register the archives a finished job downloaded
    ///
    /// Only completed `Path` destinations with a scanned extension are considered. Returns the
    /// number of newly registered copies.
    pub async fn register_job_outputs(&self, job: &Job) -> Result<usize> {
        let mut registered = 0;
        for path in job.completed_paths() {
            if !has_extension(&path, &self.config.scan_extensions) {
                continue;
            }
            if self.offer(&path, None).await? == Offer::Registered {
                registered += 1;
            }
        }
        tracing::debug!(job_id = %job.id(), registered, "job outputs registered");
        Ok(registered)
    }

    /// Merge authoritative records; any conflicting field aborts the whole merge
    pub async fn merge_authoritative(&self, records: &[ArtifactRecord]) -> Result<MergeSummary> {
        let summary = self.db.merge_artifacts(records).await?;
        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "authoritative metadata merged"
        );
        Ok(summary)
    }

    /// Fetch records from `client`, retrying transient failures, and merge them
    pub async fn update_authoritative(&self, client: &dyn AuthorityClient) -> Result<MergeSummary> {
        let records = with_retry(&self.retry, || client.fetch_records()).await?;
        self.merge_authoritative(&records).await
    }

    /// Authoritative metadata for an archive, if any
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ArtifactRecord>> {
        self.db.get_artifact(fingerprint.digest()).await
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
}
