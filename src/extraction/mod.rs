//! Archive extraction
//!
//! An [`ArchiveExtractor`] owns one background task that drains a FIFO of
//! [`ExtractCommand`]s and extracts one archive at a time on the blocking pool. Archives
//! usually arrive straight from a download job: [`ArchiveExtractor::sink`] builds a
//! [`Destination`] whose completed file is queued for extraction.
//!
//! A malformed archive is logged and skipped; the worker keeps serving later requests.

mod sanitize;
mod subtree;


pub use sanitize::sanitize_entry_name;
pub use subtree::{ExtractionSummary, extract_subtree};

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ExtractionConfig;
use crate::error::{Error, ExtractionError, Result};
use crate::job::Destination;
use crate::progress::SharedProgress;

/// Where an archive is read from
#[derive(Debug)]
pub enum ArchiveSource {
    /// An archive on disk
    Path(PathBuf),
    /// An open file, typically a staged download
    File(File),
}

impl ArchiveSource {
    fn describe(&self) -> String {
        match self {
            ArchiveSource::Path(path) => path.display().to_string(),
            ArchiveSource::File(_) => "<staged download>".to_string(),
        }
    }

    fn open(self) -> std::io::Result<File> {
        match self {
            ArchiveSource::Path(path) => File::open(path),
            ArchiveSource::File(file) => Ok(file),
        }
    }
}

/// One archive subtree to extract
#[derive(Debug)]
pub struct ExtractionRequest {
    /// The archive
    pub source: ArchiveSource,
    /// Directory inside the archive to extract; empty for everything
    pub prefix: String,
    /// Directory the subtree is written into
    pub output_dir: PathBuf,
}

impl ExtractionRequest {
    /// Extract `prefix` of the archive at `path` into `output_dir`
    pub fn from_path(
        path: impl Into<PathBuf>,
        prefix: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: ArchiveSource::Path(path.into()),
            prefix: prefix.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Extract `prefix` of an already open archive into `output_dir`
    pub fn from_file(file: File, prefix: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: ArchiveSource::File(file),
            prefix: prefix.into(),
            output_dir: output_dir.into(),
        }
    }
}

/// Message understood by the extractor task
#[derive(Debug)]
pub enum ExtractCommand {
    /// Extract an archive, optionally reporting the outcome
    Extract {
        /// What to extract
        request: ExtractionRequest,
        /// Receives the outcome once the archive has been processed
        reply: Option<oneshot::Sender<Result<ExtractionSummary>>>,
    },
    /// Stop after the commands queued before this one
    Stop,
}

/// Handle to the extraction worker
///
/// Cloning yields another handle to the same worker.
#[derive(Clone)]
pub struct ArchiveExtractor {
    tx: mpsc::UnboundedSender<ExtractCommand>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl ArchiveExtractor {
    /// Start the worker; must be called from within a tokio runtime
    pub fn spawn(config: ExtractionConfig, progress: SharedProgress) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, config, progress));
        Self {
            tx,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    /// Queue `request` without waiting for it
    pub fn submit(&self, request: ExtractionRequest) -> Result<()> {
        self.tx
            .send(ExtractCommand::Extract {
                request,
                reply: None,
            })
            .map_err(|_| Error::ShuttingDown)
    }

    /// Queue `request` and wait until it has been extracted
    pub async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionSummary> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ExtractCommand::Extract {
                request,
                reply: Some(reply),
            })
            .map_err(|_| Error::ShuttingDown)?;
        rx.await.map_err(|_| {
            Error::Extraction(ExtractionError::Aborted(
                "extractor stopped before the archive was processed".into(),
            ))
        })?
    }

    /// A download destination whose completed file is extracted
    ///
    /// The subtree `prefix` of the downloaded archive is written into `output_dir` once the
    /// download finishes.
    pub fn sink(&self, prefix: impl Into<String>, output_dir: impl Into<PathBuf>) -> Destination {
        let tx = self.tx.clone();
        let prefix = prefix.into();
        let output_dir = output_dir.into();
        Destination::sink(move |file| {
            let request = ExtractionRequest::from_file(file, prefix, output_dir);
            if tx
                .send(ExtractCommand::Extract {
                    request,
                    reply: None,
                })
                .is_err()
            {
                tracing::warn!("extractor stopped, dropping downloaded archive");
            }
        })
    }

    /// Let queued requests finish, then stop the worker
    pub async fn stop(&self) -> Result<()> {
        // Err means the worker is already gone
        self.tx.send(ExtractCommand::Stop).ok();

        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "extractor task failed");
        }
        Ok(())
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<ExtractCommand>,
    config: ExtractionConfig,
    progress: SharedProgress,
) {
    tracing::debug!("extractor started");

    while let Some(command) = rx.recv().await {
        let (request, reply) = match command {
            ExtractCommand::Stop => break,
            ExtractCommand::Extract { request, reply } => (request, reply),
        };

        let label = request.source.describe();
        let result = {
            let label = label.clone();
            let progress = progress.clone();
            let buffer_size = config.buffer_size;
            tokio::task::spawn_blocking(move || {
                let ExtractionRequest {
                    source,
                    prefix,
                    output_dir,
                } = request;
                let file = source.open()?;
                subtree::extract_labeled(
                    file,
                    &label,
                    &prefix,
                    &output_dir,
                    progress.as_ref(),
                    buffer_size,
                )
            })
            .await
            .unwrap_or_else(|e| Err(ExtractionError::Aborted(e.to_string()).into()))
        };

        match &result {
            Ok(summary) => tracing::info!(
                archive = %label,
                files = summary.files.len(),
                bytes = summary.bytes,
                "archive extracted"
            ),
            Err(e) => tracing::warn!(archive = %label, error = %e, "skipping archive"),
        }

        if let Some(reply) = reply {
            // The requester may have given up waiting
            reply.send(result).ok();
        }
    }

    tracing::debug!("extractor stopped");
}
