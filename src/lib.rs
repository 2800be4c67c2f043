//! # modfetch
//!
//! Download engine and local archive cache for Minecraft mod files.
//!
//! ## Pieces
//!
//! - [`Downloader`] - one persistent HTTP/1.1 connection to one server, draining prioritized
//!   [`Job`]s item by item. A higher-priority job preempts a running transfer, which is later
//!   resumed with a `Range` request.
//! - [`ArchiveExtractor`] - a background worker that unpacks a subtree of downloaded zip archives,
//!   usually fed through a [`Destination::Sink`].
//! - [`ArtifactCache`] - a content-addressed index of archives already on disk, so a file does
//!   not have to be downloaded again if any copy of it exists locally.
//!
//! ## Quick Start
//!
//! ```no_run
//! use modfetch::{Config, Destination, Downloader, Job, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let server = ServerConfig::from_url("https://edge.forgecdn.net", "/files/{}/{}/{filename}")?;
//!     let downloader = Downloader::spawn(server, config.download, config.retry);
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let job = Job::new("mods", 0);
//!     job.add(Destination::path("jei-1.2.jar"), ["4012", "345"])?;
//!     job.finalize();
//!     downloader.enqueue(job.clone()).await?;
//!
//!     let failures = job.join().await;
//!     assert!(failures.is_empty());
//!     downloader.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Content-addressed archive cache
pub mod cache;
/// Configuration types
pub mod config;
/// Cancellable block copy
pub mod copier;
/// Database persistence layer
pub mod db;
/// Priority-aware download worker
pub mod downloader;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Minimal HTTP/1.1 client
pub mod http;
/// Download jobs and their work items
pub mod job;
/// Progress reporting
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use cache::{
    ArtifactCache, AuthorityClient, Fingerprint, FingerprintEntry, HttpAuthorityClient,
    ScanReport, compute_fingerprint,
};
pub use config::{
    CacheConfig, Config, DownloadConfig, ExtractionConfig, PartialFilePolicy, RetryConfig,
    ServerConfig,
};
pub use db::{ArtifactRecord, Database, MergeSummary};
pub use downloader::Downloader;
pub use error::{CacheError, DatabaseError, Error, ExtractionError, HttpError, JobError, Result};
pub use extraction::{ArchiveExtractor, ExtractionRequest, ExtractionSummary, extract_subtree};
pub use job::{Destination, Job, JobBuilder};
pub use progress::{NoProgress, ProgressMode, ProgressReporter, SharedProgress, no_progress};
pub use types::{Event, Failure, JobId, JobStatus};
