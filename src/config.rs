//! Configuration types for modfetch

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Main configuration
///
/// Fields are organized into sub-configs, one per component:
/// - [`download`](DownloadConfig): staging, block size, request headers, cancellation policy
/// - [`retry`](RetryConfig): reconnection and authority fetch backoff
/// - [`cache`](CacheConfig): artifact database and scan settings
/// - [`extraction`](ExtractionConfig): archive extraction worker
///
/// Servers are configured separately, one [`ServerConfig`] per downloader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download worker settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Backoff for reconnects and remote metadata fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Artifact cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Archive extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// One remote server served by one [`Downloader`](crate::downloader::Downloader)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server hostname (e.g. "edge.forgecdn.net")
    pub host: String,

    /// Server port (default: 443)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use TLS (default: true)
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Request path template, e.g. "/files/{}/{}/{filename}"
    ///
    /// Each `{}` is replaced by the next request parameter of a work item (percent-encoded),
    /// `{filename}` by the file name of the item's destination path.
    pub url_template: String,

    /// Whether the server honors `Range: bytes=N-` (default: true)
    ///
    /// When false, partially downloaded files are restarted from zero.
    #[serde(default = "default_true")]
    pub supports_range: bool,

    /// Whether the server tolerates a second request before the first response is read
    /// (default: true)
    ///
    /// Some daemons abort the connection or emit garbage instead of headers when requests are
    /// pipelined. Set to false to strictly alternate requests and responses.
    #[serde(default = "default_true")]
    pub supports_pipelining: bool,
}

impl ServerConfig {
    /// Build a server config from a base URL and a path template
    ///
    /// The scheme selects TLS and the default port.
    pub fn from_url(base: &str, url_template: impl Into<String>) -> Result<Self> {
        let url = url::Url::parse(base).map_err(|e| Error::Config {
            message: format!("invalid server URL {base:?}: {e}"),
            key: Some("host".into()),
        })?;

        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(Error::Config {
                    message: format!("unsupported scheme {other:?}"),
                    key: Some("tls".into()),
                });
            }
        };

        let host = url.host_str().ok_or_else(|| Error::Config {
            message: format!("server URL {base:?} has no host"),
            key: Some("host".into()),
        })?;

        Ok(Self {
            host: host.to_string(),
            port: url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 }),
            tls,
            url_template: url_template.into(),
            supports_range: true,
            supports_pipelining: true,
        })
    }
}

/// What to do with `.part` files left behind by a cancelled job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFilePolicy {
    /// Leave partial files on disk so a later job can resume them (default)
    #[default]
    Keep,
    /// Remove the partial file of the item that was in flight when the job was cancelled
    Delete,
}

/// Download worker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory for anonymous staging files of sink destinations (default: system temp dir)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Copy block size in bytes; also the cancellation granularity (default: 1 MiB)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Handling of partial files when a job is cancelled
    #[serde(default)]
    pub cancelled_partials: PartialFilePolicy,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Timeout for establishing a connection (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            block_size: default_block_size(),
            user_agent: default_user_agent(),
            cancelled_partials: PartialFilePolicy::default(),
            event_buffer: default_event_buffer(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Artifact cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path (default: "./modfetch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// File extensions picked up by directory scans (default: ["jar", "zip"])
    #[serde(default = "default_scan_extensions")]
    pub scan_extensions: Vec<String>,

    /// Restrict fingerprints to entries with this extension (e.g. "class")
    ///
    /// Must stay the same for the lifetime of a database, otherwise previously recorded
    /// fingerprints no longer match.
    #[serde(default)]
    pub fingerprint_extension: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scan_extensions: default_scan_extensions(),
            fingerprint_extension: None,
        }
    }
}

/// Archive extraction configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Write buffer size in bytes (default: 64 KiB)
    #[serde(default = "default_extract_buffer")]
    pub buffer_size: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_extract_buffer(),
        }
    }
}

fn default_port() -> u16 {
    443
}

fn default_true() -> bool {
    true
}

fn default_block_size() -> usize {
    1024 * 1024
}

fn default_user_agent() -> String {
    format!("modfetch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_event_buffer() -> usize {
    1000
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./modfetch.db")
}

fn default_scan_extensions() -> Vec<String> {
    vec!["jar".into(), "zip".into()]
}

fn default_extract_buffer() -> usize {
    64 * 1024
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
