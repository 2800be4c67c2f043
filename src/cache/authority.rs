//! Source of authoritative artifact metadata

use std::time::Duration;

use async_trait::async_trait;

use crate::db::ArtifactRecord;
use crate::error::{Error, Result};

/// Supplies authoritative [`ArtifactRecord`]s
///
/// This is the only way metadata enters the `artifacts` table. Records found by scanning the
/// local disk never do, since files lying around cannot be trusted to be pristine.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Fetch the full set of records the authority knows
    async fn fetch_records(&self) -> Result<Vec<ArtifactRecord>>;
}

/// Fetches records as a JSON array from one URL
pub struct HttpAuthorityClient {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthorityClient {
    /// Create a client for `url`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(url: impl Into<String>, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {e}"),
                key: None,
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The URL records are fetched from
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn fetch_records(&self) -> Result<Vec<ArtifactRecord>> {
        tracing::debug!(url = %self.url, "fetching authoritative metadata");
        let records = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ArtifactRecord>>()
            .await?;
        tracing::debug!(url = %self.url, records = records.len(), "authoritative metadata fetched");
        Ok(records)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one request with `status` and `body`, returning the base URL
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://127.0.0.1:{port}/modmeta.json")
    }

    #[tokio::test]
    async fn fetches_json_records() {
        let url = serve_once(
            "200 OK",
            r#"[{"fingerprint":"aa","modid":"jei","canonical_filesize":12},{"fingerprint":"bb"}]"#,
        )
        .await;
        let client = HttpAuthorityClient::new(url, "modfetch-test", Duration::from_secs(5)).unwrap();

        let records = client.fetch_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].modid.as_deref(), Some("jei"));
        assert_eq!(records[0].canonical_filesize, Some(12));
        assert_eq!(records[1], ArtifactRecord::new("bb"));
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let url = serve_once("503 Service Unavailable", "[]").await;
        let client = HttpAuthorityClient::new(url, "modfetch-test", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.fetch_records().await,
            Err(Error::Network(_))
        ));
    }
}
