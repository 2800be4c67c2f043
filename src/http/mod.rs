//! Minimal HTTP/1.1 client connection
//!
//! One [`HttpConnection`] talks to one server over one persistent socket. Requests can be
//! pipelined: [`HttpConnection::send`] only writes, and responses are read back in order with
//! [`HttpConnection::read_head`] followed by [`HttpConnection::body`]. The connection remembers
//! every request that has been written but not yet answered; when the socket dies it reconnects
//! (with [`RetryConfig`] backoff) and writes those requests again before reading on.

mod body;
mod stream;

pub use body::{BodyReader, Framing};

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::{RetryConfig, ServerConfig};
use crate::error::{Error, HttpError, Result};
use crate::retry::{IsRetryable, with_retry};
use stream::MaybeTlsStream;

/// Largest response head accepted, in bytes
const MAX_HEAD: usize = 64 * 1024;

/// A `GET` request for one work item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Absolute request path including the query string
    pub path: String,
    /// Resume offset; emits `Range: bytes=<offset>-` when set
    pub range_from: Option<u64>,
}

impl Request {
    /// Plain `GET` of `path`
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            range_from: None,
        }
    }

    /// Ask for the bytes from `offset` to the end
    pub fn with_range_from(mut self, offset: u64) -> Self {
        self.range_from = Some(offset);
        self
    }

    /// Serialize the request head
    pub fn encode(&self, host_header: &str, user_agent: &str) -> Vec<u8> {
        let mut head = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             User-Agent: {}\r\n\
             Connection: keep-alive\r\n",
            self.path, host_header, user_agent
        );
        if let Some(offset) = self.range_from {
            head.push_str(&format!("Range: bytes={offset}-\r\n"));
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}

/// Status line and headers of a response
#[derive(Clone, Debug)]
pub struct ResponseHead {
    /// HTTP status code
    pub status: u16,
    /// Header fields in arrival order, names lowercased
    pub headers: Vec<(String, String)>,
    /// How the body is delimited
    pub framing: Framing,
    /// Whether the connection may carry further responses after this one
    pub keep_alive: bool,
}

impl ResponseHead {
    /// First value of the header `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one response head from `reader`
///
/// Interim `1xx` responses are skipped. End of stream before the first byte of the status
/// line is reported as [`HttpError::ConnectionClosed`].
pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    loop {
        let head = read_single_head(reader).await?;
        if (100..200).contains(&head.status) && head.status != 101 {
            tracing::trace!(status = head.status, "skipping interim response");
            continue;
        }
        return Ok(head);
    }
}

async fn read_single_head<R>(reader: &mut R) -> Result<ResponseHead>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut consumed = 0usize;
    let mut line = Vec::new();

    // Tolerate stray CRLFs between responses
    let status_line = loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(HttpError::ConnectionClosed.into());
        }
        consumed += n;
        if consumed > MAX_HEAD {
            return Err(malformed("response head too large"));
        }
        let text = trim_line(&line);
        if !text.is_empty() {
            break text;
        }
    };

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let minor = match version {
        "HTTP/1.1" => 1,
        "HTTP/1.0" => 0,
        _ => return Err(malformed(&format!("unexpected status line {status_line:?}"))),
    };
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| malformed(&format!("unexpected status line {status_line:?}")))?;

    let mut headers = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(HttpError::ConnectionClosed.into());
        }
        consumed += n;
        if consumed > MAX_HEAD {
            return Err(malformed("response head too large"));
        }
        let text = trim_line(&line);
        if text.is_empty() {
            break;
        }
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| malformed(&format!("invalid header line {text:?}")))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let mut head = ResponseHead {
        status,
        headers,
        framing: Framing::UntilClose,
        keep_alive: minor == 1,
    };

    if let Some(connection) = head.header("connection") {
        let tokens = connection.to_ascii_lowercase();
        if tokens.split(',').any(|t| t.trim() == "close") {
            head.keep_alive = false;
        } else if tokens.split(',').any(|t| t.trim() == "keep-alive") {
            head.keep_alive = true;
        }
    }

    head.framing = if status == 204 || status == 304 || (100..200).contains(&status) {
        Framing::Empty
    } else if head
        .header("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    {
        Framing::Chunked
    } else if let Some(len) = head.header("content-length") {
        let len = len
            .parse::<u64>()
            .map_err(|_| malformed(&format!("invalid Content-Length {len:?}")))?;
        Framing::Length(len)
    } else {
        Framing::UntilClose
    };

    if head.framing == Framing::UntilClose {
        head.keep_alive = false;
    }

    Ok(head)
}

fn trim_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

fn malformed(msg: &str) -> Error {
    HttpError::MalformedResponse(msg.to_string()).into()
}

/// A persistent, optionally pipelined HTTP/1.1 connection to one server
pub struct HttpConnection {
    host: String,
    port: u16,
    tls: bool,
    host_header: String,
    user_agent: String,
    connect_timeout: Duration,
    retry: RetryConfig,
    stream: Option<BufReader<MaybeTlsStream>>,
    in_flight: VecDeque<Vec<u8>>,
}

impl HttpConnection {
    /// Create a connection handle; the socket is opened lazily by the first [`send`](Self::send)
    pub fn new(
        server: &ServerConfig,
        user_agent: impl Into<String>,
        connect_timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        let default_port = if server.tls { 443 } else { 80 };
        let host_header = if server.port == default_port {
            server.host.clone()
        } else {
            format!("{}:{}", server.host, server.port)
        };

        Self {
            host: server.host.clone(),
            port: server.port,
            tls: server.tls,
            host_header,
            user_agent: user_agent.into(),
            connect_timeout,
            retry,
            stream: None,
            in_flight: VecDeque::new(),
        }
    }

    /// Number of requests written whose responses have not been fully read
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a socket is currently open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Submit `request` without waiting for the response
    ///
    /// The request is written immediately when a socket is open. Otherwise (or when the write
    /// fails) it stays queued and goes out with the replay performed by the next
    /// [`read_head`](Self::read_head), which never happens while an earlier body is still
    /// being read.
    pub async fn send(&mut self, request: &Request) {
        let bytes = request.encode(&self.host_header, &self.user_agent);

        if let Some(stream) = self.stream.as_mut() {
            let written = async {
                stream.get_mut().write_all(&bytes).await?;
                stream.get_mut().flush().await
            }
            .await;
            if let Err(e) = written {
                tracing::debug!(error = %e, path = %request.path, "write failed, dropping connection");
                self.stream = None;
            }
        }

        self.in_flight.push_back(bytes);
    }

    /// Read the head of the oldest outstanding response
    ///
    /// If the server closed the connection before answering, the outstanding requests are
    /// replayed on a fresh connection, up to `max_attempts` times.
    pub async fn read_head(&mut self) -> Result<ResponseHead> {
        if self.in_flight.is_empty() {
            return Err(malformed("no request in flight"));
        }

        let mut replays = 0u32;
        loop {
            if self.stream.is_none() {
                self.reconnect().await?;
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(HttpError::ConnectionClosed.into());
            };

            match read_response_head(stream).await {
                Ok(head) => return Ok(head),
                Err(e) => {
                    self.stream = None;
                    if !e.is_retryable() || replays >= self.retry.max_attempts {
                        return Err(e);
                    }
                    replays += 1;
                    tracing::debug!(
                        error = %e,
                        replays,
                        outstanding = self.in_flight.len(),
                        "connection lost before response, replaying requests"
                    );
                }
            }
        }
    }

    /// Body of the response whose head was just read
    pub fn body(&mut self, head: &ResponseHead) -> Result<BodyReader<'_>> {
        let stream = self.stream.as_mut().ok_or(HttpError::ConnectionClosed)?;
        Ok(BodyReader::new(stream, head.framing))
    }

    /// Retire the oldest outstanding request after its body was consumed
    ///
    /// When `reusable` is false the socket is closed; requests still outstanding are replayed
    /// on the next read.
    pub fn complete(&mut self, reusable: bool) {
        self.in_flight.pop_front();
        if !reusable {
            self.stream = None;
        }
    }

    /// Retire the oldest outstanding request without consuming its body
    pub fn abandon(&mut self) {
        self.in_flight.pop_front();
        self.stream = None;
    }

    /// Close the socket and forget every outstanding request
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.stream = None;
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.stream = None;

        let host = self.host.clone();
        let (port, tls, timeout) = (self.port, self.tls, self.connect_timeout);
        let socket = with_retry(&self.retry, || stream::connect(&host, port, tls, timeout)).await?;

        let mut stream = BufReader::new(socket);
        for request in &self.in_flight {
            stream.get_mut().write_all(request).await?;
        }
        stream.get_mut().flush().await?;

        tracing::debug!(
            host = %self.host,
            port = self.port,
            replayed = self.in_flight.len(),
            "connected"
        );
        self.stream = Some(stream);
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
