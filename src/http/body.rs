//! Response body framing
//!
//! A [`BodyReader`] yields exactly the bytes of one response body and leaves the underlying
//! buffered stream positioned at the start of the next response, so the connection can be
//! reused for pipelined requests.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};

/// Longest chunk-size or trailer line accepted
const MAX_LINE: usize = 8 * 1024;

/// How the end of a response body is determined
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// No body (HEAD-style statuses such as 204 and 304)
    Empty,
    /// `Content-Length: n`
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body runs until the server closes the connection
    UntilClose,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Length(u64),
    UntilClose,
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailers,
    Done,
}

/// Streams one response body off a shared connection
pub struct BodyReader<'a> {
    inner: &'a mut (dyn AsyncBufRead + Send + Unpin),
    state: State,
    line: Vec<u8>,
}

impl<'a> BodyReader<'a> {
    /// Wrap `inner`, which must be positioned right after the response head
    pub fn new(inner: &'a mut (dyn AsyncBufRead + Send + Unpin), framing: Framing) -> Self {
        let state = match framing {
            Framing::Empty | Framing::Length(0) => State::Done,
            Framing::Length(n) => State::Length(n),
            Framing::Chunked => State::ChunkSize,
            Framing::UntilClose => State::UntilClose,
        };
        Self {
            inner,
            state,
            line: Vec::new(),
        }
    }

    /// Whether the whole body (including chunked trailers) has been consumed
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Read and discard the rest of the body
    pub async fn drain(&mut self) -> io::Result<u64> {
        tokio::io::copy(self, &mut tokio::io::sink()).await
    }

    fn poll_line(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<String>> {
        loop {
            let available = ready!(Pin::new(&mut *self.inner).poll_fill_buf(cx))?;
            if available.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside chunked body",
                )));
            }

            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };
            self.line.extend_from_slice(&available[..used]);
            Pin::new(&mut *self.inner).consume(used);

            if complete {
                let raw = std::mem::take(&mut self.line);
                let text = String::from_utf8_lossy(&raw);
                return Poll::Ready(Ok(text.trim_end_matches(['\r', '\n']).to_string()));
            }
            if self.line.len() > MAX_LINE {
                return Poll::Ready(Err(invalid_data("chunk line too long")));
            }
        }
    }

    /// Copy up to `limit` buffered bytes into `buf`; returns how many were copied
    fn poll_copy(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
        limit: u64,
    ) -> Poll<io::Result<usize>> {
        let available = ready!(Pin::new(&mut *self.inner).poll_fill_buf(cx))?;
        let n = available
            .len()
            .min(buf.remaining())
            .min(usize::try_from(limit).unwrap_or(usize::MAX));
        buf.put_slice(&available[..n]);
        Pin::new(&mut *self.inner).consume(n);
        Poll::Ready(Ok(n))
    }
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn parse_chunk_size(line: &str) -> io::Result<u64> {
    let digits = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(digits, 16)
        .map_err(|_| invalid_data(&format!("invalid chunk size line {line:?}")))
}

impl AsyncRead for BodyReader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match this.state {
                State::Done => return Poll::Ready(Ok(())),

                State::Length(remaining) => {
                    let n = ready!(this.poll_copy(cx, buf, remaining))?;
                    if n == 0 {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("connection closed with {remaining} body bytes outstanding"),
                        )));
                    }
                    let left = remaining - n as u64;
                    this.state = if left == 0 {
                        State::Done
                    } else {
                        State::Length(left)
                    };
                    return Poll::Ready(Ok(()));
                }

                State::UntilClose => {
                    let n = ready!(this.poll_copy(cx, buf, u64::MAX))?;
                    if n == 0 {
                        this.state = State::Done;
                    }
                    return Poll::Ready(Ok(()));
                }

                State::ChunkSize => {
                    let line = ready!(this.poll_line(cx))?;
                    this.state = match parse_chunk_size(&line)? {
                        0 => State::Trailers,
                        n => State::ChunkData(n),
                    };
                }

                State::ChunkData(remaining) => {
                    let n = ready!(this.poll_copy(cx, buf, remaining))?;
                    if n == 0 {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside chunk",
                        )));
                    }
                    let left = remaining - n as u64;
                    this.state = if left == 0 {
                        State::ChunkDataEnd
                    } else {
                        State::ChunkData(left)
                    };
                    return Poll::Ready(Ok(()));
                }

                State::ChunkDataEnd => {
                    let line = ready!(this.poll_line(cx))?;
                    if !line.is_empty() {
                        return Poll::Ready(Err(invalid_data("missing CRLF after chunk data")));
                    }
                    this.state = State::ChunkSize;
                }

                State::Trailers => {
                    let line = ready!(this.poll_line(cx))?;
                    if line.is_empty() {
                        this.state = State::Done;
                    }
                }
            }
        }
    }
}
