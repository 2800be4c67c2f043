//! Minimal keep-alive HTTP/1.1 file server
//!
//! Serves a fixed set of files, honors `Range: bytes=N-` and can trickle selected bodies out
//! slowly. Every request path is recorded in arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Served content
#[derive(Clone, Default)]
pub struct Files {
    bodies: HashMap<String, Vec<u8>>,
    slow: HashMap<String, (usize, Duration)>,
}

impl Files {
    /// Serve `body` at `path`
    pub fn file(mut self, path: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(path.to_string(), body);
        self
    }

    /// Write the body at `path` in `chunk`-byte pieces with `pause` in between
    pub fn slow(mut self, path: &str, chunk: usize, pause: Duration) -> Self {
        self.slow.insert(path.to_string(), (chunk, pause));
        self
    }
}

/// A running file server
pub struct FileServer {
    port: u16,
    paths: Arc<Mutex<Vec<(String, Option<u64>)>>>,
    task: JoinHandle<()>,
}

impl FileServer {
    /// Bind an ephemeral port and start serving
    pub async fn start(files: Files) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let files = Arc::new(files);

        let recorded = paths.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let files = files.clone();
                tokio::spawn(async move { serve(socket, &files, &recorded).await });
            }
        });

        Self { port, paths, task }
    }

    /// `http://127.0.0.1:<port>`
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Requested paths in arrival order
    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|(path, _)| path).collect()
    }

    /// Requested paths with the range offset they asked for
    pub fn requests(&self) -> Vec<(String, Option<u64>)> {
        self.paths.lock().unwrap().clone()
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, files: &Files, recorded: &Mutex<Vec<(String, Option<u64>)>>) {
    let mut reader = BufReader::new(socket);
    loop {
        let mut request_line = String::new();
        match reader.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let path = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();

        let mut range_from = None;
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.trim().eq_ignore_ascii_case("range")
            {
                range_from = value
                    .trim()
                    .strip_prefix("bytes=")
                    .and_then(|v| v.trim_end_matches('-').parse::<usize>().ok());
            }
        }
        recorded
            .lock()
            .unwrap()
            .push((path.clone(), range_from.map(|n| n as u64)));

        let socket = reader.get_mut();
        let written = match files.bodies.get(&path) {
            None => write_response(socket, "404 Not Found", b"not found", None).await,
            Some(body) => {
                let slow = files.slow.get(&path).copied();
                match range_from {
                    Some(offset) => {
                        let offset = offset.min(body.len());
                        write_response(socket, "206 Partial Content", &body[offset..], slow).await
                    }
                    None => write_response(socket, "200 OK", body, slow).await,
                }
            }
        };
        if written.is_err() {
            return;
        }
    }
}

async fn write_response(
    socket: &mut TcpStream,
    status: &str,
    body: &[u8],
    slow: Option<(usize, Duration)>,
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;

    let (chunk, pause) = slow.unwrap_or((64 * 1024, Duration::ZERO));
    for piece in body.chunks(chunk.max(1)) {
        socket.write_all(piece).await?;
        socket.flush().await?;
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    socket.flush().await
}
