use super::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

async fn read_body(conn: &mut HttpConnection, head: &ResponseHead) -> (Vec<u8>, bool) {
    let mut body = conn.body(head).unwrap();
    let mut out = Vec::new();
    body.read_to_end(&mut out).await.unwrap();
    let done = body.is_done();
    (out, done)
}

/// Read one request head (up to the blank line) from a server-side socket
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = socket.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[test]
fn request_encoding_includes_range() {
    let req = Request::get("/files/1/2/a.jar").with_range_from(42);
    let text = String::from_utf8(req.encode("cdn.example", "modfetch/test")).unwrap();
    assert!(text.starts_with("GET /files/1/2/a.jar HTTP/1.1\r\n"));
    assert!(text.contains("Host: cdn.example\r\n"));
    assert!(text.contains("User-Agent: modfetch/test\r\n"));
    assert!(text.contains("Connection: keep-alive\r\n"));
    assert!(text.contains("Range: bytes=42-\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn request_without_range_has_no_range_header() {
    let text = String::from_utf8(Request::get("/x").encode("h", "ua")).unwrap();
    assert!(!text.contains("Range"));
}

#[tokio::test]
async fn parses_content_length_head() {
    let raw = b"HTTP/1.1 206 Partial Content\r\nContent-Length: 5\r\nX-Thing: a:b\r\n\r\nhello";
    let mut reader = &raw[..];
    let head = read_response_head(&mut reader).await.unwrap();
    assert_eq!(head.status, 206);
    assert_eq!(head.framing, Framing::Length(5));
    assert!(head.keep_alive);
    assert_eq!(head.header("x-thing"), Some("a:b"));
    assert_eq!(head.header("CONTENT-LENGTH"), Some("5"));
    assert_eq!(reader, b"hello");
}

#[tokio::test]
async fn connection_close_and_http10_disable_keep_alive() {
    let raw = b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
    let head = read_response_head(&mut &raw[..]).await.unwrap();
    assert!(!head.keep_alive);

    let raw = b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    let head = read_response_head(&mut &raw[..]).await.unwrap();
    assert!(!head.keep_alive);
}

#[tokio::test]
async fn missing_length_means_until_close() {
    let raw = b"HTTP/1.1 200 OK\r\n\r\nrest of stream";
    let mut reader = &raw[..];
    let head = read_response_head(&mut reader).await.unwrap();
    assert_eq!(head.framing, Framing::UntilClose);
    assert!(!head.keep_alive);

    let mut body = BodyReader::new(&mut reader, head.framing);
    let mut out = Vec::new();
    body.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"rest of stream");
    assert!(body.is_done());
}

#[tokio::test]
async fn interim_responses_are_skipped() {
    let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
    let head = read_response_head(&mut &raw[..]).await.unwrap();
    assert_eq!(head.status, 404);
    assert_eq!(head.framing, Framing::Length(0));
}

#[tokio::test]
async fn eof_before_head_is_connection_closed() {
    let raw: &[u8] = b"";
    let err = read_response_head(&mut &raw[..]).await.unwrap_err();
    assert!(matches!(err, Error::Http(HttpError::ConnectionClosed)));
}

#[tokio::test]
async fn garbage_is_malformed() {
    let raw = b"SSH-2.0-OpenSSH\r\n\r\n";
    let err = read_response_head(&mut &raw[..]).await.unwrap_err();
    assert!(matches!(err, Error::Http(HttpError::MalformedResponse(_))));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn chunked_body_stops_at_terminator() {
    let raw = b"4\r\nWiki\r\n6;ext=1\r\npedia \r\n0\r\nX-Trailer: yes\r\n\r\nHTTP/1.1 200 OK";
    let mut reader = &raw[..];
    let mut out = Vec::new();
    {
        let mut body = BodyReader::new(&mut reader, Framing::Chunked);
        body.read_to_end(&mut out).await.unwrap();
        assert!(body.is_done());
    }
    assert_eq!(out, b"Wikipedia ");
    assert_eq!(reader, b"HTTP/1.1 200 OK");
}

#[tokio::test]
async fn truncated_length_body_errors() {
    let raw = b"abc";
    let mut reader = &raw[..];
    let mut body = BodyReader::new(&mut reader, Framing::Length(10));
    let mut out = Vec::new();
    let err = body.read_to_end(&mut out).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    assert!(!body.is_done());
}

#[tokio::test]
async fn drain_leaves_reader_at_next_response() {
    let raw = b"0123456789NEXT";
    let mut reader = &raw[..];
    {
        let mut body = BodyReader::new(&mut reader, Framing::Length(10));
        assert_eq!(body.drain().await.unwrap(), 10);
    }
    assert_eq!(reader, b"NEXT");
}

#[tokio::test]
async fn pipelined_requests_share_one_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let first = read_request(&mut socket).await;
        let second = read_request(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none")
            .await
            .unwrap();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\ntwo\r\n0\r\n\r\n")
            .await
            .unwrap();
        (first, second)
    });

    let server_config = ServerConfig::from_url(&format!("http://127.0.0.1:{port}"), "/{}").unwrap();
    let mut conn = HttpConnection::new(&server_config, "test", Duration::from_secs(5), quick_retry());

    conn.send(&Request::get("/one")).await;
    conn.send(&Request::get("/two").with_range_from(7)).await;
    assert_eq!(conn.in_flight(), 2);

    let head = conn.read_head().await.unwrap();
    let (body, done) = read_body(&mut conn, &head).await;
    assert_eq!(body, b"one");
    conn.complete(done && head.keep_alive);

    let head = conn.read_head().await.unwrap();
    let (body, done) = read_body(&mut conn, &head).await;
    assert_eq!(body, b"two");
    conn.complete(done && head.keep_alive);
    assert_eq!(conn.in_flight(), 0);
    assert!(conn.is_connected());

    let (first, second) = server.await.unwrap();
    assert!(first.starts_with("GET /one HTTP/1.1"));
    assert!(first.contains(&format!("Host: 127.0.0.1:{port}")));
    assert!(second.starts_with("GET /two HTTP/1.1"));
    assert!(second.contains("Range: bytes=7-"));
}

#[tokio::test]
async fn unanswered_requests_are_replayed_after_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        // First connection: read the request and hang up without answering
        let (mut socket, _) = listener.accept().await.unwrap();
        let dropped = read_request(&mut socket).await;
        drop(socket);

        let (mut socket, _) = listener.accept().await.unwrap();
        let replayed = read_request(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        (dropped, replayed)
    });

    let server_config = ServerConfig::from_url(&format!("http://127.0.0.1:{port}"), "/{}").unwrap();
    let mut conn = HttpConnection::new(&server_config, "test", Duration::from_secs(5), quick_retry());

    conn.send(&Request::get("/again")).await;
    let head = conn.read_head().await.unwrap();
    assert_eq!(head.status, 200);
    let (body, _) = read_body(&mut conn, &head).await;
    assert_eq!(body, b"ok");

    let (dropped, replayed) = server.await.unwrap();
    assert!(dropped.starts_with("GET /again"));
    assert_eq!(dropped, replayed);
}

#[tokio::test]
async fn reset_forgets_outstanding_requests() {
    let server_config = ServerConfig::from_url("http://127.0.0.1:9", "/{}").unwrap();
    let mut conn = HttpConnection::new(&server_config, "test", Duration::from_secs(1), quick_retry());
    conn.send(&Request::get("/a")).await;
    conn.send(&Request::get("/b")).await;
    assert_eq!(conn.in_flight(), 2);
    assert!(!conn.is_connected(), "sockets are opened lazily");

    conn.reset();
    assert_eq!(conn.in_flight(), 0);
    assert!(conn.read_head().await.is_err());
}

#[tokio::test]
async fn connect_failure_is_reported_after_retries() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let server_config = ServerConfig::from_url(&format!("http://127.0.0.1:{port}"), "/{}").unwrap();
    let mut conn = HttpConnection::new(&server_config, "test", Duration::from_secs(1), quick_retry());

    conn.send(&Request::get("/x")).await;
    let err = conn.read_head().await.unwrap_err();
    assert!(matches!(err, Error::Http(HttpError::ConnectFailed { .. })));
    assert_eq!(conn.in_flight(), 1, "request is kept for a later attempt");
}
