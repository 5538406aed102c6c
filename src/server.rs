//! HTTP listener for the gateway
//!
//! Plain tokio sockets and a hand-rolled HTTP/1.1 read loop; one request per
//! connection.
//!
//! Routes:
//! - `POST /api/query` -> `{success, reply}` or `{error, details}`
//! - `GET /health`

use crate::gateway::{GatewayErrorResponse, GatewayRequest, QueryGateway};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const MAX_REQUEST_BYTES: usize = 1_000_000;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve(gateway: Arc<QueryGateway>, bind_addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("Query gateway listening on {}", bind_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("New connection from {}", addr);
        let gateway = gateway.clone();
        tokio::spawn(async move {
            handle_connection(gateway, stream).await;
        });
    }
}

async fn handle_connection(gateway: Arc<QueryGateway>, mut stream: TcpStream) {
    let Some(raw) = read_or_reject(&mut stream, READ_TIMEOUT).await else {
        return;
    };

    let (status, body) = match parse_request(&raw) {
        Some((method, path, body)) => route(&gateway, &method, &path, &body).await,
        None => (400, error_body("Malformed HTTP request", None)),
    };
    write_response(&mut stream, status, &body).await;
}

/// Read one request. A timeout or read error is answered here (408 / 400)
/// and yields `None`, as does a client that closed without sending anything.
async fn read_or_reject<S>(stream: &mut S, read_timeout: Duration) -> Option<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (status, body) = match timeout(read_timeout, read_request(stream)).await {
        Ok(Ok(raw)) if raw.is_empty() => return None,
        Ok(Ok(raw)) => return Some(raw),
        Ok(Err(e)) => {
            warn!("Failed to read request: {}", e);
            (400, error_body("Failed to read request", Some(e.to_string())))
        }
        Err(_) => {
            warn!("Request read timeout");
            (408, error_body("Request read timeout", None))
        }
    };
    write_response(stream, status, &body).await;
    None
}

async fn write_response<S: AsyncWrite + Unpin>(stream: &mut S, status: u16, body: &str) {
    if let Err(e) = stream.write_all(create_response(status, body).as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);

        if let Some(headers_end) = find_headers_end(&buffer) {
            let headers = String::from_utf8_lossy(&buffer[..headers_end]);
            let content_length = extract_content_length(&headers).unwrap_or(0);
            if buffer.len() >= headers_end + content_length {
                break;
            }
        }
        if buffer.len() > MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(buffer)
}

fn find_headers_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn extract_content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Split a raw request into method, path (query string and trailing slash
/// removed) and body.
fn parse_request(raw: &[u8]) -> Option<(String, String, String)> {
    let headers_end = find_headers_end(raw)?;
    let head = String::from_utf8_lossy(&raw[..headers_end]);
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;

    let path = target.split('?').next().unwrap_or(target);
    let mut path = path.trim_end_matches('/').to_string();
    if path.is_empty() {
        path = "/".to_string();
    }

    let body = String::from_utf8_lossy(&raw[headers_end..]).to_string();
    Some((method, path, body))
}

/// Map a parsed request to a status code and JSON body.
pub async fn route(gateway: &QueryGateway, method: &str, path: &str, body: &str) -> (u16, String) {
    match (method, path) {
        ("GET", "/health") => (200, r#"{"status":"ok"}"#.to_string()),
        ("POST", "/api/query") => {
            let request: GatewayRequest = match serde_json::from_str(body) {
                Ok(r) => r,
                Err(e) => {
                    return (
                        400,
                        error_body("Invalid request body", Some(e.to_string())),
                    )
                }
            };
            if request.prompt.trim().is_empty() {
                return (400, error_body("Missing prompt", None));
            }

            match gateway.handle(request).await {
                Ok(response) => (200, to_json(&response)),
                Err(e) => {
                    error!("Request failed: {}", e);
                    let status = if e.is_fatal() { 503 } else { 500 };
                    (
                        status,
                        to_json(&GatewayErrorResponse::from_error("Query gateway unavailable", &e)),
                    )
                }
            }
        }
        _ => (404, error_body("Not found", None)),
    }
}

fn error_body(error: &str, details: Option<String>) -> String {
    to_json(&GatewayErrorResponse {
        error: error.to_string(),
        details,
    })
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        error!("Failed to serialize response: {}", e);
        r#"{"error":"Internal serialization failure"}"#.to_string()
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

fn create_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text(status),
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_strips_query_and_slash() {
        let raw = b"POST /api/query/?debug=1 HTTP/1.1\r\nContent-Length: 14\r\n\r\n{\"prompt\":\"x\"}";
        let (method, path, body) = parse_request(raw).unwrap();
        assert_eq!(method, "POST");
        assert_eq!(path, "/api/query");
        assert_eq!(body, "{\"prompt\":\"x\"}");
    }

    #[test]
    fn test_content_length_is_case_insensitive() {
        assert_eq!(extract_content_length("Host: a\r\ncontent-LENGTH: 42\r\n"), Some(42));
        assert_eq!(extract_content_length("Host: a\r\n"), None);
    }

    #[test]
    fn test_incomplete_headers_rejected() {
        assert!(parse_request(b"GET /health HTTP/1.1\r\n").is_none());
    }

    #[test]
    fn test_response_framing() {
        let response = create_response(503, "{}");
        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(response.contains("Content-Length: 2\r\n"));
        assert!(response.ends_with("\r\n\r\n{}"));
    }

    #[tokio::test]
    async fn test_stalled_request_gets_408() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(b"POST /api/query HTTP/1.1\r\n").await.unwrap();

        let raw = read_or_reject(&mut server, Duration::from_millis(50)).await;
        assert!(raw.is_none());
        drop(server);

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
        assert!(response.contains("Request read timeout"));
    }

    #[tokio::test]
    async fn test_complete_request_is_returned() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let raw = read_or_reject(&mut server, Duration::from_secs(1)).await.unwrap();
        assert_eq!(parse_request(&raw).unwrap().1, "/health");
    }
}
