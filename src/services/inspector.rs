//! Remote inspection endpoint
//!
//! Only exists when the host is started with `--debug`. Bound before the
//! surface is built and kept until the process exits. Speaks just enough
//! HTTP/1.1 to answer the DevTools-style discovery routes with JSON:
//!
//! - `GET /json/version`
//! - `GET /json`, `GET /json/list`: the session snapshot

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::config::HostConfig;
use crate::services::session::HostSession;

pub const DEFAULT_INSPECT_PORT: u16 = 8080;

/// Most of a request (line plus headers) read before answering.
const MAX_REQUEST_HEAD: u64 = 8 * 1024;

pub struct Inspector {
    listener: TcpListener,
}

impl Inspector {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("[Inspector] Debugging enabled. http://{}", listener.local_addr()?);
        Ok(Self { listener })
    }

    /// Bind the inspection port if the startup flag asked for it.
    pub async fn launch(config: &HostConfig) -> io::Result<Option<Self>> {
        match config.inspector_addr() {
            Some(addr) => Self::bind(addr).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self, session: Arc<HostSession>) {
        loop {
            let stream = match self.listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    log::warn!("[Inspector] accept error: {}", e);
                    continue;
                }
            };

            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = handle(stream, &session).await {
                    log::debug!("[Inspector] connection error: {}", e);
                }
            });
        }
    }
}

async fn handle(stream: TcpStream, session: &HostSession) -> io::Result<()> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_HEAD));

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Headers are read and ignored
    let mut header = String::new();
    loop {
        header.clear();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header.trim().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or("/");
    let (status, body) = route(method, path, session);

    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json; charset=UTF-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    let mut stream = reader.into_inner().into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn route(method: &str, path: &str, session: &HostSession) -> (&'static str, Value) {
    if method != "GET" {
        return ("405 Method Not Allowed", json!({ "error": "method not allowed" }));
    }

    let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
    match path {
        "/json/version" => (
            "200 OK",
            json!({
                "Browser": format!("graphite-host/{}", env!("CARGO_PKG_VERSION")),
                "Capability": HostSession::CAPABILITY,
            }),
        ),
        "/json" | "/json/list" => ("200 OK", json!([session.snapshot()])),
        _ => ("404 Not Found", json!({ "error": "not found" })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config(args: &[&str]) -> HostConfig {
        HostConfig::try_parse_from(std::iter::once("graphite-host").chain(args.iter().copied()))
            .unwrap()
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn no_port_without_debug_flag() {
        let port = free_port();
        let config = config(&["--inspect-port", &port.to_string()]);

        assert!(Inspector::launch(&config).await.unwrap().is_none());
        let probe = tokio::time::timeout(
            Duration::from_secs(2),
            TcpStream::connect(("127.0.0.1", port)),
        )
        .await;
        assert!(!matches!(probe, Ok(Ok(_))), "inspection port accepted a connection");
    }

    #[tokio::test]
    async fn debug_flag_opens_port() {
        let port = free_port();
        let config = config(&["--debug", "--inspect-port", &port.to_string()]);

        let inspector = Inspector::launch(&config).await.unwrap().unwrap();
        assert_eq!(inspector.local_addr().unwrap().port(), port);

        let session = Arc::new(HostSession::new("http://localhost:5173"));
        tokio::spawn(inspector.serve(session));

        let response = get(([127, 0, 0, 1], port).into(), "/json/version").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.contains("\"Capability\":\"backend\""), "{}", response);
    }

    #[tokio::test]
    async fn list_reports_session() {
        let inspector = Inspector::bind(([127, 0, 0, 1], 0).into()).await.unwrap();
        let addr = inspector.local_addr().unwrap();
        let session = Arc::new(HostSession::new("http://localhost:5173"));
        tokio::spawn(inspector.serve(session.clone()));

        let response = get(addr, "/json/list").await;
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let list: Value = serde_json::from_str(body).unwrap();
        assert_eq!(list[0]["id"], session.id());
        assert_eq!(list[0]["state"], "uninitialized");
        assert_eq!(list[0]["content_url"], "http://localhost:5173");
    }

    #[tokio::test]
    async fn oversized_request_head_is_cut_off() {
        let inspector = Inspector::bind(([127, 0, 0, 1], 0).into()).await.unwrap();
        let addr = inspector.local_addr().unwrap();
        tokio::spawn(inspector.serve(Arc::new(HostSession::new("http://localhost:5173"))));

        // A request line that never ends; the client keeps its side open
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let junk = vec![b'A'; MAX_REQUEST_HEAD as usize];
        stream.write_all(&junk).await.unwrap();

        let mut response = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
            .await
            .expect("inspector kept reading past the request cap")
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 405"), "{}", response);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let inspector = Inspector::bind(([127, 0, 0, 1], 0).into()).await.unwrap();
        let addr = inspector.local_addr().unwrap();
        tokio::spawn(inspector.serve(Arc::new(HostSession::new("http://localhost:5173"))));

        let response = get(addr, "/devtools/page/1").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{}", response);
    }
}
