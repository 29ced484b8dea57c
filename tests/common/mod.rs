//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use routekit::config::{ListenerConfig, ServerConfig};
use routekit::http::{HttpServer, ServerError};
use routekit::lifecycle::Shutdown;
use routekit::net::Listener;
use routekit::routing::{Router, RouterHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A server running in the background on ephemeral ports.
pub struct TestServer {
    pub addrs: Vec<SocketAddr>,
    pub router: RouterHandle,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn addr(&self) -> SocketAddr {
        self.addrs[0]
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr(), path)
    }

    /// Trigger shutdown and wait for the accept loop to return.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

/// Start `router` on one plain listener bound to 127.0.0.1:0.
pub async fn start_server(router: Router, config: ServerConfig) -> TestServer {
    start_server_on(router, config, vec![ListenerConfig::new("127.0.0.1", 0)]).await
}

/// Start `router` on the given listeners, all listening before returning.
pub async fn start_server_on(
    router: Router,
    config: ServerConfig,
    listener_configs: Vec<ListenerConfig>,
) -> TestServer {
    let mut listeners = Vec::new();
    let mut addrs = Vec::new();
    for listener_config in listener_configs {
        let mut listener = Listener::new(listener_config);
        listener.start().await.expect("listener should bind");
        listener.listen().expect("listener should listen");
        addrs.push(listener.local_addr().expect("bound listener has an address"));
        listeners.push(listener);
    }

    let server = HttpServer::new(router, config);
    let router = server.router_handle();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listeners, shutdown.subscribe()));

    TestServer {
        addrs,
        router,
        shutdown,
        task,
    }
}

/// Send raw bytes and read until the server closes the connection.
pub async fn raw_request(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap();
    response
}

/// Split a raw response into head and body.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let text = String::from_utf8_lossy(raw);
    let head_end = text.find("\r\n\r\n").expect("response has a head");
    (text[..head_end].to_string(), raw[head_end + 4..].to_vec())
}

/// A mock upstream that answers every request with a fixed JSON body and
/// records the request heads it saw.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn seen(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock backend that returns `body` as `application/json` with `status`.
pub async fn start_json_backend(status: &'static str, body: String) -> MockBackend {
    start_backend_with_headers(status, "", body).await
}

/// Like [`start_json_backend`], with `extra_headers` (each ending in `\r\n`)
/// added to every response head.
pub async fn start_backend_with_headers(
    status: &'static str,
    extra_headers: &'static str,
    body: String,
) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let seen = Arc::clone(&seen);
                    let body = body.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        seen.lock().unwrap().push(head);
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nX-Upstream: mock\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            extra_headers,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, requests }
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// A local port nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
