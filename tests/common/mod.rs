/// Common utilities for integration tests
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tls_forward::config::{Configuration, Tuning, Tunnel};
use tls_forward::{Liveness, Server};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener as TokioTcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// A bound socket that never listens: the port stays reserved and connects are refused
pub fn refusing_port() -> (socket2::Socket, u16) {
    use socket2::{Domain, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).expect("Failed to create socket");
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    socket.bind(&addr.into()).expect("Failed to bind socket");
    let port = socket
        .local_addr()
        .expect("Failed to get local addr")
        .as_socket()
        .expect("Not an inet address")
        .port();
    (socket, port)
}

/// Generate temporary certificate files for testing
pub fn generate_test_certs() -> (PathBuf, PathBuf) {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tls_forward::tls;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let temp_dir = std::env::temp_dir();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    let unique_id = format!("{}-{}-{}", timestamp, counter, std::process::id());

    let cert_path = temp_dir.join(format!("test-cert-{}.pem", unique_id));
    let key_path = temp_dir.join(format!("test-key-{}.pem", unique_id));

    tls::generate_self_signed_cert(
        "localhost",
        &["127.0.0.1".to_string(), "localhost".to_string()],
        &cert_path,
        &key_path,
    )
    .expect("Failed to generate test certificates");

    (cert_path, key_path)
}

async fn echo<S: AsyncRead + AsyncWrite + Unpin>(mut socket: S) {
    let mut buf = vec![0u8; 8192];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) => break, // Connection closed
            Ok(n) => {
                if socket.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// Create a simple echo server for testing
pub async fn start_echo_server(port: u16) -> tokio::task::JoinHandle<()> {
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind echo server");

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(echo(socket));
        }
    })
}

/// Echo server that terminates TLS itself
pub async fn start_tls_echo_server(
    port: u16,
    cert: &Path,
    key: &Path,
) -> tokio::task::JoinHandle<()> {
    let config = tls_forward::tls::load_server_config(cert, key).expect("Failed to load TLS config");
    let acceptor = TlsAcceptor::from(config);
    let listener = TokioTcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind TLS echo server");

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(stream) = acceptor.accept(socket).await {
                    echo(stream).await;
                }
            });
        }
    })
}

/// Tuning with short periods so tests do not wait on production cadences
pub fn test_tuning() -> Tuning {
    Tuning {
        meter_period_ms: 100,
        health_check_period_ms: 100,
        probe_timeout_ms: 500,
        pick_timeout_ms: 2000,
        ..Tuning::default()
    }
}

/// A running tunnel bound to an ephemeral port
pub struct TestTunnel {
    pub addr: SocketAddr,
    pub liveness: Arc<Liveness>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl TestTunnel {
    pub async fn start(tunnel: Tunnel) -> Self {
        let config = Configuration {
            tuning: test_tuning(),
            tunnels: vec![tunnel],
            rejected: Vec::new(),
        };
        let server = Server::bind(config).await.expect("Failed to bind tunnel");
        let addr = server.listeners()[0].local_addr().unwrap();
        let liveness = server.liveness();
        let shutdown = server.shutdown_token();
        let task = tokio::spawn(async move {
            server.run().await.expect("Server failed");
        });

        Self {
            addr,
            liveness,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("Server did not stop")
            .unwrap();
    }
}

/// Cleanup function for test resources
pub struct TestCleanup {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

impl TestCleanup {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            cert_path: Some(cert_path),
            key_path: Some(key_path),
        }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        if let Some(cert) = self.cert_path.take() {
            let _ = std::fs::remove_file(cert);
        }
        if let Some(key) = self.key_path.take() {
            let _ = std::fs::remove_file(key);
        }
    }
}
