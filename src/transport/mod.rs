mod factory;
mod tcp;
mod tls;

pub use factory::{create_transport_client, create_transport_server};
pub use tcp::{TcpTransportClient, TcpTransportServer};
pub use tls::{TlsTransportClient, TlsTransportServer};

use crate::endpoint::Endpoint;
use crate::error::Result;
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::warn;

/// 传输层连接抽象
///
/// 统一封装明文 TCP 和 TLS 连接，转发引擎只看到字节流
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 已建立的连接
pub type Connection = Box<dyn Transport>;

/// 监听端（入站）
///
/// `accept` 只接受 TCP 连接；TLS 握手放在 `handshake` 里，由每个连接自己的
/// 任务执行，慢速握手不会阻塞接受循环。
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// 接受新的 TCP 连接
    async fn accept(&self) -> Result<(TcpStream, SocketAddr)>;

    /// 在已接受的连接上完成传输层握手
    async fn handshake(&self, stream: TcpStream) -> Result<Connection>;

    /// 实际监听地址（绑定端口 0 时有用）
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// 拨号端（出站）
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// 连接到端点，超时包含 TCP 建连和 TLS 握手
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection>;
}

const KEEPALIVE_TIME: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// 给转发用的 TCP 连接打开 keepalive
pub(crate) fn apply_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);

    let sock_ref = SockRef::from(stream);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(
            "Failed to set TCP keepalive on {}: {}",
            stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".into()),
            e
        );
    }
}

/// 只绑定不监听的套接字：端口一直被占用，连接它会被拒绝
#[cfg(test)]
pub(crate) fn refusing_socket() -> (socket2::Socket, SocketAddr) {
    use socket2::{Domain, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    socket.bind(&bind.into()).unwrap();
    let addr = socket.local_addr().unwrap().as_socket().unwrap();
    (socket, addr)
}
