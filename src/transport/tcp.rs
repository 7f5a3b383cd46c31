use super::{apply_keepalive, Connection, TransportClient, TransportServer};
use crate::endpoint::Endpoint;
use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// 明文 TCP 拨号
pub struct TcpTransportClient {
    connect_timeout: Duration,
}

impl TcpTransportClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// 带超时建立 TCP 连接（TLS 拨号也复用这一步）
    pub(crate) async fn connect_tcp(
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<TcpStream> {
        let addr = endpoint.addr();
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TunnelError::timeout(connect_timeout))?
            .map_err(|e| TunnelError::connection_failed(addr.to_string(), e))?;
        apply_keepalive(&stream);
        Ok(stream)
    }
}

#[async_trait]
impl TransportClient for TcpTransportClient {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection> {
        let stream = Self::connect_tcp(endpoint, self.connect_timeout).await?;
        debug!("Connected to {}", endpoint);
        Ok(Box::new(stream))
    }
}

/// 明文 TCP 监听
pub struct TcpTransportServer {
    listener: TcpListener,
}

impl TcpTransportServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TunnelError::connection_failed(format!("bind {}", addr), e))?;
        Ok(Self { listener })
    }

    pub(crate) async fn accept_tcp(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = listener.accept().await?;
        apply_keepalive(&stream);
        Ok((stream, peer))
    }
}

#[async_trait]
impl TransportServer for TcpTransportServer {
    async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        Self::accept_tcp(&self.listener).await
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Connection> {
        Ok(Box::new(stream))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
