use super::tcp::{TcpTransportClient, TcpTransportServer};
use super::{Connection, TransportClient, TransportServer};
use crate::endpoint::Endpoint;
use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

/// TLS 拨号
pub struct TlsTransportClient {
    connector: TlsConnector,
    connect_timeout: Duration,
    /// 覆盖 SNI / 证书校验使用的服务器名
    server_name: Option<String>,
}

impl TlsTransportClient {
    pub fn new(
        connector: TlsConnector,
        connect_timeout: Duration,
        server_name: Option<String>,
    ) -> Self {
        Self {
            connector,
            connect_timeout,
            server_name,
        }
    }
}

#[async_trait]
impl TransportClient for TlsTransportClient {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection> {
        let name = self
            .server_name
            .clone()
            .unwrap_or_else(|| endpoint.host().to_string());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| TunnelError::tls_error(format!("Invalid server name '{}'", name)))?;

        let handshake = async {
            let tcp_stream = TcpTransportClient::connect_tcp(endpoint, self.connect_timeout).await?;
            self.connector
                .connect(server_name, tcp_stream)
                .await
                .map_err(|e| {
                    TunnelError::tls_error(format!("TLS handshake with {} failed: {}", endpoint, e))
                })
        };

        // 建连和握手共用同一个超时
        let tls_stream = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TunnelError::timeout(self.connect_timeout))??;

        debug!("TLS connection established to {}", endpoint);
        Ok(Box::new(tls_stream))
    }
}

/// TLS 监听
pub struct TlsTransportServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl TlsTransportServer {
    pub async fn bind(
        addr: SocketAddr,
        acceptor: TlsAcceptor,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TunnelError::connection_failed(format!("bind {}", addr), e))?;
        Ok(Self {
            listener,
            acceptor,
            handshake_timeout,
        })
    }
}

#[async_trait]
impl TransportServer for TlsTransportServer {
    async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        TcpTransportServer::accept_tcp(&self.listener).await
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Connection> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());

        let tls_stream = tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream))
            .await
            .map_err(|_| TunnelError::timeout(self.handshake_timeout))?
            .map_err(|e| TunnelError::tls_error(format!("TLS handshake with {} failed: {}", peer, e)))?;

        debug!("TLS handshake completed with {}", peer);
        Ok(Box::new(tls_stream))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
