use super::{
    TcpTransportClient, TcpTransportServer, TlsTransportClient, TlsTransportServer,
    TransportClient, TransportServer,
};
use crate::config::{Tuning, Tunnel};
use crate::error::{Result, TunnelError};
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// 根据隧道的入站端点创建监听端
///
/// 入站要求 TLS 时加载证书和私钥；缺少任何一个都视为配置错误。
pub async fn create_transport_server(
    tunnel: &Tunnel,
    tuning: &Tuning,
) -> Result<Box<dyn TransportServer>> {
    let addr = tunnel.accept.addr();

    if !tunnel.accept.is_tls() {
        return Ok(Box::new(TcpTransportServer::bind(addr).await?));
    }

    let (cert, key) = match (&tunnel.cert, &tunnel.key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(TunnelError::config_error(format!(
                "Tunnel '{}': cert and key are required when accepting TLS",
                tunnel.name
            )))
        }
    };
    let server_config = crate::tls::load_server_config(cert, key)?;
    let acceptor = TlsAcceptor::from(server_config);

    Ok(Box::new(
        TlsTransportServer::bind(addr, acceptor, tuning.dial_timeout()).await?,
    ))
}

/// 根据隧道的出站端点池创建拨号端
///
/// 同一个池共享 TLS 策略，所以按第一个端点决定。
pub fn create_transport_client(
    tunnel: &Tunnel,
    tuning: &Tuning,
) -> Result<Arc<dyn TransportClient>> {
    if !tunnel.connect.first().is_tls() {
        return Ok(Arc::new(TcpTransportClient::new(tuning.dial_timeout())));
    }

    let client_config =
        crate::tls::load_client_config(tunnel.ca_cert.as_deref(), tunnel.skip_verify)?;
    let connector = TlsConnector::from(client_config);

    Ok(Arc::new(TlsTransportClient::new(
        connector,
        tuning.dial_timeout(),
        tunnel.server_name.clone(),
    )))
}
