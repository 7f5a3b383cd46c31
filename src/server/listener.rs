use super::ServerState;
use crate::balancer::{HealthCheck, LoadBalancer};
use crate::config::Tunnel;
use crate::endpoint::Endpoint;
use crate::error::{Result, TunnelError};
use crate::transport::{
    create_transport_client, create_transport_server, Connection, TransportClient,
    TransportServer,
};
use crate::wire::{Wire, WireOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 每个连接任务共享的隧道上下文
struct TunnelContext {
    tunnel: Tunnel,
    state: ServerState,
    server: Box<dyn TransportServer>,
    dialer: Arc<dyn TransportClient>,
    balancer: LoadBalancer,
}

/// 一个隧道的监听端
pub struct TunnelListener {
    ctx: Arc<TunnelContext>,
}

impl TunnelListener {
    /// 绑定入站端口并准备出站拨号器和负载均衡
    pub async fn bind(tunnel: Tunnel, state: ServerState) -> Result<Self> {
        let server = create_transport_server(&tunnel, &state.tuning).await?;
        let dialer = create_transport_client(&tunnel, &state.tuning)?;
        let balancer = LoadBalancer::new(
            &tunnel.name,
            &tunnel.connect,
            dialer.clone(),
            HealthCheck::from(state.tuning.as_ref()),
        );

        info!(
            "{}: listening on {} -> {}",
            tunnel.name,
            server.local_addr()?,
            tunnel.connect
        );

        Ok(Self {
            ctx: Arc::new(TunnelContext {
                tunnel,
                state,
                server,
                dialer,
                balancer,
            }),
        })
    }

    pub fn tunnel(&self) -> &Tunnel {
        &self.ctx.tunnel
    }

    /// 实际监听地址
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.ctx.server.local_addr()
    }

    /// 接受循环，直到 `shutdown` 被取消
    pub async fn serve(self, shutdown: CancellationToken) {
        let ctx = self.ctx;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = ctx.server.accept() => match result {
                    Ok((stream, peer)) => {
                        debug!("{}: accepted {}", ctx.tunnel.name, peer);
                        tokio::spawn(handle_connection(ctx.clone(), stream, peer));
                    }
                    // 单次 accept 失败不影响后续连接
                    Err(e) => error!("{}: accept failed: {}", ctx.tunnel.name, e),
                },
            }
        }
        ctx.balancer.shutdown();
        info!("{}: listener stopped", ctx.tunnel.name);
    }
}

async fn handle_connection(ctx: Arc<TunnelContext>, stream: TcpStream, peer: SocketAddr) {
    let name = &ctx.tunnel.name;

    let inbound = match ctx.server.handshake(stream).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("{}: handshake with {} failed: {}", name, peer, e);
            return;
        }
    };

    // 没有可用出站端点或拨号失败时直接丢弃入站连接
    let (endpoint, outbound) = match dial_outbound(&ctx).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!("{}: dropping {}: {}", name, peer, e);
            return;
        }
    };

    let wire = Wire::start(
        format!("{} {} -> {}", name, peer, endpoint),
        WireOptions::new(&ctx.tunnel, &ctx.state.tuning),
        inbound,
        outbound,
    );
    info!("U {}", wire);
    ctx.state.liveness.add(wire);
}

async fn dial_outbound(ctx: &TunnelContext) -> Result<(Endpoint, Connection)> {
    let endpoint = ctx
        .balancer
        .pick(ctx.state.tuning.pick_timeout())
        .await
        .ok_or_else(|| TunnelError::no_healthy_endpoint(&ctx.tunnel.name))?;
    let outbound = ctx.dialer.connect(&endpoint).await?;
    Ok((endpoint, outbound))
}
