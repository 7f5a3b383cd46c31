mod listener;
mod reporter;

pub use listener::TunnelListener;
pub use reporter::run_reporter;

use crate::config::{Configuration, Tuning};
use crate::error::{Result, TunnelError};
use crate::liveness::Liveness;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 所有隧道共享的运行时状态
#[derive(Debug, Clone)]
pub struct ServerState {
    pub tuning: Arc<Tuning>,
    pub liveness: Arc<Liveness>,
}

impl ServerState {
    pub fn new(tuning: Tuning) -> Self {
        Self {
            tuning: Arc::new(tuning),
            liveness: Arc::new(Liveness::new()),
        }
    }
}

/// 一组已绑定的隧道
pub struct Server {
    state: ServerState,
    listeners: Vec<TunnelListener>,
    shutdown: CancellationToken,
}

impl Server {
    /// 为每个隧道绑定监听端口
    ///
    /// 单个隧道失败只记录错误并跳过；一个都没起来才返回错误。
    pub async fn bind(config: Configuration) -> Result<Self> {
        for (name, e) in &config.rejected {
            error!("Tunnel '{}' rejected: {}", name, e);
        }

        let state = ServerState::new(config.tuning);
        let mut listeners = Vec::with_capacity(config.tunnels.len());

        for tunnel in config.tunnels {
            let name = tunnel.name.clone();
            match TunnelListener::bind(tunnel, state.clone()).await {
                Ok(listener) => listeners.push(listener),
                Err(e) => error!("Tunnel '{}' failed to start: {}", name, e),
            }
        }

        if listeners.is_empty() {
            return Err(TunnelError::config_error("No tunnel could be started"));
        }

        Ok(Self {
            state,
            listeners,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn listeners(&self) -> &[TunnelListener] {
        &self.listeners
    }

    pub fn liveness(&self) -> Arc<Liveness> {
        self.state.liveness.clone()
    }

    /// 取消后 `run` 返回
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 运行所有隧道直到 shutdown token 被取消
    pub async fn run(self) -> Result<()> {
        let Self {
            state,
            listeners,
            shutdown,
        } = self;

        let mut tasks = Vec::with_capacity(listeners.len() + 1);
        for listener in listeners {
            tasks.push(tokio::spawn(listener.serve(shutdown.clone())));
        }
        tasks.push(tokio::spawn(run_reporter(
            state.liveness.clone(),
            state.tuning.meter_period(),
            shutdown.clone(),
        )));

        shutdown.cancelled().await;

        for task in tasks {
            if let Err(e) = task.await {
                warn!("Task ended abnormally: {}", e);
            }
        }

        let closed = state.liveness.close_all();
        if closed > 0 {
            info!("Closed {} active wires", closed);
        }
        Ok(())
    }
}

/// 启动配置里的全部隧道，Ctrl+C 停止
pub async fn run_server(config: Configuration) -> Result<()> {
    let server = Server::bind(config).await?;
    let shutdown = server.shutdown_token();

    info!("Forwarding... (Press Ctrl+C to stop)");
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, stopping...");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;
    info!("Stopped");
    Ok(())
}
