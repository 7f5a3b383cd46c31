/// 自定义错误类型
///
/// 库内部统一使用 `TunnelError`，命令行层再用 anyhow 附加上下文
use std::io;
use std::time::Duration;
use thiserror::Error;

/// 转发器的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 端点格式错误或无法解析
    #[error("Invalid endpoint '{spec}': {reason}")]
    InvalidEndpoint { spec: String, reason: String },

    /// TLS 配置或握手错误
    #[error("TLS error: {0}")]
    TlsError(String),

    /// 连接失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// 负载均衡池中没有可用端点
    #[error("No healthy endpoint available for tunnel '{tunnel}'")]
    NoHealthyEndpoint { tunnel: String },

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// 创建端点错误
    pub fn invalid_endpoint(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// 创建 TLS 错误
    pub fn tls_error(msg: impl Into<String>) -> Self {
        Self::TlsError(msg.into())
    }

    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建超时错误
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 创建无可用端点错误
    pub fn no_healthy_endpoint(tunnel: impl Into<String>) -> Self {
        Self::NoHealthyEndpoint {
            tunnel: tunnel.into(),
        }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError(_) | Self::InvalidEndpoint { .. })
    }
}
