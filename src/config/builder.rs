use std::path::PathBuf;
use std::time::Duration;

use crate::endpoint::parse_connect;
use crate::error::Result;

use super::{validator::ConfigValidator, Tunnel};

/// Tunnel Builder
///
/// 配置文件和测试都通过它构建 `Tunnel`，`build()` 负责解析地址并校验。
#[derive(Debug, Default)]
pub struct TunnelBuilder {
    name: String,
    connect: String,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    ca_cert: Option<PathBuf>,
    server_name: Option<String>,
    timeout_idle: Duration,
    skip_verify: bool,
}

impl TunnelBuilder {
    /// 创建新的 Builder
    pub fn new(name: impl Into<String>, connect: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connect: connect.into(),
            ..Self::default()
        }
    }

    /// 设置证书路径
    pub fn cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert = Some(path.into());
        self
    }

    /// 设置私钥路径
    pub fn key(mut self, path: impl Into<PathBuf>) -> Self {
        self.key = Some(path.into());
        self
    }

    /// 设置出站 TLS 的 CA 证书路径
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// 设置出站 TLS 服务器名
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// 设置空闲超时
    pub fn timeout_idle(mut self, timeout: Duration) -> Self {
        self.timeout_idle = timeout;
        self
    }

    /// 设置是否跳过出站证书验证
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    /// 构建 Tunnel
    pub fn build(self) -> Result<Tunnel> {
        ConfigValidator::validate_name(&self.name, "Tunnel name")?;
        let (accept, connect) = parse_connect(&self.connect)?;

        let tunnel = Tunnel {
            name: self.name,
            connect_spec: self.connect.trim().to_string(),
            accept,
            connect,
            cert: self.cert,
            key: self.key,
            ca_cert: self.ca_cert,
            server_name: self.server_name,
            timeout_idle: self.timeout_idle,
            skip_verify: self.skip_verify,
        };

        ConfigValidator::validate_tunnel(&tunnel)?;
        Ok(tunnel)
    }
}
