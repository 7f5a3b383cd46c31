// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

// 重新导出 builder 和 validator
pub use builder::TunnelBuilder;
pub use validator::ConfigValidator;

use crate::endpoint::{Endpoint, EndpointList};
use crate::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 运行参数（全部可选，缺省值见各字段）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Tuning {
    /// 每个方向环形缓冲区大小（字节）
    pub buffer_size: usize,
    /// 吞吐量统计周期（毫秒）
    pub meter_period_ms: u64,
    /// 出站连接超时（毫秒）
    pub dial_timeout_ms: u64,
    /// 转发循环单次读写的最长等待（毫秒）
    pub io_wait_ms: u64,
    /// 健康检查周期（毫秒）
    pub health_check_period_ms: u64,
    /// 健康检查单次拨号超时（毫秒）
    pub probe_timeout_ms: u64,
    /// 等待可用端点的最长时间（毫秒，0 表示不等待）
    pub pick_timeout_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            buffer_size: 256 * 1024,
            meter_period_ms: 2000,
            dial_timeout_ms: 2000,
            io_wait_ms: 100,
            health_check_period_ms: 2000,
            probe_timeout_ms: 1000,
            pick_timeout_ms: 1000,
        }
    }
}

impl Tuning {
    pub fn meter_period(&self) -> Duration {
        Duration::from_millis(self.meter_period_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn io_wait(&self) -> Duration {
        Duration::from_millis(self.io_wait_ms)
    }

    pub fn health_check_period(&self) -> Duration {
        Duration::from_millis(self.health_check_period_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn pick_timeout(&self) -> Duration {
        Duration::from_millis(self.pick_timeout_ms)
    }
}

/// 单个隧道在配置文件中的写法（`[tunnels.<name>]`）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelSection {
    /// `[pp|ps|sp|ss/]<accept>/<target>[,<target>...]`
    pub connect: String,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// 空闲超时（秒，0 表示永不超时）
    #[serde(default)]
    pub timeout_idle: Option<u64>,
    #[serde(default)]
    pub skip_verify: Option<bool>,
    /// 校验出站 TLS 使用的 CA 证书
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// 出站 TLS 使用的服务器名（默认取目标地址的主机部分）
    #[serde(default)]
    pub server_name: Option<String>,
}

/// 配置文件
///
/// 顶层的 `cert`/`key`/`timeout_idle`/`skip_verify`/`ca_cert` 是共享值，
/// 隧道自己没有设置时继承这些值。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub timeout_idle: Option<u64>,
    #[serde(default)]
    pub skip_verify: Option<bool>,
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub tuning: Tuning,
    #[serde(default)]
    pub tunnels: BTreeMap<String, TunnelSection>,
}

impl AppConfig {
    /// 从 TOML 文本解析
    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| TunnelError::config_error(format!("Failed to parse configuration: {}", e)))?;
        ConfigValidator::validate_tuning(&config.tuning)?;
        Ok(config)
    }

    /// 从文件加载
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::config_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// 把隧道段与共享值合并后解析为 `Tunnel`
    ///
    /// 每个隧道单独返回结果：一个隧道写错不影响其它隧道。
    pub fn resolve_tunnels(&self) -> Vec<(String, Result<Tunnel>)> {
        self.tunnels
            .iter()
            .map(|(name, section)| (name.clone(), self.resolve_tunnel(name, section)))
            .collect()
    }

    fn resolve_tunnel(&self, name: &str, section: &TunnelSection) -> Result<Tunnel> {
        let mut builder = TunnelBuilder::new(name, &section.connect);

        if let Some(cert) = section.cert.as_ref().or(self.cert.as_ref()) {
            builder = builder.cert(expand_path(cert));
        }
        if let Some(key) = section.key.as_ref().or(self.key.as_ref()) {
            builder = builder.key(expand_path(key));
        }
        if let Some(ca) = section.ca_cert.as_ref().or(self.ca_cert.as_ref()) {
            builder = builder.ca_cert(expand_path(ca));
        }
        if let Some(secs) = section.timeout_idle.or(self.timeout_idle) {
            builder = builder.timeout_idle(Duration::from_secs(secs));
        }
        if let Some(skip) = section.skip_verify.or(self.skip_verify) {
            builder = builder.skip_verify(skip);
        }
        if let Some(server_name) = &section.server_name {
            builder = builder.server_name(server_name);
        }

        builder.build()
    }
}

/// 展开路径中的 `~`
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// 一条已解析的隧道定义，启动后只读，由该隧道的所有任务共享
#[derive(Debug, Clone)]
pub struct Tunnel {
    pub name: String,
    /// 原始 connect 字符串，用于日志
    pub connect_spec: String,
    pub accept: Endpoint,
    pub connect: EndpointList,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub server_name: Option<String>,
    /// 空闲超时，`Duration::ZERO` 表示永不超时
    pub timeout_idle: Duration,
    pub skip_verify: bool,
}

impl Tunnel {
    pub fn builder(name: impl Into<String>, connect: impl Into<String>) -> TunnelBuilder {
        TunnelBuilder::new(name, connect)
    }

    /// 空闲超时，未启用时为 `None`
    pub fn idle_timeout(&self) -> Option<Duration> {
        (!self.timeout_idle.is_zero()).then_some(self.timeout_idle)
    }
}

impl fmt::Display for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.connect_spec)
    }
}

/// 从一个或多个文件合并得到的完整配置
#[derive(Debug, Default)]
pub struct Configuration {
    pub tuning: Tuning,
    /// 通过校验、可以启动的隧道
    pub tunnels: Vec<Tunnel>,
    /// 未通过校验的隧道及原因
    pub rejected: Vec<(String, TunnelError)>,
}

impl Configuration {
    /// 加载多个配置文件；运行参数取自第一个文件
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let configs = paths
            .iter()
            .map(|path| {
                debug!("Loading configuration from {}", path.as_ref().display());
                AppConfig::from_file(path)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_configs(configs))
    }

    /// 从单个已解析的配置构建
    pub fn from_config(config: AppConfig) -> Self {
        Self::from_configs(vec![config])
    }

    fn from_configs(configs: Vec<AppConfig>) -> Self {
        let tuning = configs
            .first()
            .map(|c| c.tuning.clone())
            .unwrap_or_default();

        let mut tunnels: Vec<Tunnel> = Vec::new();
        let mut rejected = Vec::new();
        for config in &configs {
            for (name, result) in config.resolve_tunnels() {
                let result = result.and_then(|tunnel| {
                    ConfigValidator::validate_unique(&tunnel, &tunnels)?;
                    Ok(tunnel)
                });
                match result {
                    Ok(tunnel) => tunnels.push(tunnel),
                    Err(e) => rejected.push((name, e)),
                }
            }
        }

        Self {
            tuning,
            tunnels,
            rejected,
        }
    }
}
