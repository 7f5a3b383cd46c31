/// TLS Forward 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod balancer;
pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod liveness;
pub mod meter;
pub mod ring_buffer;
pub mod server;
pub mod tls;
pub mod transport;
pub mod wire;

// 重新导出常用类型
pub use balancer::{HealthCheck, LoadBalancer};
pub use config::{AppConfig, Configuration, Tuning, Tunnel};
pub use endpoint::{Endpoint, EndpointList, Protocol};
pub use error::{Result, TunnelError};
pub use liveness::{Liveness, Measure, Throughput};
pub use meter::Meter;
pub use ring_buffer::RingBuffer;
pub use server::{run_server, Server, TunnelListener};
pub use wire::{Direction, Wire, WireOptions};
