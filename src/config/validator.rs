use tracing::warn;

use crate::error::{Result, TunnelError};

use super::{Tuning, Tunnel};

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证名称不为空
    pub fn validate_name(name: &str, context: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(TunnelError::config_error(format!(
                "{}: name cannot be empty",
                context
            )));
        }
        Ok(())
    }

    /// 验证时长类参数大于 0
    pub fn validate_period(value: u64, field: &str) -> Result<()> {
        if value == 0 {
            return Err(TunnelError::config_error(format!(
                "tuning.{} must be greater than 0",
                field
            )));
        }
        Ok(())
    }

    /// 验证运行参数
    pub fn validate_tuning(tuning: &Tuning) -> Result<()> {
        if tuning.buffer_size == 0 {
            return Err(TunnelError::config_error(
                "tuning.buffer_size must be greater than 0",
            ));
        }
        Self::validate_period(tuning.meter_period_ms, "meter_period_ms")?;
        Self::validate_period(tuning.dial_timeout_ms, "dial_timeout_ms")?;
        Self::validate_period(tuning.io_wait_ms, "io_wait_ms")?;
        Self::validate_period(tuning.health_check_period_ms, "health_check_period_ms")?;
        Self::validate_period(tuning.probe_timeout_ms, "probe_timeout_ms")?;

        if tuning.buffer_size < 4096 {
            warn!(
                "tuning.buffer_size ({}) is very small, throughput will suffer",
                tuning.buffer_size
            );
        }
        if tuning.probe_timeout_ms > tuning.health_check_period_ms {
            warn!(
                "tuning.probe_timeout_ms ({}) exceeds health_check_period_ms ({}), \
                 probe cycles will overlap their period",
                tuning.probe_timeout_ms, tuning.health_check_period_ms
            );
        }
        Ok(())
    }

    /// 验证单个隧道
    pub fn validate_tunnel(tunnel: &Tunnel) -> Result<()> {
        if tunnel.accept.is_tls() && (tunnel.cert.is_none() || tunnel.key.is_none()) {
            return Err(TunnelError::config_error(format!(
                "Tunnel '{}': cert and key are required when accepting TLS",
                tunnel.name
            )));
        }
        if !tunnel.connect.first().is_tls() && tunnel.skip_verify {
            warn!(
                "Tunnel '{}': skip_verify has no effect on plain outbound connections",
                tunnel.name
            );
        }
        Ok(())
    }

    /// 验证隧道名和监听地址在已接受的隧道中唯一
    pub fn validate_unique(tunnel: &Tunnel, accepted: &[Tunnel]) -> Result<()> {
        for other in accepted {
            if other.name == tunnel.name {
                return Err(TunnelError::config_error(format!(
                    "Duplicate tunnel name '{}'",
                    tunnel.name
                )));
            }
            if other.accept.addr() == tunnel.accept.addr() {
                return Err(TunnelError::config_error(format!(
                    "Tunnel '{}': accept address {} already used by tunnel '{}'",
                    tunnel.name,
                    tunnel.accept,
                    other.name
                )));
            }
        }
        Ok(())
    }
}
