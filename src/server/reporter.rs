use crate::liveness::{Liveness, Measure};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 周期性清扫注册表并输出吞吐量，数值不变时不重复输出
pub async fn run_reporter(liveness: Arc<Liveness>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 第一次 tick 立即完成，跳过
    ticker.tick().await;

    let mut last: Option<Measure> = None;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let measure = liveness.measure(period);
        if last.as_ref() != Some(&measure) {
            // 全部空闲时降级输出
            if measure.is_idle() {
                debug!("{}", measure);
            } else {
                info!("{}", measure);
            }
            last = Some(measure);
        }
    }
}
