//! Outbound endpoint selection.
//!
//! A tunnel with one target always uses it. A tunnel with several targets
//! rotates over the ones that answered the most recent health probe.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Tuning;
use crate::endpoint::{Endpoint, EndpointList};
use crate::transport::TransportClient;

/// Health probe cadence.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheck {
    pub period: Duration,
    pub probe_timeout: Duration,
}

impl From<&Tuning> for HealthCheck {
    fn from(tuning: &Tuning) -> Self {
        Self {
            period: tuning.health_check_period(),
            probe_timeout: tuning.probe_timeout(),
        }
    }
}

pub enum LoadBalancer {
    Single(Endpoint),
    RoundRobin(RoundRobin),
}

impl LoadBalancer {
    /// Build the balancer for `endpoints`.
    ///
    /// More than one endpoint starts a background probe task, so this must
    /// run inside a tokio runtime.
    pub fn new(
        name: &str,
        endpoints: &EndpointList,
        dialer: Arc<dyn TransportClient>,
        health_check: HealthCheck,
    ) -> Self {
        if endpoints.len() == 1 {
            LoadBalancer::Single(endpoints.first().clone())
        } else {
            LoadBalancer::RoundRobin(RoundRobin::start(name, endpoints, dialer, health_check))
        }
    }

    /// Next endpoint to dial, or `None` when no healthy endpoint showed up
    /// within `timeout`. A zero timeout never waits.
    pub async fn pick(&self, timeout: Duration) -> Option<Endpoint> {
        match self {
            LoadBalancer::Single(endpoint) => Some(endpoint.clone()),
            LoadBalancer::RoundRobin(rr) => rr.pick(timeout).await,
        }
    }

    /// Stop health probing. Picks keep serving the last known healthy set.
    pub fn shutdown(&self) {
        if let LoadBalancer::RoundRobin(rr) = self {
            rr.shutdown();
        }
    }
}

struct Pool {
    endpoints: Vec<Endpoint>,
    healthy: Mutex<VecDeque<Endpoint>>,
    ready: Notify,
}

impl Pool {
    /// 取队头并放回队尾
    fn rotate(&self) -> Option<Endpoint> {
        let mut healthy = self.healthy.lock();
        let endpoint = healthy.pop_front()?;
        healthy.push_back(endpoint.clone());
        Some(endpoint)
    }
}

/// Round robin over the healthy subset of a pool.
pub struct RoundRobin {
    pool: Arc<Pool>,
    stop: CancellationToken,
}

impl RoundRobin {
    pub fn start(
        name: &str,
        endpoints: &EndpointList,
        dialer: Arc<dyn TransportClient>,
        health_check: HealthCheck,
    ) -> Self {
        let pool = Arc::new(Pool {
            endpoints: endpoints.iter().cloned().collect(),
            healthy: Mutex::new(VecDeque::with_capacity(endpoints.len())),
            ready: Notify::new(),
        });
        let stop = CancellationToken::new();

        tokio::spawn(probe_loop(
            name.to_string(),
            pool.clone(),
            dialer,
            health_check,
            stop.clone(),
        ));

        Self { pool, stop }
    }

    pub async fn pick(&self, timeout: Duration) -> Option<Endpoint> {
        let deadline = Instant::now() + timeout;
        loop {
            // 先登记通知再查队列，避免错过两者之间的刷新
            let notified = self.pool.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(endpoint) = self.pool.rotate() {
                return Some(endpoint);
            }
            if timeout.is_zero() {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Endpoints that passed the latest probe, in rotation order.
    pub fn healthy(&self) -> Vec<Endpoint> {
        self.pool.healthy.lock().iter().cloned().collect()
    }

    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_cancelled()
    }
}

impl Drop for RoundRobin {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn probe_loop(
    name: String,
    pool: Arc<Pool>,
    dialer: Arc<dyn TransportClient>,
    health_check: HealthCheck,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(health_check.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_state: Vec<Option<bool>> = vec![None; pool.endpoints.len()];

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let probes = pool
            .endpoints
            .iter()
            .map(|endpoint| probe(dialer.as_ref(), endpoint, health_check.probe_timeout));
        let results = tokio::select! {
            _ = stop.cancelled() => break,
            results = join_all(probes) => results,
        };

        for ((endpoint, up), last) in pool.endpoints.iter().zip(&results).zip(&mut last_state) {
            match (*last, *up) {
                (Some(true), false) | (None, false) => warn!("{}: endpoint {} is down", name, endpoint),
                (Some(false), true) => info!("{}: endpoint {} is back up", name, endpoint),
                _ => {}
            }
            *last = Some(*up);
        }

        let healthy: VecDeque<Endpoint> = pool
            .endpoints
            .iter()
            .zip(&results)
            .filter(|(_, up)| **up)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        debug!("{}: {}/{} endpoints healthy", name, healthy.len(), pool.endpoints.len());

        // 整体替换，不累积重复项
        *pool.healthy.lock() = healthy;
        pool.ready.notify_waiters();
    }
    debug!("{}: health check stopped", name);
}

async fn probe(dialer: &dyn TransportClient, endpoint: &Endpoint, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, dialer.connect(endpoint)).await {
        Ok(Ok(_conn)) => true,
        Ok(Err(e)) => {
            debug!("probe {} failed: {}", endpoint, e);
            false
        }
        Err(_) => {
            debug!("probe {} timed out", endpoint);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{refusing_socket, TcpTransportClient};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn health_check() -> HealthCheck {
        HealthCheck {
            period: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(200),
        }
    }

    fn dialer() -> Arc<dyn TransportClient> {
        Arc::new(TcpTransportClient::new(Duration::from_millis(200)))
    }

    fn list(addrs: &[SocketAddr]) -> EndpointList {
        EndpointList::new(addrs.iter().map(|a| Endpoint::new(*a, false)).collect()).unwrap()
    }

    #[tokio::test]
    async fn test_single_always_picks() {
        let (_socket, addr) = refusing_socket();
        let lb = LoadBalancer::new("single", &list(&[addr]), dialer(), health_check());
        assert!(matches!(lb, LoadBalancer::Single(_)));
        for _ in 0..3 {
            assert_eq!(lb.pick(Duration::ZERO).await.unwrap().addr(), addr);
        }
    }

    #[tokio::test]
    async fn test_round_robin_skips_unhealthy() {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = [a.local_addr().unwrap(), b.local_addr().unwrap()];
        let (_down_socket, down) = refusing_socket();

        let lb = LoadBalancer::new("rr", &list(&[up[0], down, up[1]]), dialer(), health_check());

        // 第一轮探测完成前 pick 会等待
        let first = lb.pick(Duration::from_secs(2)).await.unwrap();
        assert_ne!(first.addr(), down);

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let endpoint = lb.pick(Duration::from_secs(1)).await.unwrap();
            assert_ne!(endpoint.addr(), down);
            seen.insert(endpoint.addr());
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_round_robin_alternates() {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addrs = [a.local_addr().unwrap(), b.local_addr().unwrap()];
        let lb = LoadBalancer::new("rr", &list(&addrs), dialer(), health_check());

        let first = lb.pick(Duration::from_secs(2)).await.unwrap();
        let second = lb.pick(Duration::ZERO).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_all_down_times_out() {
        let (_s1, a) = refusing_socket();
        let (_s2, b) = refusing_socket();
        let lb = LoadBalancer::new("rr", &list(&[a, b]), dialer(), health_check());

        let started = std::time::Instant::now();
        assert!(lb.pick(Duration::from_millis(300)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_zero_timeout_does_not_wait() {
        let (_s1, a) = refusing_socket();
        let (_s2, b) = refusing_socket();
        let lb = LoadBalancer::new("rr", &list(&[a, b]), dialer(), health_check());
        let picked = tokio::time::timeout(Duration::from_millis(50), lb.pick(Duration::ZERO))
            .await
            .expect("pick with zero timeout must return immediately");
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_probe() {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addrs = [a.local_addr().unwrap(), b.local_addr().unwrap()];
        let lb = LoadBalancer::new("rr", &list(&addrs), dialer(), health_check());
        assert!(lb.pick(Duration::from_secs(2)).await.is_some());

        lb.shutdown();
        let LoadBalancer::RoundRobin(rr) = &lb else {
            panic!("expected round robin");
        };
        assert!(!rr.is_running());
        // 停止后仍使用最后一次的健康集合
        assert_eq!(rr.healthy().len(), 2);
        assert!(lb.pick(Duration::ZERO).await.is_some());
    }
}
