//! 隧道压测：吞吐量和往返延迟
//!
//! 两种压测都要求对端原样回显（`tls-forward echo`），回显的数据会逐块校验。

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::liveness::Throughput;

/// 吞吐量压测结果，只统计单向发送的字节
#[derive(Debug, Clone, Copy)]
pub struct ThroughputReport {
    pub throughput: Throughput,
    pub connections: usize,
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "throughput: {} ({} connections)",
            self.throughput, self.connections
        )
    }
}

/// 延迟压测结果
#[derive(Debug, Clone, Copy)]
pub struct LatencyReport {
    pub elapsed: Duration,
    /// 每个连接依次往返的消息数
    pub messages: usize,
    pub connections: usize,
}

impl LatencyReport {
    /// 单条消息的平均往返时间
    pub fn per_message(&self) -> Duration {
        if self.messages == 0 {
            return Duration::ZERO;
        }
        self.elapsed.div_f64(self.messages as f64)
    }
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "latency: {:.2} seconds, {} messages x {} connections, {:.3} ms/message",
            self.elapsed.as_secs_f64(),
            self.messages,
            self.connections,
            self.per_message().as_secs_f64() * 1000.0
        )
    }
}

/// 每个连接发送 `loops` 个随机数据块并校验回显
pub async fn run_throughput(
    target: &str,
    loops: usize,
    concurrency: usize,
    block_size: usize,
) -> Result<ThroughputReport> {
    if concurrency == 0 || block_size == 0 {
        bail!("concurrency and block size must be non-zero");
    }

    let start = Instant::now();
    let workers = (0..concurrency).map(|id| {
        let target = target.to_string();
        tokio::spawn(async move { throughput_worker(id, &target, loops, block_size).await })
    });
    let mut total = 0u64;
    for result in join_all(workers).await {
        total += result.context("throughput worker panicked")??;
    }

    Ok(ThroughputReport {
        throughput: Throughput::new(total, start.elapsed()),
        connections: concurrency,
    })
}

async fn throughput_worker(id: usize, target: &str, loops: usize, block_size: usize) -> Result<u64> {
    let stream = connect(target).await?;
    let mut block = vec![0u8; block_size];
    rand::rng().fill_bytes(&mut block);
    let block = Arc::new(block);

    let (mut reader, mut writer) = stream.into_split();
    let sender = {
        let block = block.clone();
        tokio::spawn(async move {
            for _ in 0..loops {
                writer.write_all(&block).await?;
            }
            writer.flush().await?;
            Ok::<_, std::io::Error>(writer)
        })
    };

    let mut echoed = vec![0u8; block_size];
    for i in 0..loops {
        reader
            .read_exact(&mut echoed)
            .await
            .with_context(|| format!("connection {}: block {} truncated", id, i))?;
        if echoed != *block {
            bail!("connection {}: block {} corrupted", id, i);
        }
    }
    // 写半部分要等读完再释放，否则对端会提前看到 EOF
    let _writer = sender
        .await
        .context("sender panicked")?
        .with_context(|| format!("connection {}: send failed", id))?;

    debug!("connection {}: {} blocks verified", id, loops);
    Ok((loops * block_size) as u64)
}

/// 每个连接依次发送 `messages` 条消息，收到回显后再发下一条
pub async fn run_latency(
    target: &str,
    messages: usize,
    concurrency: usize,
    message_size: usize,
) -> Result<LatencyReport> {
    if concurrency == 0 || message_size == 0 {
        bail!("concurrency and message size must be non-zero");
    }

    let start = Instant::now();
    let workers = (0..concurrency).map(|id| {
        let target = target.to_string();
        tokio::spawn(async move { latency_worker(id, &target, messages, message_size).await })
    });
    for result in join_all(workers).await {
        result.context("latency worker panicked")??;
    }

    Ok(LatencyReport {
        elapsed: start.elapsed(),
        messages,
        connections: concurrency,
    })
}

async fn latency_worker(id: usize, target: &str, messages: usize, message_size: usize) -> Result<()> {
    let mut stream = connect(target).await?;
    let mut message = vec![0u8; message_size];
    let mut echoed = vec![0u8; message_size];

    for i in 0..messages {
        rand::rng().fill_bytes(&mut message);
        stream.write_all(&message).await?;
        stream
            .read_exact(&mut echoed)
            .await
            .with_context(|| format!("connection {}: message {} truncated", id, i))?;
        if echoed != message {
            bail!("connection {}: message {} corrupted", id, i);
        }
    }
    Ok(())
}

async fn connect(target: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(target)
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
