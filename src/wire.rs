//! Forwarding session between one inbound and one outbound connection.
//!
//! Each direction runs its own task with a private [`RingBuffer`]. A task
//! alternates between pulling bytes from its source into the producer window
//! and pushing the consumer window to its destination. Whether a step may
//! block depends on whether the other step still has work:
//!
//! * read waits up to `io_wait` only when nothing is buffered, otherwise it
//!   polls once;
//! * write waits up to `io_wait` only when the buffer is full, otherwise it
//!   polls once.
//!
//! An elapsed wait is not an error, it just ends the step. Any other I/O
//! error, end of stream or the idle timeout closes the whole wire.
//!
//! A closed wire is not finished yet: a step already in flight may still
//! complete and update the meters. [`Wire::is_finished`] turns true only after
//! both direction tasks have returned.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Tuning, Tunnel};
use crate::meter::Meter;
use crate::ring_buffer::RingBuffer;
use crate::transport::Connection;

/// Per-wire settings.
#[derive(Debug, Clone)]
pub struct WireOptions {
    /// Ring buffer capacity of each direction.
    pub buffer_size: usize,
    /// Longest a single read or write may block.
    pub io_wait: Duration,
    /// Close the wire after this long without a successful transfer.
    pub idle_timeout: Option<Duration>,
}

impl WireOptions {
    pub fn new(tunnel: &Tunnel, tuning: &Tuning) -> Self {
        Self {
            buffer_size: tuning.buffer_size,
            io_wait: tuning.io_wait(),
            idle_timeout: tunnel.idle_timeout(),
        }
    }
}

impl Default for WireOptions {
    fn default() -> Self {
        let tuning = Tuning::default();
        Self {
            buffer_size: tuning.buffer_size,
            io_wait: tuning.io_wait(),
            idle_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// source -> destination
    Forward,
    /// destination -> source
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Backward => f.write_str("backward"),
        }
    }
}

/// One live forwarding session.
pub struct Wire {
    label: String,
    options: WireOptions,
    last_active: Mutex<Instant>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    /// 仍在运行的方向任务数
    running: AtomicU8,
    finished: CancellationToken,
    forward: Meter,
    backward: Meter,
}

impl Wire {
    fn new(label: String, options: WireOptions) -> Self {
        Self {
            label,
            options,
            last_active: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            running: AtomicU8::new(2),
            finished: CancellationToken::new(),
            forward: Meter::new(),
            backward: Meter::new(),
        }
    }

    /// Couple `src` and `dst` and start both direction tasks.
    pub fn start(
        label: impl Into<String>,
        options: WireOptions,
        src: Connection,
        dst: Connection,
    ) -> Arc<Self> {
        let wire = Arc::new(Self::new(label.into(), options));

        let (src_read, src_write) = tokio::io::split(src);
        let (dst_read, dst_write) = tokio::io::split(dst);

        tokio::spawn(pump(wire.clone(), Direction::Forward, src_read, dst_write));
        tokio::spawn(pump(wire.clone(), Direction::Backward, dst_read, src_write));

        wire
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the wire closed and wake both direction tasks.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    /// Resolves once the wire has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Both direction tasks have returned; the meters will not change again.
    pub fn is_finished(&self) -> bool {
        self.running.load(Ordering::Acquire) == 0
    }

    /// Resolves once both direction tasks have returned.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    fn direction_done(&self) {
        if self.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finished.cancel();
        }
    }

    pub fn meter(&self, direction: Direction) -> &Meter {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Time since the last successful transfer in either direction.
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    fn idle_expired(&self) -> bool {
        self.options
            .idle_timeout
            .is_some_and(|timeout| self.idle_for() > timeout)
    }

    /// Run one I/O step. `None` polls once, `Some(wait)` blocks at most
    /// `wait` or until the wire is closed.
    async fn bounded<F, T>(&self, wait: Option<Duration>, fut: F) -> Step<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let result = match wait {
            None => fut.now_or_never(),
            Some(wait) => {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Step::Closed,
                    r = tokio::time::timeout(wait, fut) => r.ok(),
                }
            }
        };
        match result {
            Some(Ok(n)) => Step::Done(n),
            Some(Err(e)) => Step::Failed(e),
            None => Step::Pending,
        }
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wire")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .field("finished", &self.is_finished())
            .finish()
    }
}

enum Step<T> {
    Done(T),
    Pending,
    Closed,
    Failed(io::Error),
}

#[derive(Debug)]
enum Exit {
    Closed,
    Idle,
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

async fn pump<R, W>(wire: Arc<Wire>, direction: Direction, mut reader: R, mut writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = RingBuffer::new(wire.options.buffer_size);
    let meter = wire.meter(direction);
    let io_wait = wire.options.io_wait;

    let mut eof = false;
    // 上一轮读写都没有进展：两端都堵住了，这一轮写操作改为真正等待
    let mut stalled = false;
    // TLS 写入可能滞留在会话缓冲里，缓冲区清空后还要 flush
    let mut unflushed = false;

    let exit = loop {
        if wire.is_closed() {
            break Exit::Closed;
        }
        if wire.idle_expired() {
            break Exit::Idle;
        }
        let mut progressed = false;

        if !eof && buf.producible() {
            let busy = buf.consumable() || unflushed;
            let wait = (!busy).then_some(io_wait);
            match wire.bounded(wait, reader.read(buf.producer_buffer())).await {
                Step::Done(0) => eof = true,
                Step::Done(n) => {
                    buf.produce(n);
                    meter.produce(n as u64, 0);
                    wire.touch();
                    progressed = true;
                }
                Step::Pending => {}
                Step::Closed => break Exit::Closed,
                Step::Failed(e) => break Exit::ReadFailed(e),
            }
        }

        if buf.consumable() {
            let can_read = buf.producible() && !eof;
            let wait = (!can_read || stalled).then_some(io_wait);
            match wire.bounded(wait, writer.write(buf.consumer_buffer())).await {
                Step::Done(0) => break Exit::WriteFailed(io::ErrorKind::WriteZero.into()),
                Step::Done(n) => {
                    buf.consume(n);
                    meter.produce(0, n as u64);
                    wire.touch();
                    progressed = true;
                    unflushed = true;
                }
                Step::Pending => {}
                Step::Closed => break Exit::Closed,
                Step::Failed(e) => break Exit::WriteFailed(e),
            }
        }

        if unflushed && !buf.consumable() {
            match wire.bounded(Some(io_wait), writer.flush()).await {
                Step::Done(()) => unflushed = false,
                Step::Pending => {}
                Step::Closed => break Exit::Closed,
                Step::Failed(e) => break Exit::WriteFailed(e),
            }
        }

        if eof && !buf.consumable() && !unflushed {
            break Exit::Eof;
        }
        stalled = !progressed;
    };

    match &exit {
        Exit::Closed => {}
        Exit::Idle => info!("{} idle for {:?}, closing", wire, wire.idle_for()),
        Exit::Eof => debug!("{} {} end of stream", wire, direction),
        Exit::ReadFailed(e) => debug!("{} {} read failed: {}", wire, direction, e),
        Exit::WriteFailed(e) => debug!("{} {} write failed: {}", wire, direction, e),
    }

    // 先置关闭标志，再释放套接字，另一方向看到标志后直接退出
    if wire.close() {
        info!("D {}", wire);
    }
    let _ = tokio::time::timeout(io_wait, writer.shutdown()).await;
    // 最后一次计量之后才计数，清扫据此判断能否移除
    wire.direction_done();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn options(idle_timeout: Option<Duration>) -> WireOptions {
        WireOptions {
            buffer_size: 1024,
            io_wait: Duration::from_millis(20),
            idle_timeout,
        }
    }

    /// 返回 (wire, 客户端一侧, 服务端一侧)
    fn wire_pair(idle_timeout: Option<Duration>) -> (Arc<Wire>, DuplexStream, DuplexStream) {
        let (client, src) = tokio::io::duplex(4096);
        let (dst, server) = tokio::io::duplex(4096);
        let wire = Wire::start(
            "test 127.0.0.1:1/127.0.0.1:2",
            options(idle_timeout),
            Box::new(src),
            Box::new(dst),
        );
        (wire, client, server)
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let (wire, mut client, mut server) = wire_pair(None);

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.write_all(b"world!").await.unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world!");

        assert_eq!(wire.meter(Direction::Forward).consume(), (5, 5));
        assert_eq!(wire.meter(Direction::Backward).consume(), (6, 6));
        assert!(!wire.is_closed());
    }

    #[tokio::test]
    async fn test_larger_than_buffer_in_order() {
        let (_wire, client, server) = wire_pair(None);
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        // 服务端原样回显
        tokio::spawn(async move {
            let mut buf = vec![0u8; 777];
            loop {
                match server_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if server_write.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client_write.write_all(&payload).await.unwrap();
            client_write
        });
        let mut echoed = vec![0u8; expected.len()];
        client_read.read_exact(&mut echoed).await.unwrap();
        let _client_write = writer.await.unwrap();
        assert_eq!(echoed, expected);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_wire() {
        let (wire, _client, _server) = wire_pair(Some(Duration::from_millis(200)));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(wire.is_closed());
    }

    #[tokio::test]
    async fn test_activity_defers_idle_timeout() {
        let (wire, mut client, mut server) = wire_pair(Some(Duration::from_millis(200)));

        let mut buf = [0u8; 1];
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.write_all(b"x").await.unwrap();
            server.read_exact(&mut buf).await.unwrap();
        }
        assert!(!wire.is_closed());
    }

    #[tokio::test]
    async fn test_peer_close_closes_both_sides() {
        let (wire, client, mut server) = wire_pair(None);
        drop(client);

        tokio::time::timeout(Duration::from_secs(1), wire.closed())
            .await
            .expect("wire should close after source EOF");

        // 另一侧也会被关闭：读到 EOF
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), server.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_buffered_bytes_delivered_before_eof_close() {
        let (wire, mut client, mut server) = wire_pair(None);

        client.write_all(b"last words").await.unwrap();
        drop(client);

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), server.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"last words");
        wire.closed().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (wire, _client, _server) = wire_pair(None);
        assert!(wire.close());
        assert!(!wire.close());
        assert!(wire.is_closed());
    }

    #[tokio::test]
    async fn test_finished_after_both_directions_exit() {
        let (wire, _client, _server) = wire_pair(None);
        assert!(!wire.is_finished());

        wire.close();
        // 关闭只是通知，方向任务还没有返回
        assert!(!wire.is_finished());

        tokio::time::timeout(Duration::from_secs(1), wire.finished())
            .await
            .expect("direction tasks should exit after close");
        assert!(wire.is_finished());
    }
}
