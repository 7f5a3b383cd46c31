//! 套接字和文件之间的单向管道，经由 `RingBuffer` 搬运
//!
//! 一端是 `host:port`，另一端是文件路径：
//! - 输入是地址时在该地址监听，接受一个连接，把收到的数据追加到文件；
//! - 输出是地址时连接过去，把文件内容发给对端。

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use crate::liveness::Throughput;
use crate::ring_buffer::RingBuffer;

/// 一次管道搬运的结果
#[derive(Debug, Clone, Copy)]
pub struct PipeReport {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl std::fmt::Display for PipeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Throughput::new(self.bytes, self.elapsed))
    }
}

/// 形如 `host:port` 的参数当作网络地址，其余当作文件路径
pub fn is_endpoint(arg: &str) -> bool {
    if arg.contains('/') || arg.contains('\\') {
        return false;
    }
    match arg.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// 把 `input` 的内容搬到 `output`，最多 `limit` 字节，输入结束时提前停止
pub async fn run_pipe(input: &str, output: &str, block_size: usize, limit: u64) -> Result<PipeReport> {
    if block_size == 0 {
        bail!("block size must be non-zero");
    }

    match (is_endpoint(input), is_endpoint(output)) {
        (true, false) => {
            let listener = TcpListener::bind(input)
                .await
                .with_context(|| format!("Failed to listen on {}", input))?;
            info!("pipe: waiting on {}", listener.local_addr()?);
            let (socket, peer) = listener.accept().await?;
            info!("pipe: {} -> {}", peer, output);
            sock_to_file(socket, Path::new(output), block_size, limit).await
        }
        (false, true) => {
            let socket = TcpStream::connect(output)
                .await
                .with_context(|| format!("Failed to connect to {}", output))?;
            info!("pipe: {} -> {}", input, output);
            file_to_sock(Path::new(input), socket, block_size, limit).await
        }
        _ => bail!("exactly one of input and output must be host:port"),
    }
}

/// 接收连接上的数据并追加到文件
pub async fn sock_to_file(
    mut socket: TcpStream,
    path: &Path,
    block_size: usize,
    limit: u64,
) -> Result<PipeReport> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let start = Instant::now();
    let bytes = copy_through(&mut socket, &mut file, block_size, limit).await?;
    file.sync_all().await?;
    Ok(PipeReport {
        bytes,
        elapsed: start.elapsed(),
    })
}

/// 把文件内容发送到连接上
pub async fn file_to_sock(
    path: &Path,
    mut socket: TcpStream,
    block_size: usize,
    limit: u64,
) -> Result<PipeReport> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let start = Instant::now();
    let bytes = copy_through(&mut file, &mut socket, block_size, limit).await?;
    socket.shutdown().await?;
    Ok(PipeReport {
        bytes,
        elapsed: start.elapsed(),
    })
}

/// 交替填充和排空同一个环形缓冲区，返回写出的字节数
async fn copy_through<R, W>(reader: &mut R, writer: &mut W, block_size: usize, limit: u64) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = RingBuffer::new(block_size);
    let mut copied = 0u64;
    let mut eof = false;

    while copied < limit {
        // 已读入但未写出的也算在内，不多读
        let room = limit - copied - buf.len() as u64;
        if !eof && room > 0 && buf.producible() {
            let window = buf.producer_buffer();
            let take = window.len().min(room.min(usize::MAX as u64) as usize);
            let n = reader.read(&mut window[..take]).await?;
            if n == 0 {
                eof = true;
            } else {
                buf.produce(n);
            }
        }

        if buf.consumable() {
            let n = writer.write(buf.consumer_buffer()).await?;
            if n == 0 {
                bail!("output closed after {} bytes", copied);
            }
            buf.consume(n);
            copied += n as u64;
        } else if eof {
            break;
        }
    }

    writer.flush().await?;
    Ok(copied)
}
