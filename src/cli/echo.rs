use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

const ECHO_BUFFER_SIZE: usize = 512 * 1024;

/// 回显收到的所有字节，直到 Ctrl+C
pub async fn run_echo_server(bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to listen on {}", bind))?;
    println!("Echo server listening on {}", listener.local_addr()?);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    info!("+ {}", peer);
                    tokio::spawn(async move {
                        match echo(stream).await {
                            Ok(total) => info!("- {} ({} bytes)", peer, total),
                            Err(e) => debug!("- {}: {}", peer, e),
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            _ = &mut shutdown => break,
        }
    }

    Ok(())
}

/// 回显直到对端关闭，返回回显的字节数
pub(crate) async fn echo(mut stream: TcpStream) -> std::io::Result<u64> {
    let mut buf = vec![0u8; ECHO_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        stream.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
