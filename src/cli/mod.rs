pub mod bench;
pub mod cert;
pub mod commands;
pub mod echo;
pub mod pipe;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

// Re-export commonly used items
pub use commands::execute_command;

#[derive(Parser, Debug)]
#[command(name = "tls-forward")]
#[command(author, version, about = "TCP/TLS forwarding tunnels with health-checked load balancing", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志详细程度（-v info，-vv debug，-vvv trace；RUST_LOG 优先）
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Cli {
    /// `-v` 次数对应的默认日志级别
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动配置文件里的全部隧道
    Run {
        /// 配置文件路径（可以多个）
        #[arg(required = true, value_name = "CONFIG")]
        configs: Vec<PathBuf>,
    },
    /// 检查配置文件并列出隧道
    Check {
        /// 配置文件路径（可以多个）
        #[arg(required = true, value_name = "CONFIG")]
        configs: Vec<PathBuf>,
    },
    /// 生成自签名证书
    Cert {
        /// 证书输出路径
        #[arg(long, value_name = "PATH")]
        cert_out: PathBuf,

        /// 私钥输出路径
        #[arg(long, value_name = "PATH")]
        key_out: PathBuf,

        /// 证书的 Common Name
        #[arg(long, default_value = "localhost")]
        common_name: String,

        /// 证书的 SubjectAltName（用逗号分隔多个）
        #[arg(long, value_delimiter = ',', value_name = "DNS,...")]
        alt_names: Vec<String>,
    },
    /// 回显服务器，用于测试隧道
    Echo {
        /// 监听地址
        #[arg(short, long, default_value = "127.0.0.1:10000")]
        bind: String,
    },
    /// 通过隧道压测回显服务器
    Bench {
        #[command(subcommand)]
        kind: BenchCommand,
    },
    /// 在套接字和文件之间搬运数据
    Pipe {
        /// 输入：监听地址（host:port）或文件
        #[arg(long = "in", value_name = "ENDPOINT|FILE")]
        input: String,

        /// 输出：连接地址（host:port）或文件
        #[arg(long = "out", value_name = "ENDPOINT|FILE")]
        output: String,

        /// 环形缓冲区大小
        #[arg(long, default_value_t = 8192)]
        block_size: usize,

        /// 最多搬运的字节数
        #[arg(long, default_value_t = 1024 * 1024)]
        size: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum BenchCommand {
    /// 并发发送随机数据块，校验回显并统计吞吐量
    Throughput {
        /// 隧道或回显服务器地址
        #[arg(long, default_value = "127.0.0.1:10002")]
        target: String,

        /// 每个连接发送的数据块数
        #[arg(long, default_value_t = 16)]
        loops: usize,

        /// 并发连接数
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// 数据块大小
        #[arg(long, default_value_t = 8 * 1024 * 1024)]
        block_size: usize,
    },
    /// 逐条往返小消息，统计平均延迟
    Latency {
        /// 隧道或回显服务器地址
        #[arg(long, default_value = "127.0.0.1:10002")]
        target: String,

        /// 每个连接往返的消息数
        #[arg(long, default_value_t = 16384)]
        messages: usize,

        /// 并发连接数
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// 消息大小
        #[arg(long, default_value_t = 32)]
        message_size: usize,
    },
}
