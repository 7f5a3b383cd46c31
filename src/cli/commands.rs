use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::config::{expand_path, Configuration};
use crate::server;

use super::{bench, cert, echo, pipe, BenchCommand, Cli, Commands};

/// Execute CLI commands
pub async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run { configs } => {
            let configuration = load(configs.clone()).await?;
            server::run_server(configuration).await?;
        }
        Commands::Check { configs } => {
            let configuration = load(configs.clone()).await?;
            check(&configuration)?;
        }
        Commands::Cert {
            cert_out,
            key_out,
            common_name,
            alt_names,
        } => {
            cert::generate_certificate(cert_out, key_out, common_name, alt_names)?;
        }
        Commands::Echo { bind } => {
            echo::run_echo_server(bind).await?;
        }
        Commands::Bench { kind } => match kind {
            BenchCommand::Throughput {
                target,
                loops,
                concurrency,
                block_size,
            } => {
                let report = bench::run_throughput(target, *loops, *concurrency, *block_size).await?;
                println!("{}", report);
            }
            BenchCommand::Latency {
                target,
                messages,
                concurrency,
                message_size,
            } => {
                let report = bench::run_latency(target, *messages, *concurrency, *message_size).await?;
                println!("{}", report);
            }
        },
        Commands::Pipe {
            input,
            output,
            block_size,
            size,
        } => {
            let report = pipe::run_pipe(input, output, *block_size, *size).await?;
            println!("{}", report);
        }
    }

    Ok(())
}

/// 读取配置并解析全部地址；域名解析会阻塞，放到阻塞线程池里做
async fn load(configs: Vec<PathBuf>) -> Result<Configuration> {
    let paths: Vec<PathBuf> = configs
        .iter()
        .map(|p| expand_path(&p.to_string_lossy()))
        .collect();
    for path in &paths {
        info!("Loading configuration from: {}", path.display());
    }
    tokio::task::spawn_blocking(move || Configuration::load(&paths))
        .await
        .context("Configuration loader panicked")?
        .context("Failed to load configuration")
}

/// 打印每个隧道，有被拒绝的隧道时返回错误
fn check(configuration: &Configuration) -> Result<()> {
    for tunnel in &configuration.tunnels {
        let mode = if tunnel.connect.len() > 1 {
            "round-robin"
        } else {
            "single"
        };
        println!("✓ {} ({}, {} endpoint(s))", tunnel, mode, tunnel.connect.len());
    }
    for (name, e) in &configuration.rejected {
        println!("✗ {}: {}", name, e);
    }

    if !configuration.rejected.is_empty() {
        anyhow::bail!(
            "{} of {} tunnel(s) rejected",
            configuration.rejected.len(),
            configuration.rejected.len() + configuration.tunnels.len()
        );
    }
    if configuration.tunnels.is_empty() {
        anyhow::bail!("No tunnels configured");
    }

    println!("Configuration OK");
    Ok(())
}
