//! 奖励装置守护进程主入口
//!
//! 每次服务一个客户端连接；连接断开后复位硬件并继续等待下一个连接。

use anyhow::{Context, Result};
use apparatus_driver::{Apparatus, ApparatusConfig};
use apparatus_hw::sim::{SimApparatus, SimConfig};
use apparatus_server::Server;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 奖励装置守护进程
///
/// 通过 TCP（长度前缀 JSON 帧）对外提供转盘、灯光、声音与拉杆控制
#[derive(Parser, Debug)]
#[command(name = "apparatus-daemon")]
#[command(about = "Reward apparatus daemon - framed JSON RPC over TCP", long_about = None)]
#[command(version)]
struct Args {
    /// 配置文件路径（TOML）
    ///
    /// 默认: 使用内置默认配置
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听地址（覆盖配置文件）
    #[arg(long)]
    bind: Option<String>,

    /// 监听端口（覆盖配置文件）
    #[arg(long)]
    port: Option<u16>,

    /// 启动时跳过 init_hw
    #[arg(long)]
    no_init: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<ApparatusConfig> {
    let mut config = match &args.config {
        Some(path) => ApparatusConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ApparatusConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    Ok(config)
}

/// 按配置生成模拟硬件（步距、方向、传感器与引脚与配置一致）
fn sim_hardware(config: &ApparatusConfig) -> SimApparatus {
    SimApparatus::new(SimConfig {
        deg_per_step: config.motion.deg_per_step(),
        direction_sign: config.motion.direction_sign,
        sensored: [!config.carousel1.sensorless, !config.carousel2.sensorless],
        lever_pins: vec![
            config.lever.switch_io,
            config.lever.touch_io,
            config.lever.switch_up_io,
        ],
        ..SimConfig::default()
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.verbose {
        "apparatus=debug"
    } else {
        "apparatus=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    let config = Arc::new(load_config(&args)?);
    info!(
        "Apparatus daemon starting (bind {}:{}, simulated hardware)",
        config.server.bind, config.server.port
    );

    let sim = sim_hardware(&config);
    let apparatus = Arc::new(
        Apparatus::new(config.clone(), sim.hardware()).context("Failed to create apparatus")?,
    );
    if !args.no_init {
        apparatus.init_hw().context("init_hw failed")?;
    }

    let server = Server::bind(apparatus.clone()).context("Failed to bind server")?;
    let handle = server.handle();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal. Shutting down...");
        handle.shutdown();
    })
    .context("Failed to set signal handler")?;

    info!("Listening on {}. Press Ctrl+C to stop.", server.local_addr());
    server.run()?;

    if let Err(e) = apparatus.motors_off() {
        warn!("motors_off on shutdown failed: {}", e);
    }
    info!("Apparatus daemon stopped");
    Ok(())
}
