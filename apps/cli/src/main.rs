//! # Apparatus CLI
//!
//! 奖励装置命令行工具（One-shot 模式：连接 -> 执行 -> 断开）
//!
//! ```bash
//! apparatus-cli --addr 192.168.0.10:9001 init
//! apparatus-cli move --carousel 1 --compartment 3 --monkey --wait
//! apparatus-cli light --color ELECTRIC_LIME
//! apparatus-cli wait-lever --input touch --active --timeout 10
//! apparatus-cli monitor
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{LeverInputArg, MotionArgs};

/// Apparatus CLI - 奖励装置命令行工具
#[derive(Parser, Debug)]
#[command(name = "apparatus-cli")]
#[command(about = "Command-line interface for remote reward apparatus control", long_about = None)]
#[command(version)]
struct Cli {
    /// 装置地址（HOST:PORT）
    #[arg(short, long, global = true, default_value = "127.0.0.1:9001")]
    addr: String,

    /// 连接超时（秒）
    #[arg(long, global = true, default_value_t = 5.0)]
    connect_timeout: f64,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 硬件复位
    Init,

    /// 硬件自检
    SelfTest,

    /// 清空人类侧奖励
    EmptyHuman,

    /// 转动转盘到指定格位
    Move {
        #[command(flatten)]
        args: MotionArgs,
    },

    /// 投放指定格位（开门、停留、关门）
    Deploy {
        #[command(flatten)]
        args: MotionArgs,
    },

    /// 设置灯带颜色
    Light {
        /// 色板名称、0xRRGGBB、#RRGGBB 或十进制整数
        #[arg(short, long)]
        color: String,
    },

    /// 测试灯开关
    TestLight {
        #[arg(long)]
        on: bool,
        #[arg(short, long)]
        color: Option<String>,
    },

    /// 人类侧灯开关
    HumanLight {
        #[arg(long)]
        on: bool,
        #[arg(short, long)]
        color: Option<String>,
    },

    /// 拉杆锁（--open 解锁，否则上锁）
    Lever {
        #[arg(long)]
        open: bool,
    },

    /// 等待拉杆输入到达指定逻辑状态
    WaitLever {
        #[arg(short, long, value_enum)]
        input: LeverInputArg,
        /// 等待有效（否则等待无效）
        #[arg(long)]
        active: bool,
        /// 超时（秒），缺省为无限等待
        #[arg(short, long)]
        timeout: Option<f64>,
    },

    /// 播放声音
    Sound {
        /// 相对声音目录的文件名，缺省为默认文件
        #[arg(short, long)]
        file: Option<String>,
        #[arg(long, default_value_t = 90)]
        volume: u8,
        /// 延迟（秒）后由装置端执行
        #[arg(long)]
        delay: Option<f64>,
    },

    /// 打印输入事件直到 Ctrl+C
    Monitor {
        /// 心跳间隔（毫秒），0 表示不发送
        #[arg(long, default_value_t = 0)]
        heartbeat_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose {
        "apparatus=debug"
    } else {
        "apparatus=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    commands::execute(&cli.addr, cli.connect_timeout, cli.command)
}
