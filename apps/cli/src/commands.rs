//! 子命令实现

use crate::Commands;
use anyhow::{Context, Result, anyhow, bail};
use apparatus_client::{ApparatusClient, ClientBuilder, WaitHandle, active_state};
use apparatus_protocol::{CarouselId, Color, Command, LeverInput};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use std::time::Duration;
use tracing::info;

/// 确认式调用的应答超时（自检可能持续较久）
const REPLY_TIMEOUT: Duration = Duration::from_secs(300);

/// move / deploy 共用参数
#[derive(Args, Debug)]
pub struct MotionArgs {
    /// 转盘编号（1 或 2）
    #[arg(long, value_parser = parse_carousel)]
    pub carousel: CarouselId,

    /// 格位编号（0..=16）
    #[arg(long)]
    pub compartment: u8,

    /// 对准猴子侧门（否则为人类侧）
    #[arg(long)]
    pub monkey: bool,

    /// 等待运动完成后再返回
    #[arg(long)]
    pub wait: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LeverInputArg {
    Touch,
    Pulled,
    Released,
}

impl From<LeverInputArg> for LeverInput {
    fn from(arg: LeverInputArg) -> Self {
        match arg {
            LeverInputArg::Touch => LeverInput::Touch,
            LeverInputArg::Pulled => LeverInput::Pulled,
            LeverInputArg::Released => LeverInput::Released,
        }
    }
}

fn parse_carousel(s: &str) -> Result<CarouselId, String> {
    match s {
        "1" => Ok(CarouselId::First),
        "2" => Ok(CarouselId::Second),
        _ => Err(format!("carousel must be 1 or 2, got '{}'", s)),
    }
}

fn parse_color(s: &str) -> Result<Color> {
    s.parse::<Color>().map_err(|e| anyhow!(e))
}

fn parse_optional_color(s: Option<&str>) -> Result<Option<Color>> {
    s.map(parse_color).transpose()
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid duration {}", secs))
}

pub fn execute(addr: &str, connect_timeout: f64, command: Commands) -> Result<()> {
    let builder = ClientBuilder::new(addr).connect_timeout(seconds(connect_timeout)?);
    match command {
        Commands::Monitor { heartbeat_ms } => monitor(builder, heartbeat_ms),
        Commands::WaitLever {
            input,
            active,
            timeout,
        } => wait_lever(&builder.connect()?, input.into(), active, timeout),
        other => {
            let client = builder.connect()?;
            let command = to_command(other)?;
            let name = command.name();
            client.call_confirmed(command, Some(REPLY_TIMEOUT))?;
            info!("{} done", name);
            Ok(())
        },
    }
}

/// 一次性子命令 → 线上命令
///
/// `move` / `deploy` 的 `--wait` 使用服务端阻塞模式：应答在运动完成后才返回。
fn to_command(command: Commands) -> Result<Command> {
    Ok(match command {
        Commands::Init => Command::InitHw {},
        Commands::SelfTest => Command::HwSelfTest {},
        Commands::EmptyHuman => Command::EmptyHuman {},
        Commands::Move { args } => Command::MoveTo {
            carousel_id: args.carousel,
            compartment_id: args.compartment,
            monkey: args.monkey,
            blocking: args.wait,
        },
        Commands::Deploy { args } => Command::Deploy {
            carousel_id: args.carousel,
            compartment_id: args.compartment,
            monkey: args.monkey,
            blocking: args.wait,
        },
        Commands::Light { color } => Command::SetLight {
            color: parse_color(&color)?,
            timestamp: None,
        },
        Commands::TestLight { on, color } => Command::SetTestLight {
            state: on,
            color: parse_optional_color(color.as_deref())?,
            timestamp: None,
        },
        Commands::HumanLight { on, color } => Command::SetHumanLight {
            state: on,
            color: parse_optional_color(color.as_deref())?,
        },
        Commands::Lever { open } => Command::SetLeverOpen {
            state: open,
            timestamp: None,
        },
        Commands::Sound { file, volume, delay } => {
            let timestamp: Option<DateTime<Utc>> = match delay {
                Some(delay) => Some(Utc::now() + chrono::Duration::from_std(seconds(delay)?)?),
                None => None,
            };
            Command::PlaySound {
                file,
                volume,
                timestamp,
            }
        },
        Commands::Monitor { .. } | Commands::WaitLever { .. } => {
            bail!("not a one-shot command")
        },
    })
}

fn wait_lever(client: &ApparatusClient, input: LeverInput, active: bool, timeout: Option<f64>) -> Result<()> {
    // 逻辑状态与电平的换算是对合的
    let level = active_state(input, active);
    let timeout = timeout.map(seconds).transpose()?;
    if !client.wait_lever_state(input, level, timeout)? {
        bail!("Timed out waiting for {} (active={})", input.event_name(), active);
    }
    println!("{} active={}", input.event_name(), active);
    Ok(())
}

/// Ctrl+C 置位的中断信号
fn interrupt_signal() -> Result<WaitHandle> {
    let interrupted = WaitHandle::new("interrupt");
    let handle = interrupted.clone();
    ctrlc::set_handler(move || handle.set()).context("Failed to set signal handler")?;
    Ok(interrupted)
}

fn monitor(builder: ClientBuilder, heartbeat_ms: u64) -> Result<()> {
    let mut builder = builder.observer(|input: LeverInput, active: bool, ts: DateTime<Utc>| {
        println!("{} {:<20} active={}", ts.to_rfc3339(), input.event_name(), active);
    });
    if heartbeat_ms > 0 {
        builder = builder.heartbeat(Duration::from_millis(heartbeat_ms));
    }
    let client = builder.connect()?;
    let interrupted = interrupt_signal()?;
    eprintln!("Monitoring inputs. Press Ctrl+C to stop.");

    while !interrupted.wait(Some(Duration::from_millis(200))) {
        if client.is_closed() {
            bail!("Connection closed by apparatus");
        }
    }
    client.close();
    Ok(())
}
