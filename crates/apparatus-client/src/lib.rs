//! 奖励装置 RPC 客户端
//!
//! - [`ApparatusClient`]：连接、发送命令、按顺序匹配应答、分发服务端推送事件
//! - [`WaitHandle`]：可等待的锁存信号（运动完成、输入电平）
//! - [`or_wait`] / [`and_wait`]：多信号等待组合
//!
//! # 示例
//!
//! ```no_run
//! use apparatus_client::{ApparatusClient, or_wait};
//! use apparatus_protocol::{CarouselId, LeverInput};
//! use std::time::Duration;
//!
//! let client = ApparatusClient::connect("192.168.0.10:9000")?;
//! client.move_to(CarouselId::First, 3, true, false)?;
//!
//! let touched = client.lever_signal(LeverInput::Touch, true);
//! let moved = client.motion_signal(CarouselId::First, apparatus_client::MotionOp::MoveTo);
//! match or_wait(&touched, &moved, Some(Duration::from_secs(5))) {
//!     Some(0) => println!("touched first"),
//!     Some(_) => println!("arrived first"),
//!     None => println!("timeout"),
//! }
//! # Ok::<(), apparatus_client::ClientError>(())
//! ```

pub mod client;
mod error;
pub mod observer;
pub mod signal;
pub mod wait;

pub use client::{ApparatusClient, ClientBuilder, MotionOp};
pub use error::ClientError;
pub use observer::{IoObserver, active_state};
pub use signal::{Subscription, WaitHandle};
pub use wait::{and_wait, and_wait_all, or_wait, or_wait_any};
