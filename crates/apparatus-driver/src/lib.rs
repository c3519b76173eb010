//! 奖励装置驱动层
//!
//! 在硬件抽象（`apparatus-hw`）之上实现装置行为：
//! - [`carousel`]：转盘位置控制器（最短路径换算、编码器校正、FIFO 运动队列）
//! - [`lever`]：拉杆锁与输入等待
//! - [`servo`] / [`timer`]：自动断电舵机与可取消的一次性定时任务
//! - [`apparatus`]：面向命令分发层的整机门面
//! - [`config`]：TOML 配置

pub mod apparatus;
pub mod carousel;
pub mod config;
mod error;
pub mod lever;
pub mod servo;
pub mod timer;

pub use apparatus::Apparatus;
pub use carousel::{Carousel, DoorSide, Geometry, MotionCallback, MotionKind, MotionTicket};
pub use config::{
    ApparatusConfig, CarouselConfig, LeverConfig, MotionConfig, ServerConfig, SoundConfig,
};
pub use error::{ConfigError, DriverError};
pub use lever::Lever;
pub use servo::TimedServo;
pub use timer::{OneShot, TimerSlot};
