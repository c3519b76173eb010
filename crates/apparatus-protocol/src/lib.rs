//! 奖励装置远程控制协议层
//!
//! 本 crate 定义客户端与装置服务端之间的线上协议：
//! - 帧格式：`u32` 小端长度前缀 + JSON 载荷（[`codec`]）
//! - 消息种类：`command` / `reply` / `io_event` / `wait_event` / `msg`（[`message`]）
//! - 封闭命令集：命令名静态表 + 类型化参数（[`command`]）
//! - 共享标识：转盘编号、拉杆输入、颜色（[`ids`]、[`color`]）
//!
//! 本层不依赖任何硬件或线程模型，客户端与服务端共同使用。

pub mod codec;
pub mod color;
pub mod command;
mod error;
pub mod ids;
pub mod message;

pub use codec::{
    DEFAULT_MAX_FRAME_LEN, FrameReader, HEADER_LEN, decode_payload, decode_stream, encode,
    write_message,
};
pub use color::Color;
pub use command::{COMMAND_NAMES, Command, wait_timeout};
pub use error::{CodecError, CommandError};
pub use ids::{COMPARTMENT_COUNT, CarouselId, LeverInput};
pub use message::{CommandFrame, IoEvent, Message, Reply, TextMessage, WaitEvent};
