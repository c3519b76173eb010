//! 硬件协作者抽象层
//!
//! 装置核心只通过以下窄接口访问硬件：
//! - [`StepperMotor`]：按有符号步数阻塞转动
//! - [`AngleEncoder`]：读取转盘当前角度
//! - [`ServoChannel`]：门/拉杆锁舵机的开、关与断电
//! - [`LightPanel`]：灯带颜色、测试灯与人类侧灯
//! - [`SoundPlayer`]：播放声音文件
//! - [`LeverInputs`]：读取拉杆数字输入并订阅原始跳变
//!
//! 脉冲生成、加减速曲线、像素渲染与编码器寄存器协议都在这些接口之后。
//! `mock` feature 提供可断言的模拟实现（[`sim`]）。

mod error;
#[cfg(feature = "mock")]
pub mod sim;

pub use error::{DeviceError, DeviceErrorKind, HwError};

use apparatus_protocol::Color;
use crossbeam_channel::Receiver;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// 步进电机
pub trait StepperMotor: Send {
    /// 使能/断电
    fn set_enabled(&mut self, enabled: bool) -> Result<(), HwError>;

    /// 转动 `steps` 步（符号为方向），运动完成后返回
    fn step(&mut self, steps: i64) -> Result<(), HwError>;
}

/// 绝对角度编码器
pub trait AngleEncoder: Send {
    /// 当前角度，`[0, 360)` 度
    fn read_angle_deg(&mut self) -> Result<f64, HwError>;

    /// 写入零点寄存器
    fn set_zero(&mut self, zero_reg: u16) -> Result<(), HwError>;
}

/// 舵机通道
pub trait ServoChannel: Send {
    fn set_open(&mut self, open: bool) -> Result<(), HwError>;

    /// 停止输出脉冲（舵机断电）
    fn release(&mut self) -> Result<(), HwError>;
}

/// 灯光输出
pub trait LightPanel: Send {
    fn set_strip(&mut self, color: Color) -> Result<(), HwError>;

    /// `color` 为 `None` 时保留之前的颜色
    fn set_test_light(&mut self, on: bool, color: Option<Color>) -> Result<(), HwError>;

    fn set_human_light(&mut self, on: bool, color: Option<Color>) -> Result<(), HwError>;
}

/// 声音播放（非阻塞）
pub trait SoundPlayer: Send {
    fn play(&mut self, path: &Path, volume: u8) -> Result<(), HwError>;
}

/// 原始（未去抖）输入跳变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEdge {
    pub pin: u8,
    pub at: Instant,
}

/// 拉杆数字输入
pub trait LeverInputs: Send + Sync {
    /// 读取当前电平
    fn level(&self, pin: u8) -> Result<bool, HwError>;

    /// 订阅原始跳变
    ///
    /// 每个订阅者拿到独立的接收端；接收端被丢弃后订阅自动失效。
    fn subscribe_edges(&self) -> Receiver<InputEdge>;
}

/// 单个转盘的硬件组
pub struct CarouselHardware {
    pub motor: Box<dyn StepperMotor>,
    /// 无传感器模式下为 `None`
    pub encoder: Option<Box<dyn AngleEncoder>>,
    pub monkey_door: Box<dyn ServoChannel>,
    pub human_door: Box<dyn ServoChannel>,
}

/// 整台装置的硬件组
pub struct ApparatusHardware {
    pub carousels: [CarouselHardware; 2],
    pub lights: Box<dyn LightPanel>,
    pub sound: Box<dyn SoundPlayer>,
    pub lever_lock: Box<dyn ServoChannel>,
    pub lever_inputs: Arc<dyn LeverInputs>,
}
