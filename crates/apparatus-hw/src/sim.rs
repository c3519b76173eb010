//! 模拟硬件
//!
//! 每个模拟设备都是 `Clone` 的共享句柄：一份装进 [`ApparatusHardware`] 交给驱动，
//! 另一份留在测试中读取记录、注入输入跳变或丢步。

use crate::{
    AngleEncoder, ApparatusHardware, CarouselHardware, HwError, InputEdge, LeverInputs,
    LightPanel, ServoChannel, SoundPlayer, StepperMotor,
};
use apparatus_protocol::Color;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// 模拟装置参数
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// 每步角度（度）
    pub deg_per_step: f64,
    /// 步数符号与角度增加方向的关系（±1）
    pub direction_sign: i64,
    /// 每步耗时
    pub step_duration: Duration,
    /// 各转盘是否带编码器
    pub sensored: [bool; 2],
    /// 拉杆输入引脚
    pub lever_pins: Vec<u8>,
    /// 转盘上电时的物理角度
    pub initial_angle_deg: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            deg_per_step: 0.5 / 8.0,
            direction_sign: -1,
            step_duration: Duration::from_micros(10),
            sensored: [true, true],
            lever_pins: vec![17, 27, 22],
            initial_angle_deg: 180.0,
        }
    }
}

// ==================== 步进电机 ====================

#[derive(Debug)]
struct StepperState {
    enabled: AtomicBool,
    moving: AtomicBool,
    overlaps: AtomicUsize,
    position: AtomicI64,
    slip: AtomicI64,
    commands: Mutex<Vec<i64>>,
    step_duration: Duration,
}

/// 模拟步进电机：记录每条步进命令并检测重叠运动
#[derive(Debug, Clone)]
pub struct SimStepper {
    state: Arc<StepperState>,
}

impl SimStepper {
    pub fn new(step_duration: Duration) -> Self {
        Self {
            state: Arc::new(StepperState {
                enabled: AtomicBool::new(false),
                moving: AtomicBool::new(false),
                overlaps: AtomicUsize::new(0),
                position: AtomicI64::new(0),
                slip: AtomicI64::new(0),
                commands: Mutex::new(Vec::new()),
                step_duration,
            }),
        }
    }

    /// 收到的全部步进命令（含 0 以外的所有调用）
    pub fn commands(&self) -> Vec<i64> {
        self.state.commands.lock().clone()
    }

    /// 累计实际走过的步数
    pub fn position(&self) -> i64 {
        self.state.position.load(Ordering::SeqCst)
    }

    /// 两条步进命令在时间上重叠的次数
    pub fn overlaps(&self) -> usize {
        self.state.overlaps.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    /// 下一条命令丢失 `steps` 步
    pub fn set_slip(&self, steps: i64) {
        self.state.slip.store(steps.abs(), Ordering::SeqCst);
    }
}

impl StepperMotor for SimStepper {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), HwError> {
        self.state.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn step(&mut self, steps: i64) -> Result<(), HwError> {
        if !self.is_enabled() {
            return Err(HwError::MotorDisabled);
        }
        if self.state.moving.swap(true, Ordering::SeqCst) {
            self.state.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.state.commands.lock().push(steps);

        let slip = self.state.slip.swap(0, Ordering::SeqCst).min(steps.abs());
        let executed = steps - steps.signum() * slip;
        spin_sleep::sleep(self.state.step_duration * steps.unsigned_abs() as u32);
        self.state.position.fetch_add(executed, Ordering::SeqCst);
        trace!("sim stepper: {} steps ({} executed)", steps, executed);

        self.state.moving.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ==================== 编码器 ====================

/// 模拟编码器：角度由所绑定电机的实际步数推算
#[derive(Debug, Clone)]
pub struct SimEncoder {
    motor: SimStepper,
    deg_per_step: f64,
    direction_sign: i64,
    initial_angle_deg: f64,
    zero_reg: Arc<Mutex<u16>>,
}

impl SimEncoder {
    pub fn new(motor: SimStepper, deg_per_step: f64, direction_sign: i64, initial_angle_deg: f64) -> Self {
        Self {
            motor,
            deg_per_step,
            direction_sign,
            initial_angle_deg,
            zero_reg: Arc::new(Mutex::new(0)),
        }
    }

    pub fn angle(&self) -> f64 {
        let travelled = self.motor.position() as f64 * self.deg_per_step * self.direction_sign as f64;
        (self.initial_angle_deg + travelled).rem_euclid(360.0)
    }

    pub fn zero_reg(&self) -> u16 {
        *self.zero_reg.lock()
    }
}

impl AngleEncoder for SimEncoder {
    fn read_angle_deg(&mut self) -> Result<f64, HwError> {
        Ok(self.angle())
    }

    fn set_zero(&mut self, zero_reg: u16) -> Result<(), HwError> {
        *self.zero_reg.lock() = zero_reg;
        Ok(())
    }
}

// ==================== 舵机 ====================

/// 舵机动作记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoAction {
    Open,
    Close,
    Release,
}

#[derive(Debug, Default)]
struct ServoState {
    open: bool,
    energized: bool,
    history: Vec<ServoAction>,
}

#[derive(Debug, Clone, Default)]
pub struct SimServo {
    state: Arc<Mutex<ServoState>>,
}

impl SimServo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn is_energized(&self) -> bool {
        self.state.lock().energized
    }

    pub fn history(&self) -> Vec<ServoAction> {
        self.state.lock().history.clone()
    }
}

impl ServoChannel for SimServo {
    fn set_open(&mut self, open: bool) -> Result<(), HwError> {
        let mut state = self.state.lock();
        state.open = open;
        state.energized = true;
        state
            .history
            .push(if open { ServoAction::Open } else { ServoAction::Close });
        Ok(())
    }

    fn release(&mut self) -> Result<(), HwError> {
        let mut state = self.state.lock();
        state.energized = false;
        state.history.push(ServoAction::Release);
        Ok(())
    }
}

// ==================== 灯光 ====================

#[derive(Debug, Default)]
struct LightState {
    strip: Color,
    strip_history: Vec<Color>,
    test_light: (bool, Color),
    human_light: (bool, Color),
}

#[derive(Debug, Clone, Default)]
pub struct SimLights {
    state: Arc<Mutex<LightState>>,
}

impl SimLights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strip(&self) -> Color {
        self.state.lock().strip
    }

    pub fn strip_history(&self) -> Vec<Color> {
        self.state.lock().strip_history.clone()
    }

    pub fn test_light(&self) -> (bool, Color) {
        self.state.lock().test_light
    }

    pub fn human_light(&self) -> (bool, Color) {
        self.state.lock().human_light
    }
}

impl LightPanel for SimLights {
    fn set_strip(&mut self, color: Color) -> Result<(), HwError> {
        let mut state = self.state.lock();
        state.strip = color;
        state.strip_history.push(color);
        Ok(())
    }

    fn set_test_light(&mut self, on: bool, color: Option<Color>) -> Result<(), HwError> {
        let mut state = self.state.lock();
        state.test_light = (on, color.unwrap_or(state.test_light.1));
        Ok(())
    }

    fn set_human_light(&mut self, on: bool, color: Option<Color>) -> Result<(), HwError> {
        let mut state = self.state.lock();
        state.human_light = (on, color.unwrap_or(state.human_light.1));
        Ok(())
    }
}

// ==================== 声音 ====================

#[derive(Debug, Clone, Default)]
pub struct SimSound {
    plays: Arc<Mutex<Vec<(PathBuf, u8)>>>,
}

impl SimSound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plays(&self) -> Vec<(PathBuf, u8)> {
        self.plays.lock().clone()
    }
}

impl SoundPlayer for SimSound {
    fn play(&mut self, path: &Path, volume: u8) -> Result<(), HwError> {
        self.plays.lock().push((path.to_path_buf(), volume));
        Ok(())
    }
}

// ==================== 拉杆输入 ====================

#[derive(Debug, Default)]
struct LeverState {
    levels: Mutex<HashMap<u8, bool>>,
    subscribers: Mutex<Vec<Sender<InputEdge>>>,
}

/// 模拟拉杆输入：测试通过 [`SimLever::set_level`] 注入跳变
#[derive(Debug, Clone, Default)]
pub struct SimLever {
    state: Arc<LeverState>,
}

impl SimLever {
    pub fn new(pins: &[u8]) -> Self {
        let lever = Self::default();
        lever
            .state
            .levels
            .lock()
            .extend(pins.iter().map(|&pin| (pin, false)));
        lever
    }

    /// 设置电平；电平变化时向所有订阅者广播一次跳变
    pub fn set_level(&self, pin: u8, level: bool) {
        {
            let mut levels = self.state.levels.lock();
            match levels.get_mut(&pin) {
                Some(current) if *current != level => *current = level,
                _ => return,
            }
        }
        let edge = InputEdge {
            pin,
            at: Instant::now(),
        };
        self.state
            .subscribers
            .lock()
            .retain(|tx| tx.send(edge).is_ok());
    }

    /// 以固定间隔依次设置电平（模拟机械抖动）
    pub fn chatter(&self, pin: u8, levels: &[bool], gap: Duration) {
        for &level in levels {
            self.set_level(pin, level);
            spin_sleep::sleep(gap);
        }
    }
}

impl LeverInputs for SimLever {
    fn level(&self, pin: u8) -> Result<bool, HwError> {
        self.state
            .levels
            .lock()
            .get(&pin)
            .copied()
            .ok_or(HwError::UnknownPin(pin))
    }

    fn subscribe_edges(&self) -> Receiver<InputEdge> {
        let (tx, rx) = unbounded();
        self.state.subscribers.lock().push(tx);
        rx
    }
}

// ==================== 整机 ====================

#[derive(Debug, Clone)]
pub struct SimCarousel {
    pub motor: SimStepper,
    pub encoder: Option<SimEncoder>,
    pub monkey_door: SimServo,
    pub human_door: SimServo,
}

/// 模拟装置
#[derive(Debug, Clone)]
pub struct SimApparatus {
    pub carousels: [SimCarousel; 2],
    pub lights: SimLights,
    pub sound: SimSound,
    pub lever_lock: SimServo,
    pub lever: SimLever,
}

impl SimApparatus {
    pub fn new(config: SimConfig) -> Self {
        let carousel = |sensored: bool| {
            let motor = SimStepper::new(config.step_duration);
            let encoder = sensored.then(|| {
                SimEncoder::new(
                    motor.clone(),
                    config.deg_per_step,
                    config.direction_sign,
                    config.initial_angle_deg,
                )
            });
            SimCarousel {
                motor,
                encoder,
                monkey_door: SimServo::new(),
                human_door: SimServo::new(),
            }
        };
        Self {
            carousels: [carousel(config.sensored[0]), carousel(config.sensored[1])],
            lights: SimLights::new(),
            sound: SimSound::new(),
            lever_lock: SimServo::new(),
            lever: SimLever::new(&config.lever_pins),
        }
    }

    /// 生成交给驱动的硬件组（与本句柄共享状态）
    pub fn hardware(&self) -> ApparatusHardware {
        let carousel = |sim: &SimCarousel| CarouselHardware {
            motor: Box::new(sim.motor.clone()),
            encoder: sim
                .encoder
                .clone()
                .map(|e| Box::new(e) as Box<dyn AngleEncoder>),
            monkey_door: Box::new(sim.monkey_door.clone()),
            human_door: Box::new(sim.human_door.clone()),
        };
        ApparatusHardware {
            carousels: [carousel(&self.carousels[0]), carousel(&self.carousels[1])],
            lights: Box::new(self.lights.clone()),
            sound: Box::new(self.sound.clone()),
            lever_lock: Box::new(self.lever_lock.clone()),
            lever_inputs: Arc::new(self.lever.clone()),
        }
    }
}
