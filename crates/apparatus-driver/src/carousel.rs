//! 转盘位置控制器
//!
//! 每个转盘一个工作线程，运动请求经 FIFO 队列串行执行：
//! 同一转盘的两次运动永远不会并发，后到的请求排在当前运动之后。
//! 运动锁（`motion`）在整个运动期间由工作线程持有，当前格号只在持锁且
//! 电机完成运动之后更新。
//!
//! 每个请求返回一个 [`MotionTicket`]：其内部通道的发送端在运动结束时被丢弃，
//! 等待方以"通道关闭"作为完成信号。

use crate::config::{CarouselConfig, MotionConfig};
use crate::error::{ConfigError, DriverError};
use crate::servo::TimedServo;
use apparatus_hw::{AngleEncoder, CarouselHardware, StepperMotor};
use apparatus_protocol::{COMPARTMENT_COUNT, CarouselId};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// 自旋等待的轮询间隔
const SPIN_INTERVAL: Duration = Duration::from_millis(10);

/// 转盘几何参数与角度换算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub compartments: u8,
    pub deg_per_step: f64,
    pub direction_sign: i64,
}

impl Geometry {
    pub fn from_config(motion: &MotionConfig) -> Self {
        Self {
            compartments: COMPARTMENT_COUNT,
            deg_per_step: motion.deg_per_step(),
            direction_sign: motion.direction_sign,
        }
    }

    /// 每格角度
    pub fn compartment_angle(&self) -> f64 {
        360.0 / self.compartments as f64
    }

    /// 猴子侧出口相对人类侧偏移半圈
    pub fn target_index(&self, compartment: u8, monkey: bool) -> u8 {
        let offset = if monkey { self.compartments / 2 } else { 0 };
        ((compartment as u16 + offset as u16) % self.compartments as u16) as u8
    }

    pub fn index_angle(&self, index: u8) -> f64 {
        index as f64 * self.compartment_angle()
    }

    /// 有符号最短角度差，范围 `[-180, 180)`
    pub fn shortest_delta(source_deg: f64, target_deg: f64) -> f64 {
        (target_deg - source_deg + 180.0).rem_euclid(360.0) - 180.0
    }

    /// 角度差换算为步数
    pub fn steps_for(&self, delta_deg: f64) -> i64 {
        self.direction_sign * (delta_deg / self.deg_per_step).round() as i64
    }
}

/// 出口侧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorSide {
    Monkey,
    Human,
}

impl DoorSide {
    pub fn from_monkey(monkey: bool) -> Self {
        if monkey { DoorSide::Monkey } else { DoorSide::Human }
    }
}

/// 运动种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    MoveTo,
    Deploy,
}

impl MotionKind {
    /// 完成事件中使用的操作名
    pub fn func_name(self) -> &'static str {
        match self {
            MotionKind::MoveTo => "move_to",
            MotionKind::Deploy => "deploy",
        }
    }
}

/// 运动结束回调（在工作线程上调用）
pub type MotionCallback = Box<dyn FnOnce(&Result<(), DriverError>) + Send>;

/// 运动完成凭据
#[derive(Debug, Clone)]
pub struct MotionTicket {
    done: Receiver<()>,
}

impl MotionTicket {
    fn pending() -> (Sender<()>, Self) {
        let (tx, rx) = bounded(0);
        (tx, Self { done: rx })
    }

    /// 已完成的凭据
    pub fn completed() -> Self {
        let (tx, ticket) = Self::pending();
        drop(tx);
        ticket
    }

    pub fn is_done(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// 阻塞等待完成；`None` 表示无限等待。超时返回 `false`
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                let _ = self.done.recv();
                true
            },
            Some(timeout) => !matches!(self.done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
        }
    }

    /// 以轮询方式等待完成
    pub fn wait_spin(&self, timeout: Option<Duration>) -> bool {
        // 超出可表示范围的超时视为无限等待
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if self.is_done() {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            spin_sleep::sleep(SPIN_INTERVAL);
        }
    }

    /// 完成信号通道（关闭即完成），用于多路 select
    pub fn receiver(&self) -> &Receiver<()> {
        &self.done
    }
}

struct Job {
    kind: MotionKind,
    index: u8,
    door: DoorSide,
    generation: u64,
    done: Sender<()>,
    on_complete: Option<MotionCallback>,
}

struct MotionState {
    motor: Box<dyn StepperMotor>,
    encoder: Option<Box<dyn AngleEncoder>>,
    current_index: Option<u8>,
    enabled: bool,
}

struct Shared {
    id: CarouselId,
    geometry: Geometry,
    settle: Duration,
    dwell: Duration,
    motion: Mutex<MotionState>,
    /// 当前格号快照，-1 表示未知
    current_index: AtomicI16,
    /// `motors_off` 时递增，之前排队的运动被丢弃
    generation: AtomicU64,
    monkey_door: TimedServo,
    human_door: TimedServo,
}

impl Shared {
    fn door(&self, side: DoorSide) -> &TimedServo {
        match side {
            DoorSide::Monkey => &self.monkey_door,
            DoorSide::Human => &self.human_door,
        }
    }

    fn offset_steps(&self, state: &mut MotionState, index: u8) -> Result<i64, DriverError> {
        let source = match state.encoder.as_mut() {
            Some(encoder) => encoder.read_angle_deg()?,
            None => self.geometry.index_angle(state.current_index.unwrap_or(0)),
        };
        let target = self.geometry.index_angle(index);
        let delta = Geometry::shortest_delta(source, target);
        let steps = self.geometry.steps_for(delta);
        debug!(
            "{}: source {:.3}° target {:.3}° delta {:.3}° -> {} steps",
            self.id, source, target, delta, steps
        );
        Ok(steps)
    }

    fn rotate_to(&self, state: &mut MotionState, index: u8) -> Result<(), DriverError> {
        if state.encoder.is_none() && state.current_index.is_none() {
            // 无传感器首次运动：假定停在人类侧 0 号格的归位点
            state.current_index = Some(self.geometry.compartments / 2);
        }

        let steps = self.offset_steps(state, index)?;
        if steps != 0 {
            state.motor.step(steps)?;
        }
        state.current_index = Some(index);
        self.current_index.store(index as i16, Ordering::Release);

        spin_sleep::sleep(self.settle);
        let correction = self.offset_steps(state, index)?;
        if correction != 0 {
            debug!("{}: correcting {} missed steps", self.id, correction);
            state.motor.step(correction)?;
        }
        Ok(())
    }

    fn run(&self, state: &mut MotionState, job: &Job) -> Result<(), DriverError> {
        if !state.enabled {
            state.motor.set_enabled(true)?;
            state.enabled = true;
        }
        self.rotate_to(state, job.index)?;

        if job.kind == MotionKind::Deploy {
            let door = self.door(job.door);
            door.set_open(true)?;
            thread::sleep(self.dwell);
            door.set_open(false)?;
            thread::sleep(self.dwell);
        }
        Ok(())
    }
}

fn worker_loop(shared: Arc<Shared>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        let result = {
            let mut state = shared.motion.lock();
            // 在持锁后检查，保证 motors_off 之后不会再使能电机
            if job.generation != shared.generation.load(Ordering::Acquire) {
                None
            } else {
                Some(shared.run(&mut state, &job))
            }
        };

        let Job {
            kind,
            index,
            done,
            on_complete,
            ..
        } = job;
        match &result {
            None => debug!("{}: dropped {} queued before motors_off", shared.id, kind.func_name()),
            Some(Ok(())) => trace!("{}: {} to index {} done", shared.id, kind.func_name(), index),
            Some(Err(e)) => error!("{}: {} failed: {}", shared.id, kind.func_name(), e),
        }
        if let (Some(result), Some(callback)) = (&result, on_complete) {
            callback(result);
        }
        drop(done);
    }
    trace!("{}: worker exiting", shared.id);
}

/// 单个转盘
pub struct Carousel {
    shared: Arc<Shared>,
    jobs: Option<Sender<Job>>,
    last_ticket: Mutex<MotionTicket>,
    worker: Option<JoinHandle<()>>,
}

impl Carousel {
    pub fn new(
        id: CarouselId,
        hardware: CarouselHardware,
        config: &CarouselConfig,
        motion: &MotionConfig,
    ) -> Result<Self, DriverError> {
        let CarouselHardware {
            motor,
            encoder,
            monkey_door,
            human_door,
        } = hardware;

        let encoder = if config.sensorless {
            None
        } else {
            let mut encoder = encoder.ok_or_else(|| {
                ConfigError::Invalid(format!("{} is not sensorless but has no encoder", id))
            })?;
            encoder.set_zero(config.encoder_zero_reg)?;
            Some(encoder)
        };

        let timeout = config.servo_timeout();
        let shared = Arc::new(Shared {
            id,
            geometry: Geometry::from_config(motion),
            settle: motion.settle(),
            dwell: motion.deploy_dwell(),
            motion: Mutex::new(MotionState {
                motor,
                encoder,
                current_index: None,
                enabled: false,
            }),
            current_index: AtomicI16::new(-1),
            generation: AtomicU64::new(0),
            monkey_door: TimedServo::new(format!("{} monkey door", id), monkey_door, timeout),
            human_door: TimedServo::new(format!("{} human door", id), human_door, timeout),
        });

        let (jobs_tx, jobs_rx) = unbounded();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("{}-worker", id))
            .spawn(move || worker_loop(worker_shared, jobs_rx))
            .map_err(DriverError::Spawn)?;

        info!("{} ready ({})", id, if config.sensorless { "sensorless" } else { "encoder" });
        Ok(Self {
            shared,
            jobs: Some(jobs_tx),
            last_ticket: Mutex::new(MotionTicket::completed()),
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> CarouselId {
        self.shared.id
    }

    pub fn geometry(&self) -> Geometry {
        self.shared.geometry
    }

    /// 排队一次运动
    pub fn move_to(
        &self,
        compartment: u8,
        monkey: bool,
        on_complete: Option<MotionCallback>,
    ) -> Result<MotionTicket, DriverError> {
        self.submit(MotionKind::MoveTo, compartment, monkey, on_complete)
    }

    /// 排队一次投放：运动到位后开门、停留、关门、停留
    pub fn deploy(
        &self,
        compartment: u8,
        monkey: bool,
        on_complete: Option<MotionCallback>,
    ) -> Result<MotionTicket, DriverError> {
        self.submit(MotionKind::Deploy, compartment, monkey, on_complete)
    }

    fn submit(
        &self,
        kind: MotionKind,
        compartment: u8,
        monkey: bool,
        on_complete: Option<MotionCallback>,
    ) -> Result<MotionTicket, DriverError> {
        if compartment > COMPARTMENT_COUNT {
            return Err(DriverError::InvalidCompartment(compartment));
        }
        let index = self.shared.geometry.target_index(compartment, monkey);
        let (done, ticket) = MotionTicket::pending();
        let job = Job {
            kind,
            index,
            door: DoorSide::from_monkey(monkey),
            generation: self.shared.generation.load(Ordering::Acquire),
            done,
            on_complete,
        };

        // 持有 last_ticket 锁直到入队，保证其与队列顺序一致
        let mut last = self.last_ticket.lock();
        self.jobs
            .as_ref()
            .ok_or(DriverError::WorkerStopped)?
            .send(job)
            .map_err(|_| DriverError::WorkerStopped)?;
        *last = ticket.clone();
        debug!(
            "{}: queued {} compartment {} ({} side) -> index {}",
            self.shared.id,
            kind.func_name(),
            compartment,
            if monkey { "monkey" } else { "human" },
            index
        );
        Ok(ticket)
    }

    /// 等待此前排队的全部运动结束
    pub fn wait_idle(&self, timeout: Option<Duration>, spinlock: bool) -> bool {
        let ticket = self.last_ticket.lock().clone();
        if spinlock {
            ticket.wait_spin(timeout)
        } else {
            ticket.wait(timeout)
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.last_ticket.lock().is_done()
    }

    /// 当前格号（未知时为 `None`）
    pub fn current_index(&self) -> Option<u8> {
        u8::try_from(self.shared.current_index.load(Ordering::Acquire)).ok()
    }

    pub fn set_door(&self, side: DoorSide, open: bool) -> Result<(), DriverError> {
        self.shared.door(side).set_open(open)
    }

    pub fn door_open(&self, side: DoorSide) -> bool {
        self.shared.door(side).is_open()
    }

    /// 丢弃排队的运动，等待当前运动结束后断开电机并让两个门舵机断电
    pub fn motors_off(&self) -> Result<(), DriverError> {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        {
            let mut state = self.shared.motion.lock();
            state.motor.set_enabled(false)?;
            state.enabled = false;
        }
        self.shared.monkey_door.release()?;
        self.shared.human_door.release()?;
        info!("{} motors off", self.shared.id);
        Ok(())
    }
}

impl Drop for Carousel {
    fn drop(&mut self) {
        // 关闭队列，工作线程处理完剩余请求后退出
        self.jobs.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("{} worker panicked", self.shared.id);
        }
    }
}
