//! 装置 RPC 客户端
//!
//! 一个连接对应一台装置。后台接收线程解码所有入站帧并分发：
//! - `reply`：按发送顺序与待应答队列匹配；失败应答记录为 `last_failure`
//! - `io_event`：更新对应输入的高/低电平锁存信号，并通知观察者
//! - `wait_event`：标记对应转盘、对应操作的运动完成
//!
//! 连接断开或 [`ApparatusClient::close`] 后所有信号被关闭，任何等待都会立即返回。

use crate::error::ClientError;
use crate::observer::{IoObserver, active_state};
use crate::signal::WaitHandle;
use apparatus_protocol::{
    CarouselId, CodecError, Color, Command, FrameReader, LeverInput, Message, Reply,
    DEFAULT_MAX_FRAME_LEN, write_message,
};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::BufReader;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 需要等待完成事件的运动操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOp {
    MoveTo,
    Deploy,
}

impl MotionOp {
    pub fn func_name(self) -> &'static str {
        match self {
            MotionOp::MoveTo => "move_to",
            MotionOp::Deploy => "deploy",
        }
    }

    pub fn from_func_name(name: &str) -> Option<Self> {
        match name {
            "move_to" => Some(MotionOp::MoveTo),
            "deploy" => Some(MotionOp::Deploy),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn of(command: &Command) -> Option<(CarouselId, MotionOp)> {
        match command {
            Command::MoveTo { carousel_id, .. } => Some((*carousel_id, MotionOp::MoveTo)),
            Command::Deploy { carousel_id, .. } => Some((*carousel_id, MotionOp::Deploy)),
            _ => None,
        }
    }
}

/// 某转盘某操作的完成信号：未完成的请求数归零时置位
struct MotionSignal {
    outstanding: Mutex<usize>,
    idle: WaitHandle,
}

impl MotionSignal {
    fn new(label: String) -> Self {
        let idle = WaitHandle::new(label);
        idle.set();
        Self {
            outstanding: Mutex::new(0),
            idle,
        }
    }

    fn arm(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding += 1;
        self.idle.clear();
    }

    fn complete(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.set();
        }
    }
}

struct Signals {
    motion: [[MotionSignal; 2]; 2],
    /// `[输入][电平]`，电平下标 0 为低、1 为高
    lever: [[WaitHandle; 2]; 3],
}

impl Signals {
    fn new() -> Self {
        let motion = |id: CarouselId| {
            [
                MotionSignal::new(format!("{} move_to", id)),
                MotionSignal::new(format!("{} deploy", id)),
            ]
        };
        let lever = |input: LeverInput| {
            [
                WaitHandle::new(format!("{} low", input.event_name())),
                WaitHandle::new(format!("{} high", input.event_name())),
            ]
        };
        Self {
            motion: [motion(CarouselId::First), motion(CarouselId::Second)],
            lever: [
                lever(LeverInput::Touch),
                lever(LeverInput::Pulled),
                lever(LeverInput::Released),
            ],
        }
    }

    fn motion(&self, id: CarouselId, op: MotionOp) -> &MotionSignal {
        &self.motion[id.index()][op.index()]
    }

    fn lever(&self, input: LeverInput, level: bool) -> &WaitHandle {
        &self.lever[input.index()][level as usize]
    }

    fn close_all(&self) {
        for signal in self.motion.iter().flatten() {
            signal.idle.close();
        }
        for handle in self.lever.iter().flatten() {
            handle.close();
        }
    }
}

struct PendingReply {
    func: &'static str,
    motion: Option<(CarouselId, MotionOp)>,
    confirm: Option<Sender<Reply>>,
}

struct Shared {
    writer: Mutex<TcpStream>,
    /// 用于关闭时打断接收线程的阻塞读取
    control: TcpStream,
    pending: Mutex<VecDeque<PendingReply>>,
    signals: Signals,
    last_failure: ArcSwapOption<Reply>,
    observer: Option<Arc<dyn IoObserver>>,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn write(&self, msg: &Message) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let mut writer = self.writer.lock();
        write_message(&mut *writer, msg)?;
        Ok(())
    }

    fn send_command(
        &self,
        command: &Command,
        confirm: Option<Sender<Reply>>,
    ) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let msg = Message::Command(command.to_frame()?);
        let mut writer = self.writer.lock();
        // 入队与写出在同一把写锁下完成，队列顺序即线上顺序
        self.pending.lock().push_back(PendingReply {
            func: command.name(),
            motion: MotionOp::of(command),
            confirm,
        });
        if let Err(e) = write_message(&mut *writer, &msg) {
            self.pending.lock().pop_back();
            return Err(e.into());
        }
        trace!("-> {}", command.name());
        Ok(())
    }

    fn route(&self, msg: Message) {
        match msg {
            Message::Reply(reply) => self.on_reply(reply),
            Message::IoEvent(event) => {
                let Some(input) = LeverInput::from_event_name(&event.name) else {
                    debug!("Ignoring io_event for unknown input {}", event.name);
                    return;
                };
                trace!("<- io_event {} = {}", event.name, event.state);
                // 状态变化：置位当前电平的锁存，清除相反电平的锁存
                self.signals.lever(input, event.state).set();
                self.signals.lever(input, !event.state).clear();
                if let Some(observer) = &self.observer {
                    observer.on_io_event(input, active_state(input, event.state), event.timestamp);
                }
            },
            Message::WaitEvent(event) => match MotionOp::from_func_name(&event.func_name) {
                Some(op) => {
                    debug!("<- {} {} done", event.carousel_id, event.func_name);
                    self.signals.motion(event.carousel_id, op).complete();
                },
                None => debug!("Ignoring wait_event for {}", event.func_name),
            },
            Message::Msg(text) => trace!("<- msg: {}", text.msg),
            Message::Command(frame) => debug!("Ignoring command {} from server", frame.func),
        }
    }

    fn on_reply(&self, reply: Reply) {
        let pending = self.pending.lock().pop_front();
        let func = pending.as_ref().map_or("<unsolicited>", |p| p.func);

        if reply.success {
            trace!("<- {} ok", func);
        } else {
            warn!("{} failed: {}", func, reply.msg.as_deref().unwrap_or("<no message>"));
            self.last_failure.store(Some(Arc::new(reply.clone())));
            // 被拒绝的运动不会产生完成事件
            if let Some((id, op)) = pending.as_ref().and_then(|p| p.motion) {
                self.signals.motion(id, op).complete();
            }
        }

        if let Some(confirm) = pending.and_then(|p| p.confirm) {
            let _ = confirm.send(reply);
        }
    }

    /// 标记关闭：解除所有等待
    fn release(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().clear();
        self.signals.close_all();
    }
}

fn receive_loop(mut reader: FrameReader<BufReader<TcpStream>>, shared: Arc<Shared>) {
    loop {
        match reader.next_message() {
            Ok(Some(msg)) => shared.route(msg),
            Ok(None) => {
                info!("Server closed the connection");
                break;
            },
            Err(CodecError::MissingType) => warn!("Received message without type"),
            Err(e) => {
                if !shared.is_closed() {
                    warn!("Receive failed: {}", e);
                }
                break;
            },
        }
    }
    shared.release();
    trace!("Receiver exiting");
}

/// 客户端构建器
pub struct ClientBuilder {
    addr: String,
    connect_timeout: Option<Duration>,
    observer: Option<Arc<dyn IoObserver>>,
    heartbeat: Option<Duration>,
    max_frame_len: usize,
}

impl ClientBuilder {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: None,
            observer: None,
            heartbeat: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn observer(mut self, observer: impl IoObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// 周期性发送 `msg` 心跳
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn connect(self) -> Result<ApparatusClient, ClientError> {
        let stream = self.open_stream()?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", self.addr);

        let shared = Arc::new(Shared {
            writer: Mutex::new(stream.try_clone()?),
            control: stream.try_clone()?,
            pending: Mutex::new(VecDeque::new()),
            signals: Signals::new(),
            last_failure: ArcSwapOption::empty(),
            observer: self.observer,
            closed: AtomicBool::new(false),
        });

        let reader = FrameReader::new(BufReader::new(stream)).with_max_frame_len(self.max_frame_len);
        let receiver_shared = shared.clone();
        let receiver = thread::Builder::new()
            .name("apparatus-recv".into())
            .spawn(move || receive_loop(reader, receiver_shared))?;

        let heartbeat = match self.heartbeat {
            Some(interval) => Some(Heartbeat::start(interval, shared.clone())?),
            None => None,
        };

        Ok(ApparatusClient {
            shared,
            receiver: Mutex::new(Some(receiver)),
            heartbeat: Mutex::new(heartbeat),
        })
    }

    fn open_stream(&self) -> Result<TcpStream, ClientError> {
        let connect_error = |source| ClientError::Connect {
            addr: self.addr.clone(),
            source,
        };
        let Some(timeout) = self.connect_timeout else {
            return TcpStream::connect(&self.addr).map_err(connect_error);
        };

        let mut last_error = std::io::Error::new(std::io::ErrorKind::InvalidInput, "no addresses resolved");
        for addr in self.addr.to_socket_addrs().map_err(connect_error)? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = e,
            }
        }
        Err(connect_error(last_error))
    }
}

struct Heartbeat {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn start(interval: Duration, shared: Arc<Shared>) -> Result<Self, ClientError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("apparatus-heartbeat".into())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    if let Err(e) = shared.write(&Message::heartbeat()) {
                        debug!("Stopping heartbeat: {}", e);
                        break;
                    }
                }
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    fn stop(mut self) {
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// 单台装置的客户端
pub struct ApparatusClient {
    shared: Arc<Shared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl ApparatusClient {
    /// 以默认选项连接
    pub fn connect(addr: impl Into<String>) -> Result<Self, ClientError> {
        ClientBuilder::new(addr).connect()
    }

    pub fn builder(addr: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(addr)
    }

    /// 发送命令，不等待应答（失败应答记录为 [`Self::last_failure`]）
    ///
    /// `blocking` 只对 `move_to` / `deploy` 有效：等待对应的完成事件。
    /// 等待期间连接断开返回 [`ClientError::Closed`]。
    pub fn call(&self, command: Command, blocking: bool) -> Result<(), ClientError> {
        let motion = self.arm(&command);
        if let Err(e) = self.shared.send_command(&command, None) {
            self.disarm(motion);
            return Err(e);
        }
        if blocking && let Some((id, op)) = motion {
            let done = self.shared.signals.motion(id, op).idle.wait(None);
            if !done || self.shared.is_closed() {
                return Err(ClientError::Closed);
            }
        }
        Ok(())
    }

    /// 等待信号；超时返回 `Ok(false)`，连接已断开且信号未置位时返回 [`ClientError::Closed`]
    fn wait_signal(&self, signal: &WaitHandle, timeout: Option<Duration>) -> Result<bool, ClientError> {
        if signal.wait(timeout) {
            Ok(true)
        } else if self.shared.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(false)
        }
    }

    /// 发送命令并等待其应答；失败应答转换为 [`ClientError::Rejected`]
    pub fn call_confirmed(&self, command: Command, timeout: Option<Duration>) -> Result<Reply, ClientError> {
        let (tx, rx) = bounded(1);
        let motion = self.arm(&command);
        if let Err(e) = self.shared.send_command(&command, Some(tx)) {
            self.disarm(motion);
            return Err(e);
        }

        let received = match timeout {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(reply) if reply.success => Ok(reply),
            Ok(reply) => Err(ClientError::Rejected {
                func: command.name().to_string(),
                msg: reply.msg.unwrap_or_default(),
            }),
            Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout(command.name().to_string())),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Closed),
        }
    }

    fn arm(&self, command: &Command) -> Option<(CarouselId, MotionOp)> {
        let motion = MotionOp::of(command);
        if let Some((id, op)) = motion {
            self.shared.signals.motion(id, op).arm();
        }
        motion
    }

    fn disarm(&self, motion: Option<(CarouselId, MotionOp)>) {
        if let Some((id, op)) = motion {
            self.shared.signals.motion(id, op).complete();
        }
    }

    pub fn init_hw(&self) -> Result<(), ClientError> {
        self.call(Command::InitHw {}, false)
    }

    pub fn hw_self_test(&self) -> Result<(), ClientError> {
        self.call(Command::HwSelfTest {}, false)
    }

    pub fn empty_human(&self) -> Result<(), ClientError> {
        self.call(Command::EmptyHuman {}, false)
    }

    pub fn play_sound(
        &self,
        file: Option<&str>,
        volume: u8,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), ClientError> {
        self.call(
            Command::PlaySound {
                file: file.map(str::to_string),
                volume,
                timestamp,
            },
            false,
        )
    }

    pub fn move_to(
        &self,
        carousel_id: CarouselId,
        compartment_id: u8,
        monkey: bool,
        blocking: bool,
    ) -> Result<(), ClientError> {
        self.call(
            Command::MoveTo {
                carousel_id,
                compartment_id,
                monkey,
                blocking,
            },
            blocking,
        )
    }

    /// 等待此前发出的全部 `move_to` 完成；超时返回 `Ok(false)`
    pub fn move_to_wait(&self, carousel_id: CarouselId, timeout: Option<Duration>) -> Result<bool, ClientError> {
        self.wait_signal(&self.shared.signals.motion(carousel_id, MotionOp::MoveTo).idle, timeout)
    }

    pub fn deploy(
        &self,
        carousel_id: CarouselId,
        compartment_id: u8,
        monkey: bool,
        blocking: bool,
    ) -> Result<(), ClientError> {
        self.call(
            Command::Deploy {
                carousel_id,
                compartment_id,
                monkey,
                blocking,
            },
            blocking,
        )
    }

    pub fn deploy_wait(&self, carousel_id: CarouselId, timeout: Option<Duration>) -> Result<bool, ClientError> {
        self.wait_signal(&self.shared.signals.motion(carousel_id, MotionOp::Deploy).idle, timeout)
    }

    pub fn set_test_light(
        &self,
        state: bool,
        color: Option<Color>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), ClientError> {
        self.call(
            Command::SetTestLight {
                state,
                color,
                timestamp,
            },
            false,
        )
    }

    pub fn set_human_light(&self, state: bool, color: Option<Color>) -> Result<(), ClientError> {
        self.call(Command::SetHumanLight { state, color }, false)
    }

    pub fn set_light(&self, color: Color, timestamp: Option<DateTime<Utc>>) -> Result<(), ClientError> {
        self.call(Command::SetLight { color, timestamp }, false)
    }

    pub fn set_lever_open(&self, state: bool, timestamp: Option<DateTime<Utc>>) -> Result<(), ClientError> {
        self.call(Command::SetLeverOpen { state, timestamp }, false)
    }

    /// 在本地等待输入电平（由服务端推送的 `io_event` 驱动）
    pub fn wait_lever_state(
        &self,
        input: LeverInput,
        state: bool,
        timeout: Option<Duration>,
    ) -> Result<bool, ClientError> {
        self.wait_signal(self.shared.signals.lever(input, state), timeout)
    }

    /// 输入电平的锁存信号，可用于 `or_wait` / `and_wait`
    pub fn lever_signal(&self, input: LeverInput, state: bool) -> WaitHandle {
        self.shared.signals.lever(input, state).clone()
    }

    /// 运动完成信号（没有未完成的请求时为置位状态）
    pub fn motion_signal(&self, carousel_id: CarouselId, op: MotionOp) -> WaitHandle {
        self.shared.signals.motion(carousel_id, op).idle.clone()
    }

    /// 最近一次失败应答
    pub fn last_failure(&self) -> Option<Arc<Reply>> {
        self.shared.last_failure.load_full()
    }

    pub fn send_heartbeat(&self) -> Result<(), ClientError> {
        self.shared.write(&Message::heartbeat())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// 关闭连接并解除所有本地等待；可重复调用
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            info!("Closing connection");
        }
        let _ = self.shared.control.shutdown(Shutdown::Both);
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.stop();
        }
        if let Some(receiver) = self.receiver.lock().take()
            && receiver.thread().id() != thread::current().id()
            && receiver.join().is_err()
        {
            warn!("Receiver thread panicked");
        }
        self.shared.release();
    }
}

impl Drop for ApparatusClient {
    fn drop(&mut self) {
        self.close();
    }
}
