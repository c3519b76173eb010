//! 拉杆输入事件推送
//!
//! 启动时为每个输入推送一次强制事件（当前电平），之后在独立线程上处理原始跳变：
//! 跳变后等待该输入的去抖时间再重新读取电平，与上次上报的状态不同时才推送，
//! 时间戳为读取时刻减去去抖时间。

use crate::error::ServerError;
use crate::sink::EventSink;
use apparatus_driver::LeverConfig;
use apparatus_hw::{InputEdge, LeverInputs};
use apparatus_protocol::{IoEvent, LeverInput};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, after, bounded, never, select};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// 去抖状态：按 (引脚, 输入名) 记录上次上报的电平
struct Debouncer {
    config: LeverConfig,
    inputs: Arc<dyn LeverInputs>,
    sink: Arc<dyn EventSink>,
    last_reported: HashMap<(u8, &'static str), bool>,
    /// 等待重新读取的输入及其截止时刻
    pending: HashMap<LeverInput, Instant>,
}

impl Debouncer {
    /// 读取电平并按需推送事件；返回 `Err` 表示连接已不可写
    fn report(&mut self, input: LeverInput, forced: bool) -> Result<(), ServerError> {
        let pin = self.config.pin(input);
        let name = input.event_name();
        let state = match self.inputs.level(pin) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to read {} (pin {}): {}", name, pin, e);
                return Ok(());
            },
        };

        let previous = self.last_reported.insert((pin, name), state);
        if !forced && previous == Some(state) {
            trace!("{} unchanged ({}), suppressed", name, state);
            return Ok(());
        }

        // 初始事件同样减去去抖时间
        let bounce = chrono::Duration::from_std(self.config.bounce(input))
            .unwrap_or_else(|_| chrono::Duration::zero());
        let timestamp = Utc::now() - bounce;
        debug!("{} (pin {}) -> {}", name, pin, state);
        self.sink.send(
            IoEvent {
                pin_io: pin,
                name: name.to_string(),
                state,
                timestamp,
            }
            .into(),
        )
    }

    fn on_edge(&mut self, edge: InputEdge) {
        let Some(input) = self.config.input_for_pin(edge.pin) else {
            return;
        };
        // 去抖窗口内的后续跳变并入同一次重新读取
        self.pending
            .entry(input)
            .or_insert_with(|| edge.at + self.config.bounce(input));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    fn flush_due(&mut self) -> Result<(), ServerError> {
        let now = Instant::now();
        let due: Vec<LeverInput> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(input, _)| *input)
            .collect();
        for input in due {
            self.pending.remove(&input);
            self.report(input, false)?;
        }
        Ok(())
    }
}

/// 输入事件推送器；丢弃时停止并回收线程
pub struct Notifier {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Notifier {
    /// 推送初始状态后启动推送线程
    ///
    /// 返回时所有强制事件都已写出。
    pub fn start(
        config: &LeverConfig,
        inputs: Arc<dyn LeverInputs>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ServerError> {
        // 先订阅，保证强制事件之后的跳变不会丢失
        let edges = inputs.subscribe_edges();
        let mut debouncer = Debouncer {
            config: config.clone(),
            inputs,
            sink,
            last_reported: HashMap::new(),
            pending: HashMap::new(),
        };
        for input in LeverInput::ALL {
            debouncer.report(input, true)?;
        }

        let (stop_tx, stop_rx) = bounded(1);
        let worker = thread::Builder::new()
            .name("io-notifier".into())
            .spawn(move || notify_loop(debouncer, edges, stop_rx))?;
        info!("Input notifier started");

        Ok(Self {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("Input notifier thread panicked");
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn notify_loop(mut debouncer: Debouncer, edges: Receiver<InputEdge>, stop: Receiver<()>) {
    loop {
        let timer = match debouncer.next_deadline() {
            Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
            None => never(),
        };
        select! {
            recv(stop) -> _ => break,
            recv(edges) -> edge => match edge {
                Ok(edge) => debouncer.on_edge(edge),
                Err(_) => {
                    warn!("Input edge source closed");
                    break;
                },
            },
            recv(timer) -> _ => {
                if let Err(e) = debouncer.flush_due() {
                    debug!("Stopping input notifier: {}", e);
                    break;
                }
            },
        }
    }
    trace!("Input notifier exiting");
}
