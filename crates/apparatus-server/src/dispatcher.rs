//! 命令分发
//!
//! 把命令帧解析为类型化的 [`Command`] 并执行，每条命令产生且只产生一个应答。
//! 执行中的错误与 panic 都在这里被捕获并转换为失败应答，连接保持打开。
//!
//! - 带 `timestamp` 的命令只负责调度：应答仅确认已调度，动作在一次性定时器上执行，
//!   同一资源的新调度取消旧调度
//! - `move_to` / `deploy` 在转盘工作线程上执行，运动结束时推送 `wait_event`，
//!   `blocking = true` 时等运动结束再应答

use crate::sink::EventSink;
use apparatus_driver::{Apparatus, DriverError, MotionCallback, MotionKind, TimerSlot};
use apparatus_protocol::message::KIND_COMMAND;
use apparatus_protocol::{CarouselId, Command, CommandFrame, Reply, WaitEvent, wait_timeout};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 每个可定时资源一个插槽
#[derive(Default)]
struct ScheduledSlots {
    sound: TimerSlot,
    test_light: TimerSlot,
    light: TimerSlot,
    lever: TimerSlot,
}

pub struct Dispatcher {
    apparatus: Arc<Apparatus>,
    events: Arc<dyn EventSink>,
    scheduled: ScheduledSlots,
}

impl Dispatcher {
    pub fn new(apparatus: Arc<Apparatus>, events: Arc<dyn EventSink>) -> Self {
        Self {
            apparatus,
            events,
            scheduled: ScheduledSlots::default(),
        }
    }

    /// 处理一条命令帧，返回其应答
    pub fn handle(&self, frame: &CommandFrame) -> Reply {
        let command = match Command::from_frame(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected command: {}", e);
                return Reply::failure(KIND_COMMAND, e.to_string());
            },
        };

        let name = command.name();
        debug!("<- {:?}", command);
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(command))) {
            Ok(Ok(msg)) => Reply {
                kind: KIND_COMMAND.to_string(),
                success: true,
                msg,
            },
            Ok(Err(e)) => {
                warn!("{} failed: {}", name, e);
                Reply::failure(KIND_COMMAND, e.to_string())
            },
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("{} panicked: {}", name, reason);
                Reply::failure(KIND_COMMAND, format!("{} panicked: {}", name, reason))
            },
        }
    }

    /// 执行命令；成功时可附带应答文本
    pub fn execute(&self, command: Command) -> Result<Option<String>, DriverError> {
        let apparatus = &self.apparatus;
        let at = command.scheduled_at();
        match command {
            Command::InitHw {} => apparatus.init_hw()?,
            Command::HwSelfTest {} => apparatus.hw_self_test()?,
            Command::EmptyHuman {} => apparatus.empty_human()?,
            Command::PlaySound { file, volume, .. } => {
                return self.run_at("play_sound", at, &self.scheduled.sound, move |a| {
                    a.play_sound(file.as_deref(), volume)
                });
            },
            Command::MoveTo {
                carousel_id,
                compartment_id,
                monkey,
                blocking,
            } => self.start_motion(MotionKind::MoveTo, carousel_id, compartment_id, monkey, blocking)?,
            Command::Deploy {
                carousel_id,
                compartment_id,
                monkey,
                blocking,
            } => self.start_motion(MotionKind::Deploy, carousel_id, compartment_id, monkey, blocking)?,
            Command::MoveToWait {
                carousel_id,
                timeout,
                spinlock,
            } => {
                let reached = apparatus.move_to_wait(carousel_id, wait_timeout(timeout), spinlock);
                return Ok(Some(wait_outcome(reached)));
            },
            Command::DeployWait {
                carousel_id,
                timeout,
                spinlock,
            } => {
                let reached = apparatus.deploy_wait(carousel_id, wait_timeout(timeout), spinlock);
                return Ok(Some(wait_outcome(reached)));
            },
            Command::SetTestLight { state, color, .. } => {
                return self.run_at("set_test_light", at, &self.scheduled.test_light, move |a| {
                    a.set_test_light(state, color)
                });
            },
            Command::SetHumanLight { state, color } => apparatus.set_human_light(state, color)?,
            Command::SetLight { color, .. } => {
                return self.run_at("set_light", at, &self.scheduled.light, move |a| {
                    a.set_light(color)
                });
            },
            Command::SetLeverOpen { state, .. } => {
                return self.run_at("set_lever_open", at, &self.scheduled.lever, move |a| {
                    a.set_lever_open(state)
                });
            },
            Command::WaitLeverState {
                pin_io,
                state,
                timeout,
                spinlock,
            } => {
                let reached = apparatus.wait_lever_state(pin_io, state, wait_timeout(timeout), spinlock)?;
                return Ok(Some(wait_outcome(reached)));
            },
        }
        Ok(None)
    }

    /// 取消全部尚未执行的定时命令
    pub fn cancel_scheduled(&self) {
        let slots = &self.scheduled;
        let named = [
            ("play_sound", &slots.sound),
            ("set_test_light", &slots.test_light),
            ("set_light", &slots.light),
            ("set_lever_open", &slots.lever),
        ];
        for (name, slot) in named {
            if slot.is_pending() {
                info!("Cancelling scheduled {}", name);
            }
            slot.cancel();
        }
    }

    /// 无时间戳时立即执行；否则调度到指定时刻（已过去的时刻立即触发）
    fn run_at<F>(
        &self,
        name: &'static str,
        at: Option<DateTime<Utc>>,
        slot: &TimerSlot,
        action: F,
    ) -> Result<Option<String>, DriverError>
    where
        F: FnOnce(&Apparatus) -> Result<(), DriverError> + Send + 'static,
    {
        let Some(at) = at else {
            action(&self.apparatus)?;
            return Ok(None);
        };

        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let apparatus = self.apparatus.clone();
        slot.replace(name, delay, move || {
            if let Err(e) = action(&apparatus) {
                warn!("Scheduled {} failed: {}", name, e);
            }
        })?;
        info!("{} scheduled in {:.3}s", name, delay.as_secs_f64());
        Ok(Some("scheduled".to_string()))
    }

    fn start_motion(
        &self,
        kind: MotionKind,
        id: CarouselId,
        compartment: u8,
        monkey: bool,
        blocking: bool,
    ) -> Result<(), DriverError> {
        let events = self.events.clone();
        let on_complete: MotionCallback = Box::new(move |result: &Result<(), DriverError>| {
            if let Err(e) = result {
                warn!("{} {} finished with error: {}", id, kind.func_name(), e);
            }
            let event = WaitEvent {
                carousel_id: id,
                func_name: kind.func_name().to_string(),
            };
            if let Err(e) = events.send(event.into()) {
                debug!("Dropped wait_event for {}: {}", id, e);
            }
        });

        let ticket = match kind {
            MotionKind::MoveTo => self.apparatus.move_to(id, compartment, monkey, Some(on_complete))?,
            MotionKind::Deploy => self.apparatus.deploy(id, compartment, monkey, Some(on_complete))?,
        };
        if blocking {
            ticket.wait(None);
        }
        Ok(())
    }
}

fn wait_outcome(reached: bool) -> String {
    if reached { "reached" } else { "timeout" }.to_string()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::ChannelSink;
    use apparatus_driver::ApparatusConfig;
    use apparatus_hw::sim::{SimApparatus, SimConfig};
    use apparatus_hw::{HwError, LightPanel};
    use apparatus_protocol::{Color, Message};
    use crossbeam_channel::Receiver;
    use serde_json::json;
    use std::thread;
    use std::time::Instant;

    fn fast_config() -> ApparatusConfig {
        let mut config = ApparatusConfig::default();
        config.motion.settle_ms = 1;
        config.motion.deploy_dwell_ms = 5;
        config.sound.precache = false;
        config
    }

    fn sim() -> SimApparatus {
        SimApparatus::new(SimConfig {
            step_duration: Duration::ZERO,
            ..SimConfig::default()
        })
    }

    fn dispatcher_with(hardware: apparatus_hw::ApparatusHardware) -> (Dispatcher, Receiver<Message>) {
        let apparatus = Apparatus::new(Arc::new(fast_config()), hardware).unwrap();
        let (sink, rx) = ChannelSink::new();
        (Dispatcher::new(Arc::new(apparatus), Arc::new(sink)), rx)
    }

    fn frame(value: serde_json::Value) -> CommandFrame {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_unknown_command_then_valid() {
        let sim = sim();
        let (dispatcher, _rx) = dispatcher_with(sim.hardware());

        let reply = dispatcher.handle(&frame(json!({"func": "fly", "args": {}})));
        assert!(!reply.success);
        assert_eq!(reply.kind, "command");
        assert!(reply.msg.unwrap().contains("unknown command: fly"));

        let reply = dispatcher.handle(&frame(json!({"func": "set_light", "args": {"color": 255}})));
        assert!(reply.success);
        assert_eq!(sim.lights.strip(), Color::BLUE);
    }

    #[test]
    fn test_invalid_arguments() {
        let (dispatcher, _rx) = dispatcher_with(sim().hardware());
        let reply = dispatcher.handle(&frame(json!({
            "func": "move_to",
            "args": {"carousel_id": 5, "compartment_id": 1}
        })));
        assert!(!reply.success);
        assert!(reply.msg.unwrap().contains("move_to"));

        let reply = dispatcher.handle(&frame(json!({
            "func": "move_to",
            "args": {"carousel_id": 0, "compartment_id": 40}
        })));
        assert!(!reply.success);
        assert!(reply.msg.unwrap().contains("Invalid compartment 40"));
    }

    #[test]
    fn test_move_to_pushes_wait_event() {
        let (dispatcher, rx) = dispatcher_with(sim().hardware());
        let reply = dispatcher.handle(&frame(json!({
            "func": "deploy",
            "args": {"carousel_id": 1, "compartment_id": 3, "monkey": true}
        })));
        assert!(reply.success);

        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            msg,
            Message::WaitEvent(WaitEvent {
                carousel_id: CarouselId::Second,
                func_name: "deploy".to_string(),
            })
        );
    }

    #[test]
    fn test_blocking_move_replies_after_event() {
        let (dispatcher, rx) = dispatcher_with(sim().hardware());
        let reply = dispatcher.handle(&frame(json!({
            "func": "move_to",
            "args": {"carousel_id": 0, "compartment_id": 5, "blocking": true}
        })));
        assert!(reply.success);
        // 阻塞模式下应答之前事件已经推送
        assert!(matches!(rx.try_recv(), Ok(Message::WaitEvent(_))));
        assert_eq!(
            dispatcher.apparatus.carousel(CarouselId::First).current_index(),
            Some(5)
        );
    }

    #[test]
    fn test_move_to_wait_reports_outcome() {
        let (dispatcher, _rx) = dispatcher_with(sim().hardware());
        let reply = dispatcher.handle(&frame(json!({
            "func": "move_to_wait",
            "args": {"carousel_id": 0, "timeout": 1.0}
        })));
        assert!(reply.success);
        assert_eq!(reply.msg.as_deref(), Some("reached"));

        let reply = dispatcher.handle(&frame(json!({
            "func": "wait_lever_state",
            "args": {"pin_io": 0, "state": true, "timeout": 0.02}
        })));
        assert!(reply.success);
        assert_eq!(reply.msg.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_scheduled_command_replaces_previous() {
        let sim = sim();
        let (dispatcher, _rx) = dispatcher_with(sim.hardware());
        let later = Utc::now() + chrono::Duration::milliseconds(80);

        let reply = dispatcher.handle(&frame(json!({
            "func": "set_light",
            "args": {"color": Color::RED, "timestamp": later}
        })));
        assert!(reply.success);
        assert_eq!(reply.msg.as_deref(), Some("scheduled"));

        let reply = dispatcher.handle(&frame(json!({
            "func": "set_light",
            "args": {"color": Color::GREEN, "timestamp": later}
        })));
        assert!(reply.success);
        assert!(sim.lights.strip_history().is_empty());

        thread::sleep(Duration::from_millis(200));
        assert_eq!(sim.lights.strip_history(), vec![Color::GREEN]);
    }

    #[test]
    fn test_past_timestamp_fires_immediately() {
        let sim = sim();
        let (dispatcher, _rx) = dispatcher_with(sim.hardware());
        let reply = dispatcher.handle(&frame(json!({
            "func": "play_sound",
            "args": {"timestamp": Utc::now() - chrono::Duration::seconds(1)}
        })));
        assert!(reply.success);

        let deadline = Instant::now() + Duration::from_secs(2);
        while sim.sound.plays().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sim.sound.plays()[0].1, 90);
    }

    #[test]
    fn test_cancel_scheduled() {
        let sim = sim();
        let (dispatcher, _rx) = dispatcher_with(sim.hardware());
        let later = Utc::now() + chrono::Duration::milliseconds(200);
        dispatcher.handle(&frame(json!({
            "func": "set_lever_open",
            "args": {"state": true, "timestamp": later}
        })));
        assert!(dispatcher.scheduled.lever.is_pending());
        dispatcher.cancel_scheduled();
        assert!(!dispatcher.scheduled.lever.is_pending());
        thread::sleep(Duration::from_millis(300));
        assert!(!sim.lever_lock.is_open());
    }

    #[test]
    fn test_untimed_command_runs_inline() {
        let sim = sim();
        let (dispatcher, _rx) = dispatcher_with(sim.hardware());
        let reply = dispatcher.handle(&frame(json!({"func": "set_lever_open", "args": {"state": true}})));
        assert!(reply.success);
        assert_eq!(reply.msg, None);
        assert!(!dispatcher.scheduled.lever.is_pending());
        assert!(sim.lever_lock.is_open());
    }

    struct PanickingLights;

    impl LightPanel for PanickingLights {
        fn set_strip(&mut self, _color: Color) -> Result<(), HwError> {
            panic!("strip driver crashed")
        }

        fn set_test_light(&mut self, _on: bool, _color: Option<Color>) -> Result<(), HwError> {
            Err(HwError::Timeout)
        }

        fn set_human_light(&mut self, _on: bool, _color: Option<Color>) -> Result<(), HwError> {
            Ok(())
        }
    }

    #[test]
    fn test_panic_and_error_become_failure_replies() {
        let mut hardware = sim().hardware();
        hardware.lights = Box::new(PanickingLights);
        let (dispatcher, _rx) = dispatcher_with(hardware);

        let reply = dispatcher.handle(&frame(json!({"func": "set_light", "args": {"color": 0}})));
        assert!(!reply.success);
        assert!(reply.msg.unwrap().contains("strip driver crashed"));

        let reply = dispatcher.handle(&frame(json!({"func": "set_test_light", "args": {"state": true}})));
        assert!(!reply.success);

        let reply = dispatcher.handle(&frame(json!({"func": "set_human_light", "args": {"state": false}})));
        assert!(reply.success);
    }
}
