//! 服务端线上协议集成测试（模拟硬件 + 127.0.0.1 临时端口）

use apparatus_driver::{Apparatus, ApparatusConfig};
use apparatus_hw::sim::{SimApparatus, SimConfig};
use apparatus_protocol::{
    CarouselId, Command, FrameReader, Message, Reply, WaitEvent, write_message,
};
use apparatus_server::{Server, ServerHandle};
use serde_json::json;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct Harness {
    sim: SimApparatus,
    apparatus: Arc<Apparatus>,
    handle: ServerHandle,
    worker: Option<JoinHandle<Result<(), apparatus_server::ServerError>>>,
}

impl Harness {
    fn start() -> Self {
        let mut config = ApparatusConfig::default();
        config.motion.settle_ms = 1;
        config.motion.deploy_dwell_ms = 5;
        config.sound.precache = false;
        let sim = SimApparatus::new(SimConfig {
            step_duration: Duration::from_micros(2),
            ..SimConfig::default()
        });
        let apparatus = Arc::new(Apparatus::new(Arc::new(config), sim.hardware()).unwrap());
        let server = Server::bind_addr("127.0.0.1:0", apparatus.clone()).unwrap();
        let (handle, worker) = server.spawn().unwrap();
        Self {
            sim,
            apparatus,
            handle,
            worker: Some(worker),
        }
    }

    fn connect(&self) -> Peer {
        let stream = TcpStream::connect(self.handle.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let reader = FrameReader::new(stream.try_clone().unwrap());
        Peer { stream, reader }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Peer {
    stream: TcpStream,
    reader: FrameReader<TcpStream>,
}

impl Peer {
    fn send(&mut self, command: Command) {
        let frame = command.to_frame().unwrap();
        write_message(&mut self.stream, &frame.into()).unwrap();
    }

    fn send_raw(&mut self, value: serde_json::Value) {
        let payload = serde_json::to_vec(&value).unwrap();
        self.stream.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
        self.stream.write_all(&payload).unwrap();
    }

    fn next(&mut self) -> Message {
        self.reader.next_message().unwrap().unwrap()
    }

    /// 读取直到下一个应答，返回应答与途中收到的其他消息
    fn reply(&mut self) -> (Reply, Vec<Message>) {
        let mut others = Vec::new();
        loop {
            match self.next() {
                Message::Reply(reply) => return (reply, others),
                other => others.push(other),
            }
        }
    }

    fn seed(&mut self) -> Vec<Message> {
        (0..3).map(|_| self.next()).collect()
    }
}

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn seeds_input_state_before_commands() {
    let harness = Harness::start();
    let mut peer = harness.connect();
    let seed = peer.seed();
    assert!(seed.iter().all(|m| matches!(m, Message::IoEvent(e) if !e.state)));

    peer.send(Command::SetHumanLight {
        state: false,
        color: None,
    });
    let (reply, _) = peer.reply();
    assert!(reply.success);
    assert!(!harness.sim.lights.human_light().0);
}

#[test]
fn unknown_command_keeps_connection_open() {
    let harness = Harness::start();
    let mut peer = harness.connect();
    peer.seed();

    peer.send_raw(json!({"type": "command", "func": "teleport", "args": {}}));
    let (reply, _) = peer.reply();
    assert_eq!(reply.kind, "command");
    assert!(!reply.success);
    assert!(reply.msg.unwrap().contains("unknown command"));

    peer.send_raw(json!({"func": "init_hw", "args": {}}));
    let (reply, _) = peer.reply();
    assert_eq!(reply, Reply::missing_type());

    peer.send(Command::SetLeverOpen {
        state: true,
        timestamp: None,
    });
    let (reply, _) = peer.reply();
    assert!(reply.success);
    assert!(harness.sim.lever_lock.is_open());
}

#[test]
fn replies_follow_command_order() {
    let harness = Harness::start();
    let mut peer = harness.connect();
    peer.seed();

    for compartment in [1, 2, 3] {
        peer.send(Command::MoveTo {
            carousel_id: CarouselId::First,
            compartment_id: compartment,
            monkey: false,
            blocking: false,
        });
    }
    peer.send_raw(json!({"type": "command", "func": "nope", "args": {}}));

    let mut replies = Vec::new();
    let mut wait_events = 0;
    while replies.len() < 4 || wait_events < 3 {
        match peer.next() {
            Message::Reply(reply) => replies.push(reply.success),
            Message::WaitEvent(event) => {
                assert_eq!(event.carousel_id, CarouselId::First);
                wait_events += 1;
            },
            _ => {},
        }
    }
    assert_eq!(replies, vec![true, true, true, false]);
    assert_eq!(harness.sim.carousels[0].motor.overlaps(), 0);
}

#[test]
fn blocking_deploy_pushes_event_before_reply() {
    let harness = Harness::start();
    let mut peer = harness.connect();
    peer.seed();

    peer.send(Command::Deploy {
        carousel_id: CarouselId::Second,
        compartment_id: 2,
        monkey: true,
        blocking: true,
    });
    let (reply, before) = peer.reply();
    assert!(reply.success);
    assert!(before.contains(&Message::WaitEvent(WaitEvent {
        carousel_id: CarouselId::Second,
        func_name: "deploy".to_string(),
    })));
    assert!(!harness.sim.carousels[1].monkey_door.is_open());
}

#[test]
fn lever_transition_reaches_client() {
    let harness = Harness::start();
    let mut peer = harness.connect();
    peer.seed();

    let pin = harness.apparatus.config().lever.touch_io;
    harness.sim.lever.set_level(pin, true);
    match peer.next() {
        Message::IoEvent(event) => {
            assert_eq!(event.pin_io, pin);
            assert_eq!(event.name, "LEVER_TOUCHS_IO");
            assert!(event.state);
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn disconnect_resets_hardware() {
    let harness = Harness::start();
    {
        let mut peer = harness.connect();
        peer.seed();
        peer.send(Command::MoveTo {
            carousel_id: CarouselId::First,
            compartment_id: 5,
            monkey: false,
            blocking: true,
        });
        let (reply, _) = peer.reply();
        assert!(reply.success);
        peer.send(Command::SetLight {
            color: apparatus_protocol::Color::RED,
            timestamp: None,
        });
        peer.reply();
    }

    let carousel = harness.apparatus.carousel(CarouselId::First);
    assert!(wait_until(|| carousel.current_index() == Some(8)));
    assert!(wait_until(|| harness.sim.lights.strip() == apparatus_protocol::Color::BLACK));
}

#[test]
fn truncated_frame_drops_connection_only() {
    let harness = Harness::start();
    {
        let mut peer = harness.connect();
        peer.seed();
        peer.stream.write_all(&100u32.to_le_bytes()).unwrap();
        peer.stream.write_all(b"{\"type\"").unwrap();
    }

    // 下一个连接照常服务
    let mut peer = harness.connect();
    peer.seed();
    peer.send(Command::SetLight {
        color: apparatus_protocol::Color::BLUE,
        timestamp: None,
    });
    let (reply, _) = peer.reply();
    assert!(reply.success);
}

#[test]
fn shutdown_stops_accept_loop() {
    let mut harness = Harness::start();
    let mut peer = harness.connect();
    peer.seed();

    harness.handle.shutdown();
    let worker = harness.worker.take().unwrap();
    assert!(worker.join().unwrap().is_ok());
    assert!(harness.handle.is_shutdown());
}
