//! 单个客户端连接的生命周期
//!
//! 1. 推送输入初始状态，启动事件推送与心跳
//! 2. 逐条读取命令：一条命令执行完并写出应答后才读取下一条
//! 3. 断开时停止所有电机、取消本连接的定时命令、复位硬件

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::notifier::Notifier;
use crate::sink::{EventSink, StreamSink};
use apparatus_driver::Apparatus;
use apparatus_protocol::{CodecError, FrameReader, Message, Reply};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 周期性发送 `msg` 心跳
struct Heartbeat {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn start(interval: Duration, sink: Arc<dyn EventSink>) -> Result<Self, ServerError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    if let Err(e) = sink.send(Message::heartbeat()) {
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
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// 处理一个已接受的连接，直到对端关闭或发生致命协议错误
///
/// 无论以何种方式结束，返回前都会执行断开时的硬件清理。
pub fn serve_connection(stream: TcpStream, apparatus: Arc<Apparatus>) -> Result<(), ServerError> {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!("Connected: {}", peer);
    stream.set_nodelay(true)?;

    let sink = Arc::new(StreamSink::new(stream.try_clone()?));
    let dispatcher = Dispatcher::new(apparatus.clone(), sink.clone());
    let result = run(&stream, &apparatus, &dispatcher, sink.clone());

    sink.close();
    teardown(&apparatus, &dispatcher);
    match &result {
        Ok(()) => info!("Closed: {}", peer),
        Err(e) => warn!("Closed {} after error: {}", peer, e),
    }
    result
}

fn run(
    stream: &TcpStream,
    apparatus: &Apparatus,
    dispatcher: &Dispatcher,
    sink: Arc<StreamSink<TcpStream>>,
) -> Result<(), ServerError> {
    let config = apparatus.config();
    let _notifier = Notifier::start(
        &config.lever,
        apparatus.lever().inputs().clone(),
        sink.clone(),
    )?;
    let _heartbeat = match config.server.heartbeat_interval_ms {
        0 => None,
        ms => Some(Heartbeat::start(Duration::from_millis(ms), sink.clone())?),
    };

    let mut reader =
        FrameReader::new(BufReader::new(stream.try_clone()?)).with_max_frame_len(config.server.max_frame_len);
    loop {
        let msg = match reader.next_message() {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!("Peer closed the connection");
                return Ok(());
            },
            Err(CodecError::MissingType) => {
                warn!("Received message without type");
                sink.send(Reply::missing_type().into())?;
                continue;
            },
            Err(e) => return Err(e.into()),
        };

        match msg {
            Message::Command(frame) => {
                let reply = dispatcher.handle(&frame);
                sink.send(reply.into())?;
            },
            Message::Msg(text) => trace!("<- msg: {}", text.msg),
            other => debug!("Ignoring unexpected {} message", other.kind()),
        }
    }
}

fn teardown(apparatus: &Apparatus, dispatcher: &Dispatcher) {
    info!("Client left, resetting hardware");
    dispatcher.cancel_scheduled();
    if let Err(e) = apparatus.motors_off() {
        error!("Failed to stop motors: {}", e);
    }
    if let Err(e) = apparatus.init_hw() {
        error!("Failed to re-initialise hardware: {}", e);
    }
}
