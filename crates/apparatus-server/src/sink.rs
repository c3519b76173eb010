//! 连接的唯一写出路径
//!
//! 应答、输入事件、运动完成事件与心跳共用同一个 [`EventSink`]，
//! 写互斥保证每帧整体写出、不会交错。

use crate::error::ServerError;
use apparatus_protocol::{Message, write_message};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// 消息出口
pub trait EventSink: Send + Sync {
    fn send(&self, msg: Message) -> Result<(), ServerError>;
}

/// 写入字节流的出口
///
/// 第一次写失败后标记为关闭，之后的发送直接返回 [`ServerError::Closed`]。
pub struct StreamSink<W> {
    writer: Mutex<W>,
    closed: AtomicBool,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl<W: Write + Send> EventSink for StreamSink<W> {
    fn send(&self, msg: Message) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::Closed);
        }
        let mut writer = self.writer.lock();
        if let Err(e) = write_message(&mut *writer, &msg) {
            self.close();
            return Err(e.into());
        }
        trace!("-> {}", msg.kind());
        Ok(())
    }
}
