//! 带自动断电的舵机
//!
//! 每次改变开关状态后重新调度断电定时器；断电只停止输出，不改变门的开关状态。

use crate::error::DriverError;
use crate::timer::TimerSlot;
use apparatus_hw::ServoChannel;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub struct TimedServo {
    name: String,
    channel: Arc<Mutex<Box<dyn ServoChannel>>>,
    timeout: Option<Duration>,
    open: AtomicBool,
    power_off: TimerSlot,
}

impl TimedServo {
    pub fn new(name: impl Into<String>, channel: Box<dyn ServoChannel>, timeout: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            channel: Arc::new(Mutex::new(channel)),
            timeout,
            open: AtomicBool::new(false),
            power_off: TimerSlot::new(),
        }
    }

    pub fn set_open(&self, open: bool) -> Result<(), DriverError> {
        self.channel.lock().set_open(open)?;
        self.open.store(open, Ordering::Release);
        debug!("{} {}", self.name, if open { "opened" } else { "closed" });

        if let Some(timeout) = self.timeout {
            let channel = self.channel.clone();
            let name = self.name.clone();
            self.power_off.replace(&self.name, timeout, move || {
                if let Err(e) = channel.lock().release() {
                    warn!("Failed to power off {}: {}", name, e);
                }
            })?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// 立即断电并取消待执行的断电定时器
    pub fn release(&self) -> Result<(), DriverError> {
        self.power_off.cancel();
        self.channel.lock().release()?;
        Ok(())
    }
}
