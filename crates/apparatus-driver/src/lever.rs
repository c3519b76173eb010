//! 拉杆：锁舵机 + 三个数字输入

use crate::config::LeverConfig;
use crate::error::DriverError;
use crate::servo::TimedServo;
use apparatus_hw::{LeverInputs, ServoChannel};
use apparatus_protocol::LeverInput;
use crossbeam_channel::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Lever {
    config: LeverConfig,
    lock: TimedServo,
    inputs: Arc<dyn LeverInputs>,
}

impl Lever {
    pub fn new(config: &LeverConfig, lock: Box<dyn ServoChannel>, inputs: Arc<dyn LeverInputs>) -> Self {
        Self {
            config: config.clone(),
            lock: TimedServo::new("lever lock", lock, config.servo_timeout()),
            inputs,
        }
    }

    pub fn config(&self) -> &LeverConfig {
        &self.config
    }

    pub fn inputs(&self) -> &Arc<dyn LeverInputs> {
        &self.inputs
    }

    /// 解锁（`true`）或锁定拉杆
    pub fn set_open(&self, open: bool) -> Result<(), DriverError> {
        self.lock.set_open(open)
    }

    pub fn is_open(&self) -> bool {
        self.lock.is_open()
    }

    pub fn release(&self) -> Result<(), DriverError> {
        self.lock.release()
    }

    pub fn level(&self, input: LeverInput) -> Result<bool, DriverError> {
        Ok(self.inputs.level(self.config.pin(input))?)
    }

    /// 阻塞直到输入达到 `state`；超时返回 `Ok(false)`
    ///
    /// 非自旋模式下订阅原始跳变，每次跳变后等待去抖时间再读取电平。
    pub fn wait_state(
        &self,
        input: LeverInput,
        state: bool,
        timeout: Option<Duration>,
        spinlock: bool,
    ) -> Result<bool, DriverError> {
        // 超出可表示范围的超时视为无限等待
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        if spinlock {
            return self.poll_state(input, state, deadline);
        }

        let pin = self.config.pin(input);
        let bounce = self.config.bounce(input);
        // 先订阅再读取，避免漏掉两者之间的跳变
        let edges = self.inputs.subscribe_edges();
        if self.level(input)? == state {
            return Ok(true);
        }
        debug!("waiting for {:?} == {}", input, state);

        loop {
            let received = match deadline {
                Some(deadline) => edges.recv_deadline(deadline),
                None => edges.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(edge) if edge.pin == pin => {
                    spin_sleep::sleep(bounce);
                    if self.level(input)? == state {
                        return Ok(true);
                    }
                },
                Ok(_) => {},
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => return Ok(self.level(input)? == state),
            }
        }
    }

    fn poll_state(&self, input: LeverInput, state: bool, deadline: Option<Instant>) -> Result<bool, DriverError> {
        loop {
            if self.level(input)? == state {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            spin_sleep::sleep(POLL_INTERVAL);
        }
    }
}
