//! 输入事件观察者（例如试次日志）

use apparatus_protocol::LeverInput;
use chrono::{DateTime, Utc};

/// 在接收线程上为每个 `io_event` 调用一次
///
/// `active` 为逻辑状态：触摸输入与电平一致，拉杆开关为低电平有效。
/// `timestamp` 已由服务端减去去抖时间。实现不应长时间阻塞。
pub trait IoObserver: Send + Sync {
    fn on_io_event(&self, input: LeverInput, active: bool, timestamp: DateTime<Utc>);
}

impl<F> IoObserver for F
where
    F: Fn(LeverInput, bool, DateTime<Utc>) + Send + Sync,
{
    fn on_io_event(&self, input: LeverInput, active: bool, timestamp: DateTime<Utc>) {
        self(input, active, timestamp)
    }
}

/// 电平 → 逻辑状态
pub fn active_state(input: LeverInput, level: bool) -> bool {
    match input {
        LeverInput::Touch => level,
        LeverInput::Pulled | LeverInput::Released => !level,
    }
}
