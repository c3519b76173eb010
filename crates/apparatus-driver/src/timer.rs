//! 可取消的一次性定时任务
//!
//! 每个任务运行在独立线程上，等待取消信号直到截止时刻：
//! - 收到取消信号：任务不执行
//! - 到达截止时刻：执行任务
//! - 句柄被丢弃（未取消）：任务脱离句柄，仍按时执行
//!
//! [`TimerSlot`] 把定时任务存放在其控制的资源旁边，重新调度时先取消旧任务。

use crate::error::DriverError;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// 一次性定时任务句柄
#[derive(Debug)]
pub struct OneShot {
    cancel_tx: Sender<()>,
    done: Arc<AtomicBool>,
}

impl OneShot {
    /// 在 `delay` 之后执行 `action`
    pub fn schedule<F>(name: &str, delay: Duration, action: F) -> Result<Self, DriverError>
    where
        F: FnOnce() + Send + 'static,
    {
        // 超出可表示范围的时刻视为永不到期，只能被取消
        let deadline = Instant::now().checked_add(delay);
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = done.clone();
        let label = name.to_string();

        thread::Builder::new()
            .name(format!("timer-{}", name))
            .spawn(move || {
                let Some(deadline) = deadline else {
                    let _ = cancel_rx.recv();
                    trace!("timer {} dropped without firing", label);
                    done_flag.store(true, Ordering::Release);
                    return;
                };
                match cancel_rx.recv_deadline(deadline) {
                    Ok(()) => {
                        trace!("timer {} cancelled", label);
                        done_flag.store(true, Ordering::Release);
                        return;
                    },
                    Err(RecvTimeoutError::Timeout) => {},
                    Err(RecvTimeoutError::Disconnected) => {
                        // 句柄已丢弃，按原计划执行
                        let now = Instant::now();
                        if deadline > now {
                            thread::sleep(deadline - now);
                        }
                    },
                }
                trace!("timer {} fired", label);
                action();
                done_flag.store(true, Ordering::Release);
            })
            .map_err(DriverError::Spawn)?;

        Ok(Self { cancel_tx, done })
    }

    /// 取消尚未执行的任务（已执行则无效果）
    pub fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }

    /// 任务已执行或已确认取消
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// 单资源的定时任务插槽：最多保留一个待执行任务
#[derive(Debug, Default)]
pub struct TimerSlot {
    current: Mutex<Option<OneShot>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消旧任务并调度新任务
    pub fn replace<F>(&self, name: &str, delay: Duration, action: F) -> Result<(), DriverError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut current = self.current.lock();
        if let Some(old) = current.take() {
            old.cancel();
        }
        *current = Some(OneShot::schedule(name, delay, action)?);
        Ok(())
    }

    pub fn cancel(&self) {
        if let Some(old) = self.current.lock().take() {
            old.cancel();
        }
    }

    /// 是否有尚未执行的任务
    pub fn is_pending(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_fires_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let start = Instant::now();
        let timer = OneShot::schedule("t", Duration::from_millis(30), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(wait_until(|| timer.is_finished(), Duration::from_secs(2)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_prevents_action() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = OneShot::schedule("t", Duration::from_millis(50), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        timer.cancel();
        assert!(wait_until(|| timer.is_finished(), Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unrepresentable_delay_never_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = OneShot::schedule("t", Duration::MAX, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!timer.is_finished());
        timer.cancel();
        assert!(wait_until(|| timer.is_finished(), Duration::from_secs(2)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_handle_still_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        drop(
            OneShot::schedule("t", Duration::from_millis(10), move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );
        assert!(wait_until(
            || count.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_slot_replace_cancels_previous() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot = TimerSlot::new();
        let l1 = log.clone();
        slot.replace("a", Duration::from_millis(40), move || l1.lock().push("first"))
            .unwrap();
        let l2 = log.clone();
        slot.replace("b", Duration::from_millis(10), move || l2.lock().push("second"))
            .unwrap();
        assert!(wait_until(|| !slot.is_pending(), Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn test_slot_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let slot = TimerSlot::new();
        let c = count.clone();
        slot.replace("a", Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(slot.is_pending());
        slot.cancel();
        assert!(!slot.is_pending());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
