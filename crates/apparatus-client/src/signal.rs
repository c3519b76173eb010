//! 可等待的布尔锁存信号
//!
//! [`WaitHandle`] 是可克隆的共享句柄。等待方通过 [`WaitHandle::subscribe`]
//! 拿到一个容量为 1 的通知通道：
//! - 信号置位时向每个订阅者投递一个令牌（订阅时已置位则立即投递）
//! - 句柄关闭时丢弃所有发送端，订阅者的接收端随之断开
//! - [`Subscription`] 被丢弃时自动注销
//!
//! 通知只表示"状态可能变化"，等待方收到后总是重新读取状态。

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct LatchState {
    set: bool,
    closed: bool,
    next_id: u64,
    waiters: Vec<(u64, Sender<()>)>,
}

struct Inner {
    label: String,
    state: Mutex<LatchState>,
}

/// 线程安全的布尔锁存信号
#[derive(Clone)]
pub struct WaitHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WaitHandle")
            .field("label", &self.inner.label)
            .field("set", &state.set)
            .field("closed", &state.closed)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl WaitHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                state: Mutex::new(LatchState::default()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_set(&self) -> bool {
        self.inner.state.lock().set
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// 置位并唤醒所有等待方
    pub fn set(&self) {
        let mut state = self.inner.state.lock();
        state.set = true;
        for (_, tx) in &state.waiters {
            let _ = tx.try_send(());
        }
    }

    pub fn clear(&self) {
        self.inner.state.lock().set = false;
    }

    /// 关闭信号：唤醒所有等待方，之后的等待立即返回当前状态
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.waiters.clear();
    }

    /// 当前订阅者数量
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = bounded(1);
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        if !state.closed {
            if state.set {
                let _ = tx.try_send(());
            }
            state.waiters.push((id, tx));
        }
        Subscription {
            handle: self.clone(),
            id,
            rx,
        }
    }

    /// 等待信号置位；`None` 或超出可表示范围的超时表示无限等待。超时或关闭时返回当前状态
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let subscription = self.subscribe();
        loop {
            if self.is_set() {
                return true;
            }
            let received = match deadline {
                Some(deadline) => subscription.rx.recv_deadline(deadline),
                None => subscription.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(()) => continue,
                Err(_) => return self.is_set(),
            }
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.inner.state.lock().waiters.retain(|(waiter, _)| *waiter != id);
    }
}

/// 一次订阅；丢弃时注销
pub struct Subscription {
    handle: WaitHandle,
    id: u64,
    rx: Receiver<()>,
}

impl Subscription {
    pub fn handle(&self) -> &WaitHandle {
        &self.handle
    }

    /// 通知通道：收到令牌或断开（句柄关闭）都应重新检查状态
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_before_wait() {
        let handle = WaitHandle::new("a");
        handle.set();
        assert!(handle.wait(Some(Duration::ZERO)));
        assert!(handle.wait(None));
        handle.clear();
        assert!(!handle.wait(Some(Duration::from_millis(5))));
    }

    #[test]
    fn test_huge_timeout() {
        let handle = WaitHandle::new("a");
        handle.set();
        assert!(handle.wait(Some(Duration::MAX)));

        handle.clear();
        let setter = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        assert!(handle.wait(Some(Duration::MAX)));
        t.join().unwrap();
    }

    #[test]
    fn test_wakes_waiter() {
        let handle = WaitHandle::new("a");
        let setter = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        let start = Instant::now();
        assert!(handle.wait(Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(2));
        t.join().unwrap();
        assert_eq!(handle.waiter_count(), 0);
    }

    #[test]
    fn test_close_unblocks_forever_wait() {
        let handle = WaitHandle::new("a");
        let closer = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        assert!(!handle.wait(None));
        t.join().unwrap();
        assert!(handle.is_closed());
        assert!(!handle.wait(None));
    }

    #[test]
    fn test_subscription_unregisters() {
        let handle = WaitHandle::new("a");
        let a = handle.subscribe();
        let b = handle.subscribe();
        assert_eq!(handle.waiter_count(), 2);
        drop(a);
        assert_eq!(handle.waiter_count(), 1);
        handle.set();
        assert!(b.receiver().try_recv().is_ok());
        drop(b);
        assert_eq!(handle.waiter_count(), 0);
    }

    #[test]
    fn test_subscribe_when_set_gets_token() {
        let handle = WaitHandle::new("a");
        handle.set();
        let sub = handle.subscribe();
        assert!(sub.receiver().try_recv().is_ok());
    }
}
