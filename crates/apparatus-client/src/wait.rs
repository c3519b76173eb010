//! 多信号等待组合
//!
//! - `or_wait` / [`or_wait_any`]：任一信号置位即返回，报告是哪一个。
//!   对各信号的订阅做一次 `Select` 多路等待，不创建辅助线程；返回前释放所有订阅。
//! - `and_wait` / [`and_wait_all`]：全部置位才成功，所有等待共享同一截止时刻。

use crate::signal::{Subscription, WaitHandle};
use crossbeam_channel::Select;
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// 等待两个信号中的任意一个；返回先置位者的下标（0 或 1），超时返回 `None`
pub fn or_wait(first: &WaitHandle, second: &WaitHandle, timeout: Option<Duration>) -> Option<usize> {
    or_wait_any(&[first, second], timeout)
}

/// 等待任意一个信号置位，返回其下标
///
/// 多个信号同时置位时返回下标最小者。全部信号都已关闭且未置位时返回 `None`。
pub fn or_wait_any(handles: &[&WaitHandle], timeout: Option<Duration>) -> Option<usize> {
    let deadline = deadline_after(timeout);
    let subscriptions: SmallVec<[Subscription; 4]> = handles.iter().map(|h| h.subscribe()).collect();

    let mut select = Select::new();
    for subscription in &subscriptions {
        select.recv(subscription.receiver());
    }
    let mut open = subscriptions.len();

    loop {
        if let Some(index) = handles.iter().position(|h| h.is_set()) {
            return Some(index);
        }
        if open == 0 {
            return None;
        }

        let operation = match deadline {
            Some(deadline) => match select.select_deadline(deadline) {
                Ok(operation) => operation,
                Err(_) => return handles.iter().position(|h| h.is_set()),
            },
            None => select.select(),
        };
        let index = operation.index();
        if operation.recv(subscriptions[index].receiver()).is_err() {
            // 句柄已关闭，不再参与等待
            select.remove(index);
            open -= 1;
        }
    }
}

/// 两个信号都置位才返回 `true`；第二个等待只使用剩余时间
pub fn and_wait(first: &WaitHandle, second: &WaitHandle, timeout: Option<Duration>) -> bool {
    and_wait_all(&[first, second], timeout)
}

pub fn and_wait_all(handles: &[&WaitHandle], timeout: Option<Duration>) -> bool {
    let deadline = deadline_after(timeout);
    handles.iter().all(|handle| {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        handle.wait(remaining)
    })
}

/// 超出可表示范围的超时视为无限等待
fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::thread;

    fn set_after(handle: &WaitHandle, delay: Duration) -> thread::JoinHandle<()> {
        let handle = handle.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            handle.set();
        })
    }

    #[test]
    fn test_or_wait_reports_second() {
        let a = WaitHandle::new("a");
        let b = WaitHandle::new("b");
        let t = set_after(&b, Duration::from_millis(20));
        assert_eq!(or_wait(&a, &b, Some(Duration::from_secs(5))), Some(1));
        t.join().unwrap();
        assert_eq!(a.waiter_count(), 0);
        assert_eq!(b.waiter_count(), 0);
    }

    #[test]
    fn test_or_wait_timeout() {
        let a = WaitHandle::new("a");
        let b = WaitHandle::new("b");
        let start = Instant::now();
        assert_eq!(or_wait(&a, &b, Some(Duration::from_millis(30))), None);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_or_wait_repeated_calls_leave_no_subscriptions() {
        let a = WaitHandle::new("a");
        let b = WaitHandle::new("b");
        for _ in 0..100 {
            assert_eq!(or_wait(&a, &b, Some(Duration::ZERO)), None);
        }
        a.set();
        for _ in 0..100 {
            assert_eq!(or_wait(&a, &b, Some(Duration::ZERO)), Some(0));
        }
        assert_eq!(a.waiter_count(), 0);
        assert_eq!(b.waiter_count(), 0);
    }

    #[test]
    fn test_or_wait_all_closed() {
        let a = WaitHandle::new("a");
        let b = WaitHandle::new("b");
        let (ca, cb) = (a.clone(), b.clone());
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            ca.close();
            thread::sleep(Duration::from_millis(10));
            cb.close();
        });
        assert_eq!(or_wait(&a, &b, None), None);
        t.join().unwrap();
    }

    #[test]
    fn test_or_wait_any_random_winner() {
        let handles: Vec<WaitHandle> = (0..6).map(|i| WaitHandle::new(format!("h{}", i))).collect();
        let winner = rand::thread_rng().gen_range(0..handles.len());
        let t = set_after(&handles[winner], Duration::from_millis(10));
        let refs: Vec<&WaitHandle> = handles.iter().collect();
        assert_eq!(or_wait_any(&refs, Some(Duration::from_secs(5))), Some(winner));
        t.join().unwrap();
    }

    #[test]
    fn test_and_wait_both() {
        let a = WaitHandle::new("a");
        let b = WaitHandle::new("b");
        let ta = set_after(&a, Duration::from_millis(10));
        let tb = set_after(&b, Duration::from_millis(20));
        assert!(and_wait(&a, &b, Some(Duration::from_secs(5))));
        ta.join().unwrap();
        tb.join().unwrap();
    }

    #[test]
    fn test_and_wait_shares_deadline() {
        let a = WaitHandle::new("a");
        let b = WaitHandle::new("b");
        // 第一个在 40ms 时置位，第二个永不置位：总耗时不超过 60ms 的预算
        let t = set_after(&a, Duration::from_millis(40));
        let start = Instant::now();
        assert!(!and_wait(&a, &b, Some(Duration::from_millis(60))));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(60) + Duration::from_millis(50));
        t.join().unwrap();
    }

    #[test]
    fn test_huge_timeout_is_forever() {
        let a = WaitHandle::new("a");
        let b = WaitHandle::new("b");
        a.set();
        assert_eq!(or_wait(&a, &b, Some(Duration::MAX)), Some(0));

        let t = set_after(&b, Duration::from_millis(20));
        assert!(and_wait(&a, &b, Some(Duration::MAX)));
        t.join().unwrap();

        a.clear();
        b.clear();
        let t = set_after(&b, Duration::from_millis(20));
        assert_eq!(or_wait(&a, &b, Some(Duration::MAX)), Some(1));
        t.join().unwrap();
    }

    #[test]
    fn test_and_wait_all_empty() {
        assert!(and_wait_all(&[], Some(Duration::ZERO)));
    }
}
