//! 单槽邮箱（最新值覆盖）
//!
//! 生产者（通常是接收线程）用 [`Mailbox::publish`] 覆盖槽位；消费者可以非阻塞读取，
//! 也可以带超时等待下一个值。版本号区分“新值”和“已读过的值”。

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    /// 每次 publish 递增
    version: u64,
    /// 消费者最后一次看到的版本
    seen: u64,
}

/// 容量为 1 的覆盖式邮箱
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                version: 0,
                seen: 0,
            }),
            ready: Condvar::new(),
        }
    }
}

impl<T: Clone> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖槽位并唤醒所有等待者，返回是否覆盖了一个未读的值
    pub fn publish(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        let overwritten = slot.value.is_some() && slot.version != slot.seen;
        slot.value = Some(value);
        slot.version = slot.version.wrapping_add(1);
        drop(slot);
        self.ready.notify_all();
        overwritten
    }

    /// 当前值（不改变已读状态）
    pub fn latest(&self) -> Option<T> {
        self.slot.lock().value.clone()
    }

    /// 取出未读的值，并标记为已读
    pub fn take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        if slot.version == slot.seen {
            return None;
        }
        slot.seen = slot.version;
        slot.value.clone()
    }

    /// 等待一个未读的值（超时返回 `None`）
    pub fn wait_take(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.version == slot.seen {
            if self.ready.wait_until(&mut slot, deadline).timed_out() && slot.version == slot.seen
            {
                return None;
            }
        }
        slot.seen = slot.version;
        slot.value.clone()
    }

    /// 已有值则立即返回，否则等待第一个值
    pub fn wait_latest(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.value.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.value.clone()
    }

    /// 发布次数
    pub fn version(&self) -> u64 {
        self.slot.lock().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_latest_wins() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.publish(1));
        assert!(mailbox.publish(2));
        assert_eq!(mailbox.take(), Some(2));
        assert_eq!(mailbox.take(), None);
        assert_eq!(mailbox.latest(), Some(2));
        assert!(!mailbox.publish(3));
        assert_eq!(mailbox.version(), 3);
    }

    #[test]
    fn test_wait_take_times_out() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        let start = Instant::now();
        assert_eq!(mailbox.wait_take(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_take_wakes_on_publish() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.publish(42u32);
        });

        assert_eq!(mailbox.wait_take(Duration::from_secs(5)), Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_latest_returns_existing_value() {
        let mailbox = Mailbox::new();
        mailbox.publish("ready");
        mailbox.take();
        assert_eq!(mailbox.wait_latest(Duration::ZERO), Some("ready"));
    }
}
