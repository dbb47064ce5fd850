//! 总线计数器
//!
//! 接收线程与发送方直接对原子计数器做 `fetch_add`，任何线程都可以随时读取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 总线实时计数器
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// 收到的帧总数
    pub rx_frames_total: AtomicU64,
    /// 接收超时次数（总线空闲时的正常现象）
    pub rx_timeouts: AtomicU64,
    /// 写入 PDO 槽位的帧数
    pub pdo_updates: AtomicU64,
    /// 分发给至少一个响应处理器的帧数
    pub responses_dispatched: AtomicU64,
    /// 成功发送的帧数
    pub tx_frames_total: AtomicU64,
    /// 发送失败次数（包括短写入）
    pub tx_errors: AtomicU64,
    /// 接收端非致命设备错误次数
    pub device_errors: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStats {
        BusStats {
            rx_frames_total: self.rx_frames_total.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            pdo_updates: self.pdo_updates.load(Ordering::Relaxed),
            responses_dispatched: self.responses_dispatched.load(Ordering::Relaxed),
            tx_frames_total: self.tx_frames_total.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub rx_frames_total: u64,
    pub rx_timeouts: u64,
    pub pdo_updates: u64,
    pub responses_dispatched: u64,
    pub tx_frames_total: u64,
    pub tx_errors: u64,
    pub device_errors: u64,
}

impl BusStats {
    /// 发送失败率（百分比），没有发送尝试时为 0
    pub fn tx_error_rate(&self) -> f64 {
        let attempts = self.tx_frames_total + self.tx_errors;
        if attempts == 0 {
            return 0.0;
        }
        (self.tx_errors as f64 / attempts as f64) * 100.0
    }
}
