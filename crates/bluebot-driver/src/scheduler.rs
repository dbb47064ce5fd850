//! 绝对时间周期任务
//!
//! 激活时刻固定在 `anchor + k * period` 的网格上：每次激活后截止时间只前进一个周期，
//! 与实际激活的早晚无关。消费者迟到时立即返回，不跳过也不压缩后续网格点。

use std::time::{Duration, Instant};

/// 单调时钟
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// 阻塞到 `deadline`（已过期则立即返回）
    fn sleep_until(&self, deadline: Instant);
}

/// 系统单调时钟，用 `spin_sleep` 获得亚毫秒级唤醒精度
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            spin_sleep::sleep(deadline - now);
        }
    }
}

/// 周期任务
#[derive(Debug)]
pub struct PeriodicTask<C: Clock = MonotonicClock> {
    clock: C,
    next_activation: Instant,
    period: Duration,
    activations: u64,
}

impl PeriodicTask<MonotonicClock> {
    /// 第一次激活在 `now + initial_offset`
    pub fn start(initial_offset: Duration, period: Duration) -> Self {
        Self::with_clock(MonotonicClock, initial_offset, period)
    }
}

impl<C: Clock> PeriodicTask<C> {
    pub fn with_clock(clock: C, initial_offset: Duration, period: Duration) -> Self {
        let next_activation = clock.now() + initial_offset;
        Self {
            clock,
            next_activation,
            period,
            activations: 0,
        }
    }

    /// 等待下一次激活
    ///
    /// 返回本次激活的迟到时间（准时为零）。迟到后截止时间仍只前进一个周期，
    /// 追上网格之前的每次调用都立即返回。
    pub fn wait_next_activation(&mut self) -> Duration {
        let now = self.clock.now();
        let overrun = if now < self.next_activation {
            self.clock.sleep_until(self.next_activation);
            Duration::ZERO
        } else {
            now - self.next_activation
        };

        self.next_activation += self.period;
        self.activations += 1;
        overrun
    }

    /// 下一次激活的截止时间
    pub fn next_activation(&self) -> Instant {
        self.next_activation
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 已激活次数
    pub fn activations(&self) -> u64 {
        self.activations
    }
}
