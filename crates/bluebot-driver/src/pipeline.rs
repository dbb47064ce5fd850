//! 接收线程
//!
//! 每个总线一个接收线程，对每一帧依次执行：
//!
//! 1. PDO 区域的帧写入对应的已注册槽位（`0x7FF` 视为 `0x3FF`）
//! 2. 响应区域（`0x580 + id`）的帧分发给该服务 ID 的订阅者
//! 3. 应答捕获开启时记录最近一帧
//! 4. 触发帧钩子
//!
//! 读超时只用于检查退出标志；致命错误（设备消失、bus-off）停止接收线程。

use crate::config::BusConfig;
use crate::dispatch::SubscriberRegistry;
use crate::hooks::HookManager;
use crate::metrics::BusMetrics;
use crate::pdo::PdoStore;
use bluebot_can::{CanError, RxAdapter};
use bluebot_protocol::{BlueFrame, PdoKey, response_sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, trace, warn};

/// 一个总线上所有接收侧共享的状态
#[derive(Debug, Default)]
pub struct BusContext {
    /// PDO 寄存器表
    pub pdo: PdoStore,
    /// 响应订阅者
    pub subscribers: Arc<SubscriberRegistry>,
    /// 帧钩子
    pub hooks: RwLock<HookManager>,
    /// 是否记录最近一帧（调试用）
    pub ack_capture: AtomicBool,
    /// 最近一帧（仅在 `ack_capture` 开启时更新）
    pub last_ack: Mutex<Option<BlueFrame>>,
    pub metrics: BusMetrics,
}

impl BusContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 处理一帧（接收线程调用，测试中也可直接调用）
pub fn dispatch_frame(ctx: &BusContext, frame: &BlueFrame) {
    let payload = frame.data_slice();

    if let Some(key) = PdoKey::from_cob_id(frame.id)
        && ctx.pdo.update(key, payload)
    {
        BusMetrics::inc(&ctx.metrics.pdo_updates);
    }

    if let Some(sender) = response_sender(frame.id)
        && ctx.subscribers.dispatch(sender, payload) > 0
    {
        BusMetrics::inc(&ctx.metrics.responses_dispatched);
    }

    if ctx.ack_capture.load(Ordering::Relaxed) {
        *ctx.last_ack.lock() = Some(*frame);
    }

    ctx.hooks.read().trigger_all(frame);
}

/// 接收循环
///
/// - `is_running` 为 `false` 时在下一次读超时后退出
/// - 致命错误会把 `is_running` 置为 `false` 后退出
pub fn rx_loop(
    mut rx: impl RxAdapter,
    ctx: Arc<BusContext>,
    config: BusConfig,
    is_running: Arc<AtomicBool>,
) {
    apply_realtime_settings(&config);
    let backoff = config.receive_timeout();

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: stop requested, exiting");
            break;
        }

        let frame = match rx.receive() {
            Ok(frame) => {
                BusMetrics::inc(&ctx.metrics.rx_frames_total);
                frame
            },
            Err(CanError::Timeout) => {
                BusMetrics::inc(&ctx.metrics.rx_timeouts);
                continue;
            },
            Err(e) if e.is_fatal() => {
                error!("RX thread on '{}': fatal CAN error: {}", config.interface, e);
                is_running.store(false, Ordering::Release);
                break;
            },
            Err(e) => {
                BusMetrics::inc(&ctx.metrics.device_errors);
                warn!("RX thread on '{}': CAN receive error: {}", config.interface, e);
                spin_sleep::sleep(backoff);
                continue;
            },
        };

        trace!(
            "RX 0x{:03X} [{}] {:02X?}",
            frame.id,
            frame.len,
            frame.data_slice()
        );
        dispatch_frame(&ctx, &frame);
    }

    debug!("RX thread on '{}' stopped", config.interface);
}

/// 接收线程的实时调度设置（失败只告警）
fn apply_realtime_settings(config: &BusConfig) {
    #[cfg(target_os = "linux")]
    {
        if config.lock_memory {
            // SAFETY: mlockall 只影响本进程的页锁定状态
            let ret = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
            if ret != 0 {
                warn!(
                    "mlockall failed: {}. Run with CAP_IPC_LOCK or raise RLIMIT_MEMLOCK.",
                    std::io::Error::last_os_error()
                );
            }
        }
    }

    if config.rt_priority == 0 {
        return;
    }

    #[cfg(all(feature = "realtime", unix))]
    {
        use thread_priority::*;

        let priority = match ThreadPriorityValue::try_from(config.rt_priority) {
            Ok(value) => ThreadPriority::Crossplatform(value),
            Err(e) => {
                warn!("Invalid RX thread priority {}: {}", config.rt_priority, e);
                return;
            },
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            priority,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => debug!("RX thread running SCHED_FIFO priority {}", config.rt_priority),
            Err(e) => warn!(
                "Failed to set RX thread SCHED_FIFO priority {}: {:?}. \
                 On Linux this needs CAP_SYS_NICE.",
                config.rt_priority, e
            ),
        }
    }

    #[cfg(all(feature = "realtime", not(unix)))]
    {
        use thread_priority::{ThreadPriority, set_current_thread_priority};

        if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
            warn!("Failed to raise RX thread priority: {:?}", e);
        }
    }

    #[cfg(not(feature = "realtime"))]
    {
        debug!(
            "realtime feature disabled, RX thread priority {} ignored",
            config.rt_priority
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ResponseHandler, Subscription};
    use bluebot_can::mock::mock_pair;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Vec<u8>, u8)>>);

    impl ResponseHandler for Recorder {
        fn on_response(&self, payload: &[u8], sender: u8) {
            self.0.lock().push((payload.to_vec(), sender));
        }
    }

    #[test]
    fn test_dispatch_frame_updates_pdo_slot() {
        let ctx = BusContext::new();
        let key = PdoKey::new(2, 1).unwrap();
        ctx.pdo.register(key).unwrap();

        dispatch_frame(&ctx, &BlueFrame::new(0x281, &[1, 2, 3, 4]));
        assert_eq!(ctx.pdo.raw(key).unwrap(), [1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(ctx.metrics.snapshot().pdo_updates, 1);

        // 未注册的槽位被忽略
        dispatch_frame(&ctx, &BlueFrame::new(0x282, &[9]));
        assert_eq!(ctx.metrics.snapshot().pdo_updates, 1);
    }

    #[test]
    fn test_dispatch_frame_pdo_alias() {
        let ctx = BusContext::new();
        let key = PdoKey::from_cob_id(0x3FF).unwrap();
        ctx.pdo.register(key).unwrap();

        dispatch_frame(&ctx, &BlueFrame::new(0x7FF, &[0xAB, 0xCD]));
        assert_eq!(ctx.pdo.get_unsigned(key, 0, 2).unwrap(), 0xCDAB);
    }

    #[test]
    fn test_dispatch_frame_routes_responses() {
        let ctx = BusContext::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = Subscription::new(&ctx.subscribers, 2, recorder.clone());

        dispatch_frame(&ctx, &BlueFrame::new(0x582, &[0x60, 0x41, 0x23, 0]));
        dispatch_frame(&ctx, &BlueFrame::new(0x602, &[0x22]));

        assert_eq!(
            recorder.0.lock().as_slice(),
            &[(vec![0x60, 0x41, 0x23, 0], 2)]
        );
        assert_eq!(ctx.metrics.snapshot().responses_dispatched, 1);
    }

    #[test]
    fn test_ack_capture() {
        let ctx = BusContext::new();
        dispatch_frame(&ctx, &BlueFrame::new(0x581, &[1]));
        assert!(ctx.last_ack.lock().is_none());

        ctx.ack_capture.store(true, Ordering::Relaxed);
        dispatch_frame(&ctx, &BlueFrame::new(0x580, &[2, 1, 3]));
        let last = (*ctx.last_ack.lock()).unwrap();
        assert_eq!(last.id, 0x580);
        assert_eq!(last.data_slice(), &[2, 1, 3]);
    }

    #[test]
    fn test_rx_loop_exits_on_stop() {
        let (rx, _tx, handle) = mock_pair(Duration::from_millis(1));
        let ctx = Arc::new(BusContext::new());
        let key = PdoKey::new(1, 0).unwrap();
        ctx.pdo.register(key).unwrap();
        let is_running = Arc::new(AtomicBool::new(true));

        let thread_ctx = ctx.clone();
        let thread_running = is_running.clone();
        let join = std::thread::spawn(move || {
            rx_loop(
                rx,
                thread_ctx,
                BusConfig::default().without_realtime(),
                thread_running,
            )
        });

        handle.inject(BlueFrame::new(0x180, &[7]));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ctx.pdo.raw(key).unwrap()[0] != 7 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ctx.pdo.raw(key).unwrap()[0], 7);

        is_running.store(false, Ordering::Release);
        join.join().unwrap();
    }

    struct FailingRx(Option<CanError>);

    impl RxAdapter for FailingRx {
        fn receive(&mut self) -> Result<BlueFrame, CanError> {
            Err(self.0.take().unwrap_or(CanError::Timeout))
        }
    }

    #[test]
    fn test_rx_loop_stops_on_fatal_error() {
        let ctx = Arc::new(BusContext::new());
        let is_running = Arc::new(AtomicBool::new(true));
        rx_loop(
            FailingRx(Some(CanError::BusOff)),
            ctx,
            BusConfig::default().without_realtime(),
            is_running.clone(),
        );
        assert!(!is_running.load(Ordering::Acquire));
    }
}
