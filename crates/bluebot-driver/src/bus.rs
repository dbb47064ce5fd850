//! 共享总线
//!
//! 每个 CAN 接口只打开一次：[`BusHub`] 持有“接口名 → 总线”的注册表，
//! [`Bus`] 是引用计数句柄（克隆即增加引用），最后一个句柄释放时停止并回收接收线程、关闭 socket。
//!
//! ```ignore
//! use bluebot_driver::{BusConfig, BusHub};
//!
//! let hub = BusHub::socketcan(BusConfig::default());
//! let bus = hub.open("can0")?;
//! bus.send(0x600, &[5, 0, 3])?;
//! ```

use crate::config::BusConfig;
use crate::dispatch::{ResponseHandler, Subscription};
use crate::error::DriverError;
use crate::hooks::FrameCallback;
use crate::metrics::{BusMetrics, BusStats};
use crate::pdo::PdoStore;
use crate::pipeline::{BusContext, rx_loop};
use bluebot_can::{CanError, RxAdapter, TxAdapter};
use bluebot_protocol::{BlueFrame, ID_SYNC, PdoKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 接收线程退出等待上限
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 带超时的 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        use std::sync::mpsc;

        let (done_tx, done_rx) = mpsc::channel();
        // 看门狗线程负责真正的 join；超时后它继续存在直到目标线程结束
        thread::spawn(move || {
            let _ = done_tx.send(self.join());
        });

        match done_rx.recv_timeout(timeout) {
            Ok(result) => result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "RX thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "RX thread panicked during join",
            ))),
        }
    }
}

type SharedTx = Mutex<Box<dyn TxAdapter + Send>>;

struct BusShared {
    interface: String,
    ctx: Arc<BusContext>,
    /// 发送端（持锁写出，保证同一总线上的发送顺序）
    tx: SharedTx,
    is_running: Arc<AtomicBool>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
    config: BusConfig,
}

impl Drop for BusShared {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);

        if let Some(handle) = self.rx_thread.lock().take() {
            // 最后一个句柄在接收线程内部释放时（例如回调持有句柄）不能 join 自己
            if handle.thread().id() == thread::current().id() {
                warn!("Bus '{}' released from its own RX thread", self.interface);
                return;
            }
            if handle.join_timeout(JOIN_TIMEOUT).is_err() {
                error!(
                    "RX thread of '{}' panicked or failed to stop within {:?}",
                    self.interface, JOIN_TIMEOUT
                );
            }
        }

        info!("Bus '{}' closed", self.interface);
    }
}

/// 共享总线句柄
///
/// 克隆句柄共享同一个 socket 与接收线程。
#[derive(Clone)]
pub struct Bus {
    shared: Arc<BusShared>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("interface", &self.shared.interface)
            .field("running", &self.is_running())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl Bus {
    /// 用已分离的适配器启动总线（接收线程立即开始运行）
    pub fn from_adapters<R, T>(rx: R, tx: T, config: BusConfig) -> Result<Self, DriverError>
    where
        R: RxAdapter + Send + 'static,
        T: TxAdapter + Send + 'static,
    {
        let ctx = Arc::new(BusContext::new());
        let is_running = Arc::new(AtomicBool::new(true));

        let thread_ctx = ctx.clone();
        let thread_running = is_running.clone();
        let thread_config = config.clone();
        let rx_thread = thread::Builder::new()
            .name(format!("bluebot-rx-{}", config.interface))
            .spawn(move || rx_loop(rx, thread_ctx, thread_config, thread_running))
            .map_err(DriverError::Spawn)?;

        info!("Bus '{}' opened", config.interface);

        Ok(Self {
            shared: Arc::new(BusShared {
                interface: config.interface.clone(),
                ctx,
                tx: Mutex::new(Box::new(tx)),
                is_running,
                rx_thread: Mutex::new(Some(rx_thread)),
                config,
            }),
        })
    }

    pub fn interface(&self) -> &str {
        &self.shared.interface
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// 接收线程是否仍在运行（致命接收错误后为 `false`）
    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::Acquire)
    }

    /// 同步发送一帧
    pub fn send(&self, id: u16, payload: &[u8]) -> Result<(), DriverError> {
        let frame = BlueFrame::try_new(id, payload)?;
        self.send_frame(frame)
    }

    /// 同步发送一帧
    ///
    /// 写入不完整时返回 `CanError::ShortWrite`，该帧视为丢失，由调用方决定是否重发。
    pub fn send_frame(&self, frame: BlueFrame) -> Result<(), DriverError> {
        if !self.is_running() {
            return Err(DriverError::Closed);
        }

        let ctx = &self.shared.ctx;
        let result = self.shared.tx.lock().send(frame);
        match result {
            Ok(()) => {
                BusMetrics::inc(&ctx.metrics.tx_frames_total);
                trace!(
                    "TX 0x{:03X} [{}] {:02X?}",
                    frame.id,
                    frame.len,
                    frame.data_slice()
                );
                ctx.hooks.read().trigger_all_sent(&frame);
                Ok(())
            },
            Err(e) => {
                BusMetrics::inc(&ctx.metrics.tx_errors);
                match &e {
                    CanError::ShortWrite { written, expected } => warn!(
                        "Short write on '{}' for 0x{:03X}: {}/{} bytes, frame lost",
                        self.shared.interface, frame.id, written, expected
                    ),
                    other => debug!(
                        "Send on '{}' failed for 0x{:03X}: {}",
                        self.shared.interface, frame.id, other
                    ),
                }
                Err(e.into())
            },
        }
    }

    /// 广播 CANopen SYNC 帧（`0x080`，长度 0）
    pub fn send_sync(&self) -> Result<(), DriverError> {
        self.send_frame(BlueFrame::new(ID_SYNC, &[]))
    }

    /// 订阅某服务的响应帧（`0x580 + service`）
    pub fn subscribe(&self, service: u8, handler: Arc<dyn ResponseHandler>) -> Subscription {
        Subscription::new(&self.shared.ctx.subscribers, service, handler)
    }

    pub fn add_hook(&self, hook: Arc<dyn FrameCallback>) {
        self.shared.ctx.hooks.write().add_callback(hook);
    }

    pub fn remove_hook(&self, hook: &Arc<dyn FrameCallback>) -> bool {
        self.shared.ctx.hooks.write().remove_callback(hook)
    }

    pub fn hook_count(&self) -> usize {
        self.shared.ctx.hooks.read().len()
    }

    /// PDO 寄存器表
    pub fn pdo(&self) -> &PdoStore {
        &self.shared.ctx.pdo
    }

    /// 注册 PDO 槽位
    pub fn register_pdo(&self, channel: u8, device: u8) -> Result<PdoKey, DriverError> {
        let key = PdoKey::new(channel, device)?;
        self.shared.ctx.pdo.register(key)?;
        debug!(
            "Registered PDO slot (channel {}, device {}) on '{}'",
            channel, device, self.shared.interface
        );
        Ok(key)
    }

    /// 开关应答捕获；关闭时清空已捕获的帧
    pub fn set_ack_capture(&self, enabled: bool) {
        let ctx = &self.shared.ctx;
        ctx.ack_capture.store(enabled, Ordering::Relaxed);
        if !enabled {
            *ctx.last_ack.lock() = None;
        }
    }

    /// 应答捕获开启后收到的最近一帧
    pub fn last_ack(&self) -> Option<BlueFrame> {
        *self.shared.ctx.last_ack.lock()
    }

    pub fn stats(&self) -> BusStats {
        self.shared.ctx.metrics.snapshot()
    }

    /// 当前共享该总线的句柄数量
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// 释放句柄；返回是否是最后一个句柄（此时接收线程已停止）
    pub fn close(self) -> bool {
        match Arc::try_unwrap(self.shared) {
            Ok(shared) => {
                drop(shared);
                true
            },
            Err(_) => false,
        }
    }
}

/// 适配器打开函数：按接口名返回一对已分离的收发适配器
pub type AdapterOpener = Box<
    dyn Fn(&str, &BusConfig) -> Result<(Box<dyn RxAdapter + Send>, Box<dyn TxAdapter + Send>), CanError>
        + Send
        + Sync,
>;

/// 总线注册表
///
/// 进程内构造一次，传给所有需要访问总线的组件。
/// 同一接口的重复 `open` 返回同一个总线；所有句柄释放后再次 `open` 会重新打开。
pub struct BusHub {
    config: BusConfig,
    opener: AdapterOpener,
    buses: Mutex<HashMap<String, Weak<BusShared>>>,
}

impl std::fmt::Debug for BusHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHub")
            .field("config", &self.config)
            .field("open", &self.open_count())
            .finish()
    }
}

impl BusHub {
    /// `config` 作为所有总线的模板（接口名由 `open` 覆盖）
    pub fn new<F>(config: BusConfig, opener: F) -> Self
    where
        F: Fn(&str, &BusConfig) -> Result<(Box<dyn RxAdapter + Send>, Box<dyn TxAdapter + Send>), CanError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            config,
            opener: Box::new(opener),
            buses: Mutex::new(HashMap::new()),
        }
    }

    /// SocketCAN 注册表
    #[cfg(target_os = "linux")]
    pub fn socketcan(config: BusConfig) -> Self {
        use bluebot_can::{SocketCanAdapter, SplittableAdapter};

        Self::new(config, |interface, config| {
            let mut adapter = SocketCanAdapter::new(interface)?;
            adapter.set_read_timeout(config.receive_timeout());
            let (rx, tx) = adapter.split()?;
            Ok((
                Box::new(rx) as Box<dyn RxAdapter + Send>,
                Box::new(tx) as Box<dyn TxAdapter + Send>,
            ))
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// 打开（或复用）某个接口的总线
    pub fn open(&self, interface: &str) -> Result<Bus, DriverError> {
        let mut buses = self.buses.lock();

        if let Some(shared) = buses.get(interface).and_then(Weak::upgrade) {
            if shared.is_running.load(Ordering::Acquire) {
                debug!("Reusing bus '{}'", interface);
                return Ok(Bus { shared });
            }
            warn!("Bus '{}' RX thread stopped, reopening", interface);
        }

        let config = self.config.clone().with_interface(interface);
        let (rx, tx) = (self.opener)(interface, &config).map_err(|source| {
            error!("Failed to bind '{}': {}", interface, source);
            DriverError::Bind {
                interface: interface.to_string(),
                source,
            }
        })?;

        let bus = Bus::from_adapters(rx, tx, config)?;
        buses.retain(|_, weak| weak.strong_count() > 0);
        buses.insert(interface.to_string(), Arc::downgrade(&bus.shared));
        Ok(bus)
    }

    /// 打开配置中的默认接口
    pub fn open_default(&self) -> Result<Bus, DriverError> {
        let interface = self.config.interface.clone();
        self.open(&interface)
    }

    /// 当前仍有句柄存活的总线数量
    pub fn open_count(&self) -> usize {
        self.buses
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
