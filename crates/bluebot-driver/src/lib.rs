//! # BlueBot Driver
//!
//! 总线共享层：一个 CAN 接口只打开一次，由一个接收线程把入站帧分发给
//! PDO 寄存器表、已订阅的协议引擎以及帧钩子。
//!
//! - [`BusHub`] / [`Bus`]：按接口名共享的总线，引用计数，最后一个句柄释放时停止接收线程
//! - [`PdoStore`]：`(channel, device)` 寻址的 8 字节寄存器槽位
//! - [`SubscriberRegistry`]：按服务 ID 的响应分发
//! - [`PeriodicTask`]：绝对时间周期调度
//! - [`Mailbox`]：单槽“最新值覆盖”交接
//! - [`CancellationToken`]：协作式取消

mod bus;
pub mod cancel;
mod config;
pub mod dispatch;
mod error;
pub mod hooks;
pub mod mailbox;
pub mod metrics;
pub mod pdo;
pub mod pipeline;
pub mod scheduler;

pub use bus::{AdapterOpener, Bus, BusHub};
pub use cancel::CancellationToken;
pub use config::{BusConfig, DEFAULT_INTERFACE};
pub use dispatch::{ResponseHandler, SubscriberRegistry, Subscription};
pub use error::{DriverError, PdoError};
pub use hooks::{FrameCallback, HookManager};
pub use mailbox::Mailbox;
pub use metrics::{BusMetrics, BusStats};
pub use pdo::{PDO_SLOT_LEN, PdoStore};
pub use pipeline::{BusContext, dispatch_frame, rx_loop};
pub use scheduler::{Clock, MonotonicClock, PeriodicTask};

pub use bluebot_protocol::{BlueFrame, PdoKey};
