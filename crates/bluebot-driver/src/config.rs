//! 总线配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认 CAN 接口
pub const DEFAULT_INTERFACE: &str = "can0";

/// 总线（接收线程）配置
///
/// 所有字段都有默认值，配置文件中可只写需要修改的部分。
///
/// ```
/// use bluebot_driver::BusConfig;
///
/// let config = BusConfig::default();
/// assert_eq!(config.interface, "can0");
/// assert_eq!(config.rt_priority, 98);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// CAN 接口名称
    pub interface: String,
    /// 接收超时（毫秒）：接收线程据此检查退出信号
    pub receive_timeout_ms: u64,
    /// 接收线程 SCHED_FIFO 优先级（0 表示不提升）
    pub rt_priority: u8,
    /// 是否锁定进程内存（mlockall）
    pub lock_memory: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            receive_timeout_ms: 2,
            rt_priority: 98,
            lock_memory: true,
        }
    }
}

impl BusConfig {
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// 关闭实时优先级和内存锁定（测试、无特权运行）
    pub fn without_realtime(mut self) -> Self {
        self.rt_priority = 0;
        self.lock_memory = false;
        self
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}
