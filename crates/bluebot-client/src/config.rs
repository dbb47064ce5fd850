//! 配置文件
//!
//! ```toml
//! requester_id = 5
//!
//! [bus]
//! interface = "can0"
//! rt_priority = 98
//!
//! [sampler]
//! period_ms = 10
//! on_invalid_frame = "skip"
//! ```
//!
//! 所有字段都有默认值，只需写出要修改的部分。

use crate::error::ConfigError;
use bluebot_driver::{BusConfig, DEFAULT_INTERFACE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 收到非编码器应答帧时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidFramePolicy {
    /// 结束整个采样会话
    #[default]
    Abort,
    /// 丢弃该帧并继续
    Skip,
}

/// 编码器采样配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// 采样专用 CAN 接口
    pub interface: String,
    /// 查询周期（毫秒）
    pub period_ms: u64,
    /// 第一次查询前的延迟（毫秒）
    pub initial_offset_ms: u64,
    /// 接收超时（毫秒）：保存线程据此检查停止信号
    pub receive_timeout_ms: u64,
    pub on_invalid_frame: InvalidFramePolicy,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            period_ms: 10,
            initial_offset_ms: 1,
            receive_timeout_ms: 20,
            on_invalid_frame: InvalidFramePolicy::Abort,
        }
    }
}

impl SamplerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn initial_offset(&self) -> Duration {
        Duration::from_millis(self.initial_offset_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// 整机配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub bus: BusConfig,
    pub sampler: SamplerConfig,
    /// 电机聚合服务命令中的请求者 ID
    pub requester_id: u8,
}

impl RobotConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 覆盖总线与采样的接口名
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        let interface = interface.into();
        self.sampler.interface = interface.clone();
        self.bus.interface = interface;
        self
    }
}
