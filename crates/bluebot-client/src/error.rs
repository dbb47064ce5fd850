//! 客户端错误类型

use bluebot_can::CanError;
use bluebot_driver::DriverError;
use bluebot_protocol::{ProtocolError, RequestKind};
use std::path::PathBuf;
use thiserror::Error;

/// 客户端错误
#[derive(Error, Debug)]
pub enum ClientError {
    /// 已有未确认的跟踪请求，新的跟踪命令被拒绝且没有发送
    #[error("Busy: a {pending:?} request is still pending")]
    Busy { pending: RequestKind },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("CAN error: {0}")]
    Can(#[from] CanError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 等待超时（请求仍然保持原状态）
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// 配置文件错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}
