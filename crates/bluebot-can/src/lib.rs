//! # BlueBot CAN Adapter Layer
//!
//! CAN 硬件抽象层，提供统一的 CAN 接口抽象。
//!
//! - Linux: `SocketCanAdapter`（支持 ID 过滤、硬件/软件时间戳、RX/TX 分离）
//! - 测试: `mock` 模块（队列驱动的接收端 + 记录型发送端）

use std::time::Duration;
use thiserror::Error;

// 重新导出 bluebot-protocol 中的 BlueFrame
pub use bluebot_protocol::BlueFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanAdapter, SocketCanRxAdapter, SocketCanTxAdapter};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
    /// 写入字节数不足一个完整帧（帧视为丢失，调用方可重试）
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

impl CanError {
    /// 是否为致命错误（接收循环应退出）
    pub fn is_fatal(&self) -> bool {
        match self {
            CanError::Device(e) => e.is_fatal(),
            CanError::BusOff | CanError::NotStarted => true,
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NoDevice
                | CanDeviceErrorKind::AccessDenied
                | CanDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// 完整（未分离）的 CAN 适配器
pub trait CanAdapter {
    fn send(&mut self, frame: BlueFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<BlueFrame, CanError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn receive_timeout(&mut self, timeout: Duration) -> Result<BlueFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }
    fn try_receive(&mut self) -> Result<Option<BlueFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 只读适配器
///
/// `receive` 在适配器配置的读超时内没有帧时返回 `CanError::Timeout`。
pub trait RxAdapter {
    fn receive(&mut self) -> Result<BlueFrame, CanError>;
}

/// 只写适配器
pub trait TxAdapter {
    fn send(&mut self, frame: BlueFrame) -> Result<(), CanError>;
}

/// 可分离为独立 RX/TX 的适配器
pub trait SplittableAdapter: CanAdapter {
    type RxAdapter: RxAdapter;
    type TxAdapter: TxAdapter;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError>;
}

impl<T: RxAdapter + ?Sized> RxAdapter for Box<T> {
    fn receive(&mut self) -> Result<BlueFrame, CanError> {
        (**self).receive()
    }
}

impl<T: TxAdapter + ?Sized> TxAdapter for Box<T> {
    fn send(&mut self, frame: BlueFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }
}
