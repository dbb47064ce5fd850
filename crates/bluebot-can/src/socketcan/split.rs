//! SocketCAN 适配器分离实现
//!
//! 基于 `CanSocket::try_clone()`（`dup()`）得到独立的 RX 和 TX 句柄，可在不同线程中并发使用。
//!
//! # ⚠️ `try_clone()` 的共享状态
//!
//! 两个句柄共享同一个"打开文件描述"：
//! - `O_NONBLOCK` 等标志共享，**严禁调用 `set_nonblocking()`**，超时只依赖 `poll` 和 `SO_SNDTIMEO`
//! - `CAN_RAW_FILTER` 共享，分离前设置的过滤器对 RX 句柄同样生效

use super::raw::{self, TimestampState};
use crate::{BlueFrame, CanError, RxAdapter, TxAdapter};
use socketcan::{CanSocket, Socket};
use std::os::unix::io::{AsFd, AsRawFd};
use std::time::Duration;
use tracing::trace;

/// TX 写超时（避免总线错误或发送队列满时无限阻塞）
const TX_WRITE_TIMEOUT: Duration = Duration::from_millis(5);

/// 只读适配器（用于接收线程）
pub struct SocketCanRxAdapter {
    socket: CanSocket,
    read_timeout: Duration,
    timestamps: TimestampState,
}

impl SocketCanRxAdapter {
    /// 从已配置的 socket 克隆 RX 句柄
    ///
    /// `timestamping_enabled` 继承自原 socket（SO_TIMESTAMPING 随 `dup()` 共享）。
    pub(crate) fn new(
        socket: &CanSocket,
        read_timeout: Duration,
        timestamping_enabled: bool,
    ) -> Result<Self, CanError> {
        let rx_socket = socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "Failed to clone SocketCAN socket for RX: {}",
                e
            )))
        })?;

        Ok(Self {
            socket: rx_socket,
            read_timeout,
            timestamps: TimestampState {
                enabled: timestamping_enabled,
                hw_available: false,
            },
        })
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 设置读超时（`poll` 等待时长）
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn hw_timestamp_available(&self) -> bool {
        self.timestamps.hw_available
    }
}

impl RxAdapter for SocketCanRxAdapter {
    fn receive(&mut self) -> Result<BlueFrame, CanError> {
        raw::receive_frame(self.socket.as_raw_fd(), self.read_timeout, &mut self.timestamps)
    }
}

impl Drop for SocketCanRxAdapter {
    fn drop(&mut self) {
        trace!(
            "SocketCanRxAdapter dropped (FD: {})",
            self.socket.as_raw_fd()
        );
    }
}

/// 只写适配器（用于调用方线程的同步发送）
pub struct SocketCanTxAdapter {
    socket: CanSocket,
}

impl SocketCanTxAdapter {
    pub(crate) fn new(socket: &CanSocket) -> Result<Self, CanError> {
        let tx_socket = socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "Failed to clone SocketCAN socket for TX: {}",
                e
            )))
        })?;

        tx_socket.set_write_timeout(TX_WRITE_TIMEOUT).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "Failed to set write timeout on TX socket: {}",
                e
            )))
        })?;

        trace!("SocketCanTxAdapter created with {:?} write timeout", TX_WRITE_TIMEOUT);
        Ok(Self { socket: tx_socket })
    }
}

impl TxAdapter for SocketCanTxAdapter {
    fn send(&mut self, frame: BlueFrame) -> Result<(), CanError> {
        raw::write_frame(self.socket.as_raw_fd(), &frame)
    }
}

impl Drop for SocketCanTxAdapter {
    fn drop(&mut self) {
        trace!(
            "SocketCanTxAdapter dropped (FD: {})",
            self.socket.as_raw_fd()
        );
    }
}
