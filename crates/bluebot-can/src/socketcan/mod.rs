//! SocketCAN CAN 适配器实现
//!
//! 基于 Linux SocketCAN 子系统。
//!
//! ## 特性
//!
//! - 只收发标准帧（11-bit ID），扩展帧和远程帧在接收时被忽略
//! - 硬件时间戳优先，不可用时降级为软件时间戳
//! - 可选的 ID 精确过滤（`CAN_RAW_FILTER`）
//! - 发送检测短写入（`CanError::ShortWrite`）
//!
//! ## 限制
//!
//! - 波特率等配置由系统工具（`ip link`）完成，不在应用层设置
//! - 接口必须已存在且处于 UP 状态

use crate::{BlueFrame, CanAdapter, CanError, SplittableAdapter};
use socketcan::{CanFilter, CanSocket, Socket, SocketOptions};
use std::mem;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{trace, warn};

mod interface_check;
mod raw;
pub mod split;

pub use interface_check::check_interface_status;
pub use split::{SocketCanRxAdapter, SocketCanTxAdapter};

use raw::TimestampState;

/// 默认读超时（接收线程据此检查退出信号）
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// SocketCAN 适配器
///
/// ```no_run
/// use bluebot_can::{BlueFrame, CanAdapter, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap().with_filters(&[0x581, 0x582]).unwrap();
/// adapter.send(BlueFrame::new(0x601, &[0x42, 0x40, 0x22, 0, 0, 0, 0, 0])).unwrap();
/// let reply = adapter.receive().unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: CanSocket,
    /// 接口名称（如 "can0"）
    interface: String,
    /// 读超时（poll 等待时长）
    read_timeout: Duration,
    timestamps: TimestampState,
    /// 当前生效的 ID 过滤器（空表示接收全部）
    filters: Vec<u16>,
}

impl SocketCanAdapter {
    /// 打开 SocketCAN 接口
    ///
    /// 打开前检查接口是否存在且已 UP；接口不存在或未启动时返回 `CanError::Device`，
    /// 错误信息中包含修复命令。
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        if !check_interface_status(&interface)? {
            return Err(CanError::Device(
                format!(
                    "CAN interface '{}' exists but is not UP. Please start it first:\n  sudo ip link set up {}",
                    interface, interface
                )
                .into(),
            ));
        }

        let socket = CanSocket::open(&interface).map_err(|e| {
            CanError::Device(format!("Failed to open CAN interface '{}': {}", interface, e).into())
        })?;

        // 保持内核默认：CAN_RAW_LOOPBACK 开启（同机其他 socket 可见），
        // CAN_RAW_RECV_OWN_MSGS 关闭（本 socket 不会收到自己发送的帧）

        // SO_TIMESTAMPING：优先硬件时间戳，失败不阻塞初始化
        let flags = libc::SOF_TIMESTAMPING_RX_HARDWARE
            | libc::SOF_TIMESTAMPING_RAW_HARDWARE
            | libc::SOF_TIMESTAMPING_RX_SOFTWARE
            | libc::SOF_TIMESTAMPING_SOFTWARE;
        let timestamping_enabled = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_TIMESTAMPING,
                &flags as *const _ as *const libc::c_void,
                mem::size_of::<u32>() as libc::socklen_t,
            ) >= 0
        };
        if !timestamping_enabled {
            warn!(
                "Failed to enable SO_TIMESTAMPING on '{}': {}",
                interface,
                std::io::Error::last_os_error()
            );
        }

        trace!(
            "SocketCAN interface '{}' opened (timestamping: {})",
            interface, timestamping_enabled
        );

        Ok(Self {
            socket,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
            timestamps: TimestampState {
                enabled: timestamping_enabled,
                hw_available: false,
            },
            filters: Vec::new(),
        })
    }

    /// 只接收指定 ID 的标准帧（精确匹配）
    pub fn set_filters(&mut self, ids: &[u16]) -> Result<(), CanError> {
        let filters: Vec<CanFilter> =
            ids.iter().map(|&id| CanFilter::new(u32::from(id), 0x7FF)).collect();

        self.socket.set_filters(&filters).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "Failed to set CAN filters on '{}': {}",
                self.interface, e
            )))
        })?;

        trace!(
            "SocketCAN filters configured on '{}': {:03X?}",
            self.interface, ids
        );
        self.filters = ids.to_vec();
        Ok(())
    }

    /// builder 风格的 [`SocketCanAdapter::set_filters`]
    pub fn with_filters(mut self, ids: &[u16]) -> Result<Self, CanError> {
        self.set_filters(ids)?;
        Ok(self)
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn filters(&self) -> &[u16] {
        &self.filters
    }

    pub fn timestamping_enabled(&self) -> bool {
        self.timestamps.enabled
    }

    pub fn hw_timestamp_available(&self) -> bool {
        self.timestamps.hw_available
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        trace!("SocketCAN interface '{}' closed", self.interface);
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: BlueFrame) -> Result<(), CanError> {
        raw::write_frame(self.socket.as_raw_fd(), &frame)
    }

    fn receive(&mut self) -> Result<BlueFrame, CanError> {
        raw::receive_frame(self.socket.as_raw_fd(), self.read_timeout, &mut self.timestamps)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.set_read_timeout(timeout);
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<BlueFrame, CanError> {
        raw::receive_frame(self.socket.as_raw_fd(), timeout, &mut self.timestamps)
    }
}

impl SplittableAdapter for SocketCanAdapter {
    type RxAdapter = SocketCanRxAdapter;
    type TxAdapter = SocketCanTxAdapter;

    /// 分离为独立的 RX 和 TX 适配器
    ///
    /// 过滤器、回环和时间戳设置随 `dup()` 共享给两个句柄；原 socket 在分离后关闭。
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        let rx_adapter =
            SocketCanRxAdapter::new(&self.socket, self.read_timeout, self.timestamps.enabled)?;
        let tx_adapter = SocketCanTxAdapter::new(&self.socket)?;

        trace!(
            "SocketCanAdapter split into RX and TX adapters (interface: {})",
            self.interface
        );
        Ok((rx_adapter, tx_adapter))
    }
}
