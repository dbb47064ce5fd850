//! # BlueBot Protocol
//!
//! BlueBot 轮式机器人 CAN 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 服务地址、命令/响应地址、PDO 地址解析
//! - `motor`: 电机驱动器命令帧构建、响应帧解析、物理单位换算
//! - `camera`: 远程相机命令帧与参数广播帧
//!
//! ## 字节序
//!
//! 与 CANopen 一致，多字节字段使用 Intel (LSB) 低位在前（小端字节序）。

pub mod camera;
pub mod ids;
pub mod motor;

pub use camera::*;
pub use ids::*;
pub use motor::*;

use thiserror::Error;

/// 标准帧 ID 的最大值（11-bit）
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// CAN 2.0 标准帧
///
/// 协议层与硬件层之间的中间抽象：协议层只构建/解析 `BlueFrame`，
/// 由 CAN 层负责与 SocketCAN 帧互相转换。
///
/// - **Copy**：固定 8 字节，无堆分配
/// - **仅标准帧**：ID 只有 11 位有效
/// - **时间戳**：`timestamp_us` 由接收端填充，0 表示不可用
///
/// ```rust
/// use bluebot_protocol::BlueFrame;
///
/// let frame = BlueFrame::new(0x601, &[0x42, 0x69, 0x60, 0x00]);
/// assert_eq!(frame.id(), 0x601);
/// assert_eq!(frame.data_slice(), &[0x42, 0x69, 0x60, 0x00]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlueFrame {
    /// CAN ID（11-bit）
    pub id: u16,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 接收时间戳（微秒，Unix 纪元），0 表示不可用
    pub timestamp_us: u64,
}

impl BlueFrame {
    /// 创建标准帧
    ///
    /// 超过 8 字节的数据会被截断，ID 只保留低 11 位。
    /// 需要显式校验时使用 [`BlueFrame::try_new`]。
    pub fn new(id: u16, data: &[u8]) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id: id & MAX_STANDARD_ID,
            data: fixed_data,
            len: len as u8,
            timestamp_us: 0,
        }
    }

    /// 创建标准帧（校验 ID 与长度）
    pub fn try_new(id: u16, data: &[u8]) -> Result<Self, ProtocolError> {
        if id > MAX_STANDARD_ID {
            return Err(ProtocolError::InvalidCanId { id: id as u32 });
        }
        if data.len() > 8 {
            return Err(ProtocolError::InvalidLength {
                expected: 8,
                actual: data.len(),
            });
        }
        Ok(Self::new(id, data))
    }

    /// 附带接收时间戳
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// 获取数据切片（只包含有效数据）
    ///
    /// 字段是公开的，直接构造的帧 `len` 可能超过 8，此时按 8 字节处理。
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(8)]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u16 {
        self.id
    }

    /// 获取完整数据（8字节固定数组）
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Invalid PDO key: channel {channel}, device {device}")]
    InvalidPdoKey { channel: u8, device: u8 },

    #[error("Unknown service id: 0x{0:02X}")]
    UnknownService(u8),

    /// 响应帧与当前等待的请求不匹配（非致命，状态不变）
    #[error("Protocol mismatch: {0}")]
    Mismatch(&'static str),
}

/// 小端字节序转 i32
pub fn bytes_to_i32_le(bytes: [u8; 4]) -> i32 {
    i32::from_le_bytes(bytes)
}

/// i32 转小端字节序
pub fn i32_to_bytes_le(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// 读取 24-bit 小端无符号整数
pub fn bytes_to_u24_le(bytes: [u8; 3]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new_truncates_data() {
        let frame = BlueFrame::new(0x123, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_frame_new_masks_id() {
        let frame = BlueFrame::new(0xFFFF, &[]);
        assert_eq!(frame.id(), 0x7FF);
        assert_eq!(frame.len, 0);
        assert!(frame.data_slice().is_empty());
    }

    #[test]
    fn test_frame_literal_with_oversized_len() {
        let frame = BlueFrame {
            id: 0x601,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
            len: 12,
            timestamp_us: 0,
        };
        assert_eq!(frame.data_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);

        let frame = BlueFrame { len: 3, ..frame };
        assert_eq!(frame.data_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_frame_try_new_rejects_wide_id() {
        let err = BlueFrame::try_new(0x800, &[0]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidCanId { id: 0x800 });
    }

    #[test]
    fn test_frame_try_new_rejects_long_payload() {
        let err = BlueFrame::try_new(0x100, &[0; 9]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength { actual: 9, .. }));
    }

    #[test]
    fn test_frame_with_timestamp() {
        let frame = BlueFrame::new(0x581, &[1]).with_timestamp(1_500);
        assert_eq!(frame.timestamp_us, 1_500);
    }

    #[test]
    fn test_bytes_to_i32_le_negative() {
        assert_eq!(bytes_to_i32_le([0xFF, 0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(bytes_to_i32_le([0x10, 0x00, 0x00, 0x00]), 16);
    }

    #[test]
    fn test_i32_to_bytes_le() {
        assert_eq!(i32_to_bytes_le(0x12345678), [0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_bytes_to_u24_le() {
        assert_eq!(bytes_to_u24_le([0x40, 0x01, 0x00]), 320);
        assert_eq!(bytes_to_u24_le([0xFF, 0xFF, 0xFF]), 0xFF_FFFF);
    }

    #[test]
    fn test_protocol_error_display() {
        let msg = format!("{}", ProtocolError::Mismatch("unexpected opcode"));
        assert!(msg.contains("Protocol mismatch"));
        let msg = format!("{}", ProtocolError::UnknownService(0x05));
        assert!(msg.contains("0x05"));
    }
}
