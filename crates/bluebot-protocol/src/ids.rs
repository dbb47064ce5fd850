//! CAN ID 常量定义和地址计算
//!
//! 总线上的每个服务（参与者）有一个逻辑 ID：
//! - 向服务发送命令：`0x600 + id`
//! - 服务发出的响应/应答：`0x580 + id`
//!
//! PDO 广播区域为 `0x180..=0x3FF`，`0x7FF` 视为 `0x3FF` 的别名。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 命令地址基址（发往服务）
pub const COMMAND_BASE_ID: u16 = 0x600;

/// 响应地址基址（来自服务）
pub const RESPONSE_BASE_ID: u16 = 0x580;

/// 响应地址范围上限（服务 ID 最多 7 位）
pub const RESPONSE_END_ID: u16 = 0x5FF;

/// CANopen SYNC 广播帧
pub const ID_SYNC: u16 = 0x080;

/// PDO 区域
pub const PDO_BASE_ID: u16 = 0x180;
pub const PDO_END_ID: u16 = 0x3FF;

/// 被映射到 `PDO_END_ID` 的别名 ID
pub const PDO_ALIAS_ID: u16 = 0x7FF;

/// PDO 通道范围（TX PDO1..PDO3）
pub const PDO_CHANNEL_MIN: u8 = 1;
pub const PDO_CHANNEL_MAX: u8 = 3;

/// PDO 设备号上限（不含）
pub const PDO_DEVICE_COUNT: u8 = 128;

/// 总线上的服务 ID
///
/// 两个电机驱动器的 ID 由驱动器固件决定，不能仅通过修改这里改变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ServiceId {
    /// 电机聚合服务（同时控制左右电机的使能状态）
    Motors = 0x00,
    MotorLeft = 0x01,
    MotorRight = 0x02,
    HighController = 0x03,
    RemoteCamera = 0x04,
    SonarSensors = 0x06,
}

impl ServiceId {
    /// 从原始 ID 解析
    pub fn from_raw(raw: u8) -> Result<Self, ProtocolError> {
        Self::try_from(raw).map_err(|_| ProtocolError::UnknownService(raw))
    }

    /// 原始 ID
    pub fn raw(self) -> u8 {
        self.into()
    }

    /// 命令地址（`0x600 + id`）
    pub fn command_address(self) -> u16 {
        command_address(self.raw())
    }

    /// 响应地址（`0x580 + id`）
    pub fn response_address(self) -> u16 {
        response_address(self.raw())
    }
}

/// 命令地址（`0x600 + id`）
pub const fn command_address(service: u8) -> u16 {
    COMMAND_BASE_ID + service as u16
}

/// 响应地址（`0x580 + id`）
pub const fn response_address(service: u8) -> u16 {
    RESPONSE_BASE_ID + service as u16
}

/// 从帧 ID 反推发送方服务 ID
///
/// 仅 `0x580..=0x5FF` 范围内的 ID 被视为服务响应。
pub fn response_sender(id: u16) -> Option<u8> {
    if (RESPONSE_BASE_ID..=RESPONSE_END_ID).contains(&id) {
        Some((id - RESPONSE_BASE_ID) as u8)
    } else {
        None
    }
}

/// 将 `0x7FF` 别名规范化为 `0x3FF`
pub fn normalize_pdo_id(id: u16) -> u16 {
    if id == PDO_ALIAS_ID { PDO_END_ID } else { id }
}

/// PDO 寄存器槽位键 `(channel, device)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PdoKey {
    channel: u8,
    device: u8,
}

impl PdoKey {
    /// 创建并校验键：`channel ∈ 1..=3`，`device ∈ 0..=127`
    pub fn new(channel: u8, device: u8) -> Result<Self, ProtocolError> {
        if !(PDO_CHANNEL_MIN..=PDO_CHANNEL_MAX).contains(&channel) || device >= PDO_DEVICE_COUNT {
            return Err(ProtocolError::InvalidPdoKey { channel, device });
        }
        Ok(Self { channel, device })
    }

    /// 从帧 ID 解析 PDO 键
    ///
    /// - `0x7FF` 先规范化为 `0x3FF`
    /// - `channel = (id >> 8) & 0xF`
    /// - `device = (id & 0xFF) - 0x80`
    ///
    /// 不在 PDO 区域内、或计算出的键无效时返回 `None`。
    pub fn from_cob_id(id: u16) -> Option<Self> {
        let id = normalize_pdo_id(id);
        if !(PDO_BASE_ID..=PDO_END_ID).contains(&id) {
            return None;
        }

        let channel = ((id >> 8) & 0x0F) as u8;
        let device = i32::from(id & 0xFF) - 0x80;
        let device = u8::try_from(device).ok()?;
        Self::new(channel, device).ok()
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn device(&self) -> u8 {
        self.device
    }
}
