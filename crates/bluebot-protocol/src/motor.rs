//! 电机协议
//!
//! 电机驱动器使用 CANopen SDO 风格的 8 字节帧（命令字 + 对象字典索引 + 子索引 + 4 字节数据），
//! 电机聚合服务使用 2~3 字节的私有帧（请求者 ID + 读写标志 + 状态）。
//!
//! 所有多字节字段为小端字节序。

use crate::ids::ServiceId;
use crate::{BlueFrame, ProtocolError, bytes_to_i32_le, i32_to_bytes_le};

/// 编码器每转计数
pub const COUNTS_PER_REV: i32 = 64_000;

/// 车轮常数（米/转）
pub const WHEEL_CONST: f64 = 0.298;

/// 驱动器速度单位为 0.1 counts/s
pub const VELOCITY_UNITS_PER_COUNT: i32 = 10;

// SDO 命令字
pub const SDO_DOWNLOAD_4: u8 = 0x22;
pub const SDO_DOWNLOAD_ACK: u8 = 0x60;
pub const SDO_UPLOAD_REQUEST: u8 = 0x42;
pub const SDO_UPLOAD_REPLY_4: u8 = 0x43;

// 对象字典索引
pub const OD_VELOCITY_COMMAND: u16 = 0x2341;
pub const OD_VELOCITY_ACTUAL: u16 = 0x6069;
pub const OD_ENCODER_POSITION: u16 = 0x2240;

/// 聚合服务读写标志
pub const AGGREGATE_WRITE: u8 = 0x00;
pub const AGGREGATE_READ: u8 = 0x01;

/// 聚合服务状态字节
pub const STATUS_NONE_ENABLED: u8 = 0x00;
pub const STATUS_RIGHT_ENABLED: u8 = 0x01;
pub const STATUS_LEFT_ENABLED: u8 = 0x02;
pub const STATUS_BOTH_ENABLED: u8 = 0x03;

/// 周期采样使用的编码器读取请求
pub const ENCODER_READ_REQUEST: [u8; 8] = sdo_header(SDO_UPLOAD_REQUEST, OD_ENCODER_POSITION);

const fn sdo_header(command: u8, index: u16) -> [u8; 8] {
    [
        command,
        (index & 0xFF) as u8,
        (index >> 8) as u8,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
    ]
}

/// 左/右电机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorSide {
    Left,
    Right,
}

impl MotorSide {
    /// 对应的驱动器服务
    pub fn service(self) -> ServiceId {
        match self {
            MotorSide::Left => ServiceId::MotorLeft,
            MotorSide::Right => ServiceId::MotorRight,
        }
    }

    /// 从驱动器服务 ID 反推
    pub fn from_service(service: u8) -> Option<Self> {
        match ServiceId::from_raw(service).ok()? {
            ServiceId::MotorLeft => Some(MotorSide::Left),
            ServiceId::MotorRight => Some(MotorSide::Right),
            _ => None,
        }
    }
}

/// 请求类型（决定如何解释响应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Status,
    SetSpeed,
    GetSpeed,
}

/// 电机命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    /// 设置单侧速度（m/s）
    SetSpeed { side: MotorSide, mps: f32 },
    /// 读取单侧实际速度
    GetSpeed { side: MotorSide },
    /// 使能两侧电机
    Enable { requester: u8 },
    /// 关闭两侧电机
    Disable { requester: u8 },
    /// 查询使能状态
    QueryStatus { requester: u8 },
}

impl MotorCommand {
    /// 请求类型
    pub fn kind(&self) -> RequestKind {
        match self {
            MotorCommand::SetSpeed { .. } => RequestKind::SetSpeed,
            MotorCommand::GetSpeed { .. } => RequestKind::GetSpeed,
            MotorCommand::Enable { .. }
            | MotorCommand::Disable { .. }
            | MotorCommand::QueryStatus { .. } => RequestKind::Status,
        }
    }

    /// 目标服务
    pub fn target(&self) -> ServiceId {
        match self {
            MotorCommand::SetSpeed { side, .. } | MotorCommand::GetSpeed { side } => side.service(),
            _ => ServiceId::Motors,
        }
    }

    /// 请求者 ID（驱动器响应不携带请求者，固定为 0）
    pub fn requester(&self) -> u8 {
        match self {
            MotorCommand::Enable { requester }
            | MotorCommand::Disable { requester }
            | MotorCommand::QueryStatus { requester } => *requester,
            _ => 0,
        }
    }

    /// 构建命令帧（发往 `0x600 + target`）
    pub fn to_frame(&self) -> BlueFrame {
        let id = self.target().command_address();
        match *self {
            MotorCommand::SetSpeed { mps, .. } => {
                let target = mps_to_encoder(mps);
                let mut data = sdo_header(SDO_DOWNLOAD_4, OD_VELOCITY_COMMAND);
                data[4..8].copy_from_slice(&i32_to_bytes_le(target));
                BlueFrame::new(id, &data)
            },
            MotorCommand::GetSpeed { .. } => {
                BlueFrame::new(id, &sdo_header(SDO_UPLOAD_REQUEST, OD_VELOCITY_ACTUAL))
            },
            MotorCommand::Enable { requester } => {
                BlueFrame::new(id, &[requester, AGGREGATE_WRITE, STATUS_BOTH_ENABLED])
            },
            MotorCommand::Disable { requester } => {
                BlueFrame::new(id, &[requester, AGGREGATE_WRITE, STATUS_NONE_ENABLED])
            },
            MotorCommand::QueryStatus { requester } => {
                BlueFrame::new(id, &[requester, AGGREGATE_READ])
            },
        }
    }
}

/// 两侧电机使能状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorStatus {
    pub left: bool,
    pub right: bool,
}

impl MotorStatus {
    /// 解码状态字节：3=两侧，2=仅左，1=仅右
    pub fn from_byte(value: u8) -> Self {
        Self {
            left: value == STATUS_BOTH_ENABLED || value == STATUS_LEFT_ENABLED,
            right: value == STATUS_BOTH_ENABLED || value == STATUS_RIGHT_ENABLED,
        }
    }
}

/// 聚合服务响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateReply {
    /// 读取成功（请求者匹配且标志为读）
    Status(MotorStatus),
    /// 写入被拒绝，请求仍未确认
    WriteRejected,
}

/// 解析电机聚合服务响应（长度必须为 3）
pub fn parse_aggregate_reply(data: &[u8], requester: u8) -> Result<AggregateReply, ProtocolError> {
    if data.len() != 3 {
        return Err(ProtocolError::InvalidLength {
            expected: 3,
            actual: data.len(),
        });
    }

    if data[0] == requester && data[1] == AGGREGATE_READ {
        Ok(AggregateReply::Status(MotorStatus::from_byte(data[2])))
    } else if data[1] == AGGREGATE_WRITE {
        Ok(AggregateReply::WriteRejected)
    } else {
        Err(ProtocolError::Mismatch("aggregate reply for another requester"))
    }
}

fn check_sdo_reply(data: &[u8], command: u8, index: u16) -> Result<(), ProtocolError> {
    if data.len() != 8 {
        return Err(ProtocolError::InvalidLength {
            expected: 8,
            actual: data.len(),
        });
    }
    if data[..4] != sdo_header(command, index)[..4] {
        return Err(ProtocolError::Mismatch("unexpected SDO header"));
    }
    Ok(())
}

/// 校验设置速度应答 `[0x60, 0x41, 0x23, 0x00, ..]`
pub fn parse_set_speed_ack(data: &[u8]) -> Result<(), ProtocolError> {
    check_sdo_reply(data, SDO_DOWNLOAD_ACK, OD_VELOCITY_COMMAND)
}

/// 解析读取速度应答 `[0x43, 0x69, 0x60, 0x00, v0..v3]`，返回编码器计数
pub fn parse_get_speed_reply(data: &[u8]) -> Result<i32, ProtocolError> {
    check_sdo_reply(data, SDO_UPLOAD_REPLY_4, OD_VELOCITY_ACTUAL)?;
    Ok(bytes_to_i32_le([data[4], data[5], data[6], data[7]]))
}

/// 解析编码器读取应答（索引字节为 `0x40, 0x22`）
///
/// 只校验索引字节，不校验命令字和长度。
pub fn parse_encoder_read_reply(data: &[u8; 8]) -> Result<i32, ProtocolError> {
    let index = OD_ENCODER_POSITION.to_le_bytes();
    if data[1] != index[0] || data[2] != index[1] {
        return Err(ProtocolError::Mismatch("not an encoder read reply"));
    }
    Ok(bytes_to_i32_le([data[4], data[5], data[6], data[7]]))
}

// ============================================================================
// 单位换算
// ============================================================================
//
// 与驱动器固件的换算保持逐位一致：中间结果按固件的 float/double 混合精度计算。

/// m/s → rpm
pub fn mps_to_rpm(mps: f32) -> f32 {
    (f64::from(mps * 60.0) / WHEEL_CONST) as f32
}

/// rpm → 驱动器速度单位（0.1 counts/s），向零截断
pub fn rpm_to_encoder(rpm: f32) -> i32 {
    let encoder = ((f64::from(rpm) / 60.0)
        * f64::from(COUNTS_PER_REV)
        * f64::from(VELOCITY_UNITS_PER_COUNT)) as f32;
    encoder as i32
}

/// m/s → 驱动器速度单位
pub fn mps_to_encoder(mps: f32) -> i32 {
    rpm_to_encoder(mps_to_rpm(mps))
}

/// 驱动器速度单位 → rpm
pub fn encoder_to_rpm(encoder: i32) -> f32 {
    (encoder as f32 / (COUNTS_PER_REV * VELOCITY_UNITS_PER_COUNT) as f32) * 60.0
}

/// rpm → m/s
pub fn rpm_to_mps(rpm: f32) -> f32 {
    (f64::from(rpm / 60.0) * WHEEL_CONST) as f32
}
