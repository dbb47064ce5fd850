//! 远程相机协议
//!
//! - 命令帧：发往 `0x604`，`[0x91, 0x92, cmd, 0, 0, 0, 0, 0]`
//! - 参数帧：`[0x93, w0, w1, w2, h0, h1, h2, fps]`，宽高为 24-bit 小端

use crate::ids::ServiceId;
use crate::{BlueFrame, ProtocolError, bytes_to_u24_le};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 命令帧魔数
pub const CAMERA_COMMAND_MAGIC: [u8; 2] = [0x91, 0x92];

/// 参数帧首字节
pub const CAMERA_PARAMETERS_MAGIC: u8 = 0x93;

/// 远程相机命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CameraCommand {
    /// 开始采集
    StartCapture = 0x66,
    /// 开始处理
    StartProcessing = 0x55,
    Pause = 0x99,
    End = 0x33,
}

impl CameraCommand {
    /// 构建命令帧
    pub fn to_frame(self) -> BlueFrame {
        BlueFrame::new(
            ServiceId::RemoteCamera.command_address(),
            &[
                CAMERA_COMMAND_MAGIC[0],
                CAMERA_COMMAND_MAGIC[1],
                self.into(),
                0x00,
                0x00,
                0x00,
                0x00,
                0x00,
            ],
        )
    }

    /// 解析命令帧（用于回放/监听）
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::InvalidLength {
                expected: 8,
                actual: data.len(),
            });
        }
        if data[..2] != CAMERA_COMMAND_MAGIC {
            return Err(ProtocolError::Mismatch("not a camera command"));
        }
        Self::try_from(data[2]).map_err(|_| ProtocolError::Mismatch("unknown camera command"))
    }
}

/// 相机图像参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CameraParameters {
    pub width: u32,
    pub height: u32,
    pub fps: u8,
}

impl CameraParameters {
    /// 解析参数帧
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != 8 {
            return Err(ProtocolError::InvalidLength {
                expected: 8,
                actual: data.len(),
            });
        }
        if data[0] != CAMERA_PARAMETERS_MAGIC {
            return Err(ProtocolError::Mismatch("not a camera parameters frame"));
        }
        Ok(Self {
            width: bytes_to_u24_le([data[1], data[2], data[3]]),
            height: bytes_to_u24_le([data[4], data[5], data[6]]),
            fps: data[7],
        })
    }

    /// 构建参数帧（宽高超过 24 位的部分被截断）
    pub fn to_frame(&self, id: u16) -> BlueFrame {
        let w = self.width.to_le_bytes();
        let h = self.height.to_le_bytes();
        BlueFrame::new(
            id,
            &[CAMERA_PARAMETERS_MAGIC, w[0], w[1], w[2], h[0], h[1], h[2], self.fps],
        )
    }
}
