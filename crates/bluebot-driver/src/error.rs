//! 驱动层错误类型定义

use bluebot_can::CanError;
use bluebot_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 打开/绑定 CAN 接口失败（对该总线是致命的，不重试）
    #[error("Failed to bind CAN interface '{interface}': {source}")]
    Bind {
        interface: String,
        #[source]
        source: CanError,
    },

    /// CAN 驱动错误（包括短写入）
    #[error("CAN driver error: {0}")]
    Can(#[from] CanError),

    /// 协议错误（如帧 ID 或长度无效）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// PDO 寄存器访问错误
    #[error("Register store error: {0}")]
    Pdo(#[from] PdoError),

    /// 总线已关闭（接收线程已退出）
    #[error("Bus closed")]
    Closed,

    /// 接收线程启动失败
    #[error("Failed to spawn receiver thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// PDO 寄存器误用（调用方编程错误，总是上报）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PdoError {
    #[error("PDO slot (channel {channel}, device {device}) is not registered")]
    NotRegistered { channel: u8, device: u8 },

    #[error("PDO slot (channel {channel}, device {device}) is already registered")]
    AlreadyRegistered { channel: u8, device: u8 },

    #[error("PDO access out of range: offset {offset} + width {width} exceeds 8 bytes")]
    OutOfRange { offset: usize, width: usize },

    #[error("Unsupported PDO field width: {0} (expected 1, 2 or 4)")]
    UnsupportedWidth(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Bind {
            interface: "can7".to_string(),
            source: CanError::Timeout,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("can7") && msg.contains("Read timeout"), "{}", msg);

        assert_eq!(format!("{}", DriverError::Closed), "Bus closed");

        let err = DriverError::from(PdoError::OutOfRange {
            offset: 6,
            width: 4,
        });
        assert!(format!("{}", err).contains("offset 6 + width 4"));
    }

    #[test]
    fn test_from_can_error() {
        let err: DriverError = CanError::ShortWrite {
            written: 3,
            expected: 16,
        }
        .into();
        assert!(matches!(
            err,
            DriverError::Can(CanError::ShortWrite { written: 3, .. })
        ));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: DriverError = ProtocolError::InvalidCanId { id: 0x900 }.into();
        match err {
            DriverError::Protocol(ProtocolError::InvalidCanId { id }) => assert_eq!(id, 0x900),
            other => panic!("Expected Protocol variant, got {:?}", other),
        }
    }
}
