//! 原始 socket 收发
//!
//! `SocketCanAdapter` 与分离后的 `SocketCanRxAdapter`/`SocketCanTxAdapter` 共用同一套
//! `poll + recvmsg` 接收路径和 `write` 发送路径。

use crate::{BlueFrame, CanDeviceError, CanDeviceErrorKind, CanError};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{ControlMessageOwned, MsgFlags, RecvMsg, SockaddrStorage, recvmsg};
use socketcan::{CanError as SocketCanError, CanErrorFrame, CanFrame};
use std::io::IoSliceMut;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;
use tracing::{error, trace, warn};

/// `libc::can_frame` 的字节大小（16）
pub(crate) const CAN_FRAME_LEN: usize = std::mem::size_of::<libc::can_frame>();

/// 时间戳状态（每个 socket 句柄独立检测）
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TimestampState {
    /// 是否启用了 SO_TIMESTAMPING
    pub enabled: bool,
    /// 是否检测到硬件时间戳（首次收到时设置）
    pub hw_available: bool,
}

/// 接收一个标准数据帧（阻塞至超时）
///
/// - 错误帧：Bus Off / 缓冲区溢出上报为错误，其余记录后忽略
/// - 扩展帧、远程帧：忽略，继续等待
///
/// 忽略帧后会重新开始完整的超时等待。
pub(crate) fn receive_frame(
    fd: RawFd,
    timeout: Duration,
    timestamps: &mut TimestampState,
) -> Result<BlueFrame, CanError> {
    loop {
        let pollfd = PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN);
        let timeout_ms = timeout.as_millis().min(65535) as u16;
        match poll(&mut [pollfd], PollTimeout::from(timeout_ms)) {
            Ok(0) => return Err(CanError::Timeout),
            Ok(_) => {},
            Err(Errno::EINTR) => return Err(CanError::Timeout),
            Err(e) => {
                return Err(CanError::Io(std::io::Error::other(format!(
                    "poll failed: {}",
                    e
                ))));
            },
        }

        let mut frame_buf = [0u8; CAN_FRAME_LEN];
        let mut cmsg_buf = [0u8; 1024];
        let mut iov = [IoSliceMut::new(&mut frame_buf)];

        let msg = match recvmsg::<SockaddrStorage>(
            fd,
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        ) {
            Ok(msg) => msg,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => return Err(CanError::Timeout),
            Err(e) => {
                return Err(CanError::Io(std::io::Error::other(format!(
                    "recvmsg failed: {}",
                    e
                ))));
            },
        };

        if msg.bytes < CAN_FRAME_LEN {
            return Err(CanError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Incomplete CAN frame: {} bytes (expected at least {})",
                    msg.bytes, CAN_FRAME_LEN
                ),
            )));
        }

        // 先提取时间戳（在解析 CAN 帧之前，避免生命周期冲突）
        let timestamp_us = extract_timestamp_from_cmsg(&msg, timestamps);
        let received_bytes = msg.bytes;
        let raw_frame = parse_raw_can_frame(&frame_buf[..received_bytes])?;

        if raw_frame.can_id & libc::CAN_ERR_FLAG != 0 {
            handle_error_frame(raw_frame)?;
            continue;
        }
        if raw_frame.can_id & libc::CAN_RTR_FLAG != 0 {
            trace!("Ignoring RTR frame: ID=0x{:X}", raw_frame.can_id & libc::CAN_EFF_MASK);
            continue;
        }
        if raw_frame.can_id & libc::CAN_EFF_FLAG != 0 {
            trace!(
                "Ignoring extended frame: ID=0x{:X}",
                raw_frame.can_id & libc::CAN_EFF_MASK
            );
            continue;
        }

        let id = (raw_frame.can_id & libc::CAN_SFF_MASK) as u16;
        let len = usize::from(raw_frame.can_dlc);
        let frame = BlueFrame::new(id, &raw_frame.data[..len]).with_timestamp(timestamp_us);

        trace!(
            "Received CAN frame: ID=0x{:X}, len={}, timestamp_us={}",
            frame.id, frame.len, frame.timestamp_us
        );
        return Ok(frame);
    }
}

/// 错误帧分类：需要上报的返回 `Err`，可忽略的返回 `Ok(())`
fn handle_error_frame(raw_frame: libc::can_frame) -> Result<(), CanError> {
    let Ok(error_frame) = CanErrorFrame::try_from(CanFrame::from(raw_frame)) else {
        warn!("Received CAN error frame but failed to parse, ignoring");
        return Ok(());
    };

    let socketcan_error = SocketCanError::from(error_frame);
    match &socketcan_error {
        SocketCanError::BusOff => {
            error!("CAN Bus Off error detected");
            Err(CanError::BusOff)
        },
        SocketCanError::ControllerProblem(problem) => {
            let problem_str = format!("{}", problem);
            if problem_str.contains("overflow") || problem_str.contains("Overflow") {
                error!("CAN Buffer Overflow detected: {}", problem);
                Err(CanError::BufferOverflow)
            } else {
                warn!("CAN Controller Problem: {}, ignoring", problem);
                Ok(())
            }
        },
        _ => {
            warn!("CAN Error Frame received: {}, ignoring", socketcan_error);
            Ok(())
        },
    }
}

/// 解析原始 CAN 帧数据
///
/// 使用已对齐的 `libc::can_frame` 拷贝数据，避免未对齐指针强转。
pub(crate) fn parse_raw_can_frame(data: &[u8]) -> Result<libc::can_frame, CanError> {
    if data.len() < CAN_FRAME_LEN {
        return Err(CanError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Incomplete CAN frame data: {} bytes (expected at least {})",
                data.len(),
                CAN_FRAME_LEN
            ),
        )));
    }

    let mut raw_frame: libc::can_frame = unsafe { std::mem::zeroed() };
    unsafe {
        std::ptr::copy_nonoverlapping(
            data.as_ptr(),
            &mut raw_frame as *mut _ as *mut u8,
            CAN_FRAME_LEN,
        );
    }

    if raw_frame.can_dlc > 8 {
        return Err(CanError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid DLC: {} (max 8)", raw_frame.can_dlc),
        )));
    }

    Ok(raw_frame)
}

/// 从 CMSG 中提取时间戳（微秒）
///
/// 优先级：`hw_trans`（硬件时间，已同步到系统时钟） > `system`（软件时间戳） > 0
fn extract_timestamp_from_cmsg(
    msg: &RecvMsg<'_, '_, SockaddrStorage>,
    state: &mut TimestampState,
) -> u64 {
    if !state.enabled {
        return 0;
    }

    let cmsgs = match msg.cmsgs() {
        Ok(cmsgs) => cmsgs,
        Err(e) => {
            warn!("Failed to parse CMSG: {}, returning timestamp 0", e);
            return 0;
        },
    };

    for cmsg in cmsgs {
        if let ControlMessageOwned::ScmTimestampsns(timestamps) = cmsg {
            let hw_trans_ts = timestamps.hw_trans;
            if hw_trans_ts.tv_sec() != 0 || hw_trans_ts.tv_nsec() != 0 {
                if !state.hw_available {
                    trace!("Hardware timestamp (system-synced) detected and enabled");
                    state.hw_available = true;
                }
                return timespec_to_micros(hw_trans_ts.tv_sec(), hw_trans_ts.tv_nsec());
            }

            // hw_raw 是网卡内部计数器，与系统时间不在同一时间轴，不使用
            let sw_ts = timestamps.system;
            if sw_ts.tv_sec() != 0 || sw_ts.tv_nsec() != 0 {
                return timespec_to_micros(sw_ts.tv_sec(), sw_ts.tv_nsec());
            }
        }
    }

    0
}

/// timespec (秒+纳秒) → 微秒
pub(crate) fn timespec_to_micros(tv_sec: i64, tv_nsec: i64) -> u64 {
    (tv_sec as u64) * 1_000_000 + ((tv_nsec as u64) / 1000)
}

/// 写入一个标准帧
///
/// 写入字节数不足 `CAN_FRAME_LEN` 时返回 `CanError::ShortWrite`。
/// 发送超时（`SO_SNDTIMEO`）映射为 `CanError::Timeout`。
pub(crate) fn write_frame(fd: RawFd, frame: &BlueFrame) -> Result<(), CanError> {
    let mut raw_frame: libc::can_frame = unsafe { std::mem::zeroed() };
    raw_frame.can_id = u32::from(frame.id) & libc::CAN_SFF_MASK;
    raw_frame.can_dlc = frame.data_slice().len() as u8;
    raw_frame.data = frame.data;

    let written = unsafe {
        libc::write(
            fd,
            &raw_frame as *const _ as *const libc::c_void,
            CAN_FRAME_LEN,
        )
    };

    if written < 0 {
        let err = std::io::Error::last_os_error();
        return match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Err(CanError::Timeout),
            std::io::ErrorKind::NotFound => Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NoDevice,
                format!("CAN device gone: {}", err),
            ))),
            _ => Err(CanError::Io(err)),
        };
    }

    let written = written as usize;
    if written != CAN_FRAME_LEN {
        warn!(
            "Short write on CAN frame 0x{:X}: {} of {} bytes",
            frame.id, written, CAN_FRAME_LEN
        );
        return Err(CanError::ShortWrite {
            written,
            expected: CAN_FRAME_LEN,
        });
    }

    trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_bytes(can_id: u32, dlc: u8, data: [u8; 8]) -> Vec<u8> {
        let mut raw_frame: libc::can_frame = unsafe { std::mem::zeroed() };
        raw_frame.can_id = can_id;
        raw_frame.can_dlc = dlc;
        raw_frame.data = data;
        let ptr = &raw_frame as *const _ as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, CAN_FRAME_LEN) }.to_vec()
    }

    #[test]
    fn test_parse_raw_can_frame_standard() {
        let bytes = raw_bytes(0x581, 8, [0x43, 0x40, 0x22, 0, 1, 0, 0, 0]);
        let frame = parse_raw_can_frame(&bytes).unwrap();
        assert_eq!(frame.can_id, 0x581);
        assert_eq!(frame.can_dlc, 8);
        assert_eq!(frame.data[4], 1);
    }

    #[test]
    fn test_parse_raw_can_frame_rejects_short_buffer() {
        let bytes = raw_bytes(0x581, 8, [0; 8]);
        assert!(matches!(parse_raw_can_frame(&bytes[..8]), Err(CanError::Io(_))));
    }

    #[test]
    fn test_parse_raw_can_frame_rejects_bad_dlc() {
        let bytes = raw_bytes(0x581, 9, [0; 8]);
        assert!(matches!(parse_raw_can_frame(&bytes), Err(CanError::Io(_))));
    }

    #[test]
    fn test_timespec_to_micros() {
        assert_eq!(timespec_to_micros(1, 500_000), 1_000_500);
        assert_eq!(timespec_to_micros(0, 999), 0);
    }
}
