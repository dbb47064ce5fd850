//! Mock 适配器（无硬件）
//!
//! - [`MockRxAdapter`]：从通道取帧，无帧时在读超时后返回 `CanError::Timeout`
//! - [`MockTxAdapter`]：记录所有发送的帧，可注入写失败
//! - [`MockBusHandle`]：测试侧句柄，用于注入接收帧、检查发送记录
//!
//! ```ignore
//! use bluebot_can::mock::mock_pair;
//! use bluebot_can::{BlueFrame, RxAdapter, TxAdapter};
//! use std::time::Duration;
//!
//! let (mut rx, mut tx, handle) = mock_pair(Duration::from_millis(1));
//! handle.inject(BlueFrame::new(0x581, &[1, 2, 3]));
//! assert_eq!(rx.receive().unwrap().id, 0x581);
//!
//! tx.send(BlueFrame::new(0x601, &[0x42])).unwrap();
//! assert_eq!(handle.sent().len(), 1);
//! ```

use crate::{BlueFrame, CanAdapter, CanError, RxAdapter, SplittableAdapter, TxAdapter};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// 注入的写失败模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// 正常写入
    None,
    /// 返回 `CanError::ShortWrite`，帧不记录
    ShortWrite,
    /// 返回 `CanError::NotStarted`，帧不记录
    Closed,
}

#[derive(Debug)]
struct TxState {
    sent: Mutex<Vec<BlueFrame>>,
    fault: Mutex<WriteFault>,
    attempts: AtomicUsize,
}

/// 测试侧句柄（可克隆）
#[derive(Debug, Clone)]
pub struct MockBusHandle {
    inject: Sender<BlueFrame>,
    tx: Arc<TxState>,
}

impl MockBusHandle {
    /// 注入一个接收帧
    pub fn inject(&self, frame: BlueFrame) {
        // 接收端已释放时帧直接丢弃
        let _ = self.inject.send(frame);
    }

    /// 已成功发送的帧（按发送顺序）
    pub fn sent(&self) -> Vec<BlueFrame> {
        self.tx.sent.lock().clone()
    }

    /// 发送尝试次数（包括失败的）
    pub fn send_attempts(&self) -> usize {
        self.tx.attempts.load(Ordering::SeqCst)
    }

    pub fn clear_sent(&self) {
        self.tx.sent.lock().clear();
    }

    pub fn set_write_fault(&self, fault: WriteFault) {
        *self.tx.fault.lock() = fault;
    }
}

/// 队列驱动的接收端
#[derive(Debug)]
pub struct MockRxAdapter {
    frames: Receiver<BlueFrame>,
    read_timeout: Duration,
}

impl MockRxAdapter {
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl RxAdapter for MockRxAdapter {
    fn receive(&mut self) -> Result<BlueFrame, CanError> {
        match self.frames.recv_timeout(self.read_timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(CanError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                // 所有句柄已释放：表现为静默的总线
                std::thread::sleep(self.read_timeout);
                Err(CanError::Timeout)
            },
        }
    }
}

/// 记录型发送端
#[derive(Debug)]
pub struct MockTxAdapter {
    state: Arc<TxState>,
}

impl TxAdapter for MockTxAdapter {
    fn send(&mut self, frame: BlueFrame) -> Result<(), CanError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        match *self.state.fault.lock() {
            WriteFault::None => {
                self.state.sent.lock().push(frame);
                Ok(())
            },
            WriteFault::ShortWrite => Err(CanError::ShortWrite {
                written: 0,
                expected: 16,
            }),
            WriteFault::Closed => Err(CanError::NotStarted),
        }
    }
}

/// 创建一对 mock 适配器和测试句柄
pub fn mock_pair(read_timeout: Duration) -> (MockRxAdapter, MockTxAdapter, MockBusHandle) {
    let (inject, frames) = crossbeam_channel::unbounded();
    let state = Arc::new(TxState {
        sent: Mutex::new(Vec::new()),
        fault: Mutex::new(WriteFault::None),
        attempts: AtomicUsize::new(0),
    });

    (
        MockRxAdapter {
            frames,
            read_timeout,
        },
        MockTxAdapter {
            state: state.clone(),
        },
        MockBusHandle { inject, tx: state },
    )
}

/// 未分离的 mock 适配器（用于需要 `SplittableAdapter` 的场景）
#[derive(Debug)]
pub struct MockCanAdapter {
    rx: MockRxAdapter,
    tx: MockTxAdapter,
    split_done: Arc<AtomicBool>,
}

impl MockCanAdapter {
    pub fn new(read_timeout: Duration) -> (Self, MockBusHandle) {
        let (rx, tx, handle) = mock_pair(read_timeout);
        (
            Self {
                rx,
                tx,
                split_done: Arc::new(AtomicBool::new(false)),
            },
            handle,
        )
    }

    /// 分离状态观察器（测试用）
    pub fn split_flag(&self) -> Arc<AtomicBool> {
        self.split_done.clone()
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: BlueFrame) -> Result<(), CanError> {
        self.tx.send(frame)
    }

    fn receive(&mut self) -> Result<BlueFrame, CanError> {
        self.rx.receive()
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.rx.set_read_timeout(timeout);
    }
}

impl SplittableAdapter for MockCanAdapter {
    type RxAdapter = MockRxAdapter;
    type TxAdapter = MockTxAdapter;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        self.split_done.store(true, Ordering::SeqCst);
        Ok((self.rx, self.tx))
    }
}
