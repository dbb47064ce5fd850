//! 编码器周期采样
//!
//! 采样使用独立的 CAN 通道（只接收两个驱动器的响应 0x581/0x582），不经过共享总线：
//!
//! - 查询线程：每个周期向左、右驱动器各发送一帧编码器读取请求
//! - 保存线程：逐帧读取应答，带时间戳写入 [`SampleSink`]
//!
//! 收到不是编码器应答的帧时，默认（[`InvalidFramePolicy::Abort`]）结束整个会话；
//! 配置为 [`InvalidFramePolicy::Skip`] 时丢弃该帧继续。

use crate::config::{InvalidFramePolicy, SamplerConfig};
use crate::error::ClientError;
use crate::records::{EncoderSample, SampleSink};
use bluebot_can::{CanError, RxAdapter, TxAdapter};
use bluebot_driver::{CancellationToken, PeriodicTask};
use bluebot_protocol::{BlueFrame, ENCODER_READ_REQUEST, ServiceId, parse_encoder_read_reply};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// 调用方停止
    Stopped,
    /// 收到非编码器应答帧（`Abort` 策略）
    InvalidFrame(BlueFrame),
    /// 通道致命错误
    ChannelError(String),
    /// 写入采样失败
    SinkError(String),
    /// 采样线程 panic
    Panicked,
}

/// 会话统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// 成功发送的查询帧数
    pub queries_sent: u64,
    pub send_errors: u64,
    /// 迟到超过一个周期的激活次数
    pub late_activations: u64,
    /// 写入的采样数
    pub samples: u64,
    /// `Skip` 策略下丢弃的帧数
    pub skipped: u64,
    pub end: SessionEnd,
}

#[derive(Debug, Default)]
struct QueryStats {
    sent: u64,
    errors: u64,
    late: u64,
}

#[derive(Debug)]
struct SaveStats {
    samples: u64,
    skipped: u64,
    end: SessionEnd,
}

/// 采样会话入口
#[derive(Debug)]
pub struct EncoderSampler;

impl EncoderSampler {
    /// 用给定的收发适配器启动采样会话
    ///
    /// `rx` 应只投递两个驱动器的响应帧，其他帧按 `on_invalid_frame` 处理。
    pub fn start<R, T, S>(
        rx: R,
        tx: T,
        config: SamplerConfig,
        sink: S,
    ) -> Result<SamplingSession, ClientError>
    where
        R: RxAdapter + Send + 'static,
        T: TxAdapter + Send + 'static,
        S: SampleSink + 'static,
    {
        let cancel = CancellationToken::new();

        let query_cancel = cancel.clone();
        let query_config = config.clone();
        let query = thread::Builder::new()
            .name("bluebot-encoder-query".into())
            .spawn(move || query_loop(tx, &query_config, &query_cancel))
            .map_err(|source| ClientError::Spawn {
                name: "encoder query",
                source,
            })?;

        let save_cancel = cancel.clone();
        let policy = config.on_invalid_frame;
        let save = match thread::Builder::new()
            .name("bluebot-encoder-save".into())
            .spawn(move || save_loop(rx, sink, policy, &save_cancel))
        {
            Ok(handle) => handle,
            Err(source) => {
                cancel.cancel();
                let _ = query.join();
                return Err(ClientError::Spawn {
                    name: "encoder save",
                    source,
                });
            },
        };

        info!(
            "Encoder sampling started on '{}' every {:?}",
            config.interface,
            config.period()
        );

        Ok(SamplingSession {
            cancel,
            query: Some(query),
            save: Some(save),
        })
    }

    /// 在 SocketCAN 上打开独立通道（过滤到 0x581/0x582）并启动会话
    #[cfg(target_os = "linux")]
    pub fn open<S>(config: SamplerConfig, sink: S) -> Result<SamplingSession, ClientError>
    where
        S: SampleSink + 'static,
    {
        use bluebot_can::{SocketCanAdapter, SplittableAdapter};
        use bluebot_driver::DriverError;

        let filters = [
            ServiceId::MotorLeft.response_address(),
            ServiceId::MotorRight.response_address(),
        ];
        let bind = |source: CanError| DriverError::Bind {
            interface: config.interface.clone(),
            source,
        };
        let mut adapter = SocketCanAdapter::new(config.interface.clone())
            .and_then(|adapter| adapter.with_filters(&filters))
            .map_err(bind)?;
        adapter.set_read_timeout(config.receive_timeout());
        let (rx, tx) = adapter.split()?;

        Self::start(rx, tx, config, sink)
    }
}

/// 运行中的采样会话
///
/// 释放句柄会停止并等待两个线程结束。
#[derive(Debug)]
pub struct SamplingSession {
    cancel: CancellationToken,
    query: Option<JoinHandle<QueryStats>>,
    save: Option<JoinHandle<SaveStats>>,
}

impl SamplingSession {
    /// 请求停止（在下一个让出点生效）
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 两个线程是否都已结束
    pub fn is_finished(&self) -> bool {
        self.query.as_ref().is_none_or(JoinHandle::is_finished)
            && self.save.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// 等待会话结束（不主动停止）
    pub fn join(mut self) -> SessionSummary {
        self.finish()
    }

    /// 停止并等待
    pub fn stop_and_join(self) -> SessionSummary {
        self.stop();
        self.join()
    }

    fn finish(&mut self) -> SessionSummary {
        let save = match self.save.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("Encoder save thread panicked");
                self.cancel.cancel();
                SaveStats {
                    samples: 0,
                    skipped: 0,
                    end: SessionEnd::Panicked,
                }
            },
            None => SaveStats {
                samples: 0,
                skipped: 0,
                end: SessionEnd::Stopped,
            },
        };

        let query = match self.query.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("Encoder query thread panicked");
                QueryStats::default()
            },
            None => QueryStats::default(),
        };

        let summary = SessionSummary {
            queries_sent: query.sent,
            send_errors: query.errors,
            late_activations: query.late,
            samples: save.samples,
            skipped: save.skipped,
            end: save.end,
        };
        info!(
            "Encoder sampling finished: {} samples, {} queries, end: {:?}",
            summary.samples, summary.queries_sent, summary.end
        );
        summary
    }
}

impl Drop for SamplingSession {
    fn drop(&mut self) {
        if self.query.is_some() || self.save.is_some() {
            self.cancel.cancel();
            self.finish();
        }
    }
}

fn query_loop<T: TxAdapter>(
    mut tx: T,
    config: &SamplerConfig,
    cancel: &CancellationToken,
) -> QueryStats {
    let mut stats = QueryStats::default();
    let requests = [ServiceId::MotorLeft, ServiceId::MotorRight]
        .map(|service| BlueFrame::new(service.command_address(), &ENCODER_READ_REQUEST));
    let period = config.period();
    let mut task = PeriodicTask::start(config.initial_offset(), period);

    'session: loop {
        let overrun = task.wait_next_activation();
        if cancel.is_cancelled() {
            break;
        }
        if overrun > period {
            stats.late += 1;
            debug!("Encoder query activation late by {:?}", overrun);
        }

        for frame in requests {
            match tx.send(frame) {
                Ok(()) => stats.sent += 1,
                Err(e) => {
                    stats.errors += 1;
                    warn!("Encoder query to 0x{:03X} failed: {}", frame.id, e);
                    if e.is_fatal() {
                        cancel.cancel();
                        break 'session;
                    }
                },
            }
        }
    }

    trace!("Encoder query thread exiting");
    stats
}

fn save_loop<R: RxAdapter, S: SampleSink>(
    mut rx: R,
    mut sink: S,
    policy: InvalidFramePolicy,
    cancel: &CancellationToken,
) -> SaveStats {
    let mut samples = 0;
    let mut skipped = 0;

    let end = loop {
        if cancel.is_cancelled() {
            break SessionEnd::Stopped;
        }

        let frame = match rx.receive() {
            Ok(frame) => frame,
            Err(CanError::Timeout) => continue,
            Err(e) if e.is_fatal() => {
                error!("Encoder channel failed: {}", e);
                break SessionEnd::ChannelError(e.to_string());
            },
            Err(e) => {
                warn!("Encoder receive error: {}", e);
                continue;
            },
        };

        let encoder_count = match parse_encoder_read_reply(frame.data()) {
            Ok(count) => count,
            Err(_) => match policy {
                InvalidFramePolicy::Abort => {
                    warn!(
                        "Non-encoder frame 0x{:03X} {:02X?}, ending sampling session",
                        frame.id,
                        frame.data_slice()
                    );
                    break SessionEnd::InvalidFrame(frame);
                },
                InvalidFramePolicy::Skip => {
                    skipped += 1;
                    debug!("Skipping non-encoder frame 0x{:03X}", frame.id);
                    continue;
                },
            },
        };

        let sample = EncoderSample {
            device_id: frame.id,
            timestamp_ms: frame_timestamp_ms(&frame),
            encoder_count,
        };
        if let Err(e) = sink.record(&sample) {
            error!("Failed to record encoder sample: {}", e);
            break SessionEnd::SinkError(e.to_string());
        }
        samples += 1;
    };

    if let Err(e) = sink.flush() {
        warn!("Failed to flush encoder samples: {}", e);
    }
    // 保存线程结束即整个会话结束
    cancel.cancel();

    SaveStats {
        samples,
        skipped,
        end,
    }
}

/// 接收时间戳（毫秒）；适配器没有提供时使用当前系统时间
fn frame_timestamp_ms(frame: &BlueFrame) -> u64 {
    if frame.timestamp_us != 0 {
        return frame.timestamp_us / 1000;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
