//! 日志记录格式
//!
//! 每行一条记录，字段以单个空格分隔：
//!
//! - 图像采集：`<frameCount> <timestampMs>`
//! - 编码器采样：`<deviceId> <timestampMs> <encoderCount>`，`deviceId` 为响应帧的 CAN ID（十进制）

use crossbeam_channel::Sender;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// 图像采集记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRecord {
    pub frame_count: u64,
    pub timestamp_ms: u64,
}

impl fmt::Display for CaptureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.frame_count, self.timestamp_ms)
    }
}

/// 编码器采样
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSample {
    /// 响应帧 CAN ID（0x581 / 0x582）
    pub device_id: u16,
    /// 接收时间（毫秒，Unix 纪元）
    pub timestamp_ms: u64,
    pub encoder_count: i32,
}

impl fmt::Display for EncoderSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.device_id, self.timestamp_ms, self.encoder_count
        )
    }
}

/// 记录行解析失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid record line: {0:?}")]
pub struct ParseRecordError(pub String);

impl FromStr for EncoderSample {
    type Err = ParseRecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseRecordError(line.to_string());
        let mut fields = line.split_whitespace();
        let mut next = || fields.next().ok_or_else(invalid);

        let sample = EncoderSample {
            device_id: next()?.parse().map_err(|_| invalid())?,
            timestamp_ms: next()?.parse().map_err(|_| invalid())?,
            encoder_count: next()?.parse().map_err(|_| invalid())?,
        };
        if fields.next().is_some() {
            return Err(invalid());
        }
        Ok(sample)
    }
}

/// 采样输出
pub trait SampleSink: Send {
    fn record(&mut self, sample: &EncoderSample) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SampleSink for Vec<EncoderSample> {
    fn record(&mut self, sample: &EncoderSample) -> io::Result<()> {
        self.push(*sample);
        Ok(())
    }
}

impl SampleSink for Sender<EncoderSample> {
    fn record(&mut self, sample: &EncoderSample) -> io::Result<()> {
        self.send(*sample)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "sample receiver dropped"))
    }
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn record(&mut self, sample: &EncoderSample) -> io::Result<()> {
        (**self).record(sample)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// 编码器日志文件（一行一条采样）
#[derive(Debug)]
pub struct EncoderLogWriter<W: Write> {
    out: BufWriter<W>,
    lines: u64,
}

impl EncoderLogWriter<File> {
    /// 创建（或截断）日志文件
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> EncoderLogWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
            lines: 0,
        }
    }

    pub fn write_sample(&mut self, sample: &EncoderSample) -> io::Result<()> {
        writeln!(self.out, "{}", sample)?;
        self.lines += 1;
        Ok(())
    }

    /// 已写入的行数
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(io::IntoInnerError::into_error)
    }
}

impl<W: Write + Send> SampleSink for EncoderLogWriter<W> {
    fn record(&mut self, sample: &EncoderSample) -> io::Result<()> {
        self.write_sample(sample)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_formats() {
        let capture = CaptureRecord {
            frame_count: 12,
            timestamp_ms: 1_700_000_000_123,
        };
        assert_eq!(capture.to_string(), "12 1700000000123");

        let sample = EncoderSample {
            device_id: 0x582,
            timestamp_ms: 42,
            encoder_count: -16,
        };
        assert_eq!(sample.to_string(), "1410 42 -16");
    }

    #[test]
    fn test_parse_sample_line() {
        let sample: EncoderSample = "1409 1000 64000".parse().unwrap();
        assert_eq!(
            sample,
            EncoderSample {
                device_id: 0x581,
                timestamp_ms: 1000,
                encoder_count: 64000,
            }
        );
        assert!("1409 1000".parse::<EncoderSample>().is_err());
        assert!("1409 1000 1 2".parse::<EncoderSample>().is_err());
        assert!("x 1 2".parse::<EncoderSample>().is_err());
    }

    #[test]
    fn test_parse_error_is_std_error() {
        let err = "1409 abc 1".parse::<EncoderSample>().unwrap_err();
        assert_eq!(err, ParseRecordError("1409 abc 1".to_string()));
        assert_eq!(err.to_string(), "invalid record line: \"1409 abc 1\"");

        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_log_writer_one_line_per_sample() {
        let mut writer = EncoderLogWriter::new(Vec::new());
        for (id, count) in [(0x581u16, 1), (0x582, -2)] {
            writer
                .record(&EncoderSample {
                    device_id: id,
                    timestamp_ms: 7,
                    encoder_count: count,
                })
                .unwrap();
        }
        assert_eq!(writer.lines(), 2);
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "1409 7 1\n1410 7 -2\n");
    }

    #[test]
    fn test_log_writer_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoder.log");
        let mut writer = EncoderLogWriter::create(&path).unwrap();
        writer
            .record(&EncoderSample {
                device_id: 0x581,
                timestamp_ms: 5,
                encoder_count: 9,
            })
            .unwrap();
        SampleSink::flush(&mut writer).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text.trim().parse::<EncoderSample>().unwrap().encoder_count, 9);
    }

    #[test]
    fn test_channel_sink_reports_disconnect() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = tx;
        let sample = EncoderSample {
            device_id: 0x581,
            timestamp_ms: 1,
            encoder_count: 1,
        };
        sink.record(&sample).unwrap();
        assert_eq!(rx.recv().unwrap(), sample);
        drop(rx);
        assert!(sink.record(&sample).is_err());
    }
}
