//! 采样命令
//!
//! 在独立通道上周期查询两侧编码器，逐行写入日志文件，直到 Ctrl-C 或会话自行结束。

use anyhow::{Context, Result, bail};
use bluebot_client::{
    EncoderLogWriter, InvalidFramePolicy, RobotConfig, SamplerConfig, SamplingSession, SessionEnd,
    SessionSummary,
};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// 采样命令参数
#[derive(Args, Debug)]
pub struct SampleCommand {
    /// 输出文件路径
    #[arg(short, long)]
    pub output: PathBuf,

    /// 查询周期（毫秒，覆盖配置）
    #[arg(long)]
    pub period_ms: Option<u64>,

    /// 丢弃非编码器应答帧而不是结束会话
    #[arg(long)]
    pub skip_invalid: bool,
}

impl SampleCommand {
    /// 命令行参数覆盖后的采样配置
    pub fn sampler_config(&self, config: &RobotConfig) -> SamplerConfig {
        let mut sampler = config.sampler.clone();
        if let Some(period_ms) = self.period_ms {
            sampler.period_ms = period_ms;
        }
        if self.skip_invalid {
            sampler.on_invalid_frame = InvalidFramePolicy::Skip;
        }
        sampler
    }

    pub fn execute(&self, config: &RobotConfig) -> Result<()> {
        let sampler = self.sampler_config(config);
        if sampler.period_ms == 0 {
            bail!("--period-ms must be greater than zero");
        }

        let writer = EncoderLogWriter::create(&self.output)
            .with_context(|| format!("创建输出文件失败: {}", self.output.display()))?;

        let session = open_session(sampler, writer)?;
        let cancel = session.cancellation_token();
        ctrlc::set_handler(move || cancel.cancel()).context("设置 Ctrl-C 处理失败")?;

        println!("⏺️  采样中，写入 {}（Ctrl-C 停止）", self.output.display());
        let summary = wait_for_end(session);
        report(&summary)
    }
}

#[cfg(target_os = "linux")]
fn open_session(
    sampler: SamplerConfig,
    writer: EncoderLogWriter<std::fs::File>,
) -> Result<SamplingSession> {
    Ok(bluebot_client::EncoderSampler::open(sampler, writer)?)
}

#[cfg(not(target_os = "linux"))]
fn open_session(
    _sampler: SamplerConfig,
    _writer: EncoderLogWriter<std::fs::File>,
) -> Result<SamplingSession> {
    bail!("SocketCAN is only available on Linux")
}

fn wait_for_end(session: SamplingSession) -> SessionSummary {
    while !session.is_finished() {
        std::thread::sleep(Duration::from_millis(50));
    }
    session.join()
}

fn report(summary: &SessionSummary) -> Result<()> {
    info!(
        "{} queries sent, {} send errors, {} late activations",
        summary.queries_sent, summary.send_errors, summary.late_activations
    );
    println!(
        "✅ 采样结束: {} 条记录，丢弃 {} 帧",
        summary.samples, summary.skipped
    );

    match &summary.end {
        SessionEnd::Stopped => Ok(()),
        SessionEnd::InvalidFrame(frame) => {
            println!(
                "⚠️  收到非编码器帧 0x{:03X} {:02X?}，会话已结束（可用 --skip-invalid 跳过）",
                frame.id,
                frame.data_slice()
            );
            Ok(())
        },
        SessionEnd::ChannelError(e) => bail!("CAN channel failed: {}", e),
        SessionEnd::SinkError(e) => bail!("failed to write samples: {}", e),
        SessionEnd::Panicked => bail!("sampling thread panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluebot_driver::BlueFrame;

    fn summary(end: SessionEnd) -> SessionSummary {
        SessionSummary {
            queries_sent: 10,
            send_errors: 0,
            late_activations: 0,
            samples: 10,
            skipped: 0,
            end,
        }
    }

    #[test]
    fn test_overrides_applied() {
        let command = SampleCommand {
            output: PathBuf::from("out.txt"),
            period_ms: Some(20),
            skip_invalid: true,
        };
        let sampler = command.sampler_config(&RobotConfig::default());
        assert_eq!(sampler.period_ms, 20);
        assert_eq!(sampler.on_invalid_frame, InvalidFramePolicy::Skip);
        assert_eq!(sampler.initial_offset_ms, 1);
    }

    #[test]
    fn test_config_kept_without_flags() {
        let command = SampleCommand {
            output: PathBuf::from("out.txt"),
            period_ms: None,
            skip_invalid: false,
        };
        let mut config = RobotConfig::default();
        config.sampler.period_ms = 5;
        config.sampler.on_invalid_frame = InvalidFramePolicy::Skip;

        let sampler = command.sampler_config(&config);
        assert_eq!(sampler.period_ms, 5);
        assert_eq!(sampler.on_invalid_frame, InvalidFramePolicy::Skip);
    }

    #[test]
    fn test_report_outcomes() {
        assert!(report(&summary(SessionEnd::Stopped)).is_ok());
        assert!(report(&summary(SessionEnd::InvalidFrame(BlueFrame::new(0x600, &[1])))).is_ok());
        assert!(report(&summary(SessionEnd::ChannelError("bus off".into()))).is_err());
        assert!(report(&summary(SessionEnd::Panicked)).is_err());
    }
}
