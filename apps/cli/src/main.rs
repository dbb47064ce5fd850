//! # BlueBot CLI
//!
//! 电机控制与编码器采样的命令行工具。
//!
//! ```bash
//! # 使能两侧电机（请求者 ID 取自配置文件）
//! bluebot-cli --config bluebot.toml motors enable
//!
//! # 设置速度（m/s）并读回
//! bluebot-cli -i can1 motors speed --left 0.3 --right -0.3
//!
//! # 采样编码器直到 Ctrl-C
//! bluebot-cli sample --output encoders.txt --period-ms 10 --skip-invalid
//! ```

use anyhow::{Context, Result};
use bluebot_client::RobotConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{MotorsCommand, SampleCommand};

/// BlueBot CLI - 轮式机器人命令行工具
#[derive(Parser, Debug)]
#[command(name = "bluebot-cli")]
#[command(about = "Command-line interface for BlueBot motor control and encoder sampling", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（TOML）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// CAN 接口（覆盖配置）
    #[arg(short, long, global = true)]
    interface: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 电机命令
    Motors {
        #[command(subcommand)]
        command: MotorsCommand,

        /// 等待应答的超时（毫秒）
        #[arg(long, default_value_t = 200, global = true)]
        timeout_ms: u64,
    },

    /// 编码器采样
    Sample {
        #[command(flatten)]
        args: SampleCommand,
    },
}

impl Cli {
    fn robot_config(&self) -> Result<RobotConfig> {
        let config = match &self.config {
            Some(path) => RobotConfig::load(path)
                .with_context(|| format!("加载配置文件失败: {}", path.display()))?,
            None => RobotConfig::default(),
        };

        Ok(match &self.interface {
            Some(interface) => config.with_interface(interface.clone()),
            None => config,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bluebot_cli=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.robot_config()?;

    match cli.command {
        Commands::Motors {
            command,
            timeout_ms,
        } => command.execute(&config, std::time::Duration::from_millis(timeout_ms)),

        Commands::Sample { args } => args.execute(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_interface_override() {
        let cli = Cli::try_parse_from(["bluebot-cli", "motors", "status", "-i", "vcan0"]).unwrap();
        let config = cli.robot_config().unwrap();
        assert_eq!(config.bus.interface, "vcan0");
        assert_eq!(config.sampler.interface, "vcan0");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = Cli::try_parse_from([
            "bluebot-cli",
            "--config",
            "/nonexistent/bluebot.toml",
            "motors",
            "enable",
        ])
        .unwrap();
        assert!(cli.robot_config().is_err());
    }

    #[test]
    fn test_speed_accepts_negative_values() {
        let cli = Cli::try_parse_from([
            "bluebot-cli",
            "motors",
            "speed",
            "--left",
            "-0.25",
            "--right",
            "0.5",
        ])
        .unwrap();

        match cli.command {
            Commands::Motors {
                command: MotorsCommand::Speed { left, right },
                timeout_ms,
            } => {
                assert_eq!(left, Some(-0.25));
                assert_eq!(right, Some(0.5));
                assert_eq!(timeout_ms, 200);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
