//! 电机命令
//!
//! 每个命令都走跟踪请求：发送后等待应答，超时则取消挂起请求并报错。

use anyhow::{Context, Result, bail};
use bluebot_client::{MotorsClient, MotorsSnapshot, RequestStatus, RequestToken, RobotConfig};
use clap::Subcommand;
use std::time::Duration;
use tracing::debug;

/// 电机子命令
#[derive(Subcommand, Debug)]
pub enum MotorsCommand {
    /// 使能两侧电机
    Enable {
        /// 请求者 ID（覆盖配置）
        #[arg(long)]
        requester: Option<u8>,
    },

    /// 失能两侧电机
    Disable {
        /// 请求者 ID（覆盖配置）
        #[arg(long)]
        requester: Option<u8>,
    },

    /// 查询使能状态
    Status {
        /// 请求者 ID（覆盖配置）
        #[arg(long)]
        requester: Option<u8>,
    },

    /// 设置速度（m/s）；不带参数时只读回当前速度
    Speed {
        #[arg(long, allow_negative_numbers = true)]
        left: Option<f32>,

        #[arg(long, allow_negative_numbers = true)]
        right: Option<f32>,
    },
}

impl MotorsCommand {
    pub fn execute(self, config: &RobotConfig, timeout: Duration) -> Result<()> {
        let bus = super::open_bus(config)?;
        let motors = MotorsClient::new(&bus);
        println!("🔌 已连接到 {}", bus.interface());

        let snapshot = self.run(&motors, config.requester_id, timeout)?;
        print_snapshot(&self, &snapshot);
        Ok(())
    }

    /// 执行命令并返回最终快照
    pub fn run(
        &self,
        motors: &MotorsClient,
        default_requester: u8,
        timeout: Duration,
    ) -> Result<MotorsSnapshot> {
        match *self {
            MotorsCommand::Enable { requester } => {
                let requester = requester.unwrap_or(default_requester);
                await_ack(motors, motors.enable(requester)?, timeout, "enable")?;
                await_ack(motors, motors.query_status(requester)?, timeout, "status")?;
            },

            MotorsCommand::Disable { requester } => {
                let requester = requester.unwrap_or(default_requester);
                await_ack(motors, motors.disable(requester)?, timeout, "disable")?;
                await_ack(motors, motors.query_status(requester)?, timeout, "status")?;
            },

            MotorsCommand::Status { requester } => {
                let requester = requester.unwrap_or(default_requester);
                await_ack(motors, motors.query_status(requester)?, timeout, "status")?;
            },

            MotorsCommand::Speed { left, right } => {
                if let Some(mps) = left {
                    await_ack(motors, motors.set_left_speed(mps)?, timeout, "set left speed")?;
                }
                if let Some(mps) = right {
                    await_ack(motors, motors.set_right_speed(mps)?, timeout, "set right speed")?;
                }
                await_ack(motors, motors.query_left_speed()?, timeout, "left speed")?;
                await_ack(motors, motors.query_right_speed()?, timeout, "right speed")?;
            },
        }

        Ok(motors.read())
    }
}

fn await_ack(
    motors: &MotorsClient,
    token: RequestToken,
    timeout: Duration,
    what: &str,
) -> Result<()> {
    match motors.wait(&token, timeout) {
        Ok(RequestStatus::Acknowledged) => {
            debug!("{} acknowledged", what);
            Ok(())
        },
        Ok(status) => bail!("{}: request ended as {:?}", what, status),
        Err(e) => {
            let rejections = motors.pending().map_or(0, |pending| pending.rejections);
            motors.cancel_pending();
            Err(e).with_context(|| {
                format!("{}: no acknowledgement ({} rejection(s))", what, rejections)
            })
        },
    }
}

fn print_snapshot(command: &MotorsCommand, snapshot: &MotorsSnapshot) {
    let state = |enabled: bool| if enabled { "enabled" } else { "disabled" };

    match command {
        MotorsCommand::Speed { .. } => {
            println!(
                "✅ left:  {:>8} counts  {:>8.2} rpm  {:>7.3} m/s",
                snapshot.encoder_left, snapshot.rpm_left, snapshot.mps_left
            );
            println!(
                "✅ right: {:>8} counts  {:>8.2} rpm  {:>7.3} m/s",
                snapshot.encoder_right, snapshot.rpm_right, snapshot.mps_right
            );
        },
        _ => {
            println!(
                "✅ left: {}, right: {}",
                state(snapshot.status_left),
                state(snapshot.status_right)
            );
        },
    }
}
