//! 命令定义和实现

pub mod motors;
pub mod sample;

pub use motors::MotorsCommand;
pub use sample::SampleCommand;

use anyhow::Result;
use bluebot_client::RobotConfig;
use bluebot_driver::Bus;

/// 在配置的接口上打开共享总线
#[cfg(target_os = "linux")]
fn open_bus(config: &RobotConfig) -> Result<Bus> {
    let hub = bluebot_driver::BusHub::socketcan(config.bus.clone());
    Ok(hub.open_default()?)
}

#[cfg(not(target_os = "linux"))]
fn open_bus(_config: &RobotConfig) -> Result<Bus> {
    anyhow::bail!("SocketCAN is only available on Linux")
}
