//! # BlueBot Client
//!
//! 建立在共享总线（[`bluebot_driver::Bus`]）之上的服务客户端：
//!
//! - [`MotorsClient`]：电机协议引擎（单个跟踪请求槽位 + 状态快照）
//! - [`RemoteCameraClient`]：远程相机命令与参数广播
//! - [`EncoderSampler`]：独立通道上的编码器周期采样会话
//! - [`RobotConfig`]：TOML 配置文件
//!
//! ```ignore
//! use bluebot_client::{MotorsClient, RobotConfig};
//! use bluebot_driver::BusHub;
//! use std::time::Duration;
//!
//! let config = RobotConfig::load("bluebot.toml")?;
//! let hub = BusHub::socketcan(config.bus.clone());
//! let bus = hub.open_default()?;
//!
//! let motors = MotorsClient::new(&bus);
//! let token = motors.enable(config.requester_id)?;
//! motors.wait(&token, Duration::from_millis(100))?;
//! ```

pub mod camera;
pub mod config;
mod error;
pub mod motors;
pub mod records;
pub mod sampler;

pub use camera::RemoteCameraClient;
pub use config::{InvalidFramePolicy, RobotConfig, SamplerConfig};
pub use error::{ClientError, ConfigError};
pub use motors::{MotorsClient, MotorsSnapshot, PendingRequest, RequestStatus, RequestToken};
pub use records::{CaptureRecord, EncoderLogWriter, EncoderSample, ParseRecordError, SampleSink};
pub use sampler::{EncoderSampler, SamplingSession, SessionEnd, SessionSummary};

pub use bluebot_protocol::{CameraCommand, CameraParameters, MotorSide, RequestKind};
