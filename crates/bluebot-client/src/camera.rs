//! 远程相机客户端
//!
//! 通过共享总线向远程相机发送采集控制命令，并旁路监听相机广播的图像参数帧
//! （任意 ID，首字节 `0x93`）。参数以“最新值覆盖”的方式保存。

use crate::error::ClientError;
use bluebot_driver::{Bus, FrameCallback, Mailbox};
use bluebot_protocol::{BlueFrame, CameraCommand, CameraParameters};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct ParametersHook {
    parameters: Arc<Mailbox<CameraParameters>>,
}

impl FrameCallback for ParametersHook {
    fn on_frame_received(&self, frame: &BlueFrame) {
        if let Ok(parameters) = CameraParameters::parse(frame.data_slice()) {
            self.parameters.publish(parameters);
        }
    }
}

/// 远程相机客户端
pub struct RemoteCameraClient {
    bus: Bus,
    parameters: Arc<Mailbox<CameraParameters>>,
    hook: Arc<dyn FrameCallback>,
}

impl std::fmt::Debug for RemoteCameraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCameraClient")
            .field("bus", &self.bus)
            .field("parameters", &self.parameters.latest())
            .finish()
    }
}

impl RemoteCameraClient {
    pub fn new(bus: &Bus) -> Self {
        let parameters = Arc::new(Mailbox::new());
        let hook: Arc<dyn FrameCallback> = Arc::new(ParametersHook {
            parameters: parameters.clone(),
        });
        bus.add_hook(hook.clone());

        Self {
            bus: bus.clone(),
            parameters,
            hook,
        }
    }

    /// 发送命令帧到 `0x604`
    pub fn send_command(&self, command: CameraCommand) -> Result<(), ClientError> {
        self.bus.send_frame(command.to_frame())?;
        debug!("Camera: sent {:?}", command);
        Ok(())
    }

    pub fn start_capture(&self) -> Result<(), ClientError> {
        self.send_command(CameraCommand::StartCapture)
    }

    pub fn start_processing(&self) -> Result<(), ClientError> {
        self.send_command(CameraCommand::StartProcessing)
    }

    pub fn pause(&self) -> Result<(), ClientError> {
        self.send_command(CameraCommand::Pause)
    }

    pub fn end(&self) -> Result<(), ClientError> {
        self.send_command(CameraCommand::End)
    }

    /// 最近一次收到的参数
    pub fn parameters(&self) -> Option<CameraParameters> {
        self.parameters.latest()
    }

    /// 已有参数则立即返回，否则等待第一次广播
    pub fn wait_parameters(&self, timeout: Duration) -> Result<CameraParameters, ClientError> {
        let parameters = self
            .parameters
            .wait_latest(timeout)
            .ok_or(ClientError::Timeout("camera parameters"))?;
        info!(
            "Camera parameters: {}x{} @ {} fps",
            parameters.width, parameters.height, parameters.fps
        );
        Ok(parameters)
    }

    /// 等待下一次（尚未读取过的）参数广播
    pub fn next_parameters(&self, timeout: Duration) -> Result<CameraParameters, ClientError> {
        self.parameters
            .wait_take(timeout)
            .ok_or(ClientError::Timeout("camera parameters"))
    }
}

impl Drop for RemoteCameraClient {
    fn drop(&mut self) {
        self.bus.remove_hook(&self.hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_publishes_only_parameter_frames() {
        let mailbox = Arc::new(Mailbox::new());
        let hook = ParametersHook {
            parameters: mailbox.clone(),
        };

        hook.on_frame_received(&BlueFrame::new(0x581, &[0x43, 0x69, 0x60, 0, 0, 0, 0, 0]));
        hook.on_frame_received(&BlueFrame::new(0x603, &[0x93, 0x40, 0x01]));
        assert_eq!(mailbox.latest(), None);

        let announced = CameraParameters {
            width: 320,
            height: 240,
            fps: 30,
        };
        hook.on_frame_received(&announced.to_frame(0x603));
        assert_eq!(mailbox.latest(), Some(announced));
    }
}
