//! 远程相机客户端集成测试

use bluebot_can::mock::mock_pair;
use bluebot_client::{CameraCommand, CameraParameters, ClientError, RemoteCameraClient};
use bluebot_driver::{BlueFrame, Bus, BusConfig};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

#[test]
fn test_commands_and_parameters() {
    let (rx, tx, handle) = mock_pair(Duration::from_millis(1));
    let bus = Bus::from_adapters(rx, tx, BusConfig::default().without_realtime()).unwrap();
    let camera = RemoteCameraClient::new(&bus);

    camera.start_capture().unwrap();
    camera.start_processing().unwrap();
    camera.pause().unwrap();
    camera.end().unwrap();

    let sent = handle.sent();
    assert_eq!(sent.len(), 4);
    assert!(sent.iter().all(|frame| frame.id == 0x604));
    let commands: Vec<_> = sent
        .iter()
        .map(|frame| CameraCommand::parse(frame.data_slice()).unwrap())
        .collect();
    assert_eq!(
        commands,
        [
            CameraCommand::StartCapture,
            CameraCommand::StartProcessing,
            CameraCommand::Pause,
            CameraCommand::End,
        ]
    );

    assert!(camera.parameters().is_none());
    assert!(matches!(
        camera.wait_parameters(Duration::from_millis(10)),
        Err(ClientError::Timeout(_))
    ));

    let announced = CameraParameters {
        width: 640,
        height: 480,
        fps: 15,
    };
    handle.inject(BlueFrame::new(0x583, &[0x43, 0x69, 0x60, 0, 0, 0, 0, 0]));
    handle.inject(announced.to_frame(0x584));

    assert_eq!(camera.next_parameters(WAIT).unwrap(), announced);
    assert_eq!(camera.parameters(), Some(announced));
    assert_eq!(camera.wait_parameters(WAIT).unwrap(), announced);
}

#[test]
fn test_dropping_client_removes_hook() {
    let (rx, tx, _handle) = mock_pair(Duration::from_millis(1));
    let bus = Bus::from_adapters(rx, tx, BusConfig::default().without_realtime()).unwrap();

    let camera = RemoteCameraClient::new(&bus);
    assert_eq!(bus.hook_count(), 1);
    drop(camera);
    assert_eq!(bus.hook_count(), 0);
}
