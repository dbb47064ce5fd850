//! 电机协议引擎
//!
//! 每个 [`MotorsClient`] 实例只有一个跟踪请求槽位：
//!
//! - 跟踪命令（返回 [`RequestToken`]）只有在空闲时才会发送，否则返回 `ClientError::Busy` 且不发送任何帧
//! - 非跟踪命令（`*_nowait`）绕过槽位，总是发送
//! - 接收线程把电机聚合服务和左右驱动器的响应交给引擎，引擎据此确认请求并更新快照
//!
//! 协议本身没有活性保证：调用方用 [`MotorsClient::wait`] 限定等待时间，
//! 超时后用 [`MotorsClient::cancel_pending`] 回到空闲。

use crate::error::ClientError;
use bluebot_driver::{Bus, ResponseHandler, Subscription};
use bluebot_protocol::{
    AggregateReply, MotorCommand, MotorSide, MotorStatus, RequestKind, ServiceId, encoder_to_rpm,
    parse_aggregate_reply, parse_get_speed_reply, parse_set_speed_ack, rpm_to_mps,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 电机状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorsSnapshot {
    pub status_left: bool,
    pub status_right: bool,
    /// 原始编码器速度（0.1 counts/s）
    pub encoder_left: i32,
    pub encoder_right: i32,
    pub rpm_left: f32,
    pub rpm_right: f32,
    pub mps_left: f32,
    pub mps_right: f32,
    /// 上次读取后是否有新数据
    pub updated: bool,
}

impl MotorsSnapshot {
    fn apply_status(&mut self, status: MotorStatus) {
        self.status_left = status.left;
        self.status_right = status.right;
        self.updated = true;
    }

    fn apply_encoder(&mut self, side: MotorSide, encoder: i32) {
        let rpm = encoder_to_rpm(encoder);
        let mps = rpm_to_mps(rpm);
        match side {
            MotorSide::Left => {
                self.encoder_left = encoder;
                self.rpm_left = rpm;
                self.mps_left = mps;
            },
            MotorSide::Right => {
                self.encoder_right = encoder;
                self.rpm_right = rpm;
                self.mps_right = mps;
            },
        }
        self.updated = true;
    }
}

/// 未确认的跟踪请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    generation: u64,
    /// 请求者 ID（驱动器请求固定为 0）
    pub requester: u8,
    pub kind: RequestKind,
    /// 收到的“写入被拒绝/应答不符”次数，请求仍保持未确认
    pub rejections: u32,
}

/// 跟踪请求句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    generation: u64,
    kind: RequestKind,
}

impl RequestToken {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

/// 跟踪请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// 仍在等待确认
    Pending,
    /// 已确认
    Acknowledged,
    /// 被 `cancel_pending` 取消
    Cancelled,
    /// 已被后续请求取代，结果不再保留
    Expired,
}

#[derive(Debug, Default)]
struct EngineState {
    pending: Option<PendingRequest>,
    next_generation: u64,
    /// 最近一个结束的请求（请求按顺序结束，只需保留一个）
    last_finished: Option<(u64, RequestStatus)>,
    snapshot: MotorsSnapshot,
}

impl EngineState {
    fn status_of(&self, token: &RequestToken) -> RequestStatus {
        if let Some(pending) = &self.pending
            && pending.generation == token.generation
        {
            return RequestStatus::Pending;
        }
        match self.last_finished {
            Some((generation, status)) if generation == token.generation => status,
            _ => RequestStatus::Expired,
        }
    }

    fn finish(&mut self, status: RequestStatus) -> bool {
        match self.pending.take() {
            Some(pending) => {
                self.last_finished = Some((pending.generation, status));
                true
            },
            None => false,
        }
    }

    fn reject(&mut self, reason: &str) {
        if let Some(pending) = &mut self.pending {
            pending.rejections += 1;
            warn!(
                "Motors {:?} request not accepted ({}), still pending after {} rejection(s)",
                pending.kind, reason, pending.rejections
            );
        }
    }
}

#[derive(Debug, Default)]
struct EngineShared {
    state: Mutex<EngineState>,
    changed: Condvar,
}

impl EngineShared {
    /// 处理一帧响应（只在有跟踪请求时生效，其它情况忽略）
    fn handle_response(&self, payload: &[u8], sender: u8) {
        let mut state = self.state.lock();
        let Some(pending) = state.pending else {
            trace!("Motors: idle, ignoring response from service 0x{:02X}", sender);
            return;
        };

        let acknowledged = match ServiceId::from_raw(sender) {
            Ok(ServiceId::Motors) => match parse_aggregate_reply(payload, pending.requester) {
                Ok(AggregateReply::Status(status)) => {
                    state.snapshot.apply_status(status);
                    true
                },
                Ok(AggregateReply::WriteRejected) => {
                    state.reject("write rejected by motors service");
                    false
                },
                Err(e) => {
                    debug!("Motors: ignoring aggregate reply {:02X?}: {}", payload, e);
                    return;
                },
            },
            Ok(service @ (ServiceId::MotorLeft | ServiceId::MotorRight)) if payload.len() == 8 => {
                let side = match service {
                    ServiceId::MotorLeft => MotorSide::Left,
                    _ => MotorSide::Right,
                };
                match pending.kind {
                    RequestKind::SetSpeed => match parse_set_speed_ack(payload) {
                        Ok(()) => true,
                        Err(e) => {
                            state.reject(&e.to_string());
                            false
                        },
                    },
                    RequestKind::GetSpeed => match parse_get_speed_reply(payload) {
                        Ok(encoder) => {
                            state.snapshot.apply_encoder(side, encoder);
                            true
                        },
                        Err(e) => {
                            state.reject(&e.to_string());
                            false
                        },
                    },
                    RequestKind::Status => {
                        debug!("Motors: driver reply while a status request is pending, ignored");
                        return;
                    },
                }
            },
            _ => {
                debug!(
                    "Motors: unexpected reply from service 0x{:02X} (len {}), ignored",
                    sender,
                    payload.len()
                );
                return;
            },
        };

        if acknowledged {
            state.finish(RequestStatus::Acknowledged);
            trace!("Motors: {:?} request acknowledged", pending.kind);
        }
        drop(state);
        self.changed.notify_all();
    }
}

struct MotorsHandler(Arc<EngineShared>);

impl ResponseHandler for MotorsHandler {
    fn on_response(&self, payload: &[u8], sender: u8) {
        self.0.handle_response(payload, sender);
    }
}

/// 电机服务客户端
pub struct MotorsClient {
    bus: Bus,
    shared: Arc<EngineShared>,
    _subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for MotorsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorsClient")
            .field("bus", &self.bus)
            .field("pending", &self.pending())
            .finish()
    }
}

impl MotorsClient {
    /// 在共享总线上订阅电机聚合服务与左右驱动器的响应
    pub fn new(bus: &Bus) -> Self {
        let shared = Arc::new(EngineShared::default());
        let handler: Arc<dyn ResponseHandler> = Arc::new(MotorsHandler(shared.clone()));
        let subscriptions = [ServiceId::Motors, ServiceId::MotorLeft, ServiceId::MotorRight]
            .into_iter()
            .map(|service| bus.subscribe(service.raw(), handler.clone()))
            .collect();

        Self {
            bus: bus.clone(),
            shared,
            _subscriptions: subscriptions,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// 发送跟踪命令
    ///
    /// 已有未确认请求时返回 `Busy`，不发送。发送失败时请求以 `Cancelled` 结束，槽位回到空闲。
    pub fn submit(&self, command: MotorCommand) -> Result<RequestToken, ClientError> {
        let frame = command.to_frame();
        let token = {
            let mut state = self.shared.state.lock();
            if let Some(pending) = &state.pending {
                return Err(ClientError::Busy {
                    pending: pending.kind,
                });
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            state.pending = Some(PendingRequest {
                generation,
                requester: command.requester(),
                kind: command.kind(),
                rejections: 0,
            });
            RequestToken {
                generation,
                kind: command.kind(),
            }
        };

        // 发送时不持有引擎锁：响应可能在 send 返回之前就到达接收线程
        if let Err(e) = self.bus.send_frame(frame) {
            let mut state = self.shared.state.lock();
            if state.pending.is_some_and(|p| p.generation == token.generation) {
                state.finish(RequestStatus::Cancelled);
                self.shared.changed.notify_all();
            }
            return Err(e.into());
        }

        debug!("Motors: sent tracked {:?}", command);
        Ok(token)
    }

    /// 发送非跟踪命令（不检查、不占用请求槽位）
    pub fn send_untracked(&self, command: MotorCommand) -> Result<(), ClientError> {
        self.bus.send_frame(command.to_frame())?;
        trace!("Motors: sent untracked {:?}", command);
        Ok(())
    }

    pub fn set_left_speed(&self, mps: f32) -> Result<RequestToken, ClientError> {
        self.submit(MotorCommand::SetSpeed {
            side: MotorSide::Left,
            mps,
        })
    }

    pub fn set_right_speed(&self, mps: f32) -> Result<RequestToken, ClientError> {
        self.submit(MotorCommand::SetSpeed {
            side: MotorSide::Right,
            mps,
        })
    }

    pub fn enable(&self, requester: u8) -> Result<RequestToken, ClientError> {
        self.submit(MotorCommand::Enable { requester })
    }

    pub fn disable(&self, requester: u8) -> Result<RequestToken, ClientError> {
        self.submit(MotorCommand::Disable { requester })
    }

    pub fn query_status(&self, requester: u8) -> Result<RequestToken, ClientError> {
        self.submit(MotorCommand::QueryStatus { requester })
    }

    pub fn query_left_speed(&self) -> Result<RequestToken, ClientError> {
        self.submit(MotorCommand::GetSpeed {
            side: MotorSide::Left,
        })
    }

    pub fn query_right_speed(&self) -> Result<RequestToken, ClientError> {
        self.submit(MotorCommand::GetSpeed {
            side: MotorSide::Right,
        })
    }

    pub fn set_left_speed_nowait(&self, mps: f32) -> Result<(), ClientError> {
        self.send_untracked(MotorCommand::SetSpeed {
            side: MotorSide::Left,
            mps,
        })
    }

    pub fn set_right_speed_nowait(&self, mps: f32) -> Result<(), ClientError> {
        self.send_untracked(MotorCommand::SetSpeed {
            side: MotorSide::Right,
            mps,
        })
    }

    pub fn enable_nowait(&self, requester: u8) -> Result<(), ClientError> {
        self.send_untracked(MotorCommand::Enable { requester })
    }

    pub fn disable_nowait(&self, requester: u8) -> Result<(), ClientError> {
        self.send_untracked(MotorCommand::Disable { requester })
    }

    pub fn query_status_nowait(&self, requester: u8) -> Result<(), ClientError> {
        self.send_untracked(MotorCommand::QueryStatus { requester })
    }

    pub fn query_left_speed_nowait(&self) -> Result<(), ClientError> {
        self.send_untracked(MotorCommand::GetSpeed {
            side: MotorSide::Left,
        })
    }

    pub fn query_right_speed_nowait(&self) -> Result<(), ClientError> {
        self.send_untracked(MotorCommand::GetSpeed {
            side: MotorSide::Right,
        })
    }

    /// 强制回到空闲（不发送任何帧），返回之前是否有未确认请求
    pub fn cancel_pending(&self) -> bool {
        let cancelled = self.shared.state.lock().finish(RequestStatus::Cancelled);
        if cancelled {
            debug!("Motors: pending request cancelled");
            self.shared.changed.notify_all();
        }
        cancelled
    }

    /// 当前未确认的请求
    pub fn pending(&self) -> Option<PendingRequest> {
        self.shared.state.lock().pending
    }

    pub fn status(&self, token: &RequestToken) -> RequestStatus {
        self.shared.state.lock().status_of(token)
    }

    /// 等待请求结束
    ///
    /// 超时返回 `ClientError::Timeout`，请求仍保持未确认，由调用方决定是否取消。
    pub fn wait(&self, token: &RequestToken, timeout: Duration) -> Result<RequestStatus, ClientError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            let status = state.status_of(token);
            if status != RequestStatus::Pending {
                return Ok(status);
            }
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return match state.status_of(token) {
                    RequestStatus::Pending => Err(ClientError::Timeout("motors acknowledgement")),
                    status => Ok(status),
                };
            }
        }
    }

    /// 读取快照并清除 `updated` 标志
    pub fn read(&self) -> MotorsSnapshot {
        let mut state = self.shared.state.lock();
        let snapshot = state.snapshot;
        state.snapshot.updated = false;
        snapshot
    }

    /// 上次 `read` 之后是否有新数据（不清除标志）
    pub fn is_updated(&self) -> bool {
        self.shared.state.lock().snapshot.updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pending(shared: &EngineShared, kind: RequestKind, requester: u8) -> RequestToken {
        let mut state = shared.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.pending = Some(PendingRequest {
            generation,
            requester,
            kind,
            rejections: 0,
        });
        RequestToken { generation, kind }
    }

    #[test]
    fn test_status_reply_acknowledges() {
        let shared = EngineShared::default();
        let token = pending(&shared, RequestKind::Status, 5);

        shared.handle_response(&[5, 1, 2], 0);
        let state = shared.state.lock();
        assert!(state.pending.is_none());
        assert_eq!(state.status_of(&token), RequestStatus::Acknowledged);
        assert!(state.snapshot.status_left);
        assert!(!state.snapshot.status_right);
        assert!(state.snapshot.updated);
    }

    #[test]
    fn test_write_rejected_stays_pending() {
        let shared = EngineShared::default();
        let token = pending(&shared, RequestKind::Status, 5);

        shared.handle_response(&[5, 0, 3], 0);
        shared.handle_response(&[9, 0, 3], 0);
        let state = shared.state.lock();
        assert_eq!(state.status_of(&token), RequestStatus::Pending);
        assert_eq!(state.pending.unwrap().rejections, 2);
        assert!(!state.snapshot.updated);
    }

    #[test]
    fn test_status_reply_for_other_requester_ignored() {
        let shared = EngineShared::default();
        pending(&shared, RequestKind::Status, 5);

        shared.handle_response(&[6, 1, 3], 0);
        shared.handle_response(&[5, 1], 0);
        let state = shared.state.lock();
        assert_eq!(state.pending.unwrap().rejections, 0);
        assert!(!state.snapshot.updated);
    }

    #[test]
    fn test_set_speed_ack_and_reject() {
        let shared = EngineShared::default();
        let token = pending(&shared, RequestKind::SetSpeed, 0);

        shared.handle_response(&[0x80, 0x41, 0x23, 0x00, 0, 0, 0, 0], 2);
        assert_eq!(shared.state.lock().pending.unwrap().rejections, 1);

        // 长度不为 8 的驱动器帧不算应答
        shared.handle_response(&[0x60, 0x41, 0x23, 0x00], 2);
        assert_eq!(shared.state.lock().pending.unwrap().rejections, 1);

        shared.handle_response(&[0x60, 0x41, 0x23, 0x00, 0, 0, 0, 0], 2);
        assert_eq!(
            shared.state.lock().status_of(&token),
            RequestStatus::Acknowledged
        );
        assert!(!shared.state.lock().snapshot.updated);
    }

    #[test]
    fn test_get_speed_right_updates_right_fields() {
        let shared = EngineShared::default();
        pending(&shared, RequestKind::GetSpeed, 0);

        let encoder: i32 = -320_000;
        let mut payload = [0x43, 0x69, 0x60, 0x00, 0, 0, 0, 0];
        payload[4..].copy_from_slice(&encoder.to_le_bytes());
        shared.handle_response(&payload, 2);

        let snapshot = shared.state.lock().snapshot;
        assert_eq!(snapshot.encoder_right, encoder);
        assert_eq!(snapshot.rpm_right, encoder_to_rpm(encoder));
        assert_eq!(snapshot.mps_right, rpm_to_mps(snapshot.rpm_right));
        assert_eq!(snapshot.encoder_left, 0);
        assert_eq!(snapshot.rpm_left, 0.0);
        assert!(snapshot.updated);
    }

    #[test]
    fn test_driver_reply_during_status_request_ignored() {
        let shared = EngineShared::default();
        pending(&shared, RequestKind::Status, 1);
        shared.handle_response(&[0x43, 0x69, 0x60, 0x00, 1, 0, 0, 0], 1);
        let state = shared.state.lock();
        assert!(state.pending.is_some());
        assert_eq!(state.pending.unwrap().rejections, 0);
    }

    #[test]
    fn test_finished_token_expires_after_next_request() {
        let shared = EngineShared::default();
        let first = pending(&shared, RequestKind::Status, 1);
        shared.state.lock().finish(RequestStatus::Cancelled);
        assert_eq!(shared.state.lock().status_of(&first), RequestStatus::Cancelled);

        pending(&shared, RequestKind::Status, 1);
        shared.state.lock().finish(RequestStatus::Acknowledged);
        assert_eq!(shared.state.lock().status_of(&first), RequestStatus::Expired);
    }

    #[test]
    fn test_failed_send_finishes_as_cancelled() {
        use bluebot_can::mock::{WriteFault, mock_pair};
        use bluebot_driver::BusConfig;

        let (rx, tx, handle) = mock_pair(Duration::from_millis(1));
        let bus = Bus::from_adapters(rx, tx, BusConfig::default().without_realtime()).unwrap();
        let motors = MotorsClient::new(&bus);

        handle.set_write_fault(WriteFault::Closed);
        assert!(motors.query_status(1).is_err());
        {
            let state = motors.shared.state.lock();
            assert!(state.pending.is_none());
            assert_eq!(state.last_finished, Some((1, RequestStatus::Cancelled)));
        }

        handle.set_write_fault(WriteFault::None);
        let token = motors.query_status(1).unwrap();
        assert_eq!(token.generation, 2);
        assert_eq!(
            motors.status(&RequestToken {
                generation: 1,
                kind: RequestKind::Status,
            }),
            RequestStatus::Expired
        );
    }

    proptest! {
        #[test]
        fn prop_idle_engine_ignores_everything(
            payload in proptest::collection::vec(any::<u8>(), 0..=8),
            sender in 0u8..8,
        ) {
            let shared = EngineShared::default();
            shared.handle_response(&payload, sender);
            let state = shared.state.lock();
            prop_assert!(state.pending.is_none());
            prop_assert_eq!(state.snapshot, MotorsSnapshot::default());
        }
    }
}
