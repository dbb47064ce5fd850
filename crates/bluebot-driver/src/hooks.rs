//! 帧钩子
//!
//! 在接收线程上对每一帧（PDO 更新与响应分发之后）调用，也在发送成功后调用。
//! 用于旁路观察总线，例如远程相机参数广播、抓包记录。
//!
//! 回调运行在接收线程上：只做拷贝/`try_send` 之类的短操作，不要做 I/O。

use bluebot_protocol::BlueFrame;
use std::sync::Arc;

/// 帧回调
pub trait FrameCallback: Send + Sync {
    /// 收到一帧
    fn on_frame_received(&self, frame: &BlueFrame);

    /// 一帧已成功写出（写失败的帧不会触发）
    fn on_frame_sent(&self, frame: &BlueFrame) {
        let _ = frame;
    }
}

/// 回调列表
///
/// 本身不做同步，由 [`BusContext`](crate::BusContext) 用 `RwLock` 包裹。
#[derive(Default)]
pub struct HookManager {
    callbacks: Vec<Arc<dyn FrameCallback>>,
}

impl HookManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: Arc<dyn FrameCallback>) {
        self.callbacks.push(callback);
    }

    /// 按指针移除回调，返回是否找到
    pub fn remove_callback(&mut self, callback: &Arc<dyn FrameCallback>) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|existing| !Arc::ptr_eq(existing, callback));
        self.callbacks.len() != before
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    pub fn trigger_all(&self, frame: &BlueFrame) {
        for callback in &self.callbacks {
            callback.on_frame_received(frame);
        }
    }

    pub fn trigger_all_sent(&self, frame: &BlueFrame) {
        for callback in &self.callbacks {
            callback.on_frame_sent(frame);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
