//! 响应分发注册表
//!
//! 协议引擎按服务 ID 订阅响应帧（`0x580 + id`），接收线程按发送方服务 ID 转发。
//! 订阅以 [`Subscription`] 守卫的形式返回，守卫释放时自动取消订阅。

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// 响应处理器
///
/// 在接收线程上调用，必须快速返回；不允许在回调中再次订阅/取消订阅同一总线以外的阻塞操作。
pub trait ResponseHandler: Send + Sync {
    /// - `payload`: 帧的有效数据（长度即帧长度）
    /// - `sender`: 发送方服务 ID（`frame.id - 0x580`）
    fn on_response(&self, payload: &[u8], sender: u8);
}

type HandlerList = Arc<[(u64, Arc<dyn ResponseHandler>)]>;

/// 服务 ID → 处理器列表
///
/// 写时复制：订阅变更时整表替换，接收线程只取快照，分发路径不分配内存。
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    handlers: ArcSwap<HashMap<u8, HandlerList>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, service: u8, handler: Arc<dyn ResponseHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            let list: HandlerList = next
                .get(&service)
                .into_iter()
                .flat_map(|list| list.iter().cloned())
                .chain(std::iter::once((id, handler.clone())))
                .collect();
            next.insert(service, list);
            next
        });
        trace!("Subscribed handler {} to service 0x{:02X}", id, service);
        id
    }

    fn unsubscribe(&self, service: u8, id: u64) {
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            if let Some(list) = next.get(&service) {
                let remaining: HandlerList = list
                    .iter()
                    .filter(|(handler_id, _)| *handler_id != id)
                    .cloned()
                    .collect();
                if remaining.is_empty() {
                    next.remove(&service);
                } else {
                    next.insert(service, remaining);
                }
            }
            next
        });
        trace!("Unsubscribed handler {} from service 0x{:02X}", id, service);
    }

    /// 转发给该服务的所有处理器，返回处理器数量
    ///
    /// 处理器拿到的是调用时的快照：回调内订阅或释放 `Subscription` 从下一帧开始生效，也不会死锁。
    pub fn dispatch(&self, sender: u8, payload: &[u8]) -> usize {
        let Some(targets) = self.handlers.load().get(&sender).cloned() else {
            return 0;
        };

        for (_, handler) in targets.iter() {
            handler.on_response(payload, sender);
        }
        targets.len()
    }

    /// 某服务的订阅数量
    pub fn subscriber_count(&self, service: u8) -> usize {
        self.handlers.load().get(&service).map_or(0, |list| list.len())
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("services", &self.handlers.load().len())
            .finish()
    }
}

/// 订阅守卫（释放即取消订阅）
#[must_use = "dropping a Subscription unsubscribes the handler immediately"]
pub struct Subscription {
    service: u8,
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub(crate) fn new(
        registry: &Arc<SubscriberRegistry>,
        service: u8,
        handler: Arc<dyn ResponseHandler>,
    ) -> Self {
        let id = registry.subscribe(service, handler);
        Self {
            service,
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn service(&self) -> u8 {
        self.service
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("service", &self.service)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.service, self.id);
        }
    }
}
