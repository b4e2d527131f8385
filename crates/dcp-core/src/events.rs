//! 进程内事件总线：单生产者/多订阅者、同步类型分发。
//!
//! 核心只需要一种事件（成员关系变化），因此总线本身对负载类型保持泛型，而不是
//! 引入一个带 `Any` 下转型的通用事件枚举——那一套更适合插件式扩展点很多的系统，
//! 这里反而会掩盖唯一消费者（Stream Engine）真正关心的类型。

use tokio::sync::broadcast;

/// 类型化的发布/订阅总线，底层是一个 `tokio::sync::broadcast` 通道。
///
/// 克隆 [`EventBus`] 共享同一个发布端；每个 [`EventBus::subscribe`] 调用都会得到
/// 一个独立的接收端，迟到的订阅者不会看到订阅之前发布的事件。
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布一个事件；没有订阅者时静默丢弃，不视为错误。
    pub fn publish(&self, event: T) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}
