use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::models::LogEvent;
use crate::services::control::Revalidate;

pub const EVENT_LOG_OUTPUT: &str = "log-output";
pub const EVENT_LOG_ERROR: &str = "log-error";
pub const EVENT_LOG_STOPPED: &str = "log-stopped";
pub const EVENT_INVENTORY_INVALIDATED: &str = "inventory-invalidated";

/// 控制命令成功后发布刷新通知的频道
pub const INVENTORY_CHANNEL: &str = "pm2-inventory";

/// 频道上的一条消息：事件名 + JSON 数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMessage {
    pub event: &'static str,
    pub data: serde_json::Value,
}

impl ChannelMessage {
    pub fn log_output(event: &LogEvent) -> Self {
        Self {
            event: EVENT_LOG_OUTPUT,
            data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn log_error(error: impl Into<String>) -> Self {
        Self {
            event: EVENT_LOG_ERROR,
            data: serde_json::json!({
                "error": error.into(),
                "timestamp": Utc::now(),
            }),
        }
    }

    pub fn log_stopped() -> Self {
        Self {
            event: EVENT_LOG_STOPPED,
            data: serde_json::json!({
                "message": "Log streaming stopped",
                "timestamp": Utc::now(),
            }),
        }
    }

    pub fn inventory_invalidated(path: &str) -> Self {
        Self {
            event: EVENT_INVENTORY_INVALIDATED,
            data: serde_json::json!({
                "path": path,
                "timestamp": Utc::now(),
            }),
        }
    }

    /// Server-Sent Events 帧
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// 发布/订阅 broker 的发布端
///
/// 实现必须是非阻塞的：桥接层在日志泵里直接调用它。返回值是投递到的订阅者数量。
pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, message: ChannelMessage) -> Result<usize, PublishError>;
}

/// 进程内 broker，每个频道一个 broadcast 通道
///
/// 落后超过 `capacity` 条的订阅者会丢掉最旧的消息。
pub struct LocalBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<ChannelMessage>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ChannelMessage>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage> {
        let mut channels = self.channels();
        // 顺手清掉已经没有订阅者的频道
        channels.retain(|name, sender| name == channel || sender.receiver_count() > 0);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// 关闭所有频道，已有订阅者的流随之结束
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels().clear();
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels()
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Publisher for LocalBroker {
    // 频道只在 subscribe 时创建；没人订阅的频道发布即丢弃
    fn publish(&self, channel: &str, message: ChannelMessage) -> Result<usize, PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("local broker is closed".to_string()));
        }
        let channels = self.channels();
        match channels.get(channel) {
            // send 只在没有接收者时失败，这不算错误
            Some(sender) => Ok(sender.send(message).unwrap_or(0)),
            None => Ok(0),
        }
    }
}

/// 通过 broker 的 inventory 频道通知前端刷新
pub struct BrokerRevalidator {
    publisher: Arc<dyn Publisher>,
}

impl BrokerRevalidator {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

impl Revalidate for BrokerRevalidator {
    fn revalidate(&self, path: &str) {
        if let Err(e) = self
            .publisher
            .publish(INVENTORY_CHANNEL, ChannelMessage::inventory_invalidated(path))
        {
            log::warn!("Failed to publish revalidation for {}: {}", path, e);
        }
    }
}
