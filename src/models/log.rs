use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

/// 从 tail 子进程读到的一块输出
///
/// `payload` 不保证是完整的一行，可能是半行也可能是多行。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub stream: LogStream,
    #[serde(rename = "data")]
    pub payload: String,
    /// 桥接层捕获时间，不是 pm2 写入时间
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn now(stream: LogStream, payload: String) -> Self {
        Self {
            stream,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// `pm2 logs --nostream` 的时点快照
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct LogSnapshot {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Active,
    Stopping,
    Terminated,
}

impl SessionState {
    /// 处于 starting/active 的会话可以直接复用
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Active)
    }
}

/// 控制命令的成功结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlResult {
    #[serde(rename = "success")]
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ControlResult {
    pub fn success(message: String) -> Self {
        Self {
            ok: true,
            message,
            output: None,
        }
    }
}
