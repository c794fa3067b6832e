use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BridgeError, Result};

/// pm2 分配的进程标识
///
/// pm2 通常使用数字 id，但凡是需要 id 的地方也接受进程名。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessId {
    Index(u64),
    Name(String),
}

impl ProcessId {
    /// 解析文本形式的标识（路径参数、查询参数）
    ///
    /// 规范的十进制数字转为 `Index`，其余原样保留为 `Name`，保证 `"08"` 不会丢失前导零。
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::InvalidProcessId("identifier is empty".to_string()));
        }
        if trimmed.starts_with('-') {
            return Err(BridgeError::InvalidProcessId(format!(
                "identifier '{}' must not start with '-'",
                trimmed
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(BridgeError::InvalidProcessId(
                "identifier contains control characters".to_string(),
            ));
        }

        let canonical = trimmed.len() == 1 || !trimmed.starts_with('0');
        if canonical && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = trimmed.parse::<u64>() {
                return Ok(ProcessId::Index(index));
            }
        }
        Ok(ProcessId::Name(trimmed.to_string()))
    }

    /// 只接受 JSON 字符串或非负整数
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Number(n) => n.as_u64().map(ProcessId::Index).ok_or_else(|| {
                BridgeError::InvalidProcessId(format!("'{}' is not a non-negative integer", n))
            }),
            serde_json::Value::Null => {
                Err(BridgeError::InvalidProcessId("identifier is missing".to_string()))
            }
            other => Err(BridgeError::InvalidProcessId(format!(
                "expected string or integer, got {}",
                json_kind(other)
            ))),
        }
    }
}

impl ProcessId {
    /// 作为命令行参数使用前的最终校验；反序列化得到的 `Name` 没经过 `parse`
    pub fn to_arg(&self) -> Result<String> {
        match self {
            ProcessId::Index(index) => Ok(index.to_string()),
            ProcessId::Name(name) => Self::parse(name).map(|_| name.trim().to_string()),
        }
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        ProcessId::Index(0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Index(index) => write!(f, "{}", index),
            ProcessId::Name(name) => f.write_str(name),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Online,
    Stopped,
    Errored,
    Unknown,
}

impl ProcessStatus {
    pub fn from_supervisor(raw: &str) -> Self {
        match raw {
            "online" => ProcessStatus::Online,
            "stopped" => ProcessStatus::Stopped,
            "errored" => ProcessStatus::Errored,
            _ => ProcessStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Online => "online",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Errored => "errored",
            ProcessStatus::Unknown => "unknown",
        }
    }
}

/// 单次 inventory 轮询得到的进程快照
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// 显示名称（不保证唯一）
    pub name: String,
    pub id: ProcessId,
    pub status: ProcessStatus,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// 最近一次（重新）启动的毫秒时间戳，未知时为 0
    pub uptime_millis: u64,
}
