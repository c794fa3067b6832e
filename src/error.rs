//! 采集、控制与日志桥接共用的错误类型
//!
//! 变体携带完整的诊断上下文用于服务端日志；返回给用户的只有简短提示和一行详情。

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("invalid process id: {0}")]
    InvalidProcessId(String),

    #[error("invalid remote host: {0}")]
    InvalidHost(String),

    #[error("malformed supervisor output: {0}")]
    MalformedOutput(String),

    #[error("supervisor unavailable: {0}")]
    SupervisorUnavailable(String),

    #[error("control command failed for process {process_id}: {exit_info}")]
    ControlCommandFailed {
        process_id: String,
        exit_info: String,
    },

    #[error("log stream for process {process_id} failed to start: {reason}")]
    StreamSpawnFailed { process_id: String, reason: String },
}

impl BridgeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidProcessId(_) => "INVALID_PROCESS_ID",
            Self::InvalidHost(_) => "INVALID_HOST",
            Self::MalformedOutput(_) => "MALFORMED_OUTPUT",
            Self::SupervisorUnavailable(_) => "SUPERVISOR_UNAVAILABLE",
            Self::ControlCommandFailed { .. } => "CONTROL_COMMAND_FAILED",
            Self::StreamSpawnFailed { .. } => "STREAM_SPAWN_FAILED",
        }
    }

    /// 面向用户的通用提示
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidProcessId(_) => "Invalid or missing Process ID",
            Self::InvalidHost(_) => "Invalid remote host",
            Self::MalformedOutput(_) => "Supervisor returned unreadable data",
            Self::SupervisorUnavailable(_) => "Supervisor unavailable",
            Self::ControlCommandFailed { .. } => "Internal server error",
            Self::StreamSpawnFailed { .. } => "Log streaming failed to start",
        }
    }

    /// `error` 字段的一行详情；原始输出只写服务端日志
    pub fn public_detail(&self) -> String {
        match self {
            Self::MalformedOutput(_) => "the supervisor listing could not be parsed".to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "message": self.public_message(),
            "error": self.public_detail(),
            "error_code": self.error_code(),
        })
    }
}

impl ResponseError for BridgeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidProcessId(_) | Self::InvalidHost(_) => StatusCode::BAD_REQUEST,
            Self::MalformedOutput(_) => StatusCode::BAD_GATEWAY,
            Self::SupervisorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ControlCommandFailed { .. } | Self::StreamSpawnFailed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.to_json())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
