use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::path::Path;

use crate::error::{BridgeError, Result};
use crate::models::ProcessId;
use crate::services::ControlAction;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRestartRequest {
    pub host: String,
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub key_path: Option<String>,
}

/// `GET /api/restart/{id}`，前端按钮使用的三态接口
pub async fn restart_process(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let id = ProcessId::parse(&path)?;

    match data.control.restart(&id).await {
        Ok(_) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("Successfully restarted process {}", id),
        }))),
        Err(e) => {
            log::error!("Restart of process {} failed: {}", id, e);
            Err(e)
        }
    }
}

pub async fn restart_missing_id() -> Result<HttpResponse> {
    Err(BridgeError::InvalidProcessId("identifier is missing".to_string()))
}

/// `POST /api/processes/{id}/{start|stop|restart}`
pub async fn control_process(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (raw_id, raw_action) = path.into_inner();
    let action: ControlAction = match raw_action.parse() {
        Ok(action) => action,
        Err(e) => {
            return Ok(HttpResponse::NotFound().json(serde_json::json!({
                "success": false,
                "message": "Unknown action",
                "error": e,
            })))
        }
    };
    let id = ProcessId::parse(&raw_id)?;

    let result = data.control.execute(action, &id).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// `POST /api/remote/restart`，body `{host, id, keyPath?}`
pub async fn restart_remote(
    data: web::Data<AppState>,
    req: web::Json<RemoteRestartRequest>,
) -> Result<HttpResponse> {
    let id = ProcessId::from_value(&req.id)?;
    let key_path = req.key_path.as_deref().map(Path::new);

    log::info!("Remote restart of process {} on {}", id, req.host.trim());
    let result = data.control.restart_remote(&req.host, &id, key_path).await?;
    Ok(HttpResponse::Ok().json(result))
}
