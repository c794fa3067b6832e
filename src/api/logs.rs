use actix_web::web::{self, Bytes};
use actix_web::HttpResponse;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::Result;
use crate::models::ProcessId;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

/// `GET /api/processes/{id}/logs?lines=N`
pub async fn get_logs(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LogsQuery>,
) -> Result<HttpResponse> {
    let id = ProcessId::parse(&path)?;
    let lines = query.lines.unwrap_or(data.default_log_lines);

    let snapshot = data.log_tail.get_logs(&id, lines).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

/// `POST /api/processes/{id}/stream`：打开或加入实时日志会话
pub async fn open_stream(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let id = ProcessId::parse(&path)?;
    let channel = data.bridge.open_session(&id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "channel": channel,
        "message": "Log streaming started",
    })))
}

/// `DELETE /api/processes/{id}/stream`，对没有会话的进程也返回成功
pub async fn close_stream(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let id = ProcessId::parse(&path)?;
    let closed = data.bridge.close_session(&id).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "closed": closed,
        "message": if closed { "Log streaming stopped" } else { "No active log stream" },
    })))
}

/// `GET /api/channels/{channel}/events`：把 broker 频道转成 SSE
pub async fn channel_events(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let channel = path.into_inner();
    let rx = data.broker.subscribe(&channel);
    log::info!("📡 SSE subscriber attached to {}", channel);

    let events = BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(message) => Some(Ok::<_, Infallible>(Bytes::from(message.to_sse()))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            log::warn!("SSE subscriber on {} skipped {} messages", channel, skipped);
            None
        }
    });
    let stream = tokio_stream::once(Ok(Bytes::from_static(b": connected\n\n"))).chain(events);

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}
