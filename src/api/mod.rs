pub mod control;
pub mod logs;
pub mod metrics;
pub mod processes;

use actix_web::{web, HttpResponse, Responder};

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

/// 所有 HTTP 路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::get_metrics))
        .route("/api/processes", web::get().to(processes::list_processes))
        .route("/api/processes/summary", web::get().to(processes::summary))
        .route("/api/processes/{id}/logs", web::get().to(logs::get_logs))
        .service(
            web::resource("/api/processes/{id}/stream")
                .route(web::post().to(logs::open_stream))
                .route(web::delete().to(logs::close_stream))
                .default_service(web::to(method_not_allowed)),
        )
        .route(
            "/api/processes/{id}/{action}",
            web::post().to(control::control_process),
        )
        .service(
            web::resource(["/api/restart", "/api/restart/"])
                .route(web::get().to(control::restart_missing_id))
                .default_service(web::to(method_not_allowed)),
        )
        .service(
            web::resource("/api/restart/{id}")
                .route(web::get().to(control::restart_process))
                .default_service(web::to(method_not_allowed)),
        )
        .route("/api/remote/restart", web::post().to(control::restart_remote))
        .route(
            "/api/channels/{channel}/events",
            web::get().to(logs::channel_events),
        );
}

pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().json(serde_json::json!({
        "success": false,
        "message": "Method not allowed",
        "error_code": "METHOD_NOT_ALLOWED",
    }))
}
