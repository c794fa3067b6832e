use actix_web::{web, HttpResponse, Responder};

use crate::metrics::METRICS;
use crate::state::AppState;

pub async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    // 先用一次新的 listing 刷新 inventory gauges；失败时其余指标照常输出
    match data.inventory.list_processes().await {
        Ok(records) => METRICS.observe_inventory(&records),
        Err(e) => log::warn!("Skipping inventory refresh for /metrics: {}", e),
    }

    match METRICS.render() {
        Ok(metrics_text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics_text),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}
