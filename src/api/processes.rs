use actix_web::{web, HttpResponse};

use crate::error::Result;
use crate::state::AppState;

pub async fn list_processes(data: web::Data<AppState>) -> Result<HttpResponse> {
    let records = data.inventory.list_processes().await?;
    Ok(HttpResponse::Ok().json(records))
}

pub async fn summary(data: web::Data<AppState>) -> Result<HttpResponse> {
    let snapshot = data.inventory.get_metrics().await?;
    Ok(HttpResponse::Ok().json(snapshot))
}
