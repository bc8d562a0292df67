use axum::Json;
use dealspot_shared::types::api::HealthResponse;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy("dealspot-chat", env!("CARGO_PKG_VERSION")))
}
