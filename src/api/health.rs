use axum::{http::StatusCode, response::Json};
use serde_json::{Value, json};

pub async fn health_check() -> (StatusCode, Json<Value>) {
    let response = json!({
        "status": "healthy",
        "service": "shelfguard",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    (StatusCode::OK, Json(response))
}
