use axum::{Extension, Json, extract::State};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::Result;
use crate::security::middleware::{SecurityContext, require_permission};

/// Operational snapshot for monitoring tooling. Requires `security:stats`,
/// which only the admin role holds.
pub async fn security_stats(
    State(state): State<AppState>,
    Extension(context): Extension<SecurityContext>,
) -> Result<Json<Value>> {
    require_permission(&state, &context, "security:stats")?;

    let stats = state.gate.stats().await;
    let metrics = state.gate.metrics().await;

    Ok(Json(json!({
        "stats": stats,
        "metrics": metrics,
        "revoked_tokens": state.tokens.revoked_len(),
    })))
}
