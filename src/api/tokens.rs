// ARCHITECTURE: Token Endpoints - Refresh Rotation and Logout
//
// The refresh token travels in an HttpOnly cookie (or the JSON body as a
// fallback for non-browser clients); rotation consumes it and re-sets both
// auth cookies. Logout always revokes the presented tokens — a logout that
// leaves the token usable is a gap, not a feature.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, header::SET_COOKIE},
    response::IntoResponse,
};
use serde_json::{Value, json};
use tracing::info;

use crate::AppState;
use crate::auth::TokenPair;
use crate::config::CookieConfig;
use crate::error::{Error, Result};
use crate::security::middleware::{ACCESS_COOKIE, REFRESH_COOKIE, extract_access_token, extract_cookie};
use crate::security::sanitize::deep_sanitize;

/// POST /api/v1/auth/refresh — single-use refresh rotation.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<impl IntoResponse> {
    let refresh_token = extract_cookie(&headers, REFRESH_COOKIE)
        .or_else(|| {
            let Json(payload) = body?;
            let sanitized = deep_sanitize(payload);
            sanitized
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        })
        .ok_or_else(|| Error::Validation("refresh token is required".to_string()))?;

    let pair = state.tokens.rotate(&refresh_token)?;
    let response_headers = auth_cookie_headers(&state, &pair)?;

    Ok((response_headers, Json(pair)))
}

/// POST /api/v1/auth/logout — revoke the presented tokens and clear cookies.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    let access = extract_access_token(&headers);
    let refresh = extract_cookie(&headers, REFRESH_COOKIE);

    if access.is_none() && refresh.is_none() {
        return Err(Error::Unauthenticated);
    }

    if let Some(token) = access {
        state.tokens.revoke(&token)?;
    }
    if let Some(token) = refresh {
        state.tokens.revoke(&token)?;
    }

    info!("subject logged out, tokens revoked");

    let mut response_headers = HeaderMap::new();
    append_cookie(&mut response_headers, &clear_cookie(ACCESS_COOKIE, &state.config.cookies))?;
    append_cookie(&mut response_headers, &clear_cookie(REFRESH_COOKIE, &state.config.cookies))?;

    Ok((response_headers, Json(json!({ "status": "logged_out" }))))
}

fn auth_cookie_headers(state: &AppState, pair: &TokenPair) -> Result<HeaderMap> {
    let cookies = &state.config.cookies;
    let mut headers = HeaderMap::new();
    append_cookie(
        &mut headers,
        &auth_cookie(ACCESS_COOKIE, &pair.access_token, cookies.max_age_secs, cookies),
    )?;
    append_cookie(
        &mut headers,
        &auth_cookie(
            REFRESH_COOKIE,
            &pair.refresh_token,
            state.config.jwt.refresh_ttl_secs,
            cookies,
        ),
    )?;
    Ok(headers)
}

fn auth_cookie(name: &str, value: &str, max_age_secs: i64, config: &CookieConfig) -> String {
    let same_site = if config.production { "Strict" } else { "Lax" };
    let mut cookie =
        format!("{name}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite={same_site}");
    if config.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_cookie(name: &str, config: &CookieConfig) -> String {
    auth_cookie(name, "", 0, config)
}

fn append_cookie(headers: &mut HeaderMap, cookie: &str) -> Result<()> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| Error::Validation("invalid cookie value".to_string()))?;
    headers.append(SET_COOKIE, value);
    Ok(())
}
