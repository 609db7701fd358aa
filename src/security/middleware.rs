// ARCHITECTURE: Security Middleware - Layered Request Pipeline
//
// An explicit ordered pipeline, each stage a fallible check that
// short-circuits on the first rejection:
// 1. BLOCKED IP: suspicious sources get a fixed rejection without touching
//    any rate-limit budget.
// 2. REQUEST SIZE: declared Content-Length against the configured maximum.
// 3. PATTERN SCAN: path and query segments against the injection heuristics.
// 4. IDENTITY: bearer header or access_token cookie resolved through the
//    token service and identity store into a SecurityContext.
// 5. RATE LIMIT: keyed by the authenticated subject when present, else by
//    source IP, so authenticated abuse cannot bypass its budget by rotating
//    addresses.
// Every response leaving the pipeline carries the standard security headers.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::AppState;
use crate::auth::TokenKind;
use crate::error::{Error, PolicyViolation, Result};
use crate::security::gate::{RateLimitDecision, SecurityEventKind, SecurityGate};
use crate::security::sanitize;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Resolved request identity, inserted as a request extension for handlers
/// and per-route permission guards.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub subject_id: Option<String>,
    pub role: Option<String>,
    pub source_ip: String,
}

impl SecurityContext {
    pub fn anonymous(source_ip: String) -> Self {
        Self {
            subject_id: None,
            role: None,
            source_ip,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject_id.is_some()
    }
}

/// CORE FUNCTION: the full pipeline as an axum middleware.
pub async fn security_pipeline(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let headers = request.headers().clone();
    let ip = extract_client_ip(&headers);

    blocked_ip_stage(&state.gate, &ip).await?;

    if let Some(length) = content_length(&headers) {
        state.gate.check_request_size(&ip, length).await?;
    }

    pattern_stage(&state.gate, &ip, request.uri().path(), request.uri().query()).await?;

    let context = identity_stage(&state, &headers, &ip).await?;

    let rate_key = context.subject_id.as_deref().unwrap_or(&ip).to_string();
    if let RateLimitDecision::Limited { retry_after_secs } =
        state.gate.check_rate_limit(&rate_key, &ip).await
    {
        warn!(key = %rate_key, ip = %ip, "request rate limited");
        return Err(Error::RateLimited { retry_after_secs });
    }

    debug!(
        ip = %ip,
        subject = context.subject_id.as_deref().unwrap_or("-"),
        path = request.uri().path(),
        "request passed security pipeline"
    );

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;
    add_security_headers(response.headers_mut());
    Ok(response)
}

/// Stage 1: reject requests from IPs already flagged as suspicious.
pub async fn blocked_ip_stage(gate: &SecurityGate, ip: &str) -> Result<()> {
    if gate.is_suspicious(ip) {
        gate.note_blocked(ip).await;
        return Err(Error::Policy(PolicyViolation::BlockedIp));
    }
    Ok(())
}

/// Stage 3: scan the path and each query segment with the injection
/// heuristics. A hit is recorded for audit and rejects the request.
pub async fn pattern_stage(
    gate: &SecurityGate,
    ip: &str,
    path: &str,
    query: Option<&str>,
) -> Result<()> {
    let mut candidates: Vec<&str> = vec![path];
    if let Some(query) = query {
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some((key, value)) => {
                    candidates.push(key);
                    candidates.push(value);
                }
                None => candidates.push(pair),
            }
        }
    }

    for candidate in candidates {
        if let Some(class) = sanitize::suspicious_class(candidate) {
            gate.record_event(
                ip,
                SecurityEventKind::SuspiciousPattern,
                format!("{class} pattern in request"),
            )
            .await;
            return Err(Error::Policy(PolicyViolation::SuspiciousPattern(
                class.to_string(),
            )));
        }
    }
    Ok(())
}

/// Stage 4: resolve the caller's identity from a bearer header or the access
/// cookie. A missing credential yields an anonymous context — per-route
/// guards decide whether that is acceptable. A presented-but-bad credential
/// is an authentication failure, recorded for audit.
pub async fn identity_stage(
    state: &AppState,
    headers: &HeaderMap,
    ip: &str,
) -> Result<SecurityContext> {
    let token = match extract_access_token(headers) {
        Some(token) => token,
        None => return Ok(SecurityContext::anonymous(ip.to_string())),
    };

    let claims = match state.tokens.verify(&token, TokenKind::Access) {
        Ok(claims) => claims,
        Err(err) => {
            state
                .gate
                .record_event(ip, SecurityEventKind::AuthFailure, err.to_string())
                .await;
            return Err(err.into());
        }
    };

    // The identity store is authoritative for the current role; the claim is
    // only a fallback for subjects the store does not know yet.
    let role = state
        .identity
        .role_of(&claims.sub)
        .unwrap_or_else(|| claims.role.clone());

    Ok(SecurityContext {
        subject_id: Some(claims.sub),
        role: Some(role),
        source_ip: ip.to_string(),
    })
}

/// Per-route guard: the context must be authenticated and its role must hold
/// the permission.
pub fn require_permission(
    state: &AppState,
    context: &SecurityContext,
    permission: &str,
) -> Result<()> {
    let role = context.role.as_deref().ok_or(Error::Unauthenticated)?;
    if state.authz.has_permission(role, permission) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

/// Client address from proxy headers, in trust order.
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Access credential: Authorization bearer header, else the access cookie.
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
        .or_else(|| extract_cookie(headers, ACCESS_COOKIE))
}

/// A named cookie's value from the Cookie header.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

pub fn add_security_headers(headers: &mut HeaderMap) {
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitConfig;

    fn gate() -> SecurityGate {
        SecurityGate::new(&LimitConfig {
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 100,
            violation_threshold: 5,
            max_request_size: "1kb".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "5.6.7.8".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), "1.2.3.4");

        headers.remove("x-forwarded-for");
        assert_eq!(extract_client_ip(&headers), "5.6.7.8");

        headers.remove("x-real-ip");
        assert_eq!(extract_client_ip(&headers), "unknown");
    }

    #[test]
    fn access_token_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_access_token(&headers).as_deref(), Some("abc.def.ghi"));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; access_token=jkl.mno.pqr; lang=en".parse().unwrap(),
        );
        assert_eq!(extract_access_token(&headers).as_deref(), Some("jkl.mno.pqr"));

        assert_eq!(extract_access_token(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_parsing_handles_missing_names() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "a=1; b=2".parse().unwrap());
        assert_eq!(extract_cookie(&headers, "b").as_deref(), Some("2"));
        assert_eq!(extract_cookie(&headers, "c"), None);
    }

    #[tokio::test]
    async fn blocked_ip_stage_passes_unknown_ips() {
        let gate = gate();
        assert!(blocked_ip_stage(&gate, "1.2.3.4").await.is_ok());
    }

    #[tokio::test]
    async fn pattern_stage_rejects_injection_in_query() {
        let gate = gate();
        let result = pattern_stage(
            &gate,
            "1.2.3.4",
            "/api/v1/books",
            Some("title=' OR '1'='1"),
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::Policy(PolicyViolation::SuspiciousPattern(_)))
        ));
        let stats = gate.stats().await;
        assert_eq!(stats.events_by_type.get("suspicious_pattern"), Some(&1));
    }

    #[tokio::test]
    async fn pattern_stage_rejects_traversal_in_path() {
        let gate = gate();
        let result = pattern_stage(&gate, "1.2.3.4", "/files/../../etc/passwd", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pattern_stage_passes_ordinary_queries() {
        let gate = gate();
        assert!(
            pattern_stage(
                &gate,
                "1.2.3.4",
                "/api/v1/books",
                Some("title=monte+cristo&page=2"),
            )
            .await
            .is_ok()
        );
    }

    #[test]
    fn security_headers_are_applied() {
        let mut headers = HeaderMap::new();
        add_security_headers(&mut headers);
        assert_eq!(headers.get("X-Content-Type-Options").unwrap(), "nosniff");
        assert_eq!(headers.get("X-Frame-Options").unwrap(), "DENY");
    }
}
