use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{Error, Result};

/// Minimum accepted length for a signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt: JwtConfig,
    pub limits: LimitConfig,
    pub cookies: CookieConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    pub violation_threshold: u32,
    pub max_request_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    pub max_age_secs: i64,
    pub secure: bool,
    pub production: bool,
}

impl SecurityConfig {
    /// Load the configuration from the environment and validate it.
    ///
    /// Secret validation is fatal: a missing, short, or shared secret halts
    /// startup rather than running with a guessable signing key.
    pub fn from_env() -> Result<Self> {
        let access_ttl_secs = env_i64("JWT_ACCESS_TTL_SECS", 900);

        let config = Self {
            jwt: JwtConfig {
                access_secret: env::var("JWT_ACCESS_SECRET").unwrap_or_default(),
                refresh_secret: env::var("JWT_REFRESH_SECRET").unwrap_or_default(),
                access_ttl_secs,
                refresh_ttl_secs: env_i64("JWT_REFRESH_TTL_SECS", 604_800),
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "shelfguard".to_string()),
                audience: env::var("JWT_AUDIENCE")
                    .unwrap_or_else(|_| "shelfguard-clients".to_string()),
            },
            limits: LimitConfig {
                rate_limit_window_ms: env_u64("RATE_LIMIT_WINDOW_MS", 60_000),
                rate_limit_max_requests: env_u32("RATE_LIMIT_MAX_REQUESTS", 100),
                violation_threshold: env_u32("VIOLATION_THRESHOLD", 5),
                max_request_size: env::var("MAX_REQUEST_SIZE")
                    .unwrap_or_else(|_| "10mb".to_string()),
            },
            cookies: CookieConfig {
                max_age_secs: env_i64("COOKIE_MAX_AGE_SECS", access_ttl_secs),
                secure: env::var("COOKIE_SECURE")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
                production: env::var("APP_ENV")
                    .map(|v| v == "production")
                    .unwrap_or(false),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt.access_secret.is_empty() {
            return Err(Error::Config("JWT_ACCESS_SECRET is not set".to_string()));
        }
        if self.jwt.refresh_secret.is_empty() {
            return Err(Error::Config("JWT_REFRESH_SECRET is not set".to_string()));
        }
        if self.jwt.access_secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "JWT_ACCESS_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.jwt.refresh_secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "JWT_REFRESH_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        // A shared secret would let a refresh token pass as an access token.
        if self.jwt.access_secret == self.jwt.refresh_secret {
            return Err(Error::Config(
                "access and refresh secrets must be distinct".to_string(),
            ));
        }
        if self.jwt.access_ttl_secs <= 0 || self.jwt.refresh_ttl_secs <= 0 {
            return Err(Error::Config("token lifetimes must be positive".to_string()));
        }
        if self.jwt.access_ttl_secs >= self.jwt.refresh_ttl_secs {
            return Err(Error::Config(
                "access token lifetime must be shorter than refresh token lifetime".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config() -> SecurityConfig {
    SecurityConfig {
        jwt: JwtConfig {
            access_secret: "test-access-secret-0123456789-0123456789".to_string(),
            refresh_secret: "test-refresh-secret-0123456789-0123456789".to_string(),
            access_ttl_secs: 900,
            refresh_ttl_secs: 604_800,
            issuer: "shelfguard-test".to_string(),
            audience: "shelfguard-test-clients".to_string(),
        },
        limits: LimitConfig {
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 100,
            violation_threshold: 5,
            max_request_size: "10mb".to_string(),
        },
        cookies: CookieConfig {
            max_age_secs: 900,
            secure: false,
            production: false,
        },
    }
}
