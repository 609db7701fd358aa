pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod security;

pub use config::SecurityConfig;
pub use error::{Error, PolicyViolation, Result, TokenError};

use std::sync::Arc;

use auth::{AuthorizationService, IdentityStore, TokenService};
use security::SecurityGate;

/// Shared service handles threaded through the router and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SecurityConfig>,
    pub tokens: Arc<TokenService>,
    pub gate: Arc<SecurityGate>,
    pub authz: AuthorizationService,
    pub identity: Arc<dyn IdentityStore>,
}

impl AppState {
    /// Validates the configuration and builds the service graph. A bad
    /// configuration is fatal here, before any listener binds.
    pub fn new(config: SecurityConfig, identity: Arc<dyn IdentityStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tokens: Arc::new(TokenService::new(config.jwt.clone())),
            gate: Arc::new(SecurityGate::new(&config.limits)?),
            authz: AuthorizationService::new(),
            config: Arc::new(config),
            identity,
        })
    }
}
