// ARCHITECTURE: Auth Module - Identity and Access Control Core
//
// Two cooperating pieces:
// 1. TOKEN SERVICE (token.rs): JWT issuance, verification, single-use refresh
//    rotation, and jti-keyed revocation with bounded in-memory records.
// 2. RBAC (rbac.rs): cumulative role permission model and the authorization
//    service answering permission, ownership, and seniority questions.
//
// The identity store itself is an external collaborator; this module only
// defines the lookup seam it is consumed through.

pub mod rbac;
pub mod token;

pub use rbac::{AuthorizationService, Subject};
pub use token::{Claims, TokenKind, TokenPair, TokenService};

use std::collections::HashMap;

/// Role lookup by subject id, backed by whatever user store the surrounding
/// application owns. Consulted at authorization time so a role change takes
/// effect before the subject's tokens expire.
pub trait IdentityStore: Send + Sync {
    fn role_of(&self, subject_id: &str) -> Option<String>;
}

/// Process-local store for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    roles: HashMap<String, String>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, subject_id: impl Into<String>, role: impl Into<String>) -> Self {
        self.roles.insert(subject_id.into(), role.into());
        self
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn role_of(&self, subject_id: &str) -> Option<String> {
        self.roles.get(subject_id).cloned()
    }
}
