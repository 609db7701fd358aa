// ARCHITECTURE: Role Model - Cumulative Role-Based Access Control
//
// Roles are ranked by a strictly increasing level and their permission sets
// are built by explicit ordered composition: the borrower set is a literal
// list, and each higher role is the union of the next-lower role's finalized
// set plus its own additions. Monotonicity (borrower ⊆ librarian ⊆ admin) is
// asserted by tests, not re-checked at runtime. Role data is immutable after
// process start, so lookups take no locks.

use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};

pub const BORROWER: &str = "borrower";
pub const LIBRARIAN: &str = "librarian";
pub const ADMIN: &str = "admin";

/// A named role with its seniority level and cumulative permission set.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: &'static str,
    pub level: u8,
    pub permissions: BTreeSet<&'static str>,
}

/// An authenticated subject as seen by authorization checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub role: String,
}

impl Subject {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

// Base role: literal permission list, defined first.
fn borrower_permissions() -> BTreeSet<&'static str> {
    [
        "book:read",
        "book:search",
        "borrow:create",
        "borrow:read:own",
        "borrow:return:own",
        "review:create",
        "review:read",
        "review:update:own",
        "review:delete:own",
        "profile:read:own",
        "profile:update:own",
    ]
    .into_iter()
    .collect()
}

// Librarian: union over the already-finalized borrower set.
fn librarian_permissions() -> BTreeSet<&'static str> {
    let mut permissions = borrower_permissions();
    permissions.extend([
        "book:create",
        "book:update",
        "borrow:read:any",
        "borrow:update:any",
        "review:moderate",
        "user:read",
        "report:view",
    ]);
    permissions
}

// Admin: union over the already-finalized librarian set.
fn admin_permissions() -> BTreeSet<&'static str> {
    let mut permissions = librarian_permissions();
    permissions.extend([
        "book:delete",
        "user:create",
        "user:update",
        "user:delete",
        "role:manage",
        "security:stats",
    ]);
    permissions
}

static ROLES: Lazy<HashMap<&'static str, Role>> = Lazy::new(|| {
    let roles = [
        Role {
            name: BORROWER,
            level: 1,
            permissions: borrower_permissions(),
        },
        Role {
            name: LIBRARIAN,
            level: 2,
            permissions: librarian_permissions(),
        },
        Role {
            name: ADMIN,
            level: 3,
            permissions: admin_permissions(),
        },
    ];
    roles.into_iter().map(|role| (role.name, role)).collect()
});

/// Answers permission and ownership questions against the static role model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationService;

impl AuthorizationService {
    pub fn new() -> Self {
        Self
    }

    /// Unknown roles hold no permissions.
    pub fn has_permission(&self, role: &str, permission: &str) -> bool {
        ROLES
            .get(role)
            .map(|r| r.permissions.contains(permission))
            .unwrap_or(false)
    }

    pub fn has_any(&self, role: &str, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.has_permission(role, p))
    }

    pub fn has_all(&self, role: &str, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.has_permission(role, p))
    }

    /// Global access (`any_permission`) is checked first; ownership is never
    /// consulted once it is granted. Otherwise the subject needs the scoped
    /// `own_permission` and must actually own the resource.
    pub fn can_access_resource(
        &self,
        subject: &Subject,
        resource_owner_id: &str,
        own_permission: &str,
        any_permission: &str,
    ) -> bool {
        if self.has_permission(&subject.role, any_permission) {
            return true;
        }
        self.has_permission(&subject.role, own_permission) && subject.id == resource_owner_id
    }

    /// Compares numeric role levels; false when either role is unknown.
    pub fn has_higher_or_equal_role(&self, subject_role: &str, other_role: &str) -> bool {
        match (ROLES.get(subject_role), ROLES.get(other_role)) {
            (Some(a), Some(b)) => a.level >= b.level,
            _ => false,
        }
    }

    /// The role's cumulative permission set, empty for unknown roles.
    pub fn role_permissions(&self, role: &str) -> BTreeSet<&'static str> {
        ROLES
            .get(role)
            .map(|r| r.permissions.clone())
            .unwrap_or_default()
    }

    pub fn role_level(&self, role: &str) -> Option<u8> {
        ROLES.get(role).map(|r| r.level)
    }
}
