//! The compiled-in catalog.

use super::{CatalogDefinition, Permission, Role};

/// Built-in permission IDs.
pub mod perm {
    use crate::bitgroup::PermissionId;

    /// Read user accounts.
    pub const USER_READ: PermissionId = 1;
    /// Create user accounts.
    pub const USER_CREATE: PermissionId = 2;
    /// Update user accounts.
    pub const USER_UPDATE: PermissionId = 3;
    /// Delete user accounts.
    pub const USER_DELETE: PermissionId = 4;
    /// Read roles.
    pub const ROLE_READ: PermissionId = 5;
    /// Create roles.
    pub const ROLE_CREATE: PermissionId = 6;
    /// Update roles.
    pub const ROLE_UPDATE: PermissionId = 7;
    /// Delete roles.
    pub const ROLE_DELETE: PermissionId = 8;
    /// Assign roles to users.
    pub const ROLE_ASSIGN: PermissionId = 9;
    /// Read permissions.
    pub const PERMISSION_READ: PermissionId = 10;
    /// Grant permissions to roles.
    pub const PERMISSION_GRANT: PermissionId = 11;
    /// Revoke permissions from roles.
    pub const PERMISSION_REVOKE: PermissionId = 12;
    /// Read own profile.
    pub const PROFILE_READ: PermissionId = 13;
    /// Update own profile.
    pub const PROFILE_UPDATE: PermissionId = 14;
    /// Upload files.
    pub const UPLOAD_CREATE: PermissionId = 15;
    /// Revoke other users' tokens.
    pub const TOKEN_REVOKE: PermissionId = 16;
}

const PERMISSIONS: &[(u32, &str, &str)] = &[
    (perm::USER_READ, "user:read", "List and view user accounts"),
    (perm::USER_CREATE, "user:create", "Create user accounts"),
    (perm::USER_UPDATE, "user:update", "Update user accounts"),
    (perm::USER_DELETE, "user:delete", "Delete user accounts"),
    (perm::ROLE_READ, "role:read", "List and view roles"),
    (perm::ROLE_CREATE, "role:create", "Create roles"),
    (perm::ROLE_UPDATE, "role:update", "Update roles"),
    (perm::ROLE_DELETE, "role:delete", "Delete roles"),
    (perm::ROLE_ASSIGN, "role:assign", "Assign a role to a user"),
    (perm::PERMISSION_READ, "permission:read", "List permissions"),
    (perm::PERMISSION_GRANT, "permission:grant", "Grant permissions to a role"),
    (perm::PERMISSION_REVOKE, "permission:revoke", "Revoke permissions from a role"),
    (perm::PROFILE_READ, "profile:read", "View own profile"),
    (perm::PROFILE_UPDATE, "profile:update", "Update own profile"),
    (perm::UPLOAD_CREATE, "upload:create", "Upload files"),
    (perm::TOKEN_REVOKE, "token:revoke", "Revoke issued tokens"),
];

pub(super) fn definition() -> CatalogDefinition {
    let permissions: Vec<Permission> = PERMISSIONS
        .iter()
        .map(|&(id, name, description)| Permission::new(id, name, description))
        .collect();

    let admin = Role::new(1, "admin", permissions.iter().map(|p| p.id).collect());
    let user = Role::new(
        2,
        "user",
        vec![perm::PROFILE_READ, perm::PROFILE_UPDATE, perm::UPLOAD_CREATE],
    );

    CatalogDefinition {
        permissions,
        roles: vec![admin, user],
    }
}
