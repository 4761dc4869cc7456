//! Permission and role catalog.
//!
//! The catalog is fixed at deploy time: either the built-in default or a
//! JSON5 catalog file named by configuration. It is audited once at startup
//! and is read-only afterwards.
//!
//! Permission IDs are stable. Adding a permission means appending an entry
//! with the next ID; existing IDs are never renumbered, since issued tokens
//! carry them in their bit-group claims.

mod builtin;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitgroup::{PermissionId, PermissionSet};

pub use builtin::perm;

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No permission with this ID or name.
    #[error("Permission not found: {0}")]
    PermissionNotFound(String),

    /// No role with this name.
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// The startup audit found one or more problems.
    #[error("Catalog audit failed: {}", format_issues(.0))]
    AuditFailed(Vec<AuditIssue>),

    /// IO error reading a catalog file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),
}

/// A single problem found by [`PermissionCatalog::self_audit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditIssue {
    /// Permission ID below 1.
    InvalidPermissionId(String),
    /// Two permissions share an ID.
    DuplicatePermissionId(PermissionId),
    /// Two permissions share a name.
    DuplicatePermissionName(String),
    /// Permission with an empty name.
    EmptyPermissionName(PermissionId),
    /// Role ID below 1.
    InvalidRoleId(String),
    /// Two roles share an ID.
    DuplicateRoleId(u32),
    /// Two roles share a name.
    DuplicateRoleName(String),
    /// Role with an empty name.
    EmptyRoleName(u32),
    /// A role grants a permission ID that is not in the catalog.
    UnknownGrant {
        /// Role name.
        role: String,
        /// Missing permission ID.
        permission: PermissionId,
    },
}

impl fmt::Display for AuditIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPermissionId(name) => write!(f, "permission '{name}' has id < 1"),
            Self::DuplicatePermissionId(id) => write!(f, "duplicate permission id {id}"),
            Self::DuplicatePermissionName(name) => write!(f, "duplicate permission name '{name}'"),
            Self::EmptyPermissionName(id) => write!(f, "permission {id} has an empty name"),
            Self::InvalidRoleId(name) => write!(f, "role '{name}' has id < 1"),
            Self::DuplicateRoleId(id) => write!(f, "duplicate role id {id}"),
            Self::DuplicateRoleName(name) => write!(f, "duplicate role name '{name}'"),
            Self::EmptyRoleName(id) => write!(f, "role {id} has an empty name"),
            Self::UnknownGrant { role, permission } => {
                write!(f, "role '{role}' grants unknown permission {permission}")
            }
        }
    }
}

fn format_issues(issues: &[AuditIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A named permission with a stable numeric ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Stable ID, dense from 1.
    pub id: PermissionId,
    /// Unique name, e.g. `user:read`.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

impl Permission {
    /// Create a permission.
    #[must_use]
    pub fn new(id: PermissionId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A role and the permissions it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role ID.
    pub id: u32,
    /// Unique symbolic name, e.g. `admin`.
    pub name: String,
    /// Permission IDs granted to holders of this role.
    #[serde(default)]
    pub permissions: Vec<PermissionId>,
}

impl Role {
    /// Create a role.
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, permissions: Vec<PermissionId>) -> Self {
        Self {
            id,
            name: name.into(),
            permissions,
        }
    }
}

/// On-disk catalog layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDefinition {
    /// Permissions in ID order.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Roles.
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// Immutable registry of permissions and roles.
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    permissions: Vec<Permission>,
    roles: Vec<Role>,
    by_id: HashMap<PermissionId, usize>,
    by_name: HashMap<String, usize>,
}

impl PermissionCatalog {
    /// Build a catalog. Entries are ordered by ID.
    ///
    /// Construction never fails; call [`Self::self_audit`] before serving.
    #[must_use]
    pub fn new(mut permissions: Vec<Permission>, roles: Vec<Role>) -> Self {
        permissions.sort_by_key(|p| p.id);

        let mut by_id = HashMap::with_capacity(permissions.len());
        let mut by_name = HashMap::with_capacity(permissions.len());
        for (index, permission) in permissions.iter().enumerate() {
            by_id.entry(permission.id).or_insert(index);
            by_name.entry(permission.name.clone()).or_insert(index);
        }

        Self {
            permissions,
            roles,
            by_id,
            by_name,
        }
    }

    /// The compiled-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_definition(builtin::definition())
    }

    /// Build from a parsed definition.
    #[must_use]
    pub fn from_definition(definition: CatalogDefinition) -> Self {
        Self::new(definition.permissions, definition.roles)
    }

    /// Load a JSON5 catalog file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let definition: CatalogDefinition = json5::from_str(&content)?;
        Ok(Self::from_definition(definition))
    }

    /// All permissions in ID order.
    #[must_use]
    pub fn all(&self) -> &[Permission] {
        &self.permissions
    }

    /// All roles in declaration order.
    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Look up a permission by ID.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::PermissionNotFound`] if absent.
    pub fn by_id(&self, id: PermissionId) -> Result<&Permission, CatalogError> {
        self.by_id
            .get(&id)
            .map(|&index| &self.permissions[index])
            .ok_or_else(|| CatalogError::PermissionNotFound(id.to_string()))
    }

    /// Look up a permission by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::PermissionNotFound`] if absent.
    pub fn by_name(&self, name: &str) -> Result<&Permission, CatalogError> {
        self.by_name
            .get(name)
            .map(|&index| &self.permissions[index])
            .ok_or_else(|| CatalogError::PermissionNotFound(name.to_string()))
    }

    /// Look up a role by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::RoleNotFound`] if absent.
    pub fn role_by_name(&self, name: &str) -> Result<&Role, CatalogError> {
        self.roles
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| CatalogError::RoleNotFound(name.to_string()))
    }

    /// Permission IDs granted to a role.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::RoleNotFound`] if the role is unknown.
    pub fn grants_for(&self, role: &str) -> Result<&[PermissionId], CatalogError> {
        self.role_by_name(role).map(|r| r.permissions.as_slice())
    }

    /// Names of the catalog permissions present in `set`, in ID order.
    ///
    /// IDs in the set that the catalog does not know are skipped.
    #[must_use]
    pub fn names_in(&self, set: &PermissionSet) -> Vec<&str> {
        set.ids()
            .filter_map(|id| self.by_id(id).ok())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Verify catalog invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::AuditFailed`] listing every problem found.
    pub fn self_audit(&self) -> Result<(), CatalogError> {
        let mut issues = Vec::new();

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for permission in &self.permissions {
            if permission.id < 1 {
                issues.push(AuditIssue::InvalidPermissionId(permission.name.clone()));
            }
            if !ids.insert(permission.id) {
                issues.push(AuditIssue::DuplicatePermissionId(permission.id));
            }
            if permission.name.trim().is_empty() {
                issues.push(AuditIssue::EmptyPermissionName(permission.id));
            } else if !names.insert(permission.name.as_str()) {
                issues.push(AuditIssue::DuplicatePermissionName(permission.name.clone()));
            }
        }

        let mut role_ids = HashSet::new();
        let mut role_names = HashSet::new();
        for role in &self.roles {
            if role.id < 1 {
                issues.push(AuditIssue::InvalidRoleId(role.name.clone()));
            }
            if !role_ids.insert(role.id) {
                issues.push(AuditIssue::DuplicateRoleId(role.id));
            }
            if role.name.trim().is_empty() {
                issues.push(AuditIssue::EmptyRoleName(role.id));
            } else if !role_names.insert(role.name.as_str()) {
                issues.push(AuditIssue::DuplicateRoleName(role.name.clone()));
            }
            for &permission in &role.permissions {
                if !ids.contains(&permission) {
                    issues.push(AuditIssue::UnknownGrant {
                        role: role.name.clone(),
                        permission,
                    });
                }
            }
        }

        if issues.is_empty() {
            tracing::debug!(
                permissions = self.permissions.len(),
                roles = self.roles.len(),
                "Catalog audit passed"
            );
            Ok(())
        } else {
            Err(CatalogError::AuditFailed(issues))
        }
    }
}
